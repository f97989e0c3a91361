//! # helm-core
//!
//! Foundation types and utilities for the Helm dispatch runtime.
//!
//! This crate provides the shared vocabulary that all other Helm crates
//! depend on:
//!
//! - **Facts**: [`facts::Fact`] key/value/confidence triples and the
//!   unique-key merge used by snapshot state
//! - **Text**: [`text::truncate_str`] and friends — UTF-8-safe clipping used
//!   by the compaction engine
//! - **Tokens**: [`tokens::estimate_tokens`] char-based token estimation
//! - **Hashing**: [`hash::sha256_hex`] for prompt hashes and source
//!   fingerprints
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other helm crates.

#![deny(unsafe_code)]

pub mod facts;
pub mod hash;
pub mod text;
pub mod tokens;
