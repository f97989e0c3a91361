//! Char-based token estimation.
//!
//! The runtime never calls a model tokenizer; budgets are enforced against
//! a deterministic estimate of `ceil(chars / chars_per_token)`. The default
//! divisor is 4 chars per token.

/// Default chars-per-token divisor.
pub const DEFAULT_CHARS_PER_TOKEN: u32 = 4;

/// Estimate token count for `text` at the given chars-per-token divisor.
///
/// A divisor of 0 is treated as the default to keep the estimate total.
#[must_use]
pub fn estimate_tokens(text: &str, chars_per_token: u32) -> u32 {
    let divisor = if chars_per_token == 0 {
        DEFAULT_CHARS_PER_TOKEN
    } else {
        chars_per_token
    };
    (text.chars().count() as u32).div_ceil(divisor)
}
