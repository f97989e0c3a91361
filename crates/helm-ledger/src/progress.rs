//! Progress ledger extraction from task markdown.
//!
//! The recognized format uses `### <task-id>: <title>` headings, each
//! followed by `prompt:` and `description:` fields whose values continue on
//! indented lines until the next field or heading. Checklist items
//! (`- [ ] <id>: …`) count toward totals but carry no dispatchable fields.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{LedgerError, Result};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^###\s+(?P<id>[A-Za-z0-9._-]+):\s*(?P<title>.*)$").unwrap());
static CHECKLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+\[[ xX]\]\s+(?P<id>[A-Za-z0-9._-]+):").unwrap());
static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?P<name>prompt|description):\s*(?P<rest>.*)$").unwrap());

/// Staleness fingerprint: file mtime plus a content hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFingerprint {
    /// Modification time in milliseconds since the epoch.
    pub mtime_ms: i64,
    /// SHA-256 of the file contents.
    pub content_hash: String,
}

impl SourceFingerprint {
    /// Compute a fingerprint for the file at `path`.
    pub fn compute(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| read_error(path, &e))?;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as i64);
        let content = std::fs::read_to_string(path).map_err(|e| read_error(path, &e))?;
        Ok(Self {
            mtime_ms,
            content_hash: helm_core::hash::sha256_hex(&content),
        })
    }

    /// Compact wire representation, stored as a snapshot fact.
    #[must_use]
    pub fn as_string(&self) -> String {
        format!("{}:{}", self.mtime_ms, &self.content_hash[..16.min(self.content_hash.len())])
    }
}

/// The task located in the source document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    /// Task identifier.
    pub id: String,
    /// Dispatchable prompt text (may be empty when the source omits it).
    pub prompt: String,
    /// Task description/context (may be empty when the source omits it).
    pub description: String,
}

/// Task counts across the whole source document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    /// Total tasks found (headings plus checklist items).
    pub total_tasks: u32,
}

/// Derived view of one task's context, tied to a source fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLedger {
    /// The task this ledger was extracted for.
    pub active_task_id: String,
    /// Located task fields.
    pub current_task: CurrentTask,
    /// Document-wide task counts.
    pub totals: LedgerTotals,
    /// Spec the task belongs to.
    pub spec_name: String,
    /// Source markdown path.
    pub source_path: PathBuf,
    /// Fingerprint of the source at extraction time.
    pub source_fingerprint: SourceFingerprint,
}

impl ProgressLedger {
    /// Re-stat the source and compare fingerprints.
    ///
    /// Returns true when the on-disk file no longer matches this ledger.
    pub fn is_stale(&self) -> bool {
        match SourceFingerprint::compute(&self.source_path) {
            Ok(current) => current != self.source_fingerprint,
            // Unreadable source counts as stale; extraction will surface the
            // typed error.
            Err(_) => true,
        }
    }

    /// Fail unless both prompt and description were found in the source.
    ///
    /// A hard precondition for prompt compilation: the runtime refuses to
    /// synthesize task context it cannot ground in the source document.
    pub fn assert_complete(&self) -> Result<()> {
        let build = self.build_task_prompt();
        if build.missing.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Incomplete {
                task_id: self.active_task_id.clone(),
                missing: build.missing,
            })
        }
    }

    /// Render the ledger-derived task prompt, reporting absent fields.
    ///
    /// Any entry in `missing` is a blocking error for compilation, never a
    /// silent default.
    #[must_use]
    pub fn build_task_prompt(&self) -> TaskPromptBuild {
        let mut missing = Vec::new();
        if self.current_task.prompt.trim().is_empty() {
            missing.push("prompt".to_string());
        }
        if self.current_task.description.trim().is_empty() {
            missing.push("description".to_string());
        }
        let prompt = format!(
            "Task {}\n\n{}\n\nContext: {}",
            self.current_task.id, self.current_task.prompt, self.current_task.description
        );
        TaskPromptBuild { prompt, missing }
    }
}

/// Result of [`ProgressLedger::build_task_prompt`].
#[derive(Clone, Debug, PartialEq)]
pub struct TaskPromptBuild {
    /// Rendered prompt text.
    pub prompt: String,
    /// Names of required fields absent from the source.
    pub missing: Vec<String>,
}

/// Arguments for [`extract_progress_ledger`].
#[derive(Clone, Debug)]
pub struct ExtractArgs<'a> {
    /// Spec the task belongs to.
    pub spec_name: &'a str,
    /// Task to locate.
    pub task_id: &'a str,
    /// Task markdown path.
    pub source_path: &'a Path,
}

/// Read the task markdown, locate `task_id`, and build a fresh ledger.
pub fn extract_progress_ledger(args: &ExtractArgs<'_>) -> Result<ProgressLedger> {
    let content =
        std::fs::read_to_string(args.source_path).map_err(|e| read_error(args.source_path, &e))?;
    let fingerprint = SourceFingerprint::compute(args.source_path)?;

    let mut total_tasks: u32 = 0;
    let mut current: Option<CurrentTask> = None;
    let mut in_target = false;
    // Which field of the target task continuation lines belong to.
    let mut active_field: Option<&'static str> = None;

    for line in content.lines() {
        if let Some(caps) = HEADING_RE.captures(line) {
            total_tasks += 1;
            in_target = &caps["id"] == args.task_id;
            active_field = None;
            if in_target && current.is_none() {
                current = Some(CurrentTask {
                    id: caps["id"].to_string(),
                    prompt: String::new(),
                    description: String::new(),
                });
            }
            continue;
        }
        if CHECKLIST_RE.is_match(line) {
            total_tasks += 1;
            continue;
        }
        if !in_target {
            continue;
        }
        let task = current.as_mut().ok_or_else(|| LedgerError::ParseFailed {
            path: args.source_path.to_path_buf(),
            message: "target block without task".into(),
        })?;
        if let Some(caps) = FIELD_RE.captures(line) {
            let field = if &caps["name"] == "prompt" {
                "prompt"
            } else {
                "description"
            };
            active_field = Some(field);
            append_field(task, field, caps["rest"].trim());
        } else if line.starts_with("  ") || line.starts_with('\t') {
            if let Some(field) = active_field {
                append_field(task, field, line.trim());
            }
        } else if line.trim().is_empty() {
            // Blank lines inside a block keep the active field open.
        } else {
            active_field = None;
        }
    }

    if total_tasks == 0 {
        return Err(LedgerError::ParseFailed {
            path: args.source_path.to_path_buf(),
            message: "no task headings or checklist items found".into(),
        });
    }

    let Some(task) = current else {
        return Err(LedgerError::MissingTasks {
            path: args.source_path.to_path_buf(),
            task_id: args.task_id.to_string(),
        });
    };

    debug!(
        task_id = %task.id,
        total_tasks,
        fingerprint = %fingerprint.as_string(),
        "progress ledger extracted"
    );
    Ok(ProgressLedger {
        active_task_id: task.id.clone(),
        current_task: task,
        totals: LedgerTotals { total_tasks },
        spec_name: args.spec_name.to_string(),
        source_path: args.source_path.to_path_buf(),
        source_fingerprint: fingerprint,
    })
}

fn append_field(task: &mut CurrentTask, field: &str, text: &str) {
    let slot = if field == "prompt" {
        &mut task.prompt
    } else {
        &mut task.description
    };
    if text.is_empty() {
        return;
    }
    if !slot.is_empty() {
        slot.push('\n');
    }
    slot.push_str(text);
}

fn read_error(path: &Path, err: &std::io::Error) -> LedgerError {
    LedgerError::ParseFailed {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const SOURCE: &str = "\
# Spec tasks

### T-001: Wire up the parser
  prompt: Implement the tokenizer for the config grammar.
    Cover quoted strings and escapes.
  description: The grammar lives in docs/grammar.md.

### T-002: Empty task

- [ ] T-003: checklist only
";

    fn write_source(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f.flush().unwrap();
        f
    }

    fn extract(file: &tempfile::NamedTempFile, task_id: &str) -> Result<ProgressLedger> {
        extract_progress_ledger(&ExtractArgs {
            spec_name: "config-parser",
            task_id,
            source_path: file.path(),
        })
    }

    #[test]
    fn extracts_task_fields_with_continuations() {
        let f = write_source(SOURCE);
        let ledger = extract(&f, "T-001").unwrap();
        assert_eq!(ledger.active_task_id, "T-001");
        assert!(ledger.current_task.prompt.contains("tokenizer"));
        assert!(ledger.current_task.prompt.contains("quoted strings"));
        assert!(ledger.current_task.description.contains("grammar.md"));
        assert_eq!(ledger.totals.total_tasks, 3);
    }

    #[test]
    fn missing_task_id_is_typed_error() {
        let f = write_source(SOURCE);
        let err = extract(&f, "T-999").unwrap_err();
        assert_matches!(err, LedgerError::MissingTasks { .. });
        assert_eq!(err.code(), "progress_ledger_missing_tasks");
    }

    #[test]
    fn document_without_tasks_fails_parse() {
        let f = write_source("just prose, no tasks\n");
        let err = extract(&f, "T-001").unwrap_err();
        assert_eq!(err.code(), "progress_ledger_parse_failed");
    }

    #[test]
    fn unreadable_source_fails_parse() {
        let err = extract_progress_ledger(&ExtractArgs {
            spec_name: "s",
            task_id: "T-001",
            source_path: Path::new("/nonexistent/tasks.md"),
        })
        .unwrap_err();
        assert_eq!(err.code(), "progress_ledger_parse_failed");
    }

    #[test]
    fn incomplete_task_blocks_compilation() {
        let f = write_source(SOURCE);
        let ledger = extract(&f, "T-002").unwrap();
        let err = ledger.assert_complete().unwrap_err();
        assert_matches!(err, LedgerError::Incomplete { ref missing, .. } => {
            assert_eq!(missing, &["prompt".to_string(), "description".to_string()]);
        });
        assert_eq!(err.code(), "progress_ledger_incomplete");
    }

    #[test]
    fn build_task_prompt_reports_missing() {
        let f = write_source(SOURCE);
        let complete = extract(&f, "T-001").unwrap().build_task_prompt();
        assert!(complete.missing.is_empty());
        assert!(complete.prompt.starts_with("Task T-001"));

        let incomplete = extract(&f, "T-002").unwrap().build_task_prompt();
        assert_eq!(incomplete.missing.len(), 2);
    }

    #[test]
    fn fingerprint_stable_until_source_changes() {
        let f = write_source(SOURCE);
        let ledger = extract(&f, "T-001").unwrap();
        assert!(!ledger.is_stale());

        // Rewrite the file with different content
        std::fs::write(f.path(), format!("{SOURCE}\n### T-004: New\n")).unwrap();
        assert!(ledger.is_stale());
    }

    #[test]
    fn deleted_source_counts_as_stale() {
        let f = write_source(SOURCE);
        let ledger = extract(&f, "T-001").unwrap();
        let path = f.path().to_path_buf();
        drop(f);
        assert!(!path.exists());
        assert!(ledger.is_stale());
    }
}
