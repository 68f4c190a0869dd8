//! DH-013: Append-only JSONL provenance event logs.
//!
//! Two logs live next to each stack's lock: `events.jsonl` for apply and
//! teardown, `pipeline.jsonl` for deployment pipeline runs.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// RFC 3339 UTC timestamp, second precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Generate a run ID: `r-` followed by 12 hex digits.
pub fn generate_run_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("r-{}", &simple[..12])
}

/// Derive the apply/teardown event log path for a stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Derive the pipeline event log path for a stack.
pub fn pipeline_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("pipeline.jsonl")
}

/// Append a timestamped event to the log at `path`.
pub fn append_event(path: &Path, event: ProvenanceEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create state dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event of a log. A missing log reads as empty.
pub fn read_events(path: &Path) -> Result<Vec<TimestampedEvent>, String> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{} line {}: {}", path.display(), n + 1, e))
        })
        .collect()
}
