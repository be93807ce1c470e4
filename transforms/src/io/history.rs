//! Persisted execution history for up-to-date checks.
//!
//! Mutable workspaces are keyed by input path, so re-use across builds is
//! gated on the fingerprints of the regular inputs from the last successful
//! execution. The history lives outside the workspace directory, which
//! contains only the transformer output and the results manifest.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::hashing::HashCode;

/// Fingerprints recorded by the last successful execution of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    /// Combined implementation fingerprint of the work.
    pub implementation: Option<HashCode>,
    /// Per-property fingerprint entries of the regular (non-identity) inputs.
    pub regular_inputs: BTreeMap<String, BTreeMap<String, HashCode>>,
}

/// Load history from disk. Missing files yield `None`; an unreadable record
/// is discarded so the next execution rewrites it.
pub fn load_history(path: &Path) -> Result<Option<ExecutionHistory>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("read execution history {}", path.display()));
        }
    };
    match serde_json::from_str(&contents) {
        Ok(history) => {
            debug!(path = %path.display(), "execution history loaded");
            Ok(Some(history))
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "discarding unreadable execution history");
            Ok(None)
        }
    }
}

/// Atomically write history to disk (temp file + rename).
pub fn write_history(path: &Path, history: &ExecutionHistory) -> Result<()> {
    debug!(path = %path.display(), "writing execution history");
    let mut buf = serde_json::to_string_pretty(history)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("history path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp execution history {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace execution history {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies write → read preserves all fields.
    #[test]
    fn history_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("metadata").join("abc.json");

        let mut entries = BTreeMap::new();
        entries.insert("/repo/lib.jar".to_string(), HashCode::of(b"content"));
        let mut regular_inputs = BTreeMap::new();
        regular_inputs.insert("inputArtifact".to_string(), entries);
        let history = ExecutionHistory {
            implementation: Some(HashCode::of(b"impl")),
            regular_inputs,
        };

        write_history(&path, &history).expect("write");
        let loaded = load_history(&path).expect("load");
        assert_eq!(loaded, Some(history));
    }

    #[test]
    fn missing_history_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = load_history(&temp.path().join("missing.json")).expect("load");
        assert_eq!(loaded, None);
    }

    /// A corrupt record must not fail the build; it is discarded.
    #[test]
    fn corrupt_history_is_discarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("abc.json");
        fs::write(&path, "{ not json").expect("write");
        let loaded = load_history(&path).expect("load");
        assert_eq!(loaded, None);
    }
}
