//! Workspace layout and providers.
//!
//! A workspace is a directory assigned by the engine per identity:
//!
//! ```text
//! <workspace>/
//!   transformed/    (transformer output)
//!   results.bin     (UTF-8 output manifest, one token per line)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::results::{decode_line, encode_entry};

const OUTPUT_DIR_NAME: &str = "transformed";
const RESULTS_FILE_NAME: &str = "results.bin";

pub fn output_dir(workspace: &Path) -> PathBuf {
    workspace.join(OUTPUT_DIR_NAME)
}

pub fn results_file(workspace: &Path) -> PathBuf {
    workspace.join(RESULTS_FILE_NAME)
}

/// Write the results manifest for one execution.
///
/// Every entry is encoded before anything touches the disk, so an invalid
/// output path leaves no manifest behind.
pub fn write_results(workspace: &Path, input_artifact: &Path, files: &[PathBuf]) -> Result<()> {
    let out_dir = output_dir(workspace);
    let mut buf = String::new();
    for file in files {
        buf.push_str(&encode_entry(file, &out_dir, input_artifact)?);
        buf.push('\n');
    }
    let path = results_file(workspace);
    debug!(path = %path.display(), entries = files.len(), "writing results manifest");
    let tmp_path = path.with_extension("bin.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp results manifest {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("replace results manifest {}", path.display()))?;
    Ok(())
}

/// Read the results manifest back into output locations, preserving order.
pub fn read_results(workspace: &Path, input_artifact: &Path) -> Result<Vec<PathBuf>> {
    let path = results_file(workspace);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read results manifest {}", path.display()))?;
    let out_dir = output_dir(workspace);
    contents
        .lines()
        .map(|line| decode_line(line, &out_dir, input_artifact))
        .collect()
}

/// Assigns workspace directories to identities.
pub trait WorkspaceProvider: Send + Sync {
    /// Directory owned by the given identity. Created on demand by the engine.
    fn workspace_for(&self, unique_id: &str) -> PathBuf;

    /// Location of the persisted execution history, when this provider keeps
    /// one.
    fn history_for(&self, unique_id: &str) -> Option<PathBuf>;

    /// Whether a workspace found on disk may be reused without re-checking
    /// inputs. True for content-addressed workspaces only.
    fn reuses_workspace_across_builds(&self) -> bool;
}

/// Shared provider for artifacts produced outside the build. Workspaces are
/// content-addressed, so disk presence alone proves validity.
#[derive(Debug)]
pub struct ImmutableWorkspaceProvider {
    base_dir: PathBuf,
}

impl ImmutableWorkspaceProvider {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

impl WorkspaceProvider for ImmutableWorkspaceProvider {
    fn workspace_for(&self, unique_id: &str) -> PathBuf {
        self.base_dir.join(unique_id)
    }

    fn history_for(&self, _unique_id: &str) -> Option<PathBuf> {
        None
    }

    fn reuses_workspace_across_builds(&self) -> bool {
        true
    }
}

/// Per-project provider for artifacts a producer project can rewrite during
/// the build. Workspaces are path-addressed; re-use relies on the recorded
/// execution history.
#[derive(Debug)]
pub struct MutableWorkspaceProvider {
    base_dir: PathBuf,
}

impl MutableWorkspaceProvider {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

impl WorkspaceProvider for MutableWorkspaceProvider {
    fn workspace_for(&self, unique_id: &str) -> PathBuf {
        self.base_dir.join(unique_id)
    }

    fn history_for(&self, unique_id: &str) -> Option<PathBuf> {
        Some(
            self.base_dir
                .join("metadata")
                .join(format!("{unique_id}.json")),
        )
    }

    fn reuses_workspace_across_builds(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_round_trip_through_the_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = temp.path().join("ws");
        let input = temp.path().join("lib.jar");
        fs::create_dir_all(output_dir(&workspace)).expect("mkdir");

        let files = vec![
            output_dir(&workspace).join("lib.class"),
            input.join("META-INF").join("MANIFEST.MF"),
            output_dir(&workspace),
        ];
        write_results(&workspace, &input, &files).expect("write");
        let restored = read_results(&workspace, &input).expect("read");
        assert_eq!(restored, files);
    }

    #[test]
    fn manifest_is_utf8_tokens_with_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = temp.path().join("ws");
        let input = temp.path().join("lib.jar");
        fs::create_dir_all(output_dir(&workspace)).expect("mkdir");

        let files = vec![output_dir(&workspace).join("lib.class")];
        write_results(&workspace, &input, &files).expect("write");
        let contents = fs::read_to_string(results_file(&workspace)).expect("read");
        assert_eq!(contents, "o/lib.class\n");
    }

    #[test]
    fn invalid_output_path_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = temp.path().join("ws");
        let input = temp.path().join("lib.jar");
        fs::create_dir_all(output_dir(&workspace)).expect("mkdir");

        let stray = temp.path().join("stray.txt");
        let err = write_results(&workspace, &input, &[stray]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid result path:"));
        assert!(!results_file(&workspace).exists());
    }

    #[test]
    fn provider_layouts_are_disjoint_per_identity() {
        let immutable = ImmutableWorkspaceProvider::new(PathBuf::from("/caches/transforms"));
        assert_eq!(
            immutable.workspace_for("abc"),
            PathBuf::from("/caches/transforms/abc")
        );
        assert_eq!(immutable.history_for("abc"), None);
        assert!(immutable.reuses_workspace_across_builds());

        let mutable = MutableWorkspaceProvider::new(PathBuf::from("/proj/build/transforms"));
        assert_eq!(
            mutable.workspace_for("abc"),
            PathBuf::from("/proj/build/transforms/abc")
        );
        assert_eq!(
            mutable.history_for("abc"),
            Some(PathBuf::from("/proj/build/transforms/metadata/abc.json"))
        );
        assert!(!mutable.reuses_workspace_across_builds());
    }
}
