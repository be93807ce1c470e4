//! Transformer contract and invocation inputs.
//!
//! The [`Transformer`] trait decouples the execution engine from the
//! user-supplied transform code. Tests use scripted transformers that write
//! predetermined outputs without real user code.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::hashing::HashCode;
use crate::io::fingerprint::{DirectorySensitivity, Normalizer};

/// User-supplied code converting one artifact into zero or more artifacts.
pub trait Transformer: Send + Sync {
    /// Human-readable name used in operation spans and failure messages.
    fn display_name(&self) -> &str;

    /// Fingerprint of the transformer implementation itself.
    fn implementation_hash(&self) -> HashCode;

    /// Combined hash of all scalar (non-file) parameters.
    fn secondary_inputs_hash(&self) -> HashCode;

    fn input_artifact_normalizer(&self) -> Normalizer {
        Normalizer::AbsolutePath
    }

    fn input_artifact_directory_sensitivity(&self) -> DirectorySensitivity {
        DirectorySensitivity::Default
    }

    fn dependencies_normalizer(&self) -> Normalizer {
        Normalizer::AbsolutePath
    }

    fn dependencies_directory_sensitivity(&self) -> DirectorySensitivity {
        DirectorySensitivity::Default
    }

    /// Whether results may be reused across builds.
    fn is_cacheable(&self) -> bool;

    /// Whether the transformer wants per-file change information.
    fn requires_input_changes(&self) -> bool;

    /// Run the transformation. Outputs go under `output_dir`; the returned
    /// locations must be the output directory, the input artifact, or
    /// descendants of either.
    fn transform(
        &self,
        input_artifact: &Path,
        output_dir: &Path,
        dependencies: &TransformDependencies,
        input_changes: Option<&InputChanges>,
    ) -> Result<Vec<PathBuf>>;
}

/// Transitive dependencies of the input artifact.
#[derive(Debug, Clone, Default)]
pub struct TransformDependencies {
    files: Option<Vec<PathBuf>>,
}

impl TransformDependencies {
    pub fn of(files: Vec<PathBuf>) -> Self {
        Self { files: Some(files) }
    }

    pub fn none() -> Self {
        Self { files: None }
    }

    /// Dependency files, when the provider yields any.
    pub fn files(&self) -> Option<&[PathBuf]> {
        self.files.as_deref()
    }
}

/// Identifier of the component that produced the input artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentIdentifier {
    /// A project of the current build. The producer can rewrite the artifact
    /// mid-build, which selects the mutable workspace variant.
    Project { path: String },
    /// A component outside the build, e.g. a module from a repository.
    External { id: String },
}

/// The artifact being transformed, with its originating component.
#[derive(Debug, Clone)]
pub struct TransformationSubject {
    pub display_name: String,
    pub initial_component: ComponentIdentifier,
}

impl TransformationSubject {
    pub fn new(display_name: &str, initial_component: ComponentIdentifier) -> Self {
        Self {
            display_name: display_name.to_string(),
            initial_component,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Change info handed to transformers that request incremental execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChanges {
    /// False when no previous execution exists; every file is then reported
    /// as added.
    pub incremental: bool,
    pub changes: Vec<FileChange>,
}
