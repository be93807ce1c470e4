//! Unit-of-work contract and the transformer execution unit.
//!
//! A unit of work declares identity inputs, regular inputs, and outputs to
//! the engine through visitors, produces its identity from the collected
//! values, and executes inside an engine-allocated workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, info_span};

use crate::core::hashing::HashCode;
use crate::core::identity::{
    ImmutableWorkspaceIdentity, MutableWorkspaceIdentity, ValueSnapshot, WorkspaceIdentity,
};
use crate::core::types::{CachingDisabledReason, InputChangeTracking, InputPropertyType, TreeType};
use crate::io::fingerprint::{
    DirectorySensitivity, FileCollectionFingerprint, FileNormalizationSpec, FileSystemAccess,
    Normalizer, normalized_path,
};
use crate::io::workspace::{output_dir, read_results, results_file, write_results};
use crate::transformer::{InputChanges, TransformDependencies, Transformer};

// Property names are part of the external contract: fingerprints and cache
// keys are keyed on them.
pub const INPUT_ARTIFACT_PROPERTY: &str = "inputArtifact";
pub const INPUT_ARTIFACT_PATH_PROPERTY: &str = "inputArtifactPath";
pub const INPUT_ARTIFACT_SNAPSHOT_PROPERTY: &str = "inputArtifactSnapshot";
pub const DEPENDENCIES_PROPERTY: &str = "inputArtifactDependencies";
pub const SECONDARY_INPUTS_HASH_PROPERTY: &str = "inputPropertiesHash";
pub const OUTPUT_DIRECTORY_PROPERTY: &str = "outputDirectory";
pub const RESULTS_FILE_PROPERTY: &str = "resultsFile";

/// Supplier for a declared input file property.
pub struct FileValueSupplier<'a> {
    pub normalizer: Normalizer,
    pub directory_sensitivity: DirectorySensitivity,
    pub files: &'a dyn Fn() -> Vec<PathBuf>,
}

impl FileValueSupplier<'_> {
    pub fn normalization_spec(&self) -> FileNormalizationSpec {
        FileNormalizationSpec {
            normalizer: self.normalizer,
            directory_sensitivity: self.directory_sensitivity,
        }
    }
}

/// Callback surface through which a unit of work declares its inputs.
///
/// Value suppliers are zero-argument closures the engine invokes when (and
/// if) it fingerprints the property.
pub trait InputVisitor {
    fn visit_input_property(&mut self, name: &str, value: &dyn Fn() -> ValueSnapshot);

    fn visit_input_file_property(
        &mut self,
        name: &str,
        kind: InputPropertyType,
        value: FileValueSupplier<'_>,
    );
}

/// Callback surface for declared outputs.
pub trait OutputVisitor {
    fn visit_output_property(&mut self, name: &str, tree: TreeType, root: &Path);
}

/// Callback surface for the implementation fingerprint of a unit of work.
pub trait ImplementationVisitor {
    fn visit_implementation(&mut self, implementation: HashCode);
}

/// Workspace and change info supplied by the engine for one execution.
pub struct ExecutionRequest<'a> {
    pub workspace: &'a Path,
    pub input_changes: Option<&'a InputChanges>,
}

/// Contract between the engine and a schedulable unit of work.
pub trait UnitOfWork: Send + Sync {
    fn display_name(&self) -> String;

    /// Declare the inputs that participate in identity. Fallible because
    /// snapshotting may touch the disk.
    fn visit_identity_inputs(&self, visitor: &mut dyn InputVisitor) -> Result<()>;

    /// Declare non-identity inputs whose changes may trigger re-execution.
    fn visit_regular_inputs(&self, visitor: &mut dyn InputVisitor) -> Result<()>;

    fn visit_outputs(&self, workspace: &Path, visitor: &mut dyn OutputVisitor);

    fn visit_implementations(&self, visitor: &mut dyn ImplementationVisitor);

    /// Assemble the workspace identity from the collected identity inputs.
    fn identify(
        &self,
        identity_inputs: &HashMap<String, ValueSnapshot>,
        identity_file_inputs: &HashMap<String, FileCollectionFingerprint>,
    ) -> Result<WorkspaceIdentity>;

    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<Vec<PathBuf>>;

    /// Decode the outputs of a prior execution from its workspace.
    fn load_restored_output(&self, workspace: &Path) -> Result<Vec<PathBuf>>;

    fn should_disable_caching(&self) -> Option<CachingDisabledReason>;

    fn input_change_tracking(&self) -> InputChangeTracking;

    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Wall-clock milliseconds since the unit was constructed.
    fn mark_execution_time(&self) -> u64;
}

/// Identity strategy of a transformer execution.
enum ExecutionKind {
    /// External artifacts are immutable at a given content address; identity
    /// comes from the normalized path plus the raw content snapshot.
    Immutable {
        file_system_access: Arc<FileSystemAccess>,
    },
    /// A producer project can rewrite the input during the build; identity is
    /// the absolute path, and re-use is gated on the regular inputs.
    Mutable,
}

/// The execution unit for one transformer invocation.
pub struct TransformerExecution {
    transformer: Arc<dyn Transformer>,
    input_artifact: PathBuf,
    dependencies: TransformDependencies,
    kind: ExecutionKind,
    started: Instant,
}

impl TransformerExecution {
    pub fn immutable(
        transformer: Arc<dyn Transformer>,
        input_artifact: PathBuf,
        dependencies: TransformDependencies,
        file_system_access: Arc<FileSystemAccess>,
    ) -> Self {
        Self {
            transformer,
            input_artifact,
            dependencies,
            kind: ExecutionKind::Immutable { file_system_access },
            started: Instant::now(),
        }
    }

    pub fn mutable(
        transformer: Arc<dyn Transformer>,
        input_artifact: PathBuf,
        dependencies: TransformDependencies,
    ) -> Self {
        Self {
            transformer,
            input_artifact,
            dependencies,
            kind: ExecutionKind::Mutable,
            started: Instant::now(),
        }
    }

    fn input_basename(&self) -> String {
        self.input_artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_artifact.to_string_lossy().into_owned())
    }
}

impl UnitOfWork for TransformerExecution {
    fn display_name(&self) -> String {
        format!(
            "{}: {}",
            self.transformer.display_name(),
            self.input_artifact.display()
        )
    }

    fn visit_identity_inputs(&self, visitor: &mut dyn InputVisitor) -> Result<()> {
        // Secondary inputs are summarized as a single property.
        let secondary = self.transformer.secondary_inputs_hash();
        visitor.visit_input_property(SECONDARY_INPUTS_HASH_PROPERTY, &|| {
            ValueSnapshot::Hash(secondary)
        });
        visitor.visit_input_file_property(
            DEPENDENCIES_PROPERTY,
            InputPropertyType::NonIncremental,
            FileValueSupplier {
                normalizer: self.transformer.dependencies_normalizer(),
                directory_sensitivity: self.transformer.dependencies_directory_sensitivity(),
                files: &|| {
                    self.dependencies
                        .files()
                        .map(<[PathBuf]>::to_vec)
                        .unwrap_or_default()
                },
            },
        );
        if let ExecutionKind::Immutable { file_system_access } = &self.kind {
            // The normalized path plus the raw content snapshot is cheaper
            // than a full fingerprint of the input artifact and identifies it
            // just as well.
            let snapshot = file_system_access.snapshot(&self.input_artifact)?;
            let spec = FileNormalizationSpec {
                normalizer: self.transformer.input_artifact_normalizer(),
                directory_sensitivity: self.transformer.input_artifact_directory_sensitivity(),
            };
            visitor.visit_input_property(INPUT_ARTIFACT_PATH_PROPERTY, &|| {
                ValueSnapshot::Text(normalized_path(spec, &snapshot))
            });
            visitor.visit_input_property(INPUT_ARTIFACT_SNAPSHOT_PROPERTY, &|| {
                ValueSnapshot::Hash(snapshot.hash)
            });
        }
        Ok(())
    }

    fn visit_regular_inputs(&self, visitor: &mut dyn InputVisitor) -> Result<()> {
        visitor.visit_input_file_property(
            INPUT_ARTIFACT_PROPERTY,
            InputPropertyType::Primary,
            FileValueSupplier {
                normalizer: self.transformer.input_artifact_normalizer(),
                directory_sensitivity: self.transformer.input_artifact_directory_sensitivity(),
                files: &|| vec![self.input_artifact.clone()],
            },
        );
        Ok(())
    }

    fn visit_outputs(&self, workspace: &Path, visitor: &mut dyn OutputVisitor) {
        visitor.visit_output_property(
            OUTPUT_DIRECTORY_PROPERTY,
            TreeType::Directory,
            &output_dir(workspace),
        );
        visitor.visit_output_property(RESULTS_FILE_PROPERTY, TreeType::File, &results_file(workspace));
    }

    fn visit_implementations(&self, visitor: &mut dyn ImplementationVisitor) {
        visitor.visit_implementation(self.transformer.implementation_hash());
    }

    fn identify(
        &self,
        identity_inputs: &HashMap<String, ValueSnapshot>,
        identity_file_inputs: &HashMap<String, FileCollectionFingerprint>,
    ) -> Result<WorkspaceIdentity> {
        let dependencies_hash = identity_file_inputs
            .get(DEPENDENCIES_PROPERTY)
            .map(|fingerprint| fingerprint.hash)
            .ok_or_else(|| missing_property(DEPENDENCIES_PROPERTY))?;
        match &self.kind {
            ExecutionKind::Immutable { .. } => Ok(WorkspaceIdentity::Immutable(
                ImmutableWorkspaceIdentity {
                    input_artifact_path: take(identity_inputs, INPUT_ARTIFACT_PATH_PROPERTY)?,
                    input_artifact_snapshot: take(
                        identity_inputs,
                        INPUT_ARTIFACT_SNAPSHOT_PROPERTY,
                    )?,
                    secondary_inputs: take(identity_inputs, SECONDARY_INPUTS_HASH_PROPERTY)?,
                    dependencies_hash,
                },
            )),
            ExecutionKind::Mutable => Ok(WorkspaceIdentity::Mutable(MutableWorkspaceIdentity {
                input_artifact_absolute_path: self.input_artifact.to_string_lossy().into_owned(),
                secondary_inputs: take(identity_inputs, SECONDARY_INPUTS_HASH_PROPERTY)?,
                dependencies_hash,
            })),
        }
    }

    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<Vec<PathBuf>> {
        let operation = format!(
            "{} {}",
            self.transformer.display_name(),
            self.input_basename()
        );
        let _span = info_span!("transform", operation = %operation).entered();
        let out_dir = output_dir(request.workspace);
        let result = self.transformer.transform(
            &self.input_artifact,
            &out_dir,
            &self.dependencies,
            request.input_changes,
        )?;
        write_results(request.workspace, &self.input_artifact, &result)?;
        debug!(outputs = result.len(), "transform produced outputs");
        Ok(result)
    }

    fn load_restored_output(&self, workspace: &Path) -> Result<Vec<PathBuf>> {
        read_results(workspace, &self.input_artifact)
    }

    fn should_disable_caching(&self) -> Option<CachingDisabledReason> {
        if self.transformer.is_cacheable() {
            None
        } else {
            Some(CachingDisabledReason::not_cacheable())
        }
    }

    fn input_change_tracking(&self) -> InputChangeTracking {
        if self.transformer.requires_input_changes() {
            InputChangeTracking::IncrementalParameters
        } else {
            InputChangeTracking::None
        }
    }

    fn mark_execution_time(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn take(inputs: &HashMap<String, ValueSnapshot>, name: &str) -> Result<ValueSnapshot> {
    inputs.get(name).cloned().ok_or_else(|| missing_property(name))
}

fn missing_property(name: &str) -> anyhow::Error {
    anyhow!("identity input property `{name}` was not declared")
}
