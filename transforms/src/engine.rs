//! Execution engine: identity resolution, workspace caching, deferred work.
//!
//! Submitting a unit of work resolves it through the cache protocol, in
//! order: the in-memory identity cache, a content-addressed workspace found
//! on disk, an up-to-date mutable workspace proven by its execution history.
//! Anything else comes back as a deferred execution the caller forces.

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::hashing::{HashCode, Hasher};
use crate::core::identity::ValueSnapshot;
use crate::core::types::{InputChangeTracking, InputPropertyType, TreeType};
use crate::execution::{
    ExecutionRequest, FileValueSupplier, ImplementationVisitor, INPUT_ARTIFACT_PROPERTY,
    InputVisitor, OutputVisitor, UnitOfWork,
};
use crate::io::fingerprint::{FileCollectionFingerprint, FileSystemAccess, fingerprint_collection};
use crate::io::history::{ExecutionHistory, load_history, write_history};
use crate::io::workspace::{WorkspaceProvider, results_file};
use crate::transformer::{ChangeKind, FileChange, InputChanges};

/// Failure of a unit of work, shared between the identity cache and every
/// retrieval of the failed identity.
#[derive(Debug, Clone)]
pub struct ExecutionFailure(Arc<anyhow::Error>);

impl ExecutionFailure {
    pub(crate) fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for ExecutionFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Result of one unit of work, cloneable so cache hits share it.
pub type WorkResult = Result<Vec<PathBuf>, ExecutionFailure>;

/// Shared per-scope state: the workspace provider plus the identity cache
/// and per-identity execution locks. One instance serves the shared
/// immutable scope; each producer project owns another.
pub struct WorkspaceServices {
    provider: Arc<dyn WorkspaceProvider>,
    identity_cache: Mutex<HashMap<String, WorkResult>>,
    execution_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceServices {
    pub fn new(provider: Arc<dyn WorkspaceProvider>) -> Self {
        Self {
            provider,
            identity_cache: Mutex::new(HashMap::new()),
            execution_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &dyn WorkspaceProvider {
        &*self.provider
    }

    fn cached(&self, unique_id: &str) -> Option<WorkResult> {
        self.identity_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(unique_id)
            .cloned()
    }

    fn record(&self, unique_id: &str, result: WorkResult) {
        self.identity_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(unique_id.to_string(), result);
    }

    fn lock_for(&self, unique_id: &str) -> Arc<Mutex<()>> {
        self.execution_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(unique_id.to_string())
            .or_default()
            .clone()
    }
}

/// Outcome of submitting a unit of work.
pub enum ExecutionOutcome {
    /// The engine resolved the result without running the work.
    Cached(WorkResult),
    /// The work must actually run; forcing the deferred execution runs it.
    Deferred(DeferredExecution),
}

/// Captured state to run a unit of work later.
pub struct DeferredExecution {
    work: Arc<dyn UnitOfWork>,
    services: Arc<WorkspaceServices>,
    unique_id: String,
    workspace: PathBuf,
    current_regular_inputs: BTreeMap<String, BTreeMap<String, HashCode>>,
    previous_history: Option<ExecutionHistory>,
    implementation: HashCode,
    caching_enabled: bool,
}

impl DeferredExecution {
    /// Run the work under the identity's execution lock and record the
    /// shared result. A concurrent run of the same identity that finished
    /// first wins.
    pub fn run(self) -> WorkResult {
        let lock = self.services.lock_for(&self.unique_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(result) = self.services.cached(&self.unique_id) {
            return result;
        }
        let result = self.execute_in_workspace().map_err(ExecutionFailure::new);
        self.services.record(&self.unique_id, result.clone());
        result
    }

    fn execute_in_workspace(&self) -> Result<Vec<PathBuf>> {
        prepare_outputs(&*self.work, &self.workspace)?;
        let input_changes = match self.work.input_change_tracking() {
            InputChangeTracking::IncrementalParameters => Some(diff_changes(
                self.previous_history.as_ref(),
                &self.current_regular_inputs,
            )),
            InputChangeTracking::None => None,
        };
        let output = self.work.execute(&ExecutionRequest {
            workspace: &self.workspace,
            input_changes: input_changes.as_ref(),
        })?;
        if self.caching_enabled {
            if let Some(history_path) = self.services.provider().history_for(&self.unique_id) {
                write_history(
                    &history_path,
                    &ExecutionHistory {
                        implementation: Some(self.implementation),
                        regular_inputs: self.current_regular_inputs.clone(),
                    },
                )?;
            }
        }
        debug!(
            unique_id = %self.unique_id,
            elapsed_ms = self.work.mark_execution_time(),
            "work executed"
        );
        Ok(output)
    }
}

/// Drives identity computation and the workspace cache protocol.
pub struct ExecutionEngine {
    file_system_access: Arc<FileSystemAccess>,
}

impl ExecutionEngine {
    pub fn new(file_system_access: Arc<FileSystemAccess>) -> Self {
        Self { file_system_access }
    }

    /// Submit a unit of work against a workspace scope.
    pub fn submit(
        &self,
        work: Arc<dyn UnitOfWork>,
        services: Arc<WorkspaceServices>,
    ) -> Result<ExecutionOutcome> {
        let mut collector = InputCollector::new(&self.file_system_access);
        work.visit_identity_inputs(&mut collector)?;
        let (identity_inputs, identity_file_inputs) = collector.finish()?;
        let identity = work.identify(&identity_inputs, &identity_file_inputs)?;
        let unique_id = identity.unique_id();
        debug!(unique_id = %unique_id, work = %work.display_name(), "resolved work identity");

        if let Some(result) = services.cached(&unique_id) {
            debug!(unique_id = %unique_id, "identity cache hit");
            return Ok(ExecutionOutcome::Cached(result));
        }

        // Across-build reuse is only sound when caching is enabled for the work.
        let caching_enabled = work.should_disable_caching().is_none();
        let workspace = services.provider().workspace_for(&unique_id);

        if caching_enabled
            && services.provider().reuses_workspace_across_builds()
            && results_file(&workspace).exists()
        {
            info!(unique_id = %unique_id, "reusing immutable workspace found on disk");
            let output = work.load_restored_output(&workspace)?;
            services.record(&unique_id, Ok(output.clone()));
            return Ok(ExecutionOutcome::Cached(Ok(output)));
        }

        let tracking = work.input_change_tracking();
        let history_path = services.provider().history_for(&unique_id);
        let needs_regular_inputs =
            history_path.is_some() || tracking == InputChangeTracking::IncrementalParameters;
        let current_regular_inputs = if needs_regular_inputs {
            let mut collector = InputCollector::new(&self.file_system_access);
            work.visit_regular_inputs(&mut collector)?;
            let (_, file_inputs) = collector.finish()?;
            file_inputs
                .into_iter()
                .map(|(name, fingerprint)| (name, fingerprint.entries))
                .collect()
        } else {
            BTreeMap::new()
        };
        let implementation = collect_implementation(&*work);

        let previous_history = match &history_path {
            Some(path) => load_history(path)?,
            None => None,
        };
        if caching_enabled {
            if let Some(previous) = &previous_history {
                if previous.implementation == Some(implementation)
                    && previous.regular_inputs == current_regular_inputs
                    && results_file(&workspace).exists()
                {
                    info!(unique_id = %unique_id, "mutable workspace up to date, restoring outputs");
                    let output = work.load_restored_output(&workspace)?;
                    services.record(&unique_id, Ok(output.clone()));
                    return Ok(ExecutionOutcome::Cached(Ok(output)));
                }
            }
        }

        Ok(ExecutionOutcome::Deferred(DeferredExecution {
            work,
            services,
            unique_id,
            workspace,
            current_regular_inputs,
            previous_history,
            implementation,
            caching_enabled,
        }))
    }
}

/// Engine-side input visitor: invokes suppliers and fingerprints file
/// properties as they are declared.
struct InputCollector<'a> {
    file_system_access: &'a FileSystemAccess,
    values: HashMap<String, ValueSnapshot>,
    file_values: HashMap<String, FileCollectionFingerprint>,
    error: Option<anyhow::Error>,
}

impl<'a> InputCollector<'a> {
    fn new(file_system_access: &'a FileSystemAccess) -> Self {
        Self {
            file_system_access,
            values: HashMap::new(),
            file_values: HashMap::new(),
            error: None,
        }
    }

    fn finish(
        self,
    ) -> Result<(
        HashMap<String, ValueSnapshot>,
        HashMap<String, FileCollectionFingerprint>,
    )> {
        match self.error {
            Some(error) => Err(error),
            None => Ok((self.values, self.file_values)),
        }
    }
}

impl InputVisitor for InputCollector<'_> {
    fn visit_input_property(&mut self, name: &str, value: &dyn Fn() -> ValueSnapshot) {
        if self.error.is_some() {
            return;
        }
        self.values.insert(name.to_string(), value());
    }

    fn visit_input_file_property(
        &mut self,
        name: &str,
        _kind: InputPropertyType,
        value: FileValueSupplier<'_>,
    ) {
        if self.error.is_some() {
            return;
        }
        let files = (value.files)();
        match fingerprint_collection(value.normalization_spec(), &files, self.file_system_access) {
            Ok(fingerprint) => {
                self.file_values.insert(name.to_string(), fingerprint);
            }
            Err(error) => {
                self.error = Some(error.context(format!("fingerprint input property `{name}`")));
            }
        }
    }
}

fn collect_implementation(work: &dyn UnitOfWork) -> HashCode {
    struct Collector {
        hasher: Hasher,
    }
    impl ImplementationVisitor for Collector {
        fn visit_implementation(&mut self, implementation: HashCode) {
            self.hasher.put_hash(&implementation);
        }
    }
    let mut collector = Collector {
        hasher: Hasher::new(),
    };
    work.visit_implementations(&mut collector);
    collector.hasher.finish()
}

/// Create the declared output locations before execution: directories
/// themselves, parents for files.
fn prepare_outputs(work: &dyn UnitOfWork, workspace: &Path) -> Result<()> {
    struct Preparer {
        error: Option<anyhow::Error>,
    }
    impl OutputVisitor for Preparer {
        fn visit_output_property(&mut self, _name: &str, tree: TreeType, root: &Path) {
            if self.error.is_some() {
                return;
            }
            let target = match tree {
                TreeType::Directory => Some(root.to_path_buf()),
                TreeType::File => root.parent().map(Path::to_path_buf),
            };
            if let Some(dir) = target {
                if let Err(error) = fs::create_dir_all(&dir)
                    .with_context(|| format!("create output directory {}", dir.display()))
                {
                    self.error = Some(error);
                }
            }
        }
    }
    let mut preparer = Preparer { error: None };
    work.visit_outputs(workspace, &mut preparer);
    match preparer.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Diff the primary input's per-file entries against the previous execution.
fn diff_changes(
    previous: Option<&ExecutionHistory>,
    current: &BTreeMap<String, BTreeMap<String, HashCode>>,
) -> InputChanges {
    static EMPTY: BTreeMap<String, HashCode> = BTreeMap::new();
    let current_entries = current.get(INPUT_ARTIFACT_PROPERTY).unwrap_or(&EMPTY);
    let previous_entries = previous
        .and_then(|history| history.regular_inputs.get(INPUT_ARTIFACT_PROPERTY))
        .unwrap_or(&EMPTY);

    let mut changes = Vec::new();
    for (path, hash) in current_entries {
        match previous_entries.get(path) {
            None => changes.push(FileChange {
                path: PathBuf::from(path),
                kind: ChangeKind::Added,
            }),
            Some(previous_hash) if previous_hash != hash => changes.push(FileChange {
                path: PathBuf::from(path),
                kind: ChangeKind::Modified,
            }),
            Some(_) => {}
        }
    }
    for path in previous_entries.keys() {
        if !current_entries.contains_key(path) {
            changes.push(FileChange {
                path: PathBuf::from(path),
                kind: ChangeKind::Removed,
            });
        }
    }
    InputChanges {
        incremental: previous.is_some(),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &[u8])]) -> BTreeMap<String, HashCode> {
        pairs
            .iter()
            .map(|(path, content)| (path.to_string(), HashCode::of(content)))
            .collect()
    }

    fn regular(pairs: &[(&str, &[u8])]) -> BTreeMap<String, BTreeMap<String, HashCode>> {
        let mut map = BTreeMap::new();
        map.insert(INPUT_ARTIFACT_PROPERTY.to_string(), entries(pairs));
        map
    }

    #[test]
    fn first_execution_reports_everything_added_and_non_incremental() {
        let changes = diff_changes(None, &regular(&[("/in/a", b"1"), ("/in/b", b"2")]));
        assert!(!changes.incremental);
        assert_eq!(changes.changes.len(), 2);
        assert!(
            changes
                .changes
                .iter()
                .all(|change| change.kind == ChangeKind::Added)
        );
    }

    #[test]
    fn later_executions_report_per_file_changes() {
        let previous = ExecutionHistory {
            implementation: None,
            regular_inputs: regular(&[("/in/keep", b"1"), ("/in/edit", b"1"), ("/in/drop", b"1")]),
        };
        let changes = diff_changes(
            Some(&previous),
            &regular(&[("/in/keep", b"1"), ("/in/edit", b"2"), ("/in/new", b"1")]),
        );
        assert!(changes.incremental);
        assert_eq!(
            changes.changes,
            vec![
                FileChange {
                    path: PathBuf::from("/in/edit"),
                    kind: ChangeKind::Modified
                },
                FileChange {
                    path: PathBuf::from("/in/new"),
                    kind: ChangeKind::Added
                },
                FileChange {
                    path: PathBuf::from("/in/drop"),
                    kind: ChangeKind::Removed
                },
            ]
        );
    }

    #[test]
    fn unchanged_inputs_diff_to_no_changes() {
        let previous = ExecutionHistory {
            implementation: None,
            regular_inputs: regular(&[("/in/a", b"1")]),
        };
        let changes = diff_changes(Some(&previous), &regular(&[("/in/a", b"1")]));
        assert!(changes.incremental);
        assert!(changes.changes.is_empty());
    }
}
