//! Test-only helpers: scripted transformers, counting listeners, and a
//! fully wired host.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::core::hashing::HashCode;
use crate::engine::{ExecutionEngine, WorkspaceServices};
use crate::invocation::{ProjectStateRegistry, TransformListener, TransformerInvocationFactory};
use crate::io::fingerprint::FileSystemAccess;
use crate::io::workspace::ImmutableWorkspaceProvider;
use crate::transformer::{
    ComponentIdentifier, InputChanges, TransformDependencies, TransformationSubject, Transformer,
};

type TransformFn = dyn Fn(&Path, &Path, &TransformDependencies, Option<&InputChanges>) -> Result<Vec<PathBuf>>
    + Send
    + Sync;

/// Transformer with scripted behavior and configurable identity bits.
pub struct ScriptedTransformer {
    display_name: String,
    secondary_inputs: HashCode,
    implementation: HashCode,
    cacheable: bool,
    requires_input_changes: bool,
    behavior: Box<TransformFn>,
}

impl ScriptedTransformer {
    pub fn new<F>(display_name: &str, behavior: F) -> Self
    where
        F: Fn(&Path, &Path, &TransformDependencies, Option<&InputChanges>) -> Result<Vec<PathBuf>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            display_name: display_name.to_string(),
            secondary_inputs: HashCode::of(b"secondary"),
            implementation: HashCode::of(display_name.as_bytes()),
            cacheable: true,
            requires_input_changes: false,
            behavior: Box::new(behavior),
        }
    }

    pub fn with_secondary_inputs(mut self, hash: HashCode) -> Self {
        self.secondary_inputs = hash;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn requiring_input_changes(mut self) -> Self {
        self.requires_input_changes = true;
        self
    }
}

impl Transformer for ScriptedTransformer {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn implementation_hash(&self) -> HashCode {
        self.implementation
    }

    fn secondary_inputs_hash(&self) -> HashCode {
        self.secondary_inputs
    }

    fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    fn requires_input_changes(&self) -> bool {
        self.requires_input_changes
    }

    fn transform(
        &self,
        input_artifact: &Path,
        output_dir: &Path,
        dependencies: &TransformDependencies,
        input_changes: Option<&InputChanges>,
    ) -> Result<Vec<PathBuf>> {
        (self.behavior)(input_artifact, output_dir, dependencies, input_changes)
    }
}

/// Listener counting before/after events.
#[derive(Debug, Default)]
pub struct CountingListener {
    before: AtomicUsize,
    after: AtomicUsize,
}

impl CountingListener {
    pub fn before_count(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    pub fn after_count(&self) -> usize {
        self.after.load(Ordering::SeqCst)
    }
}

impl TransformListener for CountingListener {
    fn before_transformer_invocation(
        &self,
        _transformer: &dyn Transformer,
        _subject: &TransformationSubject,
    ) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_transformer_invocation(
        &self,
        _transformer: &dyn Transformer,
        _subject: &TransformationSubject,
    ) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fully wired invocation factory rooted at caller-provided directories.
///
/// Creating a second host over the same directories models a new build of
/// the same workspace caches.
pub struct TestHost {
    pub factory: TransformerInvocationFactory,
    pub listener: Arc<CountingListener>,
}

impl TestHost {
    pub fn new(cache_dir: &Path, projects_dir: &Path) -> Self {
        let file_system_access = Arc::new(FileSystemAccess::new());
        let engine = Arc::new(ExecutionEngine::new(file_system_access.clone()));
        let listener = Arc::new(CountingListener::default());
        let immutable_services = Arc::new(WorkspaceServices::new(Arc::new(
            ImmutableWorkspaceProvider::new(cache_dir.to_path_buf()),
        )));
        let project_registry = Arc::new(ProjectStateRegistry::new(projects_dir.to_path_buf()));
        let factory = TransformerInvocationFactory::new(
            engine,
            file_system_access,
            listener.clone(),
            immutable_services,
            project_registry,
        );
        Self { factory, listener }
    }
}

pub fn external_subject(id: &str) -> TransformationSubject {
    TransformationSubject::new(
        id,
        ComponentIdentifier::External { id: id.to_string() },
    )
}

pub fn project_subject(path: &str) -> TransformationSubject {
    TransformationSubject::new(
        path,
        ComponentIdentifier::Project {
            path: path.to_string(),
        },
    )
}
