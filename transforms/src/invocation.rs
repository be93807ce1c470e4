//! Invocation factory: subject dispatch, cacheable handles, listener bridge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::engine::{
    ExecutionEngine, ExecutionFailure, ExecutionOutcome, WorkResult, WorkspaceServices,
};
use crate::execution::{TransformerExecution, UnitOfWork};
use crate::io::fingerprint::FileSystemAccess;
use crate::io::workspace::MutableWorkspaceProvider;
use crate::transformer::{
    ComponentIdentifier, TransformDependencies, TransformationSubject, Transformer,
};

/// User-visible failure of a transform invocation. Wraps the underlying
/// cause, which stays reachable through `source()`.
#[derive(Debug, Clone, Error)]
#[error("Execution failed for {display_name}.")]
pub struct TransformError {
    display_name: String,
    #[source]
    source: ExecutionFailure,
}

impl TransformError {
    fn new(display_name: String, source: ExecutionFailure) -> Self {
        Self {
            display_name,
            source,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Output files of a transform invocation, or its user-visible failure.
pub type TransformResult = Result<Vec<PathBuf>, TransformError>;

/// Observer of transformer invocations. Implementations must be
/// thread-safe; the engine may invoke transforms from many workers.
pub trait TransformListener: Send + Sync {
    fn before_transformer_invocation(
        &self,
        transformer: &dyn Transformer,
        subject: &TransformationSubject,
    );

    fn after_transformer_invocation(
        &self,
        transformer: &dyn Transformer,
        subject: &TransformationSubject,
    );
}

/// Listener that ignores all events.
#[derive(Debug, Default)]
pub struct NoopTransformListener;

impl TransformListener for NoopTransformListener {
    fn before_transformer_invocation(
        &self,
        _transformer: &dyn Transformer,
        _subject: &TransformationSubject,
    ) {
    }

    fn after_transformer_invocation(
        &self,
        _transformer: &dyn Transformer,
        _subject: &TransformationSubject,
    ) {
    }
}

/// Fires `before` on entry and `after` on every exit path, including panics.
struct ListenerScope<'a> {
    listener: &'a dyn TransformListener,
    transformer: &'a dyn Transformer,
    subject: &'a TransformationSubject,
}

impl<'a> ListenerScope<'a> {
    fn enter(
        listener: &'a dyn TransformListener,
        transformer: &'a dyn Transformer,
        subject: &'a TransformationSubject,
    ) -> Self {
        listener.before_transformer_invocation(transformer, subject);
        Self {
            listener,
            transformer,
            subject,
        }
    }
}

impl Drop for ListenerScope<'_> {
    fn drop(&mut self) {
        self.listener
            .after_transformer_invocation(self.transformer, self.subject);
    }
}

/// Two-state invocation handle: resolved from cache, or pending execution.
pub enum CacheableInvocation {
    Cached(TransformResult),
    NonCached(Box<dyn FnOnce() -> TransformResult + Send>),
}

impl CacheableInvocation {
    /// The result, when the engine resolved it from cache. Never forces
    /// execution.
    pub fn cached_result(&self) -> Option<&TransformResult> {
        match self {
            CacheableInvocation::Cached(result) => Some(result),
            CacheableInvocation::NonCached(_) => None,
        }
    }

    /// Force the invocation, running the transformer when not cached.
    pub fn invoke(self) -> TransformResult {
        match self {
            CacheableInvocation::Cached(result) => result,
            CacheableInvocation::NonCached(thunk) => thunk(),
        }
    }
}

/// Lazily-created per-project workspace services for mutable workspaces.
pub struct ProjectStateRegistry {
    base_dir: PathBuf,
    projects: Mutex<HashMap<String, Arc<WorkspaceServices>>>,
}

impl ProjectStateRegistry {
    /// `base_dir` hosts one mutable workspace root per project.
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            projects: Mutex::new(HashMap::new()),
        }
    }

    fn services_for(&self, project_path: &str) -> Arc<WorkspaceServices> {
        let mut projects = self
            .projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        projects
            .entry(project_path.to_string())
            .or_insert_with(|| {
                let dir = self.base_dir.join(project_dir_name(project_path));
                debug!(project = project_path, dir = %dir.display(), "creating project workspace services");
                Arc::new(WorkspaceServices::new(Arc::new(
                    MutableWorkspaceProvider::new(dir),
                )))
            })
            .clone()
    }
}

/// Map a `:a:b` project path onto a nested directory name.
fn project_dir_name(project_path: &str) -> PathBuf {
    let trimmed = project_path.trim_start_matches(':');
    if trimmed.is_empty() {
        PathBuf::from("root")
    } else {
        trimmed.split(':').collect()
    }
}

/// Entry point creating invocations for artifact transforms.
pub struct TransformerInvocationFactory {
    engine: Arc<ExecutionEngine>,
    file_system_access: Arc<FileSystemAccess>,
    listener: Arc<dyn TransformListener>,
    immutable_workspace_services: Arc<WorkspaceServices>,
    project_registry: Arc<ProjectStateRegistry>,
}

impl TransformerInvocationFactory {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        file_system_access: Arc<FileSystemAccess>,
        listener: Arc<dyn TransformListener>,
        immutable_workspace_services: Arc<WorkspaceServices>,
        project_registry: Arc<ProjectStateRegistry>,
    ) -> Self {
        Self {
            engine,
            file_system_access,
            listener,
            immutable_workspace_services,
            project_registry,
        }
    }

    /// Create a (possibly cached) invocation for one transform application.
    ///
    /// The producer component of `subject` selects the workspace variant: a
    /// project identifier means the input can be rewritten during the build
    /// (mutable), anything else is content-addressed (immutable).
    pub fn create_invocation(
        &self,
        transformer: Arc<dyn Transformer>,
        input_artifact: &Path,
        dependencies: TransformDependencies,
        subject: &TransformationSubject,
    ) -> Result<CacheableInvocation, TransformError> {
        let (services, execution) = match &subject.initial_component {
            ComponentIdentifier::Project { path } => (
                self.project_registry.services_for(path),
                TransformerExecution::mutable(
                    transformer.clone(),
                    input_artifact.to_path_buf(),
                    dependencies,
                ),
            ),
            ComponentIdentifier::External { .. } => (
                self.immutable_workspace_services.clone(),
                TransformerExecution::immutable(
                    transformer.clone(),
                    input_artifact.to_path_buf(),
                    dependencies,
                    self.file_system_access.clone(),
                ),
            ),
        };
        let work: Arc<dyn UnitOfWork> = Arc::new(execution);
        let display_name = work.display_name();

        let outcome = self
            .engine
            .submit(work, services)
            .map_err(|error| TransformError::new(display_name.clone(), ExecutionFailure::new(error)))?;

        Ok(match outcome {
            ExecutionOutcome::Cached(result) => {
                debug!(work = %display_name, "invocation resolved from cache");
                CacheableInvocation::Cached(map_result(result, &display_name))
            }
            ExecutionOutcome::Deferred(deferred) => {
                let listener = self.listener.clone();
                let subject = subject.clone();
                CacheableInvocation::NonCached(Box::new(move || {
                    let _scope = ListenerScope::enter(&*listener, &*transformer, &subject);
                    map_result(deferred.run(), &display_name)
                }))
            }
        })
    }
}

fn map_result(result: WorkResult, display_name: &str) -> TransformResult {
    result.map_err(|failure| TransformError::new(display_name.to_string(), failure))
}
