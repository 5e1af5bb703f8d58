//! Best-effort dependency resolution for imports.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::interpreter::{CompileError, Module};

/// Failure to provide a module.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No source knows the module.
    #[error("no module named '{0}' is available")]
    NotFound(String),

    /// The module exists but could not be read.
    #[error("failed to read module '{module}': {source}")]
    Io {
        /// Module being resolved.
        module: String,
        /// Underlying error.
        source: io::Error,
    },

    /// The module's source does not compile.
    #[error("module '{module}' failed to compile: {source}")]
    Compile {
        /// Module being resolved.
        module: String,
        /// Compile error.
        source: CompileError,
    },
}

/// Installs modules that a program imports but the registry lacks.
pub trait ImportResolver: Send + Sync {
    /// Produce one module by name.
    fn resolve<'a>(&'a self, module: &'a str) -> BoxFuture<'a, Result<Module, ResolveError>>;

    /// Produce whatever of `modules` can be found ahead of execution.
    /// Failures are not reported.
    fn prefetch<'a>(&'a self, _modules: &'a [String]) -> BoxFuture<'a, Vec<Module>> {
        Box::pin(async { Vec::new() })
    }
}

impl<T: ImportResolver + ?Sized> ImportResolver for Arc<T> {
    fn resolve<'a>(&'a self, module: &'a str) -> BoxFuture<'a, Result<Module, ResolveError>> {
        (**self).resolve(module)
    }

    fn prefetch<'a>(&'a self, modules: &'a [String]) -> BoxFuture<'a, Vec<Module>> {
        (**self).prefetch(modules)
    }
}

/// Resolver that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl ImportResolver for NoopResolver {
    fn resolve<'a>(&'a self, module: &'a str) -> BoxFuture<'a, Result<Module, ResolveError>> {
        Box::pin(async move { Err(ResolveError::NotFound(module.to_string())) })
    }
}

/// Directory of script modules, one `<name>.scm` file per module.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    root: PathBuf,
    max_depth: usize,
}

impl PackageIndex {
    /// Index over `root`; modules compile with nesting bounded by `max_depth`.
    pub fn new(root: impl Into<PathBuf>, max_depth: usize) -> Self {
        Self {
            root: root.into(),
            max_depth,
        }
    }

    /// Directory the index reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn load(&self, module: &str) -> Result<Module, ResolveError> {
        let valid = !module.is_empty()
            && module
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(ResolveError::NotFound(module.to_string()));
        }
        let filename = format!("{module}.scm");
        let path = self.root.join(&filename);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::NotFound(module.to_string()));
            }
            Err(source) => {
                return Err(ResolveError::Io {
                    module: module.to_string(),
                    source,
                });
            }
        };
        Module::script(module, &filename, &text, self.max_depth).map_err(|source| ResolveError::Compile {
            module: module.to_string(),
            source,
        })
    }
}

impl ImportResolver for PackageIndex {
    fn resolve<'a>(&'a self, module: &'a str) -> BoxFuture<'a, Result<Module, ResolveError>> {
        Box::pin(async move {
            let loaded = self.load(module).await;
            match &loaded {
                Ok(_) => tracing::debug!(module, root = %self.root.display(), "resolved module"),
                Err(err) => tracing::debug!(module, error = %err, "module resolution failed"),
            }
            loaded
        })
    }

    fn prefetch<'a>(&'a self, modules: &'a [String]) -> BoxFuture<'a, Vec<Module>> {
        Box::pin(async move {
            let mut found = Vec::new();
            for module in modules {
                if let Ok(loaded) = self.load(module).await {
                    found.push(loaded);
                }
            }
            found
        })
    }
}
