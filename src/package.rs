//! Interfaces to the package loader, which compiles a job script into a
//! loadable artifact. Compilation itself happens outside this crate; the
//! handler only consumes the result and serves files out of the compiled
//! package folder to deploying worker clients.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::generator::{GeneratorInit, JobGenerator};

/// Raw inputs a handler is constructed from.
#[derive(Debug, Clone)]
pub struct JobScriptDescriptor {
    pub package_name: String,
    /// The job script source text handed to the loader.
    pub script: String,
    /// Library references the loader needs to compile the script.
    pub compiler_references: Vec<String>,
    /// Files worker clients must fetch alongside the artifact.
    pub worker_dependencies: Vec<String>,
}

impl JobScriptDescriptor {
    pub fn new(package_name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            script: script.into(),
            compiler_references: Vec::new(),
            worker_dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// What the loader hands back after compiling a descriptor.
pub struct CompiledPackage {
    /// Folder the compiled artifacts live under. Read-only for the handler.
    pub package_folder: PathBuf,
    /// File name of the compiled artifact inside the package folder.
    pub artifact_file: String,
    pub initializer: Option<Box<dyn GeneratorInit>>,
    /// Generator implementations keyed by their declared handler name.
    pub generators: HashMap<String, Box<dyn JobGenerator>>,
}

/// Compiles job scripts into loadable packages. Implemented by the host's
/// loader; the handler never compiles anything itself.
pub trait PackageLoader: Send + Sync {
    fn compile(
        &self,
        descriptor: &JobScriptDescriptor,
        base_folder: &Path,
    ) -> Result<CompiledPackage, CompileError>;
}

/// Resolve a client-requested file name inside the package folder.
///
/// Absolute paths and any component other than a plain name are rejected so
/// requests cannot escape the package folder.
pub(crate) fn resolve_package_file(folder: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    if relative.as_os_str().is_empty() || relative.is_absolute() {
        return None;
    }
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(folder.join(relative))
}
