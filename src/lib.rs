pub mod config;
pub mod error;
pub mod generator;
pub mod handler;
pub mod package;
pub mod shutdown;

pub use config::HandlerSettings;
pub use error::{GeneratorError, HandlerError, Result};
pub use generator::{EnqueueHandle, GeneratorContext, GeneratorInit, JobGenerator};
pub use handler::{Handler, HandlerInfo, HandlerJobInfo, HandlerState, Job, JobResult};
pub use package::{CompileError, CompiledPackage, JobScriptDescriptor, PackageLoader};
