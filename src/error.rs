use thiserror::Error;

/// Boxed error produced by user generator callbacks.
pub type GeneratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("package compilation failed: {0}")]
    CompilationFailed(String),

    #[error("compiled package exposes no job initializer")]
    JobInitializerMissing,

    #[error("job handler type error: {0}")]
    TypeException(String),

    #[error("job handler not found in package: {0}")]
    JobHandlerMissing(String),

    #[error("generator callback failed: {0}")]
    Generator(#[source] GeneratorError),
}

pub type Result<T> = std::result::Result<T, HandlerError>;
