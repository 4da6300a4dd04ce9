#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("catalog error: {0}")]
    Lookup(#[from] crate::catalog::LookupError),

    #[error("staging error: {0}")]
    Stage(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] sandbox::SandboxError),

    #[error("output relay error: {0}")]
    Relay(std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
