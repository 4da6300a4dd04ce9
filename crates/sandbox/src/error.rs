#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("backend not available: {0}")]
    BackendUnavailable(String),

    #[error("sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("sandbox start failed: {0}")]
    StartFailed(String),

    #[error("sandbox attach failed: {0}")]
    AttachFailed(String),

    #[error("sandbox wait failed: {0}")]
    WaitFailed(String),

    #[error("sandbox stop failed: {0}")]
    StopFailed(String),

    #[error("malformed attach frame: {0}")]
    MalformedFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
