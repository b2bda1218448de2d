use thiserror::Error;

/// Common result type for attach operations.
pub type Result<T> = std::result::Result<T, AttachError>;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("target process not found: {0}")]
    TargetNotFound(u32),
    #[error("target {0} refused attach: {1}")]
    AttachRefused(u32, String),
    #[error("failed to load diagnostic agent into target: {0}")]
    AgentLoadFailed(String),
    #[error("diagnostic server failed to bind in target: {0}")]
    BindFailed(String),
    #[error("attach protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
