use std::path::PathBuf;
use thiserror::Error;

/// Common result type for in-target bootstrap operations.
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no agent bundle available: neither a home directory nor an embedded bundle was supplied")]
    BundleMissing,
    #[error("failed to create workspace directory within {attempts} attempts (tried {prefix}0 to {prefix}{last})", last = .attempts - 1)]
    WorkspaceExhausted { prefix: String, attempts: u32 },
    #[error("diagnostic core module not found: {}", .0.display())]
    CoreModuleMissing(PathBuf),
    #[error("bootstrap entry point not resolved in any scope: {0}")]
    EntryUnresolved(String),
    #[error("diagnostic server failed to bind: {0}")]
    BindFailed(String),
    #[error("attach protocol error: {0}")]
    Protocol(#[from] spyglass_core::AttachError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
