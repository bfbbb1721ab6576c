//! Error types for the HMR coordinator and dev server.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = HmrError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HmrError {
    /// Compiler rejected a batch
    #[error("Compile error: {0}")]
    Compile(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Protocol(#[from] fob_protocol::ProtocolError),

    #[error(transparent)]
    Config(#[from] fob_config::ConfigError),

    /// The coordinator dropped a pending reply
    #[error("HMR coordinator shut down")]
    Shutdown,
}
