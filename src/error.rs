//! Per-subsystem error enums. Binaries wrap these in `anyhow::Error` at the
//! `main()` boundary; library code keeps the concrete type so callers can
//! match on it.

use thiserror::Error;

use crate::framing::FramingError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to bind TCP listener on port {0}: {1}")]
    BindFailed(u16, std::io::Error),
    #[error("failed to bind discovery broadcast socket on port {0}: {1}")]
    BroadcastBindFailed(u16, std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind discovery socket on port {0}: {1}")]
    DiscoveryBindFailed(u16, std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source file could not be opened: {0}")]
    SourceOpenFailed(std::io::Error),
    #[error("destination file could not be created: {0}")]
    DestinationOpenFailed(std::io::Error),
    #[error("write error while receiving transfer: {0}")]
    WriteFailed(std::io::Error),
    #[error("transfer size mismatch: expected {expected} got {received}")]
    SizeMismatch { expected: u64, received: u64 },
    #[error("no transfer is currently in progress")]
    NoActiveTransfer,
}

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("failed to spawn executor process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("executor process timed out")]
    TimedOut,
    #[error("executor process exited with a non-zero status: {0}")]
    NonZeroExit(String),
}
