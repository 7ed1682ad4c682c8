use std::io;
use thiserror::Error;

/// The primary error type for the `stagelink-lib` library.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for the stage: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("response command mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ResponseMismatch { expected: u8, actual: u8 },

    #[error("a request with response type {0:#04x} is already pending")]
    RequestPending(u8),

    #[error("no configuration has been read from the stage yet")]
    ConfigNotLoaded,

    #[error("session task is gone")]
    SessionClosed,
}
