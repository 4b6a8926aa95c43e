use thiserror::Error;

/// Failures surfaced by the gateway. Malformed individual frames never appear
/// here directly: they are dropped by the codec and the affected call ends in
/// `RequestTimeout`.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("failed to spawn tool server process: {0}")]
    Spawn(String),

    #[error("tool server initialization timeout")]
    HandshakeTimeout,

    #[error("tool server request timeout")]
    RequestTimeout,

    #[error("tool server process exited unexpectedly")]
    ProcessExited,

    #[error("tool server error: {0}")]
    Tool(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
