use thiserror::Error;

/// Why a driver request did not produce the expected response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    /// The host executed the command and reported a failure.
    #[error("host error: {0}")]
    Remote(String),

    #[error("host disconnected before replying")]
    Disconnected,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    #[error("driver stopped")]
    Stopped,
}
