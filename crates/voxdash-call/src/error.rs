use thiserror::Error;
use voxdash_types::CallStatus;

/// Why the backend did not issue a session credential.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("agent id must not be empty")]
    InvalidAgent,

    #[error("call registration is not configured")]
    NotConfigured,

    #[error("backend rejected call registration with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("call registration request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed registration response: {0}")]
    MalformedResponse(String),
}

/// Why microphone access could not be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("microphone access denied: {0}")]
    Denied(String),

    #[error("no audio input available: {0}")]
    Unavailable(String),
}

/// Synchronous refusal from an RTC transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcError {
    #[error("RTC client refused to start: {0}")]
    Start(String),
}

/// Errors returned to callers of the control surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The intent is not legal in the current status.
    #[error("cannot {intent} while session is {status}")]
    InvalidState {
        intent: &'static str,
        status: CallStatus,
    },

    /// The control surface has been torn down.
    #[error("control surface is closed")]
    Closed,
}
