//! Shared types for the voxdash test-call core.
//!
//! This crate provides the vocabulary used by every other crate in the
//! workspace: the call session status codes, the failure taxonomy, the
//! session identity tag used to discard superseded events, the redacting
//! credential wrapper, and transcript entries.
//!
//! Nothing here performs I/O. Keeping these definitions in a leaf crate lets
//! the call core, the probe binary, and any UI host agree on the same types
//! without depending on each other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

mod credential;
mod transcript;

pub use credential::Credential;
pub use transcript::TranscriptEntry;

/// Lifecycle status of a test call session.
///
/// `Idle` is the initial state; `Ended` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// No session has been requested yet.
    #[default]
    Idle,
    /// Waiting for the backend to issue a session credential.
    Registering,
    /// Credential obtained; waiting for microphone access.
    AwaitingPermission,
    /// Microphone granted; the RTC client is establishing the media channel.
    Connecting,
    /// Remote media channel is live.
    Active,
    /// A local stop was requested; waiting for the RTC client to confirm.
    Ending,
    /// The session finished normally.
    Ended,
    /// The session failed; see [`FailureReason`].
    Failed,
}

impl CallStatus {
    /// Returns `true` for `Ended` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Returns `true` while a session is neither idle nor finished.
    pub fn is_in_flight(self) -> bool {
        !matches!(self, Self::Idle | Self::Ended | Self::Failed)
    }

    /// Returns `true` for the transitional states where the control surface
    /// shows a busy indicator.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Registering | Self::AwaitingPermission | Self::Connecting | Self::Ending
        )
    }

    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Registering => "REGISTERING",
            Self::AwaitingPermission => "AWAITING_PERMISSION",
            Self::Connecting => "CONNECTING",
            Self::Active => "ACTIVE",
            Self::Ending => "ENDING",
            Self::Ended => "ENDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown call status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown call status: {0}")]
pub struct ParseCallStatusError(pub String);

impl FromStr for CallStatus {
    type Err = ParseCallStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "REGISTERING" => Ok(Self::Registering),
            "AWAITING_PERMISSION" => Ok(Self::AwaitingPermission),
            "CONNECTING" => Ok(Self::Connecting),
            "ACTIVE" => Ok(Self::Active),
            "ENDING" => Ok(Self::Ending),
            "ENDED" => Ok(Self::Ended),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseCallStatusError(s.to_string())),
        }
    }
}

/// Why a session reached `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The backend rejected or was unreachable during call registration.
    RegistrationFailed,
    /// Microphone access was denied or is unavailable.
    PermissionDenied,
    /// The RTC client reported an error, or a deadline expired.
    TransportError,
}

impl FailureReason {
    /// Returns the canonical string label for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegistrationFailed => "REGISTRATION_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::TransportError => "TRANSPORT_ERROR",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next value handed out by [`SessionTag::allocate`].
static NEXT_SESSION_TAG: AtomicU64 = AtomicU64::new(1);

/// Process-local identity of one call session attempt.
///
/// A new tag is allocated for every accepted start intent, from one counter
/// shared by the whole process, so two control surfaces never hand out the
/// same tag. Every
/// asynchronous result is stamped with the tag of the session that caused
/// it, so results belonging to a superseded session can be recognised and
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionTag(u64);

impl SessionTag {
    /// The first tag a process allocates.
    pub const FIRST: Self = Self(1);

    /// Allocates a tag no other caller in this process has received.
    pub fn allocate() -> Self {
        Self(NEXT_SESSION_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the tag that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1).max(1))
    }

    /// Returns the numeric value of the tag.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}
