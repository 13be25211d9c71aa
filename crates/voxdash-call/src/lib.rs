//! Live voice test-call sessions for the voxdash agent dashboard.
//!
//! An operator presses "Test" on a voice agent; this crate registers the
//! call with the backend to obtain a short-lived credential, asks the host
//! for microphone access, opens the real-time audio channel through the
//! host's RTC client, tracks the session through its lifecycle, feeds a
//! live transcript, and guarantees that the microphone and the RTC
//! connection are released exactly once however the session ends.
//!
//! The pieces, leaf to root:
//!
//! - [`CallRegistrar`] / [`HttpCallRegistrar`]: credential issuance.
//! - [`MediaPermissionGate`]: microphone access, as a scoped
//!   [`AudioInputHandle`].
//! - [`RtcSessionClient`]: the single owned wrapper around the host's
//!   [`RtcTransport`].
//! - [`CallMachine`]: the reducer deciding every legal transition.
//! - [`TranscriptFeed`]: session-scoped transcript.
//! - [`ControlSurface`]: the event loop binding it all to one start/stop
//!   affordance.

pub mod config;
pub mod control;
pub mod error;
pub mod machine;
pub mod media;
pub mod registrar;
pub mod rtc;
pub mod transcript;

pub use config::CallConfig;
pub use control::{CallServices, ControlSurface};
pub use error::{CallError, PermissionError, RegistrationError, RtcError};
pub use machine::{CallMachine, CallNotice, CallSession, CallSnapshot, Effect, Stage};
pub use media::{AudioInputHandle, MediaPermissionGate};
pub use registrar::{CallRegistrar, HttpCallRegistrar, Registration};
pub use rtc::{
    RtcAttachment, RtcEvent, RtcEventSink, RtcListener, RtcSessionClient, RtcTransport,
};
pub use transcript::TranscriptFeed;
