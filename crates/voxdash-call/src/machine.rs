//! The call session state machine.
//!
//! [`CallMachine`] is a synchronous reducer. It owns the current
//! [`CallSession`], consumes user intents and tagged asynchronous results,
//! and answers each with a list of [`Effect`]s for the driver to perform.
//! It never performs I/O itself, so every transition can be exercised
//! directly in tests.
//!
//! | From | Input | To |
//! |------|-------|----|
//! | Idle / Ended / Failed | start | Registering |
//! | Registering | registration ok / err / deadline | AwaitingPermission / Failed / Failed |
//! | AwaitingPermission | permission ok / err | Connecting / Failed |
//! | Connecting | `started` / `error` / `ended` / deadline | Active / Failed / Failed / Failed |
//! | Active | stop / `ended` / `error` | Ending / Ended / Failed |
//! | Ending | `ended` / `error` / deadline | Ended |
//! | Registering, AwaitingPermission, Connecting | stop | Ended |
//!
//! Anything addressed to a tag other than the current session's, or to a
//! session that already reached `Ended` or `Failed`, is dropped.

use crate::config::CallConfig;
use crate::error::{CallError, PermissionError, RegistrationError};
use crate::registrar::Registration;
use crate::rtc::RtcEvent;
use crate::transcript::TranscriptFeed;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use voxdash_types::{CallStatus, Credential, FailureReason, SessionTag, TranscriptEntry};

/// States that carry a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registering,
    Connecting,
    Ending,
}

impl Stage {
    fn status(self) -> CallStatus {
        match self {
            Self::Registering => CallStatus::Registering,
            Self::Connecting => CallStatus::Connecting,
            Self::Ending => CallStatus::Ending,
        }
    }
}

/// A failure surfaced to the user. Emitted once per failed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotice {
    pub tag: SessionTag,
    pub agent_id: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// Work requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Register { tag: SessionTag, agent_id: String },
    AcquireMicrophone { tag: SessionTag },
    /// Keep the audio input handle just granted for `tag`.
    HoldMicrophone { tag: SessionTag },
    StartRtc { tag: SessionTag, credential: Credential },
    /// Stop the RTC connection started for `tag`, if it is still live.
    StopRtc { tag: SessionTag },
    ReleaseMicrophone,
    ArmDeadline { tag: SessionTag, stage: Stage, after: Duration },
    Notify(CallNotice),
}

/// One attempt to hold a live test conversation with an agent.
#[derive(Debug)]
pub struct CallSession {
    tag: SessionTag,
    agent_id: String,
    session_id: Option<String>,
    credential: Option<Credential>,
    status: CallStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failure_reason: Option<FailureReason>,
    failure_detail: Option<String>,
    agent_speaking: bool,
    transcript: TranscriptFeed,
}

impl CallSession {
    fn new(tag: SessionTag, agent_id: String, transcript_capacity: usize) -> Self {
        Self {
            tag,
            agent_id,
            session_id: None,
            credential: None,
            status: CallStatus::Registering,
            started_at: None,
            ended_at: None,
            failure_reason: None,
            failure_detail: None,
            agent_speaking: false,
            transcript: TranscriptFeed::new(transcript_capacity),
        }
    }

    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    pub fn agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    pub fn transcript(&self) -> &TranscriptFeed {
        &self.transcript
    }

    fn transition(&mut self, to: CallStatus) {
        info!(
            tag = %self.tag,
            agent_id = %self.agent_id,
            from = %self.status,
            to = %to,
            "call status changed"
        );
        self.status = to;
    }

    fn end(&mut self, effects: &mut Vec<Effect>) {
        self.transition(CallStatus::Ended);
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        self.wind_down(effects);
    }

    fn fail(&mut self, reason: FailureReason, detail: String, effects: &mut Vec<Effect>) {
        warn!(tag = %self.tag, reason = %reason, detail = %detail, "test call failed");
        self.transition(CallStatus::Failed);
        self.failure_reason = Some(reason);
        self.failure_detail = Some(detail.clone());
        self.wind_down(effects);
        effects.push(Effect::Notify(CallNotice {
            tag: self.tag,
            agent_id: self.agent_id.clone(),
            reason,
            detail,
        }));
    }

    fn wind_down(&mut self, effects: &mut Vec<Effect>) {
        self.agent_speaking = false;
        self.transcript.close();
        effects.push(Effect::ReleaseMicrophone);
    }
}

/// Point-in-time view of the control surface state, serializable for UI
/// hosts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub tag: Option<SessionTag>,
    pub status: CallStatus,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
    pub failure_detail: Option<String>,
    pub agent_speaking: bool,
    pub transcript: Vec<TranscriptEntry>,
}

impl CallSnapshot {
    /// Whether the busy indicator should be shown.
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Whether the affordance currently means "stop".
    pub fn can_stop(&self) -> bool {
        self.status.is_in_flight()
    }

    pub fn affordance_label(&self) -> &'static str {
        if self.can_stop() {
            "Stop"
        } else {
            "Test"
        }
    }
}

/// Reducer owning the current call session.
#[derive(Debug)]
pub struct CallMachine {
    session: Option<CallSession>,
    register_timeout: Duration,
    connect_timeout: Duration,
    stop_grace: Duration,
    transcript_capacity: usize,
}

impl CallMachine {
    pub fn new(config: &CallConfig) -> Self {
        Self {
            session: None,
            register_timeout: config.register_timeout(),
            connect_timeout: config.connect_timeout(),
            stop_grace: config.stop_grace(),
            transcript_capacity: config.max_transcript_entries,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.session
            .as_ref()
            .map_or(CallStatus::Idle, |s| s.status)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        match &self.session {
            None => CallSnapshot::default(),
            Some(s) => CallSnapshot {
                tag: Some(s.tag),
                status: s.status,
                agent_id: Some(s.agent_id.clone()),
                session_id: s.session_id.clone(),
                started_at: s.started_at,
                ended_at: s.ended_at,
                failure_reason: s.failure_reason,
                failure_detail: s.failure_detail.clone(),
                agent_speaking: s.agent_speaking,
                transcript: s.transcript.current(),
            },
        }
    }

    /// Begins a fresh session for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns `CallError::InvalidState` while another session is in flight.
    pub fn start(&mut self, agent_id: &str) -> Result<(SessionTag, Vec<Effect>), CallError> {
        let status = self.status();
        if status.is_in_flight() {
            return Err(CallError::InvalidState {
                intent: "start",
                status,
            });
        }

        let tag = SessionTag::allocate();

        let session = CallSession::new(tag, agent_id.to_string(), self.transcript_capacity);
        info!(%tag, agent_id, "test call requested");
        self.session = Some(session);

        Ok((
            tag,
            vec![
                Effect::Register {
                    tag,
                    agent_id: agent_id.to_string(),
                },
                Effect::ArmDeadline {
                    tag,
                    stage: Stage::Registering,
                    after: self.register_timeout,
                },
            ],
        ))
    }

    /// Handles the user's stop intent. Idempotent.
    pub fn stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let stop_grace = self.stop_grace;
        let Some(session) = self.session.as_mut() else {
            debug!("stop requested with no session");
            return effects;
        };

        match session.status {
            CallStatus::Registering | CallStatus::AwaitingPermission => session.end(&mut effects),
            CallStatus::Connecting => {
                effects.push(Effect::StopRtc { tag: session.tag });
                session.end(&mut effects);
            }
            CallStatus::Active => {
                session.transition(CallStatus::Ending);
                session.agent_speaking = false;
                effects.push(Effect::StopRtc { tag: session.tag });
                effects.push(Effect::ArmDeadline {
                    tag: session.tag,
                    stage: Stage::Ending,
                    after: stop_grace,
                });
            }
            status => debug!(tag = %session.tag, %status, "stop ignored"),
        }
        effects
    }

    /// Ends whatever is in flight because the owner is going away.
    pub fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return effects;
        };

        match session.status {
            CallStatus::Registering | CallStatus::AwaitingPermission => session.end(&mut effects),
            CallStatus::Connecting | CallStatus::Active | CallStatus::Ending => {
                effects.push(Effect::StopRtc { tag: session.tag });
                session.end(&mut effects);
            }
            _ => {}
        }
        effects
    }

    pub fn registration_resolved(
        &mut self,
        tag: SessionTag,
        result: Result<Registration, RegistrationError>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(session) = self.live_session(tag, "registration result") else {
            return effects;
        };
        if session.status != CallStatus::Registering {
            debug!(%tag, status = %session.status, "registration result out of order");
            return effects;
        }

        match result {
            Ok(registration) => {
                session.session_id = Some(registration.session_id);
                session.credential = Some(registration.credential);
                session.transition(CallStatus::AwaitingPermission);
                effects.push(Effect::AcquireMicrophone { tag });
            }
            Err(e) => session.fail(FailureReason::RegistrationFailed, e.to_string(), &mut effects),
        }
        effects
    }

    pub fn permission_resolved(
        &mut self,
        tag: SessionTag,
        result: Result<(), PermissionError>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let connect_timeout = self.connect_timeout;
        let Some(session) = self.live_session(tag, "permission result") else {
            return effects;
        };
        if session.status != CallStatus::AwaitingPermission {
            debug!(%tag, status = %session.status, "permission result out of order");
            return effects;
        }

        if let Err(e) = result {
            session.fail(FailureReason::PermissionDenied, e.to_string(), &mut effects);
            return effects;
        }

        let Some(credential) = session.credential.clone() else {
            session.fail(
                FailureReason::TransportError,
                "no credential for connection".to_string(),
                &mut effects,
            );
            return effects;
        };

        session.transition(CallStatus::Connecting);
        effects.push(Effect::HoldMicrophone { tag });
        effects.push(Effect::StartRtc { tag, credential });
        effects.push(Effect::ArmDeadline {
            tag,
            stage: Stage::Connecting,
            after: connect_timeout,
        });
        effects
    }

    pub fn rtc_event(&mut self, tag: SessionTag, event: RtcEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(session) = self.live_session(tag, event.name()) else {
            return effects;
        };

        match (session.status, event) {
            (CallStatus::Connecting, RtcEvent::Started) => {
                session.started_at = Some(Utc::now());
                session.transcript.open();
                session.transition(CallStatus::Active);
            }
            (CallStatus::Connecting | CallStatus::Active, RtcEvent::Error(cause)) => {
                effects.push(Effect::StopRtc { tag: session.tag });
                session.fail(FailureReason::TransportError, cause, &mut effects);
            }
            (CallStatus::Connecting, RtcEvent::Ended) => session.fail(
                FailureReason::TransportError,
                "call ended before the media channel was live".to_string(),
                &mut effects,
            ),
            (CallStatus::Active | CallStatus::Ending, RtcEvent::Ended) => session.end(&mut effects),
            (CallStatus::Ending, RtcEvent::Error(cause)) => {
                warn!(%tag, %cause, "RTC error while ending; treating as ended");
                session.end(&mut effects);
            }
            (CallStatus::Active, RtcEvent::AgentStartTalking) => session.agent_speaking = true,
            (CallStatus::Active, RtcEvent::AgentStopTalking) => session.agent_speaking = false,
            (CallStatus::Active, RtcEvent::Transcript(text)) => {
                session.transcript.append(text);
            }
            (status, event) => {
                debug!(%tag, %status, event = event.name(), "RTC event ignored in this state")
            }
        }
        effects
    }

    pub fn deadline(&mut self, tag: SessionTag, stage: Stage) -> Vec<Effect> {
        let mut effects = Vec::new();
        let (register_timeout, connect_timeout) = (self.register_timeout, self.connect_timeout);
        let Some(session) = self.live_session(tag, "deadline") else {
            return effects;
        };
        if session.status != stage.status() {
            return effects;
        }

        match stage {
            Stage::Registering => session.fail(
                FailureReason::TransportError,
                format!(
                    "registration timed out after {} seconds",
                    register_timeout.as_secs()
                ),
                &mut effects,
            ),
            Stage::Connecting => {
                effects.push(Effect::StopRtc { tag: session.tag });
                session.fail(
                    FailureReason::TransportError,
                    format!(
                        "connection timed out after {} seconds",
                        connect_timeout.as_secs()
                    ),
                    &mut effects,
                );
            }
            Stage::Ending => {
                warn!(%tag, "RTC client never confirmed the end of the call");
                session.end(&mut effects);
            }
        }
        effects
    }

    /// The current session if `tag` addresses it and it is still in flight.
    fn live_session(&mut self, tag: SessionTag, what: &str) -> Option<&mut CallSession> {
        match self.session.as_mut() {
            Some(s) if s.tag == tag && !s.status.is_terminal() => Some(s),
            Some(s) => {
                debug!(%tag, current = %s.tag, status = %s.status, what, "dropping superseded input");
                None
            }
            None => {
                debug!(%tag, what, "dropping input with no session");
                None
            }
        }
    }
}
