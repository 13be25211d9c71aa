//! The control surface: one event loop per "Test" button.
//!
//! [`ControlSurface::spawn`] starts a task that owns a [`CallMachine`] and
//! processes messages strictly in arrival order. User intents arrive through
//! the surface's methods; registration results, permission results, RTC
//! events and deadlines are posted back to the same queue by helper tasks,
//! each stamped with the [`SessionTag`] of the session that caused it.
//!
//! The task holds the microphone for the live session and the RTC listener
//! registration. Both are released when the session ends and, at the latest,
//! when the surface is shut down or dropped.

use crate::config::CallConfig;
use crate::error::{CallError, PermissionError, RegistrationError};
use crate::machine::{CallMachine, CallNotice, CallSnapshot, Effect, Stage};
use crate::media::{AudioInputHandle, MediaPermissionGate};
use crate::registrar::{CallRegistrar, Registration};
use crate::rtc::{RtcAttachment, RtcEvent, RtcListener, RtcSessionClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use voxdash_types::SessionTag;

/// Capacity of the failure notice broadcast channel.
const NOTICE_BROADCAST_CAPACITY: usize = 16;

/// External collaborators driven by a control surface.
#[derive(Clone)]
pub struct CallServices {
    pub registrar: Arc<dyn CallRegistrar>,
    pub media: Arc<dyn MediaPermissionGate>,
    pub rtc: RtcSessionClient,
}

enum Message {
    Start {
        agent_id: String,
        reply: oneshot::Sender<Result<SessionTag, CallError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Toggle {
        agent_id: String,
        reply: oneshot::Sender<Result<Option<SessionTag>, CallError>>,
    },
    Registered {
        tag: SessionTag,
        result: Result<Registration, RegistrationError>,
    },
    Permission {
        tag: SessionTag,
        result: Result<AudioInputHandle, PermissionError>,
    },
    Rtc {
        tag: SessionTag,
        event: RtcEvent,
    },
    Deadline {
        tag: SessionTag,
        stage: Stage,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running control surface.
///
/// Dropping the handle tears the surface down just like
/// [`ControlSurface::shutdown`], without waiting for it.
#[derive(Debug)]
pub struct ControlSurface {
    tx: mpsc::UnboundedSender<Message>,
    snapshot: watch::Receiver<CallSnapshot>,
    notices: broadcast::Sender<CallNotice>,
}

impl ControlSurface {
    /// Starts the surface's event loop on the current tokio runtime.
    pub fn spawn(config: &CallConfig, services: CallServices) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = CallMachine::new(config);
        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());
        let (notices, _) = broadcast::channel(NOTICE_BROADCAST_CAPACITY);

        let weak = tx.downgrade();
        let listener: RtcListener = Arc::new(move |tag, event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Message::Rtc { tag, event });
            }
        });
        let rtc = services.rtc.attach(listener);

        let driver = Driver {
            machine,
            services,
            tx: tx.downgrade(),
            snapshot_tx,
            notices: notices.clone(),
            microphone: None,
            rtc: Some(rtc),
        };
        tokio::spawn(driver.run(rx));
        info!("control surface attached");

        Self {
            tx,
            snapshot,
            notices,
        }
    }

    /// Requests a new test call for `agent_id`.
    ///
    /// # Errors
    ///
    /// `CallError::InvalidState` while another session is in flight,
    /// `CallError::Closed` after shutdown.
    pub async fn start_test(&self, agent_id: impl Into<String>) -> Result<SessionTag, CallError> {
        let agent_id = agent_id.into();
        self.request(|reply| Message::Start { agent_id, reply })
            .await?
    }

    /// Stops the current session. A no-op when nothing is in flight.
    pub async fn stop_test(&self) -> Result<(), CallError> {
        self.request(|reply| Message::Stop { reply }).await
    }

    /// The single start/stop affordance: stops an in-flight session,
    /// otherwise starts one. Returns the new tag when a session was started.
    pub async fn toggle(
        &self,
        agent_id: impl Into<String>,
    ) -> Result<Option<SessionTag>, CallError> {
        let agent_id = agent_id.into();
        self.request(|reply| Message::Toggle { agent_id, reply })
            .await?
    }

    /// Latest published state.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified after every state change.
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    /// Receiver for failure notices, one per failed session.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<CallNotice> {
        self.notices.subscribe()
    }

    /// Ends any live session, releases the microphone and detaches from
    /// the RTC client, then waits for the event loop to exit.
    pub async fn shutdown(self) {
        if self.request(|reply| Message::Shutdown { reply }).await.is_err() {
            debug!("control surface already closed");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }
}

struct Driver {
    machine: CallMachine,
    services: CallServices,
    tx: mpsc::WeakUnboundedSender<Message>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    notices: broadcast::Sender<CallNotice>,
    microphone: Option<AudioInputHandle>,
    rtc: Option<RtcAttachment>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let mut shutdown_reply = None;
        while let Some(message) = rx.recv().await {
            shutdown_reply = self.handle(message);
            if shutdown_reply.is_some() {
                break;
            }
            self.publish();
        }

        let effects = self.machine.teardown();
        self.apply(effects, None);
        self.publish();
        if let Some(mic) = self.microphone.take() {
            mic.release();
        }
        drop(self.rtc.take());
        info!("control surface detached");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// Processes one message. Intent replies are sent only after the
    /// resulting snapshot is published. Returns the reply channel of a
    /// shutdown request.
    fn handle(&mut self, message: Message) -> Option<oneshot::Sender<()>> {
        match message {
            Message::Start { agent_id, reply } => {
                let result = self.start(&agent_id);
                self.publish();
                let _ = reply.send(result);
            }
            Message::Stop { reply } => {
                let effects = self.machine.stop();
                self.apply(effects, None);
                self.publish();
                let _ = reply.send(());
            }
            Message::Toggle { agent_id, reply } => {
                let result = if self.machine.status().is_in_flight() {
                    let effects = self.machine.stop();
                    self.apply(effects, None);
                    Ok(None)
                } else {
                    self.start(&agent_id).map(Some)
                };
                self.publish();
                let _ = reply.send(result);
            }
            Message::Registered { tag, result } => {
                let effects = self.machine.registration_resolved(tag, result);
                self.apply(effects, None);
            }
            Message::Permission { tag, result } => {
                let (granted, outcome) = match result {
                    Ok(handle) => (Some(handle), Ok(())),
                    Err(e) => (None, Err(e)),
                };
                let effects = self.machine.permission_resolved(tag, outcome);
                self.apply(effects, granted);
            }
            Message::Rtc { tag, event } => {
                let effects = self.machine.rtc_event(tag, event);
                self.apply(effects, None);
            }
            Message::Deadline { tag, stage } => {
                let effects = self.machine.deadline(tag, stage);
                self.apply(effects, None);
            }
            Message::Shutdown { reply } => return Some(reply),
        }
        None
    }

    fn start(&mut self, agent_id: &str) -> Result<SessionTag, CallError> {
        match self.machine.start(agent_id) {
            Ok((tag, effects)) => {
                self.apply(effects, None);
                Ok(tag)
            }
            Err(e) => {
                warn!(agent_id, error = %e, "start intent rejected");
                Err(e)
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>, mut granted: Option<AudioInputHandle>) {
        for effect in effects {
            match effect {
                Effect::Register { tag, agent_id } => self.spawn_registration(tag, agent_id),
                Effect::AcquireMicrophone { tag } => self.spawn_permission(tag),
                Effect::HoldMicrophone { tag } => {
                    if let Some(handle) = granted.take() {
                        debug!(%tag, device = handle.label(), "holding microphone");
                        if let Some(previous) = self.microphone.replace(handle) {
                            previous.release();
                        }
                    }
                }
                Effect::StartRtc { tag, credential } => {
                    if let Some(rtc) = &self.rtc {
                        rtc.start(tag, &credential);
                    }
                }
                Effect::StopRtc { tag } => {
                    if let Some(rtc) = &self.rtc {
                        rtc.stop(tag);
                    }
                }
                Effect::ReleaseMicrophone => {
                    if let Some(handle) = self.microphone.take() {
                        handle.release();
                    }
                }
                Effect::ArmDeadline { tag, stage, after } => self.spawn_deadline(tag, stage, after),
                Effect::Notify(notice) => {
                    let tag = notice.tag;
                    if self.notices.send(notice).is_err() {
                        debug!(%tag, "failure notice has no subscribers");
                    }
                }
            }
        }

        if let Some(handle) = granted {
            debug!(device = handle.label(), "discarding microphone granted to a superseded session");
            handle.release();
        }
    }

    fn publish(&self) {
        let next = self.machine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn spawn_registration(&self, tag: SessionTag, agent_id: String) {
        let registrar = Arc::clone(&self.services.registrar);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = registrar.register(&agent_id).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Message::Registered { tag, result });
            }
        });
    }

    fn spawn_permission(&self, tag: SessionTag) {
        let media = Arc::clone(&self.services.media);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = media.acquire_microphone().await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Message::Permission { tag, result });
            }
        });
    }

    fn spawn_deadline(&self, tag: SessionTag, stage: Stage, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Message::Deadline { tag, stage });
            }
        });
    }
}
