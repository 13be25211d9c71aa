//! Wrapper around the opaque real-time audio client.
//!
//! The host application provides an [`RtcTransport`], an event-emitter style
//! binding to whatever WebRTC-like library carries the call. The
//! [`RtcSessionClient`] is the single owned instance the rest of the crate
//! talks to. It keeps at most one media connection alive, stamps every
//! transport event with the [`SessionTag`] of the connection it belongs to,
//! and routes those events to whichever control surface is currently
//! attached.

use crate::error::RtcError;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};
use voxdash_types::{Credential, SessionTag};

/// Lifecycle events emitted by an RTC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcEvent {
    /// The remote media channel is live.
    Started,
    /// The call ended, locally or remotely.
    Ended,
    /// The remote agent started speaking.
    AgentStartTalking,
    /// The remote agent stopped speaking.
    AgentStopTalking,
    /// A transcript fragment.
    Transcript(String),
    /// Unrecoverable transport fault.
    Error(String),
}

impl RtcEvent {
    /// Returns the transport-level event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "call_started",
            Self::Ended => "call_ended",
            Self::AgentStartTalking => "agent_start_talking",
            Self::AgentStopTalking => "agent_stop_talking",
            Self::Transcript(_) => "update",
            Self::Error(_) => "error",
        }
    }
}

/// Callback registered with a transport.
pub type RtcEventSink = Arc<dyn Fn(RtcEvent) + Send + Sync>;

/// Callback receiving tagged events from an [`RtcSessionClient`].
pub type RtcListener = Arc<dyn Fn(SessionTag, RtcEvent) + Send + Sync>;

/// Binding to the real-time audio library.
///
/// `start_call` only initiates the connection; success and failure are
/// reported through the registered sink. `stop_call` must tolerate being
/// called on a connection that never finished starting.
pub trait RtcTransport: Send + Sync {
    fn start_call(&self, access_token: &str) -> Result<(), RtcError>;
    fn stop_call(&self);
    fn on_event(&self, sink: RtcEventSink);
    fn remove_all_listeners(&self);
}

/// Detail of the error a control surface receives when another surface
/// takes the RTC client over while its connection is live.
const DISPLACED: &str = "RTC client attached to another control surface";

#[derive(Default)]
struct ClientState {
    /// Tag of the most recently started connection.
    current: Option<SessionTag>,
    /// Whether `stop_call` still has something to stop.
    live: bool,
    listener: Option<(u64, RtcListener)>,
    next_listener_id: u64,
}

impl ClientState {
    fn is_attached(&self, id: u64) -> bool {
        matches!(self.listener, Some((current, _)) if current == id)
    }
}

struct Inner {
    transport: Arc<dyn RtcTransport>,
    state: Mutex<ClientState>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, event: RtcEvent) {
        let (tag, listener) = {
            let mut state = self.lock();
            if event == RtcEvent::Ended {
                state.live = false;
            }
            (
                state.current,
                state.listener.as_ref().map(|(_, l)| Arc::clone(l)),
            )
        };

        match (tag, listener) {
            (Some(tag), Some(listener)) => listener(tag, event),
            (None, _) => debug!(event = event.name(), "dropping RTC event with no session"),
            (_, None) => debug!(event = event.name(), "dropping RTC event with no listener"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.transport.remove_all_listeners();
    }
}

/// The single RTC client of an application.
///
/// Cloning yields another handle to the same client. Connections are
/// started and stopped through the [`RtcAttachment`] returned by
/// [`RtcSessionClient::attach`]; only the most recent attachment may drive
/// the client.
#[derive(Clone)]
pub struct RtcSessionClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for RtcSessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RtcSessionClient")
            .field("current", &state.current)
            .field("live", &state.live)
            .field("attached", &state.listener.is_some())
            .finish()
    }
}

impl RtcSessionClient {
    pub fn new(transport: Arc<dyn RtcTransport>) -> Self {
        let inner = Arc::new(Inner {
            transport: Arc::clone(&transport),
            state: Mutex::new(ClientState::default()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        transport.on_event(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(event);
            }
        }));

        Self { inner }
    }

    pub fn is_live(&self) -> bool {
        self.inner.lock().live
    }

    /// Tag of the most recently started connection.
    pub fn current_tag(&self) -> Option<SessionTag> {
        self.inner.lock().current
    }

    /// Routes tagged events to `listener` until the returned attachment is
    /// dropped.
    ///
    /// Attaching displaces the previous listener. If that listener still
    /// owns a live connection, the connection is stopped and the displaced
    /// listener receives an [`RtcEvent::Error`] for its tag; if its last
    /// connection already stopped, it receives [`RtcEvent::Ended`] so a
    /// pending local stop can complete.
    pub fn attach(&self, listener: RtcListener) -> RtcAttachment {
        let (id, displaced) = {
            let mut state = self.inner.lock();
            state.next_listener_id += 1;
            let id = state.next_listener_id;
            let previous = state.listener.replace((id, Arc::clone(&listener)));
            let displaced = match (previous, state.current) {
                (Some((_, old)), Some(tag)) => {
                    let was_live = std::mem::replace(&mut state.live, false);
                    Some((old, tag, was_live))
                }
                (Some(_), None) => {
                    debug!("replacing attached RTC listener");
                    None
                }
                (None, _) => None,
            };
            (id, displaced)
        };

        if let Some((old, tag, was_live)) = displaced {
            if was_live {
                warn!(%tag, "RTC client taken over; stopping the displaced connection");
                self.inner.transport.stop_call();
                old(tag, RtcEvent::Error(DISPLACED.to_string()));
            } else {
                debug!(%tag, "RTC listener replaced");
                old(tag, RtcEvent::Ended);
            }
        }

        RtcAttachment {
            inner: Arc::downgrade(&self.inner),
            id,
            listener,
        }
    }
}

/// One control surface's hold on the [`RtcSessionClient`].
///
/// Starts and stops are honoured only while this is the client's current
/// attachment. Dropping it detaches the listener unless a newer attachment
/// has already replaced it.
#[must_use = "dropping the attachment detaches the listener immediately"]
pub struct RtcAttachment {
    inner: Weak<Inner>,
    id: u64,
    listener: RtcListener,
}

impl RtcAttachment {
    /// Starts a connection for `tag`.
    ///
    /// A connection still live for an earlier tag is stopped first, while
    /// its events are still stamped with that tag. A synchronous refusal
    /// from the transport, or an attachment that has been displaced, is
    /// delivered to the listener as an [`RtcEvent::Error`] instead of
    /// being returned.
    pub fn start(&self, tag: SessionTag, credential: &Credential) {
        let Some(inner) = self.inner.upgrade() else {
            self.refuse(tag, "RTC client is gone");
            return;
        };

        let previous = {
            let mut state = inner.lock();
            if !state.is_attached(self.id) {
                drop(state);
                self.refuse(tag, DISPLACED);
                return;
            }
            if std::mem::replace(&mut state.live, false) {
                state.current
            } else {
                None
            }
        };

        if let Some(prev) = previous {
            warn!(previous = %prev, %tag, "force-stopping live RTC connection");
            inner.transport.stop_call();
        }

        {
            let mut state = inner.lock();
            if !state.is_attached(self.id) {
                drop(state);
                self.refuse(tag, DISPLACED);
                return;
            }
            state.current = Some(tag);
            state.live = true;
        }

        info!(%tag, token_len = credential.len(), "starting RTC connection");
        if let Err(e) = inner.transport.start_call(credential.expose()) {
            warn!(%tag, error = %e, "RTC transport refused to start");
            inner.lock().live = false;
            inner.dispatch(RtcEvent::Error(e.to_string()));
        }
    }

    /// Stops the connection started for `tag`. A no-op when that connection
    /// is no longer live, was superseded, or belongs to another attachment.
    pub fn stop(&self, tag: SessionTag) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        {
            let mut state = inner.lock();
            if !state.is_attached(self.id) || !state.live || state.current != Some(tag) {
                debug!(%tag, "RTC stop requested with no live connection for the session");
                return;
            }
            state.live = false;
        }
        info!(%tag, "stopping RTC connection");
        inner.transport.stop_call();
    }

    fn refuse(&self, tag: SessionTag, detail: &str) {
        warn!(%tag, detail, "RTC start refused");
        (self.listener)(tag, RtcEvent::Error(detail.to_string()));
    }
}

impl Drop for RtcAttachment {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.lock();
            if state.is_attached(self.id) {
                state.listener = None;
                debug!("RTC listener detached");
            }
        }
    }
}

impl fmt::Debug for RtcAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcAttachment").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        sink: Mutex<Option<RtcEventSink>>,
        starts: Mutex<Vec<String>>,
        stops: Mutex<usize>,
        refuse: bool,
        /// Emit `call_ended` from inside `stop_call`, as many SDKs do.
        ends_on_stop: bool,
    }

    impl RecordingTransport {
        fn emit(&self, event: RtcEvent) {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink(event);
            }
        }

        fn stops(&self) -> usize {
            *self.stops.lock().unwrap()
        }
    }

    impl RtcTransport for RecordingTransport {
        fn start_call(&self, access_token: &str) -> Result<(), RtcError> {
            self.starts.lock().unwrap().push(access_token.to_string());
            if self.refuse {
                return Err(RtcError::Start("no audio context".to_string()));
            }
            Ok(())
        }

        fn stop_call(&self) {
            *self.stops.lock().unwrap() += 1;
            if self.ends_on_stop {
                self.emit(RtcEvent::Ended);
            }
        }

        fn on_event(&self, sink: RtcEventSink) {
            *self.sink.lock().unwrap() = Some(sink);
        }

        fn remove_all_listeners(&self) {
            *self.sink.lock().unwrap() = None;
        }
    }

    type Received = Arc<Mutex<Vec<(SessionTag, RtcEvent)>>>;

    fn recording_listener() -> (RtcListener, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        let listener: RtcListener = Arc::new(move |tag, event| r.lock().unwrap().push((tag, event)));
        (listener, received)
    }

    fn tags() -> (SessionTag, SessionTag) {
        (SessionTag::FIRST, SessionTag::FIRST.next())
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, _) = recording_listener();
        let rtc = client.attach(listener);
        rtc.stop(SessionTag::FIRST);
        rtc.stop(SessionTag::FIRST);
        assert_eq!(transport.stops(), 0);
    }

    #[test]
    fn events_are_stamped_with_current_tag() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, received) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(SessionTag::FIRST, &Credential::new("tok_abc"));
        transport.emit(RtcEvent::Started);

        assert_eq!(transport.starts.lock().unwrap().as_slice(), ["tok_abc"]);
        assert_eq!(
            received.lock().unwrap().as_slice(),
            [(SessionTag::FIRST, RtcEvent::Started)]
        );
    }

    #[test]
    fn stop_is_idempotent_and_ended_clears_liveness() {
        let (first, second) = tags();
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, _) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(first, &Credential::new("tok"));
        rtc.stop(first);
        rtc.stop(first);
        assert_eq!(transport.stops(), 1);

        rtc.start(second, &Credential::new("tok"));
        transport.emit(RtcEvent::Ended);
        assert!(!client.is_live());
        rtc.stop(second);
        assert_eq!(transport.stops(), 1);
    }

    #[test]
    fn stop_for_a_superseded_tag_leaves_the_new_connection_alone() {
        let (first, second) = tags();
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, _) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(first, &Credential::new("a"));
        rtc.start(second, &Credential::new("b"));
        let stops = transport.stops();
        rtc.stop(first);
        assert_eq!(transport.stops(), stops);
        assert!(client.is_live());
    }

    #[test]
    fn starting_a_new_tag_force_stops_the_previous_connection() {
        let (first, second) = tags();
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, _) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(first, &Credential::new("a"));
        rtc.start(second, &Credential::new("b"));
        assert_eq!(transport.stops(), 1);
        assert!(client.is_live());
        assert_eq!(client.current_tag(), Some(second));
    }

    #[test]
    fn end_emitted_by_the_forced_stop_carries_the_previous_tag() {
        let (first, second) = tags();
        let transport = Arc::new(RecordingTransport {
            ends_on_stop: true,
            ..Default::default()
        });
        let client = RtcSessionClient::new(transport.clone());
        let (listener, received) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(first, &Credential::new("a"));
        rtc.start(second, &Credential::new("b"));

        assert_eq!(
            received.lock().unwrap().as_slice(),
            [(first, RtcEvent::Ended)]
        );
        assert!(client.is_live());

        rtc.stop(second);
        assert_eq!(transport.stops(), 2);
        assert!(!client.is_live());
    }

    #[test]
    fn refused_start_is_reported_as_error_event() {
        let transport = Arc::new(RecordingTransport {
            refuse: true,
            ..Default::default()
        });
        let client = RtcSessionClient::new(transport.clone());
        let (listener, received) = recording_listener();
        let rtc = client.attach(listener);

        rtc.start(SessionTag::FIRST, &Credential::new("tok"));

        assert!(!client.is_live());
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], (tag, RtcEvent::Error(msg)) if *tag == SessionTag::FIRST && msg.contains("no audio context")));
    }

    #[test]
    fn dropping_attachment_detaches_listener() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (listener, received) = recording_listener();
        let rtc = client.attach(listener);
        rtc.start(SessionTag::FIRST, &Credential::new("tok"));
        drop(rtc);

        transport.emit(RtcEvent::Started);
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_attachment_does_not_detach_newer_listener() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (first, _) = recording_listener();
        let (second, received) = recording_listener();
        let old = client.attach(first);
        let new = client.attach(second);
        drop(old);

        new.start(SessionTag::FIRST, &Credential::new("tok"));
        transport.emit(RtcEvent::AgentStartTalking);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn attaching_stops_the_displaced_live_connection() {
        let (first, second) = tags();
        let transport = Arc::new(RecordingTransport {
            ends_on_stop: true,
            ..Default::default()
        });
        let client = RtcSessionClient::new(transport.clone());
        let (a_listener, a_received) = recording_listener();
        let (b_listener, b_received) = recording_listener();

        let a = client.attach(a_listener);
        a.start(first, &Credential::new("a"));
        let b = client.attach(b_listener);

        assert_eq!(transport.stops(), 1);
        assert!(!client.is_live());
        assert!(matches!(
            a_received.lock().unwrap().as_slice(),
            [(tag, RtcEvent::Error(detail))] if *tag == first && detail == DISPLACED
        ));
        // The end produced by the forced stop belongs to the displaced tag.
        assert_eq!(
            b_received.lock().unwrap().as_slice(),
            [(first, RtcEvent::Ended)]
        );

        // The displaced attachment can neither stop nor start anything.
        b.start(second, &Credential::new("b"));
        a.stop(second);
        assert!(client.is_live());
        a.start(first, &Credential::new("again"));
        assert_eq!(transport.starts.lock().unwrap().as_slice(), ["a", "b"]);
        assert!(matches!(
            a_received.lock().unwrap().last(),
            Some((tag, RtcEvent::Error(detail))) if *tag == first && detail == DISPLACED
        ));
    }

    #[test]
    fn replacing_an_idle_listener_sends_it_the_end_of_its_last_tag() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        let (a_listener, a_received) = recording_listener();
        let (b_listener, _) = recording_listener();

        let a = client.attach(a_listener);
        a.start(SessionTag::FIRST, &Credential::new("a"));
        a.stop(SessionTag::FIRST);
        let _b = client.attach(b_listener);

        assert_eq!(transport.stops(), 1);
        assert_eq!(
            a_received.lock().unwrap().as_slice(),
            [(SessionTag::FIRST, RtcEvent::Ended)]
        );
    }

    #[test]
    fn dropping_last_client_handle_removes_transport_listeners() {
        let transport = Arc::new(RecordingTransport::default());
        let client = RtcSessionClient::new(transport.clone());
        assert!(transport.sink.lock().unwrap().is_some());
        drop(client);
        assert!(transport.sink.lock().unwrap().is_none());
    }
}
