//! Connection lifecycle: one logical connection, its state, and reconnect scheduling.
//!
//! The manager never blocks. The transport reports open/frame/close/error as
//! [`TransportEvent`]s tagged with the [`ConnectionId`] they belong to, and the
//! scheduler reports a fired reconnect timer by its [`TimerId`]. Both are fed
//! back in by whoever drives the event loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointResolver;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (teardown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Generation number of one opened transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Whether a closure code suppresses the automatic reconnect.
pub fn is_normal_closure(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no endpoint configured")]
    NoEndpoint,
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("nothing to send")]
    Empty,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("encoding payload: {0}")]
    Encode(String),
}

/// Opens connections. Opening is asynchronous: `open` only starts the attempt,
/// the outcome arrives later as [`TransportEvent`]s for `id`.
pub trait Transport {
    type Link: Link;

    fn open(&mut self, id: ConnectionId, url: &str) -> Result<Self::Link, TransportError>;
}

/// Handle to one open (or opening) connection.
pub trait Link {
    fn send(&mut self, text: String) -> Result<(), TransportError>;
    fn close(&mut self, code: u16, reason: &str);
}

/// Fires `TimerId`s back into the event loop after a delay.
pub trait Scheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration);
    fn cancel(&mut self, id: TimerId);
}

pub struct ConnectionManager<T: Transport, S: Scheduler> {
    transport: T,
    scheduler: S,
    endpoints: EndpointResolver,
    reconnect_delay: Duration,
    state: ConnectionState,
    link: Option<(ConnectionId, T::Link)>,
    pending_reconnect: Option<TimerId>,
    next_connection: u64,
    next_timer: u64,
    last_error: Option<String>,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    pub fn new(transport: T, scheduler: S, endpoints: EndpointResolver, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            scheduler,
            endpoints,
            reconnect_delay,
            state: ConnectionState::Disconnected,
            link: None,
            pending_reconnect: None,
            next_connection: 0,
            next_timer: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoints(&self) -> &EndpointResolver {
        &self.endpoints
    }

    pub fn endpoints_mut(&mut self) -> &mut EndpointResolver {
        &mut self.endpoints
    }

    pub fn pending_reconnect(&self) -> Option<TimerId> {
        self.pending_reconnect
    }

    /// Most recent transport error, cleared on a successful open.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn connect(&mut self) {
        self.cancel_reconnect();
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            log::debug!("connect ignored, already {}", self.state);
            return;
        }
        if let Some((id, mut stale)) = self.link.take() {
            log::debug!("tearing down connection {:?} before reconnecting", id);
            stale.close(CLOSE_NORMAL, "Reconnecting");
        }

        let url = match self.endpoints.primary() {
            Some(url) => url.to_string(),
            None => {
                self.fail(TransportError::NoEndpoint.to_string());
                return;
            }
        };
        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        log::info!("attempting to connect to {}", url);
        match self.transport.open(id, &url) {
            Ok(link) => {
                self.link = Some((id, link));
                self.state = ConnectionState::Connecting;
            }
            Err(e) => {
                log::error!("failed to open connection to {}: {}", url, e);
                self.fail(e.to_string());
            }
        }
    }

    /// Close the connection. `manual` uses the normal-closure code; otherwise
    /// the going-away code is used (teardown). Neither triggers a reconnect.
    pub fn disconnect(&mut self, manual: bool) {
        self.cancel_reconnect();
        if let Some((id, mut link)) = self.link.take() {
            let (code, reason) = if manual {
                (CLOSE_NORMAL, "Manual disconnect")
            } else {
                (CLOSE_GOING_AWAY, "Going away")
            };
            log::info!("closing connection {:?} ({} {})", id, code, reason);
            link.close(code, reason);
        }
        self.state = ConnectionState::Disconnected;
    }

    pub fn send(&mut self, text: String) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected(self.state));
        }
        let (_, link) = self
            .link
            .as_mut()
            .ok_or(SendError::NotConnected(self.state))?;
        link.send(text)?;
        Ok(())
    }

    /// Apply a transport event. Returns the frame payload for content
    /// dispatch; events from any connection but the live one are dropped.
    pub fn handle_transport(&mut self, id: ConnectionId, event: TransportEvent) -> Option<String> {
        if self.link.as_ref().map(|(live, _)| *live) != Some(id) {
            log::debug!("dropping {:?} from stale connection {:?}", event, id);
            return None;
        }
        match event {
            TransportEvent::Opened => {
                log::info!("connection {:?} established", id);
                self.cancel_reconnect();
                self.last_error = None;
                self.state = ConnectionState::Connected;
                None
            }
            TransportEvent::Frame(text) => Some(text),
            TransportEvent::Closed { code, reason } => {
                log::info!("connection {:?} closed, code {} reason {:?}", id, code, reason);
                self.link = None;
                self.state = ConnectionState::Disconnected;
                if !is_normal_closure(code) {
                    self.schedule_reconnect();
                }
                None
            }
            TransportEvent::Error(e) => {
                log::error!("connection {:?} error: {}", id, e);
                self.fail(e);
                None
            }
        }
    }

    /// A scheduled timer fired. Only the pending timer triggers a reconnect.
    pub fn handle_timer(&mut self, id: TimerId) {
        if self.pending_reconnect != Some(id) {
            log::debug!("ignoring stale timer {:?}", id);
            return;
        }
        self.pending_reconnect = None;
        log::info!("attempting to reconnect");
        self.connect();
    }

    /// Teardown: close without reconnecting and cancel any timer.
    pub fn shutdown(&mut self) {
        self.disconnect(false);
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        log::info!("reconnecting in {:?}", self.reconnect_delay);
        self.scheduler.schedule(timer, self.reconnect_delay);
        self.pending_reconnect = Some(timer);
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.pending_reconnect.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn fail(&mut self, error: String) {
        self.last_error = Some(error);
        self.state = ConnectionState::Error;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport and scheduler that record what the manager asked for.

    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    pub struct Wire {
        pub opened: Vec<(ConnectionId, String)>,
        pub sent: Vec<(ConnectionId, String)>,
        pub closed: Vec<(ConnectionId, u16)>,
        pub refuse_open: bool,
        pub refuse_send: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeTransport(pub Rc<RefCell<Wire>>);

    pub struct FakeLink {
        id: ConnectionId,
        wire: Rc<RefCell<Wire>>,
    }

    impl Transport for FakeTransport {
        type Link = FakeLink;

        fn open(&mut self, id: ConnectionId, url: &str) -> Result<FakeLink, TransportError> {
            let mut wire = self.0.borrow_mut();
            if wire.refuse_open {
                return Err(TransportError::InvalidEndpoint {
                    url: url.to_string(),
                    reason: "refused".into(),
                });
            }
            wire.opened.push((id, url.to_string()));
            Ok(FakeLink {
                id,
                wire: Rc::clone(&self.0),
            })
        }
    }

    impl Link for FakeLink {
        fn send(&mut self, text: String) -> Result<(), TransportError> {
            let mut wire = self.wire.borrow_mut();
            if wire.refuse_send {
                return Err(TransportError::Closed);
            }
            wire.sent.push((self.id, text));
            Ok(())
        }

        fn close(&mut self, code: u16, _reason: &str) {
            self.wire.borrow_mut().closed.push((self.id, code));
        }
    }

    #[derive(Debug, Default)]
    pub struct Timers {
        pub scheduled: Vec<(TimerId, Duration)>,
        pub cancelled: Vec<TimerId>,
    }

    impl Timers {
        /// Timers scheduled and not cancelled, including ones that already fired.
        pub fn live(&self) -> Vec<TimerId> {
            self.scheduled
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !self.cancelled.contains(id))
                .collect()
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeScheduler(pub Rc<RefCell<Timers>>);

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, id: TimerId, delay: Duration) {
            self.0.borrow_mut().scheduled.push((id, delay));
        }

        fn cancel(&mut self, id: TimerId) {
            self.0.borrow_mut().cancelled.push(id);
        }
    }

    pub type FakeManager = ConnectionManager<FakeTransport, FakeScheduler>;

    pub fn manager() -> (FakeManager, Rc<RefCell<Wire>>, Rc<RefCell<Timers>>) {
        let transport = FakeTransport::default();
        let scheduler = FakeScheduler::default();
        let wire = Rc::clone(&transport.0);
        let timers = Rc::clone(&scheduler.0);
        let m = ConnectionManager::new(
            transport,
            scheduler,
            EndpointResolver::new(vec!["ws://primary/halo/ws/1".into(), "ws://alt/halo/ws/1".into()], 0),
            Duration::from_secs(3),
        );
        (m, wire, timers)
    }

    pub fn last_opened(wire: &Rc<RefCell<Wire>>) -> ConnectionId {
        wire.borrow().opened.last().map(|(id, _)| *id).unwrap()
    }
}
