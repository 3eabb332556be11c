//! Chat client: connection manager + session store + outbound config, driven by events.
//!
//! Everything that can change client state arrives as a [`ClientEvent`] and is
//! applied by [`ChatClient::handle`], one at a time. The presentation layer
//! only sees [`Snapshot`]s and only acts through [`Command`]s.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;

use crate::connection::{
    ConnectionId, ConnectionManager, ConnectionState, Scheduler, SendError, TimerId, Transport,
    TransportEvent,
};
use crate::endpoint::EndpointError;
use crate::messages::{build_payload, classify, ConfigFieldError, Inbound, OutboundConfig};
use crate::session::{ChatMessage, Sender, Session, SessionId, SessionStore};

/// User intent accepted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    CreateSession,
    SelectSession(SessionId),
    Send(String),
    UpdateConfigField { name: String, value: String },
    SelectEndpoint(usize),
    Shutdown,
}

/// Everything the event loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Transport(ConnectionId, TransportEvent),
    ReconnectDue(TimerId),
    Command(Command),
}

/// Last keep-alive seen from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Liveness {
    pub timestamp: DateTime<Utc>,
    /// Local wall-clock time, `HH:MM:SS`.
    pub display: String,
}

impl Liveness {
    /// `None` when `seconds` is not a representable instant.
    pub fn from_epoch_seconds(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() {
            return None;
        }
        let millis = (seconds * 1000.0).round() as i64;
        let timestamp = Utc.timestamp_millis_opt(millis).single()?;
        Some(Self {
            timestamp,
            display: format_local_time(timestamp),
        })
    }
}

pub fn format_local_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Read model handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub connection_state: ConnectionState,
    pub endpoint: Option<String>,
    pub sessions: Vec<Session>,
    pub current_session_id: Option<SessionId>,
    pub current_messages: Vec<ChatMessage>,
    pub liveness: Option<Liveness>,
    pub awaiting_response: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    ConfigField(#[from] ConfigFieldError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

pub struct ChatClient<T: Transport, S: Scheduler> {
    connection: ConnectionManager<T, S>,
    store: SessionStore,
    outbound: OutboundConfig,
    liveness: Option<Liveness>,
    awaiting_response: bool,
    shut_down: bool,
}

impl<T: Transport, S: Scheduler> ChatClient<T, S> {
    pub fn new(connection: ConnectionManager<T, S>, outbound: OutboundConfig) -> Self {
        Self {
            connection,
            store: SessionStore::new(),
            outbound,
            liveness: None,
            awaiting_response: false,
            shut_down: false,
        }
    }

    pub fn connection(&self) -> &ConnectionManager<T, S> {
        &self.connection
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn outbound(&self) -> &OutboundConfig {
        &self.outbound
    }

    pub fn liveness(&self) -> Option<&Liveness> {
        self.liveness.as_ref()
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn connect(&mut self) {
        self.connection.connect();
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect(true);
    }

    pub fn create_session(&mut self) -> SessionId {
        self.store.create_session()
    }

    pub fn select_session(&mut self, id: &str) -> bool {
        self.store.select_session(id)
    }

    pub fn update_config_field(&mut self, name: &str, value: &str) -> Result<(), ConfigFieldError> {
        self.outbound.set_field(name, value)
    }

    /// Pick which candidate address the next connect attempt uses.
    pub fn select_endpoint(&mut self, index: usize) -> Result<(), EndpointError> {
        let url = self.connection.endpoints_mut().select(index)?;
        log::info!("selected endpoint {}", url);
        Ok(())
    }

    /// Send `text` as a question. Rejected without any mutation when the text
    /// is blank or the connection is not open.
    pub fn send(&mut self, text: &str) -> Result<(), SendError> {
        if text.trim().is_empty() {
            return Err(SendError::Empty);
        }
        let state = self.connection.state();
        if state != ConnectionState::Connected {
            return Err(SendError::NotConnected(state));
        }
        let payload = build_payload(&self.outbound, text);
        let json = serde_json::to_string(&payload).map_err(|e| SendError::Encode(e.to_string()))?;

        log::debug!("sending payload: {}", json);
        match self.connection.send(json) {
            Ok(()) => {
                self.store.append_message(Sender::User, text, None);
                self.awaiting_response = true;
                Ok(())
            }
            Err(e) => {
                log::error!("error sending message: {}", e);
                self.awaiting_response = false;
                Err(e)
            }
        }
    }

    /// Apply one event. Errors are command rejections; they never leave the
    /// client in a broken state.
    pub fn handle(&mut self, event: ClientEvent) -> Result<(), CommandError> {
        match event {
            ClientEvent::Transport(id, event) => {
                let is_error = matches!(event, TransportEvent::Error(_));
                if let Some(frame) = self.connection.handle_transport(id, event) {
                    self.dispatch(&frame);
                } else if is_error && self.connection.state() == ConnectionState::Error {
                    self.awaiting_response = false;
                }
            }
            ClientEvent::ReconnectDue(timer) => self.connection.handle_timer(timer),
            ClientEvent::Command(command) => self.apply(command)?,
        }
        Ok(())
    }

    /// Route one inbound frame: pings update liveness, everything else becomes
    /// exactly one assistant message.
    pub fn dispatch(&mut self, frame: &str) {
        log::debug!("received message: {}", frame);
        match classify(frame) {
            Inbound::Ping { timestamp } => {
                match timestamp.and_then(Liveness::from_epoch_seconds) {
                    Some(liveness) => self.liveness = Some(liveness),
                    None => log::warn!("ping without a usable timestamp: {}", frame),
                }
            }
            Inbound::Content { content, status } => {
                self.store.append_message(Sender::Assistant, content, status);
                self.awaiting_response = false;
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection_state: self.connection.state(),
            endpoint: self.connection.endpoints().primary().map(str::to_string),
            sessions: self.store.sessions().to_vec(),
            current_session_id: self.store.current_id().map(str::to_string),
            current_messages: self.store.current_messages().to_vec(),
            liveness: self.liveness.clone(),
            awaiting_response: self.awaiting_response,
            last_error: self.connection.last_error().map(str::to_string),
        }
    }

    pub fn shutdown(&mut self) {
        self.connection.shutdown();
        self.shut_down = true;
    }

    fn apply(&mut self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::CreateSession => {
                self.create_session();
            }
            Command::SelectSession(id) => {
                self.select_session(&id);
            }
            Command::Send(text) => self.send(&text)?,
            Command::UpdateConfigField { name, value } => self.update_config_field(&name, &value)?,
            Command::SelectEndpoint(index) => self.select_endpoint(index)?,
            Command::Shutdown => self.shutdown(),
        }
        Ok(())
    }
}
