//! Halo chat client library: auto-reconnecting WebSocket connection, inbound
//! frame classification, and an in-memory multi-session transcript.
//! Used by the `halo-chat` terminal front end.

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod messages;
pub mod session;
pub mod transport;

pub use client::{ChatClient, ClientEvent, Command, CommandError, Liveness, Snapshot};
pub use config::{default_config_path, Config, ConfigError, ServerSection};
pub use connection::{ConnectionManager, ConnectionState, SendError, TransportError, TransportEvent};
pub use endpoint::{endpoint_url, EndpointResolver};
pub use messages::{build_payload, classify, Inbound, OutboundConfig};
pub use session::{ChatMessage, Sender, Session, SessionStore, Status};
pub use transport::{spawn_client, ClientHandle};
