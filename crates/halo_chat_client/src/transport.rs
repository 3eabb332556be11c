//! Tokio runtime pieces: WebSocket transport, reconnect timers, and the event loop.
//!
//! Each opened connection runs in its own task and posts [`ClientEvent`]s into
//! the single queue drained by [`run`]. Timers are spawned sleeps that post
//! `ReconnectDue`; cancelling one aborts its task.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{ChatClient, ClientEvent, Command, Snapshot};
use crate::config::Config;
use crate::connection::{
    ConnectionId, ConnectionManager, Link, Scheduler, TimerId, Transport, TransportError,
    TransportEvent, CLOSE_ABNORMAL, CLOSE_NO_STATUS,
};
use crate::endpoint::EndpointResolver;

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// Opens `tokio-tungstenite` connections that report back through `events`.
pub struct WsTransport {
    events: EventSender,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(events: EventSender, connect_timeout: Duration) -> Self {
        Self {
            events,
            connect_timeout,
        }
    }
}

pub struct WsLink {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    type Link = WsLink;

    fn open(&mut self, id: ConnectionId, url: &str) -> Result<WsLink, TransportError> {
        check_url(url)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(connection_task(
            id,
            url.to_string(),
            self.connect_timeout,
            rx,
            self.events.clone(),
        ));
        Ok(WsLink { outgoing: tx })
    }
}

impl Link for WsLink {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Outgoing::Close(code, reason.to_string()));
    }
}

/// Reject addresses tungstenite could never open, before spawning anything.
fn check_url(raw: &str) -> Result<(), TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid(format!("scheme must be ws or wss, got {}", parsed.scheme())));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(invalid("missing host".to_string())),
    }
    if parsed.port_or_known_default().is_none() {
        return Err(invalid("missing port".to_string()));
    }
    Ok(())
}

async fn connection_task(
    id: ConnectionId,
    url: String,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: EventSender,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(ClientEvent::Transport(id, event));
    };

    let handshake =
        tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()));
    let outcome = match handshake.await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(format!("connecting to {}: {}", url, e)),
        Err(_) => Err(format!("connecting to {}: no handshake after {:?}", url, connect_timeout)),
    };
    let mut ws = match outcome {
        Ok(ws) => ws,
        Err(e) => {
            emit(TransportEvent::Error(e));
            emit(TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            });
            return;
        }
    };
    emit(TransportEvent::Opened);

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = ws.send(Message::Text(text)).await {
                        emit(TransportEvent::Error(e.to_string()));
                        emit(TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
                        return;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = ws.close(Some(frame)).await;
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                // Link dropped without an explicit close.
                None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Frame(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => emit(TransportEvent::Frame(text)),
                    Err(_) => log::warn!("ignoring non-UTF-8 binary frame on {:?}", id),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportEvent::Error(e.to_string()));
                    emit(TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
                    return;
                }
                None => {
                    emit(TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() });
                    return;
                }
            },
        }
    }
}

/// Reconnect timers backed by `tokio::time::sleep`.
pub struct TokioScheduler {
    events: EventSender,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, id: TimerId, delay: Duration) {
        self.timers.retain(|_, handle| !handle.is_finished());
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::ReconnectDue(id));
        });
        self.timers.insert(id, handle);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

pub type WsChatClient = ChatClient<WsTransport, TokioScheduler>;

/// Build a client wired to real sockets and timers posting into `events`.
pub fn build_client(config: &Config, events: EventSender) -> WsChatClient {
    let endpoints = EndpointResolver::new(config.server.endpoints.clone(), config.server.selected);
    let connection = ConnectionManager::new(
        WsTransport::new(events.clone(), config.server.connect_timeout()),
        TokioScheduler::new(events),
        endpoints,
        config.server.reconnect_delay(),
    );
    ChatClient::new(connection, config.request.clone())
}

/// Drain events one at a time, publishing a snapshot after each, until a
/// `Shutdown` command arrives.
pub async fn run(
    mut client: WsChatClient,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    snapshots: watch::Sender<Snapshot>,
) {
    snapshots.send_replace(client.snapshot());
    while let Some(event) = events.recv().await {
        if let Err(e) = client.handle(event) {
            log::warn!("command rejected: {}", e);
        }
        snapshots.send_replace(client.snapshot());
        if client.is_shut_down() {
            return;
        }
    }
    client.shutdown();
    snapshots.send_replace(client.snapshot());
}

/// Handle to a running client task. Dropping it shuts the client down.
pub struct ClientHandle {
    events: EventSender,
    snapshots: watch::Receiver<Snapshot>,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn command(&self, command: Command) {
        if self.events.send(ClientEvent::Command(command)).is_err() {
            log::debug!("client task already stopped");
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Wait until `predicate` holds for the latest snapshot, returning it.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        self.snapshots
            .wait_for(|s| predicate(s))
            .await
            .ok()
            .map(|s| s.clone())
    }

    /// Shut the client down and wait for its task to finish.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.events.send(ClientEvent::Command(Command::Shutdown));
        }
    }
}

/// Spawn a client on the current tokio runtime. When `auto_connect` is set
/// the first connect attempt is queued immediately.
pub fn spawn_client(config: &Config, auto_connect: bool) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = build_client(config, tx.clone());
    let (snap_tx, snap_rx) = watch::channel(client.snapshot());
    if auto_connect {
        let _ = tx.send(ClientEvent::Command(Command::Connect));
    }
    let task = tokio::spawn(run(client, rx, snap_tx));
    ClientHandle {
        events: tx,
        snapshots: snap_rx,
        task: Some(task),
    }
}
