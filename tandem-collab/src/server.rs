//! The relay: a star hub that forwards operations between replicas.
//!
//! ```text
//! client A ──┐                      ┌── client B
//!             ├── reader tasks ─────┤
//! client C ──┘        │             └── client D
//!                     ▼
//!        ┌────────────────────────┐
//!        │ snapshot queue (docSync)│──► fan-out all-but-source
//!        │ message queue (rest)    │──► fan-out all-but-source
//!        └────────────────────────┘
//! ```
//!
//! The relay never inspects document semantics. It assigns identities
//! (a UUID plus a monotonically increasing site id) on connect, asks one
//! existing participant to snapshot for each joiner, and forwards
//! everything else verbatim to all participants except the originator.
//!
//! Snapshots get their own queue so a large `docSync` cannot head-of-
//! line-block the operation stream. Every participant's socket writes
//! are serialized through a per-connection writer task with a bounded
//! deadline; a stalled or failed writer drops that client from the
//! registry without notifying anyone else.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::protocol::{Message, MessageType};

/// Deadline for the WebSocket upgrade handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for a single outbound write.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Queue depth per participant and per dispatch queue.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; a bare `:port` binds every interface.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ":8080".to_string(),
        }
    }
}

/// One connected client as the relay sees it.
struct Participant {
    username: String,
    site_id: u64,
    /// Encoded frames queued for this client's writer task.
    outgoing: mpsc::Sender<String>,
}

type Registry = Arc<RwLock<HashMap<Uuid, Participant>>>;

/// A decoded inbound message tagged with the connection it came from.
struct Relayed {
    origin: Uuid,
    message: Message,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    next_site_id: Arc<AtomicU64>,
    clients: Registry,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            next_site_id: Arc::new(AtomicU64::new(0)),
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Accept connections forever. Call from an async runtime.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(normalize_addr(&self.config.bind_addr))
            .await
            .map_err(ServerError::Bind)?;
        log::info!("relay listening on {}", self.config.bind_addr);

        let (sync_tx, sync_rx) = mpsc::channel::<Relayed>(QUEUE_CAPACITY);
        let (message_tx, message_rx) = mpsc::channel::<Relayed>(QUEUE_CAPACITY);
        tokio::spawn(dispatch_snapshots(self.clients.clone(), sync_rx));
        tokio::spawn(dispatch_messages(self.clients.clone(), message_rx));

        loop {
            let (stream, addr) = listener.accept().await.map_err(ServerError::Accept)?;
            let clients = self.clients.clone();
            let next_site_id = self.next_site_id.clone();
            let sync_tx = sync_tx.clone();
            let message_tx = message_tx.clone();
            tokio::spawn(async move {
                handle_connection(stream, addr, clients, next_site_id, sync_tx, message_tx).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Registry,
    next_site_id: Arc<AtomicU64>,
    sync_tx: mpsc::Sender<Relayed>,
    message_tx: mpsc::Sender<Relayed>,
) {
    let socket = match timeout(HANDSHAKE_TIMEOUT, accept_async(stream)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(err)) => {
            log::error!("websocket upgrade from {addr} failed: {err}");
            return;
        }
        Err(_) => {
            log::error!("websocket upgrade from {addr} timed out");
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    let client_id = Uuid::new_v4();
    let site_id = next_site_id.fetch_add(1, Ordering::SeqCst) + 1;
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);

    // Writer task: the only place this socket is written. Exits once the
    // participant is removed from the registry and the queue drains; a
    // failed or overdue write drops the participant itself.
    let writer_clients = clients.clone();
    tokio::spawn(async move {
        while let Some(text) = outgoing_rx.recv().await {
            match timeout(WRITE_DEADLINE, sink.send(WsMessage::Text(text.into()))).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("write to {client_id} failed: {err}");
                    writer_clients.write().await.remove(&client_id);
                    break;
                }
                Err(_) => {
                    log::error!("write to {client_id} exceeded deadline");
                    writer_clients.write().await.remove(&client_id);
                    break;
                }
            }
        }
    });

    {
        let mut clients_w = clients.write().await;
        clients_w.insert(
            client_id,
            Participant {
                username: String::new(),
                site_id,
                outgoing: outgoing_tx.clone(),
            },
        );
        log::info!(
            "client {client_id} connected from {addr}, site id {site_id}, {} active",
            clients_w.len()
        );
    }

    match Message::site_id(site_id, client_id).encode() {
        Ok(text) => {
            let _ = outgoing_tx.send(text).await;
        }
        Err(err) => log::error!("failed to encode site id assignment: {err}"),
    }

    // Ask exactly one existing participant to snapshot for the joiner.
    let donor = {
        let clients_r = clients.read().await;
        clients_r
            .iter()
            .find(|(id, _)| **id != client_id)
            .map(|(id, participant)| (*id, participant.outgoing.clone()))
    };
    if let Some((donor_id, donor_tx)) = donor {
        log::info!("requesting snapshot from {donor_id} for {client_id}");
        if let Ok(text) = Message::doc_req(client_id).encode() {
            let _ = donor_tx.send(text).await;
        }
    }

    // The registry now holds the only long-lived sender; dropping ours
    // lets the writer task end when the participant is removed.
    drop(outgoing_tx);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match Message::decode(text.as_str()) {
                Ok(mut message) => {
                    let queue = if message.message_type == MessageType::DocSync {
                        // A snapshot's id names its target, not its
                        // sender; leave it untouched.
                        &sync_tx
                    } else {
                        message.client_id = client_id;
                        &message_tx
                    };
                    if queue
                        .send(Relayed {
                            origin: client_id,
                            message,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => log::warn!("undecodable frame from {client_id}: {err}"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                log::error!("read from {client_id} failed: {err}");
                break;
            }
        }
    }

    let mut clients_w = clients.write().await;
    let username = clients_w
        .remove(&client_id)
        .map(|participant| participant.username)
        .unwrap_or_default();
    log::info!(
        "closing connection for {client_id} (username {username:?}), {} active",
        clients_w.len()
    );
}

/// Consumer for the dedicated snapshot queue.
async fn dispatch_snapshots(clients: Registry, mut queue: mpsc::Receiver<Relayed>) {
    while let Some(Relayed { origin, message }) = queue.recv().await {
        let characters = message.document.as_ref().map_or(0, |document| document.len());
        log::info!("relaying snapshot from {origin}, {characters} characters");
        fan_out(&clients, origin, &message).await;
    }
}

/// Consumer for everything that is not a snapshot.
async fn dispatch_messages(clients: Registry, mut queue: mpsc::Receiver<Relayed>) {
    while let Some(Relayed { origin, message }) = queue.recv().await {
        if message.message_type == MessageType::Join {
            let mut clients_w = clients.write().await;
            if let Some(participant) = clients_w.get_mut(&origin) {
                participant.username = message.username.clone();
                log::info!(
                    "{} {} (site id {})",
                    message.username,
                    message.text,
                    participant.site_id
                );
            }
        }
        fan_out(&clients, origin, &message).await;
    }
}

/// Forward a message to every participant except the originator. A
/// participant whose queue is full or closed is dropped from the
/// registry, which in turn ends its writer task.
async fn fan_out(clients: &Registry, origin: Uuid, message: &Message) {
    let text = match message.encode() {
        Ok(text) => text,
        Err(err) => {
            log::error!("failed to encode relayed message: {err}");
            return;
        }
    };

    let targets: Vec<(Uuid, mpsc::Sender<String>)> = {
        let clients_r = clients.read().await;
        clients_r
            .iter()
            .filter(|(id, _)| **id != origin)
            .map(|(id, participant)| (*id, participant.outgoing.clone()))
            .collect()
    };

    let mut stalled = Vec::new();
    for (id, outgoing) in targets {
        log::debug!("forwarding {:?} to {id}", message.message_type);
        if outgoing.try_send(text.clone()).is_err() {
            stalled.push(id);
        }
    }
    if !stalled.is_empty() {
        let mut clients_w = clients.write().await;
        for id in stalled {
            log::warn!("dropping stalled client {id}");
            clients_w.remove(&id);
        }
    }
}

/// A bare `:port` listens on every interface, Go style.
fn normalize_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), ":8080");
    }

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_addr("127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(normalize_addr("example.com:80"), "example.com:80");
    }

    #[tokio::test]
    async fn test_site_ids_are_monotonic() {
        let server = RelayServer::with_defaults();
        let first = server.next_site_id.fetch_add(1, Ordering::SeqCst) + 1;
        let second = server.next_site_id.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let server = RelayServer::with_defaults();
        assert!(server.clients.read().await.is_empty());
    }
}
