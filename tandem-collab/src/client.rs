//! The client session: one connected replica.
//!
//! ```text
//! Connecting ── websocket open ──► AwaitSiteId ── SiteID ──► Steady ──► Closed
//! ```
//!
//! After the dial succeeds the session announces itself with a `join`
//! message and waits for its `SiteID` assignment. If it is not the first
//! participant a snapshot arrives shortly after and overwrites the local
//! document; the machine never blocks waiting for it.
//!
//! In steady state one task owns the replica and multiplexes exactly two
//! sources with `select!`: commands from the frontend and frames from
//! the relay. Document access is therefore strictly single-threaded and
//! the CRDT needs no locking. Every local edit is applied locally first,
//! then broadcast; every remote operation is integrated and the new
//! content is pushed to the frontend as an event.
//!
//! A transport failure degrades the session instead of ending it: a
//! status event is surfaced, no reconnect is attempted, and local
//! editing (plus save/load) keeps working.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use tandem_core::{storage, Replica, StorageError};

use crate::protocol::{Message, MessageType, Operation, OperationType, ProtocolError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, WsMessage>;

/// How long the dial may take before the session gives up.
const DIAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback path for `save` when no file was configured.
const DEFAULT_SAVE_PATH: &str = "tandem-content.txt";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection attempt timed out")]
    DialTimeout,
    #[error("transport failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("session is closed")]
    Closed,
}

/// Connection parameters, mirroring the client CLI surface.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay address as `host:port`.
    pub server_addr: String,
    /// Dial `wss://` instead of `ws://`.
    pub secure: bool,
    pub username: String,
    /// File to pre-load before connecting; also the default save target.
    pub file: Option<PathBuf>,
    /// Log the full character table after every integration.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: "localhost:8080".to_string(),
            secure: false,
            username: String::new(),
            file: None,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    AwaitSiteId,
    Steady,
    Closed,
}

/// Edits and session control issued by the frontend.
#[derive(Debug)]
pub enum Command {
    /// Insert `value` at a 1-based visible position.
    Insert { position: usize, value: String },
    /// Delete the character at a 1-based visible position.
    Delete { position: usize },
    /// Persist the document; `None` falls back to the configured file.
    Save(Option<PathBuf>),
    /// Replace the document from a file and resync every peer.
    Load(PathBuf),
    Shutdown,
}

/// What the frontend hears back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The rendered document changed; here is the new content.
    ContentChanged(String),
    /// Transient notice for the status line.
    Status(String),
    Closed,
}

/// Cheap cloneable handle for issuing commands to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn insert(&self, position: usize, value: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::Insert {
            position,
            value: value.into(),
        })
        .await
    }

    pub async fn delete(&self, position: usize) -> Result<(), SessionError> {
        self.send(Command::Delete { position }).await
    }

    pub async fn save(&self, path: Option<PathBuf>) -> Result<(), SessionError> {
        self.send(Command::Save(path)).await
    }

    pub async fn load(&self, path: PathBuf) -> Result<(), SessionError> {
        self.send(Command::Load(path)).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Dial the relay and start the session task.
///
/// Returns the command handle plus the event stream for the frontend.
/// If `config.file` is set the document is pre-loaded before the first
/// frame is processed.
pub async fn connect(
    config: SessionConfig,
) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>), SessionError> {
    let scheme = if config.secure { "wss" } else { "ws" };
    let url = format!("{scheme}://{}/", config.server_addr);
    log::info!("dialing {url}");
    let (socket, _) = timeout(DIAL_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| SessionError::DialTimeout)??;

    let mut replica = Replica::new();
    if let Some(path) = &config.file {
        storage::load(path, &mut replica)?;
    }

    let (command_tx, command_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    let session = Session {
        config,
        replica,
        state: SessionState::Connecting,
        my_id: Uuid::nil(),
        degraded: false,
        command_rx,
        event_tx,
    };
    tokio::spawn(session.run(socket));

    Ok((SessionHandle { commands: command_tx }, event_rx))
}

struct Session {
    config: SessionConfig,
    replica: Replica,
    state: SessionState,
    /// Our relay-assigned UUID, learned from the `SiteID` message.
    my_id: Uuid,
    /// Set after a transport failure; local editing continues.
    degraded: bool,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl Session {
    async fn run(mut self, socket: Socket) {
        let (mut sink, mut stream) = socket.split();

        self.set_state(SessionState::AwaitSiteId);
        let announcement = Message::join(self.config.username.clone());
        self.broadcast(&mut sink, announcement).await;
        self.emit_content().await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command, &mut sink).await,
                },
                frame = stream.next(), if !self.degraded => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.handle_frame(text.as_str(), &mut sink).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.degrade("session closed by the server").await;
                    }
                    Some(Err(err)) => {
                        log::error!("websocket read failed: {err}");
                        self.degrade("lost connection!").await;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        self.set_state(SessionState::Closed);
        let _ = self.event_tx.send(SessionEvent::Closed).await;
    }

    async fn handle_command(&mut self, command: Command, sink: &mut Sink) {
        match command {
            Command::Insert { position, value } => {
                match self.replica.local_insert(position, &value) {
                    Ok(character) => {
                        self.broadcast(sink, Message::insert(character, position)).await;
                        self.dump_document();
                        self.emit_content().await;
                    }
                    // Generator failures are logged and dropped without
                    // broadcasting; the document is unchanged.
                    Err(err) => log::error!("local insert at {position} dropped: {err}"),
                }
            }
            Command::Delete { position } => {
                if let Some(character) = self.replica.local_delete(position) {
                    self.broadcast(sink, Message::delete(character, position)).await;
                    self.dump_document();
                    self.emit_content().await;
                }
            }
            Command::Save(path) => {
                let path = path
                    .or_else(|| self.config.file.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH));
                match storage::save(&path, self.replica.document()) {
                    Ok(()) => {
                        self.status(format!("Saved document to {}", path.display())).await;
                    }
                    Err(err) => {
                        log::error!("failed to save to {}: {err}", path.display());
                        self.status(format!("Failed to save to {}", path.display())).await;
                    }
                }
            }
            Command::Load(path) => match storage::load(&path, &mut self.replica) {
                Ok(()) => {
                    self.status(format!("Loaded {}", path.display())).await;
                    // A reload is a fresh sequence; everyone else must
                    // drop theirs and take this snapshot.
                    let snapshot = Message::doc_sync(self.replica.document().clone(), Uuid::nil());
                    self.broadcast(sink, snapshot).await;
                    self.emit_content().await;
                }
                Err(err) => {
                    log::error!("failed to load {}: {err}", path.display());
                    self.status(format!("Failed to load {}", path.display())).await;
                }
            },
            Command::Shutdown => {}
        }
    }

    async fn handle_frame(&mut self, text: &str, sink: &mut Sink) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("undecodable frame dropped: {err}");
                return;
            }
        };

        match message.message_type {
            MessageType::SiteId => match message.text.parse::<u64>() {
                Ok(site_id) => {
                    self.replica.set_site_id(site_id);
                    self.my_id = message.client_id;
                    self.set_state(SessionState::Steady);
                    log::info!("assigned site id {site_id} (client {})", self.my_id);
                }
                Err(err) => log::error!("unusable site id {:?}: {err}", message.text),
            },
            MessageType::DocSync => {
                // A targeted snapshot names its recipient; one with a nil
                // id is a resync for everyone.
                if !message.client_id.is_nil() && message.client_id != self.my_id {
                    log::debug!("ignoring snapshot addressed to {}", message.client_id);
                    return;
                }
                if let Some(document) = message.document {
                    log::info!("snapshot received, {} characters", document.len());
                    self.replica.replace_document(document);
                    self.dump_document();
                    self.emit_content().await;
                }
            }
            MessageType::DocReq => {
                log::info!("snapshot requested on behalf of {}", message.client_id);
                let reply = Message::doc_sync(self.replica.document().clone(), message.client_id);
                self.broadcast(sink, reply).await;
            }
            MessageType::Join => {
                self.status(format!("{} has joined the session!", message.username))
                    .await;
            }
            MessageType::Operation => {
                if let Some(operation) = message.operation {
                    self.apply_remote_operation(operation);
                    self.dump_document();
                    self.emit_content().await;
                }
            }
        }
    }

    fn apply_remote_operation(&mut self, operation: Operation) {
        match operation.op_type {
            OperationType::Insert => match operation.character {
                Some(character) => self.replica.integrate_remote_insert(character),
                // Legacy peers only send the position; replay the edit
                // the way it was generated there.
                None => {
                    if let Err(err) = self.replica.insert(operation.position, &operation.value) {
                        log::error!("remote insert at {} dropped: {err}", operation.position);
                    }
                }
            },
            OperationType::Delete => match operation.character {
                Some(character) => self.replica.integrate_remote_delete(&character.id),
                None => {
                    self.replica.delete(operation.position);
                }
            },
        }
    }

    async fn broadcast(&mut self, sink: &mut Sink, message: Message) {
        if self.degraded {
            return;
        }
        match message.encode() {
            Ok(text) => {
                if let Err(err) = sink.send(WsMessage::Text(text.into())).await {
                    log::error!("websocket send failed: {err}");
                    self.degrade("lost connection!").await;
                }
            }
            Err(err) => log::error!("failed to encode outgoing message: {err}"),
        }
    }

    async fn degrade(&mut self, notice: &str) {
        if self.degraded {
            return;
        }
        self.degraded = true;
        self.status(notice.to_string()).await;
    }

    async fn emit_content(&self) {
        let _ = self
            .event_tx
            .send(SessionEvent::ContentChanged(self.replica.content()))
            .await;
    }

    async fn status(&self, notice: String) {
        let _ = self.event_tx.send(SessionEvent::Status(notice)).await;
    }

    fn set_state(&mut self, next: SessionState) {
        log::debug!("session state {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn dump_document(&self) {
        if !self.config.debug {
            return;
        }
        log::debug!("--- document state ---");
        for (index, character) in self.replica.document().characters.iter().enumerate() {
            log::debug!(
                "index: {index}  value: {:?}  id: {}  visible: {}  prev: {}  next: {}",
                character.value,
                character.id,
                character.visible,
                character.prev_id,
                character.next_id,
            );
        }
    }
}
