//! # tandem-collab — moving edits between replicas
//!
//! A star topology: one relay server, one WebSocket connection per
//! participant. Every replica applies its own edits locally and sends
//! them to the relay, which forwards them verbatim to everyone else.
//!
//! ```text
//! ┌──────────────┐     ws (json frames)     ┌──────────────┐
//! │ Session      │ ◄──────────────────────► │ RelayServer  │
//! │ (per client) │                          │ (fan-out)    │
//! └──────┬───────┘                          └──────┬───────┘
//!        │                                         │
//!        ▼                                  ┌──────┴───────┐
//! ┌──────────────┐                          ▼              ▼
//! │ Replica      │                     other sessions, each with
//! │ (tandem-core)│                     their own replica
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — message taxonomy and the JSON wire codec
//! - [`client`] — the session state machine one replica runs
//! - [`server`] — the relay
//! - [`names`] — silly usernames for the login-less

pub mod client;
pub mod names;
pub mod protocol;
pub mod server;

pub use client::{connect, Command, SessionConfig, SessionError, SessionEvent, SessionHandle};
pub use protocol::{Message, MessageType, Operation, OperationType, ProtocolError};
pub use server::{RelayServer, ServerConfig, ServerError};
