//! # tandem-core — the replicated character sequence
//!
//! Every participant in a tandem session holds a full copy of the shared
//! document as an ordered sequence of uniquely identified characters.
//! Edits are generated locally and integrated remotely; once every
//! replica has seen the same set of operations, all copies are
//! bit-identical regardless of delivery order.
//!
//! ## Modules
//!
//! - [`document`] — the character sequence: sentinels, lookups, splicing
//! - [`replica`] — per-replica engine: clocks, generation, integration
//! - [`storage`] — plain-text persistence of the visible content

pub mod document;
pub mod replica;
pub mod storage;

pub use document::{Character, Document, DocumentError, END_ID, START_ID};
pub use replica::Replica;
pub use storage::{load, save, StorageError};
