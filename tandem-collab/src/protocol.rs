//! The message taxonomy exchanged between replicas and the relay.
//!
//! Messages travel as one JSON object per WebSocket text frame. The
//! field spelling is part of the wire contract and is preserved exactly
//! as existing peers expect it: uppercase `ID`, the `SiteID` type
//! string, `prevID`/`nextID` inside document snapshots:
//!
//! ```text
//! {"username":"BraveOtter","text":"has joined the session.","type":"join","ID":"…"}
//! {"username":"","text":"42","type":"SiteID","ID":"…"}
//! {"username":"","text":"","type":"operation","ID":"…",
//!  "operation":{"type":"insert","position":1,"value":"a","character":{…}}}
//! {"username":"","text":"","type":"docSync","ID":"…","document":{"characters":[…]}}
//! ```
//!
//! `operation.character` carries the full character record so receivers
//! integrate at the character level; the legacy `position`/`value` pair
//! stays alongside it both for older peers and as their fallback
//! integration path. Peers that don't know the field ignore it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tandem_core::{Character, Document};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Deserialization(#[source] serde_json::Error),
}

/// Message kinds, spelled on the wire exactly as listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "docSync")]
    DocSync,
    #[serde(rename = "docReq")]
    DocReq,
    #[serde(rename = "SiteID")]
    SiteId,
    #[serde(rename = "operation")]
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "insert")]
    Insert,
    #[serde(rename = "delete")]
    Delete,
}

/// An edit travelling between replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub position: usize,
    #[serde(default)]
    pub value: String,
    /// Full character record; absent when a legacy peer generated the
    /// operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<Character>,
}

/// The envelope for everything on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Originating client UUID; stamped by the relay before fan-out for
    /// every kind except `docSync`, where it addresses the target.
    #[serde(rename = "ID", default)]
    pub client_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl Message {
    fn envelope(message_type: MessageType) -> Self {
        Self {
            username: String::new(),
            text: String::new(),
            message_type,
            client_id: Uuid::nil(),
            operation: None,
            document: None,
        }
    }

    /// Presence announcement sent right after connecting.
    pub fn join(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            text: "has joined the session.".to_string(),
            ..Self::envelope(MessageType::Join)
        }
    }

    /// Site id assignment, relay to client. The id rides in `text` as a
    /// decimal string.
    pub fn site_id(site_id: u64, client_id: Uuid) -> Self {
        Self {
            text: site_id.to_string(),
            client_id,
            ..Self::envelope(MessageType::SiteId)
        }
    }

    /// Snapshot request on behalf of the joining client `client_id`.
    pub fn doc_req(client_id: Uuid) -> Self {
        Self {
            client_id,
            ..Self::envelope(MessageType::DocReq)
        }
    }

    /// Full snapshot. `client_id` is the target when answering a
    /// `docReq`, or nil for an everyone-resync after a reload.
    pub fn doc_sync(document: Document, client_id: Uuid) -> Self {
        Self {
            client_id,
            document: Some(document),
            ..Self::envelope(MessageType::DocSync)
        }
    }

    /// Insert broadcast carrying the generated character.
    pub fn insert(character: Character, position: usize) -> Self {
        Self {
            operation: Some(Operation {
                op_type: OperationType::Insert,
                position,
                value: character.value.clone(),
                character: Some(character),
            }),
            ..Self::envelope(MessageType::Operation)
        }
    }

    /// Delete broadcast carrying the tombstoned character.
    pub fn delete(character: Character, position: usize) -> Self {
        Self {
            operation: Some(Operation {
                op_type: OperationType::Delete,
                position,
                value: String::new(),
                character: Some(character),
            }),
            ..Self::envelope(MessageType::Operation)
        }
    }

    /// Serialize to the JSON text that goes into one frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Parse one frame's JSON text.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_roundtrip() {
        let message = Message::join("BraveOtter");
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.username, "BraveOtter");
        assert_eq!(decoded.text, "has joined the session.");
    }

    #[test]
    fn test_wire_spelling_is_exact() {
        let client_id = Uuid::new_v4();
        let encoded = Message::site_id(42, client_id).encode().unwrap();
        assert!(encoded.contains(r#""type":"SiteID""#), "{encoded}");
        assert!(encoded.contains(&format!(r#""ID":"{client_id}""#)), "{encoded}");
        assert!(encoded.contains(r#""text":"42""#), "{encoded}");
        // Empty payloads are omitted, never null.
        assert!(!encoded.contains("operation"), "{encoded}");
        assert!(!encoded.contains("document"), "{encoded}");
    }

    #[test]
    fn test_document_characters_wire_spelling() {
        let mut document = Document::new();
        document
            .splice(Character::new("11", "a", "start", "end"), 1)
            .unwrap();
        let encoded = Message::doc_sync(document, Uuid::nil()).encode().unwrap();
        assert!(encoded.contains(r#""characters":["#), "{encoded}");
        assert!(encoded.contains(r#""ID":"11""#), "{encoded}");
        assert!(encoded.contains(r#""prevID":"start""#), "{encoded}");
        assert!(encoded.contains(r#""nextID":"end""#), "{encoded}");
        assert!(encoded.contains(r#""visible":true"#), "{encoded}");
        assert!(encoded.contains(r#""value":"a""#), "{encoded}");
    }

    #[test]
    fn test_operation_roundtrip() {
        let character = Character::new("31", "x", "start", "end");
        let message = Message::insert(character.clone(), 1);
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        let operation = decoded.operation.unwrap();
        assert_eq!(operation.op_type, OperationType::Insert);
        assert_eq!(operation.position, 1);
        assert_eq!(operation.value, "x");
        assert_eq!(operation.character.unwrap(), character);
    }

    #[test]
    fn test_decodes_legacy_operation_without_character() {
        // What an older peer emits: positional payload only.
        let raw = r#"{"username":"","text":"","type":"operation",
            "ID":"f47ac10b-58cc-4372-a567-0e02b2c3d479",
            "operation":{"type":"insert","position":3,"value":"q"}}"#;
        let decoded = Message::decode(raw).unwrap();
        assert_eq!(decoded.message_type, MessageType::Operation);
        let operation = decoded.operation.unwrap();
        assert_eq!(operation.position, 3);
        assert_eq!(operation.value, "q");
        assert!(operation.character.is_none());
    }

    #[test]
    fn test_decodes_message_with_missing_id() {
        let raw = r#"{"username":"eve","text":"has joined the session.","type":"join"}"#;
        let decoded = Message::decode(raw).unwrap();
        assert_eq!(decoded.message_type, MessageType::Join);
        assert!(decoded.client_id.is_nil());
    }

    #[test]
    fn test_doc_sync_roundtrip() {
        let mut document = Document::new();
        document
            .splice(Character::new("11", "h", "start", "end"), 1)
            .unwrap();
        document
            .splice(Character::new("12", "i", "11", "end"), 2)
            .unwrap();
        let target = Uuid::new_v4();
        let message = Message::doc_sync(document.clone(), target);
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.client_id, target);
        assert_eq!(decoded.document.unwrap(), document);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode(r#"{"type":"unheard-of"}"#).is_err());
    }
}
