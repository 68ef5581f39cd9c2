//! Plain-text persistence of the visible document content.
//!
//! The persisted form is nothing but the rendered bytes with `\n` line
//! separators. Identifiers, tombstones and clock state are deliberately
//! discarded: a reloaded document is a fresh sequence whose characters
//! carry the reloading replica's own site id and clock, not a mergeable
//! continuation of the previous session. Peers catch up by receiving a
//! full snapshot after a reload.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::document::{Document, DocumentError};
use crate::replica::Replica;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Write the visible content to `path`, truncating and creating as
/// necessary, with mode 0644.
pub fn save(path: impl AsRef<Path>, document: &Document) -> Result<(), StorageError> {
    let path = path.as_ref();
    fs::write(path, document.content().as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}

/// Read the byte stream at `path` into the replica, replacing its
/// document: each line's characters are replayed as local inserts at
/// successive positions, with a `\n` inserted between lines.
pub fn load(path: impl AsRef<Path>, replica: &mut Replica) -> Result<(), StorageError> {
    let raw = fs::read_to_string(path)?;
    replica.reset_document();
    let lines: Vec<&str> = raw.split('\n').collect();
    let mut position = 1;
    let mut buffer = [0u8; 4];
    for (index, line) in lines.iter().enumerate() {
        for ch in line.chars() {
            replica.insert(position, ch.encode_utf8(&mut buffer))?;
            position += 1;
        }
        if index < lines.len() - 1 {
            replica.insert(position, "\n")?;
            position += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn replica_with_content(text: &str) -> Replica {
        let mut replica = Replica::with_site_id(1);
        for (index, ch) in text.chars().enumerate() {
            replica
                .insert(index + 1, &ch.to_string())
                .expect("insert failed");
        }
        replica
    }

    #[test]
    fn test_save_then_load_preserves_content() {
        let replica = replica_with_content("cat\ndog");
        let file = NamedTempFile::new().unwrap();
        save(file.path(), replica.document()).unwrap();

        let mut reloaded = Replica::with_site_id(2);
        load(file.path(), &mut reloaded).unwrap();
        assert_eq!(reloaded.content(), "cat\ndog");
        // Seven visible characters plus the two sentinels.
        assert_eq!(reloaded.document().len(), 9);
    }

    #[test]
    fn test_saved_bytes_are_plain_text() {
        let replica = replica_with_content("hello");
        let file = NamedTempFile::new().unwrap();
        save(file.path(), replica.document()).unwrap();
        assert_eq!(fs::read(file.path()).unwrap(), b"hello");
    }

    #[test]
    fn test_load_discards_previous_state() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "new").unwrap();

        let mut replica = replica_with_content("old text");
        load(file.path(), &mut replica).unwrap();
        assert_eq!(replica.content(), "new");
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let mut replica = Replica::new();
        let result = load("/nonexistent/tandem-doc", &mut replica);
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_tombstones_do_not_survive_save() {
        let mut replica = replica_with_content("abc");
        replica.delete(2);
        let file = NamedTempFile::new().unwrap();
        save(file.path(), replica.document()).unwrap();

        let mut reloaded = Replica::with_site_id(3);
        load(file.path(), &mut reloaded).unwrap();
        assert_eq!(reloaded.content(), "ac");
        assert_eq!(reloaded.document().len(), 4);
    }
}
