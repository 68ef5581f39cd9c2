//! The document model: an ordered sequence of character records.
//!
//! A document always begins with the `start` sentinel and ends with the
//! `end` sentinel. Sentinels are invisible, carry reserved identifiers,
//! and never move; algorithms lean on their presence so that inserting
//! at either boundary needs no special-casing.
//!
//! Every character keeps the identifiers of the neighbors its generator
//! saw at insertion time (`prev_id`/`next_id`). Those are causal
//! references, fixed forever; the *sequence* order is what rendering and
//! positional lookups use, and it shifts as concurrent inserts land.
//!
//! All lookups are linear in document length. Documents in a live
//! session are small, and nothing above this layer depends on sub-linear
//! behavior.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved identifier of the leading sentinel.
pub const START_ID: &str = "start";
/// Reserved identifier of the trailing sentinel.
pub const END_ID: &str = "end";

/// Errors produced by document operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("position out of bounds")]
    OutOfBounds,
    #[error("empty character id provided")]
    EmptyCharacter,
    #[error("subsequence bound(s) not present")]
    BoundsMissing,
}

/// One element of the replicated sequence.
///
/// `id`, `value`, `prev_id` and `next_id` are immutable after creation.
/// `visible` transitions `true -> false` exactly once when the character
/// is deleted; a cleared character stays in the sequence as a tombstone.
///
/// The serde renames pin the wire spelling used by existing peers:
/// uppercase `ID`, `prevID`, `nextID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    #[serde(rename = "ID")]
    pub id: String,
    pub visible: bool,
    pub value: String,
    #[serde(rename = "prevID")]
    pub prev_id: String,
    #[serde(rename = "nextID")]
    pub next_id: String,
}

impl Character {
    pub fn new(
        id: impl Into<String>,
        value: impl Into<String>,
        prev_id: impl Into<String>,
        next_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            visible: true,
            value: value.into(),
            prev_id: prev_id.into(),
            next_id: next_id.into(),
        }
    }

    fn start_sentinel() -> Self {
        Self {
            id: START_ID.to_string(),
            visible: false,
            value: String::new(),
            prev_id: String::new(),
            next_id: END_ID.to_string(),
        }
    }

    fn end_sentinel() -> Self {
        Self {
            id: END_ID.to_string(),
            visible: false,
            value: String::new(),
            prev_id: START_ID.to_string(),
            next_id: String::new(),
        }
    }
}

/// The ordered character sequence, sentinels included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub characters: Vec<Character>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document: the two sentinels referring to each other.
    pub fn new() -> Self {
        Self {
            characters: vec![Character::start_sentinel(), Character::end_sentinel()],
        }
    }

    /// Number of characters, sentinels included.
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    /// The character at a 0-based absolute position.
    pub fn element_at(&self, position: usize) -> Result<&Character, DocumentError> {
        self.characters
            .get(position)
            .ok_or(DocumentError::OutOfBounds)
    }

    /// 1-based index of the character with the given id.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.characters
            .iter()
            .position(|character| character.id == id)
            .map(|index| index + 1)
    }

    /// Id of the sequence neighbor to the left, clamped at the boundary.
    pub fn left_of(&self, id: &str) -> Option<&str> {
        let position = self.position_of(id)?;
        if position <= 1 {
            return Some(&self.characters[0].id);
        }
        Some(&self.characters[position - 2].id)
    }

    /// Id of the sequence neighbor to the right, clamped at the boundary.
    pub fn right_of(&self, id: &str) -> Option<&str> {
        let position = self.position_of(id)?;
        if position >= self.len() {
            return Some(&self.characters[self.len() - 1].id);
        }
        Some(&self.characters[position].id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }

    pub fn find(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|character| character.id == id)
    }

    /// The characters strictly between the two bounding ids, in sequence
    /// order. Adjacent or equal bounds yield an empty sequence; an absent
    /// bound or a start bound positioned after the end bound is
    /// `BoundsMissing`.
    pub fn subseq(&self, start_id: &str, end_id: &str) -> Result<Vec<Character>, DocumentError> {
        let start = self
            .position_of(start_id)
            .ok_or(DocumentError::BoundsMissing)?;
        let end = self
            .position_of(end_id)
            .ok_or(DocumentError::BoundsMissing)?;
        if start > end {
            return Err(DocumentError::BoundsMissing);
        }
        if start == end {
            return Ok(Vec::new());
        }
        Ok(self.characters[start..end - 1].to_vec())
    }

    /// The k-th visible character, 1-indexed over visible characters only.
    pub fn ith_visible(&self, k: usize) -> Option<&Character> {
        if k == 0 {
            return None;
        }
        self.characters
            .iter()
            .filter(|character| character.visible)
            .nth(k - 1)
    }

    /// Number of visible characters.
    pub fn visible_len(&self) -> usize {
        self.characters
            .iter()
            .filter(|character| character.visible)
            .count()
    }

    /// The rendered content: every visible value in sequence order.
    pub fn content(&self) -> String {
        self.characters
            .iter()
            .filter(|character| character.visible)
            .map(|character| character.value.as_str())
            .collect()
    }

    /// Splice a character into the sequence at a 0-based absolute index,
    /// rewiring the sequence neighbors' `next_id`/`prev_id` to the new
    /// id. The causal references on the spliced character itself are left
    /// untouched. Positions at or outside the sentinels are rejected.
    pub fn splice(&mut self, character: Character, position: usize) -> Result<(), DocumentError> {
        if position == 0 || position >= self.len() {
            return Err(DocumentError::OutOfBounds);
        }
        if character.id.is_empty() {
            return Err(DocumentError::EmptyCharacter);
        }
        let id = character.id.clone();
        self.characters.insert(position, character);
        self.characters[position - 1].next_id = id.clone();
        self.characters[position + 1].prev_id = id;
        Ok(())
    }

    /// Clear the visibility of the character with the given id, turning
    /// it into a tombstone. Returns whether the id was present.
    pub fn hide(&mut self, id: &str) -> bool {
        match self.position_of(id) {
            Some(position) => {
                self.characters[position - 1].visible = false;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        // start - 1(c) - 3(a) - 2(t) - end, all visible
        Document {
            characters: vec![
                Character {
                    id: "start".into(),
                    visible: false,
                    value: "".into(),
                    prev_id: "".into(),
                    next_id: "1".into(),
                },
                Character {
                    id: "1".into(),
                    visible: true,
                    value: "c".into(),
                    prev_id: "start".into(),
                    next_id: "3".into(),
                },
                Character {
                    id: "3".into(),
                    visible: true,
                    value: "a".into(),
                    prev_id: "1".into(),
                    next_id: "2".into(),
                },
                Character {
                    id: "2".into(),
                    visible: true,
                    value: "t".into(),
                    prev_id: "3".into(),
                    next_id: "end".into(),
                },
                Character {
                    id: "end".into(),
                    visible: false,
                    value: "".into(),
                    prev_id: "2".into(),
                    next_id: "".into(),
                },
            ],
        }
    }

    #[test]
    fn test_new_document_has_only_sentinels() {
        let document = Document::new();
        assert_eq!(document.len(), 2);
        assert_eq!(document.characters[0].id, START_ID);
        assert_eq!(document.characters[1].id, END_ID);
        assert_eq!(document.content(), "");
    }

    #[test]
    fn test_element_at_bounds() {
        let document = Document::new();
        assert_eq!(document.element_at(0).unwrap().id, START_ID);
        assert_eq!(document.element_at(1).unwrap().id, END_ID);
        assert_eq!(document.element_at(2), Err(DocumentError::OutOfBounds));
    }

    #[test]
    fn test_position_of_is_one_based() {
        let document = sample();
        assert_eq!(document.position_of("start"), Some(1));
        assert_eq!(document.position_of("3"), Some(3));
        assert_eq!(document.position_of("end"), Some(5));
        assert_eq!(document.position_of("nope"), None);
    }

    #[test]
    fn test_neighbors() {
        let document = sample();
        assert_eq!(document.left_of("3"), Some("1"));
        assert_eq!(document.right_of("3"), Some("2"));
        // Clamped at the boundaries.
        assert_eq!(document.left_of("start"), Some("start"));
        assert_eq!(document.right_of("end"), Some("end"));
        assert_eq!(document.left_of("nope"), None);
    }

    #[test]
    fn test_subseq_strictly_between() {
        let document = sample();
        let between = document.subseq("start", "end").unwrap();
        let ids: Vec<&str> = between.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);
    }

    #[test]
    fn test_subseq_adjacent_is_empty() {
        let document = sample();
        assert!(document.subseq("1", "3").unwrap().is_empty());
    }

    #[test]
    fn test_subseq_equal_bounds_is_empty() {
        let document = sample();
        assert!(document.subseq("3", "3").unwrap().is_empty());
    }

    #[test]
    fn test_subseq_reversed_bounds() {
        let document = sample();
        assert_eq!(
            document.subseq("end", "start"),
            Err(DocumentError::BoundsMissing)
        );
    }

    #[test]
    fn test_subseq_missing_bound() {
        let document = sample();
        assert_eq!(
            document.subseq("start", "nope"),
            Err(DocumentError::BoundsMissing)
        );
    }

    #[test]
    fn test_ith_visible() {
        let mut document = sample();
        assert_eq!(document.ith_visible(1).unwrap().value, "c");
        assert_eq!(document.ith_visible(3).unwrap().value, "t");
        assert!(document.ith_visible(0).is_none());
        assert!(document.ith_visible(4).is_none());

        document.hide("3");
        assert_eq!(document.ith_visible(2).unwrap().value, "t");
    }

    #[test]
    fn test_content_skips_tombstones() {
        let mut document = sample();
        assert_eq!(document.content(), "cat");
        assert_eq!(document.visible_len(), 3);
        document.hide("3");
        assert_eq!(document.content(), "ct");
        assert_eq!(document.visible_len(), 2);
        assert_eq!(document.len(), 5);
    }

    #[test]
    fn test_splice_rewires_sequence_neighbors() {
        let mut document = Document::new();
        let character = Character::new("11", "a", START_ID, END_ID);
        document.splice(character, 1).unwrap();
        assert_eq!(document.characters[0].next_id, "11");
        assert_eq!(document.characters[2].prev_id, "11");
        assert_eq!(document.content(), "a");
    }

    #[test]
    fn test_splice_rejects_sentinel_positions() {
        let mut document = Document::new();
        let character = Character::new("11", "a", START_ID, END_ID);
        assert_eq!(
            document.splice(character.clone(), 0),
            Err(DocumentError::OutOfBounds)
        );
        assert_eq!(
            document.splice(character, 2),
            Err(DocumentError::OutOfBounds)
        );
    }

    #[test]
    fn test_splice_rejects_empty_id() {
        let mut document = Document::new();
        let character = Character::new("", "a", START_ID, END_ID);
        assert_eq!(
            document.splice(character, 1),
            Err(DocumentError::EmptyCharacter)
        );
    }

    #[test]
    fn test_hide_is_idempotent_and_monotonic() {
        let mut document = sample();
        assert!(document.hide("1"));
        assert!(document.hide("1"));
        assert!(!document.find("1").unwrap().visible);
        assert!(!document.hide("nope"));
    }
}
