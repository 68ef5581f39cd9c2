//! The per-replica CRDT engine.
//!
//! A [`Replica`] owns one copy of the document plus the identifier state
//! that makes locally generated characters globally unique: the server-
//! assigned site id and a local clock incremented before every insert.
//! The character id is the decimal concatenation of the two, and the
//! lexicographic order over those id strings is the tie-break shared by
//! every replica.
//!
//! Three procedures make the sequence conflict-free:
//!
//! - local insert generation pins the new character between its *visible*
//!   neighbors at the moment of editing;
//! - remote insert integration re-selects a slot with the recursive
//!   bounded-interval walk below, so concurrent inserts into the same
//!   gap converge to one interleaving on every replica;
//! - deletes clear a visibility bit, which commutes with everything.
//!
//! Remote inserts whose causal neighbors have not arrived yet are parked
//! in a pending set and retried after each successful integration, so
//! delivery order across originators never matters.

use crate::document::{Character, Document, DocumentError, END_ID, START_ID};

/// One participant's document engine.
#[derive(Debug, Clone)]
pub struct Replica {
    site_id: u64,
    clock: u64,
    document: Document,
    /// Remote characters waiting for their causal neighbors to arrive.
    pending: Vec<Character>,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    /// A fresh replica with an empty document. The site id stays zero
    /// until the relay assigns one.
    pub fn new() -> Self {
        Self {
            site_id: 0,
            clock: 0,
            document: Document::new(),
            pending: Vec::new(),
        }
    }

    pub fn with_site_id(site_id: u64) -> Self {
        Self {
            site_id,
            ..Self::new()
        }
    }

    pub fn site_id(&self) -> u64 {
        self.site_id
    }

    /// Store the relay-assigned site id. The clock is deliberately left
    /// running: a clock value must never be reused across site ids.
    pub fn set_site_id(&mut self, site_id: u64) {
        self.site_id = site_id;
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn content(&self) -> String {
        self.document.content()
    }

    /// Destructively replace the document with a received snapshot, then
    /// retry anything still pending against the new state.
    pub fn replace_document(&mut self, document: Document) {
        self.document = document;
        self.retry_pending();
    }

    /// Reset to an empty document, keeping site id and clock.
    pub fn reset_document(&mut self) {
        self.document = Document::new();
        self.pending.clear();
    }

    /// Generate and integrate a local insertion at a 1-based visible
    /// position, returning the new character for broadcast.
    pub fn local_insert(
        &mut self,
        position: usize,
        value: &str,
    ) -> Result<Character, DocumentError> {
        self.clock += 1;
        let prev_id = self
            .document
            .ith_visible(position.saturating_sub(1))
            .map(|c| c.id.clone())
            .unwrap_or_else(|| START_ID.to_string());
        let next_id = self
            .document
            .ith_visible(position)
            .map(|c| c.id.clone())
            .unwrap_or_else(|| END_ID.to_string());
        let character = Character::new(
            format!("{}{}", self.site_id, self.clock),
            value,
            prev_id.clone(),
            next_id.clone(),
        );
        self.integrate_insert(character.clone(), &prev_id, &next_id)?;
        Ok(character)
    }

    /// Generate and integrate a local insertion; returns the new content.
    pub fn insert(&mut self, position: usize, value: &str) -> Result<String, DocumentError> {
        self.local_insert(position, value)?;
        Ok(self.content())
    }

    /// Generate a local deletion at a 1-based visible position, returning
    /// the tombstoned character for broadcast. Positions past the last
    /// visible character are a no-op.
    pub fn local_delete(&mut self, position: usize) -> Option<Character> {
        let mut target = self.document.ith_visible(position)?.clone();
        self.document.hide(&target.id);
        target.visible = false;
        Some(target)
    }

    /// Generate a local deletion; returns the new content.
    pub fn delete(&mut self, position: usize) -> String {
        let _ = self.local_delete(position);
        self.content()
    }

    /// Apply a received remote insertion. Idempotent: an already-present
    /// id is dropped. A character whose causal neighbors are not yet
    /// known is deferred until they arrive.
    pub fn integrate_remote_insert(&mut self, character: Character) {
        if self.document.contains(&character.id) {
            return;
        }
        if !self.document.contains(&character.prev_id)
            || !self.document.contains(&character.next_id)
        {
            log::debug!(
                "deferring insert {}: neighbors {}/{} not yet present",
                character.id,
                character.prev_id,
                character.next_id
            );
            if !self.pending.iter().any(|p| p.id == character.id) {
                self.pending.push(character);
            }
            return;
        }
        let prev_id = character.prev_id.clone();
        let next_id = character.next_id.clone();
        if let Err(err) = self.integrate_insert(character, &prev_id, &next_id) {
            log::warn!("dropping remote insert: {err}");
            return;
        }
        self.retry_pending();
    }

    /// Apply a received remote deletion. Idempotent; an absent target is
    /// dropped.
    pub fn integrate_remote_delete(&mut self, id: &str) {
        if !self.document.hide(id) {
            log::debug!("remote delete for unknown id {id}, dropped");
        }
    }

    /// Number of remote inserts still waiting on their causal neighbors.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Place `character` strictly between `prev_id` and `next_id` in the
    /// current sequence.
    ///
    /// When the interval is empty the slot is unambiguous. Otherwise the
    /// interval is narrowed recursively: the candidates whose own causal
    /// neighbors lie outside the interval are collected (at least one
    /// always does), the walk advances over them while their ids order
    /// below the new id, and the recursion descends into the surrounding
    /// pair. Concurrent inserts into the same gap all survive the
    /// candidate filter, and id order is total, so every replica walks to
    /// the same slot no matter the order it processes them in.
    fn integrate_insert(
        &mut self,
        character: Character,
        prev_id: &str,
        next_id: &str,
    ) -> Result<(), DocumentError> {
        let subsequence = self.document.subseq(prev_id, next_id)?;
        if subsequence.is_empty() {
            let next_position = self
                .document
                .position_of(next_id)
                .ok_or(DocumentError::BoundsMissing)?;
            // 0-based slot immediately before the `next` bound.
            return self.document.splice(character, next_position - 1);
        }
        let inside = |id: &str| subsequence.iter().any(|c| c.id == id);
        let mut bounds: Vec<&str> = Vec::with_capacity(subsequence.len() + 2);
        bounds.push(prev_id);
        for candidate in &subsequence {
            if !inside(&candidate.prev_id) && !inside(&candidate.next_id) {
                bounds.push(&candidate.id);
            }
        }
        bounds.push(next_id);
        if bounds.len() == 2 {
            // Only reachable on a malformed sequence (an integrated
            // document always leaves at least one candidate); take the
            // slot before `next` rather than recursing on the same
            // interval.
            let next_position = self
                .document
                .position_of(next_id)
                .ok_or(DocumentError::BoundsMissing)?;
            return self.document.splice(character, next_position - 1);
        }
        let mut index = 1;
        while index < bounds.len() - 1 && bounds[index] < character.id.as_str() {
            index += 1;
        }
        let narrowed_prev = bounds[index - 1].to_string();
        let narrowed_next = bounds[index].to_string();
        self.integrate_insert(character, &narrowed_prev, &narrowed_next)
    }

    /// Retry deferred inserts until a pass makes no progress. Retrying is
    /// idempotent: anything integrated meanwhile is skipped by id.
    fn retry_pending(&mut self) {
        loop {
            let mut progressed = false;
            let deferred = std::mem::take(&mut self.pending);
            for character in deferred {
                if self.document.contains(&character.id) {
                    progressed = true;
                    continue;
                }
                if self.document.contains(&character.prev_id)
                    && self.document.contains(&character.next_id)
                {
                    let prev_id = character.prev_id.clone();
                    let next_id = character.next_id.clone();
                    match self.integrate_insert(character, &prev_id, &next_id) {
                        Ok(()) => progressed = true,
                        Err(err) => log::warn!("dropping deferred insert: {err}"),
                    }
                } else {
                    self.pending.push(character);
                }
            }
            if !progressed || self.pending.is_empty() {
                break;
            }
        }
    }
}
