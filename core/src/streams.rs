//! Per-stream watermarks.
//!
//! A watermark vector records, for every update stream, the highest sequence
//! id already committed. Entries only move forward.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{SeqId, StreamId, UpdateId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamWatermarks {
    positions: Vec<SeqId>,
}

impl StreamWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions(positions: Vec<SeqId>) -> Self {
        Self { positions }
    }

    /// Committed position of `stream`, `-1` if never seen.
    pub fn get(&self, stream: StreamId) -> SeqId {
        self.positions.get(stream as usize).copied().unwrap_or(-1)
    }

    /// Whether `id` was already applied (duplicate or out-of-order delivery).
    pub fn is_stale(&self, id: &UpdateId) -> bool {
        id.seq <= self.get(id.stream)
    }

    /// Records `id`. Returns `false` and leaves the vector untouched when stale.
    pub fn advance(&mut self, id: &UpdateId) -> bool {
        if self.is_stale(id) {
            return false;
        }
        let idx = id.stream as usize;
        if self.positions.len() <= idx {
            self.positions.resize(idx + 1, -1);
        }
        self.positions[idx] = id.seq;
        true
    }

    pub fn positions(&self) -> &[SeqId] {
        &self.positions
    }

    /// Streams that have seen at least one update.
    pub fn to_map(&self) -> HashMap<StreamId, SeqId> {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, &seq)| seq >= 0)
            .map(|(stream, &seq)| (stream as StreamId, seq))
            .collect()
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
