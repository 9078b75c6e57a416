use std::io;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::kv::KeyValueStore;
use crate::state::ReadingState;

pub const DEFAULT_SLOT_COUNT: usize = 10;
const SLOT_PREFIX: &str = "book";

/// Fixed set of `book{i}` slots used as an LRU cache of reading states.
#[derive(Clone)]
pub struct SlotPool {
    kv: Arc<dyn KeyValueStore>,
    capacity: usize,
}

/// Result of a single pass over every slot.
#[derive(Debug, Clone, Default)]
pub struct SlotScan {
    pub matched: Option<(usize, ReadingState)>,
    pub oldest: Option<usize>,
    pub first_free: Option<usize>,
    pub occupied: usize,
}

impl SlotPool {
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            kv,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn key_for(slot: usize) -> String {
        format!("{SLOT_PREFIX}{slot}")
    }

    /// Reads one slot. Missing or undecodable content is an empty slot.
    pub fn read(&self, slot: usize) -> StorageResult<Option<ReadingState>> {
        let key = Self::key_for(slot);
        let raw = match self.kv.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(StorageError::Read { source, .. })
                if source.kind() == io::ErrorKind::InvalidData =>
            {
                warn!(%key, err = %source, "ignoring unreadable reading state");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<ReadingState>(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(%key, %err, "ignoring undecodable reading state");
                Ok(None)
            }
        }
    }

    pub fn scan(&self, book_id: &str) -> StorageResult<SlotScan> {
        let mut scan = SlotScan::default();
        let mut oldest_stamp = None;
        for slot in 0..self.capacity {
            let Some(state) = self.read(slot)? else {
                if scan.first_free.is_none() {
                    scan.first_free = Some(slot);
                }
                continue;
            };
            scan.occupied += 1;
            // `None` stamps sort before every real timestamp, so a slot
            // without `d` is evicted first. The page script never picked such
            // a slot as oldest; here it counts as the stalest entry.
            if scan.oldest.is_none() || state.last_modified < oldest_stamp {
                oldest_stamp = state.last_modified;
                scan.oldest = Some(slot);
            }
            if scan.matched.is_none() && state.id == book_id {
                scan.matched = Some((slot, state));
            }
        }
        Ok(scan)
    }

    /// Finds the state for `book_id`, or a fresh one bound to a free slot,
    /// or to the least recently modified slot once the pool is full.
    #[instrument(skip(self))]
    pub fn load(&self, book_id: &str) -> StorageResult<(ReadingState, usize)> {
        let scan = self.scan(book_id)?;
        if let Some((slot, mut state)) = scan.matched {
            state.clamp_current();
            debug!(slot, "restored reading state");
            return Ok((state, slot));
        }
        let slot = match scan.first_free {
            Some(free) => free,
            None => {
                let evicted = scan.oldest.unwrap_or(0);
                debug!(slot = evicted, "pool full, evicting least recently used slot");
                evicted
            }
        };
        Ok((ReadingState::new(book_id), slot))
    }

    pub fn save(&self, state: &mut ReadingState, slot: usize) -> StorageResult<()> {
        state.last_modified = Some(Utc::now());
        let payload = serde_json::to_string(state)?;
        self.kv.set_item(&Self::key_for(slot), &payload)
    }

    pub fn entries(&self) -> StorageResult<Vec<(usize, ReadingState)>> {
        let mut entries = Vec::new();
        for slot in 0..self.capacity {
            if let Some(state) = self.read(slot)? {
                entries.push((slot, state));
            }
        }
        Ok(entries)
    }
}
