use tracing::{debug, instrument};

use crate::error::StorageResult;
use crate::pool::SlotPool;
use crate::state::{BookmarkToggle, ReadingState};

/// Reading state of one open book bound to its pool slot.
///
/// Every mutating operation works on a copy of the state and only adopts it
/// once the slot write succeeded, so a failed write leaves memory and slot
/// as they were. Callers that fire on every scroll tick are expected to
/// coalesce on their side; `save` always writes.
pub struct ReadingStore {
    pool: SlotPool,
    state: ReadingState,
    slot: usize,
}

impl ReadingStore {
    pub fn open(pool: SlotPool, book_id: &str) -> StorageResult<Self> {
        let (state, slot) = pool.load(book_id)?;
        Ok(Self { pool, state, slot })
    }

    pub fn state(&self) -> &ReadingState {
        &self.state
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn save(&mut self) -> StorageResult<()> {
        self.commit(self.state.clone())
    }

    fn commit(&mut self, mut next: ReadingState) -> StorageResult<()> {
        self.pool.save(&mut next, self.slot)?;
        self.state = next;
        Ok(())
    }

    /// Returns `true` when the position changed and was persisted.
    #[instrument(skip(self), fields(book = %self.state.id))]
    pub fn record_position(&mut self, anchor: &str) -> StorageResult<bool> {
        if anchor.is_empty() || self.state.position == anchor {
            return Ok(false);
        }
        let mut next = self.state.clone();
        next.position = anchor.to_string();
        self.commit(next)?;
        Ok(true)
    }

    /// Remembered until the next save; does not write on its own.
    pub fn set_auto_bookmark(&mut self, anchor: &str) {
        if !anchor.is_empty() {
            self.state.auto_bookmark = Some(anchor.to_string());
        }
    }

    pub fn auto_bookmark(&self) -> Option<&str> {
        self.state.auto_bookmark.as_deref()
    }

    #[instrument(skip(self), fields(book = %self.state.id))]
    pub fn toggle_bookmark(&mut self, anchor: &str) -> StorageResult<BookmarkToggle> {
        let mut next = self.state.clone();
        let outcome = next.toggle_bookmark(anchor);
        self.commit(next)?;
        debug!(?outcome, "bookmark toggled");
        Ok(outcome)
    }

    /// `leaving` is the anchor the reader is moving away from; it becomes the
    /// auto-bookmark when the move succeeds. A target for which `present`
    /// answers `false` leaves everything untouched.
    pub fn next_bookmark(
        &mut self,
        leaving: Option<&str>,
        present: impl Fn(&str) -> bool,
    ) -> StorageResult<Option<String>> {
        let mut next = self.state.clone();
        let target = next.next_bookmark();
        self.navigated(next, target, leaving, present)
    }

    pub fn prev_bookmark(
        &mut self,
        leaving: Option<&str>,
        present: impl Fn(&str) -> bool,
    ) -> StorageResult<Option<String>> {
        let mut next = self.state.clone();
        let target = next.prev_bookmark();
        self.navigated(next, target, leaving, present)
    }

    pub fn goto_bookmark(
        &mut self,
        index: usize,
        leaving: Option<&str>,
        present: impl Fn(&str) -> bool,
    ) -> StorageResult<Option<String>> {
        let mut next = self.state.clone();
        let target = next.goto_bookmark(index);
        self.navigated(next, target, leaving, present)
    }

    fn navigated(
        &mut self,
        mut next: ReadingState,
        target: Option<usize>,
        leaving: Option<&str>,
        present: impl Fn(&str) -> bool,
    ) -> StorageResult<Option<String>> {
        let Some(anchor) = target.and_then(|idx| next.bookmark(idx).map(str::to_string)) else {
            return Ok(None);
        };
        if !present(&anchor) {
            debug!(%anchor, "bookmark target missing, staying put");
            return Ok(None);
        }
        if let Some(leaving) = leaving.filter(|l| !l.is_empty()) {
            next.auto_bookmark = Some(leaving.to_string());
        }
        self.commit(next)?;
        Ok(Some(anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::StorageError;

    use crate::kv::{KeyValueStore, MemoryKeyValueStore};
    use crate::pool::DEFAULT_SLOT_COUNT;

    #[derive(Default)]
    struct FailingWrites {
        inner: MemoryKeyValueStore,
        failing: AtomicBool,
    }

    impl KeyValueStore for FailingWrites {
        fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::write(
                    PathBuf::from(key),
                    io::Error::new(io::ErrorKind::Other, "disk full"),
                ));
            }
            self.inner.set_item(key, value)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryKeyValueStore,
        writes: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(key, value)
        }
    }

    fn open(kv: Arc<CountingStore>, book: &str) -> ReadingStore {
        ReadingStore::open(SlotPool::new(kv, DEFAULT_SLOT_COUNT), book).unwrap()
    }

    fn persisted(kv: &CountingStore, slot: usize) -> ReadingState {
        let raw = kv.get_item(&SlotPool::key_for(slot)).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn repeated_position_is_written_once() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");

        assert!(store.record_position("_p12").unwrap());
        assert!(!store.record_position("_p12").unwrap());
        assert_eq!(kv.writes.load(Ordering::SeqCst), 1);

        assert!(store.record_position("_p13").unwrap());
        assert_eq!(kv.writes.load(Ordering::SeqCst), 2);
        assert_eq!(persisted(&kv, 0).position, "_p13");
    }

    #[test]
    fn bookmark_scenario_persists_each_step() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");
        assert_eq!(store.slot(), 0);

        store.toggle_bookmark("p3").unwrap();
        store.toggle_bookmark("p7").unwrap();
        assert_eq!(persisted(&kv, 0).current, 1);

        store.toggle_bookmark("p3").unwrap();
        let saved = persisted(&kv, 0);
        assert_eq!(saved.bookmarks, vec![None, Some("p7".to_string())]);
        assert_eq!(saved.current, 0);
        assert_eq!(kv.writes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn auto_bookmark_rides_along_with_next_save() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");

        store.set_auto_bookmark("_p40");
        assert_eq!(kv.writes.load(Ordering::SeqCst), 0);
        store.record_position("_p41").unwrap();
        assert_eq!(persisted(&kv, 0).auto_bookmark.as_deref(), Some("_p40"));
    }

    #[test]
    fn navigation_records_departure_point() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");
        store.toggle_bookmark("p3").unwrap();
        store.toggle_bookmark("p7").unwrap();

        assert_eq!(store.prev_bookmark(Some("_p50"), |_| true).unwrap().as_deref(), Some("p3"));
        assert_eq!(store.auto_bookmark(), Some("_p50"));
        assert_eq!(persisted(&kv, 0).current, 0);

        assert_eq!(store.next_bookmark(Some("_p3"), |_| true).unwrap().as_deref(), Some("p7"));
        assert_eq!(persisted(&kv, 0).auto_bookmark.as_deref(), Some("_p3"));
    }

    #[test]
    fn invalid_goto_does_not_write() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");
        store.toggle_bookmark("p3").unwrap();
        let writes = kv.writes.load(Ordering::SeqCst);

        assert_eq!(store.goto_bookmark(4, Some("_p1"), |_| true).unwrap(), None);
        assert_eq!(store.auto_bookmark(), None);
        assert_eq!(kv.writes.load(Ordering::SeqCst), writes);
    }

    #[test]
    fn reopening_restores_bookmarks() {
        let kv = Arc::new(CountingStore::default());
        {
            let mut store = open(kv.clone(), "A");
            store.toggle_bookmark("p3").unwrap();
            store.record_position("_p9").unwrap();
        }
        let store = open(kv, "A");
        assert_eq!(store.state().position, "_p9");
        assert_eq!(store.state().bookmark(0), Some("p3"));
    }

    #[test]
    fn failed_write_keeps_memory_and_slot_in_step() {
        let kv = Arc::new(FailingWrites::default());
        let mut store =
            ReadingStore::open(SlotPool::new(kv.clone(), DEFAULT_SLOT_COUNT), "A").unwrap();
        store.toggle_bookmark("p3").unwrap();
        let before = store.state().clone();

        kv.failing.store(true, Ordering::SeqCst);
        assert!(store.record_position("_p5").is_err());
        assert!(store.toggle_bookmark("p9").is_err());
        store.set_auto_bookmark("_p2");
        assert!(store.goto_bookmark(0, Some("_p7"), |_| true).is_err());
        assert_eq!(store.state().position, before.position);
        assert_eq!(store.state().bookmarks, before.bookmarks);
        assert_eq!(store.auto_bookmark(), Some("_p2"));

        kv.failing.store(false, Ordering::SeqCst);
        assert!(store.record_position("_p5").unwrap());
        let raw = kv.get_item("book0").unwrap().unwrap();
        let saved: ReadingState = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.position, "_p5");
        assert_eq!(saved.bookmarks, before.bookmarks);
    }

    #[test]
    fn missing_target_leaves_state_untouched() {
        let kv = Arc::new(CountingStore::default());
        let mut store = open(kv.clone(), "A");
        store.toggle_bookmark("p3").unwrap();
        store.toggle_bookmark("gone").unwrap();
        store.set_auto_bookmark("_p8");
        let writes = kv.writes.load(Ordering::SeqCst);

        let present = |anchor: &str| anchor != "gone";
        assert_eq!(store.goto_bookmark(1, Some("_p1"), present).unwrap(), None);
        assert_eq!(store.state().current, 1);
        store.goto_bookmark(0, None, present).unwrap();
        assert_eq!(store.next_bookmark(Some("_p1"), present).unwrap(), None);
        assert_eq!(store.state().current, 0);
        assert_eq!(store.auto_bookmark(), Some("_p8"));
        assert_eq!(kv.writes.load(Ordering::SeqCst), writes + 1);
    }
}
