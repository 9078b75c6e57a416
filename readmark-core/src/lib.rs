use std::path::Path;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod kv;
pub mod layout;
pub mod pool;
pub mod reader;
pub mod state;
pub mod store;
pub mod toc;
pub mod words;

pub use config::ReaderConfig;
pub use error::{StorageError, StorageResult};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use layout::{AnchorIndex, Block, PageLayout, Title};
pub use pool::{SlotPool, SlotScan, DEFAULT_SLOT_COUNT};
pub use reader::{Command, Reader, ReaderEvent};
pub use state::{BookmarkToggle, ReadingState};
pub use store::ReadingStore;
pub use toc::{Toc, TocEntry};
pub use words::{span_id, WordHit, WordIndex, WordPanel, WordQuery, HIDE_WORDS_KEY};

static BOOK_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0e5b8a-6c1d-5d2e-9a47-0b8c2d1e4f63").expect("valid namespace UUID")
});

/// Book id of a served page, e.g. `/porcula/book/123/render` with prefix
/// `/porcula/book/` and suffix `/render` yields `123`.
pub fn book_id_for_location(location: &str, prefix: &str, suffix: &str) -> String {
    let trimmed = location.strip_prefix(prefix).unwrap_or(location);
    let trimmed = trimmed.strip_suffix(suffix).unwrap_or(trimmed);
    trimmed.to_string()
}

/// Stable id for a local file, independent of how the path was spelled.
pub fn book_id_for_path(path: &Path) -> String {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&BOOK_NAMESPACE, rendered.as_bytes()).to_string()
}
