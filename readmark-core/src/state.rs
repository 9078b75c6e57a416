use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Per-book reading state as stored in one pool slot.
///
/// Field names on the wire are the short keys the page script has always
/// written (`p`, `m`, `c`, `d`, `ab`), so existing slots keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingState {
    pub id: String,
    #[serde(rename = "p", default)]
    pub position: String,
    #[serde(rename = "m", default)]
    pub bookmarks: Vec<Option<String>>,
    #[serde(rename = "c", default, deserialize_with = "lenient_index")]
    pub current: usize,
    #[serde(
        rename = "d",
        default,
        with = "iso_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "ab", default, skip_serializing_if = "Option::is_none")]
    pub auto_bookmark: Option<String>,
}

/// Outcome of toggling a bookmark, with the slot index it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkToggle {
    Added { index: usize },
    Removed { index: usize },
}

impl ReadingState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: String::new(),
            bookmarks: Vec::new(),
            current: 0,
            last_modified: None,
            auto_bookmark: None,
        }
    }

    pub fn bookmark(&self, index: usize) -> Option<&str> {
        self.bookmarks.get(index).and_then(|slot| slot.as_deref())
    }

    pub fn live_bookmarks(&self) -> impl Iterator<Item = (usize, &str)> {
        self.bookmarks
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_deref().map(|anchor| (idx, anchor)))
    }

    pub fn bookmark_index(&self, anchor: &str) -> Option<usize> {
        self.bookmarks
            .iter()
            .position(|slot| slot.as_deref() == Some(anchor))
    }

    pub fn clamp_current(&mut self) {
        self.current = self.current.min(self.bookmarks.len().saturating_sub(1));
    }

    /// Removes `anchor` if bookmarked, otherwise stores it in the first empty
    /// slot (or appends). Trailing empty slots are trimmed after a removal.
    pub fn toggle_bookmark(&mut self, anchor: &str) -> BookmarkToggle {
        match self.bookmark_index(anchor) {
            Some(index) => {
                self.bookmarks[index] = None;
                while matches!(self.bookmarks.last(), Some(None)) {
                    self.bookmarks.pop();
                }
                self.current = index.saturating_sub(1);
                self.clamp_current();
                BookmarkToggle::Removed { index }
            }
            None => {
                let index = match self.bookmarks.iter().position(Option::is_none) {
                    Some(free) => {
                        self.bookmarks[free] = Some(anchor.to_string());
                        free
                    }
                    None => {
                        self.bookmarks.push(Some(anchor.to_string()));
                        self.bookmarks.len() - 1
                    }
                };
                self.current = index;
                BookmarkToggle::Added { index }
            }
        }
    }

    /// Advances `current` to the next live bookmark. At the last index the
    /// last entry is targeted again; the cursor never wraps.
    pub fn next_bookmark(&mut self) -> Option<usize> {
        let len = self.bookmarks.len();
        if len == 0 {
            return None;
        }
        let mut idx = if self.current >= len - 1 {
            len - 1
        } else {
            self.current + 1
        };
        while idx < len && self.bookmarks[idx].is_none() {
            idx += 1;
        }
        if idx >= len {
            return None;
        }
        self.current = idx;
        Some(idx)
    }

    /// Mirror of [`ReadingState::next_bookmark`] towards index 0.
    pub fn prev_bookmark(&mut self) -> Option<usize> {
        let len = self.bookmarks.len();
        if len == 0 {
            return None;
        }
        let mut idx = if self.current < 1 {
            0
        } else if self.current > len - 1 {
            len - 1
        } else {
            self.current - 1
        };
        while idx > 0 && self.bookmarks[idx].is_none() {
            idx -= 1;
        }
        self.bookmarks[idx].as_ref()?;
        self.current = idx;
        Some(idx)
    }

    pub fn goto_bookmark(&mut self, index: usize) -> Option<usize> {
        self.bookmark(index)?;
        self.current = index;
        Some(index)
    }
}

/// The page script sometimes stored `c` as a string (`"2"`), and a hand-edited
/// slot may hold a negative number. Both collapse to a usable index.
fn lenient_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let index = match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    };
    Ok(usize::try_from(index).unwrap_or(usize::MAX))
}

mod iso_millis {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        }))
    }
}
