use std::sync::Arc;

use crate::error::StorageResult;
use crate::kv::KeyValueStore;

pub const HIDE_WORDS_KEY: &str = "hide_words";

/// Comma separated search terms, e.g. from a `find=` query parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordQuery {
    words: Vec<String>,
}

impl WordQuery {
    pub fn parse(raw: &str) -> Self {
        let words = raw
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub fn span_id(word: usize, occurrence: usize) -> String {
    format!("word-{word}-{occurrence}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordHit {
    pub word: usize,
    pub occurrence: usize,
    pub span_id: String,
    /// Anchor of the block the occurrence sits in.
    pub block: String,
}

/// Occurrences of every searched word plus the navigation cursor.
///
/// The cursor belongs to one word at a time. Switching to another word starts
/// over at its first occurrence (forward) or its last one (backward).
#[derive(Debug, Clone, Default)]
pub struct WordIndex {
    words: Vec<String>,
    blocks: Vec<Vec<String>>,
    active: Option<usize>,
    cursor: usize,
}

impl WordIndex {
    pub fn new(query: &WordQuery) -> Self {
        Self {
            words: query.words().to_vec(),
            blocks: vec![Vec::new(); query.words().len()],
            active: None,
            cursor: 0,
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn count(&self, word: usize) -> usize {
        self.blocks.get(word).map_or(0, Vec::len)
    }

    /// Registers one more occurrence of `word` inside `block` and returns its
    /// occurrence number.
    pub fn record(&mut self, word: usize, block: &str) -> Option<usize> {
        let occurrences = self.blocks.get_mut(word)?;
        occurrences.push(block.to_string());
        Some(occurrences.len() - 1)
    }

    pub fn next(&mut self, word: usize) -> Option<WordHit> {
        let count = self.count(word);
        if count == 0 {
            return None;
        }
        if self.active != Some(word) {
            self.active = Some(word);
            self.cursor = 0;
        } else if self.cursor + 1 < count {
            self.cursor += 1;
        } else {
            return None;
        }
        self.hit(word)
    }

    pub fn prev(&mut self, word: usize) -> Option<WordHit> {
        let count = self.count(word);
        if count == 0 {
            return None;
        }
        if self.active != Some(word) {
            self.active = Some(word);
            self.cursor = count - 1;
        } else if self.cursor > 0 {
            self.cursor -= 1;
        } else {
            return None;
        }
        self.hit(word)
    }

    fn hit(&self, word: usize) -> Option<WordHit> {
        let block = self.blocks.get(word)?.get(self.cursor)?;
        Some(WordHit {
            word,
            occurrence: self.cursor,
            span_id: span_id(word, self.cursor),
            block: block.clone(),
        })
    }
}

/// Collapsed/expanded flag of the word finder panel, shared across books.
pub struct WordPanel {
    kv: Arc<dyn KeyValueStore>,
    hidden: bool,
}

impl WordPanel {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let hidden = kv.get_item(HIDE_WORDS_KEY)?.as_deref() == Some("1");
        Ok(Self { kv, hidden })
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) -> StorageResult<()> {
        self.hidden = hidden;
        self.kv
            .set_item(HIDE_WORDS_KEY, if hidden { "1" } else { "0" })
    }

    /// Returns whether the panel is visible afterwards.
    pub fn toggle(&mut self) -> StorageResult<bool> {
        self.set_hidden(!self.hidden)?;
        Ok(!self.hidden)
    }
}
