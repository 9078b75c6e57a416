use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::error::StorageResult;
use crate::layout::{AnchorIndex, PageLayout};
use crate::state::{BookmarkToggle, ReadingState};
use crate::store::ReadingStore;
use crate::toc::Toc;
use crate::words::{WordHit, WordIndex, WordPanel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scroll { delta: i64 },
    JumpHome,
    JumpEnd,
    /// `None` bookmarks the paragraph at the viewport centre.
    ToggleBookmark { anchor: Option<String> },
    NextBookmark,
    PrevBookmark,
    GotoBookmark { index: usize },
    GotoAutoBookmark,
    /// Plain link navigation, e.g. from the table of contents.
    GotoAnchor { anchor: String },
    NextWord { word: usize },
    PrevWord { word: usize },
    ToggleWordPanel,
    ToggleToc,
    CloseToc,
}

/// Things the UI has to reflect after a command or tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    ScrollTo { anchor: String },
    Scrolled { offset: u32 },
    BookmarkAdded { anchor: String, index: usize },
    BookmarkRemoved { anchor: String, index: usize },
    WordHighlighted { span_id: String, block: String },
    WordPanelVisibility { visible: bool },
    TocVisibility { visible: bool, current: Option<usize> },
    /// The address bar fragment should be replaced (no history entry).
    LocationReplaced { anchor: String },
    /// A history entry should be pushed so "back" returns here.
    LocationPushed { anchor: String },
}

/// Everything one open page needs: persisted state, geometry and the
/// transient UI toggles.
pub struct Reader {
    store: ReadingStore,
    panel: WordPanel,
    layout: PageLayout,
    paragraphs: AnchorIndex,
    titles: AnchorIndex,
    toc: Option<Toc>,
    words: WordIndex,
    viewport_height: u32,
    offset: u32,
    last_tick_offset: u32,
    toc_visible: bool,
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl Reader {
    /// Restores the saved position and re-announces every live bookmark.
    pub fn new(
        store: ReadingStore,
        panel: WordPanel,
        layout: PageLayout,
        words: WordIndex,
        viewport_height: u32,
    ) -> Self {
        let paragraphs = layout.paragraph_index();
        let titles = layout.title_index();
        let toc = Toc::build(&layout.titles);
        let mut reader = Self {
            store,
            panel,
            layout,
            paragraphs,
            titles,
            toc,
            words,
            viewport_height: viewport_height.max(1),
            offset: 0,
            last_tick_offset: 0,
            toc_visible: false,
            events: Arc::new(Mutex::new(Vec::new())),
        };
        reader.restore();
        reader
    }

    fn restore(&mut self) {
        let position = self.store.state().position.clone();
        if !position.is_empty() {
            self.scroll_to_anchor(&position);
        }
        self.last_tick_offset = self.offset;

        let marks: Vec<ReaderEvent> = self
            .store
            .state()
            .live_bookmarks()
            .map(|(index, anchor)| ReaderEvent::BookmarkAdded {
                anchor: anchor.to_string(),
                index,
            })
            .collect();
        let mut events = self.events.lock();
        events.extend(marks);
        if !self.words.words().is_empty() {
            events.push(ReaderEvent::WordPanelVisibility {
                visible: !self.panel.is_hidden(),
            });
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ReaderEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<ReaderEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn state(&self) -> &ReadingState {
        self.store.state()
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn toc(&self) -> Option<&Toc> {
        self.toc.as_ref()
    }

    pub fn toc_visible(&self) -> bool {
        self.toc_visible
    }

    pub fn words(&self) -> &WordIndex {
        &self.words
    }

    pub fn word_panel_visible(&self) -> bool {
        !self.panel.is_hidden()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    fn centre(&self) -> u32 {
        self.offset.saturating_add(self.viewport_height / 2)
    }

    pub fn closest_paragraph(&self) -> Option<String> {
        self.paragraphs.closest(self.centre()).map(str::to_string)
    }

    pub fn closest_title(&self) -> Option<String> {
        self.titles.closest(self.centre()).map(str::to_string)
    }

    fn set_offset(&mut self, offset: u32) {
        let offset = offset.min(self.layout.height);
        if offset != self.offset {
            self.offset = offset;
            self.events.lock().push(ReaderEvent::Scrolled { offset });
        }
    }

    /// Centres `anchor` in the viewport. Anchors missing from the layout are
    /// skipped.
    fn scroll_to_anchor(&mut self, anchor: &str) -> bool {
        let Some(top) = self.layout.top_of(anchor) else {
            debug!(anchor, "anchor not present in layout");
            return false;
        };
        self.set_offset(top.saturating_sub(self.viewport_height / 2));
        self.events.lock().push(ReaderEvent::ScrollTo {
            anchor: anchor.to_string(),
        });
        true
    }

    fn mark_departure(&mut self) -> Option<String> {
        let leaving = self.closest_paragraph()?;
        self.store.set_auto_bookmark(&leaving);
        self.events.lock().push(ReaderEvent::LocationPushed {
            anchor: leaving.clone(),
        });
        Some(leaving)
    }

    #[instrument(skip(self))]
    pub fn apply(&mut self, command: Command) -> StorageResult<()> {
        match command {
            Command::Scroll { delta } => {
                let next = (i64::from(self.offset) + delta).clamp(0, i64::from(self.layout.height));
                self.set_offset(next as u32);
            }
            Command::JumpHome => {
                self.mark_departure();
                self.set_offset(0);
            }
            Command::JumpEnd => {
                self.mark_departure();
                self.set_offset(self.layout.height);
            }
            Command::ToggleBookmark { anchor } => {
                let Some(anchor) = anchor.or_else(|| self.closest_paragraph()) else {
                    return Ok(());
                };
                let event = match self.store.toggle_bookmark(&anchor)? {
                    BookmarkToggle::Added { index } => ReaderEvent::BookmarkAdded { anchor, index },
                    BookmarkToggle::Removed { index } => {
                        ReaderEvent::BookmarkRemoved { anchor, index }
                    }
                };
                self.events.lock().push(event);
            }
            Command::NextBookmark | Command::PrevBookmark | Command::GotoBookmark { .. } => {
                let leaving = self.closest_paragraph();
                let layout = &self.layout;
                let present = |anchor: &str| layout.top_of(anchor).is_some();
                let leaving_anchor = leaving.as_deref();
                let target = match command {
                    Command::NextBookmark => self.store.next_bookmark(leaving_anchor, present)?,
                    Command::PrevBookmark => self.store.prev_bookmark(leaving_anchor, present)?,
                    Command::GotoBookmark { index } => {
                        self.store.goto_bookmark(index, leaving_anchor, present)?
                    }
                    _ => None,
                };
                if let Some(anchor) = target {
                    if let Some(leaving) = leaving {
                        self.events
                            .lock()
                            .push(ReaderEvent::LocationPushed { anchor: leaving });
                    }
                    self.scroll_to_anchor(&anchor);
                }
            }
            Command::GotoAutoBookmark => {
                if let Some(anchor) = self.store.auto_bookmark().map(str::to_string) {
                    self.scroll_to_anchor(&anchor);
                }
            }
            Command::GotoAnchor { anchor } => {
                self.scroll_to_anchor(&anchor);
            }
            Command::NextWord { word } => {
                let hit = self.words.next(word);
                self.show_word(hit);
            }
            Command::PrevWord { word } => {
                let hit = self.words.prev(word);
                self.show_word(hit);
            }
            Command::ToggleWordPanel => {
                let visible = self.panel.toggle()?;
                self.events
                    .lock()
                    .push(ReaderEvent::WordPanelVisibility { visible });
            }
            Command::ToggleToc => {
                let visible = !self.toc_visible;
                self.set_toc_visible(visible);
            }
            Command::CloseToc => {
                if self.toc_visible {
                    self.set_toc_visible(false);
                }
            }
        }
        Ok(())
    }

    fn show_word(&mut self, hit: Option<WordHit>) {
        let Some(hit) = hit else {
            return;
        };
        self.events.lock().push(ReaderEvent::WordHighlighted {
            span_id: hit.span_id,
            block: hit.block.clone(),
        });
        self.scroll_to_anchor(&hit.block);
    }

    fn set_toc_visible(&mut self, visible: bool) {
        let Some(toc) = self.toc.as_ref() else {
            return;
        };
        let current = if visible {
            self.closest_title().and_then(|id| toc.position_of(&id))
        } else {
            None
        };
        self.toc_visible = visible;
        self.events
            .lock()
            .push(ReaderEvent::TocVisibility { visible, current });
    }

    /// Scroll-idle timer. Records the centred paragraph when the viewport
    /// moved since the previous tick; returns whether anything was written.
    pub fn tick(&mut self) -> StorageResult<bool> {
        if self.offset == self.last_tick_offset {
            return Ok(false);
        }
        self.last_tick_offset = self.offset;
        let Some(anchor) = self.closest_paragraph() else {
            return Ok(false);
        };
        if !self.store.record_position(&anchor)? {
            return Ok(false);
        }
        self.events
            .lock()
            .push(ReaderEvent::LocationReplaced { anchor });
        Ok(true)
    }
}
