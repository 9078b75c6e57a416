use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use readmark_core::{
    book_id_for_location, book_id_for_path, BookmarkToggle, Command, FileKeyValueStore,
    KeyValueStore, PageLayout, Reader, ReaderConfig, ReaderEvent, ReadingStore, SlotPool, Toc,
    TocEntry, WordPanel, WordQuery,
};
use readmark_markup::{link_notes, mark_blocks, toc_html};
use readmark_tty::{write_status_line, EventMapper, InputMode, UiEvent};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "readmark",
    version,
    about = "Reading position and bookmark keeper for rendered books"
)]
struct Args {
    /// Directory holding the slot files
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<PathBuf>,

    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read a laid-out page interactively
    Read {
        /// Page layout JSON (paragraph and title offsets)
        layout: PathBuf,
        /// Book id or location; defaults to the layout's own id
        #[arg(long)]
        book: Option<String>,
        /// Comma separated words to find
        #[arg(long)]
        find: Option<String>,
    },
    /// Print the stored reading state of a book
    Status { book: String },
    /// List occupied slots
    Slots,
    /// Toggle a bookmark on an anchor
    Bookmark { book: String, anchor: String },
    /// Record the reading position
    Position { book: String, anchor: String },
    /// Wire note back-links of an HTML file and wrap searched words in spans
    Mark {
        html: PathBuf,
        #[arg(long, default_value = "")]
        find: String,
    },
    /// Print the table of contents of a layout as HTML
    Toc { layout: PathBuf },
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ReaderConfig::project_dirs()?;
    let interactive = matches!(args.command, Commands::Read { .. });
    let _log_guard = init_logging(&project_dirs, !interactive)?;

    let mut config = match &args.config {
        Some(path) => ReaderConfig::load_from_path(path)?,
        None => ReaderConfig::load()?,
    };
    if let Some(dir) = args.state_dir.clone() {
        config.state_dir = Some(dir);
    }
    let state_dir = config.resolve_state_dir(&project_dirs);
    let kv: Arc<dyn KeyValueStore> = Arc::new(
        FileKeyValueStore::new(state_dir.clone())
            .with_context(|| format!("failed to open state directory {:?}", state_dir))?,
    );
    let pool = SlotPool::new(Arc::clone(&kv), config.slot_count);

    match args.command {
        Commands::Read { layout, book, find } => {
            run_reader(&config, pool, kv, &layout, book.as_deref(), find.as_deref())
        }
        Commands::Status { book } => {
            let store = ReadingStore::open(pool, &resolve_book(&config, &book))?;
            let report = serde_json::json!({
                "slot": store.slot(),
                "stored": store.state().last_modified.is_some(),
                "state": store.state(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Slots => {
            for (slot, state) in pool.entries()? {
                let stamp = state
                    .last_modified
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{} bookmarks\t{}",
                    SlotPool::key_for(slot),
                    state.id,
                    stamp,
                    state.live_bookmarks().count(),
                    if state.position.is_empty() {
                        "-"
                    } else {
                        state.position.as_str()
                    },
                );
            }
            Ok(())
        }
        Commands::Bookmark { book, anchor } => {
            let mut store = ReadingStore::open(pool, &resolve_book(&config, &book))?;
            match store.toggle_bookmark(&anchor)? {
                BookmarkToggle::Added { index } => println!("added {anchor} as bookmark {index}"),
                BookmarkToggle::Removed { index } => {
                    println!("removed {anchor} from bookmark {index}")
                }
            }
            Ok(())
        }
        Commands::Position { book, anchor } => {
            let mut store = ReadingStore::open(pool, &resolve_book(&config, &book))?;
            if store.record_position(&anchor)? {
                println!("position {anchor} recorded in {}", SlotPool::key_for(store.slot()));
            } else {
                println!("position unchanged");
            }
            Ok(())
        }
        Commands::Mark { html, find } => {
            let source =
                fs::read_to_string(&html).with_context(|| format!("failed to read {:?}", html))?;
            let block = html
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = link_notes(&source);
            let query = WordQuery::parse(&find);
            let (mut marked, index) = mark_blocks(&query, [(block.as_str(), source.as_str())])?;
            for (word_idx, word) in query.words().iter().enumerate() {
                info!(word = %word, count = index.count(word_idx), "word occurrences");
            }
            print!("{}", marked.pop().unwrap_or_default());
            Ok(())
        }
        Commands::Toc { layout } => {
            let layout = load_layout(&layout)?;
            match Toc::build(&layout.titles) {
                Some(toc) => println!("{}", toc_html(&toc)),
                None => info!("fewer than two titles, no table of contents"),
            }
            Ok(())
        }
    }
}

fn resolve_book(config: &ReaderConfig, book: &str) -> String {
    book_id_for_location(book, &config.route_prefix, &config.route_suffix)
}

fn load_layout(path: &Path) -> Result<PageLayout> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    PageLayout::from_json(&raw).with_context(|| format!("failed to decode layout {:?}", path))
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn run_reader(
    config: &ReaderConfig,
    pool: SlotPool,
    kv: Arc<dyn KeyValueStore>,
    layout_path: &Path,
    book: Option<&str>,
    find: Option<&str>,
) -> Result<()> {
    let layout = load_layout(layout_path)?;
    let book_id = match (book, layout.book.as_deref()) {
        (Some(book), _) => resolve_book(config, book),
        (None, Some(own)) => own.to_string(),
        (None, None) => book_id_for_path(layout_path),
    };

    let query = WordQuery::parse(find.unwrap_or_default());
    let (_, words) = mark_blocks(
        &query,
        layout
            .paragraphs
            .iter()
            .map(|b| (b.id.as_str(), b.text.as_str())),
    )?;
    let store = ReadingStore::open(pool, &book_id)?;
    info!(book = %book_id, slot = store.slot(), "opened reading state");
    let panel = WordPanel::load(kv)?;
    let mut reader = Reader::new(store, panel, layout, words, config.viewport_height);

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut mapper = EventMapper::new(config.scroll_step, config.viewport_height);
    let mut overlay: Option<TocWindow> = None;
    let mut recent: Vec<String> = Vec::new();
    let save_interval = config.save_interval();
    let mut last_tick = Instant::now();
    let mut dirty = true;

    loop {
        if event::poll(Duration::from_millis(100))? {
            let ui_event = mapper.map_event(event::read()?);
            match handle_event(ui_event, &mut reader, overlay.as_mut())? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }

        if last_tick.elapsed() >= save_interval {
            reader.tick()?;
            last_tick = Instant::now();
        }

        for ev in reader.drain_events() {
            if let ReaderEvent::TocVisibility { visible, current } = &ev {
                overlay = match (*visible, reader.toc()) {
                    (true, Some(toc)) => Some(TocWindow::new(toc, current.unwrap_or(0))),
                    _ => None,
                };
                mapper.set_mode(if overlay.is_some() {
                    InputMode::Toc
                } else {
                    InputMode::Normal
                });
            }
            recent.push(describe_event(&ev));
            dirty = true;
        }
        if recent.len() > RECENT_EVENTS {
            recent.drain(..recent.len() - RECENT_EVENTS);
        }

        if dirty {
            redraw(&mut stdout, &reader, overlay.as_mut(), &recent)?;
            dirty = false;
        }
    }

    reader.tick()?;
    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

const RECENT_EVENTS: usize = 5;

fn handle_event(
    event: UiEvent,
    reader: &mut Reader,
    overlay: Option<&mut TocWindow>,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(cmd) => {
            reader.apply(cmd)?;
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::TocMoveSelection { delta } => match overlay {
            Some(toc) => {
                if toc.move_selection(delta) {
                    Ok(LoopAction::ContinueRedraw)
                } else {
                    Ok(LoopAction::Continue)
                }
            }
            None => Ok(LoopAction::Continue),
        },
        UiEvent::TocActivateSelection => {
            let Some(anchor) = overlay.and_then(|toc| toc.selected_entry().map(|e| e.anchor.clone()))
            else {
                return Ok(LoopAction::Continue);
            };
            reader.apply(Command::CloseToc)?;
            reader.apply(Command::GotoAnchor { anchor })?;
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

struct TocWindow {
    entries: Vec<TocEntry>,
    selected: usize,
    scroll_offset: usize,
}

impl TocWindow {
    fn new(toc: &Toc, current: usize) -> Self {
        let entries = toc.entries().to_vec();
        let selected = current.min(entries.len().saturating_sub(1));
        Self {
            entries,
            selected,
            scroll_offset: 0,
        }
    }

    fn selected_entry(&self) -> Option<&TocEntry> {
        self.entries.get(self.selected)
    }

    fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.entries.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = self.entries.len().saturating_sub(viewport_height);
        if self.scroll_offset > max_offset {
            self.scroll_offset = max_offset;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
            return;
        }
        let bottom = self.scroll_offset + viewport_height;
        if self.selected >= bottom {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }
}

fn describe_event(event: &ReaderEvent) -> String {
    match event {
        ReaderEvent::ScrollTo { anchor } => format!("scrolled to #{anchor}"),
        ReaderEvent::Scrolled { offset } => format!("offset {offset}"),
        ReaderEvent::BookmarkAdded { anchor, index } => format!("bookmark {} on #{anchor}", index + 1),
        ReaderEvent::BookmarkRemoved { anchor, index } => {
            format!("bookmark {} removed from #{anchor}", index + 1)
        }
        ReaderEvent::WordHighlighted { span_id, block } => format!("{span_id} in #{block}"),
        ReaderEvent::WordPanelVisibility { visible } => {
            format!("word panel {}", if *visible { "shown" } else { "hidden" })
        }
        ReaderEvent::TocVisibility { visible, .. } => {
            format!("contents {}", if *visible { "open" } else { "closed" })
        }
        ReaderEvent::LocationReplaced { anchor } => format!("position saved at #{anchor}"),
        ReaderEvent::LocationPushed { anchor } => format!("left #{anchor}"),
    }
}

fn redraw(
    stdout: &mut io::Stdout,
    reader: &Reader,
    overlay: Option<&mut TocWindow>,
    recent: &[String],
) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let width = usize::from(cols.max(1));
    crossterm::queue!(stdout, Clear(ClearType::All))?;

    if let Some(toc) = overlay {
        let visible_rows = usize::from(rows.saturating_sub(2)).max(1);
        toc.ensure_visible(visible_rows);
        print_line(stdout, 0, "Contents (j/k, Enter, Esc)", width)?;
        for (row, (idx, entry)) in toc
            .entries
            .iter()
            .enumerate()
            .skip(toc.scroll_offset)
            .take(visible_rows)
            .enumerate()
        {
            let line = format!("{}{}", "  ".repeat(entry.level), entry.text);
            let y = (row + 1) as u16;
            if idx == toc.selected {
                print_inverted(stdout, y, &truncate_with_ellipsis(line, width))?;
            } else {
                print_line(stdout, y, &line, width)?;
            }
        }
        stdout.flush()?;
        return Ok(());
    }

    let state = reader.state();
    let centre = reader.closest_paragraph().unwrap_or_default();
    let preview = reader
        .layout()
        .paragraphs
        .iter()
        .find(|b| b.id == centre)
        .map(|b| b.text.replace('\n', " "))
        .unwrap_or_default();
    let bookmarks: Vec<String> = state
        .bookmarks
        .iter()
        .enumerate()
        .map(|(idx, slot)| {
            let label = slot.as_deref().unwrap_or("·");
            if idx == state.current {
                format!("[{}:{label}]", idx + 1)
            } else {
                format!("{}:{label}", idx + 1)
            }
        })
        .collect();

    let mut lines = vec![
        format!("book {}", state.id),
        format!(
            "offset {}/{}  at #{}  saved #{}",
            reader.offset(),
            reader.layout().height,
            centre,
            state.position
        ),
        format!("bookmarks {}", bookmarks.join(" ")),
        format!(
            "return point {}",
            state.auto_bookmark.as_deref().unwrap_or("-")
        ),
    ];
    if reader.word_panel_visible() && !reader.words().words().is_empty() {
        let words: Vec<String> = reader
            .words()
            .words()
            .iter()
            .enumerate()
            .map(|(idx, word)| format!("{}:{word}({})", idx + 1, reader.words().count(idx)))
            .collect();
        lines.push(format!("find {}", words.join(" ")));
    }
    lines.push(String::new());
    lines.push(preview);
    lines.push(String::new());
    lines.extend(recent.iter().cloned());

    for (row, line) in lines.iter().enumerate().take(usize::from(rows.saturating_sub(1))) {
        print_line(stdout, row as u16, line, width)?;
    }

    crossterm::queue!(stdout, cursor::MoveTo(0, rows.saturating_sub(1)))?;
    write_status_line(
        stdout,
        &truncate_with_ellipsis(
            "b mark  n/p next/prev  alt+N goto  g/G ends  alt+0 return  t contents  q quit"
                .to_string(),
            width,
        ),
    )?;
    Ok(())
}

fn print_line(writer: &mut impl Write, row: u16, content: &str, width: usize) -> Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, row),
        Print(truncate_with_ellipsis(content.to_string(), width))
    )?;
    Ok(())
}

fn print_inverted(writer: &mut impl Write, row: u16, content: &str) -> Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn truncate_with_ellipsis(mut text: String, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if text.chars().count() <= width {
        return text;
    }
    if width == 1 {
        return "…".to_string();
    }
    let cut = text
        .char_indices()
        .nth(width - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text.truncate(cut);
    text.push('…');
    text
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<Option<WorkerGuard>> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    let (file_layer, guard) = match fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::never(&log_dir, "readmark.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    if guard.is_none() {
        warn!(dir = ?log_dir, "log directory unavailable, file logging disabled");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    use readmark_core::Title;

    fn toc(count: usize) -> Toc {
        let titles: Vec<Title> = (0..count)
            .map(|i| Title {
                id: format!("title-{i}"),
                top: i as u32 * 10,
                depth: 2,
                text: format!("Chapter {i}"),
            })
            .collect();
        Toc::build(&titles).unwrap()
    }

    #[test]
    fn toc_window_clamps_selection() {
        let mut window = TocWindow::new(&toc(3), 7);
        assert_eq!(window.selected, 2);
        assert!(!window.move_selection(1));
        assert!(window.move_selection(-5));
        assert_eq!(window.selected_entry().unwrap().anchor, "title-0");
    }

    #[test]
    fn toc_window_scrolls_selection_into_view() {
        let mut window = TocWindow::new(&toc(20), 15);
        window.ensure_visible(5);
        assert_eq!(window.scroll_offset, 11);
        window.move_selection(-14);
        window.ensure_visible(5);
        assert_eq!(window.scroll_offset, 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_with_ellipsis("short".into(), 10), "short");
        assert_eq!(truncate_with_ellipsis("ёжик в тумане".into(), 5), "ёжик…");
        assert_eq!(truncate_with_ellipsis("abc".into(), 1), "…");
    }

    #[test]
    fn events_have_readable_descriptions() {
        assert_eq!(
            describe_event(&ReaderEvent::BookmarkAdded {
                anchor: "_p3".into(),
                index: 0
            }),
            "bookmark 1 on #_p3"
        );
        assert_eq!(
            describe_event(&ReaderEvent::LocationReplaced {
                anchor: "_p9".into()
            }),
            "position saved at #_p9"
        );
    }
}
