use std::io::{self, Write};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use readmark_core::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(Command),
    TocMoveSelection { delta: isize },
    TocActivateSelection,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Toc,
}

#[derive(Debug)]
pub struct EventMapper {
    mode: InputMode,
    scroll_step: u32,
    page_step: u32,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SCROLL_STEP, Self::DEFAULT_PAGE_STEP)
    }
}

impl EventMapper {
    pub const DEFAULT_SCROLL_STEP: u32 = 4;
    pub const DEFAULT_PAGE_STEP: u32 = 40;

    pub fn new(scroll_step: u32, page_step: u32) -> Self {
        Self {
            mode: InputMode::Normal,
            scroll_step: scroll_step.max(1),
            page_step: page_step.max(1),
        }
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Toc => self.map_key_toc(key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        let alt = modifiers.contains(KeyModifiers::ALT);
        let ctrl = modifiers.contains(KeyModifiers::CONTROL);
        let command = match code {
            KeyCode::Char('0') if alt => Command::GotoAutoBookmark,
            KeyCode::Char('0') => Command::ToggleWordPanel,
            KeyCode::Char(c @ '1'..='9') => {
                let slot = c as usize - '1' as usize;
                if alt {
                    Command::GotoBookmark { index: slot }
                } else if ctrl {
                    Command::PrevWord { word: slot }
                } else {
                    Command::NextWord { word: slot }
                }
            }
            KeyCode::Char('t') | KeyCode::Char('T') => Command::ToggleToc,
            KeyCode::Esc => Command::CloseToc,
            KeyCode::Char('b') if !ctrl && !alt => Command::ToggleBookmark { anchor: None },
            KeyCode::Char('k') if ctrl => Command::ToggleBookmark { anchor: None },
            KeyCode::Char('p') if !ctrl && !alt => Command::PrevBookmark,
            KeyCode::Char('n') if !ctrl && !alt => Command::NextBookmark,
            KeyCode::Char('g') if !ctrl && !alt => Command::JumpHome,
            KeyCode::Char('G') if !ctrl && !alt => Command::JumpEnd,
            KeyCode::Home => Command::JumpHome,
            KeyCode::End => Command::JumpEnd,
            KeyCode::Char('j') | KeyCode::Down => self.scroll(1, self.scroll_step),
            KeyCode::Char('k') | KeyCode::Up => self.scroll(-1, self.scroll_step),
            KeyCode::PageDown | KeyCode::Char(' ') => self.scroll(1, self.page_step),
            KeyCode::PageUp => self.scroll(-1, self.page_step),
            KeyCode::Char('q') => return UiEvent::Quit,
            _ => return UiEvent::None,
        };
        UiEvent::Command(command)
    }

    fn map_key_toc(&mut self, key: KeyEvent) -> UiEvent {
        match key.code {
            KeyCode::Esc | KeyCode::Char('t') | KeyCode::Char('T') => {
                UiEvent::Command(Command::CloseToc)
            }
            KeyCode::Enter => UiEvent::TocActivateSelection,
            KeyCode::Char('j') | KeyCode::Down => UiEvent::TocMoveSelection { delta: 1 },
            KeyCode::Char('k') | KeyCode::Up => UiEvent::TocMoveSelection { delta: -1 },
            KeyCode::Char('q') => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn scroll(&self, direction: i64, step: u32) -> Command {
        Command::Scroll {
            delta: direction * i64::from(step),
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
