use std::time::Duration;
use tracing::trace;

use crate::domain::{AppConfig, AppError, Message};
use crate::model::{Modus, Model};
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, AppError> {
        if !event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                if model.raw_keyevents() {
                    return Ok(Some(Message::RawKey(key)));
                }
                Ok(self.handle_key(key, model.modus()))
            }
            Event::Resize(width, height) => {
                Ok(Some(Message::Resize(width as usize, height as usize)))
            }
            _ => Ok(None),
        }
    }

    fn handle_key(&self, key: KeyEvent, modus: Modus) -> Option<Message> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(Message::Quit),
                _ => None,
            };
        }
        let message = match (modus, key.code) {
            (_, KeyCode::Up | KeyCode::Char('k')) => Some(Message::MoveUp),
            (_, KeyCode::Down | KeyCode::Char('j')) => Some(Message::MoveDown),
            (_, KeyCode::Enter) => Some(Message::Enter),
            (_, KeyCode::Esc) => Some(Message::Exit),
            (_, KeyCode::Char('?')) => Some(Message::Help),
            (_, KeyCode::Backspace) => Some(Message::ClearLastFilter),

            (Modus::Table, KeyCode::Char('q')) => Some(Message::Quit),
            (Modus::Table, KeyCode::Left | KeyCode::Char('h')) => Some(Message::MoveLeft),
            (Modus::Table, KeyCode::Right | KeyCode::Char('l')) => Some(Message::MoveRight),
            (Modus::Table, KeyCode::PageDown | KeyCode::Char('n')) => Some(Message::NextPage),
            (Modus::Table, KeyCode::PageUp | KeyCode::Char('p')) => Some(Message::PrevPage),
            (Modus::Table, KeyCode::Home | KeyCode::Char('g')) => Some(Message::FirstPage),
            (Modus::Table, KeyCode::End | KeyCode::Char('G')) => Some(Message::LastPage),
            (Modus::Table, KeyCode::Char('s')) => Some(Message::CyclePageSize),
            (Modus::Table, KeyCode::Char('r')) => Some(Message::Refresh),
            (Modus::Table, KeyCode::Char('/')) => Some(Message::QuickSearch),
            (Modus::Table | Modus::Filters, KeyCode::Char('f')) => Some(Message::OpenFilters),
            (Modus::Table | Modus::Columns, KeyCode::Char('c')) => Some(Message::OpenColumns),
            (Modus::Table, KeyCode::Char('x')) => Some(Message::ClearFilters),
            (Modus::Table, KeyCode::Char('y')) => Some(Message::CopyRow),

            (Modus::Columns | Modus::Editor, KeyCode::Char(' ')) => Some(Message::ToggleSelected),
            (Modus::Columns, KeyCode::Char('K')) => Some(Message::MoveColumnUp),
            (Modus::Columns, KeyCode::Char('J')) => Some(Message::MoveColumnDown),
            (Modus::Columns, KeyCode::Char('R')) => Some(Message::ResetColumns),
            (Modus::Columns, KeyCode::Char('/')) => Some(Message::SearchColumns),

            (Modus::Filters, KeyCode::Char('a')) => Some(Message::ApplyFilters),
            (Modus::Popup, KeyCode::Char('q')) => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
