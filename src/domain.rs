use std::io::Error;
use std::sync::Arc;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use thiserror::Error;

use crate::columns::ColumnError;
use crate::filters::{FilterError, SelectOption};
use crate::pagination::{DEFAULT_PAGE_SIZE, PAGE_SIZES};
use crate::search::{OptionPage, OptionRequest};
use crate::source::Page;

/// Failure reported by a data-fetch or option-loader collaborator.
///
/// Cloneable so a single failed load can be handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LoadError(pub String);

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        LoadError(message.into())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("io error: {0}")]
    IoError(#[from] Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("loading failed: {0}")]
    LoadingFailed(String),
    #[error("file not found")]
    FileNotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unknown file type")]
    UnknownFileType,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

#[derive(Debug, Clone, Setters)]
pub struct AppConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub page_sizes: Vec<usize>,
    pub default_page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            max_column_width: 32,
            page_sizes: PAGE_SIZES.to_vec(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    CyclePageSize,
    QuickSearch,
    OpenFilters,
    OpenColumns,
    ClearFilters,
    ClearLastFilter,
    ToggleSelected,
    MoveColumnUp,
    MoveColumnDown,
    ResetColumns,
    SearchColumns,
    ApplyFilters,
    Refresh,
    CopyRow,
    Help,
    Enter,
    Exit,
    Resize(usize, usize),
    RawKey(KeyEvent),
    PageLoaded {
        ticket: u64,
        result: Result<Page, LoadError>,
    },
    OptionsLoaded {
        request: OptionRequest,
        result: Result<OptionPage, LoadError>,
    },
    ChildrenLoaded {
        field: String,
        parent: String,
        result: Result<Arc<Vec<SelectOption>>, LoadError>,
    },
}

pub const HELP_TEXT: &str = "\
Table
  j/k, Up/Down    move row        h/l, Left/Right  move column
  n/p, PgDn/PgUp  next/prev page  g/G              first/last page
  s               cycle page size r                refresh
  /               quick search    f                filter panel
  Backspace       clear last chip x                clear all filters
  c               column settings y                copy row
  ?               help            q                quit

Column settings
  Space toggle  K/J move up/down  R reset  / find column
  Enter keep changes  Esc discard changes

Filter panel
  Enter edit field  Backspace clear field  a apply  Esc close

Option lists
  Space toggle (multi)  Enter confirm  Esc cancel

Date ranges
  Pick a preset, or \"Custom range ...\" to type both ends.
  Dates are YYYY-MM-DD or YYYY-MM-DD HH:MM:SS; leave an end empty to keep it open.";
