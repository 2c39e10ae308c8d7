use std::collections::HashSet;

use derive_setters::Setters;
use thiserror::Error;
use tracing::trace;

/// Edge a column is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fixed {
    Left,
    #[default]
    None,
    Right,
}

impl Fixed {
    // Rendering segment: left edge first, right edge last.
    fn segment(&self) -> u8 {
        match self {
            Fixed::Left => 0,
            Fixed::None => 1,
            Fixed::Right => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Setters)]
#[setters(into)]
pub struct Column {
    pub label: String,
    /// Unique key of the column, also the key of the row cells it renders.
    pub value: String,
    pub show: bool,
    pub hide_in_setting: bool,
    #[setters(strip_option)]
    pub width: Option<u16>,
    pub fixed: Fixed,
    pub lock: bool,
    pub ellipsis: bool,
    #[setters(skip)]
    original_index: usize,
    #[setters(skip)]
    default_show: bool,
}

impl Column {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            show: true,
            hide_in_setting: false,
            width: None,
            fixed: Fixed::None,
            lock: false,
            ellipsis: true,
            original_index: 0,
            default_show: true,
        }
    }

    pub fn original_index(&self) -> usize {
        self.original_index
    }

    // Only unlocked, unpinned columns take part in reordering.
    fn is_movable(&self) -> bool {
        !self.lock && self.fixed == Fixed::None
    }
}

/// Result of an operation that may be intentionally ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Applied,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("duplicate column key '{0}'")]
    DuplicateKey(String),
}

/// Ordered, visibility tracked list of table columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRegistry {
    columns: Vec<Column>,
}

impl ColumnRegistry {
    pub fn new(columns: Vec<Column>) -> Result<Self, ColumnError> {
        let mut seen = HashSet::new();
        let mut registered = Vec::with_capacity(columns.len());
        for (idx, mut column) in columns.into_iter().enumerate() {
            if !seen.insert(column.value.clone()) {
                return Err(ColumnError::DuplicateKey(column.value));
            }
            column.original_index = idx;
            column.default_show = column.show;
            registered.push(column);
        }
        Ok(Self {
            columns: registered,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.value == key)
    }

    fn position(&self, key: &str) -> Result<usize, ColumnError> {
        self.columns
            .iter()
            .position(|c| c.value == key)
            .ok_or_else(|| ColumnError::UnknownColumn(key.to_string()))
    }

    /// All columns in registry order, as listed in the settings panel.
    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn settings_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| !c.hide_in_setting).collect()
    }

    /// Columns to render: fixed left, then unfixed, then fixed right.
    /// Registry order is kept inside each segment.
    pub fn visible(&self) -> Vec<&Column> {
        let mut visible: Vec<&Column> = self.columns.iter().filter(|c| c.show).collect();
        // Stable sort, so the user order of the middle segment survives.
        visible.sort_by_key(|c| c.fixed.segment());
        visible
    }

    pub fn toggle_show(&mut self, key: &str) -> Result<Change, ColumnError> {
        let idx = self.position(key)?;
        let column = &mut self.columns[idx];
        if column.lock {
            trace!("Column {} is locked, ignoring toggle", key);
            return Ok(Change::NoOp);
        }
        column.show = !column.show;
        trace!("Column {} show={}", key, column.show);
        Ok(Change::Applied)
    }

    /// Moves a column to `new_position` among the movable columns.
    /// Positions past the end are clamped to the last slot.
    pub fn reorder(&mut self, key: &str, new_position: usize) -> Result<Change, ColumnError> {
        let idx = self.position(key)?;
        if !self.columns[idx].is_movable() {
            trace!("Column {} is fixed or locked, ignoring reorder", key);
            return Ok(Change::NoOp);
        }

        let slots: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_movable())
            .map(|(i, _)| i)
            .collect();
        let from = slots.iter().position(|&s| s == idx).unwrap_or(0);
        let to = new_position.min(slots.len() - 1);
        if from == to {
            return Ok(Change::NoOp);
        }

        let mut movable: Vec<Column> = slots.iter().map(|&s| self.columns[s].clone()).collect();
        let column = movable.remove(from);
        movable.insert(to, column);
        for (slot, column) in slots.into_iter().zip(movable) {
            self.columns[slot] = column;
        }
        trace!("Moved column {} from {} to {}", key, from, to);
        Ok(Change::Applied)
    }

    /// Position of a column among the movable columns, if it is movable.
    pub fn movable_position(&self, key: &str) -> Option<usize> {
        self.columns
            .iter()
            .filter(|c| c.is_movable())
            .position(|c| c.value == key)
    }

    pub fn reset_to_default(&mut self) {
        self.columns.sort_by_key(|c| c.original_index);
        for column in self.columns.iter_mut() {
            column.show = column.default_show;
        }
        trace!("Columns reset to default");
    }
}
