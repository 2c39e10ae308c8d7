use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use arboard::Clipboard;
use chrono::{Local, NaiveDateTime};
use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, info, trace, warn};

use crate::cascade::EntryState;
use crate::columns::{Change, Column, ColumnRegistry};
use crate::daterange::{self, DATETIME_FORMAT, DateTimeRange, PRESETS};
use crate::domain::{AppError, HELP_TEXT, LoadError, Message};
use crate::filters::{
    CascadeValue, FieldValue, FilterKind, FilterOption, FilterValue, OptionValue, SelectOption,
};
use crate::inputter::{InputResult, Inputter};
use crate::search::{LoadState, OptionPage, OptionRequest};
use crate::source::{DataSource, Page};
use crate::table::{AdvancedTable, FetchOutcome, FetchRequest};
use crate::toolbar::{self, ActionKey, ToolbarContext};

#[derive(Debug, PartialEq)]
pub enum Status {
    Ready,
    Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modus {
    Table,
    Columns,
    Filters,
    Editor,
    Popup,
}

/// Where an edited filter value goes: straight into the filters, or into the
/// advanced panel draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Quick,
    Panel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorStage {
    Text,
    Options { selected: BTreeSet<OptionValue> },
    Presets,
    /// Typing the bounds of a custom date range.
    RangeFrom,
    RangeTo { from: Option<NaiveDateTime> },
    /// Picking the first level when `level1` is unset, its children otherwise.
    Cascade { level1: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Editor {
    pub key: String,
    pub label: String,
    pub kind: FilterKind,
    pub origin: Origin,
    pub cursor: usize,
    pub stage: EditorStage,
}

/// One line of an editor option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorItem {
    pub label: String,
    pub value: Option<OptionValue>,
    pub depth: usize,
    pub checked: bool,
}

pub struct Model {
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    table: AdvancedTable,
    source: Arc<dyn DataSource>,
    sender: Sender<Message>,
    clipboard: Option<Clipboard>,
    input: Inputter,
    last_input: InputResult,
    editor: Option<Editor>,
    draft: Vec<FilterValue>,
    cursor_row: usize,
    cursor_column: usize,
    settings_cursor: usize,
    // registry as it was when the column settings opened
    column_backup: Option<ColumnRegistry>,
    column_query: String,
    column_searching: bool,
    panel_cursor: usize,
    popup_message: String,
    status_message: String,
    width: usize,
    height: usize,
}

impl Model {
    pub fn init(
        table: AdvancedTable,
        source: Arc<dyn DataSource>,
        sender: Sender<Message>,
    ) -> Self {
        let clipboard = match Clipboard::new() {
            Ok(clipboard) => Some(clipboard),
            Err(e) => {
                warn!("Clipboard unavailable: {}", e);
                None
            }
        };
        let mut model = Self {
            status: Status::Ready,
            modus: Modus::Table,
            previous_modus: Modus::Table,
            table,
            source,
            sender,
            clipboard,
            input: Inputter::default(),
            last_input: InputResult::default(),
            editor: None,
            draft: Vec::new(),
            cursor_row: 0,
            cursor_column: 0,
            settings_cursor: 0,
            column_backup: None,
            column_query: String::new(),
            column_searching: false,
            panel_cursor: 0,
            popup_message: String::new(),
            status_message: String::new(),
            width: 0,
            height: 0,
        };
        model.set_status_message("Loading ...");
        let request = model.table.refresh();
        model.dispatch_fetch(request);
        model
    }

    // -------------------- Accessors for rendering ---------------------- //

    pub fn table(&self) -> &AdvancedTable {
        &self.table
    }

    pub fn modus(&self) -> Modus {
        self.modus
    }

    pub fn editor(&self) -> Option<&Editor> {
        self.editor.as_ref()
    }

    pub fn draft(&self) -> &[FilterValue] {
        &self.draft
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_column)
    }

    pub fn settings_cursor(&self) -> usize {
        self.settings_cursor
    }

    pub fn panel_cursor(&self) -> usize {
        self.panel_cursor
    }

    pub fn popup_message(&self) -> &str {
        &self.popup_message
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn input(&self) -> &InputResult {
        &self.last_input
    }

    /// Whether the open editor writes into the filter panel draft.
    pub fn editing_draft(&self) -> bool {
        self.editor
            .as_ref()
            .is_some_and(|e| e.origin == Origin::Panel)
    }

    pub fn column_query(&self) -> &str {
        &self.column_query
    }

    /// Columns of the settings panel that match the column search.
    pub fn listed_columns(&self) -> Vec<&Column> {
        let query = self.column_query.to_lowercase();
        self.table
            .columns()
            .settings_columns()
            .into_iter()
            .filter(|c| {
                query.is_empty()
                    || c.label.to_lowercase().contains(&query)
                    || c.value.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Keys are passed through unmapped while text is typed.
    pub fn raw_keyevents(&self) -> bool {
        match self.modus {
            Modus::Editor => self.editor.as_ref().is_some_and(|e| {
                matches!(
                    e.stage,
                    EditorStage::Text | EditorStage::RangeFrom | EditorStage::RangeTo { .. }
                )
            }),
            Modus::Columns => self.column_searching,
            _ => false,
        }
    }

    /// Label and placeholder of the text being typed.
    pub fn input_prompt(&self) -> (String, String) {
        if self.modus == Modus::Columns {
            return ("Find column".to_string(), "label or key".to_string());
        }
        let Some(editor) = self.editor.as_ref() else {
            return (String::new(), String::new());
        };
        let placeholder = self
            .table
            .search()
            .filters()
            .field(&editor.key)
            .and_then(|f| f.placeholder.clone());
        match editor.stage {
            EditorStage::RangeFrom | EditorStage::RangeTo { .. } => {
                let side = if editor.stage == EditorStage::RangeFrom {
                    "from"
                } else {
                    "to"
                };
                (
                    format!("{} {side}", editor.label),
                    placeholder.unwrap_or_else(|| "YYYY-MM-DD [HH:MM:SS], empty for open".to_string()),
                )
            }
            _ => (editor.label.clone(), placeholder.unwrap_or_default()),
        }
    }

    pub fn toolbar_context(&self) -> ToolbarContext {
        let filters = self.table.search().filters();
        ToolbarContext {
            has_filters: !filters.active().is_empty(),
            has_text_field: self.quick_field().is_some(),
            has_rows: !self.table.rows().is_empty(),
            clipboard: self.clipboard.is_some(),
            loading: self.table.is_loading(),
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    // -------------------- Background work ---------------------- //

    fn dispatch_fetch(&self, request: FetchRequest) {
        debug!("Dispatching fetch #{}", request.ticket);
        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        rayon::spawn(move || {
            let result = source.fetch(request.filters.filters(), request.page, request.page_size);
            let message = Message::PageLoaded {
                ticket: request.ticket,
                result,
            };
            if sender.send(message).is_err() {
                trace!("Event loop gone, dropping fetch #{}", request.ticket);
            }
        });
    }

    fn dispatch_options(&self, request: OptionRequest) {
        let loader = self.table.search().loader();
        let sender = self.sender.clone();
        rayon::spawn(move || {
            let result = request.run(loader.as_ref());
            if sender.send(Message::OptionsLoaded { request, result }).is_err() {
                trace!("Event loop gone, dropping options");
            }
        });
    }

    fn dispatch_children(&self, field: &str, parent: &str) {
        let Some(resolver) = self.table.search().resolver(field) else {
            return;
        };
        let sender = self.sender.clone();
        let (field, parent) = (field.to_string(), parent.to_string());
        rayon::spawn(move || {
            let result = resolver.select(&parent);
            if sender
                .send(Message::ChildrenLoaded {
                    field,
                    parent,
                    result,
                })
                .is_err()
            {
                trace!("Event loop gone, dropping children");
            }
        });
    }

    fn dispatch(&mut self, request: Option<FetchRequest>) {
        if let Some(request) = request {
            self.dispatch_fetch(request);
        }
    }

    // -------------------- Message handling ---------------------- //

    pub fn update(&mut self, message: Option<Message>) -> Result<(), AppError> {
        let Some(msg) = message else {
            return Ok(());
        };
        match msg {
            Message::PageLoaded { ticket, result } => self.page_loaded(ticket, result),
            Message::OptionsLoaded { request, result } => self.options_loaded(request, result),
            Message::ChildrenLoaded {
                field,
                parent,
                result,
            } => self.children_loaded(&field, &parent, result),
            Message::Quit => self.quit(),
            Message::Resize(width, height) => self.ui_resize(width, height),
            msg => match self.modus {
                Modus::Table => self.update_table(msg),
                Modus::Columns => self.update_columns(msg),
                Modus::Filters => self.update_filters(msg),
                Modus::Editor => self.update_editor(msg)?,
                Modus::Popup => {
                    if matches!(msg, Message::Exit | Message::Enter | Message::Help) {
                        self.modus = self.previous_modus;
                    }
                }
            },
        }
        Ok(())
    }

    fn update_table(&mut self, msg: Message) {
        match msg {
            Message::MoveUp => self.cursor_row = self.cursor_row.saturating_sub(1),
            Message::MoveDown => {
                if self.cursor_row + 1 < self.table.rows().len() {
                    self.cursor_row += 1;
                }
            }
            Message::MoveLeft => self.cursor_column = self.cursor_column.saturating_sub(1),
            Message::MoveRight => {
                if self.cursor_column + 1 < self.table.columns().visible().len() {
                    self.cursor_column += 1;
                }
            }
            Message::NextPage => {
                let request = self.table.next_page();
                self.dispatch(request);
            }
            Message::PrevPage => {
                let request = self.table.prev_page();
                self.dispatch(request);
            }
            Message::FirstPage => {
                let request = self.table.first_page();
                self.dispatch(request);
            }
            Message::LastPage => {
                let request = self.table.last_page();
                self.dispatch(request);
            }
            Message::CyclePageSize => {
                let request = self.table.cycle_page_size();
                let message = format!("{} rows per page", request.page_size);
                self.set_status_message(message);
                self.dispatch_fetch(request);
            }
            Message::QuickSearch => self.quick_search(),
            Message::OpenFilters => self.open_filter_panel(),
            Message::OpenColumns => self.open_columns(),
            Message::ClearFilters => match self.table.clear_all_filters() {
                Some(request) => {
                    self.set_status_message("Cleared all filters");
                    self.dispatch_fetch(request);
                }
                None => self.set_status_message("No active filters"),
            },
            Message::ClearLastFilter => {
                let last = self
                    .table
                    .search()
                    .filters()
                    .active()
                    .last()
                    .map(|a| a.key.clone());
                if let Some(key) = last {
                    let request = self.table.clear_filter(&key);
                    self.dispatch(request);
                }
            }
            Message::Refresh => {
                if toolbar::is_enabled(self.toolbar_context(), ActionKey::Refresh) {
                    let request = self.table.refresh();
                    self.dispatch_fetch(request);
                }
            }
            Message::CopyRow => self.copy_row(),
            Message::Help => self.show_help(),
            _ => (),
        }
    }

    fn open_columns(&mut self) {
        self.column_backup = Some(self.table.columns().clone());
        self.column_query.clear();
        self.column_searching = false;
        self.settings_cursor = 0;
        self.modus = Modus::Columns;
    }

    fn close_columns(&mut self, keep: bool) {
        if let Some(backup) = self.column_backup.take()
            && !keep
            && &backup != self.table.columns()
        {
            *self.table.columns_mut() = backup;
            self.set_status_message("Column changes discarded");
        }
        self.column_query.clear();
        self.clamp_cursor();
        self.modus = Modus::Table;
    }

    fn column_search_input(&mut self, key: KeyEvent) {
        self.last_input = self.input.read(key);
        if self.last_input.canceled {
            self.column_query.clear();
        } else {
            self.column_query = self.last_input.input.clone();
        }
        if self.last_input.finished {
            self.column_searching = false;
        }
        self.settings_cursor = 0;
    }

    fn update_columns(&mut self, msg: Message) {
        match msg {
            Message::RawKey(key) => return self.column_search_input(key),
            Message::Exit => return self.close_columns(false),
            Message::Enter | Message::OpenColumns => return self.close_columns(true),
            Message::SearchColumns => {
                self.input.clear();
                self.input.set(&self.column_query);
                self.last_input = self.input.get();
                self.column_searching = true;
                return;
            }
            Message::ResetColumns => {
                self.table.columns_mut().reset_to_default();
                self.settings_cursor = 0;
                self.clamp_cursor();
                self.set_status_message("Columns reset");
                return;
            }
            Message::Help => return self.show_help(),
            _ => (),
        }
        let keys: Vec<String> = self
            .listed_columns()
            .iter()
            .map(|c| c.value.clone())
            .collect();
        let Some(key) = keys.get(self.settings_cursor).cloned() else {
            return;
        };
        match msg {
            Message::MoveUp => self.settings_cursor = self.settings_cursor.saturating_sub(1),
            Message::MoveDown => {
                self.settings_cursor = (self.settings_cursor + 1).min(keys.len() - 1)
            }
            Message::ToggleSelected => match self.table.columns_mut().toggle_show(&key) {
                Ok(Change::NoOp) => self.set_status_message(format!("{key} is locked")),
                Ok(Change::Applied) => self.clamp_cursor(),
                Err(e) => warn!("{}", e),
            },
            Message::MoveColumnUp | Message::MoveColumnDown => {
                let Some(position) = self.table.columns().movable_position(&key) else {
                    self.set_status_message(format!("{key} is fixed"));
                    return;
                };
                let target = if matches!(msg, Message::MoveColumnUp) {
                    position.saturating_sub(1)
                } else {
                    position + 1
                };
                if let Ok(Change::Applied) = self.table.columns_mut().reorder(&key, target) {
                    let idx = self.listed_columns().iter().position(|c| c.value == key);
                    self.settings_cursor = idx.unwrap_or(self.settings_cursor);
                }
            }
            _ => (),
        }
    }

    fn update_filters(&mut self, msg: Message) {
        let fields = self.table.search().filters().schema().len();
        match msg {
            Message::MoveUp => self.panel_cursor = self.panel_cursor.saturating_sub(1),
            Message::MoveDown => {
                self.panel_cursor = (self.panel_cursor + 1).min(fields.saturating_sub(1))
            }
            Message::Enter => {
                if let Some(field) = self.table.search().filters().schema().get(self.panel_cursor) {
                    let field = field.clone();
                    self.open_editor(&field, Origin::Panel);
                }
            }
            Message::ClearLastFilter => {
                if let Some(entry) = self.draft.get_mut(self.panel_cursor) {
                    entry.value = FieldValue::empty(entry.value.kind());
                }
            }
            Message::ApplyFilters => {
                let draft = std::mem::take(&mut self.draft);
                match self.table.apply_advanced(draft) {
                    Ok(request) => {
                        self.dispatch_fetch(request);
                        self.modus = Modus::Table;
                    }
                    Err(e) => self.set_status_message(e.to_string()),
                }
            }
            Message::Exit | Message::OpenFilters => self.modus = Modus::Table,
            Message::Help => self.show_help(),
            _ => (),
        }
    }

    fn update_editor(&mut self, msg: Message) -> Result<(), AppError> {
        if let Message::RawKey(key) = msg {
            return self.raw_input(key);
        }
        let items = self.editor_items();
        let Some(editor) = self.editor.as_ref() else {
            self.modus = Modus::Table;
            return Ok(());
        };
        let stage = editor.stage.clone();
        let (key, cursor) = (editor.key.clone(), editor.cursor);
        match msg {
            Message::MoveUp => self.move_editor_cursor(-1, items.len()),
            Message::MoveDown => {
                self.move_editor_cursor(1, items.len());
                if cursor + 1 >= items.len() {
                    self.request_more_options(&key);
                }
            }
            Message::ToggleSelected => {
                if let EditorStage::Options { .. } = stage {
                    self.toggle_option(&items, cursor);
                }
            }
            Message::Enter => self.confirm_editor(&items, cursor)?,
            Message::Exit => self.cancel_editor(),
            _ => (),
        }
        Ok(())
    }

    fn raw_input(&mut self, key: KeyEvent) -> Result<(), AppError> {
        self.last_input = self.input.read(key);
        if !self.last_input.finished {
            return Ok(());
        }
        let Some(editor) = self.editor.as_ref() else {
            self.modus = Modus::Table;
            return Ok(());
        };
        let (stage, key, origin) = (editor.stage.clone(), editor.key.clone(), editor.origin);
        let text = self.last_input.input.clone();
        let canceled = self.last_input.canceled;
        match stage {
            // Back to the presets, with the custom entry selected.
            EditorStage::RangeFrom | EditorStage::RangeTo { .. } if canceled => {
                self.set_editor_stage(EditorStage::Presets, PRESETS.len());
            }
            _ if canceled => self.close_editor(),
            EditorStage::RangeFrom => match daterange::parse_bound(&text, false) {
                Ok(from) => {
                    let to = self.current_range(&key, origin).and_then(|r| r.to);
                    self.begin_input(&format_bound(to));
                    self.set_editor_stage(EditorStage::RangeTo { from }, 0);
                }
                Err(e) => self.retry_input(&text, e.to_string()),
            },
            EditorStage::RangeTo { from } => {
                match daterange::parse_bound(&text, true)
                    .and_then(|to| DateTimeRange::checked(from, to))
                {
                    Ok(range) => return self.finish_editor(FieldValue::DateTimeRange(range)),
                    Err(e) => self.retry_input(&text, e.to_string()),
                }
            }
            _ => return self.finish_editor(FieldValue::Text(text)),
        }
        Ok(())
    }

    fn begin_input(&mut self, text: &str) {
        self.input.clear();
        self.input.set(text);
        self.last_input = self.input.get();
    }

    // Keeps the rejected text in the input so it can be corrected.
    fn retry_input(&mut self, text: &str, message: String) {
        self.set_status_message(message);
        self.begin_input(text);
    }

    fn set_editor_stage(&mut self, stage: EditorStage, cursor: usize) {
        if let Some(editor) = self.editor.as_mut() {
            editor.stage = stage;
            editor.cursor = cursor;
        }
    }

    // -------------------- Worker results ---------------------- //

    fn page_loaded(&mut self, ticket: u64, result: Result<Page, LoadError>) {
        match self.table.complete_fetch(ticket, result) {
            FetchOutcome::Applied => {
                self.clamp_cursor();
                let pagination = self.table.pagination();
                let message = format!(
                    "Page {}/{} · {} rows",
                    pagination.page(),
                    pagination.total_pages(),
                    pagination.total()
                );
                self.set_status_message(message);
            }
            FetchOutcome::Failed(e) => self.set_status_message(format!("Loading failed: {e}")),
            FetchOutcome::Stale => trace!("Ignored stale page #{}", ticket),
        }
    }

    fn options_loaded(&mut self, request: OptionRequest, result: Result<OptionPage, LoadError>) {
        if let Err(e) = &result {
            self.set_status_message(format!("Loading {} failed: {e}", request.field.label));
        }
        self.table.search_mut().receive(&request, result);
    }

    fn children_loaded(
        &mut self,
        field: &str,
        parent: &str,
        result: Result<Arc<Vec<SelectOption>>, LoadError>,
    ) {
        match result {
            Ok(children) => {
                trace!("{} children for {}", children.len(), parent);
                self.table.search_mut().children_loaded(field, parent, &children);
            }
            Err(e) => {
                self.set_status_message(format!("Loading {parent} failed: {e}"));
                // Back to the first level so the parent can be picked again.
                if let Some(editor) = self.editor.as_mut()
                    && editor.key == field
                    && editor.stage
                        == (EditorStage::Cascade {
                            level1: Some(parent.to_string()),
                        })
                {
                    editor.stage = EditorStage::Cascade { level1: None };
                    editor.cursor = 0;
                }
            }
        }
    }

    // -------------------- Filter editing ---------------------- //

    fn quick_field(&self) -> Option<&FilterOption> {
        self.table
            .search()
            .filters()
            .schema()
            .iter()
            .find(|f| f.kind == FilterKind::Text)
    }

    fn quick_search(&mut self) {
        match self.quick_field().cloned() {
            Some(field) => self.open_editor(&field, Origin::Quick),
            None => self.set_status_message("No text filter configured"),
        }
    }

    fn open_filter_panel(&mut self) {
        let filters = self.table.search().filters();
        self.draft = filters
            .schema()
            .iter()
            .map(|field| {
                let value = filters
                    .active_value(&field.value)
                    .cloned()
                    .unwrap_or_else(|| FieldValue::empty(field.kind));
                FilterValue::new(field.value.clone(), value)
            })
            .collect();
        self.panel_cursor = self.panel_cursor.min(self.draft.len().saturating_sub(1));
        self.modus = Modus::Filters;
    }

    // Value the editor starts from.
    fn current_value(&self, key: &str, origin: Origin) -> Option<FieldValue> {
        match origin {
            Origin::Panel => self
                .draft
                .iter()
                .find(|f| f.key == key)
                .map(|f| f.value.clone()),
            Origin::Quick => self.table.search().filters().active_value(key).cloned(),
        }
    }

    fn current_range(&self, key: &str, origin: Origin) -> Option<DateTimeRange> {
        match self.current_value(key, origin) {
            Some(FieldValue::DateTimeRange(range)) => Some(range),
            _ => None,
        }
    }

    fn open_editor(&mut self, field: &FilterOption, origin: Origin) {
        trace!("Editing {} ({})", field.value, field.kind);
        let current = self.current_value(&field.value, origin);
        let stage = match field.kind {
            FilterKind::Text => {
                let text = match &current {
                    Some(FieldValue::Text(text)) => text.clone(),
                    _ => String::new(),
                };
                self.begin_input(&text);
                EditorStage::Text
            }
            FilterKind::Select => EditorStage::Options {
                selected: match current {
                    Some(FieldValue::Select(v)) => BTreeSet::from([v]),
                    _ => BTreeSet::new(),
                },
            },
            FilterKind::MultiSelect | FilterKind::TreeMultiSelect => EditorStage::Options {
                selected: match current {
                    Some(FieldValue::MultiSelect(vs)) | Some(FieldValue::TreeMultiSelect(vs)) => {
                        vs.into_iter().collect()
                    }
                    _ => BTreeSet::new(),
                },
            },
            FilterKind::DateTimeRange => EditorStage::Presets,
            FilterKind::CascadeSelect => EditorStage::Cascade { level1: None },
        };
        if let Some(request) = self.table.search_mut().options_request(&field.value) {
            self.dispatch_options(request);
        }
        self.editor = Some(Editor {
            key: field.value.clone(),
            label: field.label.clone(),
            kind: field.kind,
            origin,
            cursor: 0,
            stage,
        });
        self.previous_modus = self.modus;
        self.modus = Modus::Editor;
    }

    fn request_more_options(&mut self, key: &str) {
        if let Some(request) = self.table.search_mut().more_request(key) {
            self.dispatch_options(request);
        }
    }

    fn move_editor_cursor(&mut self, step: isize, len: usize) {
        if let Some(editor) = self.editor.as_mut() {
            editor.cursor = editor
                .cursor
                .saturating_add_signed(step)
                .min(len.saturating_sub(1));
        }
    }

    /// Lines of the current option list.
    pub fn editor_items(&self) -> Vec<EditorItem> {
        let Some(editor) = self.editor.as_ref() else {
            return Vec::new();
        };
        let search = self.table.search();
        match &editor.stage {
            EditorStage::Text | EditorStage::RangeFrom | EditorStage::RangeTo { .. } => Vec::new(),
            EditorStage::Options { selected } => {
                let mut items = Vec::new();
                let tree = editor.kind == FilterKind::TreeMultiSelect;
                flatten(search.options(&editor.key), 0, tree, selected, &mut items);
                items
            }
            EditorStage::Presets => PRESETS
                .iter()
                .map(|p| p.label())
                .chain(std::iter::once("Custom range ..."))
                .map(|label| EditorItem {
                    label: label.to_string(),
                    value: None,
                    depth: 0,
                    checked: false,
                })
                .collect(),
            EditorStage::Cascade { level1: None } => search
                .options(&editor.key)
                .iter()
                .map(|o| EditorItem {
                    label: match o.children_size {
                        Some(n) => format!("{} ({n})", o.label),
                        None => o.label.clone(),
                    },
                    value: Some(OptionValue::Text(o.parent_id())),
                    depth: 0,
                    checked: false,
                })
                .collect(),
            EditorStage::Cascade {
                level1: Some(parent),
            } => {
                let mut items = vec![EditorItem {
                    label: "(all)".to_string(),
                    value: None,
                    depth: 0,
                    checked: false,
                }];
                if let Some(children) = search
                    .resolver(&editor.key)
                    .and_then(|r| r.cached(parent))
                {
                    items.extend(children.iter().map(|c| EditorItem {
                        label: c.label.clone(),
                        value: Some(OptionValue::Text(c.parent_id())),
                        depth: 1,
                        checked: false,
                    }));
                }
                items
            }
        }
    }

    /// Loading hint for the editor list, if any.
    pub fn editor_loading(&self) -> Option<String> {
        let editor = self.editor.as_ref()?;
        let search = self.table.search();
        match &editor.stage {
            EditorStage::Cascade {
                level1: Some(parent),
            } => {
                let state = search.resolver(&editor.key)?.state(parent);
                (state == EntryState::Loading || state == EntryState::NotLoaded)
                    .then(|| format!("Loading {parent} ..."))
            }
            EditorStage::Text
            | EditorStage::Presets
            | EditorStage::RangeFrom
            | EditorStage::RangeTo { .. } => None,
            _ => match search.catalog(&editor.key)?.state() {
                LoadState::Loading => Some("Loading ...".to_string()),
                LoadState::Failed(e) => Some(format!("Failed: {e}")),
                _ => None,
            },
        }
    }

    fn toggle_option(&mut self, items: &[EditorItem], cursor: usize) {
        let Some(item) = items.get(cursor) else {
            return;
        };
        let Some(value) = item.value.clone() else {
            return;
        };
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        let EditorStage::Options { selected } = &mut editor.stage else {
            return;
        };
        let checked = !selected.contains(&value);
        // A tree parent takes its children along.
        let mut affected = vec![value];
        affected.extend(
            items[cursor + 1..]
                .iter()
                .take_while(|i| i.depth > item.depth)
                .filter_map(|i| i.value.clone()),
        );
        for value in affected {
            if checked {
                selected.insert(value);
            } else {
                selected.remove(&value);
            }
        }
    }

    fn confirm_editor(&mut self, items: &[EditorItem], cursor: usize) -> Result<(), AppError> {
        let Some(editor) = self.editor.clone() else {
            return Ok(());
        };
        let item = items.get(cursor);
        let value = match (&editor.stage, editor.kind) {
            (EditorStage::Options { .. }, FilterKind::Select) => match item.and_then(|i| i.value.clone()) {
                Some(value) => FieldValue::Select(value),
                None => return Ok(()),
            },
            (EditorStage::Options { selected }, kind) => {
                // Keep list order rather than set order.
                let values: Vec<OptionValue> = items
                    .iter()
                    .filter_map(|i| i.value.clone())
                    .filter(|v| selected.contains(v))
                    .collect();
                if kind == FilterKind::TreeMultiSelect {
                    FieldValue::TreeMultiSelect(values)
                } else {
                    FieldValue::MultiSelect(values)
                }
            }
            (EditorStage::Presets, _) => match PRESETS.get(cursor) {
                Some(preset) => FieldValue::DateTimeRange(preset.range(Local::now().naive_local())),
                None => {
                    let from = self
                        .current_range(&editor.key, editor.origin)
                        .and_then(|r| r.from);
                    self.begin_input(&format_bound(from));
                    self.set_editor_stage(EditorStage::RangeFrom, 0);
                    return Ok(());
                }
            },
            (EditorStage::Cascade { level1: None }, _) => {
                let Some(parent) = item.and_then(|i| i.value.as_ref()).map(|v| v.to_string())
                else {
                    return Ok(());
                };
                self.select_cascade_parent(&editor.key, parent);
                return Ok(());
            }
            (EditorStage::Cascade { level1: Some(parent) }, _) => {
                let level2 = item.and_then(|i| i.value.as_ref()).map(|v| v.to_string());
                FieldValue::CascadeSelect(CascadeValue::new(Some(parent.clone()), level2))
            }
            (EditorStage::Text | EditorStage::RangeFrom | EditorStage::RangeTo { .. }, _) => {
                return Ok(());
            }
        };
        self.finish_editor(value)
    }

    fn select_cascade_parent(&mut self, key: &str, parent: String) {
        let cached = self
            .table
            .search()
            .resolver(key)
            .is_some_and(|r| r.cached(&parent).is_some());
        if !cached {
            self.dispatch_children(key, &parent);
        }
        if let Some(editor) = self.editor.as_mut() {
            editor.stage = EditorStage::Cascade {
                level1: Some(parent),
            };
            editor.cursor = 0;
        }
    }

    fn finish_editor(&mut self, value: FieldValue) -> Result<(), AppError> {
        let Some(editor) = self.editor.take() else {
            return Ok(());
        };
        match editor.origin {
            Origin::Quick => {
                let request = self.table.set_filter_and_commit(&editor.key, value)?;
                info!("Quick search on {}", editor.key);
                self.dispatch_fetch(request);
                self.modus = Modus::Table;
            }
            Origin::Panel => {
                if let Some(entry) = self.draft.iter_mut().find(|f| f.key == editor.key) {
                    entry.value = value;
                }
                self.modus = Modus::Filters;
            }
        }
        Ok(())
    }

    fn cancel_editor(&mut self) {
        if let Some(editor) = self.editor.as_mut()
            && let EditorStage::Cascade { level1: Some(_) } = editor.stage
        {
            editor.stage = EditorStage::Cascade { level1: None };
            editor.cursor = 0;
            return;
        }
        self.close_editor();
    }

    fn close_editor(&mut self) {
        let origin = self.editor.take().map(|e| e.origin);
        self.modus = match origin {
            Some(Origin::Panel) => Modus::Filters,
            _ => Modus::Table,
        };
    }

    // -------------------- Table helpers ---------------------- //

    fn clamp_cursor(&mut self) {
        self.cursor_row = self
            .cursor_row
            .min(self.table.rows().len().saturating_sub(1));
        self.cursor_column = self
            .cursor_column
            .min(self.table.columns().visible().len().saturating_sub(1));
    }

    fn wrap_cell_content(c: &str) -> String {
        let needs_escaping = c.contains('"');
        let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
        let mut out = String::from(c);

        if needs_escaping {
            out = out.replace('"', "\"\"");
        }
        if needs_wrapping || needs_escaping {
            out = format!("\"{out}\"");
        }
        out
    }

    /// Selected row as a CSV line over the visible columns.
    pub fn selected_row_csv(&self) -> Option<String> {
        let row = self.table.rows().get(self.cursor_row)?;
        let line = self
            .table
            .columns()
            .visible()
            .iter()
            .map(|c| Self::wrap_cell_content(row.get(&c.value).map(String::as_str).unwrap_or("")))
            .collect::<Vec<String>>()
            .join(",");
        Some(line)
    }

    fn copy_row(&mut self) {
        if !toolbar::is_enabled(self.toolbar_context(), ActionKey::CopyRow) {
            return;
        }
        let (Some(line), Some(clipboard)) = (self.selected_row_csv(), self.clipboard.as_mut()) else {
            return;
        };
        match clipboard.set_text(line) {
            Ok(_) => self.set_status_message("Copied row to clipboard"),
            Err(e) => {
                warn!("Error copying to clipboard: {:?}", e);
                self.set_status_message("Copy failed");
            }
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::Popup;
        self.popup_message = HELP_TEXT.to_string();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.width, width, self.height, height
        );
        self.width = width;
        self.height = height;
    }

    pub fn quit(&mut self) {
        self.status = Status::Quitting;
    }
}

fn format_bound(value: Option<NaiveDateTime>) -> String {
    value
        .map(|v| v.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn flatten(
    options: &[SelectOption],
    depth: usize,
    tree: bool,
    selected: &BTreeSet<OptionValue>,
    items: &mut Vec<EditorItem>,
) {
    for option in options {
        items.push(EditorItem {
            label: option.label.clone(),
            value: Some(option.value.clone()),
            depth,
            checked: selected.contains(&option.value),
        });
        if tree {
            flatten(&option.children, depth + 1, tree, selected, items);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    use super::*;
    use crate::columns::{Column, ColumnRegistry, Fixed};
    use crate::pagination::Pagination;
    use crate::search::SmartSearch;
    use crate::source::FrameSource;

    fn source() -> FrameSource {
        FrameSource::from_columns(
            "users",
            vec![
                ("id", vec!["1", "2", "3", "4"]),
                ("name", vec!["Ann Lee", "Bob Stone", "Cara Lee", "Dan Wu"]),
                ("role", vec!["管理员", "编辑", "编辑", "查看"]),
                ("province", vec!["广东", "广东", "浙江", "浙江"]),
                ("city", vec!["广州", "深圳", "杭州", "宁波"]),
                (
                    "lastLogin",
                    vec![
                        "2024-01-05 10:00:00",
                        "2024/2/27 01:58:32",
                        "2024-03-10",
                        "2024-03-31 23:00:00",
                    ],
                ),
            ],
        )
        .with_hierarchy("province", "province", "city")
    }

    fn model() -> (Model, Receiver<Message>) {
        let source = Arc::new(source());
        let columns = ColumnRegistry::new(vec![
            Column::new("ID", "id").fixed(Fixed::Left).lock(true),
            Column::new("Name", "name"),
            Column::new("Role", "role"),
            Column::new("Province", "province"),
            Column::new("City", "city"),
        ])
        .unwrap();
        let schema = vec![
            FilterOption::new("Name", "name", FilterKind::Text),
            FilterOption::new("Role", "role", FilterKind::MultiSelect).lazy(true),
            FilterOption::new("Region", "province", FilterKind::CascadeSelect).lazy(true),
            FilterOption::new("Last login", "lastLogin", FilterKind::DateTimeRange),
        ];
        let search = SmartSearch::new(schema, source.clone());
        let table = AdvancedTable::new(columns, search, Pagination::default());
        let (tx, rx) = mpsc::channel();
        let model = Model::init(table, source, tx);
        (model, rx)
    }

    // Feeds worker results back until the pool goes quiet.
    fn settle(model: &mut Model, rx: &Receiver<Message>) {
        while let Ok(msg) = rx.recv_timeout(Duration::from_millis(300)) {
            model.update(Some(msg)).unwrap();
        }
    }

    fn send(model: &mut Model, rx: &Receiver<Message>, msgs: Vec<Message>) {
        for msg in msgs {
            model.update(Some(msg)).unwrap();
            settle(model, rx);
        }
    }

    fn key(c: char) -> Message {
        Message::RawKey(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    fn typed(text: &str) -> Vec<Message> {
        let mut msgs: Vec<Message> = text.chars().map(key).collect();
        msgs.push(Message::RawKey(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)));
        msgs
    }

    fn visible(model: &Model) -> Vec<String> {
        model
            .table()
            .columns()
            .visible()
            .iter()
            .map(|c| c.value.clone())
            .collect()
    }

    #[test]
    fn initial_load_fills_rows() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        assert_eq!(model.table().rows().len(), 4);
        assert_eq!(model.table().pagination().total(), 4);
    }

    #[test]
    fn quick_search_commits_text_filter() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        send(&mut model, &rx, vec![Message::QuickSearch]);
        assert!(model.raw_keyevents());

        send(&mut model, &rx, typed("lee"));

        assert_eq!(model.modus(), Modus::Table);
        assert_eq!(model.table().rows().len(), 2);
        assert_eq!(model.table().search().filters().active()[0].chip(), "Name: lee");

        send(&mut model, &rx, vec![Message::ClearLastFilter]);
        assert_eq!(model.table().rows().len(), 4);
    }

    #[test]
    fn filter_panel_applies_all_fields_at_once() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        send(
            &mut model,
            &rx,
            vec![
                Message::OpenFilters,
                Message::MoveDown,
                Message::Enter,
                Message::ToggleSelected,
                Message::Enter,
            ],
        );
        assert_eq!(model.modus(), Modus::Filters);
        assert_eq!(
            model.draft()[1].value,
            FieldValue::MultiSelect(vec!["编辑".into()])
        );

        send(
            &mut model,
            &rx,
            vec![
                Message::MoveDown,
                Message::Enter,
                Message::MoveDown,
                Message::Enter,
                Message::MoveDown,
                Message::MoveDown,
                Message::Enter,
            ],
        );
        assert_eq!(
            model.draft()[2].value,
            FieldValue::CascadeSelect(CascadeValue::new(Some("浙江".into()), Some("杭州".into())))
        );

        let revision = model.table().search().filters().snapshot().revision();
        send(&mut model, &rx, vec![Message::ApplyFilters]);
        assert_eq!(model.modus(), Modus::Table);
        assert_eq!(
            model.table().search().filters().snapshot().revision(),
            revision + 1
        );
        let rows = model.table().rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "3");
    }

    #[test]
    fn column_settings_toggle_and_reorder() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        send(
            &mut model,
            &rx,
            vec![Message::OpenColumns, Message::ToggleSelected],
        );
        assert_eq!(model.status_message(), "id is locked");

        send(
            &mut model,
            &rx,
            vec![Message::MoveDown, Message::MoveColumnDown, Message::ToggleSelected],
        );
        assert_eq!(visible(&model), vec!["id", "role", "province", "city"]);

        send(&mut model, &rx, vec![Message::ResetColumns, Message::Enter]);
        assert_eq!(model.modus(), Modus::Table);
        assert_eq!(model.table().columns().visible().len(), 5);
    }

    #[test]
    fn column_settings_are_kept_or_discarded_on_close() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        let all = visible(&model);

        send(
            &mut model,
            &rx,
            vec![
                Message::OpenColumns,
                Message::MoveDown,
                Message::ToggleSelected,
                Message::MoveColumnDown,
            ],
        );
        assert_eq!(visible(&model), vec!["id", "role", "province", "city"]);
        send(&mut model, &rx, vec![Message::Exit]);
        assert_eq!(model.modus(), Modus::Table);
        assert_eq!(visible(&model), all);
        assert_eq!(model.status_message(), "Column changes discarded");

        send(
            &mut model,
            &rx,
            vec![
                Message::OpenColumns,
                Message::MoveDown,
                Message::ToggleSelected,
                Message::Enter,
            ],
        );
        assert_eq!(visible(&model), vec!["id", "role", "province", "city"]);
    }

    #[test]
    fn column_search_narrows_the_settings_list() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        send(&mut model, &rx, vec![Message::OpenColumns, Message::SearchColumns]);
        assert!(model.raw_keyevents());

        send(&mut model, &rx, typed("PRO"));
        assert!(!model.raw_keyevents());
        assert_eq!(model.column_query(), "PRO");
        let listed: Vec<&str> = model.listed_columns().iter().map(|c| c.value.as_str()).collect();
        assert_eq!(listed, vec!["province"]);

        send(&mut model, &rx, vec![Message::ToggleSelected, Message::Enter]);
        assert_eq!(visible(&model), vec!["id", "name", "role", "city"]);

        // Esc while searching drops the query but keeps the panel open.
        send(&mut model, &rx, vec![Message::OpenColumns, Message::SearchColumns]);
        let mut msgs: Vec<Message> = "zz".chars().map(key).collect();
        msgs.push(Message::RawKey(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        send(&mut model, &rx, msgs);
        assert_eq!(model.modus(), Modus::Columns);
        assert_eq!(model.column_query(), "");
        assert_eq!(model.listed_columns().len(), 5);
    }

    #[test]
    fn custom_date_range_is_typed_bound_by_bound() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        let mut msgs = vec![Message::OpenFilters];
        msgs.extend((0..3).map(|_| Message::MoveDown));
        msgs.push(Message::Enter);
        send(&mut model, &rx, msgs);
        let items = model.editor_items();
        assert_eq!(items.len(), PRESETS.len() + 1);
        assert_eq!(items[PRESETS.len()].label, "Custom range ...");

        let mut msgs: Vec<Message> = (0..PRESETS.len()).map(|_| Message::MoveDown).collect();
        msgs.push(Message::Enter);
        send(&mut model, &rx, msgs);
        assert!(model.raw_keyevents());
        assert_eq!(model.input_prompt().0, "Last login from");

        send(&mut model, &rx, typed("soon"));
        assert!(model.status_message().contains("not a date"));
        assert_eq!(model.editor().unwrap().stage, EditorStage::RangeFrom);
        assert_eq!(model.input().input, "soon");

        let clear = Message::RawKey(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        send(&mut model, &rx, vec![clear]);
        send(&mut model, &rx, typed("2024-02-01"));
        assert_eq!(model.input_prompt().0, "Last login to");
        send(&mut model, &rx, typed("2024-03-10"));

        assert_eq!(model.modus(), Modus::Filters);
        let at = |s: &str| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap();
        assert_eq!(
            model.draft()[3].value,
            FieldValue::DateTimeRange(DateTimeRange::new(
                Some(at("2024-02-01 00:00:00")),
                Some(at("2024-03-10 23:59:59"))
            ))
        );

        send(&mut model, &rx, vec![Message::ApplyFilters]);
        let ids: Vec<&str> = model.table().rows().iter().map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn reversed_custom_range_is_rejected() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        let mut msgs = vec![Message::OpenFilters];
        msgs.extend((0..3).map(|_| Message::MoveDown));
        msgs.push(Message::Enter);
        msgs.extend((0..PRESETS.len()).map(|_| Message::MoveDown));
        msgs.push(Message::Enter);
        msgs.extend(typed("2024-03-10"));
        msgs.extend(typed("2024-03-01"));
        send(&mut model, &rx, msgs);
        assert_eq!(model.status_message(), "range starts after it ends");
        assert!(matches!(
            model.editor().unwrap().stage,
            EditorStage::RangeTo { from: Some(_) }
        ));

        // Esc goes back to the preset list.
        let esc = Message::RawKey(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        send(&mut model, &rx, vec![esc]);
        let editor = model.editor().unwrap();
        assert_eq!(editor.stage, EditorStage::Presets);
        assert_eq!(editor.cursor, PRESETS.len());
    }

    #[test]
    fn selected_row_is_csv_quoted() {
        let (mut model, rx) = model();
        settle(&mut model, &rx);
        send(&mut model, &rx, vec![Message::MoveDown]);
        assert_eq!(
            model.selected_row_csv().unwrap(),
            "2,\"Bob Stone\",编辑,广东,深圳"
        );
    }
}
