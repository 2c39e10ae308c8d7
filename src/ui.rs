use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap},
};

use crate::columns::{Column, Fixed};
use crate::domain::AppConfig;
use crate::filters::FilterKind;
use crate::model::{EditorStage, Modus, Model};
use crate::toolbar;

const ELLIPSIS: &str = "…";

pub struct TableUI {
    max_column_width: usize,
}

impl TableUI {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            max_column_width: cfg.max_column_width,
        }
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(frame.area());

        frame.render_widget(Self::toolbar(model), layout[0]);
        frame.render_widget(Self::chips(model), layout[1]);
        self.render_table(model, frame, layout[2]);
        frame.render_widget(Self::footer(model), layout[3]);
        frame.render_widget(Self::status_line(model), layout[4]);

        match model.modus() {
            Modus::Columns => Self::render_columns(model, frame),
            Modus::Filters => Self::render_filters(model, frame),
            Modus::Editor => {
                if model.editing_draft() {
                    Self::render_filters(model, frame);
                }
                Self::render_editor(model, frame);
            }
            Modus::Popup => Self::render_popup(model, frame),
            Modus::Table => (),
        }
    }

    fn toolbar(model: &Model) -> Paragraph<'static> {
        let mut spans = Vec::new();
        for action in toolbar::visible_actions(model.toolbar_context()) {
            let style = if action.disabled {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            spans.push(Span::styled(format!("<{}>", action.shortcut), style.blue().bold()));
            spans.push(Span::styled(format!(" {}  ", action.label), style));
        }
        Paragraph::new(Line::from(spans))
    }

    fn chips(model: &Model) -> Paragraph<'static> {
        let active = model.table().search().filters().active();
        if active.is_empty() {
            return Paragraph::new(Line::from("No filters".dark_gray()));
        }
        let mut spans = vec![Span::raw("Filters: ")];
        for item in active {
            spans.push(Span::styled(
                format!(" {} ", item.chip()),
                Style::default().bg(Color::Blue).fg(Color::White),
            ));
            spans.push(Span::raw(" "));
        }
        Paragraph::new(Line::from(spans))
    }

    fn column_width(&self, column: &Column, cells: &[&str]) -> u16 {
        if let Some(width) = column.width {
            return width;
        }
        let content = cells
            .iter()
            .map(|c| display_width(c))
            .chain(std::iter::once(display_width(&column.label)))
            .max()
            .unwrap_or(0);
        content.min(self.max_column_width).max(1) as u16
    }

    fn render_table(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let table = model.table();
        let columns = table.columns().visible();
        let rows = table.rows();

        let mut widths = Vec::with_capacity(columns.len());
        for column in columns.iter() {
            let cells: Vec<&str> = rows
                .iter()
                .map(|r| r.get(&column.value).map(String::as_str).unwrap_or(""))
                .collect();
            widths.push(self.column_width(column, &cells));
        }

        let header = Row::new(columns.iter().zip(&widths).map(|(c, &w)| {
            let label = truncate(&c.label, w as usize, true);
            let marker = match c.fixed {
                Fixed::Left | Fixed::Right => label.underlined(),
                Fixed::None => label.into(),
            };
            Cell::from(marker)
        }))
        .style(Style::default().bold().fg(Color::Yellow));

        let body = rows.iter().map(|row| {
            Row::new(columns.iter().zip(&widths).map(|(c, &w)| {
                let value = row.get(&c.value).map(String::as_str).unwrap_or("");
                Cell::from(truncate(value, w as usize, c.ellipsis))
            }))
        });

        let title = match (table.is_loading(), table.error()) {
            (true, _) => " Loading ... ".to_string(),
            (false, Some(e)) => format!(" Error: {e} "),
            (false, None) => format!(" {} rows ", table.pagination().total()),
        };
        let widget = Table::new(body, widths.iter().map(|&w| Constraint::Length(w)))
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title))
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .column_highlight_style(Style::default().fg(Color::Cyan));

        let (row, column) = model.cursor();
        let mut state = TableState::default()
            .with_selected((!rows.is_empty()).then_some(row))
            .with_selected_column((!columns.is_empty()).then_some(column));
        frame.render_stateful_widget(widget, area, &mut state);
    }

    fn footer(model: &Model) -> Paragraph<'static> {
        let pagination = model.table().pagination();
        let sizes = pagination
            .page_sizes()
            .iter()
            .map(|s| {
                if *s == pagination.page_size() {
                    format!("[{s}]")
                } else {
                    s.to_string()
                }
            })
            .collect::<Vec<String>>()
            .join(" ");
        let shown = model.table().rows().len();
        let rows = if shown == 0 {
            format!("Rows 0 of {}", pagination.total())
        } else {
            let first = pagination.offset() + 1;
            format!("Rows {}-{} of {}", first, first + shown - 1, pagination.total())
        };
        let line = Line::from(vec![
            Span::raw(format!(
                "Page {} / {}   {rows}   ",
                pagination.page(),
                pagination.total_pages(),
            )),
            Span::raw(format!("Per page: {sizes}")).dark_gray(),
        ]);
        Paragraph::new(line).right_aligned()
    }

    fn status_line(model: &Model) -> Paragraph<'static> {
        if model.raw_keyevents() {
            let input = model.input();
            let (label, placeholder) = model.input_prompt();
            let (before, after): (String, String) = {
                let chars: Vec<char> = input.input.chars().collect();
                let split = input.cursor_pos.min(chars.len());
                (
                    chars[..split].iter().collect(),
                    chars[split..].iter().collect(),
                )
            };
            let mut spans = vec![
                Span::raw(format!("{label}: ")).bold(),
                Span::raw(before),
                Span::raw("▏").yellow(),
                Span::raw(after),
            ];
            if input.input.is_empty() {
                spans.push(Span::raw(placeholder).dark_gray());
            }
            return Paragraph::new(Line::from(spans));
        }
        Paragraph::new(Line::from(model.status_message().to_string()).yellow())
    }

    fn render_columns(model: &Model, frame: &mut Frame) {
        let area = frame
            .area()
            .centered(Constraint::Percentage(50), Constraint::Percentage(60));
        let title = match model.column_query() {
            "" => " Columns ".to_string(),
            query => format!(" Columns matching '{query}' "),
        };
        let items: Vec<ListItem> = model
            .listed_columns()
            .into_iter()
            .map(|c| {
                let check = if c.show { "[x]" } else { "[ ]" };
                let mut text = format!("{check} {}", c.label);
                if c.lock {
                    text.push_str("  (locked)");
                }
                match c.fixed {
                    Fixed::Left => text.push_str("  ⇤"),
                    Fixed::Right => text.push_str("  ⇥"),
                    Fixed::None => (),
                }
                ListItem::new(text)
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .title_bottom(" Space toggle  K/J move  R reset  / find  Enter keep  Esc discard "),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut state = ListState::default().with_selected(Some(model.settings_cursor()));
        frame.render_widget(Clear, area);
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn render_filters(model: &Model, frame: &mut Frame) {
        let area = frame
            .area()
            .centered(Constraint::Percentage(60), Constraint::Percentage(60));
        let filters = model.table().search().filters();
        let items: Vec<ListItem> = filters
            .schema()
            .iter()
            .zip(model.draft())
            .map(|(field, draft)| {
                let value = if draft.value.is_empty() {
                    Span::raw("-").dark_gray()
                } else {
                    Span::raw(filters.describe(&field.value, &draft.value)).cyan()
                };
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{:<16}", field.label)),
                    Span::raw(format!("{:<18}", field.kind.to_string())).dark_gray(),
                    value,
                ]))
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Filters ")
                    .title_bottom(" Enter edit  Backspace clear  a apply  Esc close "),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut state = ListState::default().with_selected(Some(model.panel_cursor()));
        frame.render_widget(Clear, area);
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn render_editor(model: &Model, frame: &mut Frame) {
        let Some(editor) = model.editor() else {
            return;
        };
        // Typed values live in the status line.
        if matches!(
            editor.stage,
            EditorStage::Text | EditorStage::RangeFrom | EditorStage::RangeTo { .. }
        ) {
            return;
        }
        let search = model.table().search();
        let area = frame
            .area()
            .centered(Constraint::Percentage(40), Constraint::Percentage(50));
        let multi =
            matches!(editor.stage, EditorStage::Options { .. }) && editor.kind != FilterKind::Select;
        let mut items: Vec<ListItem> = model
            .editor_items()
            .into_iter()
            .map(|item| {
                let indent = "  ".repeat(item.depth);
                let text = if multi {
                    let check = if item.checked { "[x]" } else { "[ ]" };
                    format!("{indent}{check} {}", item.label)
                } else {
                    format!("{indent}{}", item.label)
                };
                ListItem::new(text)
            })
            .collect();
        if let Some(hint) = model.editor_loading() {
            items.push(ListItem::new(hint).dark_gray());
        }
        let paged = matches!(
            editor.stage,
            EditorStage::Options { .. } | EditorStage::Cascade { level1: None }
        );
        if let Some(catalog) = search.catalog(&editor.key).filter(|c| paged && c.has_more()) {
            let hint = format!(
                "{} of {} shown, move down for more",
                catalog.options().len(),
                catalog.total()
            );
            items.push(ListItem::new(hint).dark_gray());
        }
        let field = search.filters().field(&editor.key);
        let level1 = field.and_then(|f| f.level1_label.clone());
        let level2 = field.and_then(|f| f.level2_label.clone());
        let title = match &editor.stage {
            EditorStage::Cascade { level1: None } => {
                format!(" {} ", level1.unwrap_or_else(|| editor.label.clone()))
            }
            EditorStage::Cascade { level1: Some(parent) } => {
                format!(" {} in {parent} ", level2.unwrap_or_else(|| editor.label.clone()))
            }
            _ => format!(" {} ", editor.label),
        };
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut state = ListState::default().with_selected(Some(editor.cursor));
        frame.render_widget(Clear, area);
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn render_popup(model: &Model, frame: &mut Frame) {
        let area = frame
            .area()
            .centered(Constraint::Percentage(70), Constraint::Percentage(70));
        let popup = Paragraph::new(model.popup_message().to_string())
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help ")
                    .title_bottom(" Esc close "),
            );
        frame.render_widget(Clear, area);
        frame.render_widget(popup, area);
    }
}

fn display_width(s: &str) -> usize {
    Span::raw(s).width()
}

/// Cuts `s` to `width` display columns, ending in an ellipsis when `ellipsis`
/// is set and something was cut.
fn truncate(s: &str, width: usize, ellipsis: bool) -> String {
    if display_width(s) <= width {
        return s.to_string();
    }
    let budget = if ellipsis { width.saturating_sub(1) } else { width };
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = display_width(c.encode_utf8(&mut [0; 4]));
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    if ellipsis && width > 0 {
        out.push_str(ELLIPSIS);
    }
    out
}
