use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, mpsc};

use clap::Parser;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cascade;
mod columns;
mod controller;
mod daterange;
mod domain;
mod filters;
mod inputter;
mod model;
mod pagination;
mod search;
mod source;
mod table;
mod toolbar;
mod ui;

use columns::{Column, ColumnError, ColumnRegistry, Fixed};
use controller::Controller;
use domain::{AppConfig, AppError, Message};
use filters::{FilterKind, FilterOption};
use model::{Model, Status};
use pagination::{DEFAULT_PAGE_SIZE, PAGE_SIZES, Pagination};
use search::SmartSearch;
use source::FrameSource;
use table::AdvancedTable;
use ui::TableUI;

/// Browse a CSV, Parquet or Arrow file as a paged admin table with filters.
#[derive(Parser, Debug)]
#[command(name = "advtable", version, about)]
struct Args {
    /// File to open
    path: String,

    /// Column with a free text filter
    #[arg(long = "text", value_name = "COL")]
    text: Vec<String>,

    /// Column with a single choice filter
    #[arg(long = "select", value_name = "COL")]
    select: Vec<String>,

    /// Column with a multiple choice filter
    #[arg(long = "multi", value_name = "COL")]
    multi: Vec<String>,

    /// Parent/child column pair offered as a tree of choices
    #[arg(long = "tree", value_name = "PARENT/CHILD", value_parser = parse_pair)]
    tree: Vec<(String, String)>,

    /// Date column with a date range filter
    #[arg(long = "range", value_name = "COL")]
    range: Vec<String>,

    /// Parent/child column pair offered as a two level choice
    #[arg(long = "cascade", value_name = "PARENT/CHILD", value_parser = parse_pair)]
    cascade: Vec<(String, String)>,

    /// Pin a column to the left edge
    #[arg(long = "fixed-left", value_name = "COL")]
    fixed_left: Vec<String>,

    /// Pin a column to the right edge
    #[arg(long = "fixed-right", value_name = "COL")]
    fixed_right: Vec<String>,

    /// Column that can be neither hidden nor moved
    #[arg(long = "lock", value_name = "COL")]
    lock: Vec<String>,

    /// Column hidden at start
    #[arg(long = "hide", value_name = "COL")]
    hide: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = parse_page_size)]
    page_size: usize,

    #[arg(long, default_value_t = 32)]
    max_column_width: usize,

    /// Write logs to this file (RUST_LOG sets the level)
    #[arg(long, value_name = "PATH")]
    log_file: Option<String>,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('/') {
        Some((parent, child)) if !parent.is_empty() && !child.is_empty() => {
            Ok((parent.to_string(), child.to_string()))
        }
        _ => Err(format!("expected PARENT/CHILD, got '{s}'")),
    }
}

fn parse_page_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("{e}"))?;
    if PAGE_SIZES.contains(&size) {
        Ok(size)
    } else {
        Err(format!("page size must be one of {PAGE_SIZES:?}"))
    }
}

fn expand(path: &str) -> Result<PathBuf, AppError> {
    let expanded = shellexpand::full(path).map_err(|e| AppError::InvalidPath(e.to_string()))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn init_logging(path: &str) -> Result<(), AppError> {
    let file = File::create(expand(path)?)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn build_columns(args: &Args, names: &[String]) -> Result<ColumnRegistry, AppError> {
    let known: HashSet<&str> = names.iter().map(String::as_str).collect();
    for name in args
        .fixed_left
        .iter()
        .chain(&args.fixed_right)
        .chain(&args.lock)
        .chain(&args.hide)
    {
        if !known.contains(name.as_str()) {
            return Err(ColumnError::UnknownColumn(name.clone()).into());
        }
    }

    // Without explicit pinning the first column acts as the row key.
    let pin_first = args.fixed_left.is_empty() && args.lock.is_empty();
    let columns = names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let fixed = if args.fixed_left.contains(name) || (pin_first && idx == 0) {
                Fixed::Left
            } else if args.fixed_right.contains(name) {
                Fixed::Right
            } else {
                Fixed::None
            };
            Column::new(name.clone(), name.clone())
                .fixed(fixed)
                .lock(args.lock.contains(name) || (pin_first && idx == 0))
                .show(!args.hide.contains(name))
        })
        .collect();
    Ok(ColumnRegistry::new(columns)?)
}

fn build_schema(args: &Args, names: &[String]) -> Result<Vec<FilterOption>, AppError> {
    let check = |name: &str| -> Result<(), AppError> {
        if names.iter().any(|n| n == name) {
            Ok(())
        } else {
            Err(ColumnError::UnknownColumn(name.to_string()).into())
        }
    };

    let text_filter = |name: &String| {
        FilterOption::new(name.clone(), name.clone(), FilterKind::Text)
            .placeholder(format!("part of {name}, Enter applies"))
    };

    let mut schema = Vec::new();
    for name in &args.text {
        check(name)?;
        schema.push(text_filter(name));
    }
    for (flagged, kind) in [(&args.select, FilterKind::Select), (&args.multi, FilterKind::MultiSelect)] {
        for name in flagged {
            check(name)?;
            schema.push(FilterOption::new(name.clone(), name.clone(), kind).lazy(true));
        }
    }
    for (parent, child) in &args.tree {
        check(parent)?;
        check(child)?;
        schema.push(
            FilterOption::new(format!("{parent}/{child}"), parent.clone(), FilterKind::TreeMultiSelect)
                .lazy(true),
        );
    }
    for name in &args.range {
        check(name)?;
        schema.push(
            FilterOption::new(name.clone(), name.clone(), FilterKind::DateTimeRange)
                .placeholder("YYYY-MM-DD [HH:MM:SS], empty for open"),
        );
    }
    for (parent, child) in &args.cascade {
        check(parent)?;
        check(child)?;
        schema.push(
            FilterOption::new(parent.clone(), parent.clone(), FilterKind::CascadeSelect)
                .lazy(true)
                .level1_label(parent.clone())
                .level2_label(child.clone()),
        );
    }

    if schema.is_empty() {
        schema = names.iter().map(text_filter).collect();
    }
    Ok(schema)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(args: Args) -> Result<(), AppError> {
    if let Some(log_file) = &args.log_file {
        init_logging(log_file)?;
    }

    let mut source = FrameSource::load(expand(&args.path)?)?;
    let names = source.column_names();
    for (parent, child) in args.tree.iter().chain(&args.cascade) {
        source = source.with_hierarchy(parent.clone(), parent.clone(), child.clone());
    }
    let source = Arc::new(source);

    let cfg = AppConfig::default()
        .max_column_width(args.max_column_width)
        .default_page_size(args.page_size);

    let columns = build_columns(&args, &names)?;
    let search = SmartSearch::new(build_schema(&args, &names)?, source.clone());
    let pagination = Pagination::new(cfg.page_sizes.clone(), cfg.default_page_size);
    let table = AdvancedTable::new(columns, search, pagination);
    info!("Opened {} ({} rows)", source.name(), source.nrows());

    let (sender, receiver) = mpsc::channel();
    let mut model = Model::init(table, source, sender);
    let ui = TableUI::new(&cfg);
    let controller = Controller::new(&cfg);

    let mut terminal = ratatui::init();
    let result = (|| -> Result<(), AppError> {
        let size = terminal.size()?;
        model.update(Some(Message::Resize(size.width as usize, size.height as usize)))?;

        while model.status != Status::Quitting {
            // Render the current view
            terminal.draw(|f| ui.draw(&model, f))?;

            // Results posted by background loads
            while let Ok(message) = receiver.try_recv() {
                model.update(Some(message))?;
            }

            // Handle events and map to a Message
            let message = controller.handle_event(&model)?;
            model.update(message)?;
        }
        Ok(())
    })();
    ratatui::restore();
    result
}
