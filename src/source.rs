//! File backed data source: answers paged, filtered fetches for the table and
//! derives select options from the loaded columns.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace};

use crate::daterange::{self, DateTimeRange};
use crate::domain::{AppError, LoadError};
use crate::filters::{FieldValue, FilterKind, FilterOption, FilterValue, OptionValue, SelectOption};
use crate::search::{OptionLoader, OptionPage};

/// One table row, cell text by column key.
pub type Row = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub rows: Vec<Row>,
    /// Number of rows matching the filters, over all pages.
    pub total: usize,
}

/// Answers `(filters, page, page_size)` queries for the table.
pub trait DataSource: Send + Sync {
    fn fetch(&self, filters: &[FilterValue], page: usize, page_size: usize)
    -> Result<Page, LoadError>;
}

#[derive(Debug)]
enum FileType {
    Csv,
    Parquet,
    Arrow,
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    file_size: u64,
    file_type: FileType,
}

struct SourceColumn {
    name: String,
    data: Vec<String>,
    numeric: bool,
}

// Parent/child column pair behind cascade and tree fields.
#[derive(Debug, Clone)]
struct Hierarchy {
    parent: String,
    child: String,
}

enum Predicate {
    Contains { column: usize, needle: String },
    Equals { column: usize, value: String },
    AnyOf { columns: Vec<usize>, values: HashSet<String> },
    Within { column: usize, range: DateTimeRange },
}

impl Predicate {
    fn matches(&self, columns: &[SourceColumn], row: usize) -> bool {
        match self {
            Predicate::Contains { column, needle } => {
                columns[*column].data[row].to_lowercase().contains(needle)
            }
            Predicate::Equals { column, value } => &columns[*column].data[row] == value,
            Predicate::AnyOf { columns: cols, values } => cols
                .iter()
                .any(|&c| values.contains(&columns[c].data[row])),
            Predicate::Within { column, range } => daterange::parse_cell(&columns[*column].data[row])
                .is_some_and(|value| range.contains(value)),
        }
    }
}

pub struct FrameSource {
    name: String,
    columns: Vec<SourceColumn>,
    hierarchies: HashMap<String, Hierarchy>,
}

impl FrameSource {
    pub fn load(path: PathBuf) -> Result<Self, AppError> {
        let file_info = Self::get_file_info(path)?;
        let frame = match file_info.file_type {
            FileType::Csv => Self::load_csv(&file_info.path)?,
            FileType::Parquet => Self::load_parquet(&file_info.path)?,
            FileType::Arrow => Self::load_arrow(&file_info.path)?,
        };

        // Every column is converted to strings on its own rayon task.
        let start_time = Instant::now();
        let df = Arc::new(frame.collect()?);
        let c_: Result<Vec<SourceColumn>, _> = df
            .get_column_names()
            .par_iter()
            .map(|name| Self::load_column(&df, name))
            .collect();
        let columns = c_?;
        if columns.is_empty() {
            return Err(AppError::LoadingFailed("file has no columns".into()));
        }

        info!(
            "Loaded {} columns, {} rows, {} bytes in {}ms",
            columns.len(),
            columns[0].data.len(),
            file_info.file_size,
            start_time.elapsed().as_millis()
        );
        let name = file_info
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string();
        Ok(Self {
            name,
            columns,
            hierarchies: HashMap::new(),
        })
    }

    /// In-memory source; every column must have the same length.
    #[cfg(test)]
    pub fn from_columns(name: impl Into<String>, columns: Vec<(&str, Vec<&str>)>) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, data)| SourceColumn {
                name: name.to_string(),
                numeric: !data.is_empty() && data.iter().all(|v| v.parse::<f64>().is_ok()),
                data: data.into_iter().map(String::from).collect(),
            })
            .collect();
        Self {
            name: name.into(),
            columns,
            hierarchies: HashMap::new(),
        }
    }

    /// Declares `key` as a two level field over the `parent` and `child` columns.
    pub fn with_hierarchy(
        mut self,
        key: impl Into<String>,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        self.hierarchies.insert(
            key.into(),
            Hierarchy {
                parent: parent.into(),
                child: child.into(),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    fn column_index(&self, name: &str) -> Result<usize, LoadError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| LoadError::new(format!("unknown column '{name}'")))
    }

    fn hierarchy(&self, key: &str) -> Result<(usize, usize), LoadError> {
        let hierarchy = self
            .hierarchies
            .get(key)
            .ok_or_else(|| LoadError::new(format!("'{key}' has no parent/child columns")))?;
        Ok((
            self.column_index(&hierarchy.parent)?,
            self.column_index(&hierarchy.child)?,
        ))
    }

    // Column holding the first level values of a field.
    fn option_column(&self, key: &str) -> Result<usize, LoadError> {
        match self.hierarchies.get(key) {
            Some(hierarchy) => self.column_index(&hierarchy.parent),
            None => self.column_index(key),
        }
    }

    fn predicates(&self, filter: &FilterValue) -> Result<Vec<Predicate>, LoadError> {
        let key = filter.key.as_str();
        let predicates = match &filter.value {
            FieldValue::Text(needle) => vec![Predicate::Contains {
                column: self.column_index(key)?,
                needle: needle.trim().to_lowercase(),
            }],
            FieldValue::Select(value) => vec![Predicate::Equals {
                column: self.column_index(key)?,
                value: value.to_string(),
            }],
            FieldValue::MultiSelect(values) => vec![Predicate::AnyOf {
                columns: vec![self.column_index(key)?],
                values: values.iter().map(|v| v.to_string()).collect(),
            }],
            FieldValue::TreeMultiSelect(values) => {
                let columns = match self.hierarchy(key) {
                    Ok((parent, child)) => vec![parent, child],
                    Err(_) => vec![self.column_index(key)?],
                };
                vec![Predicate::AnyOf {
                    columns,
                    values: values.iter().map(|v| v.to_string()).collect(),
                }]
            }
            FieldValue::DateTimeRange(range) => vec![Predicate::Within {
                column: self.column_index(key)?,
                range: *range,
            }],
            FieldValue::CascadeSelect(cascade) => {
                let mut predicates = Vec::new();
                if let Some(level2) = &cascade.level2 {
                    let (parent, child) = self.hierarchy(key)?;
                    if let Some(level1) = &cascade.level1 {
                        predicates.push(Predicate::Equals {
                            column: parent,
                            value: level1.clone(),
                        });
                    }
                    predicates.push(Predicate::Equals {
                        column: child,
                        value: level2.clone(),
                    });
                } else if let Some(level1) = &cascade.level1 {
                    predicates.push(Predicate::Equals {
                        column: self.option_column(key)?,
                        value: level1.clone(),
                    });
                }
                predicates
            }
        };
        Ok(predicates)
    }

    fn row(&self, row: usize) -> Row {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data[row].clone()))
            .collect()
    }

    // Distinct values of a column, most frequent first.
    fn distinct(&self, column: usize, rows: impl Iterator<Item = usize>) -> Vec<String> {
        let data = &self.columns[column].data;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for row in rows {
            *counts.entry(data[row].as_str()).or_insert(0) += 1;
        }
        let mut sorted: Vec<(usize, &str)> = counts.into_iter().map(|(k, v)| (v, k)).collect();
        sorted.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
        sorted.into_iter().map(|(_, v)| v.to_string()).collect()
    }

    fn option(&self, column: usize, value: String) -> SelectOption {
        let option_value = if self.columns[column].numeric {
            OptionValue::parse(&value)
        } else {
            OptionValue::Text(value.clone())
        };
        let mut option = SelectOption::new(value.clone(), option_value);
        option.id = Some(value);
        option
    }

    fn children_of(&self, parent: usize, child: usize, parent_value: &str) -> Vec<SelectOption> {
        let rows = (0..self.nrows()).filter(|&r| self.columns[parent].data[r] == parent_value);
        self.distinct(child, rows)
            .into_iter()
            .map(|v| self.option(child, v))
            .collect()
    }

    fn options_page(
        &self,
        field: &FilterOption,
        page: usize,
        page_size: usize,
    ) -> Result<OptionPage, LoadError> {
        let column = self.option_column(&field.value)?;
        let values = self.distinct(column, 0..self.nrows());
        let total = values.len();
        let page = page.max(1);
        let hierarchy = self.hierarchy(&field.value).ok();

        let options = values
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|value| {
                let mut option = self.option(column, value.clone());
                if let Some((parent, child)) = hierarchy {
                    let children = self.children_of(parent, child, &value);
                    option.children_size = Some(children.len());
                    if field.kind == FilterKind::TreeMultiSelect {
                        option.children = children;
                    }
                }
                option
            })
            .collect();
        Ok(OptionPage {
            options,
            total,
            page,
        })
    }

    fn get_file_info(path: PathBuf) -> Result<FileInfo, AppError> {
        let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::FileNotFound,
            ErrorKind::PermissionDenied => AppError::PermissionDenied,
            _ => AppError::IoError(e),
        })?;
        if !metadata.is_file() {
            return Err(AppError::LoadingFailed("Not a file!".into()));
        }

        let file_size = metadata.len();
        let file_type = Self::detect_file_type(&path)?;

        Ok(FileInfo {
            path,
            file_size,
            file_type,
        })
    }

    fn detect_file_type(path: &Path) -> Result<FileType, AppError> {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_uppercase())
            .as_deref()
        {
            Some("CSV") => Ok(FileType::Csv),
            Some("PARQUET") | Some("PQ") => Ok(FileType::Parquet),
            Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::Arrow),
            _ => Err(AppError::UnknownFileType),
        }
    }

    fn is_numeric_type(dtype: &DataType) -> bool {
        matches!(
            dtype,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
        )
    }

    fn load_column(df: &DataFrame, col_name: &str) -> Result<SourceColumn, PolarsError> {
        let numeric = Self::is_numeric_type(df.column(col_name)?.dtype());

        let col = df.column(col_name)?.cast(&DataType::String)?;
        let series = col.str()?;
        let data = series
            .into_iter()
            .map(|value| match value {
                Some(s) => s.replace("\r\n", " ↵ ").replace('\n', " ↵ "),
                None => String::new(),
            })
            .collect();

        Ok(SourceColumn {
            name: col_name.to_string(),
            data,
            numeric,
        })
    }

    fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyCsvReader::new(PlPath::Local(path.into()))
            .with_has_header(true)
            .finish()
    }

    fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
    }

    fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyFrame::scan_ipc(
            PlPath::Local(path.into()),
            polars::io::ipc::IpcScanOptions,
            UnifiedScanArgs::default(),
        )
    }
}

impl DataSource for FrameSource {
    #[instrument(skip_all, fields(source = %self.name, filters = filters.len(), page = page, page_size = page_size))]
    fn fetch(
        &self,
        filters: &[FilterValue],
        page: usize,
        page_size: usize,
    ) -> Result<Page, LoadError> {
        let start_time = Instant::now();
        let mut predicates = Vec::new();
        for filter in filters {
            predicates.extend(self.predicates(filter)?);
        }

        let matching: Vec<usize> = (0..self.nrows())
            .into_par_iter()
            .filter(|&row| predicates.iter().all(|p| p.matches(&self.columns, row)))
            .collect();
        let total = matching.len();
        let rows = matching
            .iter()
            .skip((page.max(1) - 1) * page_size)
            .take(page_size)
            .map(|&row| self.row(row))
            .collect::<Vec<_>>();

        debug!(
            "Fetched {} of {} rows in {}ms",
            rows.len(),
            total,
            start_time.elapsed().as_millis()
        );
        Ok(Page { rows, total })
    }
}

impl OptionLoader for FrameSource {
    fn load_options(&self, field: &FilterOption) -> Result<OptionPage, LoadError> {
        trace!("Loading options of {}", field.value);
        self.options_page(field, 1, field.page_size)
    }

    fn load_more(
        &self,
        field: &FilterOption,
        page: usize,
        page_size: usize,
    ) -> Result<OptionPage, LoadError> {
        trace!("Loading option page {} of {}", page, field.value);
        self.options_page(field, page, page_size)
    }

    fn load_children(&self, field: &str, parent_id: &str) -> Result<Vec<SelectOption>, LoadError> {
        let (parent, child) = self.hierarchy(field)?;
        Ok(self.children_of(parent, child, parent_id))
    }
}
