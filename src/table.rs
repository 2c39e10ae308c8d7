//! The advanced table: columns, smart search, pagination and the rows of the
//! latest fetch.
//!
//! Filter changes reset the page and produce a [`FetchRequest`]; column
//! changes never do. Each request carries a ticket and only the response to
//! the newest ticket is applied, so a slow response to an older filter
//! snapshot cannot overwrite newer rows.

use tracing::{debug, trace, warn};

use crate::columns::ColumnRegistry;
use crate::domain::LoadError;
use crate::filters::{FieldValue, FilterError, FilterValue, Snapshot};
use crate::pagination::{Pagination, PaginationError};
use crate::search::SmartSearch;
use crate::source::{Page, Row};

/// Data fetch to run against the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: u64,
    /// Revision of the filter snapshot the request was built from.
    pub revision: u64,
    pub filters: Snapshot,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Failed(LoadError),
    /// A newer request was issued; the response was dropped.
    Stale,
}

pub struct AdvancedTable {
    columns: ColumnRegistry,
    search: SmartSearch,
    pagination: Pagination,
    // page and page size of the rows currently shown
    applied: (usize, usize),
    latest_ticket: u64,
    loading: bool,
    rows: Vec<Row>,
    error: Option<LoadError>,
}

impl AdvancedTable {
    pub fn new(columns: ColumnRegistry, search: SmartSearch, pagination: Pagination) -> Self {
        let applied = (pagination.page(), pagination.page_size());
        Self {
            columns,
            search,
            pagination,
            applied,
            latest_ticket: 0,
            loading: false,
            rows: Vec::new(),
            error: None,
        }
    }

    pub fn columns(&self) -> &ColumnRegistry {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut ColumnRegistry {
        &mut self.columns
    }

    pub fn search(&self) -> &SmartSearch {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut SmartSearch {
        &mut self.search
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    fn request(&mut self) -> FetchRequest {
        self.latest_ticket += 1;
        self.loading = true;
        let filters = self.search.filters().snapshot().clone();
        let request = FetchRequest {
            ticket: self.latest_ticket,
            revision: filters.revision(),
            filters,
            page: self.pagination.page(),
            page_size: self.pagination.page_size(),
        };
        debug!(
            "Fetch #{} for snapshot {} page {}/{}",
            request.ticket, request.revision, request.page, request.page_size
        );
        request
    }

    // New snapshot: back to the first page, then reload.
    fn on_snapshot(&mut self) -> FetchRequest {
        self.pagination.reset();
        self.request()
    }

    /// Initial load and manual refresh.
    pub fn refresh(&mut self) -> FetchRequest {
        self.request()
    }

    pub fn commit_filters(&mut self) -> FetchRequest {
        self.search.filters_mut().commit();
        self.on_snapshot()
    }

    /// Stages one value and commits it right away, as the quick search does.
    pub fn set_filter_and_commit(
        &mut self,
        key: &str,
        value: FieldValue,
    ) -> Result<FetchRequest, FilterError> {
        self.search.filters_mut().set_value(key, value)?;
        Ok(self.commit_filters())
    }

    pub fn apply_advanced(&mut self, values: Vec<FilterValue>) -> Result<FetchRequest, FilterError> {
        self.search.filters_mut().apply_advanced(values)?;
        Ok(self.on_snapshot())
    }

    /// `None` when the field was not filtered; nothing is reloaded then.
    pub fn clear_filter(&mut self, key: &str) -> Option<FetchRequest> {
        self.search.filters_mut().clear(key)?;
        Some(self.on_snapshot())
    }

    pub fn clear_all_filters(&mut self) -> Option<FetchRequest> {
        self.search.filters_mut().clear_all()?;
        Some(self.on_snapshot())
    }

    pub fn set_page(&mut self, page: usize) -> Option<FetchRequest> {
        let before = self.pagination.page();
        self.pagination.set_page(page);
        (self.pagination.page() != before).then(|| self.request())
    }

    pub fn set_page_size(&mut self, page_size: usize) -> Result<FetchRequest, PaginationError> {
        self.pagination.set_page_size(page_size)?;
        Ok(self.request())
    }

    pub fn cycle_page_size(&mut self) -> FetchRequest {
        self.pagination.cycle_page_size();
        self.request()
    }

    pub fn next_page(&mut self) -> Option<FetchRequest> {
        self.pagination.next().then(|| self.request())
    }

    pub fn prev_page(&mut self) -> Option<FetchRequest> {
        self.pagination.prev().then(|| self.request())
    }

    pub fn first_page(&mut self) -> Option<FetchRequest> {
        self.pagination.first().then(|| self.request())
    }

    pub fn last_page(&mut self) -> Option<FetchRequest> {
        self.pagination.last().then(|| self.request())
    }

    /// Applies the response to `ticket` if it is still the latest request.
    /// A failure keeps the current rows and total, and moves the pagination
    /// back to the page those rows belong to.
    pub fn complete_fetch(&mut self, ticket: u64, result: Result<Page, LoadError>) -> FetchOutcome {
        if ticket != self.latest_ticket {
            warn!(
                "Dropping stale response #{} (latest #{})",
                ticket, self.latest_ticket
            );
            return FetchOutcome::Stale;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                trace!("Fetch #{} returned {} rows", ticket, page.rows.len());
                self.pagination.set_total(page.total);
                self.applied = (self.pagination.page(), self.pagination.page_size());
                self.rows = page.rows;
                self.error = None;
                FetchOutcome::Applied
            }
            Err(e) => {
                warn!("Fetch #{} failed: {}", ticket, e);
                let (page, page_size) = self.applied;
                self.pagination.restore(page, page_size);
                self.error = Some(e.clone());
                FetchOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::columns::{Change, Column, Fixed};
    use crate::filters::{FilterKind, FilterOption, SelectOption};
    use crate::source::{DataSource, FrameSource};

    struct CountingSource {
        inner: FrameSource,
        fetches: AtomicUsize,
    }

    impl DataSource for CountingSource {
        fn fetch(
            &self,
            filters: &[FilterValue],
            page: usize,
            page_size: usize,
        ) -> Result<Page, LoadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(filters, page, page_size)
        }
    }

    fn users() -> FrameSource {
        let n = 60;
        let ids: Vec<String> = (1..=n).map(|i| format!("USR-{i:04}")).collect();
        let roles = ["管理员", "编辑", "查看"];
        let statuses = ["正常", "禁用"];
        let role: Vec<&str> = (0..n).map(|i| roles[i % 3]).collect();
        let status: Vec<&str> = (0..n).map(|i| statuses[i % 2]).collect();
        FrameSource::from_columns(
            "users",
            vec![
                ("id", ids.iter().map(String::as_str).collect()),
                ("role", role),
                ("status", status),
            ],
        )
    }

    fn table() -> (AdvancedTable, CountingSource) {
        let source = users();
        let columns = ColumnRegistry::new(vec![
            Column::new("ID", "id").fixed(Fixed::Left).lock(true),
            Column::new("Role", "role"),
            Column::new("Status", "status"),
        ])
        .unwrap();
        let schema = vec![
            FilterOption::new("Status", "status", FilterKind::Select).options(vec![
                SelectOption::new("正常", "正常"),
                SelectOption::new("禁用", "禁用"),
            ]),
            FilterOption::new("Role", "role", FilterKind::Select).lazy(true),
        ];
        let search = SmartSearch::new(schema, Arc::new(users()));
        let table = AdvancedTable::new(columns, search, Pagination::default());
        (
            table,
            CountingSource {
                inner: source,
                fetches: AtomicUsize::new(0),
            },
        )
    }

    fn run(table: &mut AdvancedTable, source: &CountingSource, request: FetchRequest) -> FetchOutcome {
        let result = source.fetch(request.filters.filters(), request.page, request.page_size);
        table.complete_fetch(request.ticket, result)
    }

    #[test]
    fn advanced_apply_fetches_once_with_combined_filters() {
        let (mut table, source) = table();
        let request = table.refresh();
        run(&mut table, &source, request);
        let request = table.set_page(3).unwrap();
        run(&mut table, &source, request);
        assert_eq!(table.pagination().page(), 3);

        let request = table
            .set_filter_and_commit("status", FieldValue::Select("正常".into()))
            .unwrap();
        run(&mut table, &source, request);
        if let Some(request) = table.set_page(2) {
            run(&mut table, &source, request);
        }
        assert_eq!(table.pagination().page(), 2);

        let before_apply = source.fetches.load(Ordering::SeqCst);
        let request = table
            .apply_advanced(vec![FilterValue::new(
                "role",
                FieldValue::Select("编辑".into()),
            )])
            .unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.filters.filters().len(), 2);
        assert_eq!(run(&mut table, &source, request), FetchOutcome::Applied);

        assert_eq!(source.fetches.load(Ordering::SeqCst), before_apply + 1);
        assert_eq!(table.pagination().page(), 1);
        assert!(table.rows().iter().all(|r| r["status"] == "正常" && r["role"] == "编辑"));
        assert_eq!(table.pagination().total(), 10);
    }

    #[test]
    fn stale_response_is_discarded() {
        let (mut table, source) = table();
        let s1 = table
            .set_filter_and_commit("status", FieldValue::Select("正常".into()))
            .unwrap();
        let s2 = table
            .set_filter_and_commit("status", FieldValue::Select("禁用".into()))
            .unwrap();
        assert!(s2.revision > s1.revision);

        assert_eq!(run(&mut table, &source, s2), FetchOutcome::Applied);
        assert_eq!(run(&mut table, &source, s1), FetchOutcome::Stale);
        assert!(table.rows().iter().all(|r| r["status"] == "禁用"));
        assert_eq!(table.pagination().total(), 30);
        assert!(!table.is_loading());
    }

    #[test]
    fn failed_fetch_keeps_previous_rows() {
        let (mut table, source) = table();
        let request = table.refresh();
        run(&mut table, &source, request);
        let rows = table.rows().to_vec();

        let request = table.next_page().unwrap();
        let outcome = table.complete_fetch(request.ticket, Err(LoadError::new("timeout")));
        assert_eq!(outcome, FetchOutcome::Failed(LoadError::new("timeout")));
        assert_eq!(table.rows(), rows.as_slice());
        assert_eq!(table.pagination().total(), 60);
        assert_eq!(table.error(), Some(&LoadError::new("timeout")));
        // The footer must still describe the rows on screen.
        assert_eq!(table.pagination().page(), 1);
        assert_eq!(table.rows()[0]["id"], "USR-0001");
    }

    #[test]
    fn failed_page_size_change_restores_previous_size() {
        let (mut table, source) = table();
        let request = table.refresh();
        run(&mut table, &source, request);
        let request = table.set_page(2).unwrap();
        run(&mut table, &source, request);

        let request = table.cycle_page_size();
        assert_eq!((request.page, request.page_size), (1, 50));
        table.complete_fetch(request.ticket, Err(LoadError::new("offline")));
        assert_eq!(table.pagination().page(), 2);
        assert_eq!(table.pagination().page_size(), 20);
        assert_eq!(table.rows()[0]["id"], "USR-0021");

        // The next move starts from the restored position.
        let request = table.next_page().unwrap();
        assert_eq!((request.page, request.page_size), (3, 20));
    }

    #[test]
    fn clearing_unfiltered_field_does_not_reload() {
        let (mut table, _) = table();
        assert!(table.clear_filter("status").is_none());
        assert!(table.clear_all_filters().is_none());

        table
            .set_filter_and_commit("status", FieldValue::Select("正常".into()))
            .unwrap();
        let request = table.clear_all_filters().unwrap();
        assert!(request.filters.filters().is_empty());
        assert_eq!(request.page, 1);
    }

    #[test]
    fn page_size_change_resets_page_and_reloads() {
        let (mut table, source) = table();
        let request = table.refresh();
        run(&mut table, &source, request);
        table.set_page(3).unwrap();

        let request = table.set_page_size(50).unwrap();
        assert_eq!((request.page, request.page_size), (1, 50));
        assert!(table.set_page_size(7).is_err());
    }

    #[test]
    fn column_changes_do_not_fetch() {
        let (mut table, _) = table();
        let request = table.refresh();
        assert_eq!(table.columns_mut().toggle_show("role").unwrap(), Change::Applied);
        assert_eq!(table.columns_mut().toggle_show("id").unwrap(), Change::NoOp);
        // Still waiting for the first request only.
        assert_eq!(request.ticket, 1);
        assert!(table.is_loading());
    }

    #[test]
    fn shape_mismatch_does_not_reload() {
        let (mut table, _) = table();
        let err = table
            .set_filter_and_commit("status", FieldValue::Text("正常".into()))
            .unwrap_err();
        assert!(matches!(err, FilterError::ShapeMismatch { .. }));
        assert!(!table.is_loading());
        assert_eq!(table.search().filters().snapshot().revision(), 0);
    }
}
