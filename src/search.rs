use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cascade::CascadeResolver;
use crate::domain::LoadError;
use crate::filters::{FilterKind, FilterModel, FilterOption, SelectOption};

/// Source of select options, injected into the search input.
pub trait OptionLoader: Send + Sync {
    /// First page of options of a lazily loaded field.
    fn load_options(&self, field: &FilterOption) -> Result<OptionPage, LoadError>;

    /// Page `page` (1-based) of a paged option list.
    fn load_more(
        &self,
        field: &FilterOption,
        page: usize,
        page_size: usize,
    ) -> Result<OptionPage, LoadError>;

    /// Second level options of a cascade field below `parent_id`.
    fn load_children(&self, field: &str, parent_id: &str) -> Result<Vec<SelectOption>, LoadError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionPage {
    pub options: Vec<SelectOption>,
    /// Number of options available over all pages.
    pub total: usize,
    pub page: usize,
}

/// Option load handed out to the host, which runs it off the event loop and
/// feeds the result back through [`SmartSearch::receive`].
#[derive(Debug, Clone)]
pub struct OptionRequest {
    pub field: FilterOption,
    pub page: usize,
    pub more: bool,
}

impl OptionRequest {
    pub fn key(&self) -> &str {
        &self.field.value
    }

    pub fn run(&self, loader: &dyn OptionLoader) -> Result<OptionPage, LoadError> {
        if self.more {
            loader.load_more(&self.field, self.page, self.field.page_size)
        } else {
            loader.load_options(&self.field)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed(LoadError),
}

#[derive(Debug, Clone)]
pub struct OptionCatalog {
    options: Vec<SelectOption>,
    total: usize,
    page: usize,
    state: LoadState,
}

impl OptionCatalog {
    fn idle() -> Self {
        Self {
            options: Vec::new(),
            total: 0,
            page: 0,
            state: LoadState::Idle,
        }
    }

    fn preloaded(options: Vec<SelectOption>) -> Self {
        Self {
            total: options.len(),
            page: 1,
            options,
            state: LoadState::Loaded,
        }
    }

    pub fn options(&self) -> &[SelectOption] {
        &self.options
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn has_more(&self) -> bool {
        self.options.len() < self.total
    }
}

/// State of the smart search input: the filter model, the option lists of
/// its select-like fields and the cascade resolvers.
pub struct SmartSearch {
    filters: FilterModel,
    catalogs: HashMap<String, OptionCatalog>,
    resolvers: HashMap<String, Arc<CascadeResolver>>,
    loader: Arc<dyn OptionLoader>,
}

impl SmartSearch {
    pub fn new(schema: Vec<FilterOption>, loader: Arc<dyn OptionLoader>) -> Self {
        let mut catalogs = HashMap::new();
        let mut resolvers = HashMap::new();
        for field in schema.iter().filter(|f| f.kind.has_options()) {
            let catalog = if field.lazy {
                OptionCatalog::idle()
            } else {
                OptionCatalog::preloaded(field.options.clone())
            };
            catalogs.insert(field.value.clone(), catalog);
            if field.kind == FilterKind::CascadeSelect {
                let resolver = CascadeResolver::new(field.value.clone(), Arc::clone(&loader));
                resolvers.insert(field.value.clone(), Arc::new(resolver));
            }
        }
        Self {
            filters: FilterModel::new(schema),
            catalogs,
            resolvers,
            loader,
        }
    }

    pub fn filters(&self) -> &FilterModel {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterModel {
        &mut self.filters
    }

    pub fn loader(&self) -> Arc<dyn OptionLoader> {
        Arc::clone(&self.loader)
    }

    pub fn resolver(&self, key: &str) -> Option<Arc<CascadeResolver>> {
        self.resolvers.get(key).cloned()
    }

    pub fn catalog(&self, key: &str) -> Option<&OptionCatalog> {
        self.catalogs.get(key)
    }

    pub fn options(&self, key: &str) -> &[SelectOption] {
        self.catalogs
            .get(key)
            .map(|c| c.options())
            .unwrap_or_default()
    }

    /// Request for the first option page of `key`, if it still has to be
    /// loaded. Marks the catalog as loading.
    pub fn options_request(&mut self, key: &str) -> Option<OptionRequest> {
        let field = self.filters.field(key)?.clone();
        let catalog = self.catalogs.get_mut(key)?;
        if !matches!(catalog.state, LoadState::Idle | LoadState::Failed(_)) {
            return None;
        }
        catalog.state = LoadState::Loading;
        debug!("Requesting options of {}", key);
        Some(OptionRequest {
            field,
            page: 1,
            more: false,
        })
    }

    /// Request for the next option page of `key`, if there is one.
    pub fn more_request(&mut self, key: &str) -> Option<OptionRequest> {
        let field = self.filters.field(key)?.clone();
        let catalog = self.catalogs.get_mut(key)?;
        // A failed page can be retried once the first page is in.
        let ready = match catalog.state {
            LoadState::Loaded => true,
            LoadState::Failed(_) => !catalog.options.is_empty(),
            LoadState::Idle | LoadState::Loading => false,
        };
        if !ready || !catalog.has_more() {
            return None;
        }
        catalog.state = LoadState::Loading;
        debug!("Requesting option page {} of {}", catalog.page + 1, key);
        Some(OptionRequest {
            field,
            page: catalog.page + 1,
            more: true,
        })
    }

    pub fn receive(&mut self, request: &OptionRequest, result: Result<OptionPage, LoadError>) {
        let key = request.key();
        let Some(catalog) = self.catalogs.get_mut(key) else {
            return;
        };
        match result {
            Ok(page) => {
                trace!(
                    "Received {} options for {} (page {}, total {})",
                    page.options.len(),
                    key,
                    page.page,
                    page.total
                );
                if request.more {
                    catalog.options.extend(page.options.iter().cloned());
                } else {
                    catalog.options = page.options.clone();
                }
                catalog.total = page.total;
                catalog.page = page.page;
                catalog.state = LoadState::Loaded;
                self.filters.register_labels(key, &page.options);
            }
            Err(e) => {
                warn!("Loading options of {} failed: {}", key, e);
                catalog.state = LoadState::Failed(e);
            }
        }
    }

    /// Registers loaded cascade children so chips can show their labels.
    pub fn children_loaded(&mut self, key: &str, parent_id: &str, children: &[SelectOption]) {
        self.filters.register_child_labels(key, parent_id, children);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::filters::FieldValue;

    struct PagedLoader {
        values: Vec<String>,
        fail: Mutex<bool>,
    }

    impl PagedLoader {
        fn page(&self, page: usize, page_size: usize) -> Result<OptionPage, LoadError> {
            if *self.fail.lock().unwrap() {
                return Err(LoadError::new("offline"));
            }
            let options = self
                .values
                .iter()
                .skip((page - 1) * page_size)
                .take(page_size)
                .map(|v| SelectOption::new(v.to_uppercase(), v.as_str()))
                .collect();
            Ok(OptionPage {
                options,
                total: self.values.len(),
                page,
            })
        }
    }

    impl OptionLoader for PagedLoader {
        fn load_options(&self, field: &FilterOption) -> Result<OptionPage, LoadError> {
            self.page(1, field.page_size)
        }

        fn load_more(
            &self,
            _field: &FilterOption,
            page: usize,
            page_size: usize,
        ) -> Result<OptionPage, LoadError> {
            self.page(page, page_size)
        }

        fn load_children(&self, _field: &str, parent_id: &str) -> Result<Vec<SelectOption>, LoadError> {
            Ok(vec![SelectOption::new(format!("{parent_id} child"), "c1")])
        }
    }

    fn search() -> (SmartSearch, Arc<PagedLoader>) {
        let loader = Arc::new(PagedLoader {
            values: (1..=5).map(|i| format!("v{i}")).collect(),
            fail: Mutex::new(false),
        });
        let schema = vec![
            FilterOption::new("Name", "name", FilterKind::Text),
            FilterOption::new("Team", "team", FilterKind::Select)
                .lazy(true)
                .page_size(2usize),
            FilterOption::new("Status", "status", FilterKind::Select)
                .options(vec![SelectOption::new("Active", "on")]),
            FilterOption::new("Region", "region", FilterKind::CascadeSelect),
        ];
        (SmartSearch::new(schema, loader.clone()), loader)
    }

    fn run(search: &mut SmartSearch, request: OptionRequest) {
        let result = request.run(search.loader().as_ref());
        search.receive(&request, result);
    }

    #[test]
    fn static_options_need_no_request() {
        let (mut search, _) = search();
        assert!(search.options_request("status").is_none());
        assert!(search.options_request("name").is_none());
        assert_eq!(search.options("status").len(), 1);
        assert!(search.resolver("region").is_some());
        assert!(search.resolver("team").is_none());
    }

    #[test]
    fn lazy_options_load_page_by_page() {
        let (mut search, _) = search();
        let request = search.options_request("team").unwrap();
        assert_eq!(search.catalog("team").unwrap().state(), &LoadState::Loading);
        assert!(search.options_request("team").is_none());
        run(&mut search, request);
        assert_eq!(search.options("team").len(), 2);

        while let Some(request) = search.more_request("team") {
            run(&mut search, request);
        }
        let catalog = search.catalog("team").unwrap();
        assert_eq!(catalog.options().len(), 5);
        assert!(!catalog.has_more());

        search
            .filters_mut()
            .set_value("team", FieldValue::Select("v5".into()))
            .unwrap();
        search.filters_mut().commit();
        assert_eq!(search.filters().active()[0].display, "V5");
    }

    #[test]
    fn failed_load_keeps_options_and_allows_retry() {
        let (mut search, loader) = search();
        let request = search.options_request("team").unwrap();
        run(&mut search, request);

        *loader.fail.lock().unwrap() = true;
        let request = search.more_request("team").unwrap();
        run(&mut search, request);
        let catalog = search.catalog("team").unwrap();
        assert!(matches!(catalog.state(), LoadState::Failed(_)));
        assert_eq!(catalog.options().len(), 2);

        *loader.fail.lock().unwrap() = false;
        let request = search.options_request("team").unwrap();
        run(&mut search, request);
        assert_eq!(search.catalog("team").unwrap().state(), &LoadState::Loaded);
    }

    #[test]
    fn failed_page_is_retried_with_more_request() {
        let (mut search, loader) = search();
        let request = search.options_request("team").unwrap();
        run(&mut search, request);

        *loader.fail.lock().unwrap() = true;
        let request = search.more_request("team").unwrap();
        run(&mut search, request);
        assert!(matches!(search.catalog("team").unwrap().state(), LoadState::Failed(_)));

        *loader.fail.lock().unwrap() = false;
        let request = search.more_request("team").unwrap();
        assert_eq!(request.page, 2);
        run(&mut search, request);
        let catalog = search.catalog("team").unwrap();
        assert_eq!(catalog.state(), &LoadState::Loaded);
        assert_eq!(catalog.options().len(), 4);
        assert_eq!(catalog.total(), 5);
    }

    #[test]
    fn failed_first_page_is_not_paged() {
        let (mut search, loader) = search();
        *loader.fail.lock().unwrap() = true;
        let request = search.options_request("team").unwrap();
        run(&mut search, request);
        assert!(search.more_request("team").is_none());
        assert!(search.options_request("team").is_some());
    }

    #[test]
    fn cascade_children_resolve_to_labels() {
        let (mut search, _) = search();
        let resolver = search.resolver("region").unwrap();
        for parent in ["north", "south"] {
            let children = resolver.select(parent).unwrap();
            search.children_loaded("region", parent, &children);
        }
        search
            .filters_mut()
            .set_value(
                "region",
                FieldValue::CascadeSelect(crate::filters::CascadeValue::new(
                    Some("north".into()),
                    Some("c1".into()),
                )),
            )
            .unwrap();
        search.filters_mut().commit();
        assert_eq!(search.filters().active()[0].display, "north / north child");
    }
}
