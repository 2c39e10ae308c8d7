//! Typed filter fields and the filter model behind the smart search input.
//!
//! Every field declares a [`FilterKind`]; the value assigned to it must be the
//! matching [`FieldValue`] variant. Values are staged with
//! [`FilterModel::set_value`] and become active with [`FilterModel::commit`],
//! which produces the immutable [`Snapshot`] used for data fetches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use derive_setters::Setters;
use thiserror::Error;
use tracing::{debug, trace};

use crate::daterange::DateTimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Text,
    Select,
    MultiSelect,
    TreeMultiSelect,
    DateTimeRange,
    CascadeSelect,
}

impl FilterKind {
    pub fn has_options(&self) -> bool {
        matches!(
            self,
            FilterKind::Select
                | FilterKind::MultiSelect
                | FilterKind::TreeMultiSelect
                | FilterKind::CascadeSelect
        )
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::Text => "text",
            FilterKind::Select => "select",
            FilterKind::MultiSelect => "multi-select",
            FilterKind::TreeMultiSelect => "tree-multi-select",
            FilterKind::DateTimeRange => "date-time-range",
            FilterKind::CascadeSelect => "cascade-select",
        };
        f.write_str(name)
    }
}

/// Value of a select option, either a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionValue {
    Text(String),
    Number(i64),
}

impl OptionValue {
    /// Numeric looking strings become numbers, like the data source reports them.
    pub fn parse(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(n) => OptionValue::Number(n),
            Err(_) => OptionValue::Text(value.to_string()),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, OptionValue::Text(s) if s.is_empty())
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Text(s) => f.write_str(s),
            OptionValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub label: String,
    pub value: OptionValue,
    /// Identifier used as the parent id of cascade children.
    pub id: Option<String>,
    pub children: Vec<SelectOption>,
    pub children_size: Option<usize>,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            id: None,
            children: Vec::new(),
            children_size: None,
        }
    }

    /// Id used when this option is picked as a cascade parent.
    pub fn parent_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.value.to_string())
    }
}

/// Two level path of a cascade select. `level2` only counts when `level1` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CascadeValue {
    pub level1: Option<String>,
    pub level2: Option<String>,
}

impl CascadeValue {
    pub fn new(level1: Option<String>, level2: Option<String>) -> Self {
        let level2 = if level1.is_some() { level2 } else { None };
        Self { level1, level2 }
    }
}

/// Filter value, one variant per [`FilterKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Select(OptionValue),
    MultiSelect(Vec<OptionValue>),
    TreeMultiSelect(Vec<OptionValue>),
    DateTimeRange(DateTimeRange),
    CascadeSelect(CascadeValue),
}

impl FieldValue {
    pub fn kind(&self) -> FilterKind {
        match self {
            FieldValue::Text(_) => FilterKind::Text,
            FieldValue::Select(_) => FilterKind::Select,
            FieldValue::MultiSelect(_) => FilterKind::MultiSelect,
            FieldValue::TreeMultiSelect(_) => FilterKind::TreeMultiSelect,
            FieldValue::DateTimeRange(_) => FilterKind::DateTimeRange,
            FieldValue::CascadeSelect(_) => FilterKind::CascadeSelect,
        }
    }

    /// Empty values carry no filter and clear their field instead.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Select(v) => v.is_empty(),
            FieldValue::MultiSelect(vs) | FieldValue::TreeMultiSelect(vs) => vs.is_empty(),
            FieldValue::DateTimeRange(r) => r.is_open(),
            FieldValue::CascadeSelect(c) => c.level1.is_none(),
        }
    }

    /// Empty value of the given kind.
    pub fn empty(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Text => FieldValue::Text(String::new()),
            FilterKind::Select => FieldValue::Select(OptionValue::Text(String::new())),
            FilterKind::MultiSelect => FieldValue::MultiSelect(Vec::new()),
            FilterKind::TreeMultiSelect => FieldValue::TreeMultiSelect(Vec::new()),
            FilterKind::DateTimeRange => FieldValue::DateTimeRange(DateTimeRange::default()),
            FilterKind::CascadeSelect => FieldValue::CascadeSelect(CascadeValue::default()),
        }
    }

    fn normalized(self) -> Self {
        match self {
            FieldValue::CascadeSelect(c) => {
                FieldValue::CascadeSelect(CascadeValue::new(c.level1, c.level2))
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterValue {
    pub key: String,
    pub value: FieldValue,
}

impl FilterValue {
    pub fn new(key: impl Into<String>, value: FieldValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Declaration of one filter field.
#[derive(Debug, Clone, Setters)]
#[setters(into)]
pub struct FilterOption {
    pub label: String,
    /// Field key, shared with the data column it filters.
    pub value: String,
    pub kind: FilterKind,
    pub options: Vec<SelectOption>,
    #[setters(strip_option)]
    pub placeholder: Option<String>,
    /// Options come from the option loader instead of `options`.
    pub lazy: bool,
    pub page_size: usize,
    #[setters(strip_option)]
    pub level1_label: Option<String>,
    #[setters(strip_option)]
    pub level2_label: Option<String>,
}

impl FilterOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            kind,
            options: Vec::new(),
            placeholder: None,
            lazy: false,
            page_size: 20,
            level1_label: None,
            level2_label: None,
        }
    }
}

/// Active filter plus the text shown on its chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFilterItem {
    pub key: String,
    pub label: String,
    pub value: FieldValue,
    pub display: String,
}

impl ActiveFilterItem {
    pub fn chip(&self) -> String {
        format!("{}: {}", self.label, self.display)
    }
}

/// Immutable committed filter state. `revision` increases with every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    revision: u64,
    filters: Arc<Vec<FilterValue>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            revision: 0,
            filters: Arc::new(Vec::new()),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn filters(&self) -> &[FilterValue] {
        &self.filters
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.filters.iter().find(|f| f.key == key).map(|f| &f.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("field '{key}' expects a {expected} value, got {found}")]
    ShapeMismatch {
        key: String,
        expected: FilterKind,
        found: FilterKind,
    },
    #[error("unknown filter field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone)]
pub struct FilterModel {
    schema: Vec<FilterOption>,
    // field key -> option value -> label, for chip text
    labels: HashMap<String, HashMap<String, String>>,
    // (cascade field key, parent id) -> child value -> label
    child_labels: HashMap<(String, String), HashMap<String, String>>,
    // `None` stages a removal of the field
    pending: Vec<(String, Option<FieldValue>)>,
    active: Vec<ActiveFilterItem>,
    snapshot: Snapshot,
}

impl FilterModel {
    pub fn new(schema: Vec<FilterOption>) -> Self {
        let mut model = Self {
            schema,
            labels: HashMap::new(),
            child_labels: HashMap::new(),
            pending: Vec::new(),
            active: Vec::new(),
            snapshot: Snapshot::empty(),
        };
        let static_options: Vec<(String, Vec<SelectOption>)> = model
            .schema
            .iter()
            .map(|f| (f.value.clone(), f.options.clone()))
            .collect();
        for (key, options) in static_options {
            model.register_labels(&key, &options);
        }
        model
    }

    pub fn schema(&self) -> &[FilterOption] {
        &self.schema
    }

    pub fn field(&self, key: &str) -> Option<&FilterOption> {
        self.schema.iter().find(|f| f.value == key)
    }

    pub fn active(&self) -> &[ActiveFilterItem] {
        &self.active
    }

    pub fn active_value(&self, key: &str) -> Option<&FieldValue> {
        self.active.iter().find(|a| a.key == key).map(|a| &a.value)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Staged value of a field; `Some(None)` means a staged removal.
    #[cfg(test)]
    pub fn pending_value(&self, key: &str) -> Option<Option<&FieldValue>> {
        self.pending
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Remembers option labels so chips can show them instead of raw values.
    pub fn register_labels(&mut self, key: &str, options: &[SelectOption]) {
        let labels = self.labels.entry(key.to_string()).or_default();
        let mut stack: Vec<&SelectOption> = options.iter().collect();
        while let Some(option) = stack.pop() {
            labels.insert(option.value.to_string(), option.label.clone());
            if let Some(id) = &option.id {
                labels.insert(id.clone(), option.label.clone());
            }
            stack.extend(option.children.iter());
        }
    }

    /// Labels of cascade children below `parent_id`. Children of different
    /// parents may share values, so they are kept apart.
    pub fn register_child_labels(&mut self, key: &str, parent_id: &str, children: &[SelectOption]) {
        let labels = self
            .child_labels
            .entry((key.to_string(), parent_id.to_string()))
            .or_default();
        for child in children {
            labels.insert(child.value.to_string(), child.label.clone());
        }
    }

    fn validate(&self, key: &str, value: &FieldValue) -> Result<(), FilterError> {
        let field = self
            .field(key)
            .ok_or_else(|| FilterError::UnknownField(key.to_string()))?;
        if field.kind != value.kind() {
            return Err(FilterError::ShapeMismatch {
                key: key.to_string(),
                expected: field.kind,
                found: value.kind(),
            });
        }
        Ok(())
    }

    fn stage(&mut self, key: &str, value: FieldValue) {
        let value = value.normalized();
        let staged = if value.is_empty() { None } else { Some(value) };
        match self.pending.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = staged,
            None => self.pending.push((key.to_string(), staged)),
        }
    }

    /// Stages a value for `key`. The model is unchanged on error.
    pub fn set_value(&mut self, key: &str, value: FieldValue) -> Result<(), FilterError> {
        self.validate(key, &value)?;
        trace!("Staging filter {} = {:?}", key, value);
        self.stage(key, value);
        Ok(())
    }

    /// Applies all staged values and returns the new snapshot.
    pub fn commit(&mut self) -> Snapshot {
        let pending = std::mem::take(&mut self.pending);
        for (key, staged) in pending {
            match staged {
                Some(value) => {
                    let item = self.active_item(&key, value);
                    match self.active.iter_mut().find(|a| a.key == key) {
                        Some(existing) => *existing = item,
                        None => self.active.push(item),
                    }
                }
                None => self.active.retain(|a| a.key != key),
            }
        }
        self.publish()
    }

    /// Removes one active filter. `None` when the field was not active, in
    /// which case a staged value for it is kept.
    pub fn clear(&mut self, key: &str) -> Option<Snapshot> {
        if !self.active.iter().any(|a| a.key == key) {
            return None;
        }
        self.pending.retain(|(k, _)| k != key);
        self.active.retain(|a| a.key != key);
        Some(self.publish())
    }

    /// Removes every active filter. `None` when nothing was active.
    pub fn clear_all(&mut self) -> Option<Snapshot> {
        self.pending.clear();
        if self.active.is_empty() {
            return None;
        }
        self.active.clear();
        Some(self.publish())
    }

    /// Stages several values and commits them together. Nothing is staged if
    /// any value fails validation.
    pub fn apply_advanced(&mut self, values: Vec<FilterValue>) -> Result<Snapshot, FilterError> {
        for filter in &values {
            self.validate(&filter.key, &filter.value)?;
        }
        for filter in values {
            self.stage(&filter.key, filter.value);
        }
        Ok(self.commit())
    }

    fn publish(&mut self) -> Snapshot {
        let filters = self
            .active
            .iter()
            .map(|a| FilterValue::new(a.key.clone(), a.value.clone()))
            .collect();
        self.snapshot = Snapshot {
            revision: self.snapshot.revision + 1,
            filters: Arc::new(filters),
        };
        debug!(
            "Filter snapshot {} with {} filters",
            self.snapshot.revision,
            self.snapshot.filters.len()
        );
        self.snapshot.clone()
    }

    fn active_item(&self, key: &str, value: FieldValue) -> ActiveFilterItem {
        let label = self
            .field(key)
            .map(|f| f.label.clone())
            .unwrap_or_else(|| key.to_string());
        let display = self.describe(key, &value);
        ActiveFilterItem {
            key: key.to_string(),
            label,
            value,
            display,
        }
    }

    fn option_label(&self, key: &str, value: &str) -> String {
        self.labels
            .get(key)
            .and_then(|labels| labels.get(value))
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }

    fn child_label(&self, key: &str, parent_id: &str, value: &str) -> String {
        self.child_labels
            .get(&(key.to_string(), parent_id.to_string()))
            .and_then(|labels| labels.get(value))
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }

    /// Chip text for a value, with option values resolved to their labels.
    pub fn describe(&self, key: &str, value: &FieldValue) -> String {
        match value {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Select(v) => self.option_label(key, &v.to_string()),
            FieldValue::MultiSelect(vs) | FieldValue::TreeMultiSelect(vs) => vs
                .iter()
                .map(|v| self.option_label(key, &v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::DateTimeRange(r) => r.to_string(),
            FieldValue::CascadeSelect(c) => match (&c.level1, &c.level2) {
                (Some(parent), Some(child)) => format!(
                    "{} / {}",
                    self.option_label(key, parent),
                    self.child_label(key, parent, child)
                ),
                (Some(parent), None) => self.option_label(key, parent),
                (None, _) => String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<FilterOption> {
        vec![
            FilterOption::new("Name", "name", FilterKind::Text),
            FilterOption::new("Status", "status", FilterKind::Select).options(vec![
                SelectOption::new("Active", "正常"),
                SelectOption::new("Disabled", "禁用"),
            ]),
            FilterOption::new("Role", "role", FilterKind::MultiSelect),
            FilterOption::new("Region", "province", FilterKind::CascadeSelect),
            FilterOption::new("Last login", "lastLogin", FilterKind::DateTimeRange),
        ]
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn shape_mismatch_leaves_model_unchanged() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();
        let before = (model.pending.clone(), model.active.clone(), model.snapshot.clone());

        let err = model.set_value("status", text("正常")).unwrap_err();
        assert_eq!(
            err,
            FilterError::ShapeMismatch {
                key: "status".into(),
                expected: FilterKind::Select,
                found: FilterKind::Text,
            }
        );
        assert_eq!(
            model.set_value("missing", text("x")).unwrap_err(),
            FilterError::UnknownField("missing".into())
        );
        assert_eq!(before, (model.pending.clone(), model.active.clone(), model.snapshot.clone()));
    }

    #[test]
    fn commit_moves_pending_into_active() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();
        model
            .set_value("status", FieldValue::Select("正常".into()))
            .unwrap();
        assert!(model.active().is_empty());

        let snapshot = model.commit();
        assert_eq!(snapshot.revision(), 1);
        assert_eq!(snapshot.filters().len(), 2);
        assert!(!model.has_pending());
        assert_eq!(model.active()[1].chip(), "Status: Active");
    }

    #[test]
    fn empty_value_clears_field_on_commit() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();
        model.commit();

        model.set_value("name", text("   ")).unwrap();
        assert_eq!(model.pending_value("name"), Some(None));
        let snapshot = model.commit();
        assert!(snapshot.filters().is_empty());
        assert!(model.active().is_empty());
    }

    #[test]
    fn cascade_level2_needs_level1() {
        let mut model = FilterModel::new(schema());
        model
            .set_value(
                "province",
                FieldValue::CascadeSelect(CascadeValue {
                    level1: None,
                    level2: Some("广州".into()),
                }),
            )
            .unwrap();
        assert_eq!(model.pending_value("province"), Some(None));

        let value = CascadeValue::new(Some("广东".into()), Some("广州".into()));
        model
            .set_value("province", FieldValue::CascadeSelect(value.clone()))
            .unwrap();
        let snapshot = model.commit();
        assert_eq!(
            snapshot.get("province"),
            Some(&FieldValue::CascadeSelect(value))
        );
        assert_eq!(model.active()[0].display, "广东 / 广州");
    }

    #[test]
    fn clear_unset_key_is_idempotent() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();
        model.commit();

        assert!(model.clear("role").is_none());
        let once = (model.active.clone(), model.snapshot.clone());
        assert!(model.clear("role").is_none());
        assert_eq!(once, (model.active.clone(), model.snapshot.clone()));

        let snapshot = model.clear("name").unwrap();
        assert!(snapshot.filters().is_empty());
        assert!(model.clear("name").is_none());
        assert!(model.clear_all().is_none());
    }

    #[test]
    fn clearing_inactive_field_keeps_its_staged_value() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();

        assert!(model.clear("name").is_none());
        assert!(model.has_pending());
        assert_eq!(model.pending_value("name"), Some(Some(&text("ann"))));

        let snapshot = model.commit();
        assert_eq!(snapshot.get("name"), Some(&text("ann")));
    }

    #[test]
    fn cascade_child_labels_are_kept_per_parent() {
        let mut model = FilterModel::new(schema());
        model.register_labels(
            "province",
            &[SelectOption::new("Guangdong", "广东"), SelectOption::new("Zhejiang", "浙江")],
        );
        model.register_child_labels("province", "广东", &[SelectOption::new("Downtown GZ", "c1")]);
        model.register_child_labels("province", "浙江", &[SelectOption::new("Downtown HZ", "c1")]);

        let guangdong = CascadeValue::new(Some("广东".into()), Some("c1".into()));
        let zhejiang = CascadeValue::new(Some("浙江".into()), Some("c1".into()));
        assert_eq!(
            model.describe("province", &FieldValue::CascadeSelect(guangdong)),
            "Guangdong / Downtown GZ"
        );
        assert_eq!(
            model.describe("province", &FieldValue::CascadeSelect(zhejiang)),
            "Zhejiang / Downtown HZ"
        );
    }

    #[test]
    fn apply_advanced_commits_once_and_is_atomic() {
        let mut model = FilterModel::new(schema());
        model
            .set_value("status", FieldValue::Select("正常".into()))
            .unwrap();
        let first = model.commit();

        let err = model
            .apply_advanced(vec![
                FilterValue::new("role", FieldValue::MultiSelect(vec!["编辑".into()])),
                FilterValue::new("name", FieldValue::Select("x".into())),
            ])
            .unwrap_err();
        assert!(matches!(err, FilterError::ShapeMismatch { .. }));
        assert!(!model.has_pending());
        assert_eq!(model.snapshot(), &first);

        let snapshot = model
            .apply_advanced(vec![FilterValue::new(
                "role",
                FieldValue::MultiSelect(vec!["编辑".into()]),
            )])
            .unwrap();
        assert_eq!(snapshot.revision(), first.revision() + 1);
        assert!(snapshot.get("status").is_some());
        assert!(snapshot.get("role").is_some());
    }

    #[test]
    fn recommit_replaces_value_in_place() {
        let mut model = FilterModel::new(schema());
        model.set_value("name", text("ann")).unwrap();
        model
            .set_value("status", FieldValue::Select("正常".into()))
            .unwrap();
        model.commit();
        model.set_value("name", text("bob")).unwrap();
        model.commit();

        let keys: Vec<&str> = model.active().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["name", "status"]);
        assert_eq!(model.active_value("name"), Some(&text("bob")));
    }
}
