use derive_setters::Setters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKey {
    Filter,
    QuickSearch,
    Columns,
    ClearFilters,
    Refresh,
    CopyRow,
    Help,
}

#[derive(Debug, Clone, Setters)]
#[setters(into)]
pub struct ToolbarAction {
    #[setters(skip)]
    pub key: ActionKey,
    pub label: String,
    pub shortcut: String,
    pub show: bool,
    pub disabled: bool,
}

impl ToolbarAction {
    pub fn new(key: ActionKey, label: impl Into<String>, shortcut: impl Into<String>) -> Self {
        Self {
            key,
            label: label.into(),
            shortcut: shortcut.into(),
            show: true,
            disabled: false,
        }
    }
}

/// State the toolbar derives its disabled flags from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolbarContext {
    pub has_filters: bool,
    pub has_text_field: bool,
    pub has_rows: bool,
    pub clipboard: bool,
    pub loading: bool,
}

pub fn actions(ctx: ToolbarContext) -> Vec<ToolbarAction> {
    vec![
        ToolbarAction::new(ActionKey::QuickSearch, "Search", "/").show(ctx.has_text_field),
        ToolbarAction::new(ActionKey::Filter, "Filter", "f"),
        ToolbarAction::new(ActionKey::Columns, "Columns", "c"),
        ToolbarAction::new(ActionKey::ClearFilters, "Clear", "x")
            .disabled(!ctx.has_filters),
        ToolbarAction::new(ActionKey::Refresh, "Refresh", "r").disabled(ctx.loading),
        ToolbarAction::new(ActionKey::CopyRow, "Copy row", "y")
            .disabled(!ctx.has_rows || !ctx.clipboard),
        ToolbarAction::new(ActionKey::Help, "Help", "?"),
    ]
}

/// Actions to render, in toolbar order.
pub fn visible_actions(ctx: ToolbarContext) -> Vec<ToolbarAction> {
    actions(ctx).into_iter().filter(|a| a.show).collect()
}

pub fn is_enabled(ctx: ToolbarContext, key: ActionKey) -> bool {
    actions(ctx)
        .iter()
        .any(|a| a.key == key && a.show && !a.disabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_flags_follow_state() {
        let ctx = ToolbarContext {
            has_rows: true,
            ..Default::default()
        };
        assert!(!is_enabled(ctx, ActionKey::ClearFilters));
        assert!(!is_enabled(ctx, ActionKey::CopyRow));
        assert!(is_enabled(ctx, ActionKey::Refresh));

        let ctx = ToolbarContext {
            has_filters: true,
            has_rows: true,
            clipboard: true,
            loading: true,
            ..Default::default()
        };
        assert!(is_enabled(ctx, ActionKey::ClearFilters));
        assert!(is_enabled(ctx, ActionKey::CopyRow));
        assert!(!is_enabled(ctx, ActionKey::Refresh));
    }

    #[test]
    fn hidden_actions_are_not_rendered() {
        let ctx = ToolbarContext::default();
        let keys: Vec<ActionKey> = visible_actions(ctx).iter().map(|a| a.key).collect();
        assert!(!keys.contains(&ActionKey::QuickSearch));
        assert!(!is_enabled(ctx, ActionKey::QuickSearch));
        assert_eq!(keys.len(), actions(ctx).len() - 1);
    }
}
