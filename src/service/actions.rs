//! Action metadata loaded from the application's `Actions` query.
//!
//! The registry lives on the [`Service`](super::Service) instance; there is no
//! process-wide table, so independent services never share definitions.

use crate::dto::QueryResultItemDto;
use std::collections::HashMap;

/// Server-described metadata of a named action.
#[derive(Debug, Clone, Default)]
pub struct ActionDefinition {
    pub name: String,
    pub display_name: String,
    pub is_pinned: bool,
    pub is_streaming: bool,
    pub refresh_query_on_completed: bool,
    pub keep_selection_on_refresh: bool,
    pub offset: i32,
    pub confirmation: Option<String>,
    pub selection_rule: Option<String>,
}

impl ActionDefinition {
    /// Builds a definition from one row of the `Actions` query.
    pub fn from_query_item(item: &QueryResultItemDto) -> Self {
        Self {
            name: item.value("Name").unwrap_or_default().to_string(),
            display_name: item.value("DisplayName").unwrap_or_default().to_string(),
            is_pinned: parse_flag(item.value("IsPinned")),
            is_streaming: parse_flag(item.value("IsStreaming")),
            refresh_query_on_completed: parse_flag(item.value("RefreshQueryOnCompleted")),
            keep_selection_on_refresh: parse_flag(item.value("KeepSelectionOnRefresh")),
            offset: item
                .value("Offset")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            confirmation: item.value("Confirmation").map(str::to_string),
            selection_rule: item.value("SelectionRule").map(str::to_string),
        }
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

#[derive(Debug, Default)]
pub struct ActionDefinitionRegistry {
    definitions: HashMap<String, ActionDefinition>,
}

impl ActionDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ActionDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Looks up a definition by its bare action name (without the
    /// `PersistentObject.`/`Query.` prefix).
    pub fn get(&self, name: &str) -> Option<&ActionDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.definitions.clear();
    }
}
