//! The offline mirror of the action vocabulary.
//!
//! Answers New, Save, Filter (when overridden) and generic query/object
//! retrieval against the local store instead of the network, including the
//! dirty-merge of edited attribute values into cached query result rows.

use super::store::{ObjectStore, StoreRecord, StoreTable};
use super::{OfflineError, OfflineResult};
use crate::dto::{
    PersistentObjectDto, QueryDto, QueryResultDto, QueryResultItemDto, QueryResultItemValueDto,
};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map as JsonMap, Value as Json};
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref BREADCRUMB_PLACEHOLDER: Regex =
        Regex::new(r"\{([^{]+?)\}").expect("static pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemChangeType {
    None,
    New,
    Edit,
    Delete,
}

/// Something the offline layer can cache: a persistent object or a query.
pub enum Cacheable<'a> {
    PersistentObject(&'a PersistentObjectDto),
    Query(&'a QueryDto),
}

/// The offline action vocabulary. Every method has a default implementation
/// running against [`store`](Self::store); specialized types override what
/// they need — most commonly [`on_filter`](Self::on_filter), whose presence
/// is announced through the explicit [`supports_filter`](Self::supports_filter)
/// capability.
#[async_trait]
pub trait OfflineActions: Send + Sync {
    fn store(&self) -> &Arc<dyn ObjectStore>;

    /// Whether this type overrides [`on_filter`](Self::on_filter). Types that
    /// return `false` have the `Filter` action stripped from cached queries.
    fn supports_filter(&self) -> bool {
        false
    }

    /// Supplies the item list for a filtered query execution.
    fn on_filter(&self, _query: &QueryDto) -> OfflineResult<Vec<QueryResultItemDto>> {
        Err(OfflineError::NotImplemented)
    }

    async fn on_cache(&self, entry: Cacheable<'_>) -> OfflineResult<()> {
        match entry {
            Cacheable::PersistentObject(po) => self.on_cache_persistent_object(po).await,
            Cacheable::Query(query) => self.on_cache_query(query).await,
        }
    }

    async fn on_cache_persistent_object(
        &self,
        persistent_object: &PersistentObjectDto,
    ) -> OfflineResult<()> {
        self.store()
            .save(
                StoreRecord::response(
                    &persistent_object.id,
                    serde_json::to_string(persistent_object)?,
                ),
                StoreTable::PersistentObjects,
            )
            .await?;

        self.store()
            .save(
                StoreRecord::class_name(&persistent_object.id, &persistent_object.type_name),
                StoreTable::ActionClassesById,
            )
            .await
    }

    async fn on_cache_query(&self, query: &QueryDto) -> OfflineResult<()> {
        self.store()
            .save(
                StoreRecord::response(&query.id, serde_json::to_string(query)?),
                StoreTable::Queries,
            )
            .await?;

        let Some(template) = &query.persistent_object else {
            return Ok(());
        };

        self.store()
            .save(
                StoreRecord::class_name(&query.id, &template.type_name),
                StoreTable::ActionClassesById,
            )
            .await?;

        // The template is cross-linked back to its query so saves can find
        // the rows to merge into.
        let mut template_record =
            StoreRecord::response(&template.id, serde_json::to_string(template)?);
        template_record.query = Some(query.id.clone());
        self.store()
            .save(template_record, StoreTable::PersistentObjects)
            .await?;

        self.store()
            .save(
                StoreRecord::class_name(&template.id, &template.type_name),
                StoreTable::ActionClassesById,
            )
            .await
    }

    /// The query owning the given persistent object id, resolved through the
    /// stored back-pointer. Misses resolve to `None`, never an error.
    async fn get_owner_query(&self, id: &str) -> OfflineResult<Option<QueryDto>> {
        let Some(record) = self.store().load(id, StoreTable::PersistentObjects).await? else {
            return Ok(None);
        };
        let Some(query_id) = record.query else {
            return Ok(None);
        };

        let Some(query_record) = self.store().load(&query_id, StoreTable::Queries).await? else {
            return Ok(None);
        };
        let Some(response) = query_record.response else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_str(&response)?))
    }

    /// Reconstructs a persistent object from the cache, overlaying the
    /// matching result row's values and resolving breadcrumb placeholders.
    async fn on_get_persistent_object(
        &self,
        id: &str,
        object_id: Option<&str>,
        is_new: bool,
    ) -> OfflineResult<Option<PersistentObjectDto>> {
        let Some(record) = self.store().load(id, StoreTable::PersistentObjects).await? else {
            return Ok(None);
        };
        if record.query.is_none() {
            return Ok(None);
        }

        let Some(query) = self.get_owner_query(id).await? else {
            return Ok(None);
        };

        let items = query.result.as_ref().map(|r| r.items.as_slice()).unwrap_or_default();
        let Some(result_item) = items.iter().find(|i| Some(i.id.as_str()) == object_id) else {
            debug!(id, ?object_id, "no cached result row for object");
            return Ok(None);
        };

        let Some(response) = record.response else {
            return Ok(None);
        };
        let mut po: PersistentObjectDto = serde_json::from_str(&response)?;
        po.object_id = object_id.map(str::to_string);
        po.is_new = is_new;

        if query.actions.iter().any(|a| a == "BulkEdit")
            && !po.actions.iter().any(|a| a == "Edit")
        {
            po.actions.push("Edit".to_string());
        }

        for attr in &mut po.attributes {
            if let Some(value) = result_item.values.iter().find(|v| v.key == attr.name) {
                attr.value = value.value.clone();
            }
        }

        if let Some(breadcrumb) = &po.breadcrumb {
            po.breadcrumb = Some(resolve_breadcrumb(breadcrumb, &po.attributes));
        }

        Ok(Some(po))
    }

    /// Loads a cached query, stripping the filter/grouping/distinct
    /// capabilities that need a server, and the `Filter` action itself when
    /// filtering is not overridden.
    async fn on_get_query(&self, id: &str) -> OfflineResult<Option<QueryDto>> {
        let Some(record) = self.store().load(id, StoreTable::Queries).await? else {
            return Ok(None);
        };
        let Some(response) = record.response else {
            return Ok(None);
        };

        let mut query: QueryDto = serde_json::from_str(&response)?;

        for column in &mut query.columns {
            column.can_filter = false;
            column.can_list_distincts = false;
            column.can_group_by = false;
        }
        query.filters = None;

        if !self.supports_filter() {
            query.actions.retain(|a| a != "Filter");
        }

        Ok(Some(query))
    }

    /// Answers a query execution from the cache; an overridden filter
    /// supplies the item list instead.
    async fn on_execute_query(&self, query: &QueryDto) -> OfflineResult<Option<QueryResultDto>> {
        let Some(cached) = self.on_get_query(&query.id).await? else {
            return Ok(None);
        };

        let cached_result = cached.result.unwrap_or_default();

        let items = if self.supports_filter() {
            self.on_filter(query)?
        } else {
            cached_result.items
        };

        Ok(Some(QueryResultDto {
            columns: query.columns.clone(),
            items,
            sort_options: query.sort_options.clone(),
            charts: cached_result.charts,
            total_items: cached_result.total_items,
            ..Default::default()
        }))
    }

    async fn on_execute_query_filter_action(
        &self,
        _action: &str,
        _query: &QueryDto,
        _parameters: &JsonMap<String, Json>,
    ) -> OfflineResult<Option<PersistentObjectDto>> {
        Err(OfflineError::NotImplemented)
    }

    async fn on_execute_query_action(
        &self,
        action: &str,
        query: &QueryDto,
        _selected_items: &[QueryResultItemDto],
        _parameters: &JsonMap<String, Json>,
    ) -> OfflineResult<Option<PersistentObjectDto>> {
        if action == "New" {
            return self.on_new(query).await;
        }

        Ok(None)
    }

    async fn on_execute_persistent_object_action(
        &self,
        action: &str,
        persistent_object: PersistentObjectDto,
        _parameters: &JsonMap<String, Json>,
    ) -> OfflineResult<Option<PersistentObjectDto>> {
        if action == "Save" {
            return self.on_save(persistent_object).await.map(Some);
        }

        Ok(None)
    }

    /// Clones the query's template object into a fresh `New` row.
    async fn on_new(&self, query: &QueryDto) -> OfflineResult<Option<PersistentObjectDto>> {
        let Some(record) = self.store().load(&query.id, StoreTable::Queries).await? else {
            return Ok(None);
        };
        let Some(response) = record.response else {
            return Ok(None);
        };
        let cached: QueryDto = serde_json::from_str(&response)?;

        let Some(template) = cached.persistent_object else {
            return Ok(None);
        };

        let mut po = *template;
        po.actions = vec!["Edit".to_string()];
        po.is_new = true;
        po.breadcrumb = Some(
            po.new_breadcrumb
                .clone()
                .unwrap_or_else(|| format!("New {}", po.label)),
        );

        Ok(Some(po))
    }

    async fn on_save(&self, obj: PersistentObjectDto) -> OfflineResult<PersistentObjectDto> {
        if obj.is_new {
            self.save_new(obj).await
        } else {
            self.save_existing(obj).await
        }
    }

    /// Saves a new object: stamps a synthetic object id and appends its
    /// changed values as a fresh row in the owning query.
    async fn save_new(&self, mut obj: PersistentObjectDto) -> OfflineResult<PersistentObjectDto> {
        obj.object_id = Some(format!("SW-NEW-{}", Utc::now().timestamp_millis()));

        let Some(mut query) = self.get_owner_query(&obj.id).await? else {
            return Err(OfflineError::MissingQuery(obj.id.clone()));
        };

        edit_query_result_item_values(&mut query, &obj, ItemChangeType::New)?;

        for attr in &mut obj.attributes {
            attr.is_value_changed = false;
        }
        obj.is_new = false;

        Ok(obj)
    }

    /// Saves an existing object: merges its changed values into the matching
    /// cached row and re-persists the mutated query record.
    async fn save_existing(
        &self,
        mut obj: PersistentObjectDto,
    ) -> OfflineResult<PersistentObjectDto> {
        let Some(po_record) = self
            .store()
            .load(&obj.id, StoreTable::PersistentObjects)
            .await?
        else {
            return Err(OfflineError::MissingQuery(obj.id.clone()));
        };
        let Some(query_id) = po_record.query else {
            return Err(OfflineError::MissingQuery(obj.id.clone()));
        };

        let Some(mut query_record) = self.store().load(&query_id, StoreTable::Queries).await?
        else {
            return Err(OfflineError::MissingQuery(obj.id.clone()));
        };
        let mut query: QueryDto = query_record
            .response
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        edit_query_result_item_values(&mut query, &obj, ItemChangeType::Edit)?;

        query_record.response = Some(serde_json::to_string(&query)?);
        self.store().save(query_record, StoreTable::Queries).await?;

        for attr in &mut obj.attributes {
            attr.is_value_changed = false;
        }

        Ok(obj)
    }
}

/// The default engine: no overrides, no filtering.
pub struct DefaultOfflineActions {
    store: Arc<dyn ObjectStore>,
}

impl DefaultOfflineActions {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OfflineActions for DefaultOfflineActions {
    fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

/// Applies every changed attribute value of a persistent object onto the
/// matching result row of its query — appending the row (and bumping
/// `totalItems`) for `New` changes. Attributes whose metadata declares a
/// lookup target get a `persistentObjectId`/`objectId` cross-reference
/// stamped onto the row value.
pub(crate) fn edit_query_result_item_values(
    query: &mut QueryDto,
    persistent_object: &PersistentObjectDto,
    change_type: ItemChangeType,
) -> OfflineResult<()> {
    for attribute in persistent_object
        .attributes
        .iter()
        .filter(|a| a.is_value_changed)
    {
        let result = query.result.get_or_insert_with(Default::default);
        let object_id = persistent_object.object_id.clone().unwrap_or_default();

        let mut item_index = result.items.iter().position(|i| i.id == object_id);
        if item_index.is_none() && change_type == ItemChangeType::New {
            result.items.push(QueryResultItemDto {
                id: object_id.clone(),
                ..Default::default()
            });
            result.total_items = Some(result.total_items.unwrap_or(0) + 1);
            item_index = Some(result.items.len() - 1);
        }

        let Some(item_index) = item_index else {
            return Err(OfflineError::UnresolvedItem);
        };
        let item = &mut result.items[item_index];

        let value_index = match item.values.iter().position(|v| v.key == attribute.name) {
            Some(index) => {
                item.values[index].value = attribute.value.clone();
                index
            }
            None => {
                item.values.push(QueryResultItemValueDto {
                    key: attribute.name.clone(),
                    value: attribute.value.clone(),
                    ..Default::default()
                });
                item.values.len() - 1
            }
        };

        let metadata = query
            .persistent_object
            .as_ref()
            .and_then(|po| po.attributes.iter().find(|a| a.name == attribute.name));
        if let Some(metadata) = metadata {
            if let Some(lookup) = &metadata.lookup {
                if let Some(lookup_po) = &lookup.persistent_object {
                    let value = &mut item.values[value_index];
                    value.persistent_object_id = Some(lookup_po.id.clone());
                    value.object_id = attribute.object_id.clone();
                }
            }
        }
    }

    Ok(())
}

/// Resolves `{AttributeName}` placeholders in a breadcrumb template against
/// live attribute values: single forward pass, first match per placeholder.
/// The pass count is bounded by the number of placeholders in the template,
/// so replacement values that themselves contain `{...}` cannot loop forever.
pub(crate) fn resolve_breadcrumb(
    breadcrumb: &str,
    attributes: &[crate::dto::PersistentObjectAttributeDto],
) -> String {
    let mut result = breadcrumb.to_string();
    let passes = BREADCRUMB_PLACEHOLDER.find_iter(breadcrumb).count();

    for _ in 0..passes {
        let Some(captures) = BREADCRUMB_PLACEHOLDER.captures(&result) else {
            break;
        };
        let placeholder = captures.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

        let Some(attribute) = attributes.iter().find(|a| a.name == name) else {
            break;
        };

        let value = attribute.value.clone().unwrap_or_default();
        result = result.replacen(&placeholder, &value, 1);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::PersistentObjectAttributeDto;

    fn attr(name: &str, value: &str) -> PersistentObjectAttributeDto {
        PersistentObjectAttributeDto {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn breadcrumb_placeholders_resolve() {
        let attributes = vec![attr("FirstName", "Ada"), attr("LastName", "Lovelace")];
        assert_eq!(
            resolve_breadcrumb("{FirstName} {LastName}", &attributes),
            "Ada Lovelace"
        );
    }

    #[test]
    fn breadcrumb_unknown_placeholder_is_left_alone() {
        let attributes = vec![attr("FirstName", "Ada")];
        assert_eq!(
            resolve_breadcrumb("{FirstName} {Missing}", &attributes),
            "Ada {Missing}"
        );
    }

    #[test]
    fn breadcrumb_adversarial_replacement_terminates() {
        let attributes = vec![attr("A", "{A}")];
        assert_eq!(resolve_breadcrumb("{A}", &attributes), "{A}");
    }
}
