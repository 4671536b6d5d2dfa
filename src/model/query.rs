//! The searchable, server-paged collection type.
//!
//! Queries are collaborators of the persistent-object model: they supply
//! lookup candidates for reference attributes and host the result rows a
//! saved object lands in. Only the state the model needs is kept here.

use crate::core::{Result, SubscriptionId};
use crate::dto::{NotificationType, QueryColumnDto, QueryDto, QueryResultItemDto};
use crate::model::attribute::PersistentObjectAttribute;
use crate::model::persistent_object::PersistentObject;
use crate::model::service_object::{Notification, ServiceObject, copy_properties};
use crate::service::Service;
use serde_json::{Value as Json, json};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAllState {
    pub all_selected: bool,
    pub inverse: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuerySearchOptions {
    pub keep_selection: bool,
}

struct QueryState {
    items: Vec<QueryResultItemDto>,
    total_items: Option<i64>,
    has_searched: bool,
    sort_options: Option<String>,
    text_search: Option<String>,
    charts: Option<Json>,
}

pub struct Query {
    base: ServiceObject,
    dto: QueryDto,
    parent: RwLock<Option<Arc<PersistentObject>>>,
    owner_attribute_with_reference: RwLock<Weak<PersistentObjectAttribute>>,
    as_lookup: bool,
    state: RwLock<QueryState>,
    selected_ids: RwLock<HashSet<String>>,
    select_all: RwLock<SelectAllState>,
    notification: RwLock<Notification>,
}

impl Query {
    pub(crate) fn new(
        service: &Arc<Service>,
        dto: QueryDto,
        parent: Option<Arc<PersistentObject>>,
        as_lookup: bool,
    ) -> Arc<Self> {
        let state = QueryState {
            items: dto.result.as_ref().map(|r| r.items.clone()).unwrap_or_default(),
            total_items: dto.result.as_ref().and_then(|r| r.total_items),
            has_searched: dto.result.is_some(),
            sort_options: dto.sort_options.clone(),
            text_search: dto.text_search.clone(),
            charts: dto.result.as_ref().and_then(|r| r.charts.clone()),
        };

        let notification = Notification {
            message: dto.notification.clone(),
            kind: dto.notification_type,
            duration: 0,
        };

        Arc::new(Self {
            base: ServiceObject::new(service),
            dto,
            parent: RwLock::new(parent),
            owner_attribute_with_reference: RwLock::new(Weak::new()),
            as_lookup,
            state: RwLock::new(state),
            selected_ids: RwLock::new(HashSet::new()),
            select_all: RwLock::new(SelectAllState::default()),
            notification: RwLock::new(notification),
        })
    }

    pub fn id(&self) -> &str {
        &self.dto.id
    }

    pub fn name(&self) -> &str {
        &self.dto.name
    }

    pub fn label(&self) -> &str {
        &self.dto.label
    }

    pub fn offset(&self) -> i32 {
        self.dto.offset
    }

    pub fn actions(&self) -> &[String] {
        &self.dto.actions
    }

    pub fn columns(&self) -> &[QueryColumnDto] {
        &self.dto.columns
    }

    pub fn page_size(&self) -> Option<i64> {
        self.dto.page_size
    }

    pub fn as_lookup(&self) -> bool {
        self.as_lookup
    }

    pub(crate) fn dto(&self) -> &QueryDto {
        &self.dto
    }

    /// Metadata id of the persistent object type this query returns.
    pub fn persistent_object_id(&self) -> String {
        self.dto
            .persistent_object
            .as_ref()
            .map(|po| po.id.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Arc<PersistentObject>> {
        self.parent.read().ok().and_then(|p| p.clone())
    }

    pub fn owner_attribute_with_reference(&self) -> Option<Arc<PersistentObjectAttribute>> {
        self.owner_attribute_with_reference
            .read()
            .ok()
            .and_then(|o| o.upgrade())
    }

    pub(crate) fn set_owner_attribute_with_reference(&self, owner: &Arc<PersistentObjectAttribute>) {
        if let Ok(mut slot) = self.owner_attribute_with_reference.write() {
            *slot = Arc::downgrade(owner);
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&crate::core::PropertyChangedArgs) + Send + Sync + 'static,
    {
        self.base.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        self.base.unsubscribe(subscription);
    }

    pub fn items(&self) -> Vec<QueryResultItemDto> {
        self.state.read().map(|s| s.items.clone()).unwrap_or_default()
    }

    pub fn total_items(&self) -> Option<i64> {
        self.state.read().ok().and_then(|s| s.total_items)
    }

    pub fn has_searched(&self) -> bool {
        self.state.read().map(|s| s.has_searched).unwrap_or(false)
    }

    pub fn sort_options(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.sort_options.clone())
    }

    pub fn text_search(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.text_search.clone())
    }

    pub fn set_text_search(&self, text_search: Option<String>) {
        if let Ok(mut state) = self.state.write() {
            state.text_search = text_search;
        }
        self.base.notify("textSearch");
    }

    pub fn charts(&self) -> Option<Json> {
        self.state.read().ok().and_then(|s| s.charts.clone())
    }

    pub fn select_all(&self) -> SelectAllState {
        self.select_all.read().map(|s| *s).unwrap_or_default()
    }

    pub fn set_select_all(&self, all_selected: bool, inverse: bool) {
        if let Ok(mut state) = self.select_all.write() {
            state.all_selected = all_selected;
            state.inverse = inverse;
        }
        self.base.notify("selectAll");
    }

    pub fn selected_ids(&self) -> HashSet<String> {
        self.selected_ids.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set_selected_ids(&self, ids: HashSet<String>) {
        if let Ok(mut selected) = self.selected_ids.write() {
            *selected = ids;
        }
        self.base.notify("selectedItems");
    }

    pub fn selected_items(&self) -> Vec<QueryResultItemDto> {
        let selected = self.selected_ids();
        self.items()
            .into_iter()
            .filter(|item| selected.contains(&item.id))
            .collect()
    }

    pub fn notification(&self) -> Notification {
        self.notification.read().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn set_notification(&self, message: Option<String>, kind: NotificationType, duration: i64) {
        if let Ok(mut notification) = self.notification.write() {
            notification.message = message;
            notification.kind = kind;
            notification.duration = duration;
        }
        self.base.notify("notification");
    }

    pub(crate) fn clear_notification(&self) {
        self.set_notification(None, NotificationType::None, 0);
    }

    /// Executes the query through the service and replaces the result rows.
    /// Selection is cleared unless `keep_selection` is set.
    pub async fn search(self: &Arc<Self>, options: QuerySearchOptions) -> Result<()> {
        let Some(service) = self.base.service() else {
            return Ok(());
        };

        let result = service
            .execute_query(self.parent(), self, self.as_lookup, false)
            .await?;

        let Some(result) = result else {
            return Ok(());
        };

        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return Ok(()),
            };
            state.items = result.items;
            if result.total_items.is_some() {
                state.total_items = result.total_items;
            }
            state.has_searched = true;
            if result.sort_options.is_some() {
                state.sort_options = result.sort_options;
            }
            state.charts = result.charts;
        }

        if !options.keep_selection {
            self.set_selected_ids(HashSet::new());
            self.set_select_all(false, false);
        }

        self.base.notify("items");
        Ok(())
    }

    /// Projects the query into a plain record for the wire.
    pub(crate) fn to_service_object(&self) -> Json {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return Json::Null,
        };

        let mut result = copy_properties(
            vec![
                ("id", json!(self.dto.id)),
                ("name", json!(self.dto.name)),
                ("label", json!(self.dto.label)),
                ("pageSize", json!(self.dto.page_size.unwrap_or(0))),
                ("skip", json!(self.dto.skip)),
                ("top", json!(self.dto.top)),
                ("textSearch", json!(state.text_search)),
                ("sortOptions", json!(state.sort_options)),
            ],
            false,
        );

        result.insert(
            "columns".to_string(),
            json!(
                self.dto
                    .columns
                    .iter()
                    .map(|c| json!({ "name": c.name, "type": c.type_name }))
                    .collect::<Vec<_>>()
            ),
        );

        Json::Object(result)
    }
}
