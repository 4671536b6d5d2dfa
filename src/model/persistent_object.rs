//! The editable unit of the object model.
//!
//! A persistent object is a bag of attributes, sub-queries and derived tabs
//! with an edit-session state machine (begin/cancel/save). All mutating
//! operations that involve a server round trip run through a per-object
//! serialized work queue so a save in flight can never interleave with a
//! concurrent attribute refresh against the same object.

use crate::core::{Result, ServiceError, SubscriptionId, Value};
use crate::dto::{NotificationType, PersistentObjectDto, TabDto};
use crate::model::attribute::PersistentObjectAttribute;
use crate::model::query::{Query, QuerySearchOptions};
use crate::model::service_object::{Notification, ServiceObject, WorkQueue, copy_properties};
use crate::model::tabs::{
    PersistentObjectAttributeGroup, PersistentObjectAttributeTab, PersistentObjectQueryTab,
    PersistentObjectTab,
};
use crate::service::Service;
use chrono::{DateTime, Utc};
use serde_json::{Value as Json, json};
use std::future::Future;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

/// Layout mode used when the object is displayed from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLayoutMode {
    FullPage,
    MasterDetail,
}

/// Where this object is embedded in a larger graph. At most one owner link is
/// ever set.
#[derive(Default)]
pub enum PersistentObjectOwner {
    #[default]
    None,
    Query(Weak<Query>),
    DetailAttribute(Weak<PersistentObjectAttribute>),
    ReferenceAttribute(Weak<PersistentObjectAttribute>),
}

struct PersistentObjectState {
    object_id: Option<String>,
    is_new: bool,
    is_editing: bool,
    is_dirty: bool,
    is_frozen: bool,
    is_deleted: bool,
    breadcrumb: Option<String>,
    security_token: Option<String>,
    state_behavior: String,
    last_result: PersistentObjectDto,
    last_result_backup: Option<PersistentObjectDto>,
    last_updated: DateTime<Utc>,
    tag: Option<Json>,
}

pub struct PersistentObject {
    base: ServiceObject,
    id: String,
    type_name: String,
    full_type_name: String,
    label: String,
    is_system: bool,
    is_hidden: bool,
    is_read_only: bool,
    ignore_check_rules: bool,
    force_from_action: bool,
    is_breadcrumb_sensitive: bool,
    new_options: Option<String>,
    query_layout_mode: QueryLayoutMode,
    bulk_object_ids: Vec<String>,
    dialog_save_action: Option<String>,
    state: RwLock<PersistentObjectState>,
    attributes: RwLock<Vec<Arc<PersistentObjectAttribute>>>,
    queries: RwLock<Vec<Arc<Query>>>,
    tabs: RwLock<Vec<PersistentObjectTab>>,
    owner: RwLock<PersistentObjectOwner>,
    parent: RwLock<Option<Arc<PersistentObject>>>,
    notification: RwLock<Notification>,
    actions: RwLock<Vec<String>>,
    queue: WorkQueue,
}

impl std::fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentObject")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("full_type_name", &self.full_type_name)
            .finish_non_exhaustive()
    }
}

impl PersistentObject {
    pub(crate) fn new(service: &Arc<Service>, dto: PersistentObjectDto) -> Arc<Self> {
        let parent = dto
            .parent
            .as_ref()
            .map(|p| service.hooks().on_construct_persistent_object(service, (**p).clone()));

        let query_layout_mode = match dto.query_layout_mode.as_deref() {
            Some("FullPage") => QueryLayoutMode::FullPage,
            _ => QueryLayoutMode::MasterDetail,
        };

        let state_behavior = dto.state_behavior.clone().unwrap_or_else(|| "None".to_string());

        let dialog_save_action = dto.dialog_save_action.clone().or_else(|| {
            ["EndEdit", "Save"]
                .iter()
                .find(|a| dto.actions.iter().any(|action| action == *a))
                .map(|a| a.to_string())
        });

        let this = Arc::new(Self {
            base: ServiceObject::new(service),
            id: dto.id.clone(),
            type_name: dto.type_name.clone(),
            full_type_name: dto.full_type_name.clone(),
            label: dto.label.clone(),
            is_system: dto.is_system,
            is_hidden: dto.is_hidden,
            is_read_only: dto.is_read_only,
            ignore_check_rules: dto.ignore_check_rules,
            force_from_action: dto.force_from_action,
            is_breadcrumb_sensitive: dto.is_breadcrumb_sensitive,
            new_options: dto.new_options.clone(),
            query_layout_mode,
            bulk_object_ids: dto.bulk_object_ids.clone(),
            dialog_save_action,
            state: RwLock::new(PersistentObjectState {
                object_id: dto.object_id.clone(),
                is_new: dto.is_new,
                is_editing: false,
                is_dirty: false,
                is_frozen: false,
                is_deleted: dto.is_deleted,
                breadcrumb: dto.breadcrumb.clone(),
                security_token: dto.security_token.clone(),
                state_behavior: state_behavior.clone(),
                last_result: dto.clone(),
                last_result_backup: None,
                last_updated: Utc::now(),
                tag: dto.tag.clone(),
            }),
            attributes: RwLock::new(Vec::new()),
            queries: RwLock::new(Vec::new()),
            tabs: RwLock::new(Vec::new()),
            owner: RwLock::new(PersistentObjectOwner::None),
            parent: RwLock::new(parent),
            notification: RwLock::new(Notification {
                message: dto.notification.clone(),
                kind: dto.notification_type,
                duration: dto.notification_duration,
            }),
            actions: RwLock::new(dto.actions.clone()),
            queue: WorkQueue::new(),
        });

        let attributes: Vec<_> = dto
            .attributes
            .iter()
            .map(|attr| PersistentObjectAttribute::new(service, attr, &this))
            .collect();
        if let Ok(mut slot) = this.attributes.write() {
            *slot = attributes;
        }

        let mut queries: Vec<_> = dto
            .queries
            .iter()
            .map(|query| {
                service
                    .hooks()
                    .on_construct_query(service, query.clone(), Some(this.clone()), false)
            })
            .collect();
        queries.sort_by_key(|q| q.offset());
        if let Ok(mut slot) = this.queries.write() {
            *slot = queries;
        }

        this.build_initial_tabs(service);

        if this.is_new()
            || state_behavior.contains("OpenInEdit")
            || state_behavior.contains("StayInEdit")
        {
            this.begin_edit();
        }

        service.hooks().on_refresh_from_result(&this);

        this
    }

    fn build_initial_tabs(self: &Arc<Self>, service: &Arc<Service>) {
        let attributes = self.attributes();
        let last_result_tabs = self
            .state
            .read()
            .map(|s| s.last_result.tabs.clone())
            .unwrap_or_default();

        let mut sorted = attributes;
        sorted.sort_by_key(|a| a.offset());

        // Group by tab key, preserving first-seen order.
        let mut tab_keys: Vec<Option<String>> = Vec::new();
        for attr in &sorted {
            let key = attr.tab_key();
            if !tab_keys.contains(&key) {
                tab_keys.push(key);
            }
        }

        let attribute_tabs: Vec<_> = tab_keys
            .into_iter()
            .map(|tab_key| {
                let tab_attributes: Vec<_> = sorted
                    .iter()
                    .filter(|a| a.tab_key() == tab_key)
                    .cloned()
                    .collect();

                let mut group_keys: Vec<Option<String>> = Vec::new();
                for attr in &tab_attributes {
                    let key = attr.group_key();
                    if !group_keys.contains(&key) {
                        group_keys.push(key);
                    }
                }

                let groups: Vec<_> = group_keys
                    .into_iter()
                    .map(|group_key| {
                        let group_attributes: Vec<_> = tab_attributes
                            .iter()
                            .filter(|a| a.group_key() == group_key)
                            .cloned()
                            .collect();
                        PersistentObjectAttributeGroup::new(group_key, group_attributes)
                    })
                    .collect();
                for (index, group) in groups.iter().enumerate() {
                    group.set_index(index);
                }

                let tab_dto = tab_key
                    .as_deref()
                    .and_then(|key| last_result_tabs.get(key).cloned())
                    .unwrap_or_default();

                PersistentObjectAttributeTab::new(tab_key, &tab_dto, groups, !self.is_hidden)
            })
            .collect();

        let query_tabs: Vec<_> = self
            .queries()
            .into_iter()
            .map(PersistentObjectQueryTab::new)
            .collect();

        let mut tabs = service
            .hooks()
            .on_sort_persistent_object_tabs(self, attribute_tabs, query_tabs);

        if tabs.is_empty() {
            tabs.push(PersistentObjectTab::Attributes(
                PersistentObjectAttributeTab::new(None, &TabDto::default(), Vec::new(), true),
            ));
        }

        if let Ok(mut slot) = self.tabs.write() {
            *slot = tabs;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn full_type_name(&self) -> &str {
        &self.full_type_name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    pub fn ignore_check_rules(&self) -> bool {
        self.ignore_check_rules
    }

    pub fn force_from_action(&self) -> bool {
        self.force_from_action
    }

    pub fn is_breadcrumb_sensitive(&self) -> bool {
        self.is_breadcrumb_sensitive
    }

    pub fn new_options(&self) -> Option<&str> {
        self.new_options.as_deref()
    }

    pub fn query_layout_mode(&self) -> QueryLayoutMode {
        self.query_layout_mode
    }

    pub fn bulk_object_ids(&self) -> &[String] {
        &self.bulk_object_ids
    }

    pub fn is_bulk_edit(&self) -> bool {
        !self.bulk_object_ids.is_empty()
    }

    pub fn dialog_save_action(&self) -> Option<&str> {
        self.dialog_save_action.as_deref()
    }

    pub fn object_id(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.object_id.clone())
    }

    pub fn is_new(&self) -> bool {
        self.state.read().map(|s| s.is_new).unwrap_or(false)
    }

    pub fn is_editing(&self) -> bool {
        self.state.read().map(|s| s.is_editing).unwrap_or(false)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().map(|s| s.is_dirty).unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().map(|s| s.is_deleted).unwrap_or(false)
    }

    pub fn set_is_deleted(&self, is_deleted: bool) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.is_deleted != is_deleted {
                state.is_deleted = is_deleted;
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("isDeleted");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().map(|s| s.is_frozen).unwrap_or(false)
    }

    pub fn breadcrumb(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.breadcrumb.clone())
    }

    pub fn state_behavior(&self) -> String {
        self.state.read().map(|s| s.state_behavior.clone()).unwrap_or_default()
    }

    pub(crate) fn append_state_behavior(&self, token: &str) {
        if let Ok(mut state) = self.state.write() {
            if !state.state_behavior.contains(token) {
                state.state_behavior = format!("{} {}", state.state_behavior, token);
            }
        }
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.state.read().map(|s| s.last_updated).unwrap_or_else(|_| Utc::now())
    }

    pub fn tag(&self) -> Option<Json> {
        self.state.read().ok().and_then(|s| s.tag.clone())
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.read().map(|a| a.clone()).unwrap_or_default()
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

    pub fn clear_notification(&self) {
        self.set_notification(None, NotificationType::None, 0);
    }

    /// The wire DTO this object last reconciled against.
    pub(crate) fn dto(&self) -> PersistentObjectDto {
        self.state
            .read()
            .map(|s| s.last_result.clone())
            .unwrap_or_default()
    }

    pub(crate) fn security_token(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.security_token.clone())
    }

    pub fn parent(&self) -> Option<Arc<PersistentObject>> {
        self.parent.read().ok().and_then(|p| p.clone())
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<PersistentObject>>) {
        if let Ok(mut slot) = self.parent.write() {
            *slot = parent.cloned();
        }
    }

    pub fn owner_query(&self) -> Option<Arc<Query>> {
        match &*self.owner.read().ok()? {
            PersistentObjectOwner::Query(query) => query.upgrade(),
            _ => None,
        }
    }

    pub fn owner_detail_attribute(&self) -> Option<Arc<PersistentObjectAttribute>> {
        match &*self.owner.read().ok()? {
            PersistentObjectOwner::DetailAttribute(attr) => attr.upgrade(),
            _ => None,
        }
    }

    pub fn owner_attribute_with_reference(&self) -> Option<Arc<PersistentObjectAttribute>> {
        match &*self.owner.read().ok()? {
            PersistentObjectOwner::ReferenceAttribute(attr) => attr.upgrade(),
            _ => None,
        }
    }

    pub fn set_owner_query(&self, query: &Arc<Query>) {
        if let Ok(mut owner) = self.owner.write() {
            *owner = PersistentObjectOwner::Query(Arc::downgrade(query));
        }
    }

    pub(crate) fn clear_owner_query(&self) {
        if let Ok(mut owner) = self.owner.write() {
            if matches!(&*owner, PersistentObjectOwner::Query(_)) {
                *owner = PersistentObjectOwner::None;
            }
        }
    }

    pub(crate) fn set_owner_detail_attribute(&self, attr: &Arc<PersistentObjectAttribute>) {
        if let Ok(mut owner) = self.owner.write() {
            *owner = PersistentObjectOwner::DetailAttribute(Arc::downgrade(attr));
        }
    }

    pub fn set_owner_attribute_with_reference(&self, attr: &Arc<PersistentObjectAttribute>) {
        if let Ok(mut owner) = self.owner.write() {
            *owner = PersistentObjectOwner::ReferenceAttribute(Arc::downgrade(attr));
        }
    }

    pub fn attributes(&self) -> Vec<Arc<PersistentObjectAttribute>> {
        self.attributes.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn get_attribute(&self, name: &str) -> Option<Arc<PersistentObjectAttribute>> {
        self.attributes
            .read()
            .ok()?
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    pub fn get_attribute_value(&self, name: &str) -> Value {
        self.get_attribute(name).map(|a| a.value()).unwrap_or(Value::Null)
    }

    /// Sets a new value for a named attribute, optionally allowing an
    /// immediate refresh round trip.
    pub async fn set_attribute_value(
        self: &Arc<Self>,
        name: &str,
        value: Value,
        allow_refresh: bool,
    ) -> Result<Value> {
        let attr = self
            .get_attribute(name)
            .ok_or_else(|| ServiceError::AttributeNotFound(name.to_string()))?;
        attr.set_value(value, allow_refresh).await
    }

    pub fn queries(&self) -> Vec<Arc<Query>> {
        self.queries.read().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn get_query(&self, name: &str) -> Option<Arc<Query>> {
        self.queries
            .read()
            .ok()?
            .iter()
            .find(|q| q.name() == name)
            .cloned()
    }

    pub fn tabs(&self) -> Vec<PersistentObjectTab> {
        self.tabs.read().map(|t| t.clone()).unwrap_or_default()
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

    pub(crate) fn service(&self) -> Option<Arc<Service>> {
        self.base.service()
    }

    /// Whether queued work is currently running against this object.
    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    pub(crate) async fn queue_work<F, T>(self: &Arc<Self>, work: F) -> T
    where
        F: Future<Output = T>,
    {
        self.queue.run(work).await
    }

    fn set_is_editing(&self, value: bool) {
        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            state.is_editing = value;
        }
        self.base.notify("isEditing");

        for attr in self.attributes() {
            if let Some(detail) = attr.as_detail() {
                detail.propagate_is_editing(value);
            }
        }
    }

    fn set_is_dirty(&self, value: bool, force: bool) {
        if value && !self.is_editing() && !force {
            warn!(type_name = %self.type_name, "ignored dirty flag outside edit mode");
            return;
        }

        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.is_dirty != value {
                state.is_dirty = value;
                true
            } else {
                false
            }
        };

        if changed {
            self.base.notify("isDirty");

            if value {
                if let Some(owner) = self.owner_detail_attribute() {
                    let owner = owner.clone();
                    tokio::spawn(async move {
                        let _ = owner.detail_changed(false).await;
                    });
                }
            }
        }
    }

    /// Flags the object as dirty when in edit mode; returns the dirty state.
    pub fn trigger_dirty(&self) -> bool {
        if self.is_editing() {
            self.set_is_dirty(true, false);
        }
        self.is_dirty()
    }

    /// Blocks `set_value` until unfrozen. Advisory: callers consult the flag,
    /// it is not a lock.
    pub fn freeze(&self) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if !state.is_frozen {
                state.is_frozen = true;
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("isFrozen");
            for attr in self.attributes() {
                if let Some(detail) = attr.as_detail() {
                    detail.propagate_is_frozen(true);
                }
            }
        }
    }

    pub fn unfreeze(&self) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.is_frozen {
                state.is_frozen = false;
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("isFrozen");
            for attr in self.attributes() {
                if let Some(detail) = attr.as_detail() {
                    detail.propagate_is_frozen(false);
                }
            }
        }
    }

    /// Freezes the object for the lifetime of the returned guard; unfreezing
    /// happens on drop, on every exit path.
    pub(crate) fn freeze_scope(self: &Arc<Self>) -> FreezeGuard {
        self.freeze();
        FreezeGuard { object: self.clone() }
    }

    /// Enters edit mode, snapshotting the last server result for rollback.
    pub fn begin_edit(&self) {
        if !self.is_editing() {
            if let Ok(mut state) = self.state.write() {
                state.last_result_backup = Some(state.last_result.clone());
            }
            self.set_is_editing(true);
        }
    }

    /// Cancels edit mode, restoring the snapshot taken by `begin_edit`, and
    /// re-enters edit mode when the state behavior says `StayInEdit`.
    pub fn cancel_edit(self: &Arc<Self>) {
        if !self.is_editing() {
            return;
        }

        self.set_is_editing(false);
        self.set_is_dirty(false, false);

        let backup = match self.state.write() {
            Ok(mut state) => state.last_result_backup.take(),
            Err(_) => None,
        };

        if let Some(backup) = backup {
            self.refresh_from_result(&backup, true);
        }

        if !self.notification().is_empty() {
            self.clear_notification();
        }

        if self.state_behavior().contains("StayInEdit") {
            self.begin_edit();
        }
    }

    /// Saves the object through the server save action.
    ///
    /// Succeeds trivially when not editing. Deferred attribute refreshes are
    /// flushed first, sequentially. A null action result is a no-op failure
    /// (`Ok(false)`); an `Error` notification on the merged result is raised
    /// as [`ServiceError::Notification`].
    pub async fn save(self: &Arc<Self>, wait_for_owner_query: bool) -> Result<bool> {
        let this = self.clone();
        self.queue
            .run(async move { this.save_core(wait_for_owner_query).await })
            .await
    }

    async fn save_core(self: &Arc<Self>, wait_for_owner_query: bool) -> Result<bool> {
        if !self.is_editing() {
            return Ok(true);
        }

        let pending: Vec<_> = self
            .attributes()
            .into_iter()
            .filter(|a| a.should_refresh())
            .collect();
        for attr in pending {
            attr.trigger_refresh(true).await?;
        }

        let Some(service) = self.base.service() else {
            return Ok(false);
        };

        let result = service
            .execute_action("PersistentObject.Save", Some(self.clone()), None, Vec::new(), None)
            .await?;

        let Some(po) = result else {
            return Ok(false);
        };

        let was_new = self.is_new();
        self.refresh_from_result(&po.dto(), true);

        let notification = self.notification();
        if !notification.is_error() {
            self.set_is_dirty(false, true);

            if !was_new {
                self.set_is_editing(false);
                if self.state_behavior().contains("StayInEdit") {
                    self.begin_edit();
                }
            }

            if let Some(owner) = self.owner_attribute_with_reference() {
                let owner_object_id = owner.reference_object_id();
                if owner_object_id != self.object_id() {
                    let mut reparent = owner.parent();
                    if let Some(po) = &reparent {
                        if let Some(detail_owner) = po.owner_detail_attribute() {
                            reparent = detail_owner.parent();
                        }
                    }

                    if let Some(reparent) = reparent {
                        reparent.begin_edit();
                    }

                    if let Some(object_id) = po.object_id() {
                        owner.change_reference(vec![object_id]).await?;
                    }
                } else if let Some(breadcrumb) = self.breadcrumb() {
                    let _ = owner.set_value(Value::String(breadcrumb), true).await;
                }
            } else if let Some(owner_query) = self.owner_query() {
                let options = QuerySearchOptions { keep_selection: self.is_bulk_edit() };
                if wait_for_owner_query {
                    owner_query.search(options).await?;
                } else {
                    tokio::spawn(async move {
                        let _ = owner_query.search(options).await;
                    });
                }
            }
        } else if let Some(message) = notification.message {
            return Err(ServiceError::Notification(message));
        }

        Ok(true)
    }

    /// Serializes the object into a service-friendly plain record.
    pub fn to_service_object(&self, skip_parent: bool) -> Json {
        let (object_id, is_new, security_token, metadata) = match self.state.read() {
            Ok(state) => (
                state.object_id.clone(),
                state.is_new,
                state.security_token.clone(),
                state.last_result.metadata.clone(),
            ),
            Err(_) => (None, false, None, None),
        };

        let mut result = copy_properties(
            vec![
                ("id", json!(self.id)),
                ("type", json!(self.type_name)),
                ("objectId", json!(object_id)),
                ("isNew", json!(is_new)),
                ("isHidden", json!(self.is_hidden)),
                ("bulkObjectIds", json!(self.bulk_object_ids)),
                ("securityToken", json!(security_token)),
                ("isSystem", json!(self.is_system)),
            ],
            false,
        );

        if let Some(owner_query) = self.owner_query() {
            result.insert("ownerQueryId".to_string(), json!(owner_query.id()));
        }

        if !skip_parent {
            if let Some(parent) = self.parent() {
                result.insert("parent".to_string(), parent.to_service_object(false));
            }
        }

        result.insert(
            "attributes".to_string(),
            json!(
                self.attributes()
                    .iter()
                    .map(|a| a.to_service_object())
                    .collect::<Vec<_>>()
            ),
        );

        if let Some(metadata) = metadata {
            result.insert("metadata".to_string(), metadata);
        }

        Json::Object(result)
    }

    /// Reconciles this object against a new service result.
    ///
    /// Attribute reconciliation is a three-way diff keyed by attribute id:
    /// removals, merges, additions — in that order. Dirty state is recomputed
    /// as "any attribute flags a changed value". Queries named in
    /// `queriesToRefresh` that were previously searched are re-searched
    /// asynchronously, fire-and-forget.
    pub(crate) fn refresh_from_result(
        self: &Arc<Self>,
        result: &PersistentObjectDto,
        result_wins: bool,
    ) {
        let service = self.base.service();

        // A server push carrying pending edits must not be silently dropped.
        if !self.is_editing() && result.attributes.iter().any(|a| a.is_value_changed) {
            self.begin_edit();
        }

        if let Ok(mut state) = self.state.write() {
            state.last_result = result.clone();
        }

        let mut changed_attributes: Vec<Arc<PersistentObjectAttribute>> = Vec::new();
        let mut is_dirty = false;

        // Removals.
        {
            let mut attributes = match self.attributes.write() {
                Ok(attributes) => attributes,
                Err(_) => return,
            };
            attributes.retain(|attr| {
                let keep = result.attributes.iter().any(|a| a.id == attr.id());
                if !keep {
                    attr.set_parent(None);
                    changed_attributes.push(attr.clone());
                }
                keep
            });
        }

        // Merges.
        for attr in self.attributes() {
            if let Some(result_attr) = result.attributes.iter().find(|a| a.id == attr.id()) {
                if attr.refresh_from_result(result_attr, result_wins) {
                    changed_attributes.push(attr.clone());
                }
            }

            if attr.is_value_changed() {
                is_dirty = true;
            }
        }

        // Additions.
        if let Some(service) = &service {
            let existing: Vec<String> = self.attributes().iter().map(|a| a.id().to_string()).collect();
            for result_attr in &result.attributes {
                if !existing.contains(&result_attr.id) {
                    let attr = PersistentObjectAttribute::new(service, result_attr, self);
                    if attr.is_value_changed() {
                        is_dirty = true;
                    }
                    changed_attributes.push(attr.clone());
                    if let Ok(mut attributes) = self.attributes.write() {
                        attributes.push(attr);
                    }
                }
            }
        }

        if !changed_attributes.is_empty() {
            self.refresh_tabs_and_groups(&changed_attributes);
        }

        self.set_notification(
            result.notification.clone(),
            result.notification_type,
            result.notification_duration,
        );
        self.set_is_dirty(is_dirty, true);

        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            state.object_id = result.object_id.clone();
            // isNew is only ever relaxed, never re-set to true.
            if state.is_new {
                state.is_new = result.is_new;
            }
            state.security_token = result.security_token.clone();
            if result.breadcrumb.is_some() {
                state.breadcrumb = result.breadcrumb.clone();
            }
            state.tag = result.tag.clone();
            state.last_updated = Utc::now();
        }

        for id in &result.queries_to_refresh {
            let query = self
                .queries()
                .into_iter()
                .find(|q| q.id() == id || q.name() == id);
            if let Some(query) = query {
                if query.has_searched()
                    || !query.notification().is_empty()
                    || query.total_items().is_some()
                {
                    tokio::spawn(async move {
                        let _ = query.search(QuerySearchOptions::default()).await;
                    });
                }
            }
        }

        if let Some(service) = &service {
            service.hooks().on_refresh_from_result(self);
        }
        self.base.notify("lastUpdated");
    }

    /// Incrementally repairs the tab/group structure for the given changed
    /// attributes instead of rebuilding it.
    pub(crate) fn refresh_tabs_and_groups(self: &Arc<Self>, changed_attributes: &[Arc<PersistentObjectAttribute>]) {
        let last_result_tabs = self
            .state
            .read()
            .map(|s| s.last_result.tabs.clone())
            .unwrap_or_default();

        let mut tabs = self.tabs();
        let mut tabs_added = false;
        let mut tabs_removed = false;

        for attr in changed_attributes {
            let tab_key = attr.tab_key();
            let tab = tabs
                .iter()
                .filter_map(|t| t.as_attribute_tab())
                .find(|t| t.key() == tab_key.as_deref())
                .cloned();

            let Some(tab) = tab else {
                if !attr.is_visible() {
                    continue;
                }

                let group = PersistentObjectAttributeGroup::new(attr.group_key(), vec![attr.clone()]);
                group.set_index(0);

                let tab_dto = tab_key
                    .as_deref()
                    .and_then(|key| last_result_tabs.get(key).cloned())
                    .unwrap_or_default();
                let tab =
                    PersistentObjectAttributeTab::new(tab_key, &tab_dto, vec![group], !self.is_hidden);
                tabs.push(PersistentObjectTab::Attributes(tab));
                tabs_added = true;
                continue;
            };

            let group_key = attr.group_key();
            let group = tab.find_group(group_key.as_deref());

            match group {
                None if attr.is_visible() => {
                    let group = PersistentObjectAttributeGroup::new(group_key, vec![attr.clone()]);
                    tab.add_group(group);
                }
                Some(group) if attr.is_visible() && attr.parent().is_some() => {
                    if !group.contains(attr) {
                        group.insert_sorted(attr.clone());
                    }
                }
                Some(group) => {
                    if group.remove(attr) == 0 && tab.remove_group(&group) == 0 {
                        tabs.retain(|t| {
                            t.as_attribute_tab().map(|x| !Arc::ptr_eq(x, &tab)).unwrap_or(true)
                        });
                        tabs_removed = true;
                    }
                }
                None => {}
            }
        }

        if tabs_added {
            let mut attribute_tabs: Vec<_> = tabs
                .iter()
                .filter_map(|t| t.as_attribute_tab())
                .cloned()
                .collect();
            attribute_tabs.sort_by_key(|t| t.min_offset());

            let mut query_tabs: Vec<_> = tabs
                .iter()
                .filter_map(|t| t.as_query_tab())
                .cloned()
                .collect();
            query_tabs.sort_by_key(|t| t.query().offset());

            tabs = match self.base.service() {
                Some(service) => service
                    .hooks()
                    .on_sort_persistent_object_tabs(self, attribute_tabs, query_tabs),
                None => attribute_tabs
                    .into_iter()
                    .map(PersistentObjectTab::Attributes)
                    .chain(query_tabs.into_iter().map(PersistentObjectTab::Query))
                    .collect(),
            };
        }

        for tab in tabs.iter().filter_map(|t| t.as_attribute_tab()) {
            tab.set_is_visible(tab.attributes().iter().any(|a| a.is_visible()));
        }

        if let Ok(mut slot) = self.tabs.write() {
            *slot = tabs;
        }

        if tabs_added || tabs_removed {
            self.base.notify("tabs");
        }
    }

    /// Runs the attribute-refresh protocol: a server `PersistentObject.Refresh`
    /// round trip for one attribute, deferred onto the work queue unless
    /// `immediate`. The refresh is abandoned as stale (returns `Ok(false)`)
    /// when the attribute's value changed again while queued.
    pub(crate) async fn trigger_attribute_refresh(
        self: &Arc<Self>,
        attr: &Arc<PersistentObjectAttribute>,
        immediate: bool,
    ) -> Result<bool> {
        let revision = attr.revision();

        let this = self.clone();
        let attr_clone = attr.clone();
        let work = async move {
            if attr_clone.revision() != revision {
                debug!(attribute = %attr_clone.name(), "attribute refresh abandoned as stale");
                return Ok(false);
            }

            let Some(service) = this.base.service() else {
                return Ok(false);
            };

            this.prepare_attributes_for_refresh(&attr_clone);

            let mut parameters = serde_json::Map::new();
            parameters.insert(
                "RefreshedPersistentObjectAttributeId".to_string(),
                json!(attr_clone.id()),
            );

            let result = service
                .execute_action(
                    "PersistentObject.Refresh",
                    Some(this.clone()),
                    None,
                    Vec::new(),
                    Some(parameters),
                )
                .await?;

            if this.is_editing() {
                if let Some(po) = result {
                    this.refresh_from_result(&po.dto(), false);
                }
            }

            Ok(true)
        };

        let result = if immediate {
            work.await
        } else {
            self.queue.run(work).await
        };

        if result.is_ok()
            && attr
                .get_type_hint("TriggerRefreshOnOwner", "false", false)
                .eq_ignore_ascii_case("true")
        {
            if let Some(owner) = self.owner_detail_attribute() {
                if owner.triggers_refresh() {
                    // Boxed: the owner's refresh re-enters this method on its
                    // own parent. The coercion is laundered through a free
                    // helper so the recursive-async `Send` inference doesn't
                    // cycle on itself.
                    boxed_trigger_refresh(owner, immediate).await?;
                }
            }
        }

        result
    }

    /// Snapshots every *other* attribute's service value (and reference object
    /// id) as the baseline for the merge's concurrent-edit check.
    pub(crate) fn prepare_attributes_for_refresh(&self, sender: &Arc<PersistentObjectAttribute>) {
        for attr in self.attributes() {
            if attr.id() != sender.id() {
                attr.backup_service_value();
            }
        }
    }
}

/// Boxes an attribute's `trigger_refresh` future behind a `Send` trait object.
///
/// The refresh protocol is mutually recursive (an owner's refresh re-enters
/// `trigger_attribute_refresh` on its own parent). Performing the boxing
/// coercion inside `trigger_attribute_refresh` makes `Send` inference cycle on
/// itself; doing it in this standalone helper breaks the cycle while keeping
/// the resulting future `Send`.
fn boxed_trigger_refresh(
    owner: Arc<PersistentObjectAttribute>,
    immediate: bool,
) -> std::pin::Pin<Box<dyn Future<Output = Result<bool>> + Send>> {
    Box::pin(async move { owner.trigger_refresh(immediate).await })
}

/// Scoped freeze: unfreezes the object when dropped.
pub(crate) struct FreezeGuard {
    object: Arc<PersistentObject>,
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        self.object.unfreeze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::PersistentObjectAttributeDto;
    use crate::service::transport::{ByteStream, HttpRequest, HttpResponse, HttpTransport};
    use crate::service::{DefaultServiceHooks, Service, ServiceConfig};

    struct OfflineTransport;

    #[async_trait::async_trait]
    impl HttpTransport for OfflineTransport {
        async fn send(&self, _request: HttpRequest) -> crate::core::Result<HttpResponse> {
            Err(ServiceError::Transport("offline".to_string()))
        }

        async fn send_streaming(&self, _request: HttpRequest) -> crate::core::Result<ByteStream> {
            Err(ServiceError::Transport("offline".to_string()))
        }
    }

    fn service() -> Arc<Service> {
        Service::with_collaborators(
            ServiceConfig::new("https://backend.example.com"),
            Arc::new(DefaultServiceHooks::new()),
            Arc::new(OfflineTransport),
            None,
        )
    }

    fn attribute_dto(id: &str, name: &str, tab: &str, group: &str, offset: i32) -> PersistentObjectAttributeDto {
        PersistentObjectAttributeDto {
            id: id.to_string(),
            name: name.to_string(),
            type_name: "String".to_string(),
            label: name.to_string(),
            tab: Some(tab.to_string()),
            group: Some(group.to_string()),
            offset,
            visibility: Some("Always".to_string()),
            ..Default::default()
        }
    }

    fn object_dto(attributes: Vec<PersistentObjectAttributeDto>) -> PersistentObjectDto {
        PersistentObjectDto {
            id: "po-type".to_string(),
            type_name: "Customer".to_string(),
            label: "Customer".to_string(),
            object_id: Some("42".to_string()),
            attributes,
            ..Default::default()
        }
    }

    fn attribute_tab_count(po: &Arc<PersistentObject>) -> usize {
        po.tabs().iter().filter(|t| t.as_attribute_tab().is_some()).count()
    }

    #[tokio::test]
    async fn refresh_removes_missing_attribute_with_its_group_and_tab() {
        let service = service();
        let po = service.construct_persistent_object(object_dto(vec![
            attribute_dto("a1", "FirstName", "General", "Name", 0),
            attribute_dto("a2", "Notes", "General", "Extra", 10),
            attribute_dto("a3", "Balance", "Finance", "Totals", 20),
        ]));

        assert_eq!(attribute_tab_count(&po), 2);

        // The result drops Balance entirely and Notes' group becomes empty.
        let result = object_dto(vec![attribute_dto("a1", "FirstName", "General", "Name", 0)]);
        po.refresh_from_result(&result, true);

        assert_eq!(po.attributes().len(), 1);
        assert!(po.get_attribute("Balance").is_none());
        assert!(po.get_attribute("Notes").is_none());

        let tabs = po.tabs();
        let finance = tabs
            .iter()
            .filter_map(|t| t.as_attribute_tab())
            .find(|t| t.key() == Some("Finance"));
        assert!(finance.is_none(), "empty tab must be cascade-removed");

        let general = tabs
            .iter()
            .filter_map(|t| t.as_attribute_tab())
            .find(|t| t.key() == Some("General"))
            .expect("tab with remaining attributes survives");
        assert_eq!(general.groups().len(), 1);
        assert_eq!(general.groups()[0].key(), Some("Name"));
    }

    #[tokio::test]
    async fn attribute_round_trips_through_its_service_object() {
        let service = service();
        let mut dto = attribute_dto("a1", "FirstName", "General", "Name", 0);
        dto.value = Some("Ada".to_string());
        dto.is_read_only = true;
        dto.visibility = Some("Read, Query".to_string());
        let po = service.construct_persistent_object(object_dto(vec![dto]));

        let attr = po.get_attribute("FirstName").unwrap();
        let wire = attr.to_service_object();
        let parsed: PersistentObjectAttributeDto = serde_json::from_value(wire).unwrap();

        attr.refresh_from_result(&parsed, true);

        assert_eq!(attr.value(), Value::String("Ada".to_string()));
        assert!(attr.is_read_only());
        assert_eq!(attr.visibility(), "Read, Query");
    }

    #[tokio::test]
    async fn result_with_pending_edits_forces_edit_mode() {
        let service = service();
        let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
            "a1",
            "FirstName",
            "General",
            "Name",
            0,
        )]));
        assert!(!po.is_editing());

        let mut changed = attribute_dto("a1", "FirstName", "General", "Name", 0);
        changed.value = Some("Grace".to_string());
        changed.is_value_changed = true;
        po.refresh_from_result(&object_dto(vec![changed]), false);

        assert!(po.is_editing());
        assert!(po.is_dirty());
    }

    #[tokio::test]
    async fn dirty_is_never_set_outside_edit_mode() {
        let service = service();
        let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
            "a1",
            "FirstName",
            "General",
            "Name",
            0,
        )]));

        assert!(!po.trigger_dirty());
        assert!(!po.is_dirty());

        po.begin_edit();
        assert!(po.trigger_dirty());
        po.cancel_edit();
        assert!(!po.is_dirty());
    }
}
