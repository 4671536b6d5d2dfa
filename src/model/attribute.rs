//! A single field of a persistent object.
//!
//! The canonical representation of a value is its *service string*; the typed
//! projection and the formatted display string are memoized against it and
//! recomputed only when it changes. A monotonic revision counter tracks every
//! service-value change so queued refreshes can detect staleness without
//! snapshot comparisons.

use crate::core::{Result, SubscriptionId, Value, data_type};
use crate::dto::PersistentObjectAttributeDto;
use crate::model::detail::DetailState;
use crate::model::persistent_object::PersistentObject;
use crate::model::reference::ReferenceState;
use crate::model::service_object::{ServiceObject, copy_properties};
use crate::service::Service;
use crate::service::transport::FilePayload;
use serde_json::{Value as Json, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Display placeholder for empty values.
const EMPTY_DISPLAY_VALUE: &str = "\u{2014}";

/// One entry of an attribute's option list. Plain options carry no key;
/// key/value options come from `key=value` service strings.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeOption {
    pub key: Option<String>,
    pub value: String,
}

pub enum AttributeKind {
    Simple,
    Reference(ReferenceState),
    Detail(DetailState),
}

pub(crate) struct AttributeState {
    pub label: String,
    pub service_value: Option<String>,
    pub service_options: Vec<String>,
    pub options: Vec<AttributeOption>,
    pub rules: Option<String>,
    pub validation_error: Option<String>,
    pub is_required: bool,
    pub is_read_only: bool,
    pub is_value_changed: bool,
    pub visibility: String,
    pub is_visible: bool,
    pub tab_key: Option<String>,
    pub group_key: Option<String>,
    pub offset: i32,
    pub type_hints: HashMap<String, String>,
    pub triggers_refresh: bool,
    pub should_refresh: bool,
    /// Snapshot of the service value taken before a refresh round trip, used
    /// by the merge to avoid clobbering a concurrent client-side edit.
    pub refresh_service_value: Option<Option<String>>,
    pub actions: Vec<String>,
    pub tag: Option<Json>,
    pub pending_file: Option<FilePayload>,

    // Memoization: both caches key on the identity of the service value at
    // computation time.
    parsed_source: Option<Option<String>>,
    parsed_value: Value,
    display_source: Option<Option<String>>,
    display_value: Option<String>,
}

pub struct PersistentObjectAttribute {
    base: ServiceObject,
    parent: RwLock<Weak<PersistentObject>>,
    id: String,
    name: String,
    type_name: String,
    is_system: bool,
    is_sensitive: bool,
    column: Option<i32>,
    column_span: i32,
    tool_tip: Option<String>,
    kind: AttributeKind,
    revision: AtomicU64,
    state: RwLock<AttributeState>,
}

impl PersistentObjectAttribute {
    pub(crate) fn new(
        service: &Arc<Service>,
        attr: &PersistentObjectAttributeDto,
        parent: &Arc<PersistentObject>,
    ) -> Arc<Self> {
        let kind = if attr.is_reference() {
            AttributeKind::Reference(ReferenceState::from_dto(attr))
        } else if attr.is_detail() {
            AttributeKind::Detail(DetailState::new(attr.lookup_attribute.clone()))
        } else {
            AttributeKind::Simple
        };

        let visibility = attr.visibility.clone().unwrap_or_else(|| "Always".to_string());
        let is_visible = compute_is_visible(&visibility, parent.is_new());

        let this = Arc::new(Self {
            base: ServiceObject::new(service),
            parent: RwLock::new(Arc::downgrade(parent)),
            id: attr.id.clone(),
            name: attr.name.clone(),
            type_name: attr.type_name.clone(),
            is_system: attr.is_system,
            is_sensitive: attr.is_sensitive,
            column: attr.column,
            column_span: attr.column_span.unwrap_or(0),
            tool_tip: attr.tool_tip.clone(),
            kind,
            revision: AtomicU64::new(0),
            state: RwLock::new(AttributeState {
                label: attr.label.clone(),
                service_value: attr.value.clone(),
                service_options: Vec::new(),
                options: Vec::new(),
                rules: attr.rules.clone(),
                validation_error: attr.validation_error.clone(),
                is_required: attr.is_required,
                is_read_only: attr.is_read_only,
                is_value_changed: attr.is_value_changed,
                visibility,
                is_visible,
                tab_key: attr.tab.clone(),
                group_key: attr.group.clone(),
                offset: attr.offset,
                type_hints: attr.type_hints.clone(),
                triggers_refresh: attr.triggers_refresh,
                should_refresh: false,
                refresh_service_value: None,
                actions: attr.actions.clone(),
                tag: attr.tag.clone(),
                pending_file: None,
                parsed_source: None,
                parsed_value: Value::Null,
                display_source: None,
                display_value: None,
            }),
        });

        if let AttributeKind::Reference(reference) = &this.kind {
            reference.attach_lookup(service, attr, &this);
        }
        this.apply_options(&attr.options);

        if let AttributeKind::Detail(detail) = &this.kind {
            detail.attach(service, attr, parent, &this);
        }

        this
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    pub fn column(&self) -> Option<i32> {
        self.column
    }

    pub fn column_span(&self) -> i32 {
        self.column_span
    }

    pub fn tool_tip(&self) -> Option<String> {
        self.tool_tip.clone()
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn as_reference(&self) -> Option<&ReferenceState> {
        match &self.kind {
            AttributeKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_detail(&self) -> Option<&DetailState> {
        match &self.kind {
            AttributeKind::Detail(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<Arc<PersistentObject>> {
        self.parent.read().ok().and_then(|p| p.upgrade())
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<PersistentObject>>) {
        if let Ok(mut slot) = self.parent.write() {
            *slot = parent.map(Arc::downgrade).unwrap_or_default();
        }
    }

    pub(crate) fn service(&self) -> Option<Arc<Service>> {
        self.base.service()
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

    pub fn label(&self) -> String {
        self.state.read().map(|s| s.label.clone()).unwrap_or_default()
    }

    pub fn set_label(&self, label: &str) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.label != label {
                state.label = label.to_string();
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("label");
        }
    }

    pub fn offset(&self) -> i32 {
        self.state.read().map(|s| s.offset).unwrap_or(0)
    }

    pub fn tab_key(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.tab_key.clone())
    }

    pub fn group_key(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.group_key.clone())
    }

    pub fn rules(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.rules.clone())
    }

    pub fn validation_error(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.validation_error.clone())
    }

    pub fn set_validation_error(&self, error: Option<String>) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.validation_error != error {
                state.validation_error = error;
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("validationError");
        }
    }

    pub fn is_required(&self) -> bool {
        self.state.read().map(|s| s.is_required).unwrap_or(false)
    }

    pub fn is_read_only(&self) -> bool {
        self.state.read().map(|s| s.is_read_only).unwrap_or(false)
    }

    pub fn is_value_changed(&self) -> bool {
        self.state.read().map(|s| s.is_value_changed).unwrap_or(false)
    }

    pub(crate) fn set_is_value_changed(&self, is_value_changed: bool) {
        let changed = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.is_value_changed != is_value_changed {
                state.is_value_changed = is_value_changed;
                true
            } else {
                false
            }
        };
        if changed {
            self.base.notify("isValueChanged");
        }
    }

    pub fn visibility(&self) -> String {
        self.state.read().map(|s| s.visibility.clone()).unwrap_or_default()
    }

    pub fn is_visible(&self) -> bool {
        self.state.read().map(|s| s.is_visible).unwrap_or(false)
    }

    /// Updates the visibility token set, recomputing `is_visible`. A
    /// visibility flip on an attribute whose owner is not busy triggers the
    /// owner's tab/group re-derivation.
    pub fn set_visibility(self: &Arc<Self>, visibility: &str) {
        let flipped = self.apply_visibility(visibility);
        self.base.notify("visibility");

        if flipped {
            self.base.notify("isVisible");
            if let Some(parent) = self.parent() {
                if !parent.is_busy() {
                    parent.refresh_tabs_and_groups(&[self.clone()]);
                }
            }
        }
    }

    /// Sets visibility without triggering tab re-derivation; returns whether
    /// the effective visibility flipped. Used by the merge path, which
    /// collects flips and repairs tabs once.
    pub(crate) fn apply_visibility(&self, visibility: &str) -> bool {
        let parent_is_new = self.parent().map(|p| p.is_new()).unwrap_or(false);
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(_) => return false,
        };
        if state.visibility == visibility {
            return false;
        }

        state.visibility = visibility.to_string();
        let new_is_visible = compute_is_visible(visibility, parent_is_new);
        if new_is_visible != state.is_visible {
            state.is_visible = new_is_visible;
            true
        } else {
            false
        }
    }

    pub fn triggers_refresh(&self) -> bool {
        self.state.read().map(|s| s.triggers_refresh).unwrap_or(false)
    }

    pub fn should_refresh(&self) -> bool {
        self.state.read().map(|s| s.should_refresh).unwrap_or(false)
    }

    pub(crate) fn set_should_refresh(&self, should_refresh: bool) {
        if let Ok(mut state) = self.state.write() {
            state.should_refresh = should_refresh;
        }
    }

    pub fn options(&self) -> Vec<AttributeOption> {
        self.state.read().map(|s| s.options.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.read().map(|s| s.actions.clone()).unwrap_or_default()
    }

    pub fn tag(&self) -> Option<Json> {
        self.state.read().ok().and_then(|s| s.tag.clone())
    }

    /// Monotonic revision of the service value; bumped on every change. A
    /// queued refresh captures this at enqueue time and is stale when it no
    /// longer matches at execution time.
    pub(crate) fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn service_value(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.service_value.clone())
    }

    /// Attaches a file to be uploaded alongside the next action request.
    /// Only meaningful for `BinaryFile` attributes.
    pub fn set_pending_file(&self, file: Option<FilePayload>) {
        if let Ok(mut state) = self.state.write() {
            state.pending_file = file;
        }
    }

    pub fn pending_file(&self) -> Option<FilePayload> {
        self.state.read().ok().and_then(|s| s.pending_file.clone())
    }

    /// Looks up a type hint, case-insensitively unless `exact_casing` is set.
    pub fn get_type_hint(&self, name: &str, default: &str, exact_casing: bool) -> String {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return default.to_string(),
        };

        if let Some(hint) = state.type_hints.get(name) {
            return hint.clone();
        }

        if !exact_casing {
            let lowered = name.to_lowercase();
            for (key, hint) in &state.type_hints {
                if key.to_lowercase() == lowered {
                    return hint.clone();
                }
            }
        }

        default.to_string()
    }

    /// The typed value, memoized against the current service string.
    pub fn value(&self) -> Value {
        let is_bulk_edit = self.parent().map(|p| p.is_bulk_edit()).unwrap_or(false);
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(_) => return Value::Null,
        };

        if state.parsed_source.as_ref() != Some(&state.service_value) {
            state.parsed_source = Some(state.service_value.clone());
            state.parsed_value = if !is_bulk_edit || state.service_value.is_some() {
                data_type::from_service_string(state.service_value.as_deref(), &self.type_name)
            } else {
                Value::Null
            };
        }

        state.parsed_value.clone()
    }

    /// The formatted display string, memoized against the current service
    /// string; an em-dash when empty.
    pub fn display_value(&self) -> String {
        {
            let state = match self.state.read() {
                Ok(state) => state,
                Err(_) => return EMPTY_DISPLAY_VALUE.to_string(),
            };
            if state.display_source.as_ref() == Some(&state.service_value) {
                return state
                    .display_value
                    .clone()
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| EMPTY_DISPLAY_VALUE.to_string());
            }
        }

        let computed = self.compute_display_value();
        if let Ok(mut state) = self.state.write() {
            state.display_source = Some(state.service_value.clone());
            state.display_value = computed.clone();
        }

        computed
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| EMPTY_DISPLAY_VALUE.to_string())
    }

    fn compute_display_value(&self) -> Option<String> {
        let service = self.base.service();
        let value = self.value();
        let mut format = self.get_type_hint("DisplayFormat", "{0}", false);

        let text: Option<String> = match self.type_name.as_str() {
            "Boolean" | "NullableBoolean" | "YesNo" => value.as_bool().map(|b| {
                let key = if b {
                    self.get_type_hint("TrueKey", "Yes", false)
                } else {
                    self.get_type_hint("FalseKey", "No", false)
                };
                match &service {
                    Some(service) => service.get_translated_message(&key),
                    None => key,
                }
            }),
            "KeyValueList" => {
                let current = match &value {
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                self.resolve_key_value_display(&current)
            }
            "Time" | "NullableTime" => value.as_str().map(trim_time_display),
            "User" | "NullableUser" => {
                let options = self.options();
                match options.first() {
                    Some(first) => Some(first.value.clone()),
                    None => value.as_str().map(str::to_string),
                }
            }
            _ => {
                if let Some(service) = &service {
                    if let Some(calculated) = service.hooks().on_get_attribute_display_value(self, &value) {
                        return Some(calculated);
                    }
                }
                match &value {
                    Value::Null => None,
                    other => Some(other.to_string()),
                }
            }
        };

        if format == "{0}" {
            let culture = service.as_ref().map(|s| s.current_culture()).unwrap_or_default();
            if self.type_name == "Date" || self.type_name == "NullableDate" {
                format = format!("{{0:{}}}", culture.date_format.short_date_pattern);
            } else if self.type_name == "DateTime" || self.type_name == "NullableDateTime" {
                format = format!(
                    "{{0:{} {}}}",
                    culture.date_format.short_date_pattern, culture.date_format.short_time_pattern
                );
            }
        }

        text.map(|t| format_display(&format, &value, &t))
    }

    fn resolve_key_value_display(&self, current: &str) -> Option<String> {
        let state = self.state.read().ok()?;
        if state.options.is_empty() {
            return if current.is_empty() { None } else { Some(current.to_string()) };
        }

        let is_empty = current.is_empty();
        let mut option = state.options.iter().find(|o| {
            o.key.as_deref() == Some(current) || (is_empty && o.key.as_deref().unwrap_or("").is_empty())
        });

        if state.is_required && option.is_none() {
            option = state
                .options
                .iter()
                .find(|o| o.key.as_deref().unwrap_or("").is_empty());
        }

        match option {
            Some(option) => Some(option.value.clone()),
            None if state.is_required => state.options.first().map(|o| o.value.clone()),
            None => {
                if is_empty {
                    None
                } else {
                    Some(current.to_string())
                }
            }
        }
    }

    /// Sets a new value.
    ///
    /// No-ops (returning the current value) when the owner is not editing, is
    /// frozen, or the attribute is read-only. Setting an equal value is
    /// idempotent except that a previously deferred refresh is still honored.
    pub async fn set_value(self: &Arc<Self>, value: Value, allow_refresh: bool) -> Result<Value> {
        let Some(parent) = self.parent() else {
            return Ok(self.value());
        };

        if !parent.is_editing() || parent.is_frozen() || self.is_read_only() {
            return Ok(self.value());
        }

        self.set_validation_error(None);

        let value = self.normalize_casing(value);
        let new_service_value = data_type::to_service_string(&value, &self.type_name);

        let current = self.value();
        let unchanged = {
            let state = self.state.read().map_err(crate::core::ServiceError::from)?;
            current == value
                || (state.service_value.is_none()
                    && new_service_value.as_deref().unwrap_or("").is_empty())
                || state.service_value == new_service_value
        };

        if unchanged {
            if allow_refresh && self.should_refresh() {
                self.trigger_refresh(false).await?;
            }
            return Ok(self.value());
        }

        {
            let mut state = self.state.write().map_err(crate::core::ServiceError::from)?;
            state.service_value = new_service_value;
            state.is_value_changed = true;
        }
        self.revision.fetch_add(1, Ordering::AcqRel);
        self.base.notify("value");
        self.base.notify("isValueChanged");
        self.base.notify("displayValue");

        if self.triggers_refresh() {
            if allow_refresh {
                self.trigger_refresh(false).await?;
            } else {
                self.set_should_refresh(true);
            }
        }

        parent.trigger_dirty();

        Ok(self.value())
    }

    fn normalize_casing(&self, value: Value) -> Value {
        let Value::String(text) = &value else {
            return value;
        };

        match self
            .get_type_hint("charactercasing", "", true)
            .to_uppercase()
            .as_str()
        {
            "LOWER" => Value::String(text.to_lowercase()),
            "UPPER" => Value::String(text.to_uppercase()),
            _ => value,
        }
    }

    /// Clears any deferred-refresh flag and runs the owner's attribute-refresh
    /// protocol. Returns false when the refresh was abandoned as stale.
    pub async fn trigger_refresh(self: &Arc<Self>, immediate: bool) -> Result<bool> {
        self.set_should_refresh(false);

        let Some(parent) = self.parent() else {
            return Ok(false);
        };

        parent.trigger_attribute_refresh(self, immediate).await
    }

    /// Snapshots the current service value (and reference object id) as the
    /// baseline for the merge's concurrent-edit check.
    pub(crate) fn backup_service_value(&self) {
        if let Ok(mut state) = self.state.write() {
            state.refresh_service_value = Some(state.service_value.clone());
        }
        if let AttributeKind::Reference(reference) = &self.kind {
            reference.backup_object_id();
        }
    }

    /// Merges a result attribute into this one. The value is overwritten only
    /// when `result_wins`, or when the service value differs from the result
    /// and this attribute was not itself the source of a concurrent edit.
    /// Returns whether the effective visibility flipped.
    pub(crate) fn refresh_from_result(
        self: &Arc<Self>,
        result: &PersistentObjectAttributeDto,
        result_wins: bool,
    ) -> bool {
        if let AttributeKind::Reference(reference) = &self.kind {
            if reference.refresh_object_id(result, result_wins) {
                self.set_is_value_changed(result.is_value_changed);
            }
        }

        self.set_label(&result.label);

        if self.type_name != "Reference" {
            self.apply_options(&result.options);
        }

        let result_visibility = result.visibility.clone().unwrap_or_else(|| "Always".to_string());
        let visibility_changed = {
            let current = self.visibility();
            if current != result_visibility {
                self.apply_visibility(&result_visibility);
                true
            } else {
                false
            }
        };

        let result_value = result.value.clone();
        let overwrite = {
            let state = match self.state.read() {
                Ok(state) => state,
                Err(_) => return visibility_changed,
            };
            result_wins
                || (state.service_value != result_value
                    && (state.is_read_only
                        || state.refresh_service_value.as_ref() != Some(&result_value)))
        };

        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => return visibility_changed,
            };

            state.actions = result.actions.clone();
            state.is_read_only = result.is_read_only;
            state.rules = result.rules.clone();
            state.is_required = result.is_required;

            if overwrite {
                state.service_value = result_value;
                state.parsed_source = None;
                state.display_source = None;
                state.is_value_changed = result.is_value_changed;
                state.pending_file = None;
            }

            state.tag = result.tag.clone();
            state.refresh_service_value = None;
            state.triggers_refresh = result.triggers_refresh;
            state.validation_error = result.validation_error.clone();

            if result
                .type_hints
                .iter()
                .any(|(key, hint)| state.type_hints.get(key) != Some(hint))
            {
                let mut merged = result.type_hints.clone();
                for (key, hint) in &state.type_hints {
                    merged.entry(key.clone()).or_insert_with(|| hint.clone());
                }
                state.type_hints = merged;
            }
        }
        if overwrite {
            self.revision.fetch_add(1, Ordering::AcqRel);
            self.base.notify("value");
            self.base.notify("displayValue");
        }

        if let (AttributeKind::Detail(detail), Some(service)) = (&self.kind, self.base.service()) {
            if let Some(parent) = self.parent() {
                detail.refresh_objects(&service, result, &parent, self);
            }
        }

        visibility_changed
    }

    /// Projects this attribute into a plain record for the wire.
    pub(crate) fn to_service_object(&self) -> Json {
        let parent = self.parent();
        let is_bulk_edit = parent.as_ref().map(|p| p.is_bulk_edit()).unwrap_or(false);

        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return Json::Null,
        };

        let mut properties = vec![
            ("id", json!(self.id)),
            ("name", json!(self.name)),
            ("label", json!(state.label)),
            ("type", json!(self.type_name)),
            ("isReadOnly", json!(state.is_read_only)),
            ("triggersRefresh", json!(state.triggers_refresh)),
            ("isRequired", json!(state.is_required)),
            (
                "differsInBulkEditMode",
                json!(is_bulk_edit && state.is_value_changed),
            ),
            ("isValueChanged", json!(state.is_value_changed)),
            ("visibility", json!(state.visibility)),
        ];

        if let AttributeKind::Reference(reference) = &self.kind {
            properties.push(("objectId", json!(reference.object_id())));
            properties.push(("displayAttribute", json!(reference.display_attribute())));
        }

        let mut result = copy_properties(properties, false);

        result.insert("value".to_string(), json!(state.service_value));
        result.insert("actions".to_string(), json!(state.actions));

        let options: Json = if !state.options.is_empty() && state.is_value_changed {
            json!(
                state
                    .options
                    .iter()
                    .map(|o| match &o.key {
                        Some(key) => format!("{}={}", key, o.value),
                        None => o.value.clone(),
                    })
                    .collect::<Vec<_>>()
            )
        } else {
            json!(state.service_options)
        };
        result.insert("options".to_string(), options);

        drop(state);

        if let AttributeKind::Detail(detail) = &self.kind {
            result.insert("objects".to_string(), detail.objects_to_service_object());
        }

        Json::Object(result)
    }

    pub(crate) fn apply_options(&self, options: &[String]) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(_) => return,
        };

        state.service_options = options.to_vec();

        if options.is_empty() {
            state.options = Vec::new();
            return;
        }

        let key_value_options = matches!(self.type_name.as_str(), "FlagsEnum" | "KeyValueList")
            || (self.type_name == "Reference"
                && matches!(&self.kind, AttributeKind::Reference(r) if r.select_in_place()));

        state.options = options
            .iter()
            .map(|option| {
                if key_value_options {
                    match option.split_once('=') {
                        Some((key, value)) => AttributeOption {
                            key: Some(key.to_string()),
                            value: value.to_string(),
                        },
                        None => AttributeOption {
                            key: Some(option.clone()),
                            value: String::new(),
                        },
                    }
                } else {
                    AttributeOption {
                        key: None,
                        value: option.clone(),
                    }
                }
            })
            .collect();
    }
}

fn compute_is_visible(visibility: &str, parent_is_new: bool) -> bool {
    visibility.contains("Always") || visibility.contains(if parent_is_new { "New" } else { "Read" })
}

fn trim_time_display(value: &str) -> String {
    let mut value = value.trim_end_matches('0').trim_end_matches('.').to_string();
    if let Some(rest) = value.strip_prefix("0:") {
        value = rest.to_string();
    }
    if let Some(rest) = value.strip_suffix(":00") {
        value = rest.to_string();
    }
    value
}

/// Applies a `{0}`/`{0:pattern}` display format to a value.
fn format_display(format: &str, value: &Value, text: &str) -> String {
    let Some(start) = format.find("{0") else {
        return format.to_string();
    };
    let Some(end) = format[start..].find('}') else {
        return format.to_string();
    };

    let placeholder = &format[start..start + end + 1];
    let formatted = match placeholder.strip_prefix("{0:").and_then(|p| p.strip_suffix('}')) {
        Some(pattern) => match value {
            Value::Date(date) => date
                .format(&crate::service::culture::dotnet_to_chrono(pattern))
                .to_string(),
            Value::DateTime(date_time) => date_time
                .format(&crate::service::culture::dotnet_to_chrono(pattern))
                .to_string(),
            _ => text.to_string(),
        },
        None => text.to_string(),
    };

    format.replacen(placeholder, &formatted, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_display_trimming() {
        assert_eq!(trim_time_display("0:09:30:00.0000000"), "09:30");
        assert_eq!(trim_time_display("1:08:00:00.0000000"), "1:08:00");
    }

    #[test]
    fn visibility_tokens() {
        assert!(compute_is_visible("Always", false));
        assert!(compute_is_visible("Read, Query", false));
        assert!(!compute_is_visible("Read", true));
        assert!(compute_is_visible("New", true));
    }
}
