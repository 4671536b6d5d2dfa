//! Reference attributes: a pointer to another persistent object, selected
//! through a lookup query.

use crate::core::{Result, ServiceError};
use crate::dto::PersistentObjectAttributeDto;
use crate::model::attribute::PersistentObjectAttribute;
use crate::model::persistent_object::PersistentObject;
use crate::model::query::Query;
use crate::service::Service;
use serde_json::json;
use std::sync::{Arc, RwLock};

struct ReferenceInner {
    object_id: Option<String>,
    display_attribute: Option<String>,
    can_add_new_reference: bool,
    select_in_place: bool,
    /// Baseline captured before a refresh round trip (see
    /// `prepare_attributes_for_refresh`).
    refresh_object_id: Option<Option<String>>,
}

pub struct ReferenceState {
    inner: RwLock<ReferenceInner>,
    lookup: RwLock<Option<Arc<Query>>>,
}

impl ReferenceState {
    pub(crate) fn from_dto(attr: &PersistentObjectAttributeDto) -> Self {
        Self {
            inner: RwLock::new(ReferenceInner {
                object_id: attr.object_id.clone(),
                display_attribute: attr.display_attribute.clone(),
                can_add_new_reference: attr.can_add_new_reference,
                select_in_place: attr.select_in_place,
                refresh_object_id: None,
            }),
            lookup: RwLock::new(None),
        }
    }

    pub(crate) fn attach_lookup(
        &self,
        service: &Arc<Service>,
        attr: &PersistentObjectAttributeDto,
        owner: &Arc<PersistentObjectAttribute>,
    ) {
        let Some(lookup_dto) = &attr.lookup else {
            return;
        };

        let lookup = service
            .hooks()
            .on_construct_query(service, (**lookup_dto).clone(), owner.parent(), true);
        lookup.set_owner_attribute_with_reference(owner);

        if let Ok(mut slot) = self.lookup.write() {
            *slot = Some(lookup);
        }
    }

    pub fn object_id(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.object_id.clone())
    }

    pub fn display_attribute(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.display_attribute.clone())
    }

    pub fn can_add_new_reference(&self) -> bool {
        self.inner.read().map(|i| i.can_add_new_reference).unwrap_or(false)
    }

    pub fn select_in_place(&self) -> bool {
        self.inner.read().map(|i| i.select_in_place).unwrap_or(false)
    }

    /// The lookup query used to pick a new reference.
    pub fn lookup(&self) -> Option<Arc<Query>> {
        self.lookup.read().ok().and_then(|l| l.clone())
    }

    pub(crate) fn backup_object_id(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.refresh_object_id = Some(inner.object_id.clone());
        }
    }

    /// Merges the referenced object id from a result; returns whether the
    /// value side must be overwritten too.
    pub(crate) fn refresh_object_id(
        &self,
        result: &PersistentObjectAttributeDto,
        result_wins: bool,
    ) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(_) => return false,
        };

        let overwrite = result_wins || inner.object_id != result.object_id;
        if overwrite {
            inner.object_id = result.object_id.clone();
        }

        inner.display_attribute = result.display_attribute.clone();
        inner.can_add_new_reference = result.can_add_new_reference;
        inner.select_in_place = result.select_in_place;
        inner.refresh_object_id = None;

        overwrite
    }
}

impl PersistentObjectAttribute {
    /// Starts a new referenced object through the lookup's `Query.New` action.
    /// The returned object is owned by this attribute and flagged to open as a
    /// dialog.
    pub async fn add_new_reference(self: &Arc<Self>) -> Result<Option<Arc<PersistentObject>>> {
        let Some(reference) = self.as_reference() else {
            return Ok(None);
        };

        if self.is_read_only() {
            return Ok(None);
        }

        let (Some(service), Some(parent)) = (self.service(), self.parent()) else {
            return Ok(None);
        };

        let mut parameters = serde_json::Map::new();
        parameters.insert("PersistentObjectAttributeId".to_string(), json!(self.id()));

        let result = service
            .execute_action(
                "Query.New",
                Some(parent.clone()),
                reference.lookup(),
                Vec::new(),
                Some(parameters),
            )
            .await;

        match result {
            Ok(Some(po)) => {
                po.set_owner_attribute_with_reference(self);
                po.append_state_behavior("OpenAsDialog");
                Ok(Some(po))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                parent.set_notification(Some(e.to_string()), crate::dto::NotificationType::Error, 0);
                Err(e)
            }
        }
    }

    /// Updates the reference from the given object ids, running through the
    /// owner's serialized work queue.
    pub async fn change_reference(self: &Arc<Self>, object_ids: Vec<String>) -> Result<bool> {
        let Some(reference) = self.as_reference() else {
            return Ok(false);
        };

        let Some(parent) = self.parent() else {
            return Ok(false);
        };

        let this = self.clone();
        let lookup = reference.lookup();
        parent
            .clone()
            .queue_work(async move {
                if this.is_read_only() {
                    return Err(ServiceError::ReadOnly(this.name().to_string()));
                }

                let Some(service) = this.service() else {
                    return Ok(false);
                };

                parent.prepare_attributes_for_refresh(&this);

                let selected_items = object_ids
                    .into_iter()
                    .map(|id| crate::dto::QueryResultItemDto {
                        id,
                        ..Default::default()
                    })
                    .collect();

                let mut parameters = serde_json::Map::new();
                parameters.insert("PersistentObjectAttributeId".to_string(), json!(this.id()));

                let result = service
                    .execute_action(
                        "PersistentObject.SelectReference",
                        Some(parent.clone()),
                        lookup,
                        selected_items,
                        Some(parameters),
                    )
                    .await?;

                if let Some(po) = result {
                    parent.refresh_from_result(&po.dto(), false);
                }

                Ok(true)
            })
            .await
    }

    /// Retrieves the persistent object this reference points at, or `None`
    /// when nothing is referenced.
    pub async fn get_referenced_object(self: &Arc<Self>) -> Result<Option<Arc<PersistentObject>>> {
        let Some(reference) = self.as_reference() else {
            return Ok(None);
        };

        let Some(object_id) = reference.object_id() else {
            return Ok(None);
        };

        let (Some(service), Some(parent)) = (self.service(), self.parent()) else {
            return Ok(None);
        };

        let Some(lookup) = reference.lookup() else {
            return Ok(None);
        };

        let lookup_po_id = lookup.persistent_object_id();

        let parent_clone = parent.clone();
        parent
            .queue_work(async move {
                service
                    .get_persistent_object(
                        Some(&parent_clone),
                        &lookup_po_id,
                        Some(object_id.as_str()),
                        false,
                    )
                    .await
                    .map(Some)
            })
            .await
    }

    /// The id of the referenced object, when this is a reference attribute.
    /// The typed value of a reference attribute is its display text; the
    /// reference itself moves through [`change_reference`](Self::change_reference).
    pub fn reference_object_id(&self) -> Option<String> {
        self.as_reference().and_then(|r| r.object_id())
    }
}
