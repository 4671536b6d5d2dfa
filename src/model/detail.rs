//! Detail attributes: an embedded list of child persistent objects, with a
//! query template used to create new rows.

use crate::core::Result;
use crate::dto::PersistentObjectAttributeDto;
use crate::model::attribute::PersistentObjectAttribute;
use crate::model::persistent_object::PersistentObject;
use crate::model::query::Query;
use crate::service::Service;
use serde_json::{Value as Json, json};
use std::sync::{Arc, RwLock};

pub struct DetailState {
    objects: RwLock<Vec<Arc<PersistentObject>>>,
    details: RwLock<Option<Arc<Query>>>,
    lookup_attribute: Option<String>,
}

impl DetailState {
    pub(crate) fn new(lookup_attribute: Option<String>) -> Self {
        Self {
            objects: RwLock::new(Vec::new()),
            details: RwLock::new(None),
            lookup_attribute,
        }
    }

    pub(crate) fn attach(
        &self,
        service: &Arc<Service>,
        attr: &PersistentObjectAttributeDto,
        parent: &Arc<PersistentObject>,
        owner: &Arc<PersistentObjectAttribute>,
    ) {
        if let Some(details_dto) = &attr.details {
            let details = service.hooks().on_construct_query(
                service,
                (**details_dto).clone(),
                Some(parent.clone()),
                true,
            );
            if let Ok(mut slot) = self.details.write() {
                *slot = Some(details);
            }
        }

        if let Some(object_dtos) = &attr.objects {
            let objects = object_dtos
                .iter()
                .map(|dto| {
                    let child = service.hooks().on_construct_persistent_object(service, dto.clone());
                    child.set_parent(Some(parent));
                    child.set_owner_detail_attribute(owner);
                    child
                })
                .collect();
            if let Ok(mut slot) = self.objects.write() {
                *slot = objects;
            }
        }
    }

    /// The child persistent objects of this detail attribute.
    pub fn objects(&self) -> Vec<Arc<PersistentObject>> {
        self.objects.read().map(|o| o.clone()).unwrap_or_default()
    }

    /// The query template used to create new child rows.
    pub fn details(&self) -> Option<Arc<Query>> {
        self.details.read().ok().and_then(|d| d.clone())
    }

    pub fn lookup_attribute(&self) -> Option<String> {
        self.lookup_attribute.clone()
    }

    /// Fans an edit-session/freeze change on the owner out to every child.
    pub(crate) fn propagate_is_editing(&self, is_editing: bool) {
        if is_editing {
            for child in self.objects() {
                child.begin_edit();
            }
        }
    }

    pub(crate) fn propagate_is_frozen(&self, is_frozen: bool) {
        for child in self.objects() {
            if is_frozen {
                child.freeze();
            } else {
                child.unfreeze();
            }
        }
    }

    pub(crate) fn refresh_objects(
        &self,
        service: &Arc<Service>,
        result: &PersistentObjectAttributeDto,
        parent: &Arc<PersistentObject>,
        owner: &Arc<PersistentObjectAttribute>,
    ) {
        let Some(object_dtos) = &result.objects else {
            return;
        };

        let objects: Vec<_> = object_dtos
            .iter()
            .map(|dto| {
                let child = service.hooks().on_construct_persistent_object(service, dto.clone());
                child.set_parent(Some(parent));
                child.set_owner_detail_attribute(owner);

                if parent.is_editing() {
                    child.begin_edit();
                }

                child
            })
            .collect();

        if let Ok(mut slot) = self.objects.write() {
            *slot = objects;
        }
    }

    pub(crate) fn objects_to_service_object(&self) -> Json {
        json!(
            self.objects()
                .iter()
                .map(|child| {
                    let mut dto = child.to_service_object(true);
                    if child.is_deleted() {
                        if let Some(map) = dto.as_object_mut() {
                            map.insert("isDeleted".to_string(), json!(true));
                        }
                    }
                    dto
                })
                .collect::<Vec<_>>()
        )
    }
}

impl PersistentObjectAttribute {
    /// Creates a new child row through the details query's `New` action. The
    /// returned object is owned by this attribute and not yet part of
    /// [`DetailState::objects`]; callers append it once accepted.
    pub async fn new_detail_object(self: &Arc<Self>) -> Result<Option<Arc<PersistentObject>>> {
        let Some(detail) = self.as_detail() else {
            return Ok(None);
        };

        let (Some(service), Some(details)) = (self.service(), detail.details()) else {
            return Ok(None);
        };

        let po = service
            .execute_action("Query.New", self.parent(), Some(details), Vec::new(), None)
            .await?;

        if let Some(po) = &po {
            po.clear_owner_query();
            po.set_owner_detail_attribute(self);
        }

        Ok(po)
    }

    /// Marks the detail attribute as changed after a child mutation,
    /// honoring the deferred-refresh contract.
    pub async fn detail_changed(self: &Arc<Self>, allow_refresh: bool) -> Result<()> {
        let Some(parent) = self.parent() else {
            return Ok(());
        };

        if !parent.is_editing() || self.is_read_only() {
            return Ok(());
        }

        parent.trigger_dirty();

        if self.triggers_refresh() {
            if allow_refresh {
                self.trigger_refresh(false).await?;
            } else {
                self.set_should_refresh(true);
            }
        }

        Ok(())
    }
}
