//! Derived tab/group read-model over a persistent object's attributes.
//!
//! Tabs and groups are presentation groupings recomputed incrementally as
//! attributes change visibility or membership; they never own the attributes.

use crate::dto::TabDto;
use crate::model::attribute::PersistentObjectAttribute;
use crate::model::query::Query;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Sub-partition of a tab: attributes sharing a group key, ordered by offset.
pub struct PersistentObjectAttributeGroup {
    key: Option<String>,
    attributes: RwLock<Vec<Arc<PersistentObjectAttribute>>>,
    index: AtomicUsize,
}

impl PersistentObjectAttributeGroup {
    pub(crate) fn new(key: Option<String>, attributes: Vec<Arc<PersistentObjectAttribute>>) -> Arc<Self> {
        Arc::new(Self {
            key,
            attributes: RwLock::new(attributes),
            index: AtomicUsize::new(0),
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn attributes(&self) -> Vec<Arc<PersistentObjectAttribute>> {
        self.attributes.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub(crate) fn contains(&self, attribute: &Arc<PersistentObjectAttribute>) -> bool {
        self.attributes
            .read()
            .map(|a| a.iter().any(|x| Arc::ptr_eq(x, attribute)))
            .unwrap_or(false)
    }

    pub(crate) fn insert_sorted(&self, attribute: Arc<PersistentObjectAttribute>) {
        if let Ok(mut attributes) = self.attributes.write() {
            attributes.push(attribute);
            attributes.sort_by_key(|a| a.offset());
        }
    }

    pub(crate) fn remove(&self, attribute: &Arc<PersistentObjectAttribute>) -> usize {
        match self.attributes.write() {
            Ok(mut attributes) => {
                attributes.retain(|x| !Arc::ptr_eq(x, attribute));
                attributes.len()
            }
            Err(_) => 0,
        }
    }

    /// Smallest attribute offset, used for ordering groups within a tab.
    pub(crate) fn min_offset(&self) -> i32 {
        self.attributes
            .read()
            .map(|a| a.iter().map(|x| x.offset()).min().unwrap_or(i32::MAX))
            .unwrap_or(i32::MAX)
    }
}

/// A tab of attribute groups, keyed by the attributes' tab key.
pub struct PersistentObjectAttributeTab {
    key: Option<String>,
    id: Option<String>,
    name: Option<String>,
    layout: Option<Json>,
    column_count: i32,
    groups: RwLock<Vec<Arc<PersistentObjectAttributeGroup>>>,
    is_visible: AtomicBool,
}

impl PersistentObjectAttributeTab {
    pub(crate) fn new(
        key: Option<String>,
        dto: &TabDto,
        groups: Vec<Arc<PersistentObjectAttributeGroup>>,
        is_visible: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            id: dto.id.clone(),
            name: dto.name.clone(),
            layout: dto.layout.clone(),
            column_count: dto.column_count,
            groups: RwLock::new(groups),
            is_visible: AtomicBool::new(is_visible),
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn layout(&self) -> Option<&Json> {
        self.layout.as_ref()
    }

    pub fn column_count(&self) -> i32 {
        self.column_count
    }

    pub fn groups(&self) -> Vec<Arc<PersistentObjectAttributeGroup>> {
        self.groups.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Flattened attribute list across all groups.
    pub fn attributes(&self) -> Vec<Arc<PersistentObjectAttribute>> {
        self.groups()
            .iter()
            .flat_map(|group| group.attributes())
            .collect()
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible.load(Ordering::Relaxed)
    }

    pub(crate) fn set_is_visible(&self, is_visible: bool) {
        self.is_visible.store(is_visible, Ordering::Relaxed);
    }

    pub(crate) fn find_group(&self, key: Option<&str>) -> Option<Arc<PersistentObjectAttributeGroup>> {
        self.groups
            .read()
            .ok()?
            .iter()
            .find(|g| g.key() == key)
            .cloned()
    }

    pub(crate) fn add_group(&self, group: Arc<PersistentObjectAttributeGroup>) {
        if let Ok(mut groups) = self.groups.write() {
            groups.push(group);
            groups.sort_by_key(|g| g.min_offset());
            for (index, group) in groups.iter().enumerate() {
                group.set_index(index);
            }
        }
    }

    /// Removes a group; returns how many groups remain.
    pub(crate) fn remove_group(&self, group: &Arc<PersistentObjectAttributeGroup>) -> usize {
        match self.groups.write() {
            Ok(mut groups) => {
                groups.retain(|g| !Arc::ptr_eq(g, group));
                for (index, group) in groups.iter().enumerate() {
                    group.set_index(index);
                }
                groups.len()
            }
            Err(_) => 0,
        }
    }

    pub(crate) fn min_offset(&self) -> i32 {
        self.groups()
            .iter()
            .map(|g| g.min_offset())
            .min()
            .unwrap_or(i32::MAX)
    }
}

/// A tab hosting a sub-query of the persistent object.
pub struct PersistentObjectQueryTab {
    query: Arc<Query>,
}

impl PersistentObjectQueryTab {
    pub(crate) fn new(query: Arc<Query>) -> Arc<Self> {
        Arc::new(Self { query })
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }
}

#[derive(Clone)]
pub enum PersistentObjectTab {
    Attributes(Arc<PersistentObjectAttributeTab>),
    Query(Arc<PersistentObjectQueryTab>),
}

impl PersistentObjectTab {
    pub fn as_attribute_tab(&self) -> Option<&Arc<PersistentObjectAttributeTab>> {
        match self {
            Self::Attributes(tab) => Some(tab),
            Self::Query(_) => None,
        }
    }

    pub fn as_query_tab(&self) -> Option<&Arc<PersistentObjectQueryTab>> {
        match self {
            Self::Query(tab) => Some(tab),
            Self::Attributes(_) => None,
        }
    }
}
