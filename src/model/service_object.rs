//! Shared glue for model entities: the weak back-reference to the owning
//! [`Service`], the property-change bus, notification state and the serialized
//! per-object work queue.

use crate::core::{PropertyObservers, SubscriptionId};
use crate::dto::NotificationType;
use crate::service::Service;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct ServiceObject {
    service: Weak<Service>,
    observers: PropertyObservers,
}

impl ServiceObject {
    pub fn new(service: &Arc<Service>) -> Self {
        Self {
            service: Arc::downgrade(service),
            observers: PropertyObservers::new(),
        }
    }

    /// The owning service. Entities never outlive their service in normal
    /// operation; a dangling reference means the session was torn down.
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&crate::core::PropertyChangedArgs) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        self.observers.unsubscribe(subscription);
    }

    pub fn notify(&self, property_name: &'static str) {
        self.observers.notify(property_name);
    }
}

/// Notification state carried by persistent objects and queries.
///
/// Notifications are object state, not an exception channel: only an `Error`
/// notification after a save aborts the caller's success path.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub message: Option<String>,
    pub kind: NotificationType,
    pub duration: i64,
}

impl Notification {
    pub fn is_empty(&self) -> bool {
        self.message.as_deref().map(|m| m.trim().is_empty()).unwrap_or(true)
    }

    pub fn is_error(&self) -> bool {
        !self.is_empty() && self.kind == NotificationType::Error
    }
}

/// Serialized work queue: operations are admitted one at a time, in
/// submission order, non-preemptively (the tokio mutex is FIFO-fair).
pub(crate) struct WorkQueue {
    lock: tokio::sync::Mutex<()>,
    busy: AtomicBool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock.lock().await;
        self.busy.store(true, Ordering::Release);
        let result = work.await;
        self.busy.store(false, Ordering::Release);
        result
    }
}

/// Projects selected properties into a plain record for the wire.
///
/// Null, `false`, zero (except `pageSize`) and empty-array values are omitted
/// unless `include_null_values` is set, matching the server's envelope
/// expectations.
pub(crate) fn copy_properties(
    values: Vec<(&str, serde_json::Value)>,
    include_null_values: bool,
) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    for (name, value) in values {
        let include = include_null_values
            || match &value {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Number(n) => {
                    name == "pageSize" || n.as_f64().map(|f| f != 0.0).unwrap_or(true)
                }
                serde_json::Value::Array(items) => !items.is_empty(),
                _ => true,
            };

        if include {
            result.insert(name.to_string(), value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copy_properties_filters_empty_values() {
        let result = copy_properties(
            vec![
                ("id", json!("po-1")),
                ("isNew", json!(false)),
                ("top", json!(0)),
                ("pageSize", json!(0)),
                ("bulkObjectIds", json!([])),
                ("label", json!("Customers")),
            ],
            false,
        );

        assert_eq!(result.get("id"), Some(&json!("po-1")));
        assert_eq!(result.get("label"), Some(&json!("Customers")));
        assert_eq!(result.get("pageSize"), Some(&json!(0)));
        assert!(!result.contains_key("isNew"));
        assert!(!result.contains_key("top"));
        assert!(!result.contains_key("bulkObjectIds"));
    }
}
