//! Property-change notification for model entities.
//!
//! UI layers subscribe to model mutations through this table; the model itself
//! never depends on its subscribers.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Describes a single property mutation on a model entity.
#[derive(Debug, Clone)]
pub struct PropertyChangedArgs {
    pub property_name: &'static str,
}

type Callback = Box<dyn Fn(&PropertyChangedArgs) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Callback table for property-change subscribers.
#[derive(Default)]
pub struct PropertyObservers {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Callback)>>,
}

impl PropertyObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PropertyChangedArgs) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push((id, Box::new(callback)));
        }
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|(id, _)| *id != subscription.0);
        }
    }

    pub fn notify(&self, property_name: &'static str) {
        let args = PropertyChangedArgs { property_name };
        if let Ok(subscribers) = self.subscribers.read() {
            for (_, callback) in subscribers.iter() {
                callback(&args);
            }
        }
    }
}

impl std::fmt::Debug for PropertyObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("PropertyObservers").field("subscribers", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_reaches_subscribers_until_unsubscribed() {
        let observers = PropertyObservers::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let subscription = observers.subscribe(move |args| {
            assert_eq!(args.property_name, "label");
            seen_clone.fetch_add(1, Ordering::Relaxed);
        });

        observers.notify("label");
        observers.unsubscribe(subscription);
        observers.notify("label");

        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
