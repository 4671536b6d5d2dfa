//! The offline engine: a local mirror of the action vocabulary.
//!
//! A subset of actions (New, Save, Filter via override, query/object
//! retrieval) is answered against a local key-value store instead of the
//! network, so the client stays usable without a connection.

pub mod actions;
pub mod registry;
pub mod store;

pub use actions::{Cacheable, DefaultOfflineActions, ItemChangeType, OfflineActions};
pub use registry::{OfflineActionsFactory, OfflineActionsRegistry};
pub use store::{FileObjectStore, MemoryObjectStore, ObjectStore, StoreRecord, StoreTable};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Not implemented")]
    NotImplemented,

    #[error("No associated query found for persistent object with id {0}")]
    MissingQuery(String),

    #[error("Unable to resolve item")]
    UnresolvedItem,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

pub type OfflineResult<T> = std::result::Result<T, OfflineError>;

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedRecord(err.to_string())
    }
}

impl From<std::io::Error> for OfflineError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
