// ============================================================================
// lobsync — client runtime for metadata-driven business applications
// ============================================================================

pub mod core;
pub mod dto;
pub mod model;
pub mod offline;
pub mod service;

// Re-export main types for convenience
pub use crate::core::{PropertyChangedArgs, Result, ServiceError, SubscriptionId, Value};
pub use model::{
    AttributeKind, AttributeOption, Notification, PersistentObject, PersistentObjectAttribute,
    PersistentObjectAttributeGroup, PersistentObjectAttributeTab, PersistentObjectQueryTab,
    PersistentObjectTab, Query, QuerySearchOptions,
};
pub use offline::{
    DefaultOfflineActions, FileObjectStore, MemoryObjectStore, ObjectStore, OfflineActions,
    OfflineActionsRegistry, OfflineError, OfflineResult, StoreRecord, StoreTable,
};
pub use service::{
    ActionDefinition, CredentialStore, CultureInfo, DefaultServiceHooks, ExecuteActionArgs,
    FilePayload, HttpBody, HttpRequest, HttpResponse, HttpTransport, Language,
    MemoryCredentialStore, Service, ServiceConfig, ServiceHooks, StreamedFile,
};
