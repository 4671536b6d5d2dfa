pub mod attribute;
pub mod detail;
pub mod persistent_object;
pub mod query;
pub mod reference;
pub(crate) mod service_object;
pub mod tabs;

pub use attribute::{AttributeKind, AttributeOption, PersistentObjectAttribute};
pub use detail::DetailState;
pub use persistent_object::{PersistentObject, PersistentObjectOwner, QueryLayoutMode};
pub use query::{Query, QuerySearchOptions, SelectAllState};
pub use reference::ReferenceState;
pub use service_object::Notification;
pub use tabs::{
    PersistentObjectAttributeGroup, PersistentObjectAttributeTab, PersistentObjectQueryTab,
    PersistentObjectTab,
};
