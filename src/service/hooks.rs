//! The pluggable factory/decision surface of the service.
//!
//! Hosts override these to intercept actions, answer retry prompts, construct
//! specialized model objects or sink server-pushed operations. Every method
//! has a sensible default, so `DefaultServiceHooks` is a complete no-op host.

use crate::core::{Result, Value};
use crate::dto::{
    ClientDataDto, ClientOperationDto, NotificationType, PersistentObjectDto, QueryDto,
    RetryActionDto,
};
use crate::model::{
    PersistentObject, PersistentObjectAttribute, PersistentObjectAttributeTab,
    PersistentObjectQueryTab, PersistentObjectTab, Query,
};
use crate::service::Service;
use crate::service::streaming::{StreamingAbortHandle, StreamingActionMessages};
use async_trait::async_trait;
use std::sync::Arc;

/// Mutable context handed to the pre-action hook. The hook may rewrite the
/// parameters, or short-circuit the call by flagging `is_handled` and
/// supplying its own result.
pub struct ExecuteActionArgs {
    pub action: String,
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    pub is_handled: bool,
    pub result: Option<Arc<PersistentObject>>,
}

#[async_trait]
pub trait ServiceHooks: Send + Sync {
    /// Turns a wire DTO into a persistent object. The single entry point for
    /// materializing the object graph.
    fn on_construct_persistent_object(
        &self,
        service: &Arc<Service>,
        dto: PersistentObjectDto,
    ) -> Arc<PersistentObject> {
        PersistentObject::new(service, dto)
    }

    fn on_construct_query(
        &self,
        service: &Arc<Service>,
        dto: QueryDto,
        parent: Option<Arc<PersistentObject>>,
        as_lookup: bool,
    ) -> Arc<Query> {
        Query::new(service, dto, parent, as_lookup)
    }

    /// Inspects/rewrites the bootstrap client data.
    fn on_initialize(&self, client_data: ClientDataDto) -> ClientDataDto {
        client_data
    }

    /// Last chance to amend an outgoing request envelope.
    fn create_data(&self, _data: &mut serde_json::Map<String, serde_json::Value>) {}

    /// Asked when the server reports an expired session and no default
    /// credentials apply. Returning `true` retries the request.
    async fn on_session_expired(&self) -> Result<bool> {
        Ok(false)
    }

    /// Pre-action interception; see [`ExecuteActionArgs`].
    async fn on_action(&self, _args: &mut ExecuteActionArgs) -> Result<()> {
        Ok(())
    }

    /// Chooses one of the options of a server-driven retry prompt.
    async fn on_retry_action(&self, retry: &RetryActionDto) -> Result<String> {
        Ok(retry.options.first().cloned().unwrap_or_default())
    }

    /// Sink for server-pushed client operations, dispatched FIFO.
    fn on_client_operation(&self, _operation: ClientOperationDto) {}

    /// Receives the pull sequence of a streaming action together with its
    /// abort handle. The default drains and drops the messages.
    fn on_streaming_action(
        &self,
        _action: &str,
        mut messages: StreamingActionMessages,
        _abort: StreamingAbortHandle,
    ) {
        tokio::spawn(async move { while messages.next().await.is_some() {} });
    }

    fn track_event(&self, _action: &str, _option: Option<&str>) {}

    /// Overrides the formatted display value of an attribute. Returning
    /// `None` keeps the built-in formatting.
    fn on_get_attribute_display_value(
        &self,
        _attribute: &PersistentObjectAttribute,
        _value: &Value,
    ) -> Option<String> {
        None
    }

    /// Called after a persistent object reconciled against a server result.
    fn on_refresh_from_result(&self, _po: &Arc<PersistentObject>) {}

    /// Merges attribute tabs and query tabs into the final tab order.
    fn on_sort_persistent_object_tabs(
        &self,
        _po: &Arc<PersistentObject>,
        attribute_tabs: Vec<Arc<PersistentObjectAttributeTab>>,
        query_tabs: Vec<Arc<PersistentObjectQueryTab>>,
    ) -> Vec<PersistentObjectTab> {
        attribute_tabs
            .into_iter()
            .map(PersistentObjectTab::Attributes)
            .chain(query_tabs.into_iter().map(PersistentObjectTab::Query))
            .collect()
    }

    /// Shows a transient notification that was consumed from a result.
    fn on_show_notification(&self, _message: &str, _kind: NotificationType, _duration: i64) {}
}

/// No-op host.
#[derive(Default)]
pub struct DefaultServiceHooks;

impl DefaultServiceHooks {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceHooks for DefaultServiceHooks {}
