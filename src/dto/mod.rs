//! Wire DTOs for the JSON-over-HTTP protocol and the offline store records.
//!
//! Every struct mirrors the server's camelCase JSON shape. Fields default
//! liberally: servers omit anything empty and the client must tolerate that.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotificationType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "OK")]
    Ok,
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistentObjectDto {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub full_type_name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_breadcrumb: Option<String>,
    pub is_breadcrumb_sensitive: bool,
    pub is_system: bool,
    pub is_new: bool,
    pub is_hidden: bool,
    pub is_read_only: bool,
    pub is_deleted: bool,
    pub ignore_check_rules: bool,
    pub force_from_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bulk_object_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries_to_refresh: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    pub notification_type: NotificationType,
    pub notification_duration: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<PersistentObjectAttributeDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<QueryDto>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tabs: HashMap<String, TabDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<PersistentObjectDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_layout_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_save_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistentObjectAttributeDto {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    pub visibility: Option<String>,
    pub is_system: bool,
    pub is_read_only: bool,
    pub is_required: bool,
    pub is_value_changed: bool,
    pub is_sensitive: bool,
    pub differs_in_bulk_edit_mode: bool,
    pub offset: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub type_hints: HashMap<String, String>,
    pub triggers_refresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_span: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_tip: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<Json>,

    // Reference attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Box<QueryDto>>,
    pub can_add_new_reference: bool,
    pub select_in_place: bool,

    // Detail attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<PersistentObjectDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<QueryDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_attribute: Option<String>,
}

impl PersistentObjectAttributeDto {
    pub fn is_reference(&self) -> bool {
        self.display_attribute.is_some() || self.object_id.is_some()
    }

    pub fn is_detail(&self) -> bool {
        self.objects.is_some() || self.details.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Json>,
    pub column_count: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryDto {
    pub id: String,
    pub name: String,
    pub label: String,
    pub offset: i32,
    pub auto_query: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_object: Option<Box<PersistentObjectDto>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<QueryColumnDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    pub enable_select_all: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    pub notification_type: NotificationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResultDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryColumnDto {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub can_filter: bool,
    pub can_group_by: bool,
    pub can_list_distincts: bool,
    pub can_sort: bool,
    pub is_hidden: bool,
    pub offset: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResultDto {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<QueryColumnDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<QueryResultItemDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charts: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    pub notification_type: NotificationType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResultItemDto {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<QueryResultItemValueDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hints: Option<HashMap<String, String>>,
}

impl QueryResultItemDto {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.key == key)
            .and_then(|v| v.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResultItemValueDto {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_object_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryActionDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_option: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_object: Option<PersistentObjectDto>,
}

/// A server-pushed command awaiting client-side dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOperationDto {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Json>,
}

/// Generic response envelope shared by all POST endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseEnvelope {
    pub exception: Option<String>,
    #[serde(rename = "ExceptionMessage")]
    pub exception_message: Option<String>,
    pub auth_token: Option<String>,
    pub session: Option<Json>,
    pub result: Option<Json>,
    pub retry: Option<RetryActionDto>,
    pub operations: Option<Vec<ClientOperationDto>>,
    pub profiler: Option<Json>,

    // GetApplication extras.
    pub application: Option<PersistentObjectDto>,
    pub user_name: Option<String>,
    pub user_language: Option<String>,
    pub user_culture_info: Option<String>,
    pub initial: Option<PersistentObjectDto>,

    // GetQuery extras.
    pub query: Option<QueryDto>,

    /// Endpoint-specific fields outside the generic envelope
    /// (`forgotpassword`, `authenticate/GetCredentialType`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Json>,
}

impl ResponseEnvelope {
    /// The effective server exception, regardless of which field carried it.
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref().or(self.exception_message.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDataDto {
    pub default_user: Option<String>,
    pub exception: Option<String>,
    pub languages: HashMap<String, LanguageDataDto>,
    pub providers: HashMap<String, ProviderDto>,
    pub windows_authentication: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LanguageDataDto {
    pub name: String,
    pub is_default: bool,
    pub messages: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderDto {
    pub parameters: ProviderParametersDto,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderParametersDto {
    pub label: Option<String>,
    pub description: Option<String>,
    pub request_uri: Option<String>,
    pub sign_out_uri: Option<String>,
    pub redirect_uri: Option<String>,
    pub register_user: Option<String>,
    pub register_persistent_object_id: Option<String>,
    pub forgot_password: bool,
    pub get_credential_type: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForgotPasswordDto {
    pub notification: Option<String>,
    pub notification_type: NotificationType,
    pub notification_duration: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstantSearchResultDto {
    pub id: String,
    pub label: String,
    pub object_id: String,
    pub breadcrumb: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_prefers_exception_over_exception_message() {
        let envelope: ResponseEnvelope = serde_json::from_str(
            r#"{ "exception": "boom", "ExceptionMessage": "other" }"#,
        )
        .unwrap();
        assert_eq!(envelope.exception(), Some("boom"));

        let envelope: ResponseEnvelope =
            serde_json::from_str(r#"{ "ExceptionMessage": "other" }"#).unwrap();
        assert_eq!(envelope.exception(), Some("other"));
    }

    #[test]
    fn attribute_kind_detection() {
        let attr: PersistentObjectAttributeDto = serde_json::from_str(
            r#"{ "id": "a1", "name": "Supplier", "type": "Reference", "objectId": "42" }"#,
        )
        .unwrap();
        assert!(attr.is_reference());
        assert!(!attr.is_detail());
    }

    #[test]
    fn notification_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationType::Ok).unwrap(),
            r#""OK""#
        );
        let parsed: NotificationType = serde_json::from_str(r#""""#).unwrap();
        assert_eq!(parsed, NotificationType::None);
    }
}
