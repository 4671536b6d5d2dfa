/// Attribute value/display behavior
///
/// Run with: cargo test --test attribute_tests
mod common;

use common::{MockTransport, attribute_dto, object_dto, service_with};
use lobsync::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn boolean_display_value_uses_type_hint_keys() {
    let service = service_with(MockTransport::new());

    let mut attr = attribute_dto("a1", "IsActive", "Boolean");
    attr.value = Some("true".to_string());
    attr.type_hints = [
        ("TrueKey".to_string(), "Yes".to_string()),
        ("FalseKey".to_string(), "No".to_string()),
    ]
    .into_iter()
    .collect();

    let po = service.construct_persistent_object(object_dto(vec![attr]));
    let attr = po.get_attribute("IsActive").unwrap();

    // No translation table is loaded, so the key itself is the fallback.
    assert_eq!(attr.display_value(), "Yes");
    assert_eq!(attr.value(), Value::Boolean(true));
}

#[tokio::test]
async fn set_value_without_refresh_trigger_makes_no_network_call() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));
    po.begin_edit();

    let attr = po.get_attribute("FirstName").unwrap();
    assert!(!attr.triggers_refresh());

    let value = attr
        .set_value(Value::String("Ada".to_string()), true)
        .await
        .unwrap();

    assert_eq!(value, Value::String("Ada".to_string()));
    assert_eq!(attr.value(), Value::String("Ada".to_string()));
    assert_eq!(transport.request_count(), 0);
    assert!(po.is_dirty());
}

#[tokio::test]
async fn set_value_is_a_noop_outside_edit_mode() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "FirstName", "String");
    dto.value = Some("Ada".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    let attr = po.get_attribute("FirstName").unwrap();
    let value = attr
        .set_value(Value::String("Grace".to_string()), true)
        .await
        .unwrap();

    assert_eq!(value, Value::String("Ada".to_string()));
    assert!(!po.is_dirty());
    assert!(!attr.is_value_changed());
}

#[tokio::test]
async fn setting_an_equal_value_twice_flips_is_value_changed_once() {
    let service = service_with(MockTransport::new());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));
    po.begin_edit();

    let attr = po.get_attribute("FirstName").unwrap();
    let transitions = Arc::new(AtomicUsize::new(0));
    let transitions_clone = transitions.clone();
    attr.subscribe(move |args| {
        if args.property_name == "isValueChanged" {
            transitions_clone.fetch_add(1, Ordering::Relaxed);
        }
    });

    attr.set_value(Value::String("Ada".to_string()), true).await.unwrap();
    attr.set_value(Value::String("Ada".to_string()), true).await.unwrap();

    assert_eq!(transitions.load(Ordering::Relaxed), 1);
    assert!(attr.is_value_changed());
}

#[tokio::test]
async fn key_value_list_display_resolves_through_options() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "Status", "KeyValueList");
    dto.value = Some("open".to_string());
    dto.options = vec!["open=Open".to_string(), "closed=Closed".to_string()];
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    let attr = po.get_attribute("Status").unwrap();
    assert_eq!(attr.display_value(), "Open");
}

#[tokio::test]
async fn empty_value_displays_as_placeholder() {
    let service = service_with(MockTransport::new());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    let attr = po.get_attribute("FirstName").unwrap();
    assert_eq!(attr.display_value(), "\u{2014}");
}

#[tokio::test]
async fn time_display_trims_zeroes_and_leading_day() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "OpensAt", "Time");
    dto.value = Some("0:09:30:00.0000000".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    assert_eq!(po.get_attribute("OpensAt").unwrap().display_value(), "09:30");
}

#[tokio::test]
async fn character_casing_hint_normalizes_input() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "Code", "String");
    dto.type_hints = [("charactercasing".to_string(), "Upper".to_string())]
        .into_iter()
        .collect();
    let po = service.construct_persistent_object(object_dto(vec![dto]));
    po.begin_edit();

    let attr = po.get_attribute("Code").unwrap();
    attr.set_value(Value::String("abc".to_string()), true).await.unwrap();

    assert_eq!(attr.value(), Value::String("ABC".to_string()));
}

#[tokio::test]
async fn read_only_attribute_rejects_set_value() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "Total", "String");
    dto.is_read_only = true;
    dto.value = Some("100".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));
    po.begin_edit();

    let attr = po.get_attribute("Total").unwrap();
    let value = attr
        .set_value(Value::String("200".to_string()), true)
        .await
        .unwrap();

    assert_eq!(value, Value::String("100".to_string()));
    assert!(!attr.is_value_changed());
}

#[tokio::test]
async fn visibility_flip_updates_tab_visibility() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "Secret", "String");
    dto.visibility = Some("Always".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    let attr = po.get_attribute("Secret").unwrap();
    assert!(attr.is_visible());

    attr.set_visibility("Never");
    assert!(!attr.is_visible());

    // The attribute was the tab's only member: group and tab cascade away.
    let remaining = po
        .tabs()
        .iter()
        .filter(|t| t.as_attribute_tab().is_some())
        .count();
    assert_eq!(remaining, 0);
}
