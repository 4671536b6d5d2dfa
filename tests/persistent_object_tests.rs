/// Edit-session state machine and save flow
///
/// Run with: cargo test --test persistent_object_tests
mod common;

use common::{MockTransport, attribute_dto, object_dto, service_with};
use lobsync::Value;
use serde_json::json;

#[tokio::test]
async fn cancel_edit_restores_the_backup_snapshot() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "FirstName", "String");
    dto.value = Some("Ada".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    po.begin_edit();
    po.set_attribute_value("FirstName", Value::String("Grace".to_string()), true)
        .await
        .unwrap();
    assert!(po.is_dirty());

    po.cancel_edit();

    assert!(!po.is_editing());
    assert!(!po.is_dirty());
    assert_eq!(
        po.get_attribute_value("FirstName"),
        Value::String("Ada".to_string())
    );
}

#[tokio::test]
async fn stay_in_edit_reenters_edit_mode_after_cancel() {
    let service = service_with(MockTransport::new());

    let mut dto = object_dto(vec![attribute_dto("a1", "FirstName", "String")]);
    dto.state_behavior = Some("StayInEdit".to_string());
    let po = service.construct_persistent_object(dto);

    // StayInEdit opens the object in edit mode.
    assert!(po.is_editing());

    po.cancel_edit();
    assert!(po.is_editing());
    assert!(!po.is_dirty());
}

#[tokio::test]
async fn new_objects_open_in_edit_mode() {
    let service = service_with(MockTransport::new());

    let mut dto = object_dto(vec![attribute_dto("a1", "FirstName", "String")]);
    dto.is_new = true;
    let po = service.construct_persistent_object(dto);

    assert!(po.is_editing());
}

#[tokio::test]
async fn save_without_edit_mode_is_a_trivial_success() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    assert!(po.save(false).await.unwrap());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn save_merges_result_and_leaves_edit_mode() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let mut dto = attribute_dto("a1", "FirstName", "String");
    dto.value = Some("Ada".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));

    po.begin_edit();
    po.set_attribute_value("FirstName", Value::String("Grace".to_string()), true)
        .await
        .unwrap();

    let mut saved = attribute_dto("a1", "FirstName", "String");
    saved.value = Some("Grace".to_string());
    let result = object_dto(vec![saved]);
    transport.push_json(json!({ "result": serde_json::to_value(&result).unwrap() }));

    assert!(po.save(false).await.unwrap());

    assert!(!po.is_dirty());
    assert!(!po.is_editing());
    assert_eq!(
        po.get_attribute_value("FirstName"),
        Value::String("Grace".to_string())
    );
    assert_eq!(transport.request_count(), 1);

    let body = transport.request_body(0);
    assert_eq!(body["action"], "PersistentObject.Save");
    assert_eq!(body["parent"]["attributes"][0]["value"], "Grace");
}

#[tokio::test]
async fn save_with_error_notification_raises_it() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));
    po.begin_edit();

    let mut result = object_dto(vec![attribute_dto("a1", "FirstName", "String")]);
    result.notification = Some("FirstName is required".to_string());
    result.notification_type = lobsync::dto::NotificationType::Error;
    transport.push_json(json!({ "result": serde_json::to_value(&result).unwrap() }));

    let error = po.save(false).await.unwrap_err();
    assert_eq!(error.to_string(), "FirstName is required");
    assert!(po.is_editing(), "a failed save keeps the edit session open");
}

#[tokio::test]
async fn save_flushes_deferred_refresh_before_saving() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let mut dto = attribute_dto("a1", "Country", "String");
    dto.triggers_refresh = true;
    let po = service.construct_persistent_object(object_dto(vec![dto]));
    po.begin_edit();

    // allow_refresh = false defers the refresh onto the attribute.
    po.set_attribute_value("Country", Value::String("BE".to_string()), false)
        .await
        .unwrap();
    let attr = po.get_attribute("Country").unwrap();
    assert!(attr.should_refresh());
    assert_eq!(transport.request_count(), 0);

    let refresh_result = object_dto(vec![attribute_dto("a1", "Country", "String")]);
    transport.push_json(json!({ "result": serde_json::to_value(&refresh_result).unwrap() }));
    let save_result = object_dto(vec![attribute_dto("a1", "Country", "String")]);
    transport.push_json(json!({ "result": serde_json::to_value(&save_result).unwrap() }));

    po.save(false).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        transport.request_body(0)["action"],
        "PersistentObject.Refresh"
    );
    assert_eq!(transport.request_body(1)["action"], "PersistentObject.Save");
    assert!(!attr.should_refresh());
}

#[tokio::test]
async fn frozen_object_ignores_set_value() {
    let service = service_with(MockTransport::new());

    let mut dto = attribute_dto("a1", "FirstName", "String");
    dto.value = Some("Ada".to_string());
    let po = service.construct_persistent_object(object_dto(vec![dto]));
    po.begin_edit();
    po.freeze();

    let value = po
        .set_attribute_value("FirstName", Value::String("Grace".to_string()), true)
        .await
        .unwrap();
    assert_eq!(value, Value::String("Ada".to_string()));

    po.unfreeze();
    po.set_attribute_value("FirstName", Value::String("Grace".to_string()), true)
        .await
        .unwrap();
    assert_eq!(
        po.get_attribute_value("FirstName"),
        Value::String("Grace".to_string())
    );
}

#[tokio::test]
async fn stale_attribute_refresh_is_discarded() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let mut dto = attribute_dto("a1", "Country", "String");
    dto.triggers_refresh = true;
    let po = service.construct_persistent_object(object_dto(vec![dto]));
    po.begin_edit();

    po.set_attribute_value("Country", Value::String("BE".to_string()), false)
        .await
        .unwrap();
    let attr = po.get_attribute("Country").unwrap();

    // The first refresh occupies the work queue, held open by a gated
    // transport response. The second refresh captures its revision, then
    // waits behind it in the queue.
    let gate = transport.push_gated_json(json!({}));
    let first = {
        let attr = attr.clone();
        tokio::spawn(async move { attr.trigger_refresh(false).await })
    };
    let second = {
        let attr = attr.clone();
        tokio::spawn(async move { attr.trigger_refresh(false).await })
    };
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    // The value changes while the second refresh is queued: it must be
    // abandoned as stale once it runs, without issuing a request.
    po.set_attribute_value("Country", Value::String("NL".to_string()), false)
        .await
        .unwrap();
    gate.notify_one();

    assert!(first.await.unwrap().unwrap());
    assert!(!second.await.unwrap().unwrap());
    assert_eq!(transport.request_count(), 1);
}
