/// Service protocol behavior: retry, session expiry, action execution
///
/// Run with: cargo test --test service_tests
mod common;

use common::{MockTransport, attribute_dto, object_dto, service_with, service_with_hooks};
use lobsync::dto::{QueryDto, QueryResultDto, QueryResultItemDto, RetryActionDto};
use lobsync::{ExecuteActionArgs, ServiceError, ServiceHooks};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn query_dto(id: &str, items: Vec<QueryResultItemDto>) -> QueryDto {
    QueryDto {
        id: id.to_string(),
        name: id.to_string(),
        label: id.to_string(),
        result: Some(QueryResultDto {
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn item(id: &str) -> QueryResultItemDto {
    QueryResultItemDto {
        id: id.to_string(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limited_request_sleeps_for_retry_after_and_retries_once() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    transport.push_status(429, &[("Retry-After", "2")]);
    let result = object_dto(vec![attribute_dto("a1", "FirstName", "String")]);
    transport.push_json(json!({ "result": serde_json::to_value(&result).unwrap() }));

    let started = tokio::time::Instant::now();
    let po = service
        .get_persistent_object(None, "po-type", Some("42"), false)
        .await
        .unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    assert_eq!(transport.request_count(), 2);
    assert_eq!(po.object_id().as_deref(), Some("42"));
}

#[tokio::test]
async fn server_exception_propagates_and_lands_as_notification() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    transport.push_json(json!({ "exception": "Access denied" }));
    let error = service
        .execute_action("PersistentObject.CustomBusinessAction", Some(po.clone()), None, Vec::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(error, ServiceError::Server(_)));
    assert_eq!(
        po.notification().message.as_deref(),
        Some("Access denied")
    );
}

#[tokio::test]
async fn session_expired_without_default_user_surfaces() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    transport.push_json(json!({ "exception": "Session expired" }));
    let error = service
        .get_persistent_object(None, "po-type", Some("42"), false)
        .await
        .unwrap_err();

    assert!(matches!(error, ServiceError::SessionExpired));
    assert_eq!(transport.request_count(), 1);
    assert_eq!(service.auth_token(), None);
}

#[tokio::test]
async fn freezing_actions_freeze_the_parent_but_refresh_does_not() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    let frozen_during_request = Arc::new(AtomicBool::new(false));
    {
        let po = po.clone();
        let frozen = frozen_during_request.clone();
        transport.set_observer(move |_| {
            frozen.store(po.is_frozen(), Ordering::SeqCst);
        });
    }

    service
        .execute_action("PersistentObject.CustomBusinessAction", Some(po.clone()), None, Vec::new(), None)
        .await
        .unwrap();
    assert!(frozen_during_request.load(Ordering::SeqCst));
    assert!(!po.is_frozen(), "unfrozen after the request settles");

    service
        .execute_action("PersistentObject.Refresh", Some(po.clone()), None, Vec::new(), None)
        .await
        .unwrap();
    assert!(
        !frozen_during_request.load(Ordering::SeqCst),
        "refresh stays interactive"
    );
    assert!(!po.is_frozen());
}

#[tokio::test]
async fn failed_action_still_unfreezes_the_parent() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    transport.push_json(json!({ "exception": "boom" }));
    let _ = service
        .execute_action("PersistentObject.CustomBusinessAction", Some(po.clone()), None, Vec::new(), None)
        .await;

    assert!(!po.is_frozen());
}

#[tokio::test]
async fn retry_descriptor_loops_until_a_final_result() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    let retry = RetryActionDto {
        title: Some("Confirm".to_string()),
        options: vec!["Yes".to_string(), "No".to_string()],
        ..Default::default()
    };
    transport.push_json(json!({ "retry": serde_json::to_value(&retry).unwrap() }));
    transport.push_json(json!({ "result": null }));

    let result = service
        .execute_action("PersistentObject.CustomBusinessAction", Some(po), None, Vec::new(), None)
        .await
        .unwrap();
    assert!(result.is_none());

    assert_eq!(transport.request_count(), 2);
    // The default retry hook answers with the first option.
    assert_eq!(
        transport.request_body(1)["parameters"]["RetryActionOption"],
        "Yes"
    );
}

#[tokio::test]
async fn pre_action_hook_can_short_circuit() {
    struct ShortCircuitHooks {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ServiceHooks for ShortCircuitHooks {
        async fn on_action(&self, args: &mut ExecuteActionArgs) -> lobsync::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            args.is_handled = true;
            Ok(())
        }
    }

    let transport = MockTransport::new();
    let hooks = Arc::new(ShortCircuitHooks { calls: AtomicUsize::new(0) });
    let service = service_with_hooks(transport.clone(), hooks.clone());

    let po = service.construct_persistent_object(object_dto(vec![attribute_dto(
        "a1",
        "FirstName",
        "String",
    )]));

    let result = service
        .execute_action("PersistentObject.CustomBusinessAction", Some(po), None, Vec::new(), None)
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(hooks.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.request_count(), 0, "handled actions never hit the wire");
}

#[tokio::test]
async fn execute_query_follows_continuations_until_page_size() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let mut dto = query_dto("q1", Vec::new());
    dto.top = Some(3);
    let query = service.construct_query(dto, None, false);

    transport.push_json(json!({
        "result": {
            "items": [serde_json::to_value(item("1")).unwrap()],
            "continuation": "c1",
            "pageSize": 3
        }
    }));
    transport.push_json(json!({
        "result": {
            "items": [
                serde_json::to_value(item("2")).unwrap(),
                serde_json::to_value(item("3")).unwrap()
            ]
        }
    }));

    let result = service
        .execute_query(None, &query, false, true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.items.len(), 3);
    assert_eq!(transport.request_count(), 2);
    // The follow-up request carries the continuation and the remaining count.
    let body = transport.request_body(1);
    assert_eq!(body["query"]["continuation"], "c1");
    assert_eq!(body["query"]["top"], 2);
    // Total item count is finalized once no continuation remains.
    assert_eq!(result.total_items, Some(3));
}

#[tokio::test]
async fn query_execution_errors_become_query_notifications() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let query = service.construct_query(query_dto("q1", Vec::new()), None, false);

    transport.push_json(json!({ "exception": "Query failed" }));
    let result = service.execute_query(None, &query, false, false).await.unwrap();

    assert!(result.is_none());
    assert_eq!(query.notification().message.as_deref(), Some("Query failed"));
}

#[tokio::test]
async fn server_pushed_operations_dispatch_fifo_through_the_hook() {
    struct RecordingHooks {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ServiceHooks for RecordingHooks {
        fn on_client_operation(&self, operation: lobsync::dto::ClientOperationDto) {
            self.seen.lock().expect("poisoned").push(operation.type_name);
        }
    }

    let transport = MockTransport::new();
    let hooks = Arc::new(RecordingHooks { seen: std::sync::Mutex::new(Vec::new()) });
    let service = service_with_hooks(transport.clone(), hooks.clone());

    transport.push_json(json!({
        "result": serde_json::to_value(&object_dto(Vec::new())).unwrap(),
        "operations": [
            { "type": "Refresh" },
            { "type": "Open" }
        ]
    }));

    service
        .get_persistent_object(None, "po-type", Some("42"), false)
        .await
        .unwrap();

    // Dispatch happens on a task boundary, not synchronously.
    assert!(hooks.seen.lock().expect("poisoned").is_empty());
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        *hooks.seen.lock().expect("poisoned"),
        vec!["Refresh".to_string(), "Open".to_string()]
    );
}

#[tokio::test]
async fn auth_token_rotates_from_successful_responses() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    transport.push_json(json!({
        "result": serde_json::to_value(&object_dto(Vec::new())).unwrap(),
        "authToken": "fresh-token"
    }));

    service
        .get_persistent_object(None, "po-type", Some("42"), false)
        .await
        .unwrap();

    assert_eq!(service.auth_token().as_deref(), Some("fresh-token"));
}

#[tokio::test]
async fn html_body_with_embedded_json_is_accepted() {
    let transport = MockTransport::new();
    let service = service_with(transport.clone());

    let result = serde_json::to_value(&object_dto(Vec::new())).unwrap();
    let html = format!("<html>{}<div></div></html>", json!({ "result": result }));
    transport.push_response(lobsync::HttpResponse {
        status: 200,
        headers: [("content-type".to_string(), "text/html".to_string())]
            .into_iter()
            .collect(),
        body: html.into_bytes(),
    });

    let po = service
        .get_persistent_object(None, "po-type", Some("42"), false)
        .await
        .unwrap();
    assert_eq!(po.type_name(), "Customer");
}
