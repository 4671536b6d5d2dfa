/// Offline engine: caching, retrieval, local saves
///
/// Run with: cargo test --test offline_tests
use lobsync::dto::{
    PersistentObjectAttributeDto, PersistentObjectDto, QueryColumnDto, QueryDto, QueryResultDto,
    QueryResultItemDto, QueryResultItemValueDto,
};
use lobsync::offline::{Cacheable, DefaultOfflineActions, OfflineActions, OfflineActionsRegistry};
use lobsync::{MemoryObjectStore, ObjectStore, OfflineResult, StoreTable};
use std::sync::Arc;

fn attribute(name: &str, value: Option<&str>) -> PersistentObjectAttributeDto {
    PersistentObjectAttributeDto {
        id: format!("attr-{}", name),
        name: name.to_string(),
        type_name: "String".to_string(),
        label: name.to_string(),
        value: value.map(str::to_string),
        ..Default::default()
    }
}

fn template(attributes: Vec<PersistentObjectAttributeDto>) -> PersistentObjectDto {
    PersistentObjectDto {
        id: "po-customer".to_string(),
        type_name: "Customer".to_string(),
        label: "Customer".to_string(),
        breadcrumb: Some("{FirstName} {LastName}".to_string()),
        actions: vec!["Edit".to_string()],
        attributes,
        ..Default::default()
    }
}

fn customer_query() -> QueryDto {
    QueryDto {
        id: "q-customers".to_string(),
        name: "Customers".to_string(),
        label: "Customers".to_string(),
        actions: vec!["New".to_string(), "Filter".to_string(), "BulkEdit".to_string()],
        columns: vec![QueryColumnDto {
            name: "FirstName".to_string(),
            label: "First name".to_string(),
            type_name: "String".to_string(),
            can_filter: true,
            can_group_by: true,
            can_list_distincts: true,
            ..Default::default()
        }],
        persistent_object: Some(Box::new(template(vec![
            attribute("FirstName", None),
            attribute("LastName", None),
        ]))),
        result: Some(QueryResultDto {
            items: vec![QueryResultItemDto {
                id: "row-1".to_string(),
                values: vec![
                    QueryResultItemValueDto {
                        key: "FirstName".to_string(),
                        value: Some("Ada".to_string()),
                        ..Default::default()
                    },
                    QueryResultItemValueDto {
                        key: "LastName".to_string(),
                        value: Some("Lovelace".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            total_items: Some(1),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn cached_engine() -> (Arc<MemoryObjectStore>, DefaultOfflineActions) {
    let store = Arc::new(MemoryObjectStore::new());
    let engine = DefaultOfflineActions::new(store.clone());
    engine
        .on_cache(Cacheable::Query(&customer_query()))
        .await
        .unwrap();
    (store, engine)
}

#[tokio::test]
async fn caching_a_query_links_its_template_object() {
    let (store, _engine) = cached_engine().await;

    let po_record = store
        .load("po-customer", StoreTable::PersistentObjects)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(po_record.query.as_deref(), Some("q-customers"));

    let class_record = store
        .load("po-customer", StoreTable::ActionClassesById)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(class_record.name.as_deref(), Some("Customer"));
}

#[tokio::test]
async fn get_persistent_object_overlays_row_values_and_breadcrumb() {
    let (_store, engine) = cached_engine().await;

    let po = engine
        .on_get_persistent_object("po-customer", Some("row-1"), false)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(po.object_id.as_deref(), Some("row-1"));
    let first_name = po.attributes.iter().find(|a| a.name == "FirstName").unwrap();
    assert_eq!(first_name.value.as_deref(), Some("Ada"));
    assert_eq!(po.breadcrumb.as_deref(), Some("Ada Lovelace"));

    // The owning query supports BulkEdit, so Edit is guaranteed present.
    assert!(po.actions.iter().any(|a| a == "Edit"));
}

#[tokio::test]
async fn get_persistent_object_misses_resolve_to_none() {
    let (_store, engine) = cached_engine().await;

    assert!(
        engine
            .on_get_persistent_object("po-customer", Some("row-404"), false)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        engine
            .on_get_persistent_object("unknown", Some("row-1"), false)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn get_query_strips_server_only_capabilities() {
    let (_store, engine) = cached_engine().await;

    let query = engine.on_get_query("q-customers").await.unwrap().unwrap();

    let column = &query.columns[0];
    assert!(!column.can_filter);
    assert!(!column.can_group_by);
    assert!(!column.can_list_distincts);
    assert!(query.filters.is_none());

    // Filtering is not overridden, so the Filter action disappears.
    assert!(!query.actions.iter().any(|a| a == "Filter"));
    assert!(query.actions.iter().any(|a| a == "New"));
}

#[tokio::test]
async fn overridden_filter_keeps_the_action_and_supplies_items() {
    struct FilteringActions {
        store: Arc<dyn ObjectStore>,
    }

    #[async_trait::async_trait]
    impl OfflineActions for FilteringActions {
        fn store(&self) -> &Arc<dyn ObjectStore> {
            &self.store
        }

        fn supports_filter(&self) -> bool {
            true
        }

        fn on_filter(&self, _query: &QueryDto) -> OfflineResult<Vec<QueryResultItemDto>> {
            Ok(vec![QueryResultItemDto {
                id: "filtered".to_string(),
                ..Default::default()
            }])
        }
    }

    let store = Arc::new(MemoryObjectStore::new());
    let engine = FilteringActions { store: store.clone() };
    engine
        .on_cache(Cacheable::Query(&customer_query()))
        .await
        .unwrap();

    let query = engine.on_get_query("q-customers").await.unwrap().unwrap();
    assert!(query.actions.iter().any(|a| a == "Filter"));

    let result = engine
        .on_execute_query(&customer_query())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].id, "filtered");
}

#[tokio::test]
async fn execute_query_returns_cached_items_verbatim() {
    let (_store, engine) = cached_engine().await;

    let result = engine
        .on_execute_query(&customer_query())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].id, "row-1");
}

#[tokio::test]
async fn new_clones_the_template_into_edit_mode() {
    let (_store, engine) = cached_engine().await;

    let po = engine.on_new(&customer_query()).await.unwrap().unwrap();

    assert!(po.is_new);
    assert_eq!(po.actions, vec!["Edit".to_string()]);
    assert_eq!(po.breadcrumb.as_deref(), Some("New Customer"));
}

#[tokio::test]
async fn save_new_without_changes_appends_nothing() {
    let (store, engine) = cached_engine().await;

    let mut obj = template(vec![attribute("FirstName", None)]);
    obj.is_new = true;

    let saved = engine.on_save(obj).await.unwrap();
    assert!(!saved.is_new);
    assert!(saved.object_id.as_deref().unwrap().starts_with("SW-NEW-"));

    // No attribute was flagged changed: the cached query kept its single row.
    let record = store
        .load("q-customers", StoreTable::Queries)
        .await
        .unwrap()
        .unwrap();
    let query: QueryDto = serde_json::from_str(record.response.as_deref().unwrap()).unwrap();
    let result = query.result.unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.total_items, Some(1));
}

#[tokio::test]
async fn save_existing_merges_changed_values_into_the_cached_row() {
    let (store, engine) = cached_engine().await;

    let mut obj = template(vec![attribute("FirstName", Some("Grace"))]);
    obj.object_id = Some("row-1".to_string());
    obj.attributes[0].is_value_changed = true;

    let saved = engine.on_save(obj).await.unwrap();
    assert!(!saved.attributes[0].is_value_changed);

    let record = store
        .load("q-customers", StoreTable::Queries)
        .await
        .unwrap()
        .unwrap();
    let query: QueryDto = serde_json::from_str(record.response.as_deref().unwrap()).unwrap();
    let items = query.result.unwrap().items;
    assert_eq!(items[0].value("FirstName"), Some("Grace"));
    assert_eq!(items[0].value("LastName"), Some("Lovelace"));
}

#[tokio::test]
async fn registry_resolves_ids_through_cached_class_names() {
    let (store, _engine) = cached_engine().await;
    let registry = OfflineActionsRegistry::new();

    let constructed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let constructed = constructed.clone();
        registry.register("Customer", move |store| {
            constructed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Arc::new(DefaultOfflineActions::new(store))
        });
    }

    // A bare type name resolves directly.
    let engine = registry
        .get("Customer", store.clone())
        .await
        .unwrap()
        .unwrap();
    assert!(!engine.supports_filter());
    assert_eq!(constructed.load(std::sync::atomic::Ordering::SeqCst), 1);

    // An unknown id resolves to nothing.
    assert!(
        registry
            .get("0000-unknown-id", store.clone())
            .await
            .unwrap()
            .is_none()
    );

    // Unregistered names fall back to the default engine.
    let fallback = registry.get("Supplier", store.clone()).await.unwrap();
    assert!(fallback.is_some());
}
