//! Scenario E6: malformed scalar values are dropped rather than failing
//! the whole write (design note 3), while a genuinely missing relational
//! prerequisite (a `slug` field with no `link_slug`/`link_id`) does fail.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::{EngineError, EngineHandle};

#[tokio::test]
async fn unparseable_scalars_are_dropped_not_fatal() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    handle
        .create(
            "model",
            json!({
                "name": "counter",
                "fields": [
                    {"name": "count", "type": "integer"},
                    {"name": "active", "type": "boolean"},
                ],
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();

    let row = handle
        .create(
            "counter",
            json!({"count": "not-a-number", "active": "not-a-bool"}).as_object().unwrap().clone(),
        )
        .await
        .unwrap();

    assert!(row["count"].is_null());
    assert!(row["active"].is_null());

    // a well-formed numeric string still coerces
    let row2 = handle
        .create("counter", json!({"count": "42", "active": "true"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(row2["count"].as_i64(), Some(42));
    assert_eq!(row2["active"].as_bool(), Some(true));
}

#[tokio::test]
async fn a_slug_field_without_link_slug_or_link_id_is_rejected() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    handle
        .create(
            "model",
            json!({"name": "orphan", "fields": [{"name": "title", "type": "string"}]})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
    let model = handle.rally("model", Default::default()).await.unwrap();
    let model_id = model
        .iter()
        .find(|m| m["slug"] == "orphan")
        .and_then(|m| m["id"].as_i64())
        .unwrap() as i32;

    let result = handle
        .create(
            "field",
            json!({"name": "slippy", "type": "slug", "model_id": model_id})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await;

    match result {
        Err(EngineError::Hook { message, .. }) => {
            assert!(message.contains("link_slug"), "unexpected message: {message}");
        }
        other => panic!("expected a hook error, got {other:?}"),
    }
}
