//! Scenario E4: renaming a model (via its `name`, cascading through the
//! auto-derived `slug`) renames its physical table; renaming one of its
//! fields the same way renames the physical column, and the stale slug
//! key doesn't linger in the registry.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::EngineHandle;

#[tokio::test]
async fn renaming_name_cascades_to_table_and_column_identifiers() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    let foo = handle
        .create(
            "model",
            json!({"name": "foo", "fields": [{"name": "bar", "type": "string"}]})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
    let foo_id = foo["id"].as_i64().unwrap() as i32;

    handle
        .create("foo", json!({"bar": "hello"}).as_object().unwrap().clone())
        .await
        .unwrap();

    handle
        .update("model", foo_id, json!({"name": "baz"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert!(!handle.sql.table_exists("foo").await.unwrap());
    assert!(handle.sql.table_exists("baz").await.unwrap());

    let bar_field = handle
        .sql
        .fetch("field", "model_id = %1 AND slug = %2", &[json!(foo_id), json!("bar")])
        .await
        .unwrap();
    let bar_id = bar_field[0]["id"].as_i64().unwrap() as i32;

    handle
        .update("field", bar_id, json!({"name": "qux"}).as_object().unwrap().clone())
        .await
        .unwrap();

    // physical column renamed: a fresh row keyed by the new name round-trips
    let row = handle
        .create("baz", json!({"qux": "renamed"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(row["qux"].as_str(), Some("renamed"));
    assert!(row.get("bar").is_none());

    let rows = handle.rally("baz", Default::default()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["qux"] == "hello" || r["qux"] == "renamed"));
}
