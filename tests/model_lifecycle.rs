//! Scenario E1: declaring a model with its fields in one call, writing a
//! row through it, then tearing the model down again.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::EngineHandle;

async fn booted_handle() -> Arc<EngineHandle> {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();
    handle
}

#[tokio::test]
async fn create_model_with_nested_fields_builds_table_and_columns() {
    let handle = booted_handle().await;

    let spec = json!({
        "name": "yellow",
        "fields": [
            {"name": "gogon", "type": "string"},
            {"name": "wibib", "type": "boolean"},
        ],
    })
    .as_object()
    .unwrap()
    .clone();

    let model_row = handle.create("model", spec).await.unwrap();
    let model_id = model_row["id"].as_i64().unwrap() as i32;

    // slug auto-derived from name, with no explicit slug given
    assert_eq!(model_row["slug"].as_str(), Some("yellow"));
    assert!(handle.sql.table_exists("yellow").await.unwrap());

    // base fields (7) + the two declared fields
    let field_rows = handle
        .sql
        .fetch("field", "model_id = %1", &[json!(model_id)])
        .await
        .unwrap();
    assert_eq!(field_rows.len(), 9);
    assert!(field_rows.iter().any(|f| f["slug"] == "gogon"));
    assert!(field_rows.iter().any(|f| f["slug"] == "wibib"));

    let row = handle
        .create("yellow", json!({"gogon": "obobo", "wibib": true}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(row["gogon"].as_str(), Some("obobo"));
    assert_eq!(row["wibib"].as_bool(), Some(true));

    let rows = handle.rally("yellow", Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);

    handle.destroy("model", model_id).await.unwrap();
    assert!(!handle.sql.table_exists("yellow").await.unwrap());
    assert!(handle.rally("yellow", Default::default()).await.is_err());
}

#[tokio::test]
async fn update_and_destroy_a_single_row() {
    let handle = booted_handle().await;
    let spec = json!({"name": "widget", "fields": [{"name": "label", "type": "string"}]})
        .as_object()
        .unwrap()
        .clone();
    handle.create("model", spec).await.unwrap();

    let row = handle
        .create("widget", json!({"label": "first"}).as_object().unwrap().clone())
        .await
        .unwrap();
    let id = row["id"].as_i64().unwrap() as i32;

    let updated = handle
        .update("widget", id, json!({"label": "second"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(updated["label"].as_str(), Some("second"));

    handle.destroy("widget", id).await.unwrap();
    let rows = handle.rally("widget", Default::default()).await.unwrap();
    assert!(rows.is_empty());
}
