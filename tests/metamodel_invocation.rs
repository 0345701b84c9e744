//! Scenario E3: the registry reload (`invoke_models`) reconstructs field
//! descriptors straight from the rows of the `field` table, with no
//! in-memory shortcut.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::EngineHandle;

#[tokio::test]
async fn invoke_models_reconstructs_field_rows_from_the_database() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    let gadget = handle
        .create(
            "model",
            json!({"name": "gadget", "fields": [{"name": "Name", "type": "string"}]})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
    let gadget_id = gadget["id"].as_i64().unwrap() as i32;

    let field_rows = handle
        .sql
        .fetch("field", "model_id = %1", &[json!(gadget_id)])
        .await
        .unwrap();
    let name_row = field_rows.iter().find(|f| f["slug"] == "name").expect("declared field persisted");
    assert_eq!(name_row["name"].as_str(), Some("Name"));
    assert_eq!(name_row["type"].as_str(), Some("string"));

    // Force a full reload purely from the database rows, not the registry
    // state `create` left behind.
    handle.invoke_models().await.unwrap();

    let row = handle
        .create("gadget", json!({"name": "widget-one"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(row["name"].as_str(), Some("widget-one"));

    let rows = handle.rally("gadget", Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"].as_str(), Some("widget-one"));
}
