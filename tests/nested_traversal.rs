//! Scenario E5: `nested` models walk their own self-referential
//! `parent_id` column via `progenitors`/`descendents`.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::{EngineHandle, ReadOpts};

#[tokio::test]
async fn descendents_and_progenitors_walk_the_parent_chain() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    handle
        .create(
            "model",
            json!({
                "name": "category",
                "nested": true,
                "fields": [
                    {"name": "label", "type": "string"},
                    {"name": "parent_id", "type": "integer"},
                ],
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();

    let root = handle
        .create("category", json!({"label": "root"}).as_object().unwrap().clone())
        .await
        .unwrap();
    let root_id = root["id"].as_i64().unwrap() as i32;

    let child = handle
        .create(
            "category",
            json!({"label": "child", "parent_id": root_id}).as_object().unwrap().clone(),
        )
        .await
        .unwrap();
    let child_id = child["id"].as_i64().unwrap() as i32;

    let grandchild = handle
        .create(
            "category",
            json!({"label": "grandchild", "parent_id": child_id}).as_object().unwrap().clone(),
        )
        .await
        .unwrap();
    let grandchild_id = grandchild["id"].as_i64().unwrap() as i32;

    let descendents = handle
        .descendents("category", root_id, ReadOpts::default())
        .await
        .unwrap();
    let labels: Vec<_> = descendents.iter().map(|r| r["label"].as_str().unwrap().to_string()).collect();
    assert!(labels.contains(&"root".to_string()));
    assert!(labels.contains(&"child".to_string()));
    assert!(labels.contains(&"grandchild".to_string()));

    let progenitors = handle
        .progenitors("category", grandchild_id, ReadOpts::default())
        .await
        .unwrap();
    let labels: Vec<_> = progenitors.iter().map(|r| r["label"].as_str().unwrap().to_string()).collect();
    assert!(labels.contains(&"grandchild".to_string()));
    assert!(labels.contains(&"child".to_string()));
    assert!(labels.contains(&"root".to_string()));

}

#[tokio::test]
async fn non_nested_models_return_only_the_one_row() {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();

    handle
        .create(
            "model",
            json!({"name": "plain", "fields": [{"name": "label", "type": "string"}]})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
    let row = handle
        .create("plain", json!({"label": "only-one"}).as_object().unwrap().clone())
        .await
        .unwrap();
    let id = row["id"].as_i64().unwrap() as i32;

    let descendents = handle.descendents("plain", id, ReadOpts::default()).await.unwrap();
    assert_eq!(descendents.len(), 1);
    assert_eq!(descendents[0]["label"].as_str(), Some("only-one"));
}
