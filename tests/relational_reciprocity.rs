//! Scenario E2: a collection/part pair wired through `target_id` plus
//! `link_slug`, upserting children via a nested array, and a dependent
//! cascade delete.

use std::sync::Arc;

use serde_json::json;

use metaform::sql::memory::MemorySql;
use metaform::{EngineHandle, QueryOpts};

async fn booted_handle() -> Arc<EngineHandle> {
    let handle = EngineHandle::new(Arc::new(MemorySql::new()));
    handle.init().await.unwrap();
    handle
}

#[tokio::test]
async fn collection_and_part_reciprocate_and_cascade() {
    let handle = booted_handle().await;

    let yellow = handle
        .create(
            "model",
            json!({"name": "yellow", "fields": [{"name": "gogon", "type": "string"}]})
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
    let yellow_id = yellow["id"].as_i64().unwrap() as i32;

    let zap = handle
        .create(
            "model",
            json!({
                "name": "zap",
                "fields": [
                    {"name": "ibibib", "type": "string"},
                    {"name": "yellows", "type": "collection", "dependent": true, "target_id": yellow_id},
                    {"name": "yobob", "type": "slug", "link_slug": "ibibib"},
                ],
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();
    let zap_id = zap["id"].as_i64().unwrap() as i32;

    // the reciprocal `zap` part field, with its `zap_id`/`zap_position`
    // subfields, must now exist on `yellow`.
    let yellow_fields = handle
        .sql
        .fetch("field", "model_id = %1", &[json!(yellow_id)])
        .await
        .unwrap();
    assert!(yellow_fields.iter().any(|f| f["slug"] == "zap"));
    assert!(yellow_fields.iter().any(|f| f["slug"] == "zap_id"));

    let zap_row = handle
        .create("zap", json!({"ibibib": "seed"}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(zap_row["yobob"].as_str(), Some("seed"));

    let mut first_yellow_id = None;
    for i in 0..3 {
        let row = handle
            .create(
                "yellow",
                json!({"gogon": format!("g{i}"), "zap_id": zap_id}).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        if first_yellow_id.is_none() {
            first_yellow_id = row["id"].as_i64().map(|v| v as i32);
        }
    }

    let update_spec = json!({
        "ibibib": "OOOOOO mmmmm   ZZZZZZZZZZ",
        "yellows": [
            {"id": first_yellow_id.unwrap(), "gogon": "renamed"},
            {"gogon": "brand_new"},
        ],
    })
    .as_object()
    .unwrap()
    .clone();
    handle.update("zap", zap_id, update_spec).await.unwrap();

    let opts = QueryOpts {
        include: json!({"yellows": {}}).as_object().unwrap().clone(),
        ..QueryOpts::default()
    };
    let zaps = handle.rally("zap", opts).await.unwrap();
    let zap_projected = &zaps[0];
    assert_eq!(zap_projected["yobob"].as_str(), Some("oooooo_mmmmm_zzzzzzzzzz"));
    let yellows = zap_projected["yellows"].as_array().unwrap();
    assert_eq!(yellows.len(), 4);

    handle.destroy("zap", zap_id).await.unwrap();
    let remaining = handle.rally("yellow", Default::default()).await.unwrap();
    assert!(remaining.is_empty());
}
