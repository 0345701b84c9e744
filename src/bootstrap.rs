//! Bootstrapping (spec section 4.7): the `model` and `field` meta-models,
//! their lifecycle hooks, and the full registry reload.
//!
//! `model` and `field` are themselves hardcoded descriptors rather than
//! self-describing rows in their own tables -- see DESIGN.md, "bootstrapping
//! circularity" -- so their physical tables are created directly by `init`
//! and their rows are ordinary content rows like any other model's.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::field::{Field, FieldKind};
use crate::handle::EngineHandle;
use crate::hooks::{BoxFuture, Env, Timing};
use crate::model::{base_field_specs, id_column, FieldRow, ModelDescriptor, ModelRow};
use crate::registry::SlugOrId;
use crate::types::ColumnSpec;

const MODEL_SLUG: &str = "model";
const FIELD_SLUG: &str = "field";

/// Create the `model`/`field` physical tables if absent, register their
/// lifecycle hooks, seed their built-in descriptors, then reload the rest
/// of the registry from the database.
pub async fn init(handle: &EngineHandle) -> EngineResult<()> {
    if !handle.sql.table_exists(MODEL_SLUG).await? {
        handle.sql.create_table(MODEL_SLUG, &model_table_columns()).await?;
    }
    if !handle.sql.table_exists(FIELD_SLUG).await? {
        handle.sql.create_table(FIELD_SLUG, &field_table_columns()).await?;
    }

    register_model_hooks(handle).await;
    register_field_hooks(handle).await;

    handle.registry_alter(builtin_model_descriptor()).await;
    handle.registry_alter(builtin_field_descriptor()).await;

    invoke_models(handle).await
}

/// Reload every user-defined model (and its fields) from the database,
/// swapping the registry atomically. The built-in `model`/`field`
/// descriptors are re-installed afterward since `swap` replaces the whole
/// map.
pub async fn invoke_models(handle: &EngineHandle) -> EngineResult<()> {
    let model_rows = handle.sql.fetch(MODEL_SLUG, "1 = 1", &[]).await?;
    let field_rows = handle.sql.fetch(FIELD_SLUG, "1 = 1", &[]).await?;

    let mut descriptors = Vec::with_capacity(model_rows.len());
    for row in model_rows {
        let model_row: ModelRow = serde_json::from_value(Value::Object(row)).map_err(|e| EngineError::ReciprocalSetup {
            message: format!("malformed model row: {e}"),
        })?;
        let fields = field_rows
            .iter()
            .cloned()
            .map(Value::Object)
            .filter_map(|v| serde_json::from_value::<FieldRow>(v).ok())
            .filter(|f| f.model_id == model_row.id)
            .map(crate::model::build_field)
            .collect::<Vec<Field>>();
        descriptors.push(ModelDescriptor::new(model_row, fields));
    }

    handle.registry_swap(descriptors).await;
    handle.registry_alter(builtin_model_descriptor()).await;
    handle.registry_alter(builtin_field_descriptor()).await;
    Ok(())
}

fn model_table_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![id_column()];
    for (name, sql_type) in base_field_specs() {
        columns.push(ColumnSpec::new(name, sql_ddl_for(sql_type)));
    }
    columns.push(ColumnSpec::new("name", "varchar(256)"));
    columns.push(ColumnSpec::new("slug", "varchar(256)"));
    columns.push(ColumnSpec::new("description", "text"));
    columns.push(ColumnSpec::new("nested", "boolean").with_extra("DEFAULT false"));
    columns
}

fn field_table_columns() -> Vec<ColumnSpec> {
    let mut columns = vec![id_column()];
    for (name, sql_type) in base_field_specs() {
        columns.push(ColumnSpec::new(name, sql_ddl_for(sql_type)));
    }
    columns.push(ColumnSpec::new("name", "varchar(256)"));
    columns.push(ColumnSpec::new("slug", "varchar(256)"));
    columns.push(ColumnSpec::new("type", "varchar(64)"));
    columns.push(ColumnSpec::new("model_id", "integer"));
    columns.push(ColumnSpec::new("model_position", "integer"));
    columns.push(ColumnSpec::new("target_id", "integer"));
    columns.push(ColumnSpec::new("link_id", "integer"));
    columns.push(ColumnSpec::new("dependent", "boolean").with_extra("DEFAULT false"));
    columns.push(ColumnSpec::new("editable", "boolean").with_extra("DEFAULT true"));
    columns.push(ColumnSpec::new("locked", "boolean").with_extra("DEFAULT false"));
    columns.push(ColumnSpec::new("immutable", "boolean").with_extra("DEFAULT false"));
    columns
}

fn sql_ddl_for(tag: &str) -> &'static str {
    match tag {
        "integer" => "integer",
        "boolean" => "boolean",
        "timestamp" => "timestamp with time zone",
        _ => "varchar(256)",
    }
}

/// `field.model_id` is itself wired as the auto-synthesized subfield of a
/// `part` field named `model` on the built-in `field` descriptor, reciprocal
/// to a `collection` field named `fields` on the built-in `model`
/// descriptor -- the same relational wiring `create(:model, {fields: [...]})`
/// relies on for user models, just hand-built instead of synthesized at
/// runtime (since `model`/`field` never go through `setup_field`).
const MODEL_FIELDS_COLLECTION_ID: i32 = -105;
const FIELD_MODEL_PART_ID: i32 = -212;

fn builtin_model_descriptor() -> ModelDescriptor {
    let row = ModelRow {
        id: -1,
        name: "Model".to_string(),
        slug: MODEL_SLUG.to_string(),
        description: Some("Built-in meta-model describing every other model.".to_string()),
        position: 0,
        nested: false,
    };
    let mut rows = builtin_field_rows(-1, &[("name", "string"), ("slug", "slug"), ("description", "text"), ("nested", "boolean")]);
    link_slug_to_name(&mut rows);
    rows.push(FieldRow {
        id: MODEL_FIELDS_COLLECTION_ID,
        name: "fields".to_string(),
        slug: "fields".to_string(),
        kind: "collection".to_string(),
        model_id: -1,
        target_id: Some(-2),
        link_id: Some(FIELD_MODEL_PART_ID),
        dependent: true,
        editable: true,
        locked: false,
        immutable: false,
    });
    let fields = rows.into_iter().map(crate::model::build_field).collect();
    ModelDescriptor::new(row, fields)
}

fn builtin_field_descriptor() -> ModelDescriptor {
    let row = ModelRow {
        id: -2,
        name: "Field".to_string(),
        slug: FIELD_SLUG.to_string(),
        description: Some("Built-in meta-model describing every model's fields.".to_string()),
        position: 0,
        nested: false,
    };
    let mut rows = builtin_field_rows(
        -2,
        &[
            ("name", "string"),
            ("slug", "slug"),
            ("type", "string"),
            ("model_id", "integer"),
            ("model_position", "integer"),
            ("target_id", "integer"),
            ("link_id", "integer"),
            ("dependent", "boolean"),
            ("editable", "boolean"),
            ("locked", "boolean"),
            ("immutable", "boolean"),
        ],
    );
    link_slug_to_name(&mut rows);
    rows.push(FieldRow {
        id: FIELD_MODEL_PART_ID,
        name: "model".to_string(),
        slug: "model".to_string(),
        kind: "part".to_string(),
        model_id: -2,
        target_id: Some(-1),
        link_id: Some(MODEL_FIELDS_COLLECTION_ID),
        dependent: false,
        editable: true,
        locked: false,
        immutable: false,
    });
    let fields = rows.into_iter().map(crate::model::build_field).collect();
    ModelDescriptor::new(row, fields)
}

/// Point the built-in `slug` field's `link_id` at the built-in `name`
/// field's id, the same reciprocal wiring user-defined slug fields get via
/// `link_slug` on creation.
fn link_slug_to_name(rows: &mut [FieldRow]) {
    let name_id = rows.iter().find(|f| f.slug == "name").map(|f| f.id);
    if let (Some(name_id), Some(slug_row)) = (name_id, rows.iter_mut().find(|f| f.slug == "slug")) {
        slug_row.link_id = Some(name_id);
    }
}

fn builtin_field_rows(model_id: i32, specs: &[(&str, &str)]) -> Vec<FieldRow> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (slug, kind))| FieldRow {
            id: -(100 * model_id.unsigned_abs() as i32) - i as i32 - 1,
            name: slug.to_string(),
            slug: slug.to_string(),
            kind: kind.to_string(),
            model_id,
            target_id: None,
            link_id: None,
            dependent: false,
            editable: true,
            locked: false,
            immutable: false,
        })
        .collect()
}

async fn register_model_hooks(handle: &EngineHandle) {
    handle.add_hook(MODEL_SLUG, Timing::BeforeCreate, "build_table", hook_build_table).await;
    handle.add_hook(MODEL_SLUG, Timing::BeforeCreate, "add_base_fields", hook_add_base_fields).await;
    handle.add_hook(MODEL_SLUG, Timing::AfterUpdate, "rename", hook_rename_table).await;
    handle.add_hook(MODEL_SLUG, Timing::AfterSave, "invoke_all", hook_invoke_all).await;
    handle.add_hook(MODEL_SLUG, Timing::AfterDestroy, "cleanup", hook_cleanup_table).await;
}

async fn register_field_hooks(handle: &EngineHandle) {
    handle.add_hook(FIELD_SLUG, Timing::BeforeSave, "check_link_slug", hook_check_link_slug).await;
    handle.add_hook(FIELD_SLUG, Timing::AfterCreate, "add_columns", hook_add_columns).await;
    handle.add_hook(FIELD_SLUG, Timing::AfterUpdate, "reify_field", hook_reify_field).await;
    handle.add_hook(FIELD_SLUG, Timing::AfterDestroy, "drop_columns", hook_drop_columns).await;
}

/// Before the model row exists, create the physical table for its
/// (already-derived) slug.
fn hook_build_table(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let slug = env
            .values
            .get("slug")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ReciprocalSetup {
                message: "new model row is missing slug".to_string(),
            })?;
        handle.sql.create_table(slug, &[id_column()]).await?;
        Ok(env)
    })
}

/// Before the model row exists, append the base-field list to `spec.fields`
/// so the base fields ride the same reciprocal `fields` collection as any
/// user-declared field, picking up the real `model_id` once the row exists.
fn hook_add_base_fields(_handle: &EngineHandle, mut env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let mut fields: Vec<Value> = env.spec.get("fields").and_then(Value::as_array).cloned().unwrap_or_default();
        for (name, kind) in base_field_specs() {
            let mut spec = crate::types::Content::new();
            spec.insert("name".to_string(), Value::from(name));
            spec.insert("slug".to_string(), Value::from(name));
            spec.insert("type".to_string(), Value::from(kind));
            fields.push(Value::Object(spec));
        }
        env.spec.insert("fields".to_string(), Value::Array(fields));
        Ok(env)
    })
}

fn hook_rename_table(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let old_slug = env.original.get("slug").and_then(Value::as_str);
        let new_slug = env.content.get("slug").and_then(Value::as_str);
        if let (Some(old), Some(new)) = (old_slug, new_slug) {
            if old != new {
                handle.sql.rename_table(old, new).await?;
            }
        }
        Ok(env)
    })
}

fn hook_invoke_all(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        invoke_models(handle).await?;
        Ok(env)
    })
}

fn hook_cleanup_table(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        if let Some(slug) = env.content.get("slug").and_then(Value::as_str) {
            handle.sql.drop_table(slug).await?;
        }
        if let (Some(id), Some(slug)) = (
            env.content.get("id").and_then(Value::as_i64),
            env.content.get("slug").and_then(Value::as_str),
        ) {
            handle.registry_remove(slug, id as i32).await;
        }
        Ok(env)
    })
}

/// Resolve `link_slug` (a sibling field's slug, the spec-facing way to wire
/// a slug field) into the `link_id` the rest of the engine works with.
fn hook_check_link_slug(handle: &EngineHandle, mut env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let kind = env.values.get("type").or_else(|| env.spec.get("type")).and_then(Value::as_str);
        if kind != Some("slug") {
            return Ok(env);
        }

        if let Some(link_slug) = env.spec.get("link_slug").and_then(Value::as_str) {
            let model_id = env
                .values
                .get("model_id")
                .or_else(|| env.spec.get("model_id"))
                .or_else(|| env.original.get("model_id"))
                .and_then(Value::as_i64)
                .ok_or_else(|| EngineError::ReciprocalSetup {
                    message: "slug field has no model_id to resolve link_slug against".to_string(),
                })? as i32;
            let model = handle.registry_get(SlugOrId::Id(model_id)).await?;
            let sibling = model.field(link_slug).ok_or_else(|| EngineError::ReciprocalSetup {
                message: format!("no sibling field `{link_slug}` to link slug to"),
            })?;
            env.values.insert("link_id".to_string(), Value::from(sibling.row.id));
        } else if env.values.get("link_id").or_else(|| env.spec.get("link_id")).and_then(Value::as_i64).is_none()
            && env.original.get("link_id").and_then(Value::as_i64).is_none()
        {
            return Err(EngineError::ReciprocalSetup {
                message: "a slug field must declare link_slug or link_id".to_string(),
            });
        }
        Ok(env)
    })
}

fn hook_add_columns(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let row: FieldRow = serde_json::from_value(Value::Object(env.content.clone())).map_err(|e| EngineError::ReciprocalSetup {
            message: format!("malformed field row: {e}"),
        })?;
        let model = handle.registry_get(SlugOrId::Id(row.model_id)).await?;
        let field = crate::model::build_field(row);
        for column in field.table_additions() {
            handle.sql.add_column(model.slug(), &column.name, &column).await?;
        }
        field.setup_field(handle).await?;
        handle.registry_alter_field(field.row.model_id, field).await?;
        Ok(env)
    })
}

fn hook_reify_field(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let row: FieldRow = serde_json::from_value(Value::Object(env.content.clone())).map_err(|e| EngineError::ReciprocalSetup {
            message: format!("malformed field row: {e}"),
        })?;
        let field = crate::model::build_field(row);

        if let Some(old_slug) = env.original.get("slug").and_then(Value::as_str) {
            if old_slug != field.row.slug {
                if !field.table_additions().is_empty() {
                    let model = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
                    handle.sql.rename_column(model.slug(), old_slug, &field.row.slug).await?;
                }
                handle.registry_remove_field(field.row.model_id, old_slug).await?;
            }
        }

        if matches!(field.kind, FieldKind::Collection | FieldKind::Part) {
            field.setup_field(handle).await?;
        }
        handle.registry_alter_field(field.row.model_id, field).await?;
        Ok(env)
    })
}

fn hook_drop_columns(handle: &EngineHandle, env: Env) -> BoxFuture<'_, EngineResult<Env>> {
    Box::pin(async move {
        let row: FieldRow = serde_json::from_value(Value::Object(env.content.clone())).map_err(|e| EngineError::ReciprocalSetup {
            message: format!("malformed field row: {e}"),
        })?;
        let model = handle.registry_get(SlugOrId::Id(row.model_id)).await?;
        let field = crate::model::build_field(row);
        if let Err(e) = field.cleanup_field(handle).await {
            tracing::warn!(error = %e, slug = %field.row.slug, "best-effort field teardown failed");
        }
        for column in field.table_additions() {
            handle.sql.drop_column(model.slug(), &column.name).await?;
        }
        handle.registry_remove_field(field.row.model_id, &field.row.slug).await?;
        Ok(env)
    })
}
