//! The CRUD coordinator (spec section 4.5) and read projections (spec
//! section 4.6). Drives hooks and field callbacks around DML, in the exact
//! ordering spec.md prescribes: `before_save` precedes
//! `before_create`/`before_update`; DML precedes `after_create`/`after_update`,
//! which precedes `post_update`, which precedes `after_save`.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::handle::EngineHandle;
use crate::hooks::{Env, Timing};
use crate::model::ModelDescriptor;
use crate::registry::SlugOrId;
use crate::sql::postgres::quote_ident;
use crate::types::{self, Content, QueryOpts, ReadOpts};

pub async fn create(handle: &EngineHandle, slug: SlugOrId, spec: Content) -> EngineResult<Content> {
    if let Some(id) = spec.get("id").and_then(Value::as_i64) {
        return update(handle, slug, id as i32, spec).await;
    }
    if !handle.sql.is_transaction() {
        let tx = handle.sql.begin().await?;
        let tx_handle = handle.with_sql(tx.clone());
        return match create_inner(&tx_handle, slug, spec).await {
            Ok(content) => {
                tx.commit().await?;
                Ok(content)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        };
    }
    create_inner(handle, slug, spec).await
}

async fn create_inner(handle: &EngineHandle, slug: SlugOrId, spec: Content) -> EngineResult<Content> {
    let model = handle.registry_get(slug).await?;
    let _guard = handle.lock_slug(model.slug()).await;

    let mut values = Content::new();
    for field in model.fields.values().filter(|f| f.row.slug != "updated_at") {
        values = field.update_values(handle, &spec, values).await;
    }

    let env0 = Env {
        spec: spec.clone(),
        values,
        ..Env::with_model(model.clone())
    };
    let env1 = handle.run_hook(model.slug(), Timing::BeforeSave, env0).await?;
    let mut env2 = handle.run_hook(model.slug(), Timing::BeforeCreate, env1).await?;
    env2.values.remove("updated_at");

    let content = handle.sql.insert(model.slug(), &env2.values).await?;
    let merged = types::merge(env2.spec.clone(), &content);

    let env3 = handle
        .run_hook(
            model.slug(),
            Timing::AfterCreate,
            Env {
                content: merged,
                ..env2
            },
        )
        .await?;

    let mut post = env3.content.clone();
    for field in model.fields.values() {
        post = field.post_update(handle, post).await?;
    }

    let env4 = handle
        .run_hook(model.slug(), Timing::AfterSave, Env { content: post, ..env3 })
        .await?;

    Ok(env4.content)
}

pub async fn update(handle: &EngineHandle, slug: SlugOrId, id: i32, spec: Content) -> EngineResult<Content> {
    if !handle.sql.is_transaction() {
        let tx = handle.sql.begin().await?;
        let tx_handle = handle.with_sql(tx.clone());
        return match update_inner(&tx_handle, slug, id, spec).await {
            Ok(content) => {
                tx.commit().await?;
                Ok(content)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        };
    }
    update_inner(handle, slug, id, spec).await
}

async fn update_inner(handle: &EngineHandle, slug: SlugOrId, id: i32, spec: Content) -> EngineResult<Content> {
    let model = handle.registry_get(slug).await?;
    let _guard = handle.lock_slug(model.slug()).await;

    let original = handle
        .sql
        .choose(model.slug(), id)
        .await?
        .ok_or_else(|| EngineError::MissingModel {
            slug_or_id: format!("{}#{id}", model.slug()),
        })?;

    let mut values = Content::new();
    for field in model.fields.values() {
        values = field.update_values(handle, &spec, values).await;
    }

    let env0 = Env {
        spec: spec.clone(),
        values,
        original: original.clone(),
        ..Env::with_model(model.clone())
    };
    let env1 = handle.run_hook(model.slug(), Timing::BeforeSave, env0).await?;
    let env2 = handle.run_hook(model.slug(), Timing::BeforeUpdate, env1).await?;

    handle
        .sql
        .update(model.slug(), &env2.values, "id = %1", &[Value::from(id)])
        .await?;
    let content = handle
        .sql
        .choose(model.slug(), id)
        .await?
        .ok_or_else(|| EngineError::MissingModel {
            slug_or_id: format!("{}#{id}", model.slug()),
        })?;
    let merged = types::merge(env2.spec.clone(), &content);

    let env3 = handle
        .run_hook(
            model.slug(),
            Timing::AfterUpdate,
            Env {
                content: merged,
                ..env2
            },
        )
        .await?;

    let mut post = env3.content.clone();
    for field in model.fields.values() {
        post = field.post_update(handle, post).await?;
    }

    let env4 = handle
        .run_hook(model.slug(), Timing::AfterSave, Env { content: post, ..env3 })
        .await?;

    Ok(env4.content)
}

pub async fn destroy(handle: &EngineHandle, slug: SlugOrId, id: i32) -> EngineResult<Content> {
    if !handle.sql.is_transaction() {
        let tx = handle.sql.begin().await?;
        let tx_handle = handle.with_sql(tx.clone());
        return match destroy_inner(&tx_handle, slug, id).await {
            Ok(content) => {
                tx.commit().await?;
                Ok(content)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        };
    }
    destroy_inner(handle, slug, id).await
}

async fn destroy_inner(handle: &EngineHandle, slug: SlugOrId, id: i32) -> EngineResult<Content> {
    let model = handle.registry_get(slug).await?;
    let _guard = handle.lock_slug(model.slug()).await;

    let original = handle
        .sql
        .choose(model.slug(), id)
        .await?
        .ok_or_else(|| EngineError::MissingModel {
            slug_or_id: format!("{}#{id}", model.slug()),
        })?;

    let env0 = Env {
        content: original,
        ..Env::with_model(model.clone())
    };
    let env1 = handle.run_hook(model.slug(), Timing::BeforeDestroy, env0).await?;

    let mut content = env1.content.clone();
    for field in model.fields.values() {
        content = field.pre_destroy(handle, content).await?;
    }

    handle.sql.delete(model.slug(), "id = %1", &[Value::from(id)]).await?;

    let env2 = handle
        .run_hook(
            model.slug(),
            Timing::AfterDestroy,
            Env { content, ..env1 },
        )
        .await?;

    Ok(env2.content)
}

/// Walk the model's fields, replacing each slug's value with its read
/// projection.
pub async fn from(handle: &EngineHandle, model: &ModelDescriptor, row: &Content, opts: &ReadOpts) -> EngineResult<Content> {
    let mut out = Content::new();
    for field in model.fields.values() {
        let value = field.field_from(handle, row, opts).await?;
        out.insert(field.row.slug.clone(), value);
    }
    Ok(out)
}

/// Same walk as `from`, using `render` instead of `field_from`.
pub async fn model_render(
    handle: &EngineHandle,
    model: &ModelDescriptor,
    row: &Content,
    opts: &ReadOpts,
) -> EngineResult<Content> {
    let mut out = Content::new();
    for field in model.fields.values() {
        let value = field.render(handle, row, opts).await?;
        out.insert(field.row.slug.clone(), value);
    }
    Ok(out)
}

pub async fn rally(handle: &EngineHandle, slug: SlugOrId, opts: QueryOpts) -> EngineResult<Vec<Content>> {
    let model = handle.registry_get(slug).await?;
    let order = if opts.order.eq_ignore_ascii_case("desc") { "desc" } else { "asc" };
    let sql = format!(
        "SELECT * FROM {} ORDER BY {} {} LIMIT {} OFFSET {}",
        quote_ident(model.slug()),
        quote_ident(&opts.order_by),
        order,
        opts.limit.max(0),
        opts.offset.max(0),
    );
    let rows = handle.sql.query(&sql, &[]).await?;
    let read_opts = opts.read_opts();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(from(handle, &model, &row, &read_opts).await?);
    }
    Ok(out)
}

pub async fn progenitors(handle: &EngineHandle, slug: SlugOrId, id: i32, opts: ReadOpts) -> EngineResult<Vec<Content>> {
    nested_walk(handle, slug, id, opts, "t.id = w.parent_id").await
}

pub async fn descendents(handle: &EngineHandle, slug: SlugOrId, id: i32, opts: ReadOpts) -> EngineResult<Vec<Content>> {
    nested_walk(handle, slug, id, opts, "t.parent_id = w.id").await
}

async fn nested_walk(
    handle: &EngineHandle,
    slug: SlugOrId,
    id: i32,
    opts: ReadOpts,
    recur_where: &str,
) -> EngineResult<Vec<Content>> {
    let model = handle.registry_get(slug).await?;
    if !model.row.nested {
        let row = handle
            .sql
            .choose(model.slug(), id)
            .await?
            .ok_or_else(|| EngineError::MissingModel {
                slug_or_id: format!("{}#{id}", model.slug()),
            })?;
        return Ok(vec![from(handle, &model, &row, &opts).await?]);
    }

    let rows = handle
        .sql
        .recursive_query(model.slug(), &[], "id = %1", recur_where, &[Value::from(id)])
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(from(handle, &model, &row, &opts).await?);
    }
    Ok(out)
}
