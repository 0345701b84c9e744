//! The field-kind protocol (spec section 4.1): a closed enumeration of
//! kinds with DDL, row read/write and lifecycle behavior dispatched by tag,
//! per design note 9 (protocol-over-variants). Relational kinds
//! (`collection`/`part`) never hold a pointer to their peer field directly
//! -- they resolve it through the registry, by numeric id, on every call.

pub mod slugify;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::warn;

use crate::crud;
use crate::error::{EngineError, EngineResult};
use crate::handle::EngineHandle;
use crate::model::{FieldRow, ModelDescriptor};
use crate::registry::SlugOrId;
use crate::types::{ColumnSpec, Content, ReadOpts};

use self::slugify::slugify;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Integer,
    Str,
    Slug,
    Text,
    Boolean,
    Timestamp,
    Image,
    Collection,
    Part,
    Link,
}

impl FieldKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "id" => FieldKind::Id,
            "integer" => FieldKind::Integer,
            "string" => FieldKind::Str,
            "slug" => FieldKind::Slug,
            "text" => FieldKind::Text,
            "boolean" => FieldKind::Boolean,
            "timestamp" => FieldKind::Timestamp,
            "image" => FieldKind::Image,
            "collection" => FieldKind::Collection,
            "part" => FieldKind::Part,
            "link" => FieldKind::Link,
            other => {
                warn!(kind = other, "unknown field kind tag, treating as text");
                FieldKind::Text
            }
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Id => "id",
            FieldKind::Integer => "integer",
            FieldKind::Str => "string",
            FieldKind::Slug => "slug",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Image => "image",
            FieldKind::Collection => "collection",
            FieldKind::Part => "part",
            FieldKind::Link => "link",
        }
    }
}

/// A live field instance: its descriptor row plus its dispatchable kind.
#[derive(Debug, Clone)]
pub struct Field {
    pub row: FieldRow,
    pub kind: FieldKind,
}

fn naive_plural(word: &str) -> String {
    if word.ends_with('s') {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

impl Field {
    /// DDL clauses to append to the owning model's table when this field is
    /// introduced. Relational and reserved kinds contribute nothing: their
    /// subfields (synthesized separately as their own `Field`s) carry the
    /// real columns.
    pub fn table_additions(&self) -> Vec<ColumnSpec> {
        let slug = &self.row.slug;
        match self.kind {
            // The `id` column is created directly by `create_table`; the
            // field row exists only so reads can project identity.
            FieldKind::Id => vec![],
            FieldKind::Integer => vec![ColumnSpec::new(slug, "integer").with_extra("DEFAULT NULL")],
            FieldKind::Str => vec![ColumnSpec::new(slug, "varchar(256)")],
            FieldKind::Text => vec![ColumnSpec::new(slug, "text")],
            FieldKind::Boolean => vec![ColumnSpec::new(slug, "boolean")],
            FieldKind::Timestamp => vec![
                ColumnSpec::new(slug, "timestamp with time zone").with_extra("NOT NULL DEFAULT current_timestamp"),
            ],
            FieldKind::Slug => vec![ColumnSpec::new(slug, "varchar(256)")],
            FieldKind::Image | FieldKind::Link | FieldKind::Collection | FieldKind::Part => vec![],
        }
    }

    /// Auxiliary field names this kind synthesizes as full field rows of
    /// their own (used by `part`; `image` reserves a peer slot it never
    /// materializes).
    pub fn subfield_names(&self) -> Vec<String> {
        let slug = &self.row.slug;
        match self.kind {
            FieldKind::Part => vec![format!("{slug}_id"), format!("{slug}_position")],
            FieldKind::Image => vec![format!("{slug}_id")],
            _ => vec![],
        }
    }

    /// The peer model id, for relational kinds.
    pub fn target_for(&self) -> Option<i32> {
        self.row.target_id
    }

    /// Side-effecting setup invoked after the field row is created. Must be
    /// idempotent against a prior partial setup (a crash between creating
    /// the peer row and cross-linking it).
    pub async fn setup_field(&self, handle: &EngineHandle) -> EngineResult<()> {
        match self.kind {
            FieldKind::Collection => setup_collection(handle, self).await,
            FieldKind::Part => setup_part(handle, self).await,
            _ => Ok(()),
        }
    }

    /// Side-effecting teardown invoked before the field row is destroyed.
    /// Errors here are caught by the caller and logged -- teardown must be
    /// best-effort.
    pub async fn cleanup_field(&self, handle: &EngineHandle) -> EngineResult<()> {
        match self.kind {
            FieldKind::Part => cleanup_part(handle, self).await,
            _ => Ok(()),
        }
    }

    /// Contribute this field's write value into the accumulator. Always
    /// returns the accumulator, per design note 3: a parse failure on
    /// `integer`/`boolean` just drops the key rather than erroring.
    pub async fn update_values(&self, handle: &EngineHandle, content: &Content, mut acc: Content) -> Content {
        let slug = self.row.slug.clone();
        match self.kind {
            FieldKind::Id | FieldKind::Collection | FieldKind::Part | FieldKind::Image | FieldKind::Link => acc,
            FieldKind::Integer => {
                if let Some(v) = content.get(&slug) {
                    match coerce_integer(v) {
                        Some(i) => {
                            acc.insert(slug, Value::from(i));
                        }
                        None => warn!(field = %slug, "dropping unparseable integer value"),
                    }
                }
                acc
            }
            FieldKind::Boolean => {
                if let Some(v) = content.get(&slug) {
                    match coerce_boolean(v) {
                        Some(b) => {
                            acc.insert(slug, Value::from(b));
                        }
                        None => warn!(field = %slug, "dropping unparseable boolean value"),
                    }
                }
                acc
            }
            FieldKind::Str | FieldKind::Text => {
                if let Some(v) = content.get(&slug) {
                    acc.insert(slug, v.clone());
                }
                acc
            }
            FieldKind::Timestamp => {
                if slug == "updated_at" {
                    acc.insert(slug, Value::from(crate::types::CURRENT_TIMESTAMP_SENTINEL));
                } else if let Some(v) = content.get(&slug) {
                    acc.insert(slug, v.clone());
                }
                acc
            }
            FieldKind::Slug => {
                let resolved = resolve_slug_value(handle, self, content).await;
                if let Some(v) = resolved {
                    acc.insert(slug, Value::from(v));
                }
                acc
            }
        }
    }

    /// Invoked after the row has been persisted and its id is known. Only
    /// `collection` does anything: it recursively persists its children.
    pub async fn post_update(&self, handle: &EngineHandle, content: Content) -> EngineResult<Content> {
        match self.kind {
            FieldKind::Collection => collection_post_update(handle, self, content).await,
            _ => Ok(content),
        }
    }

    /// Invoked before the row is deleted; relational kinds with
    /// `dependent` cascade here.
    pub async fn pre_destroy(&self, handle: &EngineHandle, content: Content) -> EngineResult<Content> {
        match self.kind {
            FieldKind::Collection => collection_pre_destroy(handle, self, content).await,
            _ => Ok(content),
        }
    }

    /// Read projection honoring `opts.include`.
    pub fn field_from<'a>(
        &'a self,
        handle: &'a EngineHandle,
        content: &'a Content,
        opts: &'a ReadOpts,
    ) -> BoxFuture<'a, EngineResult<Value>> {
        Box::pin(async move {
            match self.kind {
                FieldKind::Image | FieldKind::Link => Ok(Value::Null),
                FieldKind::Collection => collection_read(handle, self, content, opts, false).await,
                FieldKind::Part => part_read(handle, self, content, opts, false).await,
                _ => Ok(content.get(&self.row.slug).cloned().unwrap_or(Value::Null)),
            }
        })
    }

    /// Display-oriented projection; timestamps render as strings and
    /// relational kinds recurse via `model_render`.
    pub fn render<'a>(
        &'a self,
        handle: &'a EngineHandle,
        content: &'a Content,
        opts: &'a ReadOpts,
    ) -> BoxFuture<'a, EngineResult<Value>> {
        Box::pin(async move {
            match self.kind {
                FieldKind::Timestamp => Ok(content
                    .get(&self.row.slug)
                    .map(|v| Value::from(value_to_display_string(v)))
                    .unwrap_or(Value::Null)),
                FieldKind::Collection => collection_read(handle, self, content, opts, true).await,
                FieldKind::Part => part_read(handle, self, content, opts, true).await,
                _ => self.field_from(handle, content, opts).await,
            }
        })
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

async fn resolve_slug_value(handle: &EngineHandle, field: &Field, content: &Content) -> Option<String> {
    if let Some(link_id) = field.row.link_id {
        let linked = async {
            let model = handle.registry_get(SlugOrId::Id(field.row.model_id)).await.ok()?;
            let peer = model.field_by_id(link_id)?;
            content.get(&peer.row.slug).and_then(|v| v.as_str()).map(slugify)
        }
        .await;
        if linked.is_some() {
            return linked;
        }
    }
    content.get(&field.row.slug).and_then(|v| v.as_str()).map(slugify)
}

// --- collection / part reciprocal wiring ------------------------------------

async fn setup_collection(handle: &EngineHandle, field: &Field) -> EngineResult<()> {
    let Some(target_id) = field.row.target_id else {
        return Err(EngineError::ReciprocalSetup {
            message: format!("collection field `{}` has no target_id", field.row.slug),
        });
    };
    let target = handle.registry_get(SlugOrId::Id(target_id)).await?;

    let existing_peer = target
        .fields
        .values()
        .find(|f| f.kind == FieldKind::Part && f.row.link_id == Some(field.row.id));
    if let Some(peer) = existing_peer {
        if field.row.link_id != Some(peer.row.id) {
            link_field_rows(handle, field.row.id, peer.row.id).await?;
        }
        return Ok(());
    }

    let owning = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    let part_name = owning.row.slug.clone();
    let part_row = insert_field_row(
        handle,
        &part_name,
        "part",
        target_id,
        Some(field.row.model_id),
        Some(field.row.id),
        field.row.dependent,
    )
    .await?;

    // The part's own auxiliary integer subfields are created as part of its
    // own setup, invoked explicitly here since we bypassed the normal
    // `create(:field, ...)` pipeline to avoid re-entering the hook chain.
    let part_field = crate::model::build_field(part_row.clone());
    ensure_part_subfields(handle, &part_field, &target).await?;

    link_field_rows(handle, field.row.id, part_row.id).await?;
    handle.registry_alter_field(target_id, part_field).await?;
    Ok(())
}

async fn setup_part(handle: &EngineHandle, field: &Field) -> EngineResult<()> {
    let Some(target_id) = field.row.target_id else {
        return Err(EngineError::ReciprocalSetup {
            message: format!("part field `{}` has no target_id", field.row.slug),
        });
    };
    let owning = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    ensure_part_subfields(handle, field, &owning).await?;

    let target = handle.registry_get(SlugOrId::Id(target_id)).await?;
    let existing_peer = target
        .fields
        .values()
        .find(|f| f.kind == FieldKind::Collection && f.row.link_id == Some(field.row.id));
    if let Some(peer) = existing_peer {
        if field.row.link_id != Some(peer.row.id) {
            link_field_rows(handle, field.row.id, peer.row.id).await?;
        }
        return Ok(());
    }

    let collection_name = naive_plural(&owning.row.slug);
    let collection_row = insert_field_row(
        handle,
        &collection_name,
        "collection",
        target_id,
        Some(field.row.model_id),
        Some(field.row.id),
        field.row.dependent,
    )
    .await?;

    link_field_rows(handle, field.row.id, collection_row.id).await?;
    let collection_field = crate::model::build_field(collection_row);
    handle.registry_alter_field(target_id, collection_field).await?;
    Ok(())
}

async fn ensure_part_subfields(handle: &EngineHandle, part: &Field, owning: &ModelDescriptor) -> EngineResult<()> {
    for name in part.subfield_names() {
        if owning.field(&name).is_some() {
            continue;
        }
        let row = insert_field_row(handle, &name, "integer", owning.row.id, None, None, false).await?;
        for column in crate::model::build_field(row.clone()).table_additions() {
            handle.sql.add_column(&owning.row.slug, &column.name, &column).await?;
        }
        handle.registry_alter_field(owning.row.id, crate::model::build_field(row)).await?;
    }
    Ok(())
}

async fn cleanup_part(handle: &EngineHandle, field: &Field) -> EngineResult<()> {
    let owning = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    for name in field.subfield_names() {
        if let Some(subfield) = owning.field(&name) {
            let id = subfield.row.id;
            handle.sql.drop_column(&owning.row.slug, &name).await?;
            handle.sql.delete("field", "id = %1", &[Value::from(id)]).await?;
            handle.registry_remove_field(owning.row.id, &name).await?;
        }
    }
    if let Some(link_id) = field.row.link_id {
        handle.sql.delete("field", "id = %1", &[Value::from(link_id)]).await?;
        if let Some(target_id) = field.row.target_id {
            if let Ok(target) = handle.registry_get(SlugOrId::Id(target_id)).await
                && let Some(peer) = target.field_by_id(link_id)
            {
                let peer_slug = peer.row.slug.clone();
                handle.registry_remove_field(target_id, &peer_slug).await?;
            }
        }
    }
    Ok(())
}

async fn link_field_rows(handle: &EngineHandle, a: i32, b: i32) -> EngineResult<()> {
    let mut values = Content::new();
    values.insert("link_id".to_string(), Value::from(b));
    handle.sql.update("field", &values, "id = %1", &[Value::from(a)]).await?;
    let mut values = Content::new();
    values.insert("link_id".to_string(), Value::from(a));
    handle.sql.update("field", &values, "id = %1", &[Value::from(b)]).await?;
    handle.registry_set_link(a, b).await?;
    handle.registry_set_link(b, a).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_field_row(
    handle: &EngineHandle,
    name: &str,
    kind: &str,
    model_id: i32,
    target_id: Option<i32>,
    link_id: Option<i32>,
    dependent: bool,
) -> EngineResult<FieldRow> {
    let mut values = Content::new();
    values.insert("name".to_string(), Value::from(name));
    values.insert("slug".to_string(), Value::from(slugify(name)));
    values.insert("type".to_string(), Value::from(kind));
    values.insert("model_id".to_string(), Value::from(model_id));
    if let Some(t) = target_id {
        values.insert("target_id".to_string(), Value::from(t));
    }
    if let Some(l) = link_id {
        values.insert("link_id".to_string(), Value::from(l));
    }
    values.insert("dependent".to_string(), Value::from(dependent));
    values.insert("editable".to_string(), Value::from(true));
    values.insert("locked".to_string(), Value::from(false));
    values.insert("immutable".to_string(), Value::from(false));

    let row = handle.sql.insert("field", &values).await?;
    serde_json::from_value(Value::Object(row)).map_err(|e| EngineError::ReciprocalSetup {
        message: format!("malformed field row: {e}"),
    })
}

async fn collection_post_update(handle: &EngineHandle, field: &Field, content: Content) -> EngineResult<Content> {
    let Some(Value::Array(children)) = content.get(&field.row.slug).cloned() else {
        return Ok(content);
    };
    let Some(parent_id) = content.get("id").cloned() else {
        return Ok(content);
    };
    let model = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    let target = handle.registry_get(SlugOrId::Id(field.row.target_id.unwrap_or_default())).await?;
    let Some(link_id) = model.field_by_id(field.row.id).and_then(|f| f.row.link_id) else {
        return Ok(content);
    };
    let peer = target
        .field_by_id(link_id)
        .ok_or_else(|| EngineError::ReciprocalSetup {
            message: format!("collection `{}` has no resolvable reciprocal part", field.row.slug),
        })?;
    let fk_slug = format!("{}_id", peer.row.slug);

    for child in children {
        let Value::Object(child_obj) = child else { continue };
        let mut child_spec = child_obj;
        child_spec.insert(fk_slug.clone(), parent_id.clone());
        child_spec.insert("_parent".to_string(), Value::Object(content.clone()));
        Box::pin(crud::create(handle, SlugOrId::Slug(target.slug().to_string()), child_spec)).await?;
    }
    Ok(content)
}

async fn collection_pre_destroy(handle: &EngineHandle, field: &Field, content: Content) -> EngineResult<Content> {
    let Some(target_id) = field.row.target_id else {
        return Ok(content);
    };
    let model = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    let target = handle.registry_get(SlugOrId::Id(target_id)).await?;
    let Some(link_id) = model.field_by_id(field.row.id).and_then(|f| f.row.link_id) else {
        return Ok(content);
    };
    let Some(peer) = target.field_by_id(link_id) else {
        return Ok(content);
    };
    let dependent = field.row.dependent || peer.row.dependent;
    if !dependent {
        return Ok(content);
    }
    let Some(parent_id) = content.get("id").cloned() else {
        return Ok(content);
    };
    let fk_slug = format!("{}_id", peer.row.slug);
    let children = handle.sql.fetch(target.slug(), &format!("{fk_slug} = %1"), &[parent_id]).await?;
    for child in children {
        if let Some(id) = child.get("id").and_then(Value::as_i64) {
            Box::pin(crud::destroy(handle, SlugOrId::Slug(target.slug().to_string()), id as i32)).await?;
        }
    }
    Ok(content)
}

async fn collection_read<'a>(
    handle: &'a EngineHandle,
    field: &'a Field,
    content: &'a Content,
    opts: &'a ReadOpts,
    render: bool,
) -> EngineResult<Value> {
    if !opts.wants(&field.row.slug) {
        return Ok(Value::Array(vec![]));
    }
    let Some(target_id) = field.row.target_id else {
        return Ok(Value::Array(vec![]));
    };
    let model = handle.registry_get(SlugOrId::Id(field.row.model_id)).await?;
    let target = handle.registry_get(SlugOrId::Id(target_id)).await?;
    let Some(link_id) = model.field_by_id(field.row.id).and_then(|f| f.row.link_id) else {
        return Ok(Value::Array(vec![]));
    };
    let Some(peer) = target.field_by_id(link_id) else {
        return Ok(Value::Array(vec![]));
    };
    let Some(parent_id) = content.get("id").cloned() else {
        return Ok(Value::Array(vec![]));
    };
    let fk_slug = format!("{}_id", peer.row.slug);
    let rows = handle.sql.fetch(target.slug(), &format!("{fk_slug} = %1"), &[parent_id]).await?;
    let nested = opts.nested(&field.row.slug);
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let projected = if render {
            crud::model_render(handle, &target, &row, &nested).await?
        } else {
            crud::from(handle, &target, &row, &nested).await?
        };
        out.push(Value::Object(projected));
    }
    Ok(Value::Array(out))
}

async fn part_read<'a>(
    handle: &'a EngineHandle,
    field: &'a Field,
    content: &'a Content,
    opts: &'a ReadOpts,
    render: bool,
) -> EngineResult<Value> {
    if !opts.wants(&field.row.slug) {
        return Ok(Value::Null);
    }
    let Some(target_id) = field.row.target_id else {
        return Ok(Value::Null);
    };
    let fk_slug = format!("{}_id", field.row.slug);
    let Some(fk_value) = content.get(&fk_slug).and_then(Value::as_i64) else {
        return Ok(Value::Null);
    };
    let target = handle.registry_get(SlugOrId::Id(target_id)).await?;
    let Some(row) = handle.sql.choose(target.slug(), fk_value as i32).await? else {
        return Ok(Value::Null);
    };
    let nested = opts.nested(&field.row.slug);
    let projected = if render {
        crud::model_render(handle, &target, &row, &nested).await?
    } else {
        crud::from(handle, &target, &row, &nested).await?
    };
    Ok(Value::Object(projected))
}
