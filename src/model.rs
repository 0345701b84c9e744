//! Model and field descriptors (spec section 3): the metadata rows the
//! registry loads, plus the live, constructed descriptors built from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::field::{Field, FieldKind};
use crate::types::ColumnSpec;

/// A row of the `model` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRow {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub position: i32,
    #[serde(default)]
    pub nested: bool,
}

/// A row of the `field` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRow {
    pub id: i32,
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model_id: i32,
    pub target_id: Option<i32>,
    pub link_id: Option<i32>,
    #[serde(default)]
    pub dependent: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub immutable: bool,
}

fn default_true() -> bool {
    true
}

/// The base fields every engine-created table carries (spec section 3),
/// beyond `id` which is added separately as the primary key.
pub fn base_field_specs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("position", "integer"),
        ("status", "integer"),
        ("locale_id", "integer"),
        ("env_id", "integer"),
        ("locked", "boolean"),
        ("created_at", "timestamp"),
        ("updated_at", "timestamp"),
    ]
}

/// Base table columns that exist before any field rows are processed:
/// just the primary key. Every other base field goes through the normal
/// field-row + `table_additions` path, exactly like a user-defined field.
pub fn id_column() -> ColumnSpec {
    ColumnSpec::new("id", "SERIAL PRIMARY KEY")
}

/// A live, constructed model: its row plus every field instance keyed by
/// slug. Peers (collection/part reciprocals, slug link targets) are never
/// stored here directly -- they are resolved through the registry at use
/// time by numeric id, per the engine's cyclic-descriptor discipline.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub row: ModelRow,
    pub fields: HashMap<String, Field>,
    field_slugs_by_id: HashMap<i32, String>,
}

impl ModelDescriptor {
    pub fn new(row: ModelRow, fields: Vec<Field>) -> Self {
        let field_slugs_by_id = fields.iter().map(|f| (f.row.id, f.row.slug.clone())).collect();
        let fields = fields.into_iter().map(|f| (f.row.slug.clone(), f)).collect();
        Self {
            row,
            fields,
            field_slugs_by_id,
        }
    }

    pub fn field(&self, slug: &str) -> Option<&Field> {
        self.fields.get(slug)
    }

    pub fn field_by_id(&self, id: i32) -> Option<&Field> {
        self.field_slugs_by_id.get(&id).and_then(|slug| self.fields.get(slug))
    }

    pub fn slug(&self) -> &str {
        &self.row.slug
    }
}

/// Build a [`Field`] instance from its row. Constructors never perform DDL;
/// all side effects belong in `setup_field`/`cleanup_field`.
pub fn build_field(row: FieldRow) -> Field {
    let kind = FieldKind::from_tag(&row.kind);
    Field { row, kind }
}
