//! Shared value types threaded between the SQL collaborator, field kinds,
//! the hook dispatcher and the CRUD coordinator.

use chrono::Utc;
use serde_json::Value;

/// The sentinel a `timestamp` field's `update_values` substitutes for
/// `updated_at` on every write; backends resolve it to the real wall-clock
/// time immediately before the value reaches storage.
pub const CURRENT_TIMESTAMP_SENTINEL: &str = "current_timestamp";

/// Replace the `current_timestamp` sentinel with an actual RFC 3339
/// timestamp; every other value passes through unchanged.
pub fn resolve_timestamp_sentinel(value: &Value) -> Value {
    match value {
        Value::String(s) if s == CURRENT_TIMESTAMP_SENTINEL => Value::from(Utc::now().to_rfc3339()),
        other => other.clone(),
    }
}

/// An untyped content row: a mapping from field slug to value. Shaped by the
/// owning model, never by a fixed struct — this is the "self-describing"
/// half of the engine.
pub type Content = serde_json::Map<String, Value>;

/// A nested mapping declaring which relational fields to expand during a
/// read projection. `include.get("yellows")` being present (even as an
/// empty object) means "expand this relational field"; absence means don't.
pub type IncludeMap = serde_json::Map<String, Value>;

/// A single column DDL spec: `(column_name, sql_type, extra_clauses...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub extra: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_extra(mut self, clause: impl Into<String>) -> Self {
        self.extra.push(clause.into());
        self
    }
}

/// Options controlling a single read projection (`from`/`model_render`).
#[derive(Debug, Clone, Default)]
pub struct ReadOpts {
    pub include: IncludeMap,
}

impl ReadOpts {
    /// The nested options to pass down when expanding a relational field.
    pub fn nested(&self, slug: &str) -> ReadOpts {
        let include = self
            .include
            .get(slug)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        ReadOpts { include }
    }

    pub fn wants(&self, slug: &str) -> bool {
        self.include.contains_key(slug)
    }
}

/// Options controlling `rally`'s listing query.
#[derive(Debug, Clone)]
pub struct QueryOpts {
    pub order_by: String,
    pub order: String,
    pub limit: i64,
    pub offset: i64,
    pub include: IncludeMap,
}

impl Default for QueryOpts {
    fn default() -> Self {
        Self {
            order_by: "position".to_string(),
            order: "asc".to_string(),
            limit: 30,
            offset: 0,
            include: IncludeMap::default(),
        }
    }
}

impl QueryOpts {
    pub fn read_opts(&self) -> ReadOpts {
        ReadOpts {
            include: self.include.clone(),
        }
    }
}

/// Helper: non-destructively merge `b` over `a`, `b`'s keys winning.
pub fn merge(mut a: Content, b: &Content) -> Content {
    for (k, v) in b {
        a.insert(k.clone(), v.clone());
    }
    a
}
