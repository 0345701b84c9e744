//! An in-process fake of the SQL collaborator, used by the crate's own test
//! suite so the CRUD coordinator, hook dispatcher and field kinds can be
//! exercised deterministically without a live Postgres instance. It
//! recognizes exactly the SQL shapes the engine itself generates; it is not
//! a general-purpose SQL engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::{ColumnSpec, Content};

use super::SqlBackend;

#[derive(Clone)]
struct Table {
    columns: Vec<ColumnSpec>,
    rows: Vec<Content>,
    next_id: i32,
}

impl Table {
    fn new(columns: &[ColumnSpec]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

#[derive(Default, Clone)]
struct State {
    tables: HashMap<String, Table>,
}

/// An in-memory, single-process `SqlBackend`. Cheap to construct, safe to
/// share across tasks behind an `Arc`.
#[derive(Default)]
pub struct MemorySql {
    state: Arc<Mutex<State>>,
}

impl MemorySql {
    pub fn new() -> Self {
        Self::default()
    }
}

fn proto_err(message: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Protocol(message.into())
}

/// Read the literal out of a `DEFAULT <literal>` DDL clause, the same value
/// a real Postgres column would fall back to when an insert omits it.
fn default_literal(column: &ColumnSpec) -> Value {
    for clause in &column.extra {
        let upper = clause.to_ascii_uppercase();
        let Some(idx) = upper.find("DEFAULT") else { continue };
        let literal = clause[idx + "DEFAULT".len()..].trim();
        return match literal.to_ascii_lowercase().as_str() {
            "false" => Value::from(false),
            "true" => Value::from(true),
            "null" | "" | "current_timestamp" => Value::Null,
            other => other.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
        };
    }
    Value::Null
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_number() && b.is_number() {
        return numbers_equal(a, b);
    }
    false
}

fn resolve_literal(token: &str, args: &[Value]) -> Value {
    let token = token.trim();
    if let Some(stripped) = token.strip_prefix('%') {
        if let Ok(idx) = stripped.parse::<usize>() {
            return args.get(idx - 1).cloned().unwrap_or(Value::Null);
        }
    }
    if token.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::from(i);
    }
    if (token.starts_with('\'') && token.ends_with('\'')) || (token.starts_with('"') && token.ends_with('"')) {
        return Value::from(token[1..token.len() - 1].to_string());
    }
    Value::from(token.to_string())
}

/// Evaluate a conjunction of simple `column = value` predicates (the only
/// shape this engine's CRUD coordinator and field kinds ever build) against
/// one row.
fn row_matches(row: &Content, where_template: &str, args: &[Value]) -> bool {
    where_template
        .split(" AND ")
        .all(|predicate| {
            let predicate = predicate.trim();
            let Some((left, right)) = predicate.split_once('=') else {
                return true;
            };
            let column = unquote(left);
            let expected = resolve_literal(right, args);
            match row.get(&column) {
                Some(actual) => values_equal(actual, &expected),
                None => matches!(expected, Value::Null),
            }
        })
}

struct ListQuery {
    table: String,
    order_by: String,
    descending: bool,
    limit: i64,
    offset: i64,
}

fn parse_listing_sql(sql: &str) -> Option<ListQuery> {
    let rest = sql.trim().strip_prefix("SELECT * FROM ")?;
    let (table_part, rest) = rest.split_once(" ORDER BY ")?;
    let (order_part, rest) = rest.split_once(" LIMIT ")?;
    let (col_part, dir_part) = order_part.trim().rsplit_once(' ')?;
    let (limit_part, offset_part) = rest.split_once(" OFFSET ")?;
    Some(ListQuery {
        table: unquote(table_part),
        order_by: unquote(col_part),
        descending: dir_part.trim().eq_ignore_ascii_case("desc"),
        limit: limit_part.trim().parse().ok()?,
        offset: offset_part.trim().parse().ok()?,
    })
}

impl State {
    fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    fn require_table(&self, name: &str) -> EngineResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| proto_err(format!("no such table `{name}`")).into())
    }
}

#[async_trait]
impl SqlBackend for MemorySql {
    async fn query(&self, sql: &str, _args: &[Value]) -> EngineResult<Vec<Content>> {
        let state = self.state.lock().unwrap();
        let Some(listing) = parse_listing_sql(sql) else {
            return Err(proto_err(format!("MemorySql cannot evaluate ad-hoc SQL: {sql}")).into());
        };
        let table = state.require_table(&listing.table)?;
        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| {
            let av = a.get(&listing.order_by).cloned().unwrap_or(Value::Null);
            let bv = b.get(&listing.order_by).cloned().unwrap_or(Value::Null);
            let ordering = av
                .as_f64()
                .zip(bv.as_f64())
                .map(|(x, y)| x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or(std::cmp::Ordering::Equal);
            if listing.descending { ordering.reverse() } else { ordering }
        });
        let start = listing.offset.max(0) as usize;
        let end = (start + listing.limit.max(0) as usize).min(rows.len());
        Ok(if start >= rows.len() { Vec::new() } else { rows[start..end].to_vec() })
    }

    async fn fetch(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let state = self.state.lock().unwrap();
        let table = state.require_table(table)?;
        Ok(table
            .rows
            .iter()
            .filter(|row| row_matches(row, where_template, args))
            .cloned()
            .collect())
    }

    async fn choose(&self, table: &str, id: i32) -> EngineResult<Option<Content>> {
        let state = self.state.lock().unwrap();
        let table = state.require_table(table)?;
        Ok(table
            .rows
            .iter()
            .find(|row| row.get("id").and_then(Value::as_i64) == Some(id as i64))
            .cloned())
    }

    async fn insert(&self, table_name: &str, values: &Content) -> EngineResult<Content> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table_name)
            .ok_or_else(|| proto_err(format!("no such table `{table_name}`")))?;
        let mut row: Content = values
            .iter()
            .map(|(k, v)| (k.clone(), crate::types::resolve_timestamp_sentinel(v)))
            .collect();
        let id = row
            .get("id")
            .and_then(Value::as_i64)
            .map(|v| v as i32)
            .unwrap_or_else(|| {
                let id = table.next_id;
                table.next_id += 1;
                id
            });
        row.insert("id".to_string(), Value::from(id));
        for column in table.columns.clone() {
            if row.contains_key(&column.name) {
                continue;
            }
            let default = if column.name == "created_at" || column.name == "updated_at" {
                Value::from(Utc::now().to_rfc3339())
            } else {
                default_literal(&column)
            };
            row.insert(column.name.clone(), default);
        }
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, table_name: &str, values: &Content, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table_name)
            .ok_or_else(|| proto_err(format!("no such table `{table_name}`")))?;
        let mut affected = 0u64;
        for row in table.rows.iter_mut() {
            if row_matches(row, where_template, args) {
                for (k, v) in values {
                    row.insert(k.clone(), crate::types::resolve_timestamp_sentinel(v));
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table_name: &str, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table_name)
            .ok_or_else(|| proto_err(format!("no such table `{table_name}`")))?;
        let before = table.rows.len();
        table.rows.retain(|row| !row_matches(row, where_template, args));
        Ok((before - table.rows.len()) as u64)
    }

    async fn create_table(&self, name: &str, extra_columns: &[ColumnSpec]) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.tables.contains_key(name) {
            return Err(proto_err(format!("table `{name}` already exists")).into());
        }
        state.tables.insert(name.to_string(), Table::new(extra_columns));
        Ok(())
    }

    async fn add_column(&self, table: &str, _name: &str, spec: &ColumnSpec) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table)
            .ok_or_else(|| proto_err(format!("no such table `{table}`")))?;
        table.columns.push(spec.clone());
        Ok(())
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table)
            .ok_or_else(|| proto_err(format!("no such table `{table}`")))?;
        for column in table.columns.iter_mut() {
            if column.name == old {
                column.name = new.to_string();
            }
        }
        for row in table.rows.iter_mut() {
            if let Some(value) = row.remove(old) {
                row.insert(new.to_string(), value);
            }
        }
        Ok(())
    }

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .table_mut(table)
            .ok_or_else(|| proto_err(format!("no such table `{table}`")))?;
        table.columns.retain(|c| c.name != name);
        for row in table.rows.iter_mut() {
            row.remove(name);
        }
        Ok(())
    }

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .tables
            .remove(old)
            .ok_or_else(|| proto_err(format!("no such table `{old}`")))?;
        state.tables.insert(new.to_string(), table);
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.tables.remove(name);
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.contains_key(name))
    }

    async fn recursive_query(
        &self,
        table: &str,
        _columns: &[String],
        base_where: &str,
        recur_where: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>> {
        let state = self.state.lock().unwrap();
        let table = state.require_table(table)?;
        let base: Vec<Content> = table
            .rows
            .iter()
            .filter(|row| row_matches(row, base_where, args))
            .cloned()
            .collect();

        let descending_tree = recur_where.contains("t.parent_id");

        let mut seen: Vec<i32> = Vec::new();
        let mut frontier = base.clone();
        let mut walk = base;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in &frontier {
                let node_id = node.get("id").and_then(Value::as_i64).map(|v| v as i32);
                if let Some(id) = node_id {
                    if seen.contains(&id) {
                        continue;
                    }
                    seen.push(id);
                }
                for row in &table.rows {
                    let matches = if descending_tree {
                        row.get("parent_id").and_then(Value::as_i64) == node_id.map(|v| v as i64)
                    } else {
                        node.get("parent_id").and_then(Value::as_i64)
                            == row.get("id").and_then(Value::as_i64)
                    };
                    if matches {
                        let id = row.get("id").and_then(Value::as_i64).map(|v| v as i32);
                        if id.map(|i| !seen.contains(&i)).unwrap_or(true) {
                            next.push(row.clone());
                        }
                    }
                }
            }
            walk.extend(next.clone());
            frontier = next;
        }
        Ok(walk)
    }

    fn clause(&self, template: &str, args: &[Value]) -> String {
        let mut out = template.to_string();
        for (i, arg) in args.iter().enumerate() {
            let placeholder = format!("%{}", i + 1);
            let literal = match arg {
                Value::Null => "NULL".to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                other => format!("'{}'", other),
            };
            out = out.replace(&placeholder, &literal);
        }
        out
    }

    async fn begin(&self) -> EngineResult<Arc<dyn SqlBackend>> {
        let snapshot = self.state.lock().unwrap().clone();
        Ok(Arc::new(MemoryTx {
            inner: MemorySql { state: self.state.clone() },
            snapshot: Mutex::new(Some(snapshot)),
        }))
    }
}

/// A `SqlBackend` scoped to one transaction over the shared in-memory
/// state: writes land directly in the same `Arc<Mutex<State>>` the live
/// backend reads from (there is only one writer at a time, so this is
/// already atomic per call), and `rollback` restores the snapshot taken at
/// `begin` time instead of undoing statements one by one.
struct MemoryTx {
    inner: MemorySql,
    snapshot: Mutex<Option<State>>,
}

#[async_trait]
impl SqlBackend for MemoryTx {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        self.inner.query(sql, args).await
    }

    async fn fetch(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        self.inner.fetch(table, where_template, args).await
    }

    async fn choose(&self, table: &str, id: i32) -> EngineResult<Option<Content>> {
        self.inner.choose(table, id).await
    }

    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content> {
        self.inner.insert(table, values).await
    }

    async fn update(&self, table: &str, values: &Content, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        self.inner.update(table, values, where_template, args).await
    }

    async fn delete(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        self.inner.delete(table, where_template, args).await
    }

    async fn create_table(&self, name: &str, extra_columns: &[ColumnSpec]) -> EngineResult<()> {
        self.inner.create_table(name, extra_columns).await
    }

    async fn add_column(&self, table: &str, name: &str, spec: &ColumnSpec) -> EngineResult<()> {
        self.inner.add_column(table, name, spec).await
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()> {
        self.inner.rename_column(table, old, new).await
    }

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()> {
        self.inner.drop_column(table, name).await
    }

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()> {
        self.inner.rename_table(old, new).await
    }

    async fn drop_table(&self, name: &str) -> EngineResult<()> {
        self.inner.drop_table(name).await
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        self.inner.table_exists(name).await
    }

    async fn recursive_query(
        &self,
        table: &str,
        columns: &[String],
        base_where: &str,
        recur_where: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>> {
        self.inner.recursive_query(table, columns, base_where, recur_where, args).await
    }

    fn clause(&self, template: &str, args: &[Value]) -> String {
        self.inner.clause(template, args)
    }

    async fn begin(&self) -> EngineResult<Arc<dyn SqlBackend>> {
        Err(EngineError::Transaction {
            message: "nested transactions are not supported".to_string(),
        })
    }

    async fn commit(&self) -> EngineResult<()> {
        self.snapshot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| EngineError::Transaction {
                message: "transaction already committed or rolled back".to_string(),
            })?;
        Ok(())
    }

    async fn rollback(&self) -> EngineResult<()> {
        let snapshot = self
            .snapshot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| EngineError::Transaction {
                message: "transaction already committed or rolled back".to_string(),
            })?;
        *self.inner.state.lock().unwrap() = snapshot;
        Ok(())
    }

    fn is_transaction(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnSpec;

    #[tokio::test]
    async fn insert_assigns_incrementing_ids() {
        let sql = MemorySql::new();
        sql.create_table("widgets", &[ColumnSpec::new("id", "serial")])
            .await
            .unwrap();
        let a = sql.insert("widgets", &Content::new()).await.unwrap();
        let b = sql.insert("widgets", &Content::new()).await.unwrap();
        assert_eq!(a.get("id").unwrap().as_i64(), Some(1));
        assert_eq!(b.get("id").unwrap().as_i64(), Some(2));
    }

    #[tokio::test]
    async fn fetch_matches_simple_equality() {
        let sql = MemorySql::new();
        sql.create_table("widgets", &[]).await.unwrap();
        sql.insert("widgets", &Content::new()).await.unwrap();
        let rows = sql
            .fetch("widgets", "id = %1", &[Value::from(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
