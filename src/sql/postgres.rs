//! Concrete `SqlBackend` over a live Postgres connection pool, grounded on
//! the teacher's `catalog`/`render::sql` modules for identifier quoting and
//! DDL emission, trading its whole-file `raw_sql` execution for row-level
//! DML built with `sqlx::query`/`sqlx::Row`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, PgPool, Row, TypeInfo, Transaction, postgres::PgRow};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::types::{ColumnSpec, Content, resolve_timestamp_sentinel};

use super::SqlBackend;

pub struct PgSql {
    pool: PgPool,
}

impl PgSql {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Quote a Postgres identifier, doubling embedded quotes. Mirrors the
/// teacher's `render::quote_ident`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_ddl(spec: &ColumnSpec) -> String {
    let mut sql = format!("{} {}", quote_ident(&spec.name), spec.sql_type);
    for extra in &spec.extra {
        sql.push(' ');
        sql.push_str(extra);
    }
    sql
}

/// Decode one Postgres row into a content map, covering the scalar types
/// the field kinds in this crate ever write: integers, text, booleans and
/// timestamps.
fn row_to_content(row: &PgRow) -> Content {
    let mut content = Content::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();
        let value = match type_name {
            "INT2" | "INT4" => row
                .try_get::<Option<i32>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(|v| Value::from(v))
                .unwrap_or(Value::Null),
            "INT8" => row
                .try_get::<Option<i64>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<Option<bool>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "TIMESTAMP" | "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(|v| Value::from(v.to_rfc3339()))
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>, _>(column.ordinal())
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        content.insert(name, value);
    }
    content
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match resolve_timestamp_sentinel(value) {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl SqlBackend for PgSql {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_value(q, arg);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_content).collect())
    }

    async fn fetch(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let clause = self.clause(where_template, args);
        let sql = format!("SELECT * FROM {} WHERE {}", quote_ident(table), clause);
        self.query(&sql, &[]).await
    }

    async fn choose(&self, table: &str, id: i32) -> EngineResult<Option<Content>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", quote_ident(table));
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_content))
    }

    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content> {
        let keys: Vec<&String> = values.keys().collect();
        let columns = keys
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=keys.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote_ident(table),
            columns,
            placeholders
        );
        let mut q = sqlx::query(&sql);
        for k in &keys {
            q = bind_value(q, values.get(*k).unwrap());
        }
        let row = q.fetch_one(&self.pool).await?;
        Ok(row_to_content(&row))
    }

    async fn update(&self, table: &str, values: &Content, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let keys: Vec<&String> = values.keys().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let set_clause = keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = ${}", quote_ident(k), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = self.clause(where_template, args);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            set_clause,
            where_clause
        );
        let mut q = sqlx::query(&sql);
        for k in &keys {
            q = bind_value(q, values.get(*k).unwrap());
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let where_clause = self.clause(where_template, args);
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), where_clause);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn create_table(&self, name: &str, extra_columns: &[ColumnSpec]) -> EngineResult<()> {
        let columns = extra_columns
            .iter()
            .map(column_ddl)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("CREATE TABLE {} ({})", quote_ident(name), columns);
        info!(table = name, "creating table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, _name: &str, spec: &ColumnSpec) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_ddl(spec)
        );
        info!(table, column = %spec.name, "adding column");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(old),
            quote_ident(new)
        );
        info!(table, old, new, "renaming column");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
            quote_ident(table),
            quote_ident(name)
        );
        info!(table, column = name, "dropping column");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(old),
            quote_ident(new)
        );
        info!(old, new, "renaming table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> EngineResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        info!(table = name, "dropping table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1) AS exists",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("exists")?)
    }

    async fn recursive_query(
        &self,
        table: &str,
        columns: &[String],
        base_where: &str,
        recur_where: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>> {
        let cols = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        };
        let base_clause = self.clause(base_where, args);
        let recur_clause = self.clause(recur_where, args);
        let table_q = quote_ident(table);
        let sql = format!(
            "WITH RECURSIVE walk AS (
                SELECT {cols} FROM {table_q} WHERE {base_clause}
                UNION ALL
                SELECT t.* FROM {table_q} t JOIN walk w ON {recur_clause}
            ) SELECT * FROM walk",
            cols = cols,
            table_q = table_q,
            base_clause = base_clause,
            recur_clause = recur_clause,
        );
        self.query(&sql, &[]).await
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
                other => format!("'{}'", other.to_string().replace('\'', "''")),
            };
            out = out.replace(&placeholder, &literal);
        }
        out
    }

    async fn begin(&self) -> EngineResult<Arc<dyn SqlBackend>> {
        let tx = self.pool.clone().begin().await?;
        Ok(Arc::new(PgTx {
            tx: AsyncMutex::new(Some(tx)),
        }))
    }
}

/// A `SqlBackend` scoped to one open `sqlx::Transaction`, grounded on the
/// teacher's `section_executor::apply_migration`, which threads a single
/// `pool.begin()`/`tx.commit()`/`tx.rollback()` transaction through a whole
/// migration run. Every CRUD call that opens one (`crud::create`/`update`/
/// `destroy`) runs its DML, and any DDL a bootstrap hook issues, against
/// this same transaction, so a hook failure rolls the whole call back.
struct PgTx {
    tx: AsyncMutex<Option<Transaction<'static, sqlx::Postgres>>>,
}

impl PgTx {
    fn closed_err() -> EngineError {
        EngineError::Transaction {
            message: "transaction already committed or rolled back".to_string(),
        }
    }
}

#[async_trait]
impl SqlBackend for PgTx {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_value(q, arg);
        }
        let rows = q.fetch_all(&mut **tx).await?;
        Ok(rows.iter().map(row_to_content).collect())
    }

    async fn fetch(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let clause = self.clause(where_template, args);
        let sql = format!("SELECT * FROM {} WHERE {}", quote_ident(table), clause);
        self.query(&sql, &[]).await
    }

    async fn choose(&self, table: &str, id: i32) -> EngineResult<Option<Content>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let sql = format!("SELECT * FROM {} WHERE id = $1", quote_ident(table));
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
        Ok(row.as_ref().map(row_to_content))
    }

    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let keys: Vec<&String> = values.keys().collect();
        let columns = keys
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=keys.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote_ident(table),
            columns,
            placeholders
        );
        let mut q = sqlx::query(&sql);
        for k in &keys {
            q = bind_value(q, values.get(*k).unwrap());
        }
        let row = q.fetch_one(&mut **tx).await?;
        Ok(row_to_content(&row))
    }

    async fn update(&self, table: &str, values: &Content, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let keys: Vec<&String> = values.keys().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let set_clause = keys
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = ${}", quote_ident(k), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = self.clause(where_template, args);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            set_clause,
            where_clause
        );
        let mut q = sqlx::query(&sql);
        for k in &keys {
            q = bind_value(q, values.get(*k).unwrap());
        }
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let result = q.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<u64> {
        let where_clause = self.clause(where_template, args);
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), where_clause);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let result = sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn create_table(&self, name: &str, extra_columns: &[ColumnSpec]) -> EngineResult<()> {
        let columns = extra_columns
            .iter()
            .map(column_ddl)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("CREATE TABLE {} ({})", quote_ident(name), columns);
        info!(table = name, "creating table");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, _name: &str, spec: &ColumnSpec) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_ddl(spec)
        );
        info!(table, column = %spec.name, "adding column");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(old),
            quote_ident(new)
        );
        info!(table, old, new, "renaming column");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
            quote_ident(table),
            quote_ident(name)
        );
        info!(table, column = name, "dropping column");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(old),
            quote_ident(new)
        );
        info!(old, new, "renaming table");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> EngineResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        info!(table = name, "dropping table");
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed_err)?;
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1) AS exists",
        )
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.try_get::<bool, _>("exists")?)
    }

    async fn recursive_query(
        &self,
        table: &str,
        columns: &[String],
        base_where: &str,
        recur_where: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>> {
        let cols = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        };
        let base_clause = self.clause(base_where, args);
        let recur_clause = self.clause(recur_where, args);
        let table_q = quote_ident(table);
        let sql = format!(
            "WITH RECURSIVE walk AS (
                SELECT {cols} FROM {table_q} WHERE {base_clause}
                UNION ALL
                SELECT t.* FROM {table_q} t JOIN walk w ON {recur_clause}
            ) SELECT * FROM walk",
            cols = cols,
            table_q = table_q,
            base_clause = base_clause,
            recur_clause = recur_clause,
        );
        self.query(&sql, &[]).await
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
                other => format!("'{}'", other.to_string().replace('\'', "''")),
            };
            out = out.replace(&placeholder, &literal);
        }
        out
    }

    async fn begin(&self) -> EngineResult<Arc<dyn SqlBackend>> {
        Err(EngineError::Transaction {
            message: "nested transactions are not supported".to_string(),
        })
    }

    async fn commit(&self) -> EngineResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.take().ok_or_else(Self::closed_err)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> EngineResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.take().ok_or_else(Self::closed_err)?;
        tx.rollback().await?;
        Ok(())
    }

    fn is_transaction(&self) -> bool {
        true
    }
}
