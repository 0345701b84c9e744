//! The SQL collaborator (spec section 6): the engine's only external
//! dependency. `SqlBackend` is the narrow interface the core (model
//! registry, field kinds, CRUD coordinator) is written against; production
//! code drives it through [`postgres::PgSql`], tests through
//! [`memory::MemorySql`].

pub mod connection;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::{ColumnSpec, Content};

#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Run an arbitrary query, positional placeholders (`%1`, `%2`, ...) already resolved.
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>>;

    /// `SELECT * FROM <table> WHERE <where_template>`.
    async fn fetch(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<Vec<Content>>;

    /// `SELECT * FROM <table> WHERE id = <id>`, at most one row.
    async fn choose(&self, table: &str, id: i32) -> EngineResult<Option<Content>>;

    /// `INSERT INTO <table> (...) VALUES (...) RETURNING *`.
    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content>;

    /// `UPDATE <table> SET ... WHERE <where_template>`, returns affected row count.
    async fn update(&self, table: &str, values: &Content, where_template: &str, args: &[Value]) -> EngineResult<u64>;

    /// `DELETE FROM <table> WHERE <where_template>`, returns affected row count.
    async fn delete(&self, table: &str, where_template: &str, args: &[Value]) -> EngineResult<u64>;

    /// `CREATE TABLE <name> (<extra_columns>...)`.
    async fn create_table(&self, name: &str, extra_columns: &[ColumnSpec]) -> EngineResult<()>;

    async fn add_column(&self, table: &str, name: &str, spec: &ColumnSpec) -> EngineResult<()>;

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()>;

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()>;

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()>;

    /// Must be tolerant if the table is already absent.
    async fn drop_table(&self, name: &str) -> EngineResult<()>;

    async fn table_exists(&self, name: &str) -> EngineResult<bool>;

    /// A recursive CTE over `table`, joining each row to its parent chain or
    /// descendant tree via `parent_id` depending on `recur_where`.
    async fn recursive_query(
        &self,
        table: &str,
        columns: &[String],
        base_where: &str,
        recur_where: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>>;

    /// Resolve a `%1`/`%2`-templated fragment into a parameter-bound SQL
    /// fragment, escaping values safely.
    fn clause(&self, template: &str, args: &[Value]) -> String;

    /// Open a transaction scope: every call through the returned backend
    /// runs against the same underlying transaction (or, for the in-memory
    /// backend, the same shared state under a rollback snapshot) until
    /// `commit` or `rollback` resolves it.
    async fn begin(&self) -> EngineResult<Arc<dyn SqlBackend>>;

    /// Commit a transaction scope obtained from `begin`. Backends that are
    /// not themselves a transaction scope reject this.
    async fn commit(&self) -> EngineResult<()> {
        Err(EngineError::Transaction {
            message: "commit called on a backend that is not a transaction scope".to_string(),
        })
    }

    /// Roll back a transaction scope obtained from `begin`, undoing every
    /// write issued through it. Backends that are not themselves a
    /// transaction scope reject this.
    async fn rollback(&self) -> EngineResult<()> {
        Err(EngineError::Transaction {
            message: "rollback called on a backend that is not a transaction scope".to_string(),
        })
    }

    /// True for a backend returned by `begin`, so callers that recurse
    /// through an already-open transaction scope know not to open a nested
    /// one.
    fn is_transaction(&self) -> bool {
        false
    }
}
