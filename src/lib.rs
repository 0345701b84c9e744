//! A dynamic, self-describing relational data model engine.
//!
//! Models and fields are ordinary rows (in the `model`/`field` tables) that
//! describe physical tables and columns at runtime. Reading or writing a
//! row of any model goes through the same hook-driven coordinator in
//! [`crud`], dispatched by [`field`]'s closed set of field kinds and
//! [`hooks`]'s lifecycle dispatcher. See [`handle::EngineHandle`] for the
//! entry point.

pub mod bootstrap;
pub mod config;
pub mod crud;
pub mod error;
pub mod field;
pub mod handle;
pub mod hooks;
pub mod model;
pub mod registry;
pub mod sql;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use handle::EngineHandle;
pub use registry::SlugOrId;
pub use types::{Content, QueryOpts, ReadOpts};
