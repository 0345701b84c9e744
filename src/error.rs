//! Error taxonomy for the engine's public API (spec section 7).
//!
//! `ValueCoercionError` deliberately has no variant here: it never escapes
//! `Field::update_values`, which drops the offending key and logs a warning
//! instead of failing the call.

use thiserror::Error;

use crate::hooks::Timing;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no model registered for `{slug_or_id}`")]
    MissingModel { slug_or_id: String },

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("reciprocal field setup failed: {message}")]
    ReciprocalSetup { message: String },

    #[error("transaction error: {message}")]
    Transaction { message: String },

    #[error("hook `{slug}` failed at {timing:?}: {message}")]
    Hook {
        slug: String,
        timing: Timing,
        message: String,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
