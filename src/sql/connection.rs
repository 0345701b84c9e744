//! Retrying Postgres connection helper, adapted from the teacher's
//! `db::connection` module (same retry/backoff shape, logged through
//! `tracing` instead of printed).

use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::EngineConfig;

/// Connect to Postgres with retry logic, tuned for startup races against a
/// database container that hasn't finished accepting connections yet.
pub async fn connect_with_retry(url: &str) -> anyhow::Result<PgPool> {
    connect_with_retry_config(url, 5, Duration::from_millis(200)).await
}

pub async fn connect_with_config(config: &EngineConfig) -> anyhow::Result<PgPool> {
    connect_with_retry_config(&config.database_url, config.max_retries, config.retry_delay).await
}

async fn connect_with_retry_config(
    url: &str,
    max_retries: u32,
    retry_delay: Duration,
) -> anyhow::Result<PgPool> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match PgPool::connect(url).await {
            Ok(pool) => {
                if attempt > 0 {
                    info!(attempt, "connected to database after retrying");
                } else {
                    info!("connected to database");
                }
                return Ok(pool);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < max_retries {
                    if attempt == 0 {
                        warn!("database not ready, retrying...");
                    }
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to connect to database after {} attempts: {}",
        max_retries + 1,
        last_error.unwrap()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gives_up_after_configured_retries() {
        let result =
            connect_with_retry_config("postgres://127.0.0.1:1/does_not_exist", 1, Duration::from_millis(1))
                .await;
        assert!(result.is_err());
    }
}
