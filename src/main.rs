use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use metaform::sql::connection::connect_with_config;
use metaform::sql::postgres::PgSql;
use metaform::{EngineConfig, EngineHandle, QueryOpts};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// A small operator front-end over the engine: bootstrap the meta-tables,
/// reload the model registry, and poke at data from a terminal. Anything
/// richer (an HTTP API, a REPL) is out of scope for this binary.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the `model`/`field` tables if missing and load the registry
    Init,

    /// Reload the model registry from the database
    Invoke,

    /// List rows of a model
    Rally {
        /// Model slug
        model: String,

        #[arg(long, default_value_t = 30)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(cli.verbose);

    let config = EngineConfig::from_env();
    let pool = connect_with_config(&config).await?;
    let handle: Arc<EngineHandle> = EngineHandle::new(Arc::new(PgSql::new(pool)));

    match cli.command {
        Commands::Init => {
            info!("bootstrapping engine");
            handle.init().await?;
            println!("engine initialized");
        }
        Commands::Invoke => {
            handle.init().await?;
            info!("reloading model registry");
            handle.invoke_models().await?;
            println!("registry reloaded");
        }
        Commands::Rally { model, limit, offset } => {
            handle.init().await?;
            let opts = QueryOpts {
                limit,
                offset,
                ..QueryOpts::default()
            };
            let rows = handle.rally(model.as_str(), opts).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

fn initialize_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };
    fmt().with_env_filter(filter).with_target(false).init();
}
