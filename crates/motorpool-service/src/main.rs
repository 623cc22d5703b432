use clap::{Parser, ValueEnum};
use motorpool_core::{EngineConfig, StorageConfig};
use motorpool_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "motorpoold", version, about = "Motorpool REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092", env = "MOTORPOOL_LISTEN")]
    listen: SocketAddr,
    /// Record and assignment backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "MOTORPOOL_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url; falls back to DATABASE_URL.
    #[arg(long, env = "MOTORPOOL_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "MOTORPOOL_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Attempts per assign/unassign before a transient store failure is returned.
    #[arg(long, default_value_t = 3, env = "MOTORPOOL_ASSIGN_MAX_ATTEMPTS")]
    assign_max_attempts: u32,
    /// Base backoff between assign/unassign attempts.
    #[arg(long, default_value_t = 25, env = "MOTORPOOL_ASSIGN_RETRY_BACKOFF_MS")]
    assign_retry_backoff_ms: u64,
    /// Insert the demo vehicle fleet on startup.
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, cli.pg_max_connections),
            None => StorageConfig::Memory,
        },
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "motorpool_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    info!(storage = storage.label(), "resolved storage backend");

    let config = ServiceConfig {
        storage,
        engine: EngineConfig {
            max_attempts: cli.assign_max_attempts,
            retry_backoff_ms: cli.assign_retry_backoff_ms,
        },
        seed_demo: cli.seed_demo,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("motorpool-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
