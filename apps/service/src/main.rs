use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::web;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use vigil_service::config::Config;
use vigil_service::database::{DatabaseImpl, initialize_database};
use vigil_service::engine::Engine;
use vigil_service::http::bind_server;
use vigil_service::pool::open_pool;
use vigil_service::retention::{RetentionCleanup, RetentionPolicy};
use vigil_service::seed::SeedFile;

#[derive(Parser, Debug)]
#[command(version, about = "Self-hosted uptime monitor", long_about = None)]
struct Args {
    /// Config file, created with defaults when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overrides `[database].path`
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// HTTP port, overrides `[http].port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_config(args.config.as_ref())?;
    if let Some(path) = args.database {
        config.database.path = path;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    if args.print_config {
        println!("{config}");
        return Ok(());
    }

    let format = match config.logging.format.parse() {
        Ok(format) => Some(format),
        Err(e) => {
            eprintln!("{e}, using RUST_LOG_FORMAT");
            None
        }
    };
    logger::init(&config.logging.level, format);

    if let Err(e) = run(config).await {
        error!("Fatal: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let pool = open_pool(&config.database.path, config.database.max_connections).await?;
    {
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("database pool: {e}"))?;
        initialize_database(&conn).await?;
    }
    info!(path = %config.database.path.display(), "Database ready");
    let db = Arc::new(DatabaseImpl::new_from_pool(pool));

    if let Some(seed) = &config.seed {
        SeedFile::load(seed)?.apply(db.as_ref()).await?;
    }

    let engine = web::Data::new(Engine::new(db.clone(), config.engine.clone()));
    engine.start_all().await?;

    let retention = RetentionCleanup::new(db, RetentionPolicy::from(&config.retention)).start_periodic_cleanup();

    let server = if config.http.enabled {
        let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
        let server = bind_server(addr, engine.clone())?;
        let handle = server.handle();
        let task = tokio::spawn(server);
        Some((handle, task))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down");

    if let Some((handle, task)) = server {
        handle.stop(true).await;
        if let Ok(Err(e)) = task.await {
            error!("HTTP server error: {}", e);
        }
    }
    retention.abort();
    engine.stop_all().await;

    Ok(())
}
