use clap::Parser;
use parley_core::ParleyConfig;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use parley_server::subsystems::embedder;
use parley_server::{server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "parley.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match ParleyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match parley_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match parley_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match parley_core::db::check_pgvector(&pool).await {
            Ok(v) => println!("✅ pgvector version: {}", v),
            Err(e) => {
                println!("❌ pgvector check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Parley DB health check passed");
        return Ok(());
    }

    // Build the embedding backend once; a backend whose output dimension does
    // not match the configured indexes would corrupt both collections.
    let backend = match embedder::create_backend_from_config(&config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to create embedding backend: {}", e);
            std::process::exit(1);
        }
    };
    let dims = backend.dimensions();
    for (name, expected) in [
        ("conversation", config.index.conversation_dimensions as usize),
        ("message", config.index.message_dimensions as usize),
    ] {
        if dims != expected {
            eprintln!(
                "Embedding backend '{}' produces {}-dim vectors but the {} index expects {}",
                backend.name(),
                dims,
                name,
                expected
            );
            std::process::exit(1);
        }
    }

    let state = Arc::new(AppState::new(pool, config.clone(), Arc::from(backend)));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn HTTP REST API server if enabled
    if config.http.enabled {
        let http_state = Arc::clone(&state);
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = parley_server::http::start_http_server(http_state, http_shutdown).await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
