//! Context tailor server
//!
//! Usage:
//!   context-tailor-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Path to configuration file (json, toml or yaml)
//!   --bind <ADDR>     Bind address (default: 127.0.0.1:8420)

use context_tailor::api::{create_router, AppState};
use context_tailor::config::TailorConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct ServerArgs {
    config_path: Option<PathBuf>,
    bind: Option<String>,
}

fn parse_args() -> ServerArgs {
    let mut parsed = ServerArgs {
        config_path: None,
        bind: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config_path = args.next().map(PathBuf::from),
            "--bind" => parsed.bind = args.next(),
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(2);
            }
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();

    let mut config = match &args.config_path {
        Some(path) => TailorConfig::from_file(path)?,
        None => TailorConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config.validate()?;

    let bind = config.server.bind.clone();
    let state = AppState::from_config(&config).await?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("context tailor server listening on {}", bind);
    axum::serve(listener, router).await?;

    Ok(())
}
