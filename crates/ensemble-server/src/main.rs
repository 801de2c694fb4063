use clap::Parser;
use ensemble_server::assemble::{build_coordinator, builtin_registry, ServerConfig};
use ensemble_server::http;
use ensemble_server::service::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ensemble-server")]
struct Args {
    #[arg(long, env = "ENSEMBLE_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Checkpoint backend: memory, file:<dir>, postgres:<url>.
    #[arg(long, env = "ENSEMBLE_STORAGE", default_value = "memory")]
    storage: String,

    /// Path to a JSON file describing agents and topology.
    #[arg(long, env = "ENSEMBLE_CONFIG")]
    config: Option<PathBuf>,

    /// Append error details to user-visible tool failures.
    #[arg(long, env = "ENSEMBLE_DEV_ERRORS", default_value_t = false)]
    dev_errors: bool,
}

fn load_config(path: Option<&PathBuf>) -> ServerConfig {
    let Some(path) = path else {
        return ServerConfig::default();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read config {}: {e}", path.display());
            std::process::exit(2);
        }
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to parse config (JSON): {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref());

    let store = ensemble_store_adapters::store_from_config(&args.storage).await;
    if let Err(e) = store.setup().await {
        eprintln!("checkpoint backend setup failed: {e}");
        std::process::exit(2);
    }

    let registry = builtin_registry(args.dev_errors);
    let coordinator = match build_coordinator(&config, store.clone(), &registry) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("failed to assemble coordinator: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(
        topology = %coordinator.topology(),
        agents = config.agents.len(),
        storage = %args.storage,
        "ensemble server starting"
    );

    let app = axum::Router::new()
        .merge(http::health_routes())
        .merge(http::chat_routes())
        .merge(http::thread_routes())
        .with_state(AppState {
            coordinator: Arc::new(coordinator),
            store,
        });

    let listener = match tokio::net::TcpListener::bind(&args.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", args.http_addr);
            std::process::exit(2);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    {
        eprintln!("http server crashed: {e}");
        std::process::exit(1);
    }
}
