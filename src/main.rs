use assembla_trigger::dispatch::TriggerService;
use assembla_trigger::error::TriggerError;
use assembla_trigger::logging::{FileLogger, setup_logging};
use assembla_trigger::registry::TriggerRegistry;
use assembla_trigger::scheduler::LocalScheduler;
use assembla_trigger::{AppState, api, connect_repository_api, load_config};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{error, info};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "trigger_config.toml";

async fn run() -> Result<(), TriggerError> {
    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path = PathBuf::from(
        std::env::var("TRIGGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = load_config(&config_path)?;
    info!("Using config at {:?}", config_path);

    let api = connect_repository_api(&config.assembla).await?;
    let registry = Arc::new(TriggerRegistry::new());
    let scheduler = Arc::new(LocalScheduler::new(&config.jobs, config.max_builds));
    registry.sync(&[], &config.jobs);

    let service = TriggerService::new(
        registry,
        api,
        scheduler.clone(),
        scheduler.clone(),
    );

    let state = Arc::new(AppState {
        config: RwLock::new(config),
        config_path,
        service,
        scheduler,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let app = api::router(state);

    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let file_logger = std::env::var("LOG_DIR").ok().map(|dir| FileLogger::new(dir.into()));
    let _guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
