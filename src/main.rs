use shelf::api::{self, ApiState};
use shelf::config::Config;
use shelf::import::ImportTracker;
use shelf::library::{CategoryStore, LibraryManager};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "shelf=info,tower_http=warn".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config = Config::load();
    if let Err(e) = run(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.library_dir)?;
    std::fs::create_dir_all(&config.upload_dir)?;

    let categories = CategoryStore::new(config.metadata_file.clone());
    let library = LibraryManager::new(config.library_dir.clone(), categories.clone());
    let tracker = ImportTracker::start(config.library_dir.clone(), categories.clone());

    let state = ApiState {
        tracker,
        library,
        categories,
        library_root: config.library_dir.clone(),
        upload_dir: config.upload_dir.clone(),
    };
    let router = api::create_router(state, config.app_dir.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
