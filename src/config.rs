use std::path::PathBuf;
use tracing::info;

/// Server configuration, loaded from environment variables. Debug builds
/// also read a `.env` file first.
#[derive(Clone, Debug)]
pub struct Config {
    /// Where extracted books live and are served from.
    pub library_dir: PathBuf,
    /// Scratch directory for uploaded archives awaiting import.
    pub upload_dir: PathBuf,
    /// Static app shell (index.html and friends).
    pub app_dir: PathBuf,
    /// The shared user category file.
    pub metadata_file: PathBuf,
    pub bind_addr: String,
}

impl Config {
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env file");
        }

        Self::from_env()
    }

    fn from_env() -> Self {
        let library_dir = env_path("SHELF_LIBRARY_DIR", "library");
        let upload_dir = env_path("SHELF_UPLOAD_DIR", "temp_uploads");
        let app_dir = env_path("SHELF_APP_DIR", ".");
        let metadata_file = env_path("SHELF_USER_METADATA", "user_metadata.json");
        let bind_addr =
            std::env::var("SHELF_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        info!(
            "Config: library={} uploads={} bind={}",
            library_dir.display(),
            upload_dir.display(),
            bind_addr
        );

        Config {
            library_dir,
            upload_dir,
            app_dir,
            metadata_file,
            bind_addr,
        }
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
