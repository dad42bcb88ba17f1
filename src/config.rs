use std::path::PathBuf;

use crate::engine::EngineConfig;

/// Process-level settings for the command line runner.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    /// Daily-rotated log file under `log_dir` in addition to stderr.
    pub file_logs: bool,
    pub log_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_dir = std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"));

        let catalog_path = std::env::var("LEARNPATH_CATALOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            log_level,
            file_logs,
            log_dir,
            catalog_path,
            engine: EngineConfig::from_env(),
        }
    }
}
