//! CLI output: error mapping from domain errors to the CLI surface.

use crate::config::global_config_path;
use crate::error::ApiError;

/// Map a domain error to the message printed on stderr.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::ProviderNotConfigured(_) => {
            let hint = global_config_path()
                .map(|path| format!("define [providers.<name>] in {} or config/config.toml", path.display()))
                .unwrap_or_else(|| "define [providers.<name>] in config/config.toml".to_string());
            format!("error: {}\nhint: {}", e, hint)
        }
        ApiError::JobNotFound(job) => {
            format!("error: {}\nhint: run `textbatch batch --job-name {}` first", e, job)
        }
        _ => format!("error: {}", e),
    }
}
