//! Configuration loading from files and environment variables.

use config::{Config as ConfigBuilder, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::static_config::Config;

/// Bare variable names accepted for credentials, mapped to their config keys.
///
/// These sit underneath the `DOCRELAY__...` variables and the config file, so
/// either of those wins when both are present.
const CREDENTIAL_VARS: &[(&str, &str)] = &[
    ("CLIENT_ID", "extraction.client_id"),
    ("CLIENT_SECRET", "extraction.client_secret"),
    ("DROPBOX_TOKEN", "dropbox.token"),
];

/// Load configuration from `.env`, `config.toml` and `DOCRELAY__*` variables
pub fn load_config() -> ServiceResult<Config> {
    // A missing .env is the normal case in deployment
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let mut builder = ConfigBuilder::builder();
    for (key, value) in credential_defaults(|name| std::env::var(name).ok()) {
        builder = builder
            .set_default(key, value)
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to apply {}: {}", key, e),
            })?;
    }

    builder
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DOCRELAY")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}

/// Resolve the bare credential variables through `lookup`, skipping blanks.
fn credential_defaults(
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(&'static str, String)> {
    CREDENTIAL_VARS
        .iter()
        .filter_map(|(var, key)| {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (*key, value))
        })
        .collect()
}
