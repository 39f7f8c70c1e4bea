//! Service configuration.
//!
//! Everything is loaded once at startup and handed to each component as an
//! explicit value. Nothing below reads the process environment after
//! [`load_config`] returns.

mod loader;
mod static_config;

pub use loader::load_config;
pub use static_config::{
    Config, DropboxConfig, ExtractionConfig, LimitsConfig, ServerConfig, StorageConfig,
};
