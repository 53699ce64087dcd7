// src/config.rs

//! Configuration loading utilities.
//!
//! The file is read once, environment overrides are layered on top, and the
//! result is handed to the pipeline by `Arc`.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load configuration from a TOML file and apply `SYNC_*` environment overrides.
///
/// Falls back to defaults if the file cannot be loaded.
pub fn load_config(path: &Path) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_overrides(|key| std::env::var(key).ok());
    config
}

/// [`load_config`], then reject unusable values.
pub fn load_and_validate(path: &Path) -> Result<Config> {
    let config = load_config(path);
    config.validate()?;
    Ok(config)
}
