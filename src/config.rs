//! Configuration loading and schema definitions for suitey.
//!
//! This module provides types and functions for loading suitey configuration
//! from TOML files or strings. See [`schema`] for the available settings.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads suitey configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use suitey::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("suitey.toml"))?;
/// println!("Runtime: {}", config.runtime.kind());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from `path` if the file exists, defaults otherwise.
///
/// A file that exists but cannot be parsed is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

/// Loads suitey configuration from a TOML string.
///
/// # Example
///
/// ```
/// use suitey::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [suitey]
///     cpu_cores = 4
///
///     [runtime]
///     type = "cli"
/// "#)?;
///
/// assert_eq!(config.suitey.cpu_cores, Some(4));
/// assert_eq!(config.runtime.kind(), "cli");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[suitey]\ncpu_cores = 3").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.suitey.cpu_cores, Some(3));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(&dir.path().join("suitey.toml")).unwrap();
        assert!(config.suitey.cpu_cores.is_none());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[suitey\ncpu_cores = ").unwrap();

        let err = load_config_or_default(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
