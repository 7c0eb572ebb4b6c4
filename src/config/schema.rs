//! Configuration schema definitions for suitey.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section is optional; an empty file (or no
//! file at all) yields the defaults.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── SuiteyConfig           - Scheduler settings (capacity, timeout, cleanup)
//! ├── RuntimeConfig          - Tagged enum selecting the container runtime
//! │   ├── Docker             - Docker Engine API (bollard)
//! │   └── Cli                - docker-compatible command line
//! └── ReportConfig           - Output format
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration structure for suitey.
///
/// # TOML Structure
///
/// ```toml
/// [suitey]
/// cpu_cores = 8
/// timeout_secs = 3600
///
/// [runtime]
/// type = "docker"
///
/// [report]
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scheduler settings.
    #[serde(default)]
    pub suitey: SuiteyConfig,

    /// Container runtime used to launch suites.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Report output settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core scheduler settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `cpu_cores` | None (detected host core count) |
/// | `timeout_secs` | None (no timeout) |
/// | `cleanup` | false |
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SuiteyConfig {
    /// CPU-core budget shared by all running suites.
    ///
    /// Overrides the detected host core count. Values below 1 are treated
    /// as 1.
    pub cpu_cores: Option<usize>,

    /// Caller-level timeout for a whole run, in seconds.
    ///
    /// When it fires, no further suites are admitted and the report lists
    /// every container launched so far.
    pub timeout_secs: Option<u64>,

    /// Remove the reported containers once the report has been printed.
    ///
    /// Off by default: the caller owns the containers after the report.
    #[serde(default)]
    pub cleanup: bool,
}

/// Container runtime configuration.
///
/// # Example
///
/// ```toml
/// # Docker Engine API over the local socket
/// [runtime]
/// type = "docker"
///
/// # Remote daemon
/// [runtime]
/// type = "docker"
/// docker_host = "tcp://10.0.0.5:2375"
///
/// # docker-compatible CLI
/// [runtime]
/// type = "cli"
/// binary = "podman"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeConfig {
    /// Docker Engine API.
    Docker(DockerRuntimeConfig),

    /// docker-compatible command line tool.
    Cli(CliRuntimeConfig),
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::Docker(DockerRuntimeConfig::default())
    }
}

impl RuntimeConfig {
    /// Short name of the selected runtime.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Docker(_) => "docker",
            Self::Cli(_) => "cli",
        }
    }
}

/// Configuration for the Docker Engine API runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerRuntimeConfig {
    /// Docker daemon URL.
    ///
    /// If not specified, uses the local Docker socket (honouring
    /// `DOCKER_HOST`).
    pub docker_host: Option<String>,

    /// Request timeout for daemon calls made over `docker_host`, in seconds.
    ///
    /// Default: 120
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,

    /// Turn each suite's `cpu_cores` into a hard container CPU limit.
    ///
    /// Default: false
    #[serde(default)]
    pub enforce_cpu_limits: bool,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            timeout_secs: default_docker_timeout(),
            enforce_cpu_limits: false,
        }
    }
}

fn default_docker_timeout() -> u64 {
    120
}

/// Configuration for the CLI runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliRuntimeConfig {
    /// Binary to invoke.
    ///
    /// Default: `docker`
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Pass `--cpus <cpu_cores>` to `run`.
    ///
    /// Default: false
    #[serde(default)]
    pub enforce_cpu_limits: bool,
}

impl Default for CliRuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            enforce_cpu_limits: false,
        }
    }
}

fn default_binary() -> String {
    "docker".to_string()
}

/// Report output settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Output format for the execution report.
    #[serde(default)]
    pub format: ReportFormat,
}

/// How the execution report is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Newline-separated `key=value` pairs.
    #[default]
    Text,

    /// Pretty-printed JSON including per-suite details.
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format '{}' (expected text or json)", other)),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.suitey.cpu_cores.is_none());
        assert!(config.suitey.timeout_secs.is_none());
        assert!(!config.suitey.cleanup);
        assert_eq!(config.runtime.kind(), "docker");
        assert_eq!(config.report.format, ReportFormat::Text);
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [suitey]
            cpu_cores = 6
            timeout_secs = 600
            cleanup = true

            [runtime]
            type = "cli"
            binary = "podman"
            enforce_cpu_limits = true

            [report]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.suitey.cpu_cores, Some(6));
        assert_eq!(config.suitey.timeout_secs, Some(600));
        assert!(config.suitey.cleanup);
        assert_eq!(config.report.format, ReportFormat::Json);
        match config.runtime {
            RuntimeConfig::Cli(cli) => {
                assert_eq!(cli.binary, "podman");
                assert!(cli.enforce_cpu_limits);
            }
            other => panic!("expected cli runtime, got {:?}", other),
        }
    }

    #[test]
    fn test_docker_runtime_defaults() {
        let config: Config = toml::from_str(
            r#"
            [runtime]
            type = "docker"
            docker_host = "tcp://127.0.0.1:2375"
            "#,
        )
        .unwrap();

        match config.runtime {
            RuntimeConfig::Docker(docker) => {
                assert_eq!(docker.docker_host.as_deref(), Some("tcp://127.0.0.1:2375"));
                assert_eq!(docker.timeout_secs, 120);
                assert!(!docker.enforce_cpu_limits);
            }
            other => panic!("expected docker runtime, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_runtime_type_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [runtime]
            type = "kubernetes"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_report_format_from_str() {
        assert_eq!("json".parse::<ReportFormat>(), Ok(ReportFormat::Json));
        assert_eq!("text".parse::<ReportFormat>(), Ok(ReportFormat::Text));
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
