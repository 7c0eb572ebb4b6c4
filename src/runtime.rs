//! Container runtime abstraction.
//!
//! The scheduler never talks to a container engine directly. Everything it
//! needs from one goes through the narrow [`ContainerRuntime`] trait:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ContainerRuntime                         │
//! │                                                              │
//! │  ping()                  is the engine reachable at all?     │
//! │  run(RunRequest) ──────► ContainerId   (detached start)      │
//! │  wait(ContainerId) ────► exit code     (blocks until exit)   │
//! │  remove(ContainerId)     forced removal, used for cleanup    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Runtimes
//!
//! | Runtime | Module | Description |
//! |---------|--------|-------------|
//! | Docker | [`docker`] | Docker Engine API over the local socket (bollard) |
//! | CLI | [`cli`] | Shells out to a docker-compatible binary (`docker`, `podman`) |
//!
//! # Error Handling
//!
//! Errors are split by blast radius. [`RuntimeError::Unavailable`] means the
//! engine cannot be used at all and fails the whole run; every other variant
//! only fails the suite that triggered it.

pub mod cli;
pub mod docker;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Minimum length of a runtime-assigned container identifier.
pub const MIN_CONTAINER_ID_LEN: usize = 12;

/// Errors returned by a [`ContainerRuntime`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime cannot be reached (daemon down, socket missing, binary
    /// not installed).
    ///
    /// This is the only systemic error: no suite can launch while it holds.
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    /// The requested image does not exist or cannot be pulled.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// The runtime refused the image/command/working-directory combination.
    #[error("Runtime rejected the request: {0}")]
    Rejected(String),

    /// The runtime answered with something that is not a container id.
    #[error("Invalid container id: '{0}'")]
    InvalidContainerId(String),

    /// I/O error while talking to the runtime.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Runtime-specific error not covered by other variants.
    #[error("Runtime error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Returns `true` if the error means the runtime itself is unusable,
    /// as opposed to a problem with one particular suite.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A runtime-assigned container identifier.
///
/// Always a lowercase hexadecimal string of at least
/// [`MIN_CONTAINER_ID_LEN`] characters.
///
/// # Example
///
/// ```
/// use suitey::runtime::ContainerId;
///
/// let id = ContainerId::parse("3f4e2a1b9c8d7e6f\n").unwrap();
/// assert_eq!(id.as_str(), "3f4e2a1b9c8d7e6f");
///
/// assert!(ContainerId::parse("ABCDEF123456").is_err());
/// assert!(ContainerId::parse("abc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Validates a raw identifier as returned by a runtime.
    ///
    /// Surrounding whitespace (e.g. the trailing newline of `docker run -d`)
    /// is stripped first.
    pub fn parse(raw: &str) -> RuntimeResult<Self> {
        let id = raw.trim();
        let valid = id.len() >= MIN_CONTAINER_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(RuntimeError::InvalidContainerId(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve characters, the form `docker ps` prints.
    pub fn short(&self) -> &str {
        &self.0[..MIN_CONTAINER_ID_LEN]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A request to start one detached container.
///
/// Built by the launcher from a suite descriptor; runtimes translate it into
/// their own API.
///
/// # Example
///
/// ```
/// use suitey::runtime::RunRequest;
///
/// let request = RunRequest::new("suitey-unit-1a2b3c4d", "rust:1.85", "cargo test")
///     .working_dir("/workspace")
///     .cpu_cores(2)
///     .label("suitey.suite_id", "unit");
///
/// assert_eq!(request.shell_command(), vec!["/bin/sh", "-c", "cargo test"]);
/// assert_eq!(request.labels.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Opaque command string, executed via `/bin/sh -c`.
    pub command: String,

    /// Working directory inside the container.
    pub working_dir: Option<String>,

    /// CPU cores reserved for this container.
    ///
    /// Runtimes only turn this into a hard limit when configured to.
    pub cpu_cores: usize,

    /// Labels attached to the container.
    pub labels: Vec<(String, String)>,
}

impl RunRequest {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: command.into(),
            working_dir: None,
            cpu_cores: 1,
            labels: Vec::new(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn cpu_cores(mut self, cores: usize) -> Self {
        self.cpu_cores = cores;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// The container entrypoint: the command wrapped in `/bin/sh -c`.
    pub fn shell_command(&self) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), self.command.clone()]
    }
}

/// Client interface to a container runtime.
///
/// Implementations must be `Send + Sync`: one runtime instance is shared by
/// every concurrent launch task of a run.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks that the runtime is reachable.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Unavailable` - the runtime cannot be used at all
    async fn ping(&self) -> RuntimeResult<()>;

    /// Starts a detached container and returns its identifier.
    ///
    /// May block for as long as the runtime needs to create and start the
    /// container, but must not wait for the container to exit.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::ImageNotFound` - the image cannot be resolved
    /// - `RuntimeError::Rejected` - the runtime refused the request
    /// - `RuntimeError::Unavailable` - the runtime cannot be reached
    async fn run(&self, request: &RunRequest) -> RuntimeResult<ContainerId>;

    /// Waits for a container to exit and returns its exit code.
    ///
    /// A non-zero exit code is not an error.
    async fn wait(&self, container_id: &ContainerId) -> RuntimeResult<i64>;

    /// Removes a container, killing it first if it is still running.
    async fn remove(&self, container_id: &ContainerId) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_accepts_full_docker_id() {
        let raw = "9b2f0c3d4e5f60718293a4b5c6d7e8f9a0b1c2d3e4f5061728394a5b6c7d8e9f";
        let id = ContainerId::parse(raw).unwrap();
        assert_eq!(id.as_str(), raw);
        assert_eq!(id.short(), "9b2f0c3d4e5f");
    }

    #[test]
    fn test_container_id_rejects_bad_input() {
        for raw in ["", "abc123", "ABCDEF0123456", "0123456789ag", "0123 456789ab"] {
            assert!(
                matches!(ContainerId::parse(raw), Err(RuntimeError::InvalidContainerId(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_container_id_trims_whitespace() {
        let id = ContainerId::parse("  0123456789abcdef\n").unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef");
    }

    #[test]
    fn test_only_unavailable_is_systemic() {
        assert!(RuntimeError::Unavailable("daemon down".into()).is_systemic());
        assert!(!RuntimeError::ImageNotFound("nope:latest".into()).is_systemic());
        assert!(!RuntimeError::Rejected("bad workdir".into()).is_systemic());
        assert!(!RuntimeError::InvalidContainerId("xyz".into()).is_systemic());
    }

    #[test]
    fn test_run_request_defaults() {
        let request = RunRequest::new("n", "alpine", "true");
        assert_eq!(request.cpu_cores, 1);
        assert!(request.working_dir.is_none());
        assert!(request.labels.is_empty());
    }
}
