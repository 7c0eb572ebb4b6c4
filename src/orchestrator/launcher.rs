//! Starting one suite's container.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::runtime::{ContainerId, ContainerRuntime, RunRequest, RuntimeResult};
use crate::suite::SuiteConfig;

/// Label carrying the suite id on every launched container.
pub const SUITE_ID_LABEL: &str = "suitey.suite_id";

const NAME_PREFIX: &str = "suitey";

/// Turns admitted suites into running containers.
///
/// The launcher does no admission control: callers must hold a core
/// reservation before calling [`launch`](Self::launch).
pub struct Launcher<R: ?Sized> {
    runtime: Arc<R>,
}

impl<R: ?Sized> Clone for Launcher<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<R: ContainerRuntime + ?Sized> Launcher<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Builds the run request for a suite.
    pub fn request_for(suite: &SuiteConfig) -> RunRequest {
        RunRequest::new(
            container_name(&suite.suite_id),
            &suite.test_image,
            &suite.test_command,
        )
        .working_dir(&suite.working_directory)
        .cpu_cores(suite.cpu_cores)
        .label(SUITE_ID_LABEL, &suite.suite_id)
    }

    /// Starts the suite's container and returns its id.
    pub async fn launch(&self, suite: &SuiteConfig) -> RuntimeResult<ContainerId> {
        let request = Self::request_for(suite);
        debug!(
            "Launching suite {} as {} ({} on {})",
            suite.suite_id, request.name, suite.test_command, suite.test_image
        );

        match self.runtime.run(&request).await {
            Ok(id) => {
                info!("Suite {} launched in container {}", suite.suite_id, id.short());
                Ok(id)
            }
            Err(e) => {
                warn!("Failed to launch suite {}: {}", suite.suite_id, e);
                Err(e)
            }
        }
    }

    /// Blocks until the container exits and returns its exit code.
    pub async fn wait(&self, container_id: &ContainerId) -> RuntimeResult<i64> {
        self.runtime.wait(container_id).await
    }
}

/// Container name for a suite: `suitey-<sanitized id>-<8 hex chars>`.
///
/// Docker names allow `[a-zA-Z0-9][a-zA-Z0-9_.-]*`; anything else in the
/// suite id becomes `-`. The random suffix keeps names unique across runs.
fn container_name(suite_id: &str) -> String {
    let sanitized: String = suite_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(48)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", NAME_PREFIX, sanitized, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_sanitized() {
        let name = container_name("api tests/v2:smoke");
        assert!(name.starts_with("suitey-api-tests-v2-smoke-"), "{name}");
        assert_eq!(name.len(), "suitey-api-tests-v2-smoke-".len() + 8);
    }

    #[test]
    fn test_container_names_unique() {
        assert_ne!(container_name("unit"), container_name("unit"));
    }

    #[test]
    fn test_request_for_suite() {
        let suite = SuiteConfig::new("unit", "make test", "alpine:3.20", "/app", 2);
        let request = Launcher::<dyn ContainerRuntime>::request_for(&suite);

        assert!(request.name.starts_with("suitey-unit-"));
        assert_eq!(request.image, "alpine:3.20");
        assert_eq!(request.command, "make test");
        assert_eq!(request.working_dir.as_deref(), Some("/app"));
        assert_eq!(request.cpu_cores, 2);
        assert_eq!(
            request.labels,
            vec![(SUITE_ID_LABEL.to_string(), "unit".to_string())]
        );
    }
}
