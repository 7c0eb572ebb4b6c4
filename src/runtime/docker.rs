//! Docker Engine API runtime.
//!
//! Talks to the Docker daemon through bollard, over the local socket by
//! default or an explicit `docker_host`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{ContainerId, ContainerRuntime, RunRequest, RuntimeError, RuntimeResult};
use crate::config::DockerRuntimeConfig;

const NANO_CPUS_PER_CORE: i64 = 1_000_000_000;

/// Docker Engine API runtime.
pub struct DockerRuntime {
    /// The client, or why it could not be built (e.g. a missing socket).
    docker: Result<Docker, String>,
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    /// Creates a client for the configured daemon.
    ///
    /// Never fails: if the client cannot be built, every operation returns
    /// [`RuntimeError::Unavailable`] so the run still produces a report.
    pub fn new(config: DockerRuntimeConfig) -> Self {
        let docker = connect(&config).map_err(|e| {
            warn!("Cannot connect to Docker: {}", e);
            e.to_string()
        });

        Self { docker, config }
    }

    fn client(&self) -> RuntimeResult<&Docker> {
        self.docker
            .as_ref()
            .map_err(|e| RuntimeError::Unavailable(e.clone()))
    }

    fn container_config(&self, request: &RunRequest) -> ContainerConfig<String> {
        let mut host_config = bollard::models::HostConfig::default();
        if self.config.enforce_cpu_limits {
            let cores = i64::try_from(request.cpu_cores).unwrap_or(i64::MAX);
            host_config.nano_cpus = Some(cores.saturating_mul(NANO_CPUS_PER_CORE));
        }

        let labels: HashMap<String, String> = request.labels.iter().cloned().collect();

        ContainerConfig {
            image: Some(request.image.clone()),
            cmd: Some(request.shell_command()),
            working_dir: request.working_dir.clone(),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Pulls `image`, draining the progress stream.
    async fn pull_image(&self, docker: &Docker, image: &str) -> RuntimeResult<()> {
        info!("Pulling image {}", image);
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut progress = std::pin::pin!(docker.create_image(Some(options), None, None));
        while let Some(step) = progress.next().await {
            step.map_err(|e| match classify_error(e) {
                RuntimeError::Unavailable(message) => RuntimeError::Unavailable(message),
                other => RuntimeError::ImageNotFound(format!("{}: {}", image, other)),
            })?;
        }

        Ok(())
    }
}

fn connect(config: &DockerRuntimeConfig) -> Result<Docker, BollardError> {
    match config.docker_host.as_deref() {
        Some(host) if host.starts_with("unix://") => {
            Docker::connect_with_socket(host, config.timeout_secs, bollard::API_DEFAULT_VERSION)
        }
        Some(host) => {
            Docker::connect_with_http(host, config.timeout_secs, bollard::API_DEFAULT_VERSION)
        }
        None => Docker::connect_with_local_defaults(),
    }
}

/// Splits an image reference into the `fromImage` and `tag` pull parameters.
///
/// An untagged reference pulls `latest`, like `docker pull`; an empty tag
/// would pull every tag of the repository.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.client()?
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> RuntimeResult<ContainerId> {
        let docker = self.client()?;
        let options = || CreateContainerOptions {
            name: request.name.as_str(),
            platform: None,
        };

        let response = match docker
            .create_container(Some(options()), self.container_config(request))
            .await
        {
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.pull_image(docker, &request.image).await?;
                docker
                    .create_container(Some(options()), self.container_config(request))
                    .await
                    .map_err(classify_error)?
            }
            other => other.map_err(classify_error)?,
        };

        for warning in &response.warnings {
            debug!("docker create {}: {}", request.name, warning);
        }

        if let Err(e) = docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Created but never started: not tracked, so remove it here.
            let removal = docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            if let Err(removal) = removal {
                warn!("Failed to remove unstarted container {}: {}", request.name, removal);
            }
            return Err(classify_error(e));
        }

        ContainerId::parse(&response.id)
    }

    async fn wait(&self, container_id: &ContainerId) -> RuntimeResult<i64> {
        let stream = self
            .client()?
            .wait_container(container_id.as_str(), None::<WaitContainerOptions<String>>);
        let mut stream = std::pin::pin!(stream);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(classify_error(e)),
            None => Err(RuntimeError::Other(anyhow::anyhow!(
                "wait stream for {} ended without a status",
                container_id
            ))),
        }
    }

    async fn remove(&self, container_id: &ContainerId) -> RuntimeResult<()> {
        self.client()?
            .remove_container(
                container_id.as_str(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify_error)?;

        Ok(())
    }
}

/// Maps a bollard error to the runtime error taxonomy.
///
/// An answer from the daemon is a per-request problem; anything else means
/// the daemon could not be reached.
fn classify_error(error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::ImageNotFound(message),
        BollardError::DockerResponseServerError { message, .. } => RuntimeError::Rejected(message),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let error = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: missing:latest".to_string(),
        };
        assert!(matches!(classify_error(error), RuntimeError::ImageNotFound(_)));
    }

    #[test]
    fn test_classify_other_server_error_is_rejection() {
        let error = BollardError::DockerResponseServerError {
            status_code: 400,
            message: "invalid working directory".to_string(),
        };
        let mapped = classify_error(error);
        assert!(matches!(mapped, RuntimeError::Rejected(_)));
        assert!(!mapped.is_systemic());
    }

    #[test]
    fn test_classify_transport_error_is_systemic() {
        let error = BollardError::IOError {
            err: std::io::Error::new(std::io::ErrorKind::NotFound, "no socket"),
        };
        assert!(classify_error(error).is_systemic());
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let runtime = DockerRuntime::new(DockerRuntimeConfig {
            docker_host: Some("unix:///nonexistent/suitey/docker.sock".to_string()),
            ..Default::default()
        });

        let error = runtime.ping().await.unwrap_err();
        assert!(error.is_systemic(), "{error}");

        let request = RunRequest::new("suitey-unit-0001", "alpine", "true");
        assert!(runtime.run(&request).await.unwrap_err().is_systemic());
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("alpine"), ("alpine", "latest"));
        assert_eq!(split_image_reference("rust:1.85"), ("rust", "1.85"));
        assert_eq!(
            split_image_reference("localhost:5000/team/app"),
            ("localhost:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/app:v2"),
            ("localhost:5000/team/app", "v2")
        );
        assert_eq!(
            split_image_reference("alpine@sha256:abcd"),
            ("alpine@sha256:abcd", "")
        );
    }
}
