//! Docker-compatible CLI runtime.
//!
//! Runs `docker` (or any binary with the same command line, such as `podman`)
//! as a child process for every operation. Useful where the Engine API socket
//! is not exposed but the CLI works.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ContainerId, ContainerRuntime, RunRequest, RuntimeError, RuntimeResult};
use crate::config::CliRuntimeConfig;

/// Runtime that shells out to a docker-compatible CLI.
pub struct CliRuntime {
    config: CliRuntimeConfig,
}

/// Captured result of one CLI invocation.
struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CliRuntime {
    pub fn new(config: CliRuntimeConfig) -> Self {
        Self { config }
    }

    /// Arguments for `run -d`, without the binary itself.
    fn run_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            request.name.clone(),
        ];

        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(dir) = &request.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        if self.config.enforce_cpu_limits {
            args.push("--cpus".to_string());
            args.push(request.cpu_cores.to_string());
        }

        args.push(request.image.clone());
        args.extend(request.shell_command());
        args
    }

    /// Force-removes a container by name, ignoring failures.
    async fn discard(&self, name: &str) {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        match self.invoke(&args).await {
            Ok(output) if output.success => debug!("Removed unlaunched container {}", name),
            Ok(output) => debug!("No container {} to remove: {}", name, output.stderr),
            Err(e) => debug!("Could not remove container {}: {}", name, e),
        }
    }

    async fn invoke(&self, args: &[String]) -> RuntimeResult<CliOutput> {
        debug!("{} {}", self.config.binary, args.join(" "));

        let output = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    RuntimeError::Unavailable(format!("{}: {}", self.config.binary, e))
                }
                _ => RuntimeError::Io(e),
            })?;

        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn ping(&self) -> RuntimeResult<()> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let output = self.invoke(&args).await?;
        if output.success {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(output.stderr))
        }
    }

    async fn run(&self, request: &RunRequest) -> RuntimeResult<ContainerId> {
        let output = self.invoke(&self.run_args(request)).await?;
        if !output.success {
            // `run -d` can fail after creating the container.
            self.discard(&request.name).await;
            return Err(classify_stderr(output.stderr));
        }

        // Pull progress goes to stderr; the id is the last line of stdout.
        let id = output.stdout.lines().last().unwrap_or_default();
        match ContainerId::parse(id) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.discard(&request.name).await;
                Err(e)
            }
        }
    }

    async fn wait(&self, container_id: &ContainerId) -> RuntimeResult<i64> {
        let args = vec!["wait".to_string(), container_id.to_string()];
        let output = self.invoke(&args).await?;
        if !output.success {
            return Err(classify_stderr(output.stderr));
        }

        output
            .stdout
            .trim()
            .parse::<i64>()
            .map_err(|e| RuntimeError::Other(anyhow::anyhow!("unexpected wait output: {}", e)))
    }

    async fn remove(&self, container_id: &ContainerId) -> RuntimeResult<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), container_id.to_string()];
        let output = self.invoke(&args).await?;
        if output.success {
            Ok(())
        } else {
            Err(classify_stderr(output.stderr))
        }
    }
}

/// Maps CLI error output to the runtime error taxonomy.
fn classify_stderr(stderr: String) -> RuntimeError {
    let lower = stderr.to_lowercase();
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        RuntimeError::Unavailable(stderr)
    } else if lower.contains("unable to find image")
        || lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("no such image")
    {
        RuntimeError::ImageNotFound(stderr)
    } else {
        RuntimeError::Rejected(stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(enforce_cpu_limits: bool) -> CliRuntime {
        CliRuntime::new(CliRuntimeConfig {
            binary: "docker".to_string(),
            enforce_cpu_limits,
        })
    }

    #[test]
    fn test_run_args() {
        let request = RunRequest::new("suitey-unit-0001", "alpine:3.20", "make test")
            .working_dir("/app")
            .label("suitey.suite_id", "unit");

        let args = runtime(false).run_args(&request);
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--name",
                "suitey-unit-0001",
                "--label",
                "suitey.suite_id=unit",
                "-w",
                "/app",
                "alpine:3.20",
                "/bin/sh",
                "-c",
                "make test",
            ]
        );
    }

    #[test]
    fn test_run_args_with_cpu_limit() {
        let request = RunRequest::new("n", "alpine", "true").cpu_cores(3);
        let args = runtime(true).run_args(&request);
        let pos = args.iter().position(|a| a == "--cpus").unwrap();
        assert_eq!(args[pos + 1], "3");
        assert!(pos < args.iter().position(|a| a == "alpine").unwrap());
    }

    #[test]
    fn test_classify_stderr() {
        assert!(
            classify_stderr(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"
                    .to_string()
            )
            .is_systemic()
        );
        assert!(matches!(
            classify_stderr("Unable to find image 'nope:latest' locally".to_string()),
            RuntimeError::ImageNotFound(_)
        ));
        assert!(matches!(
            classify_stderr("pull access denied for private/image".to_string()),
            RuntimeError::ImageNotFound(_)
        ));
        assert!(matches!(
            classify_stderr("OCI runtime create failed: chdir to cwd".to_string()),
            RuntimeError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runtime = CliRuntime::new(CliRuntimeConfig {
            binary: "suitey-definitely-not-installed".to_string(),
            enforce_cpu_limits: false,
        });
        let err = runtime.ping().await.unwrap_err();
        assert!(err.is_systemic(), "got {err}");
    }

    /// Writes an executable stand-in for the docker binary that logs its
    /// arguments and fails every `run`.
    #[cfg(unix)]
    fn failing_engine(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let binary = dir.join("fake-docker");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\nif [ \"$1\" = run ]; then\n  echo 'OCI runtime create failed: exec: \"/bin/sh\": no such file' >&2\n  exit 127\nfi\nexit 0\n",
            log.display()
        );
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        (binary, log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_run_removes_created_container() {
        let dir = tempfile::TempDir::new().unwrap();
        let (binary, log) = failing_engine(dir.path());
        let runtime = CliRuntime::new(CliRuntimeConfig {
            binary: binary.to_string_lossy().into_owned(),
            enforce_cpu_limits: false,
        });

        let request = RunRequest::new("suitey-unit-0001", "scratch-app", "make test");
        let error = runtime.run(&request).await.unwrap_err();
        assert!(matches!(error, RuntimeError::Rejected(_)), "{error}");

        let calls = std::fs::read_to_string(log).unwrap();
        let lines: Vec<_> = calls.lines().collect();
        assert!(lines[0].starts_with("run -d --name suitey-unit-0001"));
        assert_eq!(lines.last(), Some(&"rm -f suitey-unit-0001"));
    }
}
