//! suitey: a parallel test-suite scheduler.
//!
//! This crate launches independent test suites, each in its own container,
//! while keeping the total CPU cores of running suites within a fixed
//! budget, and reports which containers were started.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Suite**: Parse `key=value` suite descriptors
//! - **Runtime**: Talk to a container engine (Docker API or a docker-style CLI)
//! - **Orchestrator**: Admit, launch and track suites under the core budget
//! - **Report**: Render the outcome as `key=value`, JSON or a console summary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use suitey::config::load_config_or_default;
//! use suitey::orchestrator::{Orchestrator, detect_host_cores};
//! use suitey::runtime::cli::CliRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config_or_default(std::path::Path::new("suitey.toml"))?;
//!     let runtime = CliRuntime::new(Default::default());
//!     let capacity = config.suitey.cpu_cores.unwrap_or_else(detect_host_cores);
//!
//!     let orchestrator = Orchestrator::new(Arc::new(runtime), capacity);
//!     let report = orchestrator
//!         .launch_test_suites_parallel("suite_id=unit\ntest_command=make test\n...")
//!         .await;
//!     print!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod suite;

// Re-export commonly used types
pub use config::{Config, load_config, load_config_or_default};
pub use orchestrator::{CoreBudget, LaunchRecord, Orchestrator, detect_host_cores};
pub use report::{ExecutionReport, ExecutionStatus};
pub use runtime::{ContainerId, ContainerRuntime, RuntimeError};
pub use suite::{ParseError, SuiteConfig, parse_descriptors};
