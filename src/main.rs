//! suitey CLI - Parallel test-suite scheduler.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::builder::RangedU64ValueParser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use suitey::config::{self, Config, ReportFormat, RuntimeConfig};
use suitey::orchestrator::{Orchestrator, detect_host_cores};
use suitey::report::{self, ExecutionReport};
use suitey::runtime::{ContainerRuntime, cli::CliRuntime, docker::DockerRuntime};
use suitey::suite::{SuiteRecord, parse_descriptors};

const DEFAULT_CONFIG: &str = "suitey.toml";

#[derive(Parser)]
#[command(name = "suitey")]
#[command(about = "Run test suites in parallel containers under a CPU-core budget", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch every suite described in INPUT
    Run {
        /// Suite descriptor file ("-" or absent reads stdin)
        input: Option<PathBuf>,

        /// Override the CPU-core budget
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        cores: Option<usize>,

        /// Report format (text, json)
        #[arg(short, long)]
        format: Option<ReportFormat>,

        /// Stop admitting suites after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Remove launched containers after reporting
        #[arg(long)]
        cleanup: bool,
    },

    /// Check suite descriptors without launching anything
    Validate {
        /// Suite descriptor file ("-" or absent reads stdin)
        input: Option<PathBuf>,
    },

    /// Initialize a new configuration file
    Init {
        /// Runtime type (docker, cli)
        #[arg(short, long, default_value = "docker")]
        runtime: String,
    },
}

/// Settings for one `run` after merging flags over the config file.
struct RunOptions {
    capacity: usize,
    format: ReportFormat,
    timeout: Option<Duration>,
    cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => handle_parse_error(e),
    };

    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Run {
            input,
            cores,
            format,
            timeout,
            cleanup,
        } => run_suites(&cli.config, input.as_deref(), cores, format, timeout, cleanup).await,
        Commands::Validate { input } => validate_suites(input.as_deref()).await,
        Commands::Init { runtime } => init_config(&cli.config, &runtime),
    }
}

/// Prints clap's help/version output or an error, then exits.
fn handle_parse_error(e: clap::Error) -> ! {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = e.print();
            std::process::exit(0);
        }
        ErrorKind::UnknownArgument => {
            let flag = match e.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(flag)) => flag.clone(),
                _ => String::from("?"),
            };
            eprintln!("Error: Unknown option '{}'. See 'suitey --help'.", flag);
            std::process::exit(2);
        }
        _ => e.exit(),
    }
}

/// Logs go to stderr; stdout carries the report.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read suite descriptors from {}", path.display())),
        _ => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read suite descriptors from stdin")?;
            Ok(buf)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    // Only the default location may be absent.
    if path == Path::new(DEFAULT_CONFIG) {
        config::load_config_or_default(path)
    } else {
        config::load_config(path)
    }
}

async fn run_suites(
    config_path: &Path,
    input: Option<&Path>,
    cores: Option<usize>,
    format: Option<ReportFormat>,
    timeout: Option<u64>,
    cleanup: bool,
) -> Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if config.suitey.cpu_cores == Some(0) {
        bail!("{}: suitey.cpu_cores must be at least 1", config_path.display());
    }

    let options = RunOptions {
        capacity: cores
            .or(config.suitey.cpu_cores)
            .unwrap_or_else(detect_host_cores),
        format: format.unwrap_or(config.report.format),
        timeout: timeout.or(config.suitey.timeout_secs).map(Duration::from_secs),
        cleanup: cleanup || config.suitey.cleanup,
    };

    let raw = read_input(input).await?;
    let records = parse_descriptors(&raw);

    if records.is_empty() {
        info!("No suites to run");
        let report = ExecutionReport::empty(options.capacity);
        print_report(&report, options.format)?;
        return Ok(());
    }

    info!("Using {} runtime", config.runtime.kind());

    match &config.runtime {
        RuntimeConfig::Docker(cfg) => {
            let runtime = DockerRuntime::new(cfg.clone());
            run_with(Arc::new(runtime), records, options).await
        }
        RuntimeConfig::Cli(cfg) => {
            let runtime = CliRuntime::new(cfg.clone());
            run_with(Arc::new(runtime), records, options).await
        }
    }
}

async fn run_with<R>(runtime: Arc<R>, records: Vec<SuiteRecord>, options: RunOptions) -> Result<()>
where
    R: ContainerRuntime + 'static,
{
    let token = CancellationToken::new();

    if let Some(timeout) = options.timeout {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Timeout of {}s reached, cancelling run", timeout.as_secs());
            token.cancel();
        });
    }

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                token.cancel();
            }
        });
    }

    let orchestrator =
        Orchestrator::new(Arc::clone(&runtime), options.capacity).with_cancellation_token(token);
    let report = orchestrator.run(records).await;

    print_report(&report, options.format)?;

    if options.cleanup {
        remove_containers(runtime.as_ref(), &report).await;
    }

    if !report.success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Writes the report to stdout and the summary to stderr.
fn print_report(report: &ExecutionReport, format: ReportFormat) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match format {
        ReportFormat::Text => write!(stdout, "{}", report.render())?,
        ReportFormat::Json => writeln!(stdout, "{}", report.to_json()?)?,
    }
    stdout.flush()?;

    report::print_summary(report);
    Ok(())
}

async fn remove_containers<R: ContainerRuntime + ?Sized>(runtime: &R, report: &ExecutionReport) {
    for launch in &report.launches {
        match runtime.remove(&launch.container_id).await {
            Ok(()) => debug!("Removed container {}", launch.container_id.short()),
            Err(e) => warn!(
                "Failed to remove container {} ({}): {}",
                launch.container_id.short(),
                launch.suite_id,
                e
            ),
        }
    }
    info!("Removed {} container(s)", report.launches.len());
}

async fn validate_suites(input: Option<&Path>) -> Result<()> {
    let raw = read_input(input).await?;
    let records = parse_descriptors(&raw);

    if records.is_empty() {
        println!("No suites found.");
        return Ok(());
    }

    let mut invalid = 0;
    for record in &records {
        match record {
            Ok(suite) => println!(
                "  {} {} ({} core(s), {})",
                console::style("✓").green(),
                suite.suite_id,
                suite.cpu_cores,
                suite.test_image
            ),
            Err(e) => {
                invalid += 1;
                println!("  {} {}", console::style("✗").red(), e);
            }
        }
    }

    println!();
    println!(
        "{} suite(s): {} valid, {} invalid",
        records.len(),
        records.len() - invalid,
        invalid
    );

    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_config(path: &Path, runtime: &str) -> Result<()> {
    let runtime_config = match runtime {
        "docker" => {
            r#"[runtime]
type = "docker"
# docker_host = "unix:///var/run/docker.sock"
timeout_secs = 120
enforce_cpu_limits = false"#
        }
        "cli" => {
            r#"[runtime]
type = "cli"
binary = "docker"
enforce_cpu_limits = false"#
        }
        _ => {
            eprintln!("Unknown runtime: {}. Use: docker, cli", runtime);
            std::process::exit(1);
        }
    };

    let config = format!(
        r#"# suitey configuration file

[suitey]
# cpu_cores = 8
# timeout_secs = 3600
cleanup = false

{}

[report]
format = "text"
"#,
        runtime_config
    );

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Describe your suites in a file, then run:");
    println!("  suitey run suites.txt");

    Ok(())
}
