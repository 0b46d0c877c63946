use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dbmend_core::Config;
use dbmend_engine::{FileRegistry, ModuleRegistry, Orchestrator, ReportSink, RunSettings};
use dbmend_modules::build_modules;
use dbmend_store::{provider_from_config, Session};

mod sinks;

use sinks::{ConsoleSink, JsonFileSink, MarkdownSink};

/// Exit code for configuration problems
const EXIT_CONFIG: i32 = 2;

/// dbmend - Detect and repair integrity problems in a relational store
#[derive(Parser)]
#[command(name = "dbmend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: dbmend.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared modules and whether they are still registered
    List,

    /// Detect problems and report what would be repaired, without changing anything
    Preview(RunArgs),

    /// Detect and repair problems
    Run(RunArgs),

    /// Check that the configured store is reachable
    CheckConnection,
}

#[derive(Args)]
struct RunArgs {
    /// Only run modules matching these names (supports a single *)
    #[arg(short, long = "module")]
    modules: Vec<String>,

    /// Output file for report.json
    #[arg(short, long, default_value = "report.json")]
    output: PathBuf,

    /// Also output markdown report
    #[arg(long)]
    markdown: Option<PathBuf>,
}

/// Errors that end the process with a distinct exit code
enum CliError {
    Config(anyhow::Error),
    Runtime(anyhow::Error),
}

impl CliError {
    fn config(e: impl Into<anyhow::Error>) -> Self {
        Self::Config(e.into())
    }

    fn runtime(e: impl Into<anyhow::Error>) -> Self {
        Self::Runtime(e.into())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(CliError::Config(e)) => {
            eprintln!("{} {:#}", "Configuration error:".red().bold(), e);
            EXIT_CONFIG
        }
        Err(CliError::Runtime(e)) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::List => list_command(&config),
        Commands::Preview(args) => run_command(&config, true, &args, cli.verbose).await,
        Commands::Run(args) => run_command(&config, false, &args, cli.verbose).await,
        Commands::CheckConnection => check_connection_command(&config).await,
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config, CliError> {
    let config = if let Some(config_path) = path {
        Config::from_file(config_path).map_err(CliError::config)?
    } else if Path::new("dbmend.toml").exists() {
        Config::from_file(Path::new("dbmend.toml")).map_err(CliError::config)?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    if verbose {
        eprintln!("{} {} declared modules", "Loaded".cyan(), config.modules.len());
    }
    Ok(config)
}

/// List command - show declared modules in run order
fn list_command(config: &Config) -> Result<i32, CliError> {
    let registry = FileRegistry::open(&config.run.registry_path).map_err(CliError::config)?;

    if config.modules.is_empty() {
        println!("{}", "No modules declared".yellow());
        return Ok(0);
    }

    println!("{}", "Modules (in run order):".bold());
    for module in &config.modules {
        let state = if registry.is_registered(module.name()) {
            "registered".green()
        } else {
            "deregistered".dimmed()
        };
        println!("  {:<32} {:<20} {}", module.name(), module.kind(), state);
    }
    Ok(0)
}

/// Preview and run commands - execute modules and publish the report
async fn run_command(config: &Config, preview: bool, args: &RunArgs, verbose: bool) -> Result<i32, CliError> {
    let provider = provider_from_config(&config.store).map_err(CliError::config)?;
    let settings = RunSettings::from_config(config).map_err(CliError::config)?;
    let modules = build_modules(config).map_err(CliError::config)?;
    let registry = FileRegistry::open(&config.run.registry_path).map_err(CliError::config)?;

    if !args.modules.is_empty() && config.select_modules(&args.modules).is_empty() {
        return Err(CliError::config(anyhow::anyhow!(
            "No module matches {}",
            args.modules.join(", ")
        )));
    }

    if verbose {
        eprintln!(
            "{} {} against {}",
            if preview { "Previewing".cyan() } else { "Repairing".cyan() },
            if args.modules.is_empty() { "all modules".to_string() } else { args.modules.join(", ") },
            provider.describe()
        );
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing the current step");
            on_signal.cancel();
        }
    });

    let mut orchestrator = Orchestrator::new(provider, Box::new(registry), settings)
        .with_modules(modules)
        .with_cancellation(cancel);

    let mut console = ConsoleSink;
    let mut json = JsonFileSink::new(&args.output);
    let mut markdown = args.markdown.as_ref().map(MarkdownSink::new);

    let mut sinks: Vec<&mut dyn ReportSink> = vec![&mut console, &mut json];
    if let Some(md) = markdown.as_mut() {
        sinks.push(md);
    }

    let report = orchestrator
        .run_and_publish(preview, &args.modules, &mut sinks)
        .await
        .map_err(CliError::runtime)?;
    Ok(report.exit_code())
}

/// Check-connection command - open one connection and ping it
async fn check_connection_command(config: &Config) -> Result<i32, CliError> {
    let provider = provider_from_config(&config.store).map_err(CliError::config)?;
    println!("{} {}", "Connecting to".cyan(), provider.describe());

    let store = provider.connect().await.map_err(CliError::runtime)?;
    let session = Session::new(store, config.statement_timeout());
    session.ping().await.map_err(CliError::runtime)?;

    println!("{} {}", "✓ Connected:".green().bold(), session.metadata());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::parse_from([
            "dbmend", "-v", "run", "--module", "orphaned-*", "-m", "node-counter", "--markdown", "r.md",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.modules, vec!["orphaned-*", "node-counter"]);
                assert_eq!(args.output, PathBuf::from("report.json"));
                assert_eq!(args.markdown, Some(PathBuf::from("r.md")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let result = load_config(Some(Path::new("/nonexistent/dbmend.toml")), false);
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
