//! Testrig CLI - Main Entry Point
//!
//! Starts, inspects and stops the automation and application servers
//! outside of a test run.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use testrig_cli::commands::{port, server};
use testrig_cli::output::{self, print_error};
use testrig_e2e::HarnessConfig;

/// Testrig CLI - test environment servers
#[derive(Parser)]
#[command(name = "testrig")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testrig.toml", env = "TESTRIG_CONFIG", global = true)]
    config: PathBuf,

    /// Override the application server port
    #[arg(long, global = true)]
    app_port: Option<u16>,

    /// Override the automation server port
    #[arg(long, global = true)]
    automation_port: Option<u16>,

    /// Directory for server logs
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start both servers and leave them running
    Up,

    /// Stop the application server
    Down(server::DownArgs),

    /// Stop the automation server
    StopAutomation,

    /// Show which servers are listening
    Status,

    /// Probe or reclaim a port
    #[command(subcommand)]
    Port(port::PortCommands),

    /// Print the effective configuration
    Config,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = HarnessConfig::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;

        if let Some(port) = self.app_port {
            config.app.port = port;
        }
        if let Some(port) = self.automation_port {
            config.automation.port = port;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    };

    match cli.command {
        Commands::Up => server::up(&config, cli.format).await?,
        Commands::Down(args) => server::down(&config, args)?,
        Commands::StopAutomation => server::stop_automation(&config)?,
        Commands::Status => server::status(&config, cli.format)?,
        Commands::Port(cmd) => port::execute(cmd)?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}
