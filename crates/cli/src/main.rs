//! Radio Control Container CLI — the main entry point.
//!
//! Commands:
//! - `serve`        — Start the control-plane HTTP server
//! - `config`       — Validate or inspect the configuration
//! - `completions`  — Generate shell completions
//! - `version`      — Show version info

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

mod commands;

#[derive(Parser)]
#[command(
    name = "rcc",
    about = "Radio Control Container — a northbound control plane for vendor radio fleets.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control-plane HTTP server
    Serve {
        /// Override the listen address (e.g. 127.0.0.1:9000)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version info
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the resolved configuration
    Validate,
    /// Show the resolved configuration (secrets redacted)
    Show,
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { addr } => commands::serve::run(addr).await?,

        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rcc", &mut std::io::stdout());
        }

        Commands::Version => {
            println!("rcc {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
