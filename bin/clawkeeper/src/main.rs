mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "clawkeeper")]
#[command(about = "Keeps a ClawCloud console session alive via GitHub OAuth", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.clawkeeper/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in once, run keepalive and persist a rotated session cookie
    Run,

    /// Repeat `run` on a cron schedule until Ctrl-C
    Daemon {
        /// Seconds-first cron expression (overrides schedule.cron)
        #[arg(long)]
        cron: Option<String>,

        /// Also run once right away
        #[arg(long)]
        now: bool,
    },

    /// Print the page state a URL would be classified as
    Classify {
        url: String,

        /// File with the page HTML
        #[arg(long)]
        content: Option<PathBuf>,
    },

    /// Show which subsystems are configured
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run => {
            let code = commands::run_cmd::run(cli.config.as_ref()).await?;
            std::process::exit(code);
        }
        Commands::Daemon { cron, now } => {
            commands::daemon::run(cli.config.as_ref(), cron, now).await?;
        }
        Commands::Classify { url, content } => {
            commands::classify::run(cli.config.as_ref(), &url, content.as_ref())?;
        }
        Commands::Status => {
            commands::status::run(cli.config.as_ref()).await?;
        }
    }

    Ok(())
}
