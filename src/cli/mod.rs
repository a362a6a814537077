use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::AppConfig;

pub mod auth;
pub mod run;

#[derive(Subcommand)]
enum Command {
    /// Authorize access to the mailbox and save the refresh token
    Auth {},
    /// Watch the inbox and acknowledge new mail
    Run {
        /// Run a single pass and exit
        #[arg(long, action, default_value = "false")]
        once: bool,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let config = AppConfig::default();

    // Handle each sub command
    match args.command {
        Some(Command::Auth {}) => {
            auth::run(&config).await?;
        }
        Some(Command::Run { once }) => {
            run::run(&config, once).await?;
        }
        None => {
            run::run(&config, false).await?;
        }
    }

    Ok(())
}
