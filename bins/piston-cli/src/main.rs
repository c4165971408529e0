mod commands;

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "piston-cli")]
#[command(about = "Piston CLI - Run code in the sandbox and manage sandbox resources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file through the sandbox pipeline
    Run {
        /// Language id (e.g., python, javascript, go, c)
        #[arg(short, long)]
        language: String,

        /// Path to the source file
        file: PathBuf,

        /// Override the wall-clock timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// List configured languages and their images
    Languages,

    /// Pull the images of every configured language
    Pull,

    /// Remove sandbox containers left behind by a crashed process
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { language, file, timeout_ms } => {
            let code = commands::run_file(&language, &file, timeout_ms).await?;
            std::process::exit(code);
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
        Commands::Pull => {
            commands::pull_images().await?;
        }
        Commands::Reap => {
            commands::reap().await?;
        }
    }

    Ok(())
}
