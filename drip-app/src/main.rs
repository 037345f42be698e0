use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drip_app::loopback::{self, LoopbackOptions};
use drip_app::settings::Settings;
use drip_files::FileSource;
use drip_protocol::types::PeerId;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drip", version, about = "Peer-to-peer file sending with acknowledged chunks")]
struct Cli {
    /// Directory holding settings.toml.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send files to simulated in-process recipients.
    Send {
        /// Files to send.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Recipient peer id (repeatable).
        #[arg(long = "peer", required = true)]
        peers: Vec<String>,
        /// Recipient that declines the session (repeatable).
        #[arg(long = "reject")]
        rejecting: Vec<String>,
        /// Message loss rate once streaming starts (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// One-way link latency in milliseconds.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        /// Overrides the download directory from settings.
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    /// Print the effective settings.
    Config {
        /// Write them to settings.toml.
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir.unwrap_or_else(Settings::config_dir);
    let settings = Settings::load_from_dir(config_dir.clone());

    match cli.command {
        Commands::Send {
            files,
            peers,
            rejecting,
            loss,
            latency_ms,
            download_dir,
        } => {
            if !(0.0..=1.0).contains(&loss) {
                anyhow::bail!("--loss must be between 0.0 and 1.0, got {loss}");
            }

            let mut sources = Vec::with_capacity(files.len());
            for path in &files {
                let source = FileSource::from_path(path)
                    .await
                    .with_context(|| format!("cannot send {}", path.display()))?;
                sources.push(source);
            }

            let download_dir = download_dir.unwrap_or_else(|| settings.download_dir.clone());
            let options = LoopbackOptions {
                peers: peers.iter().map(|p| PeerId::new(p.as_str())).collect(),
                rejecting: rejecting.iter().map(|p| PeerId::new(p.as_str())).collect(),
                loss_rate: loss,
                latency: Duration::from_millis(latency_ms),
                download_dir: download_dir.clone(),
                config: settings.transfer_config(),
            };

            tracing::info!(files = sources.len(), peers = peers.len(), "drip starting");
            let Some(report) = loopback::run(sources, options).await? else {
                println!("nothing to send");
                return Ok(());
            };

            println!(
                "session {}: {} completed, {} cancelled, {} failed",
                report.session_id,
                report.summary.completed,
                report.summary.cancelled,
                report.summary.failed
            );
            for error in &report.errors {
                println!("  error: {error}");
            }
            if report.summary.completed > 0 {
                println!("received files are under {}", download_dir.display());
            }
            if !report.all_completed() {
                anyhow::bail!("not every transfer completed");
            }
        }
        Commands::Config { save } => {
            let rendered =
                toml::to_string_pretty(&settings).context("failed to serialize settings")?;
            print!("{rendered}");
            if save {
                settings.save_to_dir(config_dir)?;
            }
        }
    }
    Ok(())
}
