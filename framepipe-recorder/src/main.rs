//! framepipe recorder: entry point.
//!
//! ```text
//! framepipe-recorder                    Record with framepipe-recorder.toml
//! framepipe-recorder --config <path>    Load a custom config TOML
//! framepipe-recorder --gen-config       Write default config to stdout
//! framepipe-recorder --write-config <p> Write default config to a file
//! framepipe-recorder -o take -d 5       Override output and duration
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framepipe_recorder::config::RecorderFileConfig;
use framepipe_recorder::service::RecorderService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "framepipe-recorder",
    about = "Stream rendered frames into an ffmpeg subprocess"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framepipe-recorder.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to PATH and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Output file (overrides the config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds to record; 0 records until Ctrl-C (overrides the config).
    #[arg(short, long)]
    duration: Option<f64>,

    /// Output frame rate (overrides the config).
    #[arg(long)]
    fps: Option<f64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RecorderFileConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    if let Some(path) = cli.write_config {
        RecorderFileConfig::write_default(&path)?;
        println!("Default config written to {}.", path.display());
        return Ok(());
    }

    let mut config = RecorderFileConfig::load(&cli.config);
    if let Some(output) = cli.output {
        config.encoder.output = output;
    }
    if let Some(duration) = cli.duration {
        config.capture.duration_secs = duration;
    }
    if let Some(fps) = cli.fps {
        config.encoder.fps = fps;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framepipe-recorder v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "encoder: {} ({})",
        config.encoder.executable,
        config.encoder.preset.display_name()
    );
    info!(
        "output: {}x{} @ {} fps",
        config.encoder.width, config.encoder.height, config.encoder.fps
    );

    let service = RecorderService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; finishing recording");
        stop.store(false, Ordering::SeqCst);
    });

    let summary = service.run().await?;

    info!(
        "{} ticks, {} captures dropped under backlog, {} write faults",
        summary.ticks, summary.shed, summary.faults
    );
    if let Some(stats) = summary.session {
        info!(
            "readbacks: {} submitted, {} forwarded, {} failed, {} forced in order",
            stats.submitted, stats.forwarded, stats.failed, stats.forced
        );
    }
    match summary.diagnostics {
        Some(diag) if diag.is_clean() => {
            info!("encoder finished cleanly ({} frames)", diag.frames_written)
        }
        Some(diag) => warn!(
            "encoder finished with {:?} after {} frames",
            diag.status, diag.frames_written
        ),
        None => warn!("nothing was recorded"),
    }

    Ok(())
}
