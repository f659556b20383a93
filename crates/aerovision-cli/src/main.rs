//! AeroVision CLI
//!
//! Headless shell around `aerovision-core`: picks a file, uploads it to the
//! detection server, follows the job to completion, and renders the
//! session's view state to the terminal. Diagnostics go to stderr via
//! `RUST_LOG`; the user-visible activity log goes to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use aerovision_core::health::{HealthMonitor, ServerHealth};
use aerovision_core::session::{parse_frame_skip, JobSession};
use aerovision_core::settings::{ClientSettings, SettingsManager};
use aerovision_core::sidecar::{DetectionSidecar, SidecarConfig};
use aerovision_core::transport::{DetectionClient, DetectionTransport};
use aerovision_core::view::{LogLevel, SessionPhase, ViewState};
use aerovision_core::FileKind;

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(
    name = "aerovision",
    version,
    about = "Client for the AeroVision object detection server"
)]
struct Cli {
    /// Base URL of the detection server API
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Spawn the detection server as a child process for the duration of the
    /// command
    #[arg(long, global = true)]
    spawn_server: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe server health
    Health,

    /// Run object detection on a single image
    Image {
        /// Image file (jpg, jpeg, png, bmp, tiff, webp)
        file: PathBuf,

        /// Directory to save the annotated image into
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Submit a video detection job and follow it to completion (Ctrl-C
    /// cancels client-side; the remote job keeps running)
    Video {
        /// Video file (mp4, avi, mov, mkv, webm)
        file: PathBuf,

        /// Process every Nth frame (positive integer)
        #[arg(long)]
        frame_skip: Option<String>,

        /// Directory to save the annotated video into when the job completes
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Print per-frame detection details when the job completes
        #[arg(long)]
        details: bool,
    },

    /// Download a processed output file from the server
    Download {
        /// Server-side output filename
        file: String,

        /// Directory to save into (defaults to the configured download dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let manager = SettingsManager::new(SettingsManager::default_dir());
    let mut settings = manager.load();
    if let Some(url) = &cli.base_url {
        settings.base_url = url.clone();
    }
    settings.normalize();

    let mut sidecar = None;
    if cli.spawn_server || settings.sidecar.auto_start {
        let mut server = DetectionSidecar::new(sidecar_config(&settings));
        server
            .start()
            .await
            .context("failed to start the detection server")?;
        sidecar = Some(server);
    }

    let client = DetectionClient::new()?.with_base_url(settings.base_url.clone());
    let transport: Arc<dyn DetectionTransport> = Arc::new(client);

    let result = run_command(cli.command, transport, &settings).await;

    if let Some(mut server) = sidecar {
        if let Err(e) = server.stop().await {
            tracing::warn!("Failed to stop detection server: {}", e);
        }
    }

    result
}

fn sidecar_config(settings: &ClientSettings) -> SidecarConfig {
    let mut config = SidecarConfig::default()
        .with_program(settings.sidecar.program.clone())
        .with_args(settings.sidecar.args.clone())
        .with_base_url(settings.base_url.clone());
    if let Some(dir) = &settings.sidecar.working_dir {
        config = config.with_working_dir(dir.clone());
    }
    config
}

async fn run_command(
    command: Command,
    transport: Arc<dyn DetectionTransport>,
    settings: &ClientSettings,
) -> Result<()> {
    match command {
        Command::Health => run_health(transport).await,
        Command::Image { file, out_dir } => run_image(transport, file, out_dir).await,
        Command::Video {
            file,
            frame_skip,
            out_dir,
            details,
        } => run_video(transport, settings, file, frame_skip, out_dir, details).await,
        Command::Download { file, dir } => run_download(transport, settings, file, dir).await,
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_health(transport: Arc<dyn DetectionTransport>) -> Result<()> {
    let health = HealthMonitor::probe(transport.as_ref()).await;
    println!("{}", health.status_line());
    if !health.online {
        bail!("detection server is offline");
    }
    Ok(())
}

async fn run_image(
    transport: Arc<dyn DetectionTransport>,
    file: PathBuf,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let session = JobSession::new(transport);
    session.select_file(&file, FileKind::Image)?;

    let result = session.detect_image().await;
    print_log(&session.view(), 0);
    let report = result?;

    println!(
        "Detections: {} total - {} soldiers, {} civilians, {} other",
        report.summary.total(),
        report.summary.soldiers,
        report.summary.civilians,
        report.summary.other
    );

    if let Some(dir) = out_dir {
        tokio::fs::create_dir_all(&dir).await?;
        let name = report
            .output_file
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("detected.jpg"));
        let path = dir.join(name);
        tokio::fs::write(&path, &report.annotated).await?;
        println!("Saved annotated image to {}", path.display());
    }

    Ok(())
}

async fn run_video(
    transport: Arc<dyn DetectionTransport>,
    settings: &ClientSettings,
    file: PathBuf,
    frame_skip: Option<String>,
    out_dir: Option<PathBuf>,
    details: bool,
) -> Result<()> {
    let frame_skip = match frame_skip {
        Some(raw) => parse_frame_skip(&raw)?,
        None => settings.default_frame_skip,
    };

    let session = JobSession::new(transport.clone())
        .with_poll_interval(Duration::from_millis(settings.poll_interval_ms));
    let printer = spawn_view_printer(session.subscribe());

    // Periodic connection indicator while the job runs.
    let monitor = HealthMonitor::spawn(
        transport,
        Duration::from_secs(settings.health_interval_secs),
    );
    let health_printer = spawn_health_printer(monitor.subscribe());

    session.select_file(&file, FileKind::Video)?;
    session.start_video(frame_skip).await?;

    let final_view = tokio::select! {
        view = session.wait_done() => view,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            session.wait_done().await
        }
    };

    // Give the printer a beat to drain the final update, then stop it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    health_printer.abort();
    monitor.stop();

    match final_view.phase {
        SessionPhase::Completed => {
            println!(
                "Detections: {} total - {} soldiers, {} civilians, {} other ({} frames)",
                final_view.summary.total(),
                final_view.summary.soldiers,
                final_view.summary.civilians,
                final_view.summary.other,
                final_view.frames_processed
            );

            if details {
                for frame in session.frame_results() {
                    println!("{}", serde_json::to_string(&frame)?);
                }
            }

            if let Some(dir) = out_dir {
                let path = session.download_output(&dir).await?;
                println!("Saved annotated video to {}", path.display());
            }
            Ok(())
        }
        SessionPhase::Failed => bail!("detection job failed - see log above"),
        _ => {
            println!("Cancelled - the remote job keeps running server-side");
            Ok(())
        }
    }
}

async fn run_download(
    transport: Arc<dyn DetectionTransport>,
    settings: &ClientSettings,
    file: String,
    dir: Option<PathBuf>,
) -> Result<()> {
    let dir = dir
        .or_else(|| settings.download_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let path = transport.download(&file, &dir).await?;
    println!("Saved {}", path.display());
    Ok(())
}

// =============================================================================
// Rendering
// =============================================================================

/// Prints activity-log entries past `from` and returns the new length.
fn print_log(view: &ViewState, from: usize) -> usize {
    for entry in view.log.iter().skip(from) {
        println!("[{}] {}", level_label(entry.level), entry.message);
    }
    view.log.len()
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Warning => "warn",
        LogLevel::Error => " err",
    }
}

/// Prints the connection indicator whenever the server flips between online
/// and offline mid-run. The initial observation is skipped; the submission
/// pre-flight already reports it.
fn spawn_health_printer(mut rx: watch::Receiver<ServerHealth>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_online: Option<bool> = None;
        while rx.changed().await.is_ok() {
            let health = rx.borrow_and_update().clone();
            if last_online.is_some() && last_online != Some(health.online) {
                println!("{}", health.status_line());
            }
            last_online = Some(health.online);
        }
    })
}

/// Mirrors the session's view state to the terminal as it changes.
fn spawn_view_printer(mut rx: watch::Receiver<ViewState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = 0usize;
        let mut last_progress: Option<u8> = None;
        loop {
            {
                let view = rx.borrow_and_update().clone();
                if view.log.len() < printed {
                    printed = 0;
                }
                printed = print_log(&view, printed);

                if view.phase == SessionPhase::Polling
                    && last_progress != Some(view.progress_percent)
                {
                    println!(
                        "  {:>3}% | {} | {} objects ({} soldiers, {} civilians, {} other) | {} frames",
                        view.progress_percent,
                        view.status_text,
                        view.summary.total(),
                        view.summary.soldiers,
                        view.summary.civilians,
                        view.summary.other,
                        view.frames_processed
                    );
                    last_progress = Some(view.progress_percent);
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_video_command() {
        let cli = Cli::parse_from([
            "aerovision",
            "video",
            "clip.mp4",
            "--frame-skip",
            "5",
            "--details",
        ]);
        match cli.command {
            Command::Video {
                file,
                frame_skip,
                details,
                ..
            } => {
                assert_eq!(file, PathBuf::from("clip.mp4"));
                assert_eq!(frame_skip.as_deref(), Some("5"));
                assert!(details);
            }
            _ => panic!("expected video command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "aerovision",
            "health",
            "--base-url",
            "http://10.0.0.5:5000/api",
            "--spawn-server",
        ]);
        assert_eq!(cli.base_url.as_deref(), Some("http://10.0.0.5:5000/api"));
        assert!(cli.spawn_server);
    }
}
