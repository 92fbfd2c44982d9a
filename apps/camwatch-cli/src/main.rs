use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use camwatch_bus::{EventPublisher, LocalBus};
use camwatch_capture::{load_placeholder, RasterCapture, SnapshotStore};
use camwatch_ops::{ensure_telemetry_dir, init_tracing, TelemetryStore};
use camwatch_source::HttpFrameSource;
use camwatch_types::{
    camera::StreamSource, config::CamwatchConfig, events::ViewerEvent,
    telemetry::SessionTelemetry,
};
use camwatch_viewer::{StreamViewer, ViewerHandle};
use clap::Parser;
use futures::StreamExt;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
    time::{timeout, Duration},
};
use tracing::{info, warn};

mod ui;

const FORWARDER_DRAIN: Duration = Duration::from_secs(2);

use ui::{UiAction, UiMessage};

#[derive(Debug, Parser)]
#[command(name = "camwatch", about = "Watch a camera's live frames and freeze them on demand")]
struct Args {
    /// Path to a TOML config file.
    #[arg(short, long, env = "CAMWATCH_CONFIG")]
    config: Option<String>,

    /// Camera id from the config's camera list.
    #[arg(long)]
    camera: Option<String>,

    /// Ad-hoc frame URL; overrides the configured camera's stream.
    #[arg(long)]
    url: Option<String>,

    /// Camera status to use with `--url`.
    #[arg(long, default_value = "active")]
    status: String,

    /// Log events to stdout instead of opening the terminal UI.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref());
    if args.headless {
        init_tracing(&config.ops)?;
    }

    let (camera, stream) = select_stream(&config, &args)?;
    let source = HttpFrameSource::new(&config.source)?;
    let capture = RasterCapture::new(&config.capture);
    let bus = LocalBus::default();
    let telemetry = TelemetryStore::new();

    let placeholder = load_placeholder(config.capture.placeholder_path.as_deref().map(Path::new));
    let snapshots = SnapshotStore::new(config.capture.snapshot_dir.as_ref().map(PathBuf::from));

    let (ui_tx, ui_rx) = std::sync::mpsc::channel();
    let forwarder = {
        let mut events = bus.subscribe();
        let telemetry = telemetry.clone();
        let ui_tx = ui_tx.clone();
        let headless = args.headless;
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if headless {
                    log_event(&event);
                }
                if let Err(err) = telemetry.record_event(event.clone()).await {
                    warn!("Failed to record telemetry: {err}");
                }
                let _ = ui_tx.send(UiMessage::Event(event));
            }
        })
    };

    let handle = StreamViewer::new(camera.clone(), stream, config.viewer.clone(), source, capture, bus)
        .with_placeholder(placeholder)
        .with_snapshot_store(snapshots)
        .mount();

    if args.headless {
        info!("Watching {camera}; press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    } else {
        let status_feed = {
            let mut snapshots = Box::pin(handle.snapshots());
            let ui_tx = ui_tx.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.next().await {
                    if ui_tx.send(UiMessage::Status(snapshot.status_line())).is_err() {
                        break;
                    }
                }
            })
        };
        let (action_tx, action_rx) = unbounded_channel();
        let summary = format!("{} | poll {}ms", camera, config.viewer.poll_interval_ms);
        let ui_task = tokio::task::spawn_blocking(move || ui::run(ui_rx, action_tx, summary));
        drive(&handle, action_rx).await;
        status_feed.abort();
        let _ = ui_tx.send(UiMessage::Shutdown);
        ui_task.await??;
    }

    handle.unmount().await?;
    // The bus closes once the viewer task is gone; let the forwarder record
    // the final events before reporting.
    match timeout(FORWARDER_DRAIN, forwarder).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("Event forwarder failed: {err}"),
        Err(_) => warn!("Event forwarder did not drain within {:?}", FORWARDER_DRAIN),
    }

    let dir = ensure_telemetry_dir(&config.ops.telemetry_dir)?;
    let (written, sessions) = telemetry.flush_with_summary(&dir).await?;
    for session in &sessions {
        println!("{}", session_report(session));
    }
    println!("Telemetry written to {}", written.display());
    Ok(())
}

/// Forwards key presses from the terminal UI to the viewer until quit.
async fn drive(handle: &ViewerHandle, mut actions: UnboundedReceiver<UiAction>) {
    while let Some(action) = actions.recv().await {
        let result = match action {
            UiAction::Pause => handle.pause().await,
            UiAction::Resume => handle.resume().await,
            UiAction::Refresh => handle.refresh().await,
            UiAction::Quit => break,
        };
        if let Err(err) = result {
            warn!("Viewer command failed: {err}");
            break;
        }
    }
}

fn select_stream(config: &CamwatchConfig, args: &Args) -> Result<(String, StreamSource)> {
    if let Some(url) = &args.url {
        let camera = args.camera.clone().unwrap_or_else(|| url.clone());
        return Ok((camera, StreamSource::new(url.clone(), args.status.clone())));
    }
    let descriptor = match &args.camera {
        Some(id) => config
            .camera(id)
            .ok_or_else(|| anyhow!("camera '{id}' is not in the config"))?,
        None => config
            .cameras
            .first()
            .ok_or_else(|| anyhow!("no cameras configured; pass --url or add [[cameras]]"))?,
    };
    Ok((descriptor.camera_id.clone(), descriptor.source()))
}

fn session_report(session: &SessionTelemetry) -> String {
    let metrics = &session.metrics;
    let mut report = format!(
        "{}: {} requests, {} frames, {} stale, {} failures, {} pauses ({} placeholder)",
        session.camera,
        metrics.requests_issued,
        metrics.frames_presented,
        metrics.stale_discarded,
        metrics.load_failures,
        metrics.pauses,
        metrics.placeholder_pauses
    );
    for note in &session.notes {
        report.push_str("\n  ");
        report.push_str(note);
    }
    report
}

fn log_event(event: &ViewerEvent) {
    info!(target: "camwatch::events", "{}", ui::format_event(event));
}

fn load_config(path: Option<&str>) -> CamwatchConfig {
    let path = path.unwrap_or("configs/dev.toml");
    match CamwatchConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            default_config()
        }
    }
}

fn default_config() -> CamwatchConfig {
    let config = CamwatchConfig::default();
    debug_assert!(config.validate().is_ok());
    config
}

#[cfg(test)]
mod tests {
    use camwatch_types::telemetry::ViewerMetrics;

    use super::*;

    #[test]
    fn report_uses_the_final_viewer_counters() {
        let session = SessionTelemetry {
            camera: "cam-lobby".into(),
            metrics: ViewerMetrics {
                requests_issued: 12,
                frames_presented: 9,
                pauses: 1,
                ..Default::default()
            },
            notes: vec!["10:00:00: Camera is inactive".into()],
        };
        let report = session_report(&session);
        assert!(report.starts_with("cam-lobby: 12 requests, 9 frames"));
        assert!(report.ends_with("\n  10:00:00: Camera is inactive"));
    }
}
