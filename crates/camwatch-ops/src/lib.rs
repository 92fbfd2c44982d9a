//! Operational helpers: logging, telemetry persistence.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use camwatch_types::{
    config::OpsConfig,
    events::{EventPayload, ViewerEvent},
    frame::CaptureOrigin,
    telemetry::{SessionTelemetry, ViewerMetrics},
    CamwatchError, Result,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| CamwatchError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| CamwatchError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// In-memory record of viewer events, grouped per camera on demand.
#[derive(Clone, Default)]
pub struct TelemetryStore {
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_event(&self, event: ViewerEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    pub async fn snapshot_events(&self) -> Vec<ViewerEvent> {
        self.events.lock().await.clone()
    }

    /// Folds recorded events into per-camera counters.
    pub async fn summarize(&self) -> Vec<SessionTelemetry> {
        let events = self.events.lock().await;
        summarize_events(&events)
    }

    /// Appends every recorded event to `<dir>/events.jsonl` and clears the store.
    pub async fn flush_to(&self, dir: &Path) -> Result<PathBuf> {
        let mut events = self.events.lock().await;
        let path = write_events(dir, &events)?;
        events.clear();
        Ok(path)
    }

    /// Summarizes and flushes under one lock, so no event recorded in between
    /// is written without being counted.
    pub async fn flush_with_summary(&self, dir: &Path) -> Result<(PathBuf, Vec<SessionTelemetry>)> {
        let mut events = self.events.lock().await;
        let sessions = summarize_events(&events);
        let path = write_events(dir, &events)?;
        events.clear();
        Ok((path, sessions))
    }
}

fn summarize_events(events: &[ViewerEvent]) -> Vec<SessionTelemetry> {
    let mut sessions: BTreeMap<String, SessionTelemetry> = BTreeMap::new();
    for event in events {
        let session = sessions
            .entry(event.camera.clone())
            .or_insert_with(|| SessionTelemetry {
                camera: event.camera.clone(),
                ..Default::default()
            });
        apply_event(&mut session.metrics, &mut session.notes, event);
    }
    sessions.into_values().collect()
}

fn write_events(dir: &Path, events: &[ViewerEvent]) -> Result<PathBuf> {
    let path = dir.join("events.jsonl");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| CamwatchError::Ops(format!("failed to open {:?}: {err}", path)))?;
    for event in events {
        let line = serde_json::to_string(event)
            .map_err(|err| CamwatchError::Ops(format!("failed to encode event: {err}")))?;
        writeln!(file, "{line}")
            .map_err(|err| CamwatchError::Ops(format!("failed to write {:?}: {err}", path)))?;
    }
    info!("Flushed {} events to {:?}", events.len(), path);
    Ok(path)
}

fn apply_event(metrics: &mut ViewerMetrics, notes: &mut Vec<String>, event: &ViewerEvent) {
    match &event.payload {
        EventPayload::FramePresented { .. } => {
            metrics.frames_presented += 1;
            metrics.last_frame_at = Some(event.timestamp);
        }
        EventPayload::LoadFailed { .. } => metrics.load_failures += 1,
        EventPayload::Paused { origin } => {
            metrics.pauses += 1;
            if *origin == CaptureOrigin::Placeholder {
                metrics.placeholder_pauses += 1;
            }
        }
        // The viewer's own counters supersede what was folded from events.
        EventPayload::Unmounted { metrics: last } => *metrics = last.clone(),
        EventPayload::StateChanged { to, .. } => {
            if let Some(fault) = to.fault() {
                notes.push(format!("{}: {}", event.timestamp.format("%H:%M:%S"), fault));
            }
        }
        _ => {}
    }
}

pub fn ensure_telemetry_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    fs::create_dir_all(&dir)
        .map_err(|err| CamwatchError::Ops(format!("failed to create telemetry dir: {err}")))?;
    info!("Telemetry directory ready at {:?}", dir);
    Ok(dir)
}
