use std::sync::Arc;

use camwatch_bus::EventPublisher;
use camwatch_capture::{builtin_placeholder, decode_frame, FrameCapture, SnapshotStore};
use camwatch_source::FrameSource;
use camwatch_types::{
    camera::StreamSource,
    config::ViewerConfig,
    events::{EventPayload, ViewerEvent},
    frame::{CaptureOrigin, DecodedFrame, EncodedImage, FrozenFrame},
    playback::{PlaybackState, ViewerFault},
    Result,
};
use chrono::Utc;
use futures::{
    future::BoxFuture,
    stream::{FuturesUnordered, StreamExt},
    FutureExt, Stream,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval_at, timeout, Duration, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    hooks::ViewerHooks,
    render::ViewerSnapshot,
    request::FrameRequest,
    session::{LoadOutcome, StreamSession},
    viewer_error,
};

const COMMAND_CAPACITY: usize = 16;

type LoadResult = (FrameRequest, std::result::Result<DecodedFrame, String>);

#[derive(Debug)]
enum ViewerCommand {
    Pause,
    Resume,
    Refresh,
    UpdateSource(StreamSource),
    SetStatus(String),
    Unmount,
}

struct Envelope {
    command: ViewerCommand,
    reply: oneshot::Sender<ViewerSnapshot>,
}

/// Live-frame viewer for one camera.
///
/// `mount` moves the viewer onto its own task. That task is the only code
/// that touches the session, so commands, timer ticks and load completions
/// are handled strictly one at a time.
pub struct StreamViewer<S, C, P>
where
    S: FrameSource + 'static,
    C: FrameCapture + 'static,
    P: EventPublisher + 'static,
{
    session: StreamSession,
    config: ViewerConfig,
    source: Arc<S>,
    capture: C,
    publisher: P,
    hooks: ViewerHooks,
    placeholder: EncodedImage,
    snapshots: SnapshotStore,
}

impl<S, C, P> StreamViewer<S, C, P>
where
    S: FrameSource + 'static,
    C: FrameCapture + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(
        camera: impl Into<String>,
        stream: StreamSource,
        config: ViewerConfig,
        source: S,
        capture: C,
        publisher: P,
    ) -> Self {
        Self {
            session: StreamSession::new(camera, stream, config.clone()),
            config,
            source: Arc::new(source),
            capture,
            publisher,
            hooks: ViewerHooks::default(),
            placeholder: builtin_placeholder(),
            snapshots: SnapshotStore::disabled(),
        }
    }

    pub fn with_hooks(mut self, hooks: ViewerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_placeholder(mut self, placeholder: EncodedImage) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn with_snapshot_store(mut self, store: SnapshotStore) -> Self {
        self.snapshots = store;
        self
    }

    /// Spawns the viewer task and returns its control handle.
    pub fn mount(self) -> ViewerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.session.snapshot());
        let task = ViewerTask {
            viewer: self,
            commands: command_rx,
            published: snapshot_tx,
            loads: FuturesUnordered::new(),
            awaiting_first_frame: false,
        };
        let handle = tokio::spawn(task.run());
        ViewerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            task: Some(handle),
        }
    }
}

struct ViewerTask<S, C, P>
where
    S: FrameSource + 'static,
    C: FrameCapture + 'static,
    P: EventPublisher + 'static,
{
    viewer: StreamViewer<S, C, P>,
    commands: mpsc::Receiver<Envelope>,
    published: watch::Sender<ViewerSnapshot>,
    loads: FuturesUnordered<BoxFuture<'static, LoadResult>>,
    awaiting_first_frame: bool,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<S, C, P> ViewerTask<S, C, P>
where
    S: FrameSource + 'static,
    C: FrameCapture + 'static,
    P: EventPublisher + 'static,
{
    async fn run(mut self) {
        let url = self.viewer.session.source().url.clone();
        info!("Mounting viewer for {} ({})", self.camera(), url);
        self.publish(EventPayload::Mounted { url }).await;
        if let Some(fault) = self.viewer.session.state().fault().cloned() {
            self.publish_transition(PlaybackState::Loading, PlaybackState::Errored(fault))
                .await;
        }

        let requests = self.viewer.session.prime(now_ms());
        self.start_loads(requests);
        self.refresh_published();

        let mut ticker: Option<Interval> = None;
        loop {
            self.sync_ticker(&mut ticker);
            tokio::select! {
                envelope = self.commands.recv() => {
                    let Some(Envelope { command, reply }) = envelope else {
                        debug!("Viewer handle dropped for {}", self.camera());
                        break;
                    };
                    let keep_running = self.handle(command).await;
                    self.refresh_published();
                    let _ = reply.send(self.viewer.session.snapshot());
                    if !keep_running {
                        break;
                    }
                }
                Some((request, result)) = self.loads.next(), if !self.loads.is_empty() => {
                    self.on_load(request, result).await;
                    self.refresh_published();
                }
                _ = next_tick(&mut ticker) => {
                    if let Some(request) = self.viewer.session.tick(now_ms()) {
                        self.start_loads(vec![request]);
                    }
                    self.refresh_published();
                }
            }
        }

        // Dropping the interval and the in-flight loads cancels them.
        drop(ticker);
        self.teardown().await;
    }

    fn camera(&self) -> &str {
        self.viewer.session.camera()
    }

    /// Keeps the polling timer alive exactly while the session polls.
    fn sync_ticker(&self, ticker: &mut Option<Interval>) {
        if self.viewer.session.state().is_polling() {
            if ticker.is_none() {
                let period = Duration::from_millis(self.viewer.config.poll_interval_ms);
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                *ticker = Some(interval);
            }
        } else if ticker.take().is_some() {
            debug!("Polling stopped for {}", self.camera());
        }
    }

    fn start_loads(&mut self, requests: Vec<FrameRequest>) {
        self.awaiting_first_frame |= requests.len() > 1;
        for request in requests {
            let source = Arc::clone(&self.viewer.source);
            self.loads.push(
                async move {
                    let result = match source.fetch(&request.url).await {
                        Ok(image) => {
                            decode_frame(request.token, &image.body).map_err(|err| err.to_string())
                        }
                        Err(err) => Err(err.to_string()),
                    };
                    (request, result)
                }
                .boxed(),
            );
        }
    }

    fn drop_loads(&mut self) {
        if !self.loads.is_empty() {
            debug!(
                "Abandoning {} in-flight loads for {}",
                self.loads.len(),
                self.camera()
            );
        }
        self.loads = FuturesUnordered::new();
    }

    fn refresh_published(&self) {
        self.published.send_replace(self.viewer.session.snapshot());
    }

    async fn publish(&mut self, payload: EventPayload) {
        let event = ViewerEvent::new(self.camera().to_string(), payload);
        if let Err(err) = self.viewer.publisher.publish(event).await {
            warn!("Failed to publish viewer event: {err}");
        }
    }

    async fn publish_transition(&mut self, from: PlaybackState, to: PlaybackState) {
        if from != to {
            info!("Viewer {}: {} -> {}", self.camera(), from.label(), to.label());
            self.publish(EventPayload::StateChanged { from, to }).await;
        }
    }

    async fn on_load(
        &mut self,
        request: FrameRequest,
        result: std::result::Result<DecodedFrame, String>,
    ) {
        let before = self.viewer.session.state().clone();
        match self.viewer.session.complete(&request, result) {
            LoadOutcome::Presented {
                token,
                width,
                height,
            } => {
                if self.awaiting_first_frame {
                    self.awaiting_first_frame = false;
                    self.publish(EventPayload::FramePresented {
                        token,
                        width,
                        height,
                    })
                    .await;
                }
            }
            LoadOutcome::Stale { token } => {
                debug!("Viewer {}: stale frame {} ignored", self.camera(), token);
            }
            LoadOutcome::Discarded => {}
            LoadOutcome::Failed {
                consecutive,
                message,
            } => {
                self.publish(EventPayload::LoadFailed {
                    token: request.token,
                    consecutive,
                    message,
                })
                .await;
            }
            LoadOutcome::Escalated(fault) => {
                warn!("Viewer {}: {}", self.camera(), fault);
                self.drop_loads();
                if let ViewerFault::StreamUnavailable {
                    consecutive_failures,
                    last_error,
                } = fault
                {
                    self.publish(EventPayload::LoadFailed {
                        token: request.token,
                        consecutive: consecutive_failures,
                        message: last_error,
                    })
                    .await;
                }
            }
        }
        let after = self.viewer.session.state().clone();
        self.publish_transition(before, after).await;
    }

    /// Returns false when the viewer should stop.
    async fn handle(&mut self, command: ViewerCommand) -> bool {
        debug!("Viewer {} handling {:?}", self.camera(), command);
        match command {
            ViewerCommand::Pause => self.pause().await,
            ViewerCommand::Resume => self.resume().await,
            ViewerCommand::Refresh => self.refresh().await,
            ViewerCommand::UpdateSource(stream) => self.reconfigure(stream).await,
            ViewerCommand::SetStatus(status) => {
                let url = self.viewer.session.source().url.clone();
                self.reconfigure(StreamSource::new(url, status)).await
            }
            ViewerCommand::Unmount => return false,
        }
        true
    }

    async fn pause(&mut self) {
        if !self.viewer.session.can_pause() {
            debug!(
                "Viewer {}: pause ignored in state {}",
                self.camera(),
                self.viewer.session.state().label()
            );
            return;
        }

        // Captured before anything else happens so the frozen frame is the
        // one on screen at the moment of the request.
        let captured = self
            .viewer
            .session
            .capture_from_buffers(&self.viewer.capture);
        let frozen = match captured {
            Some(frame) => frame,
            None => match self.capture_on_demand().await {
                Some(frame) => frame,
                None => StreamSession::placeholder_frame(self.viewer.placeholder.clone()),
            },
        };
        let origin = frozen.origin;

        let before = self.viewer.session.state().clone();
        if !self.viewer.session.commit_pause(frozen.clone()) {
            return;
        }
        self.drop_loads();
        self.viewer.hooks.paused();
        self.save_snapshot(frozen);

        self.publish_transition(before, PlaybackState::Paused).await;
        self.publish(EventPayload::Paused { origin }).await;
    }

    /// Writes the freeze-frame off the viewer task; the pause never waits on disk.
    fn save_snapshot(&self, frozen: FrozenFrame) {
        if !self.viewer.snapshots.is_enabled() || frozen.origin.is_placeholder() {
            return;
        }
        let store = self.viewer.snapshots.clone();
        let camera = self.camera().to_string();
        tokio::task::spawn_blocking(move || match store.persist(&camera, &frozen) {
            Ok(Some(path)) => info!("Saved freeze-frame to {:?}", path),
            Ok(None) => {}
            Err(err) => warn!("Could not save freeze-frame: {err}"),
        });
    }

    /// One fresh fetch used only for capturing. Bounded by the capture timeout.
    async fn capture_on_demand(&mut self) -> Option<FrozenFrame> {
        let request = self.viewer.session.capture_request(now_ms())?;
        let limit = Duration::from_millis(self.viewer.config.capture_timeout_ms);
        let fetched = match timeout(limit, self.viewer.source.fetch(&request.url)).await {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => {
                debug!("On-demand capture fetch failed: {err}");
                return None;
            }
            Err(_) => {
                debug!("On-demand capture fetch timed out after {:?}", limit);
                return None;
            }
        };
        let frame = match decode_frame(request.token, &fetched.body) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("On-demand capture decode failed: {err}");
                return None;
            }
        };
        let image = self.viewer.capture.capture(&frame)?;
        Some(FrozenFrame::new(
            image,
            CaptureOrigin::OnDemand,
            Some(request.token),
        ))
    }

    async fn resume(&mut self) {
        let Some(requests) = self.viewer.session.resume(now_ms()) else {
            debug!("Viewer {}: resume ignored, not paused", self.camera());
            return;
        };
        let token = requests
            .first()
            .map(|r| r.token)
            .unwrap_or_else(|| self.viewer.session.last_token());
        self.drop_loads();
        self.start_loads(requests);
        self.viewer.hooks.resumed();
        self.publish_transition(PlaybackState::Paused, PlaybackState::Live)
            .await;
        self.publish(EventPayload::Resumed { token }).await;
    }

    async fn refresh(&mut self) {
        let before = self.viewer.session.state().clone();
        self.drop_loads();
        let requests = self.viewer.session.refresh(now_ms());
        self.start_loads(requests);
        if let Some(fault) = self
            .viewer
            .session
            .state()
            .fault()
            .filter(|fault| fault.is_configuration())
        {
            info!("Viewer {}: still not pollable after refresh: {}", self.camera(), fault);
        }
        self.publish(EventPayload::Refreshed).await;
        let after = self.viewer.session.state().clone();
        self.publish_transition(before, after).await;
    }

    async fn reconfigure(&mut self, stream: StreamSource) {
        if &stream == self.viewer.session.source() {
            return;
        }
        let before = self.viewer.session.state().clone();
        self.drop_loads();
        self.publish(EventPayload::SourceChanged {
            url: stream.url.clone(),
            status: stream.status.clone(),
        })
        .await;
        let requests = self.viewer.session.reconfigure(stream, now_ms());
        self.start_loads(requests);
        let after = self.viewer.session.state().clone();
        self.publish_transition(before, after).await;
    }

    async fn teardown(&mut self) {
        self.drop_loads();
        self.viewer.session.teardown();
        self.refresh_published();
        info!("Viewer for {} unmounted", self.camera());
        let metrics = self.viewer.session.metrics().clone();
        self.publish(EventPayload::Unmounted { metrics }).await;
    }
}

/// Control surface of a mounted viewer. Dropping the handle unmounts it.
pub struct ViewerHandle {
    commands: mpsc::Sender<Envelope>,
    snapshots: watch::Receiver<ViewerSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ViewerHandle {
    async fn send(&self, command: ViewerCommand) -> Result<ViewerSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| viewer_error("viewer task is no longer running"))?;
        response
            .await
            .map_err(|_| viewer_error("viewer task stopped before replying"))
    }

    /// Freezes the current frame. No-op unless loading or live.
    pub async fn pause(&self) -> Result<ViewerSnapshot> {
        self.send(ViewerCommand::Pause).await
    }

    /// Returns to live updates. No-op unless paused.
    pub async fn resume(&self) -> Result<ViewerSnapshot> {
        self.send(ViewerCommand::Resume).await
    }

    /// Manual retry, available in any state.
    pub async fn refresh(&self) -> Result<ViewerSnapshot> {
        self.send(ViewerCommand::Refresh).await
    }

    pub async fn update_source(&self, stream: StreamSource) -> Result<ViewerSnapshot> {
        self.send(ViewerCommand::UpdateSource(stream)).await
    }

    pub async fn set_status(&self, status: impl Into<String>) -> Result<ViewerSnapshot> {
        self.send(ViewerCommand::SetStatus(status.into())).await
    }

    pub fn current(&self) -> ViewerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.snapshots.clone()
    }

    /// Stream of render snapshots, starting with the current one.
    pub fn snapshots(&self) -> impl Stream<Item = ViewerSnapshot> + Send + 'static {
        let mut rx = self.snapshots.clone();
        async_stream::stream! {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                yield snapshot;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Waits until a snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, limit: Duration, mut predicate: F) -> Result<ViewerSnapshot>
    where
        F: FnMut(&ViewerSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let waited = timeout(limit, async move {
            let snapshot = rx.wait_for(|snapshot| predicate(snapshot)).await?;
            Ok::<_, watch::error::RecvError>(snapshot.clone())
        })
        .await;
        match waited {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(viewer_error("viewer task ended while waiting")),
            Err(_) => Err(viewer_error(format!(
                "condition not reached within {:?}",
                limit
            ))),
        }
    }

    /// Stops polling, cancels in-flight loads and waits for the task to end.
    pub async fn unmount(mut self) -> Result<()> {
        let _ = self.send(ViewerCommand::Unmount).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| viewer_error(format!("viewer task failed: {err}")))?;
        }
        Ok(())
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
