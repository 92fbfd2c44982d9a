//! Live/paused state machine for one viewing session.
//!
//! `StreamSession` performs no I/O. It decides which requests to issue, which
//! completions to keep, and what to capture when pausing; the viewer task
//! executes the requests and feeds results back in.
//!
//! Ordering rules:
//! - every request carries a strictly increasing [`RequestToken`];
//! - a completed frame is displayed only if its token is newer than the
//!   displayed one, so a slow response never replaces a newer frame;
//! - every request also carries the session [`Epoch`]; pausing, resuming,
//!   refreshing, escalating and reconfiguring start a new epoch and any
//!   completion from an older one is dropped.

use camwatch_capture::FrameCapture;
use camwatch_types::{
    camera::StreamSource,
    config::ViewerConfig,
    frame::{CaptureOrigin, DecodedFrame, EncodedImage, FrozenFrame},
    playback::{Epoch, PlaybackState, RequestToken, ViewerFault},
    telemetry::ViewerMetrics,
};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    buffer::{BufferRole, FrameBuffer},
    render::{Display, ViewerSnapshot},
    request::{cache_busted, FrameRequest, RequestTarget},
};

/// Result of feeding a completed request back into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The frame is now on screen.
    Presented {
        token: RequestToken,
        width: u32,
        height: u32,
    },
    /// Decoded fine but older than what is displayed.
    Stale { token: RequestToken },
    /// Belongs to an earlier epoch; ignored entirely.
    Discarded,
    /// Transient failure, tolerated.
    Failed { consecutive: u32, message: String },
    /// Failure threshold reached; polling must stop.
    Escalated(ViewerFault),
}

pub struct StreamSession {
    camera: String,
    source: StreamSource,
    base_url: Option<Url>,
    config: ViewerConfig,
    state: PlaybackState,
    live: FrameBuffer,
    prefetch: FrameBuffer,
    frozen: Option<FrozenFrame>,
    error_count: u32,
    epoch: Epoch,
    last_token: RequestToken,
    last_requested_at: Option<DateTime<Utc>>,
    in_flight: usize,
    metrics: ViewerMetrics,
}

impl StreamSession {
    /// Creates a session in `Loading`, or directly in `Errored` when the
    /// source cannot be polled.
    pub fn new(camera: impl Into<String>, source: StreamSource, config: ViewerConfig) -> Self {
        let mut session = Self {
            camera: camera.into(),
            source: source.clone(),
            base_url: None,
            config,
            state: PlaybackState::Loading,
            live: FrameBuffer::new(BufferRole::Live),
            prefetch: FrameBuffer::new(BufferRole::Prefetch),
            frozen: None,
            error_count: 0,
            epoch: Epoch::default(),
            last_token: RequestToken::default(),
            last_requested_at: None,
            in_flight: 0,
            metrics: ViewerMetrics::default(),
        };
        session.evaluate_source();
        session
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_token(&self) -> RequestToken {
        self.last_token
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn frozen(&self) -> Option<&FrozenFrame> {
        self.frozen.as_ref()
    }

    pub fn buffer(&self, role: BufferRole) -> &FrameBuffer {
        match role {
            BufferRole::Live => &self.live,
            BufferRole::Prefetch => &self.prefetch,
        }
    }

    pub fn metrics(&self) -> &ViewerMetrics {
        &self.metrics
    }

    fn buffer_mut(&mut self, role: BufferRole) -> &mut FrameBuffer {
        match role {
            BufferRole::Live => &mut self.live,
            BufferRole::Prefetch => &mut self.prefetch,
        }
    }

    /// Re-checks status and URL. Leaves the session in `Loading` or `Errored`.
    fn evaluate_source(&mut self) {
        match self.source.resolve() {
            Ok(url) => {
                self.base_url = Some(url);
                self.state = PlaybackState::Loading;
            }
            Err(fault) => {
                debug!("Camera {} not pollable: {}", self.camera, fault);
                self.base_url = None;
                self.state = PlaybackState::Errored(fault);
            }
        }
    }

    /// Starts a new epoch: in-flight work is abandoned.
    fn advance_epoch(&mut self) {
        self.epoch = self.epoch.next();
        self.live.cancel_pending();
        self.prefetch.cancel_pending();
        self.in_flight = 0;
    }

    fn next_request(&mut self, target: RequestTarget, now_ms: u64) -> Option<FrameRequest> {
        let base = self.base_url.as_ref()?;
        let token = RequestToken::next_after(self.last_token, now_ms);
        let url = cache_busted(base, &self.config.cache_bust_param, token);
        self.last_token = token;
        self.last_requested_at = Utc.timestamp_millis_opt(now_ms as i64).single();
        self.metrics.requests_issued += 1;
        Some(FrameRequest {
            token,
            epoch: self.epoch,
            target,
            url,
        })
    }

    fn issue(&mut self, role: BufferRole, now_ms: u64) -> Option<FrameRequest> {
        if !self.state.is_polling() {
            return None;
        }
        let request = self.next_request(RequestTarget::Buffer(role), now_ms)?;
        self.buffer_mut(role).begin(request.token);
        self.in_flight += 1;
        Some(request)
    }

    /// Issues fresh requests into both buffers so the next frame on screen
    /// does not wait for a polling tick.
    pub fn prime(&mut self, now_ms: u64) -> Vec<FrameRequest> {
        [BufferRole::Live, BufferRole::Prefetch]
            .into_iter()
            .filter_map(|role| self.issue(role, now_ms))
            .collect()
    }

    /// One polling step: load the next frame into the hidden buffer.
    pub fn tick(&mut self, now_ms: u64) -> Option<FrameRequest> {
        if self.in_flight >= self.config.max_in_flight {
            trace!(
                "Camera {}: {} requests in flight, skipping tick",
                self.camera,
                self.in_flight
            );
            return None;
        }
        self.issue(BufferRole::Prefetch, now_ms)
    }

    /// Feeds a finished request back in. `result` carries the decoded frame
    /// or a description of why loading failed.
    pub fn complete(
        &mut self,
        request: &FrameRequest,
        result: Result<DecodedFrame, String>,
    ) -> LoadOutcome {
        if request.epoch != self.epoch {
            trace!(
                "Camera {}: dropping completion {} from epoch {:?}",
                self.camera,
                request.token,
                request.epoch
            );
            return LoadOutcome::Discarded;
        }
        if let RequestTarget::Buffer(role) = request.target {
            self.buffer_mut(role).settle(request.token);
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        match result {
            Ok(frame) => self.accept_frame(frame),
            Err(message) => self.record_failure(request.token, message),
        }
    }

    fn accept_frame(&mut self, frame: DecodedFrame) -> LoadOutcome {
        self.error_count = 0;
        if self.state == PlaybackState::Loading {
            self.state = PlaybackState::Live;
        }

        let token = frame.token;
        let newer = self.live.token().map_or(true, |shown| token > shown);
        if !newer {
            self.metrics.stale_discarded += 1;
            return LoadOutcome::Stale { token };
        }

        let (width, height) = (frame.width, frame.height);
        // The frame that was on screen becomes the hidden buffer's content.
        if let Some(previous) = self.live.store(Some(frame)) {
            self.prefetch.store(Some(previous));
        }
        if self.live.supersede(token) {
            trace!(
                "Camera {}: frame {} superseded the visible buffer's request",
                self.camera,
                token
            );
        }
        self.metrics.frames_presented += 1;
        self.metrics.last_frame_at = Some(Utc::now());
        LoadOutcome::Presented {
            token,
            width,
            height,
        }
    }

    fn record_failure(&mut self, token: RequestToken, message: String) -> LoadOutcome {
        self.error_count += 1;
        self.metrics.load_failures += 1;
        debug!(
            "Camera {}: frame {} failed ({}/{}): {}",
            self.camera, token, self.error_count, self.config.error_threshold, message
        );

        if self.error_count < self.config.error_threshold {
            return LoadOutcome::Failed {
                consecutive: self.error_count,
                message,
            };
        }

        warn!(
            "Camera {}: {} consecutive frame failures, stopping live view",
            self.camera, self.error_count
        );
        let fault = ViewerFault::StreamUnavailable {
            consecutive_failures: self.error_count,
            last_error: message,
        };
        self.state = PlaybackState::Errored(fault.clone());
        self.advance_epoch();
        LoadOutcome::Escalated(fault)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self.state, PlaybackState::Live | PlaybackState::Loading)
    }

    /// Captures from the buffers without changing any state: the visible
    /// buffer first, then the hidden one. Only fully decoded buffers qualify.
    pub fn capture_from_buffers(&self, capture: &dyn FrameCapture) -> Option<FrozenFrame> {
        [&self.live, &self.prefetch].into_iter().find_map(|buffer| {
            let frame = buffer.decoded()?;
            let image = capture.capture(frame)?;
            let origin = match buffer.role() {
                BufferRole::Live => CaptureOrigin::LiveBuffer,
                BufferRole::Prefetch => CaptureOrigin::PrefetchBuffer,
            };
            Some(FrozenFrame::new(image, origin, Some(frame.token)))
        })
    }

    /// Request used for the on-demand capture fallback. Only valid while a
    /// pause is possible.
    pub fn capture_request(&mut self, now_ms: u64) -> Option<FrameRequest> {
        if !self.can_pause() {
            return None;
        }
        self.next_request(RequestTarget::Capture, now_ms)
    }

    /// Placeholder freeze-frame used when every capture attempt failed.
    pub fn placeholder_frame(image: EncodedImage) -> FrozenFrame {
        FrozenFrame::new(image, CaptureOrigin::Placeholder, None)
    }

    /// Commits the pause. Returns false (and changes nothing) when the session
    /// cannot pause, e.g. when already paused.
    pub fn commit_pause(&mut self, frozen: FrozenFrame) -> bool {
        if !self.can_pause() {
            return false;
        }
        self.metrics.pauses += 1;
        if frozen.origin.is_placeholder() {
            self.metrics.placeholder_pauses += 1;
        }
        self.frozen = Some(frozen);
        self.state = PlaybackState::Paused;
        self.advance_epoch();
        true
    }

    /// `Paused -> Live`. Returns the requests to issue, or `None` when not
    /// paused.
    pub fn resume(&mut self, now_ms: u64) -> Option<Vec<FrameRequest>> {
        if !self.state.is_paused() {
            return None;
        }
        self.frozen = None;
        self.state = PlaybackState::Live;
        self.advance_epoch();
        Some(self.prime(now_ms))
    }

    /// Manual retry, valid in any state.
    pub fn refresh(&mut self, now_ms: u64) -> Vec<FrameRequest> {
        self.frozen = None;
        self.error_count = 0;
        self.advance_epoch();
        self.evaluate_source();
        self.prime(now_ms)
    }

    /// Switches to a new source or status. Behaves like a fresh mount while
    /// keeping tokens monotonic.
    pub fn reconfigure(&mut self, source: StreamSource, now_ms: u64) -> Vec<FrameRequest> {
        self.source = source;
        self.frozen = None;
        self.error_count = 0;
        self.live.reset();
        self.prefetch.reset();
        self.advance_epoch();
        self.evaluate_source();
        self.prime(now_ms)
    }

    /// Abandons all outstanding work; used at unmount.
    pub fn teardown(&mut self) {
        self.advance_epoch();
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        let display = match &self.state {
            PlaybackState::Errored(fault) => Display::Error {
                message: fault.message(),
            },
            PlaybackState::Paused => match &self.frozen {
                Some(frozen) => Display::Frozen(frozen.clone()),
                None => Display::Loading,
            },
            PlaybackState::Loading | PlaybackState::Live => match self.live.frame() {
                Some(frame) => Display::Live(frame.clone()),
                None => Display::Loading,
            },
        };

        ViewerSnapshot {
            camera: self.camera.clone(),
            url: self.source.url.clone(),
            state: self.state.clone(),
            display,
            loading: self.state == PlaybackState::Loading,
            error_count: self.error_count,
            last_token: self.last_token,
            last_requested_at: self.last_requested_at,
            metrics: self.metrics.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn load_hidden(&mut self, frame: DecodedFrame) {
        self.prefetch.store(Some(frame));
        self.prefetch.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_capture::RasterCapture;

    const NOW: u64 = 1_700_000_000_000;

    fn session() -> StreamSession {
        StreamSession::new(
            "gate-3",
            StreamSource::active("http://cam.local/frame"),
            ViewerConfig::default(),
        )
    }

    fn frame(token: RequestToken) -> DecodedFrame {
        DecodedFrame::new(token, 2, 2, [token.0 as u8, 0, 0, 255].repeat(4))
    }

    fn succeed(session: &mut StreamSession, request: &FrameRequest) -> LoadOutcome {
        session.complete(request, Ok(frame(request.token)))
    }

    fn fail(session: &mut StreamSession, request: &FrameRequest) -> LoadOutcome {
        session.complete(request, Err("connection reset".into()))
    }

    /// Mounts and presents one frame; returns its token.
    fn go_live(session: &mut StreamSession) -> RequestToken {
        let requests = session.prime(NOW);
        assert_eq!(requests.len(), 2);
        for request in &requests {
            succeed(session, request);
        }
        assert_eq!(session.state(), &PlaybackState::Live);
        requests[1].token
    }

    #[test]
    fn inactive_camera_errors_without_requests() {
        let mut session = StreamSession::new(
            "gate-3",
            StreamSource::new("http://cam.local/frame", "inactive"),
            ViewerConfig::default(),
        );
        assert_eq!(
            session.state(),
            &PlaybackState::Errored(ViewerFault::CameraInactive)
        );
        assert!(session.prime(NOW).is_empty());
        assert!(session.tick(NOW).is_none());
    }

    #[test]
    fn missing_url_reports_no_stream() {
        let session = StreamSession::new("gate-3", StreamSource::active(""), ViewerConfig::default());
        assert_eq!(
            session.state(),
            &PlaybackState::Errored(ViewerFault::NoStreamConfigured)
        );
        assert!(session.snapshot().display.is_error());
    }

    #[test]
    fn first_frame_goes_live_and_ticks_target_hidden_buffer() {
        let mut session = session();
        go_live(&mut session);

        let request = session.tick(NOW + 50).expect("tick issues request");
        assert_eq!(request.target, RequestTarget::Buffer(BufferRole::Prefetch));
        assert!(request.url.as_str().contains(&format!("t={}", request.token)));
        assert!(session.buffer(BufferRole::Prefetch).pending().is_some());
    }

    #[test]
    fn slow_response_never_replaces_newer_frame() {
        let mut session = session();
        let slow = session.prime(NOW).remove(0);
        let fast = session.tick(NOW + 50).expect("tick");

        assert!(matches!(succeed(&mut session, &fast), LoadOutcome::Presented { .. }));
        assert_eq!(
            succeed(&mut session, &slow),
            LoadOutcome::Stale { token: slow.token }
        );
        assert_eq!(session.snapshot().live_token(), Some(fast.token));
        assert_eq!(session.metrics().stale_discarded, 1);
    }

    #[test]
    fn presented_frame_pushes_previous_into_hidden_buffer() {
        let mut session = session();
        let first = go_live(&mut session);
        let next = session.tick(NOW + 50).expect("tick");
        succeed(&mut session, &next);

        assert_eq!(session.buffer(BufferRole::Live).token(), Some(next.token));
        assert_eq!(session.buffer(BufferRole::Prefetch).token(), Some(first));
    }

    #[test]
    fn three_consecutive_failures_escalate() {
        let mut session = session();
        let requests = session.prime(NOW);
        let third = session.tick(NOW + 50).expect("tick");

        assert!(matches!(
            fail(&mut session, &requests[0]),
            LoadOutcome::Failed { consecutive: 1, .. }
        ));
        assert!(matches!(
            fail(&mut session, &requests[1]),
            LoadOutcome::Failed { consecutive: 2, .. }
        ));
        assert_eq!(session.state(), &PlaybackState::Loading);

        let outcome = fail(&mut session, &third);
        assert!(matches!(outcome, LoadOutcome::Escalated(_)));
        assert!(matches!(
            session.state(),
            PlaybackState::Errored(ViewerFault::StreamUnavailable {
                consecutive_failures: 3,
                ..
            })
        ));
        assert!(session.tick(NOW + 100).is_none());
    }

    #[test]
    fn success_between_failures_resets_counter() {
        let mut session = session();
        let requests = session.prime(NOW);
        let third = session.tick(NOW + 50).expect("tick");

        fail(&mut session, &requests[0]);
        fail(&mut session, &requests[1]);
        succeed(&mut session, &third);
        assert_eq!(session.error_count(), 0);
        assert_eq!(session.state(), &PlaybackState::Live);

        let again = session.tick(NOW + 100).expect("tick");
        assert!(matches!(
            fail(&mut session, &again),
            LoadOutcome::Failed { consecutive: 1, .. }
        ));
    }

    #[test]
    fn pause_prefers_visible_buffer() {
        let mut session = session();
        let shown = go_live(&mut session);
        session.load_hidden(frame(RequestToken(shown.0 + 10)));

        let frozen = session
            .capture_from_buffers(&RasterCapture::png())
            .expect("capture");
        assert_eq!(frozen.origin, CaptureOrigin::LiveBuffer);
        assert_eq!(frozen.source_token, Some(shown));
    }

    #[test]
    fn pause_falls_back_to_hidden_buffer_while_visible_is_loading() {
        let mut session = session();
        let first = go_live(&mut session);
        let next = session.tick(NOW + 50).expect("tick");
        succeed(&mut session, &next);
        // Refresh puts both buffers back into a loading state.
        let requests = session.refresh(NOW + 100);
        // Hidden request settles without a frame; the visible one is still out.
        fail(&mut session, &requests[1]);
        assert!(session.buffer(BufferRole::Live).decoded().is_none());

        let frozen = session
            .capture_from_buffers(&RasterCapture::png())
            .expect("capture");
        assert_eq!(frozen.origin, CaptureOrigin::PrefetchBuffer);
        assert_eq!(frozen.source_token, Some(first));
    }

    #[test]
    fn pause_after_resume_freezes_the_displayed_frame() {
        let mut session = session();
        go_live(&mut session);
        let capture = RasterCapture::png();
        let first = session.capture_from_buffers(&capture).expect("capture");
        session.commit_pause(first.clone());

        // Only the hidden request comes back before the second pause.
        let requests = session.resume(NOW + 500).expect("resume");
        succeed(&mut session, &requests[1]);
        let shown = session.snapshot().live_token();
        assert_eq!(shown, Some(requests[1].token));

        let frozen = session.capture_from_buffers(&capture).expect("capture");
        assert_eq!(frozen.origin, CaptureOrigin::LiveBuffer);
        assert_eq!(frozen.source_token, shown);
        assert_ne!(frozen.source_token, first.source_token);

        // The visible buffer's own request arrives late and is stale.
        assert_eq!(
            succeed(&mut session, &requests[0]),
            LoadOutcome::Stale {
                token: requests[0].token
            }
        );
    }

    #[test]
    fn no_decoded_buffer_means_no_buffer_capture() {
        let mut session = session();
        session.prime(NOW);
        assert!(session.capture_from_buffers(&RasterCapture::png()).is_none());
        let request = session.capture_request(NOW).expect("capture request");
        assert_eq!(request.target, RequestTarget::Capture);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut session = session();
        go_live(&mut session);
        let frozen = session
            .capture_from_buffers(&RasterCapture::png())
            .expect("capture");
        assert!(session.commit_pause(frozen.clone()));
        let epoch = session.epoch();

        let placeholder = StreamSession::placeholder_frame(camwatch_capture::builtin_placeholder());
        assert!(!session.commit_pause(placeholder));
        assert_eq!(session.epoch(), epoch);
        assert_eq!(
            session.frozen().map(|f| f.origin),
            Some(CaptureOrigin::LiveBuffer)
        );
        assert_eq!(session.metrics().pauses, 1);
        assert!(session.capture_request(NOW).is_none());
    }

    #[test]
    fn resume_while_live_is_noop() {
        let mut session = session();
        go_live(&mut session);
        let epoch = session.epoch();
        assert!(session.resume(NOW + 10).is_none());
        assert_eq!(session.epoch(), epoch);
        assert_eq!(session.state(), &PlaybackState::Live);
    }

    #[test]
    fn resume_issues_fresher_tokens_into_both_buffers() {
        let mut session = session();
        go_live(&mut session);
        let before_pause = session.tick(NOW + 50).expect("tick").token;
        let frozen = session
            .capture_from_buffers(&RasterCapture::png())
            .expect("capture");
        session.commit_pause(frozen);

        // Clock stepped backwards across the pause.
        let requests = session.resume(NOW).expect("resume");
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.token > before_pause));
        assert!(session.frozen().is_none());
        assert_eq!(session.state(), &PlaybackState::Live);
    }

    #[test]
    fn completions_from_before_pause_are_discarded() {
        let mut session = session();
        go_live(&mut session);
        let in_flight = session.tick(NOW + 50).expect("tick");
        let frozen = session
            .capture_from_buffers(&RasterCapture::png())
            .expect("capture");
        session.commit_pause(frozen);

        assert_eq!(succeed(&mut session, &in_flight), LoadOutcome::Discarded);
        assert_eq!(fail(&mut session, &in_flight), LoadOutcome::Discarded);
        assert_eq!(session.error_count(), 0);
    }

    #[test]
    fn pause_resume_pause_freezes_latest_frame() {
        let mut session = session();
        go_live(&mut session);
        let capture = RasterCapture::png();
        let first = session.capture_from_buffers(&capture).expect("capture");
        session.commit_pause(first.clone());

        let requests = session.resume(NOW + 500).expect("resume");
        succeed(&mut session, &requests[0]);
        let second = session.capture_from_buffers(&capture).expect("capture");
        session.commit_pause(second);

        let frozen = session.frozen().expect("frozen frame");
        assert_eq!(frozen.source_token, Some(requests[0].token));
        assert!(frozen.source_token > first.source_token);
    }

    #[test]
    fn refresh_clears_error_and_restarts_loading() {
        let mut session = session();
        let requests = session.prime(NOW);
        let third = session.tick(NOW).expect("tick");
        for request in requests.iter().chain(std::iter::once(&third)) {
            fail(&mut session, request);
        }
        assert!(session.state().fault().is_some());

        let retry = session.refresh(NOW + 1_000);
        assert_eq!(retry.len(), 2);
        assert_eq!(session.state(), &PlaybackState::Loading);
        assert_eq!(session.error_count(), 0);
    }

    #[test]
    fn refresh_reevaluates_configuration_faults() {
        let mut session = StreamSession::new(
            "gate-3",
            StreamSource::new("http://cam.local/frame", "offline"),
            ViewerConfig::default(),
        );
        assert!(session.refresh(NOW).is_empty());
        assert_eq!(
            session.state(),
            &PlaybackState::Errored(ViewerFault::CameraInactive)
        );
    }

    #[test]
    fn going_inactive_while_live_errors_immediately() {
        let mut session = session();
        go_live(&mut session);
        let issued = session.metrics().requests_issued;

        let requests = session.reconfigure(
            StreamSource::new("http://cam.local/frame", "inactive"),
            NOW + 10,
        );
        assert!(requests.is_empty());
        assert_eq!(session.metrics().requests_issued, issued);
        assert_eq!(
            session.state(),
            &PlaybackState::Errored(ViewerFault::CameraInactive)
        );
    }

    #[test]
    fn in_flight_requests_are_bounded() {
        let mut session = session();
        session.prime(NOW);
        let max = ViewerConfig::default().max_in_flight;
        let mut issued = 2;
        while session.tick(NOW).is_some() {
            issued += 1;
        }
        assert_eq!(issued, max);
        assert_eq!(session.in_flight(), max);
    }
}
