//! Capture -> playback forwarding pipeline
//!
//! A [`Pipeline`] owns one capture and one playback handle for its whole
//! life. All platform work (route selection, opening, the forward loop and
//! teardown) happens on one blocking worker; the async side only sees a
//! readiness result and a join.
//!
//! ```text
//!   controller                      worker (spawn_blocking)
//!   ----------                      -----------------------
//!   Pipeline::start ──spawn──────▶  select route, enter comm mode,
//!        │                          voice link, open playback+capture
//!        ◀──────ready(Ok|Err)─────  │
//!        │                          loop { read frame; write if n > 0 }
//!   Pipeline::stop ──stop signal──▶ │
//!        │                          teardown (always)
//!        ◀──────────join──────────  exit
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::platform::{AudioPlatform, CaptureStream, PcmFormat, PlaybackStream, StreamParams};
use super::routing::{self, preferred_roles, Direction, Route};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;

/// Upper bound on the pause after a failed capture read
const ERROR_BACKOFF_MAX: Duration = Duration::from_millis(20);

/// Pipeline settings, fixed for the life of one pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub format: PcmFormat,
    pub read_timeout: Duration,
    pub noise_suppression: bool,
    pub activate_voice_link: bool,
}

impl PipelineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            format: config.audio.format(),
            read_timeout: config.audio.read_timeout(),
            noise_suppression: config.audio.noise_suppression,
            activate_voice_link: config.routing.activate_voice_link,
        }
    }

    /// Samples per forwarded frame: the platform's minimum-latency buffer,
    /// or `sample_rate * 2` bytes when it cannot recommend one
    pub fn frame_samples(&self, platform_min_bytes: Option<usize>) -> usize {
        let bytes = platform_min_bytes
            .filter(|b| *b > 0)
            .unwrap_or_else(|| self.format.fallback_buffer_bytes());
        self.format.samples_for_bytes(bytes)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

#[derive(Debug, Default)]
struct PipelineStats {
    frames_forwarded: AtomicU64,
    samples_forwarded: AtomicU64,
}

/// Totals reported when a pipeline is joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub frames_forwarded: u64,
    pub samples_forwarded: u64,
}

/// A running capture -> playback pipeline
///
/// Must be ended with [`Pipeline::stop`], which waits for the worker to
/// release every device. Dropping a pipeline only signals the worker.
pub struct Pipeline {
    id: Uuid,
    direction: Direction,
    route: Route,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    events: Arc<EventBus>,
}

impl Pipeline {
    /// Build the pipeline for `direction` and start forwarding
    ///
    /// Returns once the worker has opened both streams and entered the loop.
    /// On failure the worker has already torn down and been joined.
    pub async fn start(
        platform: Arc<dyn AudioPlatform>,
        direction: Direction,
        config: PipelineConfig,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        if !platform.has_capture_permission() {
            warn!("Microphone permission missing, not opening any device");
            return Err(AppError::PermissionDenied(
                "microphone capture permission not granted".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let stats = Arc::new(PipelineStats::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            "Starting pipeline {} ({} talks) on {} platform",
            id,
            direction,
            platform.name()
        );

        let worker = {
            let ctx = Worker {
                id,
                direction,
                config,
                platform,
                events: events.clone(),
                stats: stats.clone(),
                throttler: LogThrottler::default(),
            };
            tokio::task::spawn_blocking(move || ctx.run(ready_tx, stop_rx))
        };

        let route = match ready_rx.await {
            Ok(Ok(route)) => route,
            Ok(Err(e)) => {
                join_worker(id, worker).await;
                return Err(e);
            }
            Err(_) => {
                // Sender dropped without a verdict: the worker panicked
                join_worker(id, worker).await;
                return Err(AppError::Internal(format!(
                    "pipeline {} worker exited during start",
                    id
                )));
            }
        };

        events.publish(SystemEvent::PipelineStarted {
            pipeline_id: id,
            direction,
            capture: route.capture_id().map(str::to_string),
            playback: route.playback_id().map(str::to_string),
        });

        Ok(Self {
            id,
            direction,
            route,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            stats,
            events,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Endpoints this pipeline is bound to
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Signal the worker and wait until it has released every device
    pub async fn stop(mut self) -> PipelineSummary {
        debug!("Stopping pipeline {}", self.id);

        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            join_worker(self.id, worker).await;
        }

        let summary = PipelineSummary {
            frames_forwarded: self.stats.frames_forwarded.load(Ordering::Relaxed),
            samples_forwarded: self.stats.samples_forwarded.load(Ordering::Relaxed),
        };

        self.events.publish(SystemEvent::PipelineStopped {
            pipeline_id: self.id,
            frames_forwarded: summary.frames_forwarded,
            samples_forwarded: summary.samples_forwarded,
        });

        info!(
            "Pipeline {} stopped after {} frames ({} samples)",
            self.id, summary.frames_forwarded, summary.samples_forwarded
        );
        summary
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("Pipeline {} dropped without stop, worker detached", self.id);
        }
    }
}

async fn join_worker(id: Uuid, worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        error!("Pipeline {} worker panicked: {}", id, e);
    }
}

/// Everything the blocking worker owns
struct Worker {
    id: Uuid,
    direction: Direction,
    config: PipelineConfig,
    platform: Arc<dyn AudioPlatform>,
    events: Arc<EventBus>,
    stats: Arc<PipelineStats>,
    throttler: LogThrottler,
}

impl Worker {
    fn run(self, ready_tx: oneshot::Sender<Result<Route>>, mut stop_rx: oneshot::Receiver<()>) {
        let mut session = Session::new(self.platform.clone(), self.id);

        let opened = self.open(&mut session);
        let frame_samples = match opened {
            Ok((route, frame_samples)) => {
                if ready_tx.send(Ok(route)).is_err() {
                    debug!("Pipeline {} abandoned before it started", self.id);
                    return;
                }
                frame_samples
            }
            Err(e) => {
                warn!("Pipeline {} failed to start: {}", self.id, e);
                session.release();
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let (Some(capture), Some(playback)) = (session.capture.as_mut(), session.playback.as_mut())
        else {
            return;
        };

        self.forward(&mut **capture, &mut **playback, frame_samples, &mut stop_rx);
        // `session` drops here: unconditional teardown
    }

    /// Every step up to the loop; whatever was acquired is recorded in
    /// `session` so teardown can undo it
    fn open(&self, session: &mut Session) -> Result<(Route, usize)> {
        let platform = &self.platform;

        let endpoints = platform.list_endpoints();
        let route = routing::select(self.direction, &endpoints);
        self.report_fallbacks(&route);

        let frame_samples = self
            .config
            .frame_samples(platform.min_buffer_bytes(&self.config.format));
        let params = StreamParams {
            format: self.config.format,
            frame_samples,
            read_timeout: self.config.read_timeout,
        };
        debug!(
            "Pipeline {}: {} endpoints visible, {} samples per frame ({:?})",
            self.id,
            endpoints.len(),
            frame_samples,
            self.config.format.duration_of(frame_samples)
        );

        platform
            .enter_communication_mode()
            .map_err(|e| AppError::device_unavailable(None, e.to_string()))?;
        session.comm_mode = true;

        if self.direction == Direction::PartyBToA
            && self.config.activate_voice_link
            && !platform.is_voice_link_active()
        {
            platform
                .activate_voice_link(route.capture.as_ref())
                .map_err(|e| AppError::device_unavailable(route.capture_id(), e.to_string()))?;
            session.voice_link = true;
        }

        let mut playback = platform.open_playback(route.playback.as_ref(), &params)?;
        playback.start()?;
        session.playback = Some(playback);

        let mut capture = platform.open_capture(route.capture.as_ref(), &params)?;
        if self.config.noise_suppression {
            match capture.enable_noise_suppression() {
                Ok(()) => debug!("Noise suppression enabled"),
                Err(e) => warn!("Noise suppression not enabled: {}", e),
            }
        }
        capture.start()?;
        session.capture = Some(capture);

        info!(
            "Pipeline {} forwarding {} -> {}",
            self.id,
            route.capture_id().unwrap_or("default capture"),
            route.playback_id().unwrap_or("default playback"),
        );
        Ok((route, frame_samples))
    }

    fn report_fallbacks(&self, route: &Route) {
        let (capture_roles, playback_roles) = preferred_roles(self.direction);
        let slots = [
            (route.capture.is_none(), capture_roles, "capture"),
            (route.playback.is_none(), playback_roles, "playback"),
        ];

        for (missing, roles, purpose) in slots {
            let Some(role) = roles.first().filter(|_| missing) else {
                continue;
            };
            let condition = AppError::EndpointNotFound {
                role: role.to_string(),
                purpose: purpose.to_string(),
            };
            warn!("{}, using platform default", condition);
            self.events.publish(SystemEvent::EndpointFallback {
                role: role.to_string(),
                purpose: purpose.to_string(),
            });
        }
    }

    fn forward(
        &self,
        capture: &mut dyn CaptureStream,
        playback: &mut dyn PlaybackStream,
        frame_samples: usize,
        stop_rx: &mut oneshot::Receiver<()>,
    ) {
        let mut buf = vec![0i16; frame_samples];
        let backoff = self.config.read_timeout.min(ERROR_BACKOFF_MAX);

        let mut capture_failing = false;

        // A sent signal and a dropped sender both end the loop
        while let Err(oneshot::error::TryRecvError::Empty) = stop_rx.try_recv() {
            let read = match capture.read(&mut buf) {
                Ok(n) => n.min(buf.len()),
                Err(e) => {
                    capture_failing = true;
                    self.report_stream_error("capture", &e);
                    std::thread::sleep(backoff);
                    continue;
                }
            };
            if capture_failing {
                capture_failing = false;
                // The next failure is a new incident and is reported at once
                self.throttler.clear("capture");
                info!("Pipeline {} capture recovered", self.id);
            }
            if read == 0 {
                continue;
            }

            match playback.write(&buf[..read]) {
                Ok(_) => {
                    self.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .samples_forwarded
                        .fetch_add(read as u64, Ordering::Relaxed);
                }
                Err(e) => self.report_stream_error("playback", &e),
            }
        }

        debug!("Pipeline {} loop exited", self.id);
    }

    fn report_stream_error(&self, stream: &str, err: &AppError) {
        if let Some(suppressed) = self.throttler.check(stream) {
            warn!(
                suppressed,
                "Pipeline {} {} error: {}", self.id, stream, err
            );
            self.events.publish(SystemEvent::StreamError {
                pipeline_id: self.id,
                stream: stream.to_string(),
                reason: err.to_string(),
            });
        }
    }
}

/// Devices and platform switches held by one worker
///
/// Released exactly once, on every exit path including unwinding.
struct Session {
    platform: Arc<dyn AudioPlatform>,
    pipeline_id: Uuid,
    capture: Option<Box<dyn CaptureStream>>,
    playback: Option<Box<dyn PlaybackStream>>,
    comm_mode: bool,
    voice_link: bool,
}

impl Session {
    fn new(platform: Arc<dyn AudioPlatform>, pipeline_id: Uuid) -> Self {
        Self {
            platform,
            pipeline_id,
            capture: None,
            playback: None,
            comm_mode: false,
            voice_link: false,
        }
    }

    /// Idempotent; every step is attempted even if an earlier one failed
    fn release(&mut self) {
        let id = self.pipeline_id;

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                debug!("Pipeline {}: capture stop failed: {}", id, e);
            }
        }
        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.stop() {
                debug!("Pipeline {}: playback stop failed: {}", id, e);
            }
        }
        if std::mem::take(&mut self.comm_mode) {
            if let Err(e) = self.platform.leave_communication_mode() {
                debug!("Pipeline {}: leaving communication mode failed: {}", id, e);
            }
        }
        if std::mem::take(&mut self.voice_link) {
            if let Err(e) = self.platform.deactivate_voice_link() {
                debug!("Pipeline {}: voice link deactivation failed: {}", id, e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::endpoint::{Capability, Endpoint, EndpointRole};
    use crate::audio::mock::MockPlatform;

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("wired", "Wired headset", EndpointRole::Wired, Capability::DUPLEX),
            Endpoint::new(
                "bt-sco",
                "Bluetooth headset",
                EndpointRole::ShortRangeWireless,
                Capability::DUPLEX,
            ),
        ]
    }

    fn setup() -> (MockPlatform, Arc<dyn AudioPlatform>, Arc<EventBus>) {
        let mock = MockPlatform::new();
        mock.set_endpoints(endpoints());
        let platform: Arc<dyn AudioPlatform> = Arc::new(mock.clone());
        (mock, platform, Arc::new(EventBus::new()))
    }

    async fn wait_for_samples(mock: &MockPlatform, at_least: u64) {
        for _ in 0..500 {
            if mock.samples_written() >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("pipeline never forwarded {} samples", at_least);
    }

    #[test]
    fn test_frame_samples() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_samples(Some(640)), 320);
        // Fallback: sample_rate * 2 bytes = one second of mono S16
        assert_eq!(config.frame_samples(None), 16000);
        assert_eq!(config.frame_samples(Some(0)), 16000);
    }

    #[tokio::test]
    async fn test_forwards_captured_samples() {
        let (mock, platform, events) = setup();
        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();

        assert_eq!(pipeline.route().capture_id(), Some("wired"));
        assert_eq!(pipeline.route().playback_id(), Some("bt-sco"));
        assert!(mock.comm_mode_active());

        wait_for_samples(&mock, 960).await;
        let summary = pipeline.stop().await;

        assert_eq!(summary.samples_forwarded, mock.samples_written());
        assert_eq!(mock.samples_read(), mock.samples_written());
        let recorded = mock.recorded();
        assert!(recorded.iter().enumerate().all(|(i, s)| *s == i as i16));
        assert_eq!(mock.open_handles(), 0);
        assert!(!mock.comm_mode_active());
    }

    #[tokio::test]
    async fn test_frame_falls_back_without_platform_minimum() {
        let (mock, platform, events) = setup();
        mock.set_min_buffer_bytes(None);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        wait_for_samples(&mock, 16000).await;
        let summary = pipeline.stop().await;

        assert!(summary.frames_forwarded >= 1);
        assert_eq!(summary.samples_forwarded, summary.frames_forwarded * 16000);
        assert_eq!(mock.samples_written() % 16000, 0);
    }

    #[tokio::test]
    async fn test_capture_errors_reported_per_incident() {
        let (mock, platform, events) = setup();
        let mut rx = events.subscribe();
        mock.fail_reads(3);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        wait_for_samples(&mock, 320).await;

        let reads = mock.reads();
        mock.fail_reads(3);
        while mock.reads() < reads + 5 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let written = mock.samples_written();
        wait_for_samples(&mock, written + 320).await;
        pipeline.stop().await;

        let mut capture_errors = 0;
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::StreamError { stream, .. } = event {
                assert_eq!(stream, "capture");
                capture_errors += 1;
            }
        }
        // Repeats within one incident are throttled
        assert_eq!(capture_errors, 2);
        assert_eq!(mock.samples_read(), mock.samples_written());
    }

    #[tokio::test]
    async fn test_zero_length_reads_write_nothing() {
        let (mock, platform, events) = setup();
        mock.set_empty_reads(true);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        wait_for_samples(&mock, 640).await;
        let summary = pipeline.stop().await;

        assert!(mock.reads() > summary.frames_forwarded);
        assert_eq!(mock.samples_read(), mock.samples_written());
    }

    #[tokio::test]
    async fn test_permission_denied_opens_nothing() {
        let (mock, platform, events) = setup();
        mock.set_permission(false);

        let result = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await;

        assert!(matches!(result, Err(AppError::PermissionDenied(_))));
        assert!(mock.opened_ids().is_empty());
        assert_eq!(mock.comm_mode_enters(), 0);
    }

    #[tokio::test]
    async fn test_capture_failure_tears_down() {
        let (mock, platform, events) = setup();
        mock.fail_capture_open(true);

        let result = Pipeline::start(
            platform,
            Direction::PartyBToA,
            PipelineConfig::default(),
            events,
        )
        .await;

        assert!(matches!(result, Err(AppError::DeviceUnavailable { .. })));
        // Playback was opened first and must have been released
        assert_eq!(mock.playbacks_opened(), 1);
        assert_eq!(mock.open_handles(), 0);
        assert!(!mock.comm_mode_active());
        assert_eq!(mock.voice_link_activations(), 1);
        assert_eq!(mock.voice_link_deactivations(), 1);
    }

    #[tokio::test]
    async fn test_voice_link_only_for_pillion() {
        let (mock, platform, events) = setup();

        let rider = Pipeline::start(
            platform.clone(),
            Direction::PartyAToB,
            PipelineConfig::default(),
            events.clone(),
        )
        .await
        .unwrap();
        rider.stop().await;
        assert_eq!(mock.voice_link_activations(), 0);

        let pillion = Pipeline::start(
            platform,
            Direction::PartyBToA,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        assert_eq!(pillion.route().capture_id(), Some("bt-sco"));
        assert_eq!(mock.voice_link_activations(), 1);
        pillion.stop().await;
        assert_eq!(mock.voice_link_deactivations(), 1);
    }

    #[tokio::test]
    async fn test_existing_voice_link_is_left_alone() {
        let (mock, platform, events) = setup();
        mock.set_voice_link_active(true);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyBToA,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        pipeline.stop().await;

        assert_eq!(mock.voice_link_activations(), 0);
        assert_eq!(mock.voice_link_deactivations(), 0);
    }

    #[tokio::test]
    async fn test_missing_endpoints_fall_back_to_default() {
        let (mock, platform, events) = setup();
        mock.set_endpoints(Vec::new());
        let mut rx = events.subscribe();

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        pipeline.stop().await;

        assert_eq!(
            mock.opened_ids(),
            vec![("playback", None), ("capture", None)]
        );

        let mut fallbacks = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::EndpointFallback { purpose, .. } = event {
                fallbacks.push(purpose);
            }
        }
        assert_eq!(fallbacks, vec!["capture", "playback"]);
    }

    #[tokio::test]
    async fn test_suppression_unavailable_is_not_fatal() {
        let (mock, platform, events) = setup();
        mock.set_suppression_available(false);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyAToB,
            PipelineConfig::default(),
            events,
        )
        .await;
        tokio_test::assert_ok!(&pipeline);
        pipeline.unwrap().stop().await;
        assert_eq!(mock.suppression_enabled_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_errors_are_swallowed() {
        let (mock, platform, events) = setup();
        mock.fail_teardown(true);

        let pipeline = Pipeline::start(
            platform,
            Direction::PartyBToA,
            PipelineConfig::default(),
            events,
        )
        .await
        .unwrap();
        pipeline.stop().await;

        assert_eq!(mock.open_handles(), 0);
        assert_eq!(mock.comm_mode_leaves(), 1);
        assert_eq!(mock.voice_link_deactivations(), 1);
    }
}
