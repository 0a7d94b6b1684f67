//! Mock audio platform for testing without hardware.
//!
//! Every capability call is counted, and the number of simultaneously open
//! capture/playback handles is tracked so tests can assert that two
//! pipelines never hold devices at the same time.
//!
//! # Example
//!
//! ```
//! use moto_intercom::audio::mock::MockPlatform;
//! use moto_intercom::audio::{Capability, Endpoint, EndpointRole};
//!
//! let platform = MockPlatform::new();
//! platform.set_endpoints(vec![
//!     Endpoint::new("wired", "Wired headset", EndpointRole::Wired, Capability::DUPLEX),
//! ]);
//! platform.set_permission(false);
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::endpoint::Endpoint;
use super::platform::{
    AudioPlatform, CaptureStream, CommunicationControl, EndpointSource, PcmFormat,
    PermissionCheck, PlaybackStream, StreamFactory, StreamParams,
};
use crate::error::{AppError, Result};

/// Upper bound on samples kept by the playback recorder
const RECORD_LIMIT: usize = 64 * 1024;

#[derive(Default)]
struct Counters {
    captures_opened: AtomicU64,
    playbacks_opened: AtomicU64,
    captures_open: AtomicUsize,
    playbacks_open: AtomicUsize,
    max_captures_open: AtomicUsize,
    max_playbacks_open: AtomicUsize,
    samples_read: AtomicU64,
    samples_written: AtomicU64,
    reads: AtomicU64,
    comm_enters: AtomicU64,
    comm_leaves: AtomicU64,
    link_activations: AtomicU64,
    link_deactivations: AtomicU64,
    suppression_enabled: AtomicU64,
}

struct MockState {
    endpoints: Mutex<Vec<Endpoint>>,
    permission: AtomicBool,
    min_buffer_bytes: Mutex<Option<usize>>,
    fail_capture_open: AtomicBool,
    fail_playback_open: AtomicBool,
    fail_teardown: AtomicBool,
    suppression_available: AtomicBool,
    empty_reads: AtomicBool,
    failing_reads: AtomicU64,
    read_pace: Mutex<Duration>,
    comm_mode: AtomicBool,
    voice_link: AtomicBool,
    opened_ids: Mutex<Vec<(&'static str, Option<String>)>>,
    recorded: Mutex<Vec<i16>>,
    ramp: AtomicU64,
    counters: Counters,
}

/// Hardware-free [`AudioPlatform`]
///
/// Cloning shares the same state, so a test can hand one clone to the
/// controller and inspect the other.
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<MockState>,
}

impl MockPlatform {
    /// Permission granted, no endpoints, 20ms recommended buffer
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                endpoints: Mutex::new(Vec::new()),
                permission: AtomicBool::new(true),
                min_buffer_bytes: Mutex::new(Some(640)),
                fail_capture_open: AtomicBool::new(false),
                fail_playback_open: AtomicBool::new(false),
                fail_teardown: AtomicBool::new(false),
                suppression_available: AtomicBool::new(true),
                empty_reads: AtomicBool::new(false),
                failing_reads: AtomicU64::new(0),
                read_pace: Mutex::new(Duration::from_millis(2)),
                comm_mode: AtomicBool::new(false),
                voice_link: AtomicBool::new(false),
                opened_ids: Mutex::new(Vec::new()),
                recorded: Mutex::new(Vec::new()),
                ramp: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.state.endpoints.lock() = endpoints;
    }

    pub fn set_permission(&self, granted: bool) {
        self.state.permission.store(granted, Ordering::SeqCst);
    }

    /// `None` simulates a platform that cannot recommend a buffer size
    pub fn set_min_buffer_bytes(&self, bytes: Option<usize>) {
        *self.state.min_buffer_bytes.lock() = bytes;
    }

    pub fn fail_capture_open(&self, fail: bool) {
        self.state.fail_capture_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_playback_open(&self, fail: bool) {
        self.state.fail_playback_open.store(fail, Ordering::SeqCst);
    }

    /// Make every stop/leave/deactivate call return an error
    pub fn fail_teardown(&self, fail: bool) {
        self.state.fail_teardown.store(fail, Ordering::SeqCst);
    }

    pub fn set_suppression_available(&self, available: bool) {
        self.state
            .suppression_available
            .store(available, Ordering::SeqCst);
    }

    /// Alternate real reads with zero-length ones
    pub fn set_empty_reads(&self, enabled: bool) {
        self.state.empty_reads.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `count` capture reads fail
    pub fn fail_reads(&self, count: u64) {
        self.state.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Delay applied to every capture read
    pub fn set_read_pace(&self, pace: Duration) {
        *self.state.read_pace.lock() = pace;
    }

    /// Pretend something outside the engine already brought the link up
    pub fn set_voice_link_active(&self, active: bool) {
        self.state.voice_link.store(active, Ordering::SeqCst);
    }

    pub fn captures_opened(&self) -> u64 {
        self.state.counters.captures_opened.load(Ordering::SeqCst)
    }

    pub fn playbacks_opened(&self) -> u64 {
        self.state.counters.playbacks_opened.load(Ordering::SeqCst)
    }

    /// Handles currently alive (capture + playback)
    pub fn open_handles(&self) -> usize {
        self.state.counters.captures_open.load(Ordering::SeqCst)
            + self.state.counters.playbacks_open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open capture handles ever seen
    pub fn max_concurrent_captures(&self) -> usize {
        self.state.counters.max_captures_open.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_playbacks(&self) -> usize {
        self.state.counters.max_playbacks_open.load(Ordering::SeqCst)
    }

    pub fn samples_read(&self) -> u64 {
        self.state.counters.samples_read.load(Ordering::SeqCst)
    }

    pub fn samples_written(&self) -> u64 {
        self.state.counters.samples_written.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.state.counters.reads.load(Ordering::SeqCst)
    }

    pub fn comm_mode_active(&self) -> bool {
        self.state.comm_mode.load(Ordering::SeqCst)
    }

    pub fn comm_mode_enters(&self) -> u64 {
        self.state.counters.comm_enters.load(Ordering::SeqCst)
    }

    pub fn comm_mode_leaves(&self) -> u64 {
        self.state.counters.comm_leaves.load(Ordering::SeqCst)
    }

    pub fn voice_link_activations(&self) -> u64 {
        self.state.counters.link_activations.load(Ordering::SeqCst)
    }

    pub fn voice_link_deactivations(&self) -> u64 {
        self.state.counters.link_deactivations.load(Ordering::SeqCst)
    }

    pub fn suppression_enabled_count(&self) -> u64 {
        self.state.counters.suppression_enabled.load(Ordering::SeqCst)
    }

    /// `(stream kind, endpoint id)` for every open call, in order
    pub fn opened_ids(&self) -> Vec<(&'static str, Option<String>)> {
        self.state.opened_ids.lock().clone()
    }

    /// Samples that reached playback, in order (capped)
    pub fn recorded(&self) -> Vec<i16> {
        self.state.recorded.lock().clone()
    }

    fn teardown_result(&self, what: &str) -> Result<()> {
        if self.state.fail_teardown.load(Ordering::SeqCst) {
            Err(AppError::Internal(format!("mock {} failure", what)))
        } else {
            Ok(())
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn track_open(open: &AtomicUsize, max: &AtomicUsize) {
    let now = open.fetch_add(1, Ordering::SeqCst) + 1;
    max.fetch_max(now, Ordering::SeqCst);
}

impl PermissionCheck for MockPlatform {
    fn has_capture_permission(&self) -> bool {
        self.state.permission.load(Ordering::SeqCst)
    }
}

impl EndpointSource for MockPlatform {
    fn list_endpoints(&self) -> Vec<Endpoint> {
        self.state.endpoints.lock().clone()
    }
}

impl StreamFactory for MockPlatform {
    fn min_buffer_bytes(&self, _format: &PcmFormat) -> Option<usize> {
        *self.state.min_buffer_bytes.lock()
    }

    fn open_capture(
        &self,
        endpoint: Option<&Endpoint>,
        _params: &StreamParams,
    ) -> Result<Box<dyn CaptureStream>> {
        let id = endpoint.map(|e| e.id.clone());
        self.state.opened_ids.lock().push(("capture", id.clone()));

        if self.state.fail_capture_open.load(Ordering::SeqCst) {
            return Err(AppError::device_unavailable(
                id.as_deref(),
                "mock capture open failure",
            ));
        }

        let counters = &self.state.counters;
        counters.captures_opened.fetch_add(1, Ordering::SeqCst);
        track_open(&counters.captures_open, &counters.max_captures_open);

        Ok(Box::new(MockCapture {
            platform: self.clone(),
            started: false,
            toggle: false,
        }))
    }

    fn open_playback(
        &self,
        endpoint: Option<&Endpoint>,
        _params: &StreamParams,
    ) -> Result<Box<dyn PlaybackStream>> {
        let id = endpoint.map(|e| e.id.clone());
        self.state.opened_ids.lock().push(("playback", id.clone()));

        if self.state.fail_playback_open.load(Ordering::SeqCst) {
            return Err(AppError::device_unavailable(
                id.as_deref(),
                "mock playback open failure",
            ));
        }

        let counters = &self.state.counters;
        counters.playbacks_opened.fetch_add(1, Ordering::SeqCst);
        track_open(&counters.playbacks_open, &counters.max_playbacks_open);

        Ok(Box::new(MockPlayback {
            platform: self.clone(),
        }))
    }
}

impl CommunicationControl for MockPlatform {
    fn enter_communication_mode(&self) -> Result<()> {
        self.state.counters.comm_enters.fetch_add(1, Ordering::SeqCst);
        self.state.comm_mode.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn leave_communication_mode(&self) -> Result<()> {
        self.state.counters.comm_leaves.fetch_add(1, Ordering::SeqCst);
        self.state.comm_mode.store(false, Ordering::SeqCst);
        self.teardown_result("leave_communication_mode")
    }

    fn is_voice_link_active(&self) -> bool {
        self.state.voice_link.load(Ordering::SeqCst)
    }

    fn activate_voice_link(&self, _endpoint: Option<&Endpoint>) -> Result<()> {
        self.state
            .counters
            .link_activations
            .fetch_add(1, Ordering::SeqCst);
        self.state.voice_link.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate_voice_link(&self) -> Result<()> {
        self.state
            .counters
            .link_deactivations
            .fetch_add(1, Ordering::SeqCst);
        self.state.voice_link.store(false, Ordering::SeqCst);
        self.teardown_result("deactivate_voice_link")
    }
}

impl AudioPlatform for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Capture producing a monotonically increasing ramp, so forwarded audio can
/// be checked sample by sample
struct MockCapture {
    platform: MockPlatform,
    started: bool,
    toggle: bool,
}

impl CaptureStream for MockCapture {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let state = &self.platform.state;
        let pace = *state.read_pace.lock();
        if !pace.is_zero() {
            std::thread::sleep(pace);
        }
        state.counters.reads.fetch_add(1, Ordering::SeqCst);

        if !self.started {
            return Err(AppError::StreamError("capture not started".into()));
        }

        if state
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::StreamError("capture overrun".into()));
        }

        if state.empty_reads.load(Ordering::SeqCst) {
            self.toggle = !self.toggle;
            if self.toggle {
                return Ok(0);
            }
        }

        let base = state.ramp.fetch_add(buf.len() as u64, Ordering::SeqCst);
        for (i, sample) in buf.iter_mut().enumerate() {
            *sample = (base + i as u64) as i16;
        }
        state
            .counters
            .samples_read
            .fetch_add(buf.len() as u64, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn enable_noise_suppression(&mut self) -> Result<()> {
        let state = &self.platform.state;
        if state.suppression_available.load(Ordering::SeqCst) {
            state
                .counters
                .suppression_enabled
                .fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(AppError::SuppressionUnavailable(
                "mock platform has no suppressor".into(),
            ))
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.platform.teardown_result("capture stop")
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        self.platform
            .state
            .counters
            .captures_open
            .fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockPlayback {
    platform: MockPlatform,
}

impl PlaybackStream for MockPlayback {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let state = &self.platform.state;
        state
            .counters
            .samples_written
            .fetch_add(samples.len() as u64, Ordering::SeqCst);

        let mut recorded = state.recorded.lock();
        let room = RECORD_LIMIT.saturating_sub(recorded.len());
        recorded.extend_from_slice(&samples[..samples.len().min(room)]);
        Ok(samples.len())
    }

    fn stop(&mut self) -> Result<()> {
        self.platform.teardown_result("playback stop")
    }
}

impl Drop for MockPlayback {
    fn drop(&mut self) {
        self.platform
            .state
            .counters
            .playbacks_open
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StreamParams {
        StreamParams {
            format: PcmFormat::VOICE,
            frame_samples: 4,
            read_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_handle_counting() {
        let platform = MockPlatform::new();
        let a = platform.open_capture(None, &params()).unwrap();
        let b = platform.open_capture(None, &params()).unwrap();
        assert_eq!(platform.open_handles(), 2);
        assert_eq!(platform.max_concurrent_captures(), 2);

        drop(a);
        drop(b);
        assert_eq!(platform.open_handles(), 0);
        assert_eq!(platform.captures_opened(), 2);
    }

    #[test]
    fn test_capture_ramp() {
        let platform = MockPlatform::new();
        platform.set_read_pace(Duration::ZERO);
        let mut capture = platform.open_capture(None, &params()).unwrap();
        capture.start().unwrap();

        let mut buf = [0i16; 4];
        assert_eq!(capture.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(capture.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [4, 5, 6, 7]);
    }

    #[test]
    fn test_scripted_failures() {
        let platform = MockPlatform::new();
        platform.fail_playback_open(true);
        let result = platform.open_playback(None, &params());
        assert!(matches!(result, Err(AppError::DeviceUnavailable { .. })));
        assert_eq!(platform.open_handles(), 0);
        assert_eq!(platform.opened_ids(), vec![("playback", None)]);
    }
}
