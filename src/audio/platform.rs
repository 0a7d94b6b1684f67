//! Platform capabilities the engine depends on
//!
//! The engine never talks to the sound system directly. Everything it needs
//! (permission query, endpoint enumeration, stream construction, and the
//! global "communication mode" / "voice link" switches) is supplied through
//! these traits, so a real backend ([`super::alsa::AlsaPlatform`]) and a test
//! backend ([`super::mock::MockPlatform`]) are interchangeable.

use std::time::Duration;

use super::endpoint::Endpoint;
use crate::error::Result;

/// PCM format for both streams of a pipeline (signed 16-bit interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl PcmFormat {
    /// 16 kHz mono: the widest format every SCO link accepts
    pub const VOICE: PcmFormat = PcmFormat {
        sample_rate: 16000,
        channels: 1,
    };

    /// Bytes per interleaved frame (S16)
    pub fn bytes_per_frame(&self) -> usize {
        2 * self.channels as usize
    }

    /// Hard floor for the forwarding buffer when the platform cannot
    /// recommend one: `sample_rate * 2` bytes
    pub fn fallback_buffer_bytes(&self) -> usize {
        self.sample_rate as usize * 2
    }

    /// Number of i16 samples in a buffer of `bytes`, rounded down to whole
    /// interleaved frames and never zero
    pub fn samples_for_bytes(&self, bytes: usize) -> usize {
        let frames = (bytes / self.bytes_per_frame()).max(1);
        frames * self.channels as usize
    }

    /// Wall-clock length of `samples` interleaved samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        let frames = samples as u64 / u64::from(self.channels.max(1));
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate.max(1)))
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::VOICE
    }
}

/// Parameters for opening one stream
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub format: PcmFormat,
    /// Samples moved per read/write call
    pub frame_samples: usize,
    /// Upper bound for a single blocking capture read
    pub read_timeout: Duration,
}

/// Microphone access query
pub trait PermissionCheck {
    fn has_capture_permission(&self) -> bool;
}

/// Endpoint enumeration
///
/// Side-effect free and infallible: a platform that cannot enumerate reports
/// an empty list.
pub trait EndpointSource {
    fn list_endpoints(&self) -> Vec<Endpoint>;
}

/// A capture handle, owned by exactly one pipeline worker
pub trait CaptureStream {
    fn start(&mut self) -> Result<()>;

    /// Read up to `buf.len()` samples. Blocks for at most the read timeout;
    /// a timeout is `Ok(0)`.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;

    /// Enable platform noise suppression on this capture session.
    /// `AppError::SuppressionUnavailable` when the platform has none.
    fn enable_noise_suppression(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// A playback handle, owned by exactly one pipeline worker
pub trait PlaybackStream {
    fn start(&mut self) -> Result<()>;

    /// Write all of `samples`, returning how many were accepted
    fn write(&mut self, samples: &[i16]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;
}

/// Stream construction
///
/// `None` as endpoint means the platform default device for that direction.
/// Handles are released when dropped.
pub trait StreamFactory {
    /// Minimum-latency buffer size in bytes for `format`, if the platform
    /// can tell
    fn min_buffer_bytes(&self, format: &PcmFormat) -> Option<usize>;

    fn open_capture(
        &self,
        endpoint: Option<&Endpoint>,
        params: &StreamParams,
    ) -> Result<Box<dyn CaptureStream>>;

    fn open_playback(
        &self,
        endpoint: Option<&Endpoint>,
        params: &StreamParams,
    ) -> Result<Box<dyn PlaybackStream>>;
}

/// Global, ambient routing switches of the platform
pub trait CommunicationControl {
    /// Route capture and playback for two-way voice instead of media
    fn enter_communication_mode(&self) -> Result<()>;

    fn leave_communication_mode(&self) -> Result<()>;

    fn is_voice_link_active(&self) -> bool;

    /// Bring up the voice-grade wireless link (SCO) for `endpoint`, or for
    /// whatever headset the platform picks when `None`
    fn activate_voice_link(&self, endpoint: Option<&Endpoint>) -> Result<()>;

    fn deactivate_voice_link(&self) -> Result<()>;
}

/// Everything a pipeline needs from the platform
pub trait AudioPlatform:
    PermissionCheck + EndpointSource + StreamFactory + CommunicationControl + Send + Sync + 'static
{
    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
