//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::Direction;
use crate::intercom::{MuteState, SessionPhase};

/// System event enumeration
///
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "intercom.state_changed",
///   "data": { "running": true, "direction": "rider", "mute": "unmuted", "phase": "running" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// Session state snapshot changed
    #[serde(rename = "intercom.state_changed")]
    StateChanged {
        running: bool,
        direction: Direction,
        mute: MuteState,
        phase: SessionPhase,
    },

    /// A pipeline opened its devices and entered the forwarding loop
    #[serde(rename = "intercom.pipeline_started")]
    PipelineStarted {
        pipeline_id: Uuid,
        direction: Direction,
        /// Capture endpoint id (None = platform default)
        capture: Option<String>,
        /// Playback endpoint id (None = platform default)
        playback: Option<String>,
    },

    /// A pipeline was joined and released its devices
    #[serde(rename = "intercom.pipeline_stopped")]
    PipelineStopped {
        pipeline_id: Uuid,
        frames_forwarded: u64,
        samples_forwarded: u64,
    },

    /// No endpoint of the preferred role; the platform default is used
    #[serde(rename = "intercom.endpoint_fallback")]
    EndpointFallback {
        /// Role that was looked for, e.g. "short_range_wireless"
        role: String,
        /// "capture" or "playback"
        purpose: String,
    },

    /// Microphone permission missing; the user has to grant it and retry
    #[serde(rename = "intercom.permission_denied")]
    PermissionDenied {
        /// Command that failed, e.g. "start"
        command: String,
        reason: String,
    },

    /// A capture or playback handle could not be opened
    #[serde(rename = "intercom.device_unavailable")]
    DeviceUnavailable {
        command: String,
        device: Option<String>,
        reason: String,
    },

    /// Read or write failure inside a running loop (throttled)
    #[serde(rename = "intercom.stream_error")]
    StreamError {
        pipeline_id: Uuid,
        /// "capture" or "playback"
        stream: String,
        reason: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "intercom.state_changed",
            Self::PipelineStarted { .. } => "intercom.pipeline_started",
            Self::PipelineStopped { .. } => "intercom.pipeline_stopped",
            Self::EndpointFallback { .. } => "intercom.endpoint_fallback",
            Self::PermissionDenied { .. } => "intercom.permission_denied",
            Self::DeviceUnavailable { .. } => "intercom.device_unavailable",
            Self::StreamError { .. } => "intercom.stream_error",
        }
    }

    /// Conditions the UI should prompt the user about
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::DeviceUnavailable { .. }
        )
    }
}
