//! Session state and the status snapshot published to observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MuteState {
    #[default]
    Unmuted,
    Muted,
}

impl MuteState {
    pub fn is_muted(&self) -> bool {
        matches!(self, MuteState::Muted)
    }
}

/// Session lifecycle phase as seen by observers
///
/// `Starting` and `Stopping` are transient: they are only visible while a
/// command is building or joining a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Muted,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Stopped => "stopped",
            SessionPhase::Starting => "starting",
            SessionPhase::Running => "running",
            SessionPhase::Stopping => "stopping",
            SessionPhase::Muted => "muted",
        };
        f.write_str(name)
    }
}

/// The single source of truth for the session
///
/// `running` is true exactly when a pipeline exists. `Muted` never holds a
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionState {
    pub running: bool,
    pub direction: Direction,
    pub mute: MuteState,
}

impl SessionState {
    pub fn new(direction: Direction) -> Self {
        Self {
            running: false,
            direction,
            mute: MuteState::Unmuted,
        }
    }

    /// Settled phase for this state
    pub fn phase(&self) -> SessionPhase {
        match (self.running, self.mute) {
            (true, _) => SessionPhase::Running,
            (false, MuteState::Muted) => SessionPhase::Muted,
            (false, MuteState::Unmuted) => SessionPhase::Stopped,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }
}

/// Snapshot published through the controller's status channel
#[derive(Debug, Clone, Serialize)]
pub struct IntercomStatus {
    #[serde(flatten)]
    pub state: SessionState,
    pub phase: SessionPhase,
    /// Who is talking, "rider" or "pillion"
    pub speaker: &'static str,
    pub pipeline_id: Option<Uuid>,
    /// Pipelines successfully built since startup
    pub pipelines_built: u64,
    /// Most recent command failure, cleared by the next successful build
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IntercomStatus {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            phase: state.phase(),
            speaker: state.direction.speaker(),
            pipeline_id: None,
            pipelines_built: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}
