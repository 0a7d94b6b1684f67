//! Command surface and the transition table
//!
//! [`plan`] is the whole state machine: it turns (state, command) into the
//! ordered steps the controller executes. It performs no I/O, so every row
//! of the table is testable without a platform.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::state::{MuteState, SessionState};
use crate::error::AppError;

/// Commands accepted from collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Begin routing in the stored direction
    Start,
    /// Toggle which party's microphone is live
    SwitchDirection,
    /// Suspend the pipeline, keep the direction
    Mute,
    /// Resume the pipeline in the stored direction
    Unmute,
    /// Mute when running, unmute when muted
    ToggleMute,
    /// Tear everything down
    Stop,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::SwitchDirection => "switch_direction",
            Command::Mute => "mute",
            Command::Unmute => "unmute",
            Command::ToggleMute => "toggle_mute",
            Command::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "start" => Ok(Command::Start),
            "switch" | "switch_direction" | "flip" => Ok(Command::SwitchDirection),
            "mute" => Ok(Command::Mute),
            "unmute" => Ok(Command::Unmute),
            "toggle" | "toggle_mute" => Ok(Command::ToggleMute),
            "stop" => Ok(Command::Stop),
            other => Err(AppError::BadRequest(format!("unknown command: {}", other))),
        }
    }
}

/// One unit of work inside a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Build a pipeline for the stored direction; later steps are skipped
    /// if this fails
    StartPipeline,
    /// Signal and join the current pipeline, if any
    StopPipeline,
    FlipDirection,
    SetMute(MuteState),
}

/// Steps that carry out `command` from `state`; empty means no-op
pub fn plan(state: &SessionState, command: Command) -> Vec<Step> {
    use Step::*;

    match (command, state.running, state.mute) {
        (Command::Start, false, MuteState::Unmuted) => vec![StartPipeline],
        (Command::Start, _, _) => Vec::new(),

        (Command::SwitchDirection, true, _) => vec![StopPipeline, FlipDirection, StartPipeline],
        (Command::SwitchDirection, false, _) => vec![FlipDirection],

        (Command::Mute, true, _) => vec![StopPipeline, SetMute(MuteState::Muted)],
        (Command::Mute, false, _) => Vec::new(),

        (Command::Unmute, false, MuteState::Muted) => {
            vec![StartPipeline, SetMute(MuteState::Unmuted)]
        }
        (Command::Unmute, _, _) => Vec::new(),

        (Command::ToggleMute, true, _) => plan(state, Command::Mute),
        (Command::ToggleMute, false, MuteState::Muted) => plan(state, Command::Unmute),
        (Command::ToggleMute, false, MuteState::Unmuted) => Vec::new(),

        (Command::Stop, true, _) => vec![StopPipeline, SetMute(MuteState::Unmuted)],
        (Command::Stop, false, MuteState::Muted) => vec![SetMute(MuteState::Unmuted)],
        (Command::Stop, false, MuteState::Unmuted) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Direction;

    fn stopped() -> SessionState {
        SessionState::default()
    }

    fn running() -> SessionState {
        SessionState {
            running: true,
            ..SessionState::default()
        }
    }

    fn muted() -> SessionState {
        SessionState {
            mute: MuteState::Muted,
            ..SessionState::new(Direction::PartyBToA)
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!(" Switch ".parse::<Command>().unwrap(), Command::SwitchDirection);
        assert_eq!("toggle-mute".parse::<Command>().unwrap(), Command::ToggleMute);
        assert!(matches!(
            "reverse".parse::<Command>(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_command_serde_names() {
        let json = serde_json::to_string(&Command::SwitchDirection).unwrap();
        assert_eq!(json, "\"switch_direction\"");
        assert_eq!(
            serde_json::from_str::<Command>("\"toggle_mute\"").unwrap(),
            Command::ToggleMute
        );
    }

    #[test]
    fn test_start() {
        assert_eq!(plan(&stopped(), Command::Start), vec![Step::StartPipeline]);
        assert!(plan(&running(), Command::Start).is_empty());
        assert!(plan(&muted(), Command::Start).is_empty());
    }

    #[test]
    fn test_switch_direction() {
        assert_eq!(
            plan(&running(), Command::SwitchDirection),
            vec![Step::StopPipeline, Step::FlipDirection, Step::StartPipeline]
        );
        assert_eq!(plan(&muted(), Command::SwitchDirection), vec![Step::FlipDirection]);
        assert_eq!(plan(&stopped(), Command::SwitchDirection), vec![Step::FlipDirection]);
    }

    #[test]
    fn test_mute_unmute() {
        assert_eq!(
            plan(&running(), Command::Mute),
            vec![Step::StopPipeline, Step::SetMute(MuteState::Muted)]
        );
        assert!(plan(&muted(), Command::Mute).is_empty());
        assert!(plan(&stopped(), Command::Mute).is_empty());

        assert_eq!(
            plan(&muted(), Command::Unmute),
            vec![Step::StartPipeline, Step::SetMute(MuteState::Unmuted)]
        );
        assert!(plan(&running(), Command::Unmute).is_empty());
        assert!(plan(&stopped(), Command::Unmute).is_empty());
    }

    #[test]
    fn test_toggle_mute() {
        assert_eq!(plan(&running(), Command::ToggleMute), plan(&running(), Command::Mute));
        assert_eq!(plan(&muted(), Command::ToggleMute), plan(&muted(), Command::Unmute));
        assert!(plan(&stopped(), Command::ToggleMute).is_empty());
    }

    #[test]
    fn test_stop() {
        assert_eq!(
            plan(&running(), Command::Stop),
            vec![Step::StopPipeline, Step::SetMute(MuteState::Unmuted)]
        );
        assert_eq!(
            plan(&muted(), Command::Stop),
            vec![Step::SetMute(MuteState::Unmuted)]
        );
        assert!(plan(&stopped(), Command::Stop).is_empty());
    }

    #[test]
    fn test_every_pipeline_start_is_preceded_by_a_stop_when_running() {
        let commands = [
            Command::Start,
            Command::SwitchDirection,
            Command::Mute,
            Command::Unmute,
            Command::ToggleMute,
            Command::Stop,
        ];
        for command in commands {
            let steps = plan(&running(), command);
            if let Some(start) = steps.iter().position(|s| *s == Step::StartPipeline) {
                assert!(steps[..start].contains(&Step::StopPipeline), "{}", command);
            }
        }
    }
}
