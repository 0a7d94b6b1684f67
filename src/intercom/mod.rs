//! Intercom session: state, commands and the controller that runs them

pub mod command;
pub mod controller;
pub mod state;

pub use command::{plan, Command, Step};
pub use controller::IntercomController;
pub use state::{IntercomStatus, MuteState, SessionPhase, SessionState};
