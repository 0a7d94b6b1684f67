//! moto-intercom - rider/pillion audio intercom
//!
//! Routes one party's microphone to the other party's headset over a
//! different transport (wired or Bluetooth), and lets the direction be
//! switched, muted or stopped while audio is flowing.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod intercom;
pub mod utils;

pub use error::{AppError, Result};
