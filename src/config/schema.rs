use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{Direction, PcmFormat};
use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Stream format and forwarding loop settings
    pub audio: AudioConfig,
    /// Routing defaults
    pub routing: RoutingConfig,
    /// Endpoint classification rules
    pub devices: DeviceConfig,
}

impl AppConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(AppError::Config("audio.sample_rate must be > 0".into()));
        }
        if !(1..=2).contains(&self.audio.channels) {
            return Err(AppError::Config(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.read_timeout_ms == 0 {
            return Err(AppError::Config(
                "audio.read_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Audio stream configuration
///
/// The defaults match what a Bluetooth SCO link carries (16kHz mono S16).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u32,
    /// Capture read timeout; bounds how long a stop request can wait
    pub read_timeout_ms: u64,
    /// Ask the platform for noise suppression on the capture stream
    pub noise_suppression: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            read_timeout_ms: 100,
            noise_suppression: true,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Direction a fresh session starts in
    pub default_direction: Direction,
    /// Bring up the voice link (SCO) explicitly when the pillion talks
    pub activate_voice_link: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_direction: Direction::PartyAToB,
            activate_voice_link: true,
        }
    }
}

/// Endpoint classification rules
///
/// Keywords are matched case-insensitively against the device name and its
/// description. Wireless lists are checked first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub wired_keywords: Vec<String>,
    pub short_range_keywords: Vec<String>,
    pub wireless_media_keywords: Vec<String>,
    /// Hint names starting with any of these are not endpoints (raw `hw:`
    /// devices that cannot convert format, virtual surround layouts, digital
    /// outputs, mixing plugins, sound servers)
    pub ignored_prefixes: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wired_keywords: strings(&["usb", "headset", "headphone", "analog", "jack"]),
            short_range_keywords: strings(&[
                "profile=sco",
                "bluealsa",
                "bluez",
                "bluetooth",
                "hfp",
                "hsp",
            ]),
            wireless_media_keywords: strings(&["profile=a2dp", "a2dp"]),
            ignored_prefixes: strings(&[
                "hw:",
                "usbstream:",
                "null",
                "default",
                "sysdefault",
                "front:",
                "rear:",
                "center_lfe:",
                "side:",
                "surround",
                "iec958:",
                "spdif",
                "dmix:",
                "dsnoop:",
                "hdmi:",
                "lavrate",
                "samplerate",
                "speexrate",
                "upmix",
                "vdownmix",
                "jack",
                "oss",
                "pipewire",
                "pulse",
            ]),
        }
    }
}
