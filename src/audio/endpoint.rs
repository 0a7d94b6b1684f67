//! Audio endpoints and their classification
//!
//! An [`Endpoint`] is a snapshot of one device the platform reported at
//! discovery time. The engine never caches endpoints beyond a single
//! routing decision.

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;

/// What kind of transport an endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    /// Wired headset or headphones (jack, USB)
    Wired,
    /// Voice-grade wireless headset (Bluetooth HFP/HSP, SCO)
    ShortRangeWireless,
    /// Media-grade wireless sink (Bluetooth A2DP)
    WirelessMedia,
}

impl EndpointRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Wired => "wired",
            EndpointRole::ShortRangeWireless => "short_range_wireless",
            EndpointRole::WirelessMedia => "wireless_media",
        }
    }

    /// Any Bluetooth-style endpoint
    pub fn is_wireless(&self) -> bool {
        !matches!(self, EndpointRole::Wired)
    }
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stream directions an endpoint can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub input: bool,
    pub output: bool,
}

impl Capability {
    pub const INPUT: Capability = Capability {
        input: true,
        output: false,
    };
    pub const OUTPUT: Capability = Capability {
        input: false,
        output: true,
    };
    pub const DUPLEX: Capability = Capability {
        input: true,
        output: true,
    };
}

/// One audio endpoint as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Platform identifier (an ALSA PCM name such as `plughw:1,0`)
    pub id: String,
    /// Human-readable description
    pub description: String,
    pub role: EndpointRole,
    pub capability: Capability,
}

impl Endpoint {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        role: EndpointRole,
        capability: Capability,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            capability,
        }
    }

    pub fn can_capture(&self) -> bool {
        self.capability.input
    }

    pub fn can_play(&self) -> bool {
        self.capability.output
    }
}

/// Classify an endpoint from its name and description
///
/// Wireless keywords are checked before wired ones: a Bluetooth headset often
/// also calls itself a "headset". Media-grade wireless wins over voice-grade
/// when both match (e.g. `bluealsa:...,PROFILE=a2dp`). Returns `None` for
/// devices that match nothing.
pub fn classify(name: &str, description: &str, devices: &DeviceConfig) -> Option<EndpointRole> {
    let haystack = format!("{} {}", name, description).to_lowercase();
    let matches = |keywords: &[String]| {
        keywords
            .iter()
            .any(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
    };

    if matches(&devices.wireless_media_keywords) {
        Some(EndpointRole::WirelessMedia)
    } else if matches(&devices.short_range_keywords) {
        Some(EndpointRole::ShortRangeWireless)
    } else if matches(&devices.wired_keywords) {
        Some(EndpointRole::Wired)
    } else {
        None
    }
}
