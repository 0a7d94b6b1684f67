//! Routing policy
//!
//! Maps the active talk direction and the currently visible endpoints to a
//! capture/playback pair. Pure: no platform calls, no state.

use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, EndpointRole};

/// Which party's microphone is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Rider talks on the wired headset, pillion hears on the wireless one
    #[default]
    #[serde(rename = "rider", alias = "party_a_to_b")]
    PartyAToB,
    /// Pillion talks on the wireless headset, rider hears on the wired one
    #[serde(rename = "pillion", alias = "party_b_to_a")]
    PartyBToA,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::PartyAToB => Direction::PartyBToA,
            Direction::PartyBToA => Direction::PartyAToB,
        }
    }

    /// Label of the party whose microphone is live
    pub fn speaker(&self) -> &'static str {
        match self {
            Direction::PartyAToB => "rider",
            Direction::PartyBToA => "pillion",
        }
    }

    /// Parse from a user-supplied label
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "rider" | "a" | "a-to-b" | "party_a_to_b" => Some(Direction::PartyAToB),
            "pillion" | "passenger" | "b" | "b-to-a" | "party_b_to_a" => {
                Some(Direction::PartyBToA)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.speaker())
    }
}

/// Endpoints chosen for one pipeline build
///
/// `None` means "use the platform default device for this direction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub capture: Option<Endpoint>,
    pub playback: Option<Endpoint>,
}

impl Route {
    pub fn capture_id(&self) -> Option<&str> {
        self.capture.as_ref().map(|e| e.id.as_str())
    }

    pub fn playback_id(&self) -> Option<&str> {
        self.playback.as_ref().map(|e| e.id.as_str())
    }
}

const WIRED: &[EndpointRole] = &[EndpointRole::Wired];
const VOICE_WIRELESS: &[EndpointRole] = &[EndpointRole::ShortRangeWireless];
const ANY_WIRELESS: &[EndpointRole] = &[
    EndpointRole::ShortRangeWireless,
    EndpointRole::WirelessMedia,
];

/// Roles wanted for (capture, playback), each in preference order
pub fn preferred_roles(direction: Direction) -> (&'static [EndpointRole], &'static [EndpointRole]) {
    match direction {
        Direction::PartyAToB => (WIRED, ANY_WIRELESS),
        Direction::PartyBToA => (VOICE_WIRELESS, WIRED),
    }
}

/// Choose capture and playback endpoints for `direction`
///
/// The first endpoint (in discovery order) of the most preferred role wins.
/// Missing roles leave the slot empty; this never fails.
pub fn select(direction: Direction, endpoints: &[Endpoint]) -> Route {
    let (capture_roles, playback_roles) = preferred_roles(direction);

    let capture = pick(endpoints, capture_roles, Endpoint::can_capture);
    let playback = pick(endpoints, playback_roles, Endpoint::can_play);

    Route { capture, playback }
}

fn pick(
    endpoints: &[Endpoint],
    roles: &[EndpointRole],
    capable: fn(&Endpoint) -> bool,
) -> Option<Endpoint> {
    roles.iter().find_map(|role| {
        endpoints
            .iter()
            .find(|e| e.role == *role && capable(e))
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::endpoint::Capability;

    fn wired() -> Endpoint {
        Endpoint::new("plughw:1,0", "USB Headset", EndpointRole::Wired, Capability::DUPLEX)
    }

    fn sco() -> Endpoint {
        Endpoint::new(
            "bluealsa:PROFILE=sco",
            "Bluetooth",
            EndpointRole::ShortRangeWireless,
            Capability::DUPLEX,
        )
    }

    fn a2dp() -> Endpoint {
        Endpoint::new(
            "bluealsa:PROFILE=a2dp",
            "Bluetooth",
            EndpointRole::WirelessMedia,
            Capability::OUTPUT,
        )
    }

    #[test]
    fn test_rider_talks() {
        let route = select(Direction::PartyAToB, &[wired(), sco()]);
        assert_eq!(route.capture, Some(wired()));
        assert_eq!(route.playback, Some(sco()));
    }

    #[test]
    fn test_pillion_talks() {
        let route = select(Direction::PartyBToA, &[wired(), sco()]);
        assert_eq!(route.capture, Some(sco()));
        assert_eq!(route.playback, Some(wired()));
    }

    #[test]
    fn test_no_endpoints() {
        assert_eq!(select(Direction::PartyAToB, &[]), Route::default());
        assert_eq!(select(Direction::PartyBToA, &[]), Route::default());
    }

    #[test]
    fn test_rider_playback_falls_back_to_wireless_media() {
        let route = select(Direction::PartyAToB, &[a2dp(), wired(), sco()]);
        assert_eq!(route.playback, Some(sco()));

        let route = select(Direction::PartyAToB, &[wired(), a2dp()]);
        assert_eq!(route.playback, Some(a2dp()));

        // Media sinks cannot capture, so the pillion still talks over SCO
        let route = select(Direction::PartyBToA, &[a2dp(), sco(), wired()]);
        assert_eq!(route.capture, Some(sco()));
    }

    #[test]
    fn test_missing_role_leaves_slot_empty() {
        let route = select(Direction::PartyBToA, &[wired()]);
        assert_eq!(route.capture, None);
        assert_eq!(route.playback, Some(wired()));
    }

    #[test]
    fn test_capability_filters_candidates() {
        let wired_out = Endpoint::new("hw:0,0", "Speakers", EndpointRole::Wired, Capability::OUTPUT);
        let route = select(Direction::PartyAToB, &[wired_out.clone(), wired()]);
        assert_eq!(route.capture, Some(wired()));

        let route = select(Direction::PartyBToA, &[wired_out.clone(), wired()]);
        assert_eq!(route.playback, Some(wired_out));
    }

    #[test]
    fn test_first_of_role_wins() {
        let second = Endpoint::new("plughw:2,0", "Other", EndpointRole::Wired, Capability::DUPLEX);
        let route = select(Direction::PartyAToB, &[wired(), second]);
        assert_eq!(route.capture_id(), Some("plughw:1,0"));
    }

    #[test]
    fn test_direction_flip_and_labels() {
        assert_eq!(Direction::default(), Direction::PartyAToB);
        assert_eq!(Direction::PartyAToB.flipped().flipped(), Direction::PartyAToB);
        assert_eq!(Direction::from_label("Pillion"), Some(Direction::PartyBToA));
        assert_eq!(Direction::from_label("rider"), Some(Direction::PartyAToB));
        assert_eq!(Direction::from_label("driver"), None);
        assert_eq!(
            serde_json::to_string(&Direction::PartyBToA).unwrap(),
            "\"pillion\""
        );
    }
}
