//! ALSA platform backend
//!
//! Endpoint discovery from PCM hints, blocking S16 capture/playback, and the
//! Bluetooth voice link expressed through bluez-alsa's SCO profile.

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, Frames, HwParams, State};
use alsa::{Direction as PcmDirection, ValueOr, PCM};
use nix::unistd::{access, AccessFlags};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

use super::endpoint::{classify, Capability, Endpoint};
use super::platform::{
    AudioPlatform, CaptureStream, CommunicationControl, EndpointSource, PcmFormat,
    PermissionCheck, PlaybackStream, StreamFactory, StreamParams,
};
use crate::config::DeviceConfig;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::warn_throttled;

const DEFAULT_PCM: &str = "default";
const SOUND_DEVICE_DIR: &str = "/dev/snd";

/// ALSA implementation of [`AudioPlatform`]
pub struct AlsaPlatform {
    devices: DeviceConfig,
    comm_mode: AtomicBool,
    /// Endpoint id the SCO link was brought up for (empty = any headset)
    voice_link: Mutex<Option<String>>,
}

impl AlsaPlatform {
    pub fn new(devices: DeviceConfig) -> Self {
        Self {
            devices,
            comm_mode: AtomicBool::new(false),
            voice_link: Mutex::new(None),
        }
    }

    /// PCM name to open for `endpoint`, taking the voice link into account
    fn pcm_name(&self, endpoint: Option<&Endpoint>) -> String {
        match endpoint {
            Some(ep) if self.voice_link.lock().is_some() && is_bluealsa(&ep.id) => {
                sco_variant(&ep.id)
            }
            Some(ep) => ep.id.clone(),
            None => DEFAULT_PCM.to_string(),
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.devices
            .ignored_prefixes
            .iter()
            .any(|p| !p.is_empty() && name.starts_with(p.as_str()))
    }
}

fn is_bluealsa(id: &str) -> bool {
    id.starts_with("bluealsa")
}

/// The SCO (voice) flavour of a bluez-alsa PCM name
pub fn sco_variant(id: &str) -> String {
    if id.contains("PROFILE=") {
        id.replace("PROFILE=a2dp", "PROFILE=sco")
    } else if id.contains(':') {
        format!("{},PROFILE=sco", id)
    } else {
        format!("{}:PROFILE=sco", id)
    }
}

impl PermissionCheck for AlsaPlatform {
    /// Granted when at least one capture node under /dev/snd is readable and
    /// writable by this process
    fn has_capture_permission(&self) -> bool {
        let entries = match std::fs::read_dir(SOUND_DEVICE_DIR) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", SOUND_DEVICE_DIR, e);
                return false;
            }
        };

        entries.flatten().any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("pcmC")
                && name.ends_with('c')
                && access(
                    Path::new(SOUND_DEVICE_DIR).join(name.as_ref()).as_path(),
                    AccessFlags::R_OK | AccessFlags::W_OK,
                )
                .is_ok()
        })
    }
}

impl EndpointSource for AlsaPlatform {
    fn list_endpoints(&self) -> Vec<Endpoint> {
        let hints = match HintIter::new_str(None, "pcm") {
            Ok(hints) => hints,
            Err(e) => {
                debug!("ALSA hint enumeration failed: {}", e);
                return Vec::new();
            }
        };

        hints
            .filter_map(|hint| {
                let name = hint.name?;
                self.endpoint_from_hint(name, hint.desc, hint.direction)
            })
            .collect()
    }
}

impl AlsaPlatform {
    /// Turn one PCM hint into an endpoint, or `None` when it is ignored or
    /// matches no role
    fn endpoint_from_hint(
        &self,
        name: String,
        desc: Option<String>,
        direction: Option<PcmDirection>,
    ) -> Option<Endpoint> {
        if self.is_ignored(&name) {
            trace!("Skipping PCM {}", name);
            return None;
        }

        // Descriptions are multi-line ("card\nfunction"); keep one line
        let description = desc
            .map(|d| d.replace('\n', ", "))
            .unwrap_or_else(|| name.clone());

        let Some(role) = classify(&name, &description, &self.devices) else {
            trace!("Unclassified PCM {} ({})", name, description);
            return None;
        };

        // No direction in the hint means the PCM does both
        let capability = match direction {
            Some(PcmDirection::Capture) => Capability::INPUT,
            Some(PcmDirection::Playback) => Capability::OUTPUT,
            None => Capability::DUPLEX,
        };

        debug!("Found {} endpoint {}: {}", role, name, description);
        Some(Endpoint::new(name, description, role, capability))
    }
}

/// Forwarding is sample-for-sample, so both ends must run at the requested
/// rate exactly
fn check_rate(name: &str, actual: u32, requested: u32) -> Result<()> {
    if actual == requested {
        return Ok(());
    }
    Err(AppError::device_unavailable(
        Some(name),
        format!("runs at {}Hz, {}Hz required", actual, requested),
    ))
}

/// Open `name` and apply S16 interleaved hardware parameters
fn open_pcm(name: &str, direction: PcmDirection, params: &StreamParams) -> Result<PCM> {
    let unavailable = |e: alsa::Error| AppError::device_unavailable(Some(name), e.to_string());

    let pcm = PCM::new(name, direction, false).map_err(unavailable)?;
    {
        let hwp = HwParams::any(&pcm).map_err(unavailable)?;
        hwp.set_channels(params.format.channels).map_err(unavailable)?;
        hwp.set_rate(params.format.sample_rate, ValueOr::Nearest)
            .map_err(unavailable)?;
        hwp.set_format(Format::s16()).map_err(unavailable)?;
        hwp.set_access(Access::RWInterleaved).map_err(unavailable)?;

        let period = (params.frame_samples / params.format.channels.max(1) as usize) as Frames;
        hwp.set_buffer_size_near(period * 4).map_err(unavailable)?;
        hwp.set_period_size_near(period, ValueOr::Nearest)
            .map_err(unavailable)?;
        pcm.hw_params(&hwp).map_err(unavailable)?;
    }

    let rate = pcm
        .hw_params_current()
        .and_then(|h| h.get_rate())
        .map_err(unavailable)?;
    check_rate(name, rate, params.format.sample_rate)?;

    pcm.prepare().map_err(unavailable)?;
    Ok(pcm)
}

impl StreamFactory for AlsaPlatform {
    fn min_buffer_bytes(&self, format: &PcmFormat) -> Option<usize> {
        let pcm = PCM::new(DEFAULT_PCM, PcmDirection::Capture, false).ok()?;
        let hwp = HwParams::any(&pcm).ok()?;
        hwp.set_channels(format.channels).ok()?;
        hwp.set_rate(format.sample_rate, ValueOr::Nearest).ok()?;
        hwp.set_format(Format::s16()).ok()?;
        hwp.set_access(Access::RWInterleaved).ok()?;

        let frames = hwp.get_period_size_min().ok()?;
        if frames <= 0 {
            return None;
        }
        Some(frames as usize * format.bytes_per_frame())
    }

    fn open_capture(
        &self,
        endpoint: Option<&Endpoint>,
        params: &StreamParams,
    ) -> Result<Box<dyn CaptureStream>> {
        let name = self.pcm_name(endpoint);
        let pcm = open_pcm(&name, PcmDirection::Capture, params)?;

        info!(
            "Capture opened on {} at {}Hz {}ch",
            name, params.format.sample_rate, params.format.channels
        );

        Ok(Box::new(AlsaCapture {
            pcm,
            name,
            channels: params.format.channels as usize,
            throttler: LogThrottler::default(),
            timeout_ms: params.read_timeout.as_millis().min(u128::from(u32::MAX)) as u32,
        }))
    }

    fn open_playback(
        &self,
        endpoint: Option<&Endpoint>,
        params: &StreamParams,
    ) -> Result<Box<dyn PlaybackStream>> {
        let name = self.pcm_name(endpoint);
        let pcm = open_pcm(&name, PcmDirection::Playback, params)?;

        info!(
            "Playback opened on {} at {}Hz {}ch",
            name, params.format.sample_rate, params.format.channels
        );

        Ok(Box::new(AlsaPlayback {
            pcm,
            name,
            channels: params.format.channels as usize,
            throttler: LogThrottler::default(),
        }))
    }
}

impl CommunicationControl for AlsaPlatform {
    // ALSA has no global voice/media routing switch: the voice profile is
    // chosen per PCM (see `pcm_name`). The flag is kept for symmetry and logs.
    fn enter_communication_mode(&self) -> Result<()> {
        if !self.comm_mode.swap(true, Ordering::SeqCst) {
            debug!("Communication mode entered");
        }
        Ok(())
    }

    fn leave_communication_mode(&self) -> Result<()> {
        if self.comm_mode.swap(false, Ordering::SeqCst) {
            debug!("Communication mode left");
        }
        Ok(())
    }

    fn is_voice_link_active(&self) -> bool {
        self.voice_link.lock().is_some()
    }

    fn activate_voice_link(&self, endpoint: Option<&Endpoint>) -> Result<()> {
        let id = endpoint.map(|e| e.id.clone()).unwrap_or_default();
        if !id.is_empty() && !is_bluealsa(&id) {
            debug!("Endpoint {} is not a bluez-alsa PCM, SCO left to the device", id);
        }
        info!(
            "Voice link (SCO) activated for {}",
            if id.is_empty() { "default headset" } else { id.as_str() }
        );
        *self.voice_link.lock() = Some(id);
        Ok(())
    }

    fn deactivate_voice_link(&self) -> Result<()> {
        if self.voice_link.lock().take().is_some() {
            info!("Voice link (SCO) deactivated");
        }
        Ok(())
    }
}

impl AudioPlatform for AlsaPlatform {
    fn name(&self) -> &'static str {
        "alsa"
    }
}

/// Recover from XRUN/suspend in place; true if the stream can be retried
/// Returns whether the stream is running again
fn check_restart(
    result: std::result::Result<(), alsa::Error>,
    name: &str,
    throttler: &LogThrottler,
) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn_throttled!(throttler, "restart", "{} restart after recovery failed: {}", name, e);
            false
        }
    }
}

fn recover(pcm: &PCM, name: &str, err: &alsa::Error, throttler: &LogThrottler) -> bool {
    match pcm.state() {
        State::XRun => warn_throttled!(throttler, "xrun", "XRUN on {}, recovering", name),
        State::Suspended => warn_throttled!(throttler, "suspend", "{} suspended, recovering", name),
        _ => {}
    }
    pcm.try_recover(err.clone(), true).is_ok()
}

struct AlsaCapture {
    pcm: PCM,
    name: String,
    channels: usize,
    throttler: LogThrottler,
    timeout_ms: u32,
}

impl CaptureStream for AlsaCapture {
    fn start(&mut self) -> Result<()> {
        self.pcm
            .start()
            .map_err(|e| AppError::device_unavailable(Some(&self.name), e.to_string()))
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        match self.pcm.wait(Some(self.timeout_ms)) {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => {
                return if recover(&self.pcm, &self.name, &e, &self.throttler) {
                    Ok(0)
                } else {
                    Err(AppError::StreamError(format!("{}: {}", self.name, e)))
                };
            }
        }

        let io = self
            .pcm
            .io_i16()
            .map_err(|e| AppError::StreamError(format!("{}: {}", self.name, e)))?;

        match io.readi(buf) {
            Ok(frames) => Ok(frames * self.channels),
            Err(e) => {
                if recover(&self.pcm, &self.name, &e, &self.throttler) {
                    // The recovered stream needs an explicit restart
                    check_restart(self.pcm.start(), &self.name, &self.throttler);
                    Ok(0)
                } else {
                    Err(AppError::StreamError(format!("{}: {}", self.name, e)))
                }
            }
        }
    }

    fn enable_noise_suppression(&mut self) -> Result<()> {
        Err(AppError::SuppressionUnavailable(format!(
            "ALSA PCM {} has no noise suppressor",
            self.name
        )))
    }

    fn stop(&mut self) -> Result<()> {
        self.pcm
            .drop()
            .map_err(|e| AppError::StreamError(format!("{}: {}", self.name, e)))
    }
}

struct AlsaPlayback {
    pcm: PCM,
    name: String,
    channels: usize,
    throttler: LogThrottler,
}

impl PlaybackStream for AlsaPlayback {
    fn start(&mut self) -> Result<()> {
        // Playback starts on the first write once the start threshold is met
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let io = self
            .pcm
            .io_i16()
            .map_err(|e| AppError::StreamError(format!("{}: {}", self.name, e)))?;

        let mut offset = 0;
        let mut retried = false;
        while offset < samples.len() {
            match io.writei(&samples[offset..]) {
                Ok(0) => break,
                Ok(frames) => offset += frames * self.channels,
                Err(e) => {
                    if retried || !recover(&self.pcm, &self.name, &e, &self.throttler) {
                        return Err(AppError::StreamError(format!("{}: {}", self.name, e)));
                    }
                    retried = true;
                }
            }
        }
        Ok(offset)
    }

    fn stop(&mut self) -> Result<()> {
        self.pcm
            .drain()
            .map_err(|e| AppError::StreamError(format!("{}: {}", self.name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sco_variant() {
        assert_eq!(
            sco_variant("bluealsa:DEV=00:11:22:33:44:55,PROFILE=a2dp"),
            "bluealsa:DEV=00:11:22:33:44:55,PROFILE=sco"
        );
        assert_eq!(
            sco_variant("bluealsa:DEV=00:11:22:33:44:55"),
            "bluealsa:DEV=00:11:22:33:44:55,PROFILE=sco"
        );
        assert_eq!(sco_variant("bluealsa"), "bluealsa:PROFILE=sco");
    }

    #[test]
    fn test_pcm_name_follows_voice_link() {
        let platform = AlsaPlatform::new(DeviceConfig::default());
        let bt = Endpoint::new(
            "bluealsa:DEV=00:11:22:33:44:55,PROFILE=a2dp",
            "Bluetooth",
            crate::audio::EndpointRole::WirelessMedia,
            Capability::OUTPUT,
        );

        assert_eq!(platform.pcm_name(None), "default");
        assert_eq!(platform.pcm_name(Some(&bt)), bt.id);

        platform.activate_voice_link(Some(&bt)).unwrap();
        assert!(platform.is_voice_link_active());
        assert_eq!(
            platform.pcm_name(Some(&bt)),
            "bluealsa:DEV=00:11:22:33:44:55,PROFILE=sco"
        );

        platform.deactivate_voice_link().unwrap();
        assert!(!platform.is_voice_link_active());
        assert_eq!(platform.pcm_name(Some(&bt)), bt.id);
    }

    #[test]
    fn test_ignored_prefixes() {
        let platform = AlsaPlatform::new(DeviceConfig::default());
        assert!(platform.is_ignored("surround51:CARD=PCH,DEV=0"));
        assert!(platform.is_ignored("sysdefault:CARD=PCH"));
        assert!(platform.is_ignored("hw:CARD=PCH,DEV=0"));
        assert!(platform.is_ignored("usbstream:CARD=Headset"));
        assert!(!platform.is_ignored("plughw:CARD=Headset,DEV=0"));
        assert!(!platform.is_ignored("bluealsa:DEV=00:11:22:33:44:55"));
    }

    #[test]
    fn test_raw_hw_hint_is_skipped_for_plughw() {
        let platform = AlsaPlatform::new(DeviceConfig::default());
        // Order as ALSA lists them
        let hints = [
            ("hw:CARD=Headset,DEV=0", "USB Headset, USB Audio"),
            ("plughw:CARD=Headset,DEV=0", "USB Headset, USB Audio"),
            ("usbstream:CARD=Headset", "USB Headset, USB Stream Output"),
        ];

        let endpoints: Vec<Endpoint> = hints
            .iter()
            .filter_map(|(name, desc)| {
                platform.endpoint_from_hint(name.to_string(), Some(desc.to_string()), None)
            })
            .collect();

        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].id, "plughw:CARD=Headset,DEV=0");
        assert_eq!(endpoints[0].role, crate::audio::EndpointRole::Wired);

        let route = crate::audio::select(crate::audio::Direction::PartyAToB, &endpoints);
        assert_eq!(route.capture_id(), Some("plughw:CARD=Headset,DEV=0"));
    }

    #[test]
    fn test_rate_mismatch_is_unavailable() {
        assert!(check_rate("plughw:0,0", 16000, 16000).is_ok());
        assert!(matches!(
            check_rate("hw:0,0", 48000, 16000),
            Err(AppError::DeviceUnavailable { device: Some(ref d), .. }) if d == "hw:0,0"
        ));
    }

    #[test]
    fn test_failed_restart_is_logged() {
        let throttler = LogThrottler::default();
        assert!(check_restart(Ok(()), "plughw:1,0", &throttler));
        assert!(throttler.should_log("restart"));

        let throttler = LogThrottler::default();
        let err = alsa::Error::new("snd_pcm_start", 77);
        assert!(!check_restart(Err(err), "plughw:1,0", &throttler));
        // The failure went through the throttler
        assert!(!throttler.should_log("restart"));
    }

    #[test]
    fn test_enumerate_does_not_panic() {
        // May find nothing in CI
        let platform = AlsaPlatform::new(DeviceConfig::default());
        let endpoints = platform.list_endpoints();
        println!("ALSA endpoints: {:?}", endpoints);
    }
}
