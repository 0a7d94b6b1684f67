//! Audio routing engine
//!
//! This module provides:
//! - Endpoint discovery and role classification
//! - The routing policy (direction -> capture/playback endpoints)
//! - Platform capability traits, with ALSA and mock backends
//! - The capture -> playback forwarding pipeline

pub mod alsa;
pub mod endpoint;
pub mod mock;
pub mod pipeline;
pub mod platform;
pub mod routing;

pub use alsa::AlsaPlatform;
pub use endpoint::{classify, Capability, Endpoint, EndpointRole};
pub use pipeline::{Pipeline, PipelineConfig, PipelineSummary};
pub use platform::{
    AudioPlatform, CaptureStream, CommunicationControl, EndpointSource, PcmFormat,
    PermissionCheck, PlaybackStream, StreamFactory, StreamParams,
};
pub use routing::{select, Direction, Route};
