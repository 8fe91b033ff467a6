//! Video sources feeding the outgoing tracks.
//!
//! A [`VideoSource`] produces frames; [`SharedSource`] owns the single open
//! instance and fans frames out to every session subscribed to it.

pub mod camera;
pub mod shared;
pub mod synthetic;

use crate::error::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub use camera::CameraSource;
pub use shared::SharedSource;
pub use synthetic::SyntheticSource;

/// RTP clock rate used for video timestamps.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// One video frame, `bgr24` packed.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in [`VIDEO_CLOCK_RATE`] units.
    pub pts: u64,
    pub duration: Duration,
}

/// Identity and geometry of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Device path or generator name.
    pub identity: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl SourceDescriptor {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Timestamp increment between two frames.
    pub fn pts_step(&self) -> u64 {
        u64::from(VIDEO_CLOCK_RATE / self.fps.max(1))
    }
}

#[async_trait]
pub trait VideoSource: Send {
    fn descriptor(&self) -> &SourceDescriptor;

    async fn start(&mut self) -> Result<(), SourceError>;

    /// Waits for and returns the next frame.
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    async fn release(&mut self);
}

/// Builds a fresh, unopened source each time the shared instance is (re)opened.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn VideoSource> + Send + Sync>;

/// Which source the process streams from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Camera {
        device: String,
        width: u32,
        height: u32,
        fps: u32,
    },
    Synthetic {
        width: u32,
        height: u32,
        fps: u32,
    },
}

impl SourceSpec {
    pub fn factory(&self) -> SourceFactory {
        match self.clone() {
            SourceSpec::Camera {
                device,
                width,
                height,
                fps,
            } => Arc::new(move || {
                Box::new(CameraSource::new(device.clone(), width, height, fps)) as Box<dyn VideoSource>
            }),
            SourceSpec::Synthetic { width, height, fps } => Arc::new(move || {
                Box::new(SyntheticSource::new(width, height, fps)) as Box<dyn VideoSource>
            }),
        }
    }
}
