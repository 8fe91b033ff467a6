use super::{Frame, SourceDescriptor, VideoSource};
use crate::error::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Platform default capture device.
pub fn default_device() -> &'static str {
    if cfg!(target_os = "macos") {
        "default:none"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "/dev/video0"
    }
}

/// Reads raw `bgr24` frames from a capture device node (or a recorded file).
///
/// Every read returns exactly one frame of `width * height * 3` bytes. A short
/// read means the device has no more data: the handle is released and the
/// source stays exhausted.
pub struct CameraSource {
    descriptor: SourceDescriptor,
    file: Option<File>,
    counter: u64,
    exhausted: bool,
}

impl CameraSource {
    pub fn new(device: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            descriptor: SourceDescriptor {
                identity: device.into(),
                width,
                height,
                fps,
            },
            file: None,
            counter: 0,
            exhausted: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

#[async_trait]
impl VideoSource for CameraSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        if self.exhausted {
            return Err(SourceError::EndOfStream);
        }
        if self.file.is_some() {
            return Ok(());
        }
        let file = File::open(&self.descriptor.identity).await.map_err(|e| {
            SourceError::DeviceUnavailable(self.descriptor.identity.clone(), e.to_string())
        })?;
        info!(device = %self.descriptor.identity, "camera opened");
        self.file = Some(file);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let Some(file) = self.file.as_mut() else {
            return Err(SourceError::EndOfStream);
        };

        let mut buf = vec![0u8; self.descriptor.frame_size()];
        match file.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(device = %self.descriptor.identity, "camera reported no more data");
                self.release().await;
                return Err(SourceError::EndOfStream);
            }
            Err(e) => {
                self.release().await;
                return Err(SourceError::Io(e));
            }
        }

        let interval = self.descriptor.frame_interval();
        let frame = Frame {
            data: Bytes::from(buf),
            width: self.descriptor.width,
            height: self.descriptor.height,
            pts: self.counter * self.descriptor.pts_step(),
            duration: interval,
        };
        self.counter += 1;
        tokio::time::sleep(interval).await;
        Ok(frame)
    }

    async fn release(&mut self) {
        if self.file.take().is_some() {
            info!(device = %self.descriptor.identity, "camera released");
        }
        self.exhausted = true;
    }
}
