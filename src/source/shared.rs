use super::{Frame, SourceDescriptor, VideoSource};
use crate::error::SourceError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frames buffered per subscriber before slow sessions start skipping.
const FRAME_BUFFER: usize = 8;

/// The single open video source, shared by every live session.
///
/// A background task pulls frames from the source and broadcasts them; each
/// session holds its own subscription. The task owns the source and releases
/// it when told to stop or when the source reaches end of stream.
pub struct SharedSource {
    descriptor: SourceDescriptor,
    frames: broadcast::Sender<Frame>,
    stop: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl SharedSource {
    pub async fn open(mut source: Box<dyn VideoSource>) -> Result<Self, SourceError> {
        source.start().await?;
        let descriptor = source.descriptor().clone();
        info!(source = %descriptor.identity, "video source opened");

        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_frames(source, frames.clone(), stop_rx));

        Ok(Self {
            descriptor,
            frames,
            stop: Some(stop_tx),
            pump: Some(pump),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// False once the source has ended on its own.
    pub fn is_running(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Stops the frame pump and releases the underlying source.
    pub async fn release(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!("frame pump for {} ended abnormally: {}", self.descriptor.identity, e);
            }
        }
        info!(source = %self.descriptor.identity, "video source released");
    }
}

async fn pump_frames(
    mut source: Box<dyn VideoSource>,
    frames: broadcast::Sender<Frame>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = source.next_frame() => match next {
                // no subscribers yet is fine
                Ok(frame) => { let _ = frames.send(frame); }
                Err(SourceError::EndOfStream) => {
                    info!("video source {} reached end of stream", source.descriptor().identity);
                    break;
                }
                Err(e) => {
                    warn!("video source {} failed: {}", source.descriptor().identity, e);
                    break;
                }
            }
        }
    }
    source.release().await;
    debug!("frame pump for {} stopped", source.descriptor().identity);
}
