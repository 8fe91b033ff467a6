use super::{Frame, SourceDescriptor, VideoSource};
use crate::error::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::f32::consts::PI;
use tokio::time::{sleep_until, Instant};

/// Number of pre-rendered frames in the animation loop.
pub const ANIMATION_FRAMES: usize = 30;

const BLUE: [u8; 3] = [255, 0, 0];
const WHITE: [u8; 3] = [255, 255, 255];
const RED: [u8; 3] = [0, 0, 255];

/// Animated flag: a waving tricolour replayed from a fixed loop of frames.
pub struct SyntheticSource {
    descriptor: SourceDescriptor,
    frames: Vec<Bytes>,
    counter: u64,
    started_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let descriptor = SourceDescriptor {
            identity: "synthetic:flag".into(),
            width,
            height,
            fps,
        };
        Self {
            descriptor,
            frames: Vec::new(),
            counter: 0,
            started_at: None,
        }
    }
}

/// Flag shrunk to half size and centred on a black canvas.
fn flag_pixel(x: i64, y: i64, width: i64, height: i64) -> [u8; 3] {
    let (left, top) = (width / 4, height / 4);
    if x < left || x >= left + width / 2 || y < top || y >= top + height / 2 {
        return [0, 0, 0];
    }
    // coordinates in the full-size flag
    let fx = (x - left) * 2;
    let band = width / 3;
    if fx < band {
        BLUE
    } else if fx < width - band {
        WHITE
    } else {
        RED
    }
}

/// Renders the animation loop: each frame warps the flag with a sine wave
/// whose phase advances by one step per frame.
pub fn render_animation(width: u32, height: u32) -> Vec<Bytes> {
    let (w, h) = (width as i64, height as i64);
    let omega = 2.0 * PI / height.max(1) as f32;

    (0..ANIMATION_FRAMES)
        .map(|k| {
            let phase = 2.0 * k as f32 * PI / ANIMATION_FRAMES as f32;
            let mut buf = Vec::with_capacity(width as usize * height as usize * 3);
            for y in 0..h {
                for x in 0..w {
                    let arg = omega * x as f32 + phase;
                    let sx = (x as f32 + 10.0 * arg.cos()).round() as i64;
                    let sy = (y as f32 + 10.0 * arg.sin()).round() as i64;
                    let px = if (0..w).contains(&sx) && (0..h).contains(&sy) {
                        flag_pixel(sx, sy, w, h)
                    } else {
                        [0, 0, 0]
                    };
                    buf.extend_from_slice(&px);
                }
            }
            Bytes::from(buf)
        })
        .collect()
}

#[async_trait]
impl VideoSource for SyntheticSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        if self.frames.is_empty() {
            let (width, height) = (self.descriptor.width, self.descriptor.height);
            self.frames = tokio::task::spawn_blocking(move || render_animation(width, height))
                .await
                .map_err(|e| SourceError::Io(std::io::Error::other(e)))?;
        }
        self.counter = 0;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if self.started_at.is_none() {
            self.start().await?;
        }
        let started_at = self.started_at.unwrap_or_else(Instant::now);
        let interval = self.descriptor.frame_interval();

        // pace replay against the start time so drift does not accumulate
        let deadline = started_at + interval * self.counter as u32;
        sleep_until(deadline).await;

        let index = (self.counter % ANIMATION_FRAMES as u64) as usize;
        let frame = Frame {
            data: self.frames[index].clone(),
            width: self.descriptor.width,
            height: self.descriptor.height,
            pts: self.counter * self.descriptor.pts_step(),
            duration: interval,
        };
        self.counter += 1;
        Ok(frame)
    }

    async fn release(&mut self) {
        self.started_at = None;
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn animation_has_thirty_distinct_frames() {
        let frames = render_animation(64, 48);
        assert_eq!(frames.len(), ANIMATION_FRAMES);
        assert!(frames.iter().all(|f| f.len() == 64 * 48 * 3));
        assert_ne!(frames[0], frames[1]);
    }

    #[test]
    fn corners_stay_black_and_centre_is_coloured() {
        let frames = render_animation(64, 48);
        let f = &frames[0];
        assert_eq!(&f[0..3], &[0, 0, 0]);
        let centre = ((24 * 64) + 32) * 3;
        assert_ne!(&f[centre..centre + 3], &[0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_cycle_with_fixed_spacing() {
        let mut src = SyntheticSource::new(32, 24, 30);
        src.start().await.unwrap();

        let first = src.next_frame().await.unwrap();
        assert_eq!(first.pts, 0);
        assert_eq!(first.duration, Duration::from_secs(1) / 30);

        for _ in 1..ANIMATION_FRAMES {
            src.next_frame().await.unwrap();
        }
        let wrapped = src.next_frame().await.unwrap();
        assert_eq!(wrapped.pts, ANIMATION_FRAMES as u64 * 3000);
        assert_eq!(wrapped.data, first.data);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_release() {
        let mut src = SyntheticSource::new(16, 12, 30);
        src.start().await.unwrap();
        src.next_frame().await.unwrap();
        src.next_frame().await.unwrap();
        src.release().await;

        let again = src.next_frame().await.unwrap();
        assert_eq!(again.pts, 0);
    }
}
