//! Render targets
//!
//! A [`RenderTarget`] receives finished frames. It reports the canvas size
//! the renderer should fill and, when a new frame replaces an older one,
//! which buffer slot it no longer needs.

use crate::error::{RenderError, RenderResult};
use crate::image::{argb, ArgbImage};
use crate::renderer::buffer_pool::SlotId;
use crate::transform::Affine3;
use log::{debug, info};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// A finished frame handed to a target
#[derive(Debug, Clone)]
pub struct Frame {
    /// Buffer slot holding the pixels
    pub slot: SlotId,
    /// Rendered pixels, possibly smaller than the canvas
    pub image: ArgbImage,
    /// Viewer transform the frame was rendered with
    pub transform: Affine3,
}

/// Receiver of rendered frames
pub trait RenderTarget: Send + Sync {
    /// Canvas width in pixels
    fn canvas_width(&self) -> u32;

    /// Canvas height in pixels
    fn canvas_height(&self) -> u32;

    /// Shows `frame`; returns the slot of a previously shown frame that the
    /// target released, if any
    fn set_frame(&self, frame: Frame) -> Option<SlotId>;

    /// Drops any frame the target holds
    fn kill(&self) {}
}

#[derive(Debug)]
struct TargetState {
    canvas: (u32, u32),
    frame: Option<Frame>,
    frames_received: u64,
}

/// In-memory target keeping the latest frame
#[derive(Debug)]
pub struct BufferedTarget {
    state: Mutex<TargetState>,
}

impl BufferedTarget {
    /// Creates a target with a `width x height` canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(TargetState {
                canvas: (width, height),
                frame: None,
                frames_received: 0,
            }),
        }
    }

    /// Changes the canvas size; the next paint reallocates
    pub fn set_canvas_size(&self, width: u32, height: u32) {
        self.state.lock().canvas = (width, height);
    }

    /// The most recent frame
    pub fn frame(&self) -> Option<Frame> {
        self.state.lock().frame.clone()
    }

    /// Number of frames received since creation
    pub fn frames_received(&self) -> u64 {
        self.state.lock().frames_received
    }

    /// The most recent frame scaled to the canvas, nearest neighbor
    pub fn canvas_pixels(&self) -> Option<(u32, u32, Vec<u32>)> {
        let state = self.state.lock();
        let frame = state.frame.as_ref()?;
        let (cw, ch) = state.canvas;
        let (w, h) = (frame.image.width(), frame.image.height());
        if w == 0 || h == 0 {
            return Some((cw, ch, vec![0; cw as usize * ch as usize]));
        }
        let pixels = frame.image.with_pixels(|src| {
            let mut out = Vec::with_capacity(cw as usize * ch as usize);
            for y in 0..ch {
                let sy = ((u64::from(y) * u64::from(h)) / u64::from(ch.max(1))) as usize;
                for x in 0..cw {
                    let sx = ((u64::from(x) * u64::from(w)) / u64::from(cw.max(1))) as usize;
                    out.push(src[sy * w as usize + sx]);
                }
            }
            out
        });
        Some((cw, ch, pixels))
    }

    /// Writes the most recent frame, scaled to the canvas, as an opaque PNG
    pub fn export_png(&self, path: impl AsRef<Path>) -> RenderResult<()> {
        let (width, height, pixels) = self.canvas_pixels().ok_or(RenderError::NoFrame)?;
        let file = File::create(path.as_ref())?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        let rgba: Vec<u8> = pixels
            .iter()
            .flat_map(|&p| [argb::red(p), argb::green(p), argb::blue(p), 255])
            .collect();
        writer.write_image_data(&rgba)?;
        info!("💾 Wrote {}x{} frame to {}", width, height, path.as_ref().display());
        Ok(())
    }
}

impl RenderTarget for BufferedTarget {
    fn canvas_width(&self) -> u32 {
        self.state.lock().canvas.0
    }

    fn canvas_height(&self) -> u32 {
        self.state.lock().canvas.1
    }

    fn set_frame(&self, frame: Frame) -> Option<SlotId> {
        let mut state = self.state.lock();
        state.frames_received += 1;
        let slot = frame.slot;
        debug!(
            "frame {}: slot {} ({}x{})",
            state.frames_received,
            slot,
            frame.image.width(),
            frame.image.height()
        );
        state
            .frame
            .replace(frame)
            .map(|previous| previous.slot)
            .filter(|&previous| previous != slot)
    }

    fn kill(&self) {
        self.state.lock().frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(slot: SlotId, w: u32, h: u32, value: u32) -> Frame {
        let image = ArgbImage::new(w, h);
        image.fill(value);
        Frame {
            slot,
            image,
            transform: Affine3::identity(),
        }
    }

    #[test]
    fn test_returns_previous_slot() {
        let target = BufferedTarget::new(4, 4);
        assert_eq!(target.set_frame(frame(0, 4, 4, 1)), None);
        assert_eq!(target.set_frame(frame(1, 4, 4, 1)), Some(0));
        assert_eq!(target.set_frame(frame(1, 4, 4, 1)), None);
        assert_eq!(target.frames_received(), 3);
    }

    #[test]
    fn test_canvas_pixels_upscale_coarse_frame() {
        let target = BufferedTarget::new(4, 2);
        let f = frame(0, 2, 1, 0);
        f.image.with_pixels_mut(|p| p.copy_from_slice(&[1, 2]));
        target.set_frame(f);
        let (w, h, pixels) = target.canvas_pixels().unwrap();
        assert_eq!((w, h), (4, 2));
        assert_eq!(pixels, vec![1, 1, 2, 2, 1, 1, 2, 2]);
    }

    #[test]
    fn test_kill_drops_frame() {
        let target = BufferedTarget::new(2, 2);
        target.set_frame(frame(0, 2, 2, 5));
        target.kill();
        assert!(target.frame().is_none());
        assert!(matches!(
            target.export_png(std::env::temp_dir().join("never.png")),
            Err(RenderError::NoFrame)
        ));
    }

    #[test]
    fn test_export_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let target = BufferedTarget::new(3, 3);
        target.set_frame(frame(0, 3, 3, 0xff10_2030));
        target.export_png(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
