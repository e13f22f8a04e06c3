//! Screen scale table
//!
//! One [`ScreenScale`] per resolution level, finest (index 0) first. Each level
//! holds one output image per buffer slot, one temporary image per visible
//! source (only when more than one source is visible) and the transform from
//! canvas coordinates to its own pixel grid.
//!
//! Only level 0 allocates. Coarser levels are views onto the level-0 storage
//! of the same slot, so a resize costs one allocation per slot.

use crate::error::{RenderError, RenderResult};
use crate::image::{ArgbImage, MaskImage};
use crate::transform::Affine3;
use log::{debug, info};

/// One resolution level
#[derive(Debug, Clone)]
pub struct ScreenScale {
    scale: f64,
    width: u32,
    height: u32,
    scale_transform: Affine3,
    buffers: Vec<ArgbImage>,
    source_images: Vec<ArgbImage>,
    masks: Vec<MaskImage>,
}

impl ScreenScale {
    fn new(scale: f64) -> Self {
        Self {
            scale,
            width: 0,
            height: 0,
            scale_transform: Affine3::identity(),
            buffers: Vec::new(),
            source_images: Vec::new(),
            masks: Vec::new(),
        }
    }

    /// Scale factor relative to the canvas
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Image width at this level
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height at this level
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Canvas-to-level pixel transform
    pub fn scale_transform(&self) -> &Affine3 {
        &self.scale_transform
    }

    /// Output image of buffer slot `slot`
    pub fn buffer(&self, slot: usize) -> Option<&ArgbImage> {
        self.buffers.get(slot)
    }

    /// Temporary images, one per visible source when several are visible
    pub fn source_images(&self) -> &[ArgbImage] {
        &self.source_images
    }

    /// Coverage mask for the `index`-th visible source
    pub fn mask(&self, index: usize) -> Option<&MaskImage> {
        self.masks.get(index)
    }
}

/// All resolution levels with their buffers
#[derive(Debug, Clone)]
pub struct ScreenScales {
    levels: Vec<ScreenScale>,
    buffer_count: usize,
    canvas: Option<(u32, u32)>,
}

impl ScreenScales {
    /// Creates the table for `factors` (finest first), nothing allocated yet
    ///
    /// Every factor must lie in (0, 1], `factors` must not be empty and must
    /// be strictly decreasing.
    pub fn new(factors: &[f64], buffer_count: usize) -> RenderResult<Self> {
        if factors.is_empty() {
            return Err(RenderError::InvalidConfig(
                "at least one screen scale is required".to_string(),
            ));
        }
        if buffer_count == 0 {
            return Err(RenderError::InvalidConfig(
                "buffer_count must be at least 1".to_string(),
            ));
        }
        for (index, &scale) in factors.iter().enumerate() {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(RenderError::InvalidScreenScale { index, scale });
            }
        }
        if factors.windows(2).any(|w| w[1] >= w[0]) {
            return Err(RenderError::InvalidConfig(format!(
                "screen scales must be strictly decreasing: {:?}",
                factors
            )));
        }
        Ok(Self {
            levels: factors.iter().map(|&s| ScreenScale::new(s)).collect(),
            buffer_count,
            canvas: None,
        })
    }

    /// Number of levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the table has no levels (never true for a constructed table)
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the coarsest level
    pub fn coarsest(&self) -> usize {
        self.levels.len() - 1
    }

    /// Level `index`
    pub fn level(&self, index: usize) -> Option<&ScreenScale> {
        self.levels.get(index)
    }

    /// Number of buffer slots per level
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Canvas size the buffers were allocated for
    pub fn canvas(&self) -> Option<(u32, u32)> {
        self.canvas
    }

    /// Reallocates every level if the canvas size changed
    ///
    /// Returns whether a reallocation happened.
    pub fn check_resize(&mut self, canvas_width: u32, canvas_height: u32) -> RenderResult<bool> {
        if self.canvas == Some((canvas_width, canvas_height)) {
            return Ok(false);
        }

        let mut backing: Vec<ArgbImage> = Vec::with_capacity(self.buffer_count);
        for (i, level) in self.levels.iter_mut().enumerate() {
            let w = (level.scale * f64::from(canvas_width)) as u32;
            let h = (level.scale * f64::from(canvas_height)) as u32;
            level.buffers = if i == 0 {
                backing = (0..self.buffer_count).map(|_| ArgbImage::new(w, h)).collect();
                backing.clone()
            } else {
                backing
                    .iter()
                    .map(|b| ArgbImage::view_of(b, w, h))
                    .collect::<RenderResult<_>>()?
            };
            level.width = w;
            level.height = h;
            level.scale_transform = Affine3::screen_scale(w, h, canvas_width, canvas_height);
            level.source_images.clear();
            level.masks.clear();
            debug!("screen scale {} ({:.3}): {}x{}", i, level.scale, w, h);
        }
        self.canvas = Some((canvas_width, canvas_height));
        info!(
            "📐 Reallocated {} screen scales for {}x{} canvas",
            self.levels.len(),
            canvas_width,
            canvas_height
        );
        Ok(true)
    }

    /// Makes sure every level has per-source images and masks for
    /// `num_visible_sources`
    ///
    /// Temporary images exist only when more than one source is visible.
    /// Masks exist for every visible source. Returns whether anything was
    /// reallocated.
    pub fn check_renew_source_images(&mut self, num_visible_sources: usize) -> RenderResult<bool> {
        let num_images = if num_visible_sources > 1 {
            num_visible_sources
        } else {
            0
        };
        let level0 = &self.levels[0];
        if level0.source_images.len() == num_images && level0.masks.len() == num_visible_sources {
            return Ok(false);
        }

        let (w0, h0) = (level0.width, level0.height);
        let images: Vec<ArgbImage> = (0..num_images).map(|_| ArgbImage::new(w0, h0)).collect();
        let masks: Vec<MaskImage> = (0..num_visible_sources).map(|_| MaskImage::new(w0, h0)).collect();
        for level in &mut self.levels {
            let (w, h) = (level.width, level.height);
            level.source_images = images
                .iter()
                .map(|b| ArgbImage::view_of(b, w, h))
                .collect::<RenderResult<_>>()?;
            level.masks = masks
                .iter()
                .map(|b| MaskImage::view_of(b, w, h))
                .collect::<RenderResult<_>>()?;
        }
        debug!(
            "renewed {} source images and {} masks",
            num_images, num_visible_sources
        );
        Ok(true)
    }

    /// Drops every image
    pub fn release(&mut self) {
        for level in &mut self.levels {
            level.buffers.clear();
            level.source_images.clear();
            level.masks.clear();
            level.width = 0;
            level.height = 0;
        }
        self.canvas = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_scales() {
        assert!(ScreenScales::new(&[], 3).is_err());
        assert!(matches!(
            ScreenScales::new(&[1.0, 0.0], 3),
            Err(RenderError::InvalidScreenScale { index: 1, .. })
        ));
        assert!(ScreenScales::new(&[1.5], 3).is_err());
        assert!(ScreenScales::new(&[1.0], 0).is_err());
    }

    #[test]
    fn test_rejects_unordered_scales() {
        assert!(matches!(
            ScreenScales::new(&[0.5, 1.0], 3),
            Err(RenderError::InvalidConfig(_))
        ));
        assert!(matches!(
            ScreenScales::new(&[1.0, 0.5, 0.5], 3),
            Err(RenderError::InvalidConfig(_))
        ));
        assert!(ScreenScales::new(&[1.0, 0.75, 0.5], 3).is_ok());
    }

    #[test]
    fn test_resize_allocates_level_sizes() {
        let mut scales = ScreenScales::new(&[1.0, 0.5, 0.25], 3).unwrap();
        assert!(scales.check_resize(101, 40).unwrap());
        assert!(!scales.check_resize(101, 40).unwrap());

        let sizes: Vec<_> = (0..3)
            .map(|i| {
                let l = scales.level(i).unwrap();
                (l.width(), l.height())
            })
            .collect();
        assert_eq!(sizes, vec![(101, 40), (50, 20), (25, 10)]);
        assert_eq!(scales.level(2).unwrap().buffer(2).unwrap().len(), 250);
    }

    #[test]
    fn test_coarse_levels_reuse_level0_storage() {
        let mut scales = ScreenScales::new(&[1.0, 0.5], 2).unwrap();
        scales.check_resize(8, 8).unwrap();
        for slot in 0..2 {
            let fine = scales.level(0).unwrap().buffer(slot).unwrap();
            let coarse = scales.level(1).unwrap().buffer(slot).unwrap();
            assert!(coarse.shares_storage_with(fine));
        }
        let a = scales.level(0).unwrap().buffer(0).unwrap();
        let b = scales.level(0).unwrap().buffer(1).unwrap();
        assert!(!a.shares_storage_with(b));
    }

    #[test]
    fn test_source_images_only_for_multiple_sources() {
        let mut scales = ScreenScales::new(&[1.0, 0.5], 3).unwrap();
        scales.check_resize(10, 10).unwrap();
        scales.check_renew_source_images(1).unwrap();
        assert!(scales.level(0).unwrap().source_images().is_empty());
        assert!(scales.level(1).unwrap().mask(0).is_some());

        assert!(scales.check_renew_source_images(2).unwrap());
        assert!(!scales.check_renew_source_images(2).unwrap());
        let level1 = scales.level(1).unwrap();
        assert_eq!(level1.source_images().len(), 2);
        assert_eq!(level1.source_images()[0].width(), 5);
        assert_eq!(level1.mask(1).unwrap().len(), 25);
    }

    #[test]
    fn test_resize_drops_source_images() {
        let mut scales = ScreenScales::new(&[1.0], 3).unwrap();
        scales.check_resize(4, 4).unwrap();
        scales.check_renew_source_images(3).unwrap();
        scales.check_resize(6, 4).unwrap();
        assert!(scales.level(0).unwrap().source_images().is_empty());
        assert!(scales.check_renew_source_images(3).unwrap());
        assert_eq!(scales.level(0).unwrap().source_images()[2].len(), 24);
    }

    #[test]
    fn test_release() {
        let mut scales = ScreenScales::new(&[1.0], 3).unwrap();
        scales.check_resize(4, 4).unwrap();
        scales.release();
        assert!(scales.level(0).unwrap().buffer(0).is_none());
        assert_eq!(scales.canvas(), None);
    }
}
