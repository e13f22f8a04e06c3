//! Cache-aware single-source projector
//!
//! Layers several mipmap levels of a cache-backed source. Missing data never
//! blocks a pass; the pixels it leaves behind are revisited by the next one.

use super::{CancelToken, LevelView, RenderPool};
use crate::image::{ArgbImage, MaskImage};
use crate::source::{Converter, VolatileSource};
use log::trace;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mask value of pixels no level has covered yet
const UNTOUCHED: u8 = u8::MAX;

/// Most levels a mask byte can distinguish
const MAX_LEVELS: usize = UNTOUCHED as usize;

/// Renders one cache-backed source layered over several mipmap levels
///
/// Levels are given in render order, best first. The mask stores, per pixel,
/// the render index of the level that last wrote it. A pass walks the levels
/// and lets level `r` write every pixel whose mask is above `r` and where `r`
/// has valid data. Pixels whose best data is still missing keep coarser data
/// (or stay untouched) and are revisited in the next pass.
///
/// Only levels that are not yet fully resident are walked again: once level
/// `r` covered every pixel, later passes stop before it.
pub struct VolatileHierarchyProjector {
    levels: Vec<LevelView<dyn VolatileSource>>,
    converter: Arc<dyn Converter>,
    target: ArgbImage,
    mask: MaskImage,
    pool: RenderPool,
    token: CancelToken,
    num_invalid_levels: usize,
    valid: bool,
    last_frame_render_time: Duration,
}

impl VolatileHierarchyProjector {
    /// Creates a projector over `levels` (render order) writing into `target`
    ///
    /// `mask` must match the target size; it is reset here.
    pub fn new(
        mut levels: Vec<LevelView<dyn VolatileSource>>,
        converter: Arc<dyn Converter>,
        target: ArgbImage,
        mask: MaskImage,
        pool: RenderPool,
        token: CancelToken,
    ) -> Self {
        levels.truncate(MAX_LEVELS);
        mask.fill(UNTOUCHED);
        let num_invalid_levels = levels.len();
        Self {
            levels,
            converter,
            target,
            mask,
            pool,
            token,
            num_invalid_levels,
            valid: false,
            last_frame_render_time: Duration::ZERO,
        }
    }

    /// Number of leading levels (in render order) still missing data
    pub fn num_invalid_levels(&self) -> usize {
        self.num_invalid_levels
    }

    pub fn map(&mut self, clear_untouched: bool) -> bool {
        let start = Instant::now();
        self.valid = false;

        let mut resolved_at = None;
        for r in 0..self.num_invalid_levels {
            let missing = self.render_level(r);
            if self.token.is_cancelled() {
                self.last_frame_render_time = start.elapsed();
                return false;
            }
            trace!("level {} (mipmap {}): {} pixels missing", r, self.levels[r].level(), missing);
            if missing == 0 {
                resolved_at = Some(r);
                break;
            }
        }

        if clear_untouched {
            self.clear_untouched();
        }
        if let Some(r) = resolved_at {
            self.num_invalid_levels = r;
        }
        self.valid = self.num_invalid_levels == 0;
        self.last_frame_render_time = start.elapsed();
        true
    }

    /// Writes level `r` wherever it has data and no better level wrote yet;
    /// returns the number of such pixels without data
    fn render_level(&self, r: usize) -> usize {
        let width = self.target.width() as usize;
        if self.target.is_empty() {
            return 0;
        }
        let rows = self.pool.rows_per_task(self.target.height() as usize);
        let index = r as u8;
        let view = &self.levels[r];
        let converter = &*self.converter;
        let token = &self.token;
        let pool = &self.pool;

        self.target.with_pixels_mut(|pixels| {
            self.mask.with_pixels_mut(|mask| {
                pool.install(|| {
                    pixels
                        .par_chunks_mut(rows * width)
                        .zip(mask.par_chunks_mut(rows * width))
                        .enumerate()
                        .map(|(task, (chunk, mask_chunk))| {
                            let mut missing = 0;
                            let row_pairs = chunk.chunks_mut(width).zip(mask_chunk.chunks_mut(width));
                            for (r_in_task, (row, mask_row)) in row_pairs.enumerate() {
                                if token.is_cancelled() {
                                    break;
                                }
                                let y = task * rows + r_in_task;
                                for (x, (pixel, m)) in row.iter_mut().zip(mask_row.iter_mut()).enumerate() {
                                    if *m <= index {
                                        continue;
                                    }
                                    match view.sample_volatile(x, y) {
                                        None => {
                                            *pixel = 0;
                                            *m = index;
                                        }
                                        Some(v) if v.valid => {
                                            *pixel = converter.convert(v.value);
                                            *m = index;
                                        }
                                        Some(_) => missing += 1,
                                    }
                                }
                            }
                            missing
                        })
                        .sum()
                })
            })
        })
    }

    fn clear_untouched(&self) {
        self.target.with_pixels_mut(|pixels| {
            self.mask.with_pixels(|mask| {
                for (pixel, &m) in pixels.iter_mut().zip(mask) {
                    if m == UNTOUCHED {
                        *pixel = 0;
                    }
                }
            })
        });
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    pub fn last_frame_render_time(&self) -> Duration {
        self.last_frame_render_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheHints;
    use crate::projector::PixelToVoxel;
    use crate::source::{CellGrid, Interpolation, LinearRangeConverter, Source, VolatileValue};
    use crate::transform::Affine3;
    use parking_lot::Mutex;

    /// Two levels; level 0 holds 1.0 on resident columns, level 1 holds 0.5
    /// everywhere
    struct Partial {
        resident_columns: Mutex<usize>,
    }

    impl Source for Partial {
        fn name(&self) -> &str {
            "partial"
        }
        fn num_mipmap_levels(&self) -> usize {
            2
        }
        fn source_transform(&self, _: u32, _: usize) -> Affine3 {
            Affine3::identity()
        }
        fn dimensions(&self, _: u32, _: usize) -> [u64; 3] {
            [4, 4, 1]
        }
        fn sample(&self, _: u32, _: usize, _: [f64; 3], _: Interpolation) -> Option<f32> {
            Some(1.0)
        }
    }

    impl VolatileSource for Partial {
        fn sample_volatile(&self, _: u32, level: usize, p: [f64; 3], _: Interpolation) -> Option<VolatileValue> {
            if level == 1 {
                return Some(VolatileValue::valid(0.5));
            }
            if (p[0] as usize) < *self.resident_columns.lock() {
                Some(VolatileValue::valid(1.0))
            } else {
                Some(VolatileValue::invalid())
            }
        }
        fn set_cache_hints(&self, _: u32, _: usize, _: CacheHints) {}
        fn cell_grid(&self, _: u32, _: usize) -> Option<CellGrid> {
            None
        }
        fn prefetch_cell(&self, _: u32, _: usize, _: [i64; 3], _: CacheHints) {}
    }

    fn build(source: &Arc<Partial>, levels: &[usize]) -> (VolatileHierarchyProjector, ArgbImage, MaskImage) {
        let map = PixelToVoxel::from_source_to_screen(&Affine3::identity()).unwrap();
        let views = levels
            .iter()
            .map(|&level| {
                let source: Arc<dyn VolatileSource> = source.clone();
                LevelView::new(source, 0, level, Interpolation::NearestNeighbor, map)
            })
            .collect();
        let target = ArgbImage::new(4, 4);
        let mask = MaskImage::new(4, 4);
        let projector = VolatileHierarchyProjector::new(
            views,
            Arc::new(LinearRangeConverter::gray(0.0, 1.0)),
            target.clone(),
            mask.clone(),
            RenderPool::new(2, 1).unwrap(),
            CancelToken::new(),
        );
        (projector, target, mask)
    }

    #[test]
    fn test_missing_data_falls_back_to_coarser_level() {
        let source = Arc::new(Partial {
            resident_columns: Mutex::new(2),
        });
        let (mut p, target, mask) = build(&source, &[0, 1]);
        assert!(p.map(true));
        assert!(!p.is_valid());
        assert_eq!(target.get(0, 0), Some(0xffff_ffff));
        assert_eq!(target.get(3, 0), Some(0x8080_8080));
        assert_eq!(mask.get(0, 0), Some(0));
        assert_eq!(mask.get(3, 0), Some(1));
        // the coarse level covered everything
        assert_eq!(p.num_invalid_levels(), 1);
    }

    #[test]
    fn test_becomes_valid_once_data_arrives() {
        let source = Arc::new(Partial {
            resident_columns: Mutex::new(0),
        });
        let (mut p, target, _) = build(&source, &[0, 1]);
        assert!(p.map(true));
        assert!(!p.is_valid());

        *source.resident_columns.lock() = 4;
        assert!(p.map(true));
        assert!(p.is_valid());
        assert_eq!(p.num_invalid_levels(), 0);
        assert!(target.to_vec().iter().all(|&v| v == 0xffff_ffff));
    }

    #[test]
    fn test_clear_untouched_zeroes_uncovered_pixels() {
        let source = Arc::new(Partial {
            resident_columns: Mutex::new(1),
        });
        let (mut p, target, _) = build(&source, &[0]);
        target.fill(0x1234_5678);
        assert!(p.map(true));
        assert_eq!(target.get(0, 2), Some(0xffff_ffff));
        assert_eq!(target.get(2, 2), Some(0));
    }

    #[test]
    fn test_cancellation_aborts_pass() {
        let source = Arc::new(Partial {
            resident_columns: Mutex::new(4),
        });
        let (mut p, _, _) = build(&source, &[0, 1]);
        p.cancel_token().cancel();
        assert!(!p.map(true));
        assert!(!p.is_valid());
    }
}
