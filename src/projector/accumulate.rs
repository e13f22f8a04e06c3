//! Multi-source projector
//!
//! Renders each visible source into its own image, then composites them
//! with an [`AccumulatePolicy`].

use super::{CancelToken, Projector, RenderPool};
use crate::image::{argb, ArgbImage};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Combines the pixels of several sources into one
///
/// `values` holds one ARGB pixel per source, in source order.
pub trait AccumulatePolicy: Send + Sync {
    fn accumulate(&self, values: &[u32]) -> u32;
}

/// Channel-wise sum, saturating at 255
#[derive(Debug, Default, Clone, Copy)]
pub struct SumAccumulate;

impl AccumulatePolicy for SumAccumulate {
    fn accumulate(&self, values: &[u32]) -> u32 {
        let (mut a, mut r, mut g, mut b) = (0u32, 0u32, 0u32, 0u32);
        for &v in values {
            a += u32::from(argb::alpha(v));
            r += u32::from(argb::red(v));
            g += u32::from(argb::green(v));
            b += u32::from(argb::blue(v));
        }
        let clamp = |c: u32| c.min(255) as u8;
        argb::pack(clamp(a), clamp(r), clamp(g), clamp(b))
    }
}

/// Porter-Duff "over", later sources on top
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphaOverAccumulate;

impl AccumulatePolicy for AlphaOverAccumulate {
    fn accumulate(&self, values: &[u32]) -> u32 {
        let mut out = [0.0f32; 4];
        for &v in values {
            let sa = f32::from(argb::alpha(v)) / 255.0;
            let da = out[0];
            let a = sa + da * (1.0 - sa);
            if a <= 0.0 {
                continue;
            }
            let src = [argb::red(v), argb::green(v), argb::blue(v)];
            for (c, s) in out[1..].iter_mut().zip(src) {
                *c = (f32::from(s) * sa + *c * da * (1.0 - sa)) / a;
            }
            out[0] = a;
        }
        let byte = |c: f32| c.round().clamp(0.0, 255.0) as u8;
        argb::pack(byte(out[0] * 255.0), byte(out[1]), byte(out[2]), byte(out[3]))
    }
}

/// Composites several single-source projectors
///
/// Each child renders into its own image. A pass maps every child that is
/// not valid yet, then combines the child images into the target with the
/// accumulate policy.
pub struct AccumulateProjector {
    children: Vec<Projector>,
    source_images: Vec<ArgbImage>,
    target: ArgbImage,
    policy: Arc<dyn AccumulatePolicy>,
    pool: RenderPool,
    token: CancelToken,
    valid: bool,
    last_frame_render_time: Duration,
}

impl AccumulateProjector {
    /// Creates a projector over `children`, where child `i` renders into
    /// `source_images[i]`
    pub fn new(
        children: Vec<Projector>,
        source_images: Vec<ArgbImage>,
        target: ArgbImage,
        policy: Arc<dyn AccumulatePolicy>,
        pool: RenderPool,
        token: CancelToken,
    ) -> Self {
        Self {
            children,
            source_images,
            target,
            policy,
            pool,
            token,
            valid: false,
            last_frame_render_time: Duration::ZERO,
        }
    }

    /// The wrapped single-source projectors
    pub fn children(&self) -> &[Projector] {
        &self.children
    }

    pub fn map(&mut self, clear_untouched: bool) -> bool {
        let start = Instant::now();
        let mut valid = true;
        for child in &mut self.children {
            if child.is_valid() {
                continue;
            }
            if !child.map(clear_untouched) {
                self.last_frame_render_time = start.elapsed();
                return false;
            }
            valid &= child.is_valid();
        }

        self.composite();
        self.last_frame_render_time = start.elapsed();
        if self.token.is_cancelled() {
            return false;
        }
        self.valid = valid;
        true
    }

    fn composite(&self) {
        if self.target.is_empty() {
            return;
        }
        let width = self.target.width() as usize;
        let rows = self.pool.rows_per_task(self.target.height() as usize);
        let guards: Vec<_> = self.source_images.iter().map(|image| image.lock()).collect();
        let sources: Vec<&[u32]> = guards.iter().map(|guard| &**guard).collect();
        let sources = &sources;
        let policy = &*self.policy;
        let token = &self.token;
        let pool = &self.pool;

        self.target.with_pixels_mut(|pixels| {
            pool.install(|| {
                pixels
                    .par_chunks_mut(rows * width)
                    .enumerate()
                    .for_each(|(task, chunk)| {
                        let mut values = Vec::with_capacity(sources.len());
                        let first = task * rows * width;
                        for (r, row) in chunk.chunks_mut(width).enumerate() {
                            if token.is_cancelled() {
                                return;
                            }
                            let row_start = first + r * width;
                            for (x, pixel) in row.iter_mut().enumerate() {
                                values.clear();
                                values.extend(sources.iter().map(|s| s[row_start + x]));
                                *pixel = policy.accumulate(&values);
                            }
                        }
                    });
            });
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
