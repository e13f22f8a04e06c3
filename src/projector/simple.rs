//! Synchronous single-source projector
//!
//! Samples one source at one mipmap level, row ranges split across the
//! render pool. Every pixel is written, so a completed pass is always valid.

use super::{CancelToken, LevelView, RenderPool};
use crate::image::ArgbImage;
use crate::source::{Converter, Source};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Renders one source at one fixed mipmap level
///
/// Reads go through [`Source::sample`] and may block. Once a pass completes
/// the projector is valid.
pub struct SimpleProjector {
    view: LevelView<dyn Source>,
    converter: Arc<dyn Converter>,
    target: ArgbImage,
    pool: RenderPool,
    token: CancelToken,
    valid: bool,
    last_frame_render_time: Duration,
}

impl SimpleProjector {
    /// Creates a projector rendering `view` into `target`
    pub fn new(
        view: LevelView<dyn Source>,
        converter: Arc<dyn Converter>,
        target: ArgbImage,
        pool: RenderPool,
        token: CancelToken,
    ) -> Self {
        Self {
            view,
            converter,
            target,
            pool,
            token,
            valid: false,
            last_frame_render_time: Duration::ZERO,
        }
    }

    /// Mipmap level rendered by this projector
    pub fn mipmap_level(&self) -> usize {
        self.view.level()
    }

    pub fn map(&mut self) -> bool {
        let start = Instant::now();
        let width = self.target.width() as usize;
        if !self.target.is_empty() {
            let rows = self.pool.rows_per_task(self.target.height() as usize);
            let view = &self.view;
            let converter = &*self.converter;
            let token = &self.token;
            let pool = &self.pool;
            self.target.with_pixels_mut(|pixels| {
                pool.install(|| {
                    pixels
                        .par_chunks_mut(rows * width)
                        .enumerate()
                        .for_each(|(task, chunk)| {
                            for (r, row) in chunk.chunks_mut(width).enumerate() {
                                if token.is_cancelled() {
                                    return;
                                }
                                let y = task * rows + r;
                                for (x, pixel) in row.iter_mut().enumerate() {
                                    *pixel = view.sample(x, y).map_or(0, |v| converter.convert(v));
                                }
                            }
                        });
                });
            });
        }
        self.last_frame_render_time = start.elapsed();

        let success = !self.token.is_cancelled();
        self.valid |= success;
        success
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
