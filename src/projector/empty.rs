//! Projector for an empty view

use super::CancelToken;
use crate::image::ArgbImage;
use std::time::{Duration, Instant};

/// Clears the target; used when no source is visible
#[derive(Debug)]
pub struct EmptyProjector {
    target: ArgbImage,
    token: CancelToken,
    valid: bool,
    last_frame_render_time: Duration,
}

impl EmptyProjector {
    /// Creates a projector clearing `target`
    pub fn new(target: ArgbImage, token: CancelToken) -> Self {
        Self {
            target,
            token,
            valid: false,
            last_frame_render_time: Duration::ZERO,
        }
    }

    pub fn map(&mut self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let start = Instant::now();
        self.target.fill(0);
        self.valid = true;
        self.last_frame_render_time = start.elapsed();
        true
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
