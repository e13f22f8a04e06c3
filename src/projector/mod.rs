//! Projectors: render tasks producing one frame
//!
//! A projector renders ("maps") source data into a target image. Four kinds
//! exist:
//!
//! - [`EmptyProjector`]: no visible sources, clears the target
//! - [`SimpleProjector`]: one source at one fixed mipmap level, synchronous
//! - [`VolatileHierarchyProjector`]: one cache-backed source layered over
//!   several mipmap levels, never blocks on missing data
//! - [`AccumulateProjector`]: composites the outputs of several single-source
//!   projectors
//!
//! # Cancellation
//!
//! Every projector built for one frame shares a [`CancelToken`]. Workers check
//! it once per row and stop early when it is raised; `map` then returns
//! `false`. Partially written rows are fine since the target is re-rendered.
//! The token is reset by the caller before each pass.
//!
//! # Parallelism
//!
//! Pixel work is split into row ranges executed on a [`RenderPool`].

mod accumulate;
mod empty;
mod simple;
mod volatile;

pub use accumulate::{AccumulatePolicy, AccumulateProjector, AlphaOverAccumulate, SumAccumulate};
pub use empty::EmptyProjector;
pub use simple::SimpleProjector;
pub use volatile::VolatileHierarchyProjector;

use crate::error::RenderResult;
use crate::source::{Interpolation, Source, VolatileSource, VolatileValue};
use crate::transform::Affine3;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the flag is raised
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Lowers the flag
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// Worker pool used for per-row pixel work
#[derive(Clone)]
pub struct RenderPool {
    pool: Arc<ThreadPool>,
    num_tasks: usize,
}

impl RenderPool {
    /// Creates a pool of `num_threads` workers, splitting every image into
    /// `num_threads * tasks_per_thread` row ranges
    pub fn new(num_threads: usize, tasks_per_thread: usize) -> RenderResult<Self> {
        let num_threads = num_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("mipview-render-{i}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            num_tasks: num_threads * tasks_per_thread.max(1),
        })
    }

    /// Number of row ranges an image is split into
    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    /// Number of rows per range for an image of `height` rows
    pub fn rows_per_task(&self, height: usize) -> usize {
        height.div_ceil(self.num_tasks).max(1)
    }

    /// Runs `op` inside the pool
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

impl fmt::Debug for RenderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPool")
            .field("threads", &self.pool.current_num_threads())
            .field("tasks", &self.num_tasks)
            .finish()
    }
}

/// Maps target pixels to source voxel coordinates
///
/// Pixel `(x, y)` of the target sits at `origin + x * dx + y * dy` in the voxel
/// space of one mipmap level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelToVoxel {
    origin: [f64; 3],
    dx: [f64; 3],
    dy: [f64; 3],
}

impl PixelToVoxel {
    /// Inverts a voxel-to-target-pixel transform, `None` if it is singular
    pub fn from_source_to_screen(source_to_screen: &Affine3) -> Option<Self> {
        let inverse = source_to_screen.inverse()?;
        Some(Self {
            origin: inverse.apply([0.0, 0.0, 0.0]),
            dx: inverse.apply_linear([1.0, 0.0, 0.0]),
            dy: inverse.apply_linear([0.0, 1.0, 0.0]),
        })
    }

    /// Voxel position of target pixel `(x, y)`
    #[inline]
    pub fn voxel(&self, x: usize, y: usize) -> [f64; 3] {
        let (x, y) = (x as f64, y as f64);
        [
            self.origin[0] + x * self.dx[0] + y * self.dy[0],
            self.origin[1] + x * self.dx[1] + y * self.dy[1],
            self.origin[2] + x * self.dx[2] + y * self.dy[2],
        ]
    }
}

/// One source level as read by a projector
pub struct LevelView<S: ?Sized> {
    source: Arc<S>,
    timepoint: u32,
    level: usize,
    interpolation: Interpolation,
    pixel_to_voxel: PixelToVoxel,
}

impl<S: ?Sized> LevelView<S> {
    /// Creates a view of `level` seen through `pixel_to_voxel`
    pub fn new(
        source: Arc<S>,
        timepoint: u32,
        level: usize,
        interpolation: Interpolation,
        pixel_to_voxel: PixelToVoxel,
    ) -> Self {
        Self {
            source,
            timepoint,
            level,
            interpolation,
            pixel_to_voxel,
        }
    }

    /// Mipmap level read by this view
    pub fn level(&self) -> usize {
        self.level
    }
}

impl<S: Source + ?Sized> LevelView<S> {
    #[inline]
    fn sample(&self, x: usize, y: usize) -> Option<f32> {
        self.source.sample(
            self.timepoint,
            self.level,
            self.pixel_to_voxel.voxel(x, y),
            self.interpolation,
        )
    }
}

impl<S: VolatileSource + ?Sized> LevelView<S> {
    #[inline]
    fn sample_volatile(&self, x: usize, y: usize) -> Option<VolatileValue> {
        self.source.sample_volatile(
            self.timepoint,
            self.level,
            self.pixel_to_voxel.voxel(x, y),
            self.interpolation,
        )
    }
}

/// Kind of a projector, used for logging and statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorKind {
    Empty,
    Simple,
    Volatile,
    Accumulate,
}

/// A render task for one frame
pub enum Projector {
    Empty(EmptyProjector),
    Simple(SimpleProjector),
    Volatile(VolatileHierarchyProjector),
    Accumulate(AccumulateProjector),
}

impl Projector {
    /// Renders into the target
    ///
    /// Returns `false` if the pass was cancelled. With `clear_untouched`,
    /// cache-aware projectors zero pixels no source level could cover.
    pub fn map(&mut self, clear_untouched: bool) -> bool {
        match self {
            Projector::Empty(p) => p.map(),
            Projector::Simple(p) => p.map(),
            Projector::Volatile(p) => p.map(clear_untouched),
            Projector::Accumulate(p) => p.map(clear_untouched),
        }
    }

    /// Whether the target holds the final image for the current data
    pub fn is_valid(&self) -> bool {
        match self {
            Projector::Empty(p) => p.is_valid(),
            Projector::Simple(p) => p.is_valid(),
            Projector::Volatile(p) => p.is_valid(),
            Projector::Accumulate(p) => p.is_valid(),
        }
    }

    /// Raises the shared cancellation flag
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    /// The shared cancellation flag
    pub fn cancel_token(&self) -> &CancelToken {
        match self {
            Projector::Empty(p) => p.cancel_token(),
            Projector::Simple(p) => p.cancel_token(),
            Projector::Volatile(p) => p.cancel_token(),
            Projector::Accumulate(p) => p.cancel_token(),
        }
    }

    /// Wall-clock time of the most recent `map`
    pub fn last_frame_render_time(&self) -> Duration {
        match self {
            Projector::Empty(p) => p.last_frame_render_time(),
            Projector::Simple(p) => p.last_frame_render_time(),
            Projector::Volatile(p) => p.last_frame_render_time(),
            Projector::Accumulate(p) => p.last_frame_render_time(),
        }
    }

    /// Which variant this is
    pub fn kind(&self) -> ProjectorKind {
        match self {
            Projector::Empty(_) => ProjectorKind::Empty,
            Projector::Simple(_) => ProjectorKind::Simple,
            Projector::Volatile(_) => ProjectorKind::Volatile,
            Projector::Accumulate(_) => ProjectorKind::Accumulate,
        }
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("kind", &self.kind())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_pixel_to_voxel_inverts_scaling() {
        let map = PixelToVoxel::from_source_to_screen(&Affine3::scaling(0.5, 0.25, 1.0)).unwrap();
        assert_eq!(map.voxel(0, 0), [0.0, 0.0, 0.0]);
        assert_eq!(map.voxel(3, 2), [6.0, 8.0, 0.0]);
    }

    #[test]
    fn test_singular_transform_has_no_pixel_map() {
        assert!(PixelToVoxel::from_source_to_screen(&Affine3::scaling(1.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn test_rows_per_task() {
        let pool = RenderPool::new(2, 2).unwrap();
        assert_eq!(pool.num_tasks(), 4);
        assert_eq!(pool.rows_per_task(10), 3);
        assert_eq!(pool.rows_per_task(0), 1);
    }
}
