//! Mipmap level selection and ordering
//!
//! Given a view, decides which source resolution levels matter and in which
//! order they should be prefetched and rendered.
//!
//! # Overview
//!
//! - [`voxel_screen_size`] measures how large one voxel of a level appears on screen
//! - [`best_mipmap_level`] picks the level whose voxels are closest to one pixel
//!   without being much smaller
//! - [`MipmapOrdering`] turns that into [`MipmapHints`]: candidate levels with
//!   prefetch and render priorities plus cache hints
//!
//! Level 0 is the finest level. Larger indices are coarser.

use crate::cache::{CacheHints, LoadingStrategy};
use crate::source::Source;
use crate::transform::Affine3;

/// Voxel screen sizes at or above this count as "at least one pixel"
const MIN_VOXEL_SCREEN_SIZE: f64 = 0.99;

/// Source transforms of every mipmap level at one timepoint
#[derive(Debug, Clone, PartialEq)]
pub struct MipmapGeometry {
    transforms: Vec<Affine3>,
}

impl MipmapGeometry {
    /// Captures the level transforms of `source` at `timepoint`
    pub fn of<S: Source + ?Sized>(source: &S, timepoint: u32) -> Self {
        let transforms = (0..source.num_mipmap_levels().max(1))
            .map(|level| source.source_transform(timepoint, level))
            .collect();
        Self { transforms }
    }

    /// Builds geometry directly from level transforms (finest first)
    pub fn from_transforms(transforms: Vec<Affine3>) -> Self {
        Self { transforms }
    }

    /// Number of levels
    pub fn num_levels(&self) -> usize {
        self.transforms.len()
    }

    /// Voxel-to-world transform of `level`
    pub fn transform(&self, level: usize) -> Option<&Affine3> {
        self.transforms.get(level)
    }
}

/// Largest on-screen (xy) length of a unit step along any voxel axis
pub fn voxel_screen_size(source_to_screen: &Affine3) -> f64 {
    (0..3)
        .map(|axis| {
            let mut unit = [0.0; 3];
            unit[axis] = 1.0;
            let v = source_to_screen.apply_linear(unit);
            (v[0] * v[0] + v[1] * v[1]).sqrt()
        })
        .fold(0.0, f64::max)
}

/// Best mipmap level for a world-to-screen transform
///
/// Starts from the finest level whose voxels are at least about one screen
/// pixel, then steps one level finer if that level is much closer to one pixel.
pub fn best_mipmap_level(geometry: &MipmapGeometry, screen_transform: &Affine3) -> usize {
    let size_of = |level: usize| {
        geometry
            .transform(level)
            .map(|t| voxel_screen_size(&t.pre_concatenate(screen_transform)))
            .unwrap_or(0.0)
    };

    let n = geometry.num_levels();
    if n == 0 {
        return 0;
    }
    let mut target = (0..n)
        .find(|&level| size_of(level) >= MIN_VOXEL_SCREEN_SIZE)
        .unwrap_or(n - 1);

    if target > 0 {
        let size1 = size_of(target);
        let size0 = size_of(target - 1);
        if (size1 - 1.0).abs() / 2.0 > (size0 - 1.0).abs() {
            target -= 1;
        }
    }
    target
}

/// One candidate level with its priorities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    /// Source mipmap level
    pub mipmap_level: usize,
    /// Lower is prefetched earlier
    pub prefetch_priority: usize,
    /// Lower is rendered earlier (and wins where valid)
    pub render_priority: usize,
    /// Hints used while prefetching, `None` for the cache's defaults
    pub prefetch_hints: Option<CacheHints>,
    /// Hints used while rendering, `None` for the cache's defaults
    pub render_hints: Option<CacheHints>,
}

/// Ordered candidate levels for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipmapHints {
    levels: Vec<Level>,
    renew_hints_after_painting_once: bool,
}

impl MipmapHints {
    /// Creates hints
    pub fn new(levels: Vec<Level>, renew_hints_after_painting_once: bool) -> Self {
        Self {
            levels,
            renew_hints_after_painting_once,
        }
    }

    /// All candidate levels in their original order
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Candidate levels sorted by prefetch priority
    pub fn prefetch_order(&self) -> Vec<Level> {
        let mut levels = self.levels.clone();
        levels.sort_by_key(|l| l.prefetch_priority);
        levels
    }

    /// Candidate levels sorted by render priority
    pub fn render_order(&self) -> Vec<Level> {
        let mut levels = self.levels.clone();
        levels.sort_by_key(|l| l.render_priority);
        levels
    }

    /// Whether the next repaint must recompute hints even without a new frame request
    pub fn renew_hints_after_painting_once(&self) -> bool {
        self.renew_hints_after_painting_once
    }
}

/// Policy ranking source levels for a view
pub trait MipmapOrdering: Send + Sync {
    /// Computes hints for rendering `geometry` through `screen_transform`
    ///
    /// `previous_timepoint` is the timepoint of the previously built projector.
    fn mipmap_hints(
        &self,
        geometry: &MipmapGeometry,
        screen_transform: &Affine3,
        timepoint: u32,
        previous_timepoint: Option<u32>,
    ) -> MipmapHints;
}

/// Best level first, then every coarser level as fallback
///
/// When the timepoint just changed, typically nothing is loaded yet. Only the
/// best and the coarsest level are used then, and the hints are renewed after
/// one paint so the full ladder is used once data starts arriving.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMipmapOrdering;

impl MipmapOrdering for DefaultMipmapOrdering {
    fn mipmap_hints(
        &self,
        geometry: &MipmapGeometry,
        screen_transform: &Affine3,
        timepoint: u32,
        previous_timepoint: Option<u32>,
    ) -> MipmapHints {
        let best = best_mipmap_level(geometry, screen_transform);
        let coarsest = geometry.num_levels().saturating_sub(1);
        let best_hints = CacheHints::new(LoadingStrategy::Budgeted, 0, true);

        if previous_timepoint != Some(timepoint) {
            let mut levels = vec![Level {
                mipmap_level: best,
                prefetch_priority: 0,
                render_priority: 0,
                prefetch_hints: Some(best_hints),
                render_hints: Some(best_hints),
            }];
            if coarsest != best {
                let hints = CacheHints::new(LoadingStrategy::Volatile, 0, true);
                levels.push(Level {
                    mipmap_level: coarsest,
                    prefetch_priority: 1,
                    render_priority: 1,
                    prefetch_hints: Some(hints),
                    render_hints: Some(hints),
                });
            }
            return MipmapHints::new(levels, true);
        }

        let levels = (best..=coarsest)
            .enumerate()
            .map(|(i, mipmap_level)| {
                let hints = if i == 0 {
                    best_hints
                } else {
                    CacheHints::new(LoadingStrategy::Volatile, i, false)
                };
                Level {
                    mipmap_level,
                    prefetch_priority: i,
                    render_priority: i,
                    prefetch_hints: Some(hints),
                    render_hints: Some(hints),
                }
            })
            .collect();
        MipmapHints::new(levels, false)
    }
}
