//! Data sources consumed by the renderer
//!
//! A [`Source`] is a multi-resolution scalar field: for every timepoint and
//! mipmap level it has a voxel grid placed in world space by a source
//! transform, and it can be sampled at continuous voxel coordinates.
//!
//! A [`VolatileSource`] is the cache-aware variant: sampling never blocks and
//! returns the best value currently resident together with a validity flag.
//!
//! Mipmap level 0 is the finest level.

use crate::cache::CacheHints;
use crate::image::argb;
use crate::mipmap::MipmapOrdering;
use crate::transform::Affine3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Interpolation used when sampling between voxel centers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Interpolation {
    /// Value of the closest voxel
    #[default]
    NearestNeighbor,
    /// Trilinear interpolation of the eight surrounding voxels
    Linear,
}

impl Interpolation {
    /// How far (in voxels) outside a region a sample may still read from it
    pub fn support(&self) -> f64 {
        match self {
            Interpolation::NearestNeighbor => 0.5,
            Interpolation::Linear => 1.0,
        }
    }
}

/// A sample that may not be backed by loaded data yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatileValue {
    /// The sampled value (meaningless when not valid)
    pub value: f32,
    /// Whether all data contributing to the sample is resident
    pub valid: bool,
}

impl VolatileValue {
    /// A valid sample
    pub fn valid(value: f32) -> Self {
        Self { value, valid: true }
    }

    /// A sample without data
    pub fn invalid() -> Self {
        Self {
            value: 0.0,
            valid: false,
        }
    }
}

/// Tiling of a volatile mipmap level into cache cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGrid {
    /// Voxel dimensions of the level
    pub dimensions: [u64; 3],
    /// Voxel dimensions of one cell
    pub cell_dimensions: [u32; 3],
}

impl CellGrid {
    /// Number of cells along each axis
    pub fn grid_dimensions(&self) -> [u64; 3] {
        let mut dims = [0; 3];
        for d in 0..3 {
            let cell = u64::from(self.cell_dimensions[d].max(1));
            dims[d] = self.dimensions[d].div_ceil(cell);
        }
        dims
    }

    /// Cell containing the voxel at `position`
    pub fn cell_of(&self, position: [i64; 3]) -> [i64; 3] {
        let mut cell = [0; 3];
        for d in 0..3 {
            cell[d] = position[d].div_euclid(i64::from(self.cell_dimensions[d].max(1)));
        }
        cell
    }
}

/// A multi-resolution scalar data source
pub trait Source: Send + Sync {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Number of mipmap levels, at least 1
    fn num_mipmap_levels(&self) -> usize;

    /// Whether the source has data at `timepoint`
    fn is_present(&self, _timepoint: u32) -> bool {
        true
    }

    /// Transform from voxel coordinates of `level` to world coordinates
    fn source_transform(&self, timepoint: u32, level: usize) -> Affine3;

    /// Voxel dimensions of `level`
    fn dimensions(&self, timepoint: u32, level: usize) -> [u64; 3];

    /// Samples at continuous voxel coordinates, `None` outside the data
    ///
    /// May block until the data is available.
    fn sample(
        &self,
        timepoint: u32,
        level: usize,
        position: [f64; 3],
        interpolation: Interpolation,
    ) -> Option<f32>;
}

/// A cache-backed source whose reads never block
pub trait VolatileSource: Source {
    /// Samples whatever is currently resident, `None` outside the data
    fn sample_volatile(
        &self,
        timepoint: u32,
        level: usize,
        position: [f64; 3],
        interpolation: Interpolation,
    ) -> Option<VolatileValue>;

    /// Sets the hints used by subsequent reads of `level`
    fn set_cache_hints(&self, timepoint: u32, level: usize, hints: CacheHints);

    /// Cell tiling of `level`, `None` if the level is not cell-backed
    fn cell_grid(&self, timepoint: u32, level: usize) -> Option<CellGrid>;

    /// Asks the cache to make a cell resident according to `hints`
    fn prefetch_cell(&self, timepoint: u32, level: usize, cell: [i64; 3], hints: CacheHints);

    /// A source-specific mipmap ordering, if any
    fn mipmap_ordering(&self) -> Option<&dyn MipmapOrdering> {
        None
    }
}

/// Maps a scalar sample to an ARGB pixel
pub trait Converter: Send + Sync {
    /// Converts one value
    fn convert(&self, value: f32) -> u32;
}

/// Linear ramp from `min` (transparent black) to `max` (full `color`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRangeConverter {
    /// Value mapped to black
    pub min: f32,
    /// Value mapped to full color
    pub max: f32,
    /// Target color as `0x00RRGGBB`
    pub color: u32,
}

impl LinearRangeConverter {
    /// Creates a converter
    pub fn new(min: f32, max: f32, color: u32) -> Self {
        Self { min, max, color }
    }

    /// Grayscale converter over `[min, max]`
    pub fn gray(min: f32, max: f32) -> Self {
        Self::new(min, max, 0x00ff_ffff)
    }
}

impl Converter for LinearRangeConverter {
    fn convert(&self, value: f32) -> u32 {
        let range = self.max - self.min;
        let t = if range > 0.0 {
            ((value - self.min) / range).clamp(0.0, 1.0)
        } else if value >= self.max {
            1.0
        } else {
            0.0
        };
        let scale = |channel: u8| (f32::from(channel) * t).round() as u8;
        let r = scale(argb::red(self.color));
        let g = scale(argb::green(self.color));
        let b = scale(argb::blue(self.color));
        let a = (255.0 * t).round() as u8;
        argb::pack(a, r, g, b)
    }
}

/// A source as seen by the viewer: data, optional cache-aware variant,
/// color conversion and whether it is active in fused mode
#[derive(Clone)]
pub struct SourceState {
    source: Arc<dyn Source>,
    volatile: Option<Arc<dyn VolatileSource>>,
    converter: Arc<dyn Converter>,
    active: bool,
}

impl SourceState {
    /// Creates an active source without a cache-aware variant
    pub fn new(source: Arc<dyn Source>, converter: Arc<dyn Converter>) -> Self {
        Self {
            source,
            volatile: None,
            converter,
            active: true,
        }
    }

    /// Attaches a cache-aware variant of the same data
    pub fn with_volatile(mut self, volatile: Arc<dyn VolatileSource>) -> Self {
        self.volatile = Some(volatile);
        self
    }

    /// The synchronous data accessor
    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    /// The cache-aware accessor, if available
    pub fn volatile(&self) -> Option<&Arc<dyn VolatileSource>> {
        self.volatile.as_ref()
    }

    /// The pixel conversion policy
    pub fn converter(&self) -> &Arc<dyn Converter> {
        &self.converter
    }

    /// Whether the source is visible in fused mode
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sets whether the source is visible in fused mode
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Source name
    pub fn name(&self) -> &str {
        self.source.name()
    }
}

impl fmt::Debug for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceState")
            .field("name", &self.source.name())
            .field("volatile", &self.volatile.is_some())
            .field("active", &self.active)
            .finish()
    }
}
