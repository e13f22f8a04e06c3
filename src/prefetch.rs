//! Cell prefetching for cache-backed sources
//!
//! Before a cache-aware projector renders, every candidate level asks the
//! cache to load the cells that the screen slice touches. The screen slice
//! is the plane `z = 0` in screen space, widened by the interpolation support.

use crate::cache::CacheHints;
use crate::source::{CellGrid, Interpolation, VolatileSource};
use crate::transform::Affine3;
use log::trace;

/// Axis-aligned box in continuous coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min: [f64; 3],
    max: [f64; 3],
}

impl Bounds {
    fn of(points: impl IntoIterator<Item = [f64; 3]>) -> Self {
        let mut bounds = Bounds {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        };
        for p in points {
            for d in 0..3 {
                bounds.min[d] = bounds.min[d].min(p[d]);
                bounds.max[d] = bounds.max[d].max(p[d]);
            }
        }
        bounds
    }

    fn corners(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        (0..8).map(move |i| {
            [
                if i & 1 == 0 { self.min[0] } else { self.max[0] },
                if i & 2 == 0 { self.min[1] } else { self.max[1] },
                if i & 4 == 0 { self.min[2] } else { self.max[2] },
            ]
        })
    }
}

/// Cells of `grid` intersecting the screen slice
///
/// `source_to_screen` maps voxel coordinates of the level to screen pixels of
/// a `screen_width x screen_height` image.
pub fn visible_cells(
    source_to_screen: &Affine3,
    screen_width: u32,
    screen_height: u32,
    grid: &CellGrid,
    interpolation: Interpolation,
) -> Vec<[i64; 3]> {
    let Some(screen_to_source) = source_to_screen.inverse() else {
        return Vec::new();
    };
    if screen_width == 0 || screen_height == 0 {
        return Vec::new();
    }
    let support = interpolation.support();
    let (w, h) = (f64::from(screen_width), f64::from(screen_height));
    let screen = Bounds {
        min: [-0.5, -0.5, -support],
        max: [w - 0.5, h - 0.5, support],
    };
    let footprint = Bounds::of(screen.corners().map(|c| screen_to_source.apply(c)));

    let grid_dims = grid.grid_dimensions();
    let mut first = [0i64; 3];
    let mut last = [0i64; 3];
    for d in 0..3 {
        let cell = f64::from(grid.cell_dimensions[d].max(1));
        let lo = (footprint.min[d] - support).floor() / cell;
        let hi = (footprint.max[d] + support).ceil() / cell;
        let cells = grid_dims[d] as i64;
        first[d] = (lo.floor() as i64).clamp(0, cells);
        last[d] = (hi.floor() as i64).clamp(-1, cells - 1);
        if first[d] > last[d] {
            return Vec::new();
        }
    }

    let mut cells = Vec::new();
    for z in first[2]..=last[2] {
        for y in first[1]..=last[1] {
            for x in first[0]..=last[0] {
                let cell = [x, y, z];
                if cell_touches_slice(source_to_screen, grid, cell, &screen, support) {
                    cells.push(cell);
                }
            }
        }
    }
    cells
}

fn cell_touches_slice(
    source_to_screen: &Affine3,
    grid: &CellGrid,
    cell: [i64; 3],
    screen: &Bounds,
    support: f64,
) -> bool {
    let mut voxels = Bounds {
        min: [0.0; 3],
        max: [0.0; 3],
    };
    for d in 0..3 {
        let size = i64::from(grid.cell_dimensions[d].max(1));
        voxels.min[d] = (cell[d] * size) as f64 - support;
        voxels.max[d] = ((cell[d] + 1) * size - 1) as f64 + support;
    }
    let projected = Bounds::of(voxels.corners().map(|c| source_to_screen.apply(c)));
    (0..3).all(|d| projected.min[d] <= screen.max[d] && projected.max[d] >= screen.min[d])
}

/// Submits every cell of `level` touching the screen slice to the cache
///
/// Does nothing for levels that are not cell-backed or whose hints forbid
/// loading. Returns the number of cells submitted.
#[allow(clippy::too_many_arguments)]
pub fn prefetch<S: VolatileSource + ?Sized>(
    source: &S,
    timepoint: u32,
    level: usize,
    source_to_screen: &Affine3,
    screen_width: u32,
    screen_height: u32,
    interpolation: Interpolation,
    hints: CacheHints,
) -> usize {
    if !hints.allows_loading() {
        return 0;
    }
    let Some(grid) = source.cell_grid(timepoint, level) else {
        return 0;
    };
    let cells = visible_cells(source_to_screen, screen_width, screen_height, &grid, interpolation);
    for &cell in &cells {
        source.prefetch_cell(timepoint, level, cell, hints);
    }
    trace!(
        "prefetched {} cells of {} level {}",
        cells.len(),
        source.name(),
        level
    );
    cells.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> CellGrid {
        CellGrid {
            dimensions: [128, 128, 128],
            cell_dimensions: [32, 32, 32],
        }
    }

    #[test]
    fn test_identity_view_touches_first_slab() {
        let cells = visible_cells(&Affine3::identity(), 64, 40, &grid(), Interpolation::NearestNeighbor);
        // x: cells 0..=2 (support reaches into cell 2), y: 0..=1, z: 0 only
        assert!(cells.iter().all(|c| c[2] == 0));
        assert!(cells.contains(&[0, 0, 0]));
        assert!(cells.contains(&[1, 1, 0]));
        assert!(!cells.contains(&[3, 0, 0]));
        assert!(!cells.contains(&[0, 2, 0]));
    }

    #[test]
    fn test_slice_inside_volume() {
        let t = Affine3::translation(0.0, 0.0, -50.0);
        let cells = visible_cells(&t, 16, 16, &grid(), Interpolation::Linear);
        assert_eq!(cells, vec![[0, 0, 1]]);
    }

    #[test]
    fn test_slice_outside_volume() {
        let t = Affine3::translation(0.0, 0.0, 500.0);
        assert!(visible_cells(&t, 16, 16, &grid(), Interpolation::Linear).is_empty());
    }

    #[test]
    fn test_empty_screen() {
        assert!(visible_cells(&Affine3::identity(), 0, 16, &grid(), Interpolation::Linear).is_empty());
    }
}
