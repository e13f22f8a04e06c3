//! Projector construction
//!
//! Builds the projector for one frame from the visible sources:
//!
//! - no source: [`EmptyProjector`]
//! - one source: a single-source projector writing straight into the target
//! - several sources: one single-source projector per source, each writing
//!   into its own temporary image, wrapped in an [`AccumulateProjector`]
//!
//! A single-source projector is cache-aware when the source offers volatile
//! data and the configuration allows it. Otherwise it renders the best
//! matching mipmap level synchronously.

use super::screen_scale::ScreenScale;
use crate::cache::LoadingStrategy;
use crate::image::{ArgbImage, MaskImage};
use crate::mipmap::{DefaultMipmapOrdering, MipmapGeometry, MipmapOrdering};
use crate::prefetch::prefetch;
use crate::projector::{
    AccumulatePolicy, AccumulateProjector, CancelToken, EmptyProjector, LevelView, PixelToVoxel, Projector,
    RenderPool, SimpleProjector, VolatileHierarchyProjector,
};
use crate::source::{SourceState, VolatileSource};
use crate::state::ViewerState;
use crate::transform::Affine3;
use log::{debug, warn};
use std::sync::Arc;

/// A freshly built projector
#[derive(Debug)]
pub struct BuiltProjector {
    pub projector: Projector,
    /// The mipmap hints asked to be recomputed after one paint
    pub renew_hints: bool,
}

/// Everything a frame's projectors are built against
pub struct FrameContext<'a> {
    pub viewer: &'a ViewerState,
    pub scale: &'a ScreenScale,
    pub previous_timepoint: Option<u32>,
    pub token: CancelToken,
}

/// Voxel-to-pixel transform of one source level at one screen scale
pub fn source_to_screen(level_transform: &Affine3, viewer_transform: &Affine3, scale_transform: &Affine3) -> Affine3 {
    level_transform
        .pre_concatenate(viewer_transform)
        .pre_concatenate(scale_transform)
}

/// Builds projectors for [`MultiResolutionRenderer`](super::MultiResolutionRenderer)
pub struct ProjectorFactory {
    pool: RenderPool,
    accumulate: Arc<dyn AccumulatePolicy>,
    use_volatile_if_available: bool,
    prefetch_cells: bool,
}

impl ProjectorFactory {
    /// Creates a factory
    pub fn new(
        pool: RenderPool,
        accumulate: Arc<dyn AccumulatePolicy>,
        use_volatile_if_available: bool,
        prefetch_cells: bool,
    ) -> Self {
        Self {
            pool,
            accumulate,
            use_volatile_if_available,
            prefetch_cells,
        }
    }

    /// Replaces the accumulation policy
    pub fn set_accumulate_policy(&mut self, accumulate: Arc<dyn AccumulatePolicy>) {
        self.accumulate = accumulate;
    }

    /// Builds the projector for `visible` sources rendering into `target`
    pub fn build(&self, frame: &FrameContext<'_>, visible: &[usize], target: ArgbImage) -> BuiltProjector {
        let sources = frame.viewer.sources();
        let built = match visible {
            [] => BuiltProjector {
                projector: Projector::Empty(EmptyProjector::new(target, frame.token.clone())),
                renew_hints: false,
            },
            [index] => {
                let mask = self.mask_for(frame.scale, 0, &target);
                self.single_source(frame, &sources[*index], *index, target, mask)
            }
            _ => {
                let mut children = Vec::with_capacity(visible.len());
                let mut images = Vec::with_capacity(visible.len());
                let mut renew_hints = false;
                for (j, &index) in visible.iter().enumerate() {
                    let image = frame
                        .scale
                        .source_images()
                        .get(j)
                        .cloned()
                        .unwrap_or_else(|| ArgbImage::new(target.width(), target.height()));
                    let mask = self.mask_for(frame.scale, j, &image);
                    let child = self.single_source(frame, &sources[index], index, image.clone(), mask);
                    renew_hints |= child.renew_hints;
                    children.push(child.projector);
                    images.push(image);
                }
                BuiltProjector {
                    projector: Projector::Accumulate(AccumulateProjector::new(
                        children,
                        images,
                        target,
                        Arc::clone(&self.accumulate),
                        self.pool.clone(),
                        frame.token.clone(),
                    )),
                    renew_hints,
                }
            }
        };
        debug!(
            "built {:?} projector for {} sources at {}x{}",
            built.projector.kind(),
            visible.len(),
            frame.scale.width(),
            frame.scale.height()
        );
        built
    }

    fn mask_for(&self, scale: &ScreenScale, index: usize, image: &ArgbImage) -> MaskImage {
        scale
            .mask(index)
            .cloned()
            .unwrap_or_else(|| MaskImage::new(image.width(), image.height()))
    }

    fn single_source(
        &self,
        frame: &FrameContext<'_>,
        state: &SourceState,
        index: usize,
        target: ArgbImage,
        mask: MaskImage,
    ) -> BuiltProjector {
        if self.use_volatile_if_available {
            if let Some(volatile) = state.volatile() {
                return self.volatile_source(frame, state, volatile, target, mask);
            }
        }

        let viewer = frame.viewer;
        let timepoint = viewer.timepoint();
        let level = viewer.best_mipmap_level(frame.scale.scale_transform(), index);
        let transform = source_to_screen(
            &state.source().source_transform(timepoint, level),
            viewer.viewer_transform(),
            frame.scale.scale_transform(),
        );
        let projector = match PixelToVoxel::from_source_to_screen(&transform) {
            Some(pixel_to_voxel) => Projector::Simple(SimpleProjector::new(
                LevelView::new(
                    Arc::clone(state.source()),
                    timepoint,
                    level,
                    viewer.interpolation(),
                    pixel_to_voxel,
                ),
                Arc::clone(state.converter()),
                target,
                self.pool.clone(),
                frame.token.clone(),
            )),
            None => {
                warn!("⚠️ Singular transform for source {}, rendering nothing", state.name());
                Projector::Empty(EmptyProjector::new(target, frame.token.clone()))
            }
        };
        BuiltProjector {
            projector,
            renew_hints: false,
        }
    }

    fn volatile_source(
        &self,
        frame: &FrameContext<'_>,
        state: &SourceState,
        volatile: &Arc<dyn VolatileSource>,
        target: ArgbImage,
        mask: MaskImage,
    ) -> BuiltProjector {
        let viewer = frame.viewer;
        let timepoint = viewer.timepoint();
        let scale_transform = frame.scale.scale_transform();
        let screen_transform = viewer.viewer_transform().pre_concatenate(scale_transform);
        let geometry = MipmapGeometry::of(volatile.as_ref(), timepoint);
        let hints = match volatile.mipmap_ordering() {
            Some(ordering) => {
                ordering.mipmap_hints(&geometry, &screen_transform, timepoint, frame.previous_timepoint)
            }
            None => DefaultMipmapOrdering.mipmap_hints(
                &geometry,
                &screen_transform,
                timepoint,
                frame.previous_timepoint,
            ),
        };
        let level_to_screen = |level: usize| {
            source_to_screen(
                &volatile.source_transform(timepoint, level),
                viewer.viewer_transform(),
                scale_transform,
            )
        };

        if self.prefetch_cells {
            for level in hints.prefetch_order() {
                let cache_hints = level.prefetch_hints.unwrap_or_default();
                if cache_hints.loading_strategy == LoadingStrategy::DontLoad {
                    continue;
                }
                prefetch(
                    volatile.as_ref(),
                    timepoint,
                    level.mipmap_level,
                    &level_to_screen(level.mipmap_level),
                    target.width(),
                    target.height(),
                    viewer.interpolation(),
                    cache_hints,
                );
            }
        }

        let mut views = Vec::with_capacity(hints.levels().len());
        for level in hints.render_order() {
            if let Some(cache_hints) = level.render_hints {
                volatile.set_cache_hints(timepoint, level.mipmap_level, cache_hints);
            }
            match PixelToVoxel::from_source_to_screen(&level_to_screen(level.mipmap_level)) {
                Some(pixel_to_voxel) => views.push(LevelView::new(
                    Arc::clone(volatile),
                    timepoint,
                    level.mipmap_level,
                    viewer.interpolation(),
                    pixel_to_voxel,
                )),
                None => warn!(
                    "⚠️ Singular transform for source {} level {}",
                    state.name(),
                    level.mipmap_level
                ),
            }
        }

        BuiltProjector {
            projector: Projector::Volatile(VolatileHierarchyProjector::new(
                views,
                Arc::clone(state.converter()),
                target,
                mask,
                self.pool.clone(),
                frame.token.clone(),
            )),
            renew_hints: hints.renew_hints_after_painting_once(),
        }
    }
}
