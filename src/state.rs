//! Viewer state consumed by the renderer
//!
//! A snapshot of everything a frame depends on: the viewer transform, the
//! current timepoint, interpolation, display mode and the sources.

use crate::mipmap::{best_mipmap_level, MipmapGeometry};
use crate::source::{Interpolation, SourceState};
use crate::transform::Affine3;
use serde::{Deserialize, Serialize};

/// Which sources are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DisplayMode {
    /// Only the current source
    Single,
    /// Every active source, composited
    #[default]
    Fused,
}

/// View parameters and sources for one frame
#[derive(Debug, Clone)]
pub struct ViewerState {
    viewer_transform: Affine3,
    timepoint: u32,
    interpolation: Interpolation,
    display_mode: DisplayMode,
    current_source: usize,
    sources: Vec<SourceState>,
}

impl ViewerState {
    /// Creates a fused-mode state at timepoint 0 with an identity view
    pub fn new(sources: Vec<SourceState>) -> Self {
        Self {
            viewer_transform: Affine3::identity(),
            timepoint: 0,
            interpolation: Interpolation::default(),
            display_mode: DisplayMode::default(),
            current_source: 0,
            sources,
        }
    }

    /// World-to-canvas transform
    pub fn viewer_transform(&self) -> &Affine3 {
        &self.viewer_transform
    }

    /// Sets the world-to-canvas transform
    pub fn set_viewer_transform(&mut self, transform: Affine3) {
        self.viewer_transform = transform;
    }

    /// Current timepoint
    pub fn timepoint(&self) -> u32 {
        self.timepoint
    }

    /// Sets the current timepoint
    pub fn set_timepoint(&mut self, timepoint: u32) {
        self.timepoint = timepoint;
    }

    /// Interpolation mode
    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Sets the interpolation mode
    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    /// Display mode
    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Sets the display mode
    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.display_mode = mode;
    }

    /// Index of the current source (used in single mode)
    pub fn current_source(&self) -> usize {
        self.current_source
    }

    /// Sets the current source, ignored if out of range
    pub fn set_current_source(&mut self, index: usize) {
        if index < self.sources.len() {
            self.current_source = index;
        }
    }

    /// All sources
    pub fn sources(&self) -> &[SourceState] {
        &self.sources
    }

    /// Mutable access to all sources
    pub fn sources_mut(&mut self) -> &mut [SourceState] {
        &mut self.sources
    }

    /// Appends a source
    pub fn add_source(&mut self, source: SourceState) {
        self.sources.push(source);
    }

    /// Indices of the sources visible at the current timepoint, in source order
    pub fn visible_source_indices(&self) -> Vec<usize> {
        let present = |i: &usize| self.sources[*i].source().is_present(self.timepoint);
        match self.display_mode {
            DisplayMode::Single => (self.current_source..self.current_source + 1)
                .filter(|&i| i < self.sources.len())
                .filter(present)
                .collect(),
            DisplayMode::Fused => (0..self.sources.len())
                .filter(|&i| self.sources[i].is_active())
                .filter(present)
                .collect(),
        }
    }

    /// Best matching mipmap level of source `index` for a screen scale
    pub fn best_mipmap_level(&self, screen_scale_transform: &Affine3, index: usize) -> usize {
        let Some(state) = self.sources.get(index) else {
            return 0;
        };
        let geometry = MipmapGeometry::of(state.source().as_ref(), self.timepoint);
        let screen_transform = self.viewer_transform.pre_concatenate(screen_scale_transform);
        best_mipmap_level(&geometry, &screen_transform)
    }
}
