//! # Mipview Progressive Renderer Library
//!
//! Renders views of very large multi-resolution image volumes interactively.
//! Each view change produces a fast coarse frame first, which is refined
//! screen scale by screen scale until the full-resolution frame is shown.
//!
//! ## Architecture
//!
//! Mipview is built from small layers, leaves first:
//! - `transform`: affine 3D transforms between voxel, world and screen space
//! - `image`: shared ARGB and mask pixel buffers
//! - `source`: data sources, converters and per-source viewer state
//! - `cache`: loading hints and the per-frame IO time budget
//! - `mipmap`: source level selection and ordering
//! - `prefetch`: cell footprint of a view
//! - `projector`: empty, simple, cache-aware and accumulating projectors
//! - `renderer`: screen scale ladder, buffer rotation and the orchestrator
//! - `painter`: repaint signal and the painter thread
//! - `display`: render targets
//! - `synthetic`: a procedural cache-backed volume and its async loader
//! - `config`: configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mipview::display::BufferedTarget;
//! use mipview::painter::{PainterThread, RepaintSignal};
//! use mipview::source::{LinearRangeConverter, SourceState};
//! use mipview::synthetic::SyntheticVolume;
//! use mipview::{MultiResolutionRenderer, RendererConfig, ViewerState};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let volume = Arc::new(SyntheticVolume::new("blobs", [1024, 1024, 64], 5, 1));
//!     let viewer = ViewerState::new(vec![SourceState::new(
//!         volume.clone(),
//!         Arc::new(LinearRangeConverter::gray(0.0, 1.0)),
//!     )
//!     .with_volatile(volume)]);
//!
//!     let target = Arc::new(BufferedTarget::new(800, 600));
//!     let signal = RepaintSignal::new();
//!     let renderer = Arc::new(MultiResolutionRenderer::new(
//!         &RendererConfig::default(),
//!         target,
//!         Arc::new(signal.clone()),
//!     )?);
//!
//!     let painter = {
//!         let renderer = renderer.clone();
//!         PainterThread::spawn(signal, move || {
//!             renderer.paint(&viewer);
//!         })?
//!     };
//!     renderer.request_repaint();
//!     painter.shutdown();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod display;
pub mod error;
pub mod image;
pub mod mipmap;
pub mod painter;
pub mod prefetch;
pub mod projector;
pub mod renderer;
pub mod source;
pub mod state;
pub mod synthetic;
pub mod transform;

// Re-export main types for easy access
pub use config::RendererConfig;
pub use display::{BufferedTarget, Frame, RenderTarget};
pub use error::{RenderError, RenderResult};
pub use renderer::{MultiResolutionRenderer, RenderPhase};
pub use state::ViewerState;
pub use transform::Affine3;
