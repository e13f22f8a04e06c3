//! Adaptive multi-resolution progressive renderer
//!
//! [`MultiResolutionRenderer`] renders a coarse frame first and refines it
//! one screen scale at a time while the view stays put. The screen scale a
//! sequence starts from adapts to how long its first render took.
//!
//! # Features
//!
//! - **Progressive Refinement**: coarse to fine, one level per `paint`
//! - **Adaptive Start Level**: keeps the first frame near a time budget
//! - **Buffer Rotation**: triple-buffered output slots per screen scale
//! - **Cancellation**: a new request aborts refinement passes, never the
//!   protected starting pass
//! - **Cache Awareness**: incomplete data is re-rendered until valid
//!
//! # Usage
//!
//! ```no_run
//! use mipview::config::RendererConfig;
//! use mipview::display::BufferedTarget;
//! use mipview::painter::RepaintSignal;
//! use mipview::renderer::MultiResolutionRenderer;
//! use mipview::state::ViewerState;
//! use std::sync::Arc;
//!
//! let target = Arc::new(BufferedTarget::new(640, 480));
//! let signal = RepaintSignal::new();
//! let renderer = MultiResolutionRenderer::new(
//!     &RendererConfig::default(),
//!     target.clone(),
//!     Arc::new(signal.clone()),
//! )
//! .unwrap();
//! let viewer = ViewerState::new(Vec::new());
//!
//! renderer.request_repaint();
//! while signal.wait_timeout(std::time::Duration::from_millis(10)) {
//!     renderer.paint(&viewer);
//! }
//! ```

pub mod buffer_pool;
pub mod frame_pacing;
pub mod projector_factory;
pub mod screen_scale;

use crate::cache::{CacheControl, NoopCacheControl};
use crate::config::RendererConfig;
use crate::display::{Frame, RenderTarget};
use crate::error::RenderResult;
use crate::painter::RepaintTrigger;
use crate::projector::{AccumulatePolicy, CancelToken, Projector, ProjectorKind, RenderPool, SumAccumulate};
use crate::state::ViewerState;
use crate::transform::Affine3;
use buffer_pool::{BufferPool, PoolStats, SlotId};
use frame_pacing::{RenderStats, RenderTimer, ScaleLadder};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use projector_factory::{FrameContext, ProjectorFactory};
use screen_scale::ScreenScales;
use std::sync::Arc;
use std::time::Duration;

/// Where the current refinement sequence stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    /// Nothing left to render
    Idle,
    /// The starting (coarsest allowed) level is requested
    Coarsest,
    /// Refining towards level 0; holds the next level
    Refining(usize),
    /// Level 0 is next
    Finest,
    /// Level 0 rendered with missing data; it is rendered again
    Retrying,
}

/// The projector of the running sequence and its bookkeeping
struct ActiveProjector {
    projector: Arc<Mutex<Projector>>,
    token: CancelToken,
    slot: SlotId,
    /// Whether the frame still has to be handed to the target
    pending_handoff: bool,
}

/// State guarded by the renderer lock
struct RendererState {
    scales: ScreenScales,
    pool: BufferPool,
    ladder: ScaleLadder,
    timer: RenderTimer,
    active: Option<ActiveProjector>,
    new_frame_request: bool,
    /// `request_repaint` was called since the last render started
    restart_request: bool,
    /// Any external request arrived since the last render started
    external_request: bool,
    may_cancel: bool,
    previous_timepoint: Option<u32>,
    projector_transform: Affine3,
    phase: RenderPhase,
    killed: bool,
}

/// Progressive renderer over a ladder of screen scales
pub struct MultiResolutionRenderer {
    display: Arc<dyn RenderTarget>,
    repaint: Arc<dyn RepaintTrigger>,
    cache_control: Arc<dyn CacheControl>,
    factory: ProjectorFactory,
    io_budget: Vec<Duration>,
    retry_backoff: Duration,
    state: Mutex<RendererState>,
}

impl MultiResolutionRenderer {
    /// Creates a renderer painting into `display` and asking `repaint` for
    /// follow-up paints
    ///
    /// Uses [`SumAccumulate`] and no cache control until replaced with
    /// [`with_accumulate_policy`](Self::with_accumulate_policy) and
    /// [`with_cache_control`](Self::with_cache_control).
    pub fn new(
        config: &RendererConfig,
        display: Arc<dyn RenderTarget>,
        repaint: Arc<dyn RepaintTrigger>,
    ) -> RenderResult<Self> {
        let scales = ScreenScales::new(&config.scales.screen_scales, config.scales.buffer_count)?;
        let pool = RenderPool::new(
            config.threads.num_rendering_threads,
            config.threads.num_tasks_per_thread,
        )?;
        let target = config.adaptation.target_render_time();
        let num_levels = scales.len();

        info!(
            "🎬 Renderer initialized: {} screen scales, {} buffers, target {:?}, {:?}",
            num_levels, config.scales.buffer_count, target, pool
        );

        Ok(Self {
            display,
            repaint,
            cache_control: Arc::new(NoopCacheControl),
            factory: ProjectorFactory::new(
                pool,
                Arc::new(SumAccumulate),
                config.cache.use_volatile_if_available,
                config.cache.prefetch_cells,
            ),
            io_budget: config.cache.io_budget(),
            retry_backoff: config.adaptation.retry_backoff(),
            state: Mutex::new(RendererState {
                pool: BufferPool::new(scales.buffer_count()),
                ladder: ScaleLadder::new(num_levels, target, config.adaptation.fast_render_divisor),
                timer: RenderTimer::new(num_levels, target),
                scales,
                active: None,
                new_frame_request: false,
                restart_request: false,
                external_request: false,
                may_cancel: false,
                previous_timepoint: None,
                projector_transform: Affine3::identity(),
                phase: RenderPhase::Idle,
                killed: false,
            }),
        })
    }

    /// Uses `cache_control` for frame preparation and IO budget resets
    pub fn with_cache_control(mut self, cache_control: Arc<dyn CacheControl>) -> Self {
        self.cache_control = cache_control;
        self
    }

    /// Uses `policy` to composite several visible sources
    pub fn with_accumulate_policy(mut self, policy: Arc<dyn AccumulatePolicy>) -> Self {
        self.factory.set_accumulate_policy(policy);
        self
    }

    /// Renders the requested screen scale
    ///
    /// Returns whether the render completed; `false` if the canvas is empty,
    /// the renderer was killed or the pass was cancelled.
    pub fn paint(&self, viewer: &ViewerState) -> bool {
        let canvas_width = self.display.canvas_width();
        let canvas_height = self.display.canvas_height();
        if canvas_width == 0 || canvas_height == 0 {
            return false;
        }

        let Some((projector, create)) = self.prepare(viewer, canvas_width, canvas_height) else {
            return false;
        };

        let (success, render_time, valid) = {
            let mut projector = projector.lock();
            let success = projector.map(create);
            (success, projector.last_frame_render_time(), projector.is_valid())
        };

        self.finish(&projector, success, render_time, valid)
    }

    /// Under the lock: handles resize, decides whether a new projector is
    /// needed and builds it
    fn prepare(
        &self,
        viewer: &ViewerState,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Option<(Arc<Mutex<Projector>>, bool)> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.killed {
            return None;
        }

        let resized = match st.scales.check_resize(canvas_width, canvas_height) {
            Ok(resized) => resized,
            Err(e) => {
                warn!("⚠️ Failed to reallocate screen scales: {}", e);
                return None;
            }
        };
        if resized {
            st.pool.reset();
            st.active = None;
        }

        st.may_cancel = st.ladder.may_cancel();
        if st.new_frame_request {
            self.cache_control.prepare_next_frame();
        }
        let create = st.new_frame_request || resized || st.ladder.level_changed() || st.active.is_none();
        st.new_frame_request = false;
        st.restart_request = false;
        st.external_request = false;

        if create {
            let visible = viewer.visible_source_indices();
            if let Err(e) = st.scales.check_renew_source_images(visible.len()) {
                warn!("⚠️ Failed to allocate source images: {}", e);
                return None;
            }
            let slot = st.pool.acquire();
            let level = st.ladder.begin_render();
            let scale = st.scales.level(level)?;
            let target = scale.buffer(slot)?.clone();
            let token = CancelToken::new();
            let built = self.factory.build(
                &FrameContext {
                    viewer,
                    scale,
                    previous_timepoint: st.previous_timepoint,
                    token: token.clone(),
                },
                &visible,
                target,
            );
            if built.renew_hints {
                st.new_frame_request = true;
            }
            st.previous_timepoint = Some(viewer.timepoint());
            st.projector_transform = viewer.viewer_transform().clone();
            self.cache_control.reset_io_budget(&self.io_budget);
            trace!("screen scale {} -> slot {}", level, slot);

            st.active = Some(ActiveProjector {
                projector: Arc::new(Mutex::new(built.projector)),
                token,
                slot,
                pending_handoff: true,
            });
        } else {
            st.ladder.clear_request();
        }

        let active = st.active.as_ref()?;
        active.token.reset();
        Some((Arc::clone(&active.projector), create))
    }

    /// Under the lock: hands the frame over, adapts the ladder and schedules
    /// the next render
    fn finish(&self, projector: &Arc<Mutex<Projector>>, success: bool, render_time: Duration, valid: bool) -> bool {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.killed {
            return false;
        }
        let Some(active) = st.active.as_mut() else {
            return false;
        };
        if !Arc::ptr_eq(&active.projector, projector) {
            // superseded by a concurrent paint
            return success;
        }
        if !success {
            st.timer.record_cancelled();
            trace!("render cancelled after {:?}", render_time);
            return false;
        }

        let level = st.ladder.current_index().unwrap_or(0);
        st.timer.record(level, render_time);
        if active.pending_handoff {
            active.pending_handoff = false;
            let slot = active.slot;
            if let Some(image) = st.scales.level(level).and_then(|s| s.buffer(slot)).cloned() {
                let released = self.display.set_frame(Frame {
                    slot,
                    image,
                    transform: st.projector_transform.clone(),
                });
                st.pool.complete(slot, released);
            }
            st.ladder.adapt(render_time);
        }

        if level > 0 {
            self.request_locked(st, level - 1);
            st.phase = Self::pending_phase(st);
        } else if st.external_request {
            // already scheduled by the request that arrived during the pass
            st.phase = Self::pending_phase(st);
        } else if !valid {
            st.phase = RenderPhase::Retrying;
            drop(guard);
            std::thread::sleep(self.retry_backoff);
            let mut guard = self.state.lock();
            if !guard.killed {
                self.request_locked(&mut guard, 0);
                if guard.external_request {
                    guard.phase = Self::pending_phase(&guard);
                }
            }
        } else {
            st.phase = RenderPhase::Idle;
            debug!("✅ Sequence complete in {:?} at finest scale", render_time);
        }
        true
    }

    /// Phase of the render the pending request leads to
    fn pending_phase(st: &RendererState) -> RenderPhase {
        if st.restart_request {
            return RenderPhase::Coarsest;
        }
        match st.ladder.requested_index() {
            0 => RenderPhase::Finest,
            index => RenderPhase::Refining(index),
        }
    }

    fn request_locked(&self, st: &mut RendererState, index: usize) {
        if st.may_cancel {
            if let Some(active) = &st.active {
                active.token.cancel();
            }
        }
        st.ladder.request(index);
        self.repaint.request_repaint();
    }

    /// Requests a new sequence from the starting screen scale
    ///
    /// Cancels a running refinement pass. The starting pass itself is never
    /// cancelled.
    pub fn request_repaint(&self) {
        let mut st = self.state.lock();
        if st.killed {
            return;
        }
        st.new_frame_request = true;
        st.restart_request = true;
        st.external_request = true;
        let start = st.ladder.max_index();
        self.request_locked(&mut st, start);
        st.phase = RenderPhase::Coarsest;
    }

    /// Requests a render at screen scale `index` (clamped to the ladder)
    ///
    /// A pending request for a coarser scale wins.
    pub fn request_repaint_level(&self, index: usize) {
        let mut st = self.state.lock();
        if st.killed {
            return;
        }
        st.external_request = true;
        self.request_locked(&mut st, index);
        st.phase = Self::pending_phase(&st);
    }

    /// Releases every buffer and the current projector; later paints do nothing
    pub fn kill(&self) {
        let mut st = self.state.lock();
        if let Some(active) = st.active.take() {
            active.token.cancel();
        }
        st.killed = true;
        st.scales.release();
        st.pool.reset();
        st.phase = RenderPhase::Idle;
        self.display.kill();
        info!("🛑 Renderer killed, buffers released");
    }

    /// Current phase of the refinement sequence
    pub fn phase(&self) -> RenderPhase {
        self.state.lock().phase
    }

    /// Render timing statistics
    pub fn render_stats(&self) -> RenderStats {
        self.state.lock().timer.stats().clone()
    }

    /// Buffer rotation statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.state.lock().pool.stats().clone()
    }

    /// Number of screen scales
    pub fn num_screen_scales(&self) -> usize {
        self.state.lock().scales.len()
    }

    /// Image size of screen scale `index` for the current canvas
    pub fn screen_scale_size(&self, index: usize) -> Option<(u32, u32)> {
        let st = self.state.lock();
        st.scales.canvas()?;
        st.scales.level(index).map(|s| (s.width(), s.height()))
    }

    /// Coarsest screen scale a sequence currently starts from
    pub fn max_screen_scale_index(&self) -> usize {
        self.state.lock().ladder.max_index()
    }

    /// Screen scale of the next render
    pub fn requested_screen_scale_index(&self) -> usize {
        self.state.lock().ladder.requested_index()
    }

    /// Screen scale of the most recent render
    pub fn current_screen_scale_index(&self) -> Option<usize> {
        self.state.lock().ladder.current_index()
    }

    /// Whether the running (or last started) pass may be cancelled
    pub fn rendering_may_be_cancelled(&self) -> bool {
        self.state.lock().may_cancel
    }

    /// Kind of the current projector
    pub fn projector_kind(&self) -> Option<ProjectorKind> {
        let projector = {
            let st = self.state.lock();
            Arc::clone(&st.active.as_ref()?.projector)
        };
        let kind = projector.lock().kind();
        Some(kind)
    }

    /// Whether the renderer was killed
    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }
}
