//! Integration tests for progressive rendering
//!
//! These tests drive `MultiResolutionRenderer::paint` by hand and check the
//! coarse-to-fine sequence, buffer rotation, resizing, cancellation and
//! multi-source compositing against a `BufferedTarget`.

use mipview::cache::CacheControl;
use mipview::display::BufferedTarget;
use mipview::image::argb;
use mipview::painter::{RepaintSignal, RepaintTrigger};
use mipview::projector::ProjectorKind;
use mipview::source::{Interpolation, LinearRangeConverter, Source, SourceState};
use mipview::{Affine3, MultiResolutionRenderer, RenderPhase, RendererConfig, ViewerState};
use mockall::mock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    Trigger {}
    impl RepaintTrigger for Trigger {
        fn request_repaint(&self);
    }
}

mock! {
    Cache {}
    impl CacheControl for Cache {
        fn prepare_next_frame(&self);
        fn reset_io_budget(&self, budget: &[Duration]);
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Single-level source with the same value everywhere
struct Constant {
    value: f32,
    delay: Duration,
    hook: Mutex<Option<Hook>>,
}

impl Constant {
    fn new(value: f32) -> Self {
        Self {
            value,
            delay: Duration::ZERO,
            hook: Mutex::new(None),
        }
    }

    fn slow(value: f32, delay: Duration) -> Self {
        Self { delay, ..Self::new(value) }
    }

    /// Runs `hook` on the next sample
    fn on_next_sample(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }
}

impl Source for Constant {
    fn name(&self) -> &str {
        "constant"
    }

    fn num_mipmap_levels(&self) -> usize {
        1
    }

    fn source_transform(&self, _timepoint: u32, _level: usize) -> Affine3 {
        Affine3::identity()
    }

    fn dimensions(&self, _timepoint: u32, _level: usize) -> [u64; 3] {
        [100_000, 100_000, 1]
    }

    fn sample(&self, _: u32, _: usize, _: [f64; 3], _: Interpolation) -> Option<f32> {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Some(self.value)
    }
}

fn config(scales: &[f64]) -> RendererConfig {
    let mut config = RendererConfig::default();
    config.scales.screen_scales = scales.to_vec();
    config.threads.num_rendering_threads = 2;
    config
}

fn viewer_of(sources: Vec<(Arc<Constant>, u32)>) -> ViewerState {
    ViewerState::new(
        sources
            .into_iter()
            .map(|(source, color)| SourceState::new(source, Arc::new(LinearRangeConverter::new(0.0, 1.0, color))))
            .collect(),
    )
}

fn gray_viewer() -> ViewerState {
    viewer_of(vec![(Arc::new(Constant::new(1.0)), 0x00ff_ffff)])
}

fn paint_until_idle(renderer: &MultiResolutionRenderer, viewer: &ViewerState) -> usize {
    let mut paints = 0;
    while renderer.phase() != RenderPhase::Idle {
        renderer.paint(viewer);
        paints += 1;
        assert!(paints < 50, "render sequence did not finish");
    }
    paints
}

fn frame_width(target: &BufferedTarget) -> u32 {
    target.frame().map(|f| f.image.width()).unwrap_or(0)
}

/// Test the coarse-to-fine ladder of one sequence
#[test]
fn test_sequence_walks_ladder_coarse_to_fine() {
    let target = Arc::new(BufferedTarget::new(40, 20));
    let mut trigger = MockTrigger::new();
    // one explicit request plus two refinement requests
    trigger.expect_request_repaint().times(3).return_const(());
    let mut cache = MockCache::new();
    cache.expect_prepare_next_frame().times(1).return_const(());
    cache.expect_reset_io_budget().times(3).return_const(());

    let renderer = MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target.clone(), Arc::new(trigger))
        .unwrap()
        .with_cache_control(Arc::new(cache));
    let viewer = gray_viewer();

    assert_eq!(renderer.max_screen_scale_index(), 2);
    renderer.request_repaint();
    assert_eq!(renderer.phase(), RenderPhase::Coarsest);
    assert_eq!(renderer.requested_screen_scale_index(), 2);

    assert!(renderer.paint(&viewer));
    assert_eq!(frame_width(&target), 10);
    assert_eq!(renderer.phase(), RenderPhase::Refining(1));

    assert!(renderer.paint(&viewer));
    assert_eq!(frame_width(&target), 20);
    assert_eq!(renderer.phase(), RenderPhase::Finest);

    assert!(renderer.paint(&viewer));
    assert_eq!(frame_width(&target), 40);
    assert_eq!(renderer.phase(), RenderPhase::Idle);
    assert_eq!(renderer.current_screen_scale_index(), Some(0));

    let frame = target.frame().unwrap();
    assert!(frame.image.to_vec().iter().all(|&p| p == 0xffff_ffff));
    assert_eq!(target.frames_received(), 3);
    assert_eq!(renderer.render_stats().total_renders, 3);
    assert_eq!(renderer.projector_kind(), Some(ProjectorKind::Simple));
}

/// Test screen scale sizes are floored from the canvas size
#[test]
fn test_screen_scale_sizes() {
    let target = Arc::new(BufferedTarget::new(101, 51));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target, Arc::new(RepaintSignal::new())).unwrap();
    assert_eq!(renderer.num_screen_scales(), 3);
    assert_eq!(renderer.screen_scale_size(0), None);

    renderer.request_repaint();
    renderer.paint(&gray_viewer());
    assert_eq!(renderer.screen_scale_size(0), Some((101, 51)));
    assert_eq!(renderer.screen_scale_size(1), Some((50, 25)));
    assert_eq!(renderer.screen_scale_size(2), Some((25, 12)));
}

/// Test successive frames never reuse the slot on display
#[test]
fn test_frames_rotate_slots() {
    let target = Arc::new(BufferedTarget::new(32, 32));
    let renderer = MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target.clone(), Arc::new(RepaintSignal::new()))
        .unwrap();
    let viewer = gray_viewer();

    let mut slots = Vec::new();
    for _ in 0..3 {
        renderer.request_repaint();
        while renderer.phase() != RenderPhase::Idle {
            if renderer.paint(&viewer) {
                slots.push(target.frame().unwrap().slot);
            }
        }
    }

    assert!(slots.len() >= 3);
    assert!(slots.windows(2).all(|w| w[0] != w[1]), "slots: {:?}", slots);
    let stats = renderer.pool_stats();
    assert_eq!(stats.starvations, 0);
    assert_eq!(stats.unknown_releases, 0);
}

/// Test single buffering always renders into slot 0
#[test]
fn test_single_buffer_mode() {
    let target = Arc::new(BufferedTarget::new(16, 16));
    let mut config = config(&[1.0, 0.5]);
    config.scales.buffer_count = 1;
    let renderer = MultiResolutionRenderer::new(&config, target.clone(), Arc::new(RepaintSignal::new())).unwrap();
    let viewer = gray_viewer();

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);
    assert_eq!(target.frame().unwrap().slot, 0);
    assert_eq!(target.frames_received(), 2);
}

/// Test an empty canvas renders nothing
#[test]
fn test_empty_canvas_paints_nothing() {
    let target = Arc::new(BufferedTarget::new(0, 0));
    let mut trigger = MockTrigger::new();
    trigger.expect_request_repaint().times(1).return_const(());
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5]), target.clone(), Arc::new(trigger)).unwrap();

    renderer.request_repaint();
    assert!(!renderer.paint(&gray_viewer()));
    assert!(target.frame().is_none());
    assert_eq!(renderer.phase(), RenderPhase::Coarsest);
}

/// Test zero visible sources produce blank frames through the whole ladder
#[test]
fn test_no_sources_renders_blank() {
    let target = Arc::new(BufferedTarget::new(24, 24));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target.clone(), Arc::new(RepaintSignal::new()))
            .unwrap();
    let viewer = ViewerState::new(Vec::new());

    renderer.request_repaint();
    assert_eq!(paint_until_idle(&renderer, &viewer), 3);
    assert_eq!(renderer.projector_kind(), Some(ProjectorKind::Empty));
    let frame = target.frame().unwrap();
    assert_eq!(frame.image.width(), 24);
    assert!(frame.image.to_vec().iter().all(|&p| p == 0));
}

/// Test several sources are composited with the accumulation policy
#[test]
fn test_two_sources_are_accumulated() {
    let target = Arc::new(BufferedTarget::new(20, 10));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5]), target.clone(), Arc::new(RepaintSignal::new())).unwrap();
    let viewer = viewer_of(vec![
        (Arc::new(Constant::new(1.0)), 0x00ff_0000),
        (Arc::new(Constant::new(1.0)), 0x0000_00ff),
    ]);

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);
    assert_eq!(renderer.projector_kind(), Some(ProjectorKind::Accumulate));

    let expected = argb::pack(255, 255, 0, 255);
    let pixels = target.frame().unwrap().image.to_vec();
    assert_eq!(pixels.len(), 200);
    assert!(pixels.iter().all(|&p| p == expected));
}

/// Test inactive sources are left out of fused rendering
#[test]
fn test_inactive_source_is_skipped() {
    let target = Arc::new(BufferedTarget::new(8, 8));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0]), target.clone(), Arc::new(RepaintSignal::new())).unwrap();
    let mut viewer = viewer_of(vec![
        (Arc::new(Constant::new(1.0)), 0x00ff_0000),
        (Arc::new(Constant::new(1.0)), 0x0000_00ff),
    ]);
    viewer.sources_mut()[1].set_active(false);

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);
    assert_eq!(renderer.projector_kind(), Some(ProjectorKind::Simple));
    assert_eq!(target.frame().unwrap().image.get(3, 3), Some(argb::pack(255, 255, 0, 0)));
}

/// Test a canvas resize reallocates every screen scale
#[test]
fn test_resize_reallocates_scales() {
    let target = Arc::new(BufferedTarget::new(40, 20));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target.clone(), Arc::new(RepaintSignal::new()))
            .unwrap();
    let viewer = gray_viewer();

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);
    assert_eq!(renderer.screen_scale_size(0), Some((40, 20)));

    target.set_canvas_size(80, 40);
    renderer.request_repaint();
    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.screen_scale_size(0), Some((80, 40)));
    assert_eq!(renderer.screen_scale_size(2), Some((20, 10)));

    let level = renderer.current_screen_scale_index().unwrap();
    let (width, height) = renderer.screen_scale_size(level).unwrap();
    let frame = target.frame().unwrap();
    assert_eq!((frame.image.width(), frame.image.height()), (width, height));

    paint_until_idle(&renderer, &viewer);
    assert_eq!(frame_width(&target), 80);
}

/// Test the starting pass cannot be cancelled but refinement passes can
#[test]
fn test_refinement_is_cancelled_by_new_request() {
    let target = Arc::new(BufferedTarget::new(40, 20));
    let mut config = config(&[1.0, 0.5, 0.25]);
    // every render is over budget, so the ladder stays at its coarsest start
    config.adaptation.target_render_ms = 1;
    config.adaptation.fast_render_divisor = 1.0;
    config.threads.num_rendering_threads = 1;
    let renderer =
        Arc::new(MultiResolutionRenderer::new(&config, target.clone(), Arc::new(RepaintSignal::new())).unwrap());
    let source = Arc::new(Constant::slow(1.0, Duration::from_micros(50)));
    let viewer = viewer_of(vec![(source.clone(), 0x00ff_ffff)]);

    let fired = Arc::new(AtomicBool::new(false));
    let interrupt = |renderer: &Arc<MultiResolutionRenderer>, fired: &Arc<AtomicBool>| {
        let renderer = renderer.clone();
        let fired = fired.clone();
        move || {
            renderer.request_repaint();
            fired.store(true, Ordering::SeqCst);
        }
    };

    // a request arriving during the starting pass does not cancel it
    renderer.request_repaint();
    source.on_next_sample(interrupt(&renderer, &fired));
    assert!(renderer.paint(&viewer));
    assert!(fired.swap(false, Ordering::SeqCst));
    assert!(!renderer.rendering_may_be_cancelled());
    assert_eq!(renderer.max_screen_scale_index(), 2);
    assert_eq!(renderer.phase(), RenderPhase::Coarsest);
    assert_eq!(renderer.requested_screen_scale_index(), 2);

    // the pending request restarts at the coarsest scale
    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.current_screen_scale_index(), Some(2));
    assert_eq!(renderer.phase(), RenderPhase::Refining(1));

    // a request arriving during refinement cancels it
    source.on_next_sample(interrupt(&renderer, &fired));
    assert!(!renderer.paint(&viewer));
    assert!(fired.load(Ordering::SeqCst));
    assert!(renderer.rendering_may_be_cancelled());
    assert_eq!(renderer.render_stats().cancelled_renders, 1);
    assert_eq!(renderer.phase(), RenderPhase::Coarsest);
    assert_eq!(target.frames_received(), 2);

    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.current_screen_scale_index(), Some(2));
    assert_eq!(target.frames_received(), 3);
}

/// Test an explicit level request renders that level next
#[test]
fn test_request_repaint_level() {
    let target = Arc::new(BufferedTarget::new(40, 40));
    let renderer =
        MultiResolutionRenderer::new(&config(&[1.0, 0.5, 0.25]), target.clone(), Arc::new(RepaintSignal::new()))
            .unwrap();
    let viewer = gray_viewer();

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);

    renderer.request_repaint_level(1);
    assert_eq!(renderer.requested_screen_scale_index(), 1);
    assert_eq!(renderer.phase(), RenderPhase::Refining(1));
    assert!(renderer.paint(&viewer));
    assert_eq!(frame_width(&target), 20);
    assert_eq!(renderer.phase(), RenderPhase::Finest);
    assert!(renderer.paint(&viewer));
    assert_eq!(frame_width(&target), 40);
    assert_eq!(renderer.phase(), RenderPhase::Idle);

    renderer.request_repaint_level(0);
    assert_eq!(renderer.phase(), RenderPhase::Finest);
    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.phase(), RenderPhase::Idle);

    // out of range requests are clamped to the coarsest scale
    renderer.request_repaint_level(10);
    assert_eq!(renderer.requested_screen_scale_index(), 2);
}

/// Test a request during a finest-only pass is not reported as idle
#[test]
fn test_request_during_finest_pass_restarts_sequence() {
    let target = Arc::new(BufferedTarget::new(16, 16));
    let renderer =
        Arc::new(MultiResolutionRenderer::new(&config(&[1.0]), target.clone(), Arc::new(RepaintSignal::new())).unwrap());
    let source = Arc::new(Constant::new(1.0));
    let viewer = viewer_of(vec![(source.clone(), 0x00ff_ffff)]);

    renderer.request_repaint();
    {
        let renderer = renderer.clone();
        source.on_next_sample(move || renderer.request_repaint());
    }
    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.phase(), RenderPhase::Coarsest);
    assert_eq!(renderer.requested_screen_scale_index(), 0);
    assert_eq!(target.frames_received(), 1);

    assert!(renderer.paint(&viewer));
    assert_eq!(renderer.phase(), RenderPhase::Idle);
    assert_eq!(target.frames_received(), 2);
}

/// Test a level request during a refinement pass is kept in the phase
#[test]
fn test_level_request_during_pass_sets_phase() {
    let target = Arc::new(BufferedTarget::new(16, 16));
    let renderer =
        Arc::new(MultiResolutionRenderer::new(&config(&[1.0, 0.5]), target.clone(), Arc::new(RepaintSignal::new())).unwrap());
    let source = Arc::new(Constant::new(1.0));
    let viewer = viewer_of(vec![(source.clone(), 0x00ff_ffff)]);

    renderer.request_repaint();
    paint_until_idle(&renderer, &viewer);
    assert_eq!(renderer.current_screen_scale_index(), Some(0));

    // asked for level 1 again while level 0 renders
    renderer.request_repaint_level(0);
    {
        let renderer = renderer.clone();
        source.on_next_sample(move || renderer.request_repaint_level(1));
    }
    renderer.paint(&viewer);
    assert_eq!(renderer.phase(), RenderPhase::Refining(1));
    assert_eq!(renderer.requested_screen_scale_index(), 1);

    paint_until_idle(&renderer, &viewer);
    assert_eq!(frame_width(&target), 16);
}

/// Test a renderer cannot be built from an unordered scale ladder
#[test]
fn test_unordered_scales_are_rejected() {
    let target = Arc::new(BufferedTarget::new(16, 16));
    let result = MultiResolutionRenderer::new(&config(&[0.5, 1.0]), target, Arc::new(RepaintSignal::new()));
    assert!(result.is_err());
}

/// Test kill releases everything and disables painting
#[test]
fn test_kill_releases_buffers() {
    let target = Arc::new(BufferedTarget::new(16, 16));
    let mut trigger = MockTrigger::new();
    trigger.expect_request_repaint().times(2).return_const(());
    let renderer = MultiResolutionRenderer::new(&config(&[1.0, 0.5]), target.clone(), Arc::new(trigger)).unwrap();
    let viewer = gray_viewer();

    renderer.request_repaint();
    assert!(renderer.paint(&viewer));
    assert!(target.frame().is_some());

    renderer.kill();
    assert!(renderer.is_killed());
    assert!(target.frame().is_none());
    assert_eq!(renderer.screen_scale_size(0), None);
    assert_eq!(renderer.projector_kind(), None);

    // later requests are ignored
    renderer.request_repaint();
    assert!(!renderer.paint(&viewer));
    assert_eq!(renderer.phase(), RenderPhase::Idle);
}
