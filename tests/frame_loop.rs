//! Frame loop integration tests.
//!
//! These run the full frame pipeline controller against the null backend,
//! which models the fence counter, the back-buffer ring and the resize
//! ordering rules deterministically. Everything here holds identically for
//! the Vulkan backend; only the ordering checks become driver behavior.
//!
//! ```bash
//! cargo test --test frame_loop
//! ```

use rstest::rstest;

use ember_graphics::{
    ContextConfig, GpuBackend, GraphicsContext, NoOverlay, NullBackend, RenderSurface,
    BACK_BUFFER_COUNT,
};

/// Window stand-in that reports resizes the way a real message pump does:
/// a pending size is latched and only picked up by `refresh_extent`.
struct TestSurface {
    size: (u32, u32),
    pending: Option<(u32, u32)>,
    resize_acks: usize,
}

impl TestSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            pending: None,
            resize_acks: 0,
        }
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.pending = Some((width, height));
    }
}

impl RenderSurface for TestSurface {
    fn extent(&self) -> (u32, u32) {
        self.size
    }

    fn needs_resize(&self) -> bool {
        self.pending.is_some()
    }

    fn refresh_extent(&mut self) -> bool {
        match self.pending.take() {
            Some(next) if next != self.size => {
                self.size = next;
                true
            }
            _ => false,
        }
    }

    fn resize_finished(&mut self) {
        self.resize_acks += 1;
    }
}

fn context(width: u32, height: u32) -> GraphicsContext<NullBackend> {
    let backend = NullBackend::new(width, height).unwrap();
    GraphicsContext::new(backend, ContextConfig::default())
}

fn render_frame(ctx: &mut GraphicsContext<NullBackend>) {
    ctx.begin_frame().unwrap();
    ctx.end_frame(&mut NoOverlay).unwrap();
}

#[test]
fn test_create_then_shutdown_releases_all_handles() {
    let mut ctx = context(800, 600);
    assert!(ctx.backend().outstanding_handles() > 0);
    ctx.shutdown().unwrap();
    assert_eq!(ctx.backend().outstanding_handles(), 0);
}

#[test]
fn test_signal_and_wait_advances_fence_by_one_per_call() {
    let mut ctx = context(800, 600);
    let before = ctx.backend().signaled_fence_value();

    const CALLS: u64 = 7;
    for _ in 0..CALLS {
        ctx.backend_mut().signal_and_wait().unwrap();
    }

    assert_eq!(ctx.backend().signaled_fence_value(), before + CALLS);
    assert_eq!(
        ctx.backend().completed_fence_value(),
        ctx.backend().signaled_fence_value()
    );
}

#[test]
fn test_back_buffer_index_stays_in_range() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);

    for frame in 0..10 {
        if frame == 4 {
            surface.set_size(1024, 768);
            assert!(ctx.resize(&mut surface).unwrap());
        }
        render_frame(&mut ctx);
        assert!(ctx.backend().back_buffer_index() < BACK_BUFFER_COUNT);
    }
}

#[rstest]
#[case::same_size(800, 600, false)]
#[case::grown(1024, 768, true)]
#[case::shrunk(640, 480, true)]
fn test_resize_only_acts_on_size_change(
    #[case] width: u32,
    #[case] height: u32,
    #[case] expect_resize: bool,
) {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);
    surface.set_size(width, height);

    let resizes_before = ctx.backend().resize_count();
    assert_eq!(ctx.resize(&mut surface).unwrap(), expect_resize);
    assert_eq!(
        ctx.backend().resize_count(),
        resizes_before + u64::from(expect_resize)
    );
    assert_eq!(surface.resize_acks, usize::from(expect_resize));

    // The pending flag is cleared either way, so a second call is a no-op.
    assert!(!ctx.resize(&mut surface).unwrap());
}

#[test]
fn test_resize_notifies_surface_after_chain_resize() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);
    surface.set_size(1920, 1080);

    ctx.resize(&mut surface).unwrap();

    assert_eq!(surface.resize_acks, 1);
    assert!(!surface.needs_resize());
    assert_eq!(ctx.backend().extent(), (1920, 1080));
    // Fresh views were re-acquired for every slot.
    for index in 0..BACK_BUFFER_COUNT {
        assert!(ctx.backend().back_buffer_view(index).is_some());
    }
}

#[test]
fn test_vsync_toggle_changes_interval_without_reallocation() {
    let mut ctx = context(800, 600);
    assert!(ctx.vsync());

    render_frame(&mut ctx);
    ctx.toggle_vsync();
    render_frame(&mut ctx);
    ctx.toggle_vsync();
    render_frame(&mut ctx);

    let presents = ctx.backend().presents();
    let intervals: Vec<u32> = presents.iter().map(|p| p.sync_interval).collect();
    assert_eq!(intervals, vec![1, 0, 1]);
    // Flipping the flag never touched the chain.
    assert_eq!(ctx.backend().resize_count(), 0);
}

/// Steady-state scenario: 100 frames advance the fence by exactly one per
/// frame and cycle the back-buffer index 0, 1, 0, 1, ...
#[test]
fn test_hundred_frame_steady_state() {
    let mut ctx = context(1280, 720);
    let fence_before = ctx.backend().signaled_fence_value();

    for frame in 0..100usize {
        assert_eq!(ctx.backend().back_buffer_index(), frame % BACK_BUFFER_COUNT);
        render_frame(&mut ctx);
    }

    assert_eq!(ctx.frames_presented(), 100);
    assert_eq!(ctx.backend().signaled_fence_value(), fence_before + 100);

    let presents = ctx.backend().presents();
    assert_eq!(presents.len(), 100);
    for (frame, present) in presents.iter().enumerate() {
        assert_eq!(present.buffer_index, frame % BACK_BUFFER_COUNT);
    }
}

/// Resize round trip: grow to 1920x1080, render, shrink back to 800x600.
/// Every resize hands out fresh view handles, never recycled ones.
#[test]
fn test_resize_round_trip_yields_fresh_views() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);

    let collect_views = |ctx: &GraphicsContext<NullBackend>| -> Vec<_> {
        (0..BACK_BUFFER_COUNT)
            .map(|i| ctx.backend().back_buffer_view(i).unwrap())
            .collect()
    };

    let initial_views = collect_views(&ctx);
    render_frame(&mut ctx);

    surface.set_size(1920, 1080);
    assert!(ctx.resize(&mut surface).unwrap());
    let grown_views = collect_views(&ctx);
    render_frame(&mut ctx);

    surface.set_size(800, 600);
    assert!(ctx.resize(&mut surface).unwrap());
    let final_views = collect_views(&ctx);
    render_frame(&mut ctx);

    for view in &grown_views {
        assert!(!initial_views.contains(view));
    }
    for view in &final_views {
        assert!(!initial_views.contains(view));
        assert!(!grown_views.contains(view));
    }
    assert_eq!(ctx.backend().extent(), (800, 600));
    assert_eq!(surface.resize_acks, 2);
}

#[test]
fn test_resize_resets_buffer_index() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);

    // Odd number of frames leaves the index at 1.
    render_frame(&mut ctx);
    assert_eq!(ctx.backend().back_buffer_index(), 1);

    surface.set_size(1024, 768);
    ctx.resize(&mut surface).unwrap();
    assert_eq!(ctx.backend().back_buffer_index(), 0);
}

#[test]
fn test_resize_during_open_frame_is_rejected() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);
    surface.set_size(1024, 768);

    ctx.begin_frame().unwrap();
    assert!(ctx.resize(&mut surface).is_err());

    // The frame can still be finished and the resize retried.
    ctx.end_frame(&mut NoOverlay).unwrap();
    assert!(ctx.resize(&mut surface).unwrap());
}

#[test]
fn test_zero_size_is_clamped_to_minimum() {
    let mut ctx = context(800, 600);
    let mut surface = TestSurface::new(800, 600);
    surface.set_size(0, 0);

    // Minimized window reports 0x0; the chain is clamped to 1x1.
    assert!(ctx.resize(&mut surface).unwrap());
    assert_eq!(ctx.backend().extent(), (1, 1));
    render_frame(&mut ctx);
}

#[test]
fn test_upload_then_shutdown_frees_vertex_buffers() {
    let mut ctx = context(800, 600);
    let fence_before = ctx.backend().signaled_fence_value();

    let first = ctx.upload_vertices(&[1u8; 96]).unwrap();
    let second = ctx.upload_vertices(&[2u8; 48]).unwrap();
    assert_ne!(first, second);

    // Each upload is its own synchronous submission.
    assert_eq!(ctx.backend().signaled_fence_value(), fence_before + 2);

    ctx.shutdown().unwrap();
    assert_eq!(ctx.backend().outstanding_handles(), 0);
}

#[test]
fn test_shutdown_is_idempotent() {
    let mut ctx = context(800, 600);
    ctx.shutdown().unwrap();
    ctx.shutdown().unwrap();
    assert_eq!(ctx.backend().outstanding_handles(), 0);
}
