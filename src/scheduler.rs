//! Per-frame orchestration of frame interpolation.

use crate::{
    ContextCache, FeatureSupport, FrameContextDescriptor, FrameGenerationFlags, FrameGenerationSdk,
    FrameInterpolationError, FrameInterpolationSettings, PresentStateMachine, QueuedFrame,
    RenderDevice, ResourceRing, TextureDescriptor, ViewportId,
    motion_vectors::{CameraParameters, MOTION_VECTOR_FORMAT, MotionVectorInputs},
    render_parameters::{GenerateParameters, PrepareParameters, Rect},
    ring::{DEFAULT_RING_DEPTH, MIN_RING_DEPTH},
    settings::{DispatchFlags, QualityMode},
};
use glam::UVec2;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, trace, warn};
use wgpu::{TextureFormat, TextureUsages};

/// Per-frame inputs for one platform viewport.
pub struct ViewportFrame<'a, T> {
    pub id: ViewportId,
    /// Monotonic frame counter of the host.
    pub frame_index: u64,
    pub size: UVec2,
    /// The just-rendered backbuffer. `None` when the viewport has nothing to
    /// present this frame.
    pub back_buffer: Option<&'a T>,
    pub back_buffer_format: TextureFormat,
    /// Scene color without UI, used when [`FrameInterpolationSettings::capture_debug_ui`] is set.
    pub hud: Option<&'a T>,
    /// Frame time in milliseconds.
    pub frame_time_delta: f32,
}

/// Per-frame inputs for one view (camera) inside a viewport.
pub struct ViewFrame<'a, T> {
    /// Stable identity of the view across frames.
    pub view_id: u32,
    /// Name of the upscaler that rendered this view.
    pub upscaler: &'a str,
    /// Region of the viewport the view covers.
    pub rect: Rect,
    pub render_size: UVec2,
    /// Upper bound for dynamic resolution. Derived from the quality mode when `None`.
    pub max_render_size: Option<UVec2>,
    pub depth: Option<&'a T>,
    /// Engine velocity buffer; only moving objects write to it.
    pub velocity: Option<&'a T>,
    pub camera: CameraParameters,
    pub flags: FrameGenerationFlags,
    /// Camera cut; interpolation history is discarded.
    pub reset: bool,
}

struct ViewportState<D: RenderDevice> {
    presenter: Arc<PresentStateMachine<D>>,
    ring: ResourceRing<D::Texture>,
    motion_vectors: HashMap<u32, (UVec2, D::Texture)>,
    size: Option<UVec2>,
    was_enabled: bool,
    last_interpolated: bool,
    reclaimed_presents: u64,
}

impl<D: RenderDevice> ViewportState<D> {
    fn new(device: &Arc<D>) -> Self {
        Self {
            presenter: Arc::new(PresentStateMachine::new(Arc::clone(device))),
            ring: ResourceRing::new(DEFAULT_RING_DEPTH),
            motion_vectors: HashMap::new(),
            size: None,
            was_enabled: true,
            last_interpolated: false,
            reclaimed_presents: 0,
        }
    }

    fn passthrough(&mut self) -> bool {
        self.last_interpolated = false;
        self.presenter.begin_passthrough();
        false
    }
}

/// Shared inputs of every view dispatch in one frame.
struct FrameTargets<'a, T> {
    color: &'a T,
    hud: Option<&'a T>,
    output: &'a T,
    display_size: UVec2,
    format: TextureFormat,
    frame_index: u64,
    frame_time_delta: f32,
    reset: bool,
    quality_mode: QualityMode,
    context_flags: FrameGenerationFlags,
    dispatch_flags: DispatchFlags,
}

/// Schedules frame interpolation for every registered viewport.
///
/// Create one per device and SDK. The scheduler owns the interpolation
/// contexts and the per-viewport resource rings; the [`PresentStateMachine`]
/// of each viewport is shared with the platform swapchain.
pub struct FrameScheduler<D: RenderDevice, S: FrameGenerationSdk<D>> {
    device: Arc<D>,
    sdk: S,
    support: FeatureSupport,
    contexts: ContextCache<S::Context>,
    viewports: HashMap<ViewportId, ViewportState<D>>,
    frame_count: u64,
}

impl<D: RenderDevice, S: FrameGenerationSdk<D>> FrameScheduler<D, S> {
    pub fn new(device: Arc<D>, sdk: S) -> Self {
        let support = FeatureSupport::probe(&sdk, &*device);
        info!(
            sdk = sdk.name(),
            supported = support.frame_generation_supported,
            "frame scheduler created"
        );
        Self {
            device,
            sdk,
            support,
            contexts: ContextCache::new(),
            viewports: HashMap::new(),
            frame_count: 0,
        }
    }

    pub fn support(&self) -> FeatureSupport {
        self.support
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn sdk(&self) -> &S {
        &self.sdk
    }

    /// Number of [`Self::run_frame`] calls so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Bundles held by the viewport's resource ring.
    pub fn live_bundles(&self, viewport: ViewportId) -> Option<usize> {
        self.viewports.get(&viewport).map(|state| state.ring.live_bundles())
    }

    /// Start tracking `viewport` and return the present object the platform
    /// swapchain should call into. Registering twice returns the same object.
    pub fn register_viewport(&mut self, viewport: ViewportId) -> Arc<PresentStateMachine<D>> {
        let device = &self.device;
        let state = self.viewports.entry(viewport).or_insert_with(|| {
            debug!(%viewport, "registered viewport");
            ViewportState::new(device)
        });
        Arc::clone(&state.presenter)
    }

    /// Stop tracking `viewport`, dropping its queued frame and resources.
    pub fn unregister_viewport(&mut self, viewport: ViewportId) -> bool {
        match self.viewports.remove(&viewport) {
            Some(mut state) => {
                state.presenter.discard_pending();
                state.ring.invalidate();
                debug!(%viewport, "unregistered viewport");
                true
            }
            None => false,
        }
    }

    pub fn presenter(
        &self,
        viewport: ViewportId,
    ) -> Result<Arc<PresentStateMachine<D>>, FrameInterpolationError> {
        self.viewports
            .get(&viewport)
            .map(|state| Arc::clone(&state.presenter))
            .ok_or(FrameInterpolationError::UnknownViewport(viewport))
    }

    /// Record this frame's interpolation work for `viewport` into `encoder`.
    ///
    /// Returns whether any view was interpolated. Every failure degrades to a
    /// passthrough frame; nothing here returns an error.
    pub fn run_frame(
        &mut self,
        encoder: &mut D::Encoder,
        settings: &FrameInterpolationSettings,
        viewport: &ViewportFrame<'_, D::Texture>,
        views: &[ViewFrame<'_, D::Texture>],
    ) -> bool {
        self.frame_count += 1;
        let Self {
            device,
            sdk,
            support,
            contexts,
            viewports,
            ..
        } = self;
        let device: &D = device;

        let Some(state) = viewports.get_mut(&viewport.id) else {
            warn!(viewport = %viewport.id, "frame for unregistered viewport");
            return false;
        };

        let completed = state.presenter.completed_presents();
        if completed != state.reclaimed_presents {
            state.reclaimed_presents = completed;
            state.ring.reclaim();
        }
        contexts.trim::<D, S>(sdk, viewport.frame_index);
        let ring_depth = settings.ring_depth.max(MIN_RING_DEPTH);
        if state.ring.depth() != ring_depth {
            state.ring.set_depth(ring_depth);
            // One bundle always stays free for the frame being recorded.
            state.presenter.set_max_in_flight(ring_depth - 1);
        }

        if !settings.enabled || !support.frame_generation_supported {
            if state.was_enabled {
                info!(viewport = %viewport.id, "frame interpolation disabled");
                state.presenter.arm_reset(state.last_interpolated);
                state.was_enabled = false;
            }
            return state.passthrough();
        }
        if !state.was_enabled {
            info!(viewport = %viewport.id, "frame interpolation re-enabled");
            state.presenter.rearm();
            state.was_enabled = true;
        }

        if !state.presenter.generation_enabled() {
            return state.passthrough();
        }
        if state.presenter.is_queue_full() {
            trace!(viewport = %viewport.id, "present queue is full, skipping interpolation");
            state.last_interpolated = false;
            return false;
        }
        let Some(back_buffer) = viewport.back_buffer else {
            return state.passthrough();
        };

        let resized = state.presenter.take_resized();
        let size_changed = state.size.is_some_and(|size| size != viewport.size);
        if resized || size_changed {
            info!(
                viewport = %viewport.id,
                size = ?viewport.size,
                "viewport resized, resetting frame interpolation"
            );
            device.flush();
            state.ring.invalidate();
            state.motion_vectors.clear();
            state.last_interpolated = false;
        }
        state.size = Some(viewport.size);

        let bundle = match state
            .ring
            .acquire(device, viewport.size, viewport.back_buffer_format)
        {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(viewport = %viewport.id, %err, "failed to acquire frame resources");
                return state.passthrough();
            }
        };
        let (Some(color), Some(output)) = (bundle.color(), bundle.interpolated()) else {
            warn!(viewport = %viewport.id, "frame bundle is missing textures");
            return state.passthrough();
        };

        device.copy_texture(encoder, back_buffer, color, viewport.size);
        let hud = match (settings.capture_debug_ui, viewport.hud, bundle.hud()) {
            (true, Some(source), Some(hud)) => {
                device.copy_texture(encoder, source, hud, viewport.size);
                Some(hud)
            }
            _ => None,
        };
        device.clear_texture(encoder, output);

        let targets = FrameTargets {
            color,
            hud,
            output,
            display_size: viewport.size,
            format: viewport.back_buffer_format,
            frame_index: viewport.frame_index,
            frame_time_delta: viewport.frame_time_delta,
            reset: !state.last_interpolated,
            quality_mode: settings.quality_mode,
            context_flags: settings.context_flags(),
            dispatch_flags: settings.dispatch_flags(),
        };

        let mut interpolated_rect: Option<Rect> = None;
        for view in views {
            if view.upscaler != sdk.name() {
                trace!(
                    view_id = view.view_id,
                    upscaler = view.upscaler,
                    "view not rendered by this upscaler"
                );
                continue;
            }
            if !view.rect.fits_within(viewport.size) {
                debug!(view_id = view.view_id, rect = ?view.rect, "view does not fit the viewport");
                continue;
            }

            match interpolate_view(
                device,
                sdk,
                contexts,
                &mut state.motion_vectors,
                encoder,
                &targets,
                view,
            ) {
                Ok(()) => {
                    interpolated_rect = Some(match interpolated_rect {
                        Some(rect) => rect.union(&view.rect),
                        None => view.rect,
                    });
                }
                Err(err) => {
                    warn!(view_id = view.view_id, %err, "skipping frame interpolation for view");
                }
            }
        }

        let Some(rect) = interpolated_rect else {
            return state.passthrough();
        };
        let queued = state.presenter.queue_frame(QueuedFrame {
            bundle,
            rect,
            force_vsync: settings.force_vsync_for_pacing,
            frame_index: viewport.frame_index,
        });
        state.ring.retire();
        if let Err(err) = queued {
            warn!(viewport = %viewport.id, %err, "cannot start interpolated present cycle");
            return state.passthrough();
        }
        state.last_interpolated = true;
        true
    }

    /// Called after the encoder passed to [`Self::run_frame`] was submitted.
    pub fn on_commands_submitted(
        &self,
        viewport: ViewportId,
    ) -> Result<(), FrameInterpolationError> {
        self.presenter(viewport)?.mark_submitted();
        Ok(())
    }

    /// Wait for the GPU and release every context and frame resource.
    pub fn shutdown(&mut self) {
        self.device.flush();
        for state in self.viewports.values_mut() {
            state.presenter.discard_pending();
            state.ring.invalidate();
            state.motion_vectors.clear();
        }
        self.viewports.clear();
        self.contexts.clear::<D, S>(&self.sdk);
        info!("frame scheduler shut down");
    }
}

impl<D: RenderDevice, S: FrameGenerationSdk<D>> Drop for FrameScheduler<D, S> {
    fn drop(&mut self) {
        self.contexts.clear::<D, S>(&self.sdk);
    }
}

fn interpolate_view<D: RenderDevice, S: FrameGenerationSdk<D>>(
    device: &D,
    sdk: &S,
    contexts: &mut ContextCache<S::Context>,
    motion_vectors: &mut HashMap<u32, (UVec2, D::Texture)>,
    encoder: &mut D::Encoder,
    targets: &FrameTargets<'_, D::Texture>,
    view: &ViewFrame<'_, D::Texture>,
) -> Result<(), FrameInterpolationError> {
    let depth = view.depth.ok_or(FrameInterpolationError::MissingTexture("depth"))?;
    let velocity = view
        .velocity
        .ok_or(FrameInterpolationError::MissingTexture("velocity"))?;

    let max_render_size = view
        .max_render_size
        .unwrap_or_else(|| targets.quality_mode.max_render_size(view.rect.size))
        .max(view.render_size);
    let descriptor = FrameContextDescriptor {
        display_size: targets.display_size,
        max_render_size,
        back_buffer_format: targets.format,
        flags: view.flags | targets.context_flags,
    };
    let context =
        contexts.get_or_create::<D, S>(sdk, descriptor, view.view_id, targets.frame_index)?;

    if motion_vectors
        .get(&view.view_id)
        .is_none_or(|(size, _)| *size != view.render_size)
    {
        let texture = device.create_texture(&TextureDescriptor {
            label: "frame_interpolation_motion_vectors",
            size: view.render_size,
            format: MOTION_VECTOR_FORMAT,
            usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
        })?;
        motion_vectors.insert(view.view_id, (view.render_size, texture));
    }
    let Some((_, dense_motion)) = motion_vectors.get(&view.view_id) else {
        return Err(FrameInterpolationError::MissingTexture("motion vectors"));
    };

    device.convert_motion_vectors(
        encoder,
        &MotionVectorInputs {
            depth,
            velocity,
            render_size: view.render_size,
            camera: &view.camera,
        },
        dense_motion,
    )?;

    let reset = targets.reset || view.reset;
    let prepare = PrepareParameters {
        frame_id: targets.frame_index,
        depth,
        motion_vectors: dense_motion,
        render_size: view.render_size,
        camera: &view.camera,
        frame_time_delta: targets.frame_time_delta,
        reset,
    };
    let generate = GenerateParameters {
        frame_id: targets.frame_index,
        present_color: targets.color,
        hud: targets.hud,
        output: targets.output,
        generation_rect: view.rect,
        flags: targets.dispatch_flags,
        frame_time_delta: targets.frame_time_delta,
        reset,
    };
    prepare.validate()?;
    generate.validate()?;

    sdk.dispatch_prepare(context.native_mut(), encoder, &prepare)?;
    sdk.dispatch_generate(context.native_mut(), encoder, &generate)?;
    trace!(
        view_id = view.view_id,
        context = context.id(),
        reset,
        "dispatched frame interpolation"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        PresentStatus,
        mock::{MockCommand, MockEncoder, MockFrameGenerationSdk, MockRenderDevice, MockTexture},
    };
    use std::{sync::mpsc, thread};

    const FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;
    const FULL_HD: UVec2 = UVec2::new(1920, 1080);
    const HD: UVec2 = UVec2::new(1280, 720);

    /// Host-owned textures for one viewport size.
    struct Scene {
        size: UVec2,
        back_buffer: MockTexture,
        swapchain: MockTexture,
        depth: MockTexture,
        velocity: MockTexture,
    }

    impl Scene {
        fn new(device: &MockRenderDevice, size: UVec2) -> Self {
            Self {
                size,
                back_buffer: device.host_texture("back_buffer", size, FORMAT),
                swapchain: device.host_texture("swapchain", size, FORMAT),
                depth: device.host_texture("depth", size, TextureFormat::Depth32Float),
                velocity: device.host_texture("velocity", size, TextureFormat::Rg16Float),
            }
        }

        fn view(&self, view_id: u32, rect: Rect) -> ViewFrame<'_, MockTexture> {
            ViewFrame {
                view_id,
                upscaler: MockFrameGenerationSdk::DEFAULT_NAME,
                rect,
                render_size: rect.size / 2,
                max_render_size: None,
                depth: Some(&self.depth),
                velocity: Some(&self.velocity),
                camera: CameraParameters::default(),
                flags: FrameGenerationFlags::DEPTH_INVERTED,
                reset: false,
            }
        }

        fn full_view(&self) -> Vec<ViewFrame<'_, MockTexture>> {
            vec![self.view(0, Rect::from_size(self.size))]
        }

        fn split_views(&self) -> Vec<ViewFrame<'_, MockTexture>> {
            let half = UVec2::new(self.size.x / 2, self.size.y);
            vec![
                self.view(1, Rect::new(UVec2::ZERO, half)),
                self.view(2, Rect::new(UVec2::new(half.x, 0), half)),
            ]
        }
    }

    struct Host {
        device: Arc<MockRenderDevice>,
        scheduler: FrameScheduler<MockRenderDevice, MockFrameGenerationSdk>,
        viewport: ViewportId,
        presenter: Arc<PresentStateMachine<MockRenderDevice>>,
        frame_index: u64,
    }

    struct FrameOutcome {
        interpolated: bool,
        encoder: MockEncoder,
        /// Return value of every `present` call of the frame.
        native: Vec<bool>,
    }

    impl Host {
        fn new() -> Self {
            Self::with_sdk(MockFrameGenerationSdk::new())
        }

        fn with_sdk(sdk: MockFrameGenerationSdk) -> Self {
            let device = Arc::new(MockRenderDevice::new());
            let mut scheduler = FrameScheduler::new(Arc::clone(&device), sdk);
            let viewport = ViewportId::new();
            let presenter = scheduler.register_viewport(viewport);
            Self {
                device,
                scheduler,
                viewport,
                presenter,
                frame_index: 0,
            }
        }

        fn scene(&self, size: UVec2) -> Scene {
            Scene::new(&self.device, size)
        }

        /// Run one frame through scheduling, submission and every present
        /// callback the platform makes for it.
        fn frame(
            &mut self,
            settings: &FrameInterpolationSettings,
            scene: &Scene,
            views: &[ViewFrame<'_, MockTexture>],
        ) -> FrameOutcome {
            let (interpolated, encoder) = self.schedule(settings, scene, views);
            let native = self.present(scene, interpolated);
            FrameOutcome {
                interpolated,
                encoder,
                native,
            }
        }

        /// Schedule one frame and submit its commands.
        fn schedule(
            &mut self,
            settings: &FrameInterpolationSettings,
            scene: &Scene,
            views: &[ViewFrame<'_, MockTexture>],
        ) -> (bool, MockEncoder) {
            self.frame_index += 1;
            let mut encoder = MockEncoder::new();
            let viewport = ViewportFrame {
                id: self.viewport,
                frame_index: self.frame_index,
                size: scene.size,
                back_buffer: Some(&scene.back_buffer),
                back_buffer_format: FORMAT,
                hud: None,
                frame_time_delta: 16.6,
            };
            let interpolated = self.scheduler.run_frame(&mut encoder, settings, &viewport, views);
            self.scheduler.on_commands_submitted(self.viewport).unwrap();
            (interpolated, encoder)
        }

        /// Every present callback the platform makes for one frame.
        fn present(&self, scene: &Scene, interpolated: bool) -> Vec<bool> {
            present_frame(&self.presenter, scene, interpolated)
        }
    }

    fn present_frame(
        presenter: &PresentStateMachine<MockRenderDevice>,
        scene: &Scene,
        interpolated: bool,
    ) -> Vec<bool> {
        presenter.begin_drawing();
        let presents = if interpolated { 2 } else { 1 };
        (0..presents)
            .map(|_| {
                let mut sync_interval = 0;
                let native = presenter.present(Some(&scene.swapchain), &mut sync_interval);
                presenter.post_present();
                native
            })
            .collect()
    }

    fn rank(status: PresentStatus) -> u8 {
        match status {
            PresentStatus::InterpolateRT => 0,
            PresentStatus::InterpolateRHI => 1,
            PresentStatus::PresentRT => 2,
            PresentStatus::PresentRHI => 3,
        }
    }

    /// Status samples taken in order on one thread never step back within a
    /// cycle.
    fn assert_forward_only(samples: &[(u64, PresentStatus)]) {
        for pair in samples.windows(2) {
            let ((cycle, from), (next_cycle, to)) = (pair[0], pair[1]);
            assert!(next_cycle >= cycle, "cycle index went back: {pair:?}");
            if next_cycle == cycle {
                assert!(rank(to) >= rank(from), "cycle {cycle} went from {from:?} to {to:?}");
            }
        }
    }

    fn prepare_resets(encoder: &MockEncoder) -> Vec<bool> {
        encoder
            .commands
            .iter()
            .filter_map(|command| match *command {
                MockCommand::Prepare { reset, .. } => Some(reset),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn disabled_feature_always_presents_natively() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let settings = FrameInterpolationSettings {
            enabled: false,
            ..Default::default()
        };

        for _ in 0..10 {
            let outcome = host.frame(&settings, &scene, &scene.full_view());
            assert!(!outcome.interpolated);
            assert!(outcome.encoder.commands.is_empty());
            assert_eq!(outcome.native, [true]);
            assert!(host.presenter.needs_native_present());
        }
        assert_eq!(host.scheduler.context_count(), 0);
        assert_eq!(host.device.allocation_count(), 0);
    }

    #[test]
    fn unsupported_sdk_never_interpolates() {
        let sdk = MockFrameGenerationSdk::new();
        sdk.set_supported(false);
        let mut host = Host::with_sdk(sdk);
        let scene = host.scene(HD);

        let settings = FrameInterpolationSettings::default();
        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert!(!outcome.interpolated);
        assert_eq!(outcome.native, [true]);
        assert!(!host.scheduler.support().frame_generation_supported);
    }

    #[test]
    fn split_screen_keeps_two_contexts_and_bounded_ring() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let settings = FrameInterpolationSettings::default();

        for _ in 0..100 {
            let outcome = host.frame(&settings, &scene, &scene.split_views());
            assert!(outcome.interpolated);
            assert_eq!(outcome.native, [false, true]);
            assert_eq!(host.scheduler.context_count(), 2);
            assert_eq!(host.scheduler.sdk().live_contexts(), 2);
            assert!(host.scheduler.live_bundles(host.viewport).unwrap() <= DEFAULT_RING_DEPTH);

            let counters = host.presenter.counters();
            assert_eq!(counters.present_count, counters.interpolation_count);
        }
        assert_eq!(host.presenter.counters().interpolation_count, 100);
        assert_eq!(host.device.present_copies().len(), 100);
        assert_eq!(host.scheduler.frame_count(), 100);
    }

    #[test]
    fn split_screen_presents_union_of_views() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        host.frame(&FrameInterpolationSettings::default(), &scene, &scene.split_views());

        let copies = host.device.present_copies();
        assert_eq!(copies[0].2, Rect::from_size(FULL_HD));
    }

    #[test]
    fn prepare_precedes_generate_for_each_view() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let settings = FrameInterpolationSettings::default();
        let outcome = host.frame(&settings, &scene, &scene.split_views());
        let commands = &outcome.encoder.commands;

        assert!(matches!(commands[0], MockCommand::Copy { .. }));
        assert!(matches!(commands[1], MockCommand::Clear { .. }));
        let dispatches: Vec<_> = commands
            .iter()
            .filter(|command| {
                matches!(command, MockCommand::Prepare { .. } | MockCommand::Generate { .. })
            })
            .collect();
        assert_eq!(dispatches.len(), 4);
        for pair in dispatches.chunks(2) {
            match (pair[0], pair[1]) {
                (
                    MockCommand::Prepare { context: prepared, .. },
                    MockCommand::Generate { context: generated, .. },
                ) => assert_eq!(prepared, generated),
                other => panic!("unexpected dispatch order {other:?}"),
            }
        }
    }

    #[test]
    fn hud_is_captured_when_requested() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let hud = host.device.host_texture("hud", HD, FORMAT);
        let settings = FrameInterpolationSettings {
            capture_debug_ui: true,
            ..Default::default()
        };
        let viewport = ViewportFrame {
            id: host.viewport,
            frame_index: 1,
            size: HD,
            back_buffer: Some(&scene.back_buffer),
            back_buffer_format: FORMAT,
            hud: Some(&hud),
            frame_time_delta: 16.6,
        };

        let mut encoder = MockEncoder::new();
        assert!(host.scheduler.run_frame(&mut encoder, &settings, &viewport, &scene.full_view()));
        let copies = encoder
            .commands
            .iter()
            .filter(|command| matches!(command, MockCommand::Copy { .. }))
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn resize_resets_history_once() {
        let mut host = Host::new();
        let settings = FrameInterpolationSettings::default();
        let scene = host.scene(FULL_HD);
        for _ in 0..3 {
            host.frame(&settings, &scene, &scene.full_view());
        }
        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert_eq!(prepare_resets(&outcome.encoder), [false]);

        host.presenter.on_back_buffer_resize();
        let scene = host.scene(HD);
        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert!(outcome.interpolated);
        assert_eq!(prepare_resets(&outcome.encoder), [true]);
        assert_eq!(host.device.flush_count(), 1);
        assert_eq!(host.scheduler.context_count(), 1);

        for _ in 0..5 {
            let outcome = host.frame(&settings, &scene, &scene.full_view());
            assert!(outcome.interpolated);
            assert_eq!(prepare_resets(&outcome.encoder), [false]);
        }
        assert_eq!(host.device.flush_count(), 1);
        let last_copy = host.device.present_copies().last().copied().unwrap();
        assert_eq!(last_copy.2, Rect::from_size(HD));
    }

    #[test]
    fn size_change_without_notification_also_resets() {
        let mut host = Host::new();
        let settings = FrameInterpolationSettings::default();
        let scene = host.scene(FULL_HD);
        host.frame(&settings, &scene, &scene.full_view());
        host.frame(&settings, &scene, &scene.full_view());

        let scene = host.scene(HD);
        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert!(outcome.interpolated);
        assert_eq!(prepare_resets(&outcome.encoder), [true]);
        assert_eq!(host.device.flush_count(), 1);
    }

    #[test]
    fn disabling_arms_reset_and_reenabling_resumes() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let enabled = FrameInterpolationSettings::default();
        let disabled = FrameInterpolationSettings {
            enabled: false,
            ..Default::default()
        };

        for _ in 0..3 {
            assert!(host.frame(&enabled, &scene, &scene.full_view()).interpolated);
        }
        assert!(!host.frame(&disabled, &scene, &scene.full_view()).interpolated);
        assert!(!host.presenter.generation_enabled());

        let outcome = host.frame(&enabled, &scene, &scene.full_view());
        assert!(outcome.interpolated);
        assert!(host.presenter.generation_enabled());
        assert_eq!(prepare_resets(&outcome.encoder), [true]);
    }

    #[test]
    fn views_from_other_upscalers_are_ignored() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let mut view = scene.view(0, Rect::from_size(HD));
        view.upscaler = "dlss";

        let outcome = host.frame(&FrameInterpolationSettings::default(), &scene, &[view]);
        assert!(!outcome.interpolated);
        assert_eq!(outcome.native, [true]);
        assert_eq!(host.scheduler.context_count(), 0);
    }

    #[test]
    fn view_outside_viewport_is_ignored() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let view = scene.view(0, Rect::new(UVec2::new(640, 0), HD));

        assert!(!host.frame(&FrameInterpolationSettings::default(), &scene, &[view]).interpolated);
    }

    #[test]
    fn missing_depth_skips_only_that_view() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let mut views = scene.split_views();
        views[0].depth = None;
        let surviving_rect = views[1].rect;

        let outcome = host.frame(&FrameInterpolationSettings::default(), &scene, &views);
        assert!(outcome.interpolated);
        assert_eq!(prepare_resets(&outcome.encoder).len(), 1);
        assert_eq!(host.device.present_copies()[0].2, surviving_rect);
    }

    #[test]
    fn dispatch_failure_falls_back_to_passthrough() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let settings = FrameInterpolationSettings::default();
        host.scheduler.sdk().set_fail_dispatch(true);

        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert!(!outcome.interpolated);
        assert_eq!(outcome.native, [true]);

        host.scheduler.sdk().set_fail_dispatch(false);
        assert!(host.frame(&settings, &scene, &scene.full_view()).interpolated);
    }

    #[test]
    fn context_failure_falls_back_to_passthrough() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        host.scheduler.sdk().set_fail_create(true);

        let settings = FrameInterpolationSettings::default();
        assert!(!host.frame(&settings, &scene, &scene.full_view()).interpolated);
        assert_eq!(host.scheduler.context_count(), 0);
    }

    #[test]
    fn allocation_failure_falls_back_to_passthrough() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        host.device.set_fail_allocations(true);

        let settings = FrameInterpolationSettings::default();
        let outcome = host.frame(&settings, &scene, &scene.full_view());
        assert!(!outcome.interpolated);
        assert_eq!(outcome.native, [true]);
    }

    #[test]
    fn render_thread_one_frame_ahead_interpolates_every_frame() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let settings = FrameInterpolationSettings::default();

        let mut max_live = 0;
        let mut previous = None;
        for frame in 0..50 {
            let (interpolated, encoder) = host.schedule(&settings, &scene, &scene.full_view());
            assert!(interpolated);
            assert_eq!(prepare_resets(&encoder), [frame == 0]);
            if let Some(previous) = previous.replace(interpolated) {
                assert_eq!(host.present(&scene, previous), [false, true]);
            }

            let live = host.scheduler.live_bundles(host.viewport).unwrap();
            assert!(live <= DEFAULT_RING_DEPTH);
            max_live = max_live.max(live);
        }
        assert_eq!(max_live, 2);
        assert_eq!(host.device.present_copies().len(), 49);
        let counters = host.presenter.counters();
        assert_eq!(counters.interpolation_count, 50);
        assert_eq!(counters.present_count, 49);
    }

    #[test]
    fn full_present_queue_falls_back_until_presents_catch_up() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let settings = FrameInterpolationSettings::default();

        assert!(host.schedule(&settings, &scene, &scene.full_view()).0);
        assert!(host.schedule(&settings, &scene, &scene.full_view()).0);
        let (interpolated, encoder) = host.schedule(&settings, &scene, &scene.full_view());
        assert!(!interpolated);
        assert!(encoder.commands.is_empty());
        assert_eq!(host.presenter.queued_frames(), 2);

        assert_eq!(host.present(&scene, true), [false, true]);
        assert_eq!(host.present(&scene, true), [false, true]);
        assert!(!host.presenter.is_cycle_pending());

        let (interpolated, encoder) = host.schedule(&settings, &scene, &scene.full_view());
        assert!(interpolated);
        assert_eq!(prepare_resets(&encoder), [true]);
    }

    #[test]
    fn minimal_ring_keeps_render_and_present_in_lockstep() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let settings = FrameInterpolationSettings {
            ring_depth: 1,
            ..Default::default()
        };

        assert!(host.schedule(&settings, &scene, &scene.full_view()).0);
        assert!(!host.schedule(&settings, &scene, &scene.full_view()).0);
        host.present(&scene, true);
        assert!(host.frame(&settings, &scene, &scene.full_view()).interpolated);
        assert!(host.scheduler.live_bundles(host.viewport).unwrap() <= MIN_RING_DEPTH);
    }

    #[test]
    fn present_thread_runs_alongside_render_thread() {
        const FRAMES: u64 = 300;
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        let settings = FrameInterpolationSettings::default();
        let presenter = Arc::clone(&host.presenter);
        let (sender, receiver) = mpsc::sync_channel::<bool>(0);

        thread::scope(|scope| {
            let scene = &scene;
            let present_thread = scope.spawn(move || {
                let mut samples = Vec::new();
                for interpolated in receiver {
                    samples.push(presenter.cycle_status());
                    present_frame(&presenter, scene, interpolated);
                    samples.push(presenter.cycle_status());

                    let counters = presenter.counters();
                    assert!(counters.present_count <= counters.interpolation_count);
                    assert!(counters.interpolation_count - counters.present_count <= 2);
                }
                samples
            });

            let mut samples = Vec::new();
            for _ in 0..FRAMES {
                let (interpolated, _) = host.schedule(&settings, scene, &scene.full_view());
                assert!(interpolated);
                samples.push(host.presenter.cycle_status());
                let live = host.scheduler.live_bundles(host.viewport).unwrap();
                assert!(live <= DEFAULT_RING_DEPTH);
                sender.send(interpolated).unwrap();
            }
            drop(sender);

            assert_forward_only(&samples);
            assert_forward_only(&present_thread.join().unwrap());
        });

        let counters = host.presenter.counters();
        assert_eq!(counters.interpolation_count, FRAMES);
        assert_eq!(counters.present_count, FRAMES);
        assert!(!host.presenter.is_cycle_pending());
        assert_eq!(host.device.present_copies().len() as u64, FRAMES);
    }

    #[test]
    fn unknown_viewport_is_reported() {
        let mut host = Host::new();
        let scene = host.scene(HD);
        let stranger = ViewportId::new();

        assert!(matches!(
            host.scheduler.presenter(stranger),
            Err(FrameInterpolationError::UnknownViewport(id)) if id == stranger
        ));
        assert!(host.scheduler.on_commands_submitted(stranger).is_err());

        let viewport = ViewportFrame {
            id: stranger,
            frame_index: 1,
            size: HD,
            back_buffer: Some(&scene.back_buffer),
            back_buffer_format: FORMAT,
            hud: None,
            frame_time_delta: 16.6,
        };
        let mut encoder = MockEncoder::new();
        let settings = FrameInterpolationSettings::default();
        assert!(!host.scheduler.run_frame(&mut encoder, &settings, &viewport, &scene.full_view()));
        assert!(encoder.commands.is_empty());

        assert!(!host.scheduler.unregister_viewport(stranger));
        assert!(host.scheduler.unregister_viewport(host.viewport));
        assert!(host.scheduler.presenter(host.viewport).is_err());
    }

    #[test]
    fn shutdown_destroys_every_context() {
        let mut host = Host::new();
        let scene = host.scene(FULL_HD);
        host.frame(&FrameInterpolationSettings::default(), &scene, &scene.split_views());

        host.scheduler.shutdown();
        assert_eq!(host.scheduler.context_count(), 0);
        assert_eq!(host.scheduler.sdk().live_contexts(), 0);
        assert!(host.scheduler.live_bundles(host.viewport).is_none());
    }
}
