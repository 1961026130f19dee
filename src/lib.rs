//! # framegen_wgpu
//!
//! This crate schedules GPU frame interpolation (frame generation) for `wgpu` renderers and
//! substitutes the generated frames at present time.
//!
//! The vendor frame generation SDK is reached through the [`FrameGenerationSdk`] trait and the
//! GPU through [`RenderDevice`]; [`WgpuRenderDevice`] implements the latter for `wgpu`.
//!
//! Each frame, [`FrameScheduler::run_frame`] snapshots the backbuffer, converts the engine's motion
//! vectors, and records a "prepare" and a "generate" dispatch per eligible view. The platform
//! swapchain drives the matching [`PresentStateMachine`], which copies the interpolated frame into
//! the present target and tells the platform whether to present natively as well.
//!
//! ## API Usage
//! ```rust,ignore
//! use framegen_wgpu::{
//!     FrameInterpolationSettings, FrameScheduler, ViewFrame, ViewportFrame, ViewportId,
//!     WgpuRenderDevice,
//! };
//!
//! // Create the scheduler once per application
//! let render_device = Arc::new(WgpuRenderDevice::new(&device, &queue));
//! let mut scheduler = FrameScheduler::new(Arc::clone(&render_device), sdk);
//!
//! // Register each window and hand the present object to its swapchain
//! let viewport = ViewportId::new();
//! let presenter = scheduler.register_viewport(viewport);
//!
//! // Every frame, after rendering and before presenting
//! let settings = FrameInterpolationSettings::load("frame_interpolation.toml")?;
//! let interpolated =
//!     scheduler.run_frame(&mut command_encoder, &settings, &viewport_frame, &views);
//! queue.submit([command_encoder.finish()]);
//! scheduler.on_commands_submitted(viewport)?;
//!
//! // On the present thread
//! presenter.begin_drawing();
//! let mut sync_interval = 0;
//! if presenter.present(Some(&swapchain_texture), &mut sync_interval) {
//!     // Present the real backbuffer as well
//! }
//! presenter.post_present();
//! ```

mod backend;
mod context_cache;
mod descriptor;
mod error;
mod initialization;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod motion_vectors;
mod present;
mod reconciler;
mod render_parameters;
mod ring;
mod scheduler;
mod settings;
mod wgpu_device;

pub use backend::{FrameGenerationSdk, RenderDevice, TextureDescriptor};
pub use context_cache::{ContextCache, InterpolationContext, MAX_IDLE_FRAMES};
pub use descriptor::{FrameContextDescriptor, FrameGenerationFlags, ViewportId};
pub use error::{FrameInterpolationError, SdkError};
pub use initialization::{FeatureSupport, InitializationError, create_scheduler};
pub use motion_vectors::{
    CameraParameters, MOTION_VECTOR_FORMAT, MotionVectorInputs, camera_motion, decode_velocity,
    dense_motion_vector,
};
pub use present::{PresentStateMachine, PresentStatus, QueuedFrame};
pub use reconciler::{CounterReconciler, CounterSnapshot, PresentReport, ReconcileOutcome};
pub use render_parameters::{GenerateParameters, PrepareParameters, Rect};
pub use ring::{DEFAULT_RING_DEPTH, FrameResourceBundle, MIN_RING_DEPTH, ResourceRing};
pub use scheduler::{FrameScheduler, ViewFrame, ViewportFrame};
pub use settings::{DispatchFlags, FrameInterpolationSettings, QualityMode};
pub use wgpu_device::WgpuRenderDevice;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if another thread panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
