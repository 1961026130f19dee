use glam::UVec2;
use std::fmt;
use uuid::Uuid;
use wgpu::TextureFormat;

bitflags::bitflags! {
    /// Creation flags for a frame generation context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameGenerationFlags: u32 {
        const HIGH_DYNAMIC_RANGE = 1 << 0;
        const DEPTH_INVERTED = 1 << 1;
        const DEPTH_INFINITE = 1 << 2;
        const DISPLAY_RESOLUTION_MOTION_VECTORS = 1 << 3;
        const MOTION_VECTORS_JITTER_CANCELLATION = 1 << 4;
        const ASYNC_WORKLOADS = 1 << 5;
    }
}

/// Configuration an interpolation context is created for.
///
/// Rebuilt every frame from the current viewport and view; equality decides
/// whether a cached context can be reused as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameContextDescriptor {
    pub display_size: UVec2,
    pub max_render_size: UVec2,
    pub back_buffer_format: TextureFormat,
    pub flags: FrameGenerationFlags,
}

impl FrameContextDescriptor {
    /// Whether a context built for `self` can serve `requested`.
    ///
    /// Everything must match except the maximum render size, which only has to
    /// be large enough.
    pub fn is_compatible_with(&self, requested: &FrameContextDescriptor) -> bool {
        self.display_size == requested.display_size
            && self.back_buffer_format == requested.back_buffer_format
            && self.flags == requested.flags
            && self.max_render_size.cmpge(requested.max_render_size).all()
    }
}

/// Identity of a platform viewport (window or swapchain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewportId(Uuid);

impl ViewportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ViewportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
