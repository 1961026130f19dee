use crate::{DispatchFlags, FrameInterpolationError, motion_vectors::CameraParameters};
use glam::UVec2;

/// Axis-aligned pixel rectangle inside a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub origin: UVec2,
    pub size: UVec2,
}

impl Rect {
    pub fn new(origin: UVec2, size: UVec2) -> Self {
        Self { origin, size }
    }

    /// Rectangle covering `size` starting at the top-left corner.
    pub fn from_size(size: UVec2) -> Self {
        Self {
            origin: UVec2::ZERO,
            size,
        }
    }

    pub fn max(&self) -> UVec2 {
        self.origin + self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }

    /// Whether the rectangle lies entirely inside a surface of `extent`.
    pub fn fits_within(&self, extent: UVec2) -> bool {
        !self.is_empty() && self.max().cmple(extent).all()
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let origin = self.origin.min(other.origin);
        let max = self.max().max(other.max());
        Rect::new(origin, max - origin)
    }
}

/// Inputs for the "prepare" dispatch: per-frame depth, motion and camera data.
///
/// Must be dispatched before [`GenerateParameters`] on the same encoder.
pub struct PrepareParameters<'a, T> {
    /// Identifier shared by the prepare and generate dispatch of one frame.
    pub frame_id: u64,
    /// Depth buffer at render resolution.
    pub depth: &'a T,
    /// Dense motion vectors produced by the conversion pass.
    pub motion_vectors: &'a T,
    pub render_size: UVec2,
    pub camera: &'a CameraParameters,
    /// Frame time in milliseconds.
    pub frame_time_delta: f32,
    /// Whether interpolation history is invalid (camera cut, resize).
    pub reset: bool,
}

impl<T> PrepareParameters<'_, T> {
    pub(crate) fn validate(&self) -> Result<(), FrameInterpolationError> {
        if self.render_size.x == 0 || self.render_size.y == 0 {
            return Err(FrameInterpolationError::MissingTexture("render-size depth"));
        }
        Ok(())
    }
}

/// Inputs and output of the "generate" dispatch.
pub struct GenerateParameters<'a, T> {
    pub frame_id: u64,
    /// Stable snapshot of the real frame.
    pub present_color: &'a T,
    /// Optional HUD-less copy used to keep UI out of the interpolated frame.
    pub hud: Option<&'a T>,
    /// The texture the interpolated frame is written to.
    pub output: &'a T,
    /// Region of the output this view covers.
    pub generation_rect: Rect,
    pub flags: DispatchFlags,
    pub frame_time_delta: f32,
    pub reset: bool,
}

impl<T> GenerateParameters<'_, T> {
    pub(crate) fn validate(&self) -> Result<(), FrameInterpolationError> {
        if self.generation_rect.is_empty() {
            return Err(FrameInterpolationError::MissingTexture("generation rect"));
        }
        Ok(())
    }
}
