use crate::{PresentStatus, Rect, ViewportId};
use glam::UVec2;

/// Error code returned by a native frame generation SDK call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed with native error code {code:#x}")]
pub struct SdkError {
    /// The SDK entry point that failed.
    pub operation: &'static str,
    /// Raw error code reported by the SDK.
    pub code: u32,
}

impl SdkError {
    pub fn new(operation: &'static str, code: u32) -> Self {
        Self { operation, code }
    }
}

/// Errors produced while scheduling or presenting interpolated frames.
///
/// Every variant is recoverable: the affected view or viewport falls back to a
/// passthrough present for the current frame.
#[derive(thiserror::Error, Debug)]
pub enum FrameInterpolationError {
    #[error(transparent)]
    Sdk(#[from] SdkError),
    #[error("failed to allocate {resource}: {reason}")]
    ResourceAllocation {
        resource: &'static str,
        reason: String,
    },
    #[error("copy region {rect:?} exceeds texture extent {extent}")]
    CopyOutOfBounds { rect: Rect, extent: UVec2 },
    #[error("required texture `{0}` was not provided")]
    MissingTexture(&'static str),
    #[error("no present state machine is registered for viewport {0}")]
    UnknownViewport(ViewportId),
    #[error("invalid present status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PresentStatus,
        to: PresentStatus,
    },
    #[error("present queue is full, frame {frame_index} was not queued")]
    PresentQueueFull { frame_index: u64 },
}
