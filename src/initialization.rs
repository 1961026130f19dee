use crate::{FrameGenerationSdk, FrameScheduler, RenderDevice};
use std::sync::Arc;
use tracing::{info, warn};

/// Whether frame generation can run on the current system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSupport {
    /// The SDK accepted the device. When false every frame is a passthrough.
    pub frame_generation_supported: bool,
}

impl Default for FeatureSupport {
    fn default() -> Self {
        Self {
            frame_generation_supported: true,
        }
    }
}

impl FeatureSupport {
    /// Ask the SDK whether it can run on `device`.
    pub fn probe<D: RenderDevice, S: FrameGenerationSdk<D>>(sdk: &S, device: &D) -> Self {
        let frame_generation_supported = sdk.is_supported(device);
        if !frame_generation_supported {
            warn!(sdk = sdk.name(), "frame generation is not supported on this device");
        }
        Self {
            frame_generation_supported,
        }
    }
}

/// Creates a [`FrameScheduler`], failing if the SDK does not support `device`.
///
/// Use [`FrameScheduler::new`] instead to keep running in passthrough mode on
/// unsupported systems.
pub fn create_scheduler<D: RenderDevice, S: FrameGenerationSdk<D>>(
    device: Arc<D>,
    sdk: S,
) -> Result<FrameScheduler<D, S>, InitializationError> {
    if !FeatureSupport::probe(&sdk, &*device).frame_generation_supported {
        return Err(InitializationError::Unsupported);
    }
    info!(sdk = sdk.name(), "initializing frame generation");
    Ok(FrameScheduler::new(device, sdk))
}

#[derive(thiserror::Error, Debug)]
pub enum InitializationError {
    #[error("frame generation is not supported on this device")]
    Unsupported,
    #[error("invalid frame interpolation settings: {0}")]
    Settings(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
