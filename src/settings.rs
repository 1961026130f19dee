//! Runtime toggles for frame interpolation.
//!
//! The settings are plain data: the host re-reads them every frame and passes
//! a snapshot to [`crate::FrameScheduler::run_frame`]. They can be loaded from
//! a TOML file with [`FrameInterpolationSettings::load`].

use crate::{FrameGenerationFlags, InitializationError, ring::DEFAULT_RING_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upscaler quality mode the interpolated views were rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    NativeAa,
    #[default]
    Quality,
    Balanced,
    Performance,
    UltraPerformance,
}

impl QualityMode {
    /// Ratio between display and render resolution for this mode.
    pub fn upscale_ratio(self) -> f32 {
        match self {
            QualityMode::NativeAa => 1.0,
            QualityMode::Quality => 1.5,
            QualityMode::Balanced => 1.7,
            QualityMode::Performance => 2.0,
            QualityMode::UltraPerformance => 3.0,
        }
    }

    /// Largest render resolution this mode produces for `display_size`.
    pub fn max_render_size(self, display_size: glam::UVec2) -> glam::UVec2 {
        let ratio = self.upscale_ratio();
        glam::UVec2::new(
            (display_size.x as f32 / ratio).ceil() as u32,
            (display_size.y as f32 / ratio).ceil() as u32,
        )
        .max(glam::UVec2::ONE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameInterpolationSettings {
    /// Master toggle. Turning it off stops new interpolation work; in-flight
    /// frames drain through the normal present path.
    pub enabled: bool,
    pub quality_mode: QualityMode,
    /// Let the SDK run its workloads on an async compute queue.
    pub allow_async_workloads: bool,
    /// Copy the HUD-less scene into the bundle so the interpolated frame is
    /// generated without UI.
    pub capture_debug_ui: bool,
    /// Force vsync on the present that shows an interpolated frame.
    pub force_vsync_for_pacing: bool,
    pub show_debug_view: bool,
    pub show_debug_tear_lines: bool,
    /// Number of frame resource bundles kept per viewport.
    pub ring_depth: usize,
}

impl Default for FrameInterpolationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            quality_mode: QualityMode::default(),
            allow_async_workloads: false,
            capture_debug_ui: false,
            force_vsync_for_pacing: true,
            show_debug_view: false,
            show_debug_tear_lines: false,
            ring_depth: DEFAULT_RING_DEPTH,
        }
    }
}

impl FrameInterpolationSettings {
    pub fn from_toml_str(source: &str) -> Result<Self, InitializationError> {
        Ok(toml::from_str(source)?)
    }

    /// Read settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InitializationError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Context creation flags implied by these settings.
    pub fn context_flags(&self) -> FrameGenerationFlags {
        let mut flags = FrameGenerationFlags::empty();
        flags.set(FrameGenerationFlags::ASYNC_WORKLOADS, self.allow_async_workloads);
        flags
    }

    /// Per-dispatch debug flags implied by these settings.
    pub fn dispatch_flags(&self) -> DispatchFlags {
        let mut flags = DispatchFlags::empty();
        flags.set(
            DispatchFlags::DRAW_DEBUG_VIEW,
            self.show_debug_view || cfg!(feature = "debug_overlay"),
        );
        flags.set(DispatchFlags::DRAW_DEBUG_TEAR_LINES, self.show_debug_tear_lines);
        flags
    }
}

bitflags::bitflags! {
    /// Debug flags attached to a generate dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DispatchFlags: u32 {
        const DRAW_DEBUG_TEAR_LINES = 1 << 0;
        const DRAW_DEBUG_VIEW = 1 << 1;
    }
}
