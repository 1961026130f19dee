//! Conversion of engine velocity buffers into dense motion vectors.
//!
//! Engines usually write per-object velocity only for moving geometry and
//! leave zero elsewhere; frame generation wants a motion vector for every
//! pixel. Pixels without encoded velocity get camera motion reconstructed from
//! depth and the clip-to-previous-clip transform. The functions here are the
//! CPU reference of `convert_motion_vectors.wgsl`.

use glam::{Mat4, UVec2, Vec2, Vec4, Vec4Swizzles};
use wgpu::TextureFormat;

/// Format of the dense motion vector texture (UV-space delta to the previous frame).
pub const MOTION_VECTOR_FORMAT: TextureFormat = TextureFormat::Rg32Float;

const VELOCITY_INV_DIV: f32 = 1.0 / (0.499 * 0.5);
const VELOCITY_BIAS: f32 = 32767.0 / 65535.0;

/// Camera state for one view in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParameters {
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in radians.
    pub fov_vertical: f32,
    pub view_space_to_meters: f32,
    /// Subpixel jitter applied to the projection this frame.
    pub jitter_offset: Vec2,
    pub motion_vector_scale: Vec2,
    /// Maps current clip-space positions to the previous frame's clip space.
    pub clip_to_prev_clip: Mat4,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 1000.0,
            fov_vertical: std::f32::consts::FRAC_PI_2,
            view_space_to_meters: 1.0,
            jitter_offset: Vec2::ZERO,
            motion_vector_scale: Vec2::ONE,
            clip_to_prev_clip: Mat4::IDENTITY,
        }
    }
}

/// Textures read by the conversion pass.
pub struct MotionVectorInputs<'a, T> {
    pub depth: &'a T,
    pub velocity: &'a T,
    pub render_size: UVec2,
    pub camera: &'a CameraParameters,
}

/// Decode a velocity value stored in the engine's biased encoding into a
/// screen-space delta.
pub fn decode_velocity(encoded: Vec2) -> Vec2 {
    encoded * VELOCITY_INV_DIV - Vec2::splat(VELOCITY_BIAS * VELOCITY_INV_DIV)
}

/// Screen-space motion of a static surface caused by camera movement alone.
pub fn camera_motion(screen_pos: Vec2, device_depth: f32, clip_to_prev_clip: Mat4) -> Vec2 {
    let prev_clip = clip_to_prev_clip * Vec4::new(screen_pos.x, screen_pos.y, device_depth, 1.0);
    screen_pos - prev_clip.xy() / prev_clip.w
}

/// Dense UV-space motion vector for one pixel.
///
/// `screen_pos` is in normalized device coordinates (y up); the result points
/// from the current pixel to where it was in the previous frame, in UV units
/// (y down).
pub fn dense_motion_vector(
    screen_pos: Vec2,
    device_depth: f32,
    encoded_velocity: Vec2,
    camera: &CameraParameters,
) -> Vec2 {
    let velocity = if encoded_velocity.x > 0.0 {
        decode_velocity(encoded_velocity)
    } else {
        camera_motion(screen_pos, device_depth, camera.clip_to_prev_clip)
    };
    velocity * Vec2::new(-0.5, 0.5) * camera.motion_vector_scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn static_pixel_has_no_motion() {
        let motion = dense_motion_vector(
            Vec2::new(0.25, -0.5),
            0.3,
            Vec2::ZERO,
            &CameraParameters::default(),
        );
        assert!(motion.abs_diff_eq(Vec2::ZERO, 1e-6), "{motion}");
    }

    #[test]
    fn bias_decodes_to_zero() {
        let zero = decode_velocity(Vec2::splat(VELOCITY_BIAS));
        assert!(zero.abs_diff_eq(Vec2::ZERO, 1e-6), "{zero}");
    }

    #[test]
    fn encoded_velocity_wins_over_camera_motion() {
        let camera = CameraParameters {
            clip_to_prev_clip: Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0)),
            ..Default::default()
        };
        let encoded = Vec2::new(VELOCITY_BIAS + 0.499 * 0.5 * 0.2, VELOCITY_BIAS);
        let motion = dense_motion_vector(Vec2::ZERO, 0.5, encoded, &camera);
        assert!(motion.abs_diff_eq(Vec2::new(-0.1, 0.0), 1e-5), "{motion}");
    }

    #[test]
    fn camera_pan_is_reconstructed_from_depth() {
        let camera = CameraParameters {
            clip_to_prev_clip: Mat4::from_translation(Vec3::new(0.2, 0.0, 0.0)),
            ..Default::default()
        };
        let motion = dense_motion_vector(Vec2::new(0.1, 0.1), 0.5, Vec2::ZERO, &camera);
        assert!(motion.abs_diff_eq(Vec2::new(0.1, 0.0), 1e-6), "{motion}");
    }
}
