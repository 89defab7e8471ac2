//! 2D camera and view-projection construction.
//!
//! The camera is described in world space by a position, a rotation and a
//! scale. `scale` is the half-height of the visible region in world units, so
//! the camera's own transform is `T(position) * R(rotation) * S(scale)` and the
//! view matrix is its inverse.

use glam::{Affine2, Mat3, Vec2};

/// Per-frame camera state supplied by the simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraData {
    pub position: Vec2,
    /// Half-height of the visible area, in world units. Must be >= 0.
    pub scale: f32,
    /// Rotation in radians, counter-clockwise.
    pub rotation: f32,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: 1.0,
            rotation: 0.0,
        }
    }
}

impl CameraData {
    pub fn new(position: Vec2, scale: f32, rotation: f32) -> Self {
        Self {
            position,
            scale,
            rotation,
        }
    }

    /// Camera-to-world transform.
    pub fn world_transform(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(Vec2::splat(self.scale), self.rotation, self.position)
    }

    /// True when the camera cannot produce an invertible view (scale 0, NaN, ...).
    pub fn is_degenerate(&self) -> bool {
        !(self.scale.is_finite() && self.scale > 0.0)
            || !self.position.is_finite()
            || !self.rotation.is_finite()
    }

    /// World-to-clip matrix for a viewport of the given aspect ratio (width / height).
    ///
    /// Returns `None` for a degenerate camera or aspect ratio. Callers treat
    /// that as an empty view: nothing is drawn, the clear color is still shown.
    pub fn view_projection(&self, aspect: f32) -> Option<Mat3> {
        if self.is_degenerate() || !(aspect.is_finite() && aspect > 0.0) {
            return None;
        }
        let view = Mat3::from(self.world_transform().inverse());
        let projection = Mat3::from_scale(Vec2::new(1.0 / aspect, 1.0));
        Some(projection * view)
    }
}
