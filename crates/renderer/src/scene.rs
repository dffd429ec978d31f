//! Per-frame scene payload written into each slot's uniform buffer.
//!
//! The layout is `#[repr(C)]` and matches the std140 block shaders bind at
//! set 0, binding 0:
//!
//! - Offset 0: view matrix (64 bytes)
//! - Offset 64: projection matrix (64 bytes)
//! - Offset 128: view-projection matrix (64 bytes)
//! - Offset 192: camera position (12 bytes)
//! - Offset 204: light count (4 bytes)
//! - Offset 208: `MAX_SCENE_LIGHTS` lights, 32 bytes each
//! - Total size: 464 bytes

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Upper bound on lights carried by one frame.
pub const MAX_SCENE_LIGHTS: usize = 8;

/// Camera state the caller hands in each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    /// Camera position in world space.
    pub position: Vec3,
}

impl CameraMatrices {
    /// Right-handed look-at camera with a perspective projection.
    ///
    /// The projection's Y axis is flipped for Vulkan clip space.
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        fov_y: f32,
        aspect_ratio: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        let mut projection = Mat4::perspective_rh(fov_y, aspect_ratio, near, far);
        projection.y_axis.y *= -1.0;

        Self {
            view,
            projection,
            position,
        }
    }
}

/// A point light.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SceneLight {
    pub position: Vec3,
    /// Distance at which the light's contribution reaches zero.
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl SceneLight {
    pub fn new(position: Vec3, radius: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            radius,
            color,
            intensity,
        }
    }
}

/// Uniform block uploaded once per frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    /// Number of valid entries at the start of `lights`.
    pub light_count: u32,
    pub lights: [SceneLight; MAX_SCENE_LIGHTS],
}

impl SceneUniforms {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Packs `camera` and the first [`MAX_SCENE_LIGHTS`] of `lights`.
    ///
    /// Extra lights are dropped; the returned flag is `true` when that
    /// happened so the caller can log it once.
    pub fn new(camera: &CameraMatrices, lights: &[SceneLight]) -> (Self, bool) {
        let mut packed = [SceneLight::default(); MAX_SCENE_LIGHTS];
        let count = lights.len().min(MAX_SCENE_LIGHTS);
        packed[..count].copy_from_slice(&lights[..count]);

        let uniforms = Self {
            view: camera.view,
            projection: camera.projection,
            view_projection: camera.projection * camera.view,
            camera_position: camera.position,
            light_count: count as u32,
            lights: packed,
        };
        (uniforms, lights.len() > MAX_SCENE_LIGHTS)
    }
}

impl Default for SceneUniforms {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<SceneLight>(), 32);
        assert_eq!(SceneUniforms::SIZE, 464);
        assert_eq!(SceneUniforms::SIZE % 16, 0);
    }

    #[test]
    fn test_view_projection_is_product() {
        let camera = CameraMatrices {
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)),
            projection: Mat4::from_scale(Vec3::new(2.0, 2.0, 1.0)),
            position: Vec3::new(0.0, 0.0, 5.0),
        };
        let (uniforms, truncated) = SceneUniforms::new(&camera, &[]);

        assert!(!truncated);
        assert_eq!(uniforms.view_projection, camera.projection * camera.view);
        assert_eq!(uniforms.camera_position, camera.position);
        assert_eq!(uniforms.light_count, 0);
    }

    #[test]
    fn test_lights_are_truncated() {
        let camera = CameraMatrices {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
        };
        let lights: Vec<SceneLight> = (0..10)
            .map(|i| SceneLight::new(Vec3::splat(i as f32), 1.0, Vec3::ONE, 1.0))
            .collect();

        let (uniforms, truncated) = SceneUniforms::new(&camera, &lights);

        assert!(truncated);
        assert_eq!(uniforms.light_count as usize, MAX_SCENE_LIGHTS);
        assert_eq!(uniforms.lights[7].position, Vec3::splat(7.0));
    }

    #[test]
    fn test_look_at_flips_y() {
        let camera = CameraMatrices::look_at(
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::ZERO,
            45.0_f32.to_radians(),
            16.0 / 9.0,
            0.1,
            100.0,
        );
        assert!(camera.projection.y_axis.y < 0.0);
    }
}
