// Per-frame uniform data: model/view/projection matrices

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

const DEGREES_PER_SECOND: f32 = 90.0;
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

/// Matches the `UniformBufferObject` block in model.vert (std140, three mat4)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Matrices for a model spinning about +Z, `elapsed` seconds in
    pub fn at(elapsed: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed * DEGREES_PER_SECOND.to_radians());

        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        // glam's perspective_rh already maps depth to [0, 1]; only Y needs
        // flipping for Vulkan clip space
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    #[test]
    fn model_starts_unrotated() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        assert_eq!(ubo.model, Mat4::IDENTITY);
    }

    #[test]
    fn model_turns_a_quarter_per_second() {
        let ubo = UniformBufferObject::at(1.0, EXTENT);
        let x = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(x.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(x.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn origin_lands_in_front_of_camera() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        let clip = ubo.proj * ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;

        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn projection_flips_y() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        assert!(ubo.proj.y_axis.y < 0.0);
        assert!(ubo.proj.x_axis.x > 0.0);
    }

    #[test]
    fn aspect_follows_extent() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        assert_relative_eq!(
            ubo.proj.x_axis.x * 800.0 / 600.0,
            -ubo.proj.y_axis.y,
            epsilon = 1e-5
        );
    }

    #[test]
    fn zero_height_does_not_produce_nan() {
        let ubo = UniformBufferObject::at(0.0, vk::Extent2D { width: 800, height: 0 });
        assert!(ubo.proj.is_finite());
    }

    #[test]
    fn layout_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }
}
