use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Transform block recomputed every frame and copied into the frame slot's uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    const ROTATION_DEG_PER_SEC: f32 = 90.0;
    const FOV_Y_DEG: f32 = 45.0;
    const NEAR: f32 = 0.1;
    const FAR: f32 = 10.0;
    const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

    /// Transforms for `elapsed_secs` since the loop started, projected onto `extent`
    pub fn at(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * Self::ROTATION_DEG_PER_SEC.to_radians());
        let view = Mat4::look_at_rh(Self::EYE, Vec3::ZERO, Vec3::Z);

        let mut proj = Self::unflipped_projection(extent);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }

    pub fn unflipped_projection(extent: vk::Extent2D) -> Mat4 {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        Mat4::perspective_rh(Self::FOV_Y_DEG.to_radians(), aspect, Self::NEAR, Self::FAR)
    }
}

/// Data unique to each vertex passed as elements into a vertex buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PerVertexData {
    pub position: Vec2,
    pub color: Vec3,
    pub texcoord: Vec2,
}

impl PerVertexData {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Self, texcoord) as u32,
            },
        ]
    }
}
