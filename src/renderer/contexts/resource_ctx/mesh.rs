use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use glam::{Vec2, Vec3};
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::resource_ctx::buffer::AllocatedBuffer;
use crate::renderer::shader_data::PerVertexData;

pub const QUAD_VERTICES: [PerVertexData; 4] = [
    PerVertexData {
        position: Vec2::new(-0.5, -0.5),
        color: Vec3::new(1.0, 0.0, 0.0),
        texcoord: Vec2::new(1.0, 0.0),
    },
    PerVertexData {
        position: Vec2::new(0.5, -0.5),
        color: Vec3::new(1.0, 1.0, 0.0),
        texcoord: Vec2::new(0.0, 0.0),
    },
    PerVertexData {
        position: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.0, 1.0, 0.0),
        texcoord: Vec2::new(0.0, 1.0),
    },
    PerVertexData {
        position: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.0, 0.0, 0.0),
        texcoord: Vec2::new(1.0, 1.0),
    },
];

/// Two counter-clockwise triangles sharing the 0-2 diagonal
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Device-local vertex and index buffers for the textured quad
pub struct QuadMesh {
    pub vertex_buffer: AllocatedBuffer,
    pub index_buffer: AllocatedBuffer,
    pub index_count: u32,
}

impl QuadMesh {
    pub fn upload(device: Arc<VulkanDevice>) -> Result<Self> {
        let vertex_buffer = AllocatedBuffer::with_data(
            device.clone(),
            &QUAD_VERTICES,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "Quad vertex buffer",
        )?;
        let index_buffer = AllocatedBuffer::with_data(
            device,
            &QUAD_INDICES,
            vk::BufferUsageFlags::INDEX_BUFFER,
            "Quad index buffer",
        )?;

        log::debug!(
            "Uploaded quad mesh ({} vertices, {} indices)",
            QUAD_VERTICES.len(),
            QUAD_INDICES.len(),
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: QUAD_INDICES.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_reference_every_vertex() {
        for vertex in 0..QUAD_VERTICES.len() as u16 {
            assert!(QUAD_INDICES.contains(&vertex));
        }
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }

    #[test]
    fn triangles_share_a_winding() {
        let area = |tri: &[u16]| {
            let [a, b, c] = [0, 1, 2].map(|k| QUAD_VERTICES[tri[k] as usize].position);
            (b - a).perp_dot(c - a)
        };
        let (first, second) = QUAD_INDICES.split_at(3);
        assert!(area(first) > 0.0);
        assert!(area(second) > 0.0);
    }

    #[test]
    fn quad_is_centered_unit_square() {
        let sum: Vec2 = QUAD_VERTICES.iter().map(|v| v.position).sum();
        assert_eq!(sum, Vec2::ZERO);
        assert!(QUAD_VERTICES.iter().all(|v| v.position.abs() == Vec2::splat(0.5)));
    }

    #[test]
    fn vertex_bytes_are_tightly_packed() {
        assert_eq!(bytemuck::cast_slice::<_, u8>(&QUAD_VERTICES).len(), 4 * 28);
        assert_eq!(bytemuck::cast_slice::<_, u8>(&QUAD_INDICES).len(), 12);
    }
}
