use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;

const QUAD_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shaders/quad.spv"));

/// One SPIR-V module holding both the vertex and fragment entry points
pub struct GraphicsShader {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl GraphicsShader {
    pub const VERTEX_ENTRY: &'static CStr = c"vs_main";
    pub const FRAGMENT_ENTRY: &'static CStr = c"fs_main";

    pub fn quad(device: Arc<VulkanDevice>) -> Result<Self> {
        let module = create_shader_module(QUAD_SPV, &device.logical)?;
        Ok(Self { module, device })
    }

    pub fn stages(&self) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
        [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.module)
                .name(Self::VERTEX_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.module)
                .name(Self::FRAGMENT_ENTRY),
        ]
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.logical.destroy_shader_module(self.module, None);
        }
    }
}

fn create_shader_module(bytes: &[u8], device: &ash::Device) -> Result<vk::ShaderModule> {
    // Copies into u32 words, the embedded bytes carry no alignment guarantee
    let code = ash::util::read_spv(&mut Cursor::new(bytes))?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}
