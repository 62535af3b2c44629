use color_eyre::Result;
use ash::vk;

pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stages);

        self.bindings.push(binding);
        self
    }

    /// Uniform block for the vertex stage, then the texture and its sampler for the fragment stage
    pub fn per_frame() -> Self {
        Self::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .add_binding(1, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(2, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT)
    }

    #[cfg(test)]
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'_>] {
        &self.bindings
    }

    pub fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings);

        Ok(unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_layout_matches_shader_bindings() {
        let builder = DescriptorSetLayoutBuilder::per_frame();
        let bindings: Vec<_> = builder
            .bindings()
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.stage_flags, b.descriptor_count))
            .collect();

        assert_eq!(
            bindings,
            [
                (0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1),
                (1, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT, 1),
                (2, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT, 1),
            ]
        );
    }
}
