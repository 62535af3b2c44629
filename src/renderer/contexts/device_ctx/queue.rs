use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(family: QueueFamily, handle: vk::Queue) -> Self {
        Self { family, handle }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool,
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

/// Graphics and present families, picked from a device's queue family list.
///
/// A family that can do both is preferred so the swapchain images can stay exclusive.
pub fn pick_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    supports_present: F,
) -> Option<(QueueFamily, QueueFamily)>
where
    F: Fn(u32) -> bool,
{
    let family = |index: usize| {
        let index = index as u32;
        QueueFamily::new(index, families[index as usize], supports_present(index))
    };
    let candidates = (0..families.len()).map(family).collect::<Vec<_>>();

    let graphics = candidates.iter().filter(|f| f.supports_graphics());
    if let Some(both) = graphics.clone().find(|f| f.supports_present()) {
        return Some((*both, *both));
    }

    let graphics = graphics.copied().next()?;
    let present = candidates.iter().find(|f| f.supports_present()).copied()?;
    Some((graphics, present))
}
