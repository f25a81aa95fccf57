use ash::vk;

/// Session-level device state shared by the consumer, the dump engine and
/// the snapshot utility. Created once per replayed logical device.
pub struct DeviceContext {
    pub instance: ash::Instance,
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_family_count: u32,
    /// Present when the capture enabled VK_KHR_ray_tracing_pipeline.
    pub ray_tracing: Option<ash::khr::ray_tracing_pipeline::Device>,
}

// SAFETY: Vulkan handles are valid across threads with external synchronization;
// the worker pool only issues pipeline creation calls, which need none.
unsafe impl Send for DeviceContext {}
unsafe impl Sync for DeviceContext {}

impl DeviceContext {
    /// Pick a memory type index matching the requirement bits and property
    /// flags, preferring exact flag matches.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[*i as usize]
                .property_flags
                .contains(flags)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = *flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_type_bits() {
        let props = props_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        // type bit 0 excluded, so the host-visible type at index 1 wins
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}
