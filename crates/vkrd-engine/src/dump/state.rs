use ash::vk;
use vkrd_protocol::CaptureId;

/// One vkCmdBindDescriptorSets call, kept verbatim so it can be re-issued
/// on each successor clone.
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    pub layout: vk::PipelineLayout,
    pub first_set: u32,
    pub sets: Vec<vk::DescriptorSet>,
    pub set_ids: Vec<CaptureId>,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct VertexBufferBinding {
    pub first_binding: u32,
    pub buffers: Vec<vk::Buffer>,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexBufferBinding {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub index_type: vk::IndexType,
}

/// Host-side copy of the state a clone needs re-armed after a dump-point
/// boundary: whatever was bound on the original recording must be bound
/// identically on the successor clone before the next command.
#[derive(Debug, Clone, Default)]
pub struct BoundState {
    pub graphics_pipeline: Option<(CaptureId, vk::Pipeline)>,
    pub compute_pipeline: Option<(CaptureId, vk::Pipeline)>,
    pub ray_tracing_pipeline: Option<(CaptureId, vk::Pipeline)>,
    pub graphics_descriptors: Vec<DescriptorBinding>,
    pub compute_descriptors: Vec<DescriptorBinding>,
    pub ray_tracing_descriptors: Vec<DescriptorBinding>,
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
}

impl BoundState {
    pub fn record_descriptors(
        list: &mut Vec<DescriptorBinding>,
        binding: DescriptorBinding,
    ) {
        // a later bind at the same first_set supersedes the earlier one
        list.retain(|b| b.first_set != binding.first_set || b.sets.len() != binding.sets.len());
        list.push(binding);
    }

    /// Re-issue every shadowed bind onto a freshly begun clone.
    pub fn replay(&self, device: &ash::Device, cb: vk::CommandBuffer) {
        unsafe {
            if let Some((_, pipeline)) = self.graphics_pipeline {
                device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            if let Some((_, pipeline)) = self.compute_pipeline {
                device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, pipeline);
            }
            if let Some((_, pipeline)) = self.ray_tracing_pipeline {
                device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::RAY_TRACING_KHR, pipeline);
            }
            for (point, list) in [
                (vk::PipelineBindPoint::GRAPHICS, &self.graphics_descriptors),
                (vk::PipelineBindPoint::COMPUTE, &self.compute_descriptors),
                (
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    &self.ray_tracing_descriptors,
                ),
            ] {
                for binding in list {
                    device.cmd_bind_descriptor_sets(
                        cb,
                        point,
                        binding.layout,
                        binding.first_set,
                        &binding.sets,
                        &binding.dynamic_offsets,
                    );
                }
            }
            for vb in &self.vertex_buffers {
                device.cmd_bind_vertex_buffers(cb, vb.first_binding, &vb.buffers, &vb.offsets);
            }
            if let Some(ib) = self.index_buffer {
                device.cmd_bind_index_buffer(cb, ib.buffer, ib.offset, ib.index_type);
            }
            if !self.viewports.is_empty() {
                device.cmd_set_viewport(cb, 0, &self.viewports);
            }
            if !self.scissors.is_empty() {
                device.cmd_set_scissor(cb, 0, &self.scissors);
            }
        }
    }
}

/// A resource to copy out once a clone's fence has signaled.
#[derive(Debug, Clone)]
pub enum SnapshotTarget {
    /// Framebuffer attachment or storage image, referenced by its view id
    ImageView {
        id: CaptureId,
        /// Raw VkImageLayout the image is in when the clone's fence signals
        layout: i32,
    },
    Buffer {
        id: CaptureId,
        offset: u64,
        size: u64,
    },
}

/// Snapshot work attached to one clone boundary.
#[derive(Debug, Clone)]
pub enum SnapshotRequest {
    Own {
        /// Call index of the guarded command this boundary isolates
        command_index: u64,
        targets: Vec<SnapshotTarget>,
        /// Pre-execution snapshot of a dump-before pair
        before: bool,
    },
    /// The boundary belongs to a spliced secondary clone; its requests live
    /// in the secondary's context.
    Secondary {
        begin_index: u64,
        clone_index: usize,
    },
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn later_bind_supersedes_same_slot() {
        let mut list = Vec::new();
        let binding = |first_set: u32, raw: u64| DescriptorBinding {
            layout: vk::PipelineLayout::null(),
            first_set,
            sets: vec![vk::DescriptorSet::from_raw(raw)],
            set_ids: vec![CaptureId(raw)],
            dynamic_offsets: Vec::new(),
        };
        BoundState::record_descriptors(&mut list, binding(0, 1));
        BoundState::record_descriptors(&mut list, binding(1, 2));
        BoundState::record_descriptors(&mut list, binding(0, 3));
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].set_ids, vec![CaptureId(3)]);
    }
}
