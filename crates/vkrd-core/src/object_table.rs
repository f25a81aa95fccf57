use std::collections::HashMap;

use dashmap::mapref::one::RefMut;
use dashmap::{DashMap, DashSet};
use tracing::warn;
use vkrd_protocol::{CaptureId, ObjectKind};

/// Denormalized image creation metadata, consulted by the snapshot utility
/// and the dump engine's attachment bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub image_type: i32,
    pub format: i32,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub tiling: i32,
    pub usage: u32,
    pub current_layout: i32,
    pub queue_family_index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BufferInfo {
    pub size: u64,
    pub usage: u32,
    pub memory_id: CaptureId,
    pub memory_offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ImageViewInfo {
    pub image_id: CaptureId,
    pub format: i32,
    pub aspect_mask: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VertexBindingInfo {
    pub stride: u32,
    pub input_rate: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VertexAttributeInfo {
    pub binding: u32,
    pub format: i32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineInfo {
    pub bind_point: i32,
    pub stage_flags: u32,
    pub layout_id: CaptureId,
    pub descriptor_set_layout_ids: Vec<CaptureId>,
    /// binding -> stride/input-rate, from the vertex input state
    pub vertex_bindings: HashMap<u32, VertexBindingInfo>,
    /// location -> binding/format/offset
    pub vertex_attributes: HashMap<u32, VertexAttributeInfo>,
    pub dynamic_vertex_input: bool,
}

/// One descriptor binding's bound resources, shadowed from
/// vkUpdateDescriptorSets so the dump engine knows what a dispatch touches.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBindingInfo {
    pub descriptor_type: i32,
    pub buffer_ids: Vec<CaptureId>,
    pub image_view_ids: Vec<CaptureId>,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetInfo {
    pub pool_id: CaptureId,
    pub bindings: HashMap<u32, DescriptorBindingInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandBufferInfo {
    pub pool_id: CaptureId,
    pub level: i32,
    /// Call index of the vkBeginCommandBuffer of the current recording
    pub begin_index: u64,
    pub executed_secondaries: Vec<CaptureId>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolInfo {
    pub children: Vec<CaptureId>,
    /// Command pools only; descriptor pools leave this zero
    pub queue_family_index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FramebufferInfo {
    pub render_pass_id: CaptureId,
    pub attachment_ids: Vec<CaptureId>,
    pub imageless: bool,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassAttachmentInfo {
    pub format: i32,
    pub samples: u32,
    pub load_op: i32,
    pub store_op: i32,
    pub stencil_load_op: i32,
    pub stencil_store_op: i32,
    pub initial_layout: i32,
    pub final_layout: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SubpassInfo {
    pub color_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
    pub resolve_attachments: Vec<u32>,
    pub input_attachments: Vec<u32>,
}

/// Full attachment/subpass shape of a render pass, kept so the dump engine
/// can recreate load/store variants for re-begun passes on later clones.
#[derive(Debug, Clone, Default)]
pub struct RenderPassInfo {
    pub attachments: Vec<RenderPassAttachmentInfo>,
    pub subpasses: Vec<SubpassInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceMemoryInfo {
    pub allocation_size: u64,
    pub memory_type_index: u32,
    pub property_flags: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SwapchainInfo {
    pub format: i32,
    pub extent: [u32; 2],
    pub image_ids: Vec<CaptureId>,
}

/// Site of a two-call enumeration query, keying the recorded replay counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumerationQuery {
    PhysicalDevices,
    QueueFamilyProperties,
    SwapchainImages,
}

/// The handle virtualization table: capture-time identifiers to live native
/// handles plus per-object metadata.
///
/// Live handles are stored as raw u64 values so this crate stays independent
/// of the device bindings; the engine converts at the call boundary. Lookups
/// for unknown ids return None, which callers replay as the null handle —
/// captures legitimately reference trimmed or previously-failed objects.
pub struct ObjectTable {
    handles: DashMap<(ObjectKind, CaptureId), u64>,
    reverse: DashMap<(ObjectKind, u64), CaptureId>,

    images: DashMap<CaptureId, ImageInfo>,
    buffers: DashMap<CaptureId, BufferInfo>,
    image_views: DashMap<CaptureId, ImageViewInfo>,
    pipelines: DashMap<CaptureId, PipelineInfo>,
    descriptor_sets: DashMap<CaptureId, DescriptorSetInfo>,
    command_buffers: DashMap<CaptureId, CommandBufferInfo>,
    command_pools: DashMap<CaptureId, PoolInfo>,
    descriptor_pools: DashMap<CaptureId, PoolInfo>,
    framebuffers: DashMap<CaptureId, FramebufferInfo>,
    render_passes: DashMap<CaptureId, RenderPassInfo>,
    memories: DashMap<CaptureId, DeviceMemoryInfo>,
    swapchains: DashMap<CaptureId, SwapchainInfo>,

    /// Capture-time array counts recorded per object per query site, so
    /// count-adjusting overrides can preserve captured truncation signaling.
    enumeration_counts: DashMap<(CaptureId, EnumerationQuery), u32>,
    /// Handles owned by an in-flight async creation task. Checked before
    /// every pipeline dereference.
    pending: DashSet<CaptureId>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            reverse: DashMap::new(),
            images: DashMap::new(),
            buffers: DashMap::new(),
            image_views: DashMap::new(),
            pipelines: DashMap::new(),
            descriptor_sets: DashMap::new(),
            command_buffers: DashMap::new(),
            command_pools: DashMap::new(),
            descriptor_pools: DashMap::new(),
            framebuffers: DashMap::new(),
            render_passes: DashMap::new(),
            memories: DashMap::new(),
            swapchains: DashMap::new(),
            enumeration_counts: DashMap::new(),
            pending: DashSet::new(),
        }
    }

    /// Register a capture id -> live handle mapping. No-op when either side
    /// is null, tolerating creations whose outputs were never populated.
    /// Re-adding an existing id replaces the mapping (captures may reuse ids
    /// after an untracked destroy).
    pub fn add_handle(&self, kind: ObjectKind, id: CaptureId, raw: u64) {
        if id.is_null() || raw == 0 {
            return;
        }
        if let Some(old) = self.handles.insert((kind, id), raw) {
            self.reverse.remove(&(kind, old));
        }
        self.reverse.insert((kind, raw), id);
    }

    /// Batched variant. The two slices are index-correlated and always the
    /// same length; invalid entries are skipped pairwise.
    pub fn add_handles(&self, kind: ObjectKind, ids: &[CaptureId], raws: &[u64]) {
        debug_assert_eq!(ids.len(), raws.len());
        for (id, raw) in ids.iter().zip(raws) {
            self.add_handle(kind, *id, *raw);
        }
    }

    /// Look up the live handle for a capture id. None for unknown ids.
    pub fn map_handle(&self, kind: ObjectKind, id: CaptureId) -> Option<u64> {
        if id.is_null() {
            return None;
        }
        self.handles.get(&(kind, id)).map(|v| *v)
    }

    /// Reverse lookup: live handle -> capture id.
    pub fn capture_id_of(&self, kind: ObjectKind, raw: u64) -> Option<CaptureId> {
        self.reverse.get(&(kind, raw)).map(|v| *v)
    }

    /// Remove a leaf mapping and its metadata. Pool-owned kinds also
    /// unregister from the parent pool's child list; pool kinds remove all
    /// children transitively.
    pub fn remove_handle(&self, kind: ObjectKind, id: CaptureId) {
        if let Some((_, raw)) = self.handles.remove(&(kind, id)) {
            self.reverse.remove(&(kind, raw));
        }
        match kind {
            ObjectKind::Image => {
                self.images.remove(&id);
            }
            ObjectKind::Buffer => {
                self.buffers.remove(&id);
            }
            ObjectKind::ImageView => {
                self.image_views.remove(&id);
            }
            ObjectKind::Pipeline => {
                self.pipelines.remove(&id);
                self.pending.remove(&id);
            }
            ObjectKind::Framebuffer => {
                self.framebuffers.remove(&id);
            }
            ObjectKind::RenderPass => {
                self.render_passes.remove(&id);
            }
            ObjectKind::DeviceMemory => {
                self.memories.remove(&id);
            }
            ObjectKind::Swapchain => {
                self.swapchains.remove(&id);
            }
            ObjectKind::DescriptorSet => {
                if let Some((_, info)) = self.descriptor_sets.remove(&id) {
                    self.unlink_pool_child(&self.descriptor_pools, info.pool_id, id);
                }
            }
            ObjectKind::CommandBuffer => {
                if let Some((_, info)) = self.command_buffers.remove(&id) {
                    self.unlink_pool_child(&self.command_pools, info.pool_id, id);
                }
            }
            ObjectKind::CommandPool => {
                if let Some((_, pool)) = self.command_pools.remove(&id) {
                    for child in pool.children {
                        if let Some((_, raw)) =
                            self.handles.remove(&(ObjectKind::CommandBuffer, child))
                        {
                            self.reverse.remove(&(ObjectKind::CommandBuffer, raw));
                        }
                        self.command_buffers.remove(&child);
                    }
                }
            }
            ObjectKind::DescriptorPool => {
                if let Some((_, pool)) = self.descriptor_pools.remove(&id) {
                    for child in pool.children {
                        if let Some((_, raw)) =
                            self.handles.remove(&(ObjectKind::DescriptorSet, child))
                        {
                            self.reverse.remove(&(ObjectKind::DescriptorSet, raw));
                        }
                        self.descriptor_sets.remove(&child);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn remove_handles(&self, kind: ObjectKind, ids: &[CaptureId]) {
        for id in ids {
            self.remove_handle(kind, *id);
        }
    }

    fn unlink_pool_child(
        &self,
        pools: &DashMap<CaptureId, PoolInfo>,
        pool_id: CaptureId,
        child: CaptureId,
    ) {
        if let Some(mut pool) = pools.get_mut(&pool_id) {
            pool.children.retain(|c| *c != child);
        } else if !pool_id.is_null() {
            warn!(pool = pool_id.0, child = child.0, "pool missing for child removal");
        }
    }

    // Typed registration: handle plus metadata in one step, linking
    // pool-owned kinds into their parent's child list.

    pub fn add_image(&self, id: CaptureId, raw: u64, info: ImageInfo) {
        self.add_handle(ObjectKind::Image, id, raw);
        if !id.is_null() && raw != 0 {
            self.images.insert(id, info);
        }
    }

    pub fn add_buffer(&self, id: CaptureId, raw: u64, info: BufferInfo) {
        self.add_handle(ObjectKind::Buffer, id, raw);
        if !id.is_null() && raw != 0 {
            self.buffers.insert(id, info);
        }
    }

    pub fn add_image_view(&self, id: CaptureId, raw: u64, info: ImageViewInfo) {
        self.add_handle(ObjectKind::ImageView, id, raw);
        if !id.is_null() && raw != 0 {
            self.image_views.insert(id, info);
        }
    }

    pub fn add_pipeline(&self, id: CaptureId, raw: u64, info: PipelineInfo) {
        self.add_handle(ObjectKind::Pipeline, id, raw);
        if !id.is_null() && raw != 0 {
            self.pipelines.insert(id, info);
        }
    }

    pub fn add_framebuffer(&self, id: CaptureId, raw: u64, info: FramebufferInfo) {
        self.add_handle(ObjectKind::Framebuffer, id, raw);
        if !id.is_null() && raw != 0 {
            self.framebuffers.insert(id, info);
        }
    }

    pub fn add_render_pass(&self, id: CaptureId, raw: u64, info: RenderPassInfo) {
        self.add_handle(ObjectKind::RenderPass, id, raw);
        if !id.is_null() && raw != 0 {
            self.render_passes.insert(id, info);
        }
    }

    pub fn add_memory(&self, id: CaptureId, raw: u64, info: DeviceMemoryInfo) {
        self.add_handle(ObjectKind::DeviceMemory, id, raw);
        if !id.is_null() && raw != 0 {
            self.memories.insert(id, info);
        }
    }

    pub fn add_swapchain(&self, id: CaptureId, raw: u64, info: SwapchainInfo) {
        self.add_handle(ObjectKind::Swapchain, id, raw);
        if !id.is_null() && raw != 0 {
            self.swapchains.insert(id, info);
        }
    }

    pub fn add_command_pool(&self, id: CaptureId, raw: u64, queue_family_index: u32) {
        self.add_handle(ObjectKind::CommandPool, id, raw);
        if !id.is_null() && raw != 0 {
            self.command_pools.insert(
                id,
                PoolInfo {
                    children: Vec::new(),
                    queue_family_index,
                },
            );
        }
    }

    pub fn command_pool_info(&self, id: CaptureId) -> Option<PoolInfo> {
        self.command_pools.get(&id).map(|r| r.clone())
    }

    pub fn add_descriptor_pool(&self, id: CaptureId, raw: u64) {
        self.add_handle(ObjectKind::DescriptorPool, id, raw);
        if !id.is_null() && raw != 0 {
            self.descriptor_pools.insert(id, PoolInfo::default());
        }
    }

    pub fn add_command_buffer(&self, id: CaptureId, raw: u64, mut info: CommandBufferInfo) {
        self.add_handle(ObjectKind::CommandBuffer, id, raw);
        if id.is_null() || raw == 0 {
            return;
        }
        if let Some(mut pool) = self.command_pools.get_mut(&info.pool_id) {
            pool.children.push(id);
        } else {
            info.pool_id = CaptureId::NULL;
        }
        self.command_buffers.insert(id, info);
    }

    pub fn add_descriptor_set(&self, id: CaptureId, raw: u64, mut info: DescriptorSetInfo) {
        self.add_handle(ObjectKind::DescriptorSet, id, raw);
        if id.is_null() || raw == 0 {
            return;
        }
        if let Some(mut pool) = self.descriptor_pools.get_mut(&info.pool_id) {
            pool.children.push(id);
        } else {
            info.pool_id = CaptureId::NULL;
        }
        self.descriptor_sets.insert(id, info);
    }

    // Metadata accessors. Reads clone the record; mutation goes through the
    // guarded reference.

    pub fn image_info(&self, id: CaptureId) -> Option<ImageInfo> {
        self.images.get(&id).map(|r| r.clone())
    }

    pub fn image_info_mut(&self, id: CaptureId) -> Option<RefMut<'_, CaptureId, ImageInfo>> {
        self.images.get_mut(&id)
    }

    pub fn buffer_info(&self, id: CaptureId) -> Option<BufferInfo> {
        self.buffers.get(&id).map(|r| r.clone())
    }

    pub fn buffer_info_mut(&self, id: CaptureId) -> Option<RefMut<'_, CaptureId, BufferInfo>> {
        self.buffers.get_mut(&id)
    }

    pub fn image_view_info(&self, id: CaptureId) -> Option<ImageViewInfo> {
        self.image_views.get(&id).map(|r| r.clone())
    }

    pub fn pipeline_info(&self, id: CaptureId) -> Option<PipelineInfo> {
        self.pipelines.get(&id).map(|r| r.clone())
    }

    pub fn descriptor_set_info(&self, id: CaptureId) -> Option<DescriptorSetInfo> {
        self.descriptor_sets.get(&id).map(|r| r.clone())
    }

    pub fn descriptor_set_info_mut(
        &self,
        id: CaptureId,
    ) -> Option<RefMut<'_, CaptureId, DescriptorSetInfo>> {
        self.descriptor_sets.get_mut(&id)
    }

    pub fn command_buffer_info(&self, id: CaptureId) -> Option<CommandBufferInfo> {
        self.command_buffers.get(&id).map(|r| r.clone())
    }

    pub fn command_buffer_info_mut(
        &self,
        id: CaptureId,
    ) -> Option<RefMut<'_, CaptureId, CommandBufferInfo>> {
        self.command_buffers.get_mut(&id)
    }

    pub fn framebuffer_info(&self, id: CaptureId) -> Option<FramebufferInfo> {
        self.framebuffers.get(&id).map(|r| r.clone())
    }

    pub fn render_pass_info(&self, id: CaptureId) -> Option<RenderPassInfo> {
        self.render_passes.get(&id).map(|r| r.clone())
    }

    pub fn memory_info(&self, id: CaptureId) -> Option<DeviceMemoryInfo> {
        self.memories.get(&id).map(|r| r.clone())
    }

    pub fn swapchain_info(&self, id: CaptureId) -> Option<SwapchainInfo> {
        self.swapchains.get(&id).map(|r| r.clone())
    }

    pub fn swapchain_info_mut(
        &self,
        id: CaptureId,
    ) -> Option<RefMut<'_, CaptureId, SwapchainInfo>> {
        self.swapchains.get_mut(&id)
    }

    // Two-call enumeration bookkeeping.

    /// Record the replay-time element count observed for an enumeration
    /// query on the given object.
    pub fn record_enumeration(&self, object: CaptureId, query: EnumerationQuery, count: u32) {
        self.enumeration_counts.insert((object, query), count);
    }

    pub fn replay_count_for(&self, object: CaptureId, query: EnumerationQuery) -> Option<u32> {
        self.enumeration_counts.get(&(object, query)).map(|v| *v)
    }

    // Busy-handle set for async creation.

    pub fn mark_pending(&self, id: CaptureId) {
        self.pending.insert(id);
    }

    pub fn clear_pending(&self, id: CaptureId) {
        self.pending.remove(&id);
    }

    pub fn is_pending(&self, id: CaptureId) -> bool {
        self.pending.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trip() {
        let table = ObjectTable::new();
        table.add_handle(ObjectKind::Buffer, CaptureId(5), 0x1000);
        assert_eq!(table.map_handle(ObjectKind::Buffer, CaptureId(5)), Some(0x1000));
        assert_eq!(table.capture_id_of(ObjectKind::Buffer, 0x1000), Some(CaptureId(5)));
        table.remove_handle(ObjectKind::Buffer, CaptureId(5));
        assert_eq!(table.map_handle(ObjectKind::Buffer, CaptureId(5)), None);
        assert_eq!(table.capture_id_of(ObjectKind::Buffer, 0x1000), None);
    }

    #[test]
    fn null_add_is_noop() {
        let table = ObjectTable::new();
        table.add_handle(ObjectKind::Image, CaptureId::NULL, 0x2000);
        table.add_handle(ObjectKind::Image, CaptureId(9), 0);
        assert!(table.is_empty());
        assert_eq!(table.map_handle(ObjectKind::Image, CaptureId(9)), None);
    }

    #[test]
    fn duplicate_id_replaces() {
        let table = ObjectTable::new();
        table.add_handle(ObjectKind::Fence, CaptureId(3), 0xa);
        table.add_handle(ObjectKind::Fence, CaptureId(3), 0xb);
        assert_eq!(table.map_handle(ObjectKind::Fence, CaptureId(3)), Some(0xb));
        assert_eq!(table.capture_id_of(ObjectKind::Fence, 0xa), None);
    }

    #[test]
    fn batched_index_correspondence() {
        let table = ObjectTable::new();
        let ids = [CaptureId(1), CaptureId::NULL, CaptureId(3)];
        let raws = [0x10, 0x20, 0x30];
        table.add_handles(ObjectKind::Semaphore, &ids, &raws);
        assert_eq!(table.map_handle(ObjectKind::Semaphore, CaptureId(1)), Some(0x10));
        assert_eq!(table.map_handle(ObjectKind::Semaphore, CaptureId(3)), Some(0x30));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn pool_transitive_removal() {
        let table = ObjectTable::new();
        table.add_command_pool(CaptureId(1), 0x100, 0);
        table.add_command_buffer(
            CaptureId(2),
            0x200,
            CommandBufferInfo {
                pool_id: CaptureId(1),
                ..Default::default()
            },
        );
        table.add_command_buffer(
            CaptureId(3),
            0x300,
            CommandBufferInfo {
                pool_id: CaptureId(1),
                ..Default::default()
            },
        );
        table.remove_handle(ObjectKind::CommandPool, CaptureId(1));
        assert_eq!(table.map_handle(ObjectKind::CommandBuffer, CaptureId(2)), None);
        assert_eq!(table.map_handle(ObjectKind::CommandBuffer, CaptureId(3)), None);
        assert!(table.command_buffer_info(CaptureId(2)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn leaf_removal_unlinks_from_pool() {
        let table = ObjectTable::new();
        table.add_descriptor_pool(CaptureId(1), 0x100);
        table.add_descriptor_set(
            CaptureId(2),
            0x200,
            DescriptorSetInfo {
                pool_id: CaptureId(1),
                ..Default::default()
            },
        );
        table.remove_handle(ObjectKind::DescriptorSet, CaptureId(2));
        // destroying the pool afterwards must not touch the removed child
        table.remove_handle(ObjectKind::DescriptorPool, CaptureId(1));
        assert!(table.is_empty());
    }

    #[test]
    fn enumeration_counts() {
        let table = ObjectTable::new();
        assert_eq!(
            table.replay_count_for(CaptureId(1), EnumerationQuery::PhysicalDevices),
            None
        );
        table.record_enumeration(CaptureId(1), EnumerationQuery::PhysicalDevices, 2);
        assert_eq!(
            table.replay_count_for(CaptureId(1), EnumerationQuery::PhysicalDevices),
            Some(2)
        );
    }

    #[test]
    fn pending_set() {
        let table = ObjectTable::new();
        table.mark_pending(CaptureId(7));
        assert!(table.is_pending(CaptureId(7)));
        table.clear_pending(CaptureId(7));
        assert!(!table.is_pending(CaptureId(7)));
    }
}
