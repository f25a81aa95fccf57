//! Typed, decoded call records.
//!
//! Each record carries its arguments already decoded to native scalar types
//! (flags and enums kept as their raw values) or to capture identifiers for
//! handle-typed inputs. Handle-typed outputs use [`HandleDecoder`] so the
//! replay consumer can publish the replay-time handle back to the decoder.

use serde::{Deserialize, Serialize};

use crate::handle::{CaptureId, HandleDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Offset2d {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect2d {
    pub offset: Offset2d,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCreateInfo {
    pub queue_family_index: u32,
    pub queue_priorities: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferCreateInfo {
    pub flags: u32,
    pub size: u64,
    pub usage: u32,
    pub sharing_mode: i32,
    pub queue_family_indices: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCreateInfo {
    pub flags: u32,
    pub image_type: i32,
    pub format: i32,
    pub extent: Extent3d,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub tiling: i32,
    pub usage: u32,
    pub sharing_mode: i32,
    pub queue_family_indices: Vec<u32>,
    pub initial_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageViewCreateInfo {
    pub image: CaptureId,
    pub view_type: i32,
    pub format: i32,
    pub aspect_mask: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescription {
    pub format: i32,
    pub samples: u32,
    pub load_op: i32,
    pub store_op: i32,
    pub stencil_load_op: i32,
    pub stencil_store_op: i32,
    pub initial_layout: i32,
    pub final_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubpassDescription {
    pub color_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
    pub resolve_attachments: Vec<u32>,
    pub input_attachments: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPassCreateInfo {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramebufferCreateInfo {
    pub flags: u32,
    pub render_pass: CaptureId,
    pub attachments: Vec<CaptureId>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClearValue {
    Color([f32; 4]),
    ColorInt([i32; 4]),
    ColorUint([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Decoded vkCmdBeginRenderPass info. The imageless-framebuffer attachment
/// list travels on the begin call's extension chain at capture time; here it
/// is decoded into an optional id list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPassBeginInfo {
    pub render_pass: CaptureId,
    pub framebuffer: CaptureId,
    pub render_area: Rect2d,
    pub clear_values: Vec<ClearValue>,
    pub imageless_attachments: Option<Vec<CaptureId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingAttachmentInfo {
    pub image_view: CaptureId,
    pub image_layout: i32,
    pub resolve_image_view: CaptureId,
    pub load_op: i32,
    pub store_op: i32,
    pub clear_value: Option<ClearValue>,
}

/// Decoded vkCmdBeginRendering info (dynamic rendering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingInfo {
    pub flags: u32,
    pub render_area: Rect2d,
    pub layer_count: u32,
    pub view_mask: u32,
    pub color_attachments: Vec<RenderingAttachmentInfo>,
    pub depth_attachment: Option<RenderingAttachmentInfo>,
    pub stencil_attachment: Option<RenderingAttachmentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderStageInfo {
    pub stage: u32,
    pub module: CaptureId,
    pub entry_point: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VertexBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VertexAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: i32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsPipelineCreateInfo {
    pub flags: u32,
    pub stages: Vec<ShaderStageInfo>,
    pub vertex_bindings: Vec<VertexBindingDescription>,
    pub vertex_attributes: Vec<VertexAttributeDescription>,
    pub topology: i32,
    pub dynamic_states: Vec<i32>,
    pub layout: CaptureId,
    pub render_pass: CaptureId,
    pub subpass: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputePipelineCreateInfo {
    pub flags: u32,
    pub stage: ShaderStageInfo,
    pub layout: CaptureId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: i32,
    pub descriptor_count: u32,
    pub stage_flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorPoolSize {
    pub descriptor_type: i32,
    pub descriptor_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConstantRange {
    pub stage_flags: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorBufferInfo {
    pub buffer: CaptureId,
    pub offset: u64,
    pub range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorImageInfo {
    pub sampler: CaptureId,
    pub image_view: CaptureId,
    pub image_layout: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteDescriptorSet {
    pub dst_set: CaptureId,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: i32,
    pub buffer_infos: Vec<DescriptorBufferInfo>,
    pub image_infos: Vec<DescriptorImageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<CaptureId>,
    pub wait_dst_stage_masks: Vec<u32>,
    pub command_buffers: Vec<CaptureId>,
    pub signal_semaphores: Vec<CaptureId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBufferBeginInfo {
    pub flags: u32,
    pub inheritance_render_pass: CaptureId,
    pub inheritance_framebuffer: CaptureId,
    pub inheritance_subpass: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapchainCreateInfo {
    pub surface: CaptureId,
    pub min_image_count: u32,
    pub image_format: i32,
    pub image_color_space: i32,
    pub image_extent: [u32; 2],
    pub image_array_layers: u32,
    pub image_usage: u32,
    pub present_mode: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StridedDeviceAddressRegion {
    pub device_address: u64,
    pub stride: u64,
    pub size: u64,
}

/// A decoded call record. The replay consumer's dispatch over this enum is
/// the call-id → handler table: most variants take the default remap + invoke
/// + register path, a small set have override handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum VulkanCall {
    // Instance / device lifetime
    CreateInstance {
        app_name: Option<String>,
        api_version: u32,
        instance: HandleDecoder,
    },
    DestroyInstance {
        instance: CaptureId,
    },
    EnumeratePhysicalDevices {
        instance: CaptureId,
        capture_count: u32,
        capture_result: i32,
        physical_devices: Vec<HandleDecoder>,
    },
    GetPhysicalDeviceQueueFamilyProperties {
        physical_device: CaptureId,
        capture_count: u32,
    },
    CreateDevice {
        physical_device: CaptureId,
        queue_create_infos: Vec<QueueCreateInfo>,
        enabled_extensions: Vec<String>,
        device: HandleDecoder,
    },
    DestroyDevice {
        device: CaptureId,
    },
    GetDeviceQueue {
        device: CaptureId,
        queue_family_index: u32,
        queue_index: u32,
        queue: HandleDecoder,
    },
    DeviceWaitIdle {
        device: CaptureId,
    },

    // Memory
    AllocateMemory {
        device: CaptureId,
        allocation_size: u64,
        memory_type_index: u32,
        capture_property_flags: u32,
        memory: HandleDecoder,
    },
    FreeMemory {
        device: CaptureId,
        memory: CaptureId,
    },

    // Buffers / images / views
    CreateBuffer {
        device: CaptureId,
        create_info: BufferCreateInfo,
        buffer: HandleDecoder,
    },
    DestroyBuffer {
        device: CaptureId,
        buffer: CaptureId,
    },
    BindBufferMemory {
        device: CaptureId,
        buffer: CaptureId,
        memory: CaptureId,
        memory_offset: u64,
    },
    CreateImage {
        device: CaptureId,
        create_info: ImageCreateInfo,
        image: HandleDecoder,
    },
    DestroyImage {
        device: CaptureId,
        image: CaptureId,
    },
    BindImageMemory {
        device: CaptureId,
        image: CaptureId,
        memory: CaptureId,
        memory_offset: u64,
    },
    CreateImageView {
        device: CaptureId,
        create_info: ImageViewCreateInfo,
        view: HandleDecoder,
    },
    DestroyImageView {
        device: CaptureId,
        view: CaptureId,
    },

    // Render pass / framebuffer
    CreateRenderPass {
        device: CaptureId,
        create_info: RenderPassCreateInfo,
        render_pass: HandleDecoder,
    },
    DestroyRenderPass {
        device: CaptureId,
        render_pass: CaptureId,
    },
    CreateFramebuffer {
        device: CaptureId,
        create_info: FramebufferCreateInfo,
        framebuffer: HandleDecoder,
    },
    DestroyFramebuffer {
        device: CaptureId,
        framebuffer: CaptureId,
    },

    // Shaders / pipelines
    CreateShaderModule {
        device: CaptureId,
        code: Vec<u8>,
        module: HandleDecoder,
    },
    DestroyShaderModule {
        device: CaptureId,
        module: CaptureId,
    },
    CreatePipelineCache {
        device: CaptureId,
        initial_data: Vec<u8>,
        cache: HandleDecoder,
    },
    DestroyPipelineCache {
        device: CaptureId,
        cache: CaptureId,
    },
    CreatePipelineLayout {
        device: CaptureId,
        set_layouts: Vec<CaptureId>,
        push_constant_ranges: Vec<PushConstantRange>,
        layout: HandleDecoder,
    },
    DestroyPipelineLayout {
        device: CaptureId,
        layout: CaptureId,
    },
    CreateGraphicsPipelines {
        device: CaptureId,
        pipeline_cache: CaptureId,
        create_infos: Vec<GraphicsPipelineCreateInfo>,
        pipelines: Vec<HandleDecoder>,
    },
    CreateComputePipelines {
        device: CaptureId,
        pipeline_cache: CaptureId,
        create_infos: Vec<ComputePipelineCreateInfo>,
        pipelines: Vec<HandleDecoder>,
    },
    DestroyPipeline {
        device: CaptureId,
        pipeline: CaptureId,
    },

    // Descriptors
    CreateDescriptorSetLayout {
        device: CaptureId,
        bindings: Vec<DescriptorSetLayoutBinding>,
        layout: HandleDecoder,
    },
    DestroyDescriptorSetLayout {
        device: CaptureId,
        layout: CaptureId,
    },
    CreateDescriptorPool {
        device: CaptureId,
        max_sets: u32,
        pool_sizes: Vec<DescriptorPoolSize>,
        flags: u32,
        pool: HandleDecoder,
    },
    DestroyDescriptorPool {
        device: CaptureId,
        pool: CaptureId,
    },
    AllocateDescriptorSets {
        device: CaptureId,
        descriptor_pool: CaptureId,
        set_layouts: Vec<CaptureId>,
        descriptor_sets: Vec<HandleDecoder>,
    },
    FreeDescriptorSets {
        device: CaptureId,
        descriptor_pool: CaptureId,
        descriptor_sets: Vec<CaptureId>,
    },
    UpdateDescriptorSets {
        device: CaptureId,
        writes: Vec<WriteDescriptorSet>,
    },

    // Synchronization objects
    CreateFence {
        device: CaptureId,
        signaled: bool,
        fence: HandleDecoder,
    },
    DestroyFence {
        device: CaptureId,
        fence: CaptureId,
    },
    CreateSemaphore {
        device: CaptureId,
        semaphore: HandleDecoder,
    },
    DestroySemaphore {
        device: CaptureId,
        semaphore: CaptureId,
    },
    WaitForFences {
        device: CaptureId,
        fences: Vec<CaptureId>,
        wait_all: bool,
        timeout: u64,
    },
    ResetFences {
        device: CaptureId,
        fences: Vec<CaptureId>,
    },

    // Swapchain
    CreateSwapchain {
        device: CaptureId,
        create_info: SwapchainCreateInfo,
        swapchain: HandleDecoder,
    },
    DestroySwapchain {
        device: CaptureId,
        swapchain: CaptureId,
    },
    GetSwapchainImages {
        device: CaptureId,
        swapchain: CaptureId,
        capture_count: u32,
        capture_result: i32,
        images: Vec<HandleDecoder>,
    },

    // Command pools / buffers
    CreateCommandPool {
        device: CaptureId,
        flags: u32,
        queue_family_index: u32,
        pool: HandleDecoder,
    },
    DestroyCommandPool {
        device: CaptureId,
        pool: CaptureId,
    },
    AllocateCommandBuffers {
        device: CaptureId,
        command_pool: CaptureId,
        level: i32,
        command_buffers: Vec<HandleDecoder>,
    },
    FreeCommandBuffers {
        device: CaptureId,
        command_pool: CaptureId,
        command_buffers: Vec<CaptureId>,
    },
    BeginCommandBuffer {
        command_buffer: CaptureId,
        begin_info: CommandBufferBeginInfo,
    },
    EndCommandBuffer {
        command_buffer: CaptureId,
    },
    ResetCommandBuffer {
        command_buffer: CaptureId,
        flags: u32,
    },

    // Recorded commands
    CmdBeginRenderPass {
        command_buffer: CaptureId,
        begin_info: RenderPassBeginInfo,
        contents: i32,
    },
    CmdNextSubpass {
        command_buffer: CaptureId,
        contents: i32,
    },
    CmdEndRenderPass {
        command_buffer: CaptureId,
    },
    CmdBeginRendering {
        command_buffer: CaptureId,
        rendering_info: RenderingInfo,
    },
    CmdEndRendering {
        command_buffer: CaptureId,
    },
    CmdBindPipeline {
        command_buffer: CaptureId,
        pipeline_bind_point: i32,
        pipeline: CaptureId,
    },
    CmdBindDescriptorSets {
        command_buffer: CaptureId,
        pipeline_bind_point: i32,
        layout: CaptureId,
        first_set: u32,
        descriptor_sets: Vec<CaptureId>,
        dynamic_offsets: Vec<u32>,
    },
    CmdBindVertexBuffers {
        command_buffer: CaptureId,
        first_binding: u32,
        buffers: Vec<CaptureId>,
        offsets: Vec<u64>,
    },
    CmdBindIndexBuffer {
        command_buffer: CaptureId,
        buffer: CaptureId,
        offset: u64,
        index_type: i32,
    },
    CmdSetViewport {
        command_buffer: CaptureId,
        first_viewport: u32,
        viewports: Vec<[f32; 6]>,
    },
    CmdSetScissor {
        command_buffer: CaptureId,
        first_scissor: u32,
        scissors: Vec<Rect2d>,
    },
    CmdPipelineBarrier {
        command_buffer: CaptureId,
        src_stage_mask: u32,
        dst_stage_mask: u32,
        image_barriers: Vec<ImageMemoryBarrier>,
        buffer_barriers: Vec<BufferMemoryBarrier>,
    },
    CmdCopyBuffer {
        command_buffer: CaptureId,
        src_buffer: CaptureId,
        dst_buffer: CaptureId,
        regions: Vec<BufferCopy>,
    },
    CmdDraw {
        command_buffer: CaptureId,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    CmdDrawIndexed {
        command_buffer: CaptureId,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CmdDrawIndirect {
        command_buffer: CaptureId,
        buffer: CaptureId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    CmdDrawIndexedIndirect {
        command_buffer: CaptureId,
        buffer: CaptureId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    CmdDispatch {
        command_buffer: CaptureId,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },
    CmdDispatchIndirect {
        command_buffer: CaptureId,
        buffer: CaptureId,
        offset: u64,
    },
    CmdTraceRays {
        command_buffer: CaptureId,
        raygen_table: StridedDeviceAddressRegion,
        miss_table: StridedDeviceAddressRegion,
        hit_table: StridedDeviceAddressRegion,
        callable_table: StridedDeviceAddressRegion,
        width: u32,
        height: u32,
        depth: u32,
    },
    CmdExecuteCommands {
        command_buffer: CaptureId,
        command_buffers: Vec<CaptureId>,
    },

    // Queue operations
    QueueSubmit {
        queue: CaptureId,
        submits: Vec<SubmitInfo>,
        fence: CaptureId,
    },
    QueueWaitIdle {
        queue: CaptureId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMemoryBarrier {
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub old_layout: i32,
    pub new_layout: i32,
    pub image: CaptureId,
    pub aspect_mask: u32,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferMemoryBarrier {
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub buffer: CaptureId,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl VulkanCall {
    /// The command buffer this call records into, when it is a recorded
    /// command (vkCmd* or begin/end/reset of a recording).
    pub fn recording_target(&self) -> Option<CaptureId> {
        use VulkanCall::*;
        match self {
            CmdBeginRenderPass { command_buffer, .. }
            | CmdNextSubpass { command_buffer, .. }
            | CmdEndRenderPass { command_buffer }
            | CmdBeginRendering { command_buffer, .. }
            | CmdEndRendering { command_buffer }
            | CmdBindPipeline { command_buffer, .. }
            | CmdBindDescriptorSets { command_buffer, .. }
            | CmdBindVertexBuffers { command_buffer, .. }
            | CmdBindIndexBuffer { command_buffer, .. }
            | CmdSetViewport { command_buffer, .. }
            | CmdSetScissor { command_buffer, .. }
            | CmdPipelineBarrier { command_buffer, .. }
            | CmdCopyBuffer { command_buffer, .. }
            | CmdDraw { command_buffer, .. }
            | CmdDrawIndexed { command_buffer, .. }
            | CmdDrawIndirect { command_buffer, .. }
            | CmdDrawIndexedIndirect { command_buffer, .. }
            | CmdDispatch { command_buffer, .. }
            | CmdDispatchIndirect { command_buffer, .. }
            | CmdTraceRays { command_buffer, .. }
            | CmdExecuteCommands { command_buffer, .. } => Some(*command_buffer),
            _ => None,
        }
    }
}
