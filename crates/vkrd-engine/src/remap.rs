//! Capture-id to live-handle remapping shorthands. Unknown ids remap to the
//! null handle; captures legitimately reference trimmed or failed objects.

use ash::vk::{self, Handle};
use vkrd_core::ObjectTable;
use vkrd_protocol::{CaptureId, ObjectKind};

macro_rules! remap_fn {
    ($name:ident, $kind:ident, $ty:ty) => {
        pub(crate) fn $name(table: &ObjectTable, id: CaptureId) -> $ty {
            table
                .map_handle(ObjectKind::$kind, id)
                .map_or(<$ty>::null(), <$ty>::from_raw)
        }
    };
}

remap_fn!(queue, Queue, vk::Queue);
remap_fn!(command_pool, CommandPool, vk::CommandPool);
remap_fn!(command_buffer, CommandBuffer, vk::CommandBuffer);
remap_fn!(memory, DeviceMemory, vk::DeviceMemory);
remap_fn!(buffer, Buffer, vk::Buffer);
remap_fn!(image, Image, vk::Image);
remap_fn!(image_view, ImageView, vk::ImageView);
remap_fn!(sampler, Sampler, vk::Sampler);
remap_fn!(pipeline, Pipeline, vk::Pipeline);
remap_fn!(pipeline_layout, PipelineLayout, vk::PipelineLayout);
remap_fn!(pipeline_cache, PipelineCache, vk::PipelineCache);
remap_fn!(descriptor_set_layout, DescriptorSetLayout, vk::DescriptorSetLayout);
remap_fn!(descriptor_pool, DescriptorPool, vk::DescriptorPool);
remap_fn!(descriptor_set, DescriptorSet, vk::DescriptorSet);
remap_fn!(shader_module, ShaderModule, vk::ShaderModule);
remap_fn!(render_pass, RenderPass, vk::RenderPass);
remap_fn!(framebuffer, Framebuffer, vk::Framebuffer);
remap_fn!(fence, Fence, vk::Fence);
remap_fn!(semaphore, Semaphore, vk::Semaphore);
