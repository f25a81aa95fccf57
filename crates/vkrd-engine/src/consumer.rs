//! The replay consumer: dispatches decoded call records to real `ash` calls.
//!
//! Most records take the default path of remapping handle arguments through
//! the virtualization table, invoking the driver and registering outputs. A
//! small set of records have override handlers: instance/device creation
//! (GPU selection, extension filtering), two-call enumerations (count
//! adjustment), pipeline creation (async compilation, cache policy, shader
//! substitution) and everything routed to the dump engine.

use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::sync::Arc;

use ash::vk::{self, Handle};
use tracing::{debug, error, info, warn};
use vkrd_core::object_table::{
    BufferInfo, CommandBufferInfo, DescriptorSetInfo, DeviceMemoryInfo, EnumerationQuery,
    FramebufferInfo, ImageInfo, ImageViewInfo, PipelineInfo, RenderPassAttachmentInfo,
    RenderPassInfo, SubpassInfo, SwapchainInfo, VertexAttributeInfo, VertexBindingInfo,
};
use vkrd_core::{ObjectTable, ReplayOptions};
use vkrd_protocol::calls::{
    ComputePipelineCreateInfo, GraphicsPipelineCreateInfo, RenderPassCreateInfo,
};
use vkrd_protocol::{ApiCallInfo, CaptureId, ObjectKind, VulkanCall};

use crate::convert;
use crate::delegate::DumpDelegate;
use crate::device::DeviceContext;
use crate::dump::DumpEngine;
use crate::error::{vk_call, ReplayError};
use crate::remap;
use crate::worker::WorkerPool;

pub struct ReplayConsumer {
    entry: ash::Entry,
    instance: Option<ash::Instance>,
    physical_devices: Vec<vk::PhysicalDevice>,
    device: Option<Arc<DeviceContext>>,
    table: Arc<ObjectTable>,
    options: ReplayOptions,
    dump: DumpEngine,
    workers: Option<Arc<WorkerPool>>,
    /// Queue capture id -> queue family, for dump submissions
    queue_families: HashMap<CaptureId, u32>,
    /// Pipeline layout capture id -> its descriptor set layout ids
    layout_sets: HashMap<CaptureId, Vec<CaptureId>>,
    /// Offscreen images backing each virtual swapchain
    swapchain_backing: HashMap<CaptureId, Vec<(vk::Image, vk::DeviceMemory)>>,
}

impl ReplayConsumer {
    pub fn new(
        options: ReplayOptions,
        delegate: Box<dyn DumpDelegate>,
    ) -> Result<Self, ReplayError> {
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(e) => return Err(ReplayError::EntryLoad(e.to_string())),
        };
        let dump = DumpEngine::new(&options.dump, delegate);
        Ok(Self {
            entry,
            instance: None,
            physical_devices: Vec::new(),
            device: None,
            table: Arc::new(ObjectTable::new()),
            options,
            dump,
            workers: None,
            queue_families: HashMap::new(),
            layout_sets: HashMap::new(),
            swapchain_backing: HashMap::new(),
        })
    }

    pub fn table(&self) -> &Arc<ObjectTable> {
        &self.table
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    pub fn dump_engine(&self) -> &DumpEngine {
        &self.dump
    }

    fn ctx(&self) -> Result<Arc<DeviceContext>, ReplayError> {
        self.device.clone().ok_or(ReplayError::NoDevice)
    }

    fn physical(&self, id: CaptureId) -> vk::PhysicalDevice {
        self.table
            .map_handle(ObjectKind::PhysicalDevice, id)
            .map_or(vk::PhysicalDevice::null(), vk::PhysicalDevice::from_raw)
    }

    /// Block until an async-created pipeline is published.
    fn wait_pipeline(&self, id: CaptureId) {
        if self.table.is_pending(id) {
            if let Some(workers) = &self.workers {
                workers.wait(id);
            }
        }
    }

    pub fn process(&mut self, info: ApiCallInfo, call: &VulkanCall) -> Result<(), ReplayError> {
        use VulkanCall::*;
        match call {
            // ── instance / device lifetime ──────────────────────────────
            CreateInstance {
                app_name,
                api_version,
                instance,
            } => self.create_instance(app_name.as_deref(), *api_version, instance),
            DestroyInstance { .. } => {
                if let Some(instance) = self.instance.take() {
                    unsafe { instance.destroy_instance(None) };
                }
                self.physical_devices.clear();
                Ok(())
            }
            EnumeratePhysicalDevices {
                instance,
                capture_count,
                physical_devices,
                ..
            } => self.enumerate_physical_devices(*instance, *capture_count, physical_devices),
            GetPhysicalDeviceQueueFamilyProperties {
                physical_device, ..
            } => {
                let Some(wrapper) = &self.instance else {
                    return Err(ReplayError::NoDevice);
                };
                let pd = self.physical(*physical_device);
                let props = unsafe { wrapper.get_physical_device_queue_family_properties(pd) };
                self.table.record_enumeration(
                    *physical_device,
                    EnumerationQuery::QueueFamilyProperties,
                    props.len() as u32,
                );
                Ok(())
            }
            CreateDevice {
                physical_device,
                queue_create_infos,
                enabled_extensions,
                device,
            } => self.create_device(*physical_device, queue_create_infos, enabled_extensions, device),
            DestroyDevice { .. } => self.destroy_device(),
            GetDeviceQueue {
                queue_family_index,
                queue_index,
                queue,
                ..
            } => {
                let ctx = self.ctx()?;
                let handle =
                    unsafe { ctx.device.get_device_queue(*queue_family_index, *queue_index) };
                self.table
                    .add_handle(ObjectKind::Queue, queue.capture_id(), handle.as_raw());
                queue.set_output(handle.as_raw());
                self.queue_families
                    .insert(queue.capture_id(), *queue_family_index);
                Ok(())
            }
            DeviceWaitIdle { .. } => {
                let ctx = self.ctx()?;
                vk_call("vkDeviceWaitIdle", unsafe { ctx.device.device_wait_idle() })?;
                if let Some(workers) = &self.workers {
                    workers.drain_completed();
                }
                Ok(())
            }

            // ── memory ──────────────────────────────────────────────────
            AllocateMemory {
                allocation_size,
                memory_type_index,
                capture_property_flags,
                memory,
                ..
            } => {
                let ctx = self.ctx()?;
                // the capture's memory type indices are meaningless on the
                // replay device; pick one by captured property flags
                let flags = vk::MemoryPropertyFlags::from_raw(*capture_property_flags);
                let type_index = ctx
                    .find_memory_type(!0u32, flags)
                    .unwrap_or_else(|| {
                        (*memory_type_index).min(ctx.memory_properties.memory_type_count.saturating_sub(1))
                    });
                let alloc = vk::MemoryAllocateInfo::default()
                    .allocation_size(*allocation_size)
                    .memory_type_index(type_index);
                let handle = vk_call("vkAllocateMemory", unsafe {
                    ctx.device.allocate_memory(&alloc, None)
                })?;
                self.table.add_memory(
                    memory.capture_id(),
                    handle.as_raw(),
                    DeviceMemoryInfo {
                        allocation_size: *allocation_size,
                        memory_type_index: type_index,
                        property_flags: *capture_property_flags,
                    },
                );
                memory.set_output(handle.as_raw());
                Ok(())
            }
            FreeMemory { memory, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::memory(&self.table, *memory);
                unsafe { ctx.device.free_memory(handle, None) };
                self.table.remove_handle(ObjectKind::DeviceMemory, *memory);
                Ok(())
            }

            // ── buffers / images / views ────────────────────────────────
            CreateBuffer {
                create_info,
                buffer,
                ..
            } => {
                let ctx = self.ctx()?;
                let vk_info = vk::BufferCreateInfo::default()
                    .flags(vk::BufferCreateFlags::from_raw(create_info.flags))
                    .size(create_info.size)
                    .usage(vk::BufferUsageFlags::from_raw(create_info.usage))
                    .sharing_mode(vk::SharingMode::from_raw(create_info.sharing_mode))
                    .queue_family_indices(&create_info.queue_family_indices);
                let handle = vk_call("vkCreateBuffer", unsafe {
                    ctx.device.create_buffer(&vk_info, None)
                })?;
                self.table.add_buffer(
                    buffer.capture_id(),
                    handle.as_raw(),
                    BufferInfo {
                        size: create_info.size,
                        usage: create_info.usage,
                        memory_id: CaptureId::NULL,
                        memory_offset: 0,
                    },
                );
                buffer.set_output(handle.as_raw());
                Ok(())
            }
            DestroyBuffer { buffer, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::buffer(&self.table, *buffer);
                unsafe { ctx.device.destroy_buffer(handle, None) };
                self.table.remove_handle(ObjectKind::Buffer, *buffer);
                Ok(())
            }
            BindBufferMemory {
                buffer,
                memory,
                memory_offset,
                ..
            } => {
                let ctx = self.ctx()?;
                vk_call("vkBindBufferMemory", unsafe {
                    ctx.device.bind_buffer_memory(
                        remap::buffer(&self.table, *buffer),
                        remap::memory(&self.table, *memory),
                        *memory_offset,
                    )
                })?;
                if let Some(mut bi) = self.table.buffer_info_mut(*buffer) {
                    bi.memory_id = *memory;
                    bi.memory_offset = *memory_offset;
                }
                Ok(())
            }
            CreateImage {
                create_info, image, ..
            } => {
                let ctx = self.ctx()?;
                let vk_info = vk::ImageCreateInfo::default()
                    .flags(vk::ImageCreateFlags::from_raw(create_info.flags))
                    .image_type(vk::ImageType::from_raw(create_info.image_type))
                    .format(vk::Format::from_raw(create_info.format))
                    .extent(vk::Extent3D {
                        width: create_info.extent.width,
                        height: create_info.extent.height,
                        depth: create_info.extent.depth,
                    })
                    .mip_levels(create_info.mip_levels)
                    .array_layers(create_info.array_layers)
                    .samples(vk::SampleCountFlags::from_raw(create_info.samples))
                    .tiling(vk::ImageTiling::from_raw(create_info.tiling))
                    .usage(vk::ImageUsageFlags::from_raw(create_info.usage))
                    .sharing_mode(vk::SharingMode::from_raw(create_info.sharing_mode))
                    .queue_family_indices(&create_info.queue_family_indices)
                    .initial_layout(vk::ImageLayout::from_raw(create_info.initial_layout));
                let handle = vk_call("vkCreateImage", unsafe {
                    ctx.device.create_image(&vk_info, None)
                })?;
                self.table.add_image(
                    image.capture_id(),
                    handle.as_raw(),
                    ImageInfo {
                        image_type: create_info.image_type,
                        format: create_info.format,
                        extent: [
                            create_info.extent.width,
                            create_info.extent.height,
                            create_info.extent.depth,
                        ],
                        mip_levels: create_info.mip_levels,
                        array_layers: create_info.array_layers,
                        samples: create_info.samples,
                        tiling: create_info.tiling,
                        usage: create_info.usage,
                        current_layout: create_info.initial_layout,
                        queue_family_index: 0,
                    },
                );
                image.set_output(handle.as_raw());
                Ok(())
            }
            DestroyImage { image, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::image(&self.table, *image);
                unsafe { ctx.device.destroy_image(handle, None) };
                self.table.remove_handle(ObjectKind::Image, *image);
                Ok(())
            }
            BindImageMemory {
                image,
                memory,
                memory_offset,
                ..
            } => {
                let ctx = self.ctx()?;
                vk_call("vkBindImageMemory", unsafe {
                    ctx.device.bind_image_memory(
                        remap::image(&self.table, *image),
                        remap::memory(&self.table, *memory),
                        *memory_offset,
                    )
                })
            }
            CreateImageView {
                create_info, view, ..
            } => {
                let ctx = self.ctx()?;
                let vk_info = vk::ImageViewCreateInfo::default()
                    .image(remap::image(&self.table, create_info.image))
                    .view_type(vk::ImageViewType::from_raw(create_info.view_type))
                    .format(vk::Format::from_raw(create_info.format))
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::from_raw(create_info.aspect_mask))
                            .base_mip_level(create_info.base_mip_level)
                            .level_count(create_info.level_count)
                            .base_array_layer(create_info.base_array_layer)
                            .layer_count(create_info.layer_count),
                    );
                let handle = vk_call("vkCreateImageView", unsafe {
                    ctx.device.create_image_view(&vk_info, None)
                })?;
                self.table.add_image_view(
                    view.capture_id(),
                    handle.as_raw(),
                    ImageViewInfo {
                        image_id: create_info.image,
                        format: create_info.format,
                        aspect_mask: create_info.aspect_mask,
                        base_mip_level: create_info.base_mip_level,
                        level_count: create_info.level_count,
                        base_array_layer: create_info.base_array_layer,
                        layer_count: create_info.layer_count,
                    },
                );
                view.set_output(handle.as_raw());
                Ok(())
            }
            DestroyImageView { view, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::image_view(&self.table, *view);
                unsafe { ctx.device.destroy_image_view(handle, None) };
                self.table.remove_handle(ObjectKind::ImageView, *view);
                Ok(())
            }

            // ── render pass / framebuffer ───────────────────────────────
            CreateRenderPass {
                create_info,
                render_pass,
                ..
            } => {
                let ctx = self.ctx()?;
                let handle = create_render_pass(&ctx, create_info)?;
                self.table.add_render_pass(
                    render_pass.capture_id(),
                    handle.as_raw(),
                    render_pass_record(create_info),
                );
                render_pass.set_output(handle.as_raw());
                Ok(())
            }
            DestroyRenderPass { render_pass, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::render_pass(&self.table, *render_pass);
                unsafe { ctx.device.destroy_render_pass(handle, None) };
                self.table.remove_handle(ObjectKind::RenderPass, *render_pass);
                Ok(())
            }
            CreateFramebuffer {
                create_info,
                framebuffer,
                ..
            } => {
                let ctx = self.ctx()?;
                let imageless = create_info.flags & vk::FramebufferCreateFlags::IMAGELESS.as_raw() != 0;
                let views: Vec<vk::ImageView> = create_info
                    .attachments
                    .iter()
                    .map(|id| remap::image_view(&self.table, *id))
                    .collect();
                let mut vk_info = vk::FramebufferCreateInfo::default()
                    .flags(vk::FramebufferCreateFlags::from_raw(create_info.flags))
                    .render_pass(remap::render_pass(&self.table, create_info.render_pass))
                    .width(create_info.width)
                    .height(create_info.height)
                    .layers(create_info.layers);
                if !imageless {
                    vk_info = vk_info.attachments(&views);
                }
                let handle = vk_call("vkCreateFramebuffer", unsafe {
                    ctx.device.create_framebuffer(&vk_info, None)
                })?;
                self.table.add_framebuffer(
                    framebuffer.capture_id(),
                    handle.as_raw(),
                    FramebufferInfo {
                        render_pass_id: create_info.render_pass,
                        attachment_ids: create_info.attachments.clone(),
                        imageless,
                        width: create_info.width,
                        height: create_info.height,
                        layers: create_info.layers,
                    },
                );
                framebuffer.set_output(handle.as_raw());
                Ok(())
            }
            DestroyFramebuffer { framebuffer, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::framebuffer(&self.table, *framebuffer);
                unsafe { ctx.device.destroy_framebuffer(handle, None) };
                self.table.remove_handle(ObjectKind::Framebuffer, *framebuffer);
                Ok(())
            }

            // ── shaders / pipelines ─────────────────────────────────────
            CreateShaderModule { code, module, .. } => {
                let ctx = self.ctx()?;
                let bytes = match self.options.shader_replacement_for(module.capture_id().0) {
                    Some(path) => {
                        info!(shader = module.capture_id().0, path, "substituting shader module");
                        std::fs::read(path).map_err(|source| ReplayError::ShaderReplacement {
                            path: path.to_string(),
                            source,
                        })?
                    }
                    None => code.clone(),
                };
                let words = spirv_words(&bytes);
                let vk_info = vk::ShaderModuleCreateInfo::default().code(&words);
                let handle = vk_call("vkCreateShaderModule", unsafe {
                    ctx.device.create_shader_module(&vk_info, None)
                })?;
                self.table
                    .add_handle(ObjectKind::ShaderModule, module.capture_id(), handle.as_raw());
                module.set_output(handle.as_raw());
                Ok(())
            }
            DestroyShaderModule { module, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::shader_module(&self.table, *module);
                unsafe { ctx.device.destroy_shader_module(handle, None) };
                self.table.remove_handle(ObjectKind::ShaderModule, *module);
                Ok(())
            }
            CreatePipelineCache {
                initial_data,
                cache,
                ..
            } => self.create_pipeline_cache(initial_data, cache),
            DestroyPipelineCache { cache, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::pipeline_cache(&self.table, *cache);
                unsafe { ctx.device.destroy_pipeline_cache(handle, None) };
                self.table.remove_handle(ObjectKind::PipelineCache, *cache);
                Ok(())
            }
            CreatePipelineLayout {
                set_layouts,
                push_constant_ranges,
                layout,
                ..
            } => {
                let ctx = self.ctx()?;
                let vk_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
                    .iter()
                    .map(|id| remap::descriptor_set_layout(&self.table, *id))
                    .collect();
                let ranges: Vec<vk::PushConstantRange> = push_constant_ranges
                    .iter()
                    .map(|r| {
                        vk::PushConstantRange::default()
                            .stage_flags(vk::ShaderStageFlags::from_raw(r.stage_flags))
                            .offset(r.offset)
                            .size(r.size)
                    })
                    .collect();
                let vk_info = vk::PipelineLayoutCreateInfo::default()
                    .set_layouts(&vk_layouts)
                    .push_constant_ranges(&ranges);
                let handle = vk_call("vkCreatePipelineLayout", unsafe {
                    ctx.device.create_pipeline_layout(&vk_info, None)
                })?;
                self.table
                    .add_handle(ObjectKind::PipelineLayout, layout.capture_id(), handle.as_raw());
                self.layout_sets.insert(layout.capture_id(), set_layouts.clone());
                layout.set_output(handle.as_raw());
                Ok(())
            }
            DestroyPipelineLayout { layout, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::pipeline_layout(&self.table, *layout);
                unsafe { ctx.device.destroy_pipeline_layout(handle, None) };
                self.table.remove_handle(ObjectKind::PipelineLayout, *layout);
                self.layout_sets.remove(layout);
                Ok(())
            }
            CreateGraphicsPipelines {
                pipeline_cache,
                create_infos,
                pipelines,
                ..
            } => self.create_graphics_pipelines(*pipeline_cache, create_infos, pipelines),
            CreateComputePipelines {
                pipeline_cache,
                create_infos,
                pipelines,
                ..
            } => self.create_compute_pipelines(*pipeline_cache, create_infos, pipelines),
            DestroyPipeline { pipeline, .. } => {
                self.wait_pipeline(*pipeline);
                let ctx = self.ctx()?;
                let handle = remap::pipeline(&self.table, *pipeline);
                unsafe { ctx.device.destroy_pipeline(handle, None) };
                self.table.remove_handle(ObjectKind::Pipeline, *pipeline);
                Ok(())
            }

            // ── descriptors ─────────────────────────────────────────────
            CreateDescriptorSetLayout {
                bindings, layout, ..
            } => {
                let ctx = self.ctx()?;
                let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
                    .iter()
                    .map(|b| {
                        vk::DescriptorSetLayoutBinding::default()
                            .binding(b.binding)
                            .descriptor_type(vk::DescriptorType::from_raw(b.descriptor_type))
                            .descriptor_count(b.descriptor_count)
                            .stage_flags(vk::ShaderStageFlags::from_raw(b.stage_flags))
                    })
                    .collect();
                let vk_info =
                    vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
                let handle = vk_call("vkCreateDescriptorSetLayout", unsafe {
                    ctx.device.create_descriptor_set_layout(&vk_info, None)
                })?;
                self.table.add_handle(
                    ObjectKind::DescriptorSetLayout,
                    layout.capture_id(),
                    handle.as_raw(),
                );
                layout.set_output(handle.as_raw());
                Ok(())
            }
            DestroyDescriptorSetLayout { layout, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::descriptor_set_layout(&self.table, *layout);
                unsafe { ctx.device.destroy_descriptor_set_layout(handle, None) };
                self.table
                    .remove_handle(ObjectKind::DescriptorSetLayout, *layout);
                Ok(())
            }
            CreateDescriptorPool {
                max_sets,
                pool_sizes,
                flags,
                pool,
                ..
            } => {
                let ctx = self.ctx()?;
                let sizes: Vec<vk::DescriptorPoolSize> = pool_sizes
                    .iter()
                    .map(|s| {
                        vk::DescriptorPoolSize::default()
                            .ty(vk::DescriptorType::from_raw(s.descriptor_type))
                            .descriptor_count(s.descriptor_count)
                    })
                    .collect();
                let vk_info = vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::from_raw(*flags))
                    .max_sets(*max_sets)
                    .pool_sizes(&sizes);
                let handle = vk_call("vkCreateDescriptorPool", unsafe {
                    ctx.device.create_descriptor_pool(&vk_info, None)
                })?;
                self.table.add_descriptor_pool(pool.capture_id(), handle.as_raw());
                pool.set_output(handle.as_raw());
                Ok(())
            }
            DestroyDescriptorPool { pool, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::descriptor_pool(&self.table, *pool);
                unsafe { ctx.device.destroy_descriptor_pool(handle, None) };
                self.table.remove_handle(ObjectKind::DescriptorPool, *pool);
                Ok(())
            }
            AllocateDescriptorSets {
                descriptor_pool,
                set_layouts,
                descriptor_sets,
                ..
            } => {
                let ctx = self.ctx()?;
                let vk_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
                    .iter()
                    .map(|id| remap::descriptor_set_layout(&self.table, *id))
                    .collect();
                let alloc = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(remap::descriptor_pool(&self.table, *descriptor_pool))
                    .set_layouts(&vk_layouts);
                let handles = vk_call("vkAllocateDescriptorSets", unsafe {
                    ctx.device.allocate_descriptor_sets(&alloc)
                })?;
                for (decoder, handle) in descriptor_sets.iter().zip(&handles) {
                    self.table.add_descriptor_set(
                        decoder.capture_id(),
                        handle.as_raw(),
                        DescriptorSetInfo {
                            pool_id: *descriptor_pool,
                            bindings: HashMap::new(),
                        },
                    );
                    decoder.set_output(handle.as_raw());
                }
                Ok(())
            }
            FreeDescriptorSets {
                descriptor_pool,
                descriptor_sets,
                ..
            } => {
                let ctx = self.ctx()?;
                let handles: Vec<vk::DescriptorSet> = descriptor_sets
                    .iter()
                    .map(|id| remap::descriptor_set(&self.table, *id))
                    .collect();
                vk_call("vkFreeDescriptorSets", unsafe {
                    ctx.device.free_descriptor_sets(
                        remap::descriptor_pool(&self.table, *descriptor_pool),
                        &handles,
                    )
                })?;
                self.table
                    .remove_handles(ObjectKind::DescriptorSet, descriptor_sets);
                Ok(())
            }
            UpdateDescriptorSets { writes, .. } => self.update_descriptor_sets(writes),

            // ── synchronization objects ─────────────────────────────────
            CreateFence {
                signaled, fence, ..
            } => {
                let ctx = self.ctx()?;
                let flags = if *signaled {
                    vk::FenceCreateFlags::SIGNALED
                } else {
                    vk::FenceCreateFlags::empty()
                };
                let vk_info = vk::FenceCreateInfo::default().flags(flags);
                let handle = vk_call("vkCreateFence", unsafe {
                    ctx.device.create_fence(&vk_info, None)
                })?;
                self.table
                    .add_handle(ObjectKind::Fence, fence.capture_id(), handle.as_raw());
                fence.set_output(handle.as_raw());
                Ok(())
            }
            DestroyFence { fence, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::fence(&self.table, *fence);
                unsafe { ctx.device.destroy_fence(handle, None) };
                self.table.remove_handle(ObjectKind::Fence, *fence);
                Ok(())
            }
            CreateSemaphore { semaphore, .. } => {
                let ctx = self.ctx()?;
                let handle = vk_call("vkCreateSemaphore", unsafe {
                    ctx.device
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                })?;
                self.table
                    .add_handle(ObjectKind::Semaphore, semaphore.capture_id(), handle.as_raw());
                semaphore.set_output(handle.as_raw());
                Ok(())
            }
            DestroySemaphore { semaphore, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::semaphore(&self.table, *semaphore);
                unsafe { ctx.device.destroy_semaphore(handle, None) };
                self.table.remove_handle(ObjectKind::Semaphore, *semaphore);
                Ok(())
            }
            WaitForFences {
                fences,
                wait_all,
                timeout,
                ..
            } => {
                let ctx = self.ctx()?;
                let handles: Vec<vk::Fence> = fences
                    .iter()
                    .map(|id| remap::fence(&self.table, *id))
                    .collect();
                vk_call("vkWaitForFences", unsafe {
                    ctx.device.wait_for_fences(&handles, *wait_all, *timeout)
                })
            }
            ResetFences { fences, .. } => {
                let ctx = self.ctx()?;
                let handles: Vec<vk::Fence> = fences
                    .iter()
                    .map(|id| remap::fence(&self.table, *id))
                    .collect();
                vk_call("vkResetFences", unsafe { ctx.device.reset_fences(&handles) })
            }

            // ── swapchain (virtual, surfaceless) ────────────────────────
            CreateSwapchain {
                create_info,
                swapchain,
                ..
            } => {
                // no surface exists at replay; swapchain images are plain
                // offscreen images created lazily at the image query
                debug!(swapchain = swapchain.capture_id().0, "creating virtual swapchain");
                self.table.add_swapchain(
                    swapchain.capture_id(),
                    swapchain.capture_id().0,
                    SwapchainInfo {
                        format: create_info.image_format,
                        extent: create_info.image_extent,
                        image_ids: Vec::new(),
                    },
                );
                swapchain.set_output(swapchain.capture_id().0);
                Ok(())
            }
            DestroySwapchain { swapchain, .. } => {
                let ctx = self.ctx()?;
                if let Some(backing) = self.swapchain_backing.remove(swapchain) {
                    for (image, memory) in backing {
                        unsafe {
                            ctx.device.destroy_image(image, None);
                            ctx.device.free_memory(memory, None);
                        }
                    }
                }
                if let Some(info) = self.table.swapchain_info(*swapchain) {
                    for id in info.image_ids {
                        self.table.remove_handle(ObjectKind::Image, id);
                    }
                }
                self.table.remove_handle(ObjectKind::Swapchain, *swapchain);
                Ok(())
            }
            GetSwapchainImages {
                swapchain,
                capture_count,
                images,
                ..
            } => self.get_swapchain_images(*swapchain, *capture_count, images),

            // ── command pools / buffers ─────────────────────────────────
            CreateCommandPool {
                flags,
                queue_family_index,
                pool,
                ..
            } => {
                let ctx = self.ctx()?;
                let vk_info = vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::from_raw(*flags))
                    .queue_family_index(*queue_family_index);
                let handle = vk_call("vkCreateCommandPool", unsafe {
                    ctx.device.create_command_pool(&vk_info, None)
                })?;
                self.table
                    .add_command_pool(pool.capture_id(), handle.as_raw(), *queue_family_index);
                pool.set_output(handle.as_raw());
                Ok(())
            }
            DestroyCommandPool { pool, .. } => {
                let ctx = self.ctx()?;
                let handle = remap::command_pool(&self.table, *pool);
                unsafe { ctx.device.destroy_command_pool(handle, None) };
                self.table.remove_handle(ObjectKind::CommandPool, *pool);
                Ok(())
            }
            AllocateCommandBuffers {
                command_pool,
                level,
                command_buffers,
                ..
            } => {
                let ctx = self.ctx()?;
                let alloc = vk::CommandBufferAllocateInfo::default()
                    .command_pool(remap::command_pool(&self.table, *command_pool))
                    .level(vk::CommandBufferLevel::from_raw(*level))
                    .command_buffer_count(command_buffers.len() as u32);
                let handles = vk_call("vkAllocateCommandBuffers", unsafe {
                    ctx.device.allocate_command_buffers(&alloc)
                })?;
                for (decoder, handle) in command_buffers.iter().zip(&handles) {
                    self.table.add_command_buffer(
                        decoder.capture_id(),
                        handle.as_raw(),
                        CommandBufferInfo {
                            pool_id: *command_pool,
                            level: *level,
                            begin_index: 0,
                            executed_secondaries: Vec::new(),
                        },
                    );
                    decoder.set_output(handle.as_raw());
                }
                Ok(())
            }
            FreeCommandBuffers {
                command_pool,
                command_buffers,
                ..
            } => {
                let ctx = self.ctx()?;
                for id in command_buffers {
                    self.dump.reset_command_buffer(Some(&ctx), *id);
                }
                let handles: Vec<vk::CommandBuffer> = command_buffers
                    .iter()
                    .map(|id| remap::command_buffer(&self.table, *id))
                    .collect();
                unsafe {
                    ctx.device.free_command_buffers(
                        remap::command_pool(&self.table, *command_pool),
                        &handles,
                    );
                }
                self.table
                    .remove_handles(ObjectKind::CommandBuffer, command_buffers);
                Ok(())
            }
            BeginCommandBuffer {
                command_buffer,
                begin_info,
            } => {
                if let Some(mut cbi) = self.table.command_buffer_info_mut(*command_buffer) {
                    cbi.begin_index = info.index;
                }
                let ctx = self.ctx()?;
                let table = Arc::clone(&self.table);
                if self
                    .dump
                    .begin_command_buffer(&ctx, &table, info.index, *command_buffer, begin_info)?
                {
                    return Ok(());
                }
                let mut inherit = vk::CommandBufferInheritanceInfo::default();
                if !begin_info.inheritance_render_pass.is_null() {
                    inherit = inherit
                        .render_pass(remap::render_pass(&self.table, begin_info.inheritance_render_pass))
                        .subpass(begin_info.inheritance_subpass)
                        .framebuffer(remap::framebuffer(
                            &self.table,
                            begin_info.inheritance_framebuffer,
                        ));
                }
                let vk_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::from_raw(begin_info.flags))
                    .inheritance_info(&inherit);
                vk_call("vkBeginCommandBuffer", unsafe {
                    ctx.device.begin_command_buffer(
                        remap::command_buffer(&self.table, *command_buffer),
                        &vk_info,
                    )
                })
            }
            EndCommandBuffer { command_buffer } => {
                let ctx = self.ctx()?;
                if self.dump.end_command_buffer(&ctx, *command_buffer)? {
                    return Ok(());
                }
                vk_call("vkEndCommandBuffer", unsafe {
                    ctx.device
                        .end_command_buffer(remap::command_buffer(&self.table, *command_buffer))
                })
            }
            ResetCommandBuffer {
                command_buffer,
                flags,
            } => {
                let ctx = self.ctx()?;
                self.dump.reset_command_buffer(Some(&ctx), *command_buffer);
                vk_call("vkResetCommandBuffer", unsafe {
                    ctx.device.reset_command_buffer(
                        remap::command_buffer(&self.table, *command_buffer),
                        vk::CommandBufferResetFlags::from_raw(*flags),
                    )
                })
            }

            // ── queue operations ────────────────────────────────────────
            QueueSubmit {
                queue,
                submits,
                fence,
            } => {
                let ctx = self.ctx()?;
                let table = Arc::clone(&self.table);
                let vk_queue = remap::queue(&self.table, *queue);
                let vk_fence = remap::fence(&self.table, *fence);
                if self.dump.must_dump_submit(info.index, submits) {
                    let queue_family = self.queue_families.get(queue).copied().unwrap_or(0);
                    return self.dump.queue_submit(
                        &ctx,
                        &table,
                        info.index,
                        vk_queue,
                        queue_family,
                        submits,
                        vk_fence,
                    );
                }
                // default path: remap and submit as captured
                struct Decoded {
                    wait: Vec<vk::Semaphore>,
                    wait_stages: Vec<vk::PipelineStageFlags>,
                    cbs: Vec<vk::CommandBuffer>,
                    signal: Vec<vk::Semaphore>,
                }
                let decoded: Vec<Decoded> = submits
                    .iter()
                    .map(|s| Decoded {
                        wait: s
                            .wait_semaphores
                            .iter()
                            .map(|id| remap::semaphore(&self.table, *id))
                            .collect(),
                        wait_stages: s
                            .wait_dst_stage_masks
                            .iter()
                            .map(|m| vk::PipelineStageFlags::from_raw(*m))
                            .collect(),
                        cbs: s
                            .command_buffers
                            .iter()
                            .map(|id| remap::command_buffer(&self.table, *id))
                            .collect(),
                        signal: s
                            .signal_semaphores
                            .iter()
                            .map(|id| remap::semaphore(&self.table, *id))
                            .collect(),
                    })
                    .collect();
                let infos: Vec<vk::SubmitInfo> = decoded
                    .iter()
                    .map(|d| {
                        vk::SubmitInfo::default()
                            .wait_semaphores(&d.wait)
                            .wait_dst_stage_mask(&d.wait_stages)
                            .command_buffers(&d.cbs)
                            .signal_semaphores(&d.signal)
                    })
                    .collect();
                vk_call("vkQueueSubmit", unsafe {
                    ctx.device.queue_submit(vk_queue, &infos, vk_fence)
                })
            }
            QueueWaitIdle { queue } => {
                let ctx = self.ctx()?;
                vk_call("vkQueueWaitIdle", unsafe {
                    ctx.device.queue_wait_idle(remap::queue(&self.table, *queue))
                })
            }

            // ── recorded commands ───────────────────────────────────────
            _ => self.process_command(info, call),
        }
    }

    /// Recorded commands: routed to the dump engine for intercepted
    /// recordings, forwarded verbatim otherwise.
    fn process_command(&mut self, info: ApiCallInfo, call: &VulkanCall) -> Result<(), ReplayError> {
        let Some(cb_id) = call.recording_target() else {
            warn!(index = info.index, "unhandled call record");
            return Ok(());
        };
        // async pipelines must be published before a bind dereferences them
        if let VulkanCall::CmdBindPipeline { pipeline, .. } = call {
            self.wait_pipeline(*pipeline);
        }
        let ctx = self.ctx()?;
        if self.dump.is_recording(cb_id) {
            let table = Arc::clone(&self.table);
            return self.dump.process(&ctx, &table, info.index, call);
        }
        self.forward_command(&ctx, call)
    }

    fn forward_command(&self, ctx: &DeviceContext, call: &VulkanCall) -> Result<(), ReplayError> {
        use VulkanCall::*;
        let table = &self.table;
        let device = &ctx.device;
        let Some(cb_id) = call.recording_target() else {
            return Ok(());
        };
        let cb = remap::command_buffer(table, cb_id);
        match call {
            CmdBeginRenderPass {
                begin_info,
                contents,
                ..
            } => {
                let clear_values: Vec<vk::ClearValue> = begin_info
                    .clear_values
                    .iter()
                    .map(convert::clear_value)
                    .collect();
                let views: Vec<vk::ImageView> = begin_info
                    .imageless_attachments
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .map(|id| remap::image_view(table, *id))
                    .collect();
                let mut attach_begin =
                    vk::RenderPassAttachmentBeginInfo::default().attachments(&views);
                let mut vk_info = vk::RenderPassBeginInfo::default()
                    .render_pass(remap::render_pass(table, begin_info.render_pass))
                    .framebuffer(remap::framebuffer(table, begin_info.framebuffer))
                    .render_area(convert::rect2d(&begin_info.render_area))
                    .clear_values(&clear_values);
                if begin_info.imageless_attachments.is_some() {
                    vk_info = vk_info.push_next(&mut attach_begin);
                }
                unsafe {
                    device.cmd_begin_render_pass(
                        cb,
                        &vk_info,
                        vk::SubpassContents::from_raw(*contents),
                    );
                }
            }
            CmdNextSubpass { contents, .. } => unsafe {
                device.cmd_next_subpass(cb, vk::SubpassContents::from_raw(*contents));
            },
            CmdEndRenderPass { .. } => unsafe { device.cmd_end_render_pass(cb) },
            CmdBeginRendering { rendering_info, .. } => {
                let attachment = |a: &vkrd_protocol::calls::RenderingAttachmentInfo| {
                    let mut out = vk::RenderingAttachmentInfo::default()
                        .image_view(remap::image_view(table, a.image_view))
                        .image_layout(vk::ImageLayout::from_raw(a.image_layout))
                        .load_op(vk::AttachmentLoadOp::from_raw(a.load_op))
                        .store_op(vk::AttachmentStoreOp::from_raw(a.store_op));
                    if let Some(clear) = &a.clear_value {
                        out = out.clear_value(convert::clear_value(clear));
                    }
                    out
                };
                let colors: Vec<vk::RenderingAttachmentInfo> = rendering_info
                    .color_attachments
                    .iter()
                    .map(attachment)
                    .collect();
                let depth = rendering_info.depth_attachment.as_ref().map(attachment);
                let stencil = rendering_info.stencil_attachment.as_ref().map(attachment);
                let mut vk_info = vk::RenderingInfo::default()
                    .flags(vk::RenderingFlags::from_raw(rendering_info.flags))
                    .render_area(convert::rect2d(&rendering_info.render_area))
                    .layer_count(rendering_info.layer_count)
                    .view_mask(rendering_info.view_mask)
                    .color_attachments(&colors);
                if let Some(d) = depth.as_ref() {
                    vk_info = vk_info.depth_attachment(d);
                }
                if let Some(s) = stencil.as_ref() {
                    vk_info = vk_info.stencil_attachment(s);
                }
                unsafe { device.cmd_begin_rendering(cb, &vk_info) };
            }
            CmdEndRendering { .. } => unsafe { device.cmd_end_rendering(cb) },
            CmdBindPipeline {
                pipeline_bind_point,
                pipeline,
                ..
            } => unsafe {
                device.cmd_bind_pipeline(
                    cb,
                    vk::PipelineBindPoint::from_raw(*pipeline_bind_point),
                    remap::pipeline(table, *pipeline),
                );
            },
            CmdBindDescriptorSets {
                pipeline_bind_point,
                layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
                ..
            } => {
                let sets: Vec<vk::DescriptorSet> = descriptor_sets
                    .iter()
                    .map(|id| remap::descriptor_set(table, *id))
                    .collect();
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cb,
                        vk::PipelineBindPoint::from_raw(*pipeline_bind_point),
                        remap::pipeline_layout(table, *layout),
                        *first_set,
                        &sets,
                        dynamic_offsets,
                    );
                }
            }
            CmdBindVertexBuffers {
                first_binding,
                buffers,
                offsets,
                ..
            } => {
                let handles: Vec<vk::Buffer> =
                    buffers.iter().map(|id| remap::buffer(table, *id)).collect();
                unsafe { device.cmd_bind_vertex_buffers(cb, *first_binding, &handles, offsets) };
            }
            CmdBindIndexBuffer {
                buffer,
                offset,
                index_type,
                ..
            } => unsafe {
                device.cmd_bind_index_buffer(
                    cb,
                    remap::buffer(table, *buffer),
                    *offset,
                    vk::IndexType::from_raw(*index_type),
                );
            },
            CmdSetViewport {
                first_viewport,
                viewports,
                ..
            } => {
                let vps: Vec<vk::Viewport> = viewports.iter().map(convert::viewport).collect();
                unsafe { device.cmd_set_viewport(cb, *first_viewport, &vps) };
            }
            CmdSetScissor {
                first_scissor,
                scissors,
                ..
            } => {
                let rects: Vec<vk::Rect2D> = scissors.iter().map(convert::rect2d).collect();
                unsafe { device.cmd_set_scissor(cb, *first_scissor, &rects) };
            }
            CmdPipelineBarrier {
                src_stage_mask,
                dst_stage_mask,
                image_barriers,
                buffer_barriers,
                ..
            } => {
                let image: Vec<vk::ImageMemoryBarrier> = image_barriers
                    .iter()
                    .map(|b| convert::image_barrier(table, b))
                    .collect();
                let buffer: Vec<vk::BufferMemoryBarrier> = buffer_barriers
                    .iter()
                    .map(|b| convert::buffer_barrier(table, b))
                    .collect();
                unsafe {
                    device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::from_raw(*src_stage_mask),
                        vk::PipelineStageFlags::from_raw(*dst_stage_mask),
                        vk::DependencyFlags::empty(),
                        &[],
                        &buffer,
                        &image,
                    );
                }
                for b in image_barriers {
                    if let Some(mut info) = table.image_info_mut(b.image) {
                        info.current_layout = b.new_layout;
                    }
                }
            }
            CmdCopyBuffer {
                src_buffer,
                dst_buffer,
                regions,
                ..
            } => {
                let copies: Vec<vk::BufferCopy> = regions
                    .iter()
                    .map(|r| {
                        vk::BufferCopy::default()
                            .src_offset(r.src_offset)
                            .dst_offset(r.dst_offset)
                            .size(r.size)
                    })
                    .collect();
                unsafe {
                    device.cmd_copy_buffer(
                        cb,
                        remap::buffer(table, *src_buffer),
                        remap::buffer(table, *dst_buffer),
                        &copies,
                    );
                }
            }
            CmdDraw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
                ..
            } => unsafe {
                device.cmd_draw(cb, *vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            CmdDrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
                ..
            } => unsafe {
                device.cmd_draw_indexed(
                    cb,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            },
            CmdDrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
                ..
            } => unsafe {
                device.cmd_draw_indirect(cb, remap::buffer(table, *buffer), *offset, *draw_count, *stride);
            },
            CmdDrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
                ..
            } => unsafe {
                device.cmd_draw_indexed_indirect(
                    cb,
                    remap::buffer(table, *buffer),
                    *offset,
                    *draw_count,
                    *stride,
                );
            },
            CmdDispatch {
                group_count_x,
                group_count_y,
                group_count_z,
                ..
            } => unsafe {
                device.cmd_dispatch(cb, *group_count_x, *group_count_y, *group_count_z);
            },
            CmdDispatchIndirect { buffer, offset, .. } => unsafe {
                device.cmd_dispatch_indirect(cb, remap::buffer(table, *buffer), *offset);
            },
            CmdTraceRays {
                raygen_table,
                miss_table,
                hit_table,
                callable_table,
                width,
                height,
                depth,
                ..
            } => {
                let Some(rt) = ctx.ray_tracing.as_ref() else {
                    warn!("trace rays replayed without the ray tracing extension");
                    return Ok(());
                };
                let region = |r: &vkrd_protocol::calls::StridedDeviceAddressRegion| {
                    vk::StridedDeviceAddressRegionKHR::default()
                        .device_address(r.device_address)
                        .stride(r.stride)
                        .size(r.size)
                };
                unsafe {
                    rt.cmd_trace_rays(
                        cb,
                        &region(raygen_table),
                        &region(miss_table),
                        &region(hit_table),
                        &region(callable_table),
                        *width,
                        *height,
                        *depth,
                    );
                }
            }
            CmdExecuteCommands {
                command_buffers, ..
            } => {
                if let Some(mut cbi) = table.command_buffer_info_mut(cb_id) {
                    cbi.executed_secondaries = command_buffers.clone();
                }
                let handles: Vec<vk::CommandBuffer> = command_buffers
                    .iter()
                    .map(|id| remap::command_buffer(table, *id))
                    .collect();
                unsafe { device.cmd_execute_commands(cb, &handles) };
            }
            _ => {}
        }
        Ok(())
    }

    // ── override handlers ───────────────────────────────────────────────

    fn create_instance(
        &mut self,
        app_name: Option<&str>,
        api_version: u32,
        decoder: &vkrd_protocol::handle::HandleDecoder,
    ) -> Result<(), ReplayError> {
        let name = app_name
            .and_then(|n| CString::new(n).ok())
            .unwrap_or_else(|| CString::from(c"vkrd-replay"));
        let app_info = vk::ApplicationInfo::default()
            .application_name(name.as_c_str())
            .api_version(api_version);
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = match unsafe { self.entry.create_instance(&create_info, None) } {
            Ok(instance) => instance,
            Err(result) => {
                error!(?result, "instance creation failed");
                return Err(ReplayError::Device {
                    call: "vkCreateInstance",
                    result,
                });
            }
        };
        info!(api_version, "replay instance created");
        self.table.add_handle(
            ObjectKind::Instance,
            decoder.capture_id(),
            instance.handle().as_raw(),
        );
        decoder.set_output(instance.handle().as_raw());
        self.instance = Some(instance);
        Ok(())
    }

    /// Count-adjusting override: the replay machine rarely has the same
    /// device count as the capture machine. Capture ids map onto the replay
    /// array index-wise, clamped to the last device; the replay count is
    /// recorded so later queries stay consistent.
    fn enumerate_physical_devices(
        &mut self,
        instance_id: CaptureId,
        capture_count: u32,
        decoders: &[vkrd_protocol::handle::HandleDecoder],
    ) -> Result<(), ReplayError> {
        let Some(instance) = &self.instance else {
            return Err(ReplayError::NoDevice);
        };
        let devices = vk_call("vkEnumeratePhysicalDevices", unsafe {
            instance.enumerate_physical_devices()
        })?;
        if devices.len() as u32 != capture_count {
            warn!(
                capture = capture_count,
                replay = devices.len(),
                "physical device count differs from capture"
            );
        }
        self.table.record_enumeration(
            instance_id,
            EnumerationQuery::PhysicalDevices,
            devices.len() as u32,
        );
        for (i, decoder) in decoders.iter().enumerate() {
            let Some(device) = devices.get(i).or(devices.last()) else {
                continue;
            };
            self.table.add_handle(
                ObjectKind::PhysicalDevice,
                decoder.capture_id(),
                device.as_raw(),
            );
            decoder.set_output(device.as_raw());
        }
        self.physical_devices = devices;
        Ok(())
    }

    fn create_device(
        &mut self,
        physical_id: CaptureId,
        queue_create_infos: &[vkrd_protocol::calls::QueueCreateInfo],
        enabled_extensions: &[String],
        decoder: &vkrd_protocol::handle::HandleDecoder,
    ) -> Result<(), ReplayError> {
        let Some(instance) = &self.instance else {
            return Err(ReplayError::NoDevice);
        };
        // gpu_index overrides the capture's device choice
        let physical = match self.options.gpu_index {
            Some(i) => {
                let picked = self
                    .physical_devices
                    .get(i as usize)
                    .or(self.physical_devices.last())
                    .copied()
                    .unwrap_or(vk::PhysicalDevice::null());
                info!(gpu_index = i, "overriding replay physical device");
                picked
            }
            None => self.physical(physical_id),
        };

        let priorities: Vec<Vec<f32>> = queue_create_infos
            .iter()
            .map(|q| q.queue_priorities.clone())
            .collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_create_infos
            .iter()
            .zip(&priorities)
            .map(|(q, p)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(q.queue_family_index)
                    .queue_priorities(p)
            })
            .collect();
        let ext_names: Vec<CString> = enabled_extensions
            .iter()
            .filter_map(|e| CString::new(e.as_str()).ok())
            .collect();
        let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|e| e.as_ptr()).collect();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_ptrs);
        let device = match unsafe { instance.create_device(physical, &create_info, None) } {
            Ok(device) => device,
            Err(result) => {
                error!(?result, "device creation failed");
                return Err(ReplayError::Device {
                    call: "vkCreateDevice",
                    result,
                });
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical) };
        let queue_family_count = unsafe {
            instance
                .get_physical_device_queue_family_properties(physical)
                .len() as u32
        };
        let ray_tracing = enabled_extensions
            .iter()
            .any(|e| e == "VK_KHR_ray_tracing_pipeline")
            .then(|| ash::khr::ray_tracing_pipeline::Device::new(instance, &device));

        self.table
            .add_handle(ObjectKind::Device, decoder.capture_id(), device.handle().as_raw());
        decoder.set_output(device.handle().as_raw());
        self.device = Some(Arc::new(DeviceContext {
            instance: instance.clone(),
            physical,
            device,
            memory_properties,
            queue_family_count,
            ray_tracing,
        }));
        if self.options.async_pipeline_creation {
            self.workers = Some(Arc::new(WorkerPool::new(self.options.pipeline_creation_jobs)));
        }
        info!(extensions = enabled_extensions.len(), "replay device created");
        Ok(())
    }

    fn destroy_device(&mut self) -> Result<(), ReplayError> {
        if let Some(workers) = &self.workers {
            workers.wait_all();
        }
        self.workers = None;
        if let Some(ctx) = self.device.clone() {
            self.dump.release_all(Some(&ctx));
            for (_, backing) in self.swapchain_backing.drain() {
                for (image, memory) in backing {
                    unsafe {
                        ctx.device.destroy_image(image, None);
                        ctx.device.free_memory(memory, None);
                    }
                }
            }
            unsafe {
                let _ = ctx.device.device_wait_idle();
                ctx.device.destroy_device(None);
            }
        }
        self.device = None;
        self.queue_families.clear();
        Ok(())
    }

    /// Pipeline cache policy: omit captured blobs entirely, or reject them
    /// when the replay device's cache UUID differs from the capture's.
    fn create_pipeline_cache(
        &mut self,
        initial_data: &[u8],
        decoder: &vkrd_protocol::handle::HandleDecoder,
    ) -> Result<(), ReplayError> {
        let ctx = self.ctx()?;
        let mut data: &[u8] = initial_data;
        if self.options.omit_pipeline_cache_data {
            data = &[];
        } else if self.options.validate_pipeline_cache_uuid && data.len() >= 32 {
            let props = unsafe { ctx.instance.get_physical_device_properties(ctx.physical) };
            // VkPipelineCacheHeaderVersionOne places the UUID at byte 16
            if data[16..32] != props.pipeline_cache_uuid {
                warn!("captured pipeline cache UUID mismatch, dropping cache data");
                data = &[];
            }
        }
        let vk_info = vk::PipelineCacheCreateInfo::default().initial_data(data);
        let handle = vk_call("vkCreatePipelineCache", unsafe {
            ctx.device.create_pipeline_cache(&vk_info, None)
        })?;
        self.table
            .add_handle(ObjectKind::PipelineCache, decoder.capture_id(), handle.as_raw());
        decoder.set_output(handle.as_raw());
        Ok(())
    }

    fn create_graphics_pipelines(
        &mut self,
        cache_id: CaptureId,
        create_infos: &[GraphicsPipelineCreateInfo],
        decoders: &[vkrd_protocol::handle::HandleDecoder],
    ) -> Result<(), ReplayError> {
        let ctx = self.ctx()?;
        let cache = remap::pipeline_cache(&self.table, cache_id);
        for (decoder, create_info) in decoders.iter().zip(create_infos) {
            let id = decoder.capture_id();
            let record = graphics_pipeline_record(create_info, &self.layout_sets);
            if let Some(workers) = &self.workers {
                self.table.mark_pending(id);
                let ctx = Arc::clone(&ctx);
                let table = Arc::clone(&self.table);
                let create_info = create_info.clone();
                workers.submit(
                    id,
                    Box::new(move || {
                        match build_graphics_pipeline(&ctx, &table, cache, &create_info) {
                            Ok(pipeline) => table.add_pipeline(id, pipeline.as_raw(), record),
                            Err(err) => error!(pipeline = id.0, %err, "async pipeline creation failed"),
                        }
                        table.clear_pending(id);
                    }),
                );
            } else {
                let pipeline = build_graphics_pipeline(&ctx, &self.table, cache, create_info)?;
                self.table.add_pipeline(id, pipeline.as_raw(), record);
                decoder.set_output(pipeline.as_raw());
            }
        }
        Ok(())
    }

    fn create_compute_pipelines(
        &mut self,
        cache_id: CaptureId,
        create_infos: &[ComputePipelineCreateInfo],
        decoders: &[vkrd_protocol::handle::HandleDecoder],
    ) -> Result<(), ReplayError> {
        let ctx = self.ctx()?;
        let cache = remap::pipeline_cache(&self.table, cache_id);
        for (decoder, create_info) in decoders.iter().zip(create_infos) {
            let id = decoder.capture_id();
            let record = PipelineInfo {
                bind_point: vk::PipelineBindPoint::COMPUTE.as_raw(),
                stage_flags: create_info.stage.stage,
                layout_id: create_info.layout,
                descriptor_set_layout_ids: self
                    .layout_sets
                    .get(&create_info.layout)
                    .cloned()
                    .unwrap_or_default(),
                ..Default::default()
            };
            if let Some(workers) = &self.workers {
                self.table.mark_pending(id);
                let ctx = Arc::clone(&ctx);
                let table = Arc::clone(&self.table);
                let create_info = create_info.clone();
                workers.submit(
                    id,
                    Box::new(move || {
                        match build_compute_pipeline(&ctx, &table, cache, &create_info) {
                            Ok(pipeline) => table.add_pipeline(id, pipeline.as_raw(), record),
                            Err(err) => error!(pipeline = id.0, %err, "async pipeline creation failed"),
                        }
                        table.clear_pending(id);
                    }),
                );
            } else {
                let pipeline = build_compute_pipeline(&ctx, &self.table, cache, create_info)?;
                self.table.add_pipeline(id, pipeline.as_raw(), record);
                decoder.set_output(pipeline.as_raw());
            }
        }
        Ok(())
    }

    fn update_descriptor_sets(
        &mut self,
        writes: &[vkrd_protocol::calls::WriteDescriptorSet],
    ) -> Result<(), ReplayError> {
        let ctx = self.ctx()?;
        for write in writes {
            let buffer_infos: Vec<vk::DescriptorBufferInfo> = write
                .buffer_infos
                .iter()
                .map(|b| {
                    vk::DescriptorBufferInfo::default()
                        .buffer(remap::buffer(&self.table, b.buffer))
                        .offset(b.offset)
                        .range(b.range)
                })
                .collect();
            let image_infos: Vec<vk::DescriptorImageInfo> = write
                .image_infos
                .iter()
                .map(|i| {
                    vk::DescriptorImageInfo::default()
                        .sampler(remap::sampler(&self.table, i.sampler))
                        .image_view(remap::image_view(&self.table, i.image_view))
                        .image_layout(vk::ImageLayout::from_raw(i.image_layout))
                })
                .collect();
            let mut vk_write = vk::WriteDescriptorSet::default()
                .dst_set(remap::descriptor_set(&self.table, write.dst_set))
                .dst_binding(write.dst_binding)
                .dst_array_element(write.dst_array_element)
                .descriptor_type(vk::DescriptorType::from_raw(write.descriptor_type));
            if !buffer_infos.is_empty() {
                vk_write = vk_write.buffer_info(&buffer_infos);
            }
            if !image_infos.is_empty() {
                vk_write = vk_write.image_info(&image_infos);
            }
            unsafe { ctx.device.update_descriptor_sets(&[vk_write], &[]) };

            // shadow the bound resources so dump targets can be derived
            if let Some(mut info) = self.table.descriptor_set_info_mut(write.dst_set) {
                let slot = info.bindings.entry(write.dst_binding).or_default();
                slot.descriptor_type = write.descriptor_type;
                slot.buffer_ids = write.buffer_infos.iter().map(|b| b.buffer).collect();
                slot.image_view_ids = write.image_infos.iter().map(|i| i.image_view).collect();
            }
        }
        Ok(())
    }

    /// Virtual swapchain image query: the captured count of offscreen images
    /// is created and bound here, replacing the presentation engine's.
    fn get_swapchain_images(
        &mut self,
        swapchain_id: CaptureId,
        capture_count: u32,
        decoders: &[vkrd_protocol::handle::HandleDecoder],
    ) -> Result<(), ReplayError> {
        let ctx = self.ctx()?;
        let Some(sc_info) = self.table.swapchain_info(swapchain_id) else {
            warn!(swapchain = swapchain_id.0, "image query for unknown swapchain");
            return Ok(());
        };
        if !self
            .swapchain_backing
            .get(&swapchain_id)
            .map_or(true, Vec::is_empty)
        {
            // second call of the two-call pattern; images already exist
            return Ok(());
        }
        self.table.record_enumeration(
            swapchain_id,
            EnumerationQuery::SwapchainImages,
            capture_count,
        );
        let mut backing = Vec::new();
        let mut image_ids = Vec::new();
        for decoder in decoders {
            let vk_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(vk::Format::from_raw(sc_info.format))
                .extent(vk::Extent3D {
                    width: sc_info.extent[0],
                    height: sc_info.extent[1],
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSFER_SRC
                        | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = vk_call("vkCreateImage", unsafe {
                ctx.device.create_image(&vk_info, None)
            })?;
            let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };
            let type_index = ctx
                .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .or_else(|| ctx.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::empty()))
                .unwrap_or(0);
            let alloc = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(type_index);
            let memory = vk_call("vkAllocateMemory", unsafe {
                ctx.device.allocate_memory(&alloc, None)
            })?;
            vk_call("vkBindImageMemory", unsafe {
                ctx.device.bind_image_memory(image, memory, 0)
            })?;
            self.table.add_image(
                decoder.capture_id(),
                image.as_raw(),
                ImageInfo {
                    image_type: vk::ImageType::TYPE_2D.as_raw(),
                    format: sc_info.format,
                    extent: [sc_info.extent[0], sc_info.extent[1], 1],
                    mip_levels: 1,
                    array_layers: 1,
                    samples: 1,
                    tiling: vk::ImageTiling::OPTIMAL.as_raw(),
                    usage: 0,
                    current_layout: vk::ImageLayout::UNDEFINED.as_raw(),
                    queue_family_index: 0,
                },
            );
            decoder.set_output(image.as_raw());
            image_ids.push(decoder.capture_id());
            backing.push((image, memory));
        }
        if let Some(mut info) = self.table.swapchain_info_mut(swapchain_id) {
            info.image_ids = image_ids;
        }
        self.swapchain_backing.insert(swapchain_id, backing);
        Ok(())
    }
}

// ── free helpers, shared with the async creation closures ──────────────

fn spirv_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn render_pass_record(info: &RenderPassCreateInfo) -> RenderPassInfo {
    RenderPassInfo {
        attachments: info
            .attachments
            .iter()
            .map(|a| RenderPassAttachmentInfo {
                format: a.format,
                samples: a.samples,
                load_op: a.load_op,
                store_op: a.store_op,
                stencil_load_op: a.stencil_load_op,
                stencil_store_op: a.stencil_store_op,
                initial_layout: a.initial_layout,
                final_layout: a.final_layout,
            })
            .collect(),
        subpasses: info
            .subpasses
            .iter()
            .map(|sp| SubpassInfo {
                color_attachments: sp.color_attachments.clone(),
                depth_stencil_attachment: sp.depth_stencil_attachment,
                resolve_attachments: sp.resolve_attachments.clone(),
                input_attachments: sp.input_attachments.clone(),
            })
            .collect(),
    }
}

fn create_render_pass(
    ctx: &DeviceContext,
    info: &RenderPassCreateInfo,
) -> Result<vk::RenderPass, ReplayError> {
    let attachments: Vec<vk::AttachmentDescription> = info
        .attachments
        .iter()
        .map(|a| {
            vk::AttachmentDescription::default()
                .format(vk::Format::from_raw(a.format))
                .samples(vk::SampleCountFlags::from_raw(a.samples))
                .load_op(vk::AttachmentLoadOp::from_raw(a.load_op))
                .store_op(vk::AttachmentStoreOp::from_raw(a.store_op))
                .stencil_load_op(vk::AttachmentLoadOp::from_raw(a.stencil_load_op))
                .stencil_store_op(vk::AttachmentStoreOp::from_raw(a.stencil_store_op))
                .initial_layout(vk::ImageLayout::from_raw(a.initial_layout))
                .final_layout(vk::ImageLayout::from_raw(a.final_layout))
        })
        .collect();
    struct Refs {
        color: Vec<vk::AttachmentReference>,
        resolve: Vec<vk::AttachmentReference>,
        input: Vec<vk::AttachmentReference>,
        depth: Option<vk::AttachmentReference>,
    }
    let reference = |attachment: u32, layout: vk::ImageLayout| {
        vk::AttachmentReference::default()
            .attachment(attachment)
            .layout(layout)
    };
    let refs: Vec<Refs> = info
        .subpasses
        .iter()
        .map(|sp| Refs {
            color: sp
                .color_attachments
                .iter()
                .map(|a| reference(*a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            resolve: sp
                .resolve_attachments
                .iter()
                .map(|a| reference(*a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            input: sp
                .input_attachments
                .iter()
                .map(|a| reference(*a, vk::ImageLayout::GENERAL))
                .collect(),
            depth: sp
                .depth_stencil_attachment
                .map(|a| reference(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
        })
        .collect();
    let subpasses: Vec<vk::SubpassDescription> = refs
        .iter()
        .map(|r| {
            let mut sp = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&r.color)
                .input_attachments(&r.input);
            if !r.resolve.is_empty() {
                sp = sp.resolve_attachments(&r.resolve);
            }
            if let Some(depth) = r.depth.as_ref() {
                sp = sp.depth_stencil_attachment(depth);
            }
            sp
        })
        .collect();
    let create = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses);
    vk_call("vkCreateRenderPass", unsafe {
        ctx.device.create_render_pass(&create, None)
    })
}

fn graphics_pipeline_record(
    info: &GraphicsPipelineCreateInfo,
    layout_sets: &HashMap<CaptureId, Vec<CaptureId>>,
) -> PipelineInfo {
    // raw VK_DYNAMIC_STATE_VERTEX_INPUT_EXT
    const DYNAMIC_STATE_VERTEX_INPUT: i32 = 1000352000;
    PipelineInfo {
        bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw(),
        stage_flags: info.stages.iter().fold(0, |acc, s| acc | s.stage),
        layout_id: info.layout,
        descriptor_set_layout_ids: layout_sets.get(&info.layout).cloned().unwrap_or_default(),
        vertex_bindings: info
            .vertex_bindings
            .iter()
            .map(|b| {
                (
                    b.binding,
                    VertexBindingInfo {
                        stride: b.stride,
                        input_rate: b.input_rate,
                    },
                )
            })
            .collect(),
        vertex_attributes: info
            .vertex_attributes
            .iter()
            .map(|a| {
                (
                    a.location,
                    VertexAttributeInfo {
                        binding: a.binding,
                        format: a.format,
                        offset: a.offset,
                    },
                )
            })
            .collect(),
        dynamic_vertex_input: info.dynamic_states.contains(&DYNAMIC_STATE_VERTEX_INPUT),
    }
}

fn build_graphics_pipeline(
    ctx: &DeviceContext,
    table: &ObjectTable,
    cache: vk::PipelineCache,
    info: &GraphicsPipelineCreateInfo,
) -> Result<vk::Pipeline, ReplayError> {
    let entry_names: Vec<CString> = info
        .stages
        .iter()
        .map(|s| CString::new(s.entry_point.as_str()).unwrap_or_else(|_| CString::from(c"main")))
        .collect();
    let stages: Vec<vk::PipelineShaderStageCreateInfo> = info
        .stages
        .iter()
        .zip(&entry_names)
        .map(|(s, name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::from_raw(s.stage))
                .module(remap::shader_module(table, s.module))
                .name(name.as_c_str())
        })
        .collect();
    let bindings: Vec<vk::VertexInputBindingDescription> = info
        .vertex_bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(vk::VertexInputRate::from_raw(b.input_rate))
        })
        .collect();
    let attributes: Vec<vk::VertexInputAttributeDescription> = info
        .vertex_attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(a.location)
                .binding(a.binding)
                .format(vk::Format::from_raw(a.format))
                .offset(a.offset)
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::from_raw(info.topology));
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    // viewport and scissor always come from the recorded stream
    let mut dynamic: Vec<vk::DynamicState> = info
        .dynamic_states
        .iter()
        .map(|d| vk::DynamicState::from_raw(*d))
        .collect();
    for required in [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR] {
        if !dynamic.contains(&required) {
            dynamic.push(required);
        }
    }
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic);

    let create = vk::GraphicsPipelineCreateInfo::default()
        .flags(vk::PipelineCreateFlags::from_raw(info.flags))
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(remap::pipeline_layout(table, info.layout))
        .render_pass(remap::render_pass(table, info.render_pass))
        .subpass(info.subpass);
    match unsafe { ctx.device.create_graphics_pipelines(cache, &[create], None) } {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, result)) => Err(ReplayError::Device {
            call: "vkCreateGraphicsPipelines",
            result,
        }),
    }
}

fn build_compute_pipeline(
    ctx: &DeviceContext,
    table: &ObjectTable,
    cache: vk::PipelineCache,
    info: &ComputePipelineCreateInfo,
) -> Result<vk::Pipeline, ReplayError> {
    let entry_name = CString::new(info.stage.entry_point.as_str())
        .unwrap_or_else(|_| CString::from(c"main"));
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::from_raw(info.stage.stage))
        .module(remap::shader_module(table, info.stage.module))
        .name(entry_name.as_c_str());
    let create = vk::ComputePipelineCreateInfo::default()
        .flags(vk::PipelineCreateFlags::from_raw(info.flags))
        .stage(stage)
        .layout(remap::pipeline_layout(table, info.layout));
    match unsafe { ctx.device.create_compute_pipelines(cache, &[create], None) } {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, result)) => Err(ReplayError::Device {
            call: "vkCreateComputePipelines",
            result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_byte_to_word_conversion() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = spirv_words(&bytes);
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
        // trailing partial word is dropped
        assert_eq!(spirv_words(&bytes[..6]).len(), 1);
    }

    #[test]
    fn graphics_record_captures_vertex_layout() {
        use vkrd_protocol::calls::{VertexAttributeDescription, VertexBindingDescription};
        let info = GraphicsPipelineCreateInfo {
            flags: 0,
            stages: Vec::new(),
            vertex_bindings: vec![VertexBindingDescription {
                binding: 0,
                stride: 32,
                input_rate: 0,
            }],
            vertex_attributes: vec![VertexAttributeDescription {
                location: 2,
                binding: 0,
                format: 106,
                offset: 16,
            }],
            topology: 3,
            dynamic_states: vec![0, 1],
            layout: CaptureId(9),
            render_pass: CaptureId(4),
            subpass: 0,
        };
        let mut layout_sets = HashMap::new();
        layout_sets.insert(CaptureId(9), vec![CaptureId(11), CaptureId(12)]);
        let record = graphics_pipeline_record(&info, &layout_sets);
        assert_eq!(record.layout_id, CaptureId(9));
        assert_eq!(record.descriptor_set_layout_ids.len(), 2);
        assert_eq!(record.vertex_bindings[&0].stride, 32);
        assert_eq!(record.vertex_attributes[&2].offset, 16);
        assert!(!record.dynamic_vertex_input);
    }

    #[test]
    fn render_pass_record_round_trip() {
        use vkrd_protocol::calls::{AttachmentDescription, SubpassDescription};
        let info = RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: 44,
                samples: 1,
                load_op: 1,
                store_op: 0,
                stencil_load_op: 2,
                stencil_store_op: 1,
                initial_layout: 0,
                final_layout: 1000001002,
            }],
            subpasses: vec![SubpassDescription {
                color_attachments: vec![0],
                depth_stencil_attachment: None,
                resolve_attachments: Vec::new(),
                input_attachments: Vec::new(),
            }],
        };
        let record = render_pass_record(&info);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].final_layout, 1000001002);
        assert_eq!(record.subpasses[0].color_attachments, vec![0]);
    }
}
