use ash::vk;
use tracing::{debug, warn};

use crate::device::DeviceContext;
use crate::error::{vk_snap, SnapshotError};

/// Result of an image readback. When a requested conversion or scaling was
/// not feasible the bytes are in the image's native format and extent and
/// `scaling_applied` is false.
#[derive(Debug, Clone)]
pub struct ImageSnapshot {
    pub bytes: Vec<u8>,
    pub format: vk::Format,
    pub extent: [u32; 3],
    /// (byte offset, byte size) per subresource in mip-major order
    pub subresources: Vec<(u64, u64)>,
    pub scaling_applied: bool,
}

/// Source-image description for a readback, taken from the virtualization
/// table's denormalized create info.
#[derive(Debug, Clone, Copy)]
pub struct ImageDescription {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub aspect: vk::ImageAspectFlags,
    pub current_layout: vk::ImageLayout,
}

struct Staging {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    coherent: bool,
}

/// Synchronous GPU-to-host (and host-to-GPU) resource copy utility.
///
/// Owns a reusable transient command buffer, a dedicated fence and a
/// grow-only staging buffer; every public operation submits, waits on the
/// fence and returns. Not safe for concurrent use; one instance serves one
/// queue family serially.
pub struct ResourceSnapshot {
    queue: vk::Queue,
    queue_family: u32,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    staging: Option<Staging>,
}

impl ResourceSnapshot {
    pub fn new(ctx: &DeviceContext, queue: vk::Queue, queue_family: u32) -> Result<Self, SnapshotError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .queue_family_index(queue_family);
        let command_pool =
            vk_snap("vkCreateCommandPool", unsafe { ctx.device.create_command_pool(&pool_info, None) })?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { ctx.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(result) => {
                unsafe { ctx.device.destroy_command_pool(command_pool, None) };
                return Err(SnapshotError::Device {
                    call: "vkAllocateCommandBuffers",
                    result,
                });
            }
        };

        let fence = match unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(f) => f,
            Err(result) => {
                unsafe { ctx.device.destroy_command_pool(command_pool, None) };
                return Err(SnapshotError::Device {
                    call: "vkCreateFence",
                    result,
                });
            }
        };

        Ok(Self {
            queue,
            queue_family,
            command_pool,
            command_buffer,
            fence,
            staging: None,
        })
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Read an image's contents into host memory, optionally resolving
    /// multisample sources and converting/scaling via blit when the device
    /// supports it for both formats.
    pub fn read_image(
        &mut self,
        ctx: &DeviceContext,
        image: vk::Image,
        desc: &ImageDescription,
        dst_format: Option<vk::Format>,
        dst_extent: Option<[u32; 3]>,
        all_layers_per_level: bool,
    ) -> Result<ImageSnapshot, SnapshotError> {
        let mut src_image = image;
        let mut src_desc = *desc;
        let mut src_layout = desc.current_layout;
        let mut temp_images: Vec<(vk::Image, vk::DeviceMemory)> = Vec::new();

        self.begin_commands(ctx)?;

        // MSAA resolve into a transient single-sample image
        if desc.samples != vk::SampleCountFlags::TYPE_1 {
            let (resolved, memory) = self.create_transfer_image(
                ctx,
                desc.format,
                desc.extent,
                desc.mip_levels,
                desc.array_layers,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED,
            )?;
            self.transition(ctx, src_image, &src_desc, src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            self.transition(ctx, resolved, &src_desc, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            for level in 0..desc.mip_levels {
                let extent = mip_extent(desc.extent, level);
                let region = vk::ImageResolve::default()
                    .src_subresource(subresource_layers(desc.aspect, level, desc.array_layers))
                    .dst_subresource(subresource_layers(desc.aspect, level, desc.array_layers))
                    .extent(vk::Extent3D {
                        width: extent[0],
                        height: extent[1],
                        depth: extent[2],
                    });
                unsafe {
                    ctx.device.cmd_resolve_image(
                        self.command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        resolved,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            temp_images.push((resolved, memory));
            src_image = resolved;
            src_desc.samples = vk::SampleCountFlags::TYPE_1;
            src_desc.tiling = vk::ImageTiling::OPTIMAL;
            src_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        }

        // Format conversion / scaling via blit, silently skipped when not
        // feasible on this device
        let want_format = dst_format.unwrap_or(desc.format);
        let want_extent = dst_extent.unwrap_or(desc.extent);
        let mut scaling_applied = false;
        if (want_format != src_desc.format || want_extent != src_desc.extent)
            && self.blit_feasible(ctx, src_desc.format, want_format, want_extent, &src_desc)
        {
            let (blitted, memory) = self.create_transfer_image(
                ctx,
                want_format,
                want_extent,
                src_desc.mip_levels,
                src_desc.array_layers,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            )?;
            self.transition(ctx, src_image, &src_desc, src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            self.transition(ctx, blitted, &src_desc, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            for level in 0..src_desc.mip_levels {
                let src_ext = mip_extent(src_desc.extent, level);
                let dst_ext = mip_extent(want_extent, level);
                let blit = vk::ImageBlit::default()
                    .src_subresource(subresource_layers(src_desc.aspect, level, src_desc.array_layers))
                    .dst_subresource(subresource_layers(src_desc.aspect, level, src_desc.array_layers))
                    .src_offsets(blit_offsets(src_ext))
                    .dst_offsets(blit_offsets(dst_ext));
                unsafe {
                    ctx.device.cmd_blit_image(
                        self.command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        blitted,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
            }
            temp_images.push((blitted, memory));
            src_image = blitted;
            src_desc.format = want_format;
            src_desc.extent = want_extent;
            src_desc.tiling = vk::ImageTiling::OPTIMAL;
            src_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            scaling_applied = true;
        } else if want_format != desc.format || want_extent != desc.extent {
            debug!(
                src = ?desc.format,
                dst = ?want_format,
                "blit conversion not feasible, returning native format"
            );
        }

        let subresources =
            self.subresource_layouts(ctx, &src_desc, all_layers_per_level)?;
        let total: u64 = subresources
            .last()
            .map(|(off, size)| off + size)
            .unwrap_or(0);
        self.ensure_staging(ctx, total)?;

        self.transition(ctx, src_image, &src_desc, src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType {
            type_bits: 0,
        })?;
        let mut sub = subresources.iter();
        for level in 0..src_desc.mip_levels {
            let extent = mip_extent(src_desc.extent, level);
            let layer_groups: u32 = if all_layers_per_level { 1 } else { src_desc.array_layers };
            for group in 0..layer_groups {
                let (offset, _) = *sub.next().unwrap_or(&(0, 0));
                let (base_layer, layer_count) = if all_layers_per_level {
                    (0, src_desc.array_layers)
                } else {
                    (group, 1)
                };
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(offset)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(src_desc.aspect)
                            .mip_level(level)
                            .base_array_layer(base_layer)
                            .layer_count(layer_count),
                    )
                    .image_extent(vk::Extent3D {
                        width: extent[0],
                        height: extent[1],
                        depth: extent[2],
                    });
                unsafe {
                    ctx.device.cmd_copy_image_to_buffer(
                        self.command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        staging.buffer,
                        &[region],
                    );
                }
            }
        }

        // restore the original image's layout when we transitioned it in place
        if temp_images.is_empty() {
            self.transition(
                ctx,
                image,
                desc,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                desc.current_layout,
            );
        }

        let result = self
            .submit_and_wait(ctx)
            .and_then(|_| self.copy_out(ctx, total));

        for (img, mem) in temp_images {
            unsafe {
                ctx.device.destroy_image(img, None);
                ctx.device.free_memory(mem, None);
            }
        }

        Ok(ImageSnapshot {
            bytes: result?,
            format: src_desc.format,
            extent: src_desc.extent,
            subresources,
            scaling_applied,
        })
    }

    /// Read a buffer region into host memory.
    pub fn read_buffer(
        &mut self,
        ctx: &DeviceContext,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, SnapshotError> {
        self.ensure_staging(ctx, size)?;
        self.begin_commands(ctx)?;
        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType { type_bits: 0 })?;
        let region = vk::BufferCopy::default()
            .src_offset(offset)
            .dst_offset(0)
            .size(size);
        unsafe {
            ctx.device
                .cmd_copy_buffer(self.command_buffer, buffer, staging.buffer, &[region]);
        }
        self.submit_and_wait(ctx)?;
        self.copy_out(ctx, size)
    }

    /// Write host bytes into a buffer region.
    pub fn write_buffer(
        &mut self,
        ctx: &DeviceContext,
        buffer: vk::Buffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), SnapshotError> {
        self.ensure_staging(ctx, bytes.len() as u64)?;
        self.copy_in(ctx, bytes)?;
        self.begin_commands(ctx)?;
        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType { type_bits: 0 })?;
        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(offset)
            .size(bytes.len() as u64);
        unsafe {
            ctx.device
                .cmd_copy_buffer(self.command_buffer, staging.buffer, buffer, &[region]);
        }
        self.submit_and_wait(ctx)
    }

    /// Write host bytes into an image, restoring its layout afterwards. The
    /// byte layout must match `subresource_layouts` for the description.
    pub fn write_image(
        &mut self,
        ctx: &DeviceContext,
        image: vk::Image,
        desc: &ImageDescription,
        bytes: &[u8],
    ) -> Result<(), SnapshotError> {
        let subresources = self.subresource_layouts(ctx, desc, true)?;
        let total: u64 = subresources.last().map(|(o, s)| o + s).unwrap_or(0);
        self.ensure_staging(ctx, total)?;
        self.copy_in(ctx, &bytes[..total.min(bytes.len() as u64) as usize])?;
        self.begin_commands(ctx)?;
        self.transition(ctx, image, desc, desc.current_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType { type_bits: 0 })?;
        for (level, (offset, _)) in subresources.iter().enumerate() {
            let extent = mip_extent(desc.extent, level as u32);
            let region = vk::BufferImageCopy::default()
                .buffer_offset(*offset)
                .image_subresource(subresource_layers(desc.aspect, level as u32, desc.array_layers))
                .image_extent(vk::Extent3D {
                    width: extent[0],
                    height: extent[1],
                    depth: extent[2],
                });
            unsafe {
                ctx.device.cmd_copy_buffer_to_image(
                    self.command_buffer,
                    staging.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }
        self.transition(ctx, image, desc, vk::ImageLayout::TRANSFER_DST_OPTIMAL, desc.current_layout);
        self.submit_and_wait(ctx)
    }

    /// Per-subresource (offset, size) list. Optimal tiling sizes come from
    /// the memory requirements of transient probe images; linear tiling
    /// reads the driver's subresource layout directly.
    pub fn subresource_layouts(
        &self,
        ctx: &DeviceContext,
        desc: &ImageDescription,
        all_layers_per_level: bool,
    ) -> Result<Vec<(u64, u64)>, SnapshotError> {
        let mut sizes = Vec::new();
        if desc.tiling == vk::ImageTiling::LINEAR {
            // one subresource per mip x layer group; driver-reported sizes
            for level in 0..desc.mip_levels {
                let layer_groups = if all_layers_per_level { 1 } else { desc.array_layers };
                for layer in 0..layer_groups {
                    let sub = vk::ImageSubresource::default()
                        .aspect_mask(desc.aspect)
                        .mip_level(level)
                        .array_layer(layer);
                    // probe with a throwaway linear image of the same shape
                    let (probe, memory) = self.create_probe_image(ctx, desc, level, all_layers_per_level)?;
                    let layout = unsafe { ctx.device.get_image_subresource_layout(probe, sub) };
                    unsafe {
                        ctx.device.destroy_image(probe, None);
                        ctx.device.free_memory(memory, None);
                    }
                    let layers = if all_layers_per_level { desc.array_layers as u64 } else { 1 };
                    sizes.push(layout.size * layers);
                }
            }
        } else {
            for level in 0..desc.mip_levels {
                let layer_groups = if all_layers_per_level { 1 } else { desc.array_layers };
                for _ in 0..layer_groups {
                    let (probe, memory) = self.create_probe_image(ctx, desc, level, all_layers_per_level)?;
                    let req = unsafe { ctx.device.get_image_memory_requirements(probe) };
                    unsafe {
                        ctx.device.destroy_image(probe, None);
                        ctx.device.free_memory(memory, None);
                    }
                    sizes.push(req.size);
                }
            }
        }
        Ok(pack_offsets(&sizes))
    }

    pub fn destroy(&mut self, ctx: &DeviceContext) {
        unsafe {
            if let Some(staging) = self.staging.take() {
                ctx.device.destroy_buffer(staging.buffer, None);
                ctx.device.free_memory(staging.memory, None);
            }
            ctx.device.destroy_fence(self.fence, None);
            ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }

    // internal plumbing

    fn blit_feasible(
        &self,
        ctx: &DeviceContext,
        src: vk::Format,
        dst: vk::Format,
        dst_extent: [u32; 3],
        desc: &ImageDescription,
    ) -> bool {
        if !blit_compatible(src, dst) {
            return false;
        }
        let src_props =
            unsafe { ctx.instance.get_physical_device_format_properties(ctx.physical, src) };
        let dst_props =
            unsafe { ctx.instance.get_physical_device_format_properties(ctx.physical, dst) };
        if !src_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC)
            || !dst_props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::BLIT_DST)
        {
            return false;
        }
        let upscale = dst_extent[0] > desc.extent[0]
            || dst_extent[1] > desc.extent[1]
            || dst_extent[2] > desc.extent[2];
        if upscale {
            let caps = unsafe {
                ctx.instance.get_physical_device_image_format_properties(
                    ctx.physical,
                    dst,
                    desc.image_type,
                    vk::ImageTiling::OPTIMAL,
                    vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
                    vk::ImageCreateFlags::empty(),
                )
            };
            match caps {
                Ok(caps) => {
                    if dst_extent[0] > caps.max_extent.width
                        || dst_extent[1] > caps.max_extent.height
                        || dst_extent[2] > caps.max_extent.depth
                    {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }

    fn create_transfer_image(
        &self,
        ctx: &DeviceContext,
        format: vk::Format,
        extent: [u32; 3],
        mip_levels: u32,
        array_layers: u32,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory), SnapshotError> {
        let info = vk::ImageCreateInfo::default()
            .image_type(if extent[2] > 1 {
                vk::ImageType::TYPE_3D
            } else {
                vk::ImageType::TYPE_2D
            })
            .format(format)
            .extent(vk::Extent3D {
                width: extent[0],
                height: extent[1],
                depth: extent[2],
            })
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(if tiling == vk::ImageTiling::LINEAR {
                vk::ImageLayout::PREINITIALIZED
            } else {
                vk::ImageLayout::UNDEFINED
            });
        let image = vk_snap("vkCreateImage", unsafe { ctx.device.create_image(&info, None) })?;
        let req = unsafe { ctx.device.get_image_memory_requirements(image) };
        let type_index = ctx
            .find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .or_else(|| ctx.find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::empty()))
            .ok_or(SnapshotError::NoStagingMemoryType {
                type_bits: req.memory_type_bits,
            })?;
        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(req.size)
            .memory_type_index(type_index);
        let memory = match unsafe { ctx.device.allocate_memory(&alloc, None) } {
            Ok(m) => m,
            Err(result) => {
                unsafe { ctx.device.destroy_image(image, None) };
                return Err(SnapshotError::Device {
                    call: "vkAllocateMemory",
                    result,
                });
            }
        };
        if let Err(result) = unsafe { ctx.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                ctx.device.destroy_image(image, None);
                ctx.device.free_memory(memory, None);
            }
            return Err(SnapshotError::Device {
                call: "vkBindImageMemory",
                result,
            });
        }
        Ok((image, memory))
    }

    fn create_probe_image(
        &self,
        ctx: &DeviceContext,
        desc: &ImageDescription,
        level: u32,
        all_layers_per_level: bool,
    ) -> Result<(vk::Image, vk::DeviceMemory), SnapshotError> {
        let extent = mip_extent(desc.extent, level);
        self.create_transfer_image(
            ctx,
            desc.format,
            extent,
            1,
            if all_layers_per_level { desc.array_layers } else { 1 },
            desc.tiling,
            vk::ImageUsageFlags::TRANSFER_SRC,
        )
    }

    fn transition(
        &self,
        ctx: &DeviceContext,
        image: vk::Image,
        desc: &ImageDescription,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        if from == to {
            return;
        }
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );
        unsafe {
            ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn ensure_staging(&mut self, ctx: &DeviceContext, size: u64) -> Result<(), SnapshotError> {
        if let Some(staging) = &self.staging {
            if staging.size >= size {
                return Ok(());
            }
            let old = self.staging.take();
            if let Some(old) = old {
                unsafe {
                    ctx.device.destroy_buffer(old.buffer, None);
                    ctx.device.free_memory(old.memory, None);
                }
            }
        }
        let info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = vk_snap("vkCreateBuffer", unsafe { ctx.device.create_buffer(&info, None) })?;
        let req = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

        let cached = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED;
        let coherent =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let (type_index, is_coherent) = match ctx.find_memory_type(req.memory_type_bits, cached) {
            Some(i) => (i, false),
            None => match ctx.find_memory_type(req.memory_type_bits, coherent) {
                Some(i) => (i, true),
                None => {
                    unsafe { ctx.device.destroy_buffer(buffer, None) };
                    return Err(SnapshotError::NoStagingMemoryType {
                        type_bits: req.memory_type_bits,
                    });
                }
            },
        };

        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(req.size)
            .memory_type_index(type_index);
        let memory = match unsafe { ctx.device.allocate_memory(&alloc, None) } {
            Ok(m) => m,
            Err(result) => {
                unsafe { ctx.device.destroy_buffer(buffer, None) };
                return Err(SnapshotError::Device {
                    call: "vkAllocateMemory",
                    result,
                });
            }
        };
        if let Err(result) = unsafe { ctx.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                ctx.device.destroy_buffer(buffer, None);
                ctx.device.free_memory(memory, None);
            }
            return Err(SnapshotError::Device {
                call: "vkBindBufferMemory",
                result,
            });
        }
        debug!(size = req.size, coherent = is_coherent, "staging buffer grown");
        self.staging = Some(Staging {
            buffer,
            memory,
            size: req.size,
            coherent: is_coherent,
        });
        Ok(())
    }

    fn begin_commands(&self, ctx: &DeviceContext) -> Result<(), SnapshotError> {
        vk_snap("vkResetCommandBuffer", unsafe {
            ctx.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        })?;
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        vk_snap("vkBeginCommandBuffer", unsafe {
            ctx.device.begin_command_buffer(self.command_buffer, &begin)
        })
    }

    fn submit_and_wait(&self, ctx: &DeviceContext) -> Result<(), SnapshotError> {
        vk_snap("vkEndCommandBuffer", unsafe {
            ctx.device.end_command_buffer(self.command_buffer)
        })?;
        let buffers = [self.command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        vk_snap("vkQueueSubmit", unsafe {
            ctx.device.queue_submit(self.queue, &[submit], self.fence)
        })?;
        vk_snap("vkWaitForFences", unsafe {
            ctx.device.wait_for_fences(&[self.fence], true, u64::MAX)
        })?;
        vk_snap("vkResetFences", unsafe { ctx.device.reset_fences(&[self.fence]) })
    }

    fn copy_out(&self, ctx: &DeviceContext, size: u64) -> Result<Vec<u8>, SnapshotError> {
        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType { type_bits: 0 })?;
        if size == 0 {
            return Ok(Vec::new());
        }
        unsafe {
            let ptr = ctx
                .device
                .map_memory(staging.memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(SnapshotError::MapFailed)?;
            if !staging.coherent {
                let range = vk::MappedMemoryRange::default()
                    .memory(staging.memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                if let Err(result) = ctx.device.invalidate_mapped_memory_ranges(&[range]) {
                    ctx.device.unmap_memory(staging.memory);
                    return Err(SnapshotError::Device {
                        call: "vkInvalidateMappedMemoryRanges",
                        result,
                    });
                }
            }
            let bytes = std::slice::from_raw_parts(ptr as *const u8, size as usize).to_vec();
            ctx.device.unmap_memory(staging.memory);
            Ok(bytes)
        }
    }

    fn copy_in(&self, ctx: &DeviceContext, bytes: &[u8]) -> Result<(), SnapshotError> {
        let staging = self.staging.as_ref().ok_or(SnapshotError::NoStagingMemoryType { type_bits: 0 })?;
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = ctx
                .device
                .map_memory(staging.memory, 0, bytes.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(SnapshotError::MapFailed)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            if !staging.coherent {
                let range = vk::MappedMemoryRange::default()
                    .memory(staging.memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                if let Err(result) = ctx.device.flush_mapped_memory_ranges(&[range]) {
                    ctx.device.unmap_memory(staging.memory);
                    warn!("flush of staging memory failed: {result:?}");
                    return Err(SnapshotError::Device {
                        call: "vkFlushMappedMemoryRanges",
                        result,
                    });
                }
            }
            ctx.device.unmap_memory(staging.memory);
            Ok(())
        }
    }
}

/// Pack subresource sizes into back-to-back (offset, size) ranges: offset k
/// is the exact sum of the preceding sizes, so the ranges concatenate without
/// gaps and end at the total.
pub fn pack_offsets(sizes: &[u64]) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut offset = 0u64;
    for size in sizes {
        out.push((offset, *size));
        offset += size;
    }
    out
}

pub fn mip_extent(extent: [u32; 3], level: u32) -> [u32; 3] {
    [
        (extent[0] >> level).max(1),
        (extent[1] >> level).max(1),
        (extent[2] >> level).max(1),
    ]
}

fn subresource_layers(
    aspect: vk::ImageAspectFlags,
    level: u32,
    layers: u32,
) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(aspect)
        .mip_level(level)
        .base_array_layer(0)
        .layer_count(layers)
}

fn blit_offsets(extent: [u32; 3]) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: extent[0] as i32,
            y: extent[1] as i32,
            z: extent[2] as i32,
        },
    ]
}

pub fn is_uint_format(format: vk::Format) -> bool {
    format_name_class(format) == NumericClass::Uint
}

pub fn is_sint_format(format: vk::Format) -> bool {
    format_name_class(format) == NumericClass::Sint
}

pub fn is_depth_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

#[derive(Debug, PartialEq, Eq)]
enum NumericClass {
    Uint,
    Sint,
    Other,
}

fn format_name_class(format: vk::Format) -> NumericClass {
    use vk::Format as F;
    match format {
        F::R8_UINT
        | F::R8G8_UINT
        | F::R8G8B8_UINT
        | F::B8G8R8_UINT
        | F::R8G8B8A8_UINT
        | F::B8G8R8A8_UINT
        | F::A8B8G8R8_UINT_PACK32
        | F::A2R10G10B10_UINT_PACK32
        | F::A2B10G10R10_UINT_PACK32
        | F::R16_UINT
        | F::R16G16_UINT
        | F::R16G16B16_UINT
        | F::R16G16B16A16_UINT
        | F::R32_UINT
        | F::R32G32_UINT
        | F::R32G32B32_UINT
        | F::R32G32B32A32_UINT
        | F::R64_UINT
        | F::R64G64_UINT
        | F::R64G64B64_UINT
        | F::R64G64B64A64_UINT
        | F::S8_UINT => NumericClass::Uint,
        F::R8_SINT
        | F::R8G8_SINT
        | F::R8G8B8_SINT
        | F::B8G8R8_SINT
        | F::R8G8B8A8_SINT
        | F::B8G8R8A8_SINT
        | F::A8B8G8R8_SINT_PACK32
        | F::A2R10G10B10_SINT_PACK32
        | F::A2B10G10R10_SINT_PACK32
        | F::R16_SINT
        | F::R16G16_SINT
        | F::R16G16B16_SINT
        | F::R16G16B16A16_SINT
        | F::R32_SINT
        | F::R32G32_SINT
        | F::R32G32B32_SINT
        | F::R32G32B32A32_SINT
        | F::R64_SINT
        | F::R64G64_SINT
        | F::R64G64B64_SINT
        | F::R64G64B64A64_SINT => NumericClass::Sint,
        _ => NumericClass::Other,
    }
}

/// Numeric feasibility of a blit-based conversion: integer-ness must match
/// in both directions and depth/stencil formats must be identical.
pub fn blit_compatible(src: vk::Format, dst: vk::Format) -> bool {
    if src == dst {
        return true;
    }
    if is_depth_stencil_format(src) || is_depth_stencil_format(dst) {
        return false;
    }
    is_uint_format(src) == is_uint_format(dst) && is_sint_format(src) == is_sint_format(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_concatenate_without_gaps() {
        let packed = pack_offsets(&[100, 32, 7, 64]);
        assert_eq!(packed, vec![(0, 100), (100, 32), (132, 7), (139, 64)]);
        let mut end = 0;
        for (offset, size) in &packed {
            assert_eq!(*offset, end);
            end += size;
        }
        assert_eq!(end, 203);
        // odd-sized levels stay back to back
        assert_eq!(pack_offsets(&[7, 7]), vec![(0, 7), (7, 7)]);
    }

    #[test]
    fn mip_extent_clamps_to_one() {
        assert_eq!(mip_extent([16, 8, 1], 0), [16, 8, 1]);
        assert_eq!(mip_extent([16, 8, 1], 2), [4, 2, 1]);
        assert_eq!(mip_extent([16, 8, 1], 5), [1, 1, 1]);
    }

    #[test]
    fn blit_policy_integer_match() {
        // float-ish to float-ish is fine
        assert!(blit_compatible(vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM));
        // integer to normalized is not
        assert!(!blit_compatible(vk::Format::R32_UINT, vk::Format::R8G8B8A8_UNORM));
        assert!(!blit_compatible(vk::Format::R8G8B8A8_UNORM, vk::Format::R32G32B32A32_SINT));
        // signed vs unsigned integer mismatch
        assert!(!blit_compatible(vk::Format::R32_UINT, vk::Format::R32_SINT));
        assert!(blit_compatible(vk::Format::R32_UINT, vk::Format::R16G16B16A16_UINT));
    }

    #[test]
    fn blit_policy_depth_identical_only() {
        assert!(blit_compatible(vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT));
        assert!(!blit_compatible(vk::Format::D32_SFLOAT, vk::Format::D16_UNORM));
        assert!(!blit_compatible(vk::Format::D24_UNORM_S8_UINT, vk::Format::R8G8B8A8_UNORM));
    }
}
