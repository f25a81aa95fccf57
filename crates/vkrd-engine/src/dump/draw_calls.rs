use ash::vk;
use tracing::{debug, warn};
use vkrd_core::object_table::RenderPassInfo;
use vkrd_core::options::CommandBufferDumpOptions;
use vkrd_core::ObjectTable;
use vkrd_protocol::calls::{RenderPassBeginInfo, RenderingAttachmentInfo, RenderingInfo};
use vkrd_protocol::{CaptureId, VulkanCall};

use crate::convert;
use crate::device::DeviceContext;
use crate::dump::clone_set::{required_clone_count, CloneSet};
use crate::dump::state::{
    BoundState, DescriptorBinding, IndexBufferBinding, SnapshotRequest, SnapshotTarget,
    VertexBufferBinding,
};
use crate::error::{vk_call, ReplayError};
use crate::remap;

/// Load/store behavior of a render pass variant used on the clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariantMode {
    /// First clone: captured load ops, store ops forced to STORE so the
    /// attachments survive the mid-pass end for snapshotting
    Begin,
    /// Later clones: load ops forced to LOAD, initial layout = the layout
    /// the previous variant left the attachment in
    Resume,
}

#[derive(Debug, Clone)]
struct ResolvedAttachment {
    view: vk::ImageView,
    view_id: CaptureId,
    layout: i32,
}

enum ScopeKind {
    RenderPass {
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        attachments: Vec<ResolvedAttachment>,
        imageless: bool,
        begin_pass: vk::RenderPass,
        resume_pass: vk::RenderPass,
        subpass: u32,
        contents: vk::SubpassContents,
    },
    Rendering {
        color: Vec<ResolvedAttachment>,
        depth: Option<ResolvedAttachment>,
        stencil: Option<ResolvedAttachment>,
        render_area: vk::Rect2D,
        layer_count: u32,
        view_mask: u32,
    },
}

struct RenderScope {
    kind: ScopeKind,
    /// When a dump point lies inside this scope the begin/end calls are not
    /// forwarded verbatim; the engine re-issues them per clone
    manual: bool,
}

/// Per-begin-index dumping context for guarded draw calls.
///
/// Holds the clone sequence for one intercepted recording, the shadow of the
/// bound state and open rendering scope, and the snapshot work attached to
/// each clone boundary.
pub struct DrawCallsContext {
    pub begin_index: u64,
    guarded: Vec<u64>,
    render_pass_groups: Vec<Vec<u64>>,
    pub execute_commands_indices: Vec<u64>,
    dump_before: bool,
    pub executed_by: Option<u64>,
    pub secondaries: Vec<u64>,
    secondary_guarded: usize,

    pub original_cb_id: CaptureId,
    level: vk::CommandBufferLevel,
    clone_begin_flags: vk::CommandBufferUsageFlags,
    inheritance: Option<(vk::RenderPass, u32, vk::Framebuffer)>,
    pool: vk::CommandPool,
    clones: Option<CloneSet>,
    variant_passes: Vec<vk::RenderPass>,
    state: BoundState,
    scope: Option<RenderScope>,
    requests: Vec<(usize, SnapshotRequest)>,
    pub recording_done: bool,
    released: bool,
}

impl DrawCallsContext {
    pub fn new(entry: &CommandBufferDumpOptions, dump_before: bool) -> Self {
        let mut guarded = entry.draw_indices.clone();
        guarded.sort_unstable();
        guarded.dedup();
        Self {
            begin_index: entry.begin_index,
            guarded,
            render_pass_groups: entry.render_pass_indices.clone(),
            execute_commands_indices: entry.execute_commands_indices.clone(),
            dump_before,
            executed_by: entry.executed_by,
            secondaries: Vec::new(),
            secondary_guarded: 0,
            original_cb_id: CaptureId::NULL,
            level: vk::CommandBufferLevel::PRIMARY,
            clone_begin_flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            inheritance: None,
            pool: vk::CommandPool::null(),
            clones: None,
            variant_passes: Vec::new(),
            state: BoundState::default(),
            scope: None,
            requests: Vec::new(),
            recording_done: false,
            released: false,
        }
    }

    /// Number of clone boundaries this context's own guarded commands
    /// produce: one per command, two under dump-before.
    pub fn effective_guarded(&self) -> usize {
        self.guarded.len() * if self.dump_before { 2 } else { 1 }
    }

    pub fn required_clones(&self) -> usize {
        required_clone_count(self.effective_guarded(), self.secondary_guarded)
    }

    /// Re-derive the clone budget once all secondary associations exist.
    pub fn recalculate(&mut self, secondary_guarded: usize) {
        self.secondary_guarded = secondary_guarded;
    }

    pub fn is_guarded(&self, call_index: u64) -> bool {
        self.guarded.binary_search(&call_index).is_ok()
    }

    pub fn is_recording(&self) -> bool {
        self.clones.is_some() && !self.recording_done
    }

    pub fn clone_count(&self) -> usize {
        self.clones.as_ref().map_or(0, CloneSet::len)
    }

    pub fn clones(&self) -> impl Iterator<Item = vk::CommandBuffer> + '_ {
        self.clones.iter().flat_map(CloneSet::iter)
    }

    pub fn clone_at(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.clones.as_ref().and_then(|c| c.get(index))
    }

    pub fn requests_for(&self, clone_index: usize) -> Vec<SnapshotRequest> {
        self.requests
            .iter()
            .filter(|(idx, _)| *idx == clone_index)
            .map(|(_, req)| req.clone())
            .collect()
    }

    /// Allocate the clone sequence and begin recording into the first clone.
    pub fn begin_recording(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        cb_id: CaptureId,
        queue_family: u32,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<(vk::RenderPass, u32, vk::Framebuffer)>,
    ) -> Result<(), ReplayError> {
        self.release(Some(ctx));
        self.released = false;
        self.recording_done = false;
        self.original_cb_id = cb_id;
        self.clone_begin_flags = flags | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        self.inheritance = inheritance;
        self.level = table
            .command_buffer_info(cb_id)
            .map_or(vk::CommandBufferLevel::PRIMARY, |info| {
                vk::CommandBufferLevel::from_raw(info.level)
            });

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        self.pool = vk_call("vkCreateCommandPool", unsafe {
            ctx.device.create_command_pool(&pool_info, None)
        })?;

        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(self.level)
            .command_buffer_count(self.required_clones() as u32);
        let clones = vk_call("vkAllocateCommandBuffers", unsafe {
            ctx.device.allocate_command_buffers(&alloc)
        })?;
        debug!(
            begin_index = self.begin_index,
            clones = clones.len(),
            "draw-call dump recording started"
        );
        let set = CloneSet::new(clones);
        let first = set.active();
        self.clones = Some(set);
        if let Some(first) = first {
            self.begin_clone(ctx, first)?;
        }
        Ok(())
    }

    fn begin_clone(&self, ctx: &DeviceContext, cb: vk::CommandBuffer) -> Result<(), ReplayError> {
        let mut inherit = vk::CommandBufferInheritanceInfo::default();
        if let Some((render_pass, subpass, framebuffer)) = self.inheritance {
            inherit = inherit
                .render_pass(render_pass)
                .subpass(subpass)
                .framebuffer(framebuffer);
        }
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(self.clone_begin_flags)
            .inheritance_info(&inherit);
        vk_call("vkBeginCommandBuffer", unsafe {
            ctx.device.begin_command_buffer(cb, &begin)
        })
    }

    /// Route one recorded command into the active clone, splitting at
    /// guarded draws.
    pub fn process(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        call: &VulkanCall,
    ) -> Result<(), ReplayError> {
        let Some(active) = self.clones.as_ref().and_then(CloneSet::active) else {
            warn!(call_index, "recorded command after all clones were finalized");
            return Ok(());
        };
        let device = &ctx.device;
        match call {
            VulkanCall::CmdBeginRenderPass {
                begin_info,
                contents,
                ..
            } => {
                self.open_render_pass(ctx, table, call_index, begin_info, *contents)?;
            }
            VulkanCall::CmdNextSubpass { contents, .. } => {
                if let Some(RenderScope {
                    kind: ScopeKind::RenderPass { subpass, .. },
                    ..
                }) = self.scope.as_mut()
                {
                    *subpass += 1;
                }
                unsafe {
                    device.cmd_next_subpass(active, vk::SubpassContents::from_raw(*contents));
                }
            }
            VulkanCall::CmdEndRenderPass { .. } => {
                unsafe { device.cmd_end_render_pass(active) };
                self.scope = None;
            }
            VulkanCall::CmdBeginRendering { rendering_info, .. } => {
                self.open_rendering(ctx, table, rendering_info)?;
            }
            VulkanCall::CmdEndRendering { .. } => {
                unsafe { device.cmd_end_rendering(active) };
                self.scope = None;
            }
            VulkanCall::CmdBindPipeline {
                pipeline_bind_point,
                pipeline,
                ..
            } => {
                let point = vk::PipelineBindPoint::from_raw(*pipeline_bind_point);
                let handle = remap::pipeline(table, *pipeline);
                match point {
                    vk::PipelineBindPoint::GRAPHICS => {
                        self.state.graphics_pipeline = Some((*pipeline, handle));
                    }
                    vk::PipelineBindPoint::COMPUTE => {
                        self.state.compute_pipeline = Some((*pipeline, handle));
                    }
                    _ => self.state.ray_tracing_pipeline = Some((*pipeline, handle)),
                }
                unsafe { device.cmd_bind_pipeline(active, point, handle) };
            }
            VulkanCall::CmdBindDescriptorSets {
                pipeline_bind_point,
                layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
                ..
            } => {
                let point = vk::PipelineBindPoint::from_raw(*pipeline_bind_point);
                let binding = DescriptorBinding {
                    layout: remap::pipeline_layout(table, *layout),
                    first_set: *first_set,
                    sets: descriptor_sets
                        .iter()
                        .map(|id| remap::descriptor_set(table, *id))
                        .collect(),
                    set_ids: descriptor_sets.clone(),
                    dynamic_offsets: dynamic_offsets.clone(),
                };
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        active,
                        point,
                        binding.layout,
                        binding.first_set,
                        &binding.sets,
                        &binding.dynamic_offsets,
                    );
                }
                let list = match point {
                    vk::PipelineBindPoint::GRAPHICS => &mut self.state.graphics_descriptors,
                    vk::PipelineBindPoint::COMPUTE => &mut self.state.compute_descriptors,
                    _ => &mut self.state.ray_tracing_descriptors,
                };
                BoundState::record_descriptors(list, binding);
            }
            VulkanCall::CmdBindVertexBuffers {
                first_binding,
                buffers,
                offsets,
                ..
            } => {
                let binding = VertexBufferBinding {
                    first_binding: *first_binding,
                    buffers: buffers.iter().map(|id| remap::buffer(table, *id)).collect(),
                    offsets: offsets.clone(),
                };
                unsafe {
                    device.cmd_bind_vertex_buffers(
                        active,
                        binding.first_binding,
                        &binding.buffers,
                        &binding.offsets,
                    );
                }
                self.state
                    .vertex_buffers
                    .retain(|b| b.first_binding != *first_binding);
                self.state.vertex_buffers.push(binding);
            }
            VulkanCall::CmdBindIndexBuffer {
                buffer,
                offset,
                index_type,
                ..
            } => {
                let binding = IndexBufferBinding {
                    buffer: remap::buffer(table, *buffer),
                    offset: *offset,
                    index_type: vk::IndexType::from_raw(*index_type),
                };
                unsafe {
                    device.cmd_bind_index_buffer(active, binding.buffer, binding.offset, binding.index_type);
                }
                self.state.index_buffer = Some(binding);
            }
            VulkanCall::CmdSetViewport {
                first_viewport,
                viewports,
                ..
            } => {
                let vps: Vec<vk::Viewport> = viewports.iter().map(convert::viewport).collect();
                unsafe { device.cmd_set_viewport(active, *first_viewport, &vps) };
                if *first_viewport == 0 {
                    self.state.viewports = vps;
                }
            }
            VulkanCall::CmdSetScissor {
                first_scissor,
                scissors,
                ..
            } => {
                let rects: Vec<vk::Rect2D> = scissors.iter().map(convert::rect2d).collect();
                unsafe { device.cmd_set_scissor(active, *first_scissor, &rects) };
                if *first_scissor == 0 {
                    self.state.scissors = rects;
                }
            }
            VulkanCall::CmdPipelineBarrier {
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
                        active,
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
            VulkanCall::CmdCopyBuffer {
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
                        active,
                        remap::buffer(table, *src_buffer),
                        remap::buffer(table, *dst_buffer),
                        &copies,
                    );
                }
            }
            VulkanCall::CmdDraw { .. }
            | VulkanCall::CmdDrawIndexed { .. }
            | VulkanCall::CmdDrawIndirect { .. }
            | VulkanCall::CmdDrawIndexedIndirect { .. } => {
                self.record_draw(ctx, table, call_index, call)?;
            }
            VulkanCall::CmdDispatch {
                group_count_x,
                group_count_y,
                group_count_z,
                ..
            } => unsafe {
                device.cmd_dispatch(active, *group_count_x, *group_count_y, *group_count_z);
            },
            VulkanCall::CmdDispatchIndirect { buffer, offset, .. } => unsafe {
                device.cmd_dispatch_indirect(active, remap::buffer(table, *buffer), *offset);
            },
            other => {
                debug!(call_index, call = ?std::mem::discriminant(other), "recorded call not routed to clones");
            }
        }
        Ok(())
    }

    fn record_draw(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        call: &VulkanCall,
    ) -> Result<(), ReplayError> {
        let guarded = self.is_guarded(call_index);
        if guarded && self.dump_before {
            let targets = self.attachment_targets();
            self.finalize_boundary(
                ctx,
                SnapshotRequest::Own {
                    command_index: call_index,
                    targets,
                    before: true,
                },
            )?;
        }
        let Some(active) = self.clones.as_ref().and_then(CloneSet::active) else {
            return Ok(());
        };
        let device = &ctx.device;
        unsafe {
            match call {
                VulkanCall::CmdDraw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                    ..
                } => device.cmd_draw(
                    active,
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                ),
                VulkanCall::CmdDrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                    ..
                } => device.cmd_draw_indexed(
                    active,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                ),
                VulkanCall::CmdDrawIndirect {
                    buffer,
                    offset,
                    draw_count,
                    stride,
                    ..
                } => device.cmd_draw_indirect(
                    active,
                    remap::buffer(table, *buffer),
                    *offset,
                    *draw_count,
                    *stride,
                ),
                VulkanCall::CmdDrawIndexedIndirect {
                    buffer,
                    offset,
                    draw_count,
                    stride,
                    ..
                } => device.cmd_draw_indexed_indirect(
                    active,
                    remap::buffer(table, *buffer),
                    *offset,
                    *draw_count,
                    *stride,
                ),
                _ => {}
            }
        }
        if guarded {
            let targets = self.attachment_targets();
            self.finalize_boundary(
                ctx,
                SnapshotRequest::Own {
                    command_index: call_index,
                    targets,
                    before: false,
                },
            )?;
        }
        Ok(())
    }

    /// The currently open scope's attachments as snapshot targets.
    fn attachment_targets(&self) -> Vec<SnapshotTarget> {
        match self.scope.as_ref().map(|s| &s.kind) {
            Some(ScopeKind::RenderPass { attachments, .. }) => attachments
                .iter()
                .filter(|a| !a.view_id.is_null())
                .map(|a| SnapshotTarget::ImageView {
                    id: a.view_id,
                    layout: a.layout,
                })
                .collect(),
            Some(ScopeKind::Rendering {
                color,
                depth,
                stencil,
                ..
            }) => color
                .iter()
                .chain(depth.iter())
                .chain(stencil.iter())
                .filter(|a| !a.view_id.is_null())
                .map(|a| SnapshotTarget::ImageView {
                    id: a.view_id,
                    layout: a.layout,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Attach snapshot work to the active clone and split the recording:
    /// the active clone is finalized and its successor begun with the
    /// shadowed state re-armed.
    pub fn finalize_boundary(
        &mut self,
        ctx: &DeviceContext,
        request: SnapshotRequest,
    ) -> Result<(), ReplayError> {
        let Some(clones) = self.clones.as_mut() else {
            return Ok(());
        };
        self.requests.push((clones.active_index(), request));
        self.finalize_active(ctx)
    }

    fn finalize_active(&mut self, ctx: &DeviceContext) -> Result<(), ReplayError> {
        let Some(clones) = self.clones.as_mut() else {
            return Ok(());
        };
        let Some(active) = clones.active() else {
            return Ok(());
        };
        let device = &ctx.device;
        if self.scope.as_ref().is_some_and(|s| !s.manual) {
            warn!(
                begin_index = self.begin_index,
                "dump point inside a render pass with no index group; load ops will replay verbatim"
            );
        }
        // close the open scope on this clone before sealing it
        match self.scope.as_ref().map(|s| &s.kind) {
            Some(ScopeKind::RenderPass { .. }) => unsafe { device.cmd_end_render_pass(active) },
            Some(ScopeKind::Rendering { .. }) => unsafe { device.cmd_end_rendering(active) },
            None => {}
        }
        vk_call("vkEndCommandBuffer", unsafe { device.end_command_buffer(active) })?;

        let Some(next) = self.clones.as_mut().and_then(CloneSet::advance) else {
            self.recording_done = true;
            return Ok(());
        };
        self.begin_clone(ctx, next)?;
        self.state.replay(device, next);
        self.resume_scope(ctx, next)
    }

    fn resume_scope(&self, ctx: &DeviceContext, cb: vk::CommandBuffer) -> Result<(), ReplayError> {
        let device = &ctx.device;
        match self.scope.as_ref().map(|s| &s.kind) {
            Some(ScopeKind::RenderPass {
                framebuffer,
                render_area,
                attachments,
                imageless,
                resume_pass,
                subpass,
                contents,
                ..
            }) => {
                let views: Vec<vk::ImageView> = attachments.iter().map(|a| a.view).collect();
                let mut attach_begin =
                    vk::RenderPassAttachmentBeginInfo::default().attachments(&views);
                let mut begin = vk::RenderPassBeginInfo::default()
                    .render_pass(*resume_pass)
                    .framebuffer(*framebuffer)
                    .render_area(*render_area);
                if *imageless {
                    begin = begin.push_next(&mut attach_begin);
                }
                unsafe {
                    device.cmd_begin_render_pass(cb, &begin, *contents);
                    for _ in 0..*subpass {
                        device.cmd_next_subpass(cb, *contents);
                    }
                }
            }
            Some(ScopeKind::Rendering {
                color,
                depth,
                stencil,
                render_area,
                layer_count,
                view_mask,
                ..
            }) => {
                let resume_attachment = |a: &ResolvedAttachment| {
                    vk::RenderingAttachmentInfo::default()
                        .image_view(a.view)
                        .image_layout(vk::ImageLayout::from_raw(a.layout))
                        .load_op(vk::AttachmentLoadOp::LOAD)
                        .store_op(vk::AttachmentStoreOp::STORE)
                };
                let colors: Vec<vk::RenderingAttachmentInfo> =
                    color.iter().map(resume_attachment).collect();
                let depth_info = depth.as_ref().map(resume_attachment);
                let stencil_info = stencil.as_ref().map(resume_attachment);
                let mut info = vk::RenderingInfo::default()
                    .render_area(*render_area)
                    .layer_count(*layer_count)
                    .view_mask(*view_mask)
                    .color_attachments(&colors);
                if let Some(d) = depth_info.as_ref() {
                    info = info.depth_attachment(d);
                }
                if let Some(s) = stencil_info.as_ref() {
                    info = info.stencil_attachment(s);
                }
                unsafe { device.cmd_begin_rendering(cb, &info) };
            }
            None => {}
        }
        Ok(())
    }

    fn open_render_pass(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        begin_info: &RenderPassBeginInfo,
        contents: i32,
    ) -> Result<(), ReplayError> {
        let manual = self.render_pass_needs_manual_handling(call_index);
        let pass_info = table
            .render_pass_info(begin_info.render_pass)
            .unwrap_or_default();
        let fb_info = table.framebuffer_info(begin_info.framebuffer);
        let imageless = fb_info.as_ref().is_some_and(|f| f.imageless);

        // attachment views: from the begin call's extension chain for
        // imageless framebuffers, from the framebuffer otherwise
        let view_ids: Vec<CaptureId> = if let Some(ids) = &begin_info.imageless_attachments {
            ids.clone()
        } else {
            fb_info.map(|f| f.attachment_ids).unwrap_or_default()
        };
        let attachments: Vec<ResolvedAttachment> = view_ids
            .iter()
            .enumerate()
            .map(|(i, id)| ResolvedAttachment {
                view: remap::image_view(table, *id),
                view_id: *id,
                layout: pass_info
                    .attachments
                    .get(i)
                    .map_or(vk::ImageLayout::GENERAL.as_raw(), |a| a.final_layout),
            })
            .collect();

        let clear_values: Vec<vk::ClearValue> =
            begin_info.clear_values.iter().map(convert::clear_value).collect();
        let render_area = convert::rect2d(&begin_info.render_area);
        let contents = vk::SubpassContents::from_raw(contents);

        let (begin_pass, resume_pass) = if manual {
            let begin_pass = self.create_variant_pass(ctx, &pass_info, VariantMode::Begin)?;
            let resume_pass = self.create_variant_pass(ctx, &pass_info, VariantMode::Resume)?;
            (begin_pass, resume_pass)
        } else {
            let original = remap::render_pass(table, begin_info.render_pass);
            (original, original)
        };

        if let Some(active) = self.clones.as_ref().and_then(CloneSet::active) {
            let views: Vec<vk::ImageView> = attachments.iter().map(|a| a.view).collect();
            let mut attach_begin = vk::RenderPassAttachmentBeginInfo::default().attachments(&views);
            let mut begin = vk::RenderPassBeginInfo::default()
                .render_pass(begin_pass)
                .framebuffer(remap::framebuffer(table, begin_info.framebuffer))
                .render_area(render_area)
                .clear_values(&clear_values);
            if imageless {
                begin = begin.push_next(&mut attach_begin);
            }
            unsafe { ctx.device.cmd_begin_render_pass(active, &begin, contents) };
        }

        self.scope = Some(RenderScope {
            kind: ScopeKind::RenderPass {
                framebuffer: remap::framebuffer(table, begin_info.framebuffer),
                render_area,
                attachments,
                imageless,
                begin_pass,
                resume_pass,
                subpass: 0,
                contents,
            },
            manual,
        });
        Ok(())
    }

    fn open_rendering(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        info: &RenderingInfo,
    ) -> Result<(), ReplayError> {
        let resolve = |a: &RenderingAttachmentInfo| ResolvedAttachment {
            view: remap::image_view(table, a.image_view),
            view_id: a.image_view,
            layout: a.image_layout,
        };
        let color: Vec<ResolvedAttachment> = info.color_attachments.iter().map(resolve).collect();
        let depth = info.depth_attachment.as_ref().map(resolve);
        let stencil = info.stencil_attachment.as_ref().map(resolve);
        let render_area = convert::rect2d(&info.render_area);

        if let Some(active) = self.clones.as_ref().and_then(CloneSet::active) {
            // store ops forced to STORE so mid-scope ends keep the contents
            let begin_attachment = |a: &RenderingAttachmentInfo, r: &ResolvedAttachment| {
                let mut out = vk::RenderingAttachmentInfo::default()
                    .image_view(r.view)
                    .image_layout(vk::ImageLayout::from_raw(r.layout))
                    .load_op(vk::AttachmentLoadOp::from_raw(a.load_op))
                    .store_op(vk::AttachmentStoreOp::STORE);
                if let Some(clear) = &a.clear_value {
                    out = out.clear_value(convert::clear_value(clear));
                }
                out
            };
            let colors: Vec<vk::RenderingAttachmentInfo> = info
                .color_attachments
                .iter()
                .zip(&color)
                .map(|(a, r)| begin_attachment(a, r))
                .collect();
            let depth_info = info
                .depth_attachment
                .as_ref()
                .zip(depth.as_ref())
                .map(|(a, r)| begin_attachment(a, r));
            let stencil_info = info
                .stencil_attachment
                .as_ref()
                .zip(stencil.as_ref())
                .map(|(a, r)| begin_attachment(a, r));
            let mut vk_info = vk::RenderingInfo::default()
                .flags(vk::RenderingFlags::from_raw(info.flags))
                .render_area(render_area)
                .layer_count(info.layer_count)
                .view_mask(info.view_mask)
                .color_attachments(&colors);
            if let Some(d) = depth_info.as_ref() {
                vk_info = vk_info.depth_attachment(d);
            }
            if let Some(s) = stencil_info.as_ref() {
                vk_info = vk_info.stencil_attachment(s);
            }
            unsafe { ctx.device.cmd_begin_rendering(active, &vk_info) };
        }

        self.scope = Some(RenderScope {
            kind: ScopeKind::Rendering {
                color,
                depth,
                stencil,
                render_area,
                layer_count: info.layer_count,
                view_mask: info.view_mask,
            },
            manual: true,
        });
        Ok(())
    }

    /// A render pass needs manual begin/end handling when a guarded command
    /// index falls between its begin and end call indices.
    pub fn render_pass_needs_manual_handling(&self, begin_call_index: u64) -> bool {
        self.render_pass_groups
            .iter()
            .filter(|group| group.first() == Some(&begin_call_index))
            .any(|group| {
                let last = group.last().copied().unwrap_or(u64::MAX);
                self.guarded
                    .iter()
                    .any(|g| *g > begin_call_index && *g < last)
            })
    }

    fn create_variant_pass(
        &mut self,
        ctx: &DeviceContext,
        info: &RenderPassInfo,
        mode: VariantMode,
    ) -> Result<vk::RenderPass, ReplayError> {
        let attachments: Vec<vk::AttachmentDescription> = info
            .attachments
            .iter()
            .map(|a| {
                let (load, stencil_load, initial) = match mode {
                    VariantMode::Begin => (
                        vk::AttachmentLoadOp::from_raw(a.load_op),
                        vk::AttachmentLoadOp::from_raw(a.stencil_load_op),
                        vk::ImageLayout::from_raw(a.initial_layout),
                    ),
                    VariantMode::Resume => (
                        vk::AttachmentLoadOp::LOAD,
                        vk::AttachmentLoadOp::LOAD,
                        vk::ImageLayout::from_raw(a.final_layout),
                    ),
                };
                vk::AttachmentDescription::default()
                    .format(vk::Format::from_raw(a.format))
                    .samples(vk::SampleCountFlags::from_raw(a.samples))
                    .load_op(load)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(stencil_load)
                    .stencil_store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(initial)
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
        let pass = vk_call("vkCreateRenderPass", unsafe {
            ctx.device.create_render_pass(&create, None)
        })?;
        self.variant_passes.push(pass);
        Ok(pass)
    }

    /// Record execution of a dumped secondary: each of its clones is
    /// executed from this primary's clone stream, with a boundary after
    /// every secondary clone that carries snapshot work.
    pub fn splice_secondary(
        &mut self,
        ctx: &DeviceContext,
        secondary_begin: u64,
        secondary_clones: &[vk::CommandBuffer],
        boundary_after: &[bool],
    ) -> Result<(), ReplayError> {
        for (j, clone) in secondary_clones.iter().enumerate() {
            if let Some(active) = self.clones.as_ref().and_then(CloneSet::active) {
                unsafe { ctx.device.cmd_execute_commands(active, &[*clone]) };
            }
            if boundary_after.get(j).copied().unwrap_or(false) {
                self.finalize_boundary(
                    ctx,
                    SnapshotRequest::Secondary {
                        begin_index: secondary_begin,
                        clone_index: j,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Record execution of non-dumped secondaries into the active clone.
    pub fn record_execute(&self, ctx: &DeviceContext, cbs: &[vk::CommandBuffer]) {
        if let Some(active) = self.clones.as_ref().and_then(CloneSet::active) {
            unsafe { ctx.device.cmd_execute_commands(active, cbs) };
        }
    }

    /// Seal the trailing clone when the original recording ends.
    pub fn end_recording(&mut self, ctx: &DeviceContext) -> Result<(), ReplayError> {
        if self.clones.as_ref().and_then(CloneSet::active).is_none() {
            self.recording_done = true;
            return Ok(());
        }
        while !self.recording_done {
            self.finalize_active(ctx)?;
        }
        Ok(())
    }

    /// Destroy clones, variant passes and shadow state. Safe to call more
    /// than once; a released context stays released.
    pub fn release(&mut self, ctx: Option<&DeviceContext>) {
        if self.released {
            return;
        }
        if let Some(ctx) = ctx {
            unsafe {
                for pass in self.variant_passes.drain(..) {
                    ctx.device.destroy_render_pass(pass, None);
                }
                if self.pool != vk::CommandPool::null() {
                    ctx.device.destroy_command_pool(self.pool, None);
                }
            }
        }
        self.pool = vk::CommandPool::null();
        self.clones = None;
        self.variant_passes.clear();
        self.state = BoundState::default();
        self.scope = None;
        self.requests.clear();
        self.recording_done = false;
        self.released = true;
        debug!(begin_index = self.begin_index, "draw-call dump context released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(begin: u64, draws: &[u64], passes: &[&[u64]]) -> CommandBufferDumpOptions {
        CommandBufferDumpOptions {
            begin_index: begin,
            draw_indices: draws.to_vec(),
            render_pass_indices: passes.iter().map(|p| p.to_vec()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn clone_budget_matches_guarded_count() {
        let ctx = DrawCallsContext::new(&entry(10, &[12, 14, 16], &[]), false);
        assert_eq!(ctx.required_clones(), 4);
        let ctx = DrawCallsContext::new(&entry(10, &[12], &[]), false);
        assert_eq!(ctx.required_clones(), 2);
    }

    #[test]
    fn dump_before_doubles_boundaries() {
        let ctx = DrawCallsContext::new(&entry(10, &[12, 14], &[]), true);
        assert_eq!(ctx.effective_guarded(), 4);
        assert_eq!(ctx.required_clones(), 5);
    }

    #[test]
    fn secondary_budget_added_on_recalculate() {
        let mut ctx = DrawCallsContext::new(&entry(10, &[12], &[]), false);
        ctx.recalculate(3);
        assert_eq!(ctx.required_clones(), 5);
    }

    #[test]
    fn manual_handling_only_when_dump_point_inside() {
        let ctx = DrawCallsContext::new(&entry(10, &[13], &[&[11, 15], &[20, 25]]), false);
        assert!(ctx.render_pass_needs_manual_handling(11));
        assert!(!ctx.render_pass_needs_manual_handling(20));
        // unknown begin index: forwarded verbatim
        assert!(!ctx.render_pass_needs_manual_handling(99));
    }

    #[test]
    fn guarded_lookup_is_sorted_and_deduped() {
        let ctx = DrawCallsContext::new(&entry(10, &[14, 12, 14], &[]), false);
        assert!(ctx.is_guarded(12));
        assert!(ctx.is_guarded(14));
        assert!(!ctx.is_guarded(13));
        assert_eq!(ctx.effective_guarded(), 2);
    }

    #[test]
    fn release_is_idempotent_without_device() {
        let mut ctx = DrawCallsContext::new(&entry(10, &[12], &[]), false);
        ctx.release(None);
        assert!(ctx.is_released());
        ctx.release(None);
        assert!(ctx.is_released());
        assert_eq!(ctx.clone_count(), 0);
        assert!(ctx.requests_for(0).is_empty());
    }
}
