use ash::vk;
use tracing::{debug, warn};
use vkrd_core::options::CommandBufferDumpOptions;
use vkrd_core::ObjectTable;
use vkrd_protocol::calls::StridedDeviceAddressRegion;
use vkrd_protocol::{CaptureId, VulkanCall};

use crate::convert;
use crate::device::DeviceContext;
use crate::dump::clone_set::{required_clone_count, CloneSet};
use crate::dump::state::{
    BoundState, DescriptorBinding, SnapshotRequest, SnapshotTarget,
};
use crate::error::{vk_call, ReplayError};
use crate::remap;

// Raw VkDescriptorType values for the writable bindings a dispatch touches.
const DESCRIPTOR_TYPE_STORAGE_IMAGE: i32 = 3;
const DESCRIPTOR_TYPE_STORAGE_TEXEL_BUFFER: i32 = 5;
const DESCRIPTOR_TYPE_STORAGE_BUFFER: i32 = 7;
const DESCRIPTOR_TYPE_STORAGE_BUFFER_DYNAMIC: i32 = 9;

/// Per-begin-index dumping context for guarded dispatch and trace-rays
/// commands. Same clone machinery as the draw-call context, but the snapshot
/// targets come from the storage descriptors bound at the dump point rather
/// than from an open rendering scope.
pub struct DispatchTraceRaysContext {
    pub begin_index: u64,
    guarded: Vec<u64>,
    pub execute_commands_indices: Vec<u64>,
    dump_before: bool,
    pub executed_by: Option<u64>,
    pub secondaries: Vec<u64>,
    secondary_guarded: usize,

    pub original_cb_id: CaptureId,
    level: vk::CommandBufferLevel,
    clone_begin_flags: vk::CommandBufferUsageFlags,
    pool: vk::CommandPool,
    clones: Option<CloneSet>,
    state: BoundState,
    requests: Vec<(usize, SnapshotRequest)>,
    pub recording_done: bool,
    released: bool,
}

impl DispatchTraceRaysContext {
    pub fn new(entry: &CommandBufferDumpOptions, dump_before: bool) -> Self {
        let mut guarded = entry.dispatch_indices.clone();
        guarded.extend_from_slice(&entry.trace_rays_indices);
        guarded.sort_unstable();
        guarded.dedup();
        Self {
            begin_index: entry.begin_index,
            guarded,
            execute_commands_indices: entry.execute_commands_indices.clone(),
            dump_before,
            executed_by: entry.executed_by,
            secondaries: Vec::new(),
            secondary_guarded: 0,
            original_cb_id: CaptureId::NULL,
            level: vk::CommandBufferLevel::PRIMARY,
            clone_begin_flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            pool: vk::CommandPool::null(),
            clones: None,
            state: BoundState::default(),
            requests: Vec::new(),
            recording_done: false,
            released: false,
        }
    }

    pub fn effective_guarded(&self) -> usize {
        self.guarded.len() * if self.dump_before { 2 } else { 1 }
    }

    pub fn required_clones(&self) -> usize {
        required_clone_count(self.effective_guarded(), self.secondary_guarded)
    }

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

    pub fn begin_recording(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        cb_id: CaptureId,
        queue_family: u32,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), ReplayError> {
        self.release(Some(ctx));
        self.released = false;
        self.recording_done = false;
        self.original_cb_id = cb_id;
        self.clone_begin_flags = flags | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
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
            "dispatch dump recording started"
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
        let begin = vk::CommandBufferBeginInfo::default().flags(self.clone_begin_flags);
        vk_call("vkBeginCommandBuffer", unsafe {
            ctx.device.begin_command_buffer(cb, &begin)
        })
    }

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
            VulkanCall::CmdDispatch { .. }
            | VulkanCall::CmdDispatchIndirect { .. }
            | VulkanCall::CmdTraceRays { .. } => {
                self.record_dispatch(ctx, table, call_index, call)?;
            }
            other => {
                debug!(call_index, call = ?std::mem::discriminant(other), "recorded call not routed to clones");
            }
        }
        Ok(())
    }

    fn record_dispatch(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        call: &VulkanCall,
    ) -> Result<(), ReplayError> {
        let trace = matches!(call, VulkanCall::CmdTraceRays { .. });
        let guarded = self.is_guarded(call_index);
        if guarded && self.dump_before {
            let targets = self.storage_targets(table, trace);
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
        match call {
            VulkanCall::CmdDispatch {
                group_count_x,
                group_count_y,
                group_count_z,
                ..
            } => unsafe {
                ctx.device
                    .cmd_dispatch(active, *group_count_x, *group_count_y, *group_count_z);
            },
            VulkanCall::CmdDispatchIndirect { buffer, offset, .. } => unsafe {
                ctx.device
                    .cmd_dispatch_indirect(active, remap::buffer(table, *buffer), *offset);
            },
            VulkanCall::CmdTraceRays {
                raygen_table,
                miss_table,
                hit_table,
                callable_table,
                width,
                height,
                depth,
                ..
            } => {
                if let Some(rt) = ctx.ray_tracing.as_ref() {
                    let region = |r: &StridedDeviceAddressRegion| {
                        vk::StridedDeviceAddressRegionKHR::default()
                            .device_address(r.device_address)
                            .stride(r.stride)
                            .size(r.size)
                    };
                    unsafe {
                        rt.cmd_trace_rays(
                            active,
                            &region(raygen_table),
                            &region(miss_table),
                            &region(hit_table),
                            &region(callable_table),
                            *width,
                            *height,
                            *depth,
                        );
                    }
                } else {
                    warn!(call_index, "trace rays recorded without the ray tracing extension");
                }
            }
            _ => {}
        }
        if guarded {
            let targets = self.storage_targets(table, trace);
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

    /// The storage buffers and storage images reachable from the descriptor
    /// sets bound at the dump point. Read-only bindings are skipped; a
    /// dispatch cannot have changed them.
    fn storage_targets(&self, table: &ObjectTable, trace: bool) -> Vec<SnapshotTarget> {
        let bindings = if trace {
            &self.state.ray_tracing_descriptors
        } else {
            &self.state.compute_descriptors
        };
        let mut targets = Vec::new();
        for binding in bindings {
            for set_id in &binding.set_ids {
                let Some(info) = table.descriptor_set_info(*set_id) else {
                    continue;
                };
                for slot in info.bindings.values() {
                    match slot.descriptor_type {
                        DESCRIPTOR_TYPE_STORAGE_BUFFER
                        | DESCRIPTOR_TYPE_STORAGE_BUFFER_DYNAMIC
                        | DESCRIPTOR_TYPE_STORAGE_TEXEL_BUFFER => {
                            for id in &slot.buffer_ids {
                                if !id.is_null() {
                                    targets.push(SnapshotTarget::Buffer {
                                        id: *id,
                                        offset: 0,
                                        size: vk::WHOLE_SIZE,
                                    });
                                }
                            }
                        }
                        DESCRIPTOR_TYPE_STORAGE_IMAGE => {
                            for id in &slot.image_view_ids {
                                if !id.is_null() {
                                    targets.push(SnapshotTarget::ImageView {
                                        id: *id,
                                        layout: vk::ImageLayout::GENERAL.as_raw(),
                                    });
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        targets
    }

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
            self.recording_done = true;
            return Ok(());
        };
        vk_call("vkEndCommandBuffer", unsafe {
            ctx.device.end_command_buffer(active)
        })?;
        let Some(next) = self.clones.as_mut().and_then(CloneSet::advance) else {
            self.recording_done = true;
            return Ok(());
        };
        self.begin_clone(ctx, next)?;
        self.state.replay(&ctx.device, next);
        Ok(())
    }

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

    pub fn record_execute(&self, ctx: &DeviceContext, cbs: &[vk::CommandBuffer]) {
        if let Some(active) = self.clones.as_ref().and_then(CloneSet::active) {
            unsafe { ctx.device.cmd_execute_commands(active, cbs) };
        }
    }

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

    pub fn release(&mut self, ctx: Option<&DeviceContext>) {
        if self.released {
            return;
        }
        if let Some(ctx) = ctx {
            if self.pool != vk::CommandPool::null() {
                unsafe { ctx.device.destroy_command_pool(self.pool, None) };
            }
        }
        self.pool = vk::CommandPool::null();
        self.clones = None;
        self.state = BoundState::default();
        self.requests.clear();
        self.recording_done = false;
        self.released = true;
        debug!(begin_index = self.begin_index, "dispatch dump context released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use vkrd_core::object_table::{DescriptorBindingInfo, DescriptorSetInfo};

    use super::*;

    fn entry(begin: u64, dispatches: &[u64], traces: &[u64]) -> CommandBufferDumpOptions {
        CommandBufferDumpOptions {
            begin_index: begin,
            dispatch_indices: dispatches.to_vec(),
            trace_rays_indices: traces.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn dispatch_and_trace_indices_merge() {
        let ctx = DispatchTraceRaysContext::new(&entry(5, &[8, 12], &[10]), false);
        assert!(ctx.is_guarded(8));
        assert!(ctx.is_guarded(10));
        assert!(ctx.is_guarded(12));
        assert_eq!(ctx.required_clones(), 4);
    }

    #[test]
    fn dump_before_doubles_boundaries() {
        let ctx = DispatchTraceRaysContext::new(&entry(5, &[8], &[]), true);
        assert_eq!(ctx.effective_guarded(), 2);
        assert_eq!(ctx.required_clones(), 3);
    }

    #[test]
    fn storage_targets_skip_read_only_bindings() {
        let table = ObjectTable::new();
        table.add_descriptor_pool(CaptureId(1), 0x10);
        let mut bindings = std::collections::HashMap::new();
        bindings.insert(
            0,
            DescriptorBindingInfo {
                descriptor_type: DESCRIPTOR_TYPE_STORAGE_BUFFER,
                buffer_ids: vec![CaptureId(100)],
                image_view_ids: Vec::new(),
            },
        );
        bindings.insert(
            1,
            DescriptorBindingInfo {
                // uniform buffer, never snapshotted
                descriptor_type: 6,
                buffer_ids: vec![CaptureId(101)],
                image_view_ids: Vec::new(),
            },
        );
        bindings.insert(
            2,
            DescriptorBindingInfo {
                descriptor_type: DESCRIPTOR_TYPE_STORAGE_IMAGE,
                buffer_ids: Vec::new(),
                image_view_ids: vec![CaptureId(200)],
            },
        );
        table.add_descriptor_set(
            CaptureId(2),
            0x20,
            DescriptorSetInfo {
                pool_id: CaptureId(1),
                bindings,
            },
        );

        let mut ctx = DispatchTraceRaysContext::new(&entry(5, &[8], &[]), false);
        ctx.state.compute_descriptors.push(DescriptorBinding {
            layout: vk::PipelineLayout::null(),
            first_set: 0,
            sets: vec![vk::DescriptorSet::null()],
            set_ids: vec![CaptureId(2)],
            dynamic_offsets: Vec::new(),
        });
        let targets = ctx.storage_targets(&table, false);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().any(|t| matches!(
            t,
            SnapshotTarget::Buffer { id, .. } if *id == CaptureId(100)
        )));
        assert!(targets.iter().any(|t| matches!(
            t,
            SnapshotTarget::ImageView { id, .. } if *id == CaptureId(200)
        )));
    }

    #[test]
    fn release_is_idempotent_without_device() {
        let mut ctx = DispatchTraceRaysContext::new(&entry(5, &[8], &[]), false);
        ctx.release(None);
        assert!(ctx.is_released());
        ctx.release(None);
        assert!(ctx.is_released());
        assert_eq!(ctx.clone_count(), 0);
    }
}
