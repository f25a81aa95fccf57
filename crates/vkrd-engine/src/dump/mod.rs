//! Resource-dump interception: clones targeted command-buffer recordings
//! into per-dump-point spans, submits them one at a time and snapshots the
//! touched resources between spans.

pub mod clone_set;
pub mod dispatch;
pub mod draw_calls;
pub mod state;

use std::collections::HashMap;

use ash::vk;
use tracing::{debug, error, info, warn};
use vkrd_core::options::DumpOptions;
use vkrd_core::ObjectTable;
use vkrd_protocol::calls::{CommandBufferBeginInfo, SubmitInfo};
use vkrd_protocol::{CaptureId, VulkanCall};

use crate::delegate::{DumpDelegate, DumpedBuffer, DumpedImage};
use crate::device::DeviceContext;
use crate::dump::dispatch::DispatchTraceRaysContext;
use crate::dump::draw_calls::DrawCallsContext;
use crate::dump::state::{SnapshotRequest, SnapshotTarget};
use crate::error::{vk_call, ReplayError};
use crate::remap;
use crate::snapshot::{ImageDescription, ResourceSnapshot};

/// Callback invoked when a dump submission hits a device failure the replay
/// cannot recover from.
pub type FatalErrorFn = Box<dyn FnMut(&ReplayError) + Send>;

/// Orchestrates the dumping contexts across recordings and submissions.
pub struct DumpEngine {
    draw_contexts: HashMap<u64, DrawCallsContext>,
    dispatch_contexts: HashMap<u64, DispatchTraceRaysContext>,
    /// Command buffer capture id -> begin index of its intercepted recording
    active_recordings: HashMap<CaptureId, u64>,
    queue_submit_indices: Vec<u64>,
    json_per_command: bool,
    dump_before: bool,
    delegate: Box<dyn DumpDelegate>,
    fatal_error: Option<FatalErrorFn>,
    snapshot: Option<ResourceSnapshot>,
    submits_consumed: usize,
    closed: bool,
}

impl DumpEngine {
    pub fn new(options: &DumpOptions, mut delegate: Box<dyn DumpDelegate>) -> Self {
        let mut draw_contexts = HashMap::new();
        let mut dispatch_contexts = HashMap::new();
        for entry in &options.command_buffers {
            if entry.is_draw_context() || !entry.is_dispatch_context() {
                draw_contexts.insert(
                    entry.begin_index,
                    DrawCallsContext::new(entry, options.dump_before),
                );
            }
            if entry.is_dispatch_context() {
                dispatch_contexts.insert(
                    entry.begin_index,
                    DispatchTraceRaysContext::new(entry, options.dump_before),
                );
            }
        }

        // secondary associations: every secondary needs a primary context to
        // splice its clones into, created implicitly when not configured
        let associations: Vec<(u64, u64)> = options
            .command_buffers
            .iter()
            .filter_map(|e| e.executed_by.map(|p| (p, e.begin_index)))
            .collect();
        for (primary, secondary) in &associations {
            if !draw_contexts.contains_key(primary) {
                let implicit = vkrd_core::options::CommandBufferDumpOptions {
                    begin_index: *primary,
                    ..Default::default()
                };
                draw_contexts.insert(
                    *primary,
                    DrawCallsContext::new(&implicit, options.dump_before),
                );
            }
            if let Some(ctx) = draw_contexts.get_mut(primary) {
                if !ctx.secondaries.contains(secondary) {
                    ctx.secondaries.push(*secondary);
                }
            }
        }
        // clone budgets include the boundaries of every spliced secondary
        let mut budgets: HashMap<u64, usize> = HashMap::new();
        for (primary, secondary) in &associations {
            let mut total = 0;
            if let Some(sec) = draw_contexts.get(secondary) {
                total += sec.effective_guarded();
            }
            if let Some(sec) = dispatch_contexts.get(secondary) {
                total += sec.effective_guarded();
            }
            *budgets.entry(*primary).or_default() += total;
        }
        for (primary, total) in budgets {
            if let Some(ctx) = draw_contexts.get_mut(&primary) {
                ctx.recalculate(total);
            }
        }

        delegate.open();
        info!(
            recordings = options.command_buffers.len(),
            submits = options.queue_submit_indices.len(),
            dump_before = options.dump_before,
            "resource dumping enabled"
        );
        Self {
            draw_contexts,
            dispatch_contexts,
            active_recordings: HashMap::new(),
            queue_submit_indices: options.queue_submit_indices.clone(),
            json_per_command: options.json_per_command,
            dump_before: options.dump_before,
            delegate,
            fatal_error: None,
            snapshot: None,
            submits_consumed: 0,
            closed: false,
        }
    }

    pub fn set_fatal_error_handler(&mut self, handler: FatalErrorFn) {
        self.fatal_error = Some(handler);
    }

    pub fn dump_before(&self) -> bool {
        self.dump_before
    }

    /// Whether this vkBeginCommandBuffer call index targets an intercepted
    /// recording.
    pub fn intercepts_begin(&self, call_index: u64) -> bool {
        self.draw_contexts.contains_key(&call_index)
            || self.dispatch_contexts.contains_key(&call_index)
    }

    pub fn is_recording(&self, cb_id: CaptureId) -> bool {
        self.active_recordings.contains_key(&cb_id)
    }

    /// Activate the dumping contexts for an intercepted recording. Returns
    /// true when the begin was handled and must not be forwarded verbatim.
    pub fn begin_command_buffer(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        cb_id: CaptureId,
        begin_info: &CommandBufferBeginInfo,
    ) -> Result<bool, ReplayError> {
        if !self.intercepts_begin(call_index) {
            return Ok(false);
        }
        let queue_family = table
            .command_buffer_info(cb_id)
            .and_then(|info| table.command_pool_info(info.pool_id))
            .map_or(0, |pool| pool.queue_family_index);
        let flags = vk::CommandBufferUsageFlags::from_raw(begin_info.flags);
        let inheritance = (!begin_info.inheritance_render_pass.is_null()).then(|| {
            (
                remap::render_pass(table, begin_info.inheritance_render_pass),
                begin_info.inheritance_subpass,
                remap::framebuffer(table, begin_info.inheritance_framebuffer),
            )
        });
        if let Some(dc) = self.draw_contexts.get_mut(&call_index) {
            dc.begin_recording(ctx, table, cb_id, queue_family, flags, inheritance)?;
        }
        if let Some(dtc) = self.dispatch_contexts.get_mut(&call_index) {
            dtc.begin_recording(ctx, table, cb_id, queue_family, flags)?;
        }
        self.active_recordings.insert(cb_id, call_index);
        Ok(true)
    }

    /// Route one recorded command to the contexts of its recording.
    pub fn process(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        call: &VulkanCall,
    ) -> Result<(), ReplayError> {
        let Some(cb_id) = call.recording_target() else {
            return Ok(());
        };
        let Some(begin_index) = self.active_recordings.get(&cb_id).copied() else {
            return Ok(());
        };
        if let VulkanCall::CmdExecuteCommands {
            command_buffers, ..
        } = call
        {
            return self.execute_commands(ctx, table, begin_index, command_buffers);
        }
        if let Some(dc) = self.draw_contexts.get_mut(&begin_index) {
            dc.process(ctx, table, call_index, call)?;
        }
        if let Some(dtc) = self.dispatch_contexts.get_mut(&begin_index) {
            dtc.process(ctx, table, call_index, call)?;
        }
        Ok(())
    }

    /// Splice dumped secondaries into the primary's clone stream; execute
    /// the rest verbatim on the active clone.
    fn execute_commands(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        primary_begin: u64,
        secondaries: &[CaptureId],
    ) -> Result<(), ReplayError> {
        for sec_id in secondaries {
            let dumped = self.active_recordings.get(sec_id).copied();
            if let Some(sec_begin) = dumped {
                // a dumped secondary's clones replace it in the stream
                let splice: Option<(Vec<vk::CommandBuffer>, Vec<bool>)> = self
                    .draw_contexts
                    .get(&sec_begin)
                    .filter(|sec| sec.recording_done)
                    .map(|sec| {
                        let clones: Vec<vk::CommandBuffer> = sec.clones().collect();
                        let boundaries = (0..clones.len())
                            .map(|j| !sec.requests_for(j).is_empty())
                            .collect();
                        (clones, boundaries)
                    })
                    .or_else(|| {
                        self.dispatch_contexts
                            .get(&sec_begin)
                            .filter(|sec| sec.recording_done)
                            .map(|sec| {
                                let clones: Vec<vk::CommandBuffer> = sec.clones().collect();
                                let boundaries = (0..clones.len())
                                    .map(|j| !sec.requests_for(j).is_empty())
                                    .collect();
                                (clones, boundaries)
                            })
                    });
                match splice {
                    Some((clones, boundaries)) => {
                        if let Some(primary) = self.draw_contexts.get_mut(&primary_begin) {
                            primary.splice_secondary(ctx, sec_begin, &clones, &boundaries)?;
                        }
                        continue;
                    }
                    None => {
                        warn!(
                            secondary = sec_id.0,
                            "dumped secondary executed before its recording ended"
                        );
                    }
                }
            }
            let handle = remap::command_buffer(table, *sec_id);
            if let Some(primary) = self.draw_contexts.get(&primary_begin) {
                primary.record_execute(ctx, &[handle]);
            }
            if let Some(primary) = self.dispatch_contexts.get(&primary_begin) {
                primary.record_execute(ctx, &[handle]);
            }
        }
        Ok(())
    }

    /// Seal the trailing clones when the original vkEndCommandBuffer
    /// arrives. Returns true when the end was handled.
    pub fn end_command_buffer(
        &mut self,
        ctx: &DeviceContext,
        cb_id: CaptureId,
    ) -> Result<bool, ReplayError> {
        let Some(begin_index) = self.active_recordings.get(&cb_id).copied() else {
            return Ok(false);
        };
        if let Some(dc) = self.draw_contexts.get_mut(&begin_index) {
            dc.end_recording(ctx)?;
        }
        if let Some(dtc) = self.dispatch_contexts.get_mut(&begin_index) {
            dtc.end_recording(ctx)?;
        }
        Ok(true)
    }

    /// A reset recording abandons its clones.
    pub fn reset_command_buffer(&mut self, ctx: Option<&DeviceContext>, cb_id: CaptureId) {
        if let Some(begin_index) = self.active_recordings.remove(&cb_id) {
            if let Some(dc) = self.draw_contexts.get_mut(&begin_index) {
                dc.release(ctx);
            }
            if let Some(dtc) = self.dispatch_contexts.get_mut(&begin_index) {
                dtc.release(ctx);
            }
        }
    }

    pub fn must_dump_submit(&self, call_index: u64, submits: &[SubmitInfo]) -> bool {
        self.queue_submit_indices.contains(&call_index)
            || submits.iter().any(|s| {
                s.command_buffers
                    .iter()
                    .any(|cb| self.active_recordings.contains_key(cb))
            })
    }

    /// Replace the original submission: the non-dumped recordings go out in
    /// one pre-submission carrying the original semaphores, then each clone
    /// is submitted and fenced alone so its resources can be read back.
    #[allow(clippy::too_many_arguments)]
    pub fn queue_submit(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        queue: vk::Queue,
        queue_family: u32,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), ReplayError> {
        let result = self.queue_submit_inner(ctx, table, call_index, queue, queue_family, submits, fence);
        if let Err(err) = &result {
            error!(call_index, %err, "dump submission failed");
            if let Some(handler) = self.fatal_error.as_mut() {
                handler(err);
            }
        }
        if self.consume_submit(call_index) {
            debug!("last registered dump submission consumed, releasing dump resources");
            self.release_all(Some(ctx));
        }
        result
    }

    /// Only submits at registered indices count against the release budget;
    /// recording-triggered submits at other indices leave it untouched. An
    /// empty index list defers release to engine teardown.
    fn consume_submit(&mut self, call_index: u64) -> bool {
        if !self.queue_submit_indices.contains(&call_index) {
            return false;
        }
        self.submits_consumed += 1;
        self.submits_consumed >= self.queue_submit_indices.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_submit_inner(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        queue: vk::Queue,
        queue_family: u32,
        submits: &[SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), ReplayError> {
        struct Decoded {
            wait: Vec<vk::Semaphore>,
            wait_stages: Vec<vk::PipelineStageFlags>,
            signal: Vec<vk::Semaphore>,
            plain: Vec<vk::CommandBuffer>,
        }
        let mut dumped: Vec<u64> = Vec::new();
        let decoded: Vec<Decoded> = submits
            .iter()
            .map(|s| {
                let mut plain = Vec::new();
                for cb in &s.command_buffers {
                    match self.active_recordings.get(cb) {
                        Some(begin_index) => dumped.push(*begin_index),
                        None => plain.push(remap::command_buffer(table, *cb)),
                    }
                }
                Decoded {
                    wait: s
                        .wait_semaphores
                        .iter()
                        .map(|id| remap::semaphore(table, *id))
                        .collect(),
                    wait_stages: s
                        .wait_dst_stage_masks
                        .iter()
                        .map(|m| vk::PipelineStageFlags::from_raw(*m))
                        .collect(),
                    signal: s
                        .signal_semaphores
                        .iter()
                        .map(|id| remap::semaphore(table, *id))
                        .collect(),
                    plain,
                }
            })
            .collect();

        // one pre-submission keeps the capture's semaphore graph intact
        let infos: Vec<vk::SubmitInfo> = decoded
            .iter()
            .map(|d| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&d.wait)
                    .wait_dst_stage_mask(&d.wait_stages)
                    .command_buffers(&d.plain)
                    .signal_semaphores(&d.signal)
            })
            .collect();
        vk_call("vkQueueSubmit", unsafe {
            ctx.device.queue_submit(queue, &infos, fence)
        })?;
        vk_call("vkQueueWaitIdle", unsafe { ctx.device.queue_wait_idle(queue) })?;

        if dumped.is_empty() {
            return Ok(());
        }

        if self.snapshot.as_ref().is_some_and(|s| s.queue_family() != queue_family) {
            if let Some(mut old) = self.snapshot.take() {
                old.destroy(ctx);
            }
        }
        if self.snapshot.is_none() {
            self.snapshot = Some(ResourceSnapshot::new(ctx, queue, queue_family)?);
        }

        let clone_fence = vk_call("vkCreateFence", unsafe {
            ctx.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        })?;
        let result = self.submit_clones(ctx, table, call_index, queue, &dumped, clone_fence);
        unsafe { ctx.device.destroy_fence(clone_fence, None) };
        result
    }

    fn submit_clones(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        call_index: u64,
        queue: vk::Queue,
        dumped: &[u64],
        fence: vk::Fence,
    ) -> Result<(), ReplayError> {
        if !self.json_per_command {
            self.delegate.dump_start(call_index);
        }
        let mut outcome = Ok(());
        'outer: for begin_index in dumped {
            // a recording may carry both kinds of context; each owns a full
            // clone stream and is replayed in turn
            let streams: Vec<(Vec<vk::CommandBuffer>, Vec<Vec<SnapshotRequest>>)> = self
                .draw_contexts
                .get(begin_index)
                .map(|dc| {
                    let clones: Vec<_> = dc.clones().collect();
                    let reqs = (0..clones.len()).map(|j| dc.requests_for(j)).collect();
                    (clones, reqs)
                })
                .into_iter()
                .chain(self.dispatch_contexts.get(begin_index).map(|dtc| {
                    let clones: Vec<_> = dtc.clones().collect();
                    let reqs = (0..clones.len()).map(|j| dtc.requests_for(j)).collect();
                    (clones, reqs)
                }))
                .collect();
            for (clones, requests) in streams {
                for (j, clone) in clones.iter().enumerate() {
                    let cbs = [*clone];
                    let info = vk::SubmitInfo::default().command_buffers(&cbs);
                    let submitted = vk_call("vkQueueSubmit", unsafe {
                        ctx.device.queue_submit(queue, &[info], fence)
                    })
                    .and_then(|()| {
                        vk_call("vkWaitForFences", unsafe {
                            ctx.device.wait_for_fences(&[fence], true, u64::MAX)
                        })
                    })
                    .and_then(|()| {
                        vk_call("vkResetFences", unsafe { ctx.device.reset_fences(&[fence]) })
                    });
                    if let Err(err) = submitted {
                        outcome = Err(err);
                        break 'outer;
                    }
                    for request in &requests[j] {
                        if let Err(err) = self.serve_request(ctx, table, request) {
                            outcome = Err(err);
                            break 'outer;
                        }
                    }
                }
            }
        }
        if !self.json_per_command {
            self.delegate.dump_end();
        }
        outcome
    }

    fn serve_request(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        request: &SnapshotRequest,
    ) -> Result<(), ReplayError> {
        match request {
            SnapshotRequest::Own {
                command_index,
                targets,
                before,
            } => self.serve_targets(ctx, table, *command_index, targets, *before),
            SnapshotRequest::Secondary {
                begin_index,
                clone_index,
            } => {
                // the boundary belongs to a spliced secondary clone; its own
                // request list says what to read back
                let nested: Vec<SnapshotRequest> = self
                    .draw_contexts
                    .get(begin_index)
                    .map(|sec| sec.requests_for(*clone_index))
                    .or_else(|| {
                        self.dispatch_contexts
                            .get(begin_index)
                            .map(|sec| sec.requests_for(*clone_index))
                    })
                    .unwrap_or_default();
                for req in &nested {
                    if let SnapshotRequest::Own {
                        command_index,
                        targets,
                        before,
                    } = req
                    {
                        self.serve_targets(ctx, table, *command_index, targets, *before)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn serve_targets(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        command_index: u64,
        targets: &[SnapshotTarget],
        before: bool,
    ) -> Result<(), ReplayError> {
        if self.json_per_command {
            self.delegate.dump_start(command_index);
        }
        let result = (|| {
            for target in targets {
                match target {
                    SnapshotTarget::ImageView { id, layout } => {
                        self.serve_image_view(ctx, table, command_index, *id, *layout, before)?;
                    }
                    SnapshotTarget::Buffer { id, offset, size } => {
                        self.serve_buffer(ctx, table, command_index, *id, *offset, *size, before)?;
                    }
                }
            }
            Ok(())
        })();
        if self.json_per_command {
            self.delegate.dump_end();
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn serve_image_view(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        command_index: u64,
        view_id: CaptureId,
        layout: i32,
        before: bool,
    ) -> Result<(), ReplayError> {
        let Some(view) = table.image_view_info(view_id) else {
            warn!(view = view_id.0, "snapshot target view unknown, skipping");
            return Ok(());
        };
        let Some(info) = table.image_info(view.image_id) else {
            warn!(image = view.image_id.0, "snapshot target image unknown, skipping");
            return Ok(());
        };
        let image = remap::image(table, view.image_id);
        let desc = ImageDescription {
            image_type: vk::ImageType::from_raw(info.image_type),
            format: vk::Format::from_raw(info.format),
            extent: info.extent,
            mip_levels: info.mip_levels,
            array_layers: info.array_layers,
            samples: vk::SampleCountFlags::from_raw(info.samples),
            tiling: vk::ImageTiling::from_raw(info.tiling),
            aspect: vk::ImageAspectFlags::from_raw(view.aspect_mask),
            current_layout: vk::ImageLayout::from_raw(layout),
        };
        let snapshot = self.snapshot.as_mut().ok_or(ReplayError::NoDevice)?;
        let shot = snapshot.read_image(ctx, image, &desc, None, None, true)?;
        self.delegate.dump_image(DumpedImage {
            image_id: view.image_id,
            command_index,
            format: shot.format.as_raw(),
            extent: shot.extent,
            subresource_sizes: shot.subresources,
            bytes: shot.bytes,
            scaling_applied: shot.scaling_applied,
            before,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn serve_buffer(
        &mut self,
        ctx: &DeviceContext,
        table: &ObjectTable,
        command_index: u64,
        buffer_id: CaptureId,
        offset: u64,
        size: u64,
        before: bool,
    ) -> Result<(), ReplayError> {
        let Some(info) = table.buffer_info(buffer_id) else {
            warn!(buffer = buffer_id.0, "snapshot target buffer unknown, skipping");
            return Ok(());
        };
        let size = if size == vk::WHOLE_SIZE {
            info.size.saturating_sub(offset)
        } else {
            size.min(info.size.saturating_sub(offset))
        };
        if size == 0 {
            return Ok(());
        }
        let buffer = remap::buffer(table, buffer_id);
        let snapshot = self.snapshot.as_mut().ok_or(ReplayError::NoDevice)?;
        let bytes = snapshot.read_buffer(ctx, buffer, offset, size)?;
        self.delegate.dump_buffer(DumpedBuffer {
            buffer_id,
            command_index,
            bytes,
            before,
        });
        Ok(())
    }

    /// Tear down every context and the snapshot utility. Idempotent; the
    /// delegate is closed exactly once.
    pub fn release_all(&mut self, ctx: Option<&DeviceContext>) {
        for dc in self.draw_contexts.values_mut() {
            dc.release(ctx);
        }
        for dtc in self.dispatch_contexts.values_mut() {
            dtc.release(ctx);
        }
        if let Some(ctx) = ctx {
            if let Some(mut snapshot) = self.snapshot.take() {
                snapshot.destroy(ctx);
            }
        }
        self.active_recordings.clear();
        if !self.closed {
            self.delegate.close();
            self.closed = true;
        }
    }

    pub fn context_count(&self) -> usize {
        self.draw_contexts.len() + self.dispatch_contexts.len()
    }

    pub fn draw_context(&self, begin_index: u64) -> Option<&DrawCallsContext> {
        self.draw_contexts.get(&begin_index)
    }

    pub fn dispatch_context(&self, begin_index: u64) -> Option<&DispatchTraceRaysContext> {
        self.dispatch_contexts.get(&begin_index)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use vkrd_core::options::CommandBufferDumpOptions;

    use crate::delegate::{DelegateEvent, RecordingDelegate};

    use super::*;

    fn engine_with(
        entries: Vec<CommandBufferDumpOptions>,
        submits: Vec<u64>,
    ) -> (DumpEngine, Arc<Mutex<RecordingDelegate>>) {
        let delegate = Arc::new(Mutex::new(RecordingDelegate::new()));
        let options = DumpOptions {
            command_buffers: entries,
            queue_submit_indices: submits,
            ..Default::default()
        };
        let engine = DumpEngine::new(&options, Box::new(Arc::clone(&delegate)));
        (engine, delegate)
    }

    #[test]
    fn contexts_split_by_command_kind() {
        let (engine, _) = engine_with(
            vec![
                CommandBufferDumpOptions {
                    begin_index: 10,
                    draw_indices: vec![12],
                    ..Default::default()
                },
                CommandBufferDumpOptions {
                    begin_index: 20,
                    dispatch_indices: vec![22],
                    ..Default::default()
                },
                CommandBufferDumpOptions {
                    begin_index: 30,
                    draw_indices: vec![31],
                    dispatch_indices: vec![33],
                    ..Default::default()
                },
            ],
            vec![40],
        );
        assert!(engine.draw_context(10).is_some());
        assert!(engine.dispatch_context(10).is_none());
        assert!(engine.draw_context(20).is_none());
        assert!(engine.dispatch_context(20).is_some());
        assert!(engine.draw_context(30).is_some());
        assert!(engine.dispatch_context(30).is_some());
        assert_eq!(engine.context_count(), 4);
    }

    #[test]
    fn entry_without_indices_becomes_draw_context() {
        let (engine, _) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 5,
                ..Default::default()
            }],
            vec![],
        );
        assert!(engine.draw_context(5).is_some());
        assert_eq!(engine.draw_context(5).map(|c| c.required_clones()), Some(1));
    }

    #[test]
    fn secondary_association_creates_implicit_primary() {
        let (engine, _) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 50,
                draw_indices: vec![52, 54],
                executed_by: Some(40),
                ..Default::default()
            }],
            vec![60],
        );
        let primary = engine.draw_context(40).unwrap();
        assert_eq!(primary.secondaries, vec![50]);
        // two secondary boundaries plus the trailing clone
        assert_eq!(primary.required_clones(), 3);
        assert_eq!(engine.draw_context(50).map(|c| c.required_clones()), Some(3));
    }

    #[test]
    fn secondary_budget_counts_both_context_kinds() {
        let (engine, _) = engine_with(
            vec![
                CommandBufferDumpOptions {
                    begin_index: 40,
                    draw_indices: vec![41],
                    ..Default::default()
                },
                CommandBufferDumpOptions {
                    begin_index: 50,
                    draw_indices: vec![52],
                    dispatch_indices: vec![53],
                    executed_by: Some(40),
                    ..Default::default()
                },
            ],
            vec![60],
        );
        let primary = engine.draw_context(40).unwrap();
        // own draw + secondary draw + secondary dispatch + trailing
        assert_eq!(primary.required_clones(), 4);
    }

    #[test]
    fn delegate_opens_on_construction_and_closes_once() {
        let (mut engine, delegate) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 10,
                draw_indices: vec![12],
                ..Default::default()
            }],
            vec![20],
        );
        assert_eq!(delegate.lock().events, vec![DelegateEvent::Open]);
        engine.release_all(None);
        engine.release_all(None);
        assert_eq!(
            delegate.lock().events,
            vec![DelegateEvent::Open, DelegateEvent::Close]
        );
        assert!(engine.draw_context(10).unwrap().is_released());
    }

    #[test]
    fn unregistered_submit_does_not_consume_release_budget() {
        let (mut engine, delegate) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 10,
                draw_indices: vec![12],
                ..Default::default()
            }],
            vec![900],
        );
        // a submit carrying an actively recorded buffer dumps at call 500,
        // before the registered submit; it must not trigger release
        assert!(!engine.consume_submit(500));
        assert_eq!(delegate.lock().events, vec![DelegateEvent::Open]);
        assert!(engine.consume_submit(900));
    }

    #[test]
    fn empty_submit_list_defers_release_to_teardown() {
        let (mut engine, delegate) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 10,
                draw_indices: vec![12],
                ..Default::default()
            }],
            vec![],
        );
        assert!(!engine.consume_submit(500));
        assert!(!engine.consume_submit(501));
        assert_eq!(delegate.lock().events, vec![DelegateEvent::Open]);
        engine.release_all(None);
        assert_eq!(
            delegate.lock().events,
            vec![DelegateEvent::Open, DelegateEvent::Close]
        );
    }

    #[test]
    fn must_dump_submit_matches_configured_indices() {
        let (engine, _) = engine_with(
            vec![CommandBufferDumpOptions {
                begin_index: 10,
                draw_indices: vec![12],
                ..Default::default()
            }],
            vec![20, 25],
        );
        assert!(engine.must_dump_submit(20, &[]));
        assert!(engine.must_dump_submit(25, &[]));
        assert!(!engine.must_dump_submit(21, &[]));
    }
}
