use vkrd_protocol::CaptureId;

/// A snapshotted image resource handed to the output delegate.
#[derive(Debug, Clone)]
pub struct DumpedImage {
    pub image_id: CaptureId,
    /// Call index of the guarded command this snapshot belongs to
    pub command_index: u64,
    /// Raw VkFormat value of the returned bytes
    pub format: i32,
    pub extent: [u32; 3],
    /// (byte offset, byte size) per subresource, mip-major
    pub subresource_sizes: Vec<(u64, u64)>,
    pub bytes: Vec<u8>,
    /// False when a requested conversion or scaling was skipped and the
    /// bytes are in the native format/extent
    pub scaling_applied: bool,
    /// True when this is the pre-execution snapshot of a dump-before pair
    pub before: bool,
}

#[derive(Debug, Clone)]
pub struct DumpedBuffer {
    pub buffer_id: CaptureId,
    pub command_index: u64,
    pub bytes: Vec<u8>,
    pub before: bool,
}

/// Output sink for dumped resources. The engine produces host-memory bytes
/// and brackets them with start/end events; persistence and formatting
/// belong to the implementor.
pub trait DumpDelegate {
    fn open(&mut self);
    fn close(&mut self);
    /// Bracket a batch of resource writes. Per-submission by default; per
    /// guarded command when json-per-command is configured.
    fn dump_start(&mut self, submit_index: u64);
    fn dump_end(&mut self);
    fn dump_image(&mut self, image: DumpedImage);
    fn dump_buffer(&mut self, buffer: DumpedBuffer);
}

/// Delegate event log, used by tests to assert bracketing and write order.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateEvent {
    Open,
    Close,
    DumpStart(u64),
    DumpEnd,
    Image { image_id: u64, command_index: u64, before: bool },
    Buffer { buffer_id: u64, command_index: u64, before: bool },
}

/// In-memory delegate that records the event sequence.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pub events: Vec<DelegateEvent>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, DelegateEvent::Image { .. }))
            .count()
    }
}

/// Shared-handle forwarding, so a caller can keep inspecting a delegate it
/// has handed to the engine.
impl<T: DumpDelegate> DumpDelegate for std::sync::Arc<parking_lot::Mutex<T>> {
    fn open(&mut self) {
        self.lock().open();
    }

    fn close(&mut self) {
        self.lock().close();
    }

    fn dump_start(&mut self, submit_index: u64) {
        self.lock().dump_start(submit_index);
    }

    fn dump_end(&mut self) {
        self.lock().dump_end();
    }

    fn dump_image(&mut self, image: DumpedImage) {
        self.lock().dump_image(image);
    }

    fn dump_buffer(&mut self, buffer: DumpedBuffer) {
        self.lock().dump_buffer(buffer);
    }
}

impl DumpDelegate for RecordingDelegate {
    fn open(&mut self) {
        self.events.push(DelegateEvent::Open);
    }

    fn close(&mut self) {
        self.events.push(DelegateEvent::Close);
    }

    fn dump_start(&mut self, submit_index: u64) {
        self.events.push(DelegateEvent::DumpStart(submit_index));
    }

    fn dump_end(&mut self) {
        self.events.push(DelegateEvent::DumpEnd);
    }

    fn dump_image(&mut self, image: DumpedImage) {
        self.events.push(DelegateEvent::Image {
            image_id: image.image_id.0,
            command_index: image.command_index,
            before: image.before,
        });
    }

    fn dump_buffer(&mut self, buffer: DumpedBuffer) {
        self.events.push(DelegateEvent::Buffer {
            buffer_id: buffer.buffer_id.0,
            command_index: buffer.command_index,
            before: buffer.before,
        });
    }
}
