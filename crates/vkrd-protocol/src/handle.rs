use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// A stable numeric identifier assigned to an API object at capture time.
/// Stored in the stream in place of a native handle; zero is the null id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct CaptureId(pub u64);

impl CaptureId {
    pub const NULL: CaptureId = CaptureId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Object kind tag, used to key the virtualization table and for
/// debugging/validation of cross-kind lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    None,
    Instance,
    PhysicalDevice,
    Device,
    Queue,
    CommandPool,
    CommandBuffer,
    DeviceMemory,
    Buffer,
    Image,
    ImageView,
    Sampler,
    Pipeline,
    PipelineLayout,
    PipelineCache,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    ShaderModule,
    RenderPass,
    Framebuffer,
    Fence,
    Semaphore,
    Event,
    QueryPool,
    Swapchain,
    Surface,
}

/// Per-call metadata delivered with every decoded call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallInfo {
    /// Monotonic index of this call within the capture stream.
    pub index: u64,
    /// Thread id recorded at capture time.
    pub thread_id: u64,
}

impl ApiCallInfo {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            thread_id: 0,
        }
    }
}

/// Wrapper around a handle-typed call argument: carries the capture-time
/// identifier alongside a slot that receives the replay-time handle when the
/// call creates the object.
///
/// The output slot is written by the replay consumer after the real API call
/// succeeds, so the decoder that produced this record can observe the live
/// handle if it needs to (mirroring the two-way flow of the decoded stream).
#[derive(Debug, Clone, Default)]
pub struct HandleDecoder {
    capture_id: CaptureId,
    output: Cell<u64>,
}

impl HandleDecoder {
    pub fn new(capture_id: CaptureId) -> Self {
        Self {
            capture_id,
            output: Cell::new(0),
        }
    }

    pub fn null() -> Self {
        Self::new(CaptureId::NULL)
    }

    pub fn capture_id(&self) -> CaptureId {
        self.capture_id
    }

    pub fn is_null(&self) -> bool {
        self.capture_id.is_null()
    }

    /// Store the replay-time raw handle produced for this argument.
    pub fn set_output(&self, raw: u64) {
        self.output.set(raw);
    }

    pub fn output(&self) -> u64 {
        self.output.get()
    }
}

impl From<u64> for HandleDecoder {
    fn from(id: u64) -> Self {
        Self::new(CaptureId(id))
    }
}

impl Serialize for HandleDecoder {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.capture_id.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HandleDecoder {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(CaptureId::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_capture_id() {
        assert!(CaptureId::NULL.is_null());
        assert!(!CaptureId(7).is_null());
        assert!(HandleDecoder::null().is_null());
    }

    #[test]
    fn decoder_output_slot() {
        let dec = HandleDecoder::new(CaptureId(42));
        assert_eq!(dec.output(), 0);
        dec.set_output(0xdead_beef);
        assert_eq!(dec.capture_id(), CaptureId(42));
        assert_eq!(dec.output(), 0xdead_beef);
    }
}
