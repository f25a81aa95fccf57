pub mod calls;
pub mod handle;

pub use calls::VulkanCall;
pub use handle::{ApiCallInfo, CaptureId, HandleDecoder, ObjectKind};
