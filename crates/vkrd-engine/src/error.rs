use ash::vk;
use vkrd_protocol::ObjectKind;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to load Vulkan library: {0}")]
    EntryLoad(String),

    #[error("{call} failed: {result:?}")]
    Device {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no replay device created yet")]
    NoDevice,

    #[error("unknown {kind:?} handle id {id}")]
    UnknownHandle { kind: ObjectKind, id: u64 },

    #[error("shader replacement {path}: {source}")]
    ShaderReplacement {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("{call} failed: {result:?}")]
    Device {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no suitable memory type for staging buffer (type bits {type_bits:#x})")]
    NoStagingMemoryType { type_bits: u32 },

    #[error("staging buffer mapping failed: {0:?}")]
    MapFailed(vk::Result),
}

/// Shorthand for wrapping a `VkResult`-returning call site.
pub(crate) fn vk_call<T>(
    call: &'static str,
    result: ash::prelude::VkResult<T>,
) -> Result<T, ReplayError> {
    result.map_err(|result| ReplayError::Device { call, result })
}

pub(crate) fn vk_snap<T>(
    call: &'static str,
    result: ash::prelude::VkResult<T>,
) -> Result<T, SnapshotError> {
    result.map_err(|result| SnapshotError::Device { call, result })
}
