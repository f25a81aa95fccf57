use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Replay-session configuration, loadable from vkrd.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Physical device index to replay on (None = same index as capture)
    pub gpu_index: Option<u32>,
    /// Compile graphics/compute pipelines on background threads
    #[serde(default)]
    pub async_pipeline_creation: bool,
    /// Worker threads for async pipeline creation
    #[serde(default = "default_pipeline_jobs")]
    pub pipeline_creation_jobs: usize,
    /// Replace captured pipeline-cache blobs with empty caches
    #[serde(default)]
    pub omit_pipeline_cache_data: bool,
    /// Reject captured pipeline-cache blobs whose UUID does not match the
    /// replay device
    #[serde(default = "default_true")]
    pub validate_pipeline_cache_uuid: bool,
    /// SPIR-V substitution: capture id of a shader module -> replacement file
    #[serde(default)]
    pub shader_replacements: Vec<ShaderReplacement>,
    #[serde(default)]
    pub dump: DumpOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderReplacement {
    pub shader_id: u64,
    pub path: String,
}

/// Resource-dump targets: which command-buffer recordings to intercept and
/// which call indices within each to snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpOptions {
    #[serde(default)]
    pub command_buffers: Vec<CommandBufferDumpOptions>,
    /// Call indices of the queue submissions carrying the target recordings
    #[serde(default)]
    pub queue_submit_indices: Vec<u64>,
    /// Snapshot resources before the guarded command instead of after
    #[serde(default)]
    pub dump_before: bool,
    /// Emit one delegate start/end bracket per guarded command instead of
    /// one per submission
    #[serde(default)]
    pub json_per_command: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandBufferDumpOptions {
    /// Call index of the vkBeginCommandBuffer of the target recording
    pub begin_index: u64,
    #[serde(default)]
    pub draw_indices: Vec<u64>,
    /// Per render pass, the call indices of its begin/next-subpass/end calls
    #[serde(default)]
    pub render_pass_indices: Vec<Vec<u64>>,
    #[serde(default)]
    pub dispatch_indices: Vec<u64>,
    #[serde(default)]
    pub trace_rays_indices: Vec<u64>,
    #[serde(default)]
    pub execute_commands_indices: Vec<u64>,
    /// For a secondary command buffer: begin index of the primary recording
    /// that executes it
    pub executed_by: Option<u64>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            gpu_index: None,
            async_pipeline_creation: false,
            pipeline_creation_jobs: default_pipeline_jobs(),
            omit_pipeline_cache_data: false,
            validate_pipeline_cache_uuid: true,
            shader_replacements: Vec::new(),
            dump: DumpOptions::default(),
        }
    }
}

impl ReplayOptions {
    /// Load options from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::ConfigError(e.to_string()))
    }

    /// Load options from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        Self::load(path).unwrap_or_default()
    }

    pub fn is_dump_enabled(&self) -> bool {
        !self.dump.command_buffers.is_empty()
    }

    pub fn dump_entry_for_begin(&self, begin_index: u64) -> Option<&CommandBufferDumpOptions> {
        self.dump
            .command_buffers
            .iter()
            .find(|cb| cb.begin_index == begin_index)
    }

    pub fn shader_replacement_for(&self, shader_id: u64) -> Option<&str> {
        self.shader_replacements
            .iter()
            .find(|r| r.shader_id == shader_id)
            .map(|r| r.path.as_str())
    }
}

impl CommandBufferDumpOptions {
    /// All guarded call indices for this recording, in stream order.
    pub fn guarded_indices(&self) -> Vec<u64> {
        let mut all: Vec<u64> = self
            .draw_indices
            .iter()
            .chain(&self.dispatch_indices)
            .chain(&self.trace_rays_indices)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub fn is_draw_context(&self) -> bool {
        !self.draw_indices.is_empty()
    }

    pub fn is_dispatch_context(&self) -> bool {
        !self.dispatch_indices.is_empty() || !self.trace_rays_indices.is_empty()
    }
}

fn default_pipeline_jobs() -> usize {
    4
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ReplayOptions::default();
        assert!(!opts.is_dump_enabled());
        assert!(opts.validate_pipeline_cache_uuid);
        assert_eq!(opts.pipeline_creation_jobs, 4);
        assert!(opts.dump_entry_for_begin(0).is_none());
    }

    #[test]
    fn parse_dump_table() {
        let toml = r#"
            async_pipeline_creation = true

            [dump]
            queue_submit_indices = [220]
            dump_before = false

            [[dump.command_buffers]]
            begin_index = 210
            draw_indices = [215, 213]
            render_pass_indices = [[211, 216]]
        "#;
        let opts: ReplayOptions = toml::from_str(toml).unwrap();
        assert!(opts.async_pipeline_creation);
        assert!(opts.is_dump_enabled());
        let entry = opts.dump_entry_for_begin(210).unwrap();
        assert_eq!(entry.guarded_indices(), vec![213, 215]);
        assert!(entry.is_draw_context());
        assert!(!entry.is_dispatch_context());
        assert_eq!(opts.dump.queue_submit_indices, vec![220]);
    }

    #[test]
    fn guarded_indices_merge_sorted() {
        let entry = CommandBufferDumpOptions {
            begin_index: 1,
            draw_indices: vec![9, 4],
            dispatch_indices: vec![7],
            trace_rays_indices: vec![4],
            ..Default::default()
        };
        assert_eq!(entry.guarded_indices(), vec![4, 7, 9]);
    }
}
