//! Configuration module for HTTP flow inspection
//!
//! Configuration is loaded from the Envoy plugin configuration (JSON),
//! not from external files. This avoids file I/O in the Wasm sandbox.

use crate::enums::Direction;
use serde::Deserialize;

/// Smallest usable pipeline: one live entry plus the sacrificed slot
pub const MIN_PIPELINE_DEPTH: usize = 2;

/// Flow inspection configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FlowConfig {
    /// Slots in the pipelined-transaction ring (one slot is never used)
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,

    /// Emit construct/destruct notices for every flow
    #[serde(default)]
    pub lifecycle_notices: bool,

    /// Dump flow diagnostics when a flow is destroyed
    #[serde(default)]
    pub test_output: bool,

    /// Inflate gzip-coded bodies
    #[serde(default = "default_true")]
    pub decompress_gzip: bool,

    /// Inflate deflate-coded bodies
    #[serde(default = "default_true")]
    pub decompress_deflate: bool,

    /// Track response charsets for normalization
    #[serde(default = "default_true")]
    pub normalize_utf: bool,

    /// Request body bytes handed to detection, negative = unlimited
    #[serde(default = "default_depth")]
    pub request_depth: i64,

    /// Response body bytes handed to detection, negative = unlimited
    #[serde(default = "default_depth")]
    pub response_depth: i64,

    /// Body bytes handed to file processing, negative = unlimited
    #[serde(default = "default_depth")]
    pub file_depth: i64,
}

fn default_pipeline_depth() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_depth() -> i64 {
    -1
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pipeline_depth: default_pipeline_depth(),
            lifecycle_notices: false,
            test_output: false,
            decompress_gzip: true,
            decompress_deflate: true,
            normalize_utf: true,
            request_depth: default_depth(),
            response_depth: default_depth(),
            file_depth: default_depth(),
        }
    }
}

impl FlowConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        let config: FlowConfig =
            serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_depth < MIN_PIPELINE_DEPTH {
            return Err(ConfigError::InvalidPipelineDepth(self.pipeline_depth));
        }
        Ok(())
    }

    /// Body depth for a direction's detection, `None` when unlimited
    pub fn detect_depth(&self, direction: Direction) -> Option<i64> {
        let depth = match direction {
            Direction::Client => self.request_depth,
            Direction::Server => self.response_depth,
        };
        (depth >= 0).then_some(depth)
    }

    /// Body depth for file processing, `None` when unlimited
    pub fn file_depth(&self) -> Option<i64> {
        (self.file_depth >= 0).then_some(self.file_depth)
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
    InvalidPipelineDepth(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ConfigError::InvalidPipelineDepth(d) => write!(
                f,
                "Invalid pipeline_depth {}: must be at least {}",
                d, MIN_PIPELINE_DEPTH
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
