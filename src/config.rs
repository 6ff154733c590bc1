// src/config.rs
//! Engine configuration.
//!
//! Plain scalars read at commit time (bind, allocate, recreate). Nothing in here is
//! cached by the subsystems, so changing a value through
//! [`StateEngine::update_config`](crate::engine::StateEngine::update_config) takes effect on
//! the next operation that reads it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Budget sentinel: no texture budget.
pub const TEXTURE_BUDGET_UNLIMITED: u64 = 0;

/// Smallest dynamic buffer we are willing to create.
pub const MIN_DYNAMIC_BUFFER_BYTES: u64 = 4 * 1024;

/// Capacity policy applied when the dynamic buffers are recreated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSizePolicy {
    #[default]
    Normal,
    /// Quarter-size rings while content streams in, leaving room for streamed textures.
    ShrinkWhileStreaming,
}

impl BufferSizePolicy {
    /// Capacity to create for a configured size.
    pub fn apply(self, configured: u64) -> u64 {
        match self {
            BufferSizePolicy::Normal => configured,
            BufferSizePolicy::ShrinkWhileStreaming => (configured / 4).max(MIN_DYNAMIC_BUFFER_BYTES),
        }
    }
}

/// Global texture filtering quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFiltering {
    Point,
    Bilinear,
    #[default]
    Trilinear,
    Anisotropic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on bytes bound per frame. [`TEXTURE_BUDGET_UNLIMITED`] disables it.
    pub texture_budget_bytes: u64,
    pub buffer_size_policy: BufferSizePolicy,
    pub dynamic_vertex_buffer_bytes: u64,
    pub dynamic_index_buffer_bytes: u64,
    pub texture_filtering: TextureFiltering,
    pub mipmapping: bool,
    pub max_anisotropy: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            texture_budget_bytes: TEXTURE_BUDGET_UNLIMITED,
            buffer_size_policy: BufferSizePolicy::Normal,
            dynamic_vertex_buffer_bytes: 4 * 1024 * 1024,
            dynamic_index_buffer_bytes: 1024 * 1024,
            texture_filtering: TextureFiltering::Trilinear,
            mipmapping: true,
            max_anisotropy: 8,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dynamic_vertex_buffer_bytes < MIN_DYNAMIC_BUFFER_BYTES {
            return Err(Error::custom(format!(
                "dynamic_vertex_buffer_bytes must be at least {MIN_DYNAMIC_BUFFER_BYTES}"
            )));
        }
        if self.dynamic_index_buffer_bytes < MIN_DYNAMIC_BUFFER_BYTES {
            return Err(Error::custom(format!(
                "dynamic_index_buffer_bytes must be at least {MIN_DYNAMIC_BUFFER_BYTES}"
            )));
        }
        if !(1..=16).contains(&self.max_anisotropy) {
            return Err(Error::msg("max_anisotropy must be in 1..=16"));
        }
        Ok(())
    }

    #[inline]
    pub fn budget(&self) -> Option<u64> {
        (self.texture_budget_bytes != TEXTURE_BUDGET_UNLIMITED).then_some(self.texture_budget_bytes)
    }

    pub fn with_texture_budget(mut self, bytes: u64) -> Self {
        self.texture_budget_bytes = bytes;
        self
    }

    pub fn with_buffer_size_policy(mut self, policy: BufferSizePolicy) -> Self {
        self.buffer_size_policy = policy;
        self
    }

    pub fn with_dynamic_buffer_sizes(mut self, vertex_bytes: u64, index_bytes: u64) -> Self {
        self.dynamic_vertex_buffer_bytes = vertex_bytes;
        self.dynamic_index_buffer_bytes = index_bytes;
        self
    }

    pub fn with_filtering(mut self, filtering: TextureFiltering) -> Self {
        self.texture_filtering = filtering;
        self
    }

    pub fn with_mipmapping(mut self, enabled: bool) -> Self {
        self.mipmapping = enabled;
        self
    }

    pub fn with_max_anisotropy(mut self, max: u16) -> Self {
        self.max_anisotropy = max;
        self
    }
}
