// src/state/snapshot.rs
//! Immutable compiled pipeline configurations.
//!
//! A material pass asks for a snapshot once at load time and afterwards refers to it by
//! [`SnapshotId`]. Identical configurations share one id.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use xxhash_rust::xxh3::Xxh3;

use super::groups::{BlendState, DepthStencilState, RasterState, ShaderBinding, TextureStageOps};
use super::shadow::{ShadowState, MAX_TEXTURE_STAGES};
use crate::commit::ShadingMode;
use crate::device::FogMode;

type Xxh3Map<K, V> = HashMap<K, V, BuildHasherDefault<Xxh3>>;

/// Opaque snapshot identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(u32);

impl SnapshotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything a snapshot governs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    pub depth_stencil: DepthStencilState,
    pub blend: BlendState,
    pub raster: RasterState,
    pub stages: [TextureStageOps; MAX_TEXTURE_STAGES],
    pub fog_mode: FogMode,
    pub shaders: ShaderBinding,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::default(),
            raster: RasterState::default(),
            stages: std::array::from_fn(|i| TextureStageOps::defaults_for(i as u32)),
            fog_mode: FogMode::None,
            shaders: ShaderBinding::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_raster(mut self, raster: RasterState) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_stage(mut self, stage: usize, ops: TextureStageOps) -> Self {
        if let Some(slot) = self.stages.get_mut(stage) {
            *slot = ops;
        } else {
            log::error!("texture stage {stage} out of range");
            debug_assert!(false, "texture stage {stage} out of range");
        }
        self
    }

    pub fn with_fog_mode(mut self, fog_mode: FogMode) -> Self {
        self.fog_mode = fog_mode;
        self
    }

    pub fn with_shaders(mut self, shaders: ShaderBinding) -> Self {
        self.shaders = shaders;
        self
    }

    /// The governed part of a shadow state.
    pub fn from_shadow(shadow: &ShadowState) -> Self {
        Self {
            depth_stencil: shadow.depth_stencil,
            blend: shadow.blend,
            raster: shadow.raster,
            stages: shadow.stages,
            fog_mode: shadow.fog_mode,
            shaders: shadow.shaders,
        }
    }
}

/// A compiled, never-mutated pipeline configuration.
#[derive(Debug)]
pub struct PipelineSnapshot {
    id: SnapshotId,
    config: PipelineConfig,
}

impl PipelineSnapshot {
    #[inline]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn shading_mode(&self) -> ShadingMode {
        self.config.shaders.shading_mode()
    }
}

/// Hash-consed snapshot store.
#[derive(Default)]
pub struct SnapshotCache {
    snapshots: Vec<Arc<PipelineSnapshot>>,
    by_config: Xxh3Map<PipelineConfig, SnapshotId>,
    hits: u64,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `config`, compiling a new snapshot only for unseen configurations.
    pub fn request(&mut self, config: PipelineConfig) -> SnapshotId {
        if let Some(&id) = self.by_config.get(&config) {
            self.hits += 1;
            return id;
        }

        let id = SnapshotId(self.snapshots.len() as u32);
        log::debug!("compiled pipeline snapshot {:?} ({:?})", id, config.shaders.shading_mode());
        self.snapshots.push(Arc::new(PipelineSnapshot {
            id,
            config: config.clone(),
        }));
        self.by_config.insert(config, id);
        id
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Arc<PipelineSnapshot>> {
        self.snapshots.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Requests answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Drops every snapshot. Previously issued ids become invalid.
    pub fn reset(&mut self) {
        self.snapshots.clear();
        self.by_config.clear();
        self.hits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_configs_share_an_id() {
        let mut cache = SnapshotCache::new();
        let a = cache.request(PipelineConfig::default().with_blend(BlendState::alpha()));
        let b = cache.request(PipelineConfig::default().with_blend(BlendState::alpha()));
        let c = cache.request(PipelineConfig::default());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.get(a).unwrap().config().blend, BlendState::alpha());
    }

    #[test]
    fn reset_invalidates_ids() {
        let mut cache = SnapshotCache::new();
        let id = cache.request(PipelineConfig::default());
        cache.reset();
        assert!(cache.get(id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn default_config_matches_default_shadow() {
        assert_eq!(PipelineConfig::from_shadow(&ShadowState::default()), PipelineConfig::default());
    }
}
