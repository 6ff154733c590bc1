// src/state/mod.rs
//! Pipeline state: field groups, the shadow mirror, snapshots and transitions.

pub mod groups;
pub mod shadow;
pub mod snapshot;
pub mod transition;

pub use groups::{
    BlendState, DepthBiasMode, DepthStencilState, RasterState, SamplerParams, ShaderBinding,
    StencilState, TextureStageOps,
};
pub use shadow::{
    FogParams, SamplerShadow, ShadowState, MAX_CLIP_PLANES, MAX_LIGHTS, MAX_PS_CONSTANTS,
    MAX_SAMPLERS, MAX_TEXTURE_STAGES, MAX_VERTEX_TEXTURES, MAX_VS_CONSTANTS,
};
pub use snapshot::{PipelineConfig, PipelineSnapshot, SnapshotCache, SnapshotId};
pub use transition::{apply, ApplyMode, ChangedGroups, TransitionReport};
