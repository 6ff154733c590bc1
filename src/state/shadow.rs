// src/state/shadow.rs
//! Mirror of every device register the engine manages.
//!
//! The engine keeps two: `current` (exactly what the device has) and `desired` (what
//! the next draw wants). Setters write `desired`; transitions and commit functions move
//! values across and update `current` alongside each device call.

use glam::{Mat4, Vec4};

use super::groups::{
    BlendState, DepthStencilState, RasterState, SamplerParams, ShaderBinding, TextureStageOps,
};
use crate::device::{
    DeviceTextureId, FogMode, Light, SamplerSlot, ShaderId, Viewport, TRANSFORM_SLOT_COUNT,
};

pub const MAX_TEXTURE_STAGES: usize = 8;
pub const MAX_SAMPLERS: usize = 16;
pub const MAX_VERTEX_TEXTURES: usize = 4;
pub const MAX_LIGHTS: usize = 4;
pub const MAX_CLIP_PLANES: usize = 2;
pub const MAX_VS_CONSTANTS: usize = 256;
pub const MAX_PS_CONSTANTS: usize = 32;

/// What one sampler slot currently has bound.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct SamplerShadow {
    pub texture: Option<DeviceTextureId>,
    pub params: SamplerParams,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogParams {
    pub color: Vec4,
    pub start: f32,
    pub end: f32,
    pub density: f32,
}

impl Default for FogParams {
    fn default() -> Self {
        Self {
            color: Vec4::ZERO,
            start: 0.0,
            end: 1.0,
            density: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShadowState {
    // ---------- snapshot-governed groups ----------
    pub depth_stencil: DepthStencilState,
    pub blend: BlendState,
    pub raster: RasterState,
    pub stages: [TextureStageOps; MAX_TEXTURE_STAGES],
    pub fog_mode: FogMode,
    pub shaders: ShaderBinding,

    // ---------- per-field registers ----------
    pub samplers: [SamplerShadow; MAX_SAMPLERS],
    pub vertex_samplers: [SamplerShadow; MAX_VERTEX_TEXTURES],
    pub transforms: [Mat4; TRANSFORM_SLOT_COUNT],
    pub lights: [Option<Light>; MAX_LIGHTS],
    pub light_enabled: [bool; MAX_LIGHTS],
    pub ambient: Vec4,
    pub clip_planes: [Vec4; MAX_CLIP_PLANES],
    pub clip_plane_mask: u32,
    pub fog: FogParams,
    pub viewport: Viewport,
    pub vs_constants: Box<[Vec4]>,
    pub ps_constants: Box<[Vec4]>,
}

impl Default for ShadowState {
    fn default() -> Self {
        Self {
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::default(),
            raster: RasterState::default(),
            stages: std::array::from_fn(|i| TextureStageOps::defaults_for(i as u32)),
            fog_mode: FogMode::None,
            shaders: ShaderBinding::default(),
            samplers: [SamplerShadow::default(); MAX_SAMPLERS],
            vertex_samplers: [SamplerShadow::default(); MAX_VERTEX_TEXTURES],
            transforms: [Mat4::IDENTITY; TRANSFORM_SLOT_COUNT],
            lights: [None; MAX_LIGHTS],
            light_enabled: [false; MAX_LIGHTS],
            ambient: Vec4::ZERO,
            clip_planes: [Vec4::ZERO; MAX_CLIP_PLANES],
            clip_plane_mask: 0,
            fog: FogParams::default(),
            viewport: Viewport::default(),
            vs_constants: vec![Vec4::ZERO; MAX_VS_CONSTANTS].into_boxed_slice(),
            ps_constants: vec![Vec4::ZERO; MAX_PS_CONSTANTS].into_boxed_slice(),
        }
    }
}

impl ShadowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to device defaults. Used on every lost/reset cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sampler(&self, slot: SamplerSlot) -> Option<&SamplerShadow> {
        match slot {
            SamplerSlot::Pixel(i) => self.samplers.get(i as usize),
            SamplerSlot::Vertex(i) => self.vertex_samplers.get(i as usize),
        }
    }

    pub fn sampler_mut(&mut self, slot: SamplerSlot) -> Option<&mut SamplerShadow> {
        match slot {
            SamplerSlot::Pixel(i) => self.samplers.get_mut(i as usize),
            SamplerSlot::Vertex(i) => self.vertex_samplers.get_mut(i as usize),
        }
    }

    /// Every sampler slot, pixel samplers first.
    pub fn sampler_slots() -> impl Iterator<Item = SamplerSlot> {
        (0..MAX_SAMPLERS as u8)
            .map(SamplerSlot::Pixel)
            .chain((0..MAX_VERTEX_TEXTURES as u8).map(SamplerSlot::Vertex))
    }

    /// Slots currently bound to `texture`.
    pub fn slots_bound_to(&self, texture: DeviceTextureId) -> impl Iterator<Item = SamplerSlot> + '_ {
        Self::sampler_slots().filter(move |&slot| {
            self.sampler(slot).and_then(|s| s.texture) == Some(texture)
        })
    }

    #[inline]
    pub fn vertex_shader(&self) -> Option<ShaderId> {
        self.shaders.vertex_shader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TextureOp;

    #[test]
    fn defaults_match_device_defaults() {
        let s = ShadowState::new();
        assert_eq!(s.stages[0].color_op, TextureOp::Modulate);
        assert_eq!(s.stages[1].color_op, TextureOp::Disable);
        assert_eq!(s.stages[3].tex_coord_index, 3);
        assert!(s.depth_stencil.depth_test);
        assert!(!s.blend.enabled);
        assert_eq!(s.vs_constants.len(), MAX_VS_CONSTANTS);
    }

    #[test]
    fn bound_slots_span_both_sampler_kinds() {
        let mut s = ShadowState::new();
        let tex = DeviceTextureId(7);
        s.samplers[2].texture = Some(tex);
        s.vertex_samplers[1].texture = Some(tex);
        let slots: Vec<_> = s.slots_bound_to(tex).collect();
        assert_eq!(slots, vec![SamplerSlot::Pixel(2), SamplerSlot::Vertex(1)]);

        s.reset();
        assert_eq!(s.slots_bound_to(tex).count(), 0);
        assert!(s.sampler(SamplerSlot::Vertex(MAX_VERTEX_TEXTURES as u8)).is_none());
    }
}
