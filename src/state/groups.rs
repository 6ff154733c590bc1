// src/state/groups.rs
//! Field groups governed by a pipeline snapshot, plus per-sampler parameters.
//!
//! Snapshot groups hold no floats so whole configurations can be hashed and deduped.

use wgpu::{
    AddressMode, BlendFactor, BlendOperation, ColorWrites, CompareFunction, Face, FilterMode,
    PolygonMode, StencilOperation,
};

use crate::commit::ShadingMode;
use crate::device::{
    RenderState, SamplerState, ShaderId, TextureArg, TextureOp, TextureStageState, VertexUsage,
};

// ---------- Depth / stencil ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub compare: CompareFunction,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            enabled: false,
            compare: CompareFunction::Always,
            reference: 0,
            read_mask: u32::MAX,
            write_mask: u32::MAX,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub stencil: StencilState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
        }
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            ..Self::default()
        }
    }

    /// Register writes for every field that differs from `from` (all of them if `None`).
    pub fn diff(&self, from: Option<&Self>, out: &mut Vec<RenderState>) {
        let changed = |same: fn(&Self, &Self) -> bool| from.map_or(true, |f| !same(f, self));
        let s = &self.stencil;
        if changed(|a, b| a.depth_test == b.depth_test) {
            out.push(RenderState::ZEnable(self.depth_test));
        }
        if changed(|a, b| a.depth_write == b.depth_write) {
            out.push(RenderState::ZWriteEnable(self.depth_write));
        }
        if changed(|a, b| a.depth_compare == b.depth_compare) {
            out.push(RenderState::ZFunc(self.depth_compare));
        }
        if changed(|a, b| a.stencil.enabled == b.stencil.enabled) {
            out.push(RenderState::StencilEnable(s.enabled));
        }
        if changed(|a, b| a.stencil.compare == b.stencil.compare) {
            out.push(RenderState::StencilFunc(s.compare));
        }
        if changed(|a, b| a.stencil.reference == b.stencil.reference) {
            out.push(RenderState::StencilRef(s.reference));
        }
        if changed(|a, b| a.stencil.read_mask == b.stencil.read_mask) {
            out.push(RenderState::StencilMask(s.read_mask));
        }
        if changed(|a, b| a.stencil.write_mask == b.stencil.write_mask) {
            out.push(RenderState::StencilWriteMask(s.write_mask));
        }
        if changed(|a, b| a.stencil.fail_op == b.stencil.fail_op) {
            out.push(RenderState::StencilFail(s.fail_op));
        }
        if changed(|a, b| a.stencil.depth_fail_op == b.stencil.depth_fail_op) {
            out.push(RenderState::StencilZFail(s.depth_fail_op));
        }
        if changed(|a, b| a.stencil.pass_op == b.stencil.pass_op) {
            out.push(RenderState::StencilPass(s.pass_op));
        }
    }
}

// ---------- Blend ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOperation,
    pub separate_alpha: bool,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub op_alpha: BlendOperation,
    pub alpha_test: bool,
    pub alpha_compare: CompareFunction,
    pub alpha_ref: u8,
    pub write_mask: ColorWrites,
    pub srgb_write: bool,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
            op: BlendOperation::Add,
            separate_alpha: false,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            op_alpha: BlendOperation::Add,
            alpha_test: false,
            alpha_compare: CompareFunction::Always,
            alpha_ref: 0,
            write_mask: ColorWrites::ALL,
            srgb_write: false,
        }
    }
}

impl BlendState {
    /// Standard straight-alpha blending.
    pub fn alpha() -> Self {
        Self {
            enabled: true,
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }

    pub fn additive() -> Self {
        Self {
            enabled: true,
            src: BlendFactor::One,
            dst: BlendFactor::One,
            ..Self::default()
        }
    }

    pub fn diff(&self, from: Option<&Self>, out: &mut Vec<RenderState>) {
        let changed = |same: fn(&Self, &Self) -> bool| from.map_or(true, |f| !same(f, self));
        if changed(|a, b| a.enabled == b.enabled) {
            out.push(RenderState::AlphaBlendEnable(self.enabled));
        }
        if changed(|a, b| a.src == b.src) {
            out.push(RenderState::SrcBlend(self.src));
        }
        if changed(|a, b| a.dst == b.dst) {
            out.push(RenderState::DestBlend(self.dst));
        }
        if changed(|a, b| a.op == b.op) {
            out.push(RenderState::BlendOp(self.op));
        }
        if changed(|a, b| a.separate_alpha == b.separate_alpha) {
            out.push(RenderState::SeparateAlphaBlendEnable(self.separate_alpha));
        }
        if changed(|a, b| a.src_alpha == b.src_alpha) {
            out.push(RenderState::SrcBlendAlpha(self.src_alpha));
        }
        if changed(|a, b| a.dst_alpha == b.dst_alpha) {
            out.push(RenderState::DestBlendAlpha(self.dst_alpha));
        }
        if changed(|a, b| a.op_alpha == b.op_alpha) {
            out.push(RenderState::BlendOpAlpha(self.op_alpha));
        }
        if changed(|a, b| a.alpha_test == b.alpha_test) {
            out.push(RenderState::AlphaTestEnable(self.alpha_test));
        }
        if changed(|a, b| a.alpha_compare == b.alpha_compare) {
            out.push(RenderState::AlphaFunc(self.alpha_compare));
        }
        if changed(|a, b| a.alpha_ref == b.alpha_ref) {
            out.push(RenderState::AlphaRef(self.alpha_ref));
        }
        if changed(|a, b| a.write_mask == b.write_mask) {
            out.push(RenderState::ColorWriteEnable(self.write_mask));
        }
        if changed(|a, b| a.srgb_write == b.srgb_write) {
            out.push(RenderState::SrgbWriteEnable(self.srgb_write));
        }
    }
}

// ---------- Raster ----------

/// Depth-bias flavour. Applied through the projection matrix, not a render state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DepthBiasMode {
    #[default]
    None,
    /// Coplanar decals drawn over their base surface.
    Decal,
    /// Shadow receivers.
    Shadow,
}

impl DepthBiasMode {
    /// NDC depth offset subtracted by the biased projection.
    pub fn offset(self) -> f32 {
        match self {
            DepthBiasMode::None => 0.0,
            DepthBiasMode::Decal => 1.0e-5,
            DepthBiasMode::Shadow => 5.0e-4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull: Option<Face>,
    pub fill: PolygonMode,
    pub depth_bias: DepthBiasMode,
    pub scissor: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull: Some(Face::Back),
            fill: PolygonMode::Fill,
            depth_bias: DepthBiasMode::None,
            scissor: false,
        }
    }
}

impl RasterState {
    pub fn diff(&self, from: Option<&Self>, out: &mut Vec<RenderState>) {
        if from.map_or(true, |f| f.cull != self.cull) {
            out.push(RenderState::CullMode(self.cull));
        }
        if from.map_or(true, |f| f.fill != self.fill) {
            out.push(RenderState::FillMode(self.fill));
        }
        if from.map_or(true, |f| f.scissor != self.scissor) {
            out.push(RenderState::ScissorTestEnable(self.scissor));
        }
    }
}

// ---------- Texture stage ops ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureStageOps {
    pub color_op: TextureOp,
    pub color_arg1: TextureArg,
    pub color_arg2: TextureArg,
    pub alpha_op: TextureOp,
    pub alpha_arg1: TextureArg,
    pub alpha_arg2: TextureArg,
    pub tex_coord_index: u32,
}

impl TextureStageOps {
    /// Device default for stage 0: texture modulated with diffuse.
    pub fn modulate() -> Self {
        Self {
            color_op: TextureOp::Modulate,
            color_arg1: TextureArg::Texture,
            color_arg2: TextureArg::Current,
            alpha_op: TextureOp::SelectArg1,
            alpha_arg1: TextureArg::Texture,
            alpha_arg2: TextureArg::Current,
            tex_coord_index: 0,
        }
    }

    /// Device default for every stage past 0.
    pub fn disabled(stage: u32) -> Self {
        Self {
            color_op: TextureOp::Disable,
            alpha_op: TextureOp::Disable,
            tex_coord_index: stage,
            ..Self::modulate()
        }
    }

    pub fn defaults_for(stage: u32) -> Self {
        if stage == 0 {
            Self::modulate()
        } else {
            Self::disabled(stage)
        }
    }

    pub fn diff(&self, from: Option<&Self>, out: &mut Vec<TextureStageState>) {
        let changed = |same: fn(&Self, &Self) -> bool| from.map_or(true, |f| !same(f, self));
        if changed(|a, b| a.color_op == b.color_op) {
            out.push(TextureStageState::ColorOp(self.color_op));
        }
        if changed(|a, b| a.color_arg1 == b.color_arg1) {
            out.push(TextureStageState::ColorArg1(self.color_arg1));
        }
        if changed(|a, b| a.color_arg2 == b.color_arg2) {
            out.push(TextureStageState::ColorArg2(self.color_arg2));
        }
        if changed(|a, b| a.alpha_op == b.alpha_op) {
            out.push(TextureStageState::AlphaOp(self.alpha_op));
        }
        if changed(|a, b| a.alpha_arg1 == b.alpha_arg1) {
            out.push(TextureStageState::AlphaArg1(self.alpha_arg1));
        }
        if changed(|a, b| a.alpha_arg2 == b.alpha_arg2) {
            out.push(TextureStageState::AlphaArg2(self.alpha_arg2));
        }
        if changed(|a, b| a.tex_coord_index == b.tex_coord_index) {
            out.push(TextureStageState::TexCoordIndex(self.tex_coord_index));
        }
    }
}

// ---------- Shader binding ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    pub vertex_shader: Option<ShaderId>,
    pub pixel_shader: Option<ShaderId>,
    pub vertex_usage: VertexUsage,
    /// Fixed-function lighting. Ignored by the device while a vertex shader is bound.
    pub lighting: bool,
}

impl Default for ShaderBinding {
    fn default() -> Self {
        Self {
            vertex_shader: None,
            pixel_shader: None,
            vertex_usage: VertexUsage::POSITION | VertexUsage::NORMAL | VertexUsage::TEXCOORD0,
            lighting: false,
        }
    }
}

impl ShaderBinding {
    pub fn programmable(vs: ShaderId, ps: ShaderId, usage: VertexUsage) -> Self {
        Self {
            vertex_shader: Some(vs),
            pixel_shader: Some(ps),
            vertex_usage: usage,
            lighting: false,
        }
    }

    /// Which transform/light consumer a draw with this binding reads from.
    #[inline]
    pub fn shading_mode(&self) -> ShadingMode {
        if self.vertex_shader.is_some() {
            ShadingMode::Programmable
        } else {
            ShadingMode::FixedFunction
        }
    }
}

// ---------- Sampler parameters ----------

/// Per-sampler filtering and addressing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerParams {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mip_filter: Option<FilterMode>,
    pub max_anisotropy: u16,
    pub mip_lod_bias: f32,
    pub max_mip_level: u32,
    pub srgb: bool,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mip_filter: None,
            max_anisotropy: 1,
            mip_lod_bias: 0.0,
            max_mip_level: 0,
            srgb: false,
        }
    }
}

impl SamplerParams {
    pub fn clamped(mut self) -> Self {
        self.address_u = AddressMode::ClampToEdge;
        self.address_v = AddressMode::ClampToEdge;
        self.address_w = AddressMode::ClampToEdge;
        self
    }

    pub fn diff(&self, from: Option<&Self>, out: &mut Vec<SamplerState>) {
        let changed = |same: fn(&Self, &Self) -> bool| from.map_or(true, |f| !same(f, self));
        if changed(|a, b| a.address_u == b.address_u) {
            out.push(SamplerState::AddressU(self.address_u));
        }
        if changed(|a, b| a.address_v == b.address_v) {
            out.push(SamplerState::AddressV(self.address_v));
        }
        if changed(|a, b| a.address_w == b.address_w) {
            out.push(SamplerState::AddressW(self.address_w));
        }
        if changed(|a, b| a.mag_filter == b.mag_filter) {
            out.push(SamplerState::MagFilter(self.mag_filter));
        }
        if changed(|a, b| a.min_filter == b.min_filter) {
            out.push(SamplerState::MinFilter(self.min_filter));
        }
        if changed(|a, b| a.mip_filter == b.mip_filter) {
            out.push(SamplerState::MipFilter(self.mip_filter));
        }
        if changed(|a, b| a.max_anisotropy == b.max_anisotropy) {
            out.push(SamplerState::MaxAnisotropy(self.max_anisotropy));
        }
        if changed(|a, b| a.mip_lod_bias.to_bits() == b.mip_lod_bias.to_bits()) {
            out.push(SamplerState::MipLodBias(self.mip_lod_bias));
        }
        if changed(|a, b| a.max_mip_level == b.max_mip_level) {
            out.push(SamplerState::MaxMipLevel(self.max_mip_level));
        }
        if changed(|a, b| a.srgb == b.srgb) {
            out.push(SamplerState::SrgbTexture(self.srgb));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_groups_emit_nothing() {
        let mut out = Vec::new();
        let d = DepthStencilState::default();
        d.diff(Some(&d), &mut out);
        let b = BlendState::alpha();
        b.diff(Some(&b), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn full_diff_writes_every_field() {
        let mut out = Vec::new();
        DepthStencilState::default().diff(None, &mut out);
        assert_eq!(out.len(), 11);

        let mut out = Vec::new();
        BlendState::default().diff(None, &mut out);
        assert_eq!(out.len(), 13);

        let mut out = Vec::new();
        SamplerParams::default().diff(None, &mut out);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn diff_touches_only_changed_fields() {
        let mut out = Vec::new();
        DepthStencilState::disabled().diff(Some(&DepthStencilState::default()), &mut out);
        assert_eq!(out, vec![RenderState::ZEnable(false), RenderState::ZWriteEnable(false)]);

        let mut out = Vec::new();
        BlendState::alpha().diff(Some(&BlendState::default()), &mut out);
        assert_eq!(
            out,
            vec![
                RenderState::AlphaBlendEnable(true),
                RenderState::SrcBlend(BlendFactor::SrcAlpha),
                RenderState::DestBlend(BlendFactor::OneMinusSrcAlpha),
            ]
        );
    }

    #[test]
    fn depth_bias_is_not_a_render_state() {
        let biased = RasterState {
            depth_bias: DepthBiasMode::Decal,
            ..RasterState::default()
        };
        let mut out = Vec::new();
        biased.diff(Some(&RasterState::default()), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn shading_mode_follows_vertex_shader() {
        assert_eq!(ShaderBinding::default().shading_mode(), ShadingMode::FixedFunction);
        let prog = ShaderBinding::programmable(ShaderId(1), ShaderId(2), VertexUsage::POSITION);
        assert_eq!(prog.shading_mode(), ShadingMode::Programmable);
    }
}
