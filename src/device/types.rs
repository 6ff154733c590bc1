// src/device/types.rs
//! Call vocabulary of the device interface.
//!
//! Modeled on an immediate-mode D3D9-style API: one enum per register family, one
//! value per call. Comparison, blend, stencil, face, fill, filter, address and format
//! enums are taken from `wgpu` so callers share one vocabulary with the rest of the
//! renderer.

use glam::{Vec3, Vec4};
use wgpu::{
    AddressMode, BlendFactor, BlendOperation, ColorWrites, CompareFunction, Face, FilterMode,
    PolygonMode, StencilOperation, TextureFormat,
};

// ─────────────────────────────────────────────────────────────────────────────
// Device object ids
// ─────────────────────────────────────────────────────────────────────────────

/// Device-side texture object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceTextureId(pub u32);

/// Device-side vertex or index buffer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceBufferId(pub u32);

/// Compiled shader program reference. Compilation happens elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

// ─────────────────────────────────────────────────────────────────────────────
// Render states
// ─────────────────────────────────────────────────────────────────────────────

/// Fog falloff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FogMode {
    #[default]
    None,
    Linear,
    Exp,
    Exp2,
}

/// One render-state register write.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderState {
    ZEnable(bool),
    ZWriteEnable(bool),
    ZFunc(CompareFunction),
    StencilEnable(bool),
    StencilFunc(CompareFunction),
    StencilRef(u32),
    StencilMask(u32),
    StencilWriteMask(u32),
    StencilFail(StencilOperation),
    StencilZFail(StencilOperation),
    StencilPass(StencilOperation),

    AlphaBlendEnable(bool),
    SrcBlend(BlendFactor),
    DestBlend(BlendFactor),
    BlendOp(BlendOperation),
    SeparateAlphaBlendEnable(bool),
    SrcBlendAlpha(BlendFactor),
    DestBlendAlpha(BlendFactor),
    BlendOpAlpha(BlendOperation),
    AlphaTestEnable(bool),
    AlphaFunc(CompareFunction),
    AlphaRef(u8),
    ColorWriteEnable(ColorWrites),
    SrgbWriteEnable(bool),

    CullMode(Option<Face>),
    FillMode(PolygonMode),
    ScissorTestEnable(bool),

    FogEnable(bool),
    FogTableMode(FogMode),
    FogColor(Vec4),
    FogStart(f32),
    FogEnd(f32),
    FogDensity(f32),

    Lighting(bool),
    Ambient(Vec4),
    ClipPlaneEnable(u32),
}

// ─────────────────────────────────────────────────────────────────────────────
// Texture stage (fixed-function combiner) states
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-function texture combine operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureOp {
    Disable,
    SelectArg1,
    SelectArg2,
    Modulate,
    Modulate2x,
    Modulate4x,
    Add,
    AddSigned,
    Subtract,
    BlendTextureAlpha,
    BlendCurrentAlpha,
    DotProduct3,
}

/// Combine operation argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureArg {
    Current,
    Texture,
    Diffuse,
    Specular,
    TextureFactor,
}

/// One texture-stage register write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureStageState {
    ColorOp(TextureOp),
    ColorArg1(TextureArg),
    ColorArg2(TextureArg),
    AlphaOp(TextureOp),
    AlphaArg1(TextureArg),
    AlphaArg2(TextureArg),
    TexCoordIndex(u32),
}

// ─────────────────────────────────────────────────────────────────────────────
// Sampler states
// ─────────────────────────────────────────────────────────────────────────────

/// One sampler register write. `MipFilter(None)` disables mipmapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplerState {
    AddressU(AddressMode),
    AddressV(AddressMode),
    AddressW(AddressMode),
    MagFilter(FilterMode),
    MinFilter(FilterMode),
    MipFilter(Option<FilterMode>),
    MaxAnisotropy(u16),
    MipLodBias(f32),
    MaxMipLevel(u32),
    SrgbTexture(bool),
}

/// Sampler slot: pixel samplers and vertex-texture samplers share one binding space on
/// the device, vertex samplers starting at [`VERTEX_SAMPLER_BASE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerSlot {
    Pixel(u8),
    Vertex(u8),
}

/// Device index of the first vertex-texture sampler.
pub const VERTEX_SAMPLER_BASE: u32 = 257;

impl SamplerSlot {
    #[inline]
    pub fn device_index(self) -> u32 {
        match self {
            SamplerSlot::Pixel(i) => i as u32,
            SamplerSlot::Vertex(i) => VERTEX_SAMPLER_BASE + i as u32,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transforms, lights, viewport
// ─────────────────────────────────────────────────────────────────────────────

pub const MAX_TEXTURE_TRANSFORMS: usize = 8;
pub const MAX_BONES: usize = 16;

/// Logical transform slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Model,
    View,
    Projection,
    Texture(u8),
    Bone(u8),
}

/// Number of transform slots (model, view, projection, textures, bones).
pub const TRANSFORM_SLOT_COUNT: usize = 3 + MAX_TEXTURE_TRANSFORMS + MAX_BONES;

impl TransformKind {
    /// Dense slot index.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            TransformKind::Model => 0,
            TransformKind::View => 1,
            TransformKind::Projection => 2,
            TransformKind::Texture(i) => 3 + i as usize,
            TransformKind::Bone(i) => 3 + MAX_TEXTURE_TRANSFORMS + i as usize,
        }
    }

    /// Slot index, or `None` when the texture or bone number is out of range.
    pub fn slot(self) -> Option<usize> {
        match self {
            TransformKind::Texture(i) if i as usize >= MAX_TEXTURE_TRANSFORMS => None,
            TransformKind::Bone(i) if i as usize >= MAX_BONES => None,
            _ => Some(self.index()),
        }
    }

    /// Inverse of [`TransformKind::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(TransformKind::Model),
            1 => Some(TransformKind::View),
            2 => Some(TransformKind::Projection),
            i if i < 3 + MAX_TEXTURE_TRANSFORMS => Some(TransformKind::Texture((i - 3) as u8)),
            i if i < TRANSFORM_SLOT_COUNT => {
                Some(TransformKind::Bone((i - 3 - MAX_TEXTURE_TRANSFORMS) as u8))
            }
            _ => None,
        }
    }

    pub fn all() -> impl Iterator<Item = TransformKind> {
        (0..TRANSFORM_SLOT_COUNT).filter_map(TransformKind::from_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Point,
    Spot,
    Directional,
}

/// Fixed-function light descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub ambient: Vec4,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub falloff: f32,
    /// Constant, linear, quadratic.
    pub attenuation: Vec3,
    /// Inner and outer cone angles in radians (spot lights).
    pub theta: f32,
    pub phi: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec4) -> Self {
        Self {
            kind: LightKind::Directional,
            diffuse: color,
            specular: Vec4::ZERO,
            ambient: Vec4::ZERO,
            position: Vec3::ZERO,
            direction: direction.normalize_or_zero(),
            range: f32::MAX,
            falloff: 1.0,
            attenuation: Vec3::new(1.0, 0.0, 0.0),
            theta: 0.0,
            phi: 0.0,
        }
    }

    pub fn point(position: Vec3, color: Vec4, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            diffuse: color,
            specular: Vec4::ZERO,
            ambient: Vec4::ZERO,
            position,
            direction: Vec3::NEG_Z,
            range,
            falloff: 1.0,
            attenuation: Vec3::new(0.0, 0.0, 1.0),
            theta: 0.0,
            phi: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            min_z: 0.0,
            max_z: 1.0,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vertex usage
// ─────────────────────────────────────────────────────────────────────────────

/// Vertex component flags a pass consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct VertexUsage(pub u32);

impl VertexUsage {
    pub const POSITION: Self = Self(1 << 0);
    pub const NORMAL: Self = Self(1 << 1);
    pub const COLOR: Self = Self(1 << 2);
    pub const SPECULAR: Self = Self(1 << 3);
    pub const TANGENT: Self = Self(1 << 4);
    pub const BONE_WEIGHTS: Self = Self(1 << 5);
    pub const TEXCOORD0: Self = Self(1 << 8);
    pub const TEXCOORD1: Self = Self(1 << 9);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for VertexUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource descriptors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
    Volume,
}

/// Texture creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub render_target: bool,
}

impl TextureDesc {
    pub fn d2(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::D2,
            width,
            height,
            depth: 1,
            mip_levels: 1,
            format,
            render_target: false,
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_kind(mut self, kind: TextureKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn as_render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    /// Maximum number of mip levels for a given dimension pair.
    #[inline]
    pub fn max_mip_levels(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }

    /// Size in bytes of the full mip chain (all faces / slices).
    pub fn size_bytes(&self) -> u64 {
        let (bw, bh) = self.format.block_dimensions();
        let block_bytes = self.format.block_copy_size(None).unwrap_or(4) as u64;

        let mut total = 0u64;
        let (mut w, mut h, mut d) = (self.width.max(1), self.height.max(1), self.depth.max(1));
        for _ in 0..self.mip_levels.max(1) {
            let blocks_x = w.div_ceil(bw) as u64;
            let blocks_y = h.div_ceil(bh) as u64;
            let slices = if self.kind == TextureKind::Volume { d as u64 } else { 1 };
            total += blocks_x * blocks_y * slices * block_bytes;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            d = (d / 2).max(1);
        }

        if self.kind == TextureKind::Cube {
            total * 6
        } else {
            total
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub kind: BufferKind,
    pub size: u64,
    /// Write-only dynamic usage (discard / no-overwrite locks allowed).
    pub dynamic: bool,
}

/// Buffer lock mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Previous contents are abandoned; the driver may rename the buffer.
    Discard,
    /// Caller promises not to touch data the GPU may still read.
    NoOverwrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveType {
    /// Primitive count for a vertex/index count.
    pub fn primitive_count(self, count: u32) -> u32 {
        match self {
            PrimitiveType::PointList => count,
            PrimitiveType::LineList => count / 2,
            PrimitiveType::LineStrip => count.saturating_sub(1),
            PrimitiveType::TriangleList => count / 3,
            PrimitiveType::TriangleStrip => count.saturating_sub(2),
        }
    }
}

/// Result of a cooperative-level query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CooperativeLevel {
    Ok,
    /// Lost and cannot be reset yet.
    Lost,
    /// Lost and ready for a reset.
    NotReset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_index_round_trip_covers_every_slot() {
        let kinds: Vec<_> = TransformKind::all().collect();
        assert_eq!(kinds.len(), TRANSFORM_SLOT_COUNT);
        assert_eq!(kinds[0], TransformKind::Model);
        assert_eq!(kinds[3], TransformKind::Texture(0));
        assert_eq!(kinds[3 + MAX_TEXTURE_TRANSFORMS], TransformKind::Bone(0));
        assert_eq!(TransformKind::from_index(TRANSFORM_SLOT_COUNT), None);
    }

    #[test]
    fn texture_sizes_include_mips_and_faces() {
        let base = TextureDesc::d2(256, 256, TextureFormat::Rgba8Unorm);
        assert_eq!(base.size_bytes(), 256 * 256 * 4);

        let mipped = base.with_mips(TextureDesc::max_mip_levels(256, 256));
        assert_eq!(mipped.mip_levels, 9);
        // 4/3 of the base level, rounded by the 1x1 tail
        assert_eq!(mipped.size_bytes(), 349_524);

        let cube = base.with_kind(TextureKind::Cube);
        assert_eq!(cube.size_bytes(), 6 * 256 * 256 * 4);
    }

    #[test]
    fn compressed_formats_use_block_size() {
        let bc1 = TextureDesc::d2(64, 64, TextureFormat::Bc1RgbaUnorm);
        // 16x16 blocks of 8 bytes
        assert_eq!(bc1.size_bytes(), 16 * 16 * 8);
    }

    #[test]
    fn vertex_sampler_indices_are_offset() {
        assert_eq!(SamplerSlot::Pixel(3).device_index(), 3);
        assert_eq!(SamplerSlot::Vertex(1).device_index(), VERTEX_SAMPLER_BASE + 1);
    }
}
