// src/device/mod.rs
//! The injected device interface.
//!
//! The engine never looks a device up globally; one is handed to
//! [`StateEngine::new`](crate::engine::StateEngine::new) and every subsystem that needs
//! it receives `&mut dyn Device` for the duration of a call.

pub mod recording;
pub mod types;

use glam::{Mat4, Vec4};

use crate::error::{DeviceResult, Result};

pub use recording::{DeviceCall, RecordingDevice};
pub use types::*;

/// Immediate-mode device call surface.
///
/// State setters can fail (the engine logs and moves on); creation calls report
/// `OutOfMemory` so the caller can evict and retry.
pub trait Device {
    // ---------- fixed pipeline registers ----------
    fn set_render_state(&mut self, state: RenderState) -> DeviceResult<()>;
    fn set_sampler_state(&mut self, sampler: u32, state: SamplerState) -> DeviceResult<()>;
    fn set_texture_stage_state(&mut self, stage: u32, state: TextureStageState) -> DeviceResult<()>;
    fn set_texture(&mut self, sampler: u32, texture: Option<DeviceTextureId>) -> DeviceResult<()>;
    fn set_transform(&mut self, kind: TransformKind, matrix: &Mat4) -> DeviceResult<()>;
    fn set_light(&mut self, index: u32, light: &Light) -> DeviceResult<()>;
    fn light_enable(&mut self, index: u32, enable: bool) -> DeviceResult<()>;
    fn set_clip_plane(&mut self, index: u32, plane: Vec4) -> DeviceResult<()>;
    fn set_viewport(&mut self, viewport: &Viewport) -> DeviceResult<()>;

    // ---------- programmable pipeline ----------
    fn set_vertex_shader(&mut self, shader: Option<ShaderId>) -> DeviceResult<()>;
    fn set_pixel_shader(&mut self, shader: Option<ShaderId>) -> DeviceResult<()>;
    fn set_vertex_format(&mut self, usage: VertexUsage) -> DeviceResult<()>;
    fn set_vertex_shader_constants(&mut self, start: u32, data: &[Vec4]) -> DeviceResult<()>;
    fn set_pixel_shader_constants(&mut self, start: u32, data: &[Vec4]) -> DeviceResult<()>;

    // ---------- resources ----------
    fn create_texture(&mut self, desc: &TextureDesc) -> DeviceResult<DeviceTextureId>;
    fn destroy_texture(&mut self, texture: DeviceTextureId);
    fn create_buffer(&mut self, desc: &BufferDesc) -> DeviceResult<DeviceBufferId>;
    fn destroy_buffer(&mut self, buffer: DeviceBufferId);
    /// Maps `size` bytes at `offset`. Must be paired with [`Device::unlock_buffer`].
    fn lock_buffer(
        &mut self,
        buffer: DeviceBufferId,
        offset: u64,
        size: u64,
        mode: LockMode,
    ) -> DeviceResult<&mut [u8]>;
    fn unlock_buffer(&mut self, buffer: DeviceBufferId) -> DeviceResult<()>;

    // ---------- drawing ----------
    fn set_stream_source(&mut self, buffer: DeviceBufferId, offset: u64, stride: u32) -> DeviceResult<()>;
    fn set_indices(&mut self, buffer: DeviceBufferId) -> DeviceResult<()>;
    fn draw_primitive(&mut self, primitive: PrimitiveType, start_vertex: u32, primitive_count: u32) -> DeviceResult<()>;
    fn draw_indexed_primitive(
        &mut self,
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    ) -> DeviceResult<()>;

    // ---------- lifecycle ----------
    fn cooperative_level(&self) -> CooperativeLevel;
    /// Only valid once every device object has been destroyed.
    fn reset(&mut self) -> DeviceResult<()>;
}

/// Implemented by every component that owns device objects.
///
/// On device loss the engine calls `release` on every owner, resets the device, then
/// calls `restore` on every owner. Nothing is partially recovered.
pub trait DeviceObjects {
    /// Forget (and where possible destroy) every device object.
    fn release(&mut self, device: &mut dyn Device);

    /// Re-create whatever must exist immediately after a reset.
    fn restore(&mut self, device: &mut dyn Device) -> Result<()>;
}
