// src/device/recording.rs
//! In-memory device that records every call.
//!
//! Backs buffer locks with host memory so ring writes can be checked byte for byte,
//! and can inject allocation failures and lost / not-reset states.

use std::collections::HashMap;

use glam::{Mat4, Vec4};

use super::types::*;
use super::Device;
use crate::error::{DeviceError, DeviceResult};

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    RenderState(RenderState),
    SamplerState(u32, SamplerState),
    TextureStageState(u32, TextureStageState),
    Texture(u32, Option<DeviceTextureId>),
    Transform(TransformKind, Mat4),
    Light(u32, Light),
    LightEnable(u32, bool),
    ClipPlane(u32, Vec4),
    Viewport(Viewport),
    VertexShader(Option<ShaderId>),
    PixelShader(Option<ShaderId>),
    VertexFormat(VertexUsage),
    VertexShaderConstants { start: u32, data: Vec<Vec4> },
    PixelShaderConstants { start: u32, data: Vec<Vec4> },
    CreateTexture(DeviceTextureId, TextureDesc),
    DestroyTexture(DeviceTextureId),
    CreateBuffer(DeviceBufferId, BufferDesc),
    DestroyBuffer(DeviceBufferId),
    Lock { buffer: DeviceBufferId, offset: u64, size: u64, mode: LockMode },
    Unlock(DeviceBufferId),
    StreamSource { buffer: DeviceBufferId, offset: u64, stride: u32 },
    Indices(DeviceBufferId),
    Draw { primitive: PrimitiveType, start: u32, count: u32 },
    DrawIndexed { primitive: PrimitiveType, base_vertex: i32, start: u32, count: u32 },
    Reset,
}

impl DeviceCall {
    /// True for register writes (anything that isn't resource management or a draw).
    pub fn is_state_call(&self) -> bool {
        !matches!(
            self,
            DeviceCall::CreateTexture(..)
                | DeviceCall::DestroyTexture(_)
                | DeviceCall::CreateBuffer(..)
                | DeviceCall::DestroyBuffer(_)
                | DeviceCall::Lock { .. }
                | DeviceCall::Unlock(_)
                | DeviceCall::StreamSource { .. }
                | DeviceCall::Indices(_)
                | DeviceCall::Draw { .. }
                | DeviceCall::DrawIndexed { .. }
                | DeviceCall::Reset
        )
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, DeviceCall::Draw { .. } | DeviceCall::DrawIndexed { .. })
    }
}

struct HostBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
    locked: bool,
}

#[derive(Default)]
pub struct RecordingDevice {
    calls: Vec<DeviceCall>,
    next_id: u32,
    textures: HashMap<DeviceTextureId, TextureDesc>,
    buffers: HashMap<DeviceBufferId, HostBuffer>,
    level: Option<CooperativeLevel>,
    fail_creates: u32,
    fail_state_calls: bool,
    texture_capacity: Option<u64>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------- inspection ----------

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn state_calls(&self) -> impl Iterator<Item = &DeviceCall> {
        self.calls.iter().filter(|c| c.is_state_call())
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_bytes(&self) -> u64 {
        self.textures.values().map(TextureDesc::size_bytes).sum()
    }

    pub fn is_texture_live(&self, id: DeviceTextureId) -> bool {
        self.textures.contains_key(&id)
    }

    /// Contents of a buffer's host backing store.
    pub fn buffer_contents(&self, id: DeviceBufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|b| b.data.as_slice())
    }

    // ---------- fault injection ----------

    /// The next `count` create calls fail with `OutOfMemory`.
    pub fn fail_next_creates(&mut self, count: u32) {
        self.fail_creates = count;
    }

    /// Texture creation fails with `OutOfMemory` once live textures would exceed `bytes`.
    pub fn set_texture_capacity(&mut self, bytes: Option<u64>) {
        self.texture_capacity = bytes;
    }

    /// Every state setter returns `InvalidCall` while set.
    pub fn set_fail_state_calls(&mut self, fail: bool) {
        self.fail_state_calls = fail;
    }

    pub fn set_cooperative_level(&mut self, level: CooperativeLevel) {
        self.level = Some(level);
    }

    // ---------- internals ----------

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn take_create_failure(&mut self) -> bool {
        if self.fail_creates > 0 {
            self.fail_creates -= 1;
            true
        } else {
            false
        }
    }

    fn state(&mut self, call: DeviceCall) -> DeviceResult<()> {
        self.calls.push(call);
        if self.fail_state_calls {
            Err(DeviceError::InvalidCall("state call rejected"))
        } else {
            Ok(())
        }
    }

    fn ensure_ok(&self) -> DeviceResult<()> {
        match self.cooperative_level() {
            CooperativeLevel::Ok => Ok(()),
            _ => Err(DeviceError::Lost),
        }
    }
}

impl Device for RecordingDevice {
    fn set_render_state(&mut self, state: RenderState) -> DeviceResult<()> {
        self.state(DeviceCall::RenderState(state))
    }

    fn set_sampler_state(&mut self, sampler: u32, state: SamplerState) -> DeviceResult<()> {
        self.state(DeviceCall::SamplerState(sampler, state))
    }

    fn set_texture_stage_state(&mut self, stage: u32, state: TextureStageState) -> DeviceResult<()> {
        self.state(DeviceCall::TextureStageState(stage, state))
    }

    fn set_texture(&mut self, sampler: u32, texture: Option<DeviceTextureId>) -> DeviceResult<()> {
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                self.calls.push(DeviceCall::Texture(sampler, texture));
                return Err(DeviceError::InvalidCall("binding a destroyed texture"));
            }
        }
        self.state(DeviceCall::Texture(sampler, texture))
    }

    fn set_transform(&mut self, kind: TransformKind, matrix: &Mat4) -> DeviceResult<()> {
        self.state(DeviceCall::Transform(kind, *matrix))
    }

    fn set_light(&mut self, index: u32, light: &Light) -> DeviceResult<()> {
        self.state(DeviceCall::Light(index, *light))
    }

    fn light_enable(&mut self, index: u32, enable: bool) -> DeviceResult<()> {
        self.state(DeviceCall::LightEnable(index, enable))
    }

    fn set_clip_plane(&mut self, index: u32, plane: Vec4) -> DeviceResult<()> {
        self.state(DeviceCall::ClipPlane(index, plane))
    }

    fn set_viewport(&mut self, viewport: &Viewport) -> DeviceResult<()> {
        self.state(DeviceCall::Viewport(*viewport))
    }

    fn set_vertex_shader(&mut self, shader: Option<ShaderId>) -> DeviceResult<()> {
        self.state(DeviceCall::VertexShader(shader))
    }

    fn set_pixel_shader(&mut self, shader: Option<ShaderId>) -> DeviceResult<()> {
        self.state(DeviceCall::PixelShader(shader))
    }

    fn set_vertex_format(&mut self, usage: VertexUsage) -> DeviceResult<()> {
        self.state(DeviceCall::VertexFormat(usage))
    }

    fn set_vertex_shader_constants(&mut self, start: u32, data: &[Vec4]) -> DeviceResult<()> {
        self.state(DeviceCall::VertexShaderConstants { start, data: data.to_vec() })
    }

    fn set_pixel_shader_constants(&mut self, start: u32, data: &[Vec4]) -> DeviceResult<()> {
        self.state(DeviceCall::PixelShaderConstants { start, data: data.to_vec() })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> DeviceResult<DeviceTextureId> {
        self.ensure_ok()?;
        if self.take_create_failure() {
            return Err(DeviceError::OutOfMemory);
        }
        if let Some(capacity) = self.texture_capacity {
            if self.texture_bytes() + desc.size_bytes() > capacity {
                return Err(DeviceError::OutOfMemory);
            }
        }
        let id = DeviceTextureId(self.alloc_id());
        self.textures.insert(id, *desc);
        self.calls.push(DeviceCall::CreateTexture(id, *desc));
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: DeviceTextureId) {
        self.textures.remove(&texture);
        self.calls.push(DeviceCall::DestroyTexture(texture));
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> DeviceResult<DeviceBufferId> {
        self.ensure_ok()?;
        if self.take_create_failure() {
            return Err(DeviceError::OutOfMemory);
        }
        let id = DeviceBufferId(self.alloc_id());
        self.buffers.insert(
            id,
            HostBuffer {
                desc: *desc,
                data: vec![0; desc.size as usize],
                locked: false,
            },
        );
        self.calls.push(DeviceCall::CreateBuffer(id, *desc));
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: DeviceBufferId) {
        self.buffers.remove(&buffer);
        self.calls.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn lock_buffer(
        &mut self,
        buffer: DeviceBufferId,
        offset: u64,
        size: u64,
        mode: LockMode,
    ) -> DeviceResult<&mut [u8]> {
        self.calls.push(DeviceCall::Lock { buffer, offset, size, mode });
        let host = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::InvalidCall("lock of unknown buffer"))?;
        if host.locked {
            return Err(DeviceError::InvalidCall("buffer already locked"));
        }
        if !host.desc.dynamic && mode == LockMode::NoOverwrite {
            return Err(DeviceError::InvalidCall("no-overwrite lock on a static buffer"));
        }
        let end = offset.checked_add(size).filter(|&end| end <= host.desc.size);
        let Some(end) = end else {
            return Err(DeviceError::InvalidCall("lock range out of bounds"));
        };
        host.locked = true;
        Ok(&mut host.data[offset as usize..end as usize])
    }

    fn unlock_buffer(&mut self, buffer: DeviceBufferId) -> DeviceResult<()> {
        self.calls.push(DeviceCall::Unlock(buffer));
        match self.buffers.get_mut(&buffer) {
            Some(host) if host.locked => {
                host.locked = false;
                Ok(())
            }
            Some(_) => Err(DeviceError::InvalidCall("unlock of unlocked buffer")),
            None => Err(DeviceError::InvalidCall("unlock of unknown buffer")),
        }
    }

    fn set_stream_source(&mut self, buffer: DeviceBufferId, offset: u64, stride: u32) -> DeviceResult<()> {
        self.calls.push(DeviceCall::StreamSource { buffer, offset, stride });
        Ok(())
    }

    fn set_indices(&mut self, buffer: DeviceBufferId) -> DeviceResult<()> {
        self.calls.push(DeviceCall::Indices(buffer));
        Ok(())
    }

    fn draw_primitive(&mut self, primitive: PrimitiveType, start_vertex: u32, primitive_count: u32) -> DeviceResult<()> {
        self.ensure_ok()?;
        self.calls.push(DeviceCall::Draw { primitive, start: start_vertex, count: primitive_count });
        Ok(())
    }

    fn draw_indexed_primitive(
        &mut self,
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    ) -> DeviceResult<()> {
        self.ensure_ok()?;
        self.calls.push(DeviceCall::DrawIndexed {
            primitive,
            base_vertex,
            start: start_index,
            count: primitive_count,
        });
        Ok(())
    }

    fn cooperative_level(&self) -> CooperativeLevel {
        self.level.unwrap_or(CooperativeLevel::Ok)
    }

    fn reset(&mut self) -> DeviceResult<()> {
        if self.cooperative_level() == CooperativeLevel::Lost {
            return Err(DeviceError::Lost);
        }
        if !self.textures.is_empty() || !self.buffers.is_empty() {
            return Err(DeviceError::InvalidCall("reset with live device objects"));
        }
        self.level = Some(CooperativeLevel::Ok);
        self.calls.push(DeviceCall::Reset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat;

    fn vb(size: u64) -> BufferDesc {
        BufferDesc { kind: BufferKind::Vertex, size, dynamic: true }
    }

    #[test]
    fn lock_writes_land_in_host_memory() {
        let mut dev = RecordingDevice::new();
        let id = dev.create_buffer(&vb(16)).unwrap();
        dev.lock_buffer(id, 4, 4, LockMode::Discard)
            .unwrap()
            .copy_from_slice(&[1, 2, 3, 4]);
        dev.unlock_buffer(id).unwrap();
        assert_eq!(&dev.buffer_contents(id).unwrap()[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn double_lock_is_rejected() {
        let mut dev = RecordingDevice::new();
        let id = dev.create_buffer(&vb(16)).unwrap();
        dev.lock_buffer(id, 0, 4, LockMode::Discard).unwrap();
        assert_eq!(
            dev.lock_buffer(id, 0, 4, LockMode::NoOverwrite).unwrap_err(),
            DeviceError::InvalidCall("buffer already locked")
        );
    }

    #[test]
    fn injected_failures_and_capacity() {
        let mut dev = RecordingDevice::new();
        dev.fail_next_creates(1);
        let desc = TextureDesc::d2(4, 4, TextureFormat::Rgba8Unorm);
        assert_eq!(dev.create_texture(&desc), Err(DeviceError::OutOfMemory));
        assert!(dev.create_texture(&desc).is_ok());

        dev.set_texture_capacity(Some(desc.size_bytes() + 1));
        assert_eq!(dev.create_texture(&desc), Err(DeviceError::OutOfMemory));
    }

    #[test]
    fn reset_requires_released_objects() {
        let mut dev = RecordingDevice::new();
        let id = dev.create_buffer(&vb(16)).unwrap();
        dev.set_cooperative_level(CooperativeLevel::NotReset);
        assert!(dev.reset().is_err());
        dev.destroy_buffer(id);
        assert!(dev.reset().is_ok());
        assert_eq!(dev.cooperative_level(), CooperativeLevel::Ok);
    }

    #[test]
    fn lost_device_refuses_draws_and_creates() {
        let mut dev = RecordingDevice::new();
        dev.set_cooperative_level(CooperativeLevel::Lost);
        assert_eq!(dev.draw_primitive(PrimitiveType::TriangleList, 0, 1), Err(DeviceError::Lost));
        assert_eq!(dev.create_buffer(&vb(16)), Err(DeviceError::Lost));
        // register writes still go through while lost
        assert!(dev.set_render_state(RenderState::ZEnable(true)).is_ok());
    }
}
