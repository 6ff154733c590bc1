// src/engine/mod.rs
//! The state engine: the API the material and mesh layers talk to.
//!
//! - Snapshots are requested once and applied per draw (diffed against `current`)
//! - Per-field setters write `desired` and queue a commit function
//! - `draw` drains the commit queue for the bound shading mode, then draws
//! - Device loss runs through one explicit state machine and one `reset` entry point

mod commit_funcs;

pub use commit_funcs::{
    VS_AMBIENT, VS_BONES, VS_LIGHTS, VS_MODEL, VS_MVP, VS_TEXTURE_TRANSFORMS, VS_USER_BASE,
    VS_VIEW_PROJ,
};

use std::thread::{self, ThreadId};

use bytemuck::Pod;
use glam::{Mat4, Vec3, Vec4};

use crate::commit::{CommitFunc, CommitPhase, CommitQueue, ShadingMode};
use crate::config::{BufferSizePolicy, EngineConfig};
use crate::device::{
    BufferKind, CooperativeLevel, Device, DeviceObjects, DeviceTextureId, Light, PrimitiveType,
    SamplerSlot, TextureDesc, TransformKind, Viewport,
};
use crate::dynamic_buffer::{DynamicAllocation, DynamicBufferAllocator, StagingWriter};
use crate::error::{DeviceError, Error, Result};
use crate::resource::{
    BindOutcome, GroupId, GroupUsage, MemoryReport, ResourceTable, TextureFlags, TextureHandle,
};
use crate::state::{
    self, ApplyMode, ChangedGroups, FogParams, PipelineConfig, SamplerParams, ShadowState,
    SnapshotCache, SnapshotId, TransitionReport, MAX_CLIP_PLANES, MAX_LIGHTS, MAX_PS_CONSTANTS,
    MAX_VS_CONSTANTS,
};
use crate::transform::TransformStack;

/// Device-lost state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Active,
    /// Every device object is gone; waiting for the device to become resettable.
    Lost,
    /// Inside `reset`.
    Resetting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// Device not active; nothing was submitted.
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames: u64,
    pub draws: u64,
    pub skipped_draws: u64,
    pub snapshot_applications: u64,
    pub transition_calls: u64,
    pub commit_runs: u64,
    pub resets: u64,
}

pub struct StateEngine<D: Device> {
    device: D,
    config: EngineConfig,
    status: DeviceStatus,

    current: ShadowState,
    desired: ShadowState,
    snapshots: SnapshotCache,
    bound: Option<SnapshotId>,
    full_apply_pending: bool,

    commit: CommitQueue,
    /// Commit functions that must write unconditionally on their next run.
    unsynced: u64,
    commit_scratch: Vec<CommitFunc>,
    vs_dirty: Option<(u32, u32)>,
    ps_dirty: Option<(u32, u32)>,

    transforms: TransformStack,
    textures: ResourceTable,
    dynamic: DynamicBufferAllocator,

    frame: u64,
    stats: EngineStats,
    /// Thread that created the engine; device paths assert they run on it.
    owner: ThreadId,
}

impl<D: Device> StateEngine<D> {
    pub fn new(device: D, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let dynamic = DynamicBufferAllocator::new(&config);
        let mut engine = Self {
            device,
            config,
            status: DeviceStatus::Active,
            current: ShadowState::new(),
            desired: ShadowState::new(),
            snapshots: SnapshotCache::new(),
            bound: None,
            full_apply_pending: true,
            commit: CommitQueue::new(),
            unsynced: 0,
            commit_scratch: Vec::new(),
            vs_dirty: None,
            ps_dirty: None,
            transforms: TransformStack::new(),
            textures: ResourceTable::new(),
            dynamic,
            frame: 0,
            stats: EngineStats::default(),
            owner: thread::current().id(),
        };
        engine.initialize_device_state();
        log::debug!("state engine initialized");
        Ok(engine)
    }

    /// Everything after this must be written unconditionally once.
    fn initialize_device_state(&mut self) {
        self.current.reset();
        self.commit.requeue_all();
        self.unsynced = CommitFunc::ALL.iter().fold(0, |acc, f| acc | f.bit());
        self.transforms.mark_all_dirty();
        self.full_apply_pending = true;
        self.vs_dirty = Some((VS_USER_BASE, MAX_VS_CONSTANTS as u32));
        self.ps_dirty = Some((0, MAX_PS_CONSTANTS as u32));

        // samplers aren't governed by snapshots; write their defaults here
        let defaults = SamplerParams::default();
        let mut states = Vec::new();
        defaults.diff(None, &mut states);
        for slot in ShadowState::sampler_slots() {
            let index = slot.device_index();
            log_failure("set_texture", index, self.device.set_texture(index, None));
            for &state in &states {
                log_failure("set_sampler_state", (index, state), self.device.set_sampler_state(index, state));
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Edits a copy of the configuration and keeps it only if it validates.
    ///
    /// Budget and filtering changes apply from the next bind. Ring sizes only change
    /// through [`StateEngine::recreate_dynamic_buffers`].
    pub fn update_config(&mut self, edit: impl FnOnce(&mut EngineConfig)) -> Result<()> {
        let mut next = self.config.clone();
        edit(&mut next);
        if let Err(e) = next.validate() {
            log::error!("rejected config update: {e}");
            return Err(e.context("updating engine config"));
        }
        self.config = next;
        Ok(())
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn current_state(&self) -> &ShadowState {
        &self.current
    }

    pub fn desired_state(&self) -> &ShadowState {
        &self.desired
    }

    pub fn transforms(&self) -> &TransformStack {
        &self.transforms
    }

    pub fn textures(&self) -> &ResourceTable {
        &self.textures
    }

    pub fn commit_queue(&self) -> &CommitQueue {
        &self.commit
    }

    pub fn dynamic_buffers(&self) -> &DynamicBufferAllocator {
        &self.dynamic
    }

    pub fn bound_snapshot(&self) -> Option<SnapshotId> {
        self.bound
    }

    pub fn snapshots(&self) -> &SnapshotCache {
        &self.snapshots
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    #[inline]
    fn shading_mode(&self) -> ShadingMode {
        self.current.shaders.shading_mode()
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    #[inline]
    fn debug_assert_owner(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "device paths must run on the thread that created the engine"
        );
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::DeviceNotActive(self.status))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────

    pub fn request_snapshot(&mut self, config: PipelineConfig) -> SnapshotId {
        self.snapshots.request(config)
    }

    /// Drops every compiled snapshot. Ids issued before become invalid.
    pub fn reset_snapshot_cache(&mut self) {
        self.snapshots.reset();
        self.bound = None;
    }

    /// Moves the device to the snapshot's configuration. Skipped (empty report) while
    /// the device isn't active.
    pub fn apply_snapshot(&mut self, id: SnapshotId) -> Result<TransitionReport> {
        self.debug_assert_owner();
        let snapshot = self
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| Error::custom(format!("unknown snapshot {id:?}")))?;
        if !self.is_active() {
            log::debug!("apply_snapshot({id:?}) skipped: device {:?}", self.status);
            return Ok(TransitionReport::default());
        }

        let mode = if self.full_apply_pending { ApplyMode::Full } else { ApplyMode::Diff };
        let config = snapshot.config();
        let report = state::apply(&mut self.device, &mut self.current, config, mode);
        self.full_apply_pending = false;
        self.bound = Some(id);

        self.desired.depth_stencil = config.depth_stencil;
        self.desired.blend = config.blend;
        self.desired.raster = config.raster;
        self.desired.stages = config.stages;
        self.desired.fog_mode = config.fog_mode;
        self.desired.shaders = config.shaders;

        if report.changed.contains(ChangedGroups::DEPTH_BIAS) {
            self.transforms.set_depth_bias(config.raster.depth_bias.offset());
            self.queue_transforms();
        }
        if report.changed.contains(ChangedGroups::SHADING_MODE) {
            log::debug!("shading mode now {:?}", config.shaders.shading_mode());
            for func in [
                CommitFunc::FixedFunctionTransforms,
                CommitFunc::ProgrammableTransforms,
                CommitFunc::FixedFunctionLights,
                CommitFunc::ProgrammableLights,
                CommitFunc::VertexShaderConstants,
                CommitFunc::Ambient,
            ] {
                self.commit.add_func(func);
            }
        }
        if report.changed.contains(ChangedGroups::LIGHTING) {
            self.commit.add_func(CommitFunc::FixedFunctionLights);
            self.commit.add_func(CommitFunc::Ambient);
        }

        self.stats.snapshot_applications += 1;
        self.stats.transition_calls += report.calls as u64;
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Per-field setters
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.desired.viewport = viewport;
        self.commit.add_func(CommitFunc::Viewport);
    }

    pub fn set_light(&mut self, index: usize, light: Option<Light>) -> Result<()> {
        let slot = self
            .desired
            .lights
            .get_mut(index)
            .ok_or_else(|| contract_violation(format!("light {index} out of range (max {MAX_LIGHTS})")))?;
        *slot = light;
        self.queue_lights();
        Ok(())
    }

    pub fn enable_light(&mut self, index: usize, enable: bool) -> Result<()> {
        let slot = self
            .desired
            .light_enabled
            .get_mut(index)
            .ok_or_else(|| contract_violation(format!("light {index} out of range (max {MAX_LIGHTS})")))?;
        *slot = enable;
        self.queue_lights();
        Ok(())
    }

    pub fn set_ambient(&mut self, color: Vec4) {
        self.desired.ambient = color;
        self.commit.add_func(CommitFunc::Ambient);
        self.commit.add_func(CommitFunc::ProgrammableLights);
    }

    pub fn set_fog_params(&mut self, fog: FogParams) {
        self.desired.fog = fog;
        self.commit.add_func(CommitFunc::FogParams);
    }

    /// World-space clip plane `ax + by + cz + d >= 0`.
    pub fn set_clip_plane(&mut self, index: usize, plane: Vec4) -> Result<()> {
        let slot = self
            .desired
            .clip_planes
            .get_mut(index)
            .ok_or_else(|| contract_violation(format!("clip plane {index} out of range (max {MAX_CLIP_PLANES})")))?;
        *slot = plane;
        self.commit.add_func(CommitFunc::ClipPlanes);
        Ok(())
    }

    pub fn enable_clip_planes(&mut self, mask: u32) {
        self.desired.clip_plane_mask = mask & ((1 << MAX_CLIP_PLANES) - 1);
        self.commit.add_func(CommitFunc::ClipPlanes);
    }

    /// Registers below [`VS_USER_BASE`] belong to the engine.
    pub fn set_vertex_shader_constants(&mut self, start: u32, data: &[Vec4]) -> Result<()> {
        let end = start as usize + data.len();
        if start < VS_USER_BASE || end > MAX_VS_CONSTANTS {
            return Err(contract_violation(format!(
                "vertex shader constants {start}..{end} outside {VS_USER_BASE}..{MAX_VS_CONSTANTS}"
            )));
        }
        self.desired.vs_constants[start as usize..end].copy_from_slice(data);
        self.vs_dirty = Some(extend_range(self.vs_dirty, start, end as u32));
        self.commit.add_func(CommitFunc::VertexShaderConstants);
        Ok(())
    }

    pub fn set_pixel_shader_constants(&mut self, start: u32, data: &[Vec4]) -> Result<()> {
        let end = start as usize + data.len();
        if end > MAX_PS_CONSTANTS {
            return Err(contract_violation(format!(
                "pixel shader constants {start}..{end} outside 0..{MAX_PS_CONSTANTS}"
            )));
        }
        self.desired.ps_constants[start as usize..end].copy_from_slice(data);
        self.ps_dirty = Some(extend_range(self.ps_dirty, start, end as u32));
        self.commit.add_func(CommitFunc::PixelShaderConstants);
        Ok(())
    }

    fn queue_lights(&mut self) {
        self.commit.add_func(CommitFunc::FixedFunctionLights);
        self.commit.add_func(CommitFunc::ProgrammableLights);
    }

    fn queue_transforms(&mut self) {
        self.commit.add_func(CommitFunc::FixedFunctionTransforms);
        self.commit.add_func(CommitFunc::ProgrammableTransforms);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Textures
    // ─────────────────────────────────────────────────────────────────────

    pub fn register_texture_group(&mut self, name: &str) -> GroupId {
        self.textures.accounting_mut().register_group(name)
    }

    /// Creates a texture with `copies` device objects (more than one for streaming).
    pub fn create_texture(
        &mut self,
        desc: &TextureDesc,
        group: GroupId,
        flags: TextureFlags,
        copies: usize,
    ) -> Result<TextureHandle> {
        self.ensure_active()?;
        self.textures.create(&mut self.device, desc, group, flags, copies)
    }

    /// Drops a reference; returns whether the texture was destroyed.
    pub fn delete_texture(&mut self, handle: TextureHandle) -> Result<bool> {
        self.textures.delete(&mut self.device, &mut self.current, handle)
    }

    pub fn add_texture_ref(&mut self, handle: TextureHandle) -> Result<u32> {
        self.textures.add_ref(handle)
    }

    pub fn bind_texture(&mut self, slot: SamplerSlot, handle: TextureHandle) -> Result<BindOutcome> {
        if !self.is_active() {
            return Ok(BindOutcome::Skipped);
        }
        let outcome = self
            .textures
            .bind(&mut self.device, &mut self.current, slot, handle, &self.config)?;
        if outcome != BindOutcome::Refused {
            if let Some(s) = self.desired.sampler_mut(slot) {
                *s = self.current.sampler(slot).copied().unwrap_or_default();
            }
        }
        Ok(outcome)
    }

    pub fn unbind_texture(&mut self, slot: SamplerSlot) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.textures.unbind(&mut self.device, &mut self.current, slot)?;
        if let Some(s) = self.desired.sampler_mut(slot) {
            s.texture = None;
        }
        Ok(())
    }

    pub fn mark_texture_dirty(&mut self, handle: TextureHandle) -> Result<()> {
        self.textures.mark_dirty(handle)
    }

    pub fn texture_streaming_target(&self, handle: TextureHandle) -> Result<Option<DeviceTextureId>> {
        self.textures.streaming_target(handle)
    }

    pub fn set_texture_sampler(&mut self, handle: TextureHandle, params: SamplerParams) -> Result<()> {
        self.textures.set_sampler_params(handle, params)
    }

    pub fn memory_usage(&self, group: GroupId) -> Option<&GroupUsage> {
        self.textures.accounting().usage(group)
    }

    pub fn memory_report(&self) -> MemoryReport {
        self.textures.accounting().report(self.config.budget())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dynamic buffers
    // ─────────────────────────────────────────────────────────────────────

    pub fn allocate_dynamic_vertices<T: Pod>(&mut self, vertices: &[T], force_discard: bool) -> Result<DynamicAllocation> {
        self.ensure_active()?;
        self.dynamic
            .vertices
            .allocate(&mut self.device, &mut self.textures, vertices, force_discard)
    }

    pub fn allocate_dynamic_indices<T: Pod>(&mut self, indices: &[T], force_discard: bool) -> Result<DynamicAllocation> {
        self.ensure_active()?;
        self.dynamic
            .indices
            .allocate(&mut self.device, &mut self.textures, indices, force_discard)
    }

    /// Places `size` bytes and lets `fill` write them in place.
    pub fn allocate_dynamic_with(
        &mut self,
        kind: BufferKind,
        size: u64,
        stride: u32,
        force_discard: bool,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<DynamicAllocation> {
        self.ensure_active()?;
        self.dynamic
            .buffer_mut(kind)
            .allocate_with(&mut self.device, &mut self.textures, size, stride, force_discard, fill)
    }

    /// Handle for worker threads; see [`StagingWriter`].
    pub fn staging_writer(&self, kind: BufferKind) -> StagingWriter {
        match kind {
            BufferKind::Vertex => self.dynamic.vertices.staging_writer(),
            BufferKind::Index => self.dynamic.indices.staging_writer(),
        }
    }

    /// Pushes staged worker writes to the device. Draws do this on their own.
    pub fn late_create_dynamic(&mut self) -> Result<()> {
        self.debug_assert_owner();
        self.ensure_active()?;
        self.dynamic.late_create(&mut self.device, &mut self.textures)
    }

    pub fn recreate_dynamic_buffers(&mut self, policy: BufferSizePolicy) {
        self.config.buffer_size_policy = policy;
        self.dynamic.recreate(&mut self.device, &self.config, policy);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Matrix stack
    // ─────────────────────────────────────────────────────────────────────

    pub fn matrix_mode(&mut self, kind: TransformKind) {
        self.transforms.matrix_mode(kind);
    }

    pub fn push_matrix(&mut self) {
        self.transforms.push();
        self.queue_transforms();
    }

    pub fn pop_matrix(&mut self) {
        self.transforms.pop();
        self.queue_transforms();
    }

    pub fn load_identity(&mut self) {
        self.transforms.load_identity();
        self.queue_transforms();
    }

    pub fn load_camera_to_world(&mut self) {
        self.transforms.load_camera_to_world();
        self.queue_transforms();
    }

    pub fn load_matrix(&mut self, m: Mat4) {
        self.transforms.load_matrix(m);
        self.queue_transforms();
    }

    pub fn mult_matrix(&mut self, m: Mat4) {
        self.transforms.mult(m);
        self.queue_transforms();
    }

    pub fn rotate(&mut self, axis: Vec3, radians: f32) {
        self.transforms.rotate(axis, radians);
        self.queue_transforms();
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.transforms.translate(offset);
        self.queue_transforms();
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.transforms.scale(factors);
        self.queue_transforms();
    }

    pub fn ortho(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) {
        self.transforms.ortho(left, right, bottom, top, near, far);
        self.queue_transforms();
    }

    pub fn perspective(&mut self, fov_y_radians: f32, aspect: f32, near: f32, far: f32) {
        self.transforms.perspective(fov_y_radians, aspect, near, far);
        self.queue_transforms();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Drawing
    // ─────────────────────────────────────────────────────────────────────

    /// Runs everything queued for a draw in the bound shading mode: the per-pass
    /// partitions first, then the per-draw ones. Anything queued since the last draw
    /// runs before this one.
    pub fn flush_commits(&mut self) {
        let shading = self.shading_mode();
        let mut funcs = std::mem::take(&mut self.commit_scratch);

        self.commit.drain_for_into(CommitPhase::PerPass, shading, &mut funcs);
        for func in funcs.drain(..) {
            self.run_commit(func);
        }
        self.commit.drain_for_into(CommitPhase::PerDraw, shading, &mut funcs);
        for func in funcs.drain(..) {
            self.run_commit(func);
        }

        self.commit_scratch = funcs;
    }

    fn prepare_draw(&mut self) -> Result<bool> {
        self.debug_assert_owner();
        if !self.is_active() {
            self.stats.skipped_draws += 1;
            return Ok(false);
        }
        if self.full_apply_pending {
            let id = match self.bound {
                Some(id) => id,
                None => self.request_snapshot(PipelineConfig::default()),
            };
            self.apply_snapshot(id)?;
        }
        self.flush_commits();
        self.dynamic.late_create(&mut self.device, &mut self.textures)?;
        Ok(true)
    }

    fn finish_draw(&mut self, result: std::result::Result<(), DeviceError>) -> Result<DrawOutcome> {
        match result {
            Ok(()) => {
                self.stats.draws += 1;
                Ok(DrawOutcome::Drawn)
            }
            Err(DeviceError::Lost) => {
                log::warn!("device lost during draw");
                self.on_device_lost();
                self.stats.skipped_draws += 1;
                Ok(DrawOutcome::Skipped)
            }
            Err(e) => {
                log::warn!("draw failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Draws `vertex_count` vertices from a dynamic vertex allocation.
    pub fn draw(
        &mut self,
        primitive: PrimitiveType,
        vertices: &DynamicAllocation,
        stride: u32,
        vertex_count: u32,
    ) -> Result<DrawOutcome> {
        if !self.prepare_draw()? {
            return Ok(DrawOutcome::Skipped);
        }
        let vb = self
            .dynamic
            .vertices
            .device_buffer()
            .ok_or_else(|| Error::msg("draw without a dynamic vertex buffer"))?;
        log_failure("set_stream_source", vb, self.device.set_stream_source(vb, 0, stride));
        let result = self.device.draw_primitive(
            primitive,
            vertices.first_element,
            primitive.primitive_count(vertex_count),
        );
        self.finish_draw(result)
    }

    /// Draws `index_count` indices from a dynamic index allocation over a dynamic
    /// vertex allocation.
    pub fn draw_indexed(
        &mut self,
        primitive: PrimitiveType,
        vertices: &DynamicAllocation,
        stride: u32,
        indices: &DynamicAllocation,
        index_count: u32,
    ) -> Result<DrawOutcome> {
        if !self.prepare_draw()? {
            return Ok(DrawOutcome::Skipped);
        }
        let (Some(vb), Some(ib)) = (
            self.dynamic.vertices.device_buffer(),
            self.dynamic.indices.device_buffer(),
        ) else {
            return Err(Error::msg("indexed draw without dynamic vertex and index buffers"));
        };
        log_failure("set_stream_source", vb, self.device.set_stream_source(vb, 0, stride));
        log_failure("set_indices", ib, self.device.set_indices(ib));
        let result = self.device.draw_indexed_primitive(
            primitive,
            vertices.first_element as i32,
            indices.first_element,
            primitive.primitive_count(index_count),
        );
        self.finish_draw(result)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frames and device loss
    // ─────────────────────────────────────────────────────────────────────

    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.textures.begin_frame(self.frame);
        self.dynamic.begin_frame();
        self.stats.frames += 1;
    }

    /// Ends the frame and polls the device.
    pub fn end_frame(&mut self) -> DeviceStatus {
        self.check_device()
    }

    /// Polls the cooperative level and drives the lost/reset state machine.
    pub fn check_device(&mut self) -> DeviceStatus {
        self.debug_assert_owner();
        let level = self.device.cooperative_level();
        match (self.status, level) {
            (DeviceStatus::Active, CooperativeLevel::Ok) => {}
            (DeviceStatus::Active, CooperativeLevel::Lost) => self.on_device_lost(),
            (DeviceStatus::Active, CooperativeLevel::NotReset) => {
                self.on_device_lost();
                self.try_reset();
            }
            (DeviceStatus::Lost, CooperativeLevel::Lost) => {}
            (DeviceStatus::Lost, _) | (DeviceStatus::Resetting, _) => self.try_reset(),
        }
        self.status
    }

    fn try_reset(&mut self) {
        if let Err(e) = self.reset() {
            log::warn!("device reset failed, staying lost: {e}");
        }
    }

    fn on_device_lost(&mut self) {
        if self.status != DeviceStatus::Active {
            return;
        }
        log::warn!("device lost, releasing device objects");
        self.release_device_objects();
        self.status = DeviceStatus::Lost;
    }

    fn release_device_objects(&mut self) {
        self.textures.release(&mut self.device);
        self.dynamic.release(&mut self.device);
        self.commit.release(&mut self.device);
    }

    fn restore_device_objects(&mut self) -> Result<()> {
        self.commit.restore(&mut self.device)?;
        self.textures.restore(&mut self.device)?;
        self.dynamic.restore(&mut self.device)
    }

    /// Full recovery: release everything, reset the device, rebuild `current` from
    /// defaults, replay texture creation and force the next snapshot to apply in full.
    pub fn reset(&mut self) -> Result<()> {
        self.debug_assert_owner();
        if self.status == DeviceStatus::Active {
            self.release_device_objects();
        }
        self.status = DeviceStatus::Resetting;

        if let Err(e) = self.device.reset() {
            self.status = DeviceStatus::Lost;
            return Err(Error::from(e).context("resetting device"));
        }

        self.initialize_device_state();
        if let Err(e) = self.restore_device_objects() {
            self.release_device_objects();
            self.status = DeviceStatus::Lost;
            return Err(e.context("restoring device objects"));
        }

        self.status = DeviceStatus::Active;
        self.stats.resets += 1;
        log::info!("device reset complete, {} textures restored", self.textures.len());
        Ok(())
    }
}

fn contract_violation(message: String) -> Error {
    log::error!("{message}");
    Error::Custom(message)
}

fn extend_range(range: Option<(u32, u32)>, start: u32, end: u32) -> (u32, u32) {
    match range {
        Some((s, e)) => (s.min(start), e.max(end)),
        None => (start, end),
    }
}

pub(crate) fn log_failure<P: std::fmt::Debug>(op: &str, param: P, result: std::result::Result<(), DeviceError>) {
    if let Err(e) = result {
        log::warn!("{op}({param:?}) failed: {e}");
    }
}
