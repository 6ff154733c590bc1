// src/state/transition.rs
//! Moves the device from its current state to a snapshot's configuration.
//!
//! Groups are compared in a fixed order (depth/stencil, blend, raster, texture stages,
//! fog mode, shaders). A group that matches `current` costs one comparison and emits
//! nothing; a group that differs emits one call per differing field. A failing call is
//! logged and `current` is still updated, since there's no meaningful retry mid-frame.

use std::fmt::Debug;

use super::shadow::ShadowState;
use super::snapshot::PipelineConfig;
use crate::device::{Device, FogMode, RenderState, TextureStageState};
use crate::error::DeviceResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyMode {
    /// Emit only what differs from `current`.
    Diff,
    /// Write every governed field. Used once after device (re)initialization.
    Full,
}

/// Bitset of groups a transition touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChangedGroups(u16);

impl ChangedGroups {
    pub const DEPTH_STENCIL: Self = Self(1 << 0);
    pub const BLEND: Self = Self(1 << 1);
    pub const RASTER: Self = Self(1 << 2);
    pub const TEXTURE_STAGES: Self = Self(1 << 3);
    pub const FOG: Self = Self(1 << 4);
    pub const SHADERS: Self = Self(1 << 5);
    // derived
    pub const DEPTH_BIAS: Self = Self(1 << 8);
    pub const SHADING_MODE: Self = Self(1 << 9);
    pub const LIGHTING: Self = Self(1 << 10);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub changed: ChangedGroups,
    /// Device calls emitted.
    pub calls: u32,
    /// Device calls that reported an error.
    pub failures: u32,
}

struct Emitter<'a> {
    device: &'a mut dyn Device,
    report: TransitionReport,
}

impl Emitter<'_> {
    fn check<P: Debug>(&mut self, op: &'static str, param: P, result: DeviceResult<()>) {
        self.report.calls += 1;
        if let Err(e) = result {
            self.report.failures += 1;
            log::warn!("{op}({param:?}) failed: {e}");
        }
    }

    fn render_states(&mut self, states: &[RenderState]) {
        for &state in states {
            let result = self.device.set_render_state(state);
            self.check("set_render_state", state, result);
        }
    }

    fn stage_states(&mut self, stage: u32, states: &[TextureStageState]) {
        for &state in states {
            let result = self.device.set_texture_stage_state(stage, state);
            self.check("set_texture_stage_state", (stage, state), result);
        }
    }
}

/// Applies `target` on top of `current`, updating `current` to match.
pub fn apply(
    device: &mut dyn Device,
    current: &mut ShadowState,
    target: &PipelineConfig,
    mode: ApplyMode,
) -> TransitionReport {
    let full = mode == ApplyMode::Full;
    let mut emit = Emitter {
        device,
        report: TransitionReport::default(),
    };
    let mut states = Vec::new();

    // ---------- depth / stencil ----------
    if full || target.depth_stencil != current.depth_stencil {
        states.clear();
        target.depth_stencil.diff((!full).then_some(&current.depth_stencil), &mut states);
        emit.render_states(&states);
        current.depth_stencil = target.depth_stencil;
        emit.report.changed.insert(ChangedGroups::DEPTH_STENCIL);
    }

    // ---------- blend ----------
    if full || target.blend != current.blend {
        states.clear();
        target.blend.diff((!full).then_some(&current.blend), &mut states);
        emit.render_states(&states);
        current.blend = target.blend;
        emit.report.changed.insert(ChangedGroups::BLEND);
    }

    // ---------- raster ----------
    if full || target.raster != current.raster {
        states.clear();
        target.raster.diff((!full).then_some(&current.raster), &mut states);
        emit.render_states(&states);
        if full || target.raster.depth_bias != current.raster.depth_bias {
            emit.report.changed.insert(ChangedGroups::DEPTH_BIAS);
        }
        current.raster = target.raster;
        emit.report.changed.insert(ChangedGroups::RASTER);
    }

    // ---------- texture stages ----------
    let mut stage_states = Vec::new();
    for (stage, (want, have)) in target.stages.iter().zip(current.stages.iter_mut()).enumerate() {
        if !full && want == have {
            continue;
        }
        stage_states.clear();
        want.diff((!full).then_some(&*have), &mut stage_states);
        emit.stage_states(stage as u32, &stage_states);
        *have = *want;
        emit.report.changed.insert(ChangedGroups::TEXTURE_STAGES);
    }

    // ---------- fog mode ----------
    if full || target.fog_mode != current.fog_mode {
        let enabled = target.fog_mode != FogMode::None;
        if full || enabled != (current.fog_mode != FogMode::None) {
            emit.render_states(&[RenderState::FogEnable(enabled)]);
        }
        emit.render_states(&[RenderState::FogTableMode(target.fog_mode)]);
        current.fog_mode = target.fog_mode;
        emit.report.changed.insert(ChangedGroups::FOG);
    }

    // ---------- shaders ----------
    let want = &target.shaders;
    let have = current.shaders;
    if full || *want != have {
        if full || want.vertex_shader != have.vertex_shader {
            let result = emit.device.set_vertex_shader(want.vertex_shader);
            emit.check("set_vertex_shader", want.vertex_shader, result);
        }
        if full || want.pixel_shader != have.pixel_shader {
            let result = emit.device.set_pixel_shader(want.pixel_shader);
            emit.check("set_pixel_shader", want.pixel_shader, result);
        }
        if full || want.vertex_usage != have.vertex_usage {
            let result = emit.device.set_vertex_format(want.vertex_usage);
            emit.check("set_vertex_format", want.vertex_usage, result);
        }
        if full || want.lighting != have.lighting {
            emit.render_states(&[RenderState::Lighting(want.lighting)]);
            emit.report.changed.insert(ChangedGroups::LIGHTING);
        }
        if full || want.shading_mode() != have.shading_mode() {
            emit.report.changed.insert(ChangedGroups::SHADING_MODE);
        }
        current.shaders = *want;
        emit.report.changed.insert(ChangedGroups::SHADERS);
    }

    emit.report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, RecordingDevice, ShaderId, TextureOp, VertexUsage};
    use crate::state::groups::{BlendState, DepthBiasMode, RasterState, ShaderBinding, TextureStageOps};

    #[test]
    fn second_application_is_silent() {
        let mut dev = RecordingDevice::new();
        let mut current = ShadowState::default();
        let target = PipelineConfig::default().with_blend(BlendState::alpha());

        let first = apply(&mut dev, &mut current, &target, ApplyMode::Diff);
        assert_eq!(first.changed, ChangedGroups::BLEND);
        assert_eq!(first.calls, 3);

        dev.clear_calls();
        let second = apply(&mut dev, &mut current, &target, ApplyMode::Diff);
        assert!(second.changed.is_empty());
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn full_mode_writes_everything_once() {
        let mut dev = RecordingDevice::new();
        let mut current = ShadowState::default();
        let report = apply(&mut dev, &mut current, &PipelineConfig::default(), ApplyMode::Full);
        // 11 depth/stencil + 13 blend + 3 raster + 8*7 stage + 2 fog + 3 shader + lighting
        assert_eq!(report.calls, 11 + 13 + 3 + 56 + 2 + 3 + 1);
        assert!(report.changed.contains(ChangedGroups::SHADING_MODE));
        assert_eq!(dev.calls().len(), report.calls as usize);
    }

    #[test]
    fn single_stage_change_touches_one_register() {
        let mut dev = RecordingDevice::new();
        let mut current = ShadowState::default();
        let mut ops = TextureStageOps::defaults_for(2);
        ops.color_op = TextureOp::Add;
        let target = PipelineConfig::default().with_stage(2, ops);

        apply(&mut dev, &mut current, &target, ApplyMode::Diff);
        assert_eq!(
            dev.calls(),
            &[DeviceCall::TextureStageState(2, TextureStageState::ColorOp(TextureOp::Add))]
        );
    }

    #[test]
    fn failures_are_counted_and_shadow_still_updated() {
        let mut dev = RecordingDevice::new();
        dev.set_fail_state_calls(true);
        let mut current = ShadowState::default();
        let target = PipelineConfig::default().with_blend(BlendState::additive());

        let report = apply(&mut dev, &mut current, &target, ApplyMode::Diff);
        assert_eq!(report.failures, report.calls);
        assert_eq!(current.blend, BlendState::additive());
    }

    #[test]
    fn derived_flags_report_bias_mode_and_lighting() {
        let mut dev = RecordingDevice::new();
        let mut current = ShadowState::default();

        let biased = PipelineConfig::default().with_raster(RasterState {
            depth_bias: DepthBiasMode::Shadow,
            ..RasterState::default()
        });
        let report = apply(&mut dev, &mut current, &biased, ApplyMode::Diff);
        assert!(report.changed.contains(ChangedGroups::DEPTH_BIAS));
        assert_eq!(report.calls, 0);

        let prog = biased.clone().with_shaders(ShaderBinding::programmable(
            ShaderId(3),
            ShaderId(4),
            VertexUsage::POSITION,
        ));
        let report = apply(&mut dev, &mut current, &prog, ApplyMode::Diff);
        assert!(report.changed.contains(ChangedGroups::SHADING_MODE));
        assert!(!report.changed.contains(ChangedGroups::LIGHTING));

        let lit = biased.with_shaders(ShaderBinding {
            lighting: true,
            ..ShaderBinding::default()
        });
        let report = apply(&mut dev, &mut current, &lit, ApplyMode::Diff);
        assert!(report.changed.contains(ChangedGroups::SHADING_MODE));
        assert!(report.changed.contains(ChangedGroups::LIGHTING));
    }

    #[test]
    fn fog_toggle_writes_enable_and_mode() {
        let mut dev = RecordingDevice::new();
        let mut current = ShadowState::default();
        apply(&mut dev, &mut current, &PipelineConfig::default().with_fog_mode(FogMode::Exp2), ApplyMode::Diff);
        assert_eq!(
            dev.take_calls(),
            vec![
                DeviceCall::RenderState(RenderState::FogEnable(true)),
                DeviceCall::RenderState(RenderState::FogTableMode(FogMode::Exp2)),
            ]
        );
        apply(&mut dev, &mut current, &PipelineConfig::default().with_fog_mode(FogMode::Linear), ApplyMode::Diff);
        assert_eq!(
            dev.take_calls(),
            vec![DeviceCall::RenderState(RenderState::FogTableMode(FogMode::Linear))]
        );
    }
}
