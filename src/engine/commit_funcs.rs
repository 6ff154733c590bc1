// src/engine/commit_funcs.rs
//! What each [`CommitFunc`] does when drained.
//!
//! Every function compares `desired` (or the transform stack) against `current` and
//! writes only the difference, unless the function is still unsynced after init/reset.

use glam::{Mat4, Vec4};

use super::{log_failure, StateEngine};
use crate::commit::{CommitFunc, ShadingMode};
use crate::device::{Device, LightKind, RenderState, TransformKind, MAX_BONES, MAX_TEXTURE_TRANSFORMS};
use crate::state::{MAX_CLIP_PLANES, MAX_LIGHTS, MAX_PS_CONSTANTS, MAX_VS_CONSTANTS};

// ---------- engine-owned vertex shader registers ----------

/// Model-view-projection, 4 rows.
pub const VS_MVP: u32 = 0;
pub const VS_VIEW_PROJ: u32 = 4;
pub const VS_MODEL: u32 = 8;
/// 4 registers per light: position+range, direction+kind, diffuse, attenuation+falloff.
pub const VS_LIGHTS: u32 = 16;
pub const VS_AMBIENT: u32 = VS_LIGHTS + 4 * MAX_LIGHTS as u32;
/// 3 rows (affine) per bone.
pub const VS_BONES: u32 = 48;
pub const VS_TEXTURE_TRANSFORMS: u32 = VS_BONES + 3 * MAX_BONES as u32;
/// First register callers may write.
pub const VS_USER_BASE: u32 = VS_TEXTURE_TRANSFORMS + 4 * MAX_TEXTURE_TRANSFORMS as u32;

/// Row-major registers, as shaders read them.
#[inline]
fn rows(m: Mat4) -> [Vec4; 4] {
    let t = m.transpose();
    [t.x_axis, t.y_axis, t.z_axis, t.w_axis]
}

fn light_kind_code(kind: LightKind) -> f32 {
    match kind {
        LightKind::Point => 0.0,
        LightKind::Spot => 1.0,
        LightKind::Directional => 2.0,
    }
}

impl<D: Device> StateEngine<D> {
    pub(super) fn run_commit(&mut self, func: CommitFunc) {
        let force = self.unsynced & func.bit() != 0;
        self.unsynced &= !func.bit();
        self.stats.commit_runs += 1;

        match func {
            CommitFunc::FixedFunctionTransforms => self.commit_fixed_function_transforms(force),
            CommitFunc::ProgrammableTransforms => self.commit_programmable_transforms(force),
            CommitFunc::FixedFunctionLights => self.commit_fixed_function_lights(force),
            CommitFunc::ProgrammableLights => self.commit_programmable_lights(force),
            CommitFunc::VertexShaderConstants => self.commit_vertex_shader_constants(force),
            CommitFunc::PixelShaderConstants => self.commit_pixel_shader_constants(force),
            CommitFunc::Viewport => self.commit_viewport(force),
            CommitFunc::Ambient => self.commit_ambient(force),
            CommitFunc::FogParams => self.commit_fog_params(force),
            CommitFunc::ClipPlanes => self.commit_clip_planes(force),
        }
    }

    /// Writes `data` at `start` unless the shadow already holds it.
    fn upload_vs(&mut self, start: u32, data: &[Vec4], force: bool) {
        let range = start as usize..start as usize + data.len();
        if !force && self.current.vs_constants[range.clone()] == *data {
            return;
        }
        log_failure(
            "set_vertex_shader_constants",
            (start, data.len()),
            self.device.set_vertex_shader_constants(start, data),
        );
        self.current.vs_constants[range].copy_from_slice(data);
    }

    // ---------- transforms ----------

    fn commit_fixed_function_transforms(&mut self, force: bool) {
        let consumer = ShadingMode::FixedFunction;
        let kinds: Vec<TransformKind> = if force {
            TransformKind::all().collect()
        } else {
            self.transforms.dirty_slots(consumer).collect()
        };
        for kind in kinds {
            let matrix = match kind {
                TransformKind::Projection => self.transforms.projection_for(consumer),
                _ => self.transforms.matrix(kind),
            };
            let have = &mut self.current.transforms[kind.index()];
            if force || *have != matrix {
                log_failure("set_transform", kind, self.device.set_transform(kind, &matrix));
                *have = matrix;
            }
            self.transforms.clear_dirty(kind, consumer);
        }
    }

    fn commit_programmable_transforms(&mut self, force: bool) {
        let consumer = ShadingMode::Programmable;
        let core = [TransformKind::Model, TransformKind::View, TransformKind::Projection];

        if force || core.iter().any(|&k| self.transforms.is_dirty(k, consumer)) {
            let model = self.transforms.matrix(TransformKind::Model);
            let view_projection = if self.transforms.depth_bias() == 0.0 && self.transforms.clip_plane().is_none() {
                self.transforms.view_projection()
            } else {
                self.transforms.projection_for(consumer) * self.transforms.matrix(TransformKind::View)
            };
            let mut regs = [Vec4::ZERO; 12];
            regs[0..4].copy_from_slice(&rows(view_projection * model));
            regs[4..8].copy_from_slice(&rows(view_projection));
            regs[8..12].copy_from_slice(&rows(model));
            self.upload_vs(VS_MVP, &regs, force);
            for kind in core {
                self.transforms.clear_dirty(kind, consumer);
            }
        }

        for i in 0..MAX_BONES {
            let kind = TransformKind::Bone(i as u8);
            if force || self.transforms.is_dirty(kind, consumer) {
                let r = rows(self.transforms.matrix(kind));
                self.upload_vs(VS_BONES + 3 * i as u32, &r[..3], force);
                self.transforms.clear_dirty(kind, consumer);
            }
        }

        for i in 0..MAX_TEXTURE_TRANSFORMS {
            let kind = TransformKind::Texture(i as u8);
            if force || self.transforms.is_dirty(kind, consumer) {
                let r = rows(self.transforms.matrix(kind));
                self.upload_vs(VS_TEXTURE_TRANSFORMS + 4 * i as u32, &r, force);
                self.transforms.clear_dirty(kind, consumer);
            }
        }
    }

    // ---------- lights ----------

    fn commit_fixed_function_lights(&mut self, force: bool) {
        for i in 0..MAX_LIGHTS {
            let want = self.desired.lights[i];
            if let Some(light) = want {
                if force || self.current.lights[i] != want {
                    log_failure("set_light", i, self.device.set_light(i as u32, &light));
                    self.current.lights[i] = want;
                }
            }
            // a slot without a light can't be enabled
            let enable = self.desired.light_enabled[i] && want.is_some();
            if force || self.current.light_enabled[i] != enable {
                log_failure("light_enable", (i, enable), self.device.light_enable(i as u32, enable));
                self.current.light_enabled[i] = enable;
            }
        }
    }

    fn commit_programmable_lights(&mut self, force: bool) {
        let mut regs = [Vec4::ZERO; 4 * MAX_LIGHTS + 1];
        for i in 0..MAX_LIGHTS {
            let Some(light) = self.desired.lights[i].filter(|_| self.desired.light_enabled[i]) else {
                continue;
            };
            let base = 4 * i;
            regs[base] = light.position.extend(light.range);
            regs[base + 1] = light.direction.extend(light_kind_code(light.kind));
            regs[base + 2] = light.diffuse;
            regs[base + 3] = light.attenuation.extend(light.falloff);
        }
        regs[4 * MAX_LIGHTS] = self.desired.ambient;
        self.upload_vs(VS_LIGHTS, &regs, force);
    }

    // ---------- shader constants ----------

    fn commit_vertex_shader_constants(&mut self, force: bool) {
        let dirty = self.vs_dirty.take();
        let (start, end) = match (force, dirty) {
            (true, _) => (VS_USER_BASE, MAX_VS_CONSTANTS as u32),
            (false, Some(range)) => range,
            (false, None) => return,
        };
        let range = start as usize..end as usize;
        let want = &self.desired.vs_constants[range.clone()];
        if force || self.current.vs_constants[range.clone()] != *want {
            log_failure(
                "set_vertex_shader_constants",
                (start, end),
                self.device.set_vertex_shader_constants(start, want),
            );
            self.current.vs_constants[range].copy_from_slice(want);
        }
    }

    fn commit_pixel_shader_constants(&mut self, force: bool) {
        let dirty = self.ps_dirty.take();
        let (start, end) = match (force, dirty) {
            (true, _) => (0, MAX_PS_CONSTANTS as u32),
            (false, Some(range)) => range,
            (false, None) => return,
        };
        let range = start as usize..end as usize;
        let want = &self.desired.ps_constants[range.clone()];
        if force || self.current.ps_constants[range.clone()] != *want {
            log_failure(
                "set_pixel_shader_constants",
                (start, end),
                self.device.set_pixel_shader_constants(start, want),
            );
            self.current.ps_constants[range].copy_from_slice(want);
        }
    }

    // ---------- scalar registers ----------

    fn commit_viewport(&mut self, force: bool) {
        let want = self.desired.viewport;
        if force || self.current.viewport != want {
            log_failure("set_viewport", want, self.device.set_viewport(&want));
            self.current.viewport = want;
        }
    }

    fn commit_ambient(&mut self, force: bool) {
        let want = self.desired.ambient;
        if force || self.current.ambient != want {
            let state = RenderState::Ambient(want);
            log_failure("set_render_state", state, self.device.set_render_state(state));
            self.current.ambient = want;
        }
    }

    fn commit_fog_params(&mut self, force: bool) {
        let want = self.desired.fog;
        let have = self.current.fog;
        let mut states = Vec::with_capacity(4);
        if force || want.color != have.color {
            states.push(RenderState::FogColor(want.color));
        }
        if force || want.start != have.start {
            states.push(RenderState::FogStart(want.start));
        }
        if force || want.end != have.end {
            states.push(RenderState::FogEnd(want.end));
        }
        if force || want.density != have.density {
            states.push(RenderState::FogDensity(want.density));
        }
        for state in states {
            log_failure("set_render_state", state, self.device.set_render_state(state));
        }
        self.current.fog = want;
    }

    fn commit_clip_planes(&mut self, force: bool) {
        let mask = self.desired.clip_plane_mask;
        for i in 0..MAX_CLIP_PLANES {
            let plane = self.desired.clip_planes[i];
            if mask & (1 << i) != 0 && (force || self.current.clip_planes[i] != plane) {
                log_failure("set_clip_plane", i, self.device.set_clip_plane(i as u32, plane));
                self.current.clip_planes[i] = plane;
            }
        }
        if force || self.current.clip_plane_mask != mask {
            let state = RenderState::ClipPlaneEnable(mask);
            log_failure("set_render_state", state, self.device.set_render_state(state));
            self.current.clip_plane_mask = mask;
        }

        // programmable passes clip through the oblique projection instead
        let plane = (mask & 1 != 0).then_some(self.desired.clip_planes[0]);
        if plane != self.transforms.clip_plane() {
            self.transforms.set_clip_plane(plane);
            self.commit.add_func(CommitFunc::ProgrammableTransforms);
        }
    }
}
