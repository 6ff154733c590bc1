// src/transform.rs
//! Per-slot matrix stacks feeding both the fixed-function and programmable consumers.
//!
//! Every mutation marks its slot dirty for *both* consumers; each consumer clears only
//! its own flag, so the two refresh independently. Derived matrices (view-projection,
//! depth-biased projection, clip-plane projection) are cached and rebuilt only when an
//! input changed and somebody asks for that variant.
//!
//! Conventions follow glam: column vectors, `top = top * m` for local multiplies, and
//! left-handed projections with a 0..1 depth range.

use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::commit::ShadingMode;
use crate::device::{TransformKind, TRANSFORM_SLOT_COUNT};

/// Per-element tolerance under which a loaded matrix counts as identity.
pub const IDENTITY_TOLERANCE: f32 = 1.0e-3;

pub const MAX_STACK_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatrixState {
    Identity,
    /// Pure rotation with translation stripped (skybox orientation).
    CameraToWorld,
    General,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DerivedStats {
    pub view_projection: u32,
    pub biased_projection: u32,
    pub clip_projection: u32,
}

#[inline]
fn consumer_index(consumer: ShadingMode) -> usize {
    match consumer {
        ShadingMode::FixedFunction => 0,
        ShadingMode::Programmable => 1,
    }
}

struct TransformSlot {
    stack: Vec<(Mat4, MatrixState)>,
    dirty: [bool; 2],
}

impl TransformSlot {
    fn new() -> Self {
        Self {
            stack: vec![(Mat4::IDENTITY, MatrixState::Identity)],
            dirty: [true; 2],
        }
    }

    #[inline]
    fn top(&self) -> &(Mat4, MatrixState) {
        // never empty: pop refuses to remove the last entry
        &self.stack[self.stack.len() - 1]
    }

    #[inline]
    fn top_mut(&mut self) -> &mut (Mat4, MatrixState) {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }
}

/// Cached derived matrix.
#[derive(Clone, Copy)]
struct Cached {
    value: Mat4,
    valid: bool,
}

impl Cached {
    const EMPTY: Self = Self {
        value: Mat4::IDENTITY,
        valid: false,
    };
}

pub struct TransformStack {
    slots: Vec<TransformSlot>,
    mode: TransformKind,
    depth_bias: f32,
    /// World-space plane for the oblique near-plane projection.
    clip_plane: Option<Vec4>,
    view_projection: Cached,
    biased_projection: Cached,
    clip_projection: Cached,
    stats: DerivedStats,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformStack {
    pub fn new() -> Self {
        Self {
            slots: (0..TRANSFORM_SLOT_COUNT).map(|_| TransformSlot::new()).collect(),
            mode: TransformKind::Model,
            depth_bias: 0.0,
            clip_plane: None,
            view_projection: Cached::EMPTY,
            biased_projection: Cached::EMPTY,
            clip_projection: Cached::EMPTY,
            stats: DerivedStats::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stack operations (act on the slot selected by `matrix_mode`)
    // ─────────────────────────────────────────────────────────────────────

    pub fn matrix_mode(&mut self, kind: TransformKind) {
        if kind.slot().is_none() {
            log::error!("matrix_mode: {kind:?} out of range");
            debug_assert!(false, "matrix_mode: {kind:?} out of range");
            return;
        }
        self.mode = kind;
    }

    #[inline]
    pub fn current_mode(&self) -> TransformKind {
        self.mode
    }

    pub fn push(&mut self) {
        let slot = &mut self.slots[self.mode.index()];
        if slot.stack.len() >= MAX_STACK_DEPTH {
            log::error!("push: {:?} stack overflow", self.mode);
            debug_assert!(false, "push: {:?} stack overflow", self.mode);
            return;
        }
        let (top, _) = *slot.top();
        slot.stack.push((top, MatrixState::General));
        self.touched();
    }

    pub fn pop(&mut self) {
        let slot = &mut self.slots[self.mode.index()];
        if slot.stack.len() <= 1 {
            log::error!("pop: {:?} stack underflow", self.mode);
            debug_assert!(false, "pop: {:?} stack underflow", self.mode);
            return;
        }
        slot.stack.pop();
        slot.top_mut().1 = MatrixState::General;
        self.touched();
    }

    pub fn load_identity(&mut self) {
        self.set_top(Mat4::IDENTITY, MatrixState::Identity);
    }

    /// Loads the inverse of the view's rotation, without translation.
    pub fn load_camera_to_world(&mut self) {
        let (view, _) = *self.slots[TransformKind::View.index()].top();
        let rotation = Mat3::from_mat4(view).transpose();
        self.set_top(Mat4::from_mat3(rotation), MatrixState::CameraToWorld);
    }

    pub fn load_matrix(&mut self, m: Mat4) {
        if m.abs_diff_eq(Mat4::IDENTITY, IDENTITY_TOLERANCE) {
            self.set_top(Mat4::IDENTITY, MatrixState::Identity);
        } else {
            self.set_top(m, MatrixState::General);
        }
    }

    /// `top = top * m`.
    pub fn mult(&mut self, m: Mat4) {
        let (top, _) = *self.slots[self.mode.index()].top();
        self.set_top(top * m, MatrixState::General);
    }

    pub fn rotate(&mut self, axis: Vec3, radians: f32) {
        self.mult(Mat4::from_axis_angle(axis.normalize_or_zero(), radians));
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.mult(Mat4::from_translation(offset));
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.mult(Mat4::from_scale(factors));
    }

    pub fn ortho(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) {
        self.mult(Mat4::orthographic_lh(left, right, bottom, top, near, far));
    }

    pub fn perspective(&mut self, fov_y_radians: f32, aspect: f32, near: f32, far: f32) {
        self.mult(Mat4::perspective_lh(fov_y_radians, aspect, near, far));
    }

    fn set_top(&mut self, m: Mat4, state: MatrixState) {
        *self.slots[self.mode.index()].top_mut() = (m, state);
        self.touched();
    }

    fn touched(&mut self) {
        let kind = self.mode;
        self.mark_dirty(kind);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries and dirty tracking
    // ─────────────────────────────────────────────────────────────────────

    fn slot(&self, kind: TransformKind) -> Option<&TransformSlot> {
        kind.slot().and_then(|i| self.slots.get(i))
    }

    fn slot_mut(&mut self, kind: TransformKind) -> Option<&mut TransformSlot> {
        let slot = kind.slot().and_then(|i| self.slots.get_mut(i));
        if slot.is_none() {
            log::error!("transform slot {kind:?} out of range");
        }
        slot
    }

    /// Top of the slot's stack; `None` for an out-of-range texture or bone slot.
    #[inline]
    pub fn top(&self, kind: TransformKind) -> Option<Mat4> {
        self.slot(kind).map(|s| s.top().0)
    }

    /// Top of a slot the engine itself picked. Out-of-range kinds read as identity.
    #[inline]
    pub(crate) fn matrix(&self, kind: TransformKind) -> Mat4 {
        self.top(kind).unwrap_or(Mat4::IDENTITY)
    }

    #[inline]
    pub fn state(&self, kind: TransformKind) -> Option<MatrixState> {
        self.slot(kind).map(|s| s.top().1)
    }

    #[inline]
    pub fn depth(&self, kind: TransformKind) -> Option<usize> {
        self.slot(kind).map(|s| s.stack.len())
    }

    #[inline]
    pub fn is_dirty(&self, kind: TransformKind, consumer: ShadingMode) -> bool {
        self.slot(kind).is_some_and(|s| s.dirty[consumer_index(consumer)])
    }

    #[inline]
    pub fn clear_dirty(&mut self, kind: TransformKind, consumer: ShadingMode) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.dirty[consumer_index(consumer)] = false;
        }
    }

    /// Slots the consumer hasn't picked up yet.
    pub fn dirty_slots(&self, consumer: ShadingMode) -> impl Iterator<Item = TransformKind> + '_ {
        TransformKind::all().filter(move |&k| self.is_dirty(k, consumer))
    }

    /// Marks a slot dirty for both consumers and drops derived matrices that read it.
    pub fn mark_dirty(&mut self, kind: TransformKind) {
        let Some(slot) = self.slot_mut(kind) else {
            return;
        };
        slot.dirty = [true; 2];
        match kind {
            TransformKind::View => {
                self.view_projection.valid = false;
                self.clip_projection.valid = false;
            }
            TransformKind::Projection => {
                self.view_projection.valid = false;
                self.biased_projection.valid = false;
                self.clip_projection.valid = false;
            }
            _ => {}
        }
    }

    /// Everything dirty for both consumers. Used after a device reset.
    pub fn mark_all_dirty(&mut self) {
        for kind in TransformKind::all() {
            self.mark_dirty(kind);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Derived matrices
    // ─────────────────────────────────────────────────────────────────────

    /// Sets the NDC depth offset baked into the projection. Marks the projection dirty
    /// only when the value actually changes.
    pub fn set_depth_bias(&mut self, offset: f32) {
        if offset.to_bits() != self.depth_bias.to_bits() {
            self.depth_bias = offset;
            self.mark_dirty(TransformKind::Projection);
        }
    }

    #[inline]
    pub fn depth_bias(&self) -> f32 {
        self.depth_bias
    }

    /// World-space clip plane folded into the programmable projection.
    pub fn set_clip_plane(&mut self, plane: Option<Vec4>) {
        if plane != self.clip_plane {
            self.clip_plane = plane;
            self.mark_dirty(TransformKind::Projection);
        }
    }

    #[inline]
    pub fn clip_plane(&self) -> Option<Vec4> {
        self.clip_plane
    }

    pub fn view_projection(&mut self) -> Mat4 {
        if !self.view_projection.valid {
            self.view_projection = Cached {
                value: self.matrix(TransformKind::Projection) * self.matrix(TransformKind::View),
                valid: true,
            };
            self.stats.view_projection += 1;
        }
        self.view_projection.value
    }

    /// Projection with the depth offset applied after the perspective divide.
    pub fn biased_projection(&mut self) -> Mat4 {
        if self.depth_bias == 0.0 {
            return self.matrix(TransformKind::Projection);
        }
        if !self.biased_projection.valid {
            let mut bias = Mat4::IDENTITY;
            bias.w_axis.z = -self.depth_bias;
            self.biased_projection = Cached {
                value: bias * self.matrix(TransformKind::Projection),
                valid: true,
            };
            self.stats.biased_projection += 1;
        }
        self.biased_projection.value
    }

    /// Biased projection whose near plane is replaced by the clip plane.
    pub fn clip_projection(&mut self) -> Mat4 {
        let Some(world_plane) = self.clip_plane else {
            return self.biased_projection();
        };
        if !self.clip_projection.valid {
            let view = self.matrix(TransformKind::View);
            let view_plane = view.inverse().transpose() * world_plane;
            let proj = self.biased_projection();
            self.clip_projection = Cached {
                value: oblique_near_plane(proj, view_plane),
                valid: true,
            };
            self.stats.clip_projection += 1;
        }
        self.clip_projection.value
    }

    /// The projection variant a consumer reads. Fixed-function clips with device clip
    /// planes, so only the programmable consumer needs the oblique variant.
    pub fn projection_for(&mut self, consumer: ShadingMode) -> Mat4 {
        match consumer {
            ShadingMode::FixedFunction => self.biased_projection(),
            ShadingMode::Programmable => self.clip_projection(),
        }
    }

    pub fn derived_stats(&self) -> DerivedStats {
        self.stats
    }
}

/// Replaces the near plane of a 0..1-depth projection with `plane` (view space).
fn oblique_near_plane(proj: Mat4, plane: Vec4) -> Mat4 {
    let corner = Vec4::new(plane.x.signum(), plane.y.signum(), 1.0, 1.0);
    let q = proj.inverse() * corner;
    let denom = plane.dot(q);
    if denom.abs() <= f32::EPSILON {
        return proj;
    }
    let c = plane / denom;

    let mut m = proj;
    m.x_axis.z = c.x;
    m.y_axis.z = c.y;
    m.z_axis.z = c.z;
    m.w_axis.z = c.w;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;
    use crate::device::{MAX_BONES, MAX_TEXTURE_TRANSFORMS};

    #[test]
    fn near_identity_load_becomes_identity() {
        let mut t = TransformStack::new();
        let mut m = Mat4::IDENTITY;
        m.x_axis.x += 1.0e-4;
        m.w_axis.y -= 1.0e-4;
        t.load_matrix(m);
        assert_eq!(t.state(TransformKind::Model), Some(MatrixState::Identity));
        assert_eq!(t.top(TransformKind::Model).unwrap(), Mat4::IDENTITY);

        m.w_axis.y = 0.01;
        t.load_matrix(m);
        assert_eq!(t.state(TransformKind::Model), Some(MatrixState::General));
    }

    #[test]
    fn mutations_set_general_and_both_dirty_flags() {
        let mut t = TransformStack::new();
        t.clear_dirty(TransformKind::Model, ShadingMode::FixedFunction);
        t.clear_dirty(TransformKind::Model, ShadingMode::Programmable);

        t.translate(Vec3::X);
        assert_eq!(t.state(TransformKind::Model), Some(MatrixState::General));
        assert!(t.is_dirty(TransformKind::Model, ShadingMode::FixedFunction));
        assert!(t.is_dirty(TransformKind::Model, ShadingMode::Programmable));

        // consumers clear independently
        t.clear_dirty(TransformKind::Model, ShadingMode::FixedFunction);
        assert!(t.is_dirty(TransformKind::Model, ShadingMode::Programmable));
    }

    #[test]
    fn out_of_range_slots_read_as_none() {
        let mut t = TransformStack::new();
        let bad_bone = TransformKind::Bone(200);
        let bad_texture = TransformKind::Texture(MAX_TEXTURE_TRANSFORMS as u8);
        assert_eq!(t.top(bad_bone), None);
        assert_eq!(t.state(bad_texture), None);
        assert_eq!(t.depth(bad_bone), None);
        assert!(!t.is_dirty(bad_bone, ShadingMode::FixedFunction));

        // a texture number past the end must not alias the first bone slot
        let first_bone = TransformKind::Bone(0);
        t.clear_dirty(first_bone, ShadingMode::FixedFunction);
        t.mark_dirty(bad_texture);
        t.clear_dirty(bad_texture, ShadingMode::Programmable);
        assert!(!t.is_dirty(first_bone, ShadingMode::FixedFunction));
        assert!(t.is_dirty(first_bone, ShadingMode::Programmable));
        assert_eq!(t.top(TransformKind::Bone((MAX_BONES - 1) as u8)), Some(Mat4::IDENTITY));
    }

    #[test]
    fn push_pop_round_trip() {
        let mut t = TransformStack::new();
        t.matrix_mode(TransformKind::View);
        t.translate(Vec3::new(1.0, 2.0, 3.0));
        let before = t.top(TransformKind::View).unwrap();
        t.push();
        t.scale(Vec3::splat(2.0));
        assert_eq!(t.depth(TransformKind::View), Some(2));
        t.pop();
        assert_eq!(t.top(TransformKind::View).unwrap(), before);
        assert_eq!(t.state(TransformKind::View), Some(MatrixState::General));
        assert_eq!(t.depth(TransformKind::Model), Some(1));
    }

    #[test]
    fn camera_to_world_strips_translation() {
        let mut t = TransformStack::new();
        t.matrix_mode(TransformKind::View);
        t.load_matrix(Mat4::from_rotation_y(0.5) * Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0)));
        t.matrix_mode(TransformKind::Model);
        t.load_camera_to_world();

        let m = t.top(TransformKind::Model).unwrap();
        assert_eq!(t.state(TransformKind::Model), Some(MatrixState::CameraToWorld));
        assert_eq!(m.w_axis, Vec4::W);
        assert!(m.abs_diff_eq(Mat4::from_rotation_y(-0.5), 1.0e-5));
    }

    #[test]
    fn derived_matrices_are_lazy() {
        let mut t = TransformStack::new();
        t.matrix_mode(TransformKind::Projection);
        t.perspective(FRAC_PI_2, 1.0, 0.1, 100.0);

        t.view_projection();
        t.view_projection();
        assert_eq!(t.derived_stats().view_projection, 1);

        // model changes don't touch view-projection
        t.matrix_mode(TransformKind::Model);
        t.rotate(Vec3::Y, 1.0);
        t.view_projection();
        assert_eq!(t.derived_stats().view_projection, 1);

        t.matrix_mode(TransformKind::View);
        t.translate(Vec3::Z);
        t.view_projection();
        assert_eq!(t.derived_stats().view_projection, 2);

        // no bias, no plane: nothing derived for the fixed-function consumer
        t.projection_for(ShadingMode::FixedFunction);
        assert_eq!(t.derived_stats().biased_projection, 0);
        assert_eq!(t.derived_stats().clip_projection, 0);
    }

    #[test]
    fn depth_bias_shifts_ndc_depth() {
        let mut t = TransformStack::new();
        t.matrix_mode(TransformKind::Projection);
        t.perspective(FRAC_PI_2, 1.0, 1.0, 100.0);
        let plain = t.top(TransformKind::Projection).unwrap();

        t.set_depth_bias(0.01);
        let biased = t.biased_projection();
        let p = Vec4::new(0.0, 0.0, 10.0, 1.0);
        let a = plain * p;
        let b = biased * p;
        assert!(((a.z / a.w) - (b.z / b.w) - 0.01).abs() < 1.0e-6);

        t.biased_projection();
        assert_eq!(t.derived_stats().biased_projection, 1);
        // same value again: cache survives
        t.set_depth_bias(0.01);
        t.biased_projection();
        assert_eq!(t.derived_stats().biased_projection, 1);
    }

    #[test]
    fn oblique_projection_puts_plane_on_near_clip() {
        let mut t = TransformStack::new();
        t.matrix_mode(TransformKind::Projection);
        t.perspective(FRAC_PI_2, 1.0, 1.0, 100.0);
        // keep points with y >= 2 (in front of the camera, view == world)
        t.set_clip_plane(Some(Vec4::new(0.0, 1.0, 0.0, -2.0)));

        let proj = t.projection_for(ShadingMode::Programmable);
        let on_plane = proj * Vec4::new(0.0, 2.0, 10.0, 1.0);
        assert!((on_plane.z / on_plane.w).abs() < 1.0e-4);
        let kept = proj * Vec4::new(0.0, 3.0, 10.0, 1.0);
        assert!(kept.z / kept.w > 0.0);
        assert_eq!(t.derived_stats().clip_projection, 1);

        // the fixed-function consumer never builds it
        t.set_clip_plane(Some(Vec4::new(0.0, 1.0, 0.0, -3.0)));
        t.projection_for(ShadingMode::FixedFunction);
        assert_eq!(t.derived_stats().clip_projection, 1);
    }

    #[test]
    fn dirty_slots_lists_pending_consumer_work() {
        let mut t = TransformStack::new();
        for kind in TransformKind::all() {
            t.clear_dirty(kind, ShadingMode::FixedFunction);
        }
        t.matrix_mode(TransformKind::Bone(3));
        t.load_identity();
        let dirty: Vec<_> = t.dirty_slots(ShadingMode::FixedFunction).collect();
        assert_eq!(dirty, vec![TransformKind::Bone(3)]);
    }
}
