// tests/scenarios.rs
//! End-to-end runs of the state engine against the recording device.

use std::thread;

use glam::{Mat4, Vec3};
use wgpu::{BlendFactor, Face, TextureFormat};

use slop_state::device::{
    BufferKind, CooperativeLevel, DeviceCall, FogMode, LockMode, PrimitiveType, RenderState,
    SamplerSlot, TextureDesc, TransformKind, Viewport,
};
use slop_state::transform::{DerivedStats, MatrixState};
use slop_state::{
    BindOutcome, BlendState, BufferSizePolicy, CommitFunc, CommitMode, CommitPhase, CommitQueue,
    DepthStencilState, DeviceStatus, DrawOutcome, EngineConfig, GroupId, PipelineConfig, RasterState,
    RecordingDevice, ShadingMode, StateEngine, TextureFlags, TransformStack,
};

type Engine = StateEngine<RecordingDevice>;

fn engine_with(config: EngineConfig) -> Engine {
    let mut e = StateEngine::new(RecordingDevice::new(), config).unwrap();
    e.device_mut().clear_calls();
    e
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn draw(e: &mut Engine) -> DrawOutcome {
    let vb = e.allocate_dynamic_vertices(&[[0.0f32; 3]; 3], false).unwrap();
    e.draw(PrimitiveType::TriangleList, &vb, 12, 3).unwrap()
}

fn rgba(size: u32) -> TextureDesc {
    TextureDesc::d2(size, size, TextureFormat::Rgba8Unorm)
}

fn locks(dev: &RecordingDevice) -> Vec<(u64, u64, LockMode)> {
    dev.calls()
        .iter()
        .filter_map(|c| match c {
            DeviceCall::Lock { offset, size, mode, .. } => Some((*offset, *size, *mode)),
            _ => None,
        })
        .collect()
}

// ---------- snapshots ----------

#[test]
fn snapshot_sequence_emits_only_differences() {
    let mut e = engine();
    let s0 = e.request_snapshot(PipelineConfig::default());
    let s1 = e.request_snapshot(PipelineConfig::default().with_blend(BlendState::alpha()));
    let s2 = e.request_snapshot(
        PipelineConfig::default()
            .with_blend(BlendState::default())
            .with_depth_stencil(DepthStencilState::disabled()),
    );

    e.apply_snapshot(s0).unwrap();
    e.apply_snapshot(s1).unwrap();
    e.apply_snapshot(s2).unwrap();
    e.device_mut().clear_calls();

    let report = e.apply_snapshot(s1).unwrap();
    assert_eq!(
        e.device().calls(),
        &[
            DeviceCall::RenderState(RenderState::ZEnable(true)),
            DeviceCall::RenderState(RenderState::ZWriteEnable(true)),
            DeviceCall::RenderState(RenderState::AlphaBlendEnable(true)),
            DeviceCall::RenderState(RenderState::SrcBlend(BlendFactor::SrcAlpha)),
            DeviceCall::RenderState(RenderState::DestBlend(BlendFactor::OneMinusSrcAlpha)),
        ]
    );
    assert_eq!(report.calls, 5);
    assert_eq!(report.failures, 0);
}

#[test]
fn raster_and_fog_changes_revert_on_reapply() {
    let mut e = engine();
    let s0 = e.request_snapshot(PipelineConfig::default());
    let s1_config = PipelineConfig::default().with_blend(BlendState::alpha());
    let s1 = e.request_snapshot(s1_config.clone());
    let s2 = e.request_snapshot(
        s1_config
            .with_raster(RasterState {
                cull: None,
                ..RasterState::default()
            })
            .with_fog_mode(FogMode::Linear),
    );

    e.apply_snapshot(s0).unwrap();
    e.apply_snapshot(s1).unwrap();
    e.apply_snapshot(s2).unwrap();
    e.device_mut().clear_calls();

    let report = e.apply_snapshot(s1).unwrap();
    assert_eq!(
        e.device().calls(),
        &[
            DeviceCall::RenderState(RenderState::CullMode(Some(Face::Back))),
            DeviceCall::RenderState(RenderState::FogEnable(false)),
            DeviceCall::RenderState(RenderState::FogTableMode(FogMode::None)),
        ]
    );
    assert_eq!(report.calls, 3);
    assert_eq!(report.failures, 0);
}

#[test]
fn equal_configurations_share_one_snapshot() {
    let mut e = engine();
    let a = e.request_snapshot(PipelineConfig::default().with_blend(BlendState::additive()));
    let b = e.request_snapshot(PipelineConfig::default().with_blend(BlendState::additive()));
    assert_eq!(a, b);
    assert_eq!(e.snapshots().len(), 1);
    assert_eq!(e.snapshots().hits(), 1);
}

#[test]
fn repeated_draws_are_idempotent() {
    let mut e = engine();
    let id = e.request_snapshot(PipelineConfig::default());
    e.apply_snapshot(id).unwrap();
    draw(&mut e);

    for _ in 0..3 {
        e.device_mut().clear_calls();
        e.apply_snapshot(id).unwrap();
        draw(&mut e);
        assert_eq!(e.device().state_calls().count(), 0);
    }
}

// ---------- commit queue ----------

#[test]
fn setters_collapse_into_one_device_write() {
    let mut e = engine();
    draw(&mut e);
    e.device_mut().clear_calls();

    e.set_viewport(Viewport::new(640, 480));
    e.set_viewport(Viewport::new(800, 600));
    e.set_viewport(Viewport::new(1024, 768));
    draw(&mut e);
    assert_eq!(
        e.device().state_calls().cloned().collect::<Vec<_>>(),
        vec![DeviceCall::Viewport(Viewport::new(1024, 768))]
    );
    assert!(e.commit_queue().stats().deduplicated >= 2);
}

#[test]
fn drains_are_partitioned_by_shading_mode() {
    let mut q = CommitQueue::new();
    q.add_func(CommitFunc::FixedFunctionTransforms);
    q.add_func(CommitFunc::ProgrammableTransforms);
    q.add_func(CommitFunc::Viewport);

    assert_eq!(
        q.drain_for(CommitPhase::PerDraw, ShadingMode::FixedFunction),
        vec![CommitFunc::Viewport, CommitFunc::FixedFunctionTransforms]
    );
    assert!(q.is_pending(CommitPhase::PerDraw, CommitMode::Programmable, CommitFunc::ProgrammableTransforms));
    assert_eq!(
        q.drain_for(CommitPhase::PerDraw, ShadingMode::Programmable),
        vec![CommitFunc::ProgrammableTransforms]
    );
    assert_eq!(q.pending_count(), 0);
}

// ---------- transforms ----------

#[test]
fn near_identity_loads_are_identity() {
    let mut stack = TransformStack::new();
    stack.matrix_mode(TransformKind::Model);

    let mut nearly = Mat4::IDENTITY;
    nearly.x_axis.x += 1.0e-4;
    nearly.w_axis.y -= 1.0e-4;
    stack.load_matrix(nearly);
    assert_eq!(stack.state(TransformKind::Model), Some(MatrixState::Identity));
    assert_eq!(stack.top(TransformKind::Model), Some(Mat4::IDENTITY));

    stack.load_matrix(Mat4::from_translation(Vec3::new(0.0, 0.01, 0.0)));
    assert_eq!(stack.state(TransformKind::Model), Some(MatrixState::General));
}

#[test]
fn derived_matrices_are_built_on_demand() {
    let mut stack = TransformStack::new();
    stack.matrix_mode(TransformKind::View);
    for i in 0..5 {
        stack.translate(Vec3::new(i as f32, 0.0, 0.0));
    }
    assert_eq!(stack.derived_stats(), DerivedStats::default());

    let first = stack.view_projection();
    let second = stack.view_projection();
    assert_eq!(first, second);
    assert_eq!(stack.derived_stats().view_projection, 1);

    // model changes don't touch the view-projection
    stack.matrix_mode(TransformKind::Model);
    stack.scale(Vec3::splat(2.0));
    stack.view_projection();
    assert_eq!(stack.derived_stats().view_projection, 1);
}

// ---------- dynamic buffers ----------

#[test]
fn ring_discards_on_overflow_and_appends_otherwise() {
    let mut e = engine_with(EngineConfig::default().with_dynamic_buffer_sizes(4096, 4096));
    e.begin_frame();

    let a = e.allocate_dynamic_with(BufferKind::Vertex, 3000, 4, false, |b| b.fill(1)).unwrap();
    let b = e.allocate_dynamic_with(BufferKind::Vertex, 2000, 4, false, |b| b.fill(2)).unwrap();
    let c = e.allocate_dynamic_with(BufferKind::Vertex, 500, 4, false, |b| b.fill(3)).unwrap();

    assert!(a.discarded && a.offset == 0);
    assert!(b.discarded && b.offset == 0);
    assert!(!c.discarded);
    assert_eq!(c.offset, 2000);
    assert_eq!(c.first_element, 500);
    assert_eq!(
        locks(e.device()),
        vec![(0, 3000, LockMode::Discard), (0, 2000, LockMode::Discard), (2000, 500, LockMode::NoOverwrite)]
    );

    // a new frame always starts over
    e.begin_frame();
    let d = e.allocate_dynamic_with(BufferKind::Vertex, 16, 4, false, |b| b.fill(4)).unwrap();
    assert!(d.discarded);
}

#[test]
fn oversized_requests_are_rejected() {
    let mut e = engine_with(EngineConfig::default().with_dynamic_buffer_sizes(4096, 4096));
    let err = e.allocate_dynamic_with(BufferKind::Index, 4097, 2, false, |_| {}).unwrap_err();
    assert!(matches!(err, slop_state::Error::RequestTooLarge { requested: 4097, capacity: 4096 }));
}

#[test]
fn staged_worker_writes_reach_the_device() {
    let mut e = engine();
    let writer = e.staging_writer(BufferKind::Vertex);

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let writer = writer.clone();
            thread::spawn(move || {
                let data = [t + 1; 16];
                (writer.write(&data, false).unwrap(), data)
            })
        })
        .collect();
    let written: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(written.iter().all(|(alloc, _)| alloc.staged));

    e.late_create_dynamic().unwrap();
    let buffer = e.dynamic_buffers().vertices.device_buffer().unwrap();
    let contents = e.device().buffer_contents(buffer).unwrap();
    for (alloc, data) in &written {
        let range = alloc.offset as usize..(alloc.offset + alloc.size) as usize;
        assert_eq!(&contents[range], bytemuck::cast_slice::<u32, u8>(data));
    }
    assert!(!e.dynamic_buffers().vertices.has_staged_data());
}

#[test]
fn shrink_policy_quarters_the_rings() {
    let json = r#"{ "buffer_size_policy": "shrink_while_streaming", "dynamic_vertex_buffer_bytes": 65536 }"#;
    let config = EngineConfig::from_json_str(json).unwrap();
    let mut e = engine_with(config);
    assert_eq!(e.dynamic_buffers().vertices.capacity(), 16384);

    e.recreate_dynamic_buffers(BufferSizePolicy::Normal);
    assert_eq!(e.dynamic_buffers().vertices.capacity(), 65536);
}

// ---------- textures ----------

#[test]
fn budget_refuses_binds_past_the_ceiling() {
    let size = rgba(64).size_bytes();
    let mut e = engine_with(EngineConfig::default().with_texture_budget(2 * size));
    let world = e.register_texture_group("world");
    let t: Vec<_> = (0..3)
        .map(|_| e.create_texture(&rgba(64), world, TextureFlags::NONE, 1).unwrap())
        .collect();

    e.begin_frame();
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(0), t[0]).unwrap(), BindOutcome::Bound);
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(1), t[1]).unwrap(), BindOutcome::Bound);
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(2), t[2]).unwrap(), BindOutcome::Refused);
    // rebinding something already counted this frame is free
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(3), t[0]).unwrap(), BindOutcome::Bound);

    let usage = e.memory_usage(world).unwrap();
    assert_eq!(usage.refused_binds, 1);
    assert_eq!(usage.frame_bound_bytes, 2 * size);
    assert_eq!(e.textures().owner(SamplerSlot::Pixel(2)), None);

    e.begin_frame();
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(2), t[2]).unwrap(), BindOutcome::Bound);
}

#[test]
fn freed_handles_are_reused() {
    let mut e = engine();
    let a = e.create_texture(&rgba(8), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap();
    assert_eq!(e.add_texture_ref(a).unwrap(), 2);
    assert!(!e.delete_texture(a).unwrap());
    assert!(e.delete_texture(a).unwrap());
    assert!(e.delete_texture(a).unwrap_err().root().to_string().contains("handle"));

    let b = e.create_texture(&rgba(8), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap();
    assert_eq!(b.raw(), a.raw());
}

#[test]
fn deleting_a_bound_texture_clears_its_slot() {
    let mut e = engine();
    let t = e.create_texture(&rgba(8), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap();
    e.bind_texture(SamplerSlot::Vertex(1), t).unwrap();
    e.device_mut().clear_calls();

    e.delete_texture(t).unwrap();
    let index = SamplerSlot::Vertex(1).device_index();
    assert!(e.device().calls().contains(&DeviceCall::Texture(index, None)));
    assert_eq!(e.current_state().sampler(SamplerSlot::Vertex(1)).unwrap().texture, None);
}

#[test]
fn out_of_memory_evicts_and_retries() {
    let size = rgba(32).size_bytes();
    let mut e = engine();
    e.device_mut().set_texture_capacity(Some(3 * size));
    let cached: Vec<_> = (0..3)
        .map(|_| e.create_texture(&rgba(32), GroupId::DEFAULT, TextureFlags::EVICTABLE, 1).unwrap())
        .collect();
    e.bind_texture(SamplerSlot::Pixel(0), cached[2]).unwrap();

    // only the two unbound ones can go
    let fresh = e.create_texture(&rgba(32), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap();
    assert_eq!(e.textures().stats().evicted, 2);
    assert!(!e.textures().get(cached[0]).unwrap().is_resident());
    assert!(e.textures().get(cached[2]).unwrap().is_resident());
    assert!(e.textures().get(fresh).unwrap().is_resident());

    // binding an evicted texture brings it back
    e.delete_texture(fresh).unwrap();
    assert_eq!(e.bind_texture(SamplerSlot::Pixel(1), cached[0]).unwrap(), BindOutcome::Bound);
    assert!(e.textures().get(cached[0]).unwrap().is_resident());
    assert_eq!(e.textures().stats().recreated, 1);
}

#[test]
fn repeated_allocation_failure_exhausts() {
    let mut e = engine();
    e.device_mut().fail_next_creates(2);
    let err = e.create_texture(&rgba(16), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap_err();
    assert!(err.root().is_exhausted());
    assert_eq!(e.device().live_textures(), 0);
}

#[test]
fn streaming_copies_rotate_on_dirty_bind() {
    let mut e = engine();
    let video = e.create_texture(&rgba(16), GroupId::DEFAULT, TextureFlags::CLAMP, 3).unwrap();
    let slot = SamplerSlot::Pixel(0);
    e.bind_texture(slot, video).unwrap();
    let first = e.textures().get(video).unwrap().device_texture();

    for _ in 0..3 {
        let target = e.texture_streaming_target(video).unwrap();
        e.mark_texture_dirty(video).unwrap();
        e.device_mut().clear_calls();
        e.bind_texture(slot, video).unwrap();

        let now = e.textures().get(video).unwrap().device_texture();
        assert_eq!(now, target);
        assert!(e.device().calls().contains(&DeviceCall::Texture(0, now)));
    }
    // three advances over three copies: back to the start
    assert_eq!(e.textures().get(video).unwrap().device_texture(), first);
    assert_eq!(e.textures().stats().copy_advances, 3);
}

// ---------- device loss ----------

#[test]
fn lost_device_recovers_with_full_reapplication() {
    let mut e = engine();
    let tex = e.create_texture(&rgba(32), GroupId::DEFAULT, TextureFlags::NONE, 1).unwrap();
    let blended = e.request_snapshot(PipelineConfig::default().with_blend(BlendState::alpha()));

    for frame in 0..6 {
        e.begin_frame();
        let report = e.apply_snapshot(blended).unwrap();
        let bound = e.bind_texture(SamplerSlot::Pixel(0), tex).unwrap();

        match frame {
            2 => {
                e.device_mut().set_cooperative_level(CooperativeLevel::Lost);
                assert_eq!(e.end_frame(), DeviceStatus::Lost);
                assert_eq!(e.device().live_textures(), 0);
            }
            3 => {
                // still lost: everything is skipped quietly
                assert_eq!(report.calls, 0);
                assert_eq!(bound, BindOutcome::Skipped);
                e.device_mut().set_cooperative_level(CooperativeLevel::NotReset);
                assert_eq!(e.end_frame(), DeviceStatus::Active);
            }
            _ => {
                if frame == 4 {
                    // first pass after the reset writes the whole snapshot again
                    assert!(report.calls > 80);
                    assert_eq!(bound, BindOutcome::Bound);
                }
                assert_eq!(draw(&mut e), DrawOutcome::Drawn);
                assert_eq!(e.end_frame(), DeviceStatus::Active);
            }
        }
    }

    assert_eq!(e.stats().resets, 1);
    assert_eq!(e.device().live_textures(), 1);
}
