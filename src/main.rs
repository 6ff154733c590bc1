// src/main.rs
//! Drives the state engine over a recording device for a few scripted frames and logs
//! what reached the device.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;

use anyhow::Context;
use glam::{Vec3, Vec4};
use log::{error, info};
use wgpu::TextureFormat;

use slop_state::device::{
    CooperativeLevel, Light, PrimitiveType, SamplerSlot, ShaderId, TextureDesc, TransformKind,
    VertexUsage,
};
use slop_state::state::FogParams;
use slop_state::{
    init_logging, BlendState, DepthBiasMode, EngineConfig, LoggingConfig, PipelineConfig,
    RasterState, RecordingDevice, ShaderBinding, StateEngine, TextureFlags,
};

const FRAMES: u64 = 6;

fn main() {
    setup_diagnostics();

    if let Err(e) = run() {
        error!("demo failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            EngineConfig::from_json_str(&text).with_context(|| format!("parsing {path}"))?
        }
        None => EngineConfig::default().with_texture_budget(8 * 1024 * 1024),
    };
    info!("config: {}", config.to_json_string()?);

    let mut engine = StateEngine::new(RecordingDevice::new(), config)?;
    let world = engine.register_texture_group("world");
    let ui = engine.register_texture_group("ui");

    // ---------- assets ----------
    let ground = engine.create_texture(
        &TextureDesc::d2(512, 512, TextureFormat::Rgba8Unorm).with_mips(10),
        world,
        TextureFlags::EVICTABLE,
        1,
    )?;
    let video = engine.create_texture(
        &TextureDesc::d2(256, 256, TextureFormat::Rgba8Unorm),
        ui,
        TextureFlags::CLAMP,
        2,
    )?;

    // ---------- snapshots ----------
    let opaque = engine.request_snapshot(PipelineConfig::default());
    let decals = engine.request_snapshot(PipelineConfig::default().with_blend(BlendState::alpha()).with_raster(
        RasterState {
            depth_bias: DepthBiasMode::Decal,
            ..RasterState::default()
        },
    ));
    let lit = engine.request_snapshot(PipelineConfig::default().with_shaders(ShaderBinding::programmable(
        ShaderId(1),
        ShaderId(2),
        VertexUsage::POSITION | VertexUsage::NORMAL | VertexUsage::TEXCOORD0,
    )));

    engine.matrix_mode(TransformKind::Projection);
    engine.perspective(60f32.to_radians(), 16.0 / 9.0, 0.1, 500.0);
    engine.set_light(0, Some(Light::directional(Vec3::new(-1.0, -1.0, 0.5), Vec4::ONE)))?;
    engine.enable_light(0, true)?;
    engine.set_fog_params(FogParams {
        color: Vec4::new(0.5, 0.6, 0.7, 1.0),
        start: 50.0,
        end: 400.0,
        density: 1.0,
    });

    let quad: [[f32; 5]; 4] = [
        [-1.0, -1.0, 0.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0, 1.0],
        [1.0, 1.0, 0.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0, 0.0, 0.0],
    ];
    let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
    let stride = std::mem::size_of::<[f32; 5]>() as u32;

    for frame in 0..FRAMES {
        engine.begin_frame();

        engine.matrix_mode(TransformKind::View);
        engine.load_identity();
        engine.translate(Vec3::new(0.0, -2.0, 10.0 + frame as f32));

        engine.apply_snapshot(opaque)?;
        engine.bind_texture(SamplerSlot::Pixel(0), ground)?;
        let vb = engine.allocate_dynamic_vertices(&quad, false)?;
        let ib = engine.allocate_dynamic_indices(&indices, false)?;
        engine.draw_indexed(PrimitiveType::TriangleList, &vb, stride, &ib, 6)?;

        engine.apply_snapshot(decals)?;
        engine.draw_indexed(PrimitiveType::TriangleList, &vb, stride, &ib, 6)?;

        // streamed video frame: write into the next copy, then rebind
        engine.mark_texture_dirty(video)?;
        engine.apply_snapshot(lit)?;
        engine.bind_texture(SamplerSlot::Pixel(0), video)?;
        engine.draw_indexed(PrimitiveType::TriangleList, &vb, stride, &ib, 6)?;

        // simulate a lost device halfway through
        if frame == FRAMES / 2 {
            engine.device_mut().set_cooperative_level(CooperativeLevel::NotReset);
        }
        let status = engine.end_frame();

        let calls = engine.device_mut().take_calls();
        let state_calls = calls.iter().filter(|c| c.is_state_call()).count();
        let draws = calls.iter().filter(|c| c.is_draw()).count();
        info!("frame {frame}: {} device calls ({state_calls} state, {draws} draws), device {status:?}", calls.len());
    }

    info!("{:?}", engine.stats());
    info!("{} snapshots, {} cache hits", engine.snapshots().len(), engine.snapshots().hits());
    info!("\n{}", engine.memory_report());
    Ok(())
}

/// Logger plus a panic hook that logs the panicking thread and keeps a crash file.
fn setup_diagnostics() {
    init_logging(LoggingConfig::default());

    let crash_path = std::env::var("SLOP_STATE_CRASH_LOG").unwrap_or_else(|_| "state_engine_crash.log".to_string());
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        let report = format!(
            "state engine panicked on thread '{}' at {}: {}\n\n{}",
            thread.name().unwrap_or("<unnamed>"),
            panic_info
                .location()
                .map_or_else(|| "<unknown>".to_string(), |loc| format!("{}:{}", loc.file(), loc.line())),
            panic_message(panic_info.payload()),
            Backtrace::force_capture()
        );

        // the logger may be the thing that panicked; stderr always works
        eprintln!("{report}");
        match File::create(&crash_path).and_then(|mut file| file.write_all(report.as_bytes())) {
            Ok(()) => eprintln!("crash report written to {crash_path}"),
            Err(e) => eprintln!("could not write {crash_path}: {e}"),
        }
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
