// src/lib.rs
//! Render-state management for an immediate-mode, D3D9-style device.
//!
//! The engine sits between the material/mesh layers and an injected [`Device`]:
//!
//! - pipeline configurations are hash-consed into snapshots and applied by diffing
//!   against a shadow of the device, so redundant state changes never reach it
//! - per-field setters queue deferred commit functions, drained per draw for the bound
//!   shading mode
//! - per-slot matrix stacks feed both fixed-function and programmable consumers
//! - textures live in a handle table with budgeted binding, round-robin streaming copies
//!   and LRU eviction
//! - transient geometry goes through discard/append ring buffers that worker threads
//!   can fill through a staging copy
//! - device loss is one state machine with one `reset` entry point
//!
//! ```no_run
//! use slop_state::{EngineConfig, PipelineConfig, RecordingDevice, StateEngine};
//!
//! # fn main() -> slop_state::Result<()> {
//! let mut engine = StateEngine::new(RecordingDevice::new(), EngineConfig::default())?;
//! let opaque = engine.request_snapshot(PipelineConfig::default());
//! engine.begin_frame();
//! engine.apply_snapshot(opaque)?;
//! # Ok(())
//! # }
//! ```

pub mod commit;
pub mod config;
pub mod device;
pub mod dynamic_buffer;
pub mod engine;
pub mod error;
pub mod logging;
pub mod resource;
pub mod state;
pub mod transform;

pub use commit::{CommitFunc, CommitMode, CommitPhase, CommitQueue, ShadingMode};
pub use config::{BufferSizePolicy, EngineConfig, TextureFiltering};
pub use device::{Device, DeviceObjects, RecordingDevice};
pub use dynamic_buffer::{DynamicAllocation, DynamicBuffer, DynamicBufferAllocator, StagingWriter};
pub use engine::{DeviceStatus, DrawOutcome, EngineStats, StateEngine};
pub use error::{DeviceError, DeviceResult, Error, Result};
pub use logging::{init_logging, LoggingConfig};
pub use resource::{BindOutcome, GroupId, MemoryReport, ResourceTable, TextureFlags, TextureHandle};
pub use state::{
    ApplyMode, BlendState, ChangedGroups, DepthBiasMode, DepthStencilState, PipelineConfig,
    RasterState, SamplerParams, ShaderBinding, ShadowState, SnapshotId, TextureStageOps,
    TransitionReport,
};
pub use transform::{MatrixState, TransformStack};
