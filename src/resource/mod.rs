// src/resource/mod.rs
//! Device texture ownership, accounting and eviction.

pub mod accounting;
pub mod table;

pub use accounting::{GroupId, GroupUsage, MemoryAccounting, MemoryReport};
pub use table::{
    BindOutcome, ResourceTable, TableStats, TextureFlags, TextureHandle, TextureRecord,
    MAX_TEXTURE_COPIES,
};

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult, Error, Result};

/// Something that can free device memory on demand.
pub trait Evictor {
    /// Releases every non-essential device object it owns. Returns bytes freed.
    fn evict_non_essential(&mut self, device: &mut dyn Device) -> u64;
}

/// Evictor for callers with nothing to give back.
pub struct NoEviction;

impl Evictor for NoEviction {
    fn evict_non_essential(&mut self, _device: &mut dyn Device) -> u64 {
        0
    }
}

/// Runs `create`; on out-of-memory evicts once and retries.
///
/// A second out-of-memory becomes [`Error::ResourceExhausted`]; any other device error
/// is returned as-is.
pub fn create_with_retry<T>(
    device: &mut dyn Device,
    what: &'static str,
    bytes: u64,
    mut create: impl FnMut(&mut dyn Device) -> DeviceResult<T>,
    evict: impl FnOnce(&mut dyn Device) -> u64,
) -> Result<T> {
    match create(device) {
        Ok(v) => return Ok(v),
        Err(DeviceError::OutOfMemory) => {}
        Err(e) => return Err(e.into()),
    }

    let freed = evict(device);
    log::warn!("out of memory creating {what} ({bytes} bytes), evicted {freed} bytes, retrying");

    match create(device) {
        Ok(v) => Ok(v),
        Err(DeviceError::OutOfMemory) => {
            log::warn!("{what} creation failed after eviction ({bytes} bytes)");
            Err(Error::ResourceExhausted { what, bytes })
        }
        Err(e) => Err(e.into()),
    }
}
