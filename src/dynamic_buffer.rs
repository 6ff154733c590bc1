// src/dynamic_buffer.rs
//! Ring allocators for per-frame vertex and index data.
//!
//! Each ring is written front to back with no-overwrite locks and starts over with a
//! discard lock when a request doesn't fit, when nothing was written yet this frame, or
//! when the caller forces it. Worker threads never see the device: they write through a
//! [`StagingWriter`] into a host copy, and the owner thread pushes those bytes to the
//! device in [`DynamicBuffer::late_create`].

use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::config::{BufferSizePolicy, EngineConfig};
use crate::device::{BufferDesc, BufferKind, Device, DeviceBufferId, DeviceObjects, LockMode};
use crate::error::{Error, Result};
use crate::resource::{create_with_retry, Evictor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RingState {
    /// No device buffer contents yet.
    Empty,
    /// Writes continue past the cursor.
    Appending,
    /// Last write restarted the ring at 0.
    Discard,
}

/// Where a transient allocation landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicAllocation {
    pub kind: BufferKind,
    /// Byte offset in the ring.
    pub offset: u64,
    pub size: u64,
    /// `offset / stride`; the base vertex or start index for the draw.
    pub first_element: u32,
    pub discarded: bool,
    /// Written to the host staging copy; visible to the device after `late_create`.
    pub staged: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DynamicBufferStats {
    pub allocations: u64,
    pub discards: u64,
    pub bytes_written: u64,
    pub staged_writes: u64,
    pub late_creates: u64,
    pub failures: u64,
}

/// Cursor and staging state shared between the owner and its writers.
struct Ring {
    capacity: u64,
    cursor: u64,
    state: RingState,
    written_this_frame: bool,
    staging: Vec<u8>,
    /// Byte ranges staged since the last `late_create`, in write order.
    staged: Vec<Range<u64>>,
    /// A staged write restarted the ring.
    discard_requested: bool,
    stats: DynamicBufferStats,
}

impl Ring {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
            state: RingState::Empty,
            written_this_frame: false,
            staging: Vec::new(),
            staged: Vec::new(),
            discard_requested: false,
            stats: DynamicBufferStats::default(),
        }
    }

    /// Picks the write position for `size` bytes and advances the cursor.
    fn place(&mut self, size: u64, stride: u64, force_discard: bool) -> (u64, bool) {
        let aligned = self.cursor.div_ceil(stride) * stride;
        let discard = force_discard
            || self.state == RingState::Empty
            || !self.written_this_frame
            || aligned + size > self.capacity;

        let offset = if discard { 0 } else { aligned };
        self.state = if discard { RingState::Discard } else { RingState::Appending };
        self.cursor = offset + size;
        self.written_this_frame = true;

        self.stats.allocations += 1;
        self.stats.bytes_written += size;
        if discard {
            self.stats.discards += 1;
        }
        (offset, discard)
    }

    fn stage(&mut self, range: Range<u64>, discarded: bool) {
        if discarded {
            // earlier staged bytes belong to the ring generation that was just dropped
            self.discard_requested = true;
            self.staged.clear();
        }
        match self.staged.last_mut() {
            Some(last) if last.end == range.start => last.end = range.end,
            _ => self.staged.push(range),
        }
    }

    /// Copies every staged range into `buffer`. Only the first lock may discard.
    fn flush(&mut self, kind: BufferKind, device: &mut dyn Device, buffer: DeviceBufferId) -> Result<()> {
        let ranges = std::mem::take(&mut self.staged);
        let mut mode = if std::mem::take(&mut self.discard_requested) {
            LockMode::Discard
        } else {
            LockMode::NoOverwrite
        };
        let mut bytes = 0;
        for range in ranges {
            let dst = device
                .lock_buffer(buffer, range.start, range.end - range.start, mode)
                .map_err(|e| Error::from(e).context("late creation of dynamic buffer"))?;
            dst.copy_from_slice(&self.staging[range.start as usize..range.end as usize]);
            if let Err(e) = device.unlock_buffer(buffer) {
                log::warn!("unlock_buffer({buffer:?}) failed: {e}");
            }
            bytes += range.end - range.start;
            mode = LockMode::NoOverwrite;
        }
        self.stats.late_creates += 1;
        log::debug!("{kind:?} late creation: {bytes} staged bytes");
        Ok(())
    }
}

fn check_size(kind: BufferKind, size: u64, capacity: u64) -> Result<()> {
    if size > capacity {
        log::error!("{kind:?} dynamic allocation of {size} bytes exceeds ring capacity {capacity}");
        return Err(Error::RequestTooLarge {
            requested: size,
            capacity,
        });
    }
    Ok(())
}

/// Worker-thread handle to a ring. Writes land in host memory only.
#[derive(Clone)]
pub struct StagingWriter {
    kind: BufferKind,
    ring: Arc<Mutex<Ring>>,
}

impl StagingWriter {
    /// Places `size` bytes and lets `fill` write them into the staging copy.
    pub fn write_with(
        &self,
        size: u64,
        stride: u32,
        force_discard: bool,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<DynamicAllocation> {
        let stride = u64::from(stride.max(1));
        let mut ring = self.ring.lock();
        check_size(self.kind, size, ring.capacity)?;

        let (offset, discarded) = ring.place(size, stride, force_discard);
        if ring.staging.len() as u64 != ring.capacity {
            let capacity = ring.capacity as usize;
            ring.staging.resize(capacity, 0);
        }
        fill(&mut ring.staging[offset as usize..(offset + size) as usize]);

        ring.stage(offset..offset + size, discarded);
        ring.stats.staged_writes += 1;

        Ok(DynamicAllocation {
            kind: self.kind,
            offset,
            size,
            first_element: (offset / stride) as u32,
            discarded,
            staged: true,
        })
    }

    pub fn write<T: Pod>(&self, data: &[T], force_discard: bool) -> Result<DynamicAllocation> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.write_with(bytes.len() as u64, std::mem::size_of::<T>() as u32, force_discard, |dst| {
            dst.copy_from_slice(bytes)
        })
    }
}

/// One ring plus its device buffer. Owned by the device thread.
pub struct DynamicBuffer {
    kind: BufferKind,
    buffer: Option<DeviceBufferId>,
    ring: Arc<Mutex<Ring>>,
    owner: ThreadId,
}

impl DynamicBuffer {
    pub fn new(kind: BufferKind, capacity: u64) -> Self {
        Self {
            kind,
            buffer: None,
            ring: Arc::new(Mutex::new(Ring::new(capacity))),
            owner: thread::current().id(),
        }
    }

    #[inline]
    fn assert_owner(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "dynamic buffer used off the device thread"
        );
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn capacity(&self) -> u64 {
        self.ring.lock().capacity
    }

    pub fn cursor(&self) -> u64 {
        self.ring.lock().cursor
    }

    pub fn state(&self) -> RingState {
        self.ring.lock().state
    }

    pub fn stats(&self) -> DynamicBufferStats {
        self.ring.lock().stats
    }

    pub fn device_buffer(&self) -> Option<DeviceBufferId> {
        self.buffer
    }

    pub fn has_staged_data(&self) -> bool {
        !self.ring.lock().staged.is_empty()
    }

    pub fn staging_writer(&self) -> StagingWriter {
        StagingWriter {
            kind: self.kind,
            ring: Arc::clone(&self.ring),
        }
    }

    fn ensure_buffer(&mut self, device: &mut dyn Device, evictor: &mut dyn Evictor, capacity: u64) -> Result<DeviceBufferId> {
        if let Some(id) = self.buffer {
            return Ok(id);
        }
        let desc = BufferDesc {
            kind: self.kind,
            size: capacity,
            dynamic: true,
        };
        let id = create_with_retry(
            device,
            "dynamic buffer",
            capacity,
            |d| d.create_buffer(&desc),
            |d| evictor.evict_non_essential(d),
        )?;
        log::debug!("{:?} dynamic buffer created ({} bytes)", self.kind, capacity);
        self.buffer = Some(id);
        Ok(id)
    }

    /// Owner-thread allocation: places `size` bytes and lets `fill` write them straight
    /// into the locked device range. Pending staged data is pushed first, under the
    /// same ring lock as the placement.
    pub fn allocate_with(
        &mut self,
        device: &mut dyn Device,
        evictor: &mut dyn Evictor,
        size: u64,
        stride: u32,
        force_discard: bool,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<DynamicAllocation> {
        self.assert_owner();
        let stride = u64::from(stride.max(1));
        let capacity = self.capacity();
        check_size(self.kind, size, capacity)?;

        let buffer = match self.ensure_buffer(device, evictor, capacity) {
            Ok(id) => id,
            Err(e) => {
                self.ring.lock().stats.failures += 1;
                return Err(e);
            }
        };

        let mut ring = self.ring.lock();
        if !ring.staged.is_empty() {
            ring.flush(self.kind, device, buffer)?;
        }
        let (offset, discarded) = ring.place(size, stride, force_discard);
        let mode = if discarded { LockMode::Discard } else { LockMode::NoOverwrite };
        match device.lock_buffer(buffer, offset, size, mode) {
            Ok(dst) => fill(dst),
            Err(e) => {
                ring.stats.failures += 1;
                log::warn!("lock_buffer({buffer:?}, {offset}, {size}, {mode:?}) failed: {e}");
                return Err(Error::from(e).context("locking dynamic buffer"));
            }
        }
        if let Err(e) = device.unlock_buffer(buffer) {
            log::warn!("unlock_buffer({buffer:?}) failed: {e}");
        }

        Ok(DynamicAllocation {
            kind: self.kind,
            offset,
            size,
            first_element: (offset / stride) as u32,
            discarded,
            staged: false,
        })
    }

    pub fn allocate<T: Pod>(
        &mut self,
        device: &mut dyn Device,
        evictor: &mut dyn Evictor,
        data: &[T],
        force_discard: bool,
    ) -> Result<DynamicAllocation> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.allocate_with(
            device,
            evictor,
            bytes.len() as u64,
            std::mem::size_of::<T>() as u32,
            force_discard,
            |dst| dst.copy_from_slice(bytes),
        )
    }

    /// Pushes bytes staged by writers to the device, creating the buffer if needed.
    /// Uses a discard lock if any staged write restarted the ring.
    pub fn late_create(&mut self, device: &mut dyn Device, evictor: &mut dyn Evictor) -> Result<()> {
        self.assert_owner();
        let capacity = self.capacity();
        if !self.has_staged_data() {
            return Ok(());
        }
        let buffer = self.ensure_buffer(device, evictor, capacity)?;

        let mut ring = self.ring.lock();
        if ring.staged.is_empty() {
            return Ok(());
        }
        ring.flush(self.kind, device, buffer)
    }

    /// Next write discards.
    pub fn begin_frame(&mut self) {
        self.ring.lock().written_this_frame = false;
    }

    /// Destroys the device buffer and restarts the ring at `capacity`.
    /// Outstanding staging writers keep working against the new ring.
    pub fn recreate(&mut self, device: &mut dyn Device, capacity: u64) {
        self.assert_owner();
        if let Some(id) = self.buffer.take() {
            device.destroy_buffer(id);
        }
        let mut ring = self.ring.lock();
        let stats = ring.stats;
        *ring = Ring::new(capacity);
        ring.stats = stats;
    }
}

impl DeviceObjects for DynamicBuffer {
    fn release(&mut self, device: &mut dyn Device) {
        if let Some(id) = self.buffer.take() {
            device.destroy_buffer(id);
        }
        let mut ring = self.ring.lock();
        ring.state = RingState::Empty;
        ring.cursor = 0;
        ring.staged.clear();
        ring.discard_requested = false;
    }

    // Created lazily on the next allocation.
    fn restore(&mut self, _device: &mut dyn Device) -> Result<()> {
        Ok(())
    }
}

/// The vertex and index rings.
pub struct DynamicBufferAllocator {
    pub vertices: DynamicBuffer,
    pub indices: DynamicBuffer,
}

impl DynamicBufferAllocator {
    pub fn new(config: &EngineConfig) -> Self {
        let policy = config.buffer_size_policy;
        Self {
            vertices: DynamicBuffer::new(BufferKind::Vertex, policy.apply(config.dynamic_vertex_buffer_bytes)),
            indices: DynamicBuffer::new(BufferKind::Index, policy.apply(config.dynamic_index_buffer_bytes)),
        }
    }

    pub fn buffer_mut(&mut self, kind: BufferKind) -> &mut DynamicBuffer {
        match kind {
            BufferKind::Vertex => &mut self.vertices,
            BufferKind::Index => &mut self.indices,
        }
    }

    pub fn begin_frame(&mut self) {
        self.vertices.begin_frame();
        self.indices.begin_frame();
    }

    /// Rebuilds both rings with capacities from `config` under `policy`.
    pub fn recreate(&mut self, device: &mut dyn Device, config: &EngineConfig, policy: BufferSizePolicy) {
        let vb = policy.apply(config.dynamic_vertex_buffer_bytes);
        let ib = policy.apply(config.dynamic_index_buffer_bytes);
        log::debug!("recreating dynamic buffers ({policy:?}): vb {vb} bytes, ib {ib} bytes");
        self.vertices.recreate(device, vb);
        self.indices.recreate(device, ib);
    }

    pub fn late_create(&mut self, device: &mut dyn Device, evictor: &mut dyn Evictor) -> Result<()> {
        self.vertices.late_create(device, evictor)?;
        self.indices.late_create(device, evictor)
    }
}

impl DeviceObjects for DynamicBufferAllocator {
    fn release(&mut self, device: &mut dyn Device) {
        self.vertices.release(device);
        self.indices.release(device);
    }

    fn restore(&mut self, device: &mut dyn Device) -> Result<()> {
        self.vertices.restore(device)?;
        self.indices.restore(device)
    }
}
