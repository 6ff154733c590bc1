// src/resource/table.rs
//! Handle-indexed texture table.
//!
//! - Handles: plain slot indices, recycled through a linked free list (O(1))
//! - Records: ref count, 1..MAX_TEXTURE_COPIES device copies with a round-robin index
//! - Binding: minimal `set_texture` / sampler-state writes against the shadow
//! - Budget: per-frame admission through [`MemoryAccounting`]
//! - Eviction: unbound EVICTABLE textures in LRU order, re-created on next bind

use lru::LruCache;

use super::accounting::{GroupId, MemoryAccounting};
use super::create_with_retry;
use super::Evictor;
use crate::config::{EngineConfig, TextureFiltering};
use crate::device::{Device, DeviceObjects, DeviceTextureId, SamplerSlot, TextureDesc};
use crate::error::{Error, Result};
use crate::state::{SamplerParams, ShadowState, MAX_SAMPLERS, MAX_VERTEX_TEXTURES};
use wgpu::FilterMode;

pub const MAX_TEXTURE_COPIES: usize = 4;

const BINDABLE_SLOTS: usize = MAX_SAMPLERS + MAX_VERTEX_TEXTURES;

// ---------- Handle ----------

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TextureHandle(u32);

impl TextureHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

// ---------- Flags ----------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureFlags(u32);

impl TextureFlags {
    pub const NONE: Self = Self(0);
    /// May be destroyed under memory pressure while unbound.
    pub const EVICTABLE: Self = Self(1 << 0);
    /// Ignores the global filtering setting.
    pub const POINT_SAMPLE: Self = Self(1 << 1);
    /// Clamp addressing instead of wrap.
    pub const CLAMP: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TextureFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------- Slot helpers ----------

#[inline]
fn slot_index(slot: SamplerSlot) -> Option<usize> {
    match slot {
        SamplerSlot::Pixel(i) if (i as usize) < MAX_SAMPLERS => Some(i as usize),
        SamplerSlot::Vertex(i) if (i as usize) < MAX_VERTEX_TEXTURES => Some(MAX_SAMPLERS + i as usize),
        _ => None,
    }
}

#[inline]
fn slot_from_index(i: usize) -> SamplerSlot {
    if i < MAX_SAMPLERS {
        SamplerSlot::Pixel(i as u8)
    } else {
        SamplerSlot::Vertex((i - MAX_SAMPLERS) as u8)
    }
}

// ---------- Record ----------

#[derive(Debug)]
pub struct TextureRecord {
    desc: TextureDesc,
    group: GroupId,
    flags: TextureFlags,
    copies: [Option<DeviceTextureId>; MAX_TEXTURE_COPIES],
    copy_count: u8,
    current_copy: u8,
    dirty_copy: bool,
    ref_count: u32,
    sampler: SamplerParams,
    /// Bit per bindable slot (pixel samplers, then vertex samplers).
    bound_stages: u32,
    last_bound_frame: Option<u64>,
    resident: bool,
    size_bytes: u64,
}

impl TextureRecord {
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn flags(&self) -> TextureFlags {
        self.flags
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn copy_count(&self) -> usize {
        self.copy_count as usize
    }

    pub fn current_copy(&self) -> usize {
        self.current_copy as usize
    }

    /// Device object of the current copy, if resident.
    pub fn device_texture(&self) -> Option<DeviceTextureId> {
        self.copies[self.current_copy as usize]
    }

    /// All copies together.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn is_resident(&self) -> bool {
        self.resident
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_copy
    }

    pub fn bound_stages(&self) -> u32 {
        self.bound_stages
    }

    pub fn is_bound(&self) -> bool {
        self.bound_stages != 0
    }

    pub fn last_bound_frame(&self) -> Option<u64> {
        self.last_bound_frame
    }

    pub fn sampler_params(&self) -> &SamplerParams {
        &self.sampler
    }

    /// Sampler parameters as bound: the record's addressing plus the global
    /// filtering, mipmapping and anisotropy settings.
    pub fn effective_params(&self, config: &EngineConfig) -> SamplerParams {
        let mut p = self.sampler;
        let filtering = if self.flags.contains(TextureFlags::POINT_SAMPLE) {
            TextureFiltering::Point
        } else {
            config.texture_filtering
        };
        let (filter, mip, anisotropy) = match filtering {
            TextureFiltering::Point => (FilterMode::Nearest, FilterMode::Nearest, 1),
            TextureFiltering::Bilinear => (FilterMode::Linear, FilterMode::Nearest, 1),
            TextureFiltering::Trilinear => (FilterMode::Linear, FilterMode::Linear, 1),
            TextureFiltering::Anisotropic => (FilterMode::Linear, FilterMode::Linear, config.max_anisotropy.max(1)),
        };
        p.mag_filter = filter;
        p.min_filter = filter;
        p.mip_filter = (config.mipmapping && self.desc.mip_levels > 1).then_some(mip);
        p.max_anisotropy = anisotropy;
        p.srgb = self.desc.format.is_srgb();
        p
    }
}

enum Slot {
    Free { next: Option<u32> },
    Live(TextureRecord),
}

/// Result of a bind request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    /// At least one device call was made.
    Bound,
    /// The slot already had this texture with these parameters.
    Unchanged,
    /// Over budget; the slot keeps its previous binding.
    Refused,
    /// The device isn't active; nothing was attempted.
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub created: u64,
    pub deleted: u64,
    pub evicted: u64,
    pub recreated: u64,
    pub copy_advances: u64,
}

pub struct ResourceTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
    stage_owner: [Option<TextureHandle>; BINDABLE_SLOTS],
    /// Resident EVICTABLE textures, most recently bound first.
    lru: LruCache<u32, ()>,
    accounting: MemoryAccounting,
    frame: u64,
    stats: TableStats,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            stage_owner: [None; BINDABLE_SLOTS],
            lru: LruCache::unbounded(),
            accounting: MemoryAccounting::new(),
            frame: 0,
            stats: TableStats::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────

    pub fn get(&self, handle: TextureHandle) -> Option<&TextureRecord> {
        match self.slots.get(handle.index()) {
            Some(Slot::Live(r)) => Some(r),
            _ => None,
        }
    }

    fn get_mut(&mut self, handle: TextureHandle) -> Result<&mut TextureRecord> {
        match self.slots.get_mut(handle.index()) {
            Some(Slot::Live(r)) => Ok(r),
            _ => {
                log::error!("invalid texture handle {}", handle.0);
                Err(Error::InvalidHandle(handle.0))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn accounting(&self) -> &MemoryAccounting {
        &self.accounting
    }

    pub fn accounting_mut(&mut self) -> &mut MemoryAccounting {
        &mut self.accounting
    }

    pub fn stats(&self) -> TableStats {
        self.stats
    }

    /// Texture the table last bound at `slot`.
    pub fn owner(&self, slot: SamplerSlot) -> Option<TextureHandle> {
        slot_index(slot).and_then(|i| self.stage_owner[i])
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifetime
    // ─────────────────────────────────────────────────────────────────────

    fn insert(&mut self, record: TextureRecord) -> TextureHandle {
        self.live += 1;
        if let Some(idx) = self.free_head {
            if let Slot::Free { next } = self.slots[idx as usize] {
                self.free_head = next;
                self.slots[idx as usize] = Slot::Live(record);
                return TextureHandle(idx);
            }
            log::error!("free list head {idx} is live, dropping the free list");
            debug_assert!(false, "free list head {idx} is live");
            self.free_head = None;
        }
        self.slots.push(Slot::Live(record));
        TextureHandle((self.slots.len() - 1) as u32)
    }

    /// Creates a texture with `copies` device objects (clamped to 1..=MAX_TEXTURE_COPIES).
    pub fn create(
        &mut self,
        device: &mut dyn Device,
        desc: &TextureDesc,
        group: GroupId,
        flags: TextureFlags,
        copies: usize,
    ) -> Result<TextureHandle> {
        if !(1..=MAX_TEXTURE_COPIES).contains(&copies) {
            log::error!("texture copy count {copies} out of range, clamping");
        }
        let copy_count = copies.clamp(1, MAX_TEXTURE_COPIES);
        let device_copies = self.create_copies(device, desc, copy_count)?;

        let mut sampler = SamplerParams::default();
        if flags.contains(TextureFlags::CLAMP) {
            sampler = sampler.clamped();
        }
        let size_bytes = desc.size_bytes() * copy_count as u64;
        let handle = self.insert(TextureRecord {
            desc: *desc,
            group,
            flags,
            copies: device_copies,
            copy_count: copy_count as u8,
            current_copy: 0,
            dirty_copy: false,
            ref_count: 1,
            sampler,
            bound_stages: 0,
            last_bound_frame: None,
            resident: true,
            size_bytes,
        });

        self.accounting.on_create(group, size_bytes);
        if flags.contains(TextureFlags::EVICTABLE) {
            self.lru.put(handle.0, ());
        }
        self.stats.created += 1;
        log::debug!(
            "texture {} created: {}x{} {:?}, {} copies, {} bytes",
            handle.0, desc.width, desc.height, desc.format, copy_count, size_bytes
        );
        Ok(handle)
    }

    fn create_copies(
        &mut self,
        device: &mut dyn Device,
        desc: &TextureDesc,
        count: usize,
    ) -> Result<[Option<DeviceTextureId>; MAX_TEXTURE_COPIES]> {
        let mut copies = [None; MAX_TEXTURE_COPIES];
        for i in 0..count {
            let created = create_with_retry(
                device,
                "texture",
                desc.size_bytes(),
                |d| d.create_texture(desc),
                |d| self.evict(d, None),
            );
            match created {
                Ok(id) => copies[i] = Some(id),
                Err(e) => {
                    for id in copies.iter().flatten() {
                        device.destroy_texture(*id);
                    }
                    return Err(e.context(format!("creating copy {i} of {count}")));
                }
            }
        }
        Ok(copies)
    }

    pub fn add_ref(&mut self, handle: TextureHandle) -> Result<u32> {
        let r = self.get_mut(handle)?;
        r.ref_count += 1;
        Ok(r.ref_count)
    }

    /// Drops one reference. The last one unbinds the texture from every slot, releases
    /// its device objects and frees the handle. Returns whether it was destroyed.
    pub fn delete(&mut self, device: &mut dyn Device, shadow: &mut ShadowState, handle: TextureHandle) -> Result<bool> {
        let r = self.get_mut(handle)?;
        r.ref_count = r.ref_count.saturating_sub(1);
        if r.ref_count > 0 {
            return Ok(false);
        }

        self.unbind_everywhere(device, shadow, handle);

        let idx = handle.index();
        let freed = std::mem::replace(&mut self.slots[idx], Slot::Free { next: self.free_head });
        self.free_head = Some(handle.0);
        self.live -= 1;
        self.lru.pop(&handle.0);

        if let Slot::Live(record) = freed {
            for id in record.copies.iter().flatten() {
                device.destroy_texture(*id);
            }
            if record.resident {
                self.accounting.on_delete(record.group, record.size_bytes);
            }
        }
        self.stats.deleted += 1;
        log::debug!("texture {} destroyed", handle.0);
        Ok(true)
    }

    /// Overrides the record's base sampler parameters (addressing, lod bias, mip clamp).
    /// Filtering still follows the global settings at bind time.
    pub fn set_sampler_params(&mut self, handle: TextureHandle, params: SamplerParams) -> Result<()> {
        self.get_mut(handle)?.sampler = params;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Streaming copies
    // ─────────────────────────────────────────────────────────────────────

    /// New contents were produced; the next bind switches to the next copy.
    pub fn mark_dirty(&mut self, handle: TextureHandle) -> Result<()> {
        self.get_mut(handle)?.dirty_copy = true;
        Ok(())
    }

    /// Copy a producer should write next (the one the next post-dirty bind will use).
    /// `None` while the texture is evicted.
    pub fn streaming_target(&self, handle: TextureHandle) -> Result<Option<DeviceTextureId>> {
        let r = self.get(handle).ok_or(Error::InvalidHandle(handle.0))?;
        let next = (r.current_copy as usize + 1) % r.copy_count as usize;
        Ok(r.copies[next])
    }

    // ─────────────────────────────────────────────────────────────────────
    // Binding
    // ─────────────────────────────────────────────────────────────────────

    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.accounting.begin_frame();
    }

    /// Binds `handle` at `slot`, writing only what differs from the shadow.
    pub fn bind(
        &mut self,
        device: &mut dyn Device,
        shadow: &mut ShadowState,
        slot: SamplerSlot,
        handle: TextureHandle,
        config: &EngineConfig,
    ) -> Result<BindOutcome> {
        let Some(si) = slot_index(slot) else {
            log::error!("bind: sampler slot {slot:?} out of range");
            return Err(Error::custom(format!("sampler slot {slot:?} out of range")));
        };
        let frame = self.frame;

        // ---------- budget admission ----------
        let r = self.get_mut(handle)?;
        let (group, bytes) = (r.group, r.size_bytes);
        let counted = r.last_bound_frame == Some(frame);
        if !self.accounting.admit_bind(group, bytes, counted, config.budget()) {
            log::debug!("bind of texture {} at {slot:?} refused by budget", handle.0);
            return Ok(BindOutcome::Refused);
        }

        // ---------- residency ----------
        if !self.get_mut(handle)?.resident {
            if let Err(e) = self.make_resident(device, handle) {
                if !counted {
                    self.accounting.release_bind(group, bytes);
                }
                return Err(e);
            }
        }

        // ---------- round-robin copy advance ----------
        let r = self.get_mut(handle)?;
        if r.dirty_copy {
            r.dirty_copy = false;
            if r.copy_count > 1 {
                r.current_copy = (r.current_copy + 1) % r.copy_count;
                self.unbind_everywhere(device, shadow, handle);
                self.stats.copy_advances += 1;
            }
        }

        // ---------- release previous owner of the slot ----------
        if let Some(prev) = self.stage_owner[si] {
            if prev != handle {
                if let Some(Slot::Live(p)) = self.slots.get_mut(prev.index()) {
                    p.bound_stages &= !(1 << si);
                }
            }
        }

        let r = match self.slots.get_mut(handle.index()) {
            Some(Slot::Live(r)) => r,
            _ => return Err(Error::InvalidHandle(handle.0)),
        };
        let device_id = r
            .device_texture()
            .ok_or_else(|| Error::custom(format!("texture {} has no device copy", handle.0)))?;
        let params = r.effective_params(config);
        r.bound_stages |= 1 << si;
        r.last_bound_frame = Some(frame);
        let evictable = r.flags.contains(TextureFlags::EVICTABLE);
        self.stage_owner[si] = Some(handle);
        if evictable {
            self.lru.put(handle.0, ());
        }

        // ---------- device writes ----------
        let index = slot.device_index();
        let shadow_slot = shadow
            .sampler_mut(slot)
            .ok_or_else(|| Error::custom(format!("sampler slot {slot:?} out of range")))?;
        let mut changed = false;
        if shadow_slot.texture != Some(device_id) {
            if let Err(e) = device.set_texture(index, Some(device_id)) {
                log::warn!("set_texture({index}, {device_id:?}) failed: {e}");
            }
            shadow_slot.texture = Some(device_id);
            changed = true;
        }
        let mut states = Vec::new();
        params.diff(Some(&shadow_slot.params), &mut states);
        for state in states {
            if let Err(e) = device.set_sampler_state(index, state) {
                log::warn!("set_sampler_state({index}, {state:?}) failed: {e}");
            }
            changed = true;
        }
        shadow_slot.params = params;

        Ok(if changed { BindOutcome::Bound } else { BindOutcome::Unchanged })
    }

    /// Clears `slot`. A no-op when nothing is bound there.
    pub fn unbind(&mut self, device: &mut dyn Device, shadow: &mut ShadowState, slot: SamplerSlot) -> Result<()> {
        let Some(si) = slot_index(slot) else {
            log::error!("unbind: sampler slot {slot:?} out of range");
            return Err(Error::custom(format!("sampler slot {slot:?} out of range")));
        };
        if let Some(owner) = self.stage_owner[si].take() {
            if let Some(Slot::Live(r)) = self.slots.get_mut(owner.index()) {
                r.bound_stages &= !(1 << si);
            }
        }
        clear_slot(device, shadow, slot);
        Ok(())
    }

    fn unbind_everywhere(&mut self, device: &mut dyn Device, shadow: &mut ShadowState, handle: TextureHandle) {
        let Some(Slot::Live(r)) = self.slots.get_mut(handle.index()) else {
            return;
        };
        let mut stages = std::mem::take(&mut r.bound_stages);
        while stages != 0 {
            let si = stages.trailing_zeros() as usize;
            stages &= stages - 1;
            if self.stage_owner[si] == Some(handle) {
                self.stage_owner[si] = None;
                clear_slot(device, shadow, slot_from_index(si));
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Eviction
    // ─────────────────────────────────────────────────────────────────────

    fn make_resident(&mut self, device: &mut dyn Device, handle: TextureHandle) -> Result<()> {
        let (desc, count) = {
            let r = self.get_mut(handle)?;
            (r.desc, r.copy_count as usize)
        };
        let copies = self.create_copies(device, &desc, count)?;
        let r = self.get_mut(handle)?;
        r.copies = copies;
        r.resident = true;
        let (group, bytes, evictable) = (r.group, r.size_bytes, r.flags.contains(TextureFlags::EVICTABLE));
        self.accounting.on_create(group, bytes);
        if evictable {
            self.lru.put(handle.0, ());
        }
        self.stats.recreated += 1;
        log::debug!("texture {} re-created", handle.0);
        Ok(())
    }

    /// Destroys unbound EVICTABLE textures, least recently bound first, until `target`
    /// bytes are freed (or all of them when `None`). Returns bytes freed.
    pub fn evict(&mut self, device: &mut dyn Device, target: Option<u64>) -> u64 {
        let candidates: Vec<u32> = self.lru.iter().rev().map(|(&idx, _)| idx).collect();
        let mut freed = 0;
        for idx in candidates {
            if target.is_some_and(|t| freed >= t) {
                break;
            }
            let Some(Slot::Live(r)) = self.slots.get_mut(idx as usize) else {
                self.lru.pop(&idx);
                continue;
            };
            if r.bound_stages != 0 || !r.resident {
                continue;
            }
            for copy in r.copies.iter_mut() {
                if let Some(id) = copy.take() {
                    device.destroy_texture(id);
                }
            }
            r.resident = false;
            freed += r.size_bytes;
            self.accounting.on_delete(r.group, r.size_bytes);
            self.lru.pop(&idx);
            self.stats.evicted += 1;
            log::debug!("texture {idx} evicted ({} bytes)", r.size_bytes);
        }
        freed
    }
}

fn clear_slot(device: &mut dyn Device, shadow: &mut ShadowState, slot: SamplerSlot) {
    let Some(s) = shadow.sampler_mut(slot) else {
        return;
    };
    if s.texture.is_some() {
        if let Err(e) = device.set_texture(slot.device_index(), None) {
            log::warn!("set_texture({}, None) failed: {e}", slot.device_index());
        }
        s.texture = None;
    }
}

impl Evictor for ResourceTable {
    fn evict_non_essential(&mut self, device: &mut dyn Device) -> u64 {
        self.evict(device, None)
    }
}

impl DeviceObjects for ResourceTable {
    fn release(&mut self, device: &mut dyn Device) {
        for slot in &mut self.slots {
            let Slot::Live(r) = slot else { continue };
            for copy in r.copies.iter_mut() {
                if let Some(id) = copy.take() {
                    device.destroy_texture(id);
                }
            }
            if r.resident {
                self.accounting.on_delete(r.group, r.size_bytes);
            }
            r.resident = false;
            r.bound_stages = 0;
        }
        self.stage_owner = [None; BINDABLE_SLOTS];
        self.lru.clear();
    }

    fn restore(&mut self, device: &mut dyn Device) -> Result<()> {
        for idx in 0..self.slots.len() {
            let pending = matches!(&self.slots[idx], Slot::Live(r) if !r.resident);
            if pending {
                self.make_resident(device, TextureHandle(idx as u32))?;
            }
        }
        log::debug!("restored {} textures", self.live);
        Ok(())
    }
}
