// src/resource/accounting.rs
//! Per-group memory counters.
//!
//! Updated in the same call that creates, binds, evicts or deletes a texture, so budget
//! checks and reports never walk the table.

use std::fmt;

/// Accounting bucket. Orthogonal to resource lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u16);

impl GroupId {
    pub const DEFAULT: GroupId = GroupId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupUsage {
    pub name: String,
    /// Device bytes currently allocated.
    pub allocated_bytes: u64,
    pub allocated_count: u32,
    /// Bytes bound at least once this frame.
    pub frame_bound_bytes: u64,
    pub frame_bound_count: u32,
    /// Binds refused by the budget this frame.
    pub refused_binds: u32,
    pub peak_allocated_bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryReport {
    pub groups: Vec<GroupUsage>,
    pub total_allocated_bytes: u64,
    pub frame_bound_bytes: u64,
    pub budget_bytes: Option<u64>,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: f64 = 1024.0 * 1024.0;
        writeln!(
            f,
            "texture memory: {:.2} MB allocated, {:.2} MB bound this frame, budget {}",
            self.total_allocated_bytes as f64 / MB,
            self.frame_bound_bytes as f64 / MB,
            match self.budget_bytes {
                Some(b) => format!("{:.2} MB", b as f64 / MB),
                None => "unlimited".to_string(),
            }
        )?;
        for g in &self.groups {
            writeln!(
                f,
                "  {:<16} {:>5} textures {:>9.2} MB | bound {:>4} {:>9.2} MB | refused {}",
                g.name,
                g.allocated_count,
                g.allocated_bytes as f64 / MB,
                g.frame_bound_count,
                g.frame_bound_bytes as f64 / MB,
                g.refused_binds
            )?;
        }
        Ok(())
    }
}

pub struct MemoryAccounting {
    groups: Vec<GroupUsage>,
    frame_bound_total: u64,
}

impl Default for MemoryAccounting {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccounting {
    pub fn new() -> Self {
        Self {
            groups: vec![GroupUsage {
                name: "default".to_string(),
                ..GroupUsage::default()
            }],
            frame_bound_total: 0,
        }
    }

    /// Registers a named group, or returns the existing one with that name.
    pub fn register_group(&mut self, name: &str) -> GroupId {
        if let Some(i) = self.groups.iter().position(|g| g.name == name) {
            return GroupId(i as u16);
        }
        self.groups.push(GroupUsage {
            name: name.to_string(),
            ..GroupUsage::default()
        });
        GroupId((self.groups.len() - 1) as u16)
    }

    fn group_mut(&mut self, group: GroupId) -> &mut GroupUsage {
        if group.index() >= self.groups.len() {
            log::error!("unknown accounting group {group:?}, using default");
            debug_assert!(false, "unknown accounting group {group:?}");
            return &mut self.groups[0];
        }
        &mut self.groups[group.index()]
    }

    pub fn on_create(&mut self, group: GroupId, bytes: u64) {
        let g = self.group_mut(group);
        g.allocated_bytes += bytes;
        g.allocated_count += 1;
        g.peak_allocated_bytes = g.peak_allocated_bytes.max(g.allocated_bytes);
    }

    pub fn on_delete(&mut self, group: GroupId, bytes: u64) {
        let g = self.group_mut(group);
        debug_assert!(g.allocated_bytes >= bytes && g.allocated_count > 0);
        g.allocated_bytes = g.allocated_bytes.saturating_sub(bytes);
        g.allocated_count = g.allocated_count.saturating_sub(1);
    }

    /// Budget admission for a bind.
    ///
    /// A texture already counted this frame is always admitted. Otherwise the bind is
    /// admitted only if the frame's bound total stays within `budget`; on admission
    /// the bytes are added to the frame counters, on refusal the refusal is counted.
    pub fn admit_bind(&mut self, group: GroupId, bytes: u64, already_bound_this_frame: bool, budget: Option<u64>) -> bool {
        if already_bound_this_frame {
            return true;
        }
        if let Some(budget) = budget {
            if self.frame_bound_total + bytes > budget {
                self.group_mut(group).refused_binds += 1;
                return false;
            }
        }
        self.frame_bound_total += bytes;
        let g = self.group_mut(group);
        g.frame_bound_bytes += bytes;
        g.frame_bound_count += 1;
        true
    }

    /// Takes back an admission whose bind never reached the device.
    pub fn release_bind(&mut self, group: GroupId, bytes: u64) {
        self.frame_bound_total = self.frame_bound_total.saturating_sub(bytes);
        let g = self.group_mut(group);
        g.frame_bound_bytes = g.frame_bound_bytes.saturating_sub(bytes);
        g.frame_bound_count = g.frame_bound_count.saturating_sub(1);
    }

    /// Clears the per-frame counters.
    pub fn begin_frame(&mut self) {
        self.frame_bound_total = 0;
        for g in &mut self.groups {
            g.frame_bound_bytes = 0;
            g.frame_bound_count = 0;
            g.refused_binds = 0;
        }
    }

    pub fn usage(&self, group: GroupId) -> Option<&GroupUsage> {
        self.groups.get(group.index())
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().position(|g| g.name == name).map(|i| GroupId(i as u16))
    }

    #[inline]
    pub fn frame_bound_total(&self) -> u64 {
        self.frame_bound_total
    }

    pub fn total_allocated(&self) -> u64 {
        self.groups.iter().map(|g| g.allocated_bytes).sum()
    }

    pub fn report(&self, budget: Option<u64>) -> MemoryReport {
        MemoryReport {
            groups: self.groups.clone(),
            total_allocated_bytes: self.total_allocated(),
            frame_bound_bytes: self.frame_bound_total,
            budget_bytes: budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_delete_are_symmetric() {
        let mut acc = MemoryAccounting::new();
        let world = acc.register_group("world");
        acc.on_create(world, 1000);
        acc.on_create(world, 24);
        acc.on_delete(world, 1000);
        let u = acc.usage(world).unwrap();
        assert_eq!(u.allocated_bytes, 24);
        assert_eq!(u.allocated_count, 1);
        assert_eq!(u.peak_allocated_bytes, 1024);
        assert_eq!(acc.usage(GroupId::DEFAULT).unwrap().allocated_bytes, 0);
    }

    #[test]
    fn register_is_idempotent_by_name() {
        let mut acc = MemoryAccounting::new();
        let a = acc.register_group("ui");
        let b = acc.register_group("ui");
        assert_eq!(a, b);
        assert_eq!(acc.group_by_name("ui"), Some(a));
        assert_eq!(acc.group_by_name("default"), Some(GroupId::DEFAULT));
    }

    #[test]
    fn budget_refuses_new_binds_at_ceiling() {
        let mut acc = MemoryAccounting::new();
        let g = GroupId::DEFAULT;
        assert!(acc.admit_bind(g, 60, false, Some(100)));
        assert!(acc.admit_bind(g, 40, false, Some(100)));
        assert_eq!(acc.frame_bound_total(), 100);

        assert!(!acc.admit_bind(g, 1, false, Some(100)));
        // already counted this frame: always fine
        assert!(acc.admit_bind(g, 60, true, Some(100)));
        assert_eq!(acc.usage(g).unwrap().refused_binds, 1);

        acc.begin_frame();
        assert_eq!(acc.frame_bound_total(), 0);
        assert!(acc.admit_bind(g, 1, false, Some(100)));
    }

    #[test]
    fn unlimited_budget_admits_everything() {
        let mut acc = MemoryAccounting::new();
        assert!(acc.admit_bind(GroupId::DEFAULT, u64::MAX / 2, false, None));
    }

    #[test]
    fn report_renders_each_group() {
        let mut acc = MemoryAccounting::new();
        let g = acc.register_group("characters");
        acc.on_create(g, 2 * 1024 * 1024);
        let text = acc.report(Some(64 * 1024 * 1024)).to_string();
        assert!(text.contains("characters"));
        assert!(text.contains("2.00 MB"));
        assert!(text.contains("64.00 MB"));
    }
}
