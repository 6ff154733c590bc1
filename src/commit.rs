// src/commit.rs
//! Deferred commit functions.
//!
//! Setters don't touch the device; they queue a [`CommitFunc`] that moves one slice of
//! desired state onto the device right before the next draw. Each `(phase, mode)`
//! partition keeps a pending bitmask so a function is queued at most once, and a FIFO
//! so drains run in insertion order.

use crate::device::{Device, DeviceObjects};
use crate::error::Result;

/// Which consumer the bound pass reads transforms and lights from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadingMode {
    FixedFunction,
    Programmable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// Before every draw.
    PerDraw,
    /// Once per shader pass.
    PerPass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitMode {
    FixedFunction,
    Programmable,
    Always,
}

impl From<ShadingMode> for CommitMode {
    fn from(mode: ShadingMode) -> Self {
        match mode {
            ShadingMode::FixedFunction => CommitMode::FixedFunction,
            ShadingMode::Programmable => CommitMode::Programmable,
        }
    }
}

/// Every deferred mutation the engine knows how to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommitFunc {
    FixedFunctionTransforms,
    ProgrammableTransforms,
    FixedFunctionLights,
    ProgrammableLights,
    VertexShaderConstants,
    PixelShaderConstants,
    Viewport,
    Ambient,
    FogParams,
    ClipPlanes,
}

impl CommitFunc {
    pub const ALL: [CommitFunc; 10] = [
        CommitFunc::FixedFunctionTransforms,
        CommitFunc::ProgrammableTransforms,
        CommitFunc::FixedFunctionLights,
        CommitFunc::ProgrammableLights,
        CommitFunc::VertexShaderConstants,
        CommitFunc::PixelShaderConstants,
        CommitFunc::Viewport,
        CommitFunc::Ambient,
        CommitFunc::FogParams,
        CommitFunc::ClipPlanes,
    ];

    #[inline]
    pub const fn bit(self) -> u64 {
        1 << (self as u8)
    }

    /// The partition a function belongs to: the most specific shading mode it serves.
    pub const fn intrinsic(self) -> (CommitPhase, CommitMode) {
        use CommitMode::*;
        use CommitPhase::*;
        match self {
            CommitFunc::FixedFunctionTransforms => (PerDraw, FixedFunction),
            CommitFunc::ProgrammableTransforms => (PerDraw, Programmable),
            CommitFunc::FixedFunctionLights => (PerDraw, FixedFunction),
            CommitFunc::ProgrammableLights => (PerDraw, Programmable),
            CommitFunc::VertexShaderConstants => (PerDraw, Programmable),
            CommitFunc::PixelShaderConstants => (PerDraw, Always),
            CommitFunc::Viewport => (PerDraw, Always),
            CommitFunc::Ambient => (PerPass, FixedFunction),
            CommitFunc::FogParams => (PerPass, Always),
            CommitFunc::ClipPlanes => (PerPass, Always),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub queued: u64,
    /// Adds dropped because the function was already pending.
    pub deduplicated: u64,
    pub drained: u64,
}

#[derive(Default)]
struct Partition {
    pending: u64,
    order: Vec<CommitFunc>,
}

const PARTITIONS: usize = 6;

#[inline]
fn partition_index(phase: CommitPhase, mode: CommitMode) -> usize {
    let p = match phase {
        CommitPhase::PerDraw => 0,
        CommitPhase::PerPass => 1,
    };
    let m = match mode {
        CommitMode::FixedFunction => 0,
        CommitMode::Programmable => 1,
        CommitMode::Always => 2,
    };
    p * 3 + m
}

#[derive(Default)]
pub struct CommitQueue {
    partitions: [Partition; PARTITIONS],
    stats: CommitStats,
}

impl CommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `func` unless it is already pending in that partition.
    /// Returns whether it was added.
    pub fn add(&mut self, phase: CommitPhase, mode: CommitMode, func: CommitFunc) -> bool {
        let part = &mut self.partitions[partition_index(phase, mode)];
        if part.pending & func.bit() != 0 {
            self.stats.deduplicated += 1;
            return false;
        }
        part.pending |= func.bit();
        part.order.push(func);
        self.stats.queued += 1;
        true
    }

    /// Queues `func` in its intrinsic partition.
    #[inline]
    pub fn add_func(&mut self, func: CommitFunc) -> bool {
        let (phase, mode) = func.intrinsic();
        self.add(phase, mode, func)
    }

    /// Appends one partition's functions to `out` in insertion order and empties it.
    pub fn drain_into(&mut self, phase: CommitPhase, mode: CommitMode, out: &mut Vec<CommitFunc>) {
        let part = &mut self.partitions[partition_index(phase, mode)];
        self.stats.drained += part.order.len() as u64;
        out.append(&mut part.order);
        part.pending = 0;
    }

    pub fn drain(&mut self, phase: CommitPhase, mode: CommitMode) -> Vec<CommitFunc> {
        let mut out = Vec::new();
        self.drain_into(phase, mode, &mut out);
        out
    }

    /// What a draw in `shading` mode runs for `phase`: the `Always` partition, then the
    /// bound mode's. The other mode's partition stays queued.
    pub fn drain_for_into(&mut self, phase: CommitPhase, shading: ShadingMode, out: &mut Vec<CommitFunc>) {
        self.drain_into(phase, CommitMode::Always, out);
        self.drain_into(phase, shading.into(), out);
    }

    pub fn drain_for(&mut self, phase: CommitPhase, shading: ShadingMode) -> Vec<CommitFunc> {
        let mut out = Vec::new();
        self.drain_for_into(phase, shading, &mut out);
        out
    }

    #[inline]
    pub fn is_pending(&self, phase: CommitPhase, mode: CommitMode, func: CommitFunc) -> bool {
        self.partitions[partition_index(phase, mode)].pending & func.bit() != 0
    }

    pub fn pending_count(&self) -> usize {
        self.partitions.iter().map(|p| p.order.len()).sum()
    }

    /// Queues every function in its intrinsic partition.
    pub fn requeue_all(&mut self) {
        for func in CommitFunc::ALL {
            self.add_func(func);
        }
    }

    pub fn clear(&mut self) {
        for part in &mut self.partitions {
            part.pending = 0;
            part.order.clear();
        }
    }

    pub fn stats(&self) -> CommitStats {
        self.stats
    }
}

impl DeviceObjects for CommitQueue {
    fn release(&mut self, _device: &mut dyn Device) {
        self.clear();
    }

    fn restore(&mut self, _device: &mut dyn Device) -> Result<()> {
        self.requeue_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_adds_drain_once() {
        let mut q = CommitQueue::new();
        for _ in 0..5 {
            q.add(CommitPhase::PerDraw, CommitMode::Always, CommitFunc::Viewport);
        }
        assert_eq!(q.drain(CommitPhase::PerDraw, CommitMode::Always), vec![CommitFunc::Viewport]);
        assert!(q.drain(CommitPhase::PerDraw, CommitMode::Always).is_empty());
        assert_eq!(q.stats().deduplicated, 4);
        assert_eq!(q.stats().drained, 1);
    }

    #[test]
    fn drain_keeps_insertion_order_and_clears_flags() {
        let mut q = CommitQueue::new();
        q.add(CommitPhase::PerDraw, CommitMode::Always, CommitFunc::PixelShaderConstants);
        q.add(CommitPhase::PerDraw, CommitMode::Always, CommitFunc::Viewport);
        assert_eq!(
            q.drain(CommitPhase::PerDraw, CommitMode::Always),
            vec![CommitFunc::PixelShaderConstants, CommitFunc::Viewport]
        );
        assert!(!q.is_pending(CommitPhase::PerDraw, CommitMode::Always, CommitFunc::Viewport));
        assert!(q.add(CommitPhase::PerDraw, CommitMode::Always, CommitFunc::Viewport));
    }

    #[test]
    fn same_func_is_independent_across_partitions() {
        let mut q = CommitQueue::new();
        assert!(q.add(CommitPhase::PerDraw, CommitMode::FixedFunction, CommitFunc::Viewport));
        assert!(q.add(CommitPhase::PerDraw, CommitMode::Programmable, CommitFunc::Viewport));
        assert!(q.add(CommitPhase::PerPass, CommitMode::FixedFunction, CommitFunc::Viewport));
        assert_eq!(q.pending_count(), 3);
    }

    #[test]
    fn other_mode_partition_stays_queued() {
        let mut q = CommitQueue::new();
        q.add_func(CommitFunc::FixedFunctionTransforms);
        q.add_func(CommitFunc::ProgrammableTransforms);
        q.add_func(CommitFunc::Viewport);

        let ran = q.drain_for(CommitPhase::PerDraw, ShadingMode::Programmable);
        assert_eq!(ran, vec![CommitFunc::Viewport, CommitFunc::ProgrammableTransforms]);
        assert!(q.is_pending(
            CommitPhase::PerDraw,
            CommitMode::FixedFunction,
            CommitFunc::FixedFunctionTransforms
        ));

        let ran = q.drain_for(CommitPhase::PerDraw, ShadingMode::FixedFunction);
        assert_eq!(ran, vec![CommitFunc::FixedFunctionTransforms]);
    }

    #[test]
    fn requeue_all_fills_intrinsic_partitions() {
        let mut q = CommitQueue::new();
        q.requeue_all();
        assert_eq!(q.pending_count(), CommitFunc::ALL.len());
        for func in CommitFunc::ALL {
            let (phase, mode) = func.intrinsic();
            assert!(q.is_pending(phase, mode, func), "{func:?}");
        }
        q.clear();
        assert_eq!(q.pending_count(), 0);
    }
}
