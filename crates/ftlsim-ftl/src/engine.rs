//! The engine contract the driver programs against.

use std::time::Duration;

use ftlsim_nand::DeviceStats;

use crate::meta::{Heatmap, StateTable};
use crate::FtlError;

/// Policy-side counters sampled after every trace entry. Dirty/abandoned
/// page totals come from the state table; the rest is mapping and GC
/// bookkeeping that only some engines maintain (the others report zeroes).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineCounters {
    pub ndirty: u64,
    pub nabandoned: u64,
    pub nblock: u64,
    pub gc_becost: f64,
    pub map_change_count: u64,
    pub map_set_count: u64,
    pub gc_count: u64,
    pub gc_time: Duration,
    pub gc_map_change_count: u64,
}

/// One write policy over one device instance. Byte ranges are validated
/// against the device capacity; operations are synchronous and fully
/// retire before returning.
pub trait Engine {
    fn name(&self) -> &'static str;

    /// Read `out.len()` bytes starting at device byte `offset`.
    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), FtlError>;

    /// Write `data` starting at device byte `offset`, preserving every
    /// byte outside the range.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FtlError>;

    fn counters(&self) -> EngineCounters;

    fn state(&self) -> &StateTable;

    fn heatmap(&self) -> &Heatmap;

    fn device_stats(&self) -> DeviceStats;
}
