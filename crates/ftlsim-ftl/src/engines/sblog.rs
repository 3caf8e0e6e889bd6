//! Superblock policy with log blocks and merge-on-full.
//!
//! A small fixed pool of log-block entries gives hot virtual superblocks a
//! page-granular overflow area: writes append to the superblock's log
//! block, and address resolution checks the log mapping before the data
//! mapping. A log block folds back into the data mapping ("merge") when it
//! fills up or when its pool slot is needed for another superblock. If the
//! log mapping is the identity permutation the log block is adopted as the
//! data block outright; otherwise every live page is copied into a fresh
//! superblock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ftlsim_geo::{GeoAddr, LogAddr, SbLayout};
use ftlsim_nand::{DeviceStats, NandDevice};
use tracing::{debug, info};

use crate::engine::{Engine, EngineCounters};
use crate::meta::{Heatmap, PageState, StateTable};
use crate::pageio::PageIo;
use crate::segment::split_range;
use crate::FtlError;

const DEFAULT_LOG_BLOCKS: u64 = 10;

#[derive(Debug, Clone, Copy, Default)]
struct SblkMeta {
    ndirty: u64,
    nabandoned: u64,
}

/// One pool slot: which virtual superblock it serves, its dedicated log
/// block, and the in-superblock page overrides (slot -> log position).
#[derive(Debug)]
struct LogEntry {
    vsblk: Option<u64>,
    psblk: Option<u64>,
    map: Vec<Option<u64>>,
}

impl LogEntry {
    fn free(slots: usize) -> Self {
        LogEntry {
            vsblk: None,
            psblk: None,
            map: vec![None; slots],
        }
    }

    fn clear(&mut self) {
        self.vsblk = None;
        self.psblk = None;
        self.map.fill(None);
    }
}

#[derive(Debug, Default)]
struct OuterLists {
    empty: VecDeque<u64>,
    non_empty: VecDeque<u64>,
}

pub struct SbLogEngine<D> {
    io: PageIo<D>,
    sb: SbLayout,
    vsblk_map: Vec<Option<u64>>,
    psblk_map: Vec<Option<u64>>,
    sblk_meta: Vec<SblkMeta>,
    mpus: Vec<OuterLists>,
    next_mpu: u64,
    log_entries: Vec<LogEntry>,
    pagebuf: Vec<u8>,
    begin_pagebuf: Vec<u8>,
    end_pagebuf: Vec<u8>,
    map_change_count: u64,
    map_set_count: u64,
    gc_count: u64,
    gc_time: Duration,
}

impl<D: NandDevice> SbLogEngine<D> {
    pub fn new(dev: D, sb_pus: u64, sb_blks: u64, log_blocks: u64) -> Result<Self, FtlError> {
        let io = PageIo::new(dev);
        let geo = *io.geometry();
        let sb = SbLayout::new(geo, sb_pus, sb_blks)?;
        let log_blocks = if log_blocks == 0 {
            DEFAULT_LOG_BLOCKS
        } else {
            log_blocks
        };
        info!(
            sb_pus,
            sb_blks,
            pages_per_sblk = sb.pages_per_sblk(),
            log_blocks,
            "superblock layout with log-block pool"
        );
        let vpg_size = geo.vpg_size() as usize;
        let total = sb.total_sblks();
        let outer_pus = sb.outer_pus();
        let slots = sb.pages_per_sblk() as usize;
        let mpus = (0..outer_pus)
            .map(|opu| OuterLists {
                empty: (0..sb.outer_blks()).map(|ob| opu + ob * outer_pus).collect(),
                ..OuterLists::default()
            })
            .collect();
        Ok(SbLogEngine {
            vsblk_map: vec![None; total as usize],
            psblk_map: vec![None; total as usize],
            sblk_meta: vec![SblkMeta::default(); total as usize],
            mpus,
            next_mpu: 0,
            log_entries: (0..log_blocks).map(|_| LogEntry::free(slots)).collect(),
            pagebuf: vec![0; vpg_size],
            begin_pagebuf: vec![0; vpg_size],
            end_pagebuf: vec![0; vpg_size],
            map_change_count: 0,
            map_set_count: 0,
            gc_count: 0,
            gc_time: Duration::ZERO,
            sb,
            io,
        })
    }

    pub fn io(&self) -> &PageIo<D> {
        &self.io
    }

    /// Data-map binding of a virtual superblock, ignoring log overrides.
    pub fn data_mapping(&self, vsblk: u64) -> Option<u64> {
        self.vsblk_map[vsblk as usize]
    }

    /// Whether a log-pool entry currently serves this virtual superblock.
    pub fn has_log_entry(&self, vsblk: u64) -> bool {
        self.log_entries.iter().any(|e| e.vsblk == Some(vsblk))
    }

    fn slot_addr(&self, psblk: u64, slot: u64) -> GeoAddr {
        self.sb.log_to_geo(&LogAddr {
            sblk: psblk,
            pg: slot,
            in_page: 0,
        })
    }

    /// Log-then-data address resolution.
    fn resolve(&self, vpg: u64) -> Option<GeoAddr> {
        let per = self.sb.pages_per_sblk();
        let vsblk = vpg / per;
        let slot = (vpg % per) as usize;
        for entry in &self.log_entries {
            if entry.vsblk == Some(vsblk) {
                if let Some(pos) = entry.map[slot] {
                    let psblk = entry.psblk.expect("active entry has a log block");
                    return Some(self.slot_addr(psblk, pos));
                }
            }
        }
        let psblk = self.vsblk_map[vsblk as usize]?;
        Some(self.slot_addr(psblk, vpg % per))
    }

    fn is_allocated(&self, vpg: u64) -> bool {
        let per = self.sb.pages_per_sblk();
        let vsblk = vpg / per;
        let slot = (vpg % per) as usize;
        for entry in &self.log_entries {
            if entry.vsblk == Some(vsblk) && entry.map[slot].is_some() {
                return true;
            }
        }
        match self.vsblk_map[vsblk as usize] {
            None => false,
            Some(psblk) => {
                let paddr = self.slot_addr(psblk, vpg % per);
                self.io.state().page(self.io.geometry().vpg(&paddr)) != PageState::Clean
            }
        }
    }

    fn take_free_sblk(&mut self) -> Option<u64> {
        let outer = self.mpus.len() as u64;
        for i in 0..outer {
            let mpu = ((self.next_mpu + i) % outer) as usize;
            if let Some(sblk) = self.mpus[mpu].empty.pop_front() {
                self.mpus[mpu].non_empty.push_back(sblk);
                self.next_mpu = (mpu as u64 + 1) % outer;
                return Some(sblk);
            }
        }
        None
    }

    fn erase_sb(&mut self, psblk: u64) -> Result<(), FtlError> {
        let corner = self.sb.sblk_addr(psblk);
        for inner_blk in 0..self.sb.sb_blks() {
            for inner_pu in 0..self.sb.sb_pus() {
                let mut addr = corner;
                addr.inner_blk = inner_blk;
                addr.inner_pu = inner_pu;
                let geo_addr = self.sb.to_geo(&addr);
                if self.io.block_dirty(&geo_addr) {
                    self.io.erase_block(&geo_addr)?;
                }
            }
        }
        Ok(())
    }

    /// One GC round: recycle the first superblock with no live pages.
    /// Returns whether anything was recycled.
    fn gc(&mut self) -> Result<bool, FtlError> {
        let started = Instant::now();
        let outer = self.mpus.len() as u64;
        let mut recycled = false;
        for i in 0..outer {
            let mpu = ((self.next_mpu + i) % outer) as usize;
            let found = self.mpus[mpu]
                .non_empty
                .iter()
                .position(|&s| self.sblk_meta[s as usize].ndirty == 0);
            if let Some(pos) = found {
                let sblk = self.mpus[mpu].non_empty.remove(pos).expect("position exists");
                debug!(sblk, "recycling superblock");
                self.erase_sb(sblk)?;
                self.sblk_meta[sblk as usize] = SblkMeta::default();
                self.mpus[mpu].empty.push_back(sblk);
                self.next_mpu = mpu as u64;
                recycled = true;
                break;
            }
        }
        self.gc_count += 1;
        self.gc_time += started.elapsed();
        Ok(recycled)
    }

    /// Find a free superblock, collecting garbage until one appears;
    /// fails once a GC round recycles nothing.
    fn gc_until_free(&mut self) -> Result<u64, FtlError> {
        loop {
            if let Some(sblk) = self.take_free_sblk() {
                return Ok(sblk);
            }
            if !self.gc()? {
                return Err(FtlError::OutOfCapacity);
            }
        }
    }

    /// Drop a superblock from the data side: its live pages are stale.
    fn abandon_sblk(&mut self, psblk: u64) {
        let geo = *self.io.geometry();
        let per = self.sb.pages_per_sblk();
        for slot in 0..per {
            let plain = geo.vpg(&self.slot_addr(psblk, slot));
            if self.io.state().page(plain) == PageState::Dirty {
                self.io.state_mut().mark_abandoned(plain);
            }
        }
        let meta = &mut self.sblk_meta[psblk as usize];
        meta.nabandoned += meta.ndirty;
        meta.ndirty = 0;
        self.psblk_map[psblk as usize] = None;
    }

    /// The log mapping is the identity permutation: the log block already
    /// holds every written page at its home position.
    fn datafit(&self, entry: &LogEntry) -> bool {
        entry
            .map
            .iter()
            .enumerate()
            .all(|(slot, pos)| *pos == Some(slot as u64))
    }

    /// Fold log entry `idx` back into the data mapping and free the slot.
    fn merge(&mut self, idx: usize) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        let per = self.sb.pages_per_sblk();
        let vsblk = self.log_entries[idx].vsblk.expect("merging an active entry");
        let log_psblk = self.log_entries[idx].psblk.expect("active entry has a log block");
        let data_psblk = self.vsblk_map[vsblk as usize];

        if self.datafit(&self.log_entries[idx]) {
            debug!(vsblk, log_psblk, "adopting data-fit log block");
            if let Some(data) = data_psblk {
                self.abandon_sblk(data);
                self.map_change_count += 1;
            } else {
                self.map_set_count += 1;
            }
            self.vsblk_map[vsblk as usize] = Some(log_psblk);
            self.psblk_map[log_psblk as usize] = Some(vsblk);
        } else {
            let target = self.gc_until_free()?;
            debug!(vsblk, log_psblk, target, "full log merge");
            let mut copied = 0u64;
            for slot in 0..per {
                let src = match self.log_entries[idx].map[slot as usize] {
                    Some(pos) => Some(self.slot_addr(log_psblk, pos)),
                    None => data_psblk.and_then(|data| {
                        let cand = self.slot_addr(data, slot);
                        (self.io.state().page(geo.vpg(&cand)) == PageState::Dirty)
                            .then_some(cand)
                    }),
                };
                if let Some(src) = src {
                    let dst = self.slot_addr(target, slot);
                    self.io.read_slice(&src, &mut self.pagebuf)?;
                    self.io.write_page(&dst, &self.pagebuf)?;
                    copied += 1;
                }
            }
            self.sblk_meta[target as usize].ndirty = copied;
            self.vsblk_map[vsblk as usize] = Some(target);
            self.psblk_map[target as usize] = Some(vsblk);
            if data_psblk.is_some() {
                self.map_change_count += 1;
            } else {
                self.map_set_count += 1;
            }
            if let Some(data) = data_psblk {
                self.abandon_sblk(data);
            }
            self.abandon_sblk(log_psblk);
        }
        self.log_entries[idx].clear();
        Ok(())
    }

    /// Route a page write into the superblock's log block, setting one up
    /// (possibly by merging another entry) if needed. Returns the
    /// superblock-linear physical page to program.
    fn alloc_page(&mut self, vpg: u64) -> Result<u64, FtlError> {
        let geo = *self.io.geometry();
        let per = self.sb.pages_per_sblk();
        let vsblk = vpg / per;
        let slot = (vpg % per) as usize;

        let mut match_i = None;
        let mut avail_i = None;
        for (i, entry) in self.log_entries.iter().enumerate() {
            if entry.vsblk == Some(vsblk) {
                match_i = Some(i);
            }
            if entry.vsblk.is_none() {
                avail_i = Some(i);
            }
        }

        let entry_i = match match_i {
            Some(i) => i,
            None => {
                let i = match avail_i {
                    Some(i) => {
                        self.map_change_count += 2;
                        i
                    }
                    None => {
                        // Evict the cheapest entry to free a pool slot.
                        let mut best = 0usize;
                        let mut min_cost = u64::MAX;
                        for (j, entry) in self.log_entries.iter().enumerate() {
                            let cost = if self.datafit(entry) { 0 } else { per };
                            if cost < min_cost {
                                min_cost = cost;
                                best = j;
                            }
                        }
                        self.merge(best)?;
                        self.map_set_count += 2;
                        best
                    }
                };
                let log_blk = self.gc_until_free()?;
                self.log_entries[i].vsblk = Some(vsblk);
                self.log_entries[i].psblk = Some(log_blk);
                i
            }
        };

        let mut log_psblk = self.log_entries[entry_i].psblk.expect("entry is bound");
        let used = {
            let meta = self.sblk_meta[log_psblk as usize];
            meta.ndirty + meta.nabandoned
        };
        if used == per {
            // Log block exhausted: merge it out and start a fresh one.
            self.merge(entry_i)?;
            let fresh = self.gc_until_free()?;
            self.log_entries[entry_i].vsblk = Some(vsblk);
            self.log_entries[entry_i].psblk = Some(fresh);
            log_psblk = fresh;
            self.map_change_count += 2;
        }

        let meta = self.sblk_meta[log_psblk as usize];
        let new_pos = meta.ndirty + meta.nabandoned;
        let new_addr = self.slot_addr(log_psblk, new_pos);
        let new_ppg = self.sb.geo_to_vpg(&new_addr);
        match self.log_entries[entry_i].map[slot] {
            None => {
                self.log_entries[entry_i].map[slot] = Some(new_pos);
                self.sblk_meta[log_psblk as usize].ndirty += 1;
                self.map_set_count += 1;
            }
            Some(old_pos) => {
                let old_plain = geo.vpg(&self.slot_addr(log_psblk, old_pos));
                self.io.state_mut().mark_abandoned(old_plain);
                self.log_entries[entry_i].map[slot] = Some(new_pos);
                self.sblk_meta[log_psblk as usize].nabandoned += 1;
                self.map_change_count += 1;
            }
        }
        Ok(new_ppg)
    }
}

impl<D: NandDevice> Engine for SbLogEngine<D> {
    fn name(&self) -> &'static str {
        "sblog"
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        geo.check_range(offset, out.len() as u64)?;
        for seg in split_range(geo.vpg_size(), offset, out.len() as u64) {
            let slice = &mut out[seg.buf_at..seg.buf_at + seg.len];
            match self.resolve(seg.vpg) {
                Some(mut paddr) => {
                    paddr.in_page = seg.in_page;
                    self.io.read_slice(&paddr, slice)?;
                }
                None => slice.fill(0),
            }
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        geo.check_range(offset, data.len() as u64)?;
        let vpg_size = geo.vpg_size();
        let segs = split_range(vpg_size, offset, data.len() as u64);
        let first = segs[0];
        let last = *segs.last().expect("range is nonempty");

        // Partial endpoints read through the current log-then-data
        // resolver before any allocation moves them.
        if !first.is_full(vpg_size) {
            if self.is_allocated(first.vpg) {
                let paddr = self.resolve(first.vpg).expect("allocated page resolves");
                self.io.read_slice(&paddr, &mut self.begin_pagebuf)?;
            } else {
                self.begin_pagebuf.fill(0);
            }
        }
        if segs.len() > 1 && !last.is_full(vpg_size) {
            if self.is_allocated(last.vpg) {
                let paddr = self.resolve(last.vpg).expect("allocated page resolves");
                self.io.read_slice(&paddr, &mut self.end_pagebuf)?;
            } else {
                self.end_pagebuf.fill(0);
            }
        }

        for (i, seg) in segs.iter().enumerate() {
            let ppg = self.alloc_page(seg.vpg)?;
            let paddr = self.sb.vpg_to_geo(ppg);
            if seg.is_full(vpg_size) {
                self.io
                    .write_page(&paddr, &data[seg.buf_at..seg.buf_at + seg.len])?;
            } else {
                let scratch = if i == 0 {
                    &mut self.begin_pagebuf
                } else {
                    &mut self.end_pagebuf
                };
                let at = seg.in_page as usize;
                scratch[at..at + seg.len].copy_from_slice(&data[seg.buf_at..seg.buf_at + seg.len]);
                self.io.write_page(&paddr, scratch)?;
            }
        }
        Ok(())
    }

    fn counters(&self) -> EngineCounters {
        let counts = self.io.state().counts();
        EngineCounters {
            ndirty: counts.dirty,
            nabandoned: counts.abandoned,
            map_change_count: self.map_change_count,
            map_set_count: self.map_set_count,
            gc_count: self.gc_count,
            gc_time: self.gc_time,
            ..EngineCounters::default()
        }
    }

    fn state(&self) -> &StateTable {
        self.io.state()
    }

    fn heatmap(&self) -> &Heatmap {
        self.io.heatmap()
    }

    fn device_stats(&self) -> DeviceStats {
        self.io.device_stats()
    }
}
