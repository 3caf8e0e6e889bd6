//! Superblock policy with realloc-on-write.
//!
//! Mapping granularity is a whole superblock. A write that lands on
//! still-live pages of a mapped superblock migrates every surviving page
//! to a fresh physical superblock and rebinds the map; with no free
//! superblock anywhere the old one is erased in place and rewritten.
//! Orphaned superblocks (zero live pages) are swept up by an end-of-request
//! GC pass over the outer-PU pools.

use std::collections::VecDeque;

use ftlsim_geo::{GeoAddr, LogAddr, SbLayout};
use ftlsim_nand::{DeviceStats, NandDevice};
use tracing::debug;

use crate::engine::{Engine, EngineCounters};
use crate::meta::{Heatmap, PageState, StateTable};
use crate::pageio::PageIo;
use crate::segment::split_range;
use crate::FtlError;

#[derive(Debug, Default)]
struct OuterLists {
    empty: VecDeque<u64>,
    non_empty: VecDeque<u64>,
}

#[derive(Debug)]
pub struct SbMapEngine<D> {
    io: PageIo<D>,
    sb: SbLayout,
    vsblk_map: Vec<Option<u64>>,
    psblk_map: Vec<Option<u64>>,
    sblk_ndirty: Vec<u64>,
    mpus: Vec<OuterLists>,
    next_mpu: u64,
    sb_pagebuf: Vec<u8>,
    sb_saved_slots: Vec<u64>,
    begin_pagebuf: Vec<u8>,
    end_pagebuf: Vec<u8>,
}

impl<D: NandDevice> SbMapEngine<D> {
    pub fn new(dev: D, sb_pus: u64, sb_blks: u64) -> Result<Self, FtlError> {
        let io = PageIo::new(dev);
        let geo = *io.geometry();
        let sb = SbLayout::new(geo, sb_pus, sb_blks)?;
        debug!(
            sb_pus,
            sb_blks,
            total = sb.total_sblks(),
            "superblock layout"
        );
        let vpg_size = geo.vpg_size() as usize;
        let total = sb.total_sblks();
        let outer_pus = sb.outer_pus();
        let mpus = (0..outer_pus)
            .map(|opu| OuterLists {
                empty: (0..sb.outer_blks()).map(|ob| opu + ob * outer_pus).collect(),
                ..OuterLists::default()
            })
            .collect();
        Ok(SbMapEngine {
            vsblk_map: vec![None; total as usize],
            psblk_map: vec![None; total as usize],
            sblk_ndirty: vec![0; total as usize],
            mpus,
            next_mpu: 0,
            sb_pagebuf: vec![0; sb.pages_per_sblk() as usize * vpg_size],
            sb_saved_slots: vec![0; sb.pages_per_sblk() as usize],
            begin_pagebuf: vec![0; vpg_size],
            end_pagebuf: vec![0; vpg_size],
            sb,
            io,
        })
    }

    pub fn io(&self) -> &PageIo<D> {
        &self.io
    }

    /// Physical superblock bound to a virtual one, if any.
    pub fn mapping(&self, vsblk: u64) -> Option<u64> {
        self.vsblk_map[vsblk as usize]
    }

    fn slot_addr(&self, psblk: u64, slot: u64) -> GeoAddr {
        self.sb.log_to_geo(&LogAddr {
            sblk: psblk,
            pg: slot,
            in_page: 0,
        })
    }

    /// Physical page-aligned address of a superblock-linear virtual page.
    fn resolve(&self, vpg: u64) -> Option<GeoAddr> {
        let per = self.sb.pages_per_sblk();
        let psblk = self.vsblk_map[(vpg / per) as usize]?;
        Some(self.slot_addr(psblk, vpg % per))
    }

    fn is_allocated(&self, vpg: u64) -> bool {
        match self.resolve(vpg) {
            None => false,
            Some(paddr) => {
                self.io.state().page(self.io.geometry().vpg(&paddr)) != PageState::Clean
            }
        }
    }

    /// Pop the first empty superblock found from the cursor onwards; it
    /// moves to its own outer PU's non-empty pool.
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

    /// Erase every dirty block of a physical superblock.
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

    /// Sweep every outer PU, recycling superblocks with no live pages.
    fn gc_sweep(&mut self) -> Result<(), FtlError> {
        let outer = self.mpus.len() as u64;
        for i in 0..outer {
            let mpu = ((self.next_mpu + i) % outer) as usize;
            let mut pos = 0;
            while pos < self.mpus[mpu].non_empty.len() {
                let sblk = self.mpus[mpu].non_empty[pos];
                if self.sblk_ndirty[sblk as usize] == 0 {
                    let _ = self.mpus[mpu].non_empty.remove(pos);
                    self.erase_sb(sblk)?;
                    self.mpus[mpu].empty.push_back(sblk);
                } else {
                    pos += 1;
                }
            }
        }
        Ok(())
    }

    /// Re-home every superblock the covered range rewrites, superblock by
    /// superblock (the range is contiguous in superblock-linear space).
    fn realloc_range(&mut self, vpg_begin: u64, vpg_end: u64) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        let vpg_size = geo.vpg_size() as usize;
        let per = self.sb.pages_per_sblk();
        let mut fst = vpg_begin;
        while fst <= vpg_end {
            let vsblk = fst / per;
            let lst = vpg_end.min((vsblk + 1) * per - 1);
            let covered = lst - fst + 1;
            match self.vsblk_map[vsblk as usize] {
                Some(psblk) => {
                    let mut rewrites = 0u64;
                    for vpg in fst..=lst {
                        let plain = geo.vpg(&self.slot_addr(psblk, vpg % per));
                        if self.io.state().page(plain) == PageState::Dirty {
                            self.io.state_mut().mark_abandoned(plain);
                            rewrites += 1;
                        }
                    }
                    if rewrites == 0 {
                        self.sblk_ndirty[psblk as usize] += covered;
                        fst = lst + 1;
                        continue;
                    }
                    debug!(vsblk, psblk, rewrites, "superblock rewrite");
                    let target = self.take_free_sblk();
                    let mut saved = 0usize;
                    for slot in 0..per {
                        let paddr = self.slot_addr(psblk, slot);
                        if self.io.state().page(geo.vpg(&paddr)) == PageState::Dirty {
                            let at = saved * vpg_size;
                            self.io
                                .read_slice(&paddr, &mut self.sb_pagebuf[at..at + vpg_size])?;
                            self.sb_saved_slots[saved] = slot;
                            saved += 1;
                        }
                    }
                    match target {
                        Some(new_psblk) => {
                            for k in 0..saved {
                                let slot = self.sb_saved_slots[k];
                                let dst = self.slot_addr(new_psblk, slot);
                                let at = k * vpg_size;
                                self.io
                                    .write_page(&dst, &self.sb_pagebuf[at..at + vpg_size])?;
                                // The migrated-from copy is stale now.
                                let old = geo.vpg(&self.slot_addr(psblk, slot));
                                self.io.state_mut().mark_abandoned(old);
                            }
                            self.sblk_ndirty[new_psblk as usize] = saved as u64 + covered;
                            self.sblk_ndirty[psblk as usize] = 0;
                            self.vsblk_map[vsblk as usize] = Some(new_psblk);
                            self.psblk_map[new_psblk as usize] = Some(vsblk);
                            self.psblk_map[psblk as usize] = None;
                        }
                        None => {
                            // Nothing free anywhere: recycle in place, no remap.
                            self.erase_sb(psblk)?;
                            for k in 0..saved {
                                let dst = self.slot_addr(psblk, self.sb_saved_slots[k]);
                                let at = k * vpg_size;
                                self.io
                                    .write_page(&dst, &self.sb_pagebuf[at..at + vpg_size])?;
                            }
                            self.sblk_ndirty[psblk as usize] = saved as u64 + covered;
                        }
                    }
                }
                None => {
                    // GC runs at end-of-request only; nothing recycles
                    // orphans mid-request, so an empty free list is fatal.
                    let new_psblk = self.take_free_sblk().ok_or(FtlError::OutOfCapacity)?;
                    self.sblk_ndirty[new_psblk as usize] = covered;
                    self.vsblk_map[vsblk as usize] = Some(new_psblk);
                    self.psblk_map[new_psblk as usize] = Some(vsblk);
                }
            }
            fst = lst + 1;
        }
        Ok(())
    }
}

impl<D: NandDevice> Engine for SbMapEngine<D> {
    fn name(&self) -> &'static str {
        "sbmap"
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

        // Partial endpoints read through the pre-realloc mapping.
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

        self.realloc_range(first.vpg, last.vpg)?;

        for (i, seg) in segs.iter().enumerate() {
            let paddr = self.resolve(seg.vpg).expect("realloc bound the range");
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

        self.gc_sweep()
    }

    fn counters(&self) -> EngineCounters {
        let counts = self.io.state().counts();
        EngineCounters {
            ndirty: counts.dirty,
            nabandoned: counts.abandoned,
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
