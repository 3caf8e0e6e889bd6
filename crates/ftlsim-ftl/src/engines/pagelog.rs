//! Page-level log-structured policy with greedy garbage collection.
//!
//! Writes never overwrite: the old physical page is abandoned and a fresh
//! clean page is appended to some PU's active block, with a round-robin
//! cursor spreading appends across PUs. When no clean capacity remains,
//! GC picks the non-empty block with the fewest live pages, relocates
//! those pages, and erases it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ftlsim_nand::{DeviceStats, NandDevice};
use tracing::debug;

use crate::engine::{Engine, EngineCounters};
use crate::meta::{Heatmap, PageState, StateTable};
use crate::pageio::PageIo;
use crate::segment::split_range;
use crate::FtlError;

#[derive(Debug, Clone, Copy, Default)]
struct BlkMeta {
    ndirty: u64,
    nabandoned: u64,
}

/// Per-PU block pools. A block is `empty` (fully clean), `active` (the
/// PU's append point), or `non_empty` (fully used, awaiting GC).
#[derive(Debug, Default)]
struct PuLists {
    empty: VecDeque<u64>,
    non_empty: VecDeque<u64>,
    active: Option<u64>,
}

pub struct PageLogEngine<D> {
    io: PageIo<D>,
    vpg_map: Vec<Option<u64>>,
    ppg_map: Vec<Option<u64>>,
    blk_meta: Vec<BlkMeta>,
    pus: Vec<PuLists>,
    next_pu: u64,
    begin_pagebuf: Vec<u8>,
    end_pagebuf: Vec<u8>,
    gc_pagebuf: Vec<u8>,
    gc_saved_vpgs: Vec<u64>,
    map_change_count: u64,
    map_set_count: u64,
    gc_count: u64,
    gc_time: Duration,
    gc_map_change_count: u64,
}

impl<D: NandDevice> PageLogEngine<D> {
    pub fn new(dev: D) -> Self {
        let io = PageIo::new(dev);
        let geo = *io.geometry();
        let vpg_size = geo.vpg_size() as usize;
        let npus = geo.npus();
        let pus = (0..npus)
            .map(|pu| PuLists {
                empty: (0..geo.nblks).map(|blk| pu + blk * npus).collect(),
                ..PuLists::default()
            })
            .collect();
        PageLogEngine {
            vpg_map: vec![None; geo.total_pages() as usize],
            ppg_map: vec![None; geo.total_pages() as usize],
            blk_meta: vec![BlkMeta::default(); geo.total_blocks() as usize],
            pus,
            next_pu: 0,
            begin_pagebuf: vec![0; vpg_size],
            end_pagebuf: vec![0; vpg_size],
            gc_pagebuf: vec![0; geo.npgs as usize * vpg_size],
            gc_saved_vpgs: vec![0; geo.npgs as usize],
            map_change_count: 0,
            map_set_count: 0,
            gc_count: 0,
            gc_time: Duration::ZERO,
            gc_map_change_count: 0,
            io,
        }
    }

    pub fn io(&self) -> &PageIo<D> {
        &self.io
    }

    /// Current physical page of a virtual page, if mapped.
    pub fn mapping(&self, vpg: u64) -> Option<u64> {
        self.vpg_map[vpg as usize]
    }

    /// Virtual page currently stored at a physical page, if any.
    pub fn reverse_mapping(&self, ppg: u64) -> Option<u64> {
        self.ppg_map[ppg as usize]
    }

    /// Drop `vpg`'s current mapping, marking the old physical page stale.
    /// Returns whether a mapping existed.
    fn abandon_current(&mut self, vpg: u64) -> bool {
        let Some(old_ppg) = self.vpg_map[vpg as usize].take() else {
            return false;
        };
        self.ppg_map[old_ppg as usize] = None;
        self.io.state_mut().mark_abandoned(old_ppg);
        let vblk = self.io.geometry().vblk_of_vpg(old_ppg);
        let meta = &mut self.blk_meta[vblk as usize];
        meta.ndirty -= 1;
        meta.nabandoned += 1;
        true
    }

    /// Map `vpg` to the next append position. `None` when no PU has an
    /// active or empty block (caller runs GC and retries).
    fn allocate(&mut self, vpg: u64) -> Option<u64> {
        let geo = *self.io.geometry();
        let was_mapped = self.abandon_current(vpg);

        // Linear scan from the cursor: the first PU with an append point
        // (an active block, or an empty block to promote) takes the write.
        let npus = self.pus.len() as u64;
        let mut chosen = None;
        for i in 0..npus {
            let pu = ((self.next_pu + i) % npus) as usize;
            if self.pus[pu].active.is_some() {
                chosen = Some(pu);
                break;
            }
            if let Some(blk) = self.pus[pu].empty.pop_front() {
                self.pus[pu].active = Some(blk);
                chosen = Some(pu);
                break;
            }
        }
        let pu = chosen?;
        self.next_pu = (pu as u64 + 1) % npus;

        let blk = self.pus[pu].active.expect("chosen PU has an active block");
        let meta = self.blk_meta[blk as usize];
        let mut addr = geo.vblk_addr(blk);
        addr.pg = meta.ndirty + meta.nabandoned;
        let ppg = geo.vpg(&addr);

        self.vpg_map[vpg as usize] = Some(ppg);
        self.ppg_map[ppg as usize] = Some(vpg);
        if was_mapped {
            self.map_change_count += 1;
        } else {
            self.map_set_count += 1;
        }
        let meta = &mut self.blk_meta[blk as usize];
        meta.ndirty += 1;
        if meta.ndirty + meta.nabandoned == geo.npgs {
            self.pus[pu].active = None;
            self.pus[pu].non_empty.push_back(blk);
        }
        Some(ppg)
    }

    /// One GC round: abandon the pages the caller is about to overwrite,
    /// then recycle the non-empty block with the fewest live pages.
    fn gc(&mut self, hint: Option<(u64, u64)>) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        if self.io.state().counts().clean == geo.total_pages() {
            return Ok(());
        }
        let started = Instant::now();

        if let Some((begin, end)) = hint {
            for vpg in begin..=end {
                self.abandon_current(vpg);
            }
        }

        let npus = self.pus.len() as u64;
        let mut victim: Option<(usize, usize, u64)> = None;
        let mut min_dirty = geo.npgs;
        for i in 0..npus {
            let pu = ((self.next_pu + i) % npus) as usize;
            for (pos, &blk) in self.pus[pu].non_empty.iter().enumerate() {
                if self.blk_meta[blk as usize].ndirty < min_dirty {
                    min_dirty = self.blk_meta[blk as usize].ndirty;
                    victim = Some((pu, pos, blk));
                }
            }
        }

        if let Some((pu, pos, blk)) = victim {
            let vpg_size = geo.vpg_size() as usize;
            let mut addr = geo.vblk_addr(blk);
            let mut saved = 0usize;
            for pg in 0..geo.npgs {
                addr.pg = pg;
                let ppg = geo.vpg(&addr);
                if self.io.state().page(ppg) == PageState::Dirty {
                    let at = saved * vpg_size;
                    self.io
                        .read_slice(&addr, &mut self.gc_pagebuf[at..at + vpg_size])?;
                    let vpg = self.ppg_map[ppg as usize]
                        .take()
                        .expect("live page has a reverse mapping");
                    self.vpg_map[vpg as usize] = None;
                    self.gc_saved_vpgs[saved] = vpg;
                    saved += 1;
                }
            }
            debug!(vblk = blk, live = saved, "recycling gc victim");
            addr.pg = 0;
            self.io.erase_block(&addr)?;
            self.blk_meta[blk as usize] = BlkMeta::default();
            let _ = self.pus[pu].non_empty.remove(pos);
            self.pus[pu].empty.push_back(blk);

            for k in 0..saved {
                let vpg = self.gc_saved_vpgs[k];
                let ppg = self.allocate(vpg).ok_or(FtlError::OutOfCapacity)?;
                let paddr = geo.vpg_addr(ppg);
                let at = k * vpg_size;
                self.io
                    .write_page(&paddr, &self.gc_pagebuf[at..at + vpg_size])?;
            }
            self.gc_map_change_count += saved as u64;
        }

        self.gc_count += 1;
        self.gc_time += started.elapsed();
        Ok(())
    }

    /// Allocate, collecting garbage until a page frees up; fails once GC
    /// stops making progress.
    fn alloc_gc(&mut self, vpg: u64, hint: Option<(u64, u64)>) -> Result<u64, FtlError> {
        if let Some(ppg) = self.allocate(vpg) {
            return Ok(ppg);
        }
        loop {
            let before = self.io.state().counts().clean;
            self.gc(hint)?;
            if let Some(ppg) = self.allocate(vpg) {
                return Ok(ppg);
            }
            if self.io.state().counts().clean <= before {
                return Err(FtlError::OutOfCapacity);
            }
        }
    }
}

impl<D: NandDevice> Engine for PageLogEngine<D> {
    fn name(&self) -> &'static str {
        "pagelog"
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        geo.check_range(offset, out.len() as u64)?;
        for seg in split_range(geo.vpg_size(), offset, out.len() as u64) {
            let slice = &mut out[seg.buf_at..seg.buf_at + seg.len];
            match self.vpg_map[seg.vpg as usize] {
                Some(ppg) => {
                    let mut paddr = geo.vpg_addr(ppg);
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

        // Endpoint pre-reads must use the pre-GC mapping: GC below may
        // abandon these pages.
        if !first.is_full(vpg_size) {
            if let Some(ppg) = self.vpg_map[first.vpg as usize] {
                let paddr = geo.vpg_addr(ppg);
                self.io.read_slice(&paddr, &mut self.begin_pagebuf)?;
            } else {
                self.begin_pagebuf.fill(0);
            }
        }
        if segs.len() > 1 && !last.is_full(vpg_size) {
            if let Some(ppg) = self.vpg_map[last.vpg as usize] {
                let paddr = geo.vpg_addr(ppg);
                self.io.read_slice(&paddr, &mut self.end_pagebuf)?;
            } else {
                self.end_pagebuf.fill(0);
            }
        }

        let needed = segs.len() as u64;
        while self.io.state().counts().clean < needed {
            let before = self.io.state().counts().clean;
            self.gc(Some((first.vpg, last.vpg)))?;
            if self.io.state().counts().clean <= before {
                return Err(FtlError::OutOfCapacity);
            }
        }

        for (i, seg) in segs.iter().enumerate() {
            let hint = if i == 0 {
                Some((first.vpg, last.vpg))
            } else {
                None
            };
            let ppg = self.alloc_gc(seg.vpg, hint)?;
            let paddr = geo.vpg_addr(ppg);
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
            gc_map_change_count: self.gc_map_change_count,
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
