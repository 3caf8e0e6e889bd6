//! In-place policy: data lives at its home page; an overwrite of used
//! pages forces a read-modify-erase-rewrite of the whole block.

use ftlsim_nand::{DeviceStats, NandDevice};
use tracing::debug;

use crate::engine::{Engine, EngineCounters};
use crate::meta::{BlockState, Heatmap, PageState, StateTable};
use crate::pageio::PageIo;
use crate::segment::split_range;
use crate::FtlError;

pub struct InplaceEngine<D> {
    io: PageIo<D>,
    begin_pagebuf: Vec<u8>,
    end_pagebuf: Vec<u8>,
    /// Staging for pages preserved across a block erase, one slot per
    /// in-block page index.
    blockbuf: Vec<u8>,
    saved_states: Vec<PageState>,
    visited_blks: Vec<bool>,
}

impl<D: NandDevice> InplaceEngine<D> {
    pub fn new(dev: D) -> Self {
        let io = PageIo::new(dev);
        let geo = *io.geometry();
        let vpg_size = geo.vpg_size() as usize;
        InplaceEngine {
            begin_pagebuf: vec![0; vpg_size],
            end_pagebuf: vec![0; vpg_size],
            blockbuf: vec![0; geo.npgs as usize * vpg_size],
            saved_states: vec![PageState::Clean; geo.npgs as usize],
            visited_blks: vec![false; geo.total_blocks() as usize],
            io,
        }
    }

    pub fn io(&self) -> &PageIo<D> {
        &self.io
    }

    /// Erase (and partially restore) every block whose covered page span
    /// holds used pages, so the later writes land on clean pages.
    fn erase_covered_blocks(&mut self, first_vpg: u64, last_vpg: u64) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        let vpg_size = geo.vpg_size() as usize;
        let stride = geo.nchs * geo.nluns;

        self.visited_blks.fill(false);
        for vpg in first_vpg..=last_vpg {
            let addr = geo.vpg_addr(vpg);
            let vblk = geo.vblk(&addr);
            if std::mem::replace(&mut self.visited_blks[vblk as usize], true) {
                continue;
            }
            if self.io.state().block(vblk) == BlockState::Clean {
                continue;
            }
            // Covered in-block page span: contiguous because the vpg range
            // is contiguous and pages are a faster dimension than blocks.
            let begin_pg = addr.pg;
            let end_pg = (addr.pg + (last_vpg - vpg) / stride).min(geo.npgs - 1);

            let mut page = addr;
            let mut covered_dirty = false;
            for pg in begin_pg..=end_pg {
                page.pg = pg;
                if self.io.state().page(geo.vpg(&page)) == PageState::Dirty {
                    covered_dirty = true;
                    break;
                }
            }
            if !covered_dirty {
                // The span lands on clean pages only; write straight in.
                continue;
            }

            for pg in 0..geo.npgs {
                page.pg = pg;
                let state = self.io.state().page(geo.vpg(&page));
                self.saved_states[pg as usize] = state;
                if (pg < begin_pg || pg > end_pg) && state == PageState::Dirty {
                    let at = pg as usize * vpg_size;
                    self.io
                        .read_slice(&page, &mut self.blockbuf[at..at + vpg_size])?;
                }
            }
            debug!(vblk, begin_pg, end_pg, "erasing block for overwrite");
            page.pg = 0;
            self.io.erase_block(&page)?;
            for pg in 0..geo.npgs {
                if (pg < begin_pg || pg > end_pg)
                    && self.saved_states[pg as usize] == PageState::Dirty
                {
                    page.pg = pg;
                    let at = pg as usize * vpg_size;
                    self.io.write_page(&page, &self.blockbuf[at..at + vpg_size])?;
                }
            }
        }
        Ok(())
    }
}

impl<D: NandDevice> Engine for InplaceEngine<D> {
    fn name(&self) -> &'static str {
        "inplace"
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), FtlError> {
        let geo = *self.io.geometry();
        geo.check_range(offset, out.len() as u64)?;
        for seg in split_range(geo.vpg_size(), offset, out.len() as u64) {
            let mut addr = geo.vpg_addr(seg.vpg);
            addr.in_page = seg.in_page;
            self.io
                .read_slice(&addr, &mut out[seg.buf_at..seg.buf_at + seg.len])?;
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

        // Preserve the unwritten bytes of partial endpoints before the
        // erase pass; cold endpoints merge against zeroes instead.
        if !first.is_full(vpg_size) {
            if self.io.state().page(first.vpg) == PageState::Dirty {
                let addr = geo.vpg_addr(first.vpg);
                self.io.read_slice(&addr, &mut self.begin_pagebuf)?;
            } else {
                self.begin_pagebuf.fill(0);
            }
        }
        if segs.len() > 1 && !last.is_full(vpg_size) {
            if self.io.state().page(last.vpg) == PageState::Dirty {
                let addr = geo.vpg_addr(last.vpg);
                self.io.read_slice(&addr, &mut self.end_pagebuf)?;
            } else {
                self.end_pagebuf.fill(0);
            }
        }

        self.erase_covered_blocks(first.vpg, last.vpg)?;

        for (i, seg) in segs.iter().enumerate() {
            let addr = geo.vpg_addr(seg.vpg);
            if seg.is_full(vpg_size) {
                self.io
                    .write_page(&addr, &data[seg.buf_at..seg.buf_at + seg.len])?;
            } else {
                let scratch = if i == 0 {
                    &mut self.begin_pagebuf
                } else {
                    &mut self.end_pagebuf
                };
                let at = seg.in_page as usize;
                scratch[at..at + seg.len].copy_from_slice(&data[seg.buf_at..seg.buf_at + seg.len]);
                self.io.write_page(&addr, scratch)?;
            }
        }
        Ok(())
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
