//! The page I/O wrapper: every engine's only path to the device.
//!
//! Reads may cover any byte slice inside one virtual page. Writes must
//! cover exactly one whole page and may only hit a `Clean` page — engines
//! pre-stage partial writes by reading the old content into a scratch
//! page, merging, and writing the full page. Both rules are load-bearing:
//! relaxing either would hide engine bugs that real NAND would reject.

use ftlsim_geo::{GeoAddr, Geometry};
use ftlsim_nand::{BlockBuf, DeviceStats, NandDevice};

use crate::meta::{BlockState, Heatmap, PageState, StateTable};
use crate::FtlError;

#[derive(Debug)]
pub struct PageIo<D> {
    dev: D,
    geo: Geometry,
    state: StateTable,
    heatmap: Heatmap,
    staging: BlockBuf,
}

impl<D: NandDevice> PageIo<D> {
    pub fn new(dev: D) -> Self {
        let geo = *dev.geometry();
        PageIo {
            state: StateTable::new(geo),
            heatmap: Heatmap::new(&geo),
            staging: BlockBuf::for_geometry(&geo),
            geo,
            dev,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn state(&self) -> &StateTable {
        &self.state
    }

    /// Direct state access for policy bookkeeping (abandoning pages).
    pub fn state_mut(&mut self) -> &mut StateTable {
        &mut self.state
    }

    pub fn heatmap(&self) -> &Heatmap {
        &self.heatmap
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.dev.stats()
    }

    /// Read `out.len()` bytes starting at `addr` (page + in-page offset).
    pub fn read_slice(&mut self, addr: &GeoAddr, out: &mut [u8]) -> Result<(), FtlError> {
        let vpg_size = self.geo.vpg_size();
        if addr.in_page + out.len() as u64 > vpg_size {
            return Err(FtlError::SliceOutOfPage {
                in_page: addr.in_page,
                len: out.len(),
                vpg_size,
            });
        }
        self.dev.set_target(addr.ch, addr.lun, addr.blk)?;
        self.dev.read_pages(&mut self.staging, 1, addr.pg)?;
        let page = self.staging.read_page(&self.geo, addr.pg);
        let at = addr.in_page as usize;
        out.copy_from_slice(&page[at..at + out.len()]);
        self.heatmap.record_read(self.geo.vpg(addr));
        Ok(())
    }

    /// Program one whole page. `addr` must be page-aligned and `data` must
    /// be exactly one virtual page.
    pub fn write_page(&mut self, addr: &GeoAddr, data: &[u8]) -> Result<(), FtlError> {
        let vpg_size = self.geo.vpg_size();
        let vpg = self.geo.vpg(addr);
        if addr.in_page != 0 || data.len() as u64 != vpg_size {
            return Err(FtlError::PartialPageWrite {
                vpg,
                in_page: addr.in_page,
                len: data.len(),
                vpg_size,
            });
        }
        let state = self.state.page(vpg);
        if state != PageState::Clean {
            return Err(FtlError::RewriteWithoutErase { vpg, state });
        }
        self.staging.write_page_mut(&self.geo, addr.pg).copy_from_slice(data);
        self.dev.set_target(addr.ch, addr.lun, addr.blk)?;
        self.dev.write_pages(&self.staging, 1, addr.pg)?;
        self.state.mark_dirty(vpg);
        self.heatmap.record_write(vpg);
        Ok(())
    }

    /// Erase the block containing `addr`; every page in it reads as zeroes
    /// afterwards and is programmable again.
    pub fn erase_block(&mut self, addr: &GeoAddr) -> Result<(), FtlError> {
        self.dev.set_target(addr.ch, addr.lun, addr.blk)?;
        self.dev.erase_block()?;
        let vblk = self.geo.vblk(addr);
        self.state.reset_block(vblk);
        let mut page = self.geo.vblk_addr(vblk);
        for pg in 0..self.geo.npgs {
            page.pg = pg;
            self.heatmap.record_erase(self.geo.vpg(&page));
        }
        Ok(())
    }

    /// Whether the block containing `addr` holds any used page.
    pub fn block_dirty(&self, addr: &GeoAddr) -> bool {
        self.state.block(self.geo.vblk(addr)) == BlockState::Dirty
    }
}
