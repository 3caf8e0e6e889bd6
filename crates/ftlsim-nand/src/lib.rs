//! Device primitives: the block-targeted page read/write/erase contract and
//! an in-memory NAND model implementing it.
//!
//! The contract is deliberately low-level and stateful, mirroring how a
//! real Open-Channel target is driven: `set_target` binds a physical block,
//! then page reads and writes move whole pages through a [`BlockBuf`]
//! staging area, and `erase_block` wipes the bound block. The device does
//! no read-before-write merging and no overwrite detection beyond NAND
//! physics: programming an already-programmed page fails until the block is
//! erased.

use std::time::{Duration, Instant};

use ftlsim_geo::{GeoAddr, Geometry};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NandError {
    #[error("no target block bound; call set_target first")]
    NoTarget,
    #[error("target (ch {ch}, lun {lun}, blk {blk}) outside the device geometry")]
    TargetOutOfRange { ch: u64, lun: u64, blk: u64 },
    #[error("page span [{start_pg}, +{npgs}) outside the block ({pages_per_blk} pages)")]
    PageOutOfRange {
        start_pg: u64,
        npgs: u64,
        pages_per_blk: u64,
    },
    #[error("program of already-programmed page {pg} in block (ch {ch}, lun {lun}, blk {blk})")]
    ProgramTwice { ch: u64, lun: u64, blk: u64, pg: u64 },
    #[error("block buffer holds {have} bytes, device block needs {need}")]
    BufferTooSmall { have: usize, need: usize },
}

/// Staging area for one block's worth of page transfers. Reads land in
/// `read_buf` at the page's in-block byte offset; writes are taken from the
/// same offset in `write_buf`.
#[derive(Debug, Clone)]
pub struct BlockBuf {
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
}

impl BlockBuf {
    pub fn for_geometry(geo: &Geometry) -> Self {
        let nbytes = (geo.npgs * geo.vpg_size()) as usize;
        BlockBuf {
            read_buf: vec![0; nbytes],
            write_buf: vec![0; nbytes],
        }
    }

    /// The `pg`-th page slice of the read staging area.
    pub fn read_page(&self, geo: &Geometry, pg: u64) -> &[u8] {
        let vpg_size = geo.vpg_size() as usize;
        let at = pg as usize * vpg_size;
        &self.read_buf[at..at + vpg_size]
    }

    /// The `pg`-th page slice of the write staging area.
    pub fn write_page_mut(&mut self, geo: &Geometry, pg: u64) -> &mut [u8] {
        let vpg_size = geo.vpg_size() as usize;
        let at = pg as usize * vpg_size;
        &mut self.write_buf[at..at + vpg_size]
    }
}

/// Cumulative device-side accounting, sampled after each trace entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub pgs_read: u64,
    pub bytes_read: u64,
    pub pgs_written: u64,
    pub bytes_written: u64,
    pub erased_blks: u64,
    pub read_time: Duration,
    pub write_time: Duration,
    pub erase_time: Duration,
}

pub trait NandDevice {
    fn geometry(&self) -> &Geometry;

    /// Bind the following page and erase operations to one physical block.
    fn set_target(&mut self, ch: u64, lun: u64, blk: u64) -> Result<(), NandError>;

    /// Read `npgs` pages starting at `start_pg` of the bound block into
    /// `buf.read_buf`, each at its in-block offset.
    fn read_pages(&mut self, buf: &mut BlockBuf, npgs: u64, start_pg: u64)
        -> Result<(), NandError>;

    /// Program `npgs` pages starting at `start_pg` of the bound block from
    /// `buf.write_buf`. Fails if any page is already programmed.
    fn write_pages(&mut self, buf: &BlockBuf, npgs: u64, start_pg: u64) -> Result<(), NandError>;

    /// Erase the bound block; its pages read back as zeroes afterwards.
    fn erase_block(&mut self) -> Result<(), NandError>;

    fn stats(&self) -> DeviceStats;
}

/// In-memory NAND: a flat byte array plus a per-page program flag.
#[derive(Debug)]
pub struct MemNand {
    geo: Geometry,
    data: Vec<u8>,
    programmed: Vec<bool>,
    target: Option<GeoAddr>,
    stats: DeviceStats,
}

impl MemNand {
    pub fn new(geo: Geometry) -> Self {
        let total_pages = geo.total_pages() as usize;
        let nbytes = total_pages * geo.vpg_size() as usize;
        MemNand {
            geo,
            data: vec![0; nbytes],
            programmed: vec![false; total_pages],
            target: None,
            stats: DeviceStats::default(),
        }
    }

    fn bound_page(&self, pg: u64) -> Result<u64, NandError> {
        let mut addr = self.target.ok_or(NandError::NoTarget)?;
        addr.pg = pg;
        Ok(self.geo.vpg(&addr))
    }

    fn check_span(&self, buf_len: usize, npgs: u64, start_pg: u64) -> Result<(), NandError> {
        if start_pg + npgs > self.geo.npgs {
            return Err(NandError::PageOutOfRange {
                start_pg,
                npgs,
                pages_per_blk: self.geo.npgs,
            });
        }
        let need = (self.geo.npgs * self.geo.vpg_size()) as usize;
        if buf_len < need {
            return Err(NandError::BufferTooSmall { have: buf_len, need });
        }
        Ok(())
    }

    /// Raw page content, bypassing the target protocol. Test support.
    pub fn page_content(&self, vpg: u64) -> &[u8] {
        let vpg_size = self.geo.vpg_size() as usize;
        let at = vpg as usize * vpg_size;
        &self.data[at..at + vpg_size]
    }

    /// Whether a page is currently programmed. Test support.
    pub fn is_programmed(&self, vpg: u64) -> bool {
        self.programmed[vpg as usize]
    }
}

impl NandDevice for MemNand {
    fn geometry(&self) -> &Geometry {
        &self.geo
    }

    fn set_target(&mut self, ch: u64, lun: u64, blk: u64) -> Result<(), NandError> {
        if ch >= self.geo.nchs || lun >= self.geo.nluns || blk >= self.geo.nblks {
            return Err(NandError::TargetOutOfRange { ch, lun, blk });
        }
        self.target = Some(GeoAddr {
            ch,
            lun,
            blk,
            pg: 0,
            in_page: 0,
        });
        Ok(())
    }

    fn read_pages(&mut self, buf: &mut BlockBuf, npgs: u64, start_pg: u64)
        -> Result<(), NandError> {
        self.check_span(buf.read_buf.len(), npgs, start_pg)?;
        let started = Instant::now();
        let vpg_size = self.geo.vpg_size() as usize;
        for pg in start_pg..start_pg + npgs {
            let vpg = self.bound_page(pg)? as usize;
            let dev = vpg * vpg_size;
            let staged = pg as usize * vpg_size;
            buf.read_buf[staged..staged + vpg_size]
                .copy_from_slice(&self.data[dev..dev + vpg_size]);
        }
        self.stats.pgs_read += npgs;
        self.stats.bytes_read += npgs * self.geo.vpg_size();
        self.stats.read_time += started.elapsed();
        Ok(())
    }

    fn write_pages(&mut self, buf: &BlockBuf, npgs: u64, start_pg: u64) -> Result<(), NandError> {
        self.check_span(buf.write_buf.len(), npgs, start_pg)?;
        let started = Instant::now();
        let vpg_size = self.geo.vpg_size() as usize;
        for pg in start_pg..start_pg + npgs {
            let vpg = self.bound_page(pg)?;
            if self.programmed[vpg as usize] {
                let t = self.target.expect("bound_page checked the target");
                return Err(NandError::ProgramTwice {
                    ch: t.ch,
                    lun: t.lun,
                    blk: t.blk,
                    pg,
                });
            }
            let dev = vpg as usize * vpg_size;
            let staged = pg as usize * vpg_size;
            self.data[dev..dev + vpg_size]
                .copy_from_slice(&buf.write_buf[staged..staged + vpg_size]);
            self.programmed[vpg as usize] = true;
        }
        self.stats.pgs_written += npgs;
        self.stats.bytes_written += npgs * self.geo.vpg_size();
        self.stats.write_time += started.elapsed();
        Ok(())
    }

    fn erase_block(&mut self) -> Result<(), NandError> {
        let started = Instant::now();
        let vpg_size = self.geo.vpg_size() as usize;
        let target = self.target.ok_or(NandError::NoTarget)?;
        trace!(ch = target.ch, lun = target.lun, blk = target.blk, "erase block");
        for pg in 0..self.geo.npgs {
            let vpg = self.bound_page(pg)? as usize;
            let dev = vpg * vpg_size;
            self.data[dev..dev + vpg_size].fill(0);
            self.programmed[vpg] = false;
        }
        self.stats.erased_blks += 1;
        self.stats.erase_time += started.elapsed();
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
