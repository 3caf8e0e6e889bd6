//! Address arithmetic for Open-Channel SSD geometries.
//!
//! A device ("node") is a flat grid of `channels x LUNs x blocks x pages`,
//! with `planes` pages programmed together. The harness works in two linear
//! spaces derived from that grid:
//!
//! * the *virtual page* index (`vpg`), channel-major with the block as the
//!   slowest dimension: `vpg = ch + lun*NC + pg*NC*NL + blk*NC*NL*NP`;
//! * the *virtual block* index (`vblk`): `vblk = ch + lun*NC + blk*NC*NL`.
//!
//! Both encodings are bijective; `decode(encode(x)) == x` for every valid
//! index, and the property tests in this crate prove it over the whole
//! index space. Byte offsets decompose as `vpg = offset / vpg_size` plus an
//! in-page remainder, where `vpg_size = page_nbytes * nplanes`.

use thiserror::Error;

pub mod superblock;

pub use superblock::{LogAddr, SbAddr, SbLayout};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("geometry dimension `{0}` must be nonzero")]
    ZeroDimension(&'static str),
    #[error("byte offset {offset:#x} beyond device capacity {capacity:#x}")]
    OffsetOutOfRange { offset: u64, capacity: u64 },
    #[error("i/o range [{offset:#x}, +{size:#x}) straddles device end (capacity {capacity:#x})")]
    RangeOutOfRange { offset: u64, size: u64, capacity: u64 },
    #[error(
        "superblock shape {sb_pus} PUs x {sb_blks} blocks does not divide \
         the geometry ({npus} PUs, {nblks} blocks per PU)"
    )]
    SuperblockShape {
        sb_pus: u64,
        sb_blks: u64,
        npus: u64,
        nblks: u64,
    },
}

/// One location in the geometry grid, down to a byte inside a virtual page.
///
/// Addresses produced by index decoding always carry `in_page == 0`; only
/// byte-offset decomposition yields a nonzero remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoAddr {
    pub ch: u64,
    pub lun: u64,
    pub blk: u64,
    pub pg: u64,
    pub in_page: u64,
}

/// Immutable device shape, fixed at harness start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub nchs: u64,
    pub nluns: u64,
    pub nblks: u64,
    pub npgs: u64,
    pub nplanes: u64,
    pub page_nbytes: u64,
}

impl Geometry {
    pub fn new(
        nchs: u64,
        nluns: u64,
        nblks: u64,
        npgs: u64,
        nplanes: u64,
        page_nbytes: u64,
    ) -> Result<Self, GeoError> {
        let geo = Geometry {
            nchs,
            nluns,
            nblks,
            npgs,
            nplanes,
            page_nbytes,
        };
        for (dim, value) in [
            ("nchs", nchs),
            ("nluns", nluns),
            ("nblks", nblks),
            ("npgs", npgs),
            ("nplanes", nplanes),
            ("page_nbytes", page_nbytes),
        ] {
            if value == 0 {
                return Err(GeoError::ZeroDimension(dim));
            }
        }
        Ok(geo)
    }

    /// Bytes in one virtual page (all planes of one page).
    pub fn vpg_size(&self) -> u64 {
        self.page_nbytes * self.nplanes
    }

    /// Parallel units: one per `(channel, LUN)` pair.
    pub fn npus(&self) -> u64 {
        self.nchs * self.nluns
    }

    pub fn total_pages(&self) -> u64 {
        self.nchs * self.nluns * self.nblks * self.npgs
    }

    pub fn total_blocks(&self) -> u64 {
        self.nchs * self.nluns * self.nblks
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.total_pages() * self.vpg_size()
    }

    /// Linear PU index of an address: `ch + lun*NC`.
    pub fn pu_of(&self, addr: &GeoAddr) -> u64 {
        addr.ch + addr.lun * self.nchs
    }

    /// Encode an address into its virtual page index. Ignores `in_page`.
    pub fn vpg(&self, addr: &GeoAddr) -> u64 {
        debug_assert!(self.contains(addr));
        addr.ch
            + addr.lun * self.nchs
            + addr.pg * self.nchs * self.nluns
            + addr.blk * self.nchs * self.nluns * self.npgs
    }

    /// Encode an address into its virtual block index. Ignores `pg` and `in_page`.
    pub fn vblk(&self, addr: &GeoAddr) -> u64 {
        debug_assert!(self.contains(addr));
        addr.ch + addr.lun * self.nchs + addr.blk * self.nchs * self.nluns
    }

    /// Decode a virtual page index. The result is page-aligned.
    pub fn vpg_addr(&self, vpg: u64) -> GeoAddr {
        debug_assert!(vpg < self.total_pages(), "vpg {vpg} out of range");
        let b_chs = self.nchs;
        let b_luns = self.nluns * b_chs;
        let b_pgs = self.npgs * b_luns;
        GeoAddr {
            ch: vpg % b_chs,
            lun: vpg / b_chs % self.nluns,
            pg: vpg / b_luns % self.npgs,
            blk: vpg / b_pgs % self.nblks,
            in_page: 0,
        }
    }

    /// Decode a virtual block index. The result is block-aligned (`pg == 0`).
    pub fn vblk_addr(&self, vblk: u64) -> GeoAddr {
        debug_assert!(vblk < self.total_blocks(), "vblk {vblk} out of range");
        let b_chs = self.nchs;
        let b_luns = self.nluns * b_chs;
        GeoAddr {
            ch: vblk % b_chs,
            lun: vblk / b_chs % self.nluns,
            blk: vblk / b_luns % self.nblks,
            pg: 0,
            in_page: 0,
        }
    }

    /// Containing virtual block of a virtual page.
    pub fn vblk_of_vpg(&self, vpg: u64) -> u64 {
        self.vblk(&self.vpg_addr(vpg))
    }

    /// First virtual page of a virtual block.
    pub fn vpg_of_vblk(&self, vblk: u64) -> u64 {
        self.vpg(&self.vblk_addr(vblk))
    }

    /// Decompose a device byte offset into a geometry address.
    pub fn byte_addr(&self, offset: u64) -> Result<GeoAddr, GeoError> {
        let capacity = self.capacity_bytes();
        if offset >= capacity {
            return Err(GeoError::OffsetOutOfRange { offset, capacity });
        }
        let vpg_size = self.vpg_size();
        let mut addr = self.vpg_addr(offset / vpg_size);
        addr.in_page = offset % vpg_size;
        Ok(addr)
    }

    /// Validate an inclusive byte range `[offset, offset + size - 1]`.
    pub fn check_range(&self, offset: u64, size: u64) -> Result<(), GeoError> {
        let capacity = self.capacity_bytes();
        if size == 0
            || offset
                .checked_add(size)
                .map(|end| end > capacity)
                .unwrap_or(true)
        {
            return Err(GeoError::RangeOutOfRange {
                offset,
                size,
                capacity,
            });
        }
        Ok(())
    }

    fn contains(&self, addr: &GeoAddr) -> bool {
        addr.ch < self.nchs && addr.lun < self.nluns && addr.blk < self.nblks && addr.pg < self.npgs
    }
}
