//! Superblock coordinates.
//!
//! A *superblock* groups `sb_pus` consecutive parallel units by `sb_blks`
//! consecutive blocks into one allocation/erase unit. Coordinates split
//! each geometry axis into an outer part (which superblock) and an inner
//! part (where inside it):
//!
//! * `outer_pu = pu / sb_pus`, `inner_pu = pu % sb_pus`;
//! * `outer_blk = blk / sb_blks`, `inner_blk = blk % sb_blks`.
//!
//! The superblock engines also linearize virtual pages in superblock-major
//! order (inner PU fastest, then page, then inner block, then outer PU,
//! then outer block), so that one superblock's pages are contiguous: a
//! page's superblock is `vpg / pages_per_sblk` and its in-superblock slot
//! is `vpg % pages_per_sblk`. `LogAddr` names a page by that
//! `(superblock, slot)` pair.

use crate::{GeoAddr, GeoError, Geometry};

/// Superblock-relative location of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbAddr {
    pub outer_pu: u64,
    pub outer_blk: u64,
    pub inner_pu: u64,
    pub inner_blk: u64,
    pub pg: u64,
    pub in_page: u64,
}

/// A page named by its superblock index and in-superblock slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAddr {
    pub sblk: u64,
    pub pg: u64,
    pub in_page: u64,
}

/// Superblock shape over a concrete geometry. Validated once at engine
/// start; all conversions below assume the shape divides the geometry.
#[derive(Debug, Clone, Copy)]
pub struct SbLayout {
    geo: Geometry,
    sb_pus: u64,
    sb_blks: u64,
}

impl SbLayout {
    pub fn new(geo: Geometry, sb_pus: u64, sb_blks: u64) -> Result<Self, GeoError> {
        let npus = geo.npus();
        let bad_pus = sb_pus == 0 || sb_pus > npus || npus % sb_pus != 0;
        let bad_blks = sb_blks == 0 || sb_blks > geo.nblks || geo.nblks % sb_blks != 0;
        if bad_pus || bad_blks {
            return Err(GeoError::SuperblockShape {
                sb_pus,
                sb_blks,
                npus,
                nblks: geo.nblks,
            });
        }
        Ok(SbLayout { geo, sb_pus, sb_blks })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn sb_pus(&self) -> u64 {
        self.sb_pus
    }

    pub fn sb_blks(&self) -> u64 {
        self.sb_blks
    }

    /// Rows of superblocks across the PU axis ("m-PUs").
    pub fn outer_pus(&self) -> u64 {
        self.geo.npus() / self.sb_pus
    }

    pub fn outer_blks(&self) -> u64 {
        self.geo.nblks / self.sb_blks
    }

    pub fn total_sblks(&self) -> u64 {
        self.outer_pus() * self.outer_blks()
    }

    pub fn blks_per_sblk(&self) -> u64 {
        self.sb_pus * self.sb_blks
    }

    pub fn pages_per_sblk(&self) -> u64 {
        self.blks_per_sblk() * self.geo.npgs
    }

    pub fn to_geo(&self, addr: &SbAddr) -> GeoAddr {
        let pu = addr.inner_pu + addr.outer_pu * self.sb_pus;
        GeoAddr {
            ch: pu % self.geo.nchs,
            lun: pu / self.geo.nchs % self.geo.nluns,
            blk: addr.inner_blk + addr.outer_blk * self.sb_blks,
            pg: addr.pg,
            in_page: addr.in_page,
        }
    }

    pub fn from_geo(&self, addr: &GeoAddr) -> SbAddr {
        let pu = addr.lun * self.geo.nchs + addr.ch;
        SbAddr {
            outer_pu: pu / self.sb_pus,
            inner_pu: pu % self.sb_pus,
            outer_blk: addr.blk / self.sb_blks,
            inner_blk: addr.blk % self.sb_blks,
            pg: addr.pg,
            in_page: addr.in_page,
        }
    }

    /// Superblock index: `outer_pu + outer_blk * outer_pus`.
    pub fn sblk_index(&self, addr: &SbAddr) -> u64 {
        addr.outer_pu + addr.outer_blk * self.outer_pus()
    }

    /// First-corner address of a superblock (inner coordinates zeroed).
    pub fn sblk_addr(&self, sblk: u64) -> SbAddr {
        debug_assert!(sblk < self.total_sblks(), "sblk {sblk} out of range");
        let outer_pus = self.outer_pus();
        SbAddr {
            outer_pu: sblk % outer_pus,
            outer_blk: sblk / outer_pus,
            inner_pu: 0,
            inner_blk: 0,
            pg: 0,
            in_page: 0,
        }
    }

    /// Decode a superblock-linear virtual page index.
    pub fn vpg_to_sb(&self, vpg: u64) -> SbAddr {
        debug_assert!(vpg < self.geo.total_pages(), "vpg {vpg} out of range");
        let w_pu = self.sb_pus;
        let w_pg = self.geo.npgs * w_pu;
        let w_blk = self.sb_blks * w_pg;
        let w_opu = self.outer_pus() * w_blk;
        SbAddr {
            inner_pu: vpg % w_pu,
            pg: vpg / w_pu % self.geo.npgs,
            inner_blk: vpg / w_pg % self.sb_blks,
            outer_pu: vpg / w_blk % self.outer_pus(),
            outer_blk: vpg / w_opu % self.outer_blks(),
            in_page: 0,
        }
    }

    /// Encode a superblock address as a superblock-linear page index.
    pub fn sb_to_vpg(&self, addr: &SbAddr) -> u64 {
        let w_pu = self.sb_pus;
        let w_pg = self.geo.npgs * w_pu;
        let w_blk = self.sb_blks * w_pg;
        let w_opu = self.outer_pus() * w_blk;
        addr.inner_pu + addr.pg * w_pu + addr.inner_blk * w_pg + addr.outer_pu * w_blk
            + addr.outer_blk * w_opu
    }

    pub fn sblk_of_vpg(&self, vpg: u64) -> u64 {
        vpg / self.pages_per_sblk()
    }

    /// In-superblock slot of a superblock-linear page index.
    pub fn slot_of_vpg(&self, vpg: u64) -> u64 {
        vpg % self.pages_per_sblk()
    }

    pub fn to_log(&self, addr: &SbAddr) -> LogAddr {
        let w_pu = self.sb_pus;
        let w_pg = self.geo.npgs * w_pu;
        LogAddr {
            sblk: self.sblk_index(addr),
            pg: addr.inner_pu + addr.pg * w_pu + addr.inner_blk * w_pg,
            in_page: addr.in_page,
        }
    }

    pub fn from_log(&self, addr: &LogAddr) -> SbAddr {
        debug_assert!(addr.pg < self.pages_per_sblk(), "slot {} out of range", addr.pg);
        let w_pu = self.sb_pus;
        let w_pg = self.geo.npgs * w_pu;
        let mut sb = self.sblk_addr(addr.sblk);
        sb.inner_pu = addr.pg % w_pu;
        sb.pg = addr.pg / w_pu % self.geo.npgs;
        sb.inner_blk = addr.pg / w_pg;
        sb.in_page = addr.in_page;
        sb
    }

    pub fn log_to_geo(&self, addr: &LogAddr) -> GeoAddr {
        self.to_geo(&self.from_log(addr))
    }

    /// Geometry address of a superblock-linear page index.
    pub fn vpg_to_geo(&self, vpg: u64) -> GeoAddr {
        self.to_geo(&self.vpg_to_sb(vpg))
    }

    /// Superblock-linear page index of a geometry address.
    pub fn geo_to_vpg(&self, addr: &GeoAddr) -> u64 {
        self.sb_to_vpg(&self.from_geo(addr))
    }
}
