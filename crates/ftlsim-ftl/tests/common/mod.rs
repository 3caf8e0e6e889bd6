#![allow(dead_code)] // not every test binary uses every helper

use ftlsim_geo::Geometry;
use ftlsim_nand::MemNand;

pub const VPG_SIZE: usize = 8192;

/// The scenario geometry: 2 channels x 2 LUNs x 4 blocks x 8 pages,
/// 2 planes of 4 KiB pages => 8 KiB virtual pages, 512 pages total.
pub fn small_geo() -> Geometry {
    Geometry::new(2, 2, 4, 8, 2, 4096).unwrap()
}

pub fn device() -> MemNand {
    MemNand::new(small_geo())
}

/// Deterministic non-trivial payload.
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
