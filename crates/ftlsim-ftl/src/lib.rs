//! The FTL core: shared page/block metadata, the page I/O wrapper, four
//! write policies, and the trace-replay driver.
//!
//! Layering, leaves first: [`meta`] owns the per-page/per-block state
//! machines and endurance heatmap; [`pageio`] enforces NAND write rules on
//! top of a [`ftlsim_nand::NandDevice`]; the [`engines`] implement the
//! write policies on top of that; [`driver`] replays a parsed [`trace`]
//! through one engine and emits the [`report`] CSVs.

use std::path::PathBuf;

use ftlsim_geo::{GeoError, Geometry};
use ftlsim_nand::NandError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod driver;
pub mod engine;
pub mod engines;
pub mod meta;
pub mod pageio;
pub mod registry;
pub mod report;
pub mod segment;
pub mod trace;

pub use engine::{Engine, EngineCounters};
pub use meta::{BlockState, HeatCell, Heatmap, PageCounts, PageState, StateTable};
pub use pageio::PageIo;
pub use registry::{engine_specs, find_engine, EngineSpec};
pub use trace::{OpKind, Trace, TraceError, TraceOp};

#[derive(Debug, Error)]
pub enum FtlError {
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Nand(#[from] NandError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("i/o failure writing reports: {0}")]
    Report(#[from] std::io::Error),
    /// Engine bug trap: a device write was attempted on a page that has not
    /// been erased since its last program.
    #[error("write to non-clean page vpg {vpg} (state {state:?})")]
    RewriteWithoutErase { vpg: u64, state: PageState },
    /// Engine bug trap: device writes must cover exactly one whole page.
    #[error("partial-page write at vpg {vpg}: in_page {in_page}, len {len}, page size {vpg_size}")]
    PartialPageWrite {
        vpg: u64,
        in_page: u64,
        len: usize,
        vpg_size: u64,
    },
    #[error("page slice [{in_page}, +{len}) exceeds page size {vpg_size}")]
    SliceOutOfPage {
        in_page: u64,
        len: usize,
        vpg_size: u64,
    },
    #[error("out of capacity: garbage collection can free no more space")]
    OutOfCapacity,
}

fn default_sb_dim() -> u64 {
    1
}

fn default_log_blocks() -> u64 {
    10
}

/// Everything the host frame hands an engine at start: the device shape,
/// the policy knobs, and where the trace lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub nchs: u64,
    pub nluns: u64,
    pub nblks: u64,
    pub npgs: u64,
    pub nplanes: u64,
    pub page_nbytes: u64,
    /// Read/write mix percentages; recorded for the raw-throughput probe,
    /// not consumed by the trace engines.
    #[serde(default)]
    pub read_factor: u32,
    #[serde(default)]
    pub write_factor: u32,
    /// Superblock shape for the superblock engines. Zero means 1.
    #[serde(default = "default_sb_dim")]
    pub sb_pus: u64,
    #[serde(default = "default_sb_dim")]
    pub sb_blks: u64,
    /// Log-block pool size for the log-block engine.
    #[serde(default = "default_log_blocks")]
    pub log_blocks: u64,
    #[serde(default)]
    pub trace_path: PathBuf,
}

impl Workload {
    pub fn geometry(&self) -> Result<Geometry, GeoError> {
        Geometry::new(
            self.nchs,
            self.nluns,
            self.nblks,
            self.npgs,
            self.nplanes,
            self.page_nbytes,
        )
    }

    pub fn sb_pus(&self) -> u64 {
        if self.sb_pus == 0 {
            1
        } else {
            self.sb_pus
        }
    }

    pub fn sb_blks(&self) -> u64 {
        if self.sb_blks == 0 {
            1
        } else {
            self.sb_blks
        }
    }
}
