//! Engine registration: each policy contributes a stable id, a display
//! name, and a constructor; the driver resolves a selector against the
//! table.

use ftlsim_nand::MemNand;

use crate::engine::Engine;
use crate::engines::{InplaceEngine, PageLogEngine, SbLogEngine, SbMapEngine};
use crate::{FtlError, Workload};

type BuildFn = fn(&Workload) -> Result<Box<dyn Engine>, FtlError>;

pub struct EngineSpec {
    pub id: u32,
    pub name: &'static str,
    build: BuildFn,
}

impl EngineSpec {
    /// Construct the engine over a fresh in-memory device shaped by the
    /// workload's geometry.
    pub fn build(&self, workload: &Workload) -> Result<Box<dyn Engine>, FtlError> {
        (self.build)(workload)
    }
}

fn build_inplace(workload: &Workload) -> Result<Box<dyn Engine>, FtlError> {
    let dev = MemNand::new(workload.geometry()?);
    Ok(Box::new(InplaceEngine::new(dev)))
}

fn build_pagelog(workload: &Workload) -> Result<Box<dyn Engine>, FtlError> {
    let dev = MemNand::new(workload.geometry()?);
    Ok(Box::new(PageLogEngine::new(dev)))
}

fn build_sbmap(workload: &Workload) -> Result<Box<dyn Engine>, FtlError> {
    let dev = MemNand::new(workload.geometry()?);
    Ok(Box::new(SbMapEngine::new(
        dev,
        workload.sb_pus(),
        workload.sb_blks(),
    )?))
}

fn build_sblog(workload: &Workload) -> Result<Box<dyn Engine>, FtlError> {
    let dev = MemNand::new(workload.geometry()?);
    Ok(Box::new(SbLogEngine::new(
        dev,
        workload.sb_pus(),
        workload.sb_blks(),
        workload.log_blocks,
    )?))
}

static ENGINES: [EngineSpec; 4] = [
    EngineSpec { id: 1, name: "inplace", build: build_inplace },
    EngineSpec { id: 2, name: "pagelog", build: build_pagelog },
    EngineSpec { id: 3, name: "sbmap", build: build_sbmap },
    EngineSpec { id: 4, name: "sblog", build: build_sblog },
];

pub fn engine_specs() -> &'static [EngineSpec] {
    &ENGINES
}

/// Resolve a selector, accepting either the display name or the numeric id.
pub fn find_engine(selector: &str) -> Option<&'static EngineSpec> {
    if let Ok(id) = selector.parse::<u32>() {
        return ENGINES.iter().find(|spec| spec.id == id);
    }
    ENGINES.iter().find(|spec| spec.name == selector)
}
