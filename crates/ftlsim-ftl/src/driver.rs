//! Trace replay: one engine, one trace, synchronous, in input order.
//!
//! Each entry is timed with a wall clock and the engine/device counters
//! are sampled after it retires. A failing entry stops the run; whatever
//! was collected up to that point is still written out.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::registry::EngineSpec;
use crate::report::{self, OpRecord};
use crate::trace::{OpKind, Trace};
use crate::{FtlError, Workload};

#[derive(Debug)]
pub struct RunOutput {
    pub ops_replayed: usize,
    pub heatmap_path: PathBuf,
    pub iotime_path: PathBuf,
}

/// Replay every trace entry through the engine, collecting one record per
/// completed entry. Returns the failure (if any) alongside the records.
pub fn replay(engine: &mut dyn Engine, trace: &Trace) -> (Vec<OpRecord>, Option<FtlError>) {
    let mut databuf = vec![0u8; trace.max_io_size() as usize];
    let mut records = Vec::with_capacity(trace.len());
    for (index, op) in trace.ops().iter().enumerate() {
        if index % 100 == 0 {
            debug!(index, total = trace.len(), "replay progress");
        }
        let buf = &mut databuf[..op.size as usize];
        let started = Instant::now();
        let result = match op.kind {
            OpKind::Read => engine.read(op.offset, buf),
            OpKind::Write => engine.write(op.offset, buf),
        };
        let exetime = started.elapsed();
        if let Err(err) = result {
            error!(index, offset = op.offset, size = op.size, %err, "trace entry failed");
            return (records, Some(err));
        }
        records.push(OpRecord {
            op: *op,
            exetime,
            counters: engine.counters(),
            dev: engine.device_stats(),
        });
    }
    (records, None)
}

/// Full run: parse the trace, build the engine, replay, and write both
/// report CSVs into `output_dir` (even for a run that failed partway).
pub fn run(
    workload: &Workload,
    spec: &EngineSpec,
    output_dir: &Path,
) -> Result<RunOutput, FtlError> {
    let geo = workload.geometry()?;
    let trace = Trace::load(&workload.trace_path)?;
    info!(
        engine = spec.name,
        ops = trace.len(),
        capacity = geo.capacity_bytes(),
        "starting replay"
    );
    let mut engine = spec.build(workload)?;
    let (records, failure) = replay(engine.as_mut(), &trace);
    let (heatmap_path, iotime_path) =
        report::write_all(output_dir, &geo, engine.heatmap(), &records)?;
    info!(
        ops_replayed = records.len(),
        heatmap = %heatmap_path.display(),
        iotime = %iotime_path.display(),
        "replay finished"
    );
    match failure {
        Some(err) => Err(err),
        None => Ok(RunOutput {
            ops_replayed: records.len(),
            heatmap_path,
            iotime_path,
        }),
    }
}
