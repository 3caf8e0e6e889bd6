//! Run artifacts: the per-page endurance heatmap and the per-operation
//! timing/counter sheet, both plain CSV.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ftlsim_geo::Geometry;
use ftlsim_nand::DeviceStats;

use crate::engine::EngineCounters;
use crate::meta::Heatmap;
use crate::trace::TraceOp;

pub const HEATMAP_FILE: &str = "heatmap_io.csv";
pub const IOTIME_FILE: &str = "iotime_io.csv";

/// Everything sampled for one replayed trace entry.
#[derive(Debug, Clone, Copy)]
pub struct OpRecord {
    pub op: TraceOp,
    pub exetime: Duration,
    pub counters: EngineCounters,
    pub dev: DeviceStats,
}

fn micros(d: Duration) -> u128 {
    d.as_micros()
}

/// One row per virtual page: `ch,lun,blk,pg,reads,writes,erases`.
pub fn write_heatmap<W: Write>(mut w: W, geo: &Geometry, heatmap: &Heatmap) -> io::Result<()> {
    for vpg in 0..geo.total_pages() {
        let addr = geo.vpg_addr(vpg);
        let cell = heatmap.cell(vpg);
        writeln!(
            w,
            "{},{},{},{},{},{},{}",
            addr.ch, addr.lun, addr.blk, addr.pg, cell.reads, cell.writes, cell.erases
        )?;
    }
    Ok(())
}

/// One row per trace entry: the operation, its wall clock, the engine
/// counters, and the cumulative device-side stats at that point.
pub fn write_iotime<W: Write>(mut w: W, records: &[OpRecord]) -> io::Result<()> {
    for rec in records {
        let c = &rec.counters;
        let d = &rec.dev;
        writeln!(
            w,
            "{},{},{},{},{},{},{},{:.6},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            rec.op.offset,
            rec.op.size,
            rec.op.kind.as_char(),
            micros(rec.exetime),
            c.nabandoned,
            c.ndirty,
            c.nblock,
            c.gc_becost,
            c.map_change_count,
            c.map_set_count,
            c.gc_count,
            micros(c.gc_time),
            c.gc_map_change_count,
            d.pgs_read,
            d.bytes_read,
            d.pgs_written,
            d.bytes_written,
            d.erased_blks,
            micros(d.erase_time),
            micros(d.read_time),
            micros(d.write_time),
        )?;
    }
    Ok(())
}

/// Write both CSVs into `dir`, returning their paths.
pub fn write_all(
    dir: &Path,
    geo: &Geometry,
    heatmap: &Heatmap,
    records: &[OpRecord],
) -> io::Result<(PathBuf, PathBuf)> {
    let heatmap_path = dir.join(HEATMAP_FILE);
    let iotime_path = dir.join(IOTIME_FILE);
    write_heatmap(BufWriter::new(File::create(&heatmap_path)?), geo, heatmap)?;
    write_iotime(BufWriter::new(File::create(&iotime_path)?), records)?;
    Ok((heatmap_path, iotime_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::OpKind;

    #[test]
    fn heatmap_rows_carry_grid_coordinates() {
        let geo = Geometry::new(2, 1, 1, 2, 1, 512).unwrap();
        let mut heatmap = Heatmap::new(&geo);
        heatmap.record_write(1);
        heatmap.record_read(1);
        heatmap.record_read(1);

        let mut out = Vec::new();
        write_heatmap(&mut out, &geo, &heatmap).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], "0,0,0,0,0,0,0");
        assert_eq!(rows[1], "1,0,0,0,2,1,0");
    }

    #[test]
    fn iotime_rows_have_the_full_column_set() {
        let rec = OpRecord {
            op: TraceOp { offset: 4096, size: 100, kind: OpKind::Write },
            exetime: Duration::from_micros(42),
            counters: EngineCounters {
                ndirty: 3,
                nabandoned: 1,
                ..EngineCounters::default()
            },
            dev: DeviceStats {
                pgs_written: 3,
                bytes_written: 3 * 8192,
                ..DeviceStats::default()
            },
        };
        let mut out = Vec::new();
        write_iotime(&mut out, &[rec]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row: Vec<&str> = text.trim_end().split(',').collect();
        assert_eq!(row.len(), 21);
        assert_eq!(&row[..5], &["4096", "100", "w", "42", "1"]);
        assert_eq!(row[7], "0.000000");
    }
}
