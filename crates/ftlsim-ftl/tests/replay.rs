//! End-to-end: trace file in, engine replay, CSV reports out.

use std::fs;
use std::path::PathBuf;

use ftlsim_ftl::{driver, find_engine, FtlError, Workload};
use tempfile::tempdir;

fn workload(trace_path: PathBuf) -> Workload {
    Workload {
        nchs: 2,
        nluns: 2,
        nblks: 4,
        npgs: 8,
        nplanes: 2,
        page_nbytes: 4096,
        read_factor: 0,
        write_factor: 100,
        sb_pus: 2,
        sb_blks: 1,
        log_blocks: 4,
        trace_path,
    }
}

#[test]
fn replay_writes_both_reports() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(
        &trace_path,
        "5\n0,8192,w\n0,8192,r\n100,200,w\n8192,16384,w\n0,65536,r\n",
    )
    .unwrap();

    for engine in ["inplace", "pagelog", "sbmap", "sblog"] {
        let out_dir = dir.path().join(engine);
        fs::create_dir(&out_dir).unwrap();
        let spec = find_engine(engine).unwrap();
        let output = driver::run(&workload(trace_path.clone()), spec, &out_dir).unwrap();
        assert_eq!(output.ops_replayed, 5);

        let heatmap = fs::read_to_string(&output.heatmap_path).unwrap();
        assert_eq!(heatmap.lines().count(), 512); // one row per vpg

        let iotime = fs::read_to_string(&output.iotime_path).unwrap();
        let rows: Vec<&str> = iotime.lines().collect();
        assert_eq!(rows.len(), 5);
        assert!(rows[0].starts_with("0,8192,w,"));
        assert!(rows[2].starts_with("100,200,w,"));
        assert_eq!(rows[0].split(',').count(), 21);
    }
}

#[test]
fn heatmap_rows_sum_to_device_write_count() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(&trace_path, "2\n0,32768,w\n0,32768,w\n").unwrap();

    let spec = find_engine("pagelog").unwrap();
    let output = driver::run(&workload(trace_path), spec, dir.path()).unwrap();

    let heatmap = fs::read_to_string(&output.heatmap_path).unwrap();
    let mut writes = 0u64;
    for line in heatmap.lines() {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 7);
        writes += fields[5].parse::<u64>().unwrap();
    }
    assert_eq!(writes, 8); // 4 pages per op, nothing else moved
}

#[test]
fn failing_entry_stops_the_run_but_reports_survive() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    // The second entry runs past the end of the 4 MiB device.
    fs::write(&trace_path, "3\n0,8192,w\n5000000,8192,w\n0,8192,r\n").unwrap();

    let spec = find_engine("inplace").unwrap();
    let err = driver::run(&workload(trace_path), spec, dir.path()).unwrap_err();
    assert!(matches!(err, FtlError::Geo(_)));

    // The first entry's record and the heatmap were still written.
    let iotime = fs::read_to_string(dir.path().join("iotime_io.csv")).unwrap();
    assert_eq!(iotime.lines().count(), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("heatmap_io.csv"))
            .unwrap()
            .lines()
            .count(),
        512
    );
}

#[test]
fn bad_trace_fails_at_startup() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(&trace_path, "2\n0,8192,w\nbogus\n").unwrap();

    let spec = find_engine("pagelog").unwrap();
    let err = driver::run(&workload(trace_path), spec, dir.path()).unwrap_err();
    assert!(matches!(err, FtlError::Trace(_)));
}

#[test]
fn invalid_superblock_shape_fails_at_startup() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    fs::write(&trace_path, "1\n0,8192,w\n").unwrap();

    let mut bad = workload(trace_path);
    bad.sb_pus = 3; // does not divide the 4 PUs
    let spec = find_engine("sbmap").unwrap();
    assert!(driver::run(&bad, spec, dir.path()).is_err());
}
