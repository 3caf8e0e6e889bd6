//! Replay an overwrite-heavy synthetic workload through each write policy.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ftlsim_ftl::engines::{InplaceEngine, PageLogEngine, SbLogEngine, SbMapEngine};
use ftlsim_ftl::Engine;
use ftlsim_geo::Geometry;
use ftlsim_nand::MemNand;

fn geometry() -> Geometry {
    Geometry::new(2, 2, 8, 16, 1, 4096).unwrap()
}

/// Sequential fill of three quarters of the device (the log-block engine
/// needs spare superblocks to cycle through), then three rounds of
/// overwrites concentrated on the first quarter — the case that separates
/// the policies.
fn script(geo: &Geometry) -> Vec<(u64, usize)> {
    let vpg = geo.vpg_size();
    let total = geo.total_pages();
    let fill = 3 * total / 4;
    let mut ops = Vec::new();
    let chunk = 8u64;
    for start in (0..fill).step_by(chunk as usize) {
        ops.push((start * vpg, (chunk.min(fill - start) * vpg) as usize));
    }
    for round in 0..3u64 {
        for start in (0..total / 4).step_by(4) {
            ops.push(((start + round) * vpg + 128, (3 * vpg) as usize));
        }
    }
    ops
}

fn replay(engine: &mut dyn Engine, ops: &[(u64, usize)], payload: &[u8]) {
    for &(offset, len) in ops {
        engine.write(offset, &payload[..len]).unwrap();
    }
    black_box(engine.counters());
}

fn bench_engines(c: &mut Criterion) {
    let geo = geometry();
    let ops = script(&geo);
    let max_len = ops.iter().map(|&(_, len)| len).max().unwrap();
    let payload = vec![0x5Au8; max_len];

    let mut group = c.benchmark_group("overwrite_heavy_replay");
    group.sample_size(10);

    group.bench_function("inplace", |b| {
        b.iter(|| {
            let mut engine = InplaceEngine::new(MemNand::new(geo));
            replay(&mut engine, &ops, &payload);
        })
    });
    group.bench_function("pagelog", |b| {
        b.iter(|| {
            let mut engine = PageLogEngine::new(MemNand::new(geo));
            replay(&mut engine, &ops, &payload);
        })
    });
    group.bench_function("sbmap", |b| {
        b.iter(|| {
            let mut engine = SbMapEngine::new(MemNand::new(geo), 2, 2).unwrap();
            replay(&mut engine, &ops, &payload);
        })
    });
    group.bench_function("sblog", |b| {
        b.iter(|| {
            // Per-block superblocks and a two-entry pool: the workload
            // needs spare superblocks for log blocks and merge targets.
            let mut engine = SbLogEngine::new(MemNand::new(geo), 1, 1, 2).unwrap();
            replay(&mut engine, &ops, &payload);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_engines);
criterion_main!(benches);
