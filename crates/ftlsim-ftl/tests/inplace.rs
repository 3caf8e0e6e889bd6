mod common;

use common::{device, patterned, small_geo, VPG_SIZE};
use ftlsim_ftl::engines::InplaceEngine;
use ftlsim_ftl::{BlockState, Engine, PageState};

#[test]
fn cold_aligned_write_programs_one_page() {
    let mut engine = InplaceEngine::new(device());
    let data = patterned(VPG_SIZE, 1);
    engine.write(0, &data).unwrap();

    assert_eq!(engine.state().page(0), PageState::Dirty);
    assert_eq!(engine.state().block(0), BlockState::Dirty);
    let cell = engine.heatmap().cell(0);
    assert_eq!((cell.reads, cell.writes, cell.erases), (0, 1, 0));
    assert_eq!(engine.heatmap().totals().erases, 0);
    assert_eq!(engine.device_stats().pgs_written, 1);

    let mut back = vec![0; VPG_SIZE];
    engine.read(0, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn cold_misaligned_write_merges_against_zeroes_without_preread() {
    let mut engine = InplaceEngine::new(device());
    let data = patterned(200, 2);
    engine.write(100, &data).unwrap();

    // The endpoint page was clean, so no device read happened.
    assert_eq!(engine.heatmap().totals().reads, 0);
    assert_eq!(engine.device_stats().pgs_read, 0);
    assert_eq!(engine.heatmap().cell(0).writes, 1);

    let mut back = vec![0xFF; VPG_SIZE];
    engine.read(0, &mut back).unwrap();
    assert!(back[..100].iter().all(|&b| b == 0));
    assert_eq!(&back[100..300], data.as_slice());
    assert!(back[300..].iter().all(|&b| b == 0));
}

#[test]
fn full_overwrite_erases_each_covered_block_once() {
    let geo = small_geo();
    let mut engine = InplaceEngine::new(device());
    let size = 65536; // vpgs 0..=7: pages 0..=1 of one block per PU
    engine.write(0, &patterned(size, 3)).unwrap();
    assert_eq!(engine.heatmap().totals().erases, 0);

    let second = patterned(size, 4);
    engine.write(0, &second).unwrap();

    // The block holding vpg 0 was erased exactly once, and so was every
    // other covered block.
    let mut addr = geo.vpg_addr(0);
    for pg in 0..geo.npgs {
        addr.pg = pg;
        assert_eq!(engine.heatmap().cell(geo.vpg(&addr)).erases, 1);
    }
    assert_eq!(engine.heatmap().totals().erases, 4 * geo.npgs);
    for vpg in 0..8 {
        assert_eq!(engine.heatmap().cell(vpg).writes, 2);
    }

    let mut back = vec![0; size];
    engine.read(0, &mut back).unwrap();
    assert_eq!(back, second);
}

#[test]
fn erase_preserves_unrelated_pages_of_the_block() {
    let geo = small_geo();
    let mut engine = InplaceEngine::new(device());
    // vpg 0 and vpg 8 are pages 0 and 2 of the same physical block.
    assert_eq!(geo.vblk_of_vpg(0), geo.vblk_of_vpg(8));

    let first = patterned(VPG_SIZE, 5);
    let neighbor = patterned(VPG_SIZE, 6);
    engine.write(0, &first).unwrap();
    engine.write(8 * VPG_SIZE as u64, &neighbor).unwrap();

    let replacement = patterned(VPG_SIZE, 7);
    engine.write(0, &replacement).unwrap();

    assert_eq!(engine.heatmap().cell(8).erases, 1);
    let mut back = vec![0; VPG_SIZE];
    engine.read(8 * VPG_SIZE as u64, &mut back).unwrap();
    assert_eq!(back, neighbor);
    engine.read(0, &mut back).unwrap();
    assert_eq!(back, replacement);
}

#[test]
fn partial_overwrite_of_used_page_keeps_outside_bytes() {
    let mut engine = InplaceEngine::new(device());
    let base = patterned(VPG_SIZE, 8);
    engine.write(0, &base).unwrap();

    let patch = patterned(200, 9);
    engine.write(100, &patch).unwrap();

    let mut back = vec![0; VPG_SIZE];
    engine.read(0, &mut back).unwrap();
    assert_eq!(&back[..100], &base[..100]);
    assert_eq!(&back[100..300], patch.as_slice());
    assert_eq!(&back[300..], &base[300..]);
}

#[test]
fn misaligned_span_across_blocks_round_trips() {
    let mut engine = InplaceEngine::new(device());
    let offset = 3 * VPG_SIZE as u64 + 1000;
    let data = patterned(40 * VPG_SIZE - 3000, 10);
    engine.write(offset, &data).unwrap();

    let mut back = vec![0; data.len()];
    engine.read(offset, &mut back).unwrap();
    assert_eq!(back, data);
    engine.state().audit().unwrap();
}

#[test]
fn out_of_range_operations_are_rejected_without_state_change() {
    let geo = small_geo();
    let mut engine = InplaceEngine::new(device());
    let capacity = geo.capacity_bytes();
    let mut buf = vec![0; 16];
    assert!(engine.read(capacity, &mut buf).is_err());
    assert!(engine.write(capacity - 8, &patterned(16, 0)).is_err());
    assert_eq!(engine.state().counts().dirty, 0);
    assert_eq!(engine.heatmap().totals().writes, 0);
}
