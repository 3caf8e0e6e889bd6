//! Model-based checks: every engine must behave like a flat byte array,
//! whatever erases and migrations its policy performs underneath.

use ftlsim_ftl::engines::{InplaceEngine, PageLogEngine, SbLogEngine, SbMapEngine};
use ftlsim_ftl::Engine;
use ftlsim_geo::Geometry;
use ftlsim_nand::MemNand;
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

const MAX_OPS_PER_CASE: usize = 40;
const MAX_RW_PAGES: u64 = 6;

fn geo() -> Geometry {
    Geometry::new(2, 2, 4, 8, 1, 512).unwrap()
}

#[derive(Clone, Debug)]
enum Op {
    Read { offset: u64, len: usize },
    Write { offset: u64, data: Vec<u8> },
}

fn offset_len_strategy(usable: u64, vpg_size: u64) -> impl Strategy<Value = (u64, usize)> {
    // Bias towards page boundaries and short intra-page slices.
    let offset = prop_oneof![
        2 => 0u64..usable,
        1 => (0u64..usable / vpg_size).prop_map(move |pg| pg * vpg_size),
        1 => Just(0u64),
    ];
    offset.prop_flat_map(move |offset| {
        let remaining = usable - offset;
        let max_len = remaining.min(MAX_RW_PAGES * vpg_size) as usize;
        (1usize..=max_len).prop_map(move |len| (offset, len))
    })
}

fn ops_strategy(usable: u64, vpg_size: u64) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        2 => offset_len_strategy(usable, vpg_size)
            .prop_map(|(offset, len)| Op::Read { offset, len }),
        3 => offset_len_strategy(usable, vpg_size).prop_flat_map(|(offset, len)| {
            prop::collection::vec(any::<u8>(), len)
                .prop_map(move |data| Op::Write { offset, data })
        }),
    ];
    prop::collection::vec(op, 1..=MAX_OPS_PER_CASE)
}

fn check_engine(engine: &mut dyn Engine, usable: u64, ops: &[Op]) -> TestCaseResult {
    let mut model = vec![0u8; usable as usize];
    for op in ops {
        match op {
            Op::Read { offset, len } => {
                let at = *offset as usize;
                let mut buf = vec![0u8; *len];
                engine
                    .read(*offset, &mut buf)
                    .map_err(|e| TestCaseError::fail(format!("read failed: {e}")))?;
                prop_assert_eq!(buf.as_slice(), &model[at..at + len]);
            }
            Op::Write { offset, data } => {
                let at = *offset as usize;
                engine
                    .write(*offset, data)
                    .map_err(|e| TestCaseError::fail(format!("write failed: {e}")))?;
                model[at..at + data.len()].copy_from_slice(data);
            }
        }
        // State/block consistency and running counts hold after every call.
        engine
            .state()
            .audit()
            .map_err(TestCaseError::fail)?;
    }

    // Final sweep: the whole usable range equals the model.
    let mut back = vec![0u8; usable as usize];
    engine
        .read(0, &mut back)
        .map_err(|e| TestCaseError::fail(format!("final read failed: {e}")))?;
    prop_assert_eq!(back.as_slice(), model.as_slice());

    // Heatmap totals account for every device operation.
    let totals = engine.heatmap().totals();
    let dev = engine.device_stats();
    prop_assert_eq!(totals.reads, dev.pgs_read);
    prop_assert_eq!(totals.writes, dev.pgs_written);
    prop_assert_eq!(totals.erases, dev.erased_blks * geo().npgs);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn inplace_matches_flat_model(ops in ops_strategy(geo().capacity_bytes(), geo().vpg_size())) {
        let mut engine = InplaceEngine::new(MemNand::new(geo()));
        check_engine(&mut engine, geo().capacity_bytes(), &ops)?;
    }

    #[test]
    fn pagelog_matches_flat_model(ops in ops_strategy(geo().capacity_bytes(), geo().vpg_size())) {
        let mut engine = PageLogEngine::new(MemNand::new(geo()));
        check_engine(&mut engine, geo().capacity_bytes(), &ops)?;

        // The virtual-to-physical map stays a bijection.
        let total = geo().total_pages();
        let mut seen = vec![false; total as usize];
        for vpg in 0..total {
            if let Some(ppg) = engine.mapping(vpg) {
                prop_assert!(!seen[ppg as usize]);
                seen[ppg as usize] = true;
                prop_assert_eq!(engine.reverse_mapping(ppg), Some(vpg));
            }
        }
    }

    #[test]
    fn sbmap_matches_flat_model(
        // Leave one superblock of headroom: GC is end-of-request only, so
        // a migration plus a fresh bind in one operation can need two free
        // superblocks at once.
        ops in ops_strategy(3 * geo().capacity_bytes() / 4, geo().vpg_size())
    ) {
        let mut engine = SbMapEngine::new(MemNand::new(geo()), 2, 2).unwrap();
        check_engine(&mut engine, 3 * geo().capacity_bytes() / 4, &ops)?;
    }

    #[test]
    fn sblog_matches_flat_model(
        // Leave headroom for the log-block pool and merge targets.
        ops in ops_strategy(geo().capacity_bytes() / 2, geo().vpg_size())
    ) {
        let mut engine = SbLogEngine::new(MemNand::new(geo()), 1, 1, 2).unwrap();
        check_engine(&mut engine, geo().capacity_bytes() / 2, &ops)?;
    }

    #[test]
    fn sblog_reads_exactly_what_sbmap_reads(
        ops in ops_strategy(geo().capacity_bytes() / 2, geo().vpg_size())
    ) {
        let mut sbmap = SbMapEngine::new(MemNand::new(geo()), 2, 1).unwrap();
        let mut sblog = SbLogEngine::new(MemNand::new(geo()), 2, 1, 3).unwrap();
        for op in &ops {
            if let Op::Write { offset, data } = op {
                sbmap.write(*offset, data)
                    .map_err(|e| TestCaseError::fail(format!("sbmap write failed: {e}")))?;
                sblog.write(*offset, data)
                    .map_err(|e| TestCaseError::fail(format!("sblog write failed: {e}")))?;
            }
        }
        let usable = (geo().capacity_bytes() / 2) as usize;
        let mut via_map = vec![0u8; usable];
        let mut via_log = vec![0u8; usable];
        sbmap.read(0, &mut via_map)
            .map_err(|e| TestCaseError::fail(format!("sbmap read failed: {e}")))?;
        sblog.read(0, &mut via_log)
            .map_err(|e| TestCaseError::fail(format!("sblog read failed: {e}")))?;
        prop_assert_eq!(via_map, via_log);
    }
}
