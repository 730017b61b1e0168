#![allow(missing_docs)]

use std::sync::Arc;

use bytes::Bytes;
use logindex::storage::{
    consolidate, Collaborators, HeadState, MemoryVersionStore, RedoEngine, SourceOfRecord,
    VersionStore, MAX_REPLAY_VERSIONS,
};
use logindex::types::{Lsn, PageKey, Result};
use proptest::prelude::*;

struct AppendRedo;

impl RedoEngine for AppendRedo {
    fn apply(&self, _key: &PageKey, lsns: &[Lsn], base: Bytes) -> Result<Bytes> {
        let mut out = base.to_vec();
        for lsn in lsns {
            out.extend_from_slice(&lsn.0.to_be_bytes());
        }
        Ok(Bytes::from(out))
    }

    fn synthesize(&self, _key: &PageKey, lsn: Lsn) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&lsn.0.to_be_bytes()))
    }
}

struct Relations {
    exists: bool,
}

impl SourceOfRecord for Relations {
    fn relation_exists(&self, _key: &PageKey) -> Result<bool> {
        Ok(self.exists)
    }

    fn fetch_base(&self, _key: &PageKey) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Append { gap: u64 },
    Consolidate { cap: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u64..=50).prop_map(|gap| Op::Append { gap }),
        1 => (1usize..=24).prop_map(|cap| Op::Consolidate { cap }),
    ]
}

fn decode(image: &[u8]) -> Vec<u64> {
    image
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_be_bytes(buf)
        })
        .collect()
}

fn page() -> PageKey {
    PageKey::main(1663, 1, 2619, 0)
}

fn check_state(
    state: &HeadState,
    store: &MemoryVersionStore,
    appended: &[u64],
) -> std::result::Result<(), TestCaseError> {
    let replayed = state.replayed_lsn();
    let pending = state.pending_lsns();
    prop_assert!(pending.windows(2).all(|w| w[0] < w[1]));
    let expected_pending: Vec<Lsn> = appended
        .iter()
        .copied()
        .filter(|lsn| *lsn > replayed.0)
        .map(Lsn)
        .collect();
    prop_assert_eq!(&pending, &expected_pending);

    if replayed != Lsn::ZERO {
        prop_assert_eq!(store.markers(&page()), vec![replayed]);
        let image = store
            .lookup(&page(), replayed)
            .map_err(|err| TestCaseError::fail(err.to_string()))?
            .ok_or_else(|| TestCaseError::fail("no image at replayed marker"))?;
        let folded: Vec<u64> = appended
            .iter()
            .copied()
            .filter(|lsn| *lsn <= replayed.0)
            .collect();
        prop_assert_eq!(decode(&image), folded);
    }
    Ok(())
}

fn run_ops(exists: bool, ops: Vec<Op>) -> std::result::Result<(), TestCaseError> {
    let store = Arc::new(MemoryVersionStore::new());
    let deps = Collaborators::new(store.clone(), Arc::new(AppendRedo), Arc::new(Relations { exists }));
    let mut state = HeadState::default();
    let mut appended = Vec::new();
    let mut next = 1u64;

    for op in ops {
        match op {
            Op::Append { gap } => {
                next += gap;
                state
                    .push_pending(Lsn(next))
                    .map_err(|err| TestCaseError::fail(err.to_string()))?;
                appended.push(next);
            }
            Op::Consolidate { cap } => {
                let before = state.pending_lsns().len();
                let report = consolidate(&page(), &mut state, &deps, cap)
                    .map_err(|err| TestCaseError::fail(err.to_string()))?;
                prop_assert!(report.outcome.lsns_applied() <= cap);
                prop_assert_eq!(
                    state.pending_lsns().len(),
                    before - report.outcome.lsns_applied()
                );
            }
        }
        check_state(&state, &store, &appended)?;
    }

    let mut rounds = 0;
    while !state.pending_lsns().is_empty() {
        consolidate(&page(), &mut state, &deps, MAX_REPLAY_VERSIONS)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        rounds += 1;
        prop_assert!(rounds <= appended.len());
    }
    check_state(&state, &store, &appended)?;
    if let Some(last) = appended.last() {
        prop_assert_eq!(state.replayed_lsn(), Lsn(*last));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn consolidation_never_loses_records(ops in prop::collection::vec(arb_op(), 1..120)) {
        run_ops(true, ops)?;
    }

    #[test]
    fn created_pages_never_lose_records(ops in prop::collection::vec(arb_op(), 1..120)) {
        run_ops(false, ops)?;
    }
}
