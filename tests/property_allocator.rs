//! Property-based tests for free list correctness
//!
//! Uses proptest to verify free list invariants hold across many random
//! allocate/release sequences

use proptest::prelude::*;
use rootio::header::{K_BEGIN, K_START_BIG_FILE};
use rootio::FreeList;

fn fresh() -> FreeList {
    FreeList::with_block(K_BEGIN, K_START_BIG_FILE)
}

fn assert_well_formed(list: &FreeList) -> Result<(), TestCaseError> {
    for pair in list.blocks().windows(2) {
        prop_assert!(
            pair[0].last + 1 < pair[1].first,
            "blocks [{}, {}] and [{}, {}] overlap or touch",
            pair[0].first,
            pair[0].last,
            pair[1].first,
            pair[1].last
        );
    }
    for blk in list.iter() {
        prop_assert!(!blk.is_empty());
    }
    Ok(())
}

fn total_free(list: &FreeList) -> i64 {
    list.iter().map(|b| b.len()).sum()
}

proptest! {
    #[test]
    fn prop_sequential_allocations_are_contiguous(
        sizes in prop::collection::vec(1i64..100_000, 1..50)
    ) {
        let mut list = fresh();
        let mut expected = K_BEGIN;

        for &size in &sizes {
            let seek = list.allocate(size).unwrap();
            prop_assert_eq!(seek, expected);
            expected += size;
        }

        prop_assert_eq!(list.len(), 1);
        prop_assert_eq!(list.trailing_first(), Some(expected));
    }

    #[test]
    fn prop_release_restores_free_bytes(
        sizes in prop::collection::vec(1i64..10_000, 1..40),
        released in prop::collection::vec(any::<bool>(), 40)
    ) {
        let mut list = fresh();
        let records: Vec<(i64, i64)> = sizes
            .iter()
            .map(|&size| (list.allocate(size).unwrap(), size))
            .collect();
        let before = total_free(&list);

        let mut freed = 0;
        for (i, &(seek, size)) in records.iter().enumerate() {
            if released[i] {
                list.release(seek, seek + size - 1);
                freed += size;
            }
        }

        assert_well_formed(&list)?;
        prop_assert_eq!(total_free(&list), before + freed);
        prop_assert_eq!(list.blocks().last().unwrap().last, K_START_BIG_FILE);
    }

    #[test]
    fn prop_no_overlap_after_reuse(
        sizes in prop::collection::vec(1i64..5_000, 2..30),
        released in prop::collection::vec(any::<bool>(), 30),
        more in prop::collection::vec(1i64..5_000, 1..30)
    ) {
        let mut list = fresh();
        let mut live: Vec<(i64, i64)> = sizes
            .iter()
            .map(|&size| {
                let seek = list.allocate(size).unwrap();
                (seek, seek + size - 1)
            })
            .collect();

        let mut kept = Vec::new();
        for (i, range) in live.drain(..).enumerate() {
            if released[i] {
                list.release(range.0, range.1);
            } else {
                kept.push(range);
            }
        }

        for &size in &more {
            let seek = list.allocate(size).unwrap();
            kept.push((seek, seek + size - 1));
        }

        kept.sort();
        for pair in kept.windows(2) {
            prop_assert!(
                pair[0].1 < pair[1].0,
                "records {:?} and {:?} overlap",
                pair[0],
                pair[1]
            );
        }
        prop_assert!(kept[0].0 >= K_BEGIN);
        for blk in list.iter() {
            for &(first, last) in &kept {
                prop_assert!(blk.last < first || blk.first > last);
            }
        }
        assert_well_formed(&list)?;
    }

    #[test]
    fn prop_allocation_never_returns_below_begin(
        sizes in prop::collection::vec(1i64..1_000_000, 1..20)
    ) {
        let mut list = fresh();
        for &size in &sizes {
            let seek = list.allocate(size).unwrap();
            prop_assert!(seek >= K_BEGIN);
        }
    }
}
