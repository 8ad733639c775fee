use compound_fs::container::{BpMap, BpSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use test_log::test;

#[test]
fn bptree_matches_reference_map() {
    let mut rng = StdRng::seed_from_u64(0xB9_01);
    let mut map = BpMap::new();
    let mut reference = BTreeMap::new();

    for _ in 0..3_000 {
        let key: i32 = rng.random_range(-400..400);
        match rng.random_range(0..4) {
            0 => {
                let value = key as i64 * 10;
                assert_eq!(
                    reference.insert(key, value).is_none(),
                    map.insert(key, value)
                );
            }
            1 => {
                assert_eq!(reference.remove(&key), map.remove(&key));
            }
            2 => {
                assert_eq!(reference.get(&key), map.get(&key));
            }
            _ => {
                if let Some(v) = reference.get_mut(&key) {
                    *v += 1;
                    *map.get_mut(&key).unwrap() += 1;
                }
            }
        }

        assert_eq!(reference.len(), map.len());
    }

    let expected = reference
        .iter()
        .map(|(k, v)| (*k, *v))
        .collect::<Vec<_>>();
    let got = map.iter().map(|(k, v)| (k, *v)).collect::<Vec<_>>();
    assert_eq!(expected, got);
}

#[test]
fn bptree_bounds_match_reference() {
    let mut set: BpSet<i32> = BpSet::with_orders(2, 2);
    let mut reference = std::collections::BTreeSet::new();

    for v in (0..150).map(|v| v * 4) {
        set.insert(v);
        reference.insert(v);
    }

    for probe in -4..604 {
        let expected_lb = reference.range(probe..).next().copied();
        let expected_ub = reference.range(probe + 1..).next().copied();
        assert_eq!(expected_lb, set.lower_bound(&probe), "lower_bound({probe})");
        assert_eq!(expected_ub, set.upper_bound(&probe), "upper_bound({probe})");
    }
}

#[test]
fn bptree_bulk_ascending_load() {
    // interior order 4, leaf order 8, 25 ascending holders
    let set: BpSet<i32> = BpSet::from_sorted(0..25);

    assert!(set.check_consistency());
    assert_eq!(25, set.len());
    assert!(set.contains(&0));
    assert!(set.contains(&24));
    assert_eq!((0..25).collect::<Vec<_>>(), set.iter().collect::<Vec<_>>());
}

#[test]
fn bptree_bulk_load_sizes_and_orders() {
    for (ti, tl) in [(2, 2), (4, 8), (3, 5)] {
        for n in [1, 2, 7, 64, 1_000] {
            let mut set: BpSet<i32> = BpSet::with_orders(ti, tl);
            // build into a fresh set with those orders via sorted insert
            for v in 0..n {
                set.insert(v);
            }
            assert!(set.check_consistency(), "ti={ti} tl={tl} n={n}");
            assert_eq!(
                (0..n).collect::<Vec<_>>(),
                set.iter().collect::<Vec<_>>(),
                "ti={ti} tl={tl} n={n}"
            );
        }
    }
}

#[test]
fn bptree_random_stress_with_small_orders() {
    let mut rng = StdRng::seed_from_u64(0xB9_02);
    let mut set: BpSet<i32> = BpSet::with_orders(2, 2);
    let mut reference = std::collections::BTreeSet::new();

    for _ in 0..2_500 {
        let key: i32 = rng.random_range(-200..200);
        if rng.random_range(0..3) == 0 {
            assert_eq!(reference.remove(&key), set.remove(&key));
        } else {
            assert_eq!(reference.insert(key), set.insert(key));
        }

        assert!(set.check_consistency());
        assert_eq!(reference.len(), set.len());
    }

    assert_eq!(
        reference.iter().copied().collect::<Vec<_>>(),
        set.iter().collect::<Vec<_>>()
    );
}
