use compound_fs::container::BtSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use test_log::test;

#[test]
fn btree_matches_reference_set_across_orders() {
    for order in [2, 3, 5] {
        let mut rng = StdRng::seed_from_u64(0xB7 + order as u64);
        let mut set = BtSet::with_order(order);
        let mut reference = BTreeSet::new();

        for _ in 0..2_000 {
            let key: i32 = rng.random_range(-250..250);
            match rng.random_range(0..3) {
                0 => {
                    assert_eq!(reference.insert(key), set.insert(key), "order {order}");
                }
                1 => {
                    assert_eq!(reference.remove(&key), set.remove(&key), "order {order}");
                }
                _ => {
                    assert_eq!(reference.contains(&key), set.contains(&key));
                }
            }

            assert!(set.check_consistency(), "order {order}");
            assert_eq!(reference.len(), set.len());
        }

        assert_eq!(
            reference.iter().copied().collect::<Vec<_>>(),
            set.iter().collect::<Vec<_>>()
        );
    }
}

#[test]
fn btree_root_merge_shrinks_height() {
    // order 2: the root splits at 4 inserts, and deleting back down to a
    // couple of keys must merge the two remaining children into a new root
    let mut set = BtSet::with_order(2);
    for v in 0..8 {
        assert!(set.insert(v));
    }

    for v in 0..6 {
        assert!(set.remove(&v));
        assert!(set.check_consistency());
    }

    assert_eq!(vec![6, 7], set.iter().collect::<Vec<_>>());
}

#[test]
fn btree_bounds_match_reference() {
    let mut set = BtSet::with_order(3);
    let mut reference = BTreeSet::new();

    for v in (0..200).map(|v| v * 3) {
        set.insert(v);
        reference.insert(v);
    }

    for probe in -3..603 {
        let expected_lb = reference.range(probe..).next().copied();
        let expected_ub = reference.range(probe + 1..).next().copied();
        assert_eq!(expected_lb, set.lower_bound(&probe), "lower_bound({probe})");
        assert_eq!(expected_ub, set.upper_bound(&probe), "upper_bound({probe})");
    }
}

#[test]
fn btree_delete_everything_in_random_order() {
    let mut rng = StdRng::seed_from_u64(0xB702);
    let mut set = BtSet::with_order(2);

    let mut keys = (0..500).collect::<Vec<i32>>();
    for key in &keys {
        set.insert(*key);
    }

    // shuffle by random swaps
    for i in (1..keys.len()).rev() {
        let j = rng.random_range(0..=i);
        keys.swap(i, j);
    }

    for key in keys {
        assert!(set.remove(&key));
        assert!(set.check_consistency());
    }
    assert!(set.is_empty());
}
