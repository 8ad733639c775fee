use compound_fs::container::{RbMultiSet, RbSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use test_log::test;

#[test]
fn rbtree_seed_sequence() {
    let mut set = RbSet::new();
    for v in [5, 2, 8, 1, 9, 3, 7] {
        assert!(set.insert(v));
    }

    assert_eq!(
        vec![1, 2, 3, 5, 7, 8, 9],
        set.iter().copied().collect::<Vec<_>>()
    );

    assert!(set.remove(&5));
    assert_eq!(Some(7), set.lower_bound(&6));
    assert_eq!(Some(2), set.upper_bound(&1));
}

#[test]
fn rbtree_matches_reference_set() {
    let mut rng = StdRng::seed_from_u64(0xCF01);
    let mut set = RbSet::new();
    let mut reference = BTreeSet::new();

    for _ in 0..2_000 {
        let key: i32 = rng.random_range(-300..300);
        match rng.random_range(0..3) {
            0 => {
                assert_eq!(reference.insert(key), set.insert(key));
            }
            1 => {
                assert_eq!(reference.remove(&key), set.remove(&key));
            }
            _ => {
                assert_eq!(reference.contains(&key), set.contains(&key));
            }
        }

        assert!(set.check_consistency());
        assert_eq!(reference.len(), set.len());
    }

    assert_eq!(
        reference.iter().copied().collect::<Vec<_>>(),
        set.iter().copied().collect::<Vec<_>>()
    );
}

#[test]
fn rbtree_bounds_match_reference() {
    let mut rng = StdRng::seed_from_u64(0xCF02);
    let mut set = RbSet::new();
    let mut reference = BTreeSet::new();

    for _ in 0..300 {
        let key: i32 = rng.random_range(0..1_000) * 2;
        set.insert(key);
        reference.insert(key);
    }

    // probe below the minimum, between neighbours and above the maximum
    for probe in -2..2_002 {
        let expected_lb = reference.range(probe..).next().copied();
        let expected_ub = reference.range(probe + 1..).next().copied();
        assert_eq!(expected_lb, set.lower_bound(&probe), "lower_bound({probe})");
        assert_eq!(expected_ub, set.upper_bound(&probe), "upper_bound({probe})");
    }
}

#[test]
fn rbt_multiset_stress() {
    let mut rng = StdRng::seed_from_u64(0xCF03);
    let mut set = RbMultiSet::new();
    let mut reference = std::collections::BTreeMap::<i32, usize>::new();

    const N: i32 = 100;

    for _ in 0..500 {
        let key: i32 = rng.random_range(-N / 2..=N / 2);
        if rng.random_range(0..3) == 0 {
            let removed = set.remove(&key);
            let present = reference.get(&key).copied().unwrap_or(0) > 0;
            assert_eq!(present, removed);
            if present {
                *reference.get_mut(&key).unwrap() -= 1;
            }
        } else {
            set.insert(key);
            *reference.entry(key).or_default() += 1;
        }

        assert!(set.check_consistency());
    }

    for k in -N / 2..=N / 2 {
        let expected = reference.get(&k).copied().unwrap_or(0);
        assert_eq!(expected, set.count(&k), "count({k})");
    }

    let expected = reference
        .iter()
        .flat_map(|(k, n)| std::iter::repeat(*k).take(*n))
        .collect::<Vec<_>>();
    assert_eq!(expected, set.iter().copied().collect::<Vec<_>>());
}
