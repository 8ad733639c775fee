//! B-tree algorithm of order *t*.
//!
//! Insertion splits full children on the way down; deletion tops children
//! up to *t* keys (rotate or merge) before descending, so neither pass
//! needs to walk back up afterwards.

use crate::binary_search::partition_point;
use crate::bounded::BoundedVec;
use crate::tree::ops::BtreeOps;

/// Inline capacity of a traversal path; `log_t(n)` stays tiny.
const PATH_CAPACITY: usize = 32;

/// Path from the root to a holder position.
///
/// Every entry but the last pairs a node with the child index the descent
/// took; the last entry pairs the target node with a holder index.
pub struct BtPath<Id> {
    stack: BoundedVec<(Id, usize), PATH_CAPACITY>,
}

impl<Id: Copy + Eq> BtPath<Id> {
    pub(crate) fn new() -> Self {
        Self {
            stack: BoundedVec::new(),
        }
    }

    /// Returns `true` if the path designates a holder.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Node of the designated holder.
    #[must_use]
    pub fn node(&self) -> Id {
        self.stack[self.stack.len() - 1].0
    }

    /// Holder index inside [`BtPath::node`].
    #[must_use]
    pub fn index(&self) -> usize {
        self.stack[self.stack.len() - 1].1
    }

    fn push(&mut self, node: Id, idx: usize) {
        self.stack.push((node, idx));
    }
}

/// B-tree algorithm over a [`BtreeOps`] adapter.
#[derive(Copy, Clone, Debug)]
pub struct BtreeAlgo {
    multikey: bool,
}

impl BtreeAlgo {
    /// Algorithm for unique keys.
    #[must_use]
    pub const fn unique() -> Self {
        Self { multikey: false }
    }

    /// Algorithm admitting duplicate keys.
    #[must_use]
    pub const fn multi() -> Self {
        Self { multikey: true }
    }

    fn key_at<A: BtreeOps>(ops: &A, node: A::Id, nth: usize) -> A::Key {
        ops.key_of(ops.holder(node, nth))
    }

    fn is_leaf<A: BtreeOps>(ops: &A, node: A::Id) -> bool {
        ops.child_count(node) == 0
    }

    /// Inserts a holder, splitting full nodes on the way down.
    ///
    /// Returns the path to the inserted holder, or `None` when the key is
    /// already present in unique mode.
    pub fn insert<A: BtreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        holder: A::Holder,
    ) -> Option<BtPath<A::Id>> {
        let key = ops.key_of(&holder);
        let t = ops.order();

        if ops.is_null(*root) {
            let node = ops.create_node();
            ops.set_holder(node, 0, holder);
            *root = node;
            let mut path = BtPath::new();
            path.push(node, 0);
            return Some(path);
        }

        if ops.key_count(*root) == 2 * t - 1 {
            // grow the tree: fresh root above the old one, then split
            let new_root = ops.create_node();
            ops.set_child(new_root, 0, *root);
            Self::split_child(ops, new_root, 0);
            *root = new_root;
        }

        let mut path = BtPath::new();
        let mut cn = *root;

        loop {
            let n = ops.key_count(cn);
            let mut i = partition_point(n, |j| ops.key_lt(&Self::key_at(ops, cn, j), &key));

            if !self.multikey && i < n && ops.key_eq(&Self::key_at(ops, cn, i), &key) {
                return None;
            }

            if Self::is_leaf(ops, cn) {
                for j in (i..n).rev() {
                    let h = ops.extract_holder(cn, j);
                    ops.set_holder(cn, j + 1, h);
                }
                ops.set_holder(cn, i, holder);
                path.push(cn, i);
                return Some(path);
            }

            let mut child = ops.child(cn, i);
            if ops.key_count(child) == 2 * t - 1 {
                Self::split_child(ops, cn, i);

                let sep = Self::key_at(ops, cn, i);
                if ops.key_lt(&sep, &key) {
                    i += 1;
                } else if !self.multikey && ops.key_eq(&sep, &key) {
                    return None;
                }
                child = ops.child(cn, i);
            }

            path.push(cn, i);
            cn = child;
        }
    }

    /// Splits the full child at `nth`; the median rises into `parent`.
    fn split_child<A: BtreeOps>(ops: &mut A, parent: A::Id, nth: usize) {
        let t = ops.order();
        let child = ops.child(parent, nth);
        debug_assert_eq!(2 * t - 1, ops.key_count(child));

        let right = ops.create_node();

        for j in t..(2 * t - 1) {
            let h = ops.extract_holder(child, j);
            ops.set_holder(right, j - t, h);
        }

        if !Self::is_leaf(ops, child) {
            for j in t..(2 * t) {
                let c = ops.child(child, j);
                ops.clear_child(child, j);
                ops.set_child(right, j - t, c);
            }
        }

        let median = ops.extract_holder(child, t - 1);

        let pn = ops.key_count(parent);
        for j in (nth..pn).rev() {
            let h = ops.extract_holder(parent, j);
            ops.set_holder(parent, j + 1, h);
        }

        let pc = ops.child_count(parent);
        for j in ((nth + 1)..pc).rev() {
            let c = ops.child(parent, j);
            ops.clear_child(parent, j);
            ops.set_child(parent, j + 1, c);
        }

        ops.set_holder(parent, nth, median);
        ops.set_child(parent, nth + 1, right);
    }

    /// Removes the holder the path points at.
    pub fn delete<A: BtreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        path: &BtPath<A::Id>,
    ) -> Option<A::Holder> {
        debug_assert!(path.exists());
        let key = Self::key_at(ops, path.node(), path.index());
        self.delete_by_key(ops, root, &key)
    }

    /// Removes one holder with the given key, topping nodes up on descent.
    pub fn delete_by_key<A: BtreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        key: &A::Key,
    ) -> Option<A::Holder> {
        if ops.is_null(*root) {
            return None;
        }

        let t = ops.order();
        let mut cn = *root;

        loop {
            let n = ops.key_count(cn);
            let i = partition_point(n, |j| ops.key_lt(&Self::key_at(ops, cn, j), key));
            let found = i < n && ops.key_eq(&Self::key_at(ops, cn, i), key);

            if Self::is_leaf(ops, cn) {
                if !found {
                    return None;
                }
                let h = ops.extract_holder(cn, i);
                for j in (i + 1)..n {
                    let moved = ops.extract_holder(cn, j);
                    ops.set_holder(cn, j - 1, moved);
                }
                if cn == *root && n == 1 {
                    ops.release_node(cn);
                    *root = ops.null();
                }
                return Some(h);
            }

            if found {
                let left = ops.child(cn, i);
                let right = ops.child(cn, i + 1);

                if ops.key_count(right) >= t {
                    let succ = Self::take_min(ops, right);
                    let out = ops.extract_holder(cn, i);
                    ops.set_holder(cn, i, succ);
                    return Some(out);
                }

                if ops.key_count(left) >= t {
                    let pred = Self::take_max(ops, left);
                    let out = ops.extract_holder(cn, i);
                    ops.set_holder(cn, i, pred);
                    return Some(out);
                }

                // both neighbours minimal: the separator drops into the
                // merged node and the search continues inside it
                let merged = Self::merge_children(ops, cn, i);
                if cn == *root && ops.key_count(cn) == 0 {
                    ops.release_node(cn);
                    *root = merged;
                }
                cn = merged;
                continue;
            }

            let child = ops.child(cn, i);
            if ops.key_count(child) == t - 1 {
                Self::fill_child(ops, cn, i);
                if cn == *root && ops.key_count(cn) == 0 {
                    let only = ops.child(cn, 0);
                    ops.clear_child(cn, 0);
                    ops.release_node(cn);
                    *root = only;
                    cn = only;
                }
                continue;
            }

            cn = child;
        }
    }

    /// Extracts the smallest holder of the subtree at `sub`, which must
    /// hold at least *t* keys.
    fn take_min<A: BtreeOps>(ops: &mut A, sub: A::Id) -> A::Holder {
        let t = ops.order();
        let mut cn = sub;

        loop {
            if Self::is_leaf(ops, cn) {
                let n = ops.key_count(cn);
                let h = ops.extract_holder(cn, 0);
                for j in 1..n {
                    let moved = ops.extract_holder(cn, j);
                    ops.set_holder(cn, j - 1, moved);
                }
                return h;
            }

            let child = ops.child(cn, 0);
            if ops.key_count(child) == t - 1 {
                Self::fill_child(ops, cn, 0);
                continue;
            }
            cn = child;
        }
    }

    /// Extracts the largest holder of the subtree at `sub`.
    fn take_max<A: BtreeOps>(ops: &mut A, sub: A::Id) -> A::Holder {
        let t = ops.order();
        let mut cn = sub;

        loop {
            if Self::is_leaf(ops, cn) {
                let n = ops.key_count(cn);
                return ops.extract_holder(cn, n - 1);
            }

            let last = ops.child_count(cn) - 1;
            let child = ops.child(cn, last);
            if ops.key_count(child) == t - 1 {
                Self::fill_child(ops, cn, last);
                continue;
            }
            cn = child;
        }
    }

    /// Brings the child at `nth` up to at least *t* keys.
    ///
    /// Any child but the leftmost deals with its left sibling only (rotate
    /// a key across when it can spare one, merge with it otherwise); the
    /// leftmost child has only its right neighbour to turn to.
    fn fill_child<A: BtreeOps>(ops: &mut A, parent: A::Id, nth: usize) {
        let t = ops.order();

        if nth > 0 {
            let child = ops.child(parent, nth);
            let left = ops.child(parent, nth - 1);
            let ln = ops.key_count(left);

            if ln < t {
                Self::merge_children(ops, parent, nth - 1);
                return;
            }

            let cnn = ops.key_count(child);
            for j in (0..cnn).rev() {
                let h = ops.extract_holder(child, j);
                ops.set_holder(child, j + 1, h);
            }
            let sep = ops.extract_holder(parent, nth - 1);
            ops.set_holder(child, 0, sep);
            let up = ops.extract_holder(left, ln - 1);
            ops.set_holder(parent, nth - 1, up);

            if !Self::is_leaf(ops, left) {
                let cc = ops.child_count(child);
                for j in (0..cc).rev() {
                    let c = ops.child(child, j);
                    ops.clear_child(child, j);
                    ops.set_child(child, j + 1, c);
                }
                let moved = ops.child(left, ln);
                ops.clear_child(left, ln);
                ops.set_child(child, 0, moved);
            }
            return;
        }

        let child = ops.child(parent, 0);
        let right = ops.child(parent, 1);
        let rn = ops.key_count(right);

        if rn < t {
            Self::merge_children(ops, parent, 0);
            return;
        }

        let cnn = ops.key_count(child);
        let sep = ops.extract_holder(parent, 0);
        ops.set_holder(child, cnn, sep);
        let up = ops.extract_holder(right, 0);
        ops.set_holder(parent, 0, up);
        for j in 1..rn {
            let h = ops.extract_holder(right, j);
            ops.set_holder(right, j - 1, h);
        }

        if !Self::is_leaf(ops, right) {
            let rc = ops.child_count(right);
            let moved = ops.child(right, 0);
            ops.clear_child(right, 0);
            ops.set_child(child, cnn + 1, moved);
            for j in 1..rc {
                let c = ops.child(right, j);
                ops.clear_child(right, j);
                ops.set_child(right, j - 1, c);
            }
        }
    }

    /// Merges children `nth` and `nth + 1` around separator `nth`.
    fn merge_children<A: BtreeOps>(ops: &mut A, parent: A::Id, nth: usize) -> A::Id {
        let pn = ops.key_count(parent);
        let pc = ops.child_count(parent);
        let left = ops.child(parent, nth);
        let right = ops.child(parent, nth + 1);
        let ln = ops.key_count(left);
        let rn = ops.key_count(right);

        let sep = ops.extract_holder(parent, nth);
        ops.set_holder(left, ln, sep);

        for j in 0..rn {
            let h = ops.extract_holder(right, j);
            ops.set_holder(left, ln + 1 + j, h);
        }

        if !Self::is_leaf(ops, right) {
            for j in 0..=rn {
                let c = ops.child(right, j);
                ops.clear_child(right, j);
                ops.set_child(left, ln + 1 + j, c);
            }
        }

        for j in (nth + 1)..pn {
            let h = ops.extract_holder(parent, j);
            ops.set_holder(parent, j - 1, h);
        }
        ops.clear_child(parent, nth + 1);
        for j in (nth + 2)..pc {
            let c = ops.child(parent, j);
            ops.clear_child(parent, j);
            ops.set_child(parent, j - 1, c);
        }

        ops.release_node(right);
        left
    }

    /// Returns the path to a holder with the given key, or a null path.
    pub fn find<A: BtreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BtPath<A::Id> {
        let mut path = BtPath::new();
        let mut cn = root;

        if ops.is_null(cn) {
            return path;
        }

        loop {
            let n = ops.key_count(cn);
            let i = partition_point(n, |j| ops.key_lt(&Self::key_at(ops, cn, j), key));

            if i < n && ops.key_eq(&Self::key_at(ops, cn, i), key) {
                path.push(cn, i);
                return path;
            }

            if Self::is_leaf(ops, cn) {
                return BtPath::new();
            }

            path.push(cn, i);
            cn = ops.child(cn, i);
        }
    }

    /// First holder whose key is not less than `key`.
    pub fn lower_bound<A: BtreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BtPath<A::Id> {
        self.bound(ops, root, key, false)
    }

    /// First holder whose key is strictly greater than `key`.
    pub fn upper_bound<A: BtreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BtPath<A::Id> {
        self.bound(ops, root, key, true)
    }

    fn bound<A: BtreeOps>(&self, ops: &A, root: A::Id, key: &A::Key, strict: bool) -> BtPath<A::Id> {
        let mut path = BtPath::new();
        let mut best = None;
        let mut cn = root;

        if ops.is_null(cn) {
            return path;
        }

        loop {
            let n = ops.key_count(cn);
            let i = partition_point(n, |j| {
                let k = Self::key_at(ops, cn, j);
                if strict {
                    !ops.key_lt(key, &k)
                } else {
                    ops.key_lt(&k, key)
                }
            });

            path.push(cn, i);
            if i < n {
                best = Some(path.stack.len());
            }

            if Self::is_leaf(ops, cn) {
                break;
            }
            cn = ops.child(cn, i);
        }

        match best {
            Some(len) => {
                path.stack.truncate(len);
                path
            }
            None => BtPath::new(),
        }
    }

    /// Path to the smallest holder, or a null path when empty.
    pub fn first<A: BtreeOps>(&self, ops: &A, root: A::Id) -> BtPath<A::Id> {
        let mut path = BtPath::new();
        if ops.is_null(root) {
            return path;
        }

        let mut cn = root;
        loop {
            path.push(cn, 0);
            if Self::is_leaf(ops, cn) {
                return path;
            }
            cn = ops.child(cn, 0);
        }
    }

    /// Path to the largest holder, or a null path when empty.
    pub fn last<A: BtreeOps>(&self, ops: &A, root: A::Id) -> BtPath<A::Id> {
        let mut path = BtPath::new();
        if ops.is_null(root) {
            return path;
        }

        let mut cn = root;
        loop {
            let n = ops.key_count(cn);
            if Self::is_leaf(ops, cn) {
                path.push(cn, n - 1);
                return path;
            }
            path.push(cn, n);
            cn = ops.child(cn, n);
        }
    }

    /// Advances the path to the in-order successor; a null path past the end.
    pub fn forward<A: BtreeOps>(&self, ops: &A, path: &mut BtPath<A::Id>) {
        debug_assert!(path.exists());

        let last = path.stack.len() - 1;
        let (node, i) = path.stack[last];

        if !Self::is_leaf(ops, node) {
            path.stack[last].1 = i + 1;
            let mut cn = ops.child(node, i + 1);
            loop {
                path.push(cn, 0);
                if Self::is_leaf(ops, cn) {
                    return;
                }
                cn = ops.child(cn, 0);
            }
        }

        if i + 1 < ops.key_count(node) {
            path.stack[last].1 = i + 1;
            return;
        }

        loop {
            path.stack.pop();
            let Some(&(p, ci)) = path.stack.last() else {
                return;
            };
            if ci < ops.key_count(p) {
                return;
            }
        }
    }

    /// Steps the path to the in-order predecessor; from a null path this
    /// yields the last holder.
    pub fn backward<A: BtreeOps>(&self, ops: &A, root: A::Id, path: &mut BtPath<A::Id>) {
        if !path.exists() {
            *path = self.last(ops, root);
            return;
        }

        let last = path.stack.len() - 1;
        let (node, i) = path.stack[last];

        if !Self::is_leaf(ops, node) {
            let mut cn = ops.child(node, i);
            loop {
                let n = ops.key_count(cn);
                if Self::is_leaf(ops, cn) {
                    path.push(cn, n - 1);
                    return;
                }
                path.push(cn, n);
                cn = ops.child(cn, n);
            }
        }

        if i > 0 {
            path.stack[last].1 = i - 1;
            return;
        }

        loop {
            path.stack.pop();
            let Some(&(p, ci)) = path.stack.last() else {
                return;
            };
            if ci > 0 {
                let top = path.stack.len() - 1;
                path.stack[top].1 = ci - 1;
                return;
            }
        }
    }

    /// Borrows the holder the path points at.
    pub fn holder<'a, A: BtreeOps>(&self, ops: &'a A, path: &BtPath<A::Id>) -> &'a A::Holder {
        debug_assert!(path.exists());
        ops.holder(path.node(), path.index())
    }

    /// Verifies degree bounds, uniform leaf depth and key ordering.
    pub fn check_consistency<A: BtreeOps>(&self, ops: &A, root: A::Id) -> bool {
        if ops.is_null(root) {
            return true;
        }
        self.check_node(ops, root, true).is_some()
    }

    /// Returns the leaf depth of the subtree when it is consistent.
    fn check_node<A: BtreeOps>(&self, ops: &A, node: A::Id, is_root: bool) -> Option<usize> {
        let t = ops.order();
        let n = ops.key_count(node);

        if n > 2 * t - 1 {
            return None;
        }
        if !is_root && n < t - 1 {
            return None;
        }
        if is_root && n == 0 {
            return None;
        }

        for j in 1..n {
            let a = Self::key_at(ops, node, j - 1);
            let b = Self::key_at(ops, node, j);
            let ordered = if self.multikey {
                !ops.key_lt(&b, &a)
            } else {
                ops.key_lt(&a, &b)
            };
            if !ordered {
                return None;
            }
        }

        if Self::is_leaf(ops, node) {
            return Some(1);
        }

        if ops.child_count(node) != n + 1 {
            return None;
        }

        let mut depth = None;
        for j in 0..=n {
            let child = ops.child(node, j);
            let d = self.check_node(ops, child, false)?;
            if *depth.get_or_insert(d) != d {
                return None;
            }

            // child keys must respect the surrounding separators
            let cn = ops.key_count(child);
            if cn > 0 {
                if j > 0 {
                    let sep = Self::key_at(ops, node, j - 1);
                    let lo = Self::key_at(ops, child, 0);
                    let ok = if self.multikey {
                        !ops.key_lt(&lo, &sep)
                    } else {
                        ops.key_lt(&sep, &lo)
                    };
                    if !ok {
                        return None;
                    }
                }
                if j < n {
                    let sep = Self::key_at(ops, node, j);
                    let hi = Self::key_at(ops, child, cn - 1);
                    let ok = if self.multikey {
                        !ops.key_lt(&sep, &hi)
                    } else {
                        ops.key_lt(&hi, &sep)
                    };
                    if !ok {
                        return None;
                    }
                }
            }
        }

        depth.map(|d| d + 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::BtreeAlgo;
    use crate::tree::arena::BtreeArena;
    use crate::tree::ops::BtreeOps;
    use test_log::test;

    fn collect(ops: &BtreeArena<i32>, root: u32) -> Vec<i32> {
        let algo = BtreeAlgo::unique();
        let mut out = Vec::new();
        let mut path = algo.first(ops, root);
        while path.exists() {
            out.push(*algo.holder(ops, &path));
            algo.forward(ops, &mut path);
        }
        out
    }

    #[test]
    fn btree_insert_ascending_and_descending() {
        for order in [2, 3, 4] {
            let algo = BtreeAlgo::unique();
            let mut ops = BtreeArena::new(order);
            let mut root = ops.null();

            for v in 0..100 {
                assert!(algo.insert(&mut ops, &mut root, v).is_some());
                assert!(algo.check_consistency(&ops, root));
            }
            for v in (-100..0).rev() {
                assert!(algo.insert(&mut ops, &mut root, v).is_some());
            }

            assert!(algo.check_consistency(&ops, root));
            assert_eq!((-100..100).collect::<Vec<_>>(), collect(&ops, root));
        }
    }

    #[test]
    fn btree_duplicate_refused() {
        let algo = BtreeAlgo::unique();
        let mut ops = BtreeArena::new(2);
        let mut root = ops.null();

        for v in 0..20 {
            assert!(algo.insert(&mut ops, &mut root, v).is_some());
        }
        assert!(algo.insert(&mut ops, &mut root, 7).is_none());
        assert_eq!((0..20).collect::<Vec<_>>(), collect(&ops, root));
    }

    #[test]
    fn btree_delete_shrinks_root() {
        let algo = BtreeAlgo::unique();
        let mut ops = BtreeArena::new(2);
        let mut root = ops.null();

        for v in 0..30 {
            algo.insert(&mut ops, &mut root, v);
        }

        for v in 0..30 {
            assert!(algo.delete_by_key(&mut ops, &mut root, &v).is_some());
            assert!(algo.check_consistency(&ops, root));
        }

        assert!(ops.is_null(root));
        assert!(ops.is_empty());
    }

    #[test]
    fn btree_bounds() {
        let algo = BtreeAlgo::unique();
        let mut ops = BtreeArena::new(3);
        let mut root = ops.null();

        for v in [10, 20, 30, 40, 50] {
            algo.insert(&mut ops, &mut root, v);
        }

        let lb = algo.lower_bound(&ops, root, &25);
        assert_eq!(30, *algo.holder(&ops, &lb));

        let lb = algo.lower_bound(&ops, root, &30);
        assert_eq!(30, *algo.holder(&ops, &lb));

        let ub = algo.upper_bound(&ops, root, &30);
        assert_eq!(40, *algo.holder(&ops, &ub));

        assert!(!algo.lower_bound(&ops, root, &55).exists());
        assert!(!algo.find(&ops, root, &25).exists());
    }

    #[test]
    fn btree_backward_traversal() {
        let algo = BtreeAlgo::unique();
        let mut ops = BtreeArena::new(2);
        let mut root = ops.null();

        for v in 0..25 {
            algo.insert(&mut ops, &mut root, v);
        }

        let mut out = Vec::new();
        let mut path = super::BtPath::new();
        algo.backward(&ops, root, &mut path);
        while path.exists() {
            out.push(*algo.holder(&ops, &path));
            algo.backward(&ops, root, &mut path);
        }

        assert_eq!((0..25).rev().collect::<Vec<_>>(), out);
    }
}
