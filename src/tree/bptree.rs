//! B+-tree algorithm with interior order *t_i* and leaf order *t_l*.
//!
//! Holders live only in leaves; interior keys are separators mirroring the
//! largest key of the subtree left of them. Leaves are chained in ascending
//! key order, which makes range scans a linked-list walk.

use crate::binary_search::partition_point;
use crate::bounded::BoundedVec;
use crate::tree::ops::BptreeOps;

/// Inline capacity of a traversal path; `log_ti(n)` stays tiny.
const PATH_CAPACITY: usize = 16;

type PathStack<Id> = BoundedVec<(Id, usize), PATH_CAPACITY>;

/// Path from the root to a holder position.
///
/// Each stack entry pairs a node with its child index inside the parent
/// (0 for the root); `index` addresses the holder inside the final leaf.
pub struct BpPath<Id> {
    stack: PathStack<Id>,
    index: usize,
}

impl<Id: Copy + Eq> BpPath<Id> {
    pub(crate) fn new() -> Self {
        Self {
            stack: BoundedVec::new(),
            index: 0,
        }
    }

    /// Returns `true` if the path designates a holder.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Leaf of the designated holder.
    #[must_use]
    pub fn leaf(&self) -> Id {
        self.stack[self.stack.len() - 1].0
    }

    /// Holder index inside [`BpPath::leaf`].
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<Id: Copy> Clone for BpPath<Id> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            index: self.index,
        }
    }
}

/// B+-tree algorithm over a [`BptreeOps`] adapter.
#[derive(Copy, Clone, Debug)]
pub struct BptreeAlgo {
    multikey: bool,
}

impl BptreeAlgo {
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

    fn leaf_key_at<A: BptreeOps>(ops: &A, leaf: A::Id, nth: usize) -> A::Key {
        ops.key_of(ops.holder(leaf, nth))
    }

    /// Child index to descend through for `key` (first separator ≥ key).
    fn descend_index<A: BptreeOps>(ops: &A, node: A::Id, key: &A::Key) -> usize {
        let n = ops.interior_key_count(node);
        partition_point(n, |j| ops.key_lt(&ops.interior_key(node, j), key))
    }

    /// Child index for upper-bound descent (first separator > key).
    fn descend_index_after<A: BptreeOps>(ops: &A, node: A::Id, key: &A::Key) -> usize {
        let n = ops.interior_key_count(node);
        partition_point(n, |j| !ops.key_lt(key, &ops.interior_key(node, j)))
    }

    /// Inserts a holder, splitting full nodes along the descent.
    ///
    /// Returns the path to the inserted holder, or `None` when the key is
    /// already present in unique mode (splits done before the duplicate was
    /// spotted are kept; they do not disturb the tree invariants).
    pub fn insert<A: BptreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        holder: A::Holder,
    ) -> Option<BpPath<A::Id>> {
        let key = ops.key_of(&holder);
        let tl = ops.leaf_order();
        let ti = ops.interior_order();

        if ops.is_null(*root) {
            let leaf = ops.create_leaf();
            ops.set_holder(leaf, 0, holder);
            *root = leaf;
            let mut path = BpPath::new();
            path.stack.push((leaf, 0));
            return Some(path);
        }

        let mut stack: PathStack<A::Id> = BoundedVec::new();
        let mut cn = *root;
        let mut ci = 0;

        loop {
            if ops.is_leaf(cn) {
                if ops.leaf_len(cn) == 2 * tl - 1 {
                    let (sep, right) = Self::split_leaf(ops, root, &mut stack, cn, ci);
                    if ops.key_lt(&sep, &key) {
                        cn = right;
                        ci += 1;
                    }
                }
                stack.push((cn, ci));
                break;
            }

            if ops.interior_key_count(cn) == 2 * ti - 1 {
                let (sep, right) = Self::split_interior(ops, root, &mut stack, cn, ci);
                if !ops.key_lt(&key, &sep) {
                    cn = right;
                    ci += 1;
                }
            }

            stack.push((cn, ci));
            ci = Self::descend_index(ops, cn, &key);
            cn = ops.child(cn, ci);
        }

        let len = ops.leaf_len(cn);
        let pos = partition_point(len, |j| !ops.key_lt(&key, &Self::leaf_key_at(ops, cn, j)));

        if !self.multikey {
            let prev_key = if pos > 0 {
                Some(Self::leaf_key_at(ops, cn, pos - 1))
            } else {
                self.prev_leaf_last_key(ops, &stack)
            };
            if let Some(pk) = prev_key {
                if ops.key_eq(&pk, &key) {
                    return None;
                }
            }
        }

        for j in (pos..len).rev() {
            let h = ops.extract_holder(cn, j);
            ops.set_holder(cn, j + 1, h);
        }
        ops.set_holder(cn, pos, holder);

        Some(BpPath { stack, index: pos })
    }

    /// Last key of the nearest non-empty leaf left of the path's leaf.
    fn prev_leaf_last_key<A: BptreeOps>(
        &self,
        ops: &A,
        stack: &PathStack<A::Id>,
    ) -> Option<A::Key> {
        let mut walk = stack.clone();
        loop {
            if !Self::prev_leaf_path(ops, &mut walk) {
                return None;
            }
            let leaf = walk[walk.len() - 1].0;
            let len = ops.leaf_len(leaf);
            if len > 0 {
                return Some(Self::leaf_key_at(ops, leaf, len - 1));
            }
            if !ops.allow_empty_leaf() {
                return None;
            }
        }
    }

    /// Splits the full interior node `cn`; returns the risen separator and
    /// the new right sibling. Grows the tree when `cn` is the root.
    fn split_interior<A: BptreeOps>(
        ops: &mut A,
        root: &mut A::Id,
        stack: &mut PathStack<A::Id>,
        cn: A::Id,
        ci: usize,
    ) -> (A::Key, A::Id) {
        let ti = ops.interior_order();
        let kc = 2 * ti - 1;
        let right = ops.create_interior();

        for j in ti..kc {
            let k = ops.interior_key(cn, j);
            ops.interior_clear_key(cn, j);
            ops.interior_set_key(right, j - ti, k);
        }
        for j in ti..=kc {
            let c = ops.child(cn, j);
            ops.clear_child(cn, j);
            ops.set_child(right, j - ti, c);
        }

        let sep = ops.interior_key(cn, ti - 1);
        ops.interior_clear_key(cn, ti - 1);

        Self::insert_into_parent(ops, root, stack, cn, ci, sep.clone(), right);
        (sep, right)
    }

    /// Splits the full leaf `cn`: the left half keeps `t_l - 1` holders,
    /// the right receives the remaining `t_l`, and the list is stitched.
    fn split_leaf<A: BptreeOps>(
        ops: &mut A,
        root: &mut A::Id,
        stack: &mut PathStack<A::Id>,
        cn: A::Id,
        ci: usize,
    ) -> (A::Key, A::Id) {
        let tl = ops.leaf_order();
        let cap = 2 * tl - 1;
        let right = ops.create_leaf();

        for j in (tl - 1)..cap {
            let h = ops.extract_holder(cn, j);
            ops.set_holder(right, j - (tl - 1), h);
        }

        let old_next = ops.leaf_next(cn);
        ops.leaf_set_next(right, old_next);
        ops.leaf_set_next(cn, right);
        if ops.has_prev_links() {
            ops.leaf_set_prev(right, cn);
            if !ops.is_null(old_next) {
                ops.leaf_set_prev(old_next, right);
            }
        }

        let sep = Self::leaf_key_at(ops, cn, tl - 2);

        Self::insert_into_parent(ops, root, stack, cn, ci, sep.clone(), right);
        (sep, right)
    }

    /// Hangs `right` (with separator `sep`) next to `left` under the stack
    /// top, creating a new root when `left` was the root.
    fn insert_into_parent<A: BptreeOps>(
        ops: &mut A,
        root: &mut A::Id,
        stack: &mut PathStack<A::Id>,
        left: A::Id,
        ci: usize,
        sep: A::Key,
        right: A::Id,
    ) {
        if stack.is_empty() {
            let new_root = ops.create_interior();
            ops.set_child(new_root, 0, left);
            ops.set_child(new_root, 1, right);
            ops.interior_set_key(new_root, 0, sep);
            *root = new_root;
            stack.push((new_root, 0));
            return;
        }

        let p = stack[stack.len() - 1].0;
        let pk = ops.interior_key_count(p);
        let pc = ops.child_count(p);

        for j in (ci..pk).rev() {
            let k = ops.interior_key(p, j);
            ops.interior_set_key(p, j + 1, k);
        }
        for j in ((ci + 1)..pc).rev() {
            let c = ops.child(p, j);
            ops.clear_child(p, j);
            ops.set_child(p, j + 1, c);
        }
        ops.interior_set_key(p, ci, sep);
        ops.set_child(p, ci + 1, right);
    }

    /// Removes the holder the path points at and returns it.
    ///
    /// The path is consumed; sibling paths are invalidated by the
    /// restructuring this may trigger.
    pub fn delete<A: BptreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        path: &BpPath<A::Id>,
    ) -> A::Holder {
        debug_assert!(path.exists());

        let leaf = path.leaf();
        let idx = path.index;
        let len = ops.leaf_len(leaf);
        debug_assert!(idx < len);

        let out = ops.extract_holder(leaf, idx);
        for j in (idx + 1)..len {
            let h = ops.extract_holder(leaf, j);
            ops.set_holder(leaf, j - 1, h);
        }
        let new_len = len - 1;

        if ops.allow_empty_leaf() {
            if new_len > 0 && idx == new_len {
                let last = Self::leaf_key_at(ops, leaf, new_len - 1);
                Self::fix_separator(ops, &path.stack, &last);
            }
            return out;
        }

        if leaf == *root {
            if new_len == 0 {
                ops.release_node(leaf);
                *root = ops.null();
            }
            return out;
        }

        if new_len == 0 {
            self.unlink_leaf(ops, root, path);
        } else if idx == new_len {
            let last = Self::leaf_key_at(ops, leaf, new_len - 1);
            Self::fix_separator(ops, &path.stack, &last);
        }

        out
    }

    /// Overwrites the nearest ancestor separator that mirrors the maximum
    /// of the subtree the path descends through.
    fn fix_separator<A: BptreeOps>(ops: &mut A, stack: &PathStack<A::Id>, key: &A::Key) {
        for level in (1..stack.len()).rev() {
            let ci = stack[level].1;
            let parent = stack[level - 1].0;
            if ci + 1 < ops.child_count(parent) {
                ops.interior_set_key(parent, ci, key.clone());
                return;
            }
        }
    }

    /// Detaches a now-empty leaf: stitches the list around it, removes its
    /// child slot, then repairs interior underflow up the path.
    fn unlink_leaf<A: BptreeOps>(&self, ops: &mut A, root: &mut A::Id, path: &BpPath<A::Id>) {
        let leaf = path.leaf();

        let prev = if ops.has_prev_links() {
            ops.leaf_prev(leaf)
        } else {
            let mut walk = path.stack.clone();
            if Self::prev_leaf_path(ops, &mut walk) {
                walk[walk.len() - 1].0
            } else {
                ops.null()
            }
        };
        let next = ops.leaf_next(leaf);

        if !ops.is_null(prev) {
            ops.leaf_set_next(prev, next);
        }
        if ops.has_prev_links() && !ops.is_null(next) {
            ops.leaf_set_prev(next, prev);
        }

        let level = path.stack.len() - 1;
        let parent = path.stack[level - 1].0;
        let ci = path.stack[level].1;
        Self::remove_child(ops, parent, ci);
        ops.release_node(leaf);

        self.rebalance_interior(ops, root, &path.stack, level - 1);
    }

    /// Removes child slot `ci` of `parent` together with its covering
    /// separator, closing both gaps.
    fn remove_child<A: BptreeOps>(ops: &mut A, parent: A::Id, ci: usize) {
        let kc = ops.interior_key_count(parent);
        let cc = ops.child_count(parent);

        if kc > 0 {
            let sep_idx = if ci < kc { ci } else { ci - 1 };
            for j in (sep_idx + 1)..kc {
                let k = ops.interior_key(parent, j);
                ops.interior_set_key(parent, j - 1, k);
            }
            ops.interior_clear_key(parent, kc - 1);
        }

        ops.clear_child(parent, ci);
        for j in (ci + 1)..cc {
            let c = ops.child(parent, j);
            ops.clear_child(parent, j);
            ops.set_child(parent, j - 1, c);
        }
    }

    /// Repairs interior occupancy from `level` upwards after a child was
    /// removed below, borrowing from a sibling (left first) or merging.
    fn rebalance_interior<A: BptreeOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        stack: &PathStack<A::Id>,
        mut level: usize,
    ) {
        let ti = ops.interior_order();

        loop {
            let node = stack[level].0;

            if level == 0 {
                if !ops.is_leaf(node) && ops.interior_key_count(node) == 0 {
                    let only = ops.child(node, 0);
                    ops.clear_child(node, 0);
                    ops.release_node(node);
                    *root = only;
                }
                return;
            }

            if ops.interior_key_count(node) >= ti - 1 {
                return;
            }

            let parent = stack[level - 1].0;
            let ci = stack[level].1;

            if ci > 0 {
                let left = ops.child(parent, ci - 1);
                if ops.interior_key_count(left) >= ti {
                    Self::rotate_from_left(ops, parent, ci);
                    return;
                }
            }
            if ci + 1 < ops.child_count(parent) {
                let right = ops.child(parent, ci + 1);
                if ops.interior_key_count(right) >= ti {
                    Self::rotate_from_right(ops, parent, ci);
                    return;
                }
            }

            let j = if ci > 0 { ci - 1 } else { ci };
            Self::merge_interior(ops, parent, j);
            level -= 1;
        }
    }

    /// Drops the parent separator into the underfull child and raises the
    /// left sibling's last separator, moving one child across.
    fn rotate_from_left<A: BptreeOps>(ops: &mut A, parent: A::Id, ci: usize) {
        let node = ops.child(parent, ci);
        let left = ops.child(parent, ci - 1);
        let lk = ops.interior_key_count(left);
        let nk = ops.interior_key_count(node);
        let nc = ops.child_count(node);

        for j in (0..nk).rev() {
            let k = ops.interior_key(node, j);
            ops.interior_set_key(node, j + 1, k);
        }
        for j in (0..nc).rev() {
            let c = ops.child(node, j);
            ops.clear_child(node, j);
            ops.set_child(node, j + 1, c);
        }

        let sep = ops.interior_key(parent, ci - 1);
        ops.interior_set_key(node, 0, sep);
        let up = ops.interior_key(left, lk - 1);
        ops.interior_clear_key(left, lk - 1);
        ops.interior_set_key(parent, ci - 1, up);

        let moved = ops.child(left, lk);
        ops.clear_child(left, lk);
        ops.set_child(node, 0, moved);
    }

    /// Mirror image of [`BptreeAlgo::rotate_from_left`].
    fn rotate_from_right<A: BptreeOps>(ops: &mut A, parent: A::Id, ci: usize) {
        let node = ops.child(parent, ci);
        let right = ops.child(parent, ci + 1);
        let rk = ops.interior_key_count(right);
        let rc = ops.child_count(right);
        let nk = ops.interior_key_count(node);
        let nc = ops.child_count(node);

        let sep = ops.interior_key(parent, ci);
        ops.interior_set_key(node, nk, sep);
        let up = ops.interior_key(right, 0);
        ops.interior_set_key(parent, ci, up);
        for j in 1..rk {
            let k = ops.interior_key(right, j);
            ops.interior_set_key(right, j - 1, k);
        }
        ops.interior_clear_key(right, rk - 1);

        let moved = ops.child(right, 0);
        ops.clear_child(right, 0);
        ops.set_child(node, nc, moved);
        for j in 1..rc {
            let c = ops.child(right, j);
            ops.clear_child(right, j);
            ops.set_child(right, j - 1, c);
        }
    }

    /// Merges interior children `j` and `j + 1` around separator `j`.
    fn merge_interior<A: BptreeOps>(ops: &mut A, parent: A::Id, j: usize) {
        let left = ops.child(parent, j);
        let right = ops.child(parent, j + 1);
        let lk = ops.interior_key_count(left);
        let rk = ops.interior_key_count(right);
        let lc = ops.child_count(left);
        let rc = ops.child_count(right);

        let sep = ops.interior_key(parent, j);
        ops.interior_set_key(left, lk, sep);

        for m in 0..rk {
            let k = ops.interior_key(right, m);
            ops.interior_clear_key(right, m);
            ops.interior_set_key(left, lk + 1 + m, k);
        }
        for m in 0..rc {
            let c = ops.child(right, m);
            ops.clear_child(right, m);
            ops.set_child(left, lc + m, c);
        }

        Self::remove_child(ops, parent, j + 1);
        ops.release_node(right);
    }

    /// Returns the path to a holder with the given key, or a null path.
    pub fn find<A: BptreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BpPath<A::Id> {
        let path = self.lower_bound(ops, root, key);
        if path.exists() {
            let k = Self::leaf_key_at(ops, path.leaf(), path.index);
            if ops.key_eq(&k, key) {
                return path;
            }
        }
        BpPath::new()
    }

    /// First holder whose key is not less than `key`.
    pub fn lower_bound<A: BptreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BpPath<A::Id> {
        self.bound(ops, root, key, false)
    }

    /// First holder whose key is strictly greater than `key`.
    pub fn upper_bound<A: BptreeOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> BpPath<A::Id> {
        self.bound(ops, root, key, true)
    }

    fn bound<A: BptreeOps>(&self, ops: &A, root: A::Id, key: &A::Key, strict: bool) -> BpPath<A::Id> {
        let mut path = BpPath::new();
        if ops.is_null(root) {
            return path;
        }

        let mut cn = root;
        let mut ci = 0;
        loop {
            path.stack.push((cn, ci));
            if ops.is_leaf(cn) {
                break;
            }
            ci = if strict {
                Self::descend_index_after(ops, cn, key)
            } else {
                Self::descend_index(ops, cn, key)
            };
            cn = ops.child(cn, ci);
        }

        let len = ops.leaf_len(cn);
        let pos = partition_point(len, |j| {
            let k = Self::leaf_key_at(ops, cn, j);
            if strict {
                !ops.key_lt(key, &k)
            } else {
                ops.key_lt(&k, key)
            }
        });

        if pos < len {
            path.index = pos;
            return path;
        }

        // everything in this leaf is below the bound: step right
        loop {
            if !Self::next_leaf_path(ops, &mut path.stack) {
                return BpPath::new();
            }
            let leaf = path.stack[path.stack.len() - 1].0;
            if ops.leaf_len(leaf) > 0 {
                path.index = 0;
                return path;
            }
        }
    }

    /// Path to the smallest holder, or a null path when empty.
    pub fn first<A: BptreeOps>(&self, ops: &A, root: A::Id) -> BpPath<A::Id> {
        let mut path = BpPath::new();
        if ops.is_null(root) {
            return path;
        }

        let mut cn = root;
        let mut ci = 0;
        loop {
            path.stack.push((cn, ci));
            if ops.is_leaf(cn) {
                break;
            }
            ci = 0;
            cn = ops.child(cn, 0);
        }

        if ops.leaf_len(cn) == 0 {
            // empty-leaf mode may park empty leaves at the front
            loop {
                if !Self::next_leaf_path(ops, &mut path.stack) {
                    return BpPath::new();
                }
                let leaf = path.stack[path.stack.len() - 1].0;
                if ops.leaf_len(leaf) > 0 {
                    break;
                }
            }
        }

        path.index = 0;
        path
    }

    /// Path to the largest holder, or a null path when empty.
    pub fn last<A: BptreeOps>(&self, ops: &A, root: A::Id) -> BpPath<A::Id> {
        let mut path = BpPath::new();
        if ops.is_null(root) {
            return path;
        }

        let mut cn = root;
        let mut ci = 0;
        loop {
            path.stack.push((cn, ci));
            if ops.is_leaf(cn) {
                break;
            }
            ci = ops.child_count(cn) - 1;
            cn = ops.child(cn, ci);
        }

        loop {
            let leaf = path.stack[path.stack.len() - 1].0;
            let len = ops.leaf_len(leaf);
            if len > 0 {
                path.index = len - 1;
                return path;
            }
            if !Self::prev_leaf_path(ops, &mut path.stack) {
                return BpPath::new();
            }
        }
    }

    /// Advances the path to the next holder; a null path past the end.
    pub fn forward<A: BptreeOps>(&self, ops: &A, path: &mut BpPath<A::Id>) {
        debug_assert!(path.exists());

        let leaf = path.leaf();
        if path.index + 1 < ops.leaf_len(leaf) {
            path.index += 1;
            return;
        }

        loop {
            if !Self::next_leaf_path(ops, &mut path.stack) {
                path.stack.clear();
                path.index = 0;
                return;
            }
            let leaf = path.stack[path.stack.len() - 1].0;
            if ops.leaf_len(leaf) > 0 {
                path.index = 0;
                return;
            }
        }
    }

    /// Steps the path to the previous holder; from a null path this yields
    /// the last holder.
    pub fn backward<A: BptreeOps>(&self, ops: &A, root: A::Id, path: &mut BpPath<A::Id>) {
        if !path.exists() {
            *path = self.last(ops, root);
            return;
        }

        if path.index > 0 {
            path.index -= 1;
            return;
        }

        loop {
            if !Self::prev_leaf_path(ops, &mut path.stack) {
                path.stack.clear();
                path.index = 0;
                return;
            }
            let leaf = path.stack[path.stack.len() - 1].0;
            let len = ops.leaf_len(leaf);
            if len > 0 {
                path.index = len - 1;
                return;
            }
        }
    }

    /// Moves the stack to the next leaf in tree order. Returns `false`
    /// (with the stack drained) when the current leaf is the last.
    fn next_leaf_path<A: BptreeOps>(ops: &A, stack: &mut PathStack<A::Id>) -> bool {
        loop {
            let Some((_, ci)) = stack.pop() else {
                return false;
            };
            let Some(&(p, _)) = stack.last() else {
                return false;
            };

            if ci + 1 < ops.child_count(p) {
                let mut cn = ops.child(p, ci + 1);
                stack.push((cn, ci + 1));
                while !ops.is_leaf(cn) {
                    cn = ops.child(cn, 0);
                    stack.push((cn, 0));
                }
                return true;
            }
        }
    }

    /// Moves the stack to the previous leaf in tree order.
    fn prev_leaf_path<A: BptreeOps>(ops: &A, stack: &mut PathStack<A::Id>) -> bool {
        loop {
            let Some((_, ci)) = stack.pop() else {
                return false;
            };
            let Some(&(p, _)) = stack.last() else {
                return false;
            };

            if ci > 0 {
                let mut cn = ops.child(p, ci - 1);
                stack.push((cn, ci - 1));
                while !ops.is_leaf(cn) {
                    let last = ops.child_count(cn) - 1;
                    cn = ops.child(cn, last);
                    stack.push((cn, last));
                }
                return true;
            }
        }
    }

    /// Borrows the holder the path points at.
    pub fn holder<'a, A: BptreeOps>(&self, ops: &'a A, path: &BpPath<A::Id>) -> &'a A::Holder {
        debug_assert!(path.exists());
        ops.holder(path.leaf(), path.index)
    }

    /// Mutably borrows the holder for in-place value mutation.
    pub fn holder_mut<'a, A: BptreeOps>(
        &self,
        ops: &'a mut A,
        path: &BpPath<A::Id>,
    ) -> &'a mut A::Holder {
        debug_assert!(path.exists());
        ops.holder_mut(path.leaf(), path.index)
    }

    /// Bulk-builds a tree from `n` holders produced in strictly ascending
    /// key order, in linear time.
    ///
    /// Every non-root interior node ends up with at least *t_i* children;
    /// the producer is called exactly `n` times.
    pub fn init_from_sorted<A, F>(&self, ops: &mut A, n: usize, mut producer: F) -> A::Id
    where
        A: BptreeOps,
        F: FnMut() -> A::Holder,
    {
        if n == 0 {
            return ops.null();
        }

        let ti = ops.interior_order();
        let tl = ops.leaf_order();
        let cap = 2 * tl - 1;
        let leaf_count = (n - 1) / cap + 1;

        let mut depth = 1;
        if leaf_count > 1 {
            depth = 2;
            let mut reach = 2 * ti;
            while reach < leaf_count {
                reach *= 2 * ti;
                depth += 1;
            }
        }

        let mut made = 0;
        let mut prev = ops.null();
        let root = Self::build_skeleton(ops, 1, depth, leaf_count, &mut made, &mut prev);

        Self::rebalance_right_spine(ops, root);

        // walk the leaves left to right, filling and bubbling separators
        let mut stack: PathStack<A::Id> = BoundedVec::new();
        {
            let mut cn = root;
            stack.push((cn, 0));
            while !ops.is_leaf(cn) {
                cn = ops.child(cn, 0);
                stack.push((cn, 0));
            }
        }

        let mut produced = 0;
        for _ in 0..leaf_count {
            let leaf = stack[stack.len() - 1].0;

            let mut j = 0;
            while j < cap && produced < n {
                // keep a half-full tail: leave t_l holders for the last leaf
                if n - produced == tl && j + tl > cap {
                    break;
                }
                ops.set_holder(leaf, j, producer());
                j += 1;
                produced += 1;
            }

            let last = Self::leaf_key_at(ops, leaf, j - 1);
            Self::fix_separator(ops, &stack, &last);
            Self::next_leaf_path(ops, &mut stack);
        }
        debug_assert_eq!(n, produced);

        root
    }

    /// Creates the node skeleton top-down; every interior node takes up to
    /// `2 t_i` children until all leaves exist, so only the right spine can
    /// be underfull.
    fn build_skeleton<A: BptreeOps>(
        ops: &mut A,
        d: usize,
        depth: usize,
        leaf_count: usize,
        made: &mut usize,
        prev: &mut A::Id,
    ) -> A::Id {
        if d == depth {
            let leaf = ops.create_leaf();
            if !ops.is_null(*prev) {
                ops.leaf_set_next(*prev, leaf);
            }
            if ops.has_prev_links() {
                ops.leaf_set_prev(leaf, *prev);
            }
            *prev = leaf;
            *made += 1;
            return leaf;
        }

        let ti = ops.interior_order();
        let node = ops.create_interior();
        let mut i = 0;
        while i < 2 * ti && *made < leaf_count {
            let child = Self::build_skeleton(ops, d + 1, depth, leaf_count, made, prev);
            ops.set_child(node, i, child);
            i += 1;
        }
        node
    }

    /// Tops up underfull interior nodes along the right spine by shifting
    /// children across from their (saturated) left siblings.
    fn rebalance_right_spine<A: BptreeOps>(ops: &mut A, root: A::Id) {
        let ti = ops.interior_order();
        let mut node = root;

        while !ops.is_leaf(node) {
            let s = ops.child_count(node);
            let last = ops.child(node, s - 1);

            if !ops.is_leaf(last) {
                let r = ops.child_count(last);
                if r < ti {
                    let donor = ops.child(node, s - 2);
                    let need = ti - r;
                    debug_assert_eq!(2 * ti, ops.child_count(donor));

                    for i in (0..r).rev() {
                        let c = ops.child(last, i);
                        ops.clear_child(last, i);
                        ops.set_child(last, i + need, c);
                    }
                    for i in 0..need {
                        let c = ops.child(donor, 2 * ti - 1 - i);
                        ops.clear_child(donor, 2 * ti - 1 - i);
                        ops.set_child(last, need - 1 - i, c);
                    }
                }
            }

            let s = ops.child_count(node);
            node = ops.child(node, s - 1);
        }
    }

    /// Verifies degree bounds, separator bounds, leaf depth and the leaf
    /// chain ordering.
    pub fn check_consistency<A: BptreeOps>(&self, ops: &A, root: A::Id) -> bool {
        if ops.is_null(root) {
            return true;
        }

        if self.check_node(ops, root, true).is_none() {
            return false;
        }

        // the leaf chain must cover the whole key range in order and the
        // last leaf must terminate the list
        let mut cn = root;
        while !ops.is_leaf(cn) {
            cn = ops.child(cn, 0);
        }

        let mut prev_key: Option<A::Key> = None;
        while !ops.is_null(cn) {
            let len = ops.leaf_len(cn);
            if len == 0 && !ops.allow_empty_leaf() && cn != root {
                return false;
            }
            for j in 0..len {
                let k = Self::leaf_key_at(ops, cn, j);
                if let Some(pk) = &prev_key {
                    let ordered = if self.multikey {
                        !ops.key_lt(&k, pk)
                    } else {
                        ops.key_lt(pk, &k)
                    };
                    if !ordered {
                        return false;
                    }
                }
                prev_key = Some(k);
            }
            cn = ops.leaf_next(cn);
        }

        true
    }

    /// Returns `(leaf depth, min and max key)` when the subtree is
    /// consistent.
    fn check_node<A: BptreeOps>(
        &self,
        ops: &A,
        node: A::Id,
        is_root: bool,
    ) -> Option<(usize, Option<(A::Key, A::Key)>)> {
        let ti = ops.interior_order();
        let tl = ops.leaf_order();

        if ops.is_leaf(node) {
            let len = ops.leaf_len(node);
            if len > 2 * tl - 1 {
                return None;
            }
            if len == 0 && !(is_root || ops.allow_empty_leaf()) {
                return None;
            }
            let range = if len > 0 {
                Some((
                    Self::leaf_key_at(ops, node, 0),
                    Self::leaf_key_at(ops, node, len - 1),
                ))
            } else {
                None
            };
            return Some((1, range));
        }

        let kc = ops.interior_key_count(node);
        let cc = ops.child_count(node);

        if cc != kc + 1 {
            return None;
        }
        if kc > 2 * ti - 1 {
            return None;
        }
        if is_root {
            if kc == 0 {
                return None;
            }
        } else if kc < ti - 1 {
            return None;
        }

        let mut depth = None;
        let mut range: Option<(A::Key, A::Key)> = None;

        for j in 0..cc {
            let (d, child_range) = self.check_node(ops, ops.child(node, j), false)?;
            if *depth.get_or_insert(d) != d {
                return None;
            }

            if let Some((lo, hi)) = child_range {
                // separator left of this child stays below the child's keys
                if j > 0 {
                    let sep = ops.interior_key(node, j - 1);
                    let ok = if ops.allow_empty_leaf() || self.multikey {
                        !ops.key_lt(&lo, &sep)
                    } else {
                        ops.key_lt(&sep, &lo)
                    };
                    if !ok {
                        return None;
                    }
                }
                // separator right of this child mirrors (or exceeds) its max
                if j < kc {
                    let sep = ops.interior_key(node, j);
                    if ops.key_lt(&sep, &hi) {
                        return None;
                    }
                }

                range = match range {
                    None => Some((lo, hi)),
                    Some((first, _)) => Some((first, hi)),
                };
            }
        }

        Some((depth.map_or(1, |d| d + 1), range))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::BptreeAlgo;
    use crate::tree::arena::BptreeArena;
    use crate::tree::ops::BptreeOps;
    use test_log::test;

    fn collect(ops: &BptreeArena<i32>, root: u32) -> Vec<i32> {
        let algo = BptreeAlgo::unique();
        let mut out = Vec::new();
        let mut path = algo.first(ops, root);
        while path.exists() {
            out.push(*algo.holder(ops, &path));
            algo.forward(ops, &mut path);
        }
        out
    }

    #[test]
    fn bptree_insert_and_traverse() {
        for (ti, tl) in [(2, 2), (4, 8), (3, 2)] {
            let algo = BptreeAlgo::unique();
            let mut ops = BptreeArena::new(ti, tl);
            let mut root = ops.null();

            for v in 0..200 {
                assert!(algo.insert(&mut ops, &mut root, v).is_some(), "ti={ti}");
                assert!(algo.check_consistency(&ops, root));
            }

            assert_eq!((0..200).collect::<Vec<_>>(), collect(&ops, root));
        }
    }

    #[test]
    fn bptree_duplicate_refused() {
        let algo = BptreeAlgo::unique();
        let mut ops = BptreeArena::new(2, 2);
        let mut root = ops.null();

        for v in 0..50 {
            algo.insert(&mut ops, &mut root, v);
        }
        assert!(algo.insert(&mut ops, &mut root, 0).is_none());
        assert!(algo.insert(&mut ops, &mut root, 27).is_none());
        assert!(algo.insert(&mut ops, &mut root, 49).is_none());
        assert_eq!(50, collect(&ops, root).len());
    }

    #[test]
    fn bptree_delete_until_empty() {
        let algo = BptreeAlgo::unique();
        let mut ops = BptreeArena::new(2, 2);
        let mut root = ops.null();

        for v in 0..60 {
            algo.insert(&mut ops, &mut root, v);
        }

        // delete in an interleaved order to exercise merge paths
        let mut order = Vec::new();
        for i in 0..30 {
            order.push(i);
            order.push(59 - i);
        }

        for (n, v) in order.iter().enumerate() {
            let path = algo.find(&ops, root, v);
            assert!(path.exists(), "missing {v}");
            let h = algo.delete(&mut ops, &mut root, &path);
            assert_eq!(*v, h);
            assert!(algo.check_consistency(&ops, root), "after {n} deletions");
        }

        assert!(ops.is_null(root));
        assert!(ops.is_empty());
    }

    #[test]
    fn bptree_bounds_step_across_leaves() {
        let algo = BptreeAlgo::unique();
        let mut ops = BptreeArena::new(2, 2);
        let mut root = ops.null();

        for v in (0..40).map(|v| v * 2) {
            algo.insert(&mut ops, &mut root, v);
        }

        let lb = algo.lower_bound(&ops, root, &13);
        assert_eq!(14, *algo.holder(&ops, &lb));

        let lb = algo.lower_bound(&ops, root, &14);
        assert_eq!(14, *algo.holder(&ops, &lb));

        let ub = algo.upper_bound(&ops, root, &14);
        assert_eq!(16, *algo.holder(&ops, &ub));

        assert!(!algo.lower_bound(&ops, root, &79).exists());
        assert!(!algo.find(&ops, root, &13).exists());
    }

    #[test]
    fn bptree_bulk_ascending_build() {
        for (ti, tl, n) in [(4, 8, 25), (2, 2, 100), (2, 2, 1), (3, 4, 1000)] {
            let algo = BptreeAlgo::unique();
            let mut ops = BptreeArena::new(ti, tl);

            let mut next = 0;
            let root = algo.init_from_sorted(&mut ops, n, || {
                let v = next;
                next += 1;
                v
            });

            assert!(algo.check_consistency(&ops, root), "ti={ti} tl={tl} n={n}");
            assert_eq!((0..n as i32).collect::<Vec<_>>(), collect(&ops, root));

            assert!(algo.find(&ops, root, &0).exists());
            assert!(algo.find(&ops, root, &(n as i32 - 1)).exists());

            // non-root interior nodes keep at least t_i children
            if !ops.is_leaf(root) {
                let mut queue = vec![(root, true)];
                while let Some((node, is_root)) = queue.pop() {
                    if ops.is_leaf(node) {
                        continue;
                    }
                    let cc = ops.child_count(node);
                    if !is_root {
                        assert!(cc >= ti, "underfull interior node");
                    }
                    for i in 0..cc {
                        queue.push((ops.child(node, i), false));
                    }
                }
            }
        }
    }

    #[test]
    fn bptree_backward_traversal() {
        let algo = BptreeAlgo::unique();
        let mut ops = BptreeArena::new(2, 2);
        let mut root = ops.null();

        for v in 0..45 {
            algo.insert(&mut ops, &mut root, v);
        }

        let mut out = Vec::new();
        let mut path = super::BpPath::new();
        algo.backward(&ops, root, &mut path);
        while path.exists() {
            out.push(*algo.holder(&ops, &path));
            algo.backward(&ops, root, &mut path);
        }

        assert_eq!((0..45).rev().collect::<Vec<_>>(), out);
    }
}
