//! Red-black tree algorithm.
//!
//! Paths are bounded stacks of node handles, root first; the height bound
//! of a red-black tree is `2 * log2(n)`, so the inline capacity below covers
//! every tree whose node count fits in memory.

use crate::bounded::BoundedVec;
use crate::tree::ops::RbOps;

/// Inline capacity of a traversal path.
const PATH_CAPACITY: usize = 64;

/// Path from the root to a current node, root first, node last.
///
/// An empty path means "no such node" (a null path).
pub type RbPath<Id> = BoundedVec<Id, PATH_CAPACITY>;

/// Red-black tree algorithm over an [`RbOps`] adapter.
///
/// In unique mode, inserting a key that already exists is refused;
/// multi mode admits duplicates and keeps them adjacent in key order.
#[derive(Copy, Clone, Debug)]
pub struct RbAlgo {
    multikey: bool,
}

impl RbAlgo {
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

    /// Returns `true` if the path designates a node.
    #[must_use]
    pub fn exists<Id>(path: &RbPath<Id>) -> bool {
        !path.is_empty()
    }

    /// Inserts `node` below `root`, rebalancing as needed.
    ///
    /// Returns `false` (leaving the tree untouched) when the key is already
    /// present in unique mode. The node's links and colour are overwritten.
    pub fn insert<A: RbOps>(&self, ops: &mut A, root: &mut A::Id, node: A::Id) -> bool {
        let nil = ops.null();

        if ops.is_null(*root) {
            ops.set_left(node, nil);
            ops.set_right(node, nil);
            ops.set_black(node, true);
            *root = node;
            return true;
        }

        let key = ops.key(node);
        let mut path = RbPath::new();
        let mut cn = *root;

        loop {
            let ck = ops.key(cn);

            if !self.multikey && ops.key_eq(&key, &ck) {
                return false;
            }

            path.push(cn);

            if ops.key_lt(&key, &ck) {
                let next = ops.left(cn);
                if ops.is_null(next) {
                    ops.set_left(cn, node);
                    break;
                }
                cn = next;
            } else {
                let next = ops.right(cn);
                if ops.is_null(next) {
                    ops.set_right(cn, node);
                    break;
                }
                cn = next;
            }
        }

        ops.set_left(node, nil);
        ops.set_right(node, nil);
        ops.set_black(node, false);
        path.push(node);

        self.insert_fixup(ops, root, &mut path);
        true
    }

    fn insert_fixup<A: RbOps>(&self, ops: &mut A, root: &mut A::Id, path: &mut RbPath<A::Id>) {
        loop {
            let n = path[path.len() - 1];

            if path.len() == 1 {
                ops.set_black(n, true);
                *root = n;
                return;
            }

            let p = path[path.len() - 2];
            if ops.is_black(p) {
                return;
            }

            // red parent cannot be the root, so a grandparent exists
            let pp = path[path.len() - 3];
            let ppp = if path.len() >= 4 {
                Some(path[path.len() - 4])
            } else {
                None
            };

            let p_is_left = ops.left(pp) == p;
            let uncle = if p_is_left { ops.right(pp) } else { ops.left(pp) };

            if !ops.is_null(uncle) && !ops.is_black(uncle) {
                ops.set_black(p, true);
                ops.set_black(uncle, true);
                ops.set_black(pp, false);
                path.pop();
                path.pop();
                continue;
            }

            let n_is_left = ops.left(p) == n;

            let top = if p_is_left {
                if !n_is_left {
                    rotate_left(ops, root, Some(pp), p);
                }
                rotate_right(ops, root, ppp, pp)
            } else {
                if n_is_left {
                    rotate_right(ops, root, Some(pp), p);
                }
                rotate_left(ops, root, ppp, pp)
            };

            ops.set_black(top, true);
            ops.set_black(pp, false);
            return;
        }
    }

    /// Detaches the node the path points at, rebalancing as needed.
    ///
    /// Returns the detached handle; releasing it is the caller's business.
    pub fn delete<A: RbOps>(&self, ops: &mut A, root: &mut A::Id, mut path: RbPath<A::Id>) -> A::Id {
        debug_assert!(Self::exists(&path));

        let target = path[path.len() - 1];

        if !ops.is_null(ops.left(target)) && !ops.is_null(ops.right(target)) {
            // two children: swap positions with the in-order successor so
            // the node to unlink has at most one child
            let at = path.len() - 1;
            path.push(ops.right(target));
            loop {
                let l = ops.left(path[path.len() - 1]);
                if ops.is_null(l) {
                    break;
                }
                path.push(l);
            }
            self.swap_with_descendant(ops, root, &mut path, at);
        }

        let node = path[path.len() - 1];
        let left = ops.left(node);
        let child = if ops.is_null(left) { ops.right(node) } else { left };
        let parent = if path.len() >= 2 {
            Some(path[path.len() - 2])
        } else {
            None
        };

        match parent {
            None => *root = child,
            Some(p) => {
                if ops.left(p) == node {
                    ops.set_left(p, child);
                } else {
                    ops.set_right(p, child);
                }
            }
        }

        let removed_black = ops.is_black(node);
        path.pop();

        if removed_black {
            if !ops.is_null(child) && !ops.is_black(child) {
                ops.set_black(child, true);
            } else {
                self.delete_fixup(ops, root, &mut path, child);
            }
        }

        let nil = ops.null();
        ops.set_left(node, nil);
        ops.set_right(node, nil);
        node
    }

    /// Swaps the tree positions (and colours) of `path[at]` and the node at
    /// the end of the path, which must be a descendant reached through
    /// `right(path[at])`.
    fn swap_with_descendant<A: RbOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        path: &mut RbPath<A::Id>,
        at: usize,
    ) {
        let last = path.len() - 1;
        let n = path[at];
        let s = path[last];

        let n_black = ops.is_black(n);
        ops.set_black(n, ops.is_black(s));
        ops.set_black(s, n_black);

        let parent = if at > 0 { Some(path[at - 1]) } else { None };
        let n_left = ops.left(n);
        let s_left = ops.left(s);
        let s_right = ops.right(s);

        if last == at + 1 {
            // successor is the immediate right child
            ops.set_left(s, n_left);
            ops.set_right(s, n);
            ops.set_left(n, s_left);
            ops.set_right(n, s_right);
        } else {
            let n_right = ops.right(n);
            let sp = path[last - 1];

            ops.set_left(s, n_left);
            ops.set_right(s, n_right);
            ops.set_left(n, s_left);
            ops.set_right(n, s_right);
            ops.set_left(sp, n);
        }

        match parent {
            None => *root = s,
            Some(p) => {
                if ops.left(p) == n {
                    ops.set_left(p, s);
                } else {
                    ops.set_right(p, s);
                }
            }
        }

        path[at] = s;
        path[last] = n;
    }

    /// Propagates the extra-black token left behind by unlinking a black
    /// node. `hole` (possibly null) sits below the node at the path end.
    fn delete_fixup<A: RbOps>(
        &self,
        ops: &mut A,
        root: &mut A::Id,
        path: &mut RbPath<A::Id>,
        mut hole: A::Id,
    ) {
        loop {
            if !ops.is_null(hole) && !ops.is_black(hole) {
                ops.set_black(hole, true);
                return;
            }

            let Some(&p) = path.last() else {
                // token reached the root; nothing left to repay
                return;
            };

            let gp = if path.len() >= 2 {
                Some(path[path.len() - 2])
            } else {
                None
            };

            let (hole_is_left, w) = if !ops.is_null(hole) {
                if ops.left(p) == hole {
                    (true, ops.right(p))
                } else {
                    (false, ops.left(p))
                }
            } else if ops.is_null(ops.left(p)) {
                (true, ops.right(p))
            } else {
                (false, ops.left(p))
            };

            if !ops.is_black(w) {
                // red sibling: rotate into the black-sibling cases
                ops.set_black(w, true);
                ops.set_black(p, false);
                if hole_is_left {
                    rotate_left(ops, root, gp, p);
                } else {
                    rotate_right(ops, root, gp, p);
                }
                path.pop();
                path.push(w);
                path.push(p);
                continue;
            }

            let near = if hole_is_left { ops.left(w) } else { ops.right(w) };
            let far = if hole_is_left { ops.right(w) } else { ops.left(w) };
            let near_red = !ops.is_null(near) && !ops.is_black(near);
            let far_red = !ops.is_null(far) && !ops.is_black(far);

            if !near_red && !far_red {
                // both nephews black: recolour and push the token up
                ops.set_black(w, false);
                hole = p;
                path.pop();
                continue;
            }

            let w = if far_red {
                w
            } else {
                // near nephew red: rotate the sibling to expose a far red
                ops.set_black(near, true);
                ops.set_black(w, false);
                if hole_is_left {
                    rotate_right(ops, root, Some(p), w);
                } else {
                    rotate_left(ops, root, Some(p), w);
                }
                near
            };

            let far = if hole_is_left { ops.right(w) } else { ops.left(w) };
            ops.set_black(w, ops.is_black(p));
            ops.set_black(p, true);
            ops.set_black(far, true);
            if hole_is_left {
                rotate_left(ops, root, gp, p);
            } else {
                rotate_right(ops, root, gp, p);
            }
            return;
        }
    }

    /// Returns the path to a node with the given key, or a null path.
    pub fn find<A: RbOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> RbPath<A::Id> {
        let mut path = RbPath::new();
        let mut cn = root;

        while !ops.is_null(cn) {
            path.push(cn);
            let ck = ops.key(cn);

            if ops.key_lt(key, &ck) {
                cn = ops.left(cn);
            } else if ops.key_lt(&ck, key) {
                cn = ops.right(cn);
            } else {
                return path;
            }
        }

        path.clear();
        path
    }

    /// First node whose key is not less than `key`.
    pub fn lower_bound<A: RbOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> RbPath<A::Id> {
        self.bound(ops, root, key, false)
    }

    /// First node whose key is strictly greater than `key`.
    pub fn upper_bound<A: RbOps>(&self, ops: &A, root: A::Id, key: &A::Key) -> RbPath<A::Id> {
        self.bound(ops, root, key, true)
    }

    fn bound<A: RbOps>(&self, ops: &A, root: A::Id, key: &A::Key, strict: bool) -> RbPath<A::Id> {
        let mut path = RbPath::new();
        let mut best = 0;
        let mut cn = root;

        while !ops.is_null(cn) {
            path.push(cn);
            let ck = ops.key(cn);

            let qualifies = if strict {
                ops.key_lt(key, &ck)
            } else {
                !ops.key_lt(&ck, key)
            };

            if qualifies {
                best = path.len();
                cn = ops.left(cn);
            } else {
                cn = ops.right(cn);
            }
        }

        path.truncate(best);
        path
    }

    /// Path to the node with the smallest key, or a null path when empty.
    pub fn first<A: RbOps>(&self, ops: &A, root: A::Id) -> RbPath<A::Id> {
        let mut path = RbPath::new();
        let mut cn = root;
        while !ops.is_null(cn) {
            path.push(cn);
            cn = ops.left(cn);
        }
        path
    }

    /// Path to the node with the largest key, or a null path when empty.
    pub fn last<A: RbOps>(&self, ops: &A, root: A::Id) -> RbPath<A::Id> {
        let mut path = RbPath::new();
        let mut cn = root;
        while !ops.is_null(cn) {
            path.push(cn);
            cn = ops.right(cn);
        }
        path
    }

    /// Advances the path to the in-order successor; a null path past the end.
    pub fn forward<A: RbOps>(&self, ops: &A, path: &mut RbPath<A::Id>) {
        debug_assert!(Self::exists(path));

        let n = path[path.len() - 1];
        let right = ops.right(n);

        if !ops.is_null(right) {
            path.push(right);
            loop {
                let l = ops.left(path[path.len() - 1]);
                if ops.is_null(l) {
                    return;
                }
                path.push(l);
            }
        }

        loop {
            let Some(child) = path.pop() else {
                return;
            };
            let Some(&p) = path.last() else {
                return;
            };
            if ops.left(p) == child {
                return;
            }
        }
    }

    /// Steps the path to the in-order predecessor; from a null path this
    /// yields the last node.
    pub fn backward<A: RbOps>(&self, ops: &A, root: A::Id, path: &mut RbPath<A::Id>) {
        if !Self::exists(path) {
            *path = self.last(ops, root);
            return;
        }

        let n = path[path.len() - 1];
        let left = ops.left(n);

        if !ops.is_null(left) {
            path.push(left);
            loop {
                let r = ops.right(path[path.len() - 1]);
                if ops.is_null(r) {
                    return;
                }
                path.push(r);
            }
        }

        loop {
            let Some(child) = path.pop() else {
                return;
            };
            let Some(&p) = path.last() else {
                return;
            };
            if ops.right(p) == child {
                return;
            }
        }
    }

    /// Verifies the colouring, black-height and ordering invariants.
    pub fn check_consistency<A: RbOps>(&self, ops: &A, root: A::Id) -> bool {
        if ops.is_null(root) {
            return true;
        }

        if !ops.is_black(root) {
            return false;
        }

        if self.black_height(ops, root).is_none() {
            return false;
        }

        // ordered traversal must be monotone
        let mut path = self.first(ops, root);
        let mut prev: Option<A::Key> = None;
        while Self::exists(&path) {
            let k = ops.key(path[path.len() - 1]);
            if let Some(p) = &prev {
                let ordered = if self.multikey {
                    !ops.key_lt(&k, p)
                } else {
                    ops.key_lt(p, &k)
                };
                if !ordered {
                    return false;
                }
            }
            prev = Some(k);
            self.forward(ops, &mut path);
        }

        true
    }

    fn black_height<A: RbOps>(&self, ops: &A, node: A::Id) -> Option<usize> {
        if ops.is_null(node) {
            return Some(1);
        }

        let left = ops.left(node);
        let right = ops.right(node);

        if !ops.is_black(node) {
            let left_red = !ops.is_null(left) && !ops.is_black(left);
            let right_red = !ops.is_null(right) && !ops.is_black(right);
            if left_red || right_red {
                return None;
            }
        }

        let lh = self.black_height(ops, left)?;
        let rh = self.black_height(ops, right)?;
        if lh != rh {
            return None;
        }

        Some(lh + usize::from(ops.is_black(node)))
    }
}

/// Left rotation around `x`; returns the new subtree root.
fn rotate_left<A: RbOps>(ops: &mut A, root: &mut A::Id, parent: Option<A::Id>, x: A::Id) -> A::Id {
    let y = ops.right(x);
    debug_assert!(!ops.is_null(y));

    ops.set_right(x, ops.left(y));
    ops.set_left(y, x);

    match parent {
        None => *root = y,
        Some(p) => {
            if ops.left(p) == x {
                ops.set_left(p, y);
            } else {
                ops.set_right(p, y);
            }
        }
    }

    y
}

/// Right rotation around `x`; returns the new subtree root.
fn rotate_right<A: RbOps>(ops: &mut A, root: &mut A::Id, parent: Option<A::Id>, x: A::Id) -> A::Id {
    let y = ops.left(x);
    debug_assert!(!ops.is_null(y));

    ops.set_left(x, ops.right(y));
    ops.set_right(y, x);

    match parent {
        None => *root = y,
        Some(p) => {
            if ops.left(p) == x {
                ops.set_left(p, y);
            } else {
                ops.set_right(p, y);
            }
        }
    }

    y
}
