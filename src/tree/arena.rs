//! Heap-backed operations adapters.
//!
//! Nodes live in a [`SlotArena`]; a node handle is the slot index, with
//! `u32::MAX` as the null handle. These adapters power the in-memory
//! ordered containers and the algorithm test suites.

use crate::slots::SlotArena;
use crate::tree::ops::{BptreeOps, BtreeOps, RbOps};

/// The null node handle of every arena adapter.
pub const NIL: u32 = u32::MAX;

/// A payload with a derivable key, as stored at tree positions.
pub trait HolderKey {
    /// Key half of the payload.
    type Key: Ord + Clone;

    /// Projects the key out of the payload.
    fn key(&self) -> Self::Key;
}

macro_rules! key_is_self {
    ($($t:ty),+ $(,)?) => {
        $(impl HolderKey for $t {
            type Key = $t;

            fn key(&self) -> $t {
                self.clone()
            }
        })+
    };
}

key_is_self!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, char, String,
);

/// Key-value payload; the key half is immutable after construction.
#[derive(Clone, Debug)]
pub struct KeyValue<K, V> {
    key: K,
    /// Value half, free to mutate in place.
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    /// Creates a payload.
    pub const fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Borrows the key half.
    pub const fn key_ref(&self) -> &K {
        &self.key
    }

    /// Splits the payload into its halves.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: Ord + Clone, V> HolderKey for KeyValue<K, V> {
    type Key = K;

    fn key(&self) -> K {
        self.key.clone()
    }
}

struct RbNode<H> {
    holder: H,
    left: u32,
    right: u32,
    black: bool,
}

/// Red-black tree node storage.
pub struct RbArena<H> {
    nodes: SlotArena<RbNode<H>>,
}

impl<H> Default for RbArena<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RbArena<H> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: SlotArena::new(),
        }
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates a node around `holder` with null links.
    pub fn alloc(&mut self, holder: H) -> u32 {
        self.nodes.insert(RbNode {
            holder,
            left: NIL,
            right: NIL,
            black: false,
        })
    }

    /// Destroys a detached node, returning its payload.
    pub fn release(&mut self, id: u32) -> Option<H> {
        self.nodes.remove(id).map(|n| n.holder)
    }

    /// Borrows the payload of a live node.
    #[must_use]
    pub fn holder(&self, id: u32) -> &H {
        &self.nodes[id].holder
    }

    /// Mutably borrows the payload of a live node.
    pub fn holder_mut(&mut self, id: u32) -> &mut H {
        &mut self.nodes[id].holder
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl<H: HolderKey> RbOps for RbArena<H> {
    type Id = u32;
    type Key = H::Key;

    fn null(&self) -> u32 {
        NIL
    }

    fn left(&self, node: u32) -> u32 {
        self.nodes[node].left
    }

    fn right(&self, node: u32) -> u32 {
        self.nodes[node].right
    }

    fn set_left(&mut self, node: u32, child: u32) {
        self.nodes[node].left = child;
    }

    fn set_right(&mut self, node: u32, child: u32) {
        self.nodes[node].right = child;
    }

    fn is_black(&self, node: u32) -> bool {
        self.nodes[node].black
    }

    fn set_black(&mut self, node: u32, black: bool) {
        self.nodes[node].black = black;
    }

    fn key(&self, node: u32) -> H::Key {
        self.nodes[node].holder.key()
    }

    fn key_lt(&self, a: &H::Key, b: &H::Key) -> bool {
        a < b
    }
}

struct BtNode<H> {
    holders: Vec<Option<H>>,
    children: Vec<Option<u32>>,
}

/// B-tree node storage for a fixed order *t*.
pub struct BtreeArena<H> {
    nodes: SlotArena<BtNode<H>>,
    order: usize,
}

impl<H> BtreeArena<H> {
    /// Creates an empty arena for order `t` (≥ 2).
    #[must_use]
    pub fn new(order: usize) -> Self {
        debug_assert!(order >= 2);
        Self {
            nodes: SlotArena::new(),
            order,
        }
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl<H: HolderKey> BtreeOps for BtreeArena<H> {
    type Id = u32;
    type Key = H::Key;
    type Holder = H;

    fn null(&self) -> u32 {
        NIL
    }

    fn order(&self) -> usize {
        self.order
    }

    fn create_node(&mut self) -> u32 {
        let keys = 2 * self.order - 1;
        self.nodes.insert(BtNode {
            holders: (0..keys).map(|_| None).collect(),
            children: (0..=keys).map(|_| None).collect(),
        })
    }

    fn release_node(&mut self, node: u32) {
        let released = self.nodes.remove(node);
        debug_assert!(released.is_some());
    }

    fn key_count(&self, node: u32) -> usize {
        self.nodes[node]
            .holders
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    fn child_count(&self, node: u32) -> usize {
        self.nodes[node]
            .children
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    fn child(&self, node: u32, nth: usize) -> u32 {
        #[allow(clippy::expect_used)]
        self.nodes[node].children[nth].expect("child slot should be occupied")
    }

    fn set_child(&mut self, node: u32, nth: usize, child: u32) {
        debug_assert!(self.nodes[node].children[nth].is_none());
        self.nodes[node].children[nth] = Some(child);
    }

    fn clear_child(&mut self, node: u32, nth: usize) {
        debug_assert!(self.nodes[node].children[nth].is_some());
        self.nodes[node].children[nth] = None;
    }

    fn holder(&self, node: u32, nth: usize) -> &H {
        #[allow(clippy::expect_used)]
        self.nodes[node].holders[nth]
            .as_ref()
            .expect("holder slot should be occupied")
    }

    fn set_holder(&mut self, node: u32, nth: usize, holder: H) {
        debug_assert!(self.nodes[node].holders[nth].is_none());
        self.nodes[node].holders[nth] = Some(holder);
    }

    fn extract_holder(&mut self, node: u32, nth: usize) -> H {
        #[allow(clippy::expect_used)]
        self.nodes[node].holders[nth]
            .take()
            .expect("holder slot should be occupied")
    }

    fn key_of(&self, holder: &H) -> H::Key {
        holder.key()
    }

    fn key_lt(&self, a: &H::Key, b: &H::Key) -> bool {
        a < b
    }
}

enum BpNode<H: HolderKey> {
    Interior {
        keys: Vec<Option<H::Key>>,
        children: Vec<Option<u32>>,
    },
    Leaf {
        holders: Vec<Option<H>>,
        next: u32,
        prev: u32,
    },
}

/// B+-tree node storage for fixed interior and leaf orders.
pub struct BptreeArena<H: HolderKey> {
    nodes: SlotArena<BpNode<H>>,
    interior_order: usize,
    leaf_order: usize,
    prev_links: bool,
}

impl<H: HolderKey> BptreeArena<H> {
    /// Creates an empty arena for interior order `ti` and leaf order `tl`.
    #[must_use]
    pub fn new(interior_order: usize, leaf_order: usize) -> Self {
        debug_assert!(interior_order >= 2 && leaf_order >= 1);
        Self {
            nodes: SlotArena::new(),
            interior_order,
            leaf_order,
            prev_links: true,
        }
    }

    /// Disables prev links, leaving leaves forward-linked only.
    #[must_use]
    pub fn without_prev_links(mut self) -> Self {
        self.prev_links = false;
        self
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn interior(&self, node: u32) -> (&Vec<Option<H::Key>>, &Vec<Option<u32>>) {
        match &self.nodes[node] {
            BpNode::Interior { keys, children } => (keys, children),
            BpNode::Leaf { .. } => unreachable!("expected interior node"),
        }
    }

    fn leaf(&self, node: u32) -> &Vec<Option<H>> {
        match &self.nodes[node] {
            BpNode::Leaf { holders, .. } => holders,
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }
}

impl<H: HolderKey> BptreeOps for BptreeArena<H> {
    type Id = u32;
    type Key = H::Key;
    type Holder = H;

    fn null(&self) -> u32 {
        NIL
    }

    fn is_leaf(&self, node: u32) -> bool {
        matches!(self.nodes[node], BpNode::Leaf { .. })
    }

    fn interior_order(&self) -> usize {
        self.interior_order
    }

    fn leaf_order(&self) -> usize {
        self.leaf_order
    }

    fn has_prev_links(&self) -> bool {
        self.prev_links
    }

    fn create_leaf(&mut self) -> u32 {
        let cap = 2 * self.leaf_order - 1;
        self.nodes.insert(BpNode::Leaf {
            holders: (0..cap).map(|_| None).collect(),
            next: NIL,
            prev: NIL,
        })
    }

    fn create_interior(&mut self) -> u32 {
        let keys = 2 * self.interior_order - 1;
        self.nodes.insert(BpNode::Interior {
            keys: (0..keys).map(|_| None).collect(),
            children: (0..=keys).map(|_| None).collect(),
        })
    }

    fn release_node(&mut self, node: u32) {
        let released = self.nodes.remove(node);
        debug_assert!(released.is_some());
    }

    fn child_count(&self, node: u32) -> usize {
        self.interior(node)
            .1
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    fn child(&self, node: u32, nth: usize) -> u32 {
        #[allow(clippy::expect_used)]
        self.interior(node).1[nth].expect("child slot should be occupied")
    }

    fn set_child(&mut self, node: u32, nth: usize, child: u32) {
        match &mut self.nodes[node] {
            BpNode::Interior { children, .. } => {
                debug_assert!(children[nth].is_none());
                children[nth] = Some(child);
            }
            BpNode::Leaf { .. } => unreachable!("expected interior node"),
        }
    }

    fn clear_child(&mut self, node: u32, nth: usize) {
        match &mut self.nodes[node] {
            BpNode::Interior { children, .. } => {
                debug_assert!(children[nth].is_some());
                children[nth] = None;
            }
            BpNode::Leaf { .. } => unreachable!("expected interior node"),
        }
    }

    fn interior_key_count(&self, node: u32) -> usize {
        self.interior(node)
            .0
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    fn interior_key(&self, node: u32, nth: usize) -> H::Key {
        #[allow(clippy::expect_used)]
        self.interior(node).0[nth]
            .clone()
            .expect("separator slot should be occupied")
    }

    fn interior_set_key(&mut self, node: u32, nth: usize, key: H::Key) {
        match &mut self.nodes[node] {
            BpNode::Interior { keys, .. } => keys[nth] = Some(key),
            BpNode::Leaf { .. } => unreachable!("expected interior node"),
        }
    }

    fn interior_clear_key(&mut self, node: u32, nth: usize) {
        match &mut self.nodes[node] {
            BpNode::Interior { keys, .. } => {
                debug_assert!(keys[nth].is_some());
                keys[nth] = None;
            }
            BpNode::Leaf { .. } => unreachable!("expected interior node"),
        }
    }

    fn leaf_len(&self, node: u32) -> usize {
        self.leaf(node)
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    fn holder(&self, node: u32, nth: usize) -> &H {
        #[allow(clippy::expect_used)]
        self.leaf(node)[nth]
            .as_ref()
            .expect("holder slot should be occupied")
    }

    fn holder_mut(&mut self, node: u32, nth: usize) -> &mut H {
        match &mut self.nodes[node] {
            #[allow(clippy::expect_used)]
            BpNode::Leaf { holders, .. } => holders[nth]
                .as_mut()
                .expect("holder slot should be occupied"),
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn set_holder(&mut self, node: u32, nth: usize, holder: H) {
        match &mut self.nodes[node] {
            BpNode::Leaf { holders, .. } => {
                debug_assert!(holders[nth].is_none());
                holders[nth] = Some(holder);
            }
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn extract_holder(&mut self, node: u32, nth: usize) -> H {
        match &mut self.nodes[node] {
            #[allow(clippy::expect_used)]
            BpNode::Leaf { holders, .. } => {
                holders[nth].take().expect("holder slot should be occupied")
            }
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn leaf_next(&self, node: u32) -> u32 {
        match &self.nodes[node] {
            BpNode::Leaf { next, .. } => *next,
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn leaf_set_next(&mut self, node: u32, link: u32) {
        match &mut self.nodes[node] {
            BpNode::Leaf { next, .. } => *next = link,
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn leaf_prev(&self, node: u32) -> u32 {
        match &self.nodes[node] {
            BpNode::Leaf { prev, .. } => *prev,
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn leaf_set_prev(&mut self, node: u32, link: u32) {
        if !self.prev_links {
            return;
        }
        match &mut self.nodes[node] {
            BpNode::Leaf { prev, .. } => *prev = link,
            BpNode::Interior { .. } => unreachable!("expected leaf node"),
        }
    }

    fn key_of(&self, holder: &H) -> H::Key {
        holder.key()
    }

    fn key_lt(&self, a: &H::Key, b: &H::Key) -> bool {
        a < b
    }
}
