//! Ordered-key tree algorithms over externally supplied node storage.
//!
//! Each algorithm is parameterized by an operations adapter (see [`ops`]),
//! so the same code drives heap arenas and block-device-backed node graphs
//! such as the directory table's embedded red-black tree.

pub mod arena;
pub mod bptree;
pub mod btree;
pub mod ops;
pub mod rb;
