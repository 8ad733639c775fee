//! Ordered-key container algorithms and a compound-file structured storage
//! built on top of them.
//!
//! ##### About
//!
//! Three layers make up this crate:
//!
//! - **Tree algorithms** ([`tree`]): red-black, B- and B+-tree algorithms,
//!   generic over an operations adapter, so the same code runs against heap
//!   arenas and block-device-backed node graphs. [`container`] wraps them
//!   into std-flavoured ordered sets and maps.
//! - **Block space** ([`device`], [`fs::sat`], [`fs::msat`]): a flat
//!   byte-addressable device carved into fixed-size sectors, with a sector
//!   allocation table (SAT) arranging sectors into per-stream chains and a
//!   master table (MSAT) tracking the SAT itself.
//! - **File system** ([`fs`]): a directory tree of named entries over the
//!   sector layer. Sibling order inside each directory is a red-black tree
//!   embedded in the 128-byte directory records; small streams share the
//!   mini-stream through short-sector chains.
//!
//! # Example usage
//!
//! ```
//! use compound_fs::{FileSystem, MemDevice, OpenMode, Whence};
//!
//! let dev = MemDevice::new(10 * 1024 * 1024);
//! let mut fs = FileSystem::format(dev, 3, 9, 6)?;
//!
//! fs.mkdir("hello");
//! let fd = fs.open("hello/world", OpenMode::CREATE | OpenMode::READ).unwrap();
//!
//! fs.write(fd, b"greetings");
//! fs.seek(fd, 0, Whence::Set);
//!
//! let mut buf = [0u8; 9];
//! fs.read(fd, &mut buf);
//! assert_eq!(b"greetings", &buf);
//!
//! fs.close(fd);
//!
//! // the image survives a reopen of the same device
//! let dev = fs.into_device();
//! let mut fs = compound_fs::FileSystem::open_device(dev)?;
//! assert_eq!(Some(9), fs.filesize("hello/world"));
//! #
//! # Ok::<(), compound_fs::Error>(())
//! ```

#![doc(html_root_url = "https://docs.rs/compound-fs/0.1.0")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

pub mod binary_search;
mod bounded;
pub mod container;
pub mod device;
mod error;
pub mod fs;
mod slots;
pub mod tree;

pub use {
    bounded::BoundedVec,
    device::{cache::CachedDevice, view::BlockView, view::StrideView},
    device::{Addr, BlockDevice, BlockDeviceExt, FileDevice, MemDevice},
    error::{Error, ErrorCode, Result},
    fs::dir::EntryType,
    fs::path::FsPath,
    fs::sector::SecId,
    fs::{FileSystem, OpenMode, StatInfo, Whence},
    slots::SlotArena,
};
