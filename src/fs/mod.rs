//! Hierarchical file system over a block device.
//!
//! A directory tree of named entries, each owning either a child directory
//! or a stream. Streams at or above the header threshold occupy regular
//! sectors chained through the SAT; smaller streams share the mini-stream,
//! subdivided into short sectors chained through the SSAT.
//!
//! The [`FileSystem`] façade follows the classic errno shape: calls return
//! `bool`/`Option` and the swallowed error is kept in
//! [`FileSystem::last_error`].

pub mod dir;
pub mod header;
pub mod msat;
pub mod path;
pub mod sat;
pub mod sector;
pub mod ssat;
pub mod stream;

use crate::device::BlockDevice;
use crate::{Error, ErrorCode, Result};
use bitflags::bitflags;
use dir::{is_storage, DirTable, EntryType, NULL_ENTRY, ROOT_ENTRY};
use header::Header;
use path::{name_from_str, name_to_string, FsPath, Name};
use rustc_hash::FxHashMap;
use sat::Sat;
use sector::{is_reg_sector, SecId, END_OF_CHAIN};
use ssat::{ShortChain, ShortSat};
use stream::Chain;

bitflags! {
    /// Open mode for [`FileSystem::open`].
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct OpenMode: u8 {
        /// Allow reads.
        const READ = 0b0000_0001;

        /// Allow writes.
        const WRITE = 0b0000_0010;

        /// Create the stream when missing; implies write permission.
        const CREATE = 0b0000_0100;

        /// Position at the end after opening.
        const APPEND = 0b0000_1000;

        /// Set the size to zero after opening.
        const TRUNCATE = 0b0001_0000;
    }
}

impl OpenMode {
    fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    fn can_write(self) -> bool {
        self.intersects(Self::WRITE | Self::CREATE)
    }
}

/// Origin for [`FileSystem::seek`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Whence {
    /// From the start of the stream.
    Set,

    /// From the current position.
    Current,

    /// From the end of the stream.
    End,
}

/// Snapshot of one directory entry.
#[derive(Clone, Debug)]
pub struct StatInfo {
    /// Entry name.
    pub name: String,

    /// Entry kind.
    pub entry_type: EntryType,

    /// Stream size in bytes (0 for directories).
    pub size: u64,

    /// Directory entry id.
    pub entry_id: u32,
}

/// Shared per-entry bookkeeping for open file handles.
struct OpenNode {
    size: u64,
    head: SecId,
    short: bool,
    refcount: usize,
}

/// One open file handle.
struct FileHandle {
    entry: u32,
    pos: u64,
    mode: OpenMode,
}

/// The file-system façade.
pub struct FileSystem<D: BlockDevice> {
    dev: D,
    header: Header,
    sat: Sat,
    ssat: ShortSat,
    dir: DirTable,
    mini: Chain,
    nodes: FxHashMap<u32, OpenNode>,
    files: FxHashMap<u32, FileHandle>,
    dirs: FxHashMap<u32, u32>,
    next_handle: u32,
    last_error: ErrorCode,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Formats `dev` with a fresh, empty file system.
    pub fn format(
        mut dev: D,
        version: u16,
        sector_shift: u16,
        short_sector_shift: u16,
    ) -> Result<Self> {
        let header = Header::format(&mut dev, version, sector_shift, short_sector_shift)?;
        Self::assemble(dev, header)
    }

    /// Opens an existing image on `dev`.
    pub fn open_device(dev: D) -> Result<Self> {
        let header = Header::open(&dev)?;
        Self::assemble(dev, header)
    }

    fn assemble(mut dev: D, header: Header) -> Result<Self> {
        let mut sat = Sat::load(&dev, &header)?;
        let ssat = ShortSat::load(&dev, &header, &sat)?;
        let dir = DirTable::open(&mut dev, &header, &mut sat)?;

        let mini_head = dir.head_sector(&dev, &header, &sat, ROOT_ENTRY)?;
        let mini = Chain::new(if is_reg_sector(mini_head) {
            mini_head
        } else {
            END_OF_CHAIN
        });

        Ok(Self {
            dev,
            header,
            sat,
            ssat,
            dir,
            mini,
            nodes: FxHashMap::default(),
            files: FxHashMap::default(),
            dirs: FxHashMap::default(),
            next_handle: 1,
            last_error: ErrorCode::NoError,
        })
    }

    /// Consumes the file system, returning the device.
    pub fn into_device(mut self) -> D {
        let _ = self.dev.flush();
        self.dev
    }

    /// The error code of the most recent failing call.
    #[must_use]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    fn settle<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = ErrorCode::NoError;
                Some(v)
            }
            Err(e) => {
                log::debug!("facade call failed: {e:?}");
                self.last_error = (&e).into();
                None
            }
        }
    }

    // --- path resolution -------------------------------------------------

    fn resolve(&mut self, path: &FsPath) -> Result<u32> {
        let mut cur = ROOT_ENTRY;
        for comp in path.components() {
            let entry_type = self.dir.entry_type(&self.dev, &self.header, &self.sat, cur)?;
            if !is_storage(entry_type) {
                return Err(Error::NotADirectory);
            }
            let name = name_from_str(comp)?;
            cur = self
                .dir
                .find_child(&mut self.dev, &self.header, &mut self.sat, cur, &name)?
                .ok_or(Error::NotFound)?;
        }
        Ok(cur)
    }

    fn resolve_parent(&mut self, path: &FsPath) -> Result<(u32, Name)> {
        let (parent_comps, leaf) = path
            .split_last()
            .ok_or(Error::InvalidArgument("the root has no parent"))?;

        let mut parent_path = FsPath::root();
        for c in parent_comps {
            parent_path.push(c.clone());
        }

        let parent = self.resolve(&parent_path)?;
        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, parent)?;
        if !is_storage(entry_type) {
            return Err(Error::NotADirectory);
        }

        Ok((parent, name_from_str(leaf)?))
    }

    // --- stream plumbing -------------------------------------------------

    fn threshold(&self) -> Result<u64> {
        Ok(u64::from(self.header.min_standard_stream_size(&self.dev)?))
    }

    /// Writes the mini-stream head and byte length onto the root entry.
    fn sync_mini_entry(&mut self) -> Result<()> {
        let head = self.mini.head();
        let size = self.mini.size(&self.dev, &self.header, &self.sat)?;
        self.dir
            .set_head_sector(&mut self.dev, &self.header, &mut self.sat, ROOT_ENTRY, head)?;
        self.dir
            .set_size(&mut self.dev, &self.header, &mut self.sat, ROOT_ENTRY, size as u32)?;
        Ok(())
    }

    /// Writes the size and head of an entry's stream onto its record.
    fn sync_entry(&mut self, entry: u32, size: u64, head: SecId) -> Result<()> {
        self.dir
            .set_size(&mut self.dev, &self.header, &mut self.sat, entry, size as u32)?;
        self.dir
            .set_head_sector(&mut self.dev, &self.header, &mut self.sat, entry, head)?;
        Ok(())
    }

    /// Reads the whole content of a stream given its bookkeeping.
    fn content_of(&mut self, size: u64, head: SecId, short: bool) -> Result<Vec<u8>> {
        let mut data = vec![0u8; size as usize];
        if size == 0 {
            return Ok(data);
        }

        if short {
            let chain = ShortChain::new(head);
            chain.read(
                &self.dev,
                &self.header,
                &self.sat,
                &self.ssat,
                &self.mini,
                0,
                &mut data,
            )?;
        } else {
            let chain = Chain::new(head);
            chain.read(&self.dev, &self.header, &self.sat, 0, &mut data)?;
        }
        Ok(data)
    }

    /// Releases a stream's sectors given its bookkeeping.
    fn release_stream(&mut self, head: SecId, short: bool) -> Result<()> {
        if !is_reg_sector(head) {
            return Ok(());
        }

        if short {
            let mut chain = ShortChain::new(head);
            chain.delete_all(&mut self.dev, &self.header, &mut self.sat, &mut self.ssat)?;
            self.sync_mini_entry()?;
        } else {
            let mut chain = Chain::new(head);
            chain.delete_all(&mut self.dev, &self.header, &mut self.sat)?;
        }
        Ok(())
    }

    /// Moves an open stream from short sectors to regular sectors.
    fn migrate_to_regular(&mut self, entry: u32) -> Result<()> {
        let (size, head) = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            debug_assert!(node.short);
            (node.size, node.head)
        };

        log::debug!("migrating entry {entry} ({size} bytes) to regular sectors");

        let data = self.content_of(size, head, true)?;
        self.release_stream(head, true)?;

        let mut chain = Chain::new(END_OF_CHAIN);
        if !data.is_empty() {
            chain.write(&mut self.dev, &self.header, &mut self.sat, 0, &data)?;
        }

        let new_head = chain.head();
        if let Some(node) = self.nodes.get_mut(&entry) {
            node.head = new_head;
            node.short = false;
        }
        self.sync_entry(entry, size, new_head)
    }

    /// Moves an open stream from regular sectors into the mini-stream.
    fn migrate_to_short(&mut self, entry: u32, new_size: u64) -> Result<()> {
        let head = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            debug_assert!(!node.short);
            node.head
        };

        log::debug!("migrating entry {entry} ({new_size} bytes) to short sectors");

        let data = self.content_of(new_size, head, false)?;
        self.release_stream(head, false)?;

        let mut chain = ShortChain::new(END_OF_CHAIN);
        if !data.is_empty() {
            chain.write(
                &mut self.dev,
                &self.header,
                &mut self.sat,
                &mut self.ssat,
                &mut self.mini,
                0,
                &data,
            )?;
        }
        self.sync_mini_entry()?;

        let new_head = chain.head();
        if let Some(node) = self.nodes.get_mut(&entry) {
            node.head = new_head;
            node.short = true;
            node.size = new_size;
        }
        self.sync_entry(entry, new_size, new_head)
    }

    /// Reads from an open stream; the range must sit below the size.
    fn node_read(&mut self, entry: u32, at: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let (head, short) = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            (node.head, node.short)
        };

        if short {
            let chain = ShortChain::new(head);
            chain.read(
                &self.dev,
                &self.header,
                &self.sat,
                &self.ssat,
                &self.mini,
                at,
                buf,
            )
        } else {
            let chain = Chain::new(head);
            chain.read(&self.dev, &self.header, &self.sat, at, buf)
        }
    }

    /// Writes to an open stream, extending and migrating as needed.
    fn node_write(&mut self, entry: u32, at: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let end = at
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        let threshold = self.threshold()?;

        let (size, short) = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            (node.size, node.short)
        };

        if short && end >= threshold {
            self.migrate_to_regular(entry)?;
        }

        // a seek past the end leaves a gap that reads back as zeros
        if at > size {
            self.node_fill_zeros(entry, size, at)?;
        }

        let (head, short) = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            (node.head, node.short)
        };

        let written = if short {
            let mut chain = ShortChain::new(head);
            let n = chain.write(
                &mut self.dev,
                &self.header,
                &mut self.sat,
                &mut self.ssat,
                &mut self.mini,
                at,
                buf,
            )?;
            let new_head = chain.head();
            if let Some(node) = self.nodes.get_mut(&entry) {
                node.head = new_head;
            }
            self.sync_mini_entry()?;
            n
        } else {
            let mut chain = Chain::new(head);
            let n = chain.write(&mut self.dev, &self.header, &mut self.sat, at, buf)?;
            let new_head = chain.head();
            if let Some(node) = self.nodes.get_mut(&entry) {
                node.head = new_head;
            }
            n
        };

        let new_size = u64::max(size, end);
        let head = {
            let node = self.nodes.get_mut(&entry).ok_or(Error::InvalidHandle)?;
            node.size = new_size;
            node.head
        };
        self.sync_entry(entry, new_size, head)?;

        Ok(written)
    }

    fn node_fill_zeros(&mut self, entry: u32, from: u64, to: u64) -> Result<()> {
        let zeros = [0u8; 512];
        let mut at = from;
        while at < to {
            let chunk = u64::min(zeros.len() as u64, to - at);
            self.node_write(entry, at, &zeros[..chunk as usize])?;
            at += chunk;
        }
        Ok(())
    }

    /// Resizes an open stream, migrating across the threshold as needed.
    fn truncate_node(&mut self, entry: u32, new_size: u64) -> Result<()> {
        let threshold = self.threshold()?;
        let (size, head, short) = {
            let node = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?;
            (node.size, node.head, node.short)
        };

        if new_size == size {
            return Ok(());
        }

        if new_size > size {
            // growth is zero fill; the write path handles any migration
            return self.node_fill_zeros(entry, size, new_size);
        }

        if new_size >= threshold {
            // stays regular: trim whole sectors off the tail
            let ss = self.header.sector_size();
            let needed = new_size.div_ceil(ss) as usize;
            let mut chain = Chain::new(head);
            while chain.sector_count(&self.dev, &self.header, &self.sat)? > needed {
                chain.delete_last_sector(&mut self.dev, &self.header, &mut self.sat)?;
            }
            let new_head = chain.head();
            if let Some(node) = self.nodes.get_mut(&entry) {
                node.size = new_size;
                node.head = new_head;
            }
            return self.sync_entry(entry, new_size, new_head);
        }

        if !short {
            // crossing down: the remaining bytes move into the mini-stream
            return self.migrate_to_short(entry, new_size);
        }

        // short stays short: rebuild the short chain with the kept prefix
        let data = self.content_of(new_size, head, true)?;
        self.release_stream(head, true)?;

        let mut chain = ShortChain::new(END_OF_CHAIN);
        if !data.is_empty() {
            chain.write(
                &mut self.dev,
                &self.header,
                &mut self.sat,
                &mut self.ssat,
                &mut self.mini,
                0,
                &data,
            )?;
        }
        self.sync_mini_entry()?;

        let new_head = chain.head();
        if let Some(node) = self.nodes.get_mut(&entry) {
            node.size = new_size;
            node.head = new_head;
        }
        self.sync_entry(entry, new_size, new_head)
    }

    // --- inner operations ------------------------------------------------

    fn mkdir_inner(&mut self, path: &FsPath) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        self.dir.create_entry(
            &mut self.dev,
            &self.header,
            &mut self.sat,
            parent,
            &name,
            EntryType::UserStorage,
        )?;
        Ok(())
    }

    fn rmdir_inner(&mut self, path: &FsPath) -> Result<()> {
        let entry = self.resolve(path)?;
        if entry == ROOT_ENTRY {
            return Err(Error::PermissionDenied);
        }

        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, entry)?;
        if !is_storage(entry_type) {
            return Err(Error::NotADirectory);
        }

        if self.dir.child(&self.dev, &self.header, &self.sat, entry)? != NULL_ENTRY {
            return Err(Error::PermissionDenied);
        }

        let (parent, _) = self.resolve_parent(path)?;
        self.dir
            .delete_entry(&mut self.dev, &self.header, &mut self.sat, parent, entry)
    }

    fn open_inner(&mut self, path: &FsPath, mode: OpenMode) -> Result<u32> {
        if !mode.can_read() && !mode.can_write() {
            return Err(Error::InvalidArgument("neither readable nor writable"));
        }

        let (parent, name) = self.resolve_parent(path)?;
        let existing =
            self.dir
                .find_child(&mut self.dev, &self.header, &mut self.sat, parent, &name)?;

        let entry = match existing {
            Some(entry) => {
                let entry_type = self
                    .dir
                    .entry_type(&self.dev, &self.header, &self.sat, entry)?;
                if entry_type != EntryType::UserStream {
                    return Err(Error::IsADirectory);
                }
                entry
            }
            None => {
                if !mode.contains(OpenMode::CREATE) {
                    return Err(Error::NotFound);
                }
                self.dir.create_entry(
                    &mut self.dev,
                    &self.header,
                    &mut self.sat,
                    parent,
                    &name,
                    EntryType::UserStream,
                )?
            }
        };

        if let Some(node) = self.nodes.get_mut(&entry) {
            node.refcount += 1;
        } else {
            let size = u64::from(self.dir.size(&self.dev, &self.header, &self.sat, entry)?);
            let head = self
                .dir
                .head_sector(&self.dev, &self.header, &self.sat, entry)?;
            let threshold = self.threshold()?;
            self.nodes.insert(
                entry,
                OpenNode {
                    size,
                    head,
                    short: size < threshold,
                    refcount: 1,
                },
            );
        }

        if mode.contains(OpenMode::TRUNCATE) {
            if let Err(e) = self.truncate_node(entry, 0) {
                self.drop_node_ref(entry);
                return Err(e);
            }
        }

        let pos = if mode.contains(OpenMode::APPEND) {
            self.nodes.get(&entry).map_or(0, |n| n.size)
        } else {
            0
        };

        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, FileHandle { entry, pos, mode });

        log::debug!("opened {path} as handle {handle}");
        Ok(handle)
    }

    fn drop_node_ref(&mut self, entry: u32) {
        if let Some(node) = self.nodes.get_mut(&entry) {
            node.refcount -= 1;
            if node.refcount == 0 {
                self.nodes.remove(&entry);
            }
        }
    }

    fn close_inner(&mut self, handle: u32) -> Result<()> {
        let file = self.files.remove(&handle).ok_or(Error::InvalidHandle)?;
        self.drop_node_ref(file.entry);
        Ok(())
    }

    fn read_inner(&mut self, handle: u32, buf: &mut [u8]) -> Result<usize> {
        let (entry, pos, mode) = {
            let file = self.files.get(&handle).ok_or(Error::InvalidHandle)?;
            (file.entry, file.pos, file.mode)
        };
        if !mode.can_read() {
            return Err(Error::PermissionDenied);
        }

        let size = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?.size;
        let n = usize::min(buf.len(), size.saturating_sub(pos) as usize);
        if n > 0 {
            self.node_read(entry, pos, &mut buf[..n])?;
        }

        if let Some(file) = self.files.get_mut(&handle) {
            file.pos += n as u64;
        }
        Ok(n)
    }

    fn write_inner(&mut self, handle: u32, buf: &[u8]) -> Result<usize> {
        let (entry, pos, mode) = {
            let file = self.files.get(&handle).ok_or(Error::InvalidHandle)?;
            (file.entry, file.pos, file.mode)
        };
        if !mode.can_write() {
            return Err(Error::PermissionDenied);
        }

        let n = self.node_write(entry, pos, buf)?;
        if let Some(file) = self.files.get_mut(&handle) {
            file.pos += n as u64;
        }
        Ok(n)
    }

    fn seek_inner(&mut self, handle: u32, offset: i64, whence: Whence) -> Result<u64> {
        let (entry, pos) = {
            let file = self.files.get(&handle).ok_or(Error::InvalidHandle)?;
            (file.entry, file.pos)
        };
        let size = self.nodes.get(&entry).ok_or(Error::InvalidHandle)?.size;

        let base = match whence {
            Whence::Set => 0,
            Whence::Current => pos,
            Whence::End => size,
        };
        let target = base
            .checked_add_signed(offset)
            .ok_or(Error::OutOfRange)?;

        if let Some(file) = self.files.get_mut(&handle) {
            file.pos = target;
        }
        Ok(target)
    }

    fn truncate_inner(&mut self, handle: u32, new_size: u64) -> Result<()> {
        let (entry, mode) = {
            let file = self.files.get(&handle).ok_or(Error::InvalidHandle)?;
            (file.entry, file.mode)
        };
        if !mode.can_write() {
            return Err(Error::PermissionDenied);
        }
        self.truncate_node(entry, new_size)
    }

    fn unlink_inner(&mut self, path: &FsPath) -> Result<()> {
        let entry = self.resolve(path)?;
        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, entry)?;
        if entry_type != EntryType::UserStream {
            return Err(Error::IsADirectory);
        }
        if self.nodes.contains_key(&entry) {
            return Err(Error::PermissionDenied);
        }

        let size = u64::from(self.dir.size(&self.dev, &self.header, &self.sat, entry)?);
        let head = self
            .dir
            .head_sector(&self.dev, &self.header, &self.sat, entry)?;
        let threshold = self.threshold()?;
        self.release_stream(head, size < threshold)?;

        let (parent, _) = self.resolve_parent(path)?;
        self.dir
            .delete_entry(&mut self.dev, &self.header, &mut self.sat, parent, entry)
    }

    /// Returns `true` when `candidate` lies inside the subtree of `root`.
    fn is_descendant(&mut self, root: u32, candidate: u32) -> Result<bool> {
        let mut queue = vec![root];
        while let Some(entry) = queue.pop() {
            if entry == candidate {
                return Ok(true);
            }
            let entry_type = self
                .dir
                .entry_type(&self.dev, &self.header, &self.sat, entry)?;
            if is_storage(entry_type) {
                queue.extend(self.dir.children(
                    &mut self.dev,
                    &self.header,
                    &mut self.sat,
                    entry,
                )?);
            }
        }
        Ok(false)
    }

    fn move_inner(&mut self, from: &FsPath, to: &FsPath) -> Result<()> {
        let entry = self.resolve(from)?;
        if entry == ROOT_ENTRY {
            return Err(Error::PermissionDenied);
        }
        if self.nodes.contains_key(&entry) {
            return Err(Error::PermissionDenied);
        }

        let (from_parent, old_name) = self.resolve_parent(from)?;
        let (to_parent, new_name) = self.resolve_parent(to)?;

        if self
            .dir
            .find_child(&mut self.dev, &self.header, &mut self.sat, to_parent, &new_name)?
            .is_some()
        {
            return Err(Error::AlreadyExists);
        }

        // a directory cannot move below itself
        if self.is_descendant(entry, to_parent)? {
            return Err(Error::PermissionDenied);
        }

        self.dir
            .unlink_child(&mut self.dev, &self.header, &mut self.sat, from_parent, entry)?;
        self.dir
            .set_name(&mut self.dev, &self.header, &mut self.sat, entry, &new_name)?;

        if !self
            .dir
            .link_child(&mut self.dev, &self.header, &mut self.sat, to_parent, entry)?
        {
            // roll back to the source tree under the old name
            self.dir
                .set_name(&mut self.dev, &self.header, &mut self.sat, entry, &old_name)?;
            self.dir
                .link_child(&mut self.dev, &self.header, &mut self.sat, from_parent, entry)?;
            return Err(Error::AlreadyExists);
        }

        log::debug!("moved {from} to {to}");
        Ok(())
    }

    fn stat_entry(&mut self, entry: u32) -> Result<StatInfo> {
        let name = self.dir.name(&self.dev, &self.header, &self.sat, entry)?;
        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, entry)?;
        let size = if entry_type == EntryType::UserStream {
            u64::from(self.dir.size(&self.dev, &self.header, &self.sat, entry)?)
        } else {
            0
        };
        Ok(StatInfo {
            name: name_to_string(&name),
            entry_type,
            size,
            entry_id: entry,
        })
    }

    fn stat_inner(&mut self, path: &FsPath) -> Result<StatInfo> {
        let entry = self.resolve(path)?;
        self.stat_entry(entry)
    }

    fn listdir_inner(&mut self, path: &FsPath) -> Result<Vec<StatInfo>> {
        let entry = self.resolve(path)?;
        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, entry)?;
        if !is_storage(entry_type) {
            return Err(Error::NotADirectory);
        }

        let children = self
            .dir
            .children(&mut self.dev, &self.header, &mut self.sat, entry)?;
        children
            .into_iter()
            .map(|child| self.stat_entry(child))
            .collect()
    }

    fn touch_inner(&mut self, path: &FsPath) -> Result<()> {
        match self.resolve(path) {
            Ok(entry) => {
                let entry_type = self
                    .dir
                    .entry_type(&self.dev, &self.header, &self.sat, entry)?;
                if entry_type != EntryType::UserStream {
                    return Err(Error::IsADirectory);
                }
                self.dir.set_modified(
                    &mut self.dev,
                    &self.header,
                    &mut self.sat,
                    entry,
                    dir::now_timestamp(),
                )
            }
            Err(Error::NotFound) => {
                let handle = self.open_inner(path, OpenMode::CREATE)?;
                self.close_inner(handle)
            }
            Err(e) => Err(e),
        }
    }

    fn copy_inner(&mut self, from: &FsPath, to: &FsPath) -> Result<()> {
        let entry = self.resolve(from)?;
        let entry_type = self
            .dir
            .entry_type(&self.dev, &self.header, &self.sat, entry)?;
        if entry_type != EntryType::UserStream {
            return Err(Error::IsADirectory);
        }

        let size = u64::from(self.dir.size(&self.dev, &self.header, &self.sat, entry)?);
        let head = self
            .dir
            .head_sector(&self.dev, &self.header, &self.sat, entry)?;
        let threshold = self.threshold()?;
        let data = self.content_of(size, head, size < threshold)?;

        let handle = self.open_inner(to, OpenMode::CREATE | OpenMode::TRUNCATE)?;
        let write_result = self.write_inner(handle, &data);
        self.close_inner(handle)?;
        write_result?;
        Ok(())
    }

    // --- public façade ---------------------------------------------------

    /// Creates a directory; the parent must exist.
    pub fn mkdir<P: Into<FsPath>>(&mut self, path: P) -> bool {
        let path = path.into();
        let result = self.mkdir_inner(&path);
        self.settle(result).is_some()
    }

    /// Removes an empty directory.
    pub fn rmdir<P: Into<FsPath>>(&mut self, path: P) -> bool {
        let path = path.into();
        let result = self.rmdir_inner(&path);
        self.settle(result).is_some()
    }

    /// Opens (or creates) a stream, returning a file handle.
    pub fn open<P: Into<FsPath>>(&mut self, path: P, mode: OpenMode) -> Option<u32> {
        let path = path.into();
        let result = self.open_inner(&path, mode);
        self.settle(result)
    }

    /// Closes a file handle.
    pub fn close(&mut self, handle: u32) -> bool {
        let result = self.close_inner(handle);
        self.settle(result).is_some()
    }

    /// Opens a directory handle.
    pub fn opendir<P: Into<FsPath>>(&mut self, path: P) -> Option<u32> {
        let path = path.into();
        let result = (|| {
            let entry = self.resolve(&path)?;
            let entry_type = self
                .dir
                .entry_type(&self.dev, &self.header, &self.sat, entry)?;
            if !is_storage(entry_type) {
                return Err(Error::NotADirectory);
            }
            let handle = self.next_handle;
            self.next_handle += 1;
            self.dirs.insert(handle, entry);
            Ok(handle)
        })();
        self.settle(result)
    }

    /// Closes a directory handle.
    pub fn closedir(&mut self, handle: u32) -> bool {
        let result = self
            .dirs
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::InvalidHandle);
        self.settle(result).is_some()
    }

    /// Removes a stream; fails while any handle is open on it.
    pub fn unlink<P: Into<FsPath>>(&mut self, path: P) -> bool {
        let path = path.into();
        let result = self.unlink_inner(&path);
        self.settle(result).is_some()
    }

    /// Moves or renames an entry.
    pub fn r#move<P: Into<FsPath>, Q: Into<FsPath>>(&mut self, from: P, to: Q) -> bool {
        let from = from.into();
        let to = to.into();
        let result = self.move_inner(&from, &to);
        self.settle(result).is_some()
    }

    /// Reads from the current position, returning the byte count.
    pub fn read(&mut self, handle: u32, buf: &mut [u8]) -> usize {
        let result = self.read_inner(handle, buf);
        self.settle(result).unwrap_or(0)
    }

    /// Writes at the current position, returning the byte count.
    pub fn write(&mut self, handle: u32, buf: &[u8]) -> usize {
        let result = self.write_inner(handle, buf);
        self.settle(result).unwrap_or(0)
    }

    /// Resizes the stream behind a handle.
    pub fn truncate(&mut self, handle: u32, size: u64) -> bool {
        let result = self.truncate_inner(handle, size);
        self.settle(result).is_some()
    }

    /// Repositions a handle.
    pub fn seek(&mut self, handle: u32, offset: i64, whence: Whence) -> bool {
        let result = self.seek_inner(handle, offset, whence);
        self.settle(result).is_some()
    }

    /// Current position of a handle.
    pub fn tell(&mut self, handle: u32) -> Option<u64> {
        let result = self
            .files
            .get(&handle)
            .map(|f| f.pos)
            .ok_or(Error::InvalidHandle);
        self.settle(result)
    }

    /// Returns `true` when the position is at (or past) the end.
    pub fn eof(&mut self, handle: u32) -> bool {
        let result = (|| {
            let file = self.files.get(&handle).ok_or(Error::InvalidHandle)?;
            let node = self.nodes.get(&file.entry).ok_or(Error::InvalidHandle)?;
            Ok(file.pos >= node.size)
        })();
        self.settle(result).unwrap_or(true)
    }

    /// Flushes buffered state for one handle.
    pub fn flush(&mut self, handle: u32) -> bool {
        let result = (|| {
            if !self.files.contains_key(&handle) {
                return Err(Error::InvalidHandle);
            }
            self.dev.flush()
        })();
        self.settle(result).is_some()
    }

    /// Flushes the underlying device.
    pub fn sync(&mut self) {
        let result = self.dev.flush();
        self.settle(result);
    }

    /// Entry metadata, or `None` when the path does not resolve.
    pub fn stat<P: Into<FsPath>>(&mut self, path: P) -> Option<StatInfo> {
        let path = path.into();
        let result = self.stat_inner(&path);
        self.settle(result)
    }

    /// Children of a directory in name order.
    pub fn listdir<P: Into<FsPath>>(&mut self, path: P) -> Vec<StatInfo> {
        let path = path.into();
        let result = self.listdir_inner(&path);
        self.settle(result).unwrap_or_default()
    }

    /// Returns `true` when the path resolves to any entry.
    pub fn exists<P: Into<FsPath>>(&mut self, path: P) -> bool {
        let path = path.into();
        let result = self.resolve(&path);
        self.settle(result).is_some()
    }

    /// Returns `true` when the path resolves to a stream.
    pub fn is_file<P: Into<FsPath>>(&mut self, path: P) -> bool {
        self.stat(path)
            .is_some_and(|s| s.entry_type == EntryType::UserStream)
    }

    /// Returns `true` when the path resolves to a directory.
    pub fn is_directory<P: Into<FsPath>>(&mut self, path: P) -> bool {
        self.stat(path).is_some_and(|s| is_storage(s.entry_type))
    }

    /// Byte size of a stream.
    pub fn filesize<P: Into<FsPath>>(&mut self, path: P) -> Option<u64> {
        let path = path.into();
        let result = (|| {
            let stat = self.stat_inner(&path)?;
            if stat.entry_type != EntryType::UserStream {
                return Err(Error::IsADirectory);
            }
            Ok(stat.size)
        })();
        self.settle(result)
    }

    /// Creates an empty stream, or refreshes the modified timestamp.
    pub fn touch<P: Into<FsPath>>(&mut self, path: P) -> bool {
        let path = path.into();
        let result = self.touch_inner(&path);
        self.settle(result).is_some()
    }

    /// Copies a stream's content to a new path.
    pub fn copy<P: Into<FsPath>, Q: Into<FsPath>>(&mut self, from: P, to: Q) -> bool {
        let from = from.into();
        let to = to.into();
        let result = self.copy_inner(&from, &to);
        self.settle(result).is_some()
    }
}
