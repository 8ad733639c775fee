//! Directory table.
//!
//! The directory stream is a packed sequence of 128-byte records. Entry 0
//! is always the root storage. Siblings within a directory form a
//! red-black tree whose colour and child links live inside the records
//! themselves; the tree is driven by the generic algorithm through an
//! adapter whose node handle is the 32-bit entry id.

use super::header::Header;
use super::path::{name_less, Name};
use super::sat::Sat;
use super::sector::{is_reg_sector, END_OF_CHAIN};
use super::stream::Chain;
use crate::device::BlockDevice;
use crate::tree::ops::RbOps;
use crate::tree::rb::RbAlgo;
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cell::RefCell;

/// Byte length of one directory record.
pub const ENTRY_SIZE: u64 = 128;

/// The null entry id.
pub const NULL_ENTRY: u32 = 0xFFFF_FFFF;

/// Entry id of the root storage.
pub const ROOT_ENTRY: u32 = 0;

/// Record field offsets.
mod off {
    pub const NAME: u64 = 0;
    pub const NAME_LEN: u64 = 64;
    pub const TYPE: u64 = 66;
    pub const COLOUR: u64 = 67;
    pub const LEFT: u64 = 68;
    pub const RIGHT: u64 = 72;
    pub const CHILD: u64 = 76;
    pub const UID: u64 = 80;
    pub const USER_FLAGS: u64 = 96;
    pub const CREATED: u64 = 100;
    pub const MODIFIED: u64 = 108;
    pub const HEAD_SECTOR: u64 = 116;
    pub const SIZE: u64 = 120;
}

/// Directory entry kind, as stored in the record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryType {
    /// Vacant record.
    Empty,

    /// A directory created by the user.
    UserStorage,

    /// A stream created by the user.
    UserStream,

    /// Reserved by the inherited format.
    LockBytes,

    /// Reserved by the inherited format.
    Property,

    /// Entry 0: the root storage.
    RootStorage,
}

impl From<EntryType> for u8 {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::Empty => 0,
            EntryType::UserStorage => 1,
            EntryType::UserStream => 2,
            EntryType::LockBytes => 3,
            EntryType::Property => 4,
            EntryType::RootStorage => 5,
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, ()> {
        match value {
            0 => Ok(Self::Empty),
            1 => Ok(Self::UserStorage),
            2 => Ok(Self::UserStream),
            3 => Ok(Self::LockBytes),
            4 => Ok(Self::Property),
            5 => Ok(Self::RootStorage),
            _ => Err(()),
        }
    }
}

/// Returns `true` for entry types that can hold children.
#[must_use]
pub fn is_storage(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::RootStorage | EntryType::UserStorage)
}

/// Current wall-clock timestamp for the created/modified fields.
#[must_use]
pub fn now_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64)
}

/// Directory table state: the directory stream plus entry bookkeeping.
pub struct DirTable {
    chain: Chain,
    used: Vec<bool>,
    free_entries: usize,
}

impl DirTable {
    /// Opens (or initializes) the directory stream named by the header.
    pub fn open<D: BlockDevice>(dev: &mut D, header: &Header, sat: &mut Sat) -> Result<Self> {
        let head = header.dir_head(dev)?;
        let mut chain = Chain::new(if is_reg_sector(head) { head } else { END_OF_CHAIN });

        if chain.size(dev, header, sat)? == 0 {
            let at = chain.append_sector(dev, header, sat)?;
            chain.fill_zeros(dev, header, sat, at, at + header.sector_size())?;
            header.set_dir_head(dev, chain.head())?;

            let mut table = Self {
                chain,
                used: vec![false; (header.sector_size() / ENTRY_SIZE) as usize],
                free_entries: (header.sector_size() / ENTRY_SIZE) as usize,
            };

            let root_name = super::path::name_from_str("Root Entry")?;
            table.set_name(dev, header, sat, ROOT_ENTRY, &root_name)?;
            table.set_entry_type(dev, header, sat, ROOT_ENTRY, EntryType::RootStorage)?;
            table.set_black(dev, header, sat, ROOT_ENTRY, true)?;
            table.set_left(dev, header, sat, ROOT_ENTRY, NULL_ENTRY)?;
            table.set_right(dev, header, sat, ROOT_ENTRY, NULL_ENTRY)?;
            table.set_child(dev, header, sat, ROOT_ENTRY, NULL_ENTRY)?;
            table.set_head_sector(dev, header, sat, ROOT_ENTRY, END_OF_CHAIN)?;
            table.set_size(dev, header, sat, ROOT_ENTRY, 0)?;
            let now = now_timestamp();
            table.set_created(dev, header, sat, ROOT_ENTRY, now)?;
            table.set_modified(dev, header, sat, ROOT_ENTRY, now)?;

            table.used[ROOT_ENTRY as usize] = true;
            table.free_entries -= 1;

            log::debug!("initialized directory stream");
            return Ok(table);
        }

        let slots = (chain.size(dev, header, sat)? / ENTRY_SIZE) as usize;
        let mut table = Self {
            chain,
            used: vec![false; slots],
            free_entries: slots,
        };

        // reachability scan from the root; a repeated id means a cycle
        let mut queue = vec![ROOT_ENTRY];
        while let Some(entry) = queue.pop() {
            if entry as usize >= slots {
                return Err(Error::FileCorrupt);
            }
            if table.used[entry as usize] {
                return Err(Error::FileCorrupt);
            }
            table.used[entry as usize] = true;
            table.free_entries -= 1;

            for link in [
                table.left(dev, header, sat, entry)?,
                table.right(dev, header, sat, entry)?,
            ] {
                if link != NULL_ENTRY {
                    queue.push(link);
                }
            }

            let entry_type = table.entry_type(dev, header, sat, entry)?;
            if is_storage(entry_type) {
                let child = table.child(dev, header, sat, entry)?;
                if child != NULL_ENTRY {
                    queue.push(child);
                }
            }
        }

        log::debug!(
            "opened directory stream: {slots} slots, {} used",
            slots - table.free_entries
        );
        Ok(table)
    }

    fn field_addr(entry: u32, field: u64) -> u64 {
        u64::from(entry) * ENTRY_SIZE + field
    }

    fn read_field<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
        field: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        self.chain
            .read(dev, header, sat, Self::field_addr(entry, field), buf)?;
        Ok(())
    }

    fn write_field<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        field: u64,
        buf: &[u8],
    ) -> Result<()> {
        self.chain
            .write(dev, header, sat, Self::field_addr(entry, field), buf)?;
        Ok(())
    }

    fn get_u32<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
        field: u64,
    ) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_field(dev, header, sat, entry, field, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    fn set_u32<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        field: u64,
        value: u32,
    ) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_field(dev, header, sat, entry, field, &buf)
    }

    /// Stored name of `entry`.
    pub fn name<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<Name> {
        let mut buf = [0u8; 64];
        self.read_field(dev, header, sat, entry, off::NAME, &mut buf)?;
        let mut name: Name = [0; 32];
        LittleEndian::read_u16_into(&buf, &mut name);
        Ok(name)
    }

    /// Writes the name and its byte length.
    pub fn set_name<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        name: &Name,
    ) -> Result<()> {
        let mut buf = [0u8; 64];
        LittleEndian::write_u16_into(name, &mut buf);
        self.write_field(dev, header, sat, entry, off::NAME, &buf)?;

        let units = super::path::name_len(name) as u16;
        let mut len_buf = [0u8; 2];
        LittleEndian::write_u16(&mut len_buf, (units + 1) * 2);
        self.write_field(dev, header, sat, entry, off::NAME_LEN, &len_buf)
    }

    /// Entry kind.
    pub fn entry_type<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<EntryType> {
        let mut buf = [0u8; 1];
        self.read_field(dev, header, sat, entry, off::TYPE, &mut buf)?;
        EntryType::try_from(buf[0]).map_err(|()| Error::FileCorrupt)
    }

    /// Updates the entry kind.
    pub fn set_entry_type<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        entry_type: EntryType,
    ) -> Result<()> {
        self.write_field(dev, header, sat, entry, off::TYPE, &[entry_type.into()])
    }

    /// Colour bit.
    pub fn is_black<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<bool> {
        let mut buf = [0u8; 1];
        self.read_field(dev, header, sat, entry, off::COLOUR, &mut buf)?;
        Ok(buf[0] != 0)
    }

    /// Updates the colour bit.
    pub fn set_black<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        black: bool,
    ) -> Result<()> {
        self.write_field(dev, header, sat, entry, off::COLOUR, &[u8::from(black)])
    }

    /// Left sibling link.
    pub fn left<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::LEFT)
    }

    /// Updates the left sibling link.
    pub fn set_left<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        value: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::LEFT, value)
    }

    /// Right sibling link.
    pub fn right<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::RIGHT)
    }

    /// Updates the right sibling link.
    pub fn set_right<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        value: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::RIGHT, value)
    }

    /// Sub-directory tree root (storage entries only).
    pub fn child<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::CHILD)
    }

    /// Updates the sub-directory tree root.
    pub fn set_child<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        value: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::CHILD, value)
    }

    /// Stream UID (16 raw bytes).
    pub fn uid<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<[u8; 16]> {
        let mut buf = [0u8; 16];
        self.read_field(dev, header, sat, entry, off::UID, &mut buf)?;
        Ok(buf)
    }

    /// Updates the stream UID.
    pub fn set_uid<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        uid: &[u8; 16],
    ) -> Result<()> {
        self.write_field(dev, header, sat, entry, off::UID, uid)
    }

    /// User flags.
    pub fn user_flags<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::USER_FLAGS)
    }

    /// Updates the user flags.
    pub fn set_user_flags<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        flags: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::USER_FLAGS, flags)
    }

    /// Creation timestamp.
    pub fn created<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_field(dev, header, sat, entry, off::CREATED, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Updates the creation timestamp.
    pub fn set_created<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        stamp: u64,
    ) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, stamp);
        self.write_field(dev, header, sat, entry, off::CREATED, &buf)
    }

    /// Modification timestamp.
    pub fn modified<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_field(dev, header, sat, entry, off::MODIFIED, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Updates the modification timestamp.
    pub fn set_modified<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        stamp: u64,
    ) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, stamp);
        self.write_field(dev, header, sat, entry, off::MODIFIED, &buf)
    }

    /// Head sector of the entry's stream.
    pub fn head_sector<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::HEAD_SECTOR)
    }

    /// Updates the head sector of the entry's stream.
    pub fn set_head_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        head: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::HEAD_SECTOR, head)
    }

    /// User-visible stream size in bytes.
    pub fn size<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        entry: u32,
    ) -> Result<u32> {
        self.get_u32(dev, header, sat, entry, off::SIZE)
    }

    /// Updates the stream size.
    pub fn set_size<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
        size: u32,
    ) -> Result<()> {
        self.set_u32(dev, header, sat, entry, off::SIZE, size)
    }

    /// Zeroes a whole record.
    fn clear_record<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        entry: u32,
    ) -> Result<()> {
        self.write_field(dev, header, sat, entry, 0, &[0u8; ENTRY_SIZE as usize])
    }

    /// Allocates and initializes a record, inserting it into the parent's
    /// sibling tree. Rolls the allocation back on a name collision.
    pub fn create_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
        name: &Name,
        entry_type: EntryType,
    ) -> Result<u32> {
        debug_assert!(matches!(
            entry_type,
            EntryType::UserStorage | EntryType::UserStream
        ));

        if self.free_entries == 0 {
            let at = self.chain.append_sector(dev, header, sat)?;
            self.chain
                .fill_zeros(dev, header, sat, at, at + header.sector_size())?;
            let fresh = (header.sector_size() / ENTRY_SIZE) as usize;
            self.used.extend(std::iter::repeat(false).take(fresh));
            self.free_entries += fresh;
        }

        #[allow(clippy::expect_used)]
        let id = self
            .used
            .iter()
            .position(|used| !*used)
            .expect("free entry should exist after growth") as u32;

        self.clear_record(dev, header, sat, id)?;
        self.set_name(dev, header, sat, id, name)?;
        self.set_entry_type(dev, header, sat, id, entry_type)?;
        self.set_left(dev, header, sat, id, NULL_ENTRY)?;
        self.set_right(dev, header, sat, id, NULL_ENTRY)?;
        self.set_child(dev, header, sat, id, NULL_ENTRY)?;
        self.set_head_sector(dev, header, sat, id, END_OF_CHAIN)?;
        self.set_size(dev, header, sat, id, 0)?;
        let now = now_timestamp();
        self.set_created(dev, header, sat, id, now)?;
        self.set_modified(dev, header, sat, id, now)?;

        if !self.link_child(dev, header, sat, parent, id)? {
            return Err(Error::AlreadyExists);
        }

        self.used[id as usize] = true;
        self.free_entries -= 1;

        log::debug!("created directory entry {id} under {parent}");
        Ok(id)
    }

    /// Inserts an existing (detached) entry into a parent's sibling tree.
    ///
    /// Returns `false` on a name collision, leaving both trees unchanged.
    pub fn link_child<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
        entry: u32,
    ) -> Result<bool> {
        let mut root = self.child(dev, header, sat, parent)?;

        let inserted = {
            let mut ops = DirOps::new(self, dev, header, sat);
            let inserted = RbAlgo::unique().insert(&mut ops, &mut root, entry);
            ops.finish()?;
            inserted
        };

        if inserted {
            self.set_child(dev, header, sat, parent, root)?;
        }
        Ok(inserted)
    }

    /// Detaches an entry from a parent's sibling tree (the record itself
    /// is untouched).
    pub fn unlink_child<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
        entry: u32,
    ) -> Result<()> {
        let name = self.name(dev, header, sat, entry)?;
        let mut root = self.child(dev, header, sat, parent)?;

        {
            let mut ops = DirOps::new(self, dev, header, sat);
            let algo = RbAlgo::unique();
            let path = algo.find(&ops, root, &name);
            if !RbAlgo::exists(&path) {
                ops.finish()?;
                return Err(Error::NotFound);
            }
            let detached = algo.delete(&mut ops, &mut root, path);
            debug_assert_eq!(entry, detached);
            ops.finish()?;
        }

        self.set_child(dev, header, sat, parent, root)?;
        Ok(())
    }

    /// Looks up a child by name in a parent's sibling tree.
    pub fn find_child<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
        name: &Name,
    ) -> Result<Option<u32>> {
        let root = self.child(dev, header, sat, parent)?;

        let ops = DirOps::new(self, dev, header, sat);
        let path = RbAlgo::unique().find(&ops, root, name);
        let found = RbAlgo::exists(&path).then(|| path[path.len() - 1]);
        ops.finish()?;
        Ok(found)
    }

    /// Children of a directory in name order.
    pub fn children<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
    ) -> Result<Vec<u32>> {
        let root = self.child(dev, header, sat, parent)?;

        let ops = DirOps::new(self, dev, header, sat);
        let algo = RbAlgo::unique();
        let mut out = Vec::new();
        let mut path = algo.first(&ops, root);
        while RbAlgo::exists(&path) {
            out.push(path[path.len() - 1]);
            algo.forward(&ops, &mut path);
        }
        ops.finish()?;
        Ok(out)
    }

    /// Detaches an entry from its parent and releases the record slot.
    pub fn delete_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
        entry: u32,
    ) -> Result<()> {
        debug_assert_ne!(ROOT_ENTRY, entry);

        self.unlink_child(dev, header, sat, parent, entry)?;
        self.clear_record(dev, header, sat, entry)?;
        self.used[entry as usize] = false;
        self.free_entries += 1;

        log::debug!("deleted directory entry {entry} under {parent}");
        Ok(())
    }

    /// Verifies the sibling tree of `parent`; test support.
    pub fn check_tree<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        parent: u32,
    ) -> Result<bool> {
        let root = self.child(dev, header, sat, parent)?;
        let ops = DirOps::new(self, dev, header, sat);
        let ok = RbAlgo::unique().check_consistency(&ops, root);
        ops.finish()?;
        Ok(ok)
    }
}

/// Red-black tree adapter over directory records.
///
/// Accessor failures poison the adapter instead of surfacing mid-walk;
/// the algorithms keep their never-failing contract and the owner checks
/// [`DirOps::finish`] afterwards.
struct DirOps<'a, D: BlockDevice> {
    table: &'a mut DirTable,
    dev: &'a mut D,
    header: &'a Header,
    sat: &'a mut Sat,
    err: RefCell<Option<Error>>,
}

impl<'a, D: BlockDevice> DirOps<'a, D> {
    fn new(
        table: &'a mut DirTable,
        dev: &'a mut D,
        header: &'a Header,
        sat: &'a mut Sat,
    ) -> Self {
        Self {
            table,
            dev,
            header,
            sat,
            err: RefCell::new(None),
        }
    }

    /// Surfaces the first accessor failure, if any.
    fn finish(self) -> Result<()> {
        match self.err.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record<T>(&self, result: Result<T>, fallback: T) -> T {
        match result {
            Ok(v) => v,
            Err(e) => {
                let mut slot = self.err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e);
                }
                fallback
            }
        }
    }
}

impl<D: BlockDevice> RbOps for DirOps<'_, D> {
    type Id = u32;
    type Key = Name;

    fn null(&self) -> u32 {
        NULL_ENTRY
    }

    fn left(&self, node: u32) -> u32 {
        let got = self.table.left(&*self.dev, self.header, self.sat, node);
        self.record(got, NULL_ENTRY)
    }

    fn right(&self, node: u32) -> u32 {
        let got = self.table.right(&*self.dev, self.header, self.sat, node);
        self.record(got, NULL_ENTRY)
    }

    fn set_left(&mut self, node: u32, child: u32) {
        let done = self
            .table
            .set_left(self.dev, self.header, self.sat, node, child);
        self.record(done, ());
    }

    fn set_right(&mut self, node: u32, child: u32) {
        let done = self
            .table
            .set_right(self.dev, self.header, self.sat, node, child);
        self.record(done, ());
    }

    fn is_black(&self, node: u32) -> bool {
        let got = self.table.is_black(&*self.dev, self.header, self.sat, node);
        self.record(got, true)
    }

    fn set_black(&mut self, node: u32, black: bool) {
        let done = self
            .table
            .set_black(self.dev, self.header, self.sat, node, black);
        self.record(done, ());
    }

    fn key(&self, node: u32) -> Name {
        let got = self.table.name(&*self.dev, self.header, self.sat, node);
        self.record(got, [0; 32])
    }

    fn key_lt(&self, a: &Name, b: &Name) -> bool {
        name_less(a, b)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{DirTable, EntryType, ROOT_ENTRY};
    use crate::device::MemDevice;
    use crate::fs::header::Header;
    use crate::fs::path::{name_from_str, name_to_string};
    use crate::fs::sat::Sat;
    use crate::Error;
    use test_log::test;

    fn fresh() -> (MemDevice, Header, Sat, DirTable) {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        let mut sat = Sat::load(&dev, &header).unwrap();
        let table = DirTable::open(&mut dev, &header, &mut sat).unwrap();
        (dev, header, sat, table)
    }

    #[test]
    fn root_entry_is_initialized() {
        let (dev, header, sat, table) = fresh();

        let name = table.name(&dev, &header, &sat, ROOT_ENTRY).unwrap();
        assert_eq!("Root Entry", name_to_string(&name));
        assert_eq!(
            EntryType::RootStorage,
            table.entry_type(&dev, &header, &sat, ROOT_ENTRY).unwrap()
        );
        assert!(table.is_black(&dev, &header, &sat, ROOT_ENTRY).unwrap());
    }

    #[test]
    fn create_find_delete_children() {
        let (mut dev, header, mut sat, mut table) = fresh();

        let mut ids = Vec::new();
        for n in ["alpha", "beta", "gamma", "a", "bb"] {
            let name = name_from_str(n).unwrap();
            let id = table
                .create_entry(
                    &mut dev,
                    &header,
                    &mut sat,
                    ROOT_ENTRY,
                    &name,
                    EntryType::UserStream,
                )
                .unwrap();
            ids.push(id);
            assert!(table.check_tree(&mut dev, &header, &mut sat, ROOT_ENTRY).unwrap());
        }

        let beta = name_from_str("beta").unwrap();
        assert_eq!(
            Some(ids[1]),
            table
                .find_child(&mut dev, &header, &mut sat, ROOT_ENTRY, &beta)
                .unwrap()
        );

        // children come back in length-then-lex name order
        let children = table
            .children(&mut dev, &header, &mut sat, ROOT_ENTRY)
            .unwrap();
        let names = children
            .iter()
            .map(|id| name_to_string(&table.name(&dev, &header, &sat, *id).unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(vec!["a", "bb", "alpha", "beta", "gamma"], names);

        table
            .delete_entry(&mut dev, &header, &mut sat, ROOT_ENTRY, ids[1])
            .unwrap();
        assert_eq!(
            None,
            table
                .find_child(&mut dev, &header, &mut sat, ROOT_ENTRY, &beta)
                .unwrap()
        );
        assert!(table.check_tree(&mut dev, &header, &mut sat, ROOT_ENTRY).unwrap());
    }

    #[test]
    fn duplicate_names_are_refused() {
        let (mut dev, header, mut sat, mut table) = fresh();

        let name = name_from_str("twice").unwrap();
        table
            .create_entry(
                &mut dev,
                &header,
                &mut sat,
                ROOT_ENTRY,
                &name,
                EntryType::UserStream,
            )
            .unwrap();

        let dup = table.create_entry(
            &mut dev,
            &header,
            &mut sat,
            ROOT_ENTRY,
            &name,
            EntryType::UserStorage,
        );
        assert!(matches!(dup, Err(Error::AlreadyExists)));

        assert_eq!(1, table.children(&mut dev, &header, &mut sat, ROOT_ENTRY).unwrap().len());
    }

    #[test]
    fn table_reopens_from_device() {
        let (mut dev, header, mut sat, mut table) = fresh();

        for n in ["x", "y", "z"] {
            let name = name_from_str(n).unwrap();
            table
                .create_entry(
                    &mut dev,
                    &header,
                    &mut sat,
                    ROOT_ENTRY,
                    &name,
                    EntryType::UserStorage,
                )
                .unwrap();
        }

        let mut sat = Sat::load(&dev, &header).unwrap();
        let mut reopened = DirTable::open(&mut dev, &header, &mut sat).unwrap();
        let children = reopened
            .children(&mut dev, &header, &mut sat, ROOT_ENTRY)
            .unwrap();
        assert_eq!(3, children.len());
    }
}
