//! Short-sector allocation table and short-sector chains.
//!
//! Streams below the standard-stream threshold live in short sectors:
//! `2^ss`-byte slices of the mini-stream, which is itself a regular sector
//! chain. The SSAT mirrors the SAT one level up: entry *i* chains short
//! sector *i* to its successor.

use super::header::Header;
use super::sat::Sat;
use super::sector::{is_reg_sector, SecId, END_OF_CHAIN, NOT_USED};
use super::stream::Chain;
use crate::device::BlockDevice;
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cell::RefCell;

/// Short-sector allocation table.
///
/// Keeps a full in-memory mirror of the table and writes every change
/// through to the SSAT stream.
pub struct ShortSat {
    entries: Vec<SecId>,
    chain: Chain,
}

impl ShortSat {
    /// Loads the SSAT stream named by the header.
    pub fn load<D: BlockDevice>(dev: &D, header: &Header, sat: &Sat) -> Result<Self> {
        let head = header.ssat_head(dev)?;
        let chain = Chain::new(if is_reg_sector(head) { head } else { END_OF_CHAIN });

        let count = header.ssat_sector_count(dev)?;
        let bytes = u64::from(count) * header.sector_size();
        let mut entries = Vec::with_capacity((bytes / 4) as usize);

        let mut buf = vec![0u8; header.sector_size() as usize];
        for i in 0..count {
            chain.read(dev, header, sat, u64::from(i) * header.sector_size(), &mut buf)?;
            for slot in buf.chunks_exact(4) {
                entries.push(LittleEndian::read_u32(slot));
            }
        }

        Ok(Self { entries, chain })
    }

    /// Number of short-sector slots the table covers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Next short sector of the chain containing `sec`, or `None` at its
    /// end.
    pub fn next(&self, sec: SecId) -> Result<Option<SecId>> {
        let entry = *self
            .entries
            .get(sec as usize)
            .ok_or(Error::FileCorrupt)?;
        if is_reg_sector(entry) {
            return Ok(Some(entry));
        }
        if entry == END_OF_CHAIN {
            return Ok(None);
        }
        Err(Error::FileCorrupt)
    }

    fn set_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        idx: SecId,
        value: SecId,
    ) -> Result<()> {
        if idx as usize >= self.entries.len() {
            return Err(Error::FileCorrupt);
        }
        self.entries[idx as usize] = value;

        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.chain
            .write(dev, header, sat, u64::from(idx) * 4, &buf)?;
        Ok(())
    }

    /// Grows the SSAT by one sector full of `NOT_USED` entries.
    fn grow<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
    ) -> Result<()> {
        let at = self.chain.append_sector(dev, header, sat)?;

        let fresh = vec![0xFFu8; header.sector_size() as usize];
        self.chain.write(dev, header, sat, at, &fresh)?;
        self.entries.extend(std::iter::repeat(NOT_USED).take(fresh.len() / 4));

        header.set_ssat_head(dev, self.chain.head())?;
        let count = header.ssat_sector_count(dev)?;
        header.set_ssat_sector_count(dev, count + 1)?;

        log::debug!("ssat grown to {} entries", self.entries.len());
        Ok(())
    }

    /// Allocates a fresh short sector and chains it after `prev`
    /// (`END_OF_CHAIN` to start a new chain).
    pub fn allocate_next<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        prev: SecId,
    ) -> Result<SecId> {
        let slot = self.entries.iter().position(|e| *e == NOT_USED);
        let sec = match slot {
            Some(idx) => idx as SecId,
            None => {
                let idx = self.entries.len() as SecId;
                self.grow(dev, header, sat)?;
                idx
            }
        };

        self.set_entry(dev, header, sat, sec, END_OF_CHAIN)?;
        if prev != END_OF_CHAIN {
            debug_assert!(is_reg_sector(prev));
            self.set_entry(dev, header, sat, prev, sec)?;
        }

        log::trace!("allocated short sector {sec}");
        Ok(sec)
    }

    /// Splices `sec` out of its chain and marks it free.
    pub fn free<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        prev: Option<SecId>,
        sec: SecId,
    ) -> Result<()> {
        if let Some(p) = prev {
            let next = self.entries[sec as usize];
            self.set_entry(dev, header, sat, p, next)?;
        }
        self.set_entry(dev, header, sat, sec, NOT_USED)?;
        log::trace!("freed short sector {sec}");
        Ok(())
    }
}

/// A short-sector chain, addressed through the mini-stream.
pub struct ShortChain {
    head: SecId,
    cache: RefCell<Vec<SecId>>,
}

impl ShortChain {
    /// Wraps a short chain head (`END_OF_CHAIN` for an empty stream).
    #[must_use]
    pub fn new(head: SecId) -> Self {
        debug_assert!(is_reg_sector(head) || head == END_OF_CHAIN);
        Self {
            head,
            cache: RefCell::new(Vec::new()),
        }
    }

    /// Head short-sector id.
    #[must_use]
    pub fn head(&self) -> SecId {
        self.head
    }

    fn ensure(&self, ssat: &ShortSat, limit: Option<u64>, short_size: u64) -> Result<u64> {
        let mut cache = self.cache.borrow_mut();

        if cache.is_empty() {
            if self.head == END_OF_CHAIN {
                return Ok(0);
            }
            cache.push(self.head);
        }

        loop {
            if let Some(limit) = limit {
                if cache.len() as u64 * short_size >= limit {
                    break;
                }
            }
            #[allow(clippy::expect_used)]
            let last = *cache.last().expect("walked chain should have a tail");
            match ssat.next(last)? {
                Some(next) => cache.push(next),
                None => break,
            }
        }

        Ok(cache.len() as u64 * short_size)
    }

    /// Allocated byte length (short-sector-granular).
    pub fn size(&self, header: &Header, ssat: &ShortSat) -> Result<u64> {
        self.ensure(ssat, None, header.short_sector_size())
    }

    /// Reads within the allocated range.
    #[allow(clippy::too_many_arguments)]
    pub fn read<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        ssat: &ShortSat,
        mini: &Chain,
        at: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let short = header.short_sector_size();
        let end = at
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if self.ensure(ssat, Some(end), short)? < end {
            return Err(Error::OutOfRange);
        }

        let cache = self.cache.borrow();
        let mut done = 0;
        while done < buf.len() {
            let a = at + done as u64;
            let sec = cache[(a / short) as usize];
            let off = a % short;
            let chunk = usize::min(buf.len() - done, (short - off) as usize);
            mini.read(
                dev,
                header,
                sat,
                u64::from(sec) * short + off,
                &mut buf[done..done + chunk],
            )?;
            done += chunk;
        }
        Ok(done)
    }

    /// Writes, allocating short sectors (and growing the mini-stream) as
    /// needed to cover the range.
    #[allow(clippy::too_many_arguments)]
    pub fn write<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        ssat: &mut ShortSat,
        mini: &mut Chain,
        at: u64,
        buf: &[u8],
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let short = header.short_sector_size();
        let end = at
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;

        while self.ensure(ssat, Some(end), short)? < end {
            self.append_short_sector(dev, header, sat, ssat, mini)?;
        }

        let mut done = 0;
        while done < buf.len() {
            let a = at + done as u64;
            let sec = self.cache.borrow()[(a / short) as usize];
            let off = a % short;
            let chunk = usize::min(buf.len() - done, (short - off) as usize);
            mini.write(
                dev,
                header,
                sat,
                u64::from(sec) * short + off,
                &buf[done..done + chunk],
            )?;
            done += chunk;
        }
        Ok(done)
    }

    fn append_short_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        ssat: &mut ShortSat,
        mini: &mut Chain,
    ) -> Result<()> {
        let prev = self.cache.borrow().last().copied().unwrap_or(END_OF_CHAIN);
        let sec = ssat.allocate_next(dev, header, sat, prev)?;

        // make sure the mini-stream physically covers the fresh slice
        let short = header.short_sector_size();
        let needed = (u64::from(sec) + 1) * short;
        let have = mini.size(dev, header, sat)?;
        if have < needed {
            mini.fill_zeros(dev, header, sat, have, needed)?;
        }

        let mut cache = self.cache.borrow_mut();
        cache.push(sec);
        if self.head == END_OF_CHAIN {
            self.head = sec;
        }
        Ok(())
    }

    /// Releases every short sector of the chain.
    pub fn delete_all<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        ssat: &mut ShortSat,
    ) -> Result<()> {
        self.ensure(ssat, None, header.short_sector_size())?;

        let mut cache = self.cache.borrow_mut();
        for sec in cache.drain(..) {
            ssat.free(dev, header, sat, None, sec)?;
        }
        self.head = END_OF_CHAIN;
        Ok(())
    }
}
