//! Byte-addressable stream over a sector chain.
//!
//! A [`Chain`] owns no sectors (the SAT does); it carries the head id and a
//! lazily extended cache of the chain's sector ids. Writes grow the chain
//! through the SAT; reads never allocate.

use super::header::Header;
use super::sat::Sat;
use super::sector::{is_reg_sector, SecId, END_OF_CHAIN};
use crate::device::{BlockDevice, BlockDeviceExt};
use crate::{Error, Result};
use std::cell::{Cell, RefCell};

/// Zero buffer granularity for [`Chain::fill_zeros`].
const ZERO_CHUNK: usize = 4096;

/// A sector chain with its walk cache.
pub struct Chain {
    head: SecId,
    cache: RefCell<Vec<SecId>>,
    complete: Cell<bool>,
}

impl Chain {
    /// Wraps a chain head (`END_OF_CHAIN` for an empty stream).
    #[must_use]
    pub fn new(head: SecId) -> Self {
        debug_assert!(is_reg_sector(head) || head == END_OF_CHAIN);
        Self {
            head,
            cache: RefCell::new(Vec::new()),
            complete: Cell::new(head == END_OF_CHAIN),
        }
    }

    /// Head sector id, `END_OF_CHAIN` when the stream holds no sectors.
    #[must_use]
    pub fn head(&self) -> SecId {
        self.head
    }

    /// Walks the chain until it covers `limit` bytes (or fully, for
    /// `None`), returning the bytes covered so far.
    fn ensure<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        limit: Option<u64>,
    ) -> Result<u64> {
        let ss = header.sector_size();
        let mut cache = self.cache.borrow_mut();

        if cache.is_empty() && is_reg_sector(self.head) {
            cache.push(self.head);
        }

        while !self.complete.get() {
            if let Some(limit) = limit {
                if cache.len() as u64 * ss >= limit {
                    break;
                }
            }

            // non-empty here: head was pushed above and never popped
            #[allow(clippy::expect_used)]
            let last = *cache.last().expect("walked chain should have a tail");
            match sat.next(dev, header, last)? {
                Some(next) => cache.push(next),
                None => self.complete.set(true),
            }
        }

        Ok(cache.len() as u64 * ss)
    }

    /// Allocated byte length (sector-granular, not the user-visible size).
    pub fn size<D: BlockDevice>(&self, dev: &D, header: &Header, sat: &Sat) -> Result<u64> {
        self.ensure(dev, header, sat, None)
    }

    /// Number of sectors in the chain.
    pub fn sector_count<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
    ) -> Result<usize> {
        self.ensure(dev, header, sat, None)?;
        Ok(self.cache.borrow().len())
    }

    /// Allocates one sector after the current last, returning the logical
    /// base address of the fresh sector.
    pub fn append_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
    ) -> Result<u64> {
        self.ensure(dev, header, sat, None)?;

        let prev = self.cache.borrow().last().copied().unwrap_or(END_OF_CHAIN);
        let sec = sat.allocate_next(dev, header, prev)?;

        let mut cache = self.cache.borrow_mut();
        cache.push(sec);
        if self.head == END_OF_CHAIN {
            self.head = sec;
        }
        self.complete.set(true);

        Ok((cache.len() as u64 - 1) * header.sector_size())
    }

    /// Releases the last sector back to the SAT.
    pub fn delete_last_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
    ) -> Result<()> {
        self.ensure(dev, header, sat, None)?;

        let mut cache = self.cache.borrow_mut();
        let Some(last) = cache.pop() else {
            return Err(Error::OutOfRange);
        };

        let prev = cache.last().copied();
        sat.free(dev, header, prev, last)?;

        if cache.is_empty() {
            self.head = END_OF_CHAIN;
        }
        Ok(())
    }

    /// Releases every sector of the chain.
    pub fn delete_all<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
    ) -> Result<()> {
        self.ensure(dev, header, sat, None)?;

        let mut cache = self.cache.borrow_mut();
        for sec in cache.drain(..) {
            sat.free(dev, header, None, sec)?;
        }
        self.head = END_OF_CHAIN;
        self.complete.set(true);
        Ok(())
    }

    /// Reads within the allocated range; [`Error::OutOfRange`] past it.
    pub fn read<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sat: &Sat,
        at: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let end = at
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if self.ensure(dev, header, sat, Some(end))? < end {
            return Err(Error::OutOfRange);
        }

        let ss = header.sector_size();
        let cache = self.cache.borrow();
        let mut done = 0;

        while done < buf.len() {
            let a = at + done as u64;
            let sec = cache[(a / ss) as usize];
            let off = a % ss;
            let chunk = usize::min(buf.len() - done, (ss - off) as usize);
            dev.read_exact_at(
                header.sector_addr(sec) + off,
                &mut buf[done..done + chunk],
            )?;
            done += chunk;
        }
        Ok(done)
    }

    /// Writes, allocating sectors as needed to cover the range.
    pub fn write<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        at: u64,
        buf: &[u8],
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let end = at
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        while self.ensure(dev, header, sat, Some(end))? < end {
            self.append_sector(dev, header, sat)?;
        }

        let ss = header.sector_size();
        let mut done = 0;

        while done < buf.len() {
            let a = at + done as u64;
            let sec = self.cache.borrow()[(a / ss) as usize];
            let off = a % ss;
            let chunk = usize::min(buf.len() - done, (ss - off) as usize);
            dev.write_all_at(header.sector_addr(sec) + off, &buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(done)
    }

    /// Writes zeros over `from..to`, allocating as needed.
    pub fn fill_zeros<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat: &mut Sat,
        from: u64,
        to: u64,
    ) -> Result<()> {
        let zeros = [0u8; ZERO_CHUNK];
        let mut at = from;
        while at < to {
            let chunk = u64::min(ZERO_CHUNK as u64, to - at);
            self.write(dev, header, sat, at, &zeros[..chunk as usize])?;
            at += chunk;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::Chain;
    use crate::device::MemDevice;
    use crate::fs::header::Header;
    use crate::fs::sat::Sat;
    use crate::fs::sector::END_OF_CHAIN;
    use crate::Error;
    use test_log::test;

    fn fresh() -> (MemDevice, Header, Sat) {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        let sat = Sat::load(&dev, &header).unwrap();
        (dev, header, sat)
    }

    #[test]
    fn write_extends_and_reads_back() {
        let (mut dev, header, mut sat) = fresh();
        let mut chain = Chain::new(END_OF_CHAIN);

        let payload = (0..2000).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        assert_eq!(2000, chain.write(&mut dev, &header, &mut sat, 0, &payload).unwrap());

        // four 512-byte sectors cover 2000 bytes
        assert_eq!(4, chain.sector_count(&dev, &header, &sat).unwrap());
        assert_ne!(END_OF_CHAIN, chain.head());

        let mut back = vec![0; 2000];
        assert_eq!(2000, chain.read(&dev, &header, &sat, 0, &mut back).unwrap());
        assert_eq!(payload, back);
    }

    #[test]
    fn read_crossing_sector_boundary() {
        let (mut dev, header, mut sat) = fresh();
        let mut chain = Chain::new(END_OF_CHAIN);

        let payload = [0xAB; 64];
        chain
            .write(&mut dev, &header, &mut sat, 512 - 32, &payload)
            .unwrap();

        let mut back = [0; 64];
        assert_eq!(
            64,
            chain.read(&dev, &header, &sat, 512 - 32, &mut back).unwrap()
        );
        assert_eq!(payload, back);
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let (mut dev, header, mut sat) = fresh();
        let mut chain = Chain::new(END_OF_CHAIN);
        chain.write(&mut dev, &header, &mut sat, 0, &[1; 100]).unwrap();

        let mut buf = [0; 600];
        assert!(matches!(
            chain.read(&dev, &header, &sat, 0, &mut buf),
            Err(Error::OutOfRange)
        ));
    }

    #[test]
    fn chain_survives_reopen() {
        let (mut dev, header, mut sat) = fresh();
        let head = {
            let mut chain = Chain::new(END_OF_CHAIN);
            chain
                .write(&mut dev, &header, &mut sat, 0, &[7; 1500])
                .unwrap();
            chain.head()
        };

        let sat = Sat::load(&dev, &header).unwrap();
        let chain = Chain::new(head);
        let mut back = [0; 1500];
        chain.read(&dev, &header, &sat, 0, &mut back).unwrap();
        assert!(back.iter().all(|b| *b == 7));
    }

    #[test]
    fn delete_returns_sectors() {
        let (mut dev, header, mut sat) = fresh();
        let mut chain = Chain::new(END_OF_CHAIN);
        chain
            .write(&mut dev, &header, &mut sat, 0, &[1; 3 * 512])
            .unwrap();

        chain.delete_last_sector(&mut dev, &header, &mut sat).unwrap();
        assert_eq!(2, chain.sector_count(&dev, &header, &sat).unwrap());

        chain.delete_all(&mut dev, &header, &mut sat).unwrap();
        assert_eq!(END_OF_CHAIN, chain.head());
        assert_eq!(0, chain.sector_count(&dev, &header, &sat).unwrap());
    }

    #[test]
    fn fill_zeros_allocates() {
        let (mut dev, header, mut sat) = fresh();
        let mut chain = Chain::new(END_OF_CHAIN);

        chain.write(&mut dev, &header, &mut sat, 0, &[9; 512]).unwrap();
        chain.fill_zeros(&mut dev, &header, &mut sat, 256, 1024).unwrap();

        let mut back = vec![0xFF; 1024];
        chain.read(&dev, &header, &sat, 0, &mut back).unwrap();
        assert!(back[..256].iter().all(|b| *b == 9));
        assert!(back[256..].iter().all(|b| *b == 0));
    }
}
