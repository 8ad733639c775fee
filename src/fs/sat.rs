//! Sector allocation table.
//!
//! One 32-bit entry per sector: the id of the next sector in the same
//! chain, or a reserved value. The table itself lives in sectors listed by
//! the [`Msat`]; a one-page LRU cache plus per-page free counts keep
//! allocation from re-reading the table on every call.

use super::header::Header;
use super::msat::Msat;
use super::sector::{
    is_reg_sector, SecId, END_OF_CHAIN, MAX_REG_SECTOR, MSAT_USED, NOT_USED, SAT_USED,
};
use crate::device::{BlockDevice, BlockDeviceExt};
use crate::{Error, Result};
use std::cell::RefCell;

struct LruPage {
    /// First sector id the cached page covers.
    base: SecId,
    entries: Vec<SecId>,
}

/// Sector allocation table with its master table and caches.
pub struct Sat {
    msat: Msat,
    lru: RefCell<Option<LruPage>>,
    free_counts: Vec<usize>,
}

impl Sat {
    /// SAT entries per SAT sector.
    fn entries_per_sector(header: &Header) -> u32 {
        (header.sector_size() / 4) as u32
    }

    /// Loads the MSAT and scans every SAT sector for free entries.
    pub fn load<D: BlockDevice>(dev: &D, header: &Header) -> Result<Self> {
        let msat = Msat::load(dev, header)?;
        let epb = Self::entries_per_sector(header);

        let mut free_counts = vec![0; msat.len()];
        let mut lru: Option<LruPage> = None;
        let mut best_free = 0;

        for (idx, count) in free_counts.iter_mut().enumerate() {
            let (page, nfree) = Self::read_page(dev, header, &msat, idx)?;
            *count = nfree;
            if nfree > best_free {
                best_free = nfree;
                lru = Some(LruPage {
                    base: idx as u32 * epb,
                    entries: page,
                });
            }
        }

        Ok(Self {
            msat,
            lru: RefCell::new(lru),
            free_counts,
        })
    }

    /// Number of addressable entries (sectors) the table currently covers.
    #[must_use]
    pub fn capacity(&self, header: &Header) -> u64 {
        self.free_counts.len() as u64 * u64::from(Self::entries_per_sector(header))
    }

    /// Reads the `idx`-th SAT sector into a vector, counting free slots.
    fn read_page<D: BlockDevice>(
        dev: &D,
        header: &Header,
        msat: &Msat,
        idx: usize,
    ) -> Result<(Vec<SecId>, usize)> {
        let sec = msat.get(idx);
        if !is_reg_sector(sec) {
            return Err(Error::FileCorrupt);
        }

        let epb = Self::entries_per_sector(header);
        let base = header.sector_addr(sec);

        let mut page = Vec::with_capacity(epb as usize);
        let mut nfree = 0;
        for i in 0..epb {
            let entry = dev.get_u32(base + u64::from(i) * 4)?;
            if entry == NOT_USED {
                nfree += 1;
            }
            page.push(entry);
        }
        Ok((page, nfree))
    }

    /// The raw SAT entry for `sec`.
    fn entry<D: BlockDevice>(&self, dev: &D, header: &Header, sec: SecId) -> Result<SecId> {
        let epb = Self::entries_per_sector(header);
        let tbl_idx = (sec / epb) as usize;
        if tbl_idx >= self.msat.len() {
            return Err(Error::FileCorrupt);
        }

        if let Some(lru) = &*self.lru.borrow() {
            if lru.base == (tbl_idx as u32) * epb {
                return Ok(lru.entries[(sec % epb) as usize]);
            }
        }

        let tbl_sec = self.msat.get(tbl_idx);
        dev.get_u32(header.sector_addr(tbl_sec) + u64::from(sec % epb) * 4)
    }

    /// Writes the SAT entry for `sec`, keeping the LRU page coherent.
    fn set_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sec: SecId,
        value: SecId,
    ) -> Result<()> {
        let epb = Self::entries_per_sector(header);
        let tbl_idx = (sec / epb) as usize;
        if tbl_idx >= self.msat.len() {
            return Err(Error::FileCorrupt);
        }

        if let Some(lru) = &mut *self.lru.borrow_mut() {
            if lru.base == (tbl_idx as u32) * epb {
                lru.entries[(sec % epb) as usize] = value;
            }
        }

        let tbl_sec = self.msat.get(tbl_idx);
        dev.set_u32(header.sector_addr(tbl_sec) + u64::from(sec % epb) * 4, value)
    }

    /// Next sector of the chain containing `sec`, or `None` at its end.
    pub fn next<D: BlockDevice>(
        &self,
        dev: &D,
        header: &Header,
        sec: SecId,
    ) -> Result<Option<SecId>> {
        let entry = self.entry(dev, header, sec)?;
        if is_reg_sector(entry) {
            return Ok(Some(entry));
        }
        if entry == END_OF_CHAIN {
            return Ok(None);
        }
        Err(Error::FileCorrupt)
    }

    /// Fails when `sec` would not fit the device (or the id space).
    fn check_limit<D: BlockDevice>(dev: &D, header: &Header, sec: SecId) -> Result<()> {
        if sec >= MAX_REG_SECTOR {
            return Err(Error::OutOfSpace);
        }
        if header.sector_addr(sec) + header.sector_size() > dev.max_size() {
            return Err(Error::OutOfSpace);
        }
        Ok(())
    }

    /// Allocates a fresh sector and chains it after `prev`
    /// (`END_OF_CHAIN` to start a new chain).
    pub fn allocate_next<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        prev: SecId,
    ) -> Result<SecId> {
        let sec = self.allocate(dev, header)?;
        if prev != END_OF_CHAIN {
            debug_assert!(is_reg_sector(prev));
            self.set_entry(dev, header, prev, sec)?;
        }
        Ok(sec)
    }

    /// Splices `sec` out of its chain and marks it free.
    ///
    /// `prev` is the sector pointing at `sec`, or `None` when `sec` is a
    /// chain head (or the chain bookkeeping was already dropped).
    pub fn free<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        prev: Option<SecId>,
        sec: SecId,
    ) -> Result<()> {
        debug_assert!(is_reg_sector(sec));

        if let Some(p) = prev {
            let next = self.entry(dev, header, sec)?;
            debug_assert_eq!(self.entry(dev, header, p)?, sec);
            self.set_entry(dev, header, p, next)?;
        }

        self.set_entry(dev, header, sec, NOT_USED)?;

        let epb = Self::entries_per_sector(header);
        let idx = (sec / epb) as usize;
        self.free_counts[idx] += 1;

        log::trace!("freed sector {sec}");
        Ok(())
    }

    /// Picks a free sector, marking it `END_OF_CHAIN`.
    fn allocate<D: BlockDevice>(&mut self, dev: &mut D, header: &Header) -> Result<SecId> {
        let epb = Self::entries_per_sector(header);

        // fast path: a free slot in the cached page
        let cached = self.lru.borrow().as_ref().and_then(|lru| {
            lru.entries
                .iter()
                .position(|e| *e == NOT_USED)
                .map(|i| lru.base + i as u32)
        });
        if let Some(sec) = cached {
            Self::check_limit(dev, header, sec)?;
            self.set_entry(dev, header, sec, END_OF_CHAIN)?;
            let idx = (sec / epb) as usize;
            self.free_counts[idx] -= 1;
            if self.free_counts[idx] == 0 {
                *self.lru.borrow_mut() = None;
            }
            log::trace!("allocated sector {sec}");
            return Ok(sec);
        }

        // otherwise page in the highest SAT sector that still has room
        for idx in (0..self.free_counts.len()).rev() {
            if self.free_counts[idx] == 0 {
                continue;
            }

            let (page, nfree) = Self::read_page(dev, header, &self.msat, idx)?;
            debug_assert_eq!(self.free_counts[idx], nfree);

            #[allow(clippy::expect_used)]
            let slot = page
                .iter()
                .position(|e| *e == NOT_USED)
                .expect("page with positive free count should have a free slot");

            let base = idx as u32 * epb;
            *self.lru.borrow_mut() = Some(LruPage { base, entries: page });

            let sec = base + slot as u32;
            Self::check_limit(dev, header, sec)?;
            self.set_entry(dev, header, sec, END_OF_CHAIN)?;
            self.free_counts[idx] -= 1;
            if self.free_counts[idx] == 0 {
                *self.lru.borrow_mut() = None;
            }
            log::trace!("allocated sector {sec}");
            return Ok(sec);
        }

        // the table is full: grow it by one SAT sector, going through an
        // MSAT expansion first when the master table is full as well
        if self.msat.has_free_entry() {
            let sat_sec = self.free_counts.len() as u32 * epb;
            Self::check_limit(dev, header, sat_sec)?;

            let marked = self.msat.mark_sat_sector(dev, header, sat_sec)?;
            debug_assert!(marked.is_some());

            self.init_sat_sector(dev, header, sat_sec)?;
            self.set_entry(dev, header, sat_sec, SAT_USED)?;
            self.free_counts.push(epb as usize - 1);
        } else {
            let msat_sec = self.free_counts.len() as u32 * epb;
            let sat_sec = msat_sec + 1;
            Self::check_limit(dev, header, sat_sec)?;

            self.msat.expand(dev, header, msat_sec)?;
            let marked = self.msat.mark_sat_sector(dev, header, sat_sec)?;
            debug_assert!(marked.is_some());

            self.init_sat_sector(dev, header, sat_sec)?;
            self.set_entry(dev, header, msat_sec, MSAT_USED)?;
            self.set_entry(dev, header, sat_sec, SAT_USED)?;
            self.free_counts.push(epb as usize - 2);
        }
        header.set_sat_sector_count(dev, self.free_counts.len() as u32)?;

        let retry = self.lru.borrow().as_ref().and_then(|lru| {
            lru.entries
                .iter()
                .position(|e| *e == NOT_USED)
                .map(|i| lru.base + i as u32)
        });
        let Some(sec) = retry else {
            return Err(Error::OutOfSpace);
        };

        Self::check_limit(dev, header, sec)?;
        self.set_entry(dev, header, sec, END_OF_CHAIN)?;
        let idx = (sec / epb) as usize;
        self.free_counts[idx] -= 1;

        log::trace!("allocated sector {sec} in a fresh SAT page");
        Ok(sec)
    }

    /// Writes a fresh SAT sector full of `NOT_USED` and caches it.
    fn init_sat_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat_sec: SecId,
    ) -> Result<()> {
        let epb = Self::entries_per_sector(header);
        let base = header.sector_addr(sat_sec);
        for i in 0..epb {
            dev.set_u32(base + u64::from(i) * 4, NOT_USED)?;
        }

        *self.lru.borrow_mut() = Some(LruPage {
            base: sat_sec,
            entries: vec![NOT_USED; epb as usize],
        });

        log::debug!("created SAT sector {sat_sec}");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::Sat;
    use crate::device::MemDevice;
    use crate::fs::header::Header;
    use crate::fs::sector::END_OF_CHAIN;
    use crate::Error;
    use test_log::test;

    fn fresh() -> (MemDevice, Header) {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        (dev, header)
    }

    #[test]
    fn allocate_builds_chains() {
        let (mut dev, header) = fresh();
        let mut sat = Sat::load(&dev, &header).unwrap();

        let head = sat.allocate_next(&mut dev, &header, END_OF_CHAIN).unwrap();
        let second = sat.allocate_next(&mut dev, &header, head).unwrap();
        let third = sat.allocate_next(&mut dev, &header, second).unwrap();

        assert_eq!(Some(second), sat.next(&dev, &header, head).unwrap());
        assert_eq!(Some(third), sat.next(&dev, &header, second).unwrap());
        assert_eq!(None, sat.next(&dev, &header, third).unwrap());
    }

    #[test]
    fn free_splices_chains() {
        let (mut dev, header) = fresh();
        let mut sat = Sat::load(&dev, &header).unwrap();

        let a = sat.allocate_next(&mut dev, &header, END_OF_CHAIN).unwrap();
        let b = sat.allocate_next(&mut dev, &header, a).unwrap();
        let c = sat.allocate_next(&mut dev, &header, b).unwrap();

        sat.free(&mut dev, &header, Some(a), b).unwrap();
        assert_eq!(Some(c), sat.next(&dev, &header, a).unwrap());

        // the freed sector is reused before any fresh one
        let d = sat.allocate_next(&mut dev, &header, END_OF_CHAIN).unwrap();
        assert_eq!(b, d);
    }

    #[test]
    fn allocation_survives_reload() {
        let (mut dev, header) = fresh();
        let (a, b) = {
            let mut sat = Sat::load(&dev, &header).unwrap();
            let a = sat.allocate_next(&mut dev, &header, END_OF_CHAIN).unwrap();
            let b = sat.allocate_next(&mut dev, &header, a).unwrap();
            (a, b)
        };

        let sat = Sat::load(&dev, &header).unwrap();
        assert_eq!(Some(b), sat.next(&dev, &header, a).unwrap());
        assert_eq!(None, sat.next(&dev, &header, b).unwrap());
    }

    #[test]
    fn exhausting_the_device_reports_out_of_space() {
        let mut dev = MemDevice::new(8 * 1024);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        let mut sat = Sat::load(&dev, &header).unwrap();

        let mut prev = END_OF_CHAIN;
        let err = loop {
            match sat.allocate_next(&mut dev, &header, prev) {
                Ok(sec) => prev = sec,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::OutOfSpace));
    }
}
