//! Master sector allocation table.
//!
//! The ordered list of sector ids whose sectors hold SAT entries. The first
//! 109 entries live in the header; the rest sit in chained MSAT sectors,
//! each holding `sector_size / 4 - 1` entries followed by the id of the
//! next MSAT sector (or `END_OF_CHAIN`).

use super::header::{Header, HEADER_MSAT_ENTRIES};
use super::sector::{is_reg_sector, SecId, END_OF_CHAIN, NOT_USED};
use crate::device::{BlockDevice, BlockDeviceExt};
use crate::{Error, Result};

/// In-memory mirror of the MSAT.
pub struct Msat {
    entries: Vec<SecId>,
    used: usize,
    last_sector: Option<SecId>,
}

impl Msat {
    /// MSAT entries per chained MSAT sector.
    fn entries_per_sector(header: &Header) -> u32 {
        (header.sector_size() / 4 - 1) as u32
    }

    /// Loads the header entries plus every chained MSAT sector.
    pub fn load<D: BlockDevice>(dev: &D, header: &Header) -> Result<Self> {
        let mut entries = Vec::with_capacity(HEADER_MSAT_ENTRIES as usize);
        for i in 0..HEADER_MSAT_ENTRIES {
            entries.push(header.header_msat(dev, i)?);
        }

        let chained = header.msat_sector_count(dev)?;
        let mut last_sector = None;

        if chained > 0 {
            let epb = Self::entries_per_sector(header);
            let mut sec = header.msat_head(dev)?;
            let mut walked = 0u32;

            while sec != END_OF_CHAIN {
                if !is_reg_sector(sec) || walked >= chained {
                    return Err(Error::FileCorrupt);
                }
                last_sector = Some(sec);
                walked += 1;

                let base = header.sector_addr(sec);
                for i in 0..epb {
                    entries.push(dev.get_u32(base + u64::from(i) * 4)?);
                }
                sec = dev.get_u32(base + u64::from(epb) * 4)?;
            }

            if walked != chained {
                return Err(Error::FileCorrupt);
            }
        }

        let mut used = 0;
        for (i, entry) in entries.iter().enumerate() {
            if *entry != NOT_USED {
                used = i + 1;
            }
        }

        Ok(Self {
            entries,
            used,
            last_sector,
        })
    }

    /// Number of recorded SAT sectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns `true` if no SAT sector is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Returns `true` if an unused slot remains.
    #[must_use]
    pub fn has_free_entry(&self) -> bool {
        self.used < self.entries.len()
    }

    /// The `idx`-th SAT sector id.
    #[must_use]
    pub fn get(&self, idx: usize) -> SecId {
        debug_assert!(idx < self.used);
        self.entries[idx]
    }

    /// Records `sat_sector` in the first unused slot, returning the slot
    /// index, or `None` when every slot is taken.
    pub fn mark_sat_sector<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sat_sector: SecId,
    ) -> Result<Option<usize>> {
        if !self.has_free_entry() {
            return Ok(None);
        }

        let index = self.used;
        self.entries[index] = sat_sector;
        self.used += 1;

        if index < HEADER_MSAT_ENTRIES as usize {
            header.set_header_msat(dev, index as u32, sat_sector)?;
        } else {
            let epb = Self::entries_per_sector(header) as usize;
            let mut rest = index - HEADER_MSAT_ENTRIES as usize;
            let mut sec = header.msat_head(dev)?;
            if !is_reg_sector(sec) {
                return Err(Error::FileCorrupt);
            }

            while rest >= epb {
                let base = header.sector_addr(sec);
                sec = dev.get_u32(base + (epb as u64) * 4)?;
                rest -= epb;
                if !is_reg_sector(sec) {
                    return Err(Error::FileCorrupt);
                }
            }

            dev.set_u32(header.sector_addr(sec) + (rest as u64) * 4, sat_sector)?;
        }

        log::trace!("msat[{index}] = sector {sat_sector}");
        Ok(Some(index))
    }

    /// Appends an empty MSAT sector at `sector` and links it to the chain.
    pub fn expand<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        header: &Header,
        sector: SecId,
    ) -> Result<()> {
        let epb = Self::entries_per_sector(header);
        let base = header.sector_addr(sector);

        match self.last_sector {
            Some(last) => {
                dev.set_u32(header.sector_addr(last) + u64::from(epb) * 4, sector)?;
            }
            None => {
                header.set_msat_head(dev, sector)?;
            }
        }

        for i in 0..epb {
            dev.set_u32(base + u64::from(i) * 4, NOT_USED)?;
        }
        dev.set_u32(base + u64::from(epb) * 4, END_OF_CHAIN)?;

        self.last_sector = Some(sector);
        self.entries
            .extend(std::iter::repeat(NOT_USED).take(epb as usize));

        let count = header.msat_sector_count(dev)?;
        header.set_msat_sector_count(dev, count + 1)?;

        log::debug!("msat chain extended with sector {sector}");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::Msat;
    use crate::device::MemDevice;
    use crate::fs::header::Header;
    use test_log::test;

    #[test]
    fn msat_starts_empty_after_format() {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();

        let msat = Msat::load(&dev, &header).unwrap();
        assert!(msat.is_empty());
        assert!(msat.has_free_entry());
    }

    #[test]
    fn msat_records_and_reloads() {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();

        let mut msat = Msat::load(&dev, &header).unwrap();
        assert_eq!(Some(0), msat.mark_sat_sector(&mut dev, &header, 7).unwrap());
        assert_eq!(Some(1), msat.mark_sat_sector(&mut dev, &header, 9).unwrap());

        let reloaded = Msat::load(&dev, &header).unwrap();
        assert_eq!(2, reloaded.len());
        assert_eq!(7, reloaded.get(0));
        assert_eq!(9, reloaded.get(1));
    }

    #[test]
    fn msat_expand_adds_capacity() {
        let mut dev = MemDevice::new(1 << 22);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();

        let mut msat = Msat::load(&dev, &header).unwrap();
        for i in 0..109 {
            assert!(msat.mark_sat_sector(&mut dev, &header, i).unwrap().is_some());
        }
        assert!(!msat.has_free_entry());
        assert_eq!(None, msat.mark_sat_sector(&mut dev, &header, 999).unwrap());

        msat.expand(&mut dev, &header, 200).unwrap();
        assert!(msat.has_free_entry());
        assert_eq!(
            Some(109),
            msat.mark_sat_sector(&mut dev, &header, 201).unwrap()
        );

        let reloaded = Msat::load(&dev, &header).unwrap();
        assert_eq!(110, reloaded.len());
        assert_eq!(201, reloaded.get(109));
    }
}
