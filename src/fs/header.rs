//! Compound-file header.
//!
//! The first 512 bytes of the device. Bit-exact little-endian layout:
//!
//! | offset | size  | field                                    |
//! |-------:|------:|------------------------------------------|
//! |      0 |     8 | signature `D0 CF 11 E0 A1 B1 1A E1`      |
//! |     24 |     2 | revision                                 |
//! |     26 |     2 | major version (3 or 4)                   |
//! |     28 |     2 | byte-order marker `FE FF`                |
//! |     30 |     2 | sector shift                             |
//! |     32 |     2 | short-sector shift                       |
//! |     44 |     4 | count of SAT sectors                     |
//! |     48 |     4 | head sector of the directory stream      |
//! |     56 |     4 | minimum standard stream size             |
//! |     60 |     4 | head sector of the SSAT stream           |
//! |     64 |     4 | count of SSAT sectors                    |
//! |     68 |     4 | head sector of the MSAT chain            |
//! |     72 |     4 | count of MSAT sectors                    |
//! |     76 | 109·4 | first 109 MSAT entries                   |

use super::sector::{END_OF_CHAIN, NOT_USED, SecId};
use crate::device::{Addr, BlockDevice, BlockDeviceExt};
use crate::{Error, Result};

/// Magic signature at offset 0.
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Byte length of the header.
pub const HEADER_SIZE: u64 = 512;

/// Number of MSAT entries stored inside the header.
pub const HEADER_MSAT_ENTRIES: u32 = 109;

/// Revision written on format.
const REVISION: u16 = 0x003E;

/// Largest accepted sector shift.
const MAX_SECTOR_SHIFT: u16 = 25;

/// Parsed header; geometry is cached, counters live on the device.
pub struct Header {
    version: u16,
    sector_size: u64,
    short_sector_size: u64,
}

impl Header {
    /// Validates and parses the header of an existing image.
    pub fn open<D: BlockDevice>(dev: &D) -> Result<Self> {
        if dev.max_size() < HEADER_SIZE {
            return Err(Error::BadFormat("device smaller than the header"));
        }

        let mut signature = [0u8; 8];
        dev.read_exact_at(0, &mut signature)?;
        if signature != SIGNATURE {
            return Err(Error::BadFormat("signature mismatch"));
        }

        let version = dev.get_u16(26)?;
        if version != 3 && version != 4 {
            return Err(Error::BadFormat("unsupported major version"));
        }

        if dev.get_u8(28)? != 0xFE || dev.get_u8(29)? != 0xFF {
            return Err(Error::BadFormat("byte-order marker is not little-endian"));
        }

        let shift = dev.get_u16(30)?;
        if shift > MAX_SECTOR_SHIFT {
            return Err(Error::SectorTooHuge(shift));
        }
        let short_shift = dev.get_u16(32)?;
        if short_shift > MAX_SECTOR_SHIFT {
            return Err(Error::SectorTooHuge(short_shift));
        }
        if short_shift >= shift {
            return Err(Error::BadFormat("short-sector shift not below sector shift"));
        }

        log::debug!(
            "opened header: version={version}, sector={}, short sector={}",
            1u64 << shift,
            1u64 << short_shift,
        );

        Ok(Self {
            version,
            sector_size: 1 << shift,
            short_sector_size: 1 << short_shift,
        })
    }

    /// Writes a blank header, then parses it back.
    pub fn format<D: BlockDevice>(
        dev: &mut D,
        version: u16,
        sector_shift: u16,
        short_sector_shift: u16,
    ) -> Result<Self> {
        if dev.max_size() < HEADER_SIZE {
            return Err(Error::BadFormat("device smaller than the header"));
        }
        if version != 3 && version != 4 {
            return Err(Error::BadFormat("unsupported major version"));
        }
        if sector_shift > MAX_SECTOR_SHIFT || short_sector_shift > MAX_SECTOR_SHIFT {
            return Err(Error::SectorTooHuge(sector_shift.max(short_sector_shift)));
        }
        if short_sector_shift >= sector_shift {
            return Err(Error::BadFormat("short-sector shift not below sector shift"));
        }

        dev.write_all_at(0, &[0u8; HEADER_SIZE as usize])?;
        dev.write_all_at(0, &SIGNATURE)?;
        dev.set_u16(24, REVISION)?;
        dev.set_u16(26, version)?;
        dev.set_u8(28, 0xFE)?;
        dev.set_u8(29, 0xFF)?;
        dev.set_u16(30, sector_shift)?;
        dev.set_u16(32, short_sector_shift)?;

        // default threshold below which streams live in the mini-stream
        dev.set_u32(56, 4096)?;

        dev.set_u32(48, END_OF_CHAIN)?;
        dev.set_u32(60, END_OF_CHAIN)?;
        dev.set_u32(68, END_OF_CHAIN)?;

        for i in 0..HEADER_MSAT_ENTRIES {
            dev.set_u32(76 + u64::from(i) * 4, NOT_USED)?;
        }

        log::debug!(
            "formatted image: version={version}, sector shift={sector_shift}, \
             short-sector shift={short_sector_shift}"
        );

        Self::open(dev)
    }

    /// Major version (3 or 4).
    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Sector size in bytes.
    #[must_use]
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Short-sector size in bytes.
    #[must_use]
    pub fn short_sector_size(&self) -> u64 {
        self.short_sector_size
    }

    /// Physical address of the first byte of `sector`.
    #[must_use]
    pub fn sector_addr(&self, sector: SecId) -> Addr {
        HEADER_SIZE + u64::from(sector) * self.sector_size
    }

    /// Count of SAT sectors.
    pub fn sat_sector_count<D: BlockDevice>(&self, dev: &D) -> Result<u32> {
        dev.get_u32(44)
    }

    /// Updates the count of SAT sectors.
    pub fn set_sat_sector_count<D: BlockDevice>(&self, dev: &mut D, count: u32) -> Result<()> {
        dev.set_u32(44, count)
    }

    /// Head sector of the directory stream.
    pub fn dir_head<D: BlockDevice>(&self, dev: &D) -> Result<SecId> {
        dev.get_u32(48)
    }

    /// Updates the directory stream head.
    pub fn set_dir_head<D: BlockDevice>(&self, dev: &mut D, head: SecId) -> Result<()> {
        dev.set_u32(48, head)
    }

    /// Minimum byte size at which a stream gets regular sectors.
    pub fn min_standard_stream_size<D: BlockDevice>(&self, dev: &D) -> Result<u32> {
        dev.get_u32(56)
    }

    /// Updates the standard-stream threshold.
    pub fn set_min_standard_stream_size<D: BlockDevice>(
        &self,
        dev: &mut D,
        size: u32,
    ) -> Result<()> {
        dev.set_u32(56, size)
    }

    /// Head sector of the SSAT stream.
    pub fn ssat_head<D: BlockDevice>(&self, dev: &D) -> Result<SecId> {
        dev.get_u32(60)
    }

    /// Updates the SSAT stream head.
    pub fn set_ssat_head<D: BlockDevice>(&self, dev: &mut D, head: SecId) -> Result<()> {
        dev.set_u32(60, head)
    }

    /// Count of SSAT sectors.
    pub fn ssat_sector_count<D: BlockDevice>(&self, dev: &D) -> Result<u32> {
        dev.get_u32(64)
    }

    /// Updates the count of SSAT sectors.
    pub fn set_ssat_sector_count<D: BlockDevice>(&self, dev: &mut D, count: u32) -> Result<()> {
        dev.set_u32(64, count)
    }

    /// Head sector of the MSAT chain, or `END_OF_CHAIN`.
    pub fn msat_head<D: BlockDevice>(&self, dev: &D) -> Result<SecId> {
        dev.get_u32(68)
    }

    /// Updates the MSAT chain head.
    pub fn set_msat_head<D: BlockDevice>(&self, dev: &mut D, head: SecId) -> Result<()> {
        dev.set_u32(68, head)
    }

    /// Count of chained MSAT sectors.
    pub fn msat_sector_count<D: BlockDevice>(&self, dev: &D) -> Result<u32> {
        dev.get_u32(72)
    }

    /// Updates the count of chained MSAT sectors.
    pub fn set_msat_sector_count<D: BlockDevice>(&self, dev: &mut D, count: u32) -> Result<()> {
        dev.set_u32(72, count)
    }

    /// One of the 109 in-header MSAT entries.
    pub fn header_msat<D: BlockDevice>(&self, dev: &D, index: u32) -> Result<SecId> {
        debug_assert!(index < HEADER_MSAT_ENTRIES);
        dev.get_u32(76 + u64::from(index) * 4)
    }

    /// Updates one of the 109 in-header MSAT entries.
    pub fn set_header_msat<D: BlockDevice>(
        &self,
        dev: &mut D,
        index: u32,
        value: SecId,
    ) -> Result<()> {
        debug_assert!(index < HEADER_MSAT_ENTRIES);
        dev.set_u32(76 + u64::from(index) * 4, value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{Header, HEADER_SIZE, SIGNATURE};
    use crate::device::{BlockDeviceExt, MemDevice};
    use crate::Error;
    use test_log::test;

    #[test]
    fn format_then_open() {
        let mut dev = MemDevice::new(1 << 20);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        assert_eq!(512, header.sector_size());
        assert_eq!(64, header.short_sector_size());
        assert_eq!(3, header.version());

        let reopened = Header::open(&dev).unwrap();
        assert_eq!(512, reopened.sector_size());
        assert_eq!(64, reopened.short_sector_size());

        assert_eq!(SIGNATURE, dev.as_bytes()[0..8]);
        assert_eq!(0x3E, dev.get_u16(24).unwrap());
        assert_eq!([0xFE, 0xFF], dev.as_bytes()[28..30]);
    }

    #[test]
    fn open_rejects_garbage() {
        let dev = MemDevice::new(1 << 16);
        assert!(matches!(Header::open(&dev), Err(Error::BadFormat(_))));
    }

    #[test]
    fn format_validates_shifts() {
        let mut dev = MemDevice::new(1 << 16);
        assert!(matches!(
            Header::format(&mut dev, 3, 26, 6),
            Err(Error::SectorTooHuge(26))
        ));
        assert!(matches!(
            Header::format(&mut dev, 3, 9, 9),
            Err(Error::BadFormat(_))
        ));
        assert!(matches!(
            Header::format(&mut dev, 5, 9, 6),
            Err(Error::BadFormat(_))
        ));
    }

    #[test]
    fn sector_addressing() {
        let mut dev = MemDevice::new(1 << 16);
        let header = Header::format(&mut dev, 3, 9, 6).unwrap();
        assert_eq!(HEADER_SIZE, header.sector_addr(0));
        assert_eq!(HEADER_SIZE + 512 * 3, header.sector_addr(3));
    }
}
