//! Windowed and strided device adapters.

use super::{Addr, BlockDevice};
use crate::{Error, Result};

/// Fixed offset+length window into another device.
///
/// Logical addresses run `0..len` and map to `offset..offset + len` on the
/// underlying device; anything outside is [`Error::OutOfRange`].
pub struct BlockView<'a, D: BlockDevice> {
    device: &'a mut D,
    offset: Addr,
    len: u64,
}

impl<'a, D: BlockDevice> BlockView<'a, D> {
    /// Creates a window; fails when it does not fit the device.
    pub fn new(device: &'a mut D, offset: Addr, len: u64) -> Result<Self> {
        let end = offset.checked_add(len).ok_or(Error::OutOfRange)?;
        if end > device.max_size() {
            return Err(Error::OutOfRange);
        }
        Ok(Self {
            device,
            offset,
            len,
        })
    }
}

impl<D: BlockDevice> BlockDevice for BlockView<'_, D> {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if end > self.len {
            return Err(Error::OutOfRange);
        }
        self.device.read(self.offset + addr, buf)
    }

    fn write(&mut self, addr: Addr, buf: &[u8]) -> Result<usize> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if end > self.len {
            return Err(Error::OutOfRange);
        }
        self.device.write(self.offset + addr, buf)
    }

    fn max_size(&self) -> u64 {
        self.len
    }

    fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }
}

/// Interleaved-slot view: `slot_size` bytes out of every `stride` bytes.
///
/// Logical address `a` maps to `base + (a / slot) * stride + a % slot`.
/// The capacity is the number of logical bytes that fit inside the
/// underlying device.
pub struct StrideView<'a, D: BlockDevice> {
    device: &'a mut D,
    base: Addr,
    slot_size: u64,
    stride: u64,
}

impl<'a, D: BlockDevice> StrideView<'a, D> {
    /// Creates a stride view; `slot_size` must not exceed `stride`.
    pub fn new(device: &'a mut D, base: Addr, slot_size: u64, stride: u64) -> Result<Self> {
        if slot_size == 0 || stride == 0 || slot_size > stride {
            return Err(Error::InvalidArgument("slot size must fit the stride"));
        }
        if base > device.max_size() {
            return Err(Error::OutOfRange);
        }
        Ok(Self {
            device,
            base,
            slot_size,
            stride,
        })
    }

    fn physical(&self, addr: Addr) -> Addr {
        self.base + (addr / self.slot_size) * self.stride + addr % self.slot_size
    }
}

impl<D: BlockDevice> BlockDevice for StrideView<'_, D> {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if end > self.max_size() {
            return Err(Error::OutOfRange);
        }

        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u64;
            let within = (at % self.slot_size) as usize;
            let chunk = usize::min(buf.len() - done, self.slot_size as usize - within);
            self.device
                .read(self.physical(at), &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(done)
    }

    fn write(&mut self, addr: Addr, buf: &[u8]) -> Result<usize> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(Error::OutOfRange)?;
        if end > self.max_size() {
            return Err(Error::OutOfRange);
        }

        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u64;
            let within = (at % self.slot_size) as usize;
            let chunk = usize::min(buf.len() - done, self.slot_size as usize - within);
            let physical = self.physical(at);
            self.device.write(physical, &buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(done)
    }

    fn max_size(&self) -> u64 {
        let space = self.device.max_size().saturating_sub(self.base);
        let full = space / self.stride;
        let rem = space % self.stride;
        full * self.slot_size + u64::min(rem, self.slot_size)
    }

    fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{BlockView, StrideView};
    use crate::device::{BlockDevice, BlockDeviceExt, MemDevice};
    use crate::Error;
    use test_log::test;

    #[test]
    fn block_view_window() {
        let mut dev = MemDevice::new(128);
        {
            let mut view = BlockView::new(&mut dev, 32, 16).unwrap();
            assert_eq!(16, view.max_size());
            view.set_u32(0, 7).unwrap();
            assert!(matches!(view.set_u32(14, 7), Err(Error::OutOfRange)));
        }
        assert_eq!(7, dev.get_u32(32).unwrap());
    }

    #[test]
    fn block_view_must_fit() {
        let mut dev = MemDevice::new(16);
        assert!(BlockView::new(&mut dev, 8, 9).is_err());
        assert!(BlockView::new(&mut dev, 8, 8).is_ok());
    }

    #[test]
    fn stride_view_mapping() {
        let mut dev = MemDevice::new(64);
        {
            let mut view = StrideView::new(&mut dev, 0, 4, 8).unwrap();
            // 64 bytes / stride 8 -> 8 slots of 4 logical bytes
            assert_eq!(32, view.max_size());

            let payload = [1u8, 2, 3, 4, 5, 6];
            assert_eq!(6, view.write(2, &payload).unwrap());

            let mut back = [0u8; 6];
            assert_eq!(6, view.read(2, &mut back).unwrap());
            assert_eq!(payload, back);
        }

        // logical 2..4 land in the first slot, 4..8 in the second stride
        assert_eq!([0, 0, 1, 2], dev.as_bytes()[0..4]);
        assert_eq!([3, 4, 5, 6], dev.as_bytes()[8..12]);
    }

    #[test]
    fn stride_view_rejects_bad_geometry() {
        let mut dev = MemDevice::new(64);
        assert!(StrideView::new(&mut dev, 0, 9, 8).is_err());
        assert!(StrideView::new(&mut dev, 0, 0, 8).is_err());
    }
}
