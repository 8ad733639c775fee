//! Caching layer over a block device.
//!
//! Write-through, sector-granular: reads are served from cached blocks,
//! writes go straight down and patch (or evict) the affected blocks. Sits
//! between the allocation layers and a slow device; the memory device does
//! not need it.

use super::{Addr, BlockDevice};
use crate::Result;
use quick_cache::{sync::Cache as QuickCache, Weighter};
use std::sync::Arc;

#[derive(Clone)]
struct BlockWeighter;

impl Weighter<u64, Arc<Vec<u8>>> for BlockWeighter {
    fn weight(&self, _: &u64, block: &Arc<Vec<u8>>) -> u64 {
        block.len() as u64
    }
}

type BlockCache = QuickCache<u64, Arc<Vec<u8>>, BlockWeighter, rustc_hash::FxBuildHasher>;

/// Cached wrapper around any [`BlockDevice`].
pub struct CachedDevice<D: BlockDevice> {
    inner: D,
    block_size: usize,
    cache: BlockCache,
}

impl<D: BlockDevice> CachedDevice<D> {
    /// Wraps `inner`, caching blocks of `block_size` bytes with roughly
    /// `capacity_bytes` of cache.
    #[must_use]
    pub fn new(inner: D, block_size: usize, capacity_bytes: u64) -> Self {
        // NOTE: nothing we can do if the options are rejected
        #[allow(clippy::expect_used)]
        let opts = quick_cache::OptionsBuilder::new()
            .weight_capacity(capacity_bytes)
            .estimated_items_capacity((capacity_bytes as usize / block_size).max(16))
            .build()
            .expect("cache options should be valid");

        #[allow(clippy::default_trait_access)]
        let cache = QuickCache::with_options(
            opts,
            BlockWeighter,
            Default::default(),
            quick_cache::sync::DefaultLifecycle::default(),
        );

        Self {
            inner,
            block_size,
            cache,
        }
    }

    /// Consumes the wrapper, returning the inner device.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    fn load_block(&self, block_id: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(block) = self.cache.get(&block_id) {
            return Ok(block);
        }

        let base = block_id * self.block_size as u64;
        let len = usize::min(
            self.block_size,
            (self.inner.max_size().saturating_sub(base)) as usize,
        );

        let mut buf = vec![0; len];
        self.inner.read(base, &mut buf)?;
        let block = Arc::new(buf);
        self.cache.insert(block_id, Arc::clone(&block));
        Ok(block)
    }
}

impl<D: BlockDevice> BlockDevice for CachedDevice<D> {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<usize> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(crate::Error::OutOfRange)?;
        if end > self.inner.max_size() {
            return Err(crate::Error::OutOfRange);
        }

        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u64;
            let block_id = at / self.block_size as u64;
            let within = (at % self.block_size as u64) as usize;
            let block = self.load_block(block_id)?;
            let chunk = usize::min(buf.len() - done, block.len() - within);
            buf[done..done + chunk].copy_from_slice(&block[within..within + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    fn write(&mut self, addr: Addr, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(addr, buf)?;

        // patch the cached copies so later reads stay coherent
        let mut done = 0;
        while done < n {
            let at = addr + done as u64;
            let block_id = at / self.block_size as u64;
            let within = (at % self.block_size as u64) as usize;
            let chunk = usize::min(n - done, self.block_size - within);

            if let Some(block) = self.cache.get(&block_id) {
                let mut patched = (*block).clone();
                patched[within..within + chunk].copy_from_slice(&buf[done..done + chunk]);
                self.cache.insert(block_id, Arc::new(patched));
            }
            done += chunk;
        }
        Ok(n)
    }

    fn max_size(&self) -> u64 {
        self.inner.max_size()
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::CachedDevice;
    use crate::device::{BlockDevice, BlockDeviceExt, MemDevice};
    use test_log::test;

    #[test]
    fn cached_device_serves_and_patches() {
        let mut dev = CachedDevice::new(MemDevice::new(4096), 512, 64 * 1024);

        dev.set_u32(100, 42).unwrap();
        assert_eq!(42, dev.get_u32(100).unwrap());
        assert!(dev.cached_blocks() > 0);

        // overwrite through the cache and read back
        dev.set_u32(100, 43).unwrap();
        assert_eq!(43, dev.get_u32(100).unwrap());

        let inner = dev.into_inner();
        assert_eq!(43, inner.get_u32(100).unwrap());
    }

    #[test]
    fn cached_device_cross_block_read() {
        let mut dev = CachedDevice::new(MemDevice::new(2048), 512, 8 * 1024);

        let payload = (0..64).map(|i| i as u8).collect::<Vec<_>>();
        dev.write(512 - 32, &payload).unwrap();

        let mut back = vec![0; 64];
        dev.read(512 - 32, &mut back).unwrap();
        assert_eq!(payload, back);
    }
}
