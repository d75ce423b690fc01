// Block buffer cache
// Collects dirty metadata and data blocks in memory and writes them out in
// block order. When the dirty set outgrows its budget the whole set is
// written early (a spill) and the cache starts over.

use log::{debug, trace};
use mkgfs2_core::{BlockDevice, BuildStats};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

/// Bytes of dirty data held before a spill.
pub const DEFAULT_CACHE_BYTES: usize = 16 << 20;

pub struct BufferCache {
    bsize: usize,
    budget: usize,
    dirty: BTreeMap<u64, Vec<u8>>,
    /// Blocks already written to the device by an earlier spill.
    on_disk: BTreeSet<u64>,
    stats: BuildStats,
}

impl BufferCache {
    pub fn new(bsize: u32) -> Self {
        let budget = (DEFAULT_CACHE_BYTES / bsize as usize).max(16);
        Self::with_budget(bsize, budget)
    }

    /// Cache holding at most `budget` dirty blocks.
    pub fn with_budget(bsize: u32, budget: usize) -> Self {
        Self {
            bsize: bsize as usize,
            budget: budget.max(1),
            dirty: BTreeMap::new(),
            on_disk: BTreeSet::new(),
            stats: BuildStats::default(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.bsize
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Mutable view of block `blkno`, marked dirty.
    ///
    /// A block not seen before starts zeroed. A block that was spilled is
    /// read back from the device first.
    pub fn block_mut<D: BlockDevice>(&mut self, device: &mut D, blkno: u64) -> io::Result<&mut [u8]> {
        if !self.dirty.contains_key(&blkno) {
            if self.dirty.len() >= self.budget {
                self.spill(device)?;
            }
            let mut buf = vec![0u8; self.bsize];
            if self.on_disk.contains(&blkno) {
                device.read_at(blkno * self.bsize as u64, &mut buf)?;
            }
            self.dirty.insert(blkno, buf);
        }
        Ok(self.dirty.entry(blkno).or_default().as_mut_slice())
    }

    /// Replaces block `blkno` with `data`, zero padded to the block size.
    pub fn put<D: BlockDevice>(&mut self, device: &mut D, blkno: u64, data: &[u8]) -> io::Result<()> {
        let block = self.block_mut(device, blkno)?;
        let n = data.len().min(block.len());
        block[..n].copy_from_slice(&data[..n]);
        block[n..].fill(0);
        Ok(())
    }

    fn spill<D: BlockDevice>(&mut self, device: &mut D) -> io::Result<()> {
        debug!("Spilling {} dirty blocks", self.dirty.len());
        self.flush(device)?;
        self.stats.spills += 1;
        Ok(())
    }

    fn flush<D: BlockDevice>(&mut self, device: &mut D) -> io::Result<()> {
        let dirty = std::mem::take(&mut self.dirty);
        for (blkno, data) in dirty {
            trace!("Writing block {}", blkno);
            device.write_at(blkno * self.bsize as u64, &data)?;
            self.on_disk.insert(blkno);
            self.stats.writes += 1;
        }
        Ok(())
    }

    /// Writes every dirty block in ascending block order.
    pub fn bsync<D: BlockDevice>(&mut self, device: &mut D) -> io::Result<BuildStats> {
        self.flush(device)?;
        Ok(self.stats)
    }
}
