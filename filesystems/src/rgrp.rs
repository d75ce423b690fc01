//! Resource groups.
//!
//! Layout calculation splits the space after the superblock into equally
//! sized groups. Each group starts with a header block followed by bitmap
//! blocks; every data block has a two-bit state in the bitmap.

use crate::buf::BufferCache;
use crate::ondisk::{
    self, GFS2_BIT_MASK, GFS2_BIT_SIZE, GFS2_BLKST_DINODE, GFS2_BLKST_FREE, GFS2_FORMAT_RB,
    GFS2_METATYPE_RB, GFS2_NBBY, META_HEADER_SIZE, RGRP_HEADER_SIZE,
};
use log::debug;
use mkgfs2_core::{BlockDevice, DeviceGeometry, FilesystemLayout, ResourceGroupExtent, StructureError};

/// Superblock address in filesystem blocks.
pub fn sb_addr(bsize: u32) -> u64 {
    (ondisk::GFS2_SB_ADDR << ondisk::GFS2_BASIC_BLOCK_SHIFT) / bsize as u64
}

/// Number of header plus bitmap blocks needed for a group of `rgblocks` blocks.
pub fn rgblocks2bitblocks(bsize: u32, rgblocks: u64) -> u64 {
    let first = (bsize as u64 - RGRP_HEADER_SIZE as u64) * GFS2_NBBY as u64;
    let rest = (bsize as u64 - META_HEADER_SIZE as u64) * GFS2_NBBY as u64;
    let mut n = 1u64;
    while first + (n - 1) * rest < rgblocks.saturating_sub(n) {
        n += 1;
    }
    n
}

fn extent(bsize: u32, addr: u64, rgblocks: u64) -> Result<ResourceGroupExtent, StructureError> {
    let length = rgblocks2bitblocks(bsize, rgblocks);
    let data = rgblocks.saturating_sub(length) & !(GFS2_NBBY as u64 - 1);
    if data == 0 {
        return Err(StructureError::Invalid(format!(
            "resource group at block {} has no room for data",
            addr
        )));
    }
    let data = u32::try_from(data)
        .map_err(|_| StructureError::Invalid(format!("resource group at block {} is too large", addr)))?;
    Ok(ResourceGroupExtent {
        addr,
        length: length as u32,
        data0: addr + length,
        data,
        bitbytes: data / GFS2_NBBY,
    })
}

/// Places resource groups over `geometry` (filesystem blocks).
pub fn compute_rgrp_layout(
    geometry: &DeviceGeometry,
    bsize: u32,
    rgsize_mb: u32,
) -> Result<FilesystemLayout, StructureError> {
    let first = geometry.start + sb_addr(bsize) + 1;
    if first >= geometry.end() {
        return Err(StructureError::Invalid(format!(
            "device of {} blocks has no room after the superblock",
            geometry.length
        )));
    }
    let usable = geometry.end() - first;
    let rgblocks = ((rgsize_mb as u64) << 20) / bsize as u64;
    if rgblocks == 0 {
        return Err(StructureError::Invalid("resource group size is zero".to_string()));
    }
    let count = usable.div_ceil(rgblocks).max(1);
    let per = usable / count;

    let mut rgrps = Vec::with_capacity(count as usize);
    for i in 0..count {
        let addr = first + i * per;
        let len = if i == count - 1 { usable - per * (count - 1) } else { per };
        rgrps.push(extent(bsize, addr, len)?);
    }

    let fssize = rgrps.last().map(|rg| rg.end()).unwrap_or(first);
    debug!("Laid out {} resource groups, fs size {} blocks", count, fssize);
    Ok(FilesystemLayout {
        block_size: bsize,
        device_size: geometry.end(),
        fssize,
        rgrps,
    })
}

/// In-memory resource group with its bitmap.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub extent: ResourceGroupExtent,
    bitmap: Vec<u8>,
    next: u32,
    pub free: u32,
    pub dinodes: u32,
}

impl ResourceGroup {
    pub fn new(extent: ResourceGroupExtent) -> Self {
        Self {
            extent,
            bitmap: vec![0u8; extent.bitbytes as usize],
            next: 0,
            free: extent.data,
            dinodes: 0,
        }
    }

    pub fn block_state(&self, blkno: u64) -> Option<u8> {
        if blkno < self.extent.data0 || blkno >= self.extent.end() {
            return None;
        }
        let idx = (blkno - self.extent.data0) as usize;
        let shift = (idx % GFS2_NBBY as usize) as u32 * GFS2_BIT_SIZE;
        Some((self.bitmap[idx / GFS2_NBBY as usize] >> shift) & GFS2_BIT_MASK)
    }

    fn set_state(&mut self, idx: u32, state: u8) {
        let byte = &mut self.bitmap[(idx / GFS2_NBBY) as usize];
        let shift = (idx % GFS2_NBBY) * GFS2_BIT_SIZE;
        *byte = (*byte & !(GFS2_BIT_MASK << shift)) | ((state & GFS2_BIT_MASK) << shift);
    }

    fn alloc(&mut self, state: u8) -> Option<u64> {
        if self.next >= self.extent.data {
            return None;
        }
        let idx = self.next;
        self.next += 1;
        self.set_state(idx, state);
        self.free -= 1;
        if state == GFS2_BLKST_DINODE {
            self.dinodes += 1;
        }
        Some(self.extent.data0 + idx as u64)
    }

    /// Encodes the header and bitmap blocks into the cache.
    pub fn write<D: BlockDevice>(&self, cache: &mut BufferCache, device: &mut D) -> std::io::Result<()> {
        let bsize = cache.block_size();
        let mut bits = self.bitmap.as_slice();
        for i in 0..self.extent.length as u64 {
            let block = cache.block_mut(device, self.extent.addr + i)?;
            let offset = if i == 0 {
                ondisk::write_rgrp_header(block, self.free, self.dinodes);
                RGRP_HEADER_SIZE
            } else {
                block.fill(0);
                ondisk::write_meta_header(block, GFS2_METATYPE_RB, GFS2_FORMAT_RB);
                META_HEADER_SIZE
            };
            let n = bits.len().min(bsize - offset);
            block[offset..offset + n].copy_from_slice(&bits[..n]);
            bits = &bits[n..];
        }
        Ok(())
    }
}

/// All resource groups plus a sequential block allocator.
#[derive(Debug, Clone)]
pub struct ResourceGroups {
    groups: Vec<ResourceGroup>,
    cursor: usize,
}

impl ResourceGroups {
    pub fn new(layout: &FilesystemLayout) -> Self {
        Self {
            groups: layout.rgrps.iter().copied().map(ResourceGroup::new).collect(),
            cursor: 0,
        }
    }

    pub fn groups(&self) -> &[ResourceGroup] {
        &self.groups
    }

    /// Allocates the next free data block and marks it with `state`.
    pub fn alloc(&mut self, state: u8) -> Result<u64, StructureError> {
        debug_assert_ne!(state, GFS2_BLKST_FREE);
        while let Some(group) = self.groups.get_mut(self.cursor) {
            if let Some(blkno) = group.alloc(state) {
                return Ok(blkno);
            }
            self.cursor += 1;
        }
        Err(StructureError::NoSpace("all resource groups are full".to_string()))
    }

    pub fn block_state(&self, blkno: u64) -> Option<u8> {
        self.groups.iter().find_map(|g| g.block_state(blkno))
    }

    /// `(total data blocks, free blocks, dinodes)`.
    pub fn totals(&self) -> (u64, u64, u64) {
        self.groups.iter().fold((0, 0, 0), |(t, f, d), g| {
            (t + g.extent.data as u64, f + g.free as u64, d + g.dinodes as u64)
        })
    }

    pub fn write<D: BlockDevice>(&self, cache: &mut BufferCache, device: &mut D) -> std::io::Result<()> {
        for group in &self.groups {
            group.write(cache, device)?;
        }
        Ok(())
    }
}
