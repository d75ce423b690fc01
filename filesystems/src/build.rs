//! GFS2 structure builders.
//!
//! [`Gfs2Structures`] implements every collaborator the format session
//! needs. Building starts with the resource groups, which set up the block
//! allocator and buffer cache that all later steps share.

use crate::detection;
use crate::geometry;
use crate::inode::{FsState, Inode};
use crate::locking;
use crate::ondisk::{
    self, Superblock, DT_DIR, DT_REG, GFS2_BLKST_FREE, GFS2_DIF_JDATA, GFS2_DIF_SYSTEM, GFS2_FORMAT_FS,
    GFS2_FORMAT_MULTI, GFS2_LOG_HEAD_UNMOUNT, INUM_RANGE_SIZE, RINDEX_SIZE, STATFS_CHANGE_SIZE, S_IFDIR,
    S_IFREG,
};
use crate::rgrp;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use mkgfs2_core::{
    BlockDevice, BuildContext, BuildStats, ContentIdentifier, DeviceGeometry, FilesystemLayout, GeometryProbe,
    LayoutCalculator, LockingCheck, StructureBuilder, StructureError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use uuid::Uuid;

const DIR_MODE: u32 = S_IFDIR | 0o755;
const SYSTEM_DIR_MODE: u32 = S_IFDIR | 0o700;
const SYSTEM_FILE_MODE: u32 = S_IFREG | 0o600;

pub struct Gfs2Structures {
    fs: Option<FsState>,
    rng: StdRng,
}

impl Default for Gfs2Structures {
    fn default() -> Self {
        Self::new()
    }
}

impl Gfs2Structures {
    pub fn new() -> Self {
        Self {
            fs: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Builder with a fixed seed for journal sequence numbers.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            fs: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Filesystem state; exists once the resource groups are built.
    pub fn state(&self) -> Option<&FsState> {
        self.fs.as_ref()
    }

    fn fs(&mut self) -> Result<&mut FsState, StructureError> {
        self.fs.as_mut().ok_or(StructureError::OutOfOrder("resource groups"))
    }
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn mb_to_blocks(mb: u32, per_block: usize) -> u64 {
    ((mb as u64) << 20).div_ceil(per_block as u64)
}

impl FsState {
    /// Creates a system file under `dir` holding `data`.
    fn system_file<D: BlockDevice>(
        &mut self,
        device: &mut D,
        dir: &mut Inode,
        name: &str,
        flags: u32,
        data: &[u8],
    ) -> Result<Inode, StructureError> {
        let mut file = self.create_inode(device, SYSTEM_FILE_MODE, GFS2_DIF_SYSTEM | flags, None)?;
        self.write_file(device, &mut file, data)?;
        self.dir_add(device, dir, name, file.inum(), DT_REG)?;
        Ok(file)
    }

    /// Journaled-data system file of `mb` megabytes of zeroed payload.
    fn zeroed_jdata_file<D: BlockDevice>(
        &mut self,
        device: &mut D,
        dir: &mut Inode,
        name: &str,
        mb: u32,
    ) -> Result<(), StructureError> {
        let mut file = self.create_inode(device, SYSTEM_FILE_MODE, GFS2_DIF_SYSTEM | GFS2_DIF_JDATA, None)?;
        let nblocks = mb_to_blocks(mb, self.jbsize());
        self.write_blocks(device, &mut file, nblocks, (mb as u64) << 20, |_, _| {})?;
        self.dir_add(device, dir, name, file.inum(), DT_REG)?;
        self.write_inode(device, &file)
    }

    fn journal<D: BlockDevice>(
        &mut self,
        device: &mut D,
        jindex: &mut Inode,
        index: u32,
        jsize_mb: u32,
        first_sequence: u64,
    ) -> Result<(), StructureError> {
        let mut journal = self.create_inode(device, SYSTEM_FILE_MODE, GFS2_DIF_SYSTEM, None)?;
        let nblocks = mb_to_blocks(jsize_mb, self.bsize as usize);
        self.write_blocks(device, &mut journal, nblocks, (jsize_mb as u64) << 20, |blk, buf| {
            ondisk::write_log_header(buf, first_sequence + blk, GFS2_LOG_HEAD_UNMOUNT, blk as u32);
        })?;
        self.dir_add(device, jindex, &format!("journal{}", index), journal.inum(), DT_REG)?;
        self.write_inode(device, &journal)?;
        debug!("Journal {}: {} blocks at inode {}", index, nblocks, journal.inum().addr);
        Ok(())
    }
}

impl LockingCheck for Gfs2Structures {
    fn check_locking(&self, lockproto: &str, locktable: &str) -> Result<(), StructureError> {
        locking::test_locking(lockproto, locktable)
    }
}

impl<D: BlockDevice> ContentIdentifier<D> for Gfs2Structures {
    fn identify_device(&mut self, device: &mut D) -> io::Result<Option<String>> {
        detection::identify_device(device)
    }
}

impl<D: BlockDevice> GeometryProbe<D> for Gfs2Structures {
    fn device_geometry(&mut self, device: &mut D) -> Result<DeviceGeometry, StructureError> {
        geometry::device_geometry(device)
    }

    fn fix_device_geometry(&mut self, geometry: DeviceGeometry, block_size: u32) -> Result<DeviceGeometry, StructureError> {
        geometry::fix_device_geometry(geometry, block_size)
    }
}

impl LayoutCalculator for Gfs2Structures {
    fn compute_rgrp_layout(
        &mut self,
        geometry: &DeviceGeometry,
        block_size: u32,
        rgsize_mb: u32,
    ) -> Result<FilesystemLayout, StructureError> {
        rgrp::compute_rgrp_layout(geometry, block_size, rgsize_mb)
    }
}

impl<D: BlockDevice> StructureBuilder<D> for Gfs2Structures {
    type Inode = Inode;

    fn build_rgrps(&mut self, device: &mut D, ctx: &BuildContext<'_>) -> Result<(), StructureError> {
        let mut fs = FsState::new(ctx.layout, now());
        fs.rgrps.write(&mut fs.cache, device)?;
        info!("Wrote {} resource groups", ctx.layout.rgrp_count());
        self.fs = Some(fs);
        Ok(())
    }

    fn build_root(&mut self, device: &mut D, _ctx: &BuildContext<'_>) -> Result<Inode, StructureError> {
        self.fs()?.create_inode(device, DIR_MODE, 0, None)
    }

    fn build_master(&mut self, device: &mut D, _ctx: &BuildContext<'_>) -> Result<Inode, StructureError> {
        self.fs()?.create_inode(device, DIR_MODE, GFS2_DIF_SYSTEM, None)
    }

    fn build_sb(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        root: &Inode,
        master: &Inode,
    ) -> Result<(), StructureError> {
        let fs = self.fs()?;
        let bsize = fs.bsize;
        let sb = Superblock {
            fs_format: GFS2_FORMAT_FS,
            multihost_format: GFS2_FORMAT_MULTI,
            bsize,
            bsize_shift: bsize.trailing_zeros(),
            master_dir: master.inum(),
            root_dir: root.inum(),
            lockproto: ctx.request.lockproto().as_str().to_string(),
            locktable: ctx.request.locktable().as_str().to_string(),
            uuid: Uuid::new_v4().into_bytes(),
        };
        let block = fs.cache.block_mut(device, rgrp::sb_addr(bsize))?;
        block.fill(0);
        sb.write(block);
        Ok(())
    }

    fn build_jindex(&mut self, device: &mut D, ctx: &BuildContext<'_>, master: &mut Inode) -> Result<(), StructureError> {
        let Self { fs, rng } = self;
        let fs = fs.as_mut().ok_or(StructureError::OutOfOrder("resource groups"))?;
        let mut jindex = fs.create_inode(device, SYSTEM_DIR_MODE, GFS2_DIF_SYSTEM, Some(master.inum()))?;
        for j in 0..ctx.request.journals() {
            let first_sequence = rng.gen_range(0..u32::MAX as u64);
            fs.journal(device, &mut jindex, j, ctx.request.journal_size_mb(), first_sequence)?;
        }
        fs.dir_add(device, master, "jindex", jindex.inum(), DT_DIR)?;
        fs.write_inode(device, &jindex)
    }

    fn build_per_node(&mut self, device: &mut D, ctx: &BuildContext<'_>, master: &mut Inode) -> Result<(), StructureError> {
        let fs = self.fs()?;
        let mut per_node = fs.create_inode(device, SYSTEM_DIR_MODE, GFS2_DIF_SYSTEM, Some(master.inum()))?;
        for j in 0..ctx.request.journals() {
            let range = fs.system_file(device, &mut per_node, &format!("inum_range{}", j), 0, &[0u8; INUM_RANGE_SIZE])?;
            fs.write_inode(device, &range)?;
            let change =
                fs.system_file(device, &mut per_node, &format!("statfs_change{}", j), 0, &[0u8; STATFS_CHANGE_SIZE])?;
            fs.write_inode(device, &change)?;
            fs.zeroed_jdata_file(device, &mut per_node, &format!("unlinked_tag{}", j), ctx.request.utsize_mb())?;
            fs.zeroed_jdata_file(device, &mut per_node, &format!("quota_change{}", j), ctx.request.qcsize_mb())?;
        }
        fs.dir_add(device, master, "per_node", per_node.inum(), DT_DIR)?;
        fs.write_inode(device, &per_node)
    }

    fn build_inum(&mut self, device: &mut D, _ctx: &BuildContext<'_>, master: &mut Inode) -> Result<Inode, StructureError> {
        self.fs()?.system_file(device, master, "inum", 0, &[0u8; 8])
    }

    fn build_statfs(&mut self, device: &mut D, _ctx: &BuildContext<'_>, master: &mut Inode) -> Result<Inode, StructureError> {
        self.fs()?.system_file(device, master, "statfs", 0, &[0u8; STATFS_CHANGE_SIZE])
    }

    fn build_rindex(&mut self, device: &mut D, ctx: &BuildContext<'_>, master: &mut Inode) -> Result<(), StructureError> {
        let mut data = vec![0u8; ctx.layout.rgrps.len() * RINDEX_SIZE];
        for (entry, rg) in data.chunks_mut(RINDEX_SIZE).zip(&ctx.layout.rgrps) {
            ondisk::write_rindex_entry(entry, rg);
        }
        let fs = self.fs()?;
        let rindex = fs.system_file(device, master, "rindex", GFS2_DIF_JDATA, &data)?;
        fs.write_inode(device, &rindex)
    }

    fn build_quota(&mut self, device: &mut D, _ctx: &BuildContext<'_>, master: &mut Inode) -> Result<(), StructureError> {
        // Entries for user 0 and group 0
        let mut data = Vec::with_capacity(2 * ondisk::QUOTA_SIZE);
        data.extend_from_slice(&ondisk::quota(0, 0, 0));
        data.extend_from_slice(&ondisk::quota(0, 0, 0));
        let fs = self.fs()?;
        let quota = fs.system_file(device, master, "quota", GFS2_DIF_JDATA, &data)?;
        fs.write_inode(device, &quota)
    }

    fn do_init(
        &mut self,
        device: &mut D,
        _ctx: &BuildContext<'_>,
        inum: &mut Inode,
        statfs: &mut Inode,
    ) -> Result<(), StructureError> {
        let fs = self.fs()?;
        let mut next = [0u8; 8];
        BigEndian::write_u64(&mut next, fs.next_inum);
        fs.write_file(device, inum, &next)?;

        let (total, free, dinodes) = fs.rgrps.totals();
        fs.write_file(device, statfs, &ondisk::statfs_change(total, free, dinodes))?;
        debug!("statfs: {} blocks, {} free, {} dinodes", total, free, dinodes);
        Ok(())
    }

    fn inode_put(&mut self, device: &mut D, inode: Inode) -> Result<(), StructureError> {
        self.fs()?.write_inode(device, &inode)
    }

    fn bsync(&mut self, device: &mut D) -> Result<BuildStats, StructureError> {
        let fs = self.fs()?;
        fs.rgrps.write(&mut fs.cache, device)?;
        let stats = fs.cache.bsync(device)?;
        info!("Flushed {} blocks ({} spills)", stats.writes, stats.spills);
        Ok(stats)
    }
}

/// Whether block `blkno` is allocated in the filesystem being built.
pub fn is_allocated(structures: &Gfs2Structures, blkno: u64) -> bool {
    structures
        .state()
        .and_then(|fs| fs.rgrps.block_state(blkno))
        .is_some_and(|state| state != GFS2_BLKST_FREE)
}
