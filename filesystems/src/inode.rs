// In-memory inodes, file data and directories
//
// Every inode occupies one dinode block. Small payloads are stored in the
// same block after the dinode ("stuffed"); larger files get data blocks and
// a tree of indirect blocks whose top level lives after the dinode.

use crate::buf::BufferCache;
use crate::ondisk::{
    self, Dinode, Inum, DINODE_SIZE, DIRENT_SIZE, DT_DIR, GFS2_BLKST_DINODE, GFS2_BLKST_USED,
    GFS2_DIF_EXHASH, GFS2_DIF_JDATA, GFS2_FORMAT_DE, GFS2_FORMAT_IN, GFS2_FORMAT_JD,
    GFS2_METATYPE_IN, GFS2_METATYPE_JD, LEAF_SIZE, META_HEADER_SIZE, S_IFDIR,
};
use crate::rgrp::ResourceGroups;
use byteorder::{BigEndian, ByteOrder};
use log::trace;
use mkgfs2_core::{BlockDevice, FilesystemLayout, StructureError};

/// Space for a record naming `name`, rounded to 8 bytes.
pub fn dirent_rec_len(name: &str) -> usize {
    (DIRENT_SIZE + name.len() + 7) & !7
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inum: Inum,
    pub de_type: u16,
}

#[derive(Debug, Clone, Default)]
struct Directory {
    entries: Vec<DirEntry>,
    /// Leaf blocks once the directory no longer fits in its dinode block.
    leaves: Vec<u64>,
}

/// An inode handle held while the filesystem is being built.
#[derive(Debug, Clone)]
pub struct Inode {
    pub di: Dinode,
    /// Bytes following the dinode in its block: stuffed data, the top level
    /// of block pointers, or the directory hash table.
    tail: Vec<u8>,
    dir: Option<Directory>,
}

impl Inode {
    pub fn inum(&self) -> Inum {
        self.di.num
    }

    pub fn is_dir(&self) -> bool {
        self.dir.is_some()
    }

    pub fn is_stuffed(&self) -> bool {
        self.di.height == 0 && self.di.flags & GFS2_DIF_EXHASH == 0
    }

    pub fn entries(&self) -> &[DirEntry] {
        self.dir.as_ref().map(|d| d.entries.as_slice()).unwrap_or(&[])
    }

    pub fn lookup(&self, name: &str) -> Option<&DirEntry> {
        self.entries().iter().find(|e| e.name == name)
    }
}

/// State of the filesystem under construction.
pub struct FsState {
    pub bsize: u32,
    pub cache: BufferCache,
    pub rgrps: ResourceGroups,
    pub next_inum: u64,
    /// Creation time stamped on every inode, seconds since the epoch.
    pub now: u64,
}

impl FsState {
    pub fn new(layout: &FilesystemLayout, now: u64) -> Self {
        Self {
            bsize: layout.block_size,
            cache: BufferCache::new(layout.block_size),
            rgrps: ResourceGroups::new(layout),
            next_inum: 1,
            now,
        }
    }

    fn stuffed_capacity(&self) -> usize {
        self.bsize as usize - DINODE_SIZE
    }

    /// Block pointers that fit after the dinode.
    pub fn diptrs(&self) -> usize {
        (self.bsize as usize - DINODE_SIZE) / 8
    }

    /// Block pointers per indirect block.
    pub fn inptrs(&self) -> usize {
        (self.bsize as usize - META_HEADER_SIZE) / 8
    }

    /// Payload bytes per journaled-data block.
    pub fn jbsize(&self) -> usize {
        self.bsize as usize - META_HEADER_SIZE
    }

    /// Allocates a dinode block and returns an empty inode of type `mode`.
    ///
    /// Directories start out holding `.` and `..`; `parent` of `None` makes
    /// the directory its own parent.
    pub fn create_inode<D: BlockDevice>(
        &mut self,
        device: &mut D,
        mode: u32,
        flags: u32,
        parent: Option<Inum>,
    ) -> Result<Inode, StructureError> {
        let addr = self.rgrps.alloc(GFS2_BLKST_DINODE)?;
        let num = Inum { formal_ino: self.next_inum, addr };
        self.next_inum += 1;

        let is_dir = mode & S_IFDIR == S_IFDIR;
        let di = Dinode {
            num,
            mode,
            nlink: if is_dir { 2 } else { 1 },
            blocks: 1,
            atime: self.now,
            mtime: self.now,
            ctime: self.now,
            goal_meta: addr,
            goal_data: addr,
            flags,
            payload_format: if is_dir { GFS2_FORMAT_DE } else { 0 },
            ..Dinode::default()
        };
        let mut inode = Inode {
            di,
            tail: Vec::new(),
            dir: None,
        };
        trace!("Created inode {} at block {}", num.formal_ino, addr);

        if is_dir {
            inode.dir = Some(Directory {
                entries: vec![
                    DirEntry { name: ".".to_string(), inum: num, de_type: DT_DIR },
                    DirEntry { name: "..".to_string(), inum: parent.unwrap_or(num), de_type: DT_DIR },
                ],
                leaves: Vec::new(),
            });
            inode.di.entries = 2;
            self.encode_dir(device, &mut inode)?;
        }
        Ok(inode)
    }

    /// Writes the dinode block of `inode` into the cache.
    pub fn write_inode<D: BlockDevice>(&mut self, device: &mut D, inode: &Inode) -> Result<(), StructureError> {
        let block = self.cache.block_mut(device, inode.di.num.addr)?;
        block.fill(0);
        inode.di.write(block);
        block[DINODE_SIZE..DINODE_SIZE + inode.tail.len()].copy_from_slice(&inode.tail);
        Ok(())
    }

    /// Replaces the contents of a regular file with `data`.
    pub fn write_file<D: BlockDevice>(
        &mut self,
        device: &mut D,
        inode: &mut Inode,
        data: &[u8],
    ) -> Result<(), StructureError> {
        if data.len() <= self.stuffed_capacity() {
            inode.tail = data.to_vec();
            inode.di.size = data.len() as u64;
            inode.di.height = 0;
            return Ok(());
        }
        let per_block = if inode.di.flags & GFS2_DIF_JDATA != 0 {
            self.jbsize()
        } else {
            self.bsize as usize
        };
        let nblocks = data.len().div_ceil(per_block) as u64;
        self.write_blocks(device, inode, nblocks, data.len() as u64, |idx, buf| {
            let start = idx as usize * per_block;
            let end = (start + per_block).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
        })
    }

    /// Gives a file `nblocks` freshly allocated data blocks filled by `fill`.
    ///
    /// `fill` receives the file-relative block index and the block payload,
    /// which excludes the header of journaled-data blocks.
    pub fn write_blocks<D, F>(
        &mut self,
        device: &mut D,
        inode: &mut Inode,
        nblocks: u64,
        size: u64,
        mut fill: F,
    ) -> Result<(), StructureError>
    where
        D: BlockDevice,
        F: FnMut(u64, &mut [u8]),
    {
        if nblocks == 0 {
            inode.tail.clear();
            inode.di.size = 0;
            inode.di.height = 0;
            return Ok(());
        }
        let jdata = inode.di.flags & GFS2_DIF_JDATA != 0;

        let mut level = Vec::with_capacity(nblocks as usize);
        for idx in 0..nblocks {
            let blkno = self.rgrps.alloc(GFS2_BLKST_USED)?;
            let block = self.cache.block_mut(device, blkno)?;
            block.fill(0);
            if jdata {
                ondisk::write_meta_header(block, GFS2_METATYPE_JD, GFS2_FORMAT_JD);
                fill(idx, &mut block[META_HEADER_SIZE..]);
            } else {
                fill(idx, block);
            }
            level.push(blkno);
        }

        let mut height = 1u16;
        let mut indirect = 0u64;
        while level.len() > self.diptrs() {
            let mut upper = Vec::with_capacity(level.len().div_ceil(self.inptrs()));
            for chunk in level.chunks(self.inptrs()) {
                let blkno = self.rgrps.alloc(GFS2_BLKST_USED)?;
                let block = self.cache.block_mut(device, blkno)?;
                block.fill(0);
                ondisk::write_meta_header(block, GFS2_METATYPE_IN, GFS2_FORMAT_IN);
                write_pointers(&mut block[META_HEADER_SIZE..], chunk);
                upper.push(blkno);
            }
            indirect += upper.len() as u64;
            level = upper;
            height += 1;
        }

        let mut tail = vec![0u8; level.len() * 8];
        write_pointers(&mut tail, &level);
        inode.tail = tail;
        inode.di.height = height;
        inode.di.size = size;
        inode.di.blocks = 1 + nblocks + indirect;
        inode.di.goal_data = level.last().copied().unwrap_or(inode.di.num.addr);
        Ok(())
    }

    /// Links `name` into directory `dir`.
    pub fn dir_add<D: BlockDevice>(
        &mut self,
        device: &mut D,
        dir: &mut Inode,
        name: &str,
        inum: Inum,
        de_type: u16,
    ) -> Result<(), StructureError> {
        let entries = match dir.dir.as_mut() {
            Some(d) => &mut d.entries,
            None => return Err(StructureError::Invalid(format!("inode {} is not a directory", dir.di.num.formal_ino))),
        };
        if entries.iter().any(|e| e.name == name) {
            return Err(StructureError::Invalid(format!("directory entry {} already exists", name)));
        }
        entries.push(DirEntry { name: name.to_string(), inum, de_type });
        dir.di.entries = entries.len() as u32;
        if de_type == DT_DIR {
            dir.di.nlink += 1;
        }
        self.encode_dir(device, dir)
    }

    /// Lays out the entries stuffed in the dinode block or, once they
    /// outgrow it, in a chain of leaf blocks behind a two-pointer hash table.
    fn encode_dir<D: BlockDevice>(&mut self, device: &mut D, inode: &mut Inode) -> Result<(), StructureError> {
        let Some(dir) = inode.dir.as_mut() else {
            return Ok(());
        };
        let total: usize = dir.entries.iter().map(|e| dirent_rec_len(&e.name)).sum();
        let capacity = self.stuffed_capacity();

        if inode.di.flags & GFS2_DIF_EXHASH == 0 && total <= capacity {
            let mut tail = vec![0u8; capacity];
            pack_dirents(&mut tail, &dir.entries);
            inode.tail = tail;
            inode.di.size = capacity as u64;
            return Ok(());
        }

        let leaf_capacity = self.bsize as usize - LEAF_SIZE;
        let mut groups: Vec<&[DirEntry]> = Vec::new();
        let mut start = 0;
        let mut used = 0;
        for (i, entry) in dir.entries.iter().enumerate() {
            let len = dirent_rec_len(&entry.name);
            if used + len > leaf_capacity {
                groups.push(&dir.entries[start..i]);
                start = i;
                used = 0;
            }
            used += len;
        }
        groups.push(&dir.entries[start..]);

        while dir.leaves.len() < groups.len() {
            let blkno = self.rgrps.alloc(GFS2_BLKST_USED)?;
            dir.leaves.push(blkno);
        }

        for (i, group) in groups.iter().enumerate() {
            let next = dir.leaves.get(i + 1).copied().unwrap_or(0);
            let block = self.cache.block_mut(device, dir.leaves[i])?;
            block.fill(0);
            ondisk::write_leaf_header(block, 0, group.len() as u16, next);
            pack_dirents(&mut block[LEAF_SIZE..], group);
        }

        let mut table = vec![0u8; 16];
        write_pointers(&mut table, &[dir.leaves[0], dir.leaves[0]]);
        inode.tail = table;
        inode.di.flags |= GFS2_DIF_EXHASH;
        inode.di.depth = 1;
        inode.di.size = 16;
        inode.di.blocks = 1 + dir.leaves.len() as u64;
        Ok(())
    }
}

fn write_pointers(buf: &mut [u8], ptrs: &[u64]) {
    for (i, ptr) in ptrs.iter().enumerate() {
        BigEndian::write_u64(&mut buf[i * 8..i * 8 + 8], *ptr);
    }
}

/// Packs entries front to back; the last record absorbs the remaining space.
fn pack_dirents(buf: &mut [u8], entries: &[DirEntry]) {
    let mut offset = 0;
    for (i, entry) in entries.iter().enumerate() {
        let rec_len = if i + 1 == entries.len() {
            buf.len() - offset
        } else {
            dirent_rec_len(&entry.name)
        };
        let hash = ondisk::disk_hash(entry.name.as_bytes());
        ondisk::write_dirent(&mut buf[offset..], entry.inum, hash, rec_len as u16, &entry.name, entry.de_type);
        offset += rec_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ondisk::{GFS2_DIF_SYSTEM, GFS2_METATYPE_LF, S_IFREG};
    use mkgfs2_core::test_utils::MemDevice;
    use mkgfs2_core::{DeviceGeometry, FilesystemLayout};

    fn state(bsize: u32, blocks: u64) -> (FsState, MemDevice) {
        let geometry = DeviceGeometry { start: 0, length: blocks };
        let layout: FilesystemLayout = crate::rgrp::compute_rgrp_layout(&geometry, bsize, 32).unwrap();
        let device = MemDevice::zeroed("/dev/mem", (blocks * bsize as u64) as usize);
        (FsState::new(&layout, 1_700_000_000), device)
    }

    fn read_block(device: &MemDevice, bsize: u32, blkno: u64) -> Vec<u8> {
        let start = (blkno * bsize as u64) as usize;
        device.contents()[start..start + bsize as usize].to_vec()
    }

    #[test]
    fn small_files_are_stuffed() {
        let (mut fs, mut device) = state(4096, 4096);
        let mut file = fs.create_inode(&mut device, S_IFREG | 0o600, GFS2_DIF_SYSTEM, None).unwrap();
        fs.write_file(&mut device, &mut file, b"hello").unwrap();
        fs.write_inode(&mut device, &file).unwrap();
        fs.cache.bsync(&mut device).unwrap();

        assert!(file.is_stuffed());
        let block = read_block(&device, 4096, file.inum().addr);
        let di = Dinode::read(&block).unwrap();
        assert_eq!(di.size, 5);
        assert_eq!(di.blocks, 1);
        assert_eq!(&block[DINODE_SIZE..DINODE_SIZE + 5], b"hello");
    }

    #[test]
    fn large_files_get_an_indirect_tree() {
        let (mut fs, mut device) = state(512, 8192);
        let mut file = fs.create_inode(&mut device, S_IFREG | 0o600, 0, None).unwrap();
        // 60 data blocks: more than the 35 pointers after the dinode.
        let data = vec![0x5au8; 60 * 512];
        fs.write_file(&mut device, &mut file, &data).unwrap();

        assert_eq!(fs.diptrs(), 35);
        assert_eq!(file.di.height, 2);
        assert_eq!(file.di.blocks, 1 + 60 + 1);
        assert_eq!(file.di.size, data.len() as u64);

        fs.write_inode(&mut device, &file).unwrap();
        fs.cache.bsync(&mut device).unwrap();
        let block = read_block(&device, 512, file.inum().addr);
        let top = BigEndian::read_u64(&block[DINODE_SIZE..DINODE_SIZE + 8]);
        let indirect = read_block(&device, 512, top);
        assert_eq!(ondisk::read_meta_type(&indirect), Some(GFS2_METATYPE_IN));
        let first_data = BigEndian::read_u64(&indirect[META_HEADER_SIZE..META_HEADER_SIZE + 8]);
        assert!(read_block(&device, 512, first_data).iter().all(|b| *b == 0x5a));
    }

    #[test]
    fn journaled_data_blocks_carry_headers() {
        let (mut fs, mut device) = state(512, 8192);
        let mut file = fs.create_inode(&mut device, S_IFREG | 0o600, GFS2_DIF_JDATA, None).unwrap();
        let data = vec![1u8; 1000];
        fs.write_file(&mut device, &mut file, &data).unwrap();
        assert_eq!(file.di.height, 1);
        // 488 payload bytes per block.
        assert_eq!(file.di.blocks, 1 + 3);

        fs.write_inode(&mut device, &file).unwrap();
        fs.cache.bsync(&mut device).unwrap();
        let block = read_block(&device, 512, file.inum().addr);
        let first = BigEndian::read_u64(&block[DINODE_SIZE..DINODE_SIZE + 8]);
        assert_eq!(ondisk::read_meta_type(&read_block(&device, 512, first)), Some(GFS2_METATYPE_JD));
    }

    #[test]
    fn directories_spill_into_leaves() {
        let (mut fs, mut device) = state(512, 8192);
        let mut dir = fs.create_inode(&mut device, S_IFDIR | 0o755, 0, None).unwrap();
        assert!(dir.is_stuffed());

        for i in 0..20 {
            let name = format!("entry{}", i);
            fs.dir_add(&mut device, &mut dir, &name, Inum { formal_ino: 100 + i, addr: 0 }, ondisk::DT_REG)
                .unwrap();
        }
        assert!(!dir.is_stuffed());
        assert_eq!(dir.di.entries, 22);
        assert_eq!(dir.di.depth, 1);
        assert!(dir.lookup("entry19").is_some());

        fs.write_inode(&mut device, &dir).unwrap();
        fs.cache.bsync(&mut device).unwrap();
        let block = read_block(&device, 512, dir.inum().addr);
        let leaf = BigEndian::read_u64(&block[DINODE_SIZE..DINODE_SIZE + 8]);
        assert_eq!(BigEndian::read_u64(&block[DINODE_SIZE + 8..DINODE_SIZE + 16]), leaf);

        let mut seen = 0u32;
        let mut next = leaf;
        while next != 0 {
            let data = read_block(&device, 512, next);
            assert_eq!(ondisk::read_meta_type(&data), Some(GFS2_METATYPE_LF));
            seen += BigEndian::read_u16(&data[26..28]) as u32;
            next = BigEndian::read_u64(&data[32..40]);
        }
        assert_eq!(seen, 22);
    }

    #[test]
    fn subdirectories_raise_the_link_count() {
        let (mut fs, mut device) = state(4096, 4096);
        let mut parent = fs.create_inode(&mut device, S_IFDIR | 0o755, 0, None).unwrap();
        let child = fs.create_inode(&mut device, S_IFDIR | 0o700, 0, Some(parent.inum())).unwrap();
        fs.dir_add(&mut device, &mut parent, "child", child.inum(), DT_DIR).unwrap();

        assert_eq!(parent.di.nlink, 3);
        assert_eq!(child.lookup("..").map(|e| e.inum), Some(parent.inum()));
        assert!(fs.dir_add(&mut device, &mut parent, "child", child.inum(), DT_DIR).is_err());
    }

    #[test]
    fn rec_len_is_eight_byte_aligned() {
        assert_eq!(dirent_rec_len("."), 48);
        assert_eq!(dirent_rec_len("12345678"), 48);
        assert_eq!(dirent_rec_len("123456789"), 56);
    }
}
