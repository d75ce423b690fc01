// On-disk constants and big-endian encoders for GFS2 metadata

use byteorder::{BigEndian, ByteOrder};

pub const GFS2_MAGIC: u32 = 0x0116_1970;
pub const GFS_FORMAT_FS: u32 = 1309;

pub const GFS2_BASIC_BLOCK: u32 = 512;
pub const GFS2_BASIC_BLOCK_SHIFT: u32 = 9;
/// Superblock address, in basic blocks.
pub const GFS2_SB_ADDR: u64 = 128;

pub const GFS2_LOCKNAME_LEN: usize = mkgfs2_core::request::LOCKNAME_LEN;

/// Blocks described by one bitmap byte.
pub const GFS2_NBBY: u32 = 4;
pub const GFS2_BIT_SIZE: u32 = 2;
pub const GFS2_BIT_MASK: u8 = 0x03;

pub const GFS2_BLKST_FREE: u8 = 0;
pub const GFS2_BLKST_USED: u8 = 1;
pub const GFS2_BLKST_DINODE: u8 = 3;

pub const GFS2_METATYPE_SB: u32 = 1;
pub const GFS2_METATYPE_RG: u32 = 2;
pub const GFS2_METATYPE_RB: u32 = 3;
pub const GFS2_METATYPE_DI: u32 = 4;
pub const GFS2_METATYPE_IN: u32 = 5;
pub const GFS2_METATYPE_LF: u32 = 6;
pub const GFS2_METATYPE_JD: u32 = 7;
pub const GFS2_METATYPE_LH: u32 = 8;

pub const GFS2_FORMAT_SB: u32 = 100;
pub const GFS2_FORMAT_RG: u32 = 200;
pub const GFS2_FORMAT_RB: u32 = 300;
pub const GFS2_FORMAT_DI: u32 = 400;
pub const GFS2_FORMAT_IN: u32 = 500;
pub const GFS2_FORMAT_LF: u32 = 600;
pub const GFS2_FORMAT_JD: u32 = 700;
pub const GFS2_FORMAT_LH: u32 = 800;
pub const GFS2_FORMAT_DE: u32 = 1200;
pub const GFS2_FORMAT_FS: u32 = 1801;
pub const GFS2_FORMAT_MULTI: u32 = 1900;

pub const GFS2_DIF_JDATA: u32 = 0x0000_0001;
pub const GFS2_DIF_EXHASH: u32 = 0x0000_0002;
pub const GFS2_DIF_SYSTEM: u32 = 0x0000_0200;

pub const GFS2_LOG_HEAD_UNMOUNT: u32 = 0x0000_0001;

pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

pub const DT_DIR: u16 = 4;
pub const DT_REG: u16 = 8;

pub const META_HEADER_SIZE: usize = 24;
pub const SB_SIZE: usize = 272;
pub const RGRP_HEADER_SIZE: usize = 128;
pub const DINODE_SIZE: usize = 232;
pub const DIRENT_SIZE: usize = 40;
pub const LEAF_SIZE: usize = 104;
pub const RINDEX_SIZE: usize = 96;
pub const LOG_HEADER_SIZE: usize = 48;
pub const STATFS_CHANGE_SIZE: usize = 24;
pub const INUM_RANGE_SIZE: usize = 16;
pub const QUOTA_SIZE: usize = 88;

/// Formal inode number plus block address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inum {
    pub formal_ino: u64,
    pub addr: u64,
}

impl Inum {
    pub fn write(&self, buf: &mut [u8]) {
        BigEndian::write_u64(&mut buf[0..8], self.formal_ino);
        BigEndian::write_u64(&mut buf[8..16], self.addr);
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            formal_ino: BigEndian::read_u64(&buf[0..8]),
            addr: BigEndian::read_u64(&buf[8..16]),
        }
    }
}

pub fn write_meta_header(buf: &mut [u8], mh_type: u32, mh_format: u32) {
    BigEndian::write_u32(&mut buf[0..4], GFS2_MAGIC);
    BigEndian::write_u32(&mut buf[4..8], mh_type);
    BigEndian::write_u64(&mut buf[8..16], 0);
    BigEndian::write_u32(&mut buf[16..20], mh_format);
    BigEndian::write_u32(&mut buf[20..24], 0);
}

/// Metadata type of a block, if it carries a GFS2 header.
pub fn read_meta_type(buf: &[u8]) -> Option<u32> {
    if buf.len() < META_HEADER_SIZE || BigEndian::read_u32(&buf[0..4]) != GFS2_MAGIC {
        return None;
    }
    Some(BigEndian::read_u32(&buf[4..8]))
}

fn write_name(buf: &mut [u8], name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(GFS2_LOCKNAME_LEN - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf[n..GFS2_LOCKNAME_LEN].fill(0);
}

fn read_name(buf: &[u8]) -> String {
    let field = &buf[..GFS2_LOCKNAME_LEN];
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub fs_format: u32,
    pub multihost_format: u32,
    pub bsize: u32,
    pub bsize_shift: u32,
    pub master_dir: Inum,
    pub root_dir: Inum,
    pub lockproto: String,
    pub locktable: String,
    pub uuid: [u8; 16],
}

impl Superblock {
    pub fn write(&self, buf: &mut [u8]) {
        buf[..SB_SIZE].fill(0);
        write_meta_header(buf, GFS2_METATYPE_SB, GFS2_FORMAT_SB);
        BigEndian::write_u32(&mut buf[24..28], self.fs_format);
        BigEndian::write_u32(&mut buf[28..32], self.multihost_format);
        BigEndian::write_u32(&mut buf[36..40], self.bsize);
        BigEndian::write_u32(&mut buf[40..44], self.bsize_shift);
        self.master_dir.write(&mut buf[48..64]);
        self.root_dir.write(&mut buf[80..96]);
        write_name(&mut buf[96..160], &self.lockproto);
        write_name(&mut buf[160..224], &self.locktable);
        buf[256..272].copy_from_slice(&self.uuid);
    }

    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < SB_SIZE || read_meta_type(buf) != Some(GFS2_METATYPE_SB) {
            return None;
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[256..272]);
        Some(Self {
            fs_format: BigEndian::read_u32(&buf[24..28]),
            multihost_format: BigEndian::read_u32(&buf[28..32]),
            bsize: BigEndian::read_u32(&buf[36..40]),
            bsize_shift: BigEndian::read_u32(&buf[40..44]),
            master_dir: Inum::read(&buf[48..64]),
            root_dir: Inum::read(&buf[80..96]),
            lockproto: read_name(&buf[96..160]),
            locktable: read_name(&buf[160..224]),
            uuid,
        })
    }
}

/// Fixed part of an on-disk inode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dinode {
    pub num: Inum,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub goal_meta: u64,
    pub goal_data: u64,
    pub flags: u32,
    pub payload_format: u32,
    pub height: u16,
    pub depth: u16,
    pub entries: u32,
}

impl Dinode {
    pub fn write(&self, buf: &mut [u8]) {
        buf[..DINODE_SIZE].fill(0);
        write_meta_header(buf, GFS2_METATYPE_DI, GFS2_FORMAT_DI);
        self.num.write(&mut buf[24..40]);
        BigEndian::write_u32(&mut buf[40..44], self.mode);
        BigEndian::write_u32(&mut buf[52..56], self.nlink);
        BigEndian::write_u64(&mut buf[56..64], self.size);
        BigEndian::write_u64(&mut buf[64..72], self.blocks);
        BigEndian::write_u64(&mut buf[72..80], self.atime);
        BigEndian::write_u64(&mut buf[80..88], self.mtime);
        BigEndian::write_u64(&mut buf[88..96], self.ctime);
        BigEndian::write_u64(&mut buf[104..112], self.goal_meta);
        BigEndian::write_u64(&mut buf[112..120], self.goal_data);
        BigEndian::write_u32(&mut buf[128..132], self.flags);
        BigEndian::write_u32(&mut buf[132..136], self.payload_format);
        BigEndian::write_u16(&mut buf[138..140], self.height);
        BigEndian::write_u16(&mut buf[146..148], self.depth);
        BigEndian::write_u32(&mut buf[148..152], self.entries);
    }

    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < DINODE_SIZE || read_meta_type(buf) != Some(GFS2_METATYPE_DI) {
            return None;
        }
        Some(Self {
            num: Inum::read(&buf[24..40]),
            mode: BigEndian::read_u32(&buf[40..44]),
            nlink: BigEndian::read_u32(&buf[52..56]),
            size: BigEndian::read_u64(&buf[56..64]),
            blocks: BigEndian::read_u64(&buf[64..72]),
            atime: BigEndian::read_u64(&buf[72..80]),
            mtime: BigEndian::read_u64(&buf[80..88]),
            ctime: BigEndian::read_u64(&buf[88..96]),
            goal_meta: BigEndian::read_u64(&buf[104..112]),
            goal_data: BigEndian::read_u64(&buf[112..120]),
            flags: BigEndian::read_u32(&buf[128..132]),
            payload_format: BigEndian::read_u32(&buf[132..136]),
            height: BigEndian::read_u16(&buf[138..140]),
            depth: BigEndian::read_u16(&buf[146..148]),
            entries: BigEndian::read_u32(&buf[148..152]),
        })
    }
}

pub fn write_rgrp_header(buf: &mut [u8], free: u32, dinodes: u32) {
    buf[..RGRP_HEADER_SIZE].fill(0);
    write_meta_header(buf, GFS2_METATYPE_RG, GFS2_FORMAT_RG);
    BigEndian::write_u32(&mut buf[28..32], free);
    BigEndian::write_u32(&mut buf[32..36], dinodes);
}

/// `(free, dinodes)` of a resource group header.
pub fn read_rgrp_header(buf: &[u8]) -> Option<(u32, u32)> {
    if read_meta_type(buf) != Some(GFS2_METATYPE_RG) {
        return None;
    }
    Some((BigEndian::read_u32(&buf[28..32]), BigEndian::read_u32(&buf[32..36])))
}

pub fn write_rindex_entry(buf: &mut [u8], rg: &mkgfs2_core::ResourceGroupExtent) {
    buf[..RINDEX_SIZE].fill(0);
    BigEndian::write_u64(&mut buf[0..8], rg.addr);
    BigEndian::write_u32(&mut buf[8..12], rg.length);
    BigEndian::write_u64(&mut buf[16..24], rg.data0);
    BigEndian::write_u32(&mut buf[24..28], rg.data);
    BigEndian::write_u32(&mut buf[28..32], rg.bitbytes);
}

pub fn write_dirent(buf: &mut [u8], inum: Inum, hash: u32, rec_len: u16, name: &str, de_type: u16) {
    buf[..DIRENT_SIZE].fill(0);
    inum.write(&mut buf[0..16]);
    BigEndian::write_u32(&mut buf[16..20], hash);
    BigEndian::write_u16(&mut buf[20..22], rec_len);
    BigEndian::write_u16(&mut buf[22..24], name.len() as u16);
    BigEndian::write_u16(&mut buf[24..26], de_type);
    buf[DIRENT_SIZE..DIRENT_SIZE + name.len()].copy_from_slice(name.as_bytes());
}

pub fn write_leaf_header(buf: &mut [u8], depth: u16, entries: u16, next: u64) {
    buf[..LEAF_SIZE].fill(0);
    write_meta_header(buf, GFS2_METATYPE_LF, GFS2_FORMAT_LF);
    BigEndian::write_u16(&mut buf[24..26], depth);
    BigEndian::write_u16(&mut buf[26..28], entries);
    BigEndian::write_u32(&mut buf[28..32], GFS2_FORMAT_DE);
    BigEndian::write_u64(&mut buf[32..40], next);
}

/// Log header with its hash computed over the header itself.
pub fn write_log_header(buf: &mut [u8], sequence: u64, flags: u32, blkno: u32) {
    buf[..LOG_HEADER_SIZE].fill(0);
    write_meta_header(buf, GFS2_METATYPE_LH, GFS2_FORMAT_LH);
    BigEndian::write_u64(&mut buf[24..32], sequence);
    BigEndian::write_u32(&mut buf[32..36], flags);
    BigEndian::write_u32(&mut buf[40..44], blkno);
    let hash = disk_hash(&buf[..LOG_HEADER_SIZE]);
    BigEndian::write_u32(&mut buf[44..48], hash);
}

pub fn statfs_change(total: u64, free: u64, dinodes: u64) -> [u8; STATFS_CHANGE_SIZE] {
    let mut buf = [0u8; STATFS_CHANGE_SIZE];
    BigEndian::write_u64(&mut buf[0..8], total);
    BigEndian::write_u64(&mut buf[8..16], free);
    BigEndian::write_u64(&mut buf[16..24], dinodes);
    buf
}

pub fn quota(limit: u64, warn: u64, value: i64) -> [u8; QUOTA_SIZE] {
    let mut buf = [0u8; QUOTA_SIZE];
    BigEndian::write_u64(&mut buf[0..8], limit);
    BigEndian::write_u64(&mut buf[8..16], warn);
    BigEndian::write_i64(&mut buf[16..24], value);
    buf
}

/// Hash used for directory entries and log headers (CRC32, IEEE polynomial).
pub fn disk_hash(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
