// Integration tests for the complete build → read back → verify cycle

use byteorder::{BigEndian, ByteOrder};
use mkgfs2_core::sequencer::build_filesystem;
use mkgfs2_core::test_utils::MemDevice;
use mkgfs2_core::validate::validate;
use mkgfs2_core::{
    BuildContext, FilesystemLayout, FormatRequest, GeometryProbe, LayoutCalculator, LockName, ModeFlags,
    RequestArgs,
};
use mkgfs2_filesystems::ondisk::{
    read_meta_type, Dinode, Superblock, DINODE_SIZE, GFS2_DIF_EXHASH, GFS2_METATYPE_LF, LEAF_SIZE, RINDEX_SIZE,
};
use mkgfs2_filesystems::Gfs2Structures;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn request(bsize: u32, journals: u32) -> FormatRequest {
    let mut args = RequestArgs::default().with_device("/dev/mem");
    args.block_size = bsize;
    args.journals = journals;
    args.journal_size_mb = 8;
    args.rgsize_mb = 32;
    args.lockproto = LockName::protocol("lock_dlm").unwrap();
    args.locktable = LockName::table("alpha:gfs0").unwrap();
    args.flags = ModeFlags { override_confirmation: true, ..ModeFlags::default() };
    validate(args, &Gfs2Structures::new()).unwrap()
}

/// Formats an in-memory device of `bytes` bytes, returning its contents.
fn format(request: &FormatRequest, bytes: usize) -> (Vec<u8>, FilesystemLayout) {
    let mut device = MemDevice::zeroed("/dev/mem", bytes);
    let handle = device.clone();
    let mut structures = Gfs2Structures::new();

    let geometry = structures.device_geometry(&mut device).unwrap();
    let geometry = GeometryProbe::<MemDevice>::fix_device_geometry(&mut structures, geometry, request.block_size())
        .unwrap();
    let layout = structures
        .compute_rgrp_layout(&geometry, request.block_size(), request.rgsize_mb())
        .unwrap();

    let ctx = BuildContext { request, layout: &layout };
    build_filesystem(&mut structures, device, &ctx).unwrap();
    (handle.contents(), layout)
}

struct Image<'a> {
    data: &'a [u8],
    bsize: usize,
}

impl<'a> Image<'a> {
    fn block(&self, blkno: u64) -> &'a [u8] {
        let start = blkno as usize * self.bsize;
        &self.data[start..start + self.bsize]
    }

    fn dinode(&self, blkno: u64) -> Dinode {
        Dinode::read(self.block(blkno)).unwrap()
    }

    /// Names in a directory, in on-disk order.
    fn list(&self, blkno: u64) -> Vec<String> {
        let di = self.dinode(blkno);
        let block = self.block(blkno);
        if di.flags & GFS2_DIF_EXHASH == 0 {
            return dirents(&block[DINODE_SIZE..]);
        }
        let mut names = Vec::new();
        let mut leaf = BigEndian::read_u64(&block[DINODE_SIZE..DINODE_SIZE + 8]);
        while leaf != 0 {
            let data = self.block(leaf);
            assert_eq!(read_meta_type(data), Some(GFS2_METATYPE_LF));
            names.extend(dirents(&data[LEAF_SIZE..]));
            leaf = BigEndian::read_u64(&data[32..40]);
        }
        names
    }

    fn lookup(&self, dir: u64, name: &str) -> Option<u64> {
        let di = self.dinode(dir);
        let block = self.block(dir);
        let mut regions = Vec::new();
        if di.flags & GFS2_DIF_EXHASH == 0 {
            regions.push(&block[DINODE_SIZE..]);
        } else {
            let mut leaf = BigEndian::read_u64(&block[DINODE_SIZE..DINODE_SIZE + 8]);
            while leaf != 0 {
                let data = self.block(leaf);
                regions.push(&data[LEAF_SIZE..]);
                leaf = BigEndian::read_u64(&data[32..40]);
            }
        }
        for region in regions {
            let mut off = 0;
            while off < region.len() {
                let rec_len = BigEndian::read_u16(&region[off + 20..off + 22]) as usize;
                let name_len = BigEndian::read_u16(&region[off + 22..off + 24]) as usize;
                if &region[off + 40..off + 40 + name_len] == name.as_bytes() {
                    return Some(BigEndian::read_u64(&region[off + 8..off + 16]));
                }
                off += rec_len;
            }
        }
        None
    }
}

fn dirents(region: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut off = 0;
    while off < region.len() {
        let rec_len = BigEndian::read_u16(&region[off + 20..off + 22]) as usize;
        let name_len = BigEndian::read_u16(&region[off + 22..off + 24]) as usize;
        assert!(rec_len >= 40 + name_len, "record at {} is too short", off);
        names.push(String::from_utf8_lossy(&region[off + 40..off + 40 + name_len]).into_owned());
        off += rec_len;
    }
    names
}

#[test]
fn master_directory_holds_the_system_files() {
    init();
    let request = request(4096, 2);
    let (data, _) = format(&request, 64 << 20);
    let image = Image { data: &data, bsize: 4096 };
    let sb = Superblock::read(&data[65536..]).unwrap();

    assert_eq!(sb.locktable, "alpha:gfs0");
    assert_eq!(
        image.list(sb.master_dir.addr),
        vec![".", "..", "jindex", "per_node", "inum", "statfs", "rindex", "quota"]
    );
    assert_eq!(image.list(sb.root_dir.addr), vec![".", ".."]);

    let jindex = image.lookup(sb.master_dir.addr, "jindex").unwrap();
    assert_eq!(image.list(jindex), vec![".", "..", "journal0", "journal1"]);

    let per_node = image.lookup(sb.master_dir.addr, "per_node").unwrap();
    let names = image.list(per_node);
    for j in 0..2 {
        for file in ["inum_range", "statfs_change", "unlinked_tag", "quota_change"] {
            assert!(names.contains(&format!("{}{}", file, j)), "missing {}{}", file, j);
        }
    }
}

#[test]
fn journals_have_the_requested_size() {
    init();
    let request = request(4096, 1);
    let (data, _) = format(&request, 64 << 20);
    let image = Image { data: &data, bsize: 4096 };
    let sb = Superblock::read(&data[65536..]).unwrap();

    let jindex = image.lookup(sb.master_dir.addr, "jindex").unwrap();
    let journal = image.dinode(image.lookup(jindex, "journal0").unwrap());
    assert_eq!(journal.size, 8 << 20);
    // 2048 data blocks plus 5 indirect blocks and the dinode
    assert_eq!(journal.blocks, 2048 + 5 + 1);
    assert_eq!(journal.height, 2);
}

#[test]
fn rindex_describes_every_resource_group() {
    init();
    let request = request(4096, 1);
    let (data, layout) = format(&request, 256 << 20);
    let image = Image { data: &data, bsize: 4096 };
    let sb = Superblock::read(&data[65536..]).unwrap();

    let rindex_addr = image.lookup(sb.master_dir.addr, "rindex").unwrap();
    let rindex = image.dinode(rindex_addr);
    assert_eq!(rindex.size as usize, layout.rgrps.len() * RINDEX_SIZE);
    assert_eq!(rindex.height, 0);

    let entries = &image.block(rindex_addr)[DINODE_SIZE..];
    for (i, rg) in layout.rgrps.iter().enumerate() {
        let entry = &entries[i * RINDEX_SIZE..(i + 1) * RINDEX_SIZE];
        assert_eq!(BigEndian::read_u64(&entry[0..8]), rg.addr);
        assert_eq!(BigEndian::read_u64(&entry[16..24]), rg.data0);
        assert_eq!(BigEndian::read_u32(&entry[24..28]), rg.data);
    }
}

#[test]
fn small_blocks_use_leaf_directories() {
    init();
    let request = request(512, 3);
    let (data, _) = format(&request, 64 << 20);
    let image = Image { data: &data, bsize: 512 };
    let sb = Superblock::read(&data[65536..]).unwrap();

    let master = image.dinode(sb.master_dir.addr);
    assert_eq!(master.flags & GFS2_DIF_EXHASH, GFS2_DIF_EXHASH);
    assert_eq!(image.list(sb.master_dir.addr).len(), 8);

    let per_node = image.lookup(sb.master_dir.addr, "per_node").unwrap();
    assert_eq!(image.list(per_node).len(), 2 + 3 * 4);
    assert!(image.lookup(per_node, "quota_change2").is_some());
}
