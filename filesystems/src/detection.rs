// Content detection: recognizes what a device currently holds

use crate::ondisk::{GFS2_FORMAT_FS, GFS2_MAGIC, GFS2_METATYPE_SB, GFS_FORMAT_FS};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;
use mkgfs2_core::BlockDevice;
use std::io;

/// Bytes read from the start of the device for detection.
pub const DETECTION_BYTES: u64 = 128 << 10;

/// Trait for signature-based content detection
pub trait ContentDetector {
    /// Check whether the leading bytes of a device match this format
    ///
    /// # Parameters
    /// - `head`: up to [`DETECTION_BYTES`] from offset 0; may be shorter on
    ///   small devices, so every offset must be bounds checked
    ///
    /// # Returns
    /// - `Some(description)` such as "GFS2 filesystem"
    /// - `None` if the signature is absent
    fn detect(head: &[u8]) -> Option<String>;
}

fn bytes_at<'a>(head: &'a [u8], offset: usize, len: usize) -> Option<&'a [u8]> {
    head.get(offset..offset + len)
}

fn has_signature(head: &[u8], offset: usize, sig: &[u8]) -> bool {
    bytes_at(head, offset, sig.len()) == Some(sig)
}

const GFS_SB_OFFSET: usize = 65536;

pub struct GfsDetector;

impl ContentDetector for GfsDetector {
    fn detect(head: &[u8]) -> Option<String> {
        let sb = bytes_at(head, GFS_SB_OFFSET, 32)?;
        if BigEndian::read_u32(&sb[0..4]) != GFS2_MAGIC || BigEndian::read_u32(&sb[4..8]) != GFS2_METATYPE_SB {
            return None;
        }
        match BigEndian::read_u32(&sb[24..28]) {
            GFS2_FORMAT_FS => Some("GFS2 filesystem".to_string()),
            GFS_FORMAT_FS => Some("GFS filesystem".to_string()),
            _ => None,
        }
    }
}

pub struct ExtDetector;

impl ContentDetector for ExtDetector {
    fn detect(head: &[u8]) -> Option<String> {
        // Superblock at byte 1024, magic at offset 56
        let sb = bytes_at(head, 1024, 104)?;
        if LittleEndian::read_u16(&sb[56..58]) != 0xEF53 {
            return None;
        }
        let compat = LittleEndian::read_u32(&sb[92..96]);
        let incompat = LittleEndian::read_u32(&sb[96..100]);
        let name = if incompat & 0x0040 != 0 {
            "ext4"
        } else if compat & 0x0004 != 0 {
            "ext3"
        } else {
            "ext2"
        };
        Some(format!("{} filesystem", name))
    }
}

pub struct XfsDetector;

impl ContentDetector for XfsDetector {
    fn detect(head: &[u8]) -> Option<String> {
        has_signature(head, 0, b"XFSB").then(|| "XFS filesystem".to_string())
    }
}

pub struct BtrfsDetector;

impl ContentDetector for BtrfsDetector {
    fn detect(head: &[u8]) -> Option<String> {
        has_signature(head, 65536 + 64, b"_BHRfS_M").then(|| "btrfs filesystem".to_string())
    }
}

pub struct LvmDetector;

impl ContentDetector for LvmDetector {
    fn detect(head: &[u8]) -> Option<String> {
        // The label may sit in any of the first four sectors
        (0..4)
            .map(|sector| sector * 512)
            .any(|off| has_signature(head, off, b"LABELONE") && has_signature(head, off + 24, b"LVM2 001"))
            .then(|| "LVM2 physical volume".to_string())
    }
}

pub struct SwapDetector;

impl ContentDetector for SwapDetector {
    fn detect(head: &[u8]) -> Option<String> {
        for page in [4096usize, 8192, 16384, 65536] {
            if has_signature(head, page - 10, b"SWAPSPACE2") || has_signature(head, page - 10, b"SWAP-SPACE") {
                return Some("swap device".to_string());
            }
        }
        None
    }
}

pub struct NtfsDetector;

impl ContentDetector for NtfsDetector {
    fn detect(head: &[u8]) -> Option<String> {
        has_signature(head, 3, b"NTFS    ").then(|| "NTFS filesystem".to_string())
    }
}

pub struct FatDetector;

impl ContentDetector for FatDetector {
    fn detect(head: &[u8]) -> Option<String> {
        if !has_signature(head, 510, &[0x55, 0xAA]) {
            return None;
        }
        if has_signature(head, 82, b"FAT32   ") {
            return Some("FAT32 filesystem".to_string());
        }
        if has_signature(head, 54, b"FAT12   ") || has_signature(head, 54, b"FAT16   ") {
            return Some("FAT filesystem".to_string());
        }
        None
    }
}

pub struct PartitionTableDetector;

impl ContentDetector for PartitionTableDetector {
    fn detect(head: &[u8]) -> Option<String> {
        if has_signature(head, 512, b"EFI PART") {
            return Some("GPT partition table".to_string());
        }
        has_signature(head, 510, &[0x55, 0xAA]).then(|| "DOS partition table".to_string())
    }
}

/// Runs every detector over `head`, most specific first.
pub fn detect_content(head: &[u8]) -> Option<String> {
    GfsDetector::detect(head)
        .or_else(|| ExtDetector::detect(head))
        .or_else(|| XfsDetector::detect(head))
        .or_else(|| BtrfsDetector::detect(head))
        .or_else(|| LvmDetector::detect(head))
        .or_else(|| SwapDetector::detect(head))
        .or_else(|| NtfsDetector::detect(head))
        .or_else(|| FatDetector::detect(head))
        .or_else(|| PartitionTableDetector::detect(head))
}

/// Reads the leading bytes of `device` for detection.
pub fn read_detection_data<D: BlockDevice>(device: &mut D) -> io::Result<Vec<u8>> {
    let len = device.probe_size()?.min(DETECTION_BYTES);
    let mut head = vec![0u8; len as usize];
    device.read_at(0, &mut head)?;
    Ok(head)
}

/// Describes the contents of `device`, `None` when nothing is recognized.
pub fn identify_device<D: BlockDevice>(device: &mut D) -> io::Result<Option<String>> {
    let head = read_detection_data(device)?;
    let found = detect_content(&head);
    debug!("Contents of {}: {:?}", device.path().display(), found);
    Ok(found)
}
