// Linux block device queries

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

// BLKGETSIZE64: _IOR(0x12, 114, size_t)
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Size in bytes of the block device behind `file`.
pub fn block_device_size(file: &File) -> io::Result<u64> {
    let mut size = 0u64;
    // SAFETY: the descriptor is open for the lifetime of `file` and `size`
    // is a valid u64 the kernel writes into.
    unsafe { blkgetsize64(file.as_raw_fd(), &mut size) }.map_err(io::Error::from)?;
    Ok(size)
}
