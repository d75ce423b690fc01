use log::{debug, info};
use mkgfs2_core::BlockDevice;
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

/// A block device or image file opened for formatting.
///
/// Block devices are opened with `O_EXCL`, which on Linux fails while the
/// device is mounted or otherwise claimed.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    is_block: bool,
}

impl FileDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let is_block = std::fs::metadata(path)?.file_type().is_block_device();
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if is_block {
            options.custom_flags(OFlag::O_EXCL.bits());
        }
        let file = options.open(path)?;
        info!("Opened {} ({})", path.display(), if is_block { "block device" } else { "image file" });
        Ok(Self {
            path: path.to_path_buf(),
            file,
            is_block,
        })
    }

    pub fn is_block_device(&self) -> bool {
        self.is_block
    }
}

impl BlockDevice for FileDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(target_os = "linux")]
    fn probe_size(&mut self) -> io::Result<u64> {
        if self.is_block {
            return crate::linux::block_device_size(&self.file);
        }
        Ok(self.file.metadata()?.len())
    }

    #[cfg(not(target_os = "linux"))]
    fn probe_size(&mut self) -> io::Result<u64> {
        use std::io::{Seek, SeekFrom};
        if self.is_block {
            return self.file.seek(SeekFrom::End(0));
        }
        Ok(self.file.metadata()?.len())
    }

    fn sync_all(&mut self) -> io::Result<()> {
        debug!("fsync {}", self.path.display());
        self.file.sync_all()
    }

    fn close(self) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        nix::unistd::close(fd).map_err(io::Error::from)
    }
}
