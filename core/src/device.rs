use std::io;
use std::path::Path;

/// An open, exclusively owned target device.
///
/// Offsets are absolute byte offsets. `close` consumes the handle so a device
/// cannot be touched after it has been released; dropping a handle without
/// calling `close` must still release the underlying descriptor.
pub trait BlockDevice {
    fn path(&self) -> &Path;

    /// Reads exactly `buf.len()` bytes at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Total addressable size in bytes.
    fn probe_size(&mut self) -> io::Result<u64>;

    fn sync_all(&mut self) -> io::Result<()>;

    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}
