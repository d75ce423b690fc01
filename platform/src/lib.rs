// Platform device access for gfs2_mkfs

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(unix)]
pub mod device;

#[cfg(unix)]
pub use device::FileDevice;
