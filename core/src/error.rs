use crate::request::LOCKNAME_LEN;
use crate::sequencer::BuildStep;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the structures library behind the collaborator traits.
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("no space left: {0}")]
    NoSpace(String),

    #[error("device is way too small ({basic_blocks} basic blocks)")]
    DeviceTooSmall { basic_blocks: u64 },

    #[error("{0} must be built first")]
    OutOfOrder(&'static str),

    #[error("{0}")]
    Locking(String),

    #[error("{0}")]
    Invalid(String),
}

/// Coarse classification of a [`MkfsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Aborted,
    Console,
    Device,
    Construction,
    Finalization,
}

#[derive(Debug, Error)]
pub enum MkfsError {
    #[error("no device specified (try -h for help)")]
    NoDevice,

    #[error("more than one device specified (try -h for help)")]
    MultipleDevices,

    #[error("{what} name {name} is too long (must be shorter than {} bytes)", LOCKNAME_LEN)]
    LockNameTooLong { what: &'static str, name: String },

    #[error("{0}")]
    LockIncompatible(#[source] StructureError),

    #[error("block size must be a power of two between 512 and 65536 (got {0})")]
    InvalidBlockSize(u32),

    #[error("bad resource group size ({0} MB)")]
    InvalidResourceGroupSize(u32),

    #[error("no journals specified")]
    NoJournals,

    #[error("bad journal size ({0} MB)")]
    InvalidJournalSize(u32),

    #[error("bad unlinked size ({0} MB)")]
    InvalidUnlinkedSize(u32),

    #[error("bad quota change size ({0} MB)")]
    InvalidQuotaChangeSize(u32),

    #[error("can't open device {}: {source}", .device.display())]
    DeviceOpen { device: PathBuf, source: io::Error },

    #[error("error identifying the contents of {}: {source}", .device.display())]
    Identify { device: PathBuf, source: io::Error },

    #[error("console I/O failed: {0}")]
    Console(#[source] io::Error),

    #[error("aborted")]
    Aborted,

    #[error("can't determine the geometry of {}: {source}", .device.display())]
    Geometry { device: PathBuf, source: StructureError },

    #[error("inconsistent layout for {}: {reason}", .device.display())]
    Layout { device: PathBuf, reason: String },

    #[error("error building {step}: {source}")]
    Build { step: BuildStep, source: StructureError },

    #[error("error releasing the {what} inode: {source}")]
    Release { what: &'static str, source: StructureError },

    #[error("error flushing buffers to {}: {source}", .device.display())]
    Flush { device: PathBuf, source: StructureError },

    #[error("can't fsync device {}: {source}", .device.display())]
    Sync { device: PathBuf, source: io::Error },

    #[error("error closing device {}: {source}", .device.display())]
    Close { device: PathBuf, source: io::Error },
}

impl MkfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MkfsError::NoDevice
            | MkfsError::MultipleDevices
            | MkfsError::LockNameTooLong { .. }
            | MkfsError::LockIncompatible(_) => ErrorKind::Configuration,
            MkfsError::InvalidBlockSize(_)
            | MkfsError::InvalidResourceGroupSize(_)
            | MkfsError::NoJournals
            | MkfsError::InvalidJournalSize(_)
            | MkfsError::InvalidUnlinkedSize(_)
            | MkfsError::InvalidQuotaChangeSize(_) => ErrorKind::Validation,
            MkfsError::Aborted => ErrorKind::Aborted,
            MkfsError::Console(_) => ErrorKind::Console,
            MkfsError::DeviceOpen { .. }
            | MkfsError::Identify { .. }
            | MkfsError::Geometry { .. }
            | MkfsError::Layout { .. } => ErrorKind::Device,
            MkfsError::Build { .. } => ErrorKind::Construction,
            MkfsError::Release { .. }
            | MkfsError::Flush { .. }
            | MkfsError::Sync { .. }
            | MkfsError::Close { .. } => ErrorKind::Finalization,
        }
    }
}
