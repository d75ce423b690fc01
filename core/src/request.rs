// Format request: raw arguments as parsed, and the frozen validated request

use crate::MkfsError;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Size of the on-disk lock protocol and lock table fields, including the terminator.
pub const LOCKNAME_LEN: usize = 64;

pub const DEFAULT_BSIZE: u32 = 4096;
pub const DEFAULT_JSIZE: u32 = 128;
pub const DEFAULT_JOURNALS: u32 = 1;
pub const DEFAULT_RGSIZE: u32 = 256;
pub const DEFAULT_UTSIZE: u32 = 1;
pub const DEFAULT_QCSIZE: u32 = 1;
pub const DEFAULT_LOCKPROTO: &str = "lock_dlm";

/// A lock protocol or lock table name that fits the on-disk field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockName(String);

impl LockName {
    /// A lock protocol name such as `lock_dlm`.
    pub fn protocol(name: impl Into<String>) -> Result<Self, MkfsError> {
        Self::checked("lock protocol", name.into())
    }

    /// A lock table name of the form `cluster:fsname`.
    pub fn table(name: impl Into<String>) -> Result<Self, MkfsError> {
        Self::checked("lock table", name.into())
    }

    fn checked(what: &'static str, name: String) -> Result<Self, MkfsError> {
        if name.len() >= LOCKNAME_LEN {
            return Err(MkfsError::LockNameTooLong { what, name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub debug: bool,
    pub quiet: bool,
    /// Skip the confirmation prompt (`-O`); this is also the non-interactive mode.
    pub override_confirmation: bool,
    pub expert: bool,
}

/// Arguments exactly as the user supplied them, before validation.
#[derive(Debug, Clone)]
pub struct RequestArgs {
    pub block_size: u32,
    pub journal_size_mb: u32,
    pub journals: u32,
    pub rgsize_mb: u32,
    pub utsize_mb: u32,
    pub qcsize_mb: u32,
    pub lockproto: LockName,
    pub locktable: LockName,
    /// Every positional argument, in order.
    pub devices: Vec<PathBuf>,
    pub flags: ModeFlags,
}

impl Default for RequestArgs {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BSIZE,
            journal_size_mb: DEFAULT_JSIZE,
            journals: DEFAULT_JOURNALS,
            rgsize_mb: DEFAULT_RGSIZE,
            utsize_mb: DEFAULT_UTSIZE,
            qcsize_mb: DEFAULT_QCSIZE,
            lockproto: LockName(DEFAULT_LOCKPROTO.to_string()),
            locktable: LockName::default(),
            devices: Vec::new(),
            flags: ModeFlags::default(),
        }
    }
}

impl RequestArgs {
    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.devices.push(device.into());
        self
    }
}

/// A validated request. Only [`crate::validate::validate`] produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub(crate) block_size: u32,
    pub(crate) journal_size_mb: u32,
    pub(crate) journals: u32,
    pub(crate) rgsize_mb: u32,
    pub(crate) utsize_mb: u32,
    pub(crate) qcsize_mb: u32,
    pub(crate) lockproto: LockName,
    pub(crate) locktable: LockName,
    pub(crate) device: PathBuf,
    pub(crate) flags: ModeFlags,
}

impl FormatRequest {
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn journal_size_mb(&self) -> u32 {
        self.journal_size_mb
    }

    pub fn journals(&self) -> u32 {
        self.journals
    }

    pub fn rgsize_mb(&self) -> u32 {
        self.rgsize_mb
    }

    pub fn utsize_mb(&self) -> u32 {
        self.utsize_mb
    }

    pub fn qcsize_mb(&self) -> u32 {
        self.qcsize_mb
    }

    pub fn lockproto(&self) -> &LockName {
        &self.lockproto
    }

    pub fn locktable(&self) -> &LockName {
        &self.locktable
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// Debug-mode echo of the request.
    pub fn write_echo<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Command Line Arguments:")?;
        writeln!(out, "  bsize = {}", self.block_size)?;
        writeln!(out, "  qcsize = {}", self.qcsize_mb)?;
        writeln!(out, "  jsize = {}", self.journal_size_mb)?;
        writeln!(out, "  journals = {}", self.journals)?;
        writeln!(out, "  override = {}", u8::from(self.flags.override_confirmation))?;
        writeln!(out, "  proto = {}", self.lockproto)?;
        writeln!(out, "  quiet = {}", u8::from(self.flags.quiet))?;
        writeln!(out, "  rgsize = {}", self.rgsize_mb)?;
        writeln!(out, "  table = {}", self.locktable)?;
        writeln!(out, "  utsize = {}", self.utsize_mb)?;
        writeln!(out, "  device = {}", self.device.display())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_name_must_leave_room_for_terminator() {
        assert!(LockName::protocol("a".repeat(LOCKNAME_LEN - 1)).is_ok());

        let err = LockName::protocol("a".repeat(LOCKNAME_LEN)).unwrap_err();
        assert!(matches!(err, MkfsError::LockNameTooLong { what: "lock protocol", .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn too_long_messages_name_the_field() {
        let table = LockName::table("t".repeat(LOCKNAME_LEN)).unwrap_err().to_string();
        assert!(table.starts_with("lock table name ttt"), "{}", table);

        let proto = LockName::protocol("p".repeat(LOCKNAME_LEN + 3)).unwrap_err().to_string();
        assert!(proto.starts_with("lock protocol name ppp"), "{}", proto);
        assert!(proto.contains("is too long"));
    }

    #[test]
    fn lock_name_displays_its_text() {
        let name = LockName::protocol("lock_nolock").unwrap();
        assert_eq!(name.as_str(), "lock_nolock");
        assert_eq!(name.to_string(), "lock_nolock");
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let args = RequestArgs::default();
        assert_eq!(args.block_size, 4096);
        assert_eq!(args.journal_size_mb, 128);
        assert_eq!(args.journals, 1);
        assert_eq!(args.rgsize_mb, 256);
        assert_eq!(args.utsize_mb, 1);
        assert_eq!(args.qcsize_mb, 1);
        assert_eq!(args.lockproto.as_str(), "lock_dlm");
        assert!(args.locktable.as_str().is_empty());
        assert!(args.devices.is_empty());
    }
}
