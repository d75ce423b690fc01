// Parameter validation. Runs before the device is opened.

use crate::request::{FormatRequest, RequestArgs};
use crate::structures::LockingCheck;
use crate::MkfsError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MIN_BSIZE: u32 = 512;
pub const MAX_BSIZE: u32 = 65536;
pub const MAX_RGSIZE: u32 = 2048;
pub const MIN_RGSIZE: u32 = 32;
pub const MIN_RGSIZE_EXPERT: u32 = 1;
pub const MIN_JSIZE: u32 = 8;
pub const MAX_JSIZE: u32 = 1024;
pub const MAX_UTSIZE: u32 = 64;
pub const MAX_QCSIZE: u32 = 64;

/// Positional argument passed through by the generic `mkfs -t gfs2` front end.
const FSTYPE_ARG: &str = "gfs2";

pub fn is_valid_block_size(bsize: u32) -> bool {
    bsize.is_power_of_two() && (MIN_BSIZE..=MAX_BSIZE).contains(&bsize)
}

/// Picks the single device out of the positional arguments.
pub fn resolve_device(positional: &[PathBuf]) -> Result<PathBuf, MkfsError> {
    let mut devices = positional
        .iter()
        .filter(|arg| arg.as_path() != Path::new(FSTYPE_ARG));

    let device = devices.next().ok_or(MkfsError::NoDevice)?;
    if devices.next().is_some() {
        return Err(MkfsError::MultipleDevices);
    }
    Ok(device.clone())
}

/// Validates `args` against the structural limits and freezes them.
pub fn validate<L>(args: RequestArgs, locking: &L) -> Result<FormatRequest, MkfsError>
where
    L: LockingCheck + ?Sized,
{
    let device = resolve_device(&args.devices)?;
    let flags = args.flags;

    if !flags.expert {
        locking
            .check_locking(args.lockproto.as_str(), args.locktable.as_str())
            .map_err(MkfsError::LockIncompatible)?;
    }

    if !is_valid_block_size(args.block_size) {
        return Err(MkfsError::InvalidBlockSize(args.block_size));
    }

    let min_rgsize = if flags.expert { MIN_RGSIZE_EXPERT } else { MIN_RGSIZE };
    if !(min_rgsize..=MAX_RGSIZE).contains(&args.rgsize_mb) {
        return Err(MkfsError::InvalidResourceGroupSize(args.rgsize_mb));
    }

    if args.journals == 0 {
        return Err(MkfsError::NoJournals);
    }

    if !(MIN_JSIZE..=MAX_JSIZE).contains(&args.journal_size_mb) {
        return Err(MkfsError::InvalidJournalSize(args.journal_size_mb));
    }

    if !(1..=MAX_UTSIZE).contains(&args.utsize_mb) {
        return Err(MkfsError::InvalidUnlinkedSize(args.utsize_mb));
    }

    if !(1..=MAX_QCSIZE).contains(&args.qcsize_mb) {
        return Err(MkfsError::InvalidQuotaChangeSize(args.qcsize_mb));
    }

    debug!(device = %device.display(), bsize = args.block_size, "arguments validated");

    Ok(FormatRequest {
        block_size: args.block_size,
        journal_size_mb: args.journal_size_mb,
        journals: args.journals,
        rgsize_mb: args.rgsize_mb,
        utsize_mb: args.utsize_mb,
        qcsize_mb: args.qcsize_mb,
        lockproto: args.lockproto,
        locktable: args.locktable,
        device,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructureError;
    use crate::request::LockName;
    use crate::ErrorKind;
    use std::cell::Cell;

    struct AnyLocking;

    impl LockingCheck for AnyLocking {
        fn check_locking(&self, _: &str, _: &str) -> Result<(), StructureError> {
            Ok(())
        }
    }

    struct RejectLocking {
        calls: Cell<usize>,
    }

    impl LockingCheck for RejectLocking {
        fn check_locking(&self, proto: &str, _: &str) -> Result<(), StructureError> {
            self.calls.set(self.calls.get() + 1);
            Err(StructureError::Locking(format!("lockproto error: {} unknown", proto)))
        }
    }

    fn args() -> RequestArgs {
        RequestArgs::default().with_device("/dev/test")
    }

    fn check(args: RequestArgs) -> Result<FormatRequest, MkfsError> {
        validate(args, &AnyLocking)
    }

    #[test]
    fn accepts_defaults() {
        let request = check(args()).unwrap();
        assert_eq!(request.block_size(), 4096);
        assert_eq!(request.device(), Path::new("/dev/test"));
    }

    #[test]
    fn block_size_must_be_a_power_of_two_in_range() {
        for bsize in [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536] {
            let mut a = args();
            a.block_size = bsize;
            assert!(check(a).is_ok(), "block size {} should pass", bsize);
        }
        for bsize in [0, 1, 256, 511, 513, 3000, 4095, 65535, 65537, 131072] {
            let mut a = args();
            a.block_size = bsize;
            assert!(
                matches!(check(a), Err(MkfsError::InvalidBlockSize(b)) if b == bsize),
                "block size {} should fail",
                bsize
            );
        }
    }

    #[test]
    fn resource_group_size_bounds_depend_on_expert_mode() {
        let rg = |size: u32, expert: bool| {
            let mut a = args();
            a.rgsize_mb = size;
            a.flags.expert = expert;
            check(a)
        };

        assert!(matches!(rg(31, false), Err(MkfsError::InvalidResourceGroupSize(31))));
        assert!(rg(32, false).is_ok());
        assert!(rg(2048, false).is_ok());
        assert!(rg(2049, false).is_err());
        assert!(rg(2049, true).is_err());
        assert!(rg(1, false).is_err());
        assert!(rg(1, true).is_ok());
        assert!(rg(0, true).is_err());
    }

    #[test]
    fn journal_count_and_size() {
        let mut a = args();
        a.journals = 0;
        assert!(matches!(check(a), Err(MkfsError::NoJournals)));

        let mut a = args();
        a.journals = 1;
        assert!(check(a).is_ok());

        for (size, ok) in [(7, false), (8, true), (1024, true), (1025, false)] {
            let mut a = args();
            a.journal_size_mb = size;
            assert_eq!(check(a).is_ok(), ok, "journal size {}", size);
        }
    }

    #[test]
    fn unlinked_and_quota_change_sizes() {
        for (size, ok) in [(0, false), (1, true), (64, true), (65, false)] {
            let mut a = args();
            a.utsize_mb = size;
            let result = check(a);
            assert_eq!(result.is_ok(), ok, "unlinked size {}", size);
            if !ok {
                assert!(matches!(result, Err(MkfsError::InvalidUnlinkedSize(_))));
            }

            let mut a = args();
            a.qcsize_mb = size;
            let result = check(a);
            assert_eq!(result.is_ok(), ok, "quota change size {}", size);
            if !ok {
                assert!(matches!(result, Err(MkfsError::InvalidQuotaChangeSize(_))));
            }
        }
    }

    #[test]
    fn validation_failures_are_classified() {
        let mut a = args();
        a.journal_size_mb = 1;
        assert_eq!(check(a).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn exactly_one_device() {
        let err = check(RequestArgs::default()).unwrap_err();
        assert!(matches!(err, MkfsError::NoDevice));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = check(args().with_device("/dev/other")).unwrap_err();
        assert!(matches!(err, MkfsError::MultipleDevices));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn fstype_argument_is_skipped() {
        let a = RequestArgs::default().with_device("gfs2").with_device("/dev/sdz");
        assert_eq!(check(a).unwrap().device(), Path::new("/dev/sdz"));

        let a = RequestArgs::default().with_device("gfs2");
        assert!(matches!(check(a), Err(MkfsError::NoDevice)));
    }

    #[test]
    fn locking_is_checked_outside_expert_mode_only() {
        let locking = RejectLocking { calls: Cell::new(0) };
        let err = validate(args(), &locking).unwrap_err();
        assert!(matches!(err, MkfsError::LockIncompatible(_)));
        assert_eq!(err.to_string(), "lockproto error: lock_dlm unknown");

        let mut a = args();
        a.flags.expert = true;
        a.lockproto = LockName::protocol("anything").unwrap();
        assert!(validate(a, &locking).is_ok());
        assert_eq!(locking.calls.get(), 1);
    }
}
