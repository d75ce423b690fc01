// Format session: drives every stage in order, owning the device throughout

use crate::confirm;
use crate::device::BlockDevice;
use crate::geometry;
use crate::layout::{BuildStats, FilesystemLayout};
use crate::report::{self, Summary};
use crate::request::{FormatRequest, RequestArgs};
use crate::sequencer;
use crate::structures::{BuildContext, FormatBackend};
use crate::validate;
use crate::MkfsError;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::info;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct Completed {
    pub request: FormatRequest,
    pub layout: FilesystemLayout,
    pub stats: BuildStats,
}

pub struct FormatSession {
    args: RequestArgs,
}

impl FormatSession {
    pub fn new(args: RequestArgs) -> Self {
        Self { args }
    }

    /// Validates, opens the device with `open`, confirms, lays out and builds.
    ///
    /// `input` answers the confirmation prompt; the prompt, the debug echo and
    /// the summary go to `output`. Never exits the process.
    pub fn run<D, B, F, R, W>(
        self,
        open: F,
        backend: &mut B,
        input: &mut R,
        output: &mut W,
    ) -> Result<Completed, MkfsError>
    where
        D: BlockDevice,
        B: FormatBackend<D>,
        F: FnOnce(&Path) -> io::Result<D>,
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        let request = validate::validate(self.args, &*backend)?;
        let flags = request.flags();
        if flags.debug {
            request.write_echo(output).map_err(MkfsError::Console)?;
        }

        let mut device = open(request.device()).map_err(|source| MkfsError::DeviceOpen {
            device: request.device().to_path_buf(),
            source,
        })?;
        info!(device = %request.device().display(), "device opened");

        if !flags.override_confirmation {
            confirm::are_you_sure(request.device(), backend, &mut device, input, output)?;
        }

        let layout = geometry::compute_layout(backend, &mut device, &request)?;

        let ctx = BuildContext {
            request: &request,
            layout: &layout,
        };
        let stats = sequencer::build_filesystem(backend, device, &ctx)?;
        info!(device = %request.device().display(), "filesystem created");

        report::print_results(&Summary::new(&request, &layout, &stats), output).map_err(MkfsError::Console)?;

        Ok(Completed { request, layout, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ModeFlags;
    use crate::sequencer::BuildStep;
    use crate::test_utils::{Event, MemDevice, RecordingBackend};
    use crate::ErrorKind;
    use std::cell::Cell;
    use std::io::Cursor;

    const SIZE: usize = 256 << 20;

    fn args(flags: ModeFlags) -> RequestArgs {
        let mut args = RequestArgs::default().with_device("/dev/mock");
        args.flags = flags;
        args
    }

    fn run(
        args: RequestArgs,
        device: MemDevice,
        answer: &str,
        backend: &mut RecordingBackend,
        opened: &Cell<usize>,
    ) -> (Result<Completed, MkfsError>, String) {
        let mut input = Cursor::new(answer.as_bytes().to_vec());
        let mut output = Vec::new();
        let open = |_: &Path| {
            opened.set(opened.get() + 1);
            Ok(device)
        };
        let result = FormatSession::new(args).run(open, backend, &mut input, &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn override_skips_the_prompt_and_succeeds() {
        let device = MemDevice::zeroed("/dev/mock", SIZE);
        let handle = device.clone();
        let mut backend = RecordingBackend::new();
        let opened = Cell::new(0);
        let flags = ModeFlags { override_confirmation: true, ..ModeFlags::default() };

        let (result, output) = run(args(flags), device, "", &mut backend, &opened);
        let completed = result.unwrap();

        assert_eq!(completed.layout.rgrp_count(), 1);
        assert!(!output.contains("Are you sure"));
        assert!(output.contains("Resource Groups:           1"));
        assert!(!backend.events().contains(&Event::Identify));
        assert_eq!(opened.get(), 1);
        assert_eq!(handle.state().closes, 1);
    }

    #[test]
    fn decline_leaves_the_device_untouched() {
        let device = MemDevice::patterned("/dev/mock", SIZE);
        let handle = device.clone();
        let before = handle.contents();
        let mut backend = RecordingBackend::new();
        let opened = Cell::new(0);

        let (result, output) = run(args(ModeFlags::default()), device, "n\n", &mut backend, &opened);
        let err = result.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(output.contains("Are you sure you want to proceed? [y/n] "));
        assert_eq!(handle.state().writes, 0);
        assert!(handle.contents() == before);
        assert_eq!(backend.events(), vec![Event::LockCheck, Event::Identify]);
    }

    #[test]
    fn confirmation_yes_formats() {
        let device = MemDevice::zeroed("/dev/mock", SIZE);
        let mut backend = RecordingBackend::new();
        let opened = Cell::new(0);

        let (result, _) = run(args(ModeFlags::default()), device, "y\n", &mut backend, &opened);
        assert!(result.is_ok());

        let events = backend.events();
        assert_eq!(&events[..3], &[Event::LockCheck, Event::Identify, Event::Geometry]);
        assert_eq!(events[3], Event::Step(BuildStep::ResourceGroups));
    }

    #[test]
    fn expert_mode_skips_the_lock_check() {
        let device = MemDevice::zeroed("/dev/mock", SIZE);
        let mut backend = RecordingBackend::new().rejecting_locks("lockproto error: lock_foo unknown");
        let opened = Cell::new(0);
        let flags = ModeFlags { expert: true, override_confirmation: true, ..ModeFlags::default() };

        let (result, _) = run(args(flags), device, "", &mut backend, &opened);
        assert!(result.is_ok());
        assert!(!backend.events().contains(&Event::LockCheck));
        assert_eq!(backend.events()[0], Event::Geometry);
    }

    #[test]
    fn validation_failure_never_opens_the_device() {
        let mut backend = RecordingBackend::new();
        let opened = Cell::new(0);

        let mut a = args(ModeFlags::default()).with_device("/dev/other");
        a.flags.override_confirmation = true;
        let (result, _) = run(a, MemDevice::zeroed("/dev/mock", 1024), "", &mut backend, &opened);
        assert!(matches!(result, Err(MkfsError::MultipleDevices)));

        let mut a = RequestArgs::default();
        a.flags.override_confirmation = true;
        let (result, _) = run(a, MemDevice::zeroed("/dev/mock", 1024), "", &mut backend, &opened);
        assert!(matches!(result, Err(MkfsError::NoDevice)));

        let mut a = args(ModeFlags::default());
        a.block_size = 511;
        let (result, _) = run(a, MemDevice::zeroed("/dev/mock", 1024), "", &mut backend, &opened);
        assert!(matches!(result, Err(MkfsError::InvalidBlockSize(511))));

        assert_eq!(opened.get(), 0);
    }

    #[test]
    fn incompatible_locking_stops_before_open() {
        let mut backend = RecordingBackend::new().rejecting_locks("locktable error: missing colon in the locktable");
        let opened = Cell::new(0);

        let (result, _) = run(args(ModeFlags::default()), MemDevice::zeroed("/dev/mock", 1024), "y\n", &mut backend, &opened);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "locktable error: missing colon in the locktable");
        assert_eq!(opened.get(), 0);
    }

    #[test]
    fn open_failure_names_the_device() {
        let mut backend = RecordingBackend::new();
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut output = Vec::<u8>::new();
        let open = |_: &Path| -> io::Result<MemDevice> { Err(io::Error::from(io::ErrorKind::NotFound)) };

        let err = FormatSession::new(args(ModeFlags::default()))
            .run(open, &mut backend, &mut input, &mut output)
            .unwrap_err();
        assert!(matches!(err, MkfsError::DeviceOpen { .. }));
        assert!(err.to_string().starts_with("can't open device /dev/mock:"));
    }

    #[test]
    fn debug_echoes_the_request() {
        let device = MemDevice::zeroed("/dev/mock", SIZE);
        let mut backend = RecordingBackend::new();
        let opened = Cell::new(0);
        let flags = ModeFlags { debug: true, override_confirmation: true, ..ModeFlags::default() };

        let (result, output) = run(args(flags), device, "", &mut backend, &opened);
        assert!(result.is_ok());
        assert!(output.starts_with("Command Line Arguments:\n  bsize = 4096\n"));
        assert!(output.contains("  device = /dev/mock\n"));
        assert!(output.contains("Writes:"));
    }
}
