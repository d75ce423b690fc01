/// Test utilities: an in-memory device and a backend that records every call
use crate::device::BlockDevice;
use crate::error::StructureError;
use crate::layout::{BuildStats, DeviceGeometry, FilesystemLayout, ResourceGroupExtent};
use crate::request::{FormatRequest, ModeFlags, RequestArgs};
use crate::sequencer::BuildStep;
use crate::structures::{
    BuildContext, ContentIdentifier, GeometryProbe, LayoutCalculator, LockingCheck, StructureBuilder,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared state of a [`MemDevice`] and all its clones.
#[derive(Debug, Default)]
pub struct MemState {
    pub data: Vec<u8>,
    pub reads: usize,
    pub writes: usize,
    pub syncs: usize,
    pub closes: usize,
    pub drops: usize,
    pub fail_sync: bool,
}

/// In-memory block device. Clones share the same backing store, so a test
/// can keep a handle after the original has been consumed by `close`.
#[derive(Debug, Clone)]
pub struct MemDevice {
    path: PathBuf,
    state: Arc<Mutex<MemState>>,
}

impl MemDevice {
    pub fn zeroed(path: &str, size: usize) -> Self {
        Self::with_data(path, vec![0u8; size])
    }

    /// A device filled with a recognizable non-zero pattern.
    pub fn patterned(path: &str, size: usize) -> Self {
        let data = (0..size).map(|i| (i % 251) as u8 ^ 0x5a).collect();
        Self::with_data(path, data)
    }

    pub fn with_data(path: &str, data: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from(path),
            state: Arc::new(Mutex::new(MemState { data, ..MemState::default() })),
        }
    }

    pub fn failing_sync(self) -> Self {
        self.state().fail_sync = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state().data.clone()
    }
}

fn range(len: usize, offset: u64, n: usize) -> io::Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let end = start.checked_add(n).filter(|end| *end <= len);
    end.map(|end| start..end)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "access beyond end of device"))
}

impl BlockDevice for MemDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state();
        let r = range(state.data.len(), offset, buf.len())?;
        buf.copy_from_slice(&state.data[r]);
        state.reads += 1;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        let r = range(state.data.len(), offset, data.len())?;
        state.data[r].copy_from_slice(data);
        state.writes += 1;
        Ok(())
    }

    fn probe_size(&mut self) -> io::Result<u64> {
        Ok(self.state().data.len() as u64)
    }

    fn sync_all(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_sync {
            return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure"));
        }
        state.syncs += 1;
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        self.state().closes += 1;
        Ok(())
    }
}

impl Drop for MemDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.drops += 1;
        }
    }
}

/// Something the [`RecordingBackend`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LockCheck,
    Identify,
    Geometry,
    Step(BuildStep),
    Put(&'static str),
    Bsync,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockInode {
    pub name: &'static str,
}

/// Backend that records calls and writes one marker block per build step.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    events: Arc<Mutex<Vec<Event>>>,
    contents: Option<&'static str>,
    fail_identify: bool,
    fail_probe: bool,
    overreach: bool,
    fail_at: Option<BuildStep>,
    lock_error: Option<&'static str>,
    writes: u64,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifying(mut self, contents: Option<&'static str>) -> Self {
        self.contents = contents;
        self
    }

    pub fn failing_identify(mut self) -> Self {
        self.fail_identify = true;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Reports a filesystem one block larger than the device.
    pub fn overreaching_layout(mut self) -> Self {
        self.overreach = true;
        self
    }

    pub fn failing_at(mut self, step: BuildStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn rejecting_locks(mut self, message: &'static str) -> Self {
        self.lock_error = Some(message);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn step<D: BlockDevice>(&mut self, device: &mut D, step: BuildStep) -> Result<(), StructureError> {
        self.record(Event::Step(step));
        if self.fail_at == Some(step) {
            return Err(StructureError::NoSpace(format!("injected failure in {}", step)));
        }
        let marker = [step.ordinal() as u8 + 1; 512];
        device.write_at(step.ordinal() as u64 * 512, &marker)?;
        self.writes += 1;
        Ok(())
    }
}

impl LockingCheck for RecordingBackend {
    fn check_locking(&self, _lockproto: &str, _locktable: &str) -> Result<(), StructureError> {
        self.record(Event::LockCheck);
        match self.lock_error {
            Some(message) => Err(StructureError::Locking(message.to_string())),
            None => Ok(()),
        }
    }
}

impl<D: BlockDevice> ContentIdentifier<D> for RecordingBackend {
    fn identify_device(&mut self, device: &mut D) -> io::Result<Option<String>> {
        self.record(Event::Identify);
        if self.fail_identify {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let mut sector = [0u8; 512];
        device.read_at(0, &mut sector)?;
        Ok(self.contents.map(str::to_string))
    }
}

impl<D: BlockDevice> GeometryProbe<D> for RecordingBackend {
    fn device_geometry(&mut self, device: &mut D) -> Result<DeviceGeometry, StructureError> {
        self.record(Event::Geometry);
        if self.fail_probe {
            return Err(StructureError::Io(io::Error::new(io::ErrorKind::Other, "injected probe failure")));
        }
        Ok(DeviceGeometry { start: 0, length: device.probe_size()? >> 9 })
    }

    fn fix_device_geometry(&mut self, geometry: DeviceGeometry, block_size: u32) -> Result<DeviceGeometry, StructureError> {
        let bb = (block_size >> 9) as u64;
        let start = geometry.start.div_ceil(bb);
        let length = (geometry.end() / bb).saturating_sub(start);
        Ok(DeviceGeometry { start, length })
    }
}

impl LayoutCalculator for RecordingBackend {
    fn compute_rgrp_layout(
        &mut self,
        geometry: &DeviceGeometry,
        block_size: u32,
        rgsize_mb: u32,
    ) -> Result<FilesystemLayout, StructureError> {
        let mut layout = simple_layout(geometry.end(), block_size, rgsize_mb);
        if self.overreach {
            layout.fssize = layout.device_size + 1;
        }
        Ok(layout)
    }
}

impl<D: BlockDevice> StructureBuilder<D> for RecordingBackend {
    type Inode = MockInode;

    fn build_rgrps(&mut self, device: &mut D, _: &BuildContext<'_>) -> Result<(), StructureError> {
        self.step(device, BuildStep::ResourceGroups)
    }

    fn build_root(&mut self, device: &mut D, _: &BuildContext<'_>) -> Result<MockInode, StructureError> {
        self.step(device, BuildStep::RootDirectory)?;
        Ok(MockInode { name: "root" })
    }

    fn build_master(&mut self, device: &mut D, _: &BuildContext<'_>) -> Result<MockInode, StructureError> {
        self.step(device, BuildStep::MasterDirectory)?;
        Ok(MockInode { name: "master" })
    }

    fn build_sb(
        &mut self,
        device: &mut D,
        _: &BuildContext<'_>,
        _root: &MockInode,
        _master: &MockInode,
    ) -> Result<(), StructureError> {
        self.step(device, BuildStep::Superblock)
    }

    fn build_jindex(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<(), StructureError> {
        self.step(device, BuildStep::JournalIndex)
    }

    fn build_per_node(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<(), StructureError> {
        self.step(device, BuildStep::PerNode)
    }

    fn build_inum(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<MockInode, StructureError> {
        self.step(device, BuildStep::InodeNumbers)?;
        Ok(MockInode { name: "inum" })
    }

    fn build_statfs(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<MockInode, StructureError> {
        self.step(device, BuildStep::Statfs)?;
        Ok(MockInode { name: "statfs" })
    }

    fn build_rindex(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<(), StructureError> {
        self.step(device, BuildStep::ResourceGroupIndex)
    }

    fn build_quota(&mut self, device: &mut D, _: &BuildContext<'_>, _: &mut MockInode) -> Result<(), StructureError> {
        self.step(device, BuildStep::Quota)
    }

    fn do_init(
        &mut self,
        device: &mut D,
        _: &BuildContext<'_>,
        _inum: &mut MockInode,
        _statfs: &mut MockInode,
    ) -> Result<(), StructureError> {
        self.step(device, BuildStep::Initialize)
    }

    fn inode_put(&mut self, _device: &mut D, inode: MockInode) -> Result<(), StructureError> {
        self.record(Event::Put(inode.name));
        Ok(())
    }

    fn bsync(&mut self, _device: &mut D) -> Result<BuildStats, StructureError> {
        self.record(Event::Bsync);
        Ok(BuildStats { writes: self.writes, spills: 0 })
    }
}

/// Evenly sized resource groups after a one-block reserved area.
pub fn simple_layout(device_size: u64, block_size: u32, rgsize_mb: u32) -> FilesystemLayout {
    let start = 1u64;
    let usable = device_size.saturating_sub(start);
    let rgblocks = ((rgsize_mb as u64) << 20) / block_size as u64;
    let count = usable.div_ceil(rgblocks).max(1);
    let per = usable / count;

    let rgrps: Vec<ResourceGroupExtent> = (0..count)
        .map(|i| {
            let addr = start + i * per;
            let len = if i == count - 1 { usable - per * (count - 1) } else { per };
            let data = (len.saturating_sub(1) as u32) & !3;
            ResourceGroupExtent { addr, length: 1, data0: addr + 1, data, bitbytes: data / 4 }
        })
        .collect();

    let fssize = rgrps.last().map(|rg| rg.end()).unwrap_or(0);
    FilesystemLayout { block_size, device_size, fssize, rgrps }
}

pub fn request_with_flags(device: &str, flags: ModeFlags) -> FormatRequest {
    let mut args = RequestArgs::default().with_device(device);
    args.flags = flags;
    crate::validate::validate(args, &RecordingBackend::new()).unwrap()
}

pub fn request_for(device: &str) -> FormatRequest {
    request_with_flags(device, ModeFlags::default())
}

/// Layout `simple_layout` would produce for a device of `bytes` bytes.
pub fn layout_for(request: &FormatRequest, bytes: u64) -> FilesystemLayout {
    simple_layout(bytes / request.block_size() as u64, request.block_size(), request.rgsize_mb())
}
