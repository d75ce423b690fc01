//! Construction sequencer.
//!
//! Runs the structure builders in their fixed dependency order, then releases
//! the system inodes, flushes, syncs and closes the device. A builder failure
//! ends the run with the failing step attached; nothing is rolled back.

use crate::device::BlockDevice;
use crate::layout::BuildStats;
use crate::structures::{BuildContext, StructureBuilder};
use crate::error::StructureError;
use crate::MkfsError;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    ResourceGroups,
    RootDirectory,
    MasterDirectory,
    Superblock,
    JournalIndex,
    PerNode,
    InodeNumbers,
    Statfs,
    ResourceGroupIndex,
    Quota,
    Initialize,
}

/// The order steps run in.
pub const BUILD_ORDER: [BuildStep; 11] = [
    BuildStep::ResourceGroups,
    BuildStep::RootDirectory,
    BuildStep::MasterDirectory,
    BuildStep::Superblock,
    BuildStep::JournalIndex,
    BuildStep::PerNode,
    BuildStep::InodeNumbers,
    BuildStep::Statfs,
    BuildStep::ResourceGroupIndex,
    BuildStep::Quota,
    BuildStep::Initialize,
];

impl BuildStep {
    pub const fn name(self) -> &'static str {
        match self {
            BuildStep::ResourceGroups => "resource groups",
            BuildStep::RootDirectory => "root directory",
            BuildStep::MasterDirectory => "master directory",
            BuildStep::Superblock => "superblock",
            BuildStep::JournalIndex => "journal index",
            BuildStep::PerNode => "per-node area",
            BuildStep::InodeNumbers => "inode number allocator",
            BuildStep::Statfs => "statfs file",
            BuildStep::ResourceGroupIndex => "resource group index",
            BuildStep::Quota => "quota file",
            BuildStep::Initialize => "filesystem initialization",
        }
    }

    /// Position in [`BUILD_ORDER`].
    pub fn ordinal(self) -> usize {
        BUILD_ORDER.iter().position(|s| *s == self).unwrap_or(BUILD_ORDER.len())
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handles the sequencer holds until every step has run.
struct SystemInodes<I> {
    root: I,
    master: I,
    inum: I,
    statfs: I,
}

fn run_step<T>(step: BuildStep, f: impl FnOnce() -> Result<T, StructureError>) -> Result<T, MkfsError> {
    info!(step = %step, "building {}/{}", step.ordinal() + 1, BUILD_ORDER.len());
    let value = f().map_err(|source| MkfsError::Build { step, source })?;
    debug!(step = %step, "done");
    Ok(value)
}

fn construct<D, B>(
    backend: &mut B,
    device: &mut D,
    ctx: &BuildContext<'_>,
) -> Result<SystemInodes<B::Inode>, MkfsError>
where
    D: BlockDevice,
    B: StructureBuilder<D> + ?Sized,
{
    run_step(BuildStep::ResourceGroups, || backend.build_rgrps(device, ctx))?;
    let root = run_step(BuildStep::RootDirectory, || backend.build_root(device, ctx))?;
    let mut master = run_step(BuildStep::MasterDirectory, || backend.build_master(device, ctx))?;
    run_step(BuildStep::Superblock, || backend.build_sb(device, ctx, &root, &master))?;
    run_step(BuildStep::JournalIndex, || backend.build_jindex(device, ctx, &mut master))?;
    run_step(BuildStep::PerNode, || backend.build_per_node(device, ctx, &mut master))?;
    let mut inum = run_step(BuildStep::InodeNumbers, || backend.build_inum(device, ctx, &mut master))?;
    let mut statfs = run_step(BuildStep::Statfs, || backend.build_statfs(device, ctx, &mut master))?;
    run_step(BuildStep::ResourceGroupIndex, || backend.build_rindex(device, ctx, &mut master))?;
    run_step(BuildStep::Quota, || backend.build_quota(device, ctx, &mut master))?;
    run_step(BuildStep::Initialize, || backend.do_init(device, ctx, &mut inum, &mut statfs))?;

    Ok(SystemInodes { root, master, inum, statfs })
}

fn finish<D, B>(backend: &mut B, mut device: D, inodes: SystemInodes<B::Inode>) -> Result<BuildStats, MkfsError>
where
    D: BlockDevice,
    B: StructureBuilder<D> + ?Sized,
{
    let SystemInodes { root, master, inum, statfs } = inodes;
    for (what, inode) in [("root", root), ("master", master), ("inum", inum), ("statfs", statfs)] {
        backend
            .inode_put(&mut device, inode)
            .map_err(|source| MkfsError::Release { what, source })?;
    }

    let path = device.path().to_path_buf();
    let stats = backend.bsync(&mut device).map_err(|source| MkfsError::Flush {
        device: path.clone(),
        source,
    })?;
    device.sync_all().map_err(|source| MkfsError::Sync {
        device: path.clone(),
        source,
    })?;
    device
        .close()
        .map_err(|source| MkfsError::Close { device: path, source })?;

    debug!(writes = stats.writes, spills = stats.spills, "device synced and closed");
    Ok(stats)
}

/// Builds every structure on `device` and makes the result durable.
///
/// Consumes the device: on success it has been synced and closed, on failure
/// it is dropped.
pub fn build_filesystem<D, B>(backend: &mut B, mut device: D, ctx: &BuildContext<'_>) -> Result<BuildStats, MkfsError>
where
    D: BlockDevice,
    B: StructureBuilder<D> + ?Sized,
{
    let inodes = construct(backend, &mut device, ctx)?;
    finish(backend, device, inodes)
}
