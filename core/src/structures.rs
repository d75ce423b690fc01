//! Collaborator interfaces offered by a filesystem structures library.
//!
//! The orchestration core only talks to the structures library through these
//! traits. A single backend value usually implements all of them, which is
//! what [`FormatBackend`] captures.

use crate::device::BlockDevice;
use crate::error::StructureError;
use crate::layout::{BuildStats, DeviceGeometry, FilesystemLayout};
use crate::request::FormatRequest;
use std::io;

/// Lock protocol / lock table compatibility check, consulted outside expert mode.
pub trait LockingCheck {
    fn check_locking(&self, lockproto: &str, locktable: &str) -> Result<(), StructureError>;
}

/// Describes what a device currently holds.
pub trait ContentIdentifier<D: BlockDevice> {
    /// `Ok(None)` means the contents were not recognized.
    fn identify_device(&mut self, device: &mut D) -> io::Result<Option<String>>;
}

pub trait GeometryProbe<D: BlockDevice> {
    /// Usable region of the device, in basic blocks.
    fn device_geometry(&mut self, device: &mut D) -> Result<DeviceGeometry, StructureError>;

    /// Reconciles a basic-block geometry with the block size, returning it in filesystem blocks.
    fn fix_device_geometry(
        &mut self,
        geometry: DeviceGeometry,
        block_size: u32,
    ) -> Result<DeviceGeometry, StructureError>;
}

pub trait LayoutCalculator {
    fn compute_rgrp_layout(
        &mut self,
        geometry: &DeviceGeometry,
        block_size: u32,
        rgsize_mb: u32,
    ) -> Result<FilesystemLayout, StructureError>;
}

/// Read-only inputs every build step sees.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub request: &'a FormatRequest,
    pub layout: &'a FilesystemLayout,
}

/// Per-structure builders.
///
/// Steps that place files under the master directory borrow the master handle,
/// and the superblock borrows both directory handles, so a step can't run
/// before the structures it records exist.
pub trait StructureBuilder<D: BlockDevice> {
    /// In-memory inode handle. Must be passed back to [`inode_put`](Self::inode_put).
    type Inode;

    fn build_rgrps(&mut self, device: &mut D, ctx: &BuildContext<'_>) -> Result<(), StructureError>;

    fn build_root(&mut self, device: &mut D, ctx: &BuildContext<'_>) -> Result<Self::Inode, StructureError>;

    fn build_master(&mut self, device: &mut D, ctx: &BuildContext<'_>) -> Result<Self::Inode, StructureError>;

    fn build_sb(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        root: &Self::Inode,
        master: &Self::Inode,
    ) -> Result<(), StructureError>;

    fn build_jindex(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<(), StructureError>;

    fn build_per_node(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<(), StructureError>;

    fn build_inum(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<Self::Inode, StructureError>;

    fn build_statfs(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<Self::Inode, StructureError>;

    fn build_rindex(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<(), StructureError>;

    fn build_quota(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        master: &mut Self::Inode,
    ) -> Result<(), StructureError>;

    /// Stamps the inode number allocator and the statfs totals.
    fn do_init(
        &mut self,
        device: &mut D,
        ctx: &BuildContext<'_>,
        inum: &mut Self::Inode,
        statfs: &mut Self::Inode,
    ) -> Result<(), StructureError>;

    fn inode_put(&mut self, device: &mut D, inode: Self::Inode) -> Result<(), StructureError>;

    /// Writes every pending buffer to the device.
    fn bsync(&mut self, device: &mut D) -> Result<BuildStats, StructureError>;
}

/// Everything a format session needs from the structures library.
pub trait FormatBackend<D: BlockDevice>:
    LockingCheck + ContentIdentifier<D> + GeometryProbe<D> + LayoutCalculator + StructureBuilder<D>
{
}

impl<D, T> FormatBackend<D> for T
where
    D: BlockDevice,
    T: LockingCheck + ContentIdentifier<D> + GeometryProbe<D> + LayoutCalculator + StructureBuilder<D>,
{
}
