// Geometry pipeline: probe, fix up, then lay out resource groups

use crate::device::BlockDevice;
use crate::layout::FilesystemLayout;
use crate::request::FormatRequest;
use crate::structures::{GeometryProbe, LayoutCalculator};
use crate::MkfsError;
use tracing::{debug, info};

/// Computes the filesystem layout for `request` on `device`. Reads only.
pub fn compute_layout<D, B>(
    backend: &mut B,
    device: &mut D,
    request: &FormatRequest,
) -> Result<FilesystemLayout, MkfsError>
where
    D: BlockDevice,
    B: GeometryProbe<D> + LayoutCalculator + ?Sized,
{
    let geometry_error = |source| MkfsError::Geometry {
        device: request.device().to_path_buf(),
        source,
    };

    let raw = backend.device_geometry(device).map_err(geometry_error)?;
    debug!(start = raw.start, length = raw.length, "device geometry (basic blocks)");

    let fixed = backend
        .fix_device_geometry(raw, request.block_size())
        .map_err(geometry_error)?;
    debug!(start = fixed.start, length = fixed.length, "device geometry (filesystem blocks)");

    let layout = backend
        .compute_rgrp_layout(&fixed, request.block_size(), request.rgsize_mb())
        .map_err(geometry_error)?;

    layout.check().map_err(|reason| MkfsError::Layout {
        device: request.device().to_path_buf(),
        reason,
    })?;

    info!(
        device_size = layout.device_size,
        fssize = layout.fssize,
        rgrps = layout.rgrp_count(),
        "layout computed"
    );
    Ok(layout)
}
