// Device geometry probing and fix-up

use crate::ondisk::{GFS2_BASIC_BLOCK, GFS2_BASIC_BLOCK_SHIFT};
use log::debug;
use mkgfs2_core::{BlockDevice, DeviceGeometry, StructureError};

/// Smallest device accepted, in basic blocks (1 MiB).
pub const MIN_DEVICE_BASIC_BLOCKS: u64 = 2048;

/// Whole device, in basic blocks.
pub fn device_geometry<D: BlockDevice>(device: &mut D) -> Result<DeviceGeometry, StructureError> {
    let bytes = device.probe_size()?;
    let geometry = DeviceGeometry {
        start: 0,
        length: bytes >> GFS2_BASIC_BLOCK_SHIFT,
    };
    debug!("Device {} is {} bytes", device.path().display(), bytes);
    Ok(geometry)
}

/// Aligns a basic-block geometry to `bsize` and converts it to filesystem blocks.
pub fn fix_device_geometry(geometry: DeviceGeometry, bsize: u32) -> Result<DeviceGeometry, StructureError> {
    if geometry.length < MIN_DEVICE_BASIC_BLOCKS {
        return Err(StructureError::DeviceTooSmall {
            basic_blocks: geometry.length,
        });
    }
    let per_block = (bsize / GFS2_BASIC_BLOCK) as u64;
    let start = geometry.start.div_ceil(per_block) * per_block;
    let lost = start - geometry.start;
    let length = geometry.length.saturating_sub(lost) / per_block;

    Ok(DeviceGeometry {
        start: start / per_block,
        length,
    })
}
