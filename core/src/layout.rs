// Geometry and layout values shared between the pipeline stages

/// A region of the device, in 512-byte basic blocks before fix-up and in
/// filesystem blocks after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGeometry {
    pub start: u64,
    pub length: u64,
}

impl DeviceGeometry {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Placement of one resource group, in filesystem blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGroupExtent {
    /// First block of the group header.
    pub addr: u64,
    /// Header and bitmap blocks.
    pub length: u32,
    /// First data block.
    pub data0: u64,
    /// Number of data blocks.
    pub data: u32,
    pub bitbytes: u32,
}

impl ResourceGroupExtent {
    pub fn end(&self) -> u64 {
        self.data0 + self.data as u64
    }
}

/// Derived filesystem geometry. Computed once, after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemLayout {
    pub block_size: u32,
    /// Device size in filesystem blocks.
    pub device_size: u64,
    /// Filesystem size in filesystem blocks.
    pub fssize: u64,
    pub rgrps: Vec<ResourceGroupExtent>,
}

impl FilesystemLayout {
    pub fn rgrp_count(&self) -> u64 {
        self.rgrps.len() as u64
    }

    /// Checks the invariants every layout calculator must uphold.
    pub fn check(&self) -> Result<(), String> {
        if self.rgrps.is_empty() {
            return Err("no resource groups".to_string());
        }
        if self.fssize > self.device_size {
            return Err(format!(
                "filesystem size {} exceeds device size {}",
                self.fssize, self.device_size
            ));
        }
        let mut prev_end = 0;
        for rg in &self.rgrps {
            if rg.addr < prev_end || rg.end() > self.fssize {
                return Err(format!("resource group at block {} overlaps or overruns", rg.addr));
            }
            prev_end = rg.end();
        }
        Ok(())
    }

    /// Size in GiB of `blocks` filesystem blocks.
    pub fn gigabytes(&self, blocks: u64) -> f64 {
        blocks as f64 / (1u64 << 30) as f64 * self.block_size as f64
    }
}

/// Counters reported by the structure builder when it flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub writes: u64,
    pub spills: u64,
}
