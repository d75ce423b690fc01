// Result summary printed after a successful format

use crate::layout::{BuildStats, FilesystemLayout};
use crate::request::FormatRequest;
use std::fmt;
use std::io::{self, Write};

pub struct Summary<'a> {
    request: &'a FormatRequest,
    layout: &'a FilesystemLayout,
    stats: &'a BuildStats,
}

impl<'a> Summary<'a> {
    pub fn new(request: &'a FormatRequest, layout: &'a FilesystemLayout, stats: &'a BuildStats) -> Self {
        Self { request, layout, stats }
    }

    /// Whether anything gets printed at all. Debug wins over quiet.
    pub fn is_visible(&self) -> bool {
        let flags = self.request.flags();
        flags.debug || !flags.quiet
    }
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let request = self.request;
        let layout = self.layout;
        let flags = request.flags();

        if flags.debug {
            writeln!(f)?;
        }
        if flags.expert {
            writeln!(f, "Expert mode:               on")?;
        }

        writeln!(f, "Device:                    {}", request.device().display())?;
        writeln!(f, "Blocksize:                 {}", request.block_size())?;
        writeln!(
            f,
            "Device Size:               {:.2} GB ({} blocks)",
            layout.gigabytes(layout.device_size),
            layout.device_size
        )?;
        writeln!(
            f,
            "Filesystem Size:           {:.2} GB ({} blocks)",
            layout.gigabytes(layout.fssize),
            layout.fssize
        )?;
        writeln!(f, "Journals:                  {}", request.journals())?;
        writeln!(f, "Resource Groups:           {}", layout.rgrp_count())?;
        writeln!(f, "Locking Protocol:          \"{}\"", request.lockproto())?;
        writeln!(f, "Lock Table:                \"{}\"", request.locktable())?;

        if flags.debug {
            writeln!(f)?;
            writeln!(f, "Spills:                    {}", self.stats.spills)?;
            writeln!(f, "Writes:                    {}", self.stats.writes)?;
        }

        writeln!(f)
    }
}

pub fn print_results<W: Write + ?Sized>(summary: &Summary<'_>, out: &mut W) -> io::Result<()> {
    if !summary.is_visible() {
        return Ok(());
    }
    write!(out, "{}", summary)?;
    out.flush()
}
