// GFS2 structures library
// On-disk encoding, resource group layout, inode and directory writing, and
// the builders behind the format session's collaborator traits.

pub mod buf;
pub mod build;
pub mod detection;
pub mod geometry;
pub mod inode;
pub mod locking;
pub mod ondisk;
pub mod rgrp;

pub use build::Gfs2Structures;
pub use detection::{detect_content, identify_device, ContentDetector};
pub use locking::test_locking;
