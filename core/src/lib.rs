pub mod confirm;
pub mod device;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod report;
pub mod request;
pub mod sequencer;
pub mod session;
pub mod structures;
pub mod validate;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use device::BlockDevice;
pub use error::{ErrorKind, MkfsError, StructureError};
pub use layout::{BuildStats, DeviceGeometry, FilesystemLayout, ResourceGroupExtent};
pub use report::Summary;
pub use request::{FormatRequest, LockName, ModeFlags, RequestArgs};
pub use sequencer::{BuildStep, BUILD_ORDER};
pub use session::{Completed, FormatSession};
pub use structures::{
    BuildContext, ContentIdentifier, FormatBackend, GeometryProbe, LayoutCalculator, LockingCheck,
    StructureBuilder,
};
