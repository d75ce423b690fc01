// Confirmation gate: nothing is written unless the user says yes

use crate::device::BlockDevice;
use crate::structures::ContentIdentifier;
use crate::MkfsError;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::{debug, info};

const AFFIRMATIVE: char = 'y';

/// Warns about the data on `device_name` and waits for one line of input.
///
/// Only reads from the device. Returns [`MkfsError::Aborted`] on anything but
/// an affirmative answer, including end of input.
pub fn are_you_sure<D, C, R, W>(
    device_name: &Path,
    identifier: &mut C,
    device: &mut D,
    input: &mut R,
    output: &mut W,
) -> Result<(), MkfsError>
where
    D: BlockDevice,
    C: ContentIdentifier<D> + ?Sized,
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let contents = identifier
        .identify_device(device)
        .map_err(|source| MkfsError::Identify {
            device: device_name.to_path_buf(),
            source,
        })?;
    debug!(device = %device_name.display(), contents = ?contents, "identified device contents");

    prompt(device_name, contents.as_deref(), output).map_err(MkfsError::Console)?;

    let mut answer = String::new();
    input.read_line(&mut answer).map_err(MkfsError::Console)?;

    if !answer.starts_with(AFFIRMATIVE) {
        info!(device = %device_name.display(), "format declined");
        return Err(MkfsError::Aborted);
    }

    writeln!(output).map_err(MkfsError::Console)?;
    Ok(())
}

fn prompt<W: Write + ?Sized>(device_name: &Path, contents: Option<&str>, output: &mut W) -> std::io::Result<()> {
    writeln!(output, "This will destroy any data on {}.", device_name.display())?;
    if let Some(contents) = contents {
        writeln!(output, "  It appears to contain a {}.", contents)?;
    }
    write!(output, "\nAre you sure you want to proceed? [y/n] ")?;
    output.flush()
}
