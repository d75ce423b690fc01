// Lock protocol and lock table compatibility

use mkgfs2_core::StructureError;

/// Longest cluster or filesystem name allowed in a lock table.
pub const MAX_TABLE_PART: usize = 16;

fn table_error(msg: &str) -> StructureError {
    StructureError::Locking(format!("locktable error: {}", msg))
}

/// Checks that `locktable` suits `lockproto`.
///
/// `lock_nolock` accepts any table. The cluster protocols need
/// `cluster:fsname` made of alphanumerics, `-` and `_`.
pub fn test_locking(lockproto: &str, locktable: &str) -> Result<(), StructureError> {
    match lockproto {
        "lock_nolock" => Ok(()),
        "lock_dlm" | "lock_gulm" => check_table(locktable),
        other => Err(StructureError::Locking(format!("lockproto error: {} unknown", other))),
    }
}

fn check_table(locktable: &str) -> Result<(), StructureError> {
    for c in locktable.chars() {
        if c.is_whitespace() {
            return Err(table_error("contains space characters"));
        }
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != ':' {
            return Err(table_error(&format!("invalid character '{}'", c)));
        }
    }

    let Some((cluster, fsname)) = locktable.split_once(':') else {
        return Err(table_error("missing colon in the locktable"));
    };
    if cluster.is_empty() {
        return Err(table_error("missing cluster name"));
    }
    if cluster.len() > MAX_TABLE_PART {
        return Err(table_error("cluster name too long"));
    }
    if fsname.contains(':') {
        return Err(table_error("more than one colon present"));
    }
    if fsname.is_empty() {
        return Err(table_error("missing filesystem name"));
    }
    if fsname.len() > MAX_TABLE_PART {
        return Err(table_error("filesystem name too long"));
    }
    Ok(())
}
