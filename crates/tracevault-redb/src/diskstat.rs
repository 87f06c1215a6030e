//! Free disk space of the filesystems holding the database files

use std::io;
use std::path::Path;

/// Bytes available to unprivileged users on the filesystem containing `path`
#[cfg(unix)]
#[allow(clippy::useless_conversion)]
pub fn available_bytes(path: &Path) -> io::Result<i64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    let bytes = u64::from(stat.blocks_available()).saturating_mul(u64::from(stat.fragment_size()));
    Ok(i64::try_from(bytes).unwrap_or(i64::MAX))
}

#[cfg(not(unix))]
pub fn available_bytes(_path: &Path) -> io::Result<i64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk statistics are not supported on this platform",
    ))
}
