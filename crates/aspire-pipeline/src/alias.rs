//! Canonical folder aliases.
//!
//! Consumers refer to stage outputs by canonical name; when a suffixed
//! folder was used, the canonical name becomes a relative symlink to it.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOutcome {
    /// Names are equal; nothing to do.
    Unchanged,
    /// The canonical name now points at the actual folder.
    Linked,
    /// A real folder sits at the canonical name and was left alone.
    Kept,
    /// The actual folder does not exist.
    Missing,
}

/// Point `canonical` at `actual`, never replacing a real directory.
///
/// Both paths must share a parent; the link target is the bare folder name.
pub fn publish(canonical: &Path, actual: &Path) -> io::Result<AliasOutcome> {
    if canonical == actual {
        return Ok(AliasOutcome::Unchanged);
    }
    if !actual.is_dir() {
        warn!(actual = %actual.display(), "alias target missing");
        return Ok(AliasOutcome::Missing);
    }
    match fs::symlink_metadata(canonical) {
        Ok(meta) if meta.file_type().is_symlink() => remove_link(canonical)?,
        Ok(_) => {
            warn!(canonical = %canonical.display(), "real folder at canonical name, not aliasing");
            return Ok(AliasOutcome::Kept);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let target = actual.file_name().unwrap_or(actual.as_os_str());
    link_dir(Path::new(target), canonical)?;
    debug!(canonical = %canonical.display(), actual = %actual.display(), "published alias");
    Ok(AliasOutcome::Linked)
}

#[cfg(unix)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(unix)]
pub(crate) fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
pub(crate) fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_dir(link)
}
