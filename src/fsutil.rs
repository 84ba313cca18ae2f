// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Filesystem primitives shared by the object, refs, and metadata trees.
//!
//! All durable files are produced the same way: stream into a temporary
//! file in a `tmp/` directory that shares a filesystem with the target, then
//! rename into place so that readers never observe partial content.
//!
//! Deletion of multi-file state uses a reversible intermediate: each doomed
//! file is first renamed with a `_delete` suffix, and only once every rename
//! has succeeded are the suffixed files unlinked. A failure part-way through
//! strips the suffixes to restore the previous state. Readers resolve only
//! unsuffixed names, so a suffixed file is logically absent.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::errors::{HashStoreError, Result};

/// Suffix marking a file as scheduled for deletion.
pub(crate) const DELETE_SUFFIX: &str = "_delete";

/// Atomically publish a temporary file at `target`, unless something is
/// already there.
///
/// Returns true when the rename happened and false when the target already
/// existed, in which case the temporary file is discarded. Concurrent
/// publishers of the same content race benignly: whichever rename loses
/// simply keeps the winner's identical bytes.
pub(crate) fn publish_noclobber(tmp: NamedTempFile, target: &Path) -> Result<bool> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }

    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(classify_persist_error(e, target)),
    }
}

/// Atomically replace whatever is at `target` with a temporary file.
pub(crate) fn replace_file(tmp: NamedTempFile, target: &Path) -> Result<()> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }

    tmp.as_file().sync_all()?;

    match tmp.persist(target) {
        Ok(_) => Ok(()),
        Err(e) => Err(classify_persist_error(e, target)),
    }
}

fn classify_persist_error(e: tempfile::PersistError, target: &Path) -> HashStoreError {
    if e.error.kind() == ErrorKind::CrossesDevices {
        HashStoreError::CrossDeviceMove {
            from: e.file.path().to_owned(),
            to: target.to_owned(),
        }
    } else {
        e.error.into()
    }
}

/// The `_delete`-suffixed sibling of a path.
pub(crate) fn delete_marker_path(p: &Path) -> PathBuf {
    let mut name = OsString::from(p.file_name().unwrap_or_default());
    name.push(DELETE_SUFFIX);
    p.with_file_name(name)
}

/// Rename a file to its `_delete` marker, returning the marker path.
pub(crate) fn rename_for_deletion(p: &Path) -> Result<PathBuf> {
    let marker = delete_marker_path(p);
    fs::rename(p, &marker)?;
    Ok(marker)
}

/// Undo [`rename_for_deletion`] for every marker, best effort. Used on the
/// failure path, where the original error matters more than these.
pub(crate) fn restore_renamed(markers: &[PathBuf]) {
    for marker in markers {
        let Some(name) = marker.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(original) = name.strip_suffix(DELETE_SUFFIX) else {
            continue;
        };

        if let Err(e) = fs::rename(marker, marker.with_file_name(original)) {
            warn!(
                marker = %marker.display(),
                error = %e,
                "could not restore a file scheduled for deletion"
            );
        }
    }
}

/// Unlink every marker, completing a deletion. A marker that is already
/// gone is fine.
pub(crate) fn commit_deletions(markers: &[PathBuf]) -> Result<()> {
    for marker in markers {
        match fs::remove_file(marker) {
            Ok(()) => {}
            Err(ref e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Remove empty directories from `start` upward, stopping at `stop`
/// (exclusive).
///
/// Pruning is opportunistic: another thread may drop a file into a
/// directory between our emptiness observation and the removal, so any
/// removal failure just ends the walk.
pub(crate) fn prune_empty_dirs(start: &Path, stop: &Path) {
    if !start.starts_with(stop) {
        return;
    }

    for dir in start.ancestors() {
        if dir == stop {
            return;
        }

        if fs::remove_dir(dir).is_err() {
            return;
        }
    }
}

/// Verify that two directories live on the same filesystem, so that a
/// rename between them is a single atomic syscall.
#[cfg(unix)]
pub(crate) fn check_same_filesystem(tmp_dir: &Path, final_dir: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let tmp_dev = fs::metadata(tmp_dir)?.dev();
    let final_dev = fs::metadata(final_dir)?.dev();

    if tmp_dev != final_dev {
        return Err(HashStoreError::CrossDeviceMove {
            from: tmp_dir.to_owned(),
            to: final_dir.to_owned(),
        });
    }

    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn check_same_filesystem(_tmp_dir: &Path, _final_dir: &Path) -> Result<()> {
    Ok(())
}
