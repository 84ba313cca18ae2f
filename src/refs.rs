// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The reference files binding pids to cids.
//!
//! A pid-refs file holds exactly one line, the cid the pid is bound to. A
//! cid-refs file holds one pid per line, insertion order preserved, and is
//! the reverse index that makes deduplication and safe deletion possible: an
//! object may be unlinked only once its cid-refs file lists nobody.
//!
//! Both files are always rewritten whole through a temp file in `refs/tmp/`,
//! so readers see either the old set or the new set, never a torn one.
//!
//! Callers of the tag and untag machinery hold the relevant pid and cid
//! locks; nothing here acquires locks itself.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::errors::{HashStoreError, Result};
use crate::fsutil;
use crate::layout::StoreLayout;

/// How a pid's reference records relate to the rest of the store, as
/// reported by [`crate::HashStore::find_object`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefsStatus {
    /// Both refs files agree and the object file is present.
    Ok,

    /// The cid-refs file exists but does not list this pid.
    OrphanPid,

    /// Both refs files agree but the object file is missing.
    OrphanRefs,

    /// The cid-refs file is missing entirely.
    MissingRefs,
}

/// The result of resolving a pid: the bound cid, plus an integrity summary.
#[derive(Clone, Debug)]
pub struct FoundObject {
    pub cid: String,
    pub status: RefsStatus,
}

/// Read the cid recorded for a pid, or `None` if the pid is unbound.
pub(crate) fn read_pid_refs(layout: &StoreLayout, pid: &str) -> Result<Option<String>> {
    let path = layout.pid_refs_path(pid);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let cid = text.trim();
    if cid.is_empty() {
        warn!(pid, path = %path.display(), "ignoring empty pid-refs file");
        return Ok(None);
    }

    Ok(Some(cid.to_owned()))
}

/// Read the pids recorded for a cid, or `None` if no cid-refs file exists.
pub(crate) fn read_cid_refs(layout: &StoreLayout, cid: &str) -> Result<Option<Vec<String>>> {
    let path = layout.cid_refs_path(cid);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(
        text.lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect(),
    ))
}

fn write_refs_file(layout: &StoreLayout, lines: &[&str], target: PathBuf) -> Result<()> {
    let tmp_dir = layout.refs_tmp_dir();
    fs::create_dir_all(&tmp_dir)?;

    let mut tmp = NamedTempFile::new_in(&tmp_dir)?;
    for line in lines {
        writeln!(tmp, "{}", line)?;
    }
    tmp.flush()?;

    fsutil::replace_file(tmp, &target)
}

pub(crate) fn write_pid_refs(layout: &StoreLayout, pid: &str, cid: &str) -> Result<()> {
    write_refs_file(layout, &[cid], layout.pid_refs_path(pid))
}

pub(crate) fn write_cid_refs(layout: &StoreLayout, cid: &str, pids: &[String]) -> Result<()> {
    let lines: Vec<&str> = pids.iter().map(String::as_str).collect();
    write_refs_file(layout, &lines, layout.cid_refs_path(cid))
}

/// Record the pid↔cid binding in both refs files.
///
/// Idempotency rules: a pid bound to a different cid is refused; a binding
/// already recorded on both sides is reported as already existing; a pid-refs
/// file whose cid-refs counterpart is missing or incomplete (the footprint of
/// an interrupted earlier tag) is repaired by rewriting the cid side.
pub(crate) fn tag(layout: &StoreLayout, pid: &str, cid: &str) -> Result<()> {
    match read_pid_refs(layout, pid)? {
        Some(existing) if existing != cid => {
            return Err(HashStoreError::PidAlreadyRefsOtherCid {
                pid: pid.to_owned(),
                cid: existing,
            });
        }

        Some(_) => {
            let pids = read_cid_refs(layout, cid)?;

            if matches!(&pids, Some(pids) if pids.iter().any(|p| p == pid)) {
                return Err(HashStoreError::HashStoreRefsAlreadyExist {
                    pid: pid.to_owned(),
                    cid: cid.to_owned(),
                });
            }

            warn!(pid, cid, "repairing cid-refs file missing a bound pid");
            let mut pids = pids.unwrap_or_default();
            pids.push(pid.to_owned());
            write_cid_refs(layout, cid, &pids)
        }

        None => {
            write_pid_refs(layout, pid, cid)?;

            let mut pids = read_cid_refs(layout, cid)?.unwrap_or_default();
            if !pids.iter().any(|p| p == pid) {
                pids.push(pid.to_owned());
                write_cid_refs(layout, cid, &pids)?;
            }

            Ok(())
        }
    }
}

/// Resolve a pid and summarize the integrity of its records.
pub(crate) fn find(layout: &StoreLayout, pid: &str) -> Result<FoundObject> {
    let cid = read_pid_refs(layout, pid)?
        .ok_or_else(|| HashStoreError::PidRefsFileNotFound(pid.to_owned()))?;

    let status = match read_cid_refs(layout, &cid)? {
        None => RefsStatus::MissingRefs,

        Some(pids) if !pids.iter().any(|p| p == pid) => RefsStatus::OrphanPid,

        Some(_) => {
            if layout.object_path(&cid).is_file() {
                RefsStatus::Ok
            } else {
                RefsStatus::OrphanRefs
            }
        }
    };

    Ok(FoundObject { cid, status })
}

/// Check that both refs files record the given binding and that the object
/// is present, reporting the first inconsistency found.
pub(crate) fn verify_refs(layout: &StoreLayout, pid: &str, cid: &str) -> Result<()> {
    match read_pid_refs(layout, pid)? {
        None => {
            return Err(HashStoreError::PidRefsFileNotFound(pid.to_owned()));
        }

        Some(found) if found != cid => {
            return Err(HashStoreError::CidNotInPidRefs {
                pid: pid.to_owned(),
                expected: cid.to_owned(),
                found,
            });
        }

        Some(_) => {}
    }

    match read_cid_refs(layout, cid)? {
        None => {
            return Err(HashStoreError::OrphanPidRefs {
                pid: pid.to_owned(),
                cid: cid.to_owned(),
            });
        }

        Some(pids) if !pids.iter().any(|p| p == pid) => {
            return Err(HashStoreError::PidNotInCidRefs {
                pid: pid.to_owned(),
                cid: cid.to_owned(),
            });
        }

        Some(_) => {}
    }

    if !layout.object_path(cid).is_file() {
        return Err(HashStoreError::OrphanRefs(cid.to_owned()));
    }

    Ok(())
}

/// Remove the pid↔cid binding, and the object itself once nobody else
/// references it.
///
/// Files are first renamed with the deletion suffix; only after every
/// rename has succeeded are they unlinked. On failure the renames are
/// reversed, restoring the binding.
pub(crate) fn untag(layout: &StoreLayout, pid: &str, cid: &str) -> Result<()> {
    let mut markers = Vec::with_capacity(3);

    if let Err(e) = untag_inner(layout, pid, cid, &mut markers) {
        fsutil::restore_renamed(&markers);
        return Err(e);
    }

    fsutil::commit_deletions(&markers)?;

    // The binding is gone; give back directories that are now empty.
    if let Some(dir) = layout.pid_refs_path(pid).parent() {
        fsutil::prune_empty_dirs(dir, &layout.refs_pids_dir());
    }
    if let Some(dir) = layout.cid_refs_path(cid).parent() {
        fsutil::prune_empty_dirs(dir, &layout.refs_cids_dir());
    }
    if let Some(dir) = layout.object_path(cid).parent() {
        fsutil::prune_empty_dirs(dir, &layout.objects_dir());
    }

    Ok(())
}

fn untag_inner(
    layout: &StoreLayout,
    pid: &str,
    cid: &str,
    markers: &mut Vec<PathBuf>,
) -> Result<()> {
    markers.push(fsutil::rename_for_deletion(&layout.pid_refs_path(pid))?);

    let remaining: Vec<String> = read_cid_refs(layout, cid)?
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p != pid)
        .collect();

    if remaining.is_empty() {
        let cid_refs = layout.cid_refs_path(cid);
        if cid_refs.is_file() {
            markers.push(fsutil::rename_for_deletion(&cid_refs)?);
        }

        let object = layout.object_path(cid);
        if object.is_file() {
            markers.push(fsutil::rename_for_deletion(&object)?);
        }
    } else {
        write_cid_refs(layout, cid, &remaining)?;
    }

    Ok(())
}
