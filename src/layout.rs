// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The sharded on-disk layout of the store.
//!
//! Hex digests are split into a fixed number of fixed-width path tokens so
//! that no single directory accumulates an unbounded number of entries. The
//! mapping is deterministic and reversible only by concatenation; nothing
//! about an identifier can be recovered from a path without rehashing.
//!
//! Everything under the store root lives in one of four trees:
//!
//! ```text
//! objects/<shard(cid)>                        object bytes
//! refs/pids/<shard(hash(pid))>                one line: the cid
//! refs/cids/<shard(cid)>                      one pid per line
//! metadata/<shard(hash(pid))>/<hash(pid+fid)> metadata documents
//! ```
//!
//! with a `tmp/` directory alongside each tree for in-flight files.

use std::path::{Path, PathBuf};

use crate::digests::{hash_identifier, Algorithm};

pub(crate) const OBJECTS_DIR: &str = "objects";
pub(crate) const METADATA_DIR: &str = "metadata";
pub(crate) const REFS_DIR: &str = "refs";
pub(crate) const REFS_PIDS_DIR: &str = "pids";
pub(crate) const REFS_CIDS_DIR: &str = "cids";
pub(crate) const TMP_DIR: &str = "tmp";

/// Split a hex digest into up to `depth` tokens of `width` characters,
/// with any remainder carried in a final token. No token is ever empty.
pub(crate) fn shard(depth: usize, width: usize, digest: &str) -> Vec<&str> {
    let mut tokens = Vec::with_capacity(depth + 1);
    let len = digest.len();

    for i in 0..depth {
        let start = i * width;
        if start >= len {
            return tokens;
        }
        tokens.push(&digest[start..len.min(start + width)]);
    }

    if depth * width < len {
        tokens.push(&digest[depth * width..]);
    }

    tokens
}

fn sharded_relpath(depth: usize, width: usize, digest: &str) -> PathBuf {
    let mut p = PathBuf::new();
    for token in shard(depth, width, digest) {
        p.push(token);
    }
    p
}

/// Resolves identifiers to paths under the store root.
///
/// All fields are fixed at store construction; the shard geometry and the
/// primary algorithm may never change for the life of a store directory.
#[derive(Clone, Debug)]
pub(crate) struct StoreLayout {
    root: PathBuf,
    depth: usize,
    width: usize,
    algorithm: Algorithm,
}

impl StoreLayout {
    pub fn new(root: PathBuf, depth: usize, width: usize, algorithm: Algorithm) -> Self {
        StoreLayout {
            root,
            depth,
            width,
            algorithm,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    pub fn objects_tmp_dir(&self) -> PathBuf {
        self.objects_dir().join(TMP_DIR)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn metadata_tmp_dir(&self) -> PathBuf {
        self.metadata_dir().join(TMP_DIR)
    }

    pub fn refs_pids_dir(&self) -> PathBuf {
        self.root.join(REFS_DIR).join(REFS_PIDS_DIR)
    }

    pub fn refs_cids_dir(&self) -> PathBuf {
        self.root.join(REFS_DIR).join(REFS_CIDS_DIR)
    }

    pub fn refs_tmp_dir(&self) -> PathBuf {
        self.root.join(REFS_DIR).join(TMP_DIR)
    }

    /// The path holding the bytes of the object with the given cid.
    pub fn object_path(&self, cid: &str) -> PathBuf {
        self.objects_dir()
            .join(sharded_relpath(self.depth, self.width, cid))
    }

    /// The path of the file recording which cid a pid is bound to.
    pub fn pid_refs_path(&self, pid: &str) -> PathBuf {
        let digest = hash_identifier(self.algorithm, pid);
        self.refs_pids_dir()
            .join(sharded_relpath(self.depth, self.width, &digest))
    }

    /// The path of the file recording which pids are bound to a cid.
    pub fn cid_refs_path(&self, cid: &str) -> PathBuf {
        self.refs_cids_dir()
            .join(sharded_relpath(self.depth, self.width, cid))
    }

    /// The directory holding all metadata documents for a pid.
    pub fn metadata_dir_for_pid(&self, pid: &str) -> PathBuf {
        let digest = hash_identifier(self.algorithm, pid);
        self.metadata_dir()
            .join(sharded_relpath(self.depth, self.width, &digest))
    }

    /// The file name of one metadata document: the digest of the pid with
    /// the format id appended.
    pub fn metadata_doc_name(&self, pid: &str, format_id: &str) -> String {
        let mut joined = String::with_capacity(pid.len() + format_id.len());
        joined.push_str(pid);
        joined.push_str(format_id);
        hash_identifier(self.algorithm, &joined)
    }

    /// The path of the metadata document for a `(pid, formatId)` pair.
    pub fn metadata_path(&self, pid: &str, format_id: &str) -> PathBuf {
        self.metadata_dir_for_pid(pid)
            .join(self.metadata_doc_name(pid, format_id))
    }

    /// Reassemble a cid from an object file's path relative to `objects/`.
    ///
    /// Returns `None` for paths that cannot be a sharded digest of the
    /// store's primary algorithm, such as stray files left by other tools.
    pub fn cid_from_object_relpath(&self, relpath: &Path) -> Option<String> {
        let mut cid = String::new();

        for component in relpath.components() {
            let token = component.as_os_str().to_str()?;
            cid.push_str(token);
        }

        let plausible = cid.len() == self.algorithm.hex_len()
            && cid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));

        plausible.then_some(cid)
    }
}
