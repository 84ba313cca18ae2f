// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The store itself: ingestion, resolution, verification, and deletion.
//!
//! Every mutating public operation follows the same shape: validate the
//! arguments before touching anything, serialize on the identifiers
//! involved, do all writes through temp files, and publish with atomic
//! renames. Reads take no locks at all; they rely on the fact that a
//! half-written file is never reachable under its final name.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::digests::{self, Algorithm, MultiDigester, READ_BUFFER_SIZE};
use crate::errors::{HashStoreError, Result};
use crate::fsutil::{self, DELETE_SUFFIX};
use crate::layout::StoreLayout;
use crate::locks::LockRegistry;
use crate::metadata;
use crate::refs::{self, FoundObject};

/// Everything known about an object at the end of ingestion: the pid it was
/// stored under (absent for pid-less ingests), the cid its bytes hash to,
/// its size in bytes, and every digest computed during the streaming pass.
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub pid: Option<String>,
    pub cid: String,
    pub size: u64,
    pub hex_digests: BTreeMap<Algorithm, String>,
}

/// A content-addressed object store rooted at one directory.
///
/// The store is safe to share across threads; per-identifier locks
/// serialize writers while readers go straight to the filesystem. A store
/// directory must have at most one writing process.
pub struct HashStore {
    config: StoreConfig,
    layout: StoreLayout,
    locks: LockRegistry,
}

impl HashStore {
    /// Open or create the store described by `config`.
    ///
    /// A directory that already carries a descriptor must have been created
    /// with exactly this configuration. The category and tmp directories
    /// are created up front, and each tmp directory is checked to share a
    /// filesystem with its final tree so that publication renames are
    /// atomic.
    pub fn new(config: StoreConfig) -> Result<HashStore> {
        config.validate()?;

        let canonical_root = config.ensure_descriptor()?;
        let layout = StoreLayout::new(
            canonical_root.clone(),
            config.store_depth,
            config.store_width,
            config.store_algorithm,
        );

        for dir in [
            layout.objects_dir(),
            layout.objects_tmp_dir(),
            layout.metadata_dir(),
            layout.metadata_tmp_dir(),
            layout.refs_pids_dir(),
            layout.refs_cids_dir(),
            layout.refs_tmp_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        fsutil::check_same_filesystem(&layout.objects_tmp_dir(), &layout.objects_dir())?;
        fsutil::check_same_filesystem(&layout.metadata_tmp_dir(), &layout.metadata_dir())?;
        fsutil::check_same_filesystem(&layout.refs_tmp_dir(), &layout.refs_pids_dir())?;
        fsutil::check_same_filesystem(&layout.refs_tmp_dir(), &layout.refs_cids_dir())?;

        Ok(HashStore {
            config: StoreConfig {
                store_path: canonical_root,
                ..config
            },
            layout,
            locks: LockRegistry::default(),
        })
    }

    /// The configuration this store was opened with, root canonicalized.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Ingest an object from `reader` and bind it to `pid`.
    ///
    /// The stream is written once, to a temp file, while the five default
    /// digests plus any requested extras are computed. If a checksum and
    /// its algorithm are supplied the computed digest must match, and if
    /// `obj_size` is supplied the byte count must match; either mismatch
    /// discards the temp file without touching the store.
    ///
    /// Content that hashes to a cid already present is deduplicated: the
    /// existing object file is kept and the pid is bound to it. Storing the
    /// same pid again succeeds as long as the content still hashes to the
    /// bound cid.
    pub fn store_object(
        &self,
        reader: impl Read,
        pid: &str,
        additional_algorithm: Option<&str>,
        checksum: Option<&str>,
        checksum_algorithm: Option<&str>,
        obj_size: Option<u64>,
    ) -> Result<ObjectInfo> {
        check_identifier("pid", pid)?;

        let additional = additional_algorithm
            .map(|s| s.parse::<Algorithm>())
            .transpose()?;

        let checksum_alg = match (checksum, checksum_algorithm) {
            (Some(_), None) => {
                return Err(HashStoreError::InvalidArgument(
                    "a checksum requires a checksum algorithm".to_owned(),
                ));
            }
            (_, Some(s)) => Some(s.parse::<Algorithm>()?),
            (None, None) => None,
        };

        if matches!(checksum, Some(c) if c.trim().is_empty()) {
            return Err(HashStoreError::InvalidArgument(
                "checksum must not be empty".to_owned(),
            ));
        }

        if obj_size == Some(0) {
            return Err(HashStoreError::InvalidArgument(
                "expected object size must be positive".to_owned(),
            ));
        }

        let _pid_lock = self.locks.lock_pid(pid);

        let extras = additional.into_iter().chain(checksum_alg);
        let (tmp, size, hex_digests) = self.ingest(reader, extras)?;

        if let Some(expected) = obj_size {
            if expected != size {
                return Err(HashStoreError::SizeMismatch {
                    expected,
                    actual: size,
                });
            }
        }

        if let (Some(supplied), Some(alg)) = (checksum, checksum_alg) {
            let computed = &hex_digests[&alg];
            if !supplied.eq_ignore_ascii_case(computed) {
                return Err(HashStoreError::ChecksumMismatch {
                    algorithm: alg.to_string(),
                    expected: supplied.to_lowercase(),
                    computed: computed.clone(),
                });
            }
        }

        let cid = hex_digests[&self.layout.algorithm()].clone();
        let object_path = self.layout.object_path(&cid);

        {
            // Publication and tagging share the cid lock so that a delete
            // of this cid cannot slip between the existence check and the
            // binding.
            let _cid_lock = self.locks.lock_cid(&cid);

            if object_path.is_file() {
                debug!(%cid, "content already stored; discarding duplicate bytes");
                drop(tmp);
            } else {
                // Losing the publication race to a concurrent writer of
                // the same content is equivalent to having found the file
                // above.
                fsutil::publish_noclobber(tmp, &object_path)?;
            }

            match refs::tag(&self.layout, pid, &cid) {
                Ok(()) => {}
                Err(HashStoreError::HashStoreRefsAlreadyExist { .. }) => {
                    debug!(pid, %cid, "binding already recorded");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ObjectInfo {
            pid: Some(pid.to_owned()),
            cid,
            size,
            hex_digests,
        })
    }

    /// Ingest an object without binding it to any pid.
    ///
    /// This is the first half of the two-step workflow: store the bytes,
    /// validate them with [`Self::verify_object`], and only then make them
    /// discoverable with [`Self::tag_object`]. Until a tag lands, the
    /// object is invisible to pid-based lookups and is fair game for the
    /// orphan sweep.
    pub fn store_object_only(&self, reader: impl Read) -> Result<ObjectInfo> {
        let (tmp, size, hex_digests) = self.ingest(reader, None::<Algorithm>)?;

        let cid = hex_digests[&self.layout.algorithm()].clone();
        let object_path = self.layout.object_path(&cid);

        {
            let _cid_lock = self.locks.lock_cid(&cid);

            if object_path.is_file() {
                debug!(%cid, "content already stored; discarding duplicate bytes");
                drop(tmp);
            } else {
                fsutil::publish_noclobber(tmp, &object_path)?;
            }
        }

        Ok(ObjectInfo {
            pid: None,
            cid,
            size,
            hex_digests,
        })
    }

    /// One pass over the input: stream to a temp file under `objects/tmp/`
    /// while updating every scheduled digest context. The temp file is
    /// removed automatically unless the caller goes on to publish it.
    fn ingest(
        &self,
        mut reader: impl Read,
        extras: impl IntoIterator<Item = Algorithm>,
    ) -> Result<(NamedTempFile, u64, BTreeMap<Algorithm, String>)> {
        let tmp_dir = self.layout.objects_tmp_dir();
        fs::create_dir_all(&tmp_dir)?;

        let mut tmp = NamedTempFile::new_in(&tmp_dir)?;
        let mut digester =
            MultiDigester::new([self.layout.algorithm()].into_iter().chain(extras));

        let mut size = 0u64;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }

            tmp.write_all(&buf[..n])?;
            digester.update(&buf[..n]);
            size += n as u64;
        }

        tmp.flush()?;

        Ok((tmp, size, digester.finish()))
    }

    /// Bind `pid` to an object already present under `cid`.
    ///
    /// Retagging an identical binding reports
    /// [`HashStoreError::HashStoreRefsAlreadyExist`]; a pid bound to some
    /// other cid reports [`HashStoreError::PidAlreadyRefsOtherCid`].
    pub fn tag_object(&self, pid: &str, cid: &str) -> Result<()> {
        check_identifier("pid", pid)?;
        check_identifier("cid", cid)?;

        let _pid_lock = self.locks.lock_pid(pid);
        let _cid_lock = self.locks.lock_cid(cid);

        if !self.layout.object_path(cid).is_file() {
            return Err(HashStoreError::NotFound(format!(
                "no object file for cid `{}`",
                cid
            )));
        }

        refs::tag(&self.layout, pid, cid)
    }

    /// Resolve the cid bound to `pid`, along with an integrity summary of
    /// its records. Takes no locks.
    pub fn find_object(&self, pid: &str) -> Result<FoundObject> {
        check_identifier("pid", pid)?;
        refs::find(&self.layout, pid)
    }

    /// Check that both refs files record the `pid` ↔ `cid` binding and that
    /// the object file exists.
    pub fn verify_refs(&self, pid: &str, cid: &str) -> Result<()> {
        check_identifier("pid", pid)?;
        check_identifier("cid", cid)?;
        refs::verify_refs(&self.layout, pid, cid)
    }

    /// Validate a previously stored object against an externally supplied
    /// checksum and size.
    ///
    /// On mismatch, any binding of `info.pid` to `info.cid` is removed, and
    /// the object itself is deleted if nothing else references it, before
    /// the mismatch is reported. Callers use this to withhold
    /// discoverability until the bytes they stored are confirmed.
    pub fn verify_object(
        &self,
        info: &ObjectInfo,
        checksum: &str,
        checksum_algorithm: &str,
        obj_size: u64,
    ) -> Result<()> {
        let alg: Algorithm = checksum_algorithm.parse()?;

        let computed = info.hex_digests.get(&alg).ok_or_else(|| {
            HashStoreError::InvalidArgument(format!(
                "object info carries no {} digest to compare against",
                alg
            ))
        })?;

        if info.size != obj_size {
            self.discard_invalid(info)?;
            return Err(HashStoreError::SizeMismatch {
                expected: obj_size,
                actual: info.size,
            });
        }

        if !checksum.eq_ignore_ascii_case(computed) {
            self.discard_invalid(info)?;
            return Err(HashStoreError::ChecksumMismatch {
                algorithm: alg.to_string(),
                expected: checksum.to_lowercase(),
                computed: computed.clone(),
            });
        }

        Ok(())
    }

    /// Back out an object that failed verification: unbind its pid if one
    /// was bound, then drop the object file unless other pids still
    /// reference it.
    fn discard_invalid(&self, info: &ObjectInfo) -> Result<()> {
        if let Some(pid) = &info.pid {
            let _pid_lock = self.locks.lock_pid(pid);

            if refs::read_pid_refs(&self.layout, pid)?.as_deref() == Some(info.cid.as_str()) {
                let _cid_lock = self.locks.lock_cid(&info.cid);
                warn!(
                    pid = %pid,
                    cid = %info.cid,
                    "removing binding of an object that failed verification"
                );
                return refs::untag(&self.layout, pid, &info.cid);
            }
        }

        self.delete_object_by_cid(&info.cid)
    }

    /// Open the object bound to `pid` for reading.
    pub fn retrieve_object(&self, pid: &str) -> Result<fs::File> {
        check_identifier("pid", pid)?;

        let found = refs::find(&self.layout, pid).map_err(|e| match e {
            HashStoreError::PidRefsFileNotFound(_) => {
                HashStoreError::NotFound(format!("pid `{}` is not bound to an object", pid))
            }
            e => e,
        })?;

        fs::File::open(self.layout.object_path(&found.cid)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                HashStoreError::NotFound(format!(
                    "object file for pid `{}` (cid `{}`) is missing",
                    pid, found.cid
                ))
            } else {
                e.into()
            }
        })
    }

    /// Remove the binding of `pid`, and its object once the last binding is
    /// gone.
    pub fn delete_object(&self, pid: &str) -> Result<()> {
        check_identifier("pid", pid)?;

        let _pid_lock = self.locks.lock_pid(pid);

        let cid = refs::read_pid_refs(&self.layout, pid)?
            .ok_or_else(|| HashStoreError::PidRefsFileNotFound(pid.to_owned()))?;

        let _cid_lock = self.locks.lock_cid(&cid);
        refs::untag(&self.layout, pid, &cid)
    }

    /// Remove an object by cid, but only if nothing references it. An
    /// object that still has bound pids is quietly left in place.
    pub fn delete_object_by_cid(&self, cid: &str) -> Result<()> {
        check_identifier("cid", cid)?;

        let _cid_lock = self.locks.lock_cid(cid);

        if let Some(pids) = refs::read_cid_refs(&self.layout, cid)? {
            if !pids.is_empty() {
                debug!(cid, refs = pids.len(), "cid still referenced; not deleting");
                return Ok(());
            }
        }

        let mut markers = Vec::with_capacity(2);
        let result = (|| -> Result<()> {
            let cid_refs = self.layout.cid_refs_path(cid);
            if cid_refs.is_file() {
                markers.push(fsutil::rename_for_deletion(&cid_refs)?);
            }

            let object = self.layout.object_path(cid);
            if object.is_file() {
                markers.push(fsutil::rename_for_deletion(&object)?);
            }

            Ok(())
        })();

        if let Err(e) = result {
            fsutil::restore_renamed(&markers);
            return Err(e);
        }

        fsutil::commit_deletions(&markers)?;

        if let Some(dir) = self.layout.cid_refs_path(cid).parent() {
            fsutil::prune_empty_dirs(dir, &self.layout.refs_cids_dir());
        }
        if let Some(dir) = self.layout.object_path(cid).parent() {
            fsutil::prune_empty_dirs(dir, &self.layout.objects_dir());
        }

        Ok(())
    }

    /// Store a metadata document for `pid`. With no `format_id` the store's
    /// default metadata namespace is used. Returns the document name.
    pub fn store_metadata(
        &self,
        mut reader: impl Read,
        pid: &str,
        format_id: Option<&str>,
    ) -> Result<String> {
        check_identifier("pid", pid)?;
        let format_id = self.resolve_format_id(format_id)?;

        let doc_name = self.layout.metadata_doc_name(pid, &format_id);
        let _doc_lock = self.locks.lock_metadata_doc(&doc_name);

        metadata::store(&self.layout, &mut reader, pid, &format_id)
    }

    /// Open a metadata document for reading. With no `format_id` the
    /// store's default metadata namespace is used.
    pub fn retrieve_metadata(&self, pid: &str, format_id: Option<&str>) -> Result<fs::File> {
        check_identifier("pid", pid)?;
        let format_id = self.resolve_format_id(format_id)?;

        metadata::retrieve(&self.layout, pid, &format_id)
    }

    /// Delete metadata for `pid`: the one document named by `format_id`, or
    /// every document the pid has when `format_id` is `None`.
    pub fn delete_metadata(&self, pid: &str, format_id: Option<&str>) -> Result<()> {
        check_identifier("pid", pid)?;

        match format_id {
            Some(fid) => {
                check_identifier("formatId", fid)?;

                let doc_name = self.layout.metadata_doc_name(pid, fid);
                let _doc_lock = self.locks.lock_metadata_doc(&doc_name);

                metadata::delete_doc(&self.layout, pid, fid)
            }

            None => {
                for doc_name in metadata::list_docs(&self.layout, pid)? {
                    let _doc_lock = self.locks.lock_metadata_doc(&doc_name);
                    metadata::delete_named_doc(&self.layout, pid, &doc_name)?;
                }

                Ok(())
            }
        }
    }

    /// Stream the object bound to `pid` through the named algorithm and
    /// return the lower-case hex digest.
    pub fn get_hex_digest(&self, pid: &str, algorithm: &str) -> Result<String> {
        check_identifier("pid", pid)?;
        let alg: Algorithm = algorithm.parse()?;

        let found = refs::find(&self.layout, pid)?;
        let path = self.layout.object_path(&found.cid);

        if !path.is_file() {
            return Err(HashStoreError::NotFound(format!(
                "object file for pid `{}` (cid `{}`) is missing",
                pid, found.cid
            )));
        }

        digests::digest_of_file(alg, path)
    }

    /// Delete object files that no cid-refs file accounts for, returning
    /// how many were removed.
    ///
    /// This is offline maintenance for the garbage left by ingests that
    /// published bytes but failed before binding them. Cids whose lock is
    /// held by a live operation are skipped rather than waited on.
    pub fn sweep_orphaned_objects(&self) -> Result<usize> {
        let objects_dir = self.layout.objects_dir();
        let tmp_dir = self.layout.objects_tmp_dir();

        // Gather candidates first so nothing is unlinked underneath the
        // directory walk.
        let mut candidates = Vec::new();

        for entry in WalkDir::new(&objects_dir) {
            let entry = entry.map_err(std::io::Error::from)?;

            if entry.path().starts_with(&tmp_dir) || !entry.file_type().is_file() {
                continue;
            }

            if entry.file_name().to_string_lossy().ends_with(DELETE_SUFFIX) {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&objects_dir)
                .expect("walked path is under the objects tree");

            let Some(cid) = self.layout.cid_from_object_relpath(rel) else {
                debug!(path = %entry.path().display(), "skipping non-digest file in objects tree");
                continue;
            };

            if !self.layout.cid_refs_path(&cid).is_file() {
                candidates.push((entry.into_path(), cid));
            }
        }

        let mut removed = 0;

        for (path, cid) in candidates {
            let Ok(_cid_lock) = self.locks.try_lock_cid(&cid) else {
                debug!(%cid, "cid busy; leaving it for a later sweep");
                continue;
            };

            // Recheck under the lock: a tag may have landed since.
            if self.layout.cid_refs_path(&cid).is_file() {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    warn!(%cid, "removed unreferenced object file");
                    removed += 1;
                }
                Err(ref e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(dir) = path.parent() {
                fsutil::prune_empty_dirs(dir, &objects_dir);
            }
        }

        Ok(removed)
    }

    fn resolve_format_id(&self, format_id: Option<&str>) -> Result<String> {
        match format_id {
            Some(fid) => {
                check_identifier("formatId", fid)?;
                Ok(fid.to_owned())
            }
            None => Ok(self.config.store_metadata_namespace.clone()),
        }
    }

    #[cfg(test)]
    pub(crate) fn layout(&self) -> &StoreLayout {
        &self.layout
    }
}

fn check_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(HashStoreError::InvalidArgument(format!(
            "{} must not be empty",
            what
        )));
    }

    if value.chars().any(char::is_whitespace) {
        return Err(HashStoreError::InvalidArgument(format!(
            "{} must not contain whitespace",
            what
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::RefsStatus;
    use std::path::Path;

    fn count_files(dir: &Path) -> usize {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    const CONTENT: &[u8] = b"Test content for the scientific data object.\n";

    fn fresh_store() -> (tempfile::TempDir, HashStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::new(StoreConfig::new(dir.path().join("store"))).unwrap();
        (dir, store)
    }

    fn sha256_hex(data: &[u8]) -> String {
        digests::digest_of_reader(Algorithm::Sha256, &mut &data[..]).unwrap()
    }

    #[test]
    fn store_and_retrieve() {
        let (_dir, store) = fresh_store();

        let info = store
            .store_object(CONTENT, "jtao.1700.1", None, None, None, None)
            .unwrap();

        let expected_cid = sha256_hex(CONTENT);
        assert_eq!(info.cid, expected_cid);
        assert_eq!(info.size, CONTENT.len() as u64);
        assert_eq!(info.hex_digests.len(), 5);
        assert_eq!(info.hex_digests[&Algorithm::Sha256], expected_cid);

        // The object landed at the sharded path for its cid.
        let object_path = store.layout().object_path(&expected_cid);
        assert!(object_path.is_file());
        assert!(object_path.starts_with(store.layout().objects_dir()));

        // The pid-refs file holds the cid; the cid-refs file holds the pid.
        let pid_refs = store.layout().pid_refs_path("jtao.1700.1");
        assert_eq!(fs::read_to_string(pid_refs).unwrap().trim(), expected_cid);

        let cid_refs = store.layout().cid_refs_path(&expected_cid);
        assert_eq!(fs::read_to_string(cid_refs).unwrap(), "jtao.1700.1\n");

        let found = store.find_object("jtao.1700.1").unwrap();
        assert_eq!(found.cid, expected_cid);
        assert_eq!(found.status, RefsStatus::Ok);
        store.verify_refs("jtao.1700.1", &expected_cid).unwrap();

        let mut bytes = Vec::new();
        store
            .retrieve_object("jtao.1700.1")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, CONTENT);
    }

    #[test]
    fn identical_content_under_two_pids_is_deduplicated() {
        let (_dir, store) = fresh_store();

        let a = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        let b = store.store_object(CONTENT, "pid.b", None, None, None, None).unwrap();
        assert_eq!(a.cid, b.cid);

        assert_eq!(count_files(&store.layout().objects_dir()), 1);
        assert_eq!(count_files(&store.layout().refs_pids_dir()), 2);
        assert_eq!(count_files(&store.layout().refs_cids_dir()), 1);

        // Pids are listed in insertion order.
        let cid_refs = store.layout().cid_refs_path(&a.cid);
        assert_eq!(fs::read_to_string(cid_refs).unwrap(), "pid.a\npid.b\n");
    }

    #[test]
    fn checksum_mismatch_leaves_no_trace() {
        let (_dir, store) = fresh_store();

        let result =
            store.store_object(CONTENT, "pid.a", None, Some("deadbeef"), Some("SHA-256"), None);
        assert!(matches!(
            result,
            Err(HashStoreError::ChecksumMismatch { .. })
        ));

        assert_eq!(count_files(&store.layout().objects_dir()), 0);
        assert_eq!(count_files(&store.layout().refs_pids_dir()), 0);
        assert!(matches!(
            store.find_object("pid.a"),
            Err(HashStoreError::PidRefsFileNotFound(_))
        ));
    }

    #[test]
    fn matching_checksum_and_size_are_accepted() {
        let (_dir, store) = fresh_store();
        let checksum = sha256_hex(CONTENT);

        let info = store
            .store_object(
                CONTENT,
                "pid.a",
                None,
                Some(&checksum),
                Some("SHA-256"),
                Some(CONTENT.len() as u64),
            )
            .unwrap();
        assert_eq!(info.cid, checksum);

        // Upper-case checksums compare equal after lower-casing.
        let upper = checksum.to_uppercase();
        store
            .store_object(CONTENT, "pid.a", None, Some(&upper), Some("SHA-256"), None)
            .unwrap();
    }

    #[test]
    fn size_mismatch_is_refused() {
        let (_dir, store) = fresh_store();

        let result = store.store_object(CONTENT, "pid.a", None, None, None, Some(1));
        assert!(matches!(
            result,
            Err(HashStoreError::SizeMismatch {
                expected: 1,
                actual,
            }) if actual == CONTENT.len() as u64
        ));
        assert_eq!(count_files(&store.layout().objects_dir()), 0);
    }

    #[test]
    fn invalid_arguments_are_refused_before_any_io() {
        let (_dir, store) = fresh_store();

        for pid in ["", "has space", "has\ttab", "has\nnewline"] {
            assert!(matches!(
                store.store_object(CONTENT, pid, None, None, None, None),
                Err(HashStoreError::InvalidArgument(_))
            ));
        }

        assert!(matches!(
            store.store_object(CONTENT, "pid.a", None, Some("abc123"), None, None),
            Err(HashStoreError::InvalidArgument(_))
        ));

        assert!(matches!(
            store.store_object(CONTENT, "pid.a", Some("sha256"), None, None, None),
            Err(HashStoreError::UnsupportedAlgorithm(_))
        ));

        assert!(matches!(
            store.store_object(CONTENT, "pid.a", None, None, None, Some(0)),
            Err(HashStoreError::InvalidArgument(_))
        ));

        assert_eq!(count_files(&store.layout().objects_dir()), 0);
    }

    #[test]
    fn restoring_a_pid_is_idempotent_by_cid() {
        let (_dir, store) = fresh_store();

        let first = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        let second = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        assert_eq!(first.cid, second.cid);
        assert_eq!(count_files(&store.layout().objects_dir()), 1);

        // Different content under the same pid is refused.
        let result = store.store_object(&b"other bytes"[..], "pid.a", None, None, None, None);
        assert!(matches!(
            result,
            Err(HashStoreError::PidAlreadyRefsOtherCid { .. })
        ));

        // The pid still resolves to its original content.
        assert_eq!(store.find_object("pid.a").unwrap().cid, first.cid);
    }

    #[test]
    fn additional_algorithms_join_the_digest_pass() {
        let (_dir, store) = fresh_store();

        let info = store
            .store_object(CONTENT, "pid.a", Some("SHA-512/256"), None, None, None)
            .unwrap();
        assert_eq!(info.hex_digests.len(), 6);

        let expected =
            digests::digest_of_reader(Algorithm::Sha512_256, &mut &CONTENT[..]).unwrap();
        assert_eq!(info.hex_digests[&Algorithm::Sha512_256], expected);

        // An extra naming an algorithm already scheduled changes nothing.
        let info = store
            .store_object(CONTENT, "pid.a", Some("SHA-256"), None, None, None)
            .unwrap();
        assert_eq!(info.hex_digests.len(), 5);
    }

    #[test]
    fn verify_object_confirms_or_unbinds() {
        let (_dir, store) = fresh_store();

        let info = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        let checksum = sha256_hex(CONTENT);

        store
            .verify_object(&info, &checksum, "SHA-256", CONTENT.len() as u64)
            .unwrap();
        assert_eq!(store.find_object("pid.a").unwrap().status, RefsStatus::Ok);

        let result = store.verify_object(&info, "deadbeef", "SHA-256", CONTENT.len() as u64);
        assert!(matches!(
            result,
            Err(HashStoreError::ChecksumMismatch { .. })
        ));

        // The tentative binding and the unshared object are gone.
        assert!(matches!(
            store.find_object("pid.a"),
            Err(HashStoreError::PidRefsFileNotFound(_))
        ));
        assert_eq!(count_files(&store.layout().objects_dir()), 0);
    }

    #[test]
    fn two_step_ingestion_stores_then_tags() {
        let (_dir, store) = fresh_store();

        let info = store.store_object_only(CONTENT).unwrap();
        assert_eq!(info.pid, None);
        assert!(store.layout().object_path(&info.cid).is_file());

        // Not discoverable until tagged.
        assert!(matches!(
            store.find_object("pid.a"),
            Err(HashStoreError::PidRefsFileNotFound(_))
        ));

        store
            .verify_object(&info, &sha256_hex(CONTENT), "SHA-256", CONTENT.len() as u64)
            .unwrap();
        store.tag_object("pid.a", &info.cid).unwrap();
        assert_eq!(store.find_object("pid.a").unwrap().status, RefsStatus::Ok);
    }

    #[test]
    fn failed_verification_of_untagged_bytes_discards_them() {
        let (_dir, store) = fresh_store();

        let info = store.store_object_only(CONTENT).unwrap();
        let result = store.verify_object(&info, "deadbeef", "SHA-256", CONTENT.len() as u64);

        assert!(matches!(
            result,
            Err(HashStoreError::ChecksumMismatch { .. })
        ));
        assert!(!store.layout().object_path(&info.cid).exists());
    }

    #[test]
    fn deleting_one_of_two_pids_keeps_the_object() {
        let (_dir, store) = fresh_store();

        let info = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        store.store_object(CONTENT, "pid.b", None, None, None, None).unwrap();

        store.delete_object("pid.a").unwrap();

        assert!(store.layout().object_path(&info.cid).is_file());
        assert!(!store.layout().pid_refs_path("pid.a").exists());

        let cid_refs = store.layout().cid_refs_path(&info.cid);
        assert_eq!(fs::read_to_string(cid_refs).unwrap(), "pid.b\n");

        assert!(matches!(
            store.find_object("pid.a"),
            Err(HashStoreError::PidRefsFileNotFound(_))
        ));
        assert!(matches!(
            store.retrieve_object("pid.a"),
            Err(HashStoreError::NotFound(_))
        ));
        assert_eq!(store.find_object("pid.b").unwrap().status, RefsStatus::Ok);

        // Removing the survivor takes the object and its refs with it.
        store.delete_object("pid.b").unwrap();
        assert_eq!(count_files(&store.layout().objects_dir()), 0);
        assert_eq!(count_files(&store.layout().refs_cids_dir()), 0);
        assert!(matches!(
            store.retrieve_object("pid.b"),
            Err(HashStoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_object_by_cid_respects_references() {
        let (_dir, store) = fresh_store();

        let info = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();

        // Referenced: quietly left alone.
        store.delete_object_by_cid(&info.cid).unwrap();
        assert!(store.layout().object_path(&info.cid).is_file());

        // Strip the refs to fabricate an unreferenced object, then delete.
        fs::remove_file(store.layout().pid_refs_path("pid.a")).unwrap();
        fs::remove_file(store.layout().cid_refs_path(&info.cid)).unwrap();
        store.delete_object_by_cid(&info.cid).unwrap();
        assert!(!store.layout().object_path(&info.cid).exists());
    }

    #[test]
    fn tagging_binds_existing_objects() {
        let (_dir, store) = fresh_store();

        let info = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();

        store.tag_object("pid.b", &info.cid).unwrap();
        assert_eq!(store.find_object("pid.b").unwrap().cid, info.cid);

        assert!(matches!(
            store.tag_object("pid.b", &info.cid),
            Err(HashStoreError::HashStoreRefsAlreadyExist { .. })
        ));

        let missing = "f".repeat(64);
        assert!(matches!(
            store.tag_object("pid.c", &missing),
            Err(HashStoreError::NotFound(_))
        ));
    }

    #[test]
    fn hex_digests_match_recomputation() {
        let (_dir, store) = fresh_store();

        store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();

        for (name, alg) in [
            ("MD5", Algorithm::Md5),
            ("SHA-256", Algorithm::Sha256),
            ("SHA-512/224", Algorithm::Sha512_224),
        ] {
            let reported = store.get_hex_digest("pid.a", name).unwrap();
            let expected = digests::digest_of_reader(alg, &mut &CONTENT[..]).unwrap();
            assert_eq!(reported, expected);
        }

        assert!(matches!(
            store.get_hex_digest("pid.a", "BLAKE-3"),
            Err(HashStoreError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn metadata_roundtrip_and_bulk_delete() {
        let (_dir, store) = fresh_store();

        let doc = b"<systemMetadata/>";
        let name = store
            .store_metadata(&doc[..], "pid.x", Some("http://ns/v1"))
            .unwrap();
        assert_eq!(
            name,
            store.layout().metadata_doc_name("pid.x", "http://ns/v1")
        );

        let mut bytes = Vec::new();
        store
            .retrieve_metadata("pid.x", Some("http://ns/v1"))
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(bytes, doc);

        // A second document under the default namespace coexists.
        store.store_metadata(&b"default"[..], "pid.x", None).unwrap();
        store.retrieve_metadata("pid.x", None).unwrap();

        // Deleting without a format id removes every document and prunes
        // the pid's directory.
        store.delete_metadata("pid.x", None).unwrap();
        assert!(!store.layout().metadata_dir_for_pid("pid.x").exists());
        assert!(store.layout().metadata_dir().exists());
        assert!(matches!(
            store.retrieve_metadata("pid.x", Some("http://ns/v1")),
            Err(HashStoreError::NotFound(_))
        ));
    }

    #[test]
    fn single_format_metadata_delete() {
        let (_dir, store) = fresh_store();

        store.store_metadata(&b"a"[..], "pid.x", Some("http://ns/v1")).unwrap();
        store.store_metadata(&b"b"[..], "pid.x", Some("http://ns/v2")).unwrap();

        store.delete_metadata("pid.x", Some("http://ns/v1")).unwrap();

        assert!(matches!(
            store.retrieve_metadata("pid.x", Some("http://ns/v1")),
            Err(HashStoreError::NotFound(_))
        ));
        store.retrieve_metadata("pid.x", Some("http://ns/v2")).unwrap();
    }

    #[test]
    fn sweep_removes_only_unreferenced_objects() {
        let (_dir, store) = fresh_store();

        let kept = store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
        let doomed = store
            .store_object(&b"unreferenced bytes"[..], "pid.b", None, None, None, None)
            .unwrap();

        // Fabricate the footprint of an ingest that died before tagging.
        fs::remove_file(store.layout().pid_refs_path("pid.b")).unwrap();
        fs::remove_file(store.layout().cid_refs_path(&doomed.cid)).unwrap();

        assert_eq!(store.sweep_orphaned_objects().unwrap(), 1);
        assert!(store.layout().object_path(&kept.cid).is_file());
        assert!(!store.layout().object_path(&doomed.cid).exists());

        // A second sweep finds nothing to do.
        assert_eq!(store.sweep_orphaned_objects().unwrap(), 0);
    }

    #[test]
    fn concurrent_identical_content_yields_one_object() {
        let (_dir, store) = fresh_store();
        let pids: Vec<String> = (0..8).map(|i| format!("pid.{}", i)).collect();

        let store = &store;
        std::thread::scope(|scope| {
            for pid in &pids {
                scope.spawn(move || {
                    store.store_object(CONTENT, pid, None, None, None, None).unwrap();
                });
            }
        });

        assert_eq!(count_files(&store.layout().objects_dir()), 1);
        assert_eq!(count_files(&store.layout().refs_pids_dir()), 8);

        let cid = sha256_hex(CONTENT);
        let mut listed: Vec<String> = fs::read_to_string(store.layout().cid_refs_path(&cid))
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        listed.sort();
        let mut expected = pids.clone();
        expected.sort();
        assert_eq!(listed, expected);

        for pid in &pids {
            assert_eq!(store.find_object(pid).unwrap().status, RefsStatus::Ok);
        }
    }

    #[test]
    fn concurrent_same_pid_stores_serialize() {
        let (_dir, store) = fresh_store();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    store.store_object(CONTENT, "pid.a", None, None, None, None).unwrap();
                });
            }
        });

        assert_eq!(count_files(&store.layout().objects_dir()), 1);
        assert_eq!(store.find_object("pid.a").unwrap().status, RefsStatus::Ok);
    }

    #[test]
    fn mixed_store_and_delete_on_one_pid_never_corrupts() {
        let (_dir, store) = fresh_store();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let _ = store.store_object(CONTENT, "pid.a", None, None, None, None);
                        let _ = store.delete_object("pid.a");
                    }
                });
            }
        });

        // Whatever interleaving happened, the records are coherent: either
        // the pid is fully bound or fully absent.
        match store.find_object("pid.a") {
            Ok(found) => {
                assert_eq!(found.status, RefsStatus::Ok);
            }
            Err(HashStoreError::PidRefsFileNotFound(_)) => {
                assert_eq!(count_files(&store.layout().refs_cids_dir()), 0);
            }
            Err(e) => panic!("unexpected state: {}", e),
        }
    }
}
