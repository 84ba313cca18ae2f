// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The error taxonomy of the store.
//!
//! Every failure a public operation can report maps to one variant here, so
//! that callers can branch on outcomes without string matching. I/O failures
//! that have no more specific classification are carried in [`Io`] with the
//! original cause preserved.
//!
//! [`Io`]: HashStoreError::Io

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A specialized result type for store operations.
pub type Result<T> = std::result::Result<T, HashStoreError>;

/// Everything that can go wrong while talking to a [`crate::HashStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HashStoreError {
    /// An identifier or size argument failed validation. Nothing on disk is
    /// touched when this is reported.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An algorithm name outside the supported set was supplied. Names are
    /// matched case-sensitively against the canonical dashed forms.
    #[error("unsupported digest algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    /// A caller-supplied checksum disagreed with the computed digest.
    #[error("{algorithm} checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        algorithm: String,
        expected: String,
        computed: String,
    },

    /// A caller-supplied object size disagreed with the number of bytes read.
    #[error("size mismatch: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A non-blocking acquisition found the identifier lock already held by
    /// a concurrent operation.
    #[error("an operation for identifier `{0}` is already in progress")]
    RequestInProgress(String),

    /// A tag request found the pid already bound to a different cid.
    #[error("pid `{pid}` already references cid `{cid}`")]
    PidAlreadyRefsOtherCid { pid: String, cid: String },

    /// A tag request found both reference files already recording exactly
    /// this binding.
    #[error("refs files for pid `{pid}` and cid `{cid}` already exist")]
    HashStoreRefsAlreadyExist { pid: String, cid: String },

    /// There is no pid-refs file for the requested pid.
    #[error("no refs file found for pid `{0}`")]
    PidRefsFileNotFound(String),

    /// A pid-refs file exists but the cid-refs file it points at does not.
    #[error("pid `{pid}` references cid `{cid}` but no cid-refs file exists")]
    OrphanPidRefs { pid: String, cid: String },

    /// A cid-refs file exists but does not list the expected pid.
    #[error("cid-refs file for `{cid}` does not list pid `{pid}`")]
    PidNotInCidRefs { pid: String, cid: String },

    /// A pid-refs file exists but records a different cid than expected.
    #[error("pid-refs file for `{pid}` records cid `{found}`, not `{expected}`")]
    CidNotInPidRefs {
        pid: String,
        expected: String,
        found: String,
    },

    /// Both reference files are in place but the object itself is missing.
    #[error("refs files for cid `{0}` exist but the object file is missing")]
    OrphanRefs(String),

    /// A retrieval target (object or metadata document) is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The on-disk store descriptor disagrees with the caller-supplied
    /// configuration.
    #[error("store configuration mismatch for `{field}`: descriptor records {on_disk}, caller supplied {supplied}")]
    ConfigMismatch {
        field: &'static str,
        on_disk: String,
        supplied: String,
    },

    /// The store root holds files but no descriptor, so it cannot safely be
    /// claimed as a store.
    #[error("directory `{}` contains data but no store descriptor", .0.display())]
    ExistingUnmanagedData(PathBuf),

    /// An atomic rename was attempted across filesystem boundaries. The
    /// store's tmp directories must share a filesystem with their final
    /// directories.
    #[error(
        "cannot atomically move `{}` to `{}`: paths are on different filesystems",
        .from.display(),
        .to.display()
    )]
    CrossDeviceMove { from: PathBuf, to: PathBuf },

    /// Any underlying filesystem error not otherwise classified.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
