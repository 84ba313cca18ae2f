// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! A content-addressed object store for scientific data repositories.
//!
//! Clients name their data with authority-based identifiers ("pids", such
//! as DOIs or UUIDs), while the store places each object's bytes at a path
//! derived from the cryptographic digest of its content (its "cid"). The
//! key concepts:
//!
//! - An **object** is an opaque byte stream, stored exactly once no matter
//!   how many pids point at it.
//! - A **cid** is the lower-case hex digest of an object's bytes under the
//!   store's primary algorithm, and determines the object's sharded path.
//! - **Reference files** bind pids to cids in both directions, making
//!   deduplication, orphan detection, and safe deletion possible: an
//!   object is only unlinked when its last pid is unbound.
//! - **Metadata documents** are byte streams stored next to the objects,
//!   keyed by a `(pid, formatId)` pair.
//!
//! A store directory is laid out like this:
//!
//! ```text
//! hashstore.yaml                      the immutable store descriptor
//! objects/<shard(cid)>                object bytes
//! objects/tmp/                        in-flight ingests
//! metadata/<shard(hash(pid))>/<doc>   metadata documents
//! metadata/tmp/
//! refs/pids/<shard(hash(pid))>        pid-refs files (one line: the cid)
//! refs/cids/<shard(cid)>              cid-refs files (one pid per line)
//! refs/tmp/
//! ```
//!
//! All writes go through temp files published by atomic rename, and all
//! mutating operations serialize on the identifiers they touch, so the
//! store may be used freely from many threads of one process. It does not
//! coordinate between processes.
//!
//! ```no_run
//! use hashstore::{HashStore, StoreConfig};
//!
//! # fn main() -> hashstore::Result<()> {
//! let store = HashStore::new(StoreConfig::new("/var/data/hashstore"))?;
//! let info = store.store_object(
//!     &b"some object bytes"[..],
//!     "doi:10.5063/F1HX19TM",
//!     None,
//!     None,
//!     None,
//!     None,
//! )?;
//! assert_eq!(store.find_object("doi:10.5063/F1HX19TM")?.cid, info.cid);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod digests;
pub mod errors;
mod fsutil;
mod layout;
mod locks;
mod metadata;
mod refs;
pub mod store;

pub use config::{StoreConfig, DEFAULT_METADATA_NAMESPACE, DESCRIPTOR_FILE_NAME};
pub use digests::Algorithm;
pub use errors::{HashStoreError, Result};
pub use refs::{FoundObject, RefsStatus};
pub use store::{HashStore, ObjectInfo};
