// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The store descriptor and its invariant guard.
//!
//! A store directory carries a single `hashstore.yaml` descriptor recording
//! the configuration it was created with. The shard geometry and primary
//! algorithm can never change once objects have been laid out under them, so
//! every later instantiation must present the identical configuration or be
//! refused.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digests::Algorithm;
use crate::errors::{HashStoreError, Result};

/// File name of the descriptor at the store root.
pub const DESCRIPTOR_FILE_NAME: &str = "hashstore.yaml";

/// Default metadata namespace recorded for stores that don't override it.
pub const DEFAULT_METADATA_NAMESPACE: &str =
    "https://ns.dataone.org/service/types/v2.0#SystemMetadata";

/// The immutable configuration of a store directory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoreConfig {
    /// Root directory of the store.
    pub store_path: PathBuf,

    /// Number of fixed-width tokens a digest is split into.
    pub store_depth: usize,

    /// Width in hex characters of each token.
    pub store_width: usize,

    /// The primary algorithm: object cids and identifier hashes use it.
    pub store_algorithm: Algorithm,

    /// Format id assumed for metadata operations that don't name one.
    pub store_metadata_namespace: String,
}

impl StoreConfig {
    /// A configuration with the conventional geometry: depth 3, width 2,
    /// SHA-256 addressing.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            store_path: root.into(),
            store_depth: 3,
            store_width: 2,
            store_algorithm: Algorithm::Sha256,
            store_metadata_namespace: DEFAULT_METADATA_NAMESPACE.to_owned(),
        }
    }

    pub(crate) fn descriptor_path(&self) -> PathBuf {
        self.store_path.join(DESCRIPTOR_FILE_NAME)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(HashStoreError::InvalidArgument(
                "store path must not be empty".to_owned(),
            ));
        }

        if self.store_depth == 0 {
            return Err(HashStoreError::InvalidArgument(
                "store depth must be positive".to_owned(),
            ));
        }

        if self.store_width == 0 {
            return Err(HashStoreError::InvalidArgument(
                "store width must be positive".to_owned(),
            ));
        }

        if self.store_metadata_namespace.trim().is_empty() {
            return Err(HashStoreError::InvalidArgument(
                "store metadata namespace must not be empty".to_owned(),
            ));
        }

        Ok(())
    }

    pub(crate) fn load(path: &Path) -> Result<StoreConfig> {
        let text = fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| {
            HashStoreError::InvalidArgument(format!(
                "malformed store descriptor `{}`: {}",
                path.display(),
                e
            ))
        })
    }

    pub(crate) fn write(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).map_err(|e| {
            HashStoreError::InvalidArgument(format!("unserializable store descriptor: {}", e))
        })?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Compare this (caller-supplied) configuration against the descriptor
    /// found on disk, field by field. `canonical_root` is the resolved form
    /// of `self.store_path` so that spellings of the same directory agree.
    pub(crate) fn verify_against(
        &self,
        on_disk: &StoreConfig,
        canonical_root: &Path,
    ) -> Result<()> {
        if on_disk.store_path != canonical_root {
            return Err(HashStoreError::ConfigMismatch {
                field: "store_path",
                on_disk: on_disk.store_path.display().to_string(),
                supplied: canonical_root.display().to_string(),
            });
        }

        if on_disk.store_depth != self.store_depth {
            return Err(HashStoreError::ConfigMismatch {
                field: "store_depth",
                on_disk: on_disk.store_depth.to_string(),
                supplied: self.store_depth.to_string(),
            });
        }

        if on_disk.store_width != self.store_width {
            return Err(HashStoreError::ConfigMismatch {
                field: "store_width",
                on_disk: on_disk.store_width.to_string(),
                supplied: self.store_width.to_string(),
            });
        }

        if on_disk.store_algorithm != self.store_algorithm {
            return Err(HashStoreError::ConfigMismatch {
                field: "store_algorithm",
                on_disk: on_disk.store_algorithm.to_string(),
                supplied: self.store_algorithm.to_string(),
            });
        }

        if on_disk.store_metadata_namespace != self.store_metadata_namespace {
            return Err(HashStoreError::ConfigMismatch {
                field: "store_metadata_namespace",
                on_disk: on_disk.store_metadata_namespace.clone(),
                supplied: self.store_metadata_namespace.clone(),
            });
        }

        Ok(())
    }

    /// Enforce the descriptor protocol for this configuration and return the
    /// canonical store root.
    ///
    /// An existing descriptor must match every field. A missing descriptor
    /// is written, but only into a root that is absent or empty: claiming a
    /// directory that already holds unrelated data would let later deletes
    /// destroy it.
    pub(crate) fn ensure_descriptor(&self) -> Result<PathBuf> {
        let descriptor = self.descriptor_path();

        if descriptor.is_file() {
            let canonical_root = self.store_path.canonicalize()?;
            let on_disk = StoreConfig::load(&descriptor)?;
            self.verify_against(&on_disk, &canonical_root)?;
            return Ok(canonical_root);
        }

        match fs::read_dir(&self.store_path) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(HashStoreError::ExistingUnmanagedData(
                        self.store_path.clone(),
                    ));
                }
            }

            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.store_path)?;
            }

            Err(e) => return Err(e.into()),
        }

        let canonical_root = self.store_path.canonicalize()?;
        let recorded = StoreConfig {
            store_path: canonical_root.clone(),
            ..self.clone()
        };
        recorded.write(&descriptor)?;

        Ok(canonical_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("store"));

        let root = config.ensure_descriptor().unwrap();
        let on_disk = StoreConfig::load(&root.join(DESCRIPTOR_FILE_NAME)).unwrap();

        assert_eq!(on_disk.store_path, root);
        assert_eq!(on_disk.store_depth, 3);
        assert_eq!(on_disk.store_width, 2);
        assert_eq!(on_disk.store_algorithm, Algorithm::Sha256);
        assert_eq!(on_disk.store_metadata_namespace, DEFAULT_METADATA_NAMESPACE);

        // A second instantiation with the identical configuration succeeds.
        config.ensure_descriptor().unwrap();
    }

    #[test]
    fn descriptor_uses_canonical_algorithm_names() {
        let config = StoreConfig::new("/store");
        let text = serde_yaml::to_string(&config).unwrap();
        assert!(text.contains("store_algorithm: SHA-256"));
    }

    #[test]
    fn any_differing_field_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("store"));
        config.ensure_descriptor().unwrap();

        let mut depth = config.clone();
        depth.store_depth = 4;
        assert!(matches!(
            depth.ensure_descriptor(),
            Err(HashStoreError::ConfigMismatch {
                field: "store_depth",
                ..
            })
        ));

        let mut width = config.clone();
        width.store_width = 3;
        assert!(matches!(
            width.ensure_descriptor(),
            Err(HashStoreError::ConfigMismatch {
                field: "store_width",
                ..
            })
        ));

        let mut algorithm = config.clone();
        algorithm.store_algorithm = Algorithm::Sha512;
        assert!(matches!(
            algorithm.ensure_descriptor(),
            Err(HashStoreError::ConfigMismatch {
                field: "store_algorithm",
                ..
            })
        ));

        let mut namespace = config;
        namespace.store_metadata_namespace = "http://ns/v2".to_owned();
        assert!(matches!(
            namespace.ensure_descriptor(),
            Err(HashStoreError::ConfigMismatch {
                field: "store_metadata_namespace",
                ..
            })
        ));
    }

    #[test]
    fn unmanaged_directories_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("stray.dat"), b"not ours").unwrap();

        let config = StoreConfig::new(&root);
        assert!(matches!(
            config.ensure_descriptor(),
            Err(HashStoreError::ExistingUnmanagedData(_))
        ));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let mut config = StoreConfig::new("/store");
        config.store_depth = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::new("/store");
        config.store_width = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::new("/store");
        config.store_metadata_namespace = "  ".to_owned();
        assert!(config.validate().is_err());
    }
}
