// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Storage of metadata documents alongside the objects they describe.
//!
//! Each pid owns one sharded directory under `metadata/`, holding one file
//! per format id. Document names are derived by hashing the pid with the
//! format id appended, so a pid can carry any number of documents without
//! their names colliding or revealing anything about the identifiers.
//!
//! Unlike objects, metadata documents are freely overwritten: the newest
//! write for a `(pid, formatId)` pair wins.

use std::fs;
use std::io::{ErrorKind, Read, Write};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::digests::READ_BUFFER_SIZE;
use crate::errors::{HashStoreError, Result};
use crate::fsutil;
use crate::layout::StoreLayout;

/// Write a metadata document, replacing any previous version. Returns the
/// document name.
pub(crate) fn store(
    layout: &StoreLayout,
    reader: &mut impl Read,
    pid: &str,
    format_id: &str,
) -> Result<String> {
    let tmp_dir = layout.metadata_tmp_dir();
    fs::create_dir_all(&tmp_dir)?;

    let mut tmp = NamedTempFile::new_in(&tmp_dir)?;
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n])?;
    }
    tmp.flush()?;

    fsutil::replace_file(tmp, &layout.metadata_path(pid, format_id))?;

    Ok(layout.metadata_doc_name(pid, format_id))
}

/// Open a metadata document for reading.
pub(crate) fn retrieve(layout: &StoreLayout, pid: &str, format_id: &str) -> Result<fs::File> {
    let path = layout.metadata_path(pid, format_id);

    fs::File::open(&path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            HashStoreError::NotFound(format!(
                "no metadata document for pid `{}` under format `{}`",
                pid, format_id
            ))
        } else {
            e.into()
        }
    })
}

/// Remove one metadata document. Removing a document that is not there is
/// a no-op.
pub(crate) fn delete_doc(layout: &StoreLayout, pid: &str, format_id: &str) -> Result<()> {
    let path = layout.metadata_path(pid, format_id);

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(ref e) if e.kind() == ErrorKind::NotFound => {
            debug!(pid, format_id, "no metadata document to delete");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(dir) = path.parent() {
        fsutil::prune_empty_dirs(dir, &layout.metadata_dir());
    }

    Ok(())
}

/// List the document names currently stored for a pid.
pub(crate) fn list_docs(layout: &StoreLayout, pid: &str) -> Result<Vec<String>> {
    let dir = layout.metadata_dir_for_pid(pid);

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }

    Ok(names)
}

/// Remove one named document from a pid's directory, pruning afterwards.
pub(crate) fn delete_named_doc(layout: &StoreLayout, pid: &str, doc_name: &str) -> Result<()> {
    let dir = layout.metadata_dir_for_pid(pid);
    let path = dir.join(doc_name);

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(ref e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    fsutil::prune_empty_dirs(&dir, &layout.metadata_dir());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digests::Algorithm;

    fn test_layout() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().to_owned(), 3, 2, Algorithm::Sha256);
        (dir, layout)
    }

    #[test]
    fn documents_roundtrip() {
        let (_dir, layout) = test_layout();

        let name = store(&layout, &mut &b"<metadata/>"[..], "pid.x", "http://ns/v1").unwrap();
        assert_eq!(name, layout.metadata_doc_name("pid.x", "http://ns/v1"));

        let mut text = String::new();
        retrieve(&layout, "pid.x", "http://ns/v1")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "<metadata/>");
    }

    #[test]
    fn overwrites_replace_content() {
        let (_dir, layout) = test_layout();

        store(&layout, &mut &b"v1"[..], "pid.x", "http://ns/v1").unwrap();
        store(&layout, &mut &b"v2"[..], "pid.x", "http://ns/v1").unwrap();

        let mut text = String::new();
        retrieve(&layout, "pid.x", "http://ns/v1")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "v2");
    }

    #[test]
    fn formats_are_distinct_documents() {
        let (_dir, layout) = test_layout();

        store(&layout, &mut &b"a"[..], "pid.x", "http://ns/v1").unwrap();
        store(&layout, &mut &b"b"[..], "pid.x", "http://ns/v2").unwrap();

        assert_eq!(list_docs(&layout, "pid.x").unwrap().len(), 2);
    }

    #[test]
    fn deletion_prunes_the_pid_directory() {
        let (_dir, layout) = test_layout();

        store(&layout, &mut &b"doc"[..], "pid.x", "http://ns/v1").unwrap();
        delete_doc(&layout, "pid.x", "http://ns/v1").unwrap();

        assert!(!layout.metadata_dir_for_pid("pid.x").exists());
        assert!(layout.metadata_dir().exists());

        assert!(matches!(
            retrieve(&layout, "pid.x", "http://ns/v1"),
            Err(HashStoreError::NotFound(_))
        ));

        // Deleting again quietly does nothing.
        delete_doc(&layout, "pid.x", "http://ns/v1").unwrap();
    }
}
