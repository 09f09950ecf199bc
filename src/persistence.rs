//! # Sorted Store Layer
//!
//! Thin wrapper over RocksDB giving the index writer and query engine
//! what they need from a sorted key/value container: bulk sorted writes,
//! exact and prefix lookup on the leading key, and an atomic publish.
//! Each index is its own database; the path conveys the role.
//!
//! A build writes into a staging directory next to the target and
//! renames on publish, so a cancelled or failed build never leaves a
//! partially written index visible.

use crate::error::Error;
use anyhow::Result;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CF_ROWS: &str = "rows";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;
const WRITE_BATCH_ROWS: usize = 8_192;

#[derive(Debug, Serialize, Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

fn io_err(context: &str, error: impl std::fmt::Display) -> anyhow::Error {
    Error::IndexIo(format!("{}: {}", context, error)).into()
}

fn db_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts
}

fn column_families() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ROWS, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ]
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index".into());
    name.push(".staging");
    target.with_file_name(name)
}

/// Write-once builder for a single sorted index.
pub struct SortedStoreWriter {
    db: Option<DB>,
    staging: PathBuf,
    target: PathBuf,
}

impl SortedStoreWriter {
    /// Open a staging store next to `target`. Leftovers from an earlier
    /// aborted build at the staging path are destroyed first.
    pub fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let staging = staging_path(&target);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)
                .map_err(|e| io_err("clearing stale staging directory", e))?;
        }
        if let Some(parent) = staging.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_err("creating index parent directory", e))?;
        }

        let db = DB::open_cf_descriptors(&db_options(), &staging, column_families())
            .map_err(|e| io_err("opening staging store", e))?;

        let writer = Self {
            db: Some(db),
            staging,
            target,
        };
        writer.write_manifest()?;
        Ok(writer)
    }

    fn write_manifest(&self) -> Result<()> {
        let db = self.db.as_ref().expect("staging store open");
        let cf = db
            .cf_handle(CF_METADATA)
            .ok_or_else(|| io_err("metadata column family", "missing"))?;
        let manifest = StorageManifest {
            format_version: STORAGE_FORMAT_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let bytes =
            bincode::serialize(&manifest).map_err(|e| io_err("encoding manifest", e))?;
        db.put_cf(cf, KEY_MANIFEST, bytes)
            .map_err(|e| io_err("writing manifest", e))?;
        Ok(())
    }

    /// Write rows in batches. Rows may arrive in any order; the store
    /// keeps them sorted by key, and writing the same (key, value) twice
    /// leaves a single row.
    pub fn put_rows<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let db = self.db.as_ref().expect("staging store open");
        let cf = db
            .cf_handle(CF_ROWS)
            .ok_or_else(|| io_err("rows column family", "missing"))?;

        let mut batch = WriteBatch::default();
        let mut pending = 0usize;
        for (key, value) in rows {
            batch.put_cf(cf, key, value);
            pending += 1;
            if pending >= WRITE_BATCH_ROWS {
                db.write(std::mem::take(&mut batch))
                    .map_err(|e| io_err("writing row batch", e))?;
                pending = 0;
            }
        }
        if pending > 0 {
            db.write(batch).map_err(|e| io_err("writing row batch", e))?;
        }
        Ok(())
    }

    /// Flush, close, and atomically move the staging store to the target
    /// path. An existing index at the target is replaced.
    pub fn publish(mut self) -> Result<()> {
        let db = self.db.take().expect("staging store open");
        db.flush().map_err(|e| io_err("flushing staging store", e))?;
        drop(db);

        if self.target.exists() {
            std::fs::remove_dir_all(&self.target)
                .map_err(|e| io_err("removing previous index", e))?;
        }
        std::fs::rename(&self.staging, &self.target)
            .map_err(|e| io_err("publishing index", e))?;
        Ok(())
    }
}

impl Drop for SortedStoreWriter {
    fn drop(&mut self) {
        // Unpublished staging data is garbage; the target stays untouched.
        if let Some(db) = self.db.take() {
            drop(db);
            let _ = std::fs::remove_dir_all(&self.staging);
        }
    }
}

/// Read-only view of a published index.
pub struct SortedStoreReader {
    db: DB,
}

impl SortedStoreReader {
    /// Open a published index. A nonexistent path fails immediately with
    /// `MissingIndex`; a manifest from another format version fails with
    /// `IndexIo`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingIndex(path.to_path_buf()).into());
        }

        let db = DB::open_cf_for_read_only(
            &Options::default(),
            path,
            [CF_ROWS, CF_METADATA],
            false,
        )
        .map_err(|e| io_err("opening index", e))?;

        let reader = Self { db };
        reader.validate_manifest()?;
        Ok(reader)
    }

    fn validate_manifest(&self) -> Result<()> {
        let cf = self
            .db
            .cf_handle(CF_METADATA)
            .ok_or_else(|| io_err("metadata column family", "missing"))?;
        let bytes = self
            .db
            .get_cf(cf, KEY_MANIFEST)
            .map_err(|e| io_err("reading manifest", e))?
            .ok_or_else(|| io_err("manifest", "missing"))?;
        let manifest: StorageManifest =
            bincode::deserialize(&bytes).map_err(|e| io_err("decoding manifest", e))?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(io_err(
                "manifest",
                format!(
                    "format version {} is not the supported {}",
                    manifest.format_version, STORAGE_FORMAT_VERSION
                ),
            ));
        }
        Ok(())
    }

    /// All row values whose key starts with `prefix`, in key order.
    pub fn values_for_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(CF_ROWS)
            .ok_or_else(|| io_err("rows column family", "missing"))?;

        let mut values = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for entry in iter {
            let (key, value) = entry.map_err(|e| io_err("scanning index", e))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(value.to_vec());
        }
        Ok(values)
    }

    /// Full ordered scan of (key, value) rows. Used by inspection and
    /// by tests asserting index invariants.
    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self
            .db
            .cf_handle(CF_ROWS)
            .ok_or_else(|| io_err("rows column family", "missing"))?;

        let mut rows = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = entry.map_err(|e| io_err("scanning index", e))?;
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}
