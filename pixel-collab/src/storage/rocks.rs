//! RocksDB-backed grid store.
//!
//! Column families:
//! - `snapshots` — the value under each key (LZ4 compressed)
//! - `metadata`  — [`StoreMetadata`] per key (bincode)
//!
//! A value and its metadata are written in one atomic batch, so a reader
//! never sees a snapshot without the metadata that describes it.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    MultiThreaded, Options, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::{GridStore, StoreError, StoreMetadata};

const CF_SNAPSHOTS: &str = "snapshots";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_SNAPSHOTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// fsync every write (default: true, a stored edit must survive a crash)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pixel_data"),
            block_cache_size: 32 * 1024 * 1024,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Durable grid store.
///
/// Opened once at startup and shared by every request handler; the
/// multi-threaded RocksDB handle is safe to call from blocking tasks.
pub struct RocksGridStore {
    db: DBWithThreadMode<MultiThreaded>,
    config: StoreConfig,
}

impl RocksGridStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config, &cache)))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened grid store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_SNAPSHOTS => {
                // Values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Force memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in COLUMN_FAMILIES {
            let cf = self.cf(name)?;
            self.db.flush_cf(&cf)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

impl GridStore for RocksGridStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::CompressionError(e.to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<StoreMetadata, StoreError> {
        let cf_snap = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(value);
        let previous = self.metadata(key)?;
        let meta = StoreMetadata::next(previous.as_ref(), key, value.len(), compressed.len());

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snap, key.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, key.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    fn metadata(&self, key: &str) -> Result<Option<StoreMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        self.db
            .get_cf(&cf, key.as_bytes())?
            .map(|bytes| StoreMetadata::decode(&bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GRID_KEY;

    fn open_temp() -> (tempfile::TempDir, RocksGridStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksGridStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_open_creates_directory() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_dir, store) = open_temp();
        assert_eq!(store.get(GRID_KEY).unwrap(), None);
        assert_eq!(store.metadata(GRID_KEY).unwrap(), None);
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_dir, store) = open_temp();
        let value = br##"[["#FFFFFF","#000000"]]"##;

        let meta = store.set(GRID_KEY, value).unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.raw_size, value.len() as u64);

        assert_eq!(store.get(GRID_KEY).unwrap().unwrap(), value.to_vec());
        assert_eq!(store.metadata(GRID_KEY).unwrap().unwrap(), meta);
    }

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let (_dir, store) = open_temp();
        store.set(GRID_KEY, b"first").unwrap();
        let meta = store.set(GRID_KEY, b"second").unwrap();

        assert_eq!(meta.version, 2);
        assert_eq!(store.get(GRID_KEY).unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_reference_grid_compresses() {
        let (_dir, store) = open_temp();
        let grid = crate::grid::Grid::blank(crate::grid::Dimensions::REFERENCE);
        let json = grid.to_json().unwrap();

        let meta = store.set(GRID_KEY, json.as_bytes()).unwrap();
        let ratio = meta.raw_size as f64 / meta.stored_size as f64;
        assert!(ratio > 10.0, "Compression ratio {ratio:.1}x too low for a blank canvas");
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("db"));
        {
            let store = RocksGridStore::open(config.clone()).unwrap();
            store.set(GRID_KEY, b"durable").unwrap();
            store.flush().unwrap();
        }
        let store = RocksGridStore::open(config).unwrap();
        assert_eq!(store.get(GRID_KEY).unwrap().unwrap(), b"durable");
        assert_eq!(store.metadata(GRID_KEY).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("pixel_data"));
        assert!(config.sync_writes);
    }
}
