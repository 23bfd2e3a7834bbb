//! File-backed storage for the object records of visited maps.
//!
//! Layout inside the store directory:
//! ```text
//! records.meta.json               - schema version
//! records/
//!   MAP0001.records.cbor.zst      - CBOR+zstd compressed object records
//! integrity/
//!   manifest.json                 - sha256 of every records file
//! ```

use mapstream_common::MapId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::records::ObjectRecords;

/// Current schema version of the records files.
const RECORDS_SCHEMA_VERSION: u32 = 1;

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {filename}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    records_schema_version: u32,
}

/// Filename to sha256 of every records file written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: BTreeMap<String, String>,
}

/// Saves and restores [`ObjectRecords`] per map.
pub struct RecordStore {
    root: PathBuf,
    manifest: IntegrityManifest,
}

impl RecordStore {
    /// Open or create a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("records.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let manifest = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.records_schema_version != RECORDS_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.records_schema_version,
                    expected_version: RECORDS_SCHEMA_VERSION,
                });
            }
            if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            }
        } else {
            let meta = StoreMeta {
                records_schema_version: RECORDS_SCHEMA_VERSION,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            manifest
        };

        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps with saved records, by file name.
    pub fn saved_files(&self) -> impl Iterator<Item = &str> {
        self.manifest.entries.keys().map(String::as_str)
    }

    /// Write the records of a map, replacing any earlier save.
    pub fn save(&mut self, map: MapId, records: &ObjectRecords) -> Result<(), StoreError> {
        let filename = records_file_name(map);
        let cbor_bytes = cbor_serialize(records)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        let hash = sha256_hex(&compressed);

        std::fs::write(self.root.join("records").join(&filename), &compressed)?;
        self.manifest.entries.insert(filename, hash);
        self.save_manifest()?;
        tracing::debug!(map = map.0, bytes = compressed.len(), "object records saved");
        Ok(())
    }

    /// Read the records of a map, if any were saved. The file hash is checked
    /// against the manifest before decoding.
    pub fn load(&self, map: MapId) -> Result<Option<ObjectRecords>, StoreError> {
        let filename = records_file_name(map);
        let Some(expected) = self.manifest.entries.get(&filename) else {
            return Ok(None);
        };
        let compressed = std::fs::read(self.root.join("records").join(&filename))?;
        let actual = sha256_hex(&compressed);
        if &actual != expected {
            return Err(StoreError::IntegrityMismatch {
                filename,
                expected: expected.clone(),
                actual,
            });
        }
        let cbor_bytes = zstd_decompress(&compressed)?;
        cbor_deserialize(&cbor_bytes).map(Some)
    }

    /// Verify every file listed in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        for (filename, expected) in &self.manifest.entries {
            let data = std::fs::read(self.root.join("records").join(filename))?;
            let actual = sha256_hex(&data);
            if &actual != expected {
                return Err(StoreError::IntegrityMismatch {
                    filename: filename.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn records_file_name(map: MapId) -> String {
    format!("{}.records.cbor.zst", map.dir_name())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
