//! File-backed object store.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json            - metadata and schema version
//! objects/
//!   <entity-id>.attr.cbor.zst - CBOR+zstd compressed attribute maps
//! integrity/
//!   manifest.json             - per-object hash manifest
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use weald_common::{AttrMap, EntityId};
use weald_kernel::{ObjectStore, StoreError};

/// Current schema version of stored attribute payloads.
const OBJECT_SCHEMA_VERSION: u32 = 1;

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    object_schema_version: u32,
}

/// Integrity manifest: payload hash per object file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntegrityManifest {
    entries: BTreeMap<String, String>,
}

/// File-backed object store with schema versioning and fail-closed
/// integrity checking.
pub struct FileStore {
    root: PathBuf,
    manifest: IntegrityManifest,
}

impl FileStore {
    /// Open or create an object store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("objects"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let manifest = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            if meta.object_schema_version != OBJECT_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.object_schema_version,
                    expected_version: OBJECT_SCHEMA_VERSION,
                });
            }
            if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)
                    .map_err(|e| StoreError::Decode(e.to_string()))?
            } else {
                IntegrityManifest::default()
            }
        } else {
            let meta = StoreMeta {
                object_schema_version: OBJECT_SCHEMA_VERSION,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            manifest
        };

        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of objects recorded in the manifest.
    pub fn object_count(&self) -> usize {
        self.manifest.entries.len()
    }

    fn object_filename(id: EntityId) -> String {
        format!("{id}.attr.cbor.zst")
    }

    fn object_path(&self, id: EntityId) -> PathBuf {
        self.root.join("objects").join(Self::object_filename(id))
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        Ok(())
    }
}

impl ObjectStore for FileStore {
    fn load(&self, id: EntityId) -> Result<Option<AttrMap>, StoreError> {
        let path = self.object_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let compressed = std::fs::read(&path)?;

        // Fail closed on any mismatch with the recorded hash.
        if let Some(expected) = self.manifest.entries.get(&Self::object_filename(id)) {
            let actual = sha256_hex(&compressed);
            if &actual != expected {
                return Err(StoreError::IntegrityMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let cbor_bytes = zstd_decompress(&compressed)?;
        let attrs = cbor_deserialize(&cbor_bytes)?;
        Ok(Some(attrs))
    }

    fn save(&mut self, id: EntityId, attrs: &AttrMap) -> Result<(), StoreError> {
        let cbor_bytes = cbor_serialize(attrs)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        std::fs::write(self.object_path(id), &compressed)?;
        self.manifest
            .entries
            .insert(Self::object_filename(id), sha256_hex(&compressed));
        self.save_manifest()?;
        debug!(entity = %id, bytes = compressed.len(), "object saved");
        Ok(())
    }

    fn delete(&mut self, id: EntityId) -> Result<bool, StoreError> {
        let path = self.object_path(id);
        let existed = path.exists();
        if existed {
            std::fs::remove_file(&path)?;
        }
        if self
            .manifest
            .entries
            .remove(&Self::object_filename(id))
            .is_some()
        {
            self.save_manifest()?;
        }
        Ok(existed)
    }
}

fn cbor_serialize<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> serde::Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::Decode(e.to_string()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use weald_common::Value;

    fn sample_attrs() -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert("mass".into(), Value::Float(80.0));
        attrs.insert("mode".into(), Value::from("floating"));
        attrs.insert(
            "inventory".into(),
            Value::List(vec![Value::from("rope"), Value::from("lantern")]),
        );
        attrs
    }

    #[test]
    fn open_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path().join("objects_data")).unwrap();
        assert!(store.root().join("objects").is_dir());
        assert!(store.root().join("integrity").is_dir());
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn roundtrip_preserves_nested_values() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(tmp.path().join("objects_data")).unwrap();
        let id = EntityId::new();
        let attrs = sample_attrs();
        store.save(id, &attrs).unwrap();
        assert_eq!(store.load(id).unwrap(), Some(attrs));
    }

    #[test]
    fn missing_object_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path().join("objects_data")).unwrap();
        assert_eq!(store.load(EntityId::new()).unwrap(), None);
    }

    #[test]
    fn reopen_preserves_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("objects_data");
        let id = EntityId::new();
        {
            let mut store = FileStore::open(&path).unwrap();
            store.save(id, &sample_attrs()).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.load(id).unwrap(), Some(sample_attrs()));
    }

    #[test]
    fn corruption_is_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("objects_data");
        let id = EntityId::new();
        let mut store = FileStore::open(&path).unwrap();
        store.save(id, &sample_attrs()).unwrap();

        // Flip a byte in the stored payload.
        let object_path = store.object_path(id);
        let mut data = std::fs::read(&object_path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&object_path, &data).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(matches!(
            store.load(id),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_is_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("objects_data");
        let _store = FileStore::open(&path).unwrap();

        let meta_path = path.join("store.meta.json");
        let mut meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.object_schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match FileStore::open(&path) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, OBJECT_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn delete_removes_file_and_manifest_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(tmp.path().join("objects_data")).unwrap();
        let id = EntityId::new();
        store.save(id, &sample_attrs()).unwrap();
        assert!(store.delete(id).unwrap());
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.load(id).unwrap(), None);
        assert!(!store.delete(id).unwrap());
    }
}
