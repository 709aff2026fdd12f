use std::collections::BTreeMap;
use std::sync::Arc;

use bitmap::CellGrid;
use foundation::{TileCoord, TileSize};
use parking_lot::RwLock;

use crate::error::{RecordError, StoreError};
use crate::record::{decode_record, encode_record};

/// Byte-oriented persistent storage shared by every index set in a process.
///
/// Receivers are `&self`: implementations synchronise internally, and
/// staleness is handled through versioned keys rather than locking.
pub trait IndexStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

impl<S: IndexStore + ?Sized> IndexStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, bytes)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).keys_with_prefix(prefix)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        (**self).remove(key)
    }
}

/// Process-local store; entries are kept in key order.
#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl IndexStore for InMemoryIndexStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

fn short_hash(s: &str) -> String {
    let hex = blake3::hash(s.as_bytes()).to_hex();
    hex.as_str()[..16].to_string()
}

/// Cache address of one index tile for one dataset version.
///
/// Rendered as `bits/<layer>/<version>/<z>/<x>/<y>` with layer and version
/// hashed, so arbitrary ids and HTTP dates stay path-safe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexCacheKey {
    pub layer_id: String,
    pub version: String,
    pub tile: TileCoord,
}

impl IndexCacheKey {
    pub fn new(layer_id: impl Into<String>, version: impl Into<String>, tile: TileCoord) -> Self {
        Self {
            layer_id: layer_id.into(),
            version: version.into(),
            tile,
        }
    }

    pub fn layer_prefix(layer_id: &str) -> String {
        format!("bits/{}/", short_hash(layer_id))
    }

    pub fn version_prefix(layer_id: &str, version: &str) -> String {
        format!("{}{}/", Self::layer_prefix(layer_id), short_hash(version))
    }

    pub fn render(&self) -> String {
        format!(
            "{}{}/{}/{}",
            Self::version_prefix(&self.layer_id, &self.version),
            self.tile.z,
            self.tile.x,
            self.tile.y
        )
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CellGrid),
    Miss,
    /// A record exists but cannot be used with the current format or tile
    /// size. Treated as a miss; the next save overwrites it.
    FormatMismatch(RecordError),
}

/// Typed view over an [`IndexStore`].
#[derive(Debug, Clone)]
pub struct IndexCache<S> {
    store: S,
}

impl<S: IndexStore> IndexCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self, key: &IndexCacheKey, expected: TileSize) -> CacheLookup {
        let rendered = key.render();
        let bytes = match self.store.get(&rendered) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                tracing::warn!("index cache read {rendered} failed: {e}");
                return CacheLookup::Miss;
            }
        };
        match decode_record(&bytes, expected) {
            Ok(grid) => {
                tracing::debug!("index cache hit {} ({})", key.tile, rendered);
                CacheLookup::Hit(grid)
            }
            Err(e) => {
                tracing::warn!("index cache record {rendered} unusable: {e}");
                CacheLookup::FormatMismatch(e)
            }
        }
    }

    pub fn save(&self, key: &IndexCacheKey, grid: &CellGrid) -> Result<(), StoreError> {
        let bytes = encode_record(grid)?;
        self.store.set(&key.render(), &bytes)
    }

    /// Drop every entry of `layer_id` not written for `current_version`.
    pub fn prune_stale(&self, layer_id: &str, current_version: &str) -> Result<usize, StoreError> {
        let keep = IndexCacheKey::version_prefix(layer_id, current_version);
        let mut removed = 0usize;
        for k in self
            .store
            .keys_with_prefix(&IndexCacheKey::layer_prefix(layer_id))?
        {
            if k.starts_with(&keep) {
                continue;
            }
            if self.store.remove(&k)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("pruned {removed} stale index records for layer {layer_id}");
        }
        Ok(removed)
    }
}
