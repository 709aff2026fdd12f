//! Async driver that fetches index tiles into an [`IndexSet`].

use std::collections::HashMap;
use std::sync::Arc;

use bitmap::{CellGrid, RasterOptions};
use foundation::TileCoord;
use streaming::{
    CacheLookup, IndexCache, IndexCacheKey, IndexStore, InMemoryIndexStore, LAST_MODIFIED,
    LoadError, RasterDecoder, Transport, fetch_raster,
};
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use crate::options::LazyMode;
use crate::set::{FetchRequest, IndexSet, MemberPayload};

/// Counts from one loader pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub fetched: usize,
    pub from_cache: usize,
    pub failed: usize,
}

impl LoadReport {
    fn absorb(&mut self, other: LoadReport) {
        self.fetched += other.fetched;
        self.from_cache += other.from_cache;
        self.failed += other.failed;
    }
}

type LastModifiedHook = Box<dyn Fn(&str) + Send + Sync>;

/// Fetches, decodes and packs members of an index set.
///
/// The set stays owned by the caller; only immutable buffers cross into
/// spawned tasks, and every result re-enters through
/// [`IndexSet::add_member`].
pub struct IndexLoader<T, D, S = InMemoryIndexStore> {
    transport: Arc<T>,
    decoder: Arc<D>,
    cache: Option<IndexCache<S>>,
    on_last_modified: Option<LastModifiedHook>,
    version: Option<String>,
}

impl<T, D> IndexLoader<T, D>
where
    T: Transport,
    D: RasterDecoder,
{
    pub fn new(transport: Arc<T>, decoder: Arc<D>) -> Self {
        Self {
            transport,
            decoder,
            cache: None,
            on_last_modified: None,
            version: None,
        }
    }
}

impl<T, D, S> IndexLoader<T, D, S>
where
    T: Transport,
    D: RasterDecoder,
    S: IndexStore,
{
    /// Persist packed members in `store`, keyed by dataset version.
    pub fn with_store<S2: IndexStore>(self, store: S2) -> IndexLoader<T, D, S2> {
        IndexLoader {
            transport: self.transport,
            decoder: self.decoder,
            cache: Some(IndexCache::new(store)),
            on_last_modified: self.on_last_modified,
            version: self.version,
        }
    }

    /// Called once with the master's last-modified stamp when the server
    /// sends one.
    pub fn on_last_modified(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_last_modified = Some(Box::new(hook));
        self
    }

    /// Dataset version in use for cache keys, once resolved.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Resolve the dataset version and load the master. With
    /// [`LazyMode::None`] the supplementals are loaded too.
    pub async fn initialize(&mut self, set: &mut IndexSet) -> LoadReport {
        self.resolve_version(set).await;

        let mut report = self.pump(set, 1).await;
        if set.options().lazy == LazyMode::None {
            report.absorb(self.load_pending(set).await);
        }
        info!(
            "{}: initialized ({} fetched, {} from cache, {} failed)",
            set.layer_id(),
            report.fetched,
            report.from_cache,
            report.failed
        );
        report
    }

    /// Drain every queued member.
    pub async fn load_pending(&mut self, set: &mut IndexSet) -> LoadReport {
        let mut report = LoadReport::default();
        while set.has_pending_fetches() {
            report.absorb(self.pump(set, usize::MAX).await);
        }
        report
    }

    async fn resolve_version(&mut self, set: &IndexSet) {
        if self.version.is_some() || (self.cache.is_none() && self.on_last_modified.is_none()) {
            return;
        }
        let url = set.url_for(set.master());
        let stamp = match self.transport.get_header(&url, LAST_MODIFIED).await {
            Ok(Some(stamp)) => stamp,
            Ok(None) => {
                debug!("{}: no {LAST_MODIFIED} header; cache bypassed", set.layer_id());
                return;
            }
            Err(e) => {
                warn!("{}: version lookup failed: {e}", set.layer_id());
                return;
            }
        };
        if let Some(hook) = &self.on_last_modified {
            hook(&stamp);
        }
        if let Some(cache) = self.cache.as_ref().filter(|_| set.options().cache) {
            match cache.prune_stale(set.layer_id(), &stamp) {
                Ok(0) => {}
                Ok(n) => info!("{}: pruned {n} stale cached index tiles", set.layer_id()),
                Err(e) => warn!("{}: cache prune failed: {e}", set.layer_id()),
            }
        }
        self.version = Some(stamp);
    }

    fn cache_key(&self, set: &IndexSet, coord: TileCoord) -> Option<(&IndexCache<S>, IndexCacheKey)> {
        if !set.options().cache {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let version = self.version.as_ref()?;
        Some((cache, IndexCacheKey::new(set.layer_id(), version.clone(), coord)))
    }

    fn lookup(&self, set: &IndexSet, coord: TileCoord) -> Option<CellGrid> {
        let (cache, key) = self.cache_key(set, coord)?;
        match cache.load(&key, set.tile_size()) {
            CacheLookup::Hit(grid) => Some(grid),
            CacheLookup::Miss | CacheLookup::FormatMismatch(_) => None,
        }
    }

    fn store(&self, set: &IndexSet, coord: TileCoord) {
        let Some((cache, key)) = self.cache_key(set, coord) else {
            return;
        };
        let Some(grid) = set.member(coord).and_then(|m| m.grid()) else {
            return;
        };
        if let Err(e) = cache.save(&key, grid) {
            warn!("{}: caching {coord} failed: {e}", set.layer_id());
        }
    }

    /// Run up to `budget` queued fetches, keeping at most `max_in_flight`
    /// outstanding.
    async fn pump(&mut self, set: &mut IndexSet, budget: usize) -> LoadReport {
        let mut report = LoadReport::default();
        let mut started = 0usize;
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<task::Id, TileCoord> = HashMap::new();
        let max_in_flight = set.options().max_in_flight;
        let offload = set.options().multithreading;
        let raster_opts = set.options().raster;

        loop {
            while tasks.len() < max_in_flight && started < budget {
                let Some(FetchRequest { coord, url }) = set.take_fetches(1).pop() else {
                    break;
                };
                started += 1;
                if let Some(grid) = self.lookup(set, coord) {
                    report.from_cache += 1;
                    if let Err(e) = set.add_member(coord, MemberPayload::Grid(grid)) {
                        warn!("{}: cached {coord} unusable: {e}", set.layer_id());
                    }
                    continue;
                }
                // Records hold packed words, so a member headed for the cache
                // is packed now even when queries would defer it.
                let pack = !set.defers_packing(coord) || self.cache_key(set, coord).is_some();
                let handle = tasks.spawn(fetch_payload(
                    self.transport.clone(),
                    self.decoder.clone(),
                    url,
                    raster_opts,
                    offload,
                    pack,
                ));
                in_flight.insert(handle.id(), coord);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (coord, result) = match joined {
                Ok((id, result)) => match in_flight.remove(&id) {
                    Some(coord) => (coord, result),
                    None => continue,
                },
                Err(e) => {
                    report.failed += 1;
                    warn!("{}: fetch task aborted: {e}", set.layer_id());
                    if let Some(coord) = in_flight.remove(&e.id()) {
                        set.mark_failed(coord);
                    }
                    continue;
                }
            };
            match result.map(|payload| set.add_member(coord, payload)) {
                Ok(Ok(_)) => {
                    report.fetched += 1;
                    self.store(set, coord);
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    debug!("{}: {e}", set.layer_id());
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("{}: fetching {coord} failed: {e}", set.layer_id());
                    set.mark_failed(coord);
                }
            }
        }
        report
    }
}

/// GET, decode and optionally pack one member.
///
/// With `offload`, decode and packing run on the blocking pool; the body goes
/// in by value and a packed grid or raster comes back by value. Without it,
/// both run on the fetch task. `pack` off returns the raster for deferred
/// packing.
async fn fetch_payload<T, D>(
    transport: Arc<T>,
    decoder: Arc<D>,
    url: String,
    raster_opts: RasterOptions,
    offload: bool,
    pack: bool,
) -> Result<MemberPayload, LoadError>
where
    T: Transport,
    D: RasterDecoder,
{
    if !offload {
        let raster = fetch_raster(&*transport, &*decoder, &url).await?;
        if pack {
            return Ok(MemberPayload::Grid(CellGrid::from_raster(&raster, &raster_opts)?));
        }
        return Ok(MemberPayload::Raster(raster));
    }
    let body = transport.get_body(&url).await?;
    tokio::task::spawn_blocking(move || -> Result<MemberPayload, LoadError> {
        let raster = decoder.decode(&body)?;
        if pack {
            Ok(MemberPayload::Grid(CellGrid::from_raster(&raster, &raster_opts)?))
        } else {
            Ok(MemberPayload::Raster(raster))
        }
    })
    .await
    .map_err(|e| LoadError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::IndexLoader;
    use crate::options::{IndexOptions, LazyMode};
    use crate::set::{IndexSet, SetState};
    use bitmap::Raster;
    use bytes::Bytes;
    use foundation::{TileCoord, TileSize};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use streaming::{
        DecodeError, InMemoryIndexStore, IndexCacheKey, IndexStore, RasterDecoder, Transport,
        TransportError,
    };

    const URL: &str = "mem://idx/{z}/{x}/{y}";

    #[derive(Default)]
    struct MockTransport {
        bodies: BTreeMap<String, Bytes>,
        stamp: Option<String>,
        crash_on: Option<String>,
        body_gets: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn with_tile(mut self, coord: TileCoord, pixels: &[(u32, u32)]) -> Self {
            let mut rgba = vec![0u8; 16 * 16 * 4];
            for &(x, y) in pixels {
                rgba[((y * 16 + x) * 4 + 3) as usize] = 255;
            }
            self.bodies.insert(coord.fill_template(URL), Bytes::from(rgba));
            self
        }

        fn stamped(mut self, stamp: &str) -> Self {
            self.stamp = Some(stamp.to_string());
            self
        }

        fn crashing_on(mut self, coord: TileCoord) -> Self {
            self.crash_on = Some(coord.fill_template(URL));
            self
        }

        fn gets(&self) -> usize {
            self.body_gets.lock().len()
        }
    }

    impl Transport for MockTransport {
        async fn get_body(&self, url: &str) -> Result<Bytes, TransportError> {
            self.body_gets.lock().push(url.to_string());
            if self.crash_on.as_deref() == Some(url) {
                panic!("transport crashed on {url}");
            }
            self.bodies.get(url).cloned().ok_or(TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
        }

        async fn get_header(&self, _url: &str, _name: &str) -> Result<Option<String>, TransportError> {
            Ok(self.stamp.clone())
        }
    }

    /// Bodies are raw 16x16 RGBA.
    struct RawDecoder;

    impl RasterDecoder for RawDecoder {
        fn decode(&self, encoded: &[u8]) -> Result<Raster, DecodeError> {
            Raster::new(16, 16, encoded.to_vec()).map_err(|e| DecodeError(e.to_string()))
        }
    }

    const MASTER: TileCoord = TileCoord { z: 0, x: 0, y: 0 };
    const SUPP: TileCoord = TileCoord { z: 4, x: 10, y: 10 };

    fn transport() -> MockTransport {
        MockTransport::default()
            .with_tile(MASTER, &[(10, 10)])
            .with_tile(SUPP, &[(0, 0)])
            .stamped("Wed, 21 Oct 2015 07:28:00 GMT")
    }

    fn index_set(lazy: LazyMode, multithreading: bool) -> IndexSet {
        let options = IndexOptions {
            tile_width: 16,
            tile_height: 16,
            lazy,
            multithreading,
            ..IndexOptions::default()
        };
        IndexSet::new("roads", 0, 8, URL, 0, 0, options).unwrap()
    }

    fn loader(t: MockTransport) -> IndexLoader<MockTransport, RawDecoder> {
        IndexLoader::new(Arc::new(t), Arc::new(RawDecoder))
    }

    #[tokio::test]
    async fn eager_load_fetches_everything() {
        let mut set = index_set(LazyMode::None, false);
        let mut l = loader(transport());
        let report = l.initialize(&mut set).await;

        assert_eq!(report.fetched, 2);
        assert_eq!(set.state(), SetState::Ready);
        assert!(set.should_load_tile("roads", 160, 160, 8, None));
        assert!(!set.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn offloaded_packing_matches_inline() {
        let mut inline = index_set(LazyMode::None, false);
        loader(transport()).initialize(&mut inline).await;

        let mut offloaded = index_set(LazyMode::None, true);
        loader(transport()).initialize(&mut offloaded).await;

        assert_eq!(inline.dataset_extent(), offloaded.dataset_extent());
        for coord in [MASTER, SUPP] {
            assert_eq!(
                inline.member(coord).unwrap().grid(),
                offloaded.member(coord).unwrap().grid()
            );
        }
    }

    #[tokio::test]
    async fn master_then_background() {
        let mut set = index_set(LazyMode::MasterThenBackground, true);
        let mut l = loader(transport());
        l.initialize(&mut set).await;
        assert_eq!(set.state(), SetState::Populating);
        assert!(set.has_pending_fetches());

        let report = l.load_pending(&mut set).await;
        assert_eq!(report.fetched, 1);
        assert_eq!(set.state(), SetState::Ready);
    }

    #[tokio::test]
    async fn first_touch_fetches_on_demand() {
        let mut set = index_set(LazyMode::OnFirstTouch, true);
        let mut l = loader(transport());
        l.initialize(&mut set).await;
        assert!(!set.has_pending_fetches());
        assert_eq!(set.member(SUPP).unwrap().state().name(), "husk");

        assert!(set.should_load_tile("roads", 161, 160, 8, None));
        l.load_pending(&mut set).await;
        assert_eq!(set.member(SUPP).unwrap().state().name(), "raster-pending");
        assert!(!set.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn failed_supplemental_leaves_predicate_permissive() {
        let t = MockTransport::default().with_tile(MASTER, &[(10, 10)]);
        let mut set = index_set(LazyMode::None, false);
        let report = loader(t).initialize(&mut set).await;

        assert_eq!(report.failed, 1);
        assert_eq!(set.member(SUPP).unwrap().state().name(), "failed");
        assert_eq!(set.state(), SetState::Ready);
        assert!(set.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn second_session_reads_from_cache() {
        let store = Arc::new(InMemoryIndexStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut first = index_set(LazyMode::None, true);
        let hook_seen = seen.clone();
        let mut l = loader(transport())
            .with_store(store.clone())
            .on_last_modified(move |s| hook_seen.lock().push(s.to_string()));
        l.initialize(&mut first).await;
        assert_eq!(store.len(), 2);
        assert_eq!(l.version(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(seen.lock().len(), 1);

        let t = Arc::new(transport());
        let mut second = index_set(LazyMode::None, true);
        let mut l2 = IndexLoader::new(t.clone(), Arc::new(RawDecoder)).with_store(store.clone());
        let report = l2.initialize(&mut second).await;
        assert_eq!(report.from_cache, 2);
        assert_eq!(t.gets(), 0);
        assert!(!second.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn first_touch_members_are_cached_packed() {
        let store = Arc::new(InMemoryIndexStore::new());
        let mut first = index_set(LazyMode::OnFirstTouch, true);
        let mut l = loader(transport()).with_store(store.clone());
        l.initialize(&mut first).await;
        assert_eq!(store.len(), 1);

        assert!(first.should_load_tile("roads", 161, 160, 8, None));
        l.load_pending(&mut first).await;
        assert_eq!(store.len(), 2);
        assert!(first.member(SUPP).unwrap().is_ready());
        assert!(!first.should_load_tile("roads", 161, 160, 8, None));

        let t = Arc::new(transport());
        let mut second = index_set(LazyMode::OnFirstTouch, false);
        let mut l2 = IndexLoader::new(t.clone(), Arc::new(RawDecoder)).with_store(store.clone());
        assert_eq!(l2.initialize(&mut second).await.from_cache, 1);
        assert!(second.should_load_tile("roads", 161, 160, 8, None));
        assert_eq!(l2.load_pending(&mut second).await.from_cache, 1);
        assert_eq!(t.gets(), 0);
        assert!(!second.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn crashed_fetch_task_fails_its_member() {
        let mut set = index_set(LazyMode::None, false);
        let report = loader(transport().crashing_on(SUPP)).initialize(&mut set).await;

        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(set.member(SUPP).unwrap().state().name(), "failed");
        assert_eq!(set.state(), SetState::Ready);
        assert!(set.should_load_tile("roads", 161, 160, 8, None));
    }

    #[tokio::test]
    async fn new_version_prunes_and_refetches() {
        let store = Arc::new(InMemoryIndexStore::new());
        let stale = IndexCacheKey::new("roads", "old", MASTER).render();
        store.set(&stale, b"whatever").unwrap();

        let mut set = index_set(LazyMode::None, false);
        let t = Arc::new(transport());
        let mut l = IndexLoader::new(t.clone(), Arc::new(RawDecoder)).with_store(store.clone());
        let report = l.initialize(&mut set).await;

        assert_eq!(report.fetched, 2);
        assert_eq!(t.gets(), 2);
        assert!(store.get(&stale).unwrap().is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn unusable_cache_record_is_refetched_and_overwritten() {
        let store = Arc::new(InMemoryIndexStore::new());
        let stamp = "Wed, 21 Oct 2015 07:28:00 GMT";
        let key = IndexCacheKey::new("roads", stamp, MASTER).render();
        store.set(&key, b"BITX garbage").unwrap();

        let mut set = index_set(LazyMode::None, false);
        let mut l = loader(transport()).with_store(store.clone());
        let report = l.initialize(&mut set).await;
        assert_eq!(report.from_cache, 0);
        assert_eq!(report.fetched, 2);

        let bytes = store.get(&key).unwrap().unwrap();
        let grid = streaming::decode_record(&bytes, TileSize::square(16)).unwrap();
        assert!(grid.query_bit(10, 10));
    }

    #[tokio::test]
    async fn unversioned_server_skips_cache() {
        let store = Arc::new(InMemoryIndexStore::new());
        let t = MockTransport::default()
            .with_tile(MASTER, &[(10, 10)])
            .with_tile(SUPP, &[(0, 0)]);
        let mut set = index_set(LazyMode::None, false);
        let mut l = loader(t).with_store(store.clone());
        l.initialize(&mut set).await;
        assert_eq!(l.version(), None);
        assert!(store.is_empty());
        assert_eq!(set.state(), SetState::Ready);
    }
}
