use std::collections::BTreeMap;

use bitmap::{BitmapIndex, CellGrid, IndexState, Raster};
use foundation::{CANONICAL_ZOOM, PixelExtent, TileCoord, TileSize, tile_footprint};
use runtime::WorkQueue;
use tracing::{debug, info, warn};

use crate::dataset_extent::DatasetExtent;
use crate::error::{ConfigError, IndexSetError};
use crate::options::{IndexOptions, LazyMode};
use crate::select::{SelectParams, Selection, select_supplemental};

/// Warm-up progress of an index set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetState {
    /// Waiting for the master tile.
    Initializing,
    /// Master ready and dataset extent computed.
    ExtentKnown,
    Selecting,
    /// Supplemental tiles outstanding.
    Populating,
    /// No member is waiting on a fetch.
    Ready,
}

/// Pixels for one member, as produced by a fetch or a cache read.
#[derive(Debug, Clone)]
pub enum MemberPayload {
    /// Decoded, not yet packed.
    Raster(Raster),
    Grid(CellGrid),
}

/// What [`IndexSet::add_member`] did with a payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Ready,
    /// Held as raw pixels until the first query packs them.
    Deferred,
    /// The member was already ready; the payload was dropped.
    Duplicate,
}

/// One member fetch handed out by [`IndexSet::take_fetches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub coord: TileCoord,
    pub url: String,
}

/// All index tiles of one layer, and the "should this tile load" predicate.
///
/// Single owner, no interior locking. Fetch results re-enter through
/// [`IndexSet::add_member`] in any order.
#[derive(Debug)]
pub struct IndexSet {
    layer_id: String,
    min_z: u8,
    max_z: u8,
    url_template: String,
    master: TileCoord,
    options: IndexOptions,
    size: TileSize,
    state: SetState,
    members: BTreeMap<TileCoord, BitmapIndex>,
    fetch_queue: WorkQueue<TileCoord>,
    dataset: Option<DatasetExtent>,
    selection: Option<Selection>,
}

impl IndexSet {
    /// Master tile is `(master_x, master_y, min_z)`; it is queued for fetch
    /// immediately.
    pub fn new(
        layer_id: impl Into<String>,
        min_z: u8,
        max_z: u8,
        url_template: impl Into<String>,
        master_x: u32,
        master_y: u32,
        options: IndexOptions,
    ) -> Result<Self, IndexSetError> {
        options.validate()?;
        options.validate_zooms(min_z, max_z)?;
        let master = TileCoord::new(master_x, master_y, min_z);
        if !master.is_valid() {
            return Err(ConfigError::MasterOutOfRange(master).into());
        }

        let layer_id = layer_id.into();
        let size = options.tile_size();
        let mut members = BTreeMap::new();
        members.insert(master, BitmapIndex::husk(layer_id.clone(), master, size));
        let mut fetch_queue = WorkQueue::new();
        fetch_queue.push(-1, master);

        Ok(Self {
            layer_id,
            min_z,
            max_z,
            url_template: url_template.into(),
            master,
            options,
            size,
            state: SetState::Initializing,
            members,
            fetch_queue,
            dataset: None,
            selection: None,
        })
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn zoom_range(&self) -> (u8, u8) {
        (self.min_z, self.max_z)
    }

    pub fn master(&self) -> TileCoord {
        self.master
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn tile_size(&self) -> TileSize {
        self.size
    }

    pub fn state(&self) -> SetState {
        self.state
    }

    pub fn members(&self) -> impl Iterator<Item = &BitmapIndex> {
        self.members.values()
    }

    pub fn member(&self, coord: TileCoord) -> Option<&BitmapIndex> {
        self.members.get(&coord)
    }

    pub fn dataset_extent(&self) -> Option<&PixelExtent> {
        self.dataset.as_ref().map(DatasetExtent::extent)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Whether a queued member still needs fetching.
    pub fn has_pending_fetches(&self) -> bool {
        self.fetch_queue.any(|c| {
            self.members
                .get(c)
                .is_some_and(|m| matches!(m.state(), IndexState::Husk))
        })
    }

    pub fn url_for(&self, coord: TileCoord) -> String {
        coord.fill_template(&self.url_template)
    }

    /// Whether pixels for `coord` should arrive unpacked.
    pub fn defers_packing(&self, coord: TileCoord) -> bool {
        self.options.lazy == LazyMode::OnFirstTouch && coord != self.master
    }

    /// Pop up to `limit` queued members and mark them in flight.
    pub fn take_fetches(&mut self, limit: usize) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        while out.len() < limit {
            let Some((_, _, coord)) = self.fetch_queue.pop_next() else {
                break;
            };
            let Some(member) = self.members.get_mut(&coord) else {
                continue;
            };
            if member.begin_fetch() {
                debug!("{}: fetching index tile {coord}", self.layer_id);
                out.push(FetchRequest {
                    coord,
                    url: self.url_for(coord),
                });
            }
        }
        out
    }

    /// Integrate pixels for a member.
    ///
    /// Matching is by coordinate; a payload for a member that is already ready
    /// is ignored, so duplicate or out-of-order arrivals are harmless.
    pub fn add_member(
        &mut self,
        coord: TileCoord,
        payload: MemberPayload,
    ) -> Result<AddOutcome, IndexSetError> {
        let defer = self.defers_packing(coord);
        let member = self
            .members
            .get_mut(&coord)
            .ok_or(IndexSetError::UnknownMember(coord))?;
        if member.is_ready() {
            debug!("{}: duplicate payload for {coord} ignored", self.layer_id);
            return Ok(AddOutcome::Duplicate);
        }

        let filled = match payload {
            MemberPayload::Raster(raster) if defer => {
                member.fill_raster(raster).map(|()| AddOutcome::Deferred)
            }
            MemberPayload::Raster(raster) => CellGrid::from_raster(&raster, &self.options.raster)
                .and_then(|grid| member.fill_grid(grid))
                .map(|()| AddOutcome::Ready),
            MemberPayload::Grid(grid) => member.fill_grid(grid).map(|()| AddOutcome::Ready),
        };
        let outcome = match filled {
            Ok(outcome) => outcome,
            Err(source) => {
                member.fail();
                warn!("{}: index tile {coord} rejected: {source}", self.layer_id);
                self.settle();
                return Err(IndexSetError::Rejected { coord, source });
            }
        };

        if outcome == AddOutcome::Ready {
            if coord == self.master {
                self.on_master_ready();
            } else {
                self.tighten_from(coord);
            }
        }
        self.settle();
        Ok(outcome)
    }

    /// A fetch for `coord` ended without pixels. The member keeps answering
    /// "maybe" and is never fetched again.
    pub fn mark_failed(&mut self, coord: TileCoord) {
        if let Some(member) = self.members.get_mut(&coord) {
            member.fail();
            warn!("{}: index tile {coord} failed; queries stay permissive", self.layer_id);
        }
        self.settle();
    }

    fn on_master_ready(&mut self) {
        let Some(master) = self.members.get(&self.master) else {
            return;
        };
        self.dataset = DatasetExtent::seed(master);
        self.state = SetState::ExtentKnown;
        if let Some(d) = &self.dataset {
            debug!("{}: dataset extent {:?}", self.layer_id, d.extent().as_array());
        }

        self.state = SetState::Selecting;
        let selection = select_supplemental(
            master,
            self.dataset.as_ref().map(DatasetExtent::extent),
            SelectParams {
                min_z: self.min_z,
                max_z: self.max_z,
                max_index_zoom: self.options.max_index_zoom,
                budget: self.options.max_supplemental_tiles,
            },
        );
        info!(
            "{}: {} supplemental index tiles (complete: {})",
            self.layer_id,
            selection.tiles.len(),
            selection.complete
        );

        for &tile in &selection.tiles {
            if self.members.contains_key(&tile) {
                continue;
            }
            self.members
                .insert(tile, BitmapIndex::husk(self.layer_id.clone(), tile, self.size));
            if self.options.lazy != LazyMode::OnFirstTouch {
                self.fetch_queue.push(i32::from(tile.z), tile);
            }
        }
        self.selection = Some(selection);
        self.state = SetState::Populating;
    }

    fn tighten_from(&mut self, coord: TileCoord) {
        let (Some(dataset), Some(member)) = (self.dataset.as_mut(), self.members.get(&coord)) else {
            return;
        };
        if dataset.tighten(member) {
            debug!(
                "{}: dataset extent tightened by {coord} to {:?}",
                self.layer_id,
                dataset.extent().as_array()
            );
        }
    }

    fn settle(&mut self) {
        if self.state < SetState::Populating {
            // A master that failed leaves nothing to wait for.
            let master_failed = self
                .members
                .get(&self.master)
                .is_some_and(|m| matches!(m.state(), IndexState::Failed));
            if master_failed {
                self.state = SetState::Ready;
            }
            return;
        }
        let waiting = self
            .members
            .values()
            .any(|m| matches!(m.state(), IndexState::Husk | IndexState::Fetching));
        if !waiting && self.state != SetState::Ready {
            info!("{}: index set ready", self.layer_id);
            self.state = SetState::Ready;
        }
    }

    /// Whether tile `(x, y, z)` of `layer_id` may contain data.
    ///
    /// Answers `false` only when the tile misses the dataset extent, or when
    /// at least one ready index covers it and every ready index covering it
    /// finds no data. Anything else, including other layers, zooms out of
    /// range and members still in flight, answers `true`.
    ///
    /// `precomputed` is the query tile's footprint at [`CANONICAL_ZOOM`].
    pub fn should_load_tile(
        &mut self,
        layer_id: &str,
        x: u32,
        y: u32,
        z: u8,
        precomputed: Option<&PixelExtent>,
    ) -> bool {
        if layer_id != self.layer_id || z < self.min_z || z > self.max_z {
            return true;
        }
        let tile = TileCoord::new(x, y, z);
        if !tile.is_valid() {
            return true;
        }
        let query = match precomputed {
            Some(e) if e.zoom == CANONICAL_ZOOM => *e,
            _ => tile_footprint(tile, CANONICAL_ZOOM, self.size),
        };

        self.resolve_pending(tile, &query);

        let Some(dataset) = &self.dataset else {
            return true;
        };
        if !query.intersects(dataset.extent()) {
            return false;
        }

        let mut any_ready = false;
        let mut maybe = false;
        let mut touched = Vec::new();
        for (coord, member) in &self.members {
            if !member.can_index_region(tile, Some(&query)) {
                continue;
            }
            match member.region_intersects_data(tile) {
                Some(true) => maybe = true,
                Some(false) => any_ready = true,
                None => {
                    maybe = true;
                    if matches!(member.state(), IndexState::Husk) {
                        touched.push(*coord);
                    }
                }
            }
        }

        if self.options.lazy == LazyMode::OnFirstTouch {
            for coord in touched {
                if !self.fetch_queue.any(|c| *c == coord) {
                    debug!("{}: queued {coord} on first touch", self.layer_id);
                    self.fetch_queue.push(i32::from(coord.z), coord);
                }
            }
        }

        maybe || !any_ready
    }

    /// Pack raw pixels held by members that cover `tile`.
    fn resolve_pending(&mut self, tile: TileCoord, query: &PixelExtent) {
        let mut packed = Vec::new();
        for (coord, member) in self.members.iter_mut() {
            if !matches!(member.state(), IndexState::RasterPending(_))
                || !member.can_index_region(tile, Some(query))
            {
                continue;
            }
            match member.resolve(&self.options.raster) {
                Ok(_) => packed.push(*coord),
                Err(e) => warn!("{}: packing {coord} failed: {e}", self.layer_id),
            }
        }
        for coord in packed {
            self.tighten_from(coord);
        }
    }
}
