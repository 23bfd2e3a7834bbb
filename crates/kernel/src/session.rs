use glam::Vec3;
use image::RgbaImage;
use mapstream_assets::{
    AtlasBuildJob, AtlasJobState, AtlasLayout, DirectoryImageSource, ImageSource, PictureKind,
    prepare_picture,
};
use mapstream_common::{EntityId, GlobalPortionCoord, MapId, StateId};
use mapstream_persist::{
    DirectorySource, LoadCompletion, MapInfo, MapProject, Movement, ObjectPortionRecord,
    ObjectRecords, ObjectRoster, Portion, PortionBounds, PortionLoader, Tileset,
};
use mapstream_stream::{Completion, LoadTicket, MovingWindow, to_global_portion, window_offsets};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::EngineError;
use crate::config::EngineConfig;

/// Where a map session is in its loading sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Baking autotile atlases and loading tileset and wall pictures.
    Textures,
    /// The initial window is in flight.
    Portions,
    /// Every slot of the initial window has resolved without a failure.
    Ready,
}

/// Pictures the map draws with, besides the autotile atlases. Missing
/// pictures are absent here and drawn as placeholders.
#[derive(Debug, Clone, Default)]
pub struct MapTextures {
    pub tileset: Option<RgbaImage>,
    /// Wall pictures by id, already padded.
    pub walls: BTreeMap<u32, RgbaImage>,
}

/// What one [`MapSession::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Completions that installed a portion.
    pub installed: usize,
    /// Completions that resolved a slot to absence.
    pub absent: usize,
    /// Completions discarded because their slot moved on.
    pub stale: usize,
    /// Loads that failed and left their slot absent.
    pub failed: usize,
    /// Unit window shifts.
    pub shift_steps: u32,
    pub evicted: usize,
    /// Loads handed to the loader.
    pub requested: usize,
}

impl TickReport {
    fn absorb(&mut self, other: TickReport) {
        self.installed += other.installed;
        self.absent += other.absent;
        self.stale += other.stale;
        self.failed += other.failed;
    }
}

/// Everything needed to run one open map: metadata, the moving window, the
/// loader feeding it, object records and textures.
///
/// Game state is only mutated from [`tick`](Self::tick) and the explicit
/// operations below; load results become visible at the start of a tick.
pub struct MapSession {
    config: EngineConfig,
    map: MapId,
    info: MapInfo,
    bounds: PortionBounds,
    tileset: Tileset,
    roster: ObjectRoster,
    records: ObjectRecords,
    window: MovingWindow<Portion>,
    loader: PortionLoader,
    images: Box<dyn ImageSource>,
    atlas: AtlasBuildJob,
    textures: Option<MapTextures>,
    phase: LoadPhase,
    tick: u64,
    entry_point: Option<GlobalPortionCoord>,
}

impl MapSession {
    /// Open a map of `project`.
    ///
    /// `records` are the object records kept from an earlier visit, if any.
    /// The entry-point flag of portion files is only honored on the map the
    /// game starts on.
    pub fn open(
        config: EngineConfig,
        project: &MapProject,
        map: MapId,
        records: Option<ObjectRecords>,
        reference: Vec3,
        is_start_map: bool,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let _span = tracing::info_span!("open_map", map = map.0).entered();

        let info = project.load_map_info(map)?;
        let bounds = info.bounds(config.portion_size);
        let tileset = project.load_tilesets()?.get(info.tileset)?.clone();
        let roster = project.load_roster(map)?;

        let mut records = match records {
            Some(records) if records.bounds() == bounds => records,
            Some(_) => {
                tracing::warn!("saved object records do not match the map extents, starting over");
                ObjectRecords::for_map(bounds)
            }
            None => ObjectRecords::for_map(bounds),
        };
        records.seed_from_roster(&roster, config.portion_size);

        let source = Arc::new(DirectorySource::new(project.map_dir(map)));
        let loader = PortionLoader::spawn(
            source,
            bounds,
            config.loader_workers,
            config.honor_entry_point && is_start_map,
        )
        .map_err(EngineError::LoaderSpawn)?;

        let center = to_global_portion(reference, config.portion_size);
        let window = MovingWindow::new(config.limit(), center);
        let atlas = AtlasBuildJob::new(
            AtlasLayout::for_autotiles(config.square_size),
            tileset.autotiles.iter().copied(),
        );

        tracing::info!(
            name = %info.name,
            portions = bounds.portion_count(),
            autotiles = tileset.autotiles.len(),
            "map opened"
        );

        Ok(Self {
            images: Box::new(DirectoryImageSource::new(project.pictures_dir())),
            config,
            map,
            info,
            bounds,
            tileset,
            roster,
            records,
            window,
            loader,
            atlas,
            textures: None,
            phase: LoadPhase::Textures,
            tick: 0,
            entry_point: None,
        })
    }

    /// Advance one tick with the reference point at `reference`.
    ///
    /// Completed loads are applied first. While textures are loading one
    /// autotile picture is baked per tick; once done, the whole window is
    /// requested. After that the window follows the reference point.
    ///
    /// A load failure before the map is ready aborts map entry. The other
    /// results of the same batch are still applied, and the failed slots are
    /// retried on the configured cadence, so a caller may keep ticking once
    /// the files are repaired.
    pub fn tick(&mut self, reference: Vec3) -> Result<TickReport, EngineError> {
        self.tick += 1;
        let _span = tracing::debug_span!("tick", tick = self.tick).entered();
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let completions = self.loader.poll();
        report.absorb(self.apply(completions)?);

        let center = to_global_portion(reference, self.config.portion_size);
        match self.phase {
            LoadPhase::Textures => {
                if self.textures.is_none() {
                    self.textures = Some(self.load_textures());
                }
                if self.atlas.step(self.images.as_ref()) == AtlasJobState::Done {
                    let tickets = self.window.reset(center);
                    report.requested += self.submit(tickets);
                    self.phase = LoadPhase::Portions;
                    tracing::info!(
                        atlases = self.atlas.atlases().len(),
                        requested = report.requested,
                        "textures ready, loading portions"
                    );
                }
            }
            LoadPhase::Portions | LoadPhase::Ready => {
                let shift = self.window.update(center);
                report.shift_steps = shift.steps;
                report.evicted = shift.evicted.len();
                report.requested += self.submit(shift.requests);

                let retries = self.window.retry_due(self.tick);
                if !retries.is_empty() {
                    tracing::debug!(count = retries.len(), "retrying failed portions");
                }
                report.requested += self.submit(retries);
            }
        }

        self.promote();
        Ok(report)
    }

    /// Block until every load in flight has completed, or `timeout` elapses,
    /// and apply the results. The window does not move.
    pub fn settle(&mut self, timeout: Duration) -> Result<TickReport, EngineError> {
        let completions = self.loader.wait_idle(timeout);
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };
        report.absorb(self.apply(completions)?);
        self.promote();
        Ok(report)
    }

    /// Visit every window coordinate inside the map with its object record
    /// and, if loaded, its portion.
    pub fn update_portions<F>(&mut self, mut f: F)
    where
        F: FnMut(GlobalPortionCoord, &ObjectPortionRecord, Option<&mut Portion>),
    {
        let center = self.window.center();
        for offset in window_offsets(self.window.limit()) {
            let coord = center + offset;
            let Some(record) = self.records.record(coord) else {
                continue;
            };
            f(coord, record, self.window.get_mut(offset));
        }
    }

    /// Move an object to the portion containing `position` and mirror the
    /// bookkeeping into every loaded portion involved.
    pub fn move_object(&mut self, id: EntityId, position: Vec3) -> Result<Movement, EngineError> {
        let to = to_global_portion(position, self.config.portion_size);
        let movement = self.records.move_object(id, to)?;
        for coord in [movement.home, movement.from, movement.to] {
            self.sync_portion(coord);
        }
        tracing::debug!(%id, from = %movement.from, to = %movement.to, "object moved");
        Ok(movement)
    }

    /// Override the states of an object. Persists across portion reloads and
    /// map visits.
    pub fn set_state_override(
        &mut self,
        id: EntityId,
        states: Vec<StateId>,
    ) -> Result<(), EngineError> {
        let home = self.records.set_state_override(id, states)?;
        self.sync_portion(home);
        Ok(())
    }

    pub fn clear_state_override(&mut self, id: EntityId) -> Result<(), EngineError> {
        let home = self.records.clear_state_override(id)?;
        self.sync_portion(home);
        Ok(())
    }

    /// Close the map. Moved objects go back home; the records are returned
    /// for the next visit.
    pub fn close(mut self) -> ObjectRecords {
        self.records.clear_moved();
        tracing::info!(map = self.map.0, ticks = self.tick, "map closed");
        self.records
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn map_id(&self) -> MapId {
        self.map
    }

    pub fn info(&self) -> &MapInfo {
        &self.info
    }

    pub fn bounds(&self) -> PortionBounds {
        self.bounds
    }

    pub fn tileset(&self) -> &Tileset {
        &self.tileset
    }

    pub fn roster(&self) -> &ObjectRoster {
        &self.roster
    }

    pub fn records(&self) -> &ObjectRecords {
        &self.records
    }

    pub fn window(&self) -> &MovingWindow<Portion> {
        &self.window
    }

    pub fn atlas(&self) -> &AtlasBuildJob {
        &self.atlas
    }

    pub fn textures(&self) -> Option<&MapTextures> {
        self.textures.as_ref()
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LoadPhase::Ready
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Portion holding the map's entry point, once it has been loaded.
    pub fn entry_point(&self) -> Option<GlobalPortionCoord> {
        self.entry_point
    }

    pub fn portion_at(&self, coord: GlobalPortionCoord) -> Option<&Portion> {
        self.window.portion_at(coord)
    }

    fn apply(&mut self, completions: Vec<LoadCompletion>) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();
        let mut entry_failure = None;
        for LoadCompletion { ticket, result } in completions {
            match result {
                Ok(content) => {
                    let portion = content.map(|content| {
                        let record = self.records.record(content.coord);
                        Portion::assemble(content, record)
                    });
                    let entry = portion.as_ref().is_some_and(Portion::is_entry_point);
                    match self.window.complete(ticket, portion) {
                        Completion::Installed => {
                            report.installed += 1;
                            if entry {
                                self.entry_point = Some(ticket.coord);
                            }
                        }
                        Completion::Absent => report.absent += 1,
                        Completion::Stale => report.stale += 1,
                    }
                }
                Err(e) => {
                    if !self.window.fail(ticket, self.retry_at()) {
                        report.stale += 1;
                        continue;
                    }
                    report.failed += 1;
                    if self.phase == LoadPhase::Ready {
                        tracing::error!(error = %e, "portion load failed, slot left empty");
                    } else {
                        tracing::error!(error = %e, "portion failed during map entry");
                        entry_failure.get_or_insert(e);
                    }
                }
            }
        }
        match entry_failure {
            Some(e) => Err(EngineError::MapEntry(e)),
            None => Ok(report),
        }
    }

    fn submit(&mut self, tickets: Vec<LoadTicket>) -> usize {
        let count = tickets.len();
        for ticket in tickets {
            self.loader.load(ticket);
        }
        count
    }

    fn promote(&mut self) {
        if self.phase == LoadPhase::Portions
            && self.window.pending_count() == 0
            && self.window.failed_count() == 0
        {
            self.phase = LoadPhase::Ready;
            tracing::info!(
                loaded = self.window.portions().occupied(),
                tick = self.tick,
                "map ready"
            );
        }
    }

    fn retry_at(&self) -> Option<u64> {
        self.config
            .retry_after_ticks
            .map(|after| self.tick.saturating_add(after))
    }

    fn sync_portion(&mut self, coord: GlobalPortionCoord) {
        let Some(record) = self.records.record(coord) else {
            return;
        };
        if let Some(portion) = self.window.portion_at_mut(coord) {
            portion.sync_with(record);
        }
    }

    fn load_textures(&self) -> MapTextures {
        let square = self.config.square_size;
        let picture = |kind: PictureKind, id: u32| {
            prepare_picture(self.images.as_ref(), kind, id, square)
                .inspect_err(|e| {
                    tracing::warn!(error = %e, "picture unavailable, using placeholder")
                })
                .ok()
        };

        let tileset = picture(PictureKind::Tilesets, self.tileset.picture);
        let walls = self
            .tileset
            .walls
            .iter()
            .filter_map(|&id| picture(PictureKind::Walls, id).map(|img| (id, img)))
            .collect();
        MapTextures { tileset, walls }
    }
}
