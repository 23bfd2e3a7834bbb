use mapstream_common::{EntityId, GlobalPortionCoord, StateId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::map::{ObjectRoster, PortionBounds};

/// Errors from object bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("entity {0} is not in the object roster")]
    UnknownEntity(EntityId),
    #[error("portion {0} is outside the map")]
    OutOfMap(GlobalPortionCoord),
}

/// Persistent object bookkeeping of one portion.
///
/// Survives the portion being evicted and reloaded; only cleared when the
/// map is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPortionRecord {
    /// Objects located here that were authored in another portion.
    pub moved_in: Vec<EntityId>,
    /// Objects authored here that are currently in another portion.
    pub moved_out: Vec<EntityId>,
    /// Objects authored here.
    pub owned: Vec<EntityId>,
    /// Objects whose states differ from the authored default.
    pub state_overrides: BTreeMap<EntityId, Vec<StateId>>,
}

impl ObjectPortionRecord {
    fn clear_moved(&mut self) {
        self.moved_in.clear();
        self.moved_out.clear();
    }
}

/// Result of [`ObjectRecords::move_object`]: every portion whose record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movement {
    pub home: GlobalPortionCoord,
    pub from: GlobalPortionCoord,
    pub to: GlobalPortionCoord,
}

/// Object records of a whole map, keyed by global portion coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecords {
    bounds: PortionBounds,
    records: Vec<ObjectPortionRecord>,
    homes: BTreeMap<EntityId, GlobalPortionCoord>,
    locations: BTreeMap<EntityId, GlobalPortionCoord>,
}

impl ObjectRecords {
    /// One empty record per portion of the map.
    pub fn for_map(bounds: PortionBounds) -> Self {
        Self {
            bounds,
            records: vec![ObjectPortionRecord::default(); bounds.portion_count()],
            homes: BTreeMap::new(),
            locations: BTreeMap::new(),
        }
    }

    pub fn bounds(&self) -> PortionBounds {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, coord: GlobalPortionCoord) -> Option<&ObjectPortionRecord> {
        self.bounds
            .linear_index(coord)
            .and_then(|i| self.records.get(i))
    }

    pub fn record_mut(&mut self, coord: GlobalPortionCoord) -> Option<&mut ObjectPortionRecord> {
        self.bounds
            .linear_index(coord)
            .and_then(|i| self.records.get_mut(i))
    }

    /// Register every roster object in the portion containing its initial
    /// position. Objects already known keep their bookkeeping.
    pub fn seed_from_roster(&mut self, roster: &ObjectRoster, portion_size: u32) {
        for entry in &roster.objects {
            if self.homes.contains_key(&entry.id) {
                continue;
            }
            let coord = mapstream_stream::to_global_portion(entry.position, portion_size);
            let Some(record) = self.record_mut(coord) else {
                tracing::warn!(id = %entry.id, %coord, "roster object lies outside the map");
                continue;
            };
            record.owned.push(entry.id);
            self.homes.insert(entry.id, coord);
        }
        tracing::debug!(objects = self.homes.len(), "object records seeded");
    }

    /// Portion an object was authored in.
    pub fn home_of(&self, id: EntityId) -> Option<GlobalPortionCoord> {
        self.homes.get(&id).copied()
    }

    /// Portion an object is currently in.
    pub fn location_of(&self, id: EntityId) -> Option<GlobalPortionCoord> {
        self.locations.get(&id).copied().or_else(|| self.home_of(id))
    }

    /// Move an object into the portion `to`, updating the moved-in and
    /// moved-out lists of the portions involved.
    pub fn move_object(
        &mut self,
        id: EntityId,
        to: GlobalPortionCoord,
    ) -> Result<Movement, RecordError> {
        let home = self.home_of(id).ok_or(RecordError::UnknownEntity(id))?;
        if !self.bounds.contains(to) {
            return Err(RecordError::OutOfMap(to));
        }
        let from = self.location_of(id).unwrap_or(home);
        let movement = Movement { home, from, to };
        if from == to {
            return Ok(movement);
        }

        if from == home {
            if let Some(r) = self.record_mut(home) {
                r.moved_out.push(id);
            }
        } else if let Some(r) = self.record_mut(from) {
            r.moved_in.retain(|e| *e != id);
        }

        if to == home {
            if let Some(r) = self.record_mut(home) {
                r.moved_out.retain(|e| *e != id);
            }
            self.locations.remove(&id);
        } else {
            if let Some(r) = self.record_mut(to) {
                r.moved_in.push(id);
            }
            self.locations.insert(id, to);
        }
        Ok(movement)
    }

    /// Record the states of an object in its home portion.
    pub fn set_state_override(
        &mut self,
        id: EntityId,
        states: Vec<StateId>,
    ) -> Result<GlobalPortionCoord, RecordError> {
        let home = self.home_of(id).ok_or(RecordError::UnknownEntity(id))?;
        if let Some(r) = self.record_mut(home) {
            r.state_overrides.insert(id, states);
        }
        Ok(home)
    }

    /// Drop an override so the object falls back to its authored state.
    pub fn clear_state_override(
        &mut self,
        id: EntityId,
    ) -> Result<GlobalPortionCoord, RecordError> {
        let home = self.home_of(id).ok_or(RecordError::UnknownEntity(id))?;
        if let Some(r) = self.record_mut(home) {
            r.state_overrides.remove(&id);
        }
        Ok(home)
    }

    /// Map close: every moved object returns home, state overrides stay.
    pub fn clear_moved(&mut self) {
        for record in &mut self.records {
            record.clear_moved();
        }
        self.locations.clear();
    }
}
