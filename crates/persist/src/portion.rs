use mapstream_common::{EntityId, GlobalPortionCoord, StateId};
use mapstream_stream::Evict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::records::ObjectPortionRecord;

/// What a land cell draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileRef {
    /// A rectangle of the tileset picture, in squares: `[x, y, w, h]`.
    Floor { rect: [u32; 4] },
    /// An autotile, resolved against the baked atlases.
    Autotile { id: u32 },
}

/// One terrain cell. `position` is in squares, relative to the portion origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Land {
    pub position: [i32; 3],
    pub tile: TileRef,
}

/// An object authored in a portion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapObject {
    pub id: EntityId,
    pub position: [i32; 3],
    #[serde(default)]
    pub state: StateId,
}

/// On-disk shape of a portion file.
///
/// A file without `lands` describes an empty portion and resolves to the
/// absence sentinel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lands: Option<Vec<Land>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<MapObject>,
    /// Set only on the portion holding the map's entry point.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub entry_point: bool,
}

/// Decoded portion content, before object records are merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortionContent {
    pub coord: GlobalPortionCoord,
    pub lands: Vec<Land>,
    pub objects: Vec<MapObject>,
    pub entry_point: bool,
}

/// Decode the raw bytes of a portion file.
///
/// `honor_entry_point` is false when the map is not the one the game starts
/// on, in which case the flag is dropped.
pub fn decode_portion(
    coord: GlobalPortionCoord,
    bytes: &[u8],
    honor_entry_point: bool,
) -> Result<Option<PortionContent>, serde_json::Error> {
    let file: PortionFile = serde_json::from_slice(bytes)?;
    Ok(file.lands.map(|lands| PortionContent {
        coord,
        lands,
        objects: file.objects,
        entry_point: file.entry_point && honor_entry_point,
    }))
}

/// A loaded chunk of world content.
///
/// Holds the terrain and authored objects of the file plus a copy of the
/// movement and state bookkeeping of its [`ObjectPortionRecord`]. The copy
/// is transient: it is rebuilt from the record whenever the portion is
/// loaded again.
#[derive(Debug, Clone, PartialEq)]
pub struct Portion {
    coord: GlobalPortionCoord,
    lands: Vec<Land>,
    objects: Vec<MapObject>,
    moved_in: Vec<EntityId>,
    moved_out: Vec<EntityId>,
    state_overrides: BTreeMap<EntityId, Vec<StateId>>,
    entry_point: bool,
}

impl Portion {
    /// Build a portion from decoded content and the matching record.
    pub fn assemble(content: PortionContent, record: Option<&ObjectPortionRecord>) -> Self {
        let mut portion = Self {
            coord: content.coord,
            lands: content.lands,
            objects: content.objects,
            moved_in: Vec::new(),
            moved_out: Vec::new(),
            state_overrides: BTreeMap::new(),
            entry_point: content.entry_point,
        };
        if let Some(record) = record {
            portion.sync_with(record);
        }
        portion
    }

    /// Refresh the transient lists from the persistent record.
    pub fn sync_with(&mut self, record: &ObjectPortionRecord) {
        self.moved_in.clone_from(&record.moved_in);
        self.moved_out.clone_from(&record.moved_out);
        self.state_overrides.clone_from(&record.state_overrides);
    }

    pub fn coord(&self) -> GlobalPortionCoord {
        self.coord
    }

    pub fn lands(&self) -> &[Land] {
        &self.lands
    }

    /// Every object authored here, including those currently elsewhere.
    pub fn authored_objects(&self) -> &[MapObject] {
        &self.objects
    }

    /// Authored objects that have not moved out of this portion.
    pub fn resident_objects(&self) -> impl Iterator<Item = &MapObject> {
        self.objects
            .iter()
            .filter(|o| !self.moved_out.contains(&o.id))
    }

    pub fn moved_in(&self) -> &[EntityId] {
        &self.moved_in
    }

    pub fn moved_out(&self) -> &[EntityId] {
        &self.moved_out
    }

    /// States of an object: its override list if one exists, else its
    /// authored state.
    pub fn object_states(&self, id: EntityId) -> Vec<StateId> {
        if let Some(states) = self.state_overrides.get(&id) {
            return states.clone();
        }
        self.objects
            .iter()
            .filter(|o| o.id == id)
            .map(|o| o.state)
            .collect()
    }

    pub fn state_overrides(&self) -> &BTreeMap<EntityId, Vec<StateId>> {
        &self.state_overrides
    }

    pub fn is_entry_point(&self) -> bool {
        self.entry_point
    }

    /// Whether every transient list is empty.
    pub fn is_cleared(&self) -> bool {
        self.lands.is_empty()
            && self.objects.is_empty()
            && self.moved_in.is_empty()
            && self.moved_out.is_empty()
            && self.state_overrides.is_empty()
    }
}

impl Evict for Portion {
    fn clear(&mut self) {
        self.lands.clear();
        self.objects.clear();
        self.moved_in.clear();
        self.moved_out.clear();
        self.state_overrides.clear();
        self.entry_point = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "lands": [
            {"position": [0, 0, 0], "tile": {"kind": "floor", "rect": [0, 0, 1, 1]}},
            {"position": [1, 0, 0], "tile": {"kind": "autotile", "id": 3}}
        ],
        "objects": [
            {"id": 1, "position": [2, 0, 2]},
            {"id": 2, "position": [4, 0, 4], "state": 2}
        ],
        "entry_point": true
    }"#;

    #[test]
    fn decode_full_portion() {
        let coord = GlobalPortionCoord::new(1, 0, 2);
        let content = decode_portion(coord, SAMPLE.as_bytes(), true).unwrap().unwrap();
        assert_eq!(content.coord, coord);
        assert_eq!(content.lands.len(), 2);
        assert_eq!(content.lands[1].tile, TileRef::Autotile { id: 3 });
        assert_eq!(content.objects[0].state, StateId(0));
        assert_eq!(content.objects[1].state, StateId(2));
        assert!(content.entry_point);
    }

    #[test]
    fn entry_point_dropped_when_not_honored() {
        let content = decode_portion(GlobalPortionCoord::default(), SAMPLE.as_bytes(), false)
            .unwrap()
            .unwrap();
        assert!(!content.entry_point);
    }

    #[test]
    fn file_without_lands_is_absent() {
        let decoded = decode_portion(GlobalPortionCoord::default(), b"{}", true).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(decode_portion(GlobalPortionCoord::default(), b"[1, 2", true).is_err());
        assert!(decode_portion(GlobalPortionCoord::default(), br#"{"lands": 4}"#, true).is_err());
    }

    #[test]
    fn assemble_merges_record_state() {
        let content = decode_portion(GlobalPortionCoord::default(), SAMPLE.as_bytes(), true)
            .unwrap()
            .unwrap();
        let mut record = ObjectPortionRecord::default();
        record.moved_out.push(EntityId(1));
        record.moved_in.push(EntityId(9));
        record
            .state_overrides
            .insert(EntityId(2), vec![StateId(4), StateId(5)]);

        let portion = Portion::assemble(content, Some(&record));
        let resident: Vec<_> = portion.resident_objects().map(|o| o.id).collect();
        assert_eq!(resident, vec![EntityId(2)]);
        assert_eq!(portion.moved_in(), &[EntityId(9)]);
        assert_eq!(portion.object_states(EntityId(2)), vec![StateId(4), StateId(5)]);
        assert_eq!(portion.object_states(EntityId(1)), vec![StateId(0)]);
        assert!(portion.is_entry_point());
    }

    #[test]
    fn clear_resets_every_transient_list() {
        let content = decode_portion(GlobalPortionCoord::default(), SAMPLE.as_bytes(), true)
            .unwrap()
            .unwrap();
        let mut record = ObjectPortionRecord::default();
        record.moved_in.push(EntityId(9));
        let mut portion = Portion::assemble(content, Some(&record));
        assert!(!portion.is_cleared());

        portion.clear();
        assert!(portion.is_cleared());
        assert!(!portion.is_entry_point());
        // The record is untouched.
        assert_eq!(record.moved_in, vec![EntityId(9)]);
    }
}
