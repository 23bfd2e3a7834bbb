//! Map project files.
//!
//! Layout inside a project directory:
//! ```text
//! tilesets.json            - tileset descriptors
//! maps/
//!   MAP0001/
//!     infos.json           - extents and tileset reference
//!     objects.json         - object roster (id + initial position)
//!     0_0_0.json           - one file per portion
//! pictures/
//!   autotiles/1.png        - source images by kind and id
//! ```

use mapstream_common::{EntityId, GlobalPortionCoord, MapId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors reading map-level files.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tileset {0} not found")]
    UnknownTileset(u32),
}

/// Contents of `infos.json`. Extents are in squares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    pub name: String,
    pub length: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub tileset: u32,
}

impl MapInfo {
    /// Valid portion range of this map.
    pub fn bounds(&self, portion_size: u32) -> PortionBounds {
        PortionBounds::from_extents(
            self.length,
            self.height + self.depth,
            self.width,
            portion_size,
        )
    }
}

/// Inclusive upper limits of valid global portion coordinates.
///
/// Every axis starts at 0. A map with a zero extent on some axis has no
/// valid portion at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortionBounds {
    pub max_x: i32,
    pub max_y: i32,
    pub max_z: i32,
}

impl PortionBounds {
    /// Each axis is bounded by `ceil(extent / portion_size) - 1`.
    pub fn from_extents(length: u32, vertical: u32, width: u32, portion_size: u32) -> Self {
        assert!(portion_size > 0, "portion_size must be positive");
        let max = |extent: u32| extent.div_ceil(portion_size) as i32 - 1;
        Self {
            max_x: max(length),
            max_y: max(vertical),
            max_z: max(width),
        }
    }

    pub fn contains(&self, coord: GlobalPortionCoord) -> bool {
        (0..=self.max_x).contains(&coord.x)
            && (0..=self.max_y).contains(&coord.y)
            && (0..=self.max_z).contains(&coord.z)
    }

    /// Number of portions along x, y and z.
    pub fn counts(&self) -> (usize, usize, usize) {
        let n = |max: i32| (max + 1).max(0) as usize;
        (n(self.max_x), n(self.max_y), n(self.max_z))
    }

    pub fn portion_count(&self) -> usize {
        let (x, y, z) = self.counts();
        x * y * z
    }

    /// Dense index of an in-bounds coordinate, x-major.
    pub fn linear_index(&self, coord: GlobalPortionCoord) -> Option<usize> {
        if !self.contains(coord) {
            return None;
        }
        let (_, ny, nz) = self.counts();
        Some((coord.x as usize * ny + coord.y as usize) * nz + coord.z as usize)
    }

    /// All valid coordinates in [`linear_index`](Self::linear_index) order.
    pub fn iter(&self) -> impl Iterator<Item = GlobalPortionCoord> {
        let b = *self;
        (0..=b.max_x).flat_map(move |x| {
            (0..=b.max_y)
                .flat_map(move |y| (0..=b.max_z).map(move |z| GlobalPortionCoord::new(x, y, z)))
        })
    }
}

/// A tileset descriptor: the picture for plain tiles plus the autotile and
/// wall source images it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tileset {
    pub id: u32,
    pub picture: u32,
    #[serde(default)]
    pub autotiles: Vec<u32>,
    #[serde(default)]
    pub walls: Vec<u32>,
}

/// Contents of `tilesets.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TilesetCatalog {
    pub tilesets: Vec<Tileset>,
}

impl TilesetCatalog {
    pub fn get(&self, id: u32) -> Result<&Tileset, MapError> {
        self.tilesets
            .iter()
            .find(|t| t.id == id)
            .ok_or(MapError::UnknownTileset(id))
    }
}

/// One entry of the object roster. Position is in squares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: EntityId,
    pub position: glam::Vec3,
}

/// Contents of `objects.json`: every authored object with its initial position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRoster {
    pub objects: Vec<RosterEntry>,
}

impl ObjectRoster {
    pub fn position(&self, id: EntityId) -> Option<glam::Vec3> {
        self.objects.iter().find(|o| o.id == id).map(|o| o.position)
    }
}

/// Paths and readers for a project directory.
#[derive(Debug, Clone)]
pub struct MapProject {
    root: PathBuf,
}

impl MapProject {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of one map.
    pub fn map_dir(&self, map: MapId) -> PathBuf {
        self.root.join("maps").join(map.dir_name())
    }

    pub fn pictures_dir(&self) -> PathBuf {
        self.root.join("pictures")
    }

    pub fn load_tilesets(&self) -> Result<TilesetCatalog, MapError> {
        read_json(&self.root.join("tilesets.json"))
    }

    pub fn load_map_info(&self, map: MapId) -> Result<MapInfo, MapError> {
        read_json(&self.map_dir(map).join("infos.json"))
    }

    pub fn load_roster(&self, map: MapId) -> Result<ObjectRoster, MapError> {
        read_json(&self.map_dir(map).join("objects.json"))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, MapError> {
    let data = std::fs::read(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| MapError::Json {
        path: path.to_path_buf(),
        source,
    })
}
