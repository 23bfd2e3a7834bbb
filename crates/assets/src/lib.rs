//! Picture pipeline: decoding source pictures by kind and id, wall padding,
//! and incremental baking of autotile atlases.
//!
//! A picture that cannot be decoded is never fatal here. Callers get an
//! [`AssetError`] and decide whether to substitute a blank.

mod atlas;
mod wall;

pub use atlas::{AtlasBuildJob, AtlasJobState, AtlasLayout, AtlasPlacement, BakedAtlas};
pub use wall::pad_wall;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Category of a source picture. Each kind lives in its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PictureKind {
    Tilesets,
    Characters,
    Walls,
    Autotiles,
}

impl PictureKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            PictureKind::Tilesets => "tilesets",
            PictureKind::Characters => "characters",
            PictureKind::Walls => "walls",
            PictureKind::Autotiles => "autotiles",
        }
    }
}

impl fmt::Display for PictureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Errors from picture operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("picture {kind}/{id} could not be decoded: {source}")]
    Decode {
        kind: PictureKind,
        id: u32,
        #[source]
        source: image::ImageError,
    },
    #[error("picture {kind}/{id} not found")]
    Missing { kind: PictureKind, id: u32 },
    #[error("picture {id} is {actual:?}, atlas slots are {expected:?}")]
    SlotMismatch {
        id: u32,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Something that can decode a source picture into RGBA pixels.
pub trait ImageSource {
    fn decode(&self, kind: PictureKind, id: u32) -> Result<RgbaImage, AssetError>;
}

/// Reads `<root>/<kind>/<id>.png`.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, kind: PictureKind, id: u32) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{id}.png"))
    }
}

impl ImageSource for DirectoryImageSource {
    fn decode(&self, kind: PictureKind, id: u32) -> Result<RgbaImage, AssetError> {
        let path = self.path_of(kind, id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::Missing { kind, id });
            }
            Err(source) => return Err(AssetError::Io { path, source }),
        };
        image::load_from_memory(&bytes)
            .map(|img| img.to_rgba8())
            .map_err(|source| AssetError::Decode { kind, id, source })
    }
}

/// Pictures held in memory, for tools and tests.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    pictures: HashMap<(PictureKind, u32), RgbaImage>,
    decodes: AtomicUsize,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: PictureKind, id: u32, picture: RgbaImage) {
        self.pictures.insert((kind, id), picture);
    }

    /// Number of decode calls served so far, including misses.
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }
}

impl ImageSource for MemoryImageSource {
    fn decode(&self, kind: PictureKind, id: u32) -> Result<RgbaImage, AssetError> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        self.pictures
            .get(&(kind, id))
            .cloned()
            .ok_or(AssetError::Missing { kind, id })
    }
}

/// Decode a picture and apply the packing rule of its kind: walls get the
/// wrap-padding strip, every other kind is used as is.
pub fn prepare_picture(
    source: &dyn ImageSource,
    kind: PictureKind,
    id: u32,
    square_size: u32,
) -> Result<RgbaImage, AssetError> {
    let picture = source.decode(kind, id)?;
    Ok(match kind {
        PictureKind::Walls => pad_wall(&picture, square_size),
        _ => picture,
    })
}
