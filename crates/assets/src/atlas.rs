//! Incremental autotile atlas baking.
//!
//! Source pictures are packed six to an atlas, in a 2 x 3 grid of equally
//! sized slots. Baking is spread over ticks: every [`AtlasBuildJob::step`]
//! decodes and places exactly one picture.

use image::RgbaImage;
use std::collections::{BTreeMap, VecDeque};

use crate::{AssetError, ImageSource, PictureKind};

/// Geometry of one atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub slot_width: u32,
    pub slot_height: u32,
}

impl AtlasLayout {
    pub const COLUMNS: u32 = 2;
    pub const ROWS: u32 = 3;
    pub const SLOTS: usize = (Self::COLUMNS * Self::ROWS) as usize;

    /// Autotile pictures are 2 squares wide and 3 squares tall.
    pub fn for_autotiles(square_size: u32) -> Self {
        Self {
            slot_width: 2 * square_size,
            slot_height: 3 * square_size,
        }
    }

    pub fn atlas_size(&self) -> (u32, u32) {
        (
            self.slot_width * Self::COLUMNS,
            self.slot_height * Self::ROWS,
        )
    }

    /// Pixel rectangle `[x, y, w, h]` of a slot, row-major.
    pub fn slot_rect(&self, slot: usize) -> [u32; 4] {
        let slot = slot as u32;
        [
            (slot % Self::COLUMNS) * self.slot_width,
            (slot / Self::COLUMNS) * self.slot_height,
            self.slot_width,
            self.slot_height,
        ]
    }
}

/// Where an autotile picture ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasPlacement {
    pub atlas: usize,
    pub slot: usize,
    pub rect: [u32; 4],
}

/// A finished atlas texture.
#[derive(Debug, Clone)]
pub struct BakedAtlas {
    pub image: RgbaImage,
    /// Picture id assigned to each used slot, in slot order.
    pub slots: Vec<u32>,
    /// Ids among `slots` whose picture failed and left the slot blank.
    pub failed: Vec<u32>,
}

impl BakedAtlas {
    fn empty(layout: AtlasLayout) -> Self {
        let (w, h) = layout.atlas_size();
        Self {
            image: RgbaImage::new(w, h),
            slots: Vec::with_capacity(AtlasLayout::SLOTS),
            failed: Vec::new(),
        }
    }

    /// Slots holding a placed picture.
    pub fn populated(&self) -> usize {
        self.slots.len() - self.failed.len()
    }

    /// Slots left transparent, unused or failed.
    pub fn blank(&self) -> usize {
        AtlasLayout::SLOTS - self.populated()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasJobState {
    Pending,
    InProgress,
    Done,
}

/// A resumable bake of an ordered list of autotile pictures.
#[derive(Debug)]
pub struct AtlasBuildJob {
    layout: AtlasLayout,
    queue: VecDeque<u32>,
    current: Option<BakedAtlas>,
    cursor: usize,
    finished: Vec<BakedAtlas>,
    placements: BTreeMap<u32, AtlasPlacement>,
    state: AtlasJobState,
    ticks: u64,
}

impl AtlasBuildJob {
    pub fn new(layout: AtlasLayout, ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            layout,
            queue: ids.into_iter().collect(),
            current: None,
            cursor: 0,
            finished: Vec::new(),
            placements: BTreeMap::new(),
            state: AtlasJobState::Pending,
            ticks: 0,
        }
    }

    pub fn layout(&self) -> AtlasLayout {
        self.layout
    }

    pub fn state(&self) -> AtlasJobState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == AtlasJobState::Done
    }

    /// Pictures not placed yet.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Slot the next picture goes into.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Steps that did work.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Atlases finalized so far.
    pub fn atlases(&self) -> &[BakedAtlas] {
        &self.finished
    }

    pub fn placement(&self, id: u32) -> Option<AtlasPlacement> {
        self.placements.get(&id).copied()
    }

    pub fn placements(&self) -> &BTreeMap<u32, AtlasPlacement> {
        &self.placements
    }

    /// Advance by one picture.
    ///
    /// The sixth slot of an atlas finalizes it. When the queue runs out the
    /// partial atlas is finalized in the same step and the job is done; an
    /// empty job is done after its first step. Steps after that do nothing.
    pub fn step(&mut self, source: &dyn ImageSource) -> AtlasJobState {
        match self.state {
            AtlasJobState::Done => return self.state,
            AtlasJobState::Pending => {
                tracing::info!(pictures = self.queue.len(), "autotile atlas bake started");
                self.state = AtlasJobState::InProgress;
            }
            AtlasJobState::InProgress => {}
        }
        self.ticks += 1;

        if let Some(id) = self.queue.pop_front() {
            self.place(id, source);
            if self.cursor == AtlasLayout::SLOTS {
                self.finalize();
            }
        }

        if self.queue.is_empty() {
            if self.current.is_some() {
                self.finalize();
            }
            self.state = AtlasJobState::Done;
            tracing::info!(
                atlases = self.finished.len(),
                ticks = self.ticks,
                "autotile atlas bake done"
            );
        }
        self.state
    }

    /// Step until done. Returns the number of steps taken.
    pub fn run_to_completion(&mut self, source: &dyn ImageSource) -> u64 {
        let mut steps = 0;
        while !self.is_done() {
            self.step(source);
            steps += 1;
        }
        steps
    }

    /// Consume the job, keeping the atlases.
    pub fn into_atlases(self) -> Vec<BakedAtlas> {
        self.finished
    }

    fn place(&mut self, id: u32, source: &dyn ImageSource) {
        let layout = self.layout;
        let slot = self.cursor;
        let atlas_index = self.finished.len();
        let rect = layout.slot_rect(slot);
        let atlas = self.current.get_or_insert_with(|| BakedAtlas::empty(layout));
        atlas.slots.push(id);

        let decoded = source.decode(PictureKind::Autotiles, id).and_then(|picture| {
            let actual = picture.dimensions();
            let expected = (layout.slot_width, layout.slot_height);
            if actual == expected {
                Ok(picture)
            } else {
                Err(AssetError::SlotMismatch {
                    id,
                    expected,
                    actual,
                })
            }
        });

        match decoded {
            Ok(picture) => {
                image::imageops::replace(
                    &mut atlas.image,
                    &picture,
                    i64::from(rect[0]),
                    i64::from(rect[1]),
                );
                self.placements.insert(
                    id,
                    AtlasPlacement {
                        atlas: atlas_index,
                        slot,
                        rect,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(id, error = %e, "autotile picture unavailable, slot left blank");
                atlas.failed.push(id);
            }
        }
        self.cursor += 1;
    }

    fn finalize(&mut self) {
        if let Some(atlas) = self.current.take() {
            tracing::debug!(
                atlas = self.finished.len(),
                populated = atlas.populated(),
                "atlas finalized"
            );
            self.finished.push(atlas);
        }
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryImageSource;
    use image::Rgba;

    const SQUARE: u32 = 4;

    fn source_with(ids: impl IntoIterator<Item = u32>) -> MemoryImageSource {
        let layout = AtlasLayout::for_autotiles(SQUARE);
        let mut source = MemoryImageSource::new();
        for id in ids {
            source.insert(
                PictureKind::Autotiles,
                id,
                RgbaImage::from_pixel(
                    layout.slot_width,
                    layout.slot_height,
                    Rgba([id as u8, 0, 0, 255]),
                ),
            );
        }
        source
    }

    fn job(ids: impl IntoIterator<Item = u32>) -> AtlasBuildJob {
        AtlasBuildJob::new(AtlasLayout::for_autotiles(SQUARE), ids)
    }

    #[test]
    fn layout_is_two_by_three() {
        let layout = AtlasLayout::for_autotiles(16);
        assert_eq!(layout.atlas_size(), (64, 144));
        assert_eq!(layout.slot_rect(0), [0, 0, 32, 48]);
        assert_eq!(layout.slot_rect(1), [32, 0, 32, 48]);
        assert_eq!(layout.slot_rect(5), [32, 96, 32, 48]);
    }

    #[test]
    fn thirteen_pictures_make_three_atlases() {
        let source = source_with(1..=13);
        let mut job = job(1..=13);
        assert_eq!(job.run_to_completion(&source), 13);

        let atlases = job.atlases();
        assert_eq!(atlases.len(), 3);
        let populated: Vec<_> = atlases.iter().map(BakedAtlas::populated).collect();
        assert_eq!(populated, vec![6, 6, 1]);
        assert_eq!(atlases[2].blank(), 5);
        assert_eq!(source.decodes(), 13);
    }

    #[test]
    fn done_after_exactly_n_steps() {
        let source = source_with(1..=7);
        let mut job = job(1..=7);
        assert_eq!(job.state(), AtlasJobState::Pending);
        for _ in 0..6 {
            assert_eq!(job.step(&source), AtlasJobState::InProgress);
        }
        // Sixth slot rotated the atlas.
        assert_eq!(job.atlases().len(), 1);
        assert_eq!(job.cursor(), 0);
        assert_eq!(job.step(&source), AtlasJobState::Done);
        assert_eq!(job.atlases().len(), 2);

        // Further steps are no-ops.
        assert_eq!(job.step(&source), AtlasJobState::Done);
        assert_eq!(job.ticks(), 7);
        assert_eq!(source.decodes(), 7);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_atlas() {
        let source = source_with(1..=12);
        let mut job = job(1..=12);
        job.run_to_completion(&source);
        assert_eq!(job.atlases().len(), 2);
        assert!(job.atlases().iter().all(|a| a.blank() == 0));
    }

    #[test]
    fn empty_job_finishes_on_first_step() {
        let source = MemoryImageSource::new();
        let mut job = job([]);
        assert_eq!(job.step(&source), AtlasJobState::Done);
        assert!(job.atlases().is_empty());
    }

    #[test]
    fn placements_follow_list_order() {
        let source = source_with([10, 20, 30, 40, 50, 60, 70]);
        let mut job = job([10, 20, 30, 40, 50, 60, 70]);
        job.run_to_completion(&source);

        let layout = job.layout();
        assert_eq!(
            job.placement(20),
            Some(AtlasPlacement {
                atlas: 0,
                slot: 1,
                rect: layout.slot_rect(1)
            })
        );
        assert_eq!(job.placement(70).map(|p| (p.atlas, p.slot)), Some((1, 0)));

        let [x, y, ..] = layout.slot_rect(1);
        assert_eq!(job.atlases()[0].image.get_pixel(x, y), &Rgba([20, 0, 0, 255]));
    }

    #[test]
    fn failed_picture_leaves_blank_slot_and_job_continues() {
        let mut source = source_with([1, 3]);
        // Wrong shape.
        source.insert(PictureKind::Autotiles, 4, RgbaImage::new(1, 1));
        let mut job = job([1, 2, 3, 4]);
        assert_eq!(job.run_to_completion(&source), 4);

        let atlas = &job.atlases()[0];
        assert_eq!(atlas.slots, vec![1, 2, 3, 4]);
        assert_eq!(atlas.failed, vec![2, 4]);
        assert_eq!(atlas.populated(), 2);
        assert_eq!(job.placement(2), None);
        assert_eq!(job.placement(3).map(|p| p.slot), Some(2));

        let [x, y, ..] = job.layout().slot_rect(1);
        assert_eq!(atlas.image.get_pixel(x, y)[3], 0);
    }
}
