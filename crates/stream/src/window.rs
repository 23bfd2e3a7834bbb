use mapstream_common::{Axis, GlobalPortionCoord, LocalOffset};
use std::collections::HashMap;

use crate::coords::{self, is_in_window, local_offset};
use crate::store::PortionStore;

/// Content that must release its transient state before leaving the window.
pub trait Evict {
    fn clear(&mut self);
}

/// Stamp attached to every load the window issues.
///
/// A completion is only installed if the slot that now corresponds to
/// `coord` is still waiting on this exact ticket. A coordinate that comes
/// back into the window while its load is still in flight waits on the
/// same ticket again instead of getting a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub id: u64,
    pub coord: GlobalPortionCoord,
    /// Window generation at issue time (one generation per unit shift).
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotLoad {
    Pending(LoadTicket),
    Failed { retry_at: Option<u64> },
}

/// What happened to a delivered load result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A portion was placed in its slot.
    Installed,
    /// The slot was resolved to the absence sentinel.
    Absent,
    /// The slot no longer waits for this ticket; the result was discarded.
    Stale,
}

/// Bookkeeping of one [`MovingWindow::update`].
#[derive(Debug, Clone, Default)]
pub struct ShiftReport {
    /// Unit shifts performed (one per portion of delta, per axis).
    pub steps: u32,
    /// Global coordinates of every trailing-slab slot that was evicted.
    pub evicted: Vec<GlobalPortionCoord>,
    /// Lines of the window slid one step toward the trailing edge.
    pub lines_slid: usize,
    /// Individual slot reassignments performed while sliding.
    pub slots_moved: usize,
    /// Loads to issue for the new leading slabs.
    pub requests: Vec<LoadTicket>,
    /// Leading-slab slots that picked up a load already in flight.
    pub reattached: usize,
}

impl ShiftReport {
    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }
}

/// Keeps a `(2*limit+1)^3` neighborhood of portions around a moving center.
///
/// The window never performs I/O itself: it hands out [`LoadTicket`]s and
/// expects results back through [`complete`](Self::complete) or
/// [`fail`](Self::fail), between ticks.
#[derive(Debug)]
pub struct MovingWindow<T> {
    limit: u32,
    center: GlobalPortionCoord,
    portions: PortionStore<T>,
    loads: PortionStore<SlotLoad>,
    /// Issued tickets whose result has not been delivered yet, by coordinate.
    in_flight: HashMap<GlobalPortionCoord, LoadTicket>,
    next_ticket: u64,
    generation: u64,
}

impl<T: Evict> MovingWindow<T> {
    /// Create an empty window. Nothing is requested until [`reset`](Self::reset).
    pub fn new(limit: u32, center: GlobalPortionCoord) -> Self {
        Self {
            limit,
            center,
            portions: PortionStore::new(limit),
            loads: PortionStore::new(limit),
            in_flight: HashMap::new(),
            next_ticket: 0,
            generation: 0,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn center(&self) -> GlobalPortionCoord {
        self.center
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read access to the underlying store.
    pub fn portions(&self) -> &PortionStore<T> {
        &self.portions
    }

    pub fn get(&self, offset: LocalOffset) -> Option<&T> {
        self.portions.get(offset)
    }

    pub fn get_mut(&mut self, offset: LocalOffset) -> Option<&mut T> {
        self.portions.get_mut(offset)
    }

    /// Portion at a global coordinate, if it is inside the window and loaded.
    pub fn portion_at(&self, coord: GlobalPortionCoord) -> Option<&T> {
        let offset = local_offset(coord, self.center);
        is_in_window(offset, self.limit)
            .then(|| self.portions.get(offset))
            .flatten()
    }

    pub fn portion_at_mut(&mut self, coord: GlobalPortionCoord) -> Option<&mut T> {
        let offset = local_offset(coord, self.center);
        if !is_in_window(offset, self.limit) {
            return None;
        }
        self.portions.get_mut(offset)
    }

    /// Global coordinates of every loaded portion.
    pub fn loaded_coords(&self) -> Vec<GlobalPortionCoord> {
        self.portions
            .iter()
            .map(|(offset, _)| self.center + offset)
            .collect()
    }

    /// Number of slots waiting on an outstanding load.
    pub fn pending_count(&self) -> usize {
        self.loads
            .iter()
            .filter(|(_, l)| matches!(l, SlotLoad::Pending(_)))
            .count()
    }

    /// Number of slots whose last load failed.
    pub fn failed_count(&self) -> usize {
        self.loads
            .iter()
            .filter(|(_, l)| matches!(l, SlotLoad::Failed { .. }))
            .count()
    }

    pub fn is_pending(&self, offset: LocalOffset) -> bool {
        matches!(self.loads.get(offset), Some(SlotLoad::Pending(_)))
    }

    /// Issued loads whose result has not come back yet, in or out of the window.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Evict everything, recenter, and request every slot of the window.
    ///
    /// Only loads that have to be issued are returned; slots whose
    /// coordinate is already in flight wait on the existing ticket.
    pub fn reset(&mut self, center: GlobalPortionCoord) -> Vec<LoadTicket> {
        for (offset, mut portion) in self.portions.drain() {
            tracing::debug!(coord = %(self.center + offset), "evicting portion on reset");
            portion.clear();
        }
        self.loads.drain();
        self.center = center;
        self.generation += 1;

        coords::window_offsets(self.limit)
            .filter_map(|offset| self.request(offset))
            .collect()
    }

    /// Move the window so that `new_center` becomes its center.
    ///
    /// Each axis is shifted one portion at a time, east-west first, then
    /// north-south, then up-down. Per unit shift the trailing slab is evicted,
    /// the remaining slabs slide one step toward it and the new leading slab
    /// is requested.
    pub fn update(&mut self, new_center: GlobalPortionCoord) -> ShiftReport {
        let mut report = ShiftReport::default();
        if new_center == self.center {
            return report;
        }

        let _span =
            tracing::info_span!("window_shift", from = %self.center, to = %new_center).entered();

        for axis in Axis::SHIFT_ORDER {
            let delta = new_center.along(axis) - self.center.along(axis);
            let step = delta.signum();
            for _ in 0..delta.abs() {
                self.shift_axis(axis, step, &mut report);
            }
        }
        debug_assert_eq!(self.center, new_center);

        tracing::debug!(
            steps = report.steps,
            evicted = report.evicted.len(),
            requested = report.requests.len(),
            reattached = report.reattached,
            "window shift complete"
        );
        report
    }

    /// Deliver a load result. `None` installs the absence sentinel.
    pub fn complete(&mut self, ticket: LoadTicket, portion: Option<T>) -> Completion {
        self.land(ticket);
        let Some(offset) = self.pending_offset(ticket) else {
            tracing::debug!(coord = %ticket.coord, ticket = ticket.id, "discarding stale load");
            return Completion::Stale;
        };
        self.loads.take(offset);
        let outcome = if portion.is_some() {
            Completion::Installed
        } else {
            Completion::Absent
        };
        let previous = self.portions.set(offset, portion);
        debug_assert!(previous.is_none(), "pending slot held a portion");
        outcome
    }

    /// Record a failed load. The slot keeps the absence sentinel and becomes
    /// eligible for a new request at tick `retry_at` (never, if `None`).
    ///
    /// Returns `false` if the ticket was stale.
    pub fn fail(&mut self, ticket: LoadTicket, retry_at: Option<u64>) -> bool {
        self.land(ticket);
        let Some(offset) = self.pending_offset(ticket) else {
            return false;
        };
        self.portions.set(offset, None);
        self.loads.set(offset, Some(SlotLoad::Failed { retry_at }));
        true
    }

    /// Re-request failed slots whose retry tick has come.
    pub fn retry_due(&mut self, now: u64) -> Vec<LoadTicket> {
        let due: Vec<LocalOffset> = self
            .loads
            .iter()
            .filter_map(|(offset, load)| match load {
                SlotLoad::Failed {
                    retry_at: Some(at),
                } if *at <= now => Some(offset),
                _ => None,
            })
            .collect();

        due.into_iter().filter_map(|offset| self.request(offset)).collect()
    }

    fn shift_axis(&mut self, axis: Axis, step: i32, report: &mut ShiftReport) {
        let r = self.limit as i32;
        let old_center = self.center;
        let new_center = old_center.stepped(axis, step);
        let trailing = -step * r;
        let leading = step * r;

        self.center = new_center;
        self.generation += 1;

        for u in -r..=r {
            for v in -r..=r {
                let at = |along: i32| LocalOffset::compose(axis, along, u, v);

                let evicted = old_center + at(trailing);
                if let Some(mut portion) = self.portions.take(at(trailing)) {
                    tracing::debug!(coord = %evicted, "evicting portion");
                    portion.clear();
                }
                self.loads.take(at(trailing));
                report.evicted.push(evicted);

                let mut along = trailing;
                while along != leading {
                    let displaced = self.portions.slide(at(along + step), at(along));
                    debug_assert!(displaced.is_none());
                    self.loads.slide(at(along + step), at(along));
                    report.slots_moved += 1;
                    along += step;
                }
                report.lines_slid += 1;

                match self.request(at(leading)) {
                    Some(ticket) => report.requests.push(ticket),
                    None => report.reattached += 1,
                }
            }
        }
        report.steps += 1;
    }

    /// Mark a slot as waiting for its coordinate. Returns the ticket to
    /// issue, or `None` if a load for that coordinate is already in flight.
    fn request(&mut self, offset: LocalOffset) -> Option<LoadTicket> {
        let coord = self.center + offset;
        self.portions.set(offset, None);
        if let Some(&ticket) = self.in_flight.get(&coord) {
            tracing::trace!(%coord, ticket = ticket.id, "reattaching in-flight load");
            self.loads.set(offset, Some(SlotLoad::Pending(ticket)));
            return None;
        }
        let ticket = LoadTicket {
            id: self.next_ticket,
            coord,
            generation: self.generation,
        };
        self.next_ticket += 1;
        self.in_flight.insert(coord, ticket);
        self.loads.set(offset, Some(SlotLoad::Pending(ticket)));
        Some(ticket)
    }

    /// A result for `ticket` arrived, so its load is no longer in flight.
    fn land(&mut self, ticket: LoadTicket) {
        if self.in_flight.get(&ticket.coord) == Some(&ticket) {
            self.in_flight.remove(&ticket.coord);
        }
    }

    fn pending_offset(&self, ticket: LoadTicket) -> Option<LocalOffset> {
        let offset = local_offset(ticket.coord, self.center);
        if !is_in_window(offset, self.limit) {
            return None;
        }
        match self.loads.get(offset) {
            Some(SlotLoad::Pending(t)) if *t == ticket => Some(offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Chunk {
        coord: GlobalPortionCoord,
        clears: Rc<Cell<u32>>,
    }

    impl Evict for Chunk {
        fn clear(&mut self) {
            self.clears.set(self.clears.get() + 1);
        }
    }

    fn deliver_all(
        window: &mut MovingWindow<Chunk>,
        tickets: &[LoadTicket],
        clears: &Rc<Cell<u32>>,
    ) -> Vec<Completion> {
        tickets
            .iter()
            .map(|t| {
                let chunk = Chunk {
                    coord: t.coord,
                    clears: clears.clone(),
                };
                window.complete(*t, Some(chunk))
            })
            .collect()
    }

    fn filled_window(
        limit: u32,
        center: GlobalPortionCoord,
    ) -> (MovingWindow<Chunk>, Rc<Cell<u32>>) {
        let clears = Rc::new(Cell::new(0));
        let mut window = MovingWindow::new(limit, center);
        let tickets = window.reset(center);
        assert_eq!(tickets.len(), coords::window_capacity(limit));
        deliver_all(&mut window, &tickets, &clears);
        (window, clears)
    }

    fn assert_window_consistent(window: &MovingWindow<Chunk>) {
        let cap = coords::window_capacity(window.limit());
        assert_eq!(window.portions().occupied(), cap);
        for (offset, chunk) in window.portions().iter() {
            assert_eq!(chunk.coord, window.center() + offset, "stale portion at {offset}");
        }
    }

    #[test]
    fn reset_requests_every_slot() {
        let (window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        assert_eq!(window.pending_count(), 0);
        assert_eq!(clears.get(), 0);
        assert_window_consistent(&window);
    }

    #[test]
    fn one_step_east_with_limit_one() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let report = window.update(GlobalPortionCoord::new(1, 0, 0));

        assert_eq!(report.steps, 1);
        assert_eq!(report.evicted.len(), 9);
        assert!(report.evicted.iter().all(|c| c.x == -1));
        assert_eq!(report.lines_slid, 9);
        assert_eq!(report.slots_moved, 18);
        assert_eq!(report.requests.len(), 9);
        assert!(report.requests.iter().all(|t| t.coord.x == 2));
        assert_eq!(clears.get(), 9);
        assert_eq!(window.center(), GlobalPortionCoord::new(1, 0, 0));

        // Slid content keeps its global identity.
        assert_eq!(
            window.get(LocalOffset::new(-1, 0, 0)).map(|c| c.coord),
            Some(GlobalPortionCoord::new(0, 0, 0))
        );
        assert!(window.is_pending(LocalOffset::new(1, 1, -1)));

        deliver_all(&mut window, &report.requests, &clears);
        assert_window_consistent(&window);
    }

    #[test]
    fn west_and_north_south_shifts_slide_the_other_way() {
        let (mut window, clears) = filled_window(2, GlobalPortionCoord::new(3, 3, 3));
        let report = window.update(GlobalPortionCoord::new(2, 3, 4));
        assert_eq!(report.steps, 2);
        assert_eq!(report.evicted.len(), 50);
        assert!(report.evicted[..25].iter().all(|c| c.x == 5));
        assert!(report.evicted[25..].iter().all(|c| c.z == 1));
        assert!(report.requests[..25].iter().all(|t| t.coord.x == 0));
        assert!(report.requests[25..].iter().all(|t| t.coord.z == 6));
        deliver_all(&mut window, &report.requests, &clears);
        assert_window_consistent(&window);
    }

    #[test]
    fn vertical_axis_streams_like_the_horizontal_ones() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let report = window.update(GlobalPortionCoord::new(0, 1, 0));
        assert_eq!(report.evicted.len(), 9);
        assert!(report.evicted.iter().all(|c| c.y == -1));
        assert!(report.requests.iter().all(|t| t.coord.y == 2));
        deliver_all(&mut window, &report.requests, &clears);
        assert_window_consistent(&window);

        let report = window.update(GlobalPortionCoord::new(0, -1, 0));
        assert_eq!(report.steps, 2);
        assert!(report.requests[9..].iter().all(|t| t.coord.y == -2));
        deliver_all(&mut window, &report.requests, &clears);
        assert_window_consistent(&window);
    }

    #[test]
    fn walk_keeps_exactly_the_window_neighborhood() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let path = [
            (1, 0, 0),
            (1, 0, 1),
            (0, 0, 1),
            (0, 1, 1),
            (-1, 1, 1),
            (-1, 1, 0),
            (-1, 0, 0),
            (-2, 0, 0),
        ];
        for (x, y, z) in path {
            let report = window.update(GlobalPortionCoord::new(x, y, z));
            assert_eq!(report.steps, 1);
            deliver_all(&mut window, &report.requests, &clears);
            assert_window_consistent(&window);
        }
    }

    #[test]
    fn teleport_iterates_once_per_portion() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let report = window.update(GlobalPortionCoord::new(5, 0, 0));
        assert_eq!(report.steps, 5);
        assert_eq!(report.requests.len(), 45);
        assert_eq!(clears.get(), 27);

        let outcomes = deliver_all(&mut window, &report.requests, &clears);
        let stale = outcomes.iter().filter(|o| **o == Completion::Stale).count();
        let installed = outcomes.iter().filter(|o| **o == Completion::Installed).count();
        assert_eq!(stale, 18);
        assert_eq!(installed, 27);
        assert_window_consistent(&window);
    }

    #[test]
    fn late_result_follows_its_slot_through_a_slide() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let first = window.update(GlobalPortionCoord::new(1, 0, 0));
        let second = window.update(GlobalPortionCoord::new(2, 0, 0));

        // Loads for x=2 are now at local x=0 and still wanted.
        let outcomes = deliver_all(&mut window, &first.requests, &clears);
        assert!(outcomes.iter().all(|o| *o == Completion::Installed));
        assert_eq!(
            window.get(LocalOffset::new(0, 0, 0)).map(|c| c.coord),
            Some(GlobalPortionCoord::new(2, 0, 0))
        );
        deliver_all(&mut window, &second.requests, &clears);
        assert_window_consistent(&window);
    }

    #[test]
    fn result_for_an_evicted_slot_is_discarded() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let east = window.update(GlobalPortionCoord::new(1, 0, 0));
        let back = window.update(GlobalPortionCoord::new(0, 0, 0));

        let outcomes = deliver_all(&mut window, &east.requests, &clears);
        assert!(outcomes.iter().all(|o| *o == Completion::Stale));
        assert_eq!(window.pending_count(), 9);

        deliver_all(&mut window, &back.requests, &clears);
        assert_window_consistent(&window);
    }

    #[test]
    fn returning_coordinate_reuses_its_in_flight_load() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let first = window.update(GlobalPortionCoord::new(1, 0, 0));
        let back = window.update(GlobalPortionCoord::new(0, 0, 0));
        let again = window.update(GlobalPortionCoord::new(1, 0, 0));

        // x=2 is still being read: no second load is issued for it.
        assert!(again.requests.is_empty());
        assert_eq!(again.reattached, 9);
        assert_eq!(window.pending_count(), 9);
        assert_eq!(window.in_flight_count(), 18);

        let outcomes = deliver_all(&mut window, &first.requests, &clears);
        assert!(outcomes.iter().all(|o| *o == Completion::Installed));
        let outcomes = deliver_all(&mut window, &back.requests, &clears);
        assert!(outcomes.iter().all(|o| *o == Completion::Stale));
        assert_eq!(window.in_flight_count(), 0);
        assert_window_consistent(&window);
    }

    #[test]
    fn coordinate_is_requested_again_once_its_load_landed() {
        let (mut window, clears) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let first = window.update(GlobalPortionCoord::new(1, 0, 0));
        window.update(GlobalPortionCoord::new(0, 0, 0));
        let outcomes = deliver_all(&mut window, &first.requests, &clears);
        assert!(outcomes.iter().all(|o| *o == Completion::Stale));

        let again = window.update(GlobalPortionCoord::new(1, 0, 0));
        assert_eq!(again.requests.len(), 9);
        assert_eq!(again.reattached, 0);
        assert_ne!(first.requests[0].id, again.requests[0].id);
    }

    #[test]
    fn reset_reattaches_loads_still_in_flight() {
        let mut window: MovingWindow<Chunk> =
            MovingWindow::new(1, GlobalPortionCoord::new(0, 0, 0));
        let first = window.reset(GlobalPortionCoord::new(0, 0, 0));
        assert_eq!(first.len(), 27);
        // Nine of the coordinates around (1, 0, 0) are new.
        let second = window.reset(GlobalPortionCoord::new(1, 0, 0));
        assert_eq!(second.len(), 9);
        assert!(second.iter().all(|t| t.coord.x == 2));
        assert_eq!(window.pending_count(), 27);
    }

    #[test]
    fn absent_results_fill_slots_with_the_sentinel() {
        let mut window: MovingWindow<Chunk> =
            MovingWindow::new(0, GlobalPortionCoord::new(-1, 0, 0));
        let tickets = window.reset(GlobalPortionCoord::new(-1, 0, 0));
        assert_eq!(tickets.len(), 1);
        assert_eq!(window.complete(tickets[0], None), Completion::Absent);
        assert_eq!(window.pending_count(), 0);
        assert!(window.get(LocalOffset::ZERO).is_none());
    }

    #[test]
    fn failed_slot_is_retried_when_due() {
        let mut window: MovingWindow<Chunk> =
            MovingWindow::new(1, GlobalPortionCoord::new(0, 0, 0));
        let tickets = window.reset(GlobalPortionCoord::new(0, 0, 0));
        let broken = tickets[13];
        assert!(window.fail(broken, Some(10)));
        assert_eq!(window.failed_count(), 1);
        assert!(window.retry_due(9).is_empty());

        let retried = window.retry_due(10);
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].coord, broken.coord);
        assert_eq!(window.failed_count(), 0);
        // The first ticket can no longer land.
        assert!(!window.fail(broken, None));
    }

    #[test]
    fn failed_slot_without_retry_stays_failed() {
        let mut window: MovingWindow<Chunk> =
            MovingWindow::new(1, GlobalPortionCoord::new(0, 0, 0));
        let tickets = window.reset(GlobalPortionCoord::new(0, 0, 0));
        assert!(window.fail(tickets[0], None));
        assert!(window.retry_due(u64::MAX).is_empty());
        assert_eq!(window.failed_count(), 1);
    }

    #[test]
    fn update_to_same_center_is_a_no_op() {
        let (mut window, _) = filled_window(1, GlobalPortionCoord::new(0, 0, 0));
        let generation = window.generation();
        let report = window.update(GlobalPortionCoord::new(0, 0, 0));
        assert!(report.is_empty());
        assert_eq!(window.generation(), generation);
    }

    #[test]
    fn portion_lookup_by_global_coordinate() {
        let (window, _) = filled_window(1, GlobalPortionCoord::new(4, 0, 4));
        assert!(window.portion_at(GlobalPortionCoord::new(5, 1, 3)).is_some());
        assert!(window.portion_at(GlobalPortionCoord::new(6, 0, 4)).is_none());
        assert_eq!(window.loaded_coords().len(), 27);
    }
}
