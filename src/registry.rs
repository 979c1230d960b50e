//! Grid of chamber slots fed by remote snapshots
//!
//! The registry owns one slot per grid cell. Populated slots hold a chamber
//! instance bound to a remote chamber id; empty slots pad the last row and
//! only ever show balls. Each `render` pulls the next buffered snapshot and
//! draws every slot from it. One failing slot never stops the others.
//!
//! Relayout instantiates a whole new grid before swapping it in. Concurrent
//! relayouts queue on a FIFO lock, so the grid is only ever replaced in
//! request order and never half-built.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::Mutex;

use crate::chamber::Chamber;
use crate::compositor::{Bounds, Canvas, CanvasSize, ToroidalCompositor};
use crate::error::{HostError, HostResult};
use crate::module::RenderModule;
use crate::remote::SimulationSnapshot;

/// Creates chamber instances for relayout
pub trait ChamberFactory {
    type Module: RenderModule;

    /// Instantiate the module for remote chamber `id` (uninitialized)
    fn instantiate(&self, id: usize) -> impl Future<Output = HostResult<Chamber<Self::Module>>>;
}

/// One grid cell
pub enum Slot<R: RenderModule> {
    Populated { id: usize, chamber: Chamber<R> },
    Empty,
}

impl<R: RenderModule> Slot<R> {
    pub fn id(&self) -> Option<usize> {
        match self {
            Slot::Populated { id, .. } => Some(*id),
            Slot::Empty => None,
        }
    }

    /// Draw this cell from `snapshot` at `bounds`
    pub fn render<C: Canvas + ?Sized>(
        &mut self,
        canvas: &mut C,
        compositor: &ToroidalCompositor,
        snapshot: &SimulationSnapshot,
        cell: usize,
        bounds: Bounds,
    ) -> HostResult<()> {
        match self {
            Slot::Populated { id, chamber } => {
                let remote = snapshot.chamber(*id).ok_or(HostError::UnknownChamber(*id))?;
                chamber.load(&remote.state)?;
                let pixels = chamber.render(bounds.width, bounds.height)?;
                compositor.draw_frame(canvas, &pixels, &remote.balls, bounds);
            }
            Slot::Empty => {
                compositor.clear_bounds(canvas, bounds);
                if let Some(balls) = snapshot.cell_balls.get(cell) {
                    compositor.draw_balls(canvas, balls, bounds);
                }
            }
        }
        Ok(())
    }
}

/// Bounded queue of snapshots waiting to be drawn
#[derive(Debug)]
pub struct SnapshotBuffer {
    pending: VecDeque<SimulationSnapshot>,
    capacity: usize,
    current: Option<Rc<SimulationSnapshot>>,
    last_step: Option<u64>,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            current: None,
            last_step: None,
        }
    }

    /// Queue a snapshot; the oldest one is dropped when full.
    ///
    /// Returns false for a snapshot no newer than the last one accepted.
    pub fn push(&mut self, snapshot: SimulationSnapshot) -> bool {
        if self
            .last_step
            .is_some_and(|last| snapshot.num_steps_taken <= last)
        {
            return false;
        }
        if self.pending.len() == self.capacity {
            self.pending.pop_front();
        }
        self.last_step = Some(snapshot.num_steps_taken);
        self.pending.push_back(snapshot);
        true
    }

    /// Advance to the next snapshot, or keep the current one if none is queued
    pub fn next(&mut self) -> Option<Rc<SimulationSnapshot>> {
        if let Some(snapshot) = self.pending.pop_front() {
            self.current = Some(Rc::new(snapshot));
        }
        self.current.clone()
    }

    /// Step count to poll `since`
    pub fn last_step(&self) -> Option<u64> {
        self.last_step
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of one registry render
#[derive(Debug, Default)]
pub struct RenderReport {
    pub rendered: usize,
    /// (cell, error) for every slot that failed
    pub failed: Vec<(usize, HostError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridLayout {
    per_row: usize,
    rows: usize,
}

/// Chamber slots laid out on a grid sharing one canvas
pub struct ChamberRegistry<F: ChamberFactory> {
    factory: F,
    layout_lock: Mutex<()>,
    slots: RefCell<Vec<Slot<F::Module>>>,
    layout: Cell<GridLayout>,
    snapshots: RefCell<SnapshotBuffer>,
    offset: Cell<(i32, i32)>,
    compositor: ToroidalCompositor,
    tile: CanvasSize,
    max_balls: usize,
}

impl<F: ChamberFactory> ChamberRegistry<F> {
    /// `tile` is the native size of one chamber; `snapshot_buffer` bounds the
    /// number of snapshots queued between renders
    pub fn new(factory: F, tile: CanvasSize, max_balls: usize, snapshot_buffer: usize) -> Self {
        Self {
            factory,
            layout_lock: Mutex::new(()),
            slots: RefCell::new(Vec::new()),
            layout: Cell::new(GridLayout {
                per_row: 1,
                rows: 0,
            }),
            snapshots: RefCell::new(SnapshotBuffer::new(snapshot_buffer)),
            offset: Cell::new((0, 0)),
            compositor: ToroidalCompositor::default(),
            tile,
            max_balls,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Replace the grid with one populated slot per id, `per_row` columns wide,
    /// padding the last row with empty slots.
    ///
    /// Queues behind any relayout already in flight. On error the previous
    /// grid stays in place.
    pub async fn relayout(&self, ids: &[usize], per_row: usize) -> HostResult<()> {
        let _guard = self.layout_lock.lock().await;
        let per_row = per_row.max(1);
        log::info!("relayout: {} chambers, {} per row", ids.len(), per_row);

        let mut slots = Vec::with_capacity(ids.len().div_ceil(per_row) * per_row);
        for &id in ids {
            let mut chamber = self.factory.instantiate(id).await?;
            chamber.init(self.max_balls, self.tile.pixels())?;
            slots.push(Slot::Populated { id, chamber });
        }
        while slots.len() % per_row != 0 {
            slots.push(Slot::Empty);
        }

        let rows = slots.len() / per_row;
        *self.slots.borrow_mut() = slots;
        self.layout.set(GridLayout { per_row, rows });
        log::info!("relayout done: {}x{} grid", per_row, rows);
        Ok(())
    }

    /// Buffer a snapshot fetched from the server
    pub fn push_snapshot(&self, snapshot: SimulationSnapshot) -> bool {
        self.snapshots.borrow_mut().push(snapshot)
    }

    /// `since` value for the next poll
    pub fn last_step(&self) -> Option<u64> {
        self.snapshots.borrow().last_step()
    }

    /// Scroll every tile by (`x`, `y`) pixels
    pub fn set_offset(&self, x: i32, y: i32) {
        self.offset.set((x, y));
    }

    /// Canvas size that fits the whole grid
    pub fn canvas_size(&self) -> CanvasSize {
        let layout = self.layout.get();
        CanvasSize::new(
            self.tile.width * layout.per_row as u32,
            self.tile.height * layout.rows as u32,
        )
    }

    pub fn chambers_per_row(&self) -> usize {
        self.layout.get().per_row
    }

    /// Bounds of `cell`, including the scroll offset
    pub fn cell_bounds(&self, cell: usize) -> Bounds {
        let per_row = self.layout.get().per_row;
        let (dx, dy) = self.offset.get();
        let col = (cell % per_row) as i32;
        let row = (cell / per_row) as i32;
        Bounds::new(
            col * self.tile.width as i32 + dx,
            row * self.tile.height as i32 + dy,
            self.tile.width,
            self.tile.height,
        )
    }

    /// Slot ids in grid order (`None` for empty cells)
    pub fn slot_ids(&self) -> Vec<Option<usize>> {
        self.slots.borrow().iter().map(Slot::id).collect()
    }

    /// Draw every slot from the next buffered snapshot
    pub fn render<C: Canvas + ?Sized>(&self, canvas: &mut C) -> RenderReport {
        let mut report = RenderReport::default();
        let Some(snapshot) = self.snapshots.borrow_mut().next() else {
            return report;
        };

        let mut slots = self.slots.borrow_mut();
        for (cell, slot) in slots.iter_mut().enumerate() {
            let bounds = self.cell_bounds(cell);
            match slot.render(canvas, &self.compositor, &snapshot, cell, bounds) {
                Ok(()) => report.rendered += 1,
                Err(e) => {
                    log::warn!("slot {} ({:?}) failed to render: {}", cell, slot.id(), e);
                    report.failed.push((cell, e));
                }
            }
        }
        log::trace!(
            "rendered snapshot {}: {} ok, {} failed",
            snapshot.num_steps_taken,
            report.rendered,
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{PixelCanvas, colors};
    use crate::module::Ball;
    use crate::module::native::{CounterChamber, CounterFactory};
    use crate::remote::ChamberSnapshot;

    const TILE: CanvasSize = CanvasSize::new(100, 100);

    fn registry() -> ChamberRegistry<CounterFactory> {
        ChamberRegistry::new(CounterFactory, TILE, 16, 4)
    }

    fn snapshot(step: u64, counts: &[u8]) -> SimulationSnapshot {
        SimulationSnapshot {
            num_steps_taken: step,
            chambers: counts
                .iter()
                .map(|&c| ChamberSnapshot {
                    balls: vec![Ball::new(0.5, 0.5, 0.05)],
                    state: vec![c].into(),
                })
                .collect(),
            cell_balls: Vec::new(),
        }
    }

    /// Yields once per instantiation so relayouts interleave at await points
    struct YieldingFactory;

    impl ChamberFactory for YieldingFactory {
        type Module = CounterChamber;

        fn instantiate(&self, _id: usize) -> impl Future<Output = HostResult<Chamber<CounterChamber>>> {
            async {
                tokio::task::yield_now().await;
                Ok(Chamber::new(CounterChamber::new()))
            }
        }
    }

    #[tokio::test]
    async fn test_relayout_pads_last_row() {
        let registry = registry();
        registry.relayout(&[4, 5, 6, 7, 8], 3).await.unwrap();
        assert_eq!(
            registry.slot_ids(),
            vec![Some(4), Some(5), Some(6), Some(7), Some(8), None]
        );
        assert_eq!(registry.canvas_size(), CanvasSize::new(300, 200));
        assert_eq!(registry.cell_bounds(4), Bounds::new(100, 100, 100, 100));
    }

    #[tokio::test]
    async fn test_concurrent_relayouts_apply_in_order() {
        let registry = ChamberRegistry::new(YieldingFactory, TILE, 16, 4);
        let a = registry.relayout(&[0, 1, 2, 3], 2);
        let b = registry.relayout(&[5, 6, 7], 3);
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();
        assert_eq!(registry.slot_ids(), vec![Some(5), Some(6), Some(7)]);
        assert_eq!(registry.chambers_per_row(), 3);
    }

    #[tokio::test]
    async fn test_failing_slot_does_not_stop_others() {
        let registry = registry();
        registry.relayout(&[0, 99, 1], 3).await.unwrap();
        registry.push_snapshot(snapshot(10, &[3, 4]));

        let mut canvas = PixelCanvas::new(300, 100);
        let report = registry.render(&mut canvas);
        assert_eq!(report.rendered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0], (1, HostError::UnknownChamber(99)));
        // Ball drawn in both healthy tiles, nothing in the failed one
        assert_eq!(canvas.pixel(50, 50), Some(colors::RED));
        assert_eq!(canvas.pixel(250, 50), Some(colors::RED));
        assert_eq!(canvas.pixel(150, 50), Some(colors::TRANSPARENT));
    }

    #[tokio::test]
    async fn test_empty_slot_clears_and_draws_cell_balls() {
        let registry = registry();
        registry.relayout(&[0], 2).await.unwrap();
        let mut snap = snapshot(1, &[0]);
        snap.cell_balls = vec![Vec::new(), vec![Ball::new(0.25, 0.25, 0.05)]];
        registry.push_snapshot(snap);

        let mut canvas = PixelCanvas::new(200, 100);
        let report = registry.render(&mut canvas);
        assert_eq!(report.rendered, 2);
        assert_eq!(canvas.pixel(125, 75), Some(colors::RED));
        assert_eq!(canvas.pixel(170, 30), Some(colors::WHITE));
    }

    #[tokio::test]
    async fn test_loaded_state_reaches_chamber() {
        let registry = registry();
        registry.relayout(&[1], 1).await.unwrap();
        registry.push_snapshot(snapshot(1, &[0, 42]));
        let mut canvas = PixelCanvas::new(100, 100);
        registry.render(&mut canvas);

        let slots = registry.slots.borrow();
        let Slot::Populated { chamber, .. } = &slots[0] else {
            panic!("expected populated slot");
        };
        assert_eq!(chamber.module().count(), 42);
    }

    #[test]
    fn test_render_without_snapshot_draws_nothing() {
        let registry = registry();
        let mut canvas = PixelCanvas::new(100, 100);
        let report = registry.render(&mut canvas);
        assert_eq!(report.rendered, 0);
        assert!(canvas.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_snapshot_buffer_drops_oldest_and_reuses_last() {
        let mut buffer = SnapshotBuffer::new(2);
        assert!(buffer.next().is_none());

        for step in 1..=3 {
            assert!(buffer.push(snapshot(step, &[])));
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.last_step(), Some(3));

        assert_eq!(buffer.next().unwrap().num_steps_taken, 2);
        assert_eq!(buffer.next().unwrap().num_steps_taken, 3);
        // Drained: keep showing the last one
        assert_eq!(buffer.next().unwrap().num_steps_taken, 3);
    }

    #[test]
    fn test_snapshot_buffer_ignores_stale() {
        let mut buffer = SnapshotBuffer::new(4);
        assert!(buffer.push(snapshot(5, &[])));
        assert!(!buffer.push(snapshot(5, &[])));
        assert!(!buffer.push(snapshot(4, &[])));
        assert_eq!(buffer.len(), 1);
    }
}
