//! Wall-clock driven render pipeline
//!
//! Each tick:
//! 1. Measure elapsed time since start
//! 2. Advance physics to that absolute time (fixed sub-steps inside the module)
//! 3. Split mode only: save the physics chamber, load the blob into the render chamber
//! 4. Render the chamber and composite background + balls
//! 5. Caller schedules the next tick (~16 ms, best-effort)
//!
//! Physics correctness under timer jitter comes from step 2, not from the
//! tick interval.

use std::cell::Cell;
use std::rc::Rc;

use crate::chamber::{Chamber, SharedChamber};
use crate::compositor::{Bounds, Canvas, ToroidalCompositor};
use crate::error::HostResult;
use crate::module::{Ball, PhysicsModule, RenderModule, read_balls};

/// Monotonic seconds source
pub trait Clock {
    fn now(&self) -> f64;
}

/// Host-controlled clock for tests and replays
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

/// `std::time::Instant` clock
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// `Date.now()` clock
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Default, Clone, Copy)]
pub struct DateClock;

#[cfg(target_arch = "wasm32")]
impl Clock for DateClock {
    fn now(&self) -> f64 {
        js_sys::Date::now() / 1000.0
    }
}

/// Cooperative cancellation shared with whoever may stop the pipeline
#[derive(Debug, Default, Clone)]
pub struct ShutdownFlag(Rc<Cell<bool>>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.set(true);
    }

    pub fn is_set(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    /// Terminal: no further work, no rescheduling
    ShuttingDown,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Frame drawn; schedule the next tick
    Rendered { elapsed: f64, balls: usize },
    /// Shutdown observed; do not reschedule
    Stopped,
}

/// Where rendering happens
pub enum RenderTarget<R: RenderModule> {
    /// Render the physics chamber directly (no snapshot/transplant)
    Shared,
    /// Render a separate instance kept in sync by save/load
    Split(Chamber<R>),
}

/// Physics module plus the chamber(s) it is drawn with
pub struct SplitRenderPipeline<P: PhysicsModule, R: RenderModule, K: Clock> {
    physics: P,
    physics_chamber: SharedChamber<R>,
    target: RenderTarget<R>,
    clock: K,
    start: f64,
    shutdown: ShutdownFlag,
    state: PipelineState,
    compositor: ToroidalCompositor,
    bounds: Bounds,
    frames: u64,
}

impl<P: PhysicsModule, R: RenderModule, K: Clock> SplitRenderPipeline<P, R, K> {
    /// Render through a separately instantiated `render_chamber`.
    ///
    /// `physics_chamber` must be the chamber `physics` drives through its
    /// hooks, already initialized via `physics.init`. An uninitialized render
    /// chamber is initialized with the same capacity so save blobs line up.
    pub fn split(
        physics: P,
        physics_chamber: SharedChamber<R>,
        mut render_chamber: Chamber<R>,
        clock: K,
        canvas_width: u32,
    ) -> HostResult<Self> {
        if !render_chamber.is_initialized() {
            let capacity = physics_chamber.borrow().capacity()?;
            render_chamber.init(capacity.max_balls, capacity.max_canvas_pixels)?;
        }
        Self::build(
            physics,
            physics_chamber,
            RenderTarget::Split(render_chamber),
            clock,
            canvas_width,
        )
    }

    /// Render the physics chamber itself
    pub fn shared(
        physics: P,
        physics_chamber: SharedChamber<R>,
        clock: K,
        canvas_width: u32,
    ) -> HostResult<Self> {
        Self::build(physics, physics_chamber, RenderTarget::Shared, clock, canvas_width)
    }

    fn build(
        mut physics: P,
        physics_chamber: SharedChamber<R>,
        target: RenderTarget<R>,
        clock: K,
        canvas_width: u32,
    ) -> HostResult<Self> {
        let chamber_height = physics.chamber_height()?;
        let height = (canvas_width as f32 * chamber_height).floor() as u32;
        let start = clock.now();
        log::info!(
            "pipeline started ({}, {}x{})",
            if matches!(target, RenderTarget::Split(_)) { "split" } else { "shared" },
            canvas_width,
            height
        );
        Ok(Self {
            physics,
            physics_chamber,
            target,
            clock,
            start,
            shutdown: ShutdownFlag::new(),
            state: PipelineState::Running,
            compositor: ToroidalCompositor::default(),
            bounds: Bounds::tile(canvas_width, height),
            frames: 0,
        })
    }

    pub fn with_compositor(mut self, compositor: ToroidalCompositor) -> Self {
        self.compositor = compositor;
        self
    }

    /// Handle for stopping the pipeline from elsewhere
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Tile rectangle; the canvas should be at least this large
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Offset the tile on the canvas (wraps toroidally)
    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.bounds = Bounds::new(x, y, self.bounds.width, self.bounds.height);
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    pub fn physics_chamber(&self) -> &SharedChamber<R> {
        &self.physics_chamber
    }

    /// Run one tick. Never does any work once shutdown has been observed.
    pub fn tick<C: Canvas + ?Sized>(&mut self, canvas: &mut C) -> HostResult<TickOutcome> {
        if self.state == PipelineState::ShuttingDown {
            return Ok(TickOutcome::Stopped);
        }
        if self.shutdown.is_set() {
            log::info!("pipeline shutting down after {} frames", self.frames);
            self.state = PipelineState::ShuttingDown;
            return Ok(TickOutcome::Stopped);
        }

        let elapsed = self.clock.now() - self.start;
        self.physics.step_until(elapsed)?;
        let balls = read_balls(&mut self.physics)?;

        match &mut self.target {
            RenderTarget::Split(render_chamber) => {
                let state = self.physics_chamber.borrow_mut().save()?;
                render_chamber.load(&state)?;
                draw(&self.compositor, render_chamber, canvas, &balls, self.bounds)?;
            }
            RenderTarget::Shared => {
                let mut chamber = self.physics_chamber.borrow_mut();
                draw(&self.compositor, &mut chamber, canvas, &balls, self.bounds)?;
            }
        }

        self.frames += 1;
        log::trace!("frame {} at {:.3}s, {} balls", self.frames, elapsed, balls.len());
        Ok(TickOutcome::Rendered {
            elapsed,
            balls: balls.len(),
        })
    }
}

fn draw<R: RenderModule, C: Canvas + ?Sized>(
    compositor: &ToroidalCompositor,
    chamber: &mut Chamber<R>,
    canvas: &mut C,
    balls: &[Ball],
    bounds: Bounds,
) -> HostResult<()> {
    let pixels = chamber.render(bounds.width, bounds.height)?;
    compositor.draw_frame(canvas, &pixels, balls, bounds);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::StateBridge;
    use crate::compositor::{PixelCanvas, colors};
    use crate::module::native::{CounterChamber, NativeSimulation};

    type Pipeline = SplitRenderPipeline<
        NativeSimulation<StateBridge<CounterChamber>>,
        CounterChamber,
        ManualClock,
    >;

    fn physics(
        chamber_height: f32,
    ) -> (
        NativeSimulation<StateBridge<CounterChamber>>,
        SharedChamber<CounterChamber>,
    ) {
        let chamber = Chamber::new(CounterChamber::new()).into_shared();
        let mut sim = NativeSimulation::new(StateBridge::new(chamber.clone()), chamber_height, 3);
        let pixels = 300 * (300.0 * chamber_height) as usize;
        sim.init(64, pixels).unwrap();
        (sim, chamber)
    }

    fn split_pipeline(clock: ManualClock) -> Pipeline {
        let (sim, chamber) = physics(1.0);
        SplitRenderPipeline::split(sim, chamber, Chamber::new(CounterChamber::new()), clock, 300)
            .unwrap()
    }

    #[test]
    fn test_split_tick_transplants_state_into_render_chamber() {
        let clock = ManualClock::new();
        let mut pipeline = split_pipeline(clock.clone());
        let mut canvas = PixelCanvas::new(300, 300);

        clock.advance(0.5);
        let outcome = pipeline.tick(&mut canvas).unwrap();
        assert!(matches!(outcome, TickOutcome::Rendered { balls: 10, .. }));

        let RenderTarget::Split(render) = &pipeline.target else {
            panic!("expected split target");
        };
        // The render instance never stepped; its count came from load()
        assert_eq!(render.module().count(), 10);
        assert_eq!(pipeline.physics_chamber().borrow().module().count(), 10);
    }

    #[test]
    fn test_split_and_shared_draw_identical_frames() {
        let clock = ManualClock::new();
        let mut split = split_pipeline(clock.clone());
        let (sim, chamber) = physics(1.0);
        let mut shared = SplitRenderPipeline::shared(sim, chamber, clock.clone(), 300).unwrap();

        let mut a = PixelCanvas::new(300, 300);
        let mut b = PixelCanvas::new(300, 300);
        for _ in 0..5 {
            clock.advance(0.1);
            split.tick(&mut a).unwrap();
            shared.tick(&mut b).unwrap();
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_shutdown_is_terminal_and_idempotent() {
        let clock = ManualClock::new();
        let mut pipeline = split_pipeline(clock.clone());
        let mut canvas = PixelCanvas::new(300, 300);
        pipeline.tick(&mut canvas).unwrap();

        let flag = pipeline.shutdown_flag();
        flag.set();
        let before = canvas.clone();
        clock.advance(1.0);

        assert_eq!(pipeline.tick(&mut canvas).unwrap(), TickOutcome::Stopped);
        assert_eq!(pipeline.state(), PipelineState::ShuttingDown);
        assert_eq!(pipeline.tick(&mut canvas).unwrap(), TickOutcome::Stopped);
        assert_eq!(canvas, before);
        assert_eq!(pipeline.frames(), 1);
    }

    #[test]
    fn test_tick_after_reset_runs_one_frame() {
        let clock = ManualClock::new();
        let mut pipeline = split_pipeline(clock.clone());
        let mut canvas = PixelCanvas::new(300, 300);
        clock.advance(10.0);
        pipeline.tick(&mut canvas).unwrap();

        pipeline.physics_mut().reset().unwrap();
        let steps = pipeline.physics_mut().steps_taken();
        clock.advance(0.016);
        pipeline.tick(&mut canvas).unwrap();
        assert!(pipeline.physics_mut().steps_taken() - steps <= 2);
    }

    #[test]
    fn test_repeated_tick_without_time_passing_keeps_physics() {
        let clock = ManualClock::new();
        let mut pipeline = split_pipeline(clock.clone());
        let mut canvas = PixelCanvas::new(300, 300);

        clock.advance(0.3);
        pipeline.tick(&mut canvas).unwrap();
        let balls = read_balls(pipeline.physics_mut()).unwrap();
        pipeline.tick(&mut canvas).unwrap();
        assert_eq!(read_balls(pipeline.physics_mut()).unwrap(), balls);
    }

    #[test]
    fn test_tall_chamber_bounds() {
        let (sim, chamber) = physics(1.5);
        let pipeline =
            SplitRenderPipeline::shared(sim, chamber, ManualClock::new(), 300).unwrap();
        assert_eq!(pipeline.bounds(), Bounds::tile(300, 450));
    }

    #[test]
    fn test_offset_tile_wraps_onto_canvas() {
        let clock = ManualClock::new();
        let mut pipeline = split_pipeline(clock.clone());
        pipeline.set_offset(200, 0);
        pipeline.physics_mut().set_num_balls(0).unwrap();
        let mut canvas = PixelCanvas::new(300, 300);
        canvas.clear(colors::TRANSPARENT);
        pipeline.tick(&mut canvas).unwrap();
        // Wrapped copy covers the left strip, unshifted copy covers the right
        assert_eq!(canvas.pixel(10, 5), Some(colors::WHITE));
        assert_eq!(canvas.pixel(290, 5), Some(colors::WHITE));
    }
}
