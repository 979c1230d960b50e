//! Computational module contract
//!
//! Physics and render modules are opaque units with their own linear memory
//! and a fixed export surface. The host never looks inside either one except
//! through these exports:
//! - Render module ("chamber"): init, step, render, save/load and the
//!   `*Memory()` pointer accessors
//! - Physics module: init, step/step_until, ball count, `state()` JSON
//! - `ChamberHooks`: the `initChamber`/`stepChamber` pair a physics module
//!   calls to drive its chamber without linking against it
//!
//! Every export takes `&mut self`: any call may grow memory, so no view may
//! survive it.

pub mod ball;
pub mod memory;
pub mod native;
#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use ball::{BALL_SIZE, Ball, Pos2, RawBall};
pub use memory::{HeapMemory, LinearMemory, MemoryView, MemoryViewMut};

use crate::error::HostResult;

/// Export surface of a render module.
pub trait RenderModule: LinearMemory {
    /// One-time setup; sizes the ball and pixel buffers.
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()>;

    /// Apply chamber physics to the first `num_balls` balls in `balls_memory()`.
    fn step(&mut self, num_balls: usize, delta: f32) -> HostResult<()>;

    /// Rasterize into `canvas_memory()` as `width * height` RGBA8 pixels.
    fn render(&mut self, width: usize, height: usize) -> HostResult<()>;

    /// Serialize internal state into `save_memory()`.
    fn save(&mut self) -> HostResult<()>;

    /// Restore internal state from `save_memory()`.
    fn load(&mut self) -> HostResult<()>;

    fn reset(&mut self) -> HostResult<()>;

    fn balls_memory(&mut self) -> HostResult<usize>;

    fn canvas_memory(&mut self) -> HostResult<usize>;

    fn save_memory(&mut self) -> HostResult<usize>;

    /// Bytes of `save_memory()` in use; 0 means the chamber is stateless.
    fn save_size(&mut self) -> HostResult<usize>;
}

/// Host-provided callbacks a physics module uses to drive its chamber.
pub trait ChamberHooks {
    /// `initChamber(maxBalls, maxPixelBytes)`
    fn init_chamber(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()>;

    /// `stepChamber(ballsPtr, byteLen, numBalls, delta)`
    ///
    /// `source` is the calling physics module's memory; the balls at
    /// `balls_ptr..balls_ptr + byte_len` are updated in place.
    fn step_chamber(
        &mut self,
        source: &mut dyn LinearMemory,
        balls_ptr: usize,
        byte_len: usize,
        num_balls: usize,
        delta: f32,
    ) -> HostResult<()>;
}

/// Export surface of a physics module.
pub trait PhysicsModule: LinearMemory {
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()>;

    /// Run `count` sub-steps of `delta` seconds each.
    fn step(&mut self, count: usize, delta: f32) -> HostResult<()>;

    /// Advance to absolute elapsed wall-clock `time` (seconds since start).
    fn step_until(&mut self, time: f64) -> HostResult<()>;

    fn num_balls(&mut self) -> HostResult<usize>;

    fn set_num_balls(&mut self, num_balls: usize) -> HostResult<()>;

    /// Chamber height in units of chamber width.
    fn chamber_height(&mut self) -> HostResult<f32>;

    /// Pointer to a NUL-terminated JSON ball blob.
    fn state(&mut self) -> HostResult<usize>;

    fn reset(&mut self) -> HostResult<()>;

    fn set_speed(&mut self, speed: f32) -> HostResult<()>;
}

/// Read the current balls published by a physics module
pub fn read_balls<P: PhysicsModule + ?Sized>(physics: &mut P) -> HostResult<Vec<Ball>> {
    let ptr = physics.state()?;
    let json = memory::read_nul_terminated(&*physics, ptr)?;
    ball::parse_state(&json)
}
