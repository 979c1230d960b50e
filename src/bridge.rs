//! State bridge between a physics module and its chamber
//!
//! The physics module owns the authoritative ball array. Once per physics
//! step the bridge copies those bytes into the chamber, lets the chamber step
//! (boundary interactions etc.), and copies the result back. Neither module
//! learns anything about the other's memory layout.

use crate::chamber::SharedChamber;
use crate::error::{HostError, HostResult};
use crate::module::ball::{self, BALL_SIZE};
use crate::module::{ChamberHooks, LinearMemory, MemoryView, MemoryViewMut, RenderModule};

/// `ChamberHooks` implementation that drives one chamber
pub struct StateBridge<R: RenderModule> {
    chamber: SharedChamber<R>,
    step: bool,
    transfers: u64,
}

impl<R: RenderModule> StateBridge<R> {
    pub fn new(chamber: SharedChamber<R>) -> Self {
        Self {
            chamber,
            step: true,
            transfers: 0,
        }
    }

    /// Copy balls through the chamber without stepping it
    pub fn without_step(chamber: SharedChamber<R>) -> Self {
        Self {
            step: false,
            ..Self::new(chamber)
        }
    }

    pub fn chamber(&self) -> &SharedChamber<R> {
        &self.chamber
    }

    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Round-trip `num_balls` balls at `balls_ptr` in `source` through the chamber.
    ///
    /// On success the source bytes equal the chamber's post-step bytes.
    pub fn transfer(
        &mut self,
        source: &mut dyn LinearMemory,
        balls_ptr: usize,
        byte_len: usize,
        num_balls: usize,
        delta: f32,
    ) -> HostResult<()> {
        ball::check_ball_layout(byte_len, num_balls)?;

        let mut chamber = self
            .chamber
            .try_borrow_mut()
            .map_err(|_| HostError::ChamberBusy)?;
        let capacity = chamber.capacity()?;
        let stored = byte_len / BALL_SIZE;
        if stored > capacity.max_balls {
            return Err(HostError::BallCapacityExceeded {
                capacity: capacity.max_balls,
                requested: stored,
            });
        }

        let bytes = MemoryView::new(&*source, balls_ptr, byte_len)?.to_vec();
        let module = chamber.module_mut();
        let dest = module.balls_memory()?;
        MemoryViewMut::new(&mut *module, dest, byte_len)?.copy_from(&bytes)?;

        if self.step {
            module.step(num_balls, delta)?;
        }

        // The step may have grown memory; look the buffer up again
        let dest = module.balls_memory()?;
        let stepped = MemoryView::new(&*module, dest, byte_len)?.to_vec();
        MemoryViewMut::new(source, balls_ptr, byte_len)?.copy_from(&stepped)?;

        self.transfers += 1;
        log::trace!("transferred {} balls ({} bytes)", num_balls, byte_len);
        Ok(())
    }
}

impl<R: RenderModule> ChamberHooks for StateBridge<R> {
    fn init_chamber(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        self.chamber
            .try_borrow_mut()
            .map_err(|_| HostError::ChamberBusy)?
            .init(max_balls, max_canvas_pixels)
    }

    fn step_chamber(
        &mut self,
        source: &mut dyn LinearMemory,
        balls_ptr: usize,
        byte_len: usize,
        num_balls: usize,
        delta: f32,
    ) -> HostResult<()> {
        self.transfer(source, balls_ptr, byte_len, num_balls, delta)
    }
}
