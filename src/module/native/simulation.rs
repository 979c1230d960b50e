//! In-process physics module
//!
//! Balls live in this module's own linear memory as `RawBall`s. Every fixed
//! sub-step integrates gravity, wraps the domain, then hands the ball bytes
//! to the chamber through the injected `ChamberHooks`.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::consts::{MAX_SUBSTEPS_PER_CALL, SIM_DT};
use crate::error::{HostError, HostResult};
use crate::module::ball::{self, BALL_SIZE, Ball, RawBall};
use crate::module::memory::{HeapMemory, LinearMemory, MemoryView, MemoryViewMut};
use crate::module::{ChamberHooks, PhysicsModule};

/// Downward acceleration in chamber widths per second²
const GRAVITY: f32 = 1.0;
/// Balls spawned by `init`
pub const DEFAULT_NUM_BALLS: usize = 10;
const MIN_RADIUS: f32 = 0.01;
const MAX_RADIUS: f32 = 0.02;
/// Bytes reserved per ball for the JSON state blob before it must grow
const STATE_BYTES_PER_BALL: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Regions {
    balls: usize,
    state: usize,
    state_capacity: usize,
}

/// Reference physics module
pub struct NativeSimulation<H: ChamberHooks> {
    memory: HeapMemory,
    hooks: H,
    regions: Option<Regions>,
    max_balls: usize,
    num_balls: usize,
    chamber_height: f32,
    speed: f32,
    seed: u64,
    rng: Pcg32,
    /// Last wall-clock time handed to `step_until`
    wall_time: f64,
    /// Simulated seconds not yet consumed by a sub-step
    pending: f64,
    steps_taken: u64,
}

impl<H: ChamberHooks> NativeSimulation<H> {
    pub fn new(hooks: H, chamber_height: f32, seed: u64) -> Self {
        Self {
            memory: HeapMemory::default(),
            hooks,
            regions: None,
            max_balls: 0,
            num_balls: 0,
            chamber_height,
            speed: 1.0,
            seed,
            rng: Pcg32::seed_from_u64(seed),
            wall_time: 0.0,
            pending: 0.0,
            steps_taken: 0,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    fn regions(&self) -> HostResult<Regions> {
        self.regions.ok_or(HostError::NotInitialized)
    }

    fn load_balls(&self) -> HostResult<Vec<RawBall>> {
        let regions = self.regions()?;
        let view = MemoryView::new(&self.memory, regions.balls, self.num_balls * BALL_SIZE)?;
        ball::decode_balls(&view.to_vec())
    }

    fn store_balls(&mut self, balls: &[RawBall]) -> HostResult<()> {
        let regions = self.regions()?;
        let bytes = ball::encode_balls(balls);
        MemoryViewMut::new(&mut self.memory, regions.balls, bytes.len())?.copy_from(bytes)
    }

    fn spawn_ball(&mut self) -> RawBall {
        let x = self.rng.random_range(0.0..1.0);
        let top = self.chamber_height.max(MAX_RADIUS);
        let y = self.rng.random_range(0.5 * top..top);
        let r = self.rng.random_range(MIN_RADIUS..MAX_RADIUS);
        RawBall::new(Vec2::new(x, y), r)
    }

    fn substep(&mut self, delta: f32) -> HostResult<()> {
        let mut balls = self.load_balls()?;
        let height = self.chamber_height;
        for ball in &mut balls {
            ball.velocity.y -= GRAVITY * delta;
            ball.pos += ball.velocity * delta;
            ball.pos.x = ball.pos.x.rem_euclid(1.0);
            if height > 0.0 {
                ball.pos.y = ball.pos.y.rem_euclid(height);
            }
        }
        self.store_balls(&balls)?;

        let regions = self.regions()?;
        let byte_len = self.num_balls * BALL_SIZE;
        self.hooks
            .step_chamber(&mut self.memory, regions.balls, byte_len, self.num_balls, delta)?;
        self.steps_taken += 1;
        Ok(())
    }
}

impl<H: ChamberHooks> LinearMemory for NativeSimulation<H> {
    fn size(&self) -> usize {
        self.memory.size()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        self.memory.read_at(offset, dst);
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) {
        self.memory.write_at(offset, src);
    }
}

impl<H: ChamberHooks> PhysicsModule for NativeSimulation<H> {
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        if self.regions.is_some() {
            return Err(HostError::AlreadyInitialized);
        }
        let max_balls = if max_balls == 0 { DEFAULT_NUM_BALLS * 100 } else { max_balls };
        let balls = self.memory.alloc(max_balls * BALL_SIZE, 4);
        let state_capacity = 16 + DEFAULT_NUM_BALLS * STATE_BYTES_PER_BALL;
        let state = self.memory.alloc(state_capacity, 1);
        self.regions = Some(Regions {
            balls,
            state,
            state_capacity,
        });
        self.max_balls = max_balls;

        self.hooks.init_chamber(max_balls, max_canvas_pixels)?;
        self.set_num_balls(DEFAULT_NUM_BALLS)
    }

    fn step(&mut self, count: usize, delta: f32) -> HostResult<()> {
        for _ in 0..count {
            self.substep(delta)?;
        }
        Ok(())
    }

    fn step_until(&mut self, time: f64) -> HostResult<()> {
        self.regions()?;
        if time <= self.wall_time {
            return Ok(());
        }
        self.pending += (time - self.wall_time) * f64::from(self.speed);
        self.wall_time = time;

        let dt = f64::from(SIM_DT);
        let mut substeps = 0;
        while self.pending >= dt {
            if substeps == MAX_SUBSTEPS_PER_CALL {
                log::debug!("dropping {:.3}s of physics backlog", self.pending);
                self.pending = 0.0;
                break;
            }
            self.substep(SIM_DT)?;
            self.pending -= dt;
            substeps += 1;
        }
        Ok(())
    }

    fn num_balls(&mut self) -> HostResult<usize> {
        Ok(self.num_balls)
    }

    fn set_num_balls(&mut self, num_balls: usize) -> HostResult<()> {
        let mut balls = self.load_balls()?;
        let target = num_balls.min(self.max_balls);
        balls.truncate(target);
        while balls.len() < target {
            let ball = self.spawn_ball();
            balls.push(ball);
        }
        self.num_balls = target;
        self.store_balls(&balls)
    }

    fn chamber_height(&mut self) -> HostResult<f32> {
        Ok(self.chamber_height)
    }

    fn state(&mut self) -> HostResult<usize> {
        let balls: Vec<Ball> = self.load_balls()?.iter().map(Ball::from).collect();
        let mut json = serde_json::to_vec(&balls)?;
        json.push(0);

        let mut regions = self.regions()?;
        if json.len() > regions.state_capacity {
            // Regrowing may move memory; callers re-derive views from the pointer
            let capacity = json.len().next_power_of_two();
            regions.state = self.memory.alloc(capacity, 1);
            regions.state_capacity = capacity;
            self.regions = Some(regions);
        }
        MemoryViewMut::new(&mut self.memory, regions.state, json.len())?.copy_from(&json)?;
        Ok(regions.state)
    }

    fn reset(&mut self) -> HostResult<()> {
        let num_balls = self.num_balls;
        self.rng = Pcg32::seed_from_u64(self.seed);
        self.num_balls = 0;
        // Callers keep passing absolute time; only the backlog restarts
        self.pending = 0.0;
        self.steps_taken = 0;
        self.set_num_balls(num_balls)
    }

    fn set_speed(&mut self, speed: f32) -> HostResult<()> {
        self.speed = speed.max(0.0);
        Ok(())
    }
}
