//! Counter chamber: a flat floor and a 7-segment readout of the ball count
//!
//! Its whole state is one byte (balls seen on the last step), which makes it
//! the smallest chamber where save/load visibly changes the rendered frame.

use glam::Vec2;

use crate::error::{HostError, HostResult};
use crate::module::ball::{self, BALL_SIZE, RawBall};
use crate::module::memory::{HeapMemory, LinearMemory, MemoryView, MemoryViewMut};
use crate::module::RenderModule;

/// Restitution on floor bounce
const FLOOR_ELASTICITY: f32 = 0.9;

const WHITE: u32 = 0xffff_ffff;
const BLACK: u32 = 0xff00_0000;

/// Segment bit patterns for 0-9, bit 0 = top, clockwise, bit 6 = middle
const DIGITS: [u8; 10] = [
    0b0011_1111,
    0b0000_0110,
    0b0101_1011,
    0b0100_1111,
    0b0110_0110,
    0b0110_1101,
    0b0111_1101,
    0b0000_0111,
    0b0111_1111,
    0b0110_1111,
];

/// Segment rectangles in digit-local units (x0, y0, x1, y1), y down
const SEGMENTS: [(f32, f32, f32, f32); 7] = [
    (0.0, 0.0, 0.1, 0.0),
    (0.1, 0.0, 0.1, 0.1),
    (0.1, 0.1, 0.1, 0.2),
    (0.0, 0.2, 0.1, 0.2),
    (0.0, 0.1, 0.0, 0.2),
    (0.0, 0.0, 0.0, 0.1),
    (0.0, 0.1, 0.1, 0.1),
];

/// Left edge of the hundreds, tens and ones digits
const DIGIT_X: [f32; 3] = [0.30, 0.45, 0.60];
const DIGIT_Y: f32 = 0.2;
/// Half stroke thickness relative to canvas width
const STROKE: f32 = 0.01;

#[derive(Debug, Default, Clone, Copy)]
struct Layout {
    balls: usize,
    max_balls: usize,
    canvas: usize,
    max_pixels: usize,
    save: usize,
}

/// In-process render module
#[derive(Debug, Clone)]
pub struct CounterChamber {
    memory: HeapMemory,
    layout: Option<Layout>,
    count: u8,
}

impl Default for CounterChamber {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterChamber {
    pub fn new() -> Self {
        Self {
            memory: HeapMemory::default(),
            layout: None,
            count: 0,
        }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn set_count(&mut self, count: u8) {
        self.count = count;
    }

    pub fn memory(&self) -> &HeapMemory {
        &self.memory
    }

    fn layout(&self) -> HostResult<Layout> {
        self.layout.ok_or(HostError::NotInitialized)
    }
}

fn fill_rect(canvas: &mut [u32], width: usize, height: usize, rect: (f32, f32, f32, f32)) {
    let (x0, y0, x1, y1) = rect;
    let w = width as f32;
    let px0 = ((x0 - STROKE) * w).max(0.0) as usize;
    let py0 = ((y0 - STROKE) * w).max(0.0) as usize;
    let px1 = (((x1 + STROKE) * w) as usize).min(width);
    let py1 = (((y1 + STROKE) * w) as usize).min(height);
    for y in py0..py1 {
        canvas[y * width + px0.min(px1)..y * width + px1].fill(BLACK);
    }
}

fn draw_digit(canvas: &mut [u32], width: usize, height: usize, value: u8, x: f32, y: f32) {
    let mut bits = DIGITS[usize::from(value % 10)];
    for (x0, y0, x1, y1) in SEGMENTS {
        if bits & 1 == 1 {
            fill_rect(canvas, width, height, (x0 + x, y0 + y, x1 + x, y1 + y));
        }
        bits >>= 1;
    }
}

impl LinearMemory for CounterChamber {
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

impl RenderModule for CounterChamber {
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        if self.layout.is_some() {
            return Err(HostError::AlreadyInitialized);
        }
        let balls = self.memory.alloc(max_balls * BALL_SIZE, 4);
        let canvas = self.memory.alloc(max_canvas_pixels * 4, 4);
        let save = self.memory.alloc(1, 1);
        self.layout = Some(Layout {
            balls,
            max_balls,
            canvas,
            max_pixels: max_canvas_pixels,
            save,
        });
        log::debug!(
            "counter chamber init: {} balls, {} pixels, {} pages",
            max_balls,
            max_canvas_pixels,
            self.memory.pages()
        );
        Ok(())
    }

    fn step(&mut self, num_balls: usize, delta: f32) -> HostResult<()> {
        let layout = self.layout()?;
        if num_balls > layout.max_balls {
            return Err(HostError::BallCapacityExceeded {
                capacity: layout.max_balls,
                requested: num_balls,
            });
        }
        let byte_len = num_balls * BALL_SIZE;
        let mut balls = ball::decode_balls(&MemoryView::new(&self.memory, layout.balls, byte_len)?.to_vec())?;

        for ball in &mut balls {
            let next = ball.pos + ball.velocity * delta;
            if next.y - ball.r < 0.0 && ball.velocity.y < 0.0 {
                ball.pos.y = ball.r;
                ball.velocity = Vec2::new(ball.velocity.x, -ball.velocity.y * FLOOR_ELASTICITY);
            }
        }

        MemoryViewMut::new(&mut self.memory, layout.balls, byte_len)?
            .copy_from(ball::encode_balls(&balls))?;
        self.count = num_balls.min(255) as u8;
        Ok(())
    }

    fn render(&mut self, width: usize, height: usize) -> HostResult<()> {
        let layout = self.layout()?;
        let pixels = width * height;
        if pixels > layout.max_pixels {
            return Err(HostError::CanvasTooLarge {
                pixels,
                max: layout.max_pixels,
            });
        }

        let mut canvas = vec![WHITE; pixels];
        let digits = [self.count / 100, self.count / 10, self.count];
        for (value, x) in digits.into_iter().zip(DIGIT_X) {
            draw_digit(&mut canvas, width, height, value, x, DIGIT_Y);
        }

        // 0xAABBGGRR little-endian is RGBA in memory
        let bytes: Vec<u8> = canvas.iter().flat_map(|p| p.to_le_bytes()).collect();
        MemoryViewMut::new(&mut self.memory, layout.canvas, bytes.len())?.copy_from(&bytes)
    }

    fn save(&mut self) -> HostResult<()> {
        let layout = self.layout()?;
        self.memory.write_at(layout.save, &[self.count]);
        Ok(())
    }

    fn load(&mut self) -> HostResult<()> {
        let layout = self.layout()?;
        let mut byte = [0u8];
        MemoryView::new(&self.memory, layout.save, 1)?.copy_to(&mut byte)?;
        self.count = byte[0];
        Ok(())
    }

    fn reset(&mut self) -> HostResult<()> {
        self.count = 0;
        Ok(())
    }

    fn balls_memory(&mut self) -> HostResult<usize> {
        Ok(self.layout()?.balls)
    }

    fn canvas_memory(&mut self) -> HostResult<usize> {
        Ok(self.layout()?.canvas)
    }

    fn save_memory(&mut self) -> HostResult<usize> {
        Ok(self.layout()?.save)
    }

    fn save_size(&mut self) -> HostResult<usize> {
        Ok(1)
    }
}

/// Decode the balls currently stored in a counter chamber (tests and demos)
pub fn stored_balls(chamber: &mut CounterChamber, num_balls: usize) -> HostResult<Vec<RawBall>> {
    let ptr = chamber.balls_memory()?;
    let bytes = MemoryView::new(&*chamber, ptr, num_balls * BALL_SIZE)?.to_vec();
    ball::decode_balls(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_bounces_off_floor() {
        let mut chamber = CounterChamber::new();
        chamber.init(2, 16).unwrap();
        let balls = [
            RawBall {
                pos: Vec2::new(0.5, 0.011),
                r: 0.01,
                velocity: Vec2::new(0.0, -1.0),
            },
            RawBall {
                pos: Vec2::new(0.2, 0.5),
                r: 0.01,
                velocity: Vec2::new(0.0, -1.0),
            },
        ];
        let ptr = chamber.balls_memory().unwrap();
        chamber.write_at(ptr, ball::encode_balls(&balls));

        chamber.step(2, 0.01).unwrap();

        let stepped = stored_balls(&mut chamber, 2).unwrap();
        assert_eq!(stepped[0].pos.y, 0.01);
        assert!((stepped[0].velocity.y - 0.9).abs() < 1e-6);
        // Far from the floor: untouched
        assert_eq!(stepped[1], balls[1]);
        assert_eq!(chamber.count(), 2);
    }

    #[test]
    fn test_step_over_capacity() {
        let mut chamber = CounterChamber::new();
        chamber.init(1, 16).unwrap();
        assert_eq!(
            chamber.step(2, 0.01),
            Err(HostError::BallCapacityExceeded {
                capacity: 1,
                requested: 2
            })
        );
    }

    #[test]
    fn test_render_white_background_with_digits() {
        let mut chamber = CounterChamber::new();
        chamber.init(0, 100 * 100).unwrap();
        chamber.set_count(8);
        chamber.render(100, 100).unwrap();

        let ptr = chamber.canvas_memory().unwrap();
        let pixels = MemoryView::new(&chamber, ptr, 100 * 100 * 4).unwrap().to_vec();
        // Top-left corner is background
        assert_eq!(&pixels[0..4], &[0xff, 0xff, 0xff, 0xff]);
        // Middle segment of the ones digit (x = 0.65, y = 0.3)
        let idx = (30 * 100 + 65) * 4;
        assert_eq!(&pixels[idx..idx + 4], &[0x00, 0x00, 0x00, 0xff]);
    }
}
