//! Toroidal compositing
//!
//! The simulated domain is periodic: a tile pushed past the right or bottom
//! edge of the canvas reappears at the left or top. Every draw goes through
//! `positions`, which yields the 1, 2 or 4 on-canvas placements needed to
//! cover a possibly-overhanging tile.

pub mod canvas;
#[cfg(target_arch = "wasm32")]
pub mod canvas2d;

pub use canvas::{Canvas, CanvasSize, PixelCanvas, Rgba, colors};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::chamber::PixelBuffer;
use crate::consts::{BALL_OUTLINE_FRACTION, BORDER_WIDTH_FRACTION};
use crate::module::{Ball, LinearMemory};

/// Target pixel rectangle for one tile draw.
///
/// `width`/`height` are the native tile size. `x`/`y` may lie outside the
/// canvas, meaning a periodically wrapped copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Tile at the canvas origin
    pub const fn tile(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Top-left corner of one on-canvas placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

fn axis_positions(start: i32, extent: u32, dimension: u32) -> ([i32; 2], usize) {
    let dimension = dimension as i32;
    let wrapped = start.rem_euclid(dimension);
    if wrapped + extent as i32 > dimension {
        ([wrapped, wrapped - dimension], 2)
    } else {
        ([wrapped, 0], 1)
    }
}

/// Every placement needed to draw `bounds` on a wrapping canvas of `canvas` size
pub fn positions(canvas: CanvasSize, bounds: Bounds) -> Vec<Position> {
    if canvas.width == 0 || canvas.height == 0 {
        return Vec::new();
    }
    let (xs, nx) = axis_positions(bounds.x, bounds.width, canvas.width);
    let (ys, ny) = axis_positions(bounds.y, bounds.height, canvas.height);

    let mut out = Vec::with_capacity(nx * ny);
    for &x in &xs[..nx] {
        for &y in &ys[..ny] {
            out.push(Position::new(x, y));
        }
    }
    out
}

/// Ball center and radius in tile pixels (y flipped, everything scaled by width)
pub fn ball_to_pixels(ball: &Ball, bounds: Bounds) -> (Vec2, f32) {
    let width = bounds.width as f32;
    let center = Vec2::new(
        ball.pos.x * width,
        bounds.height as f32 - ball.pos.y * width,
    );
    (center, ball.r * width)
}

/// Ball fill policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawStyle {
    /// Every ball red
    #[default]
    Uniform,
    /// Even-indexed balls red, odd blue
    Alternating,
}

impl DrawStyle {
    fn fill(self, index: usize) -> Rgba {
        match self {
            DrawStyle::Uniform => colors::RED,
            DrawStyle::Alternating if index % 2 == 1 => colors::BLUE,
            DrawStyle::Alternating => colors::RED,
        }
    }
}

/// Draws chamber tiles and balls through toroidal placements
#[derive(Debug, Clone, Copy, Default)]
pub struct ToroidalCompositor {
    pub style: DrawStyle,
}

impl ToroidalCompositor {
    pub fn new(style: DrawStyle) -> Self {
        Self { style }
    }

    fn border<C: Canvas + ?Sized>(&self, canvas: &mut C, bounds: Bounds, at: &[Position]) {
        let line_width = BORDER_WIDTH_FRACTION * bounds.width as f32;
        for pos in at {
            canvas.stroke_rect(
                pos.x as f32,
                pos.y as f32,
                bounds.width as f32,
                bounds.height as f32,
                line_width,
                colors::BLACK,
            );
        }
    }

    /// Stroke the tile border at every placement
    pub fn draw_border<C: Canvas + ?Sized>(&self, canvas: &mut C, bounds: Bounds) {
        let at = positions(canvas.size(), bounds);
        self.border(canvas, bounds, &at);
    }

    /// Put the chamber pixels at every placement, then the border
    pub fn draw_chamber<C, M>(&self, canvas: &mut C, pixels: &PixelBuffer<'_, M>, bounds: Bounds)
    where
        C: Canvas + ?Sized,
        M: LinearMemory + ?Sized,
    {
        let rgba = pixels.to_rgba();
        let at = positions(canvas.size(), bounds);
        for pos in &at {
            canvas.put_image(&rgba, pixels.width(), pixels.height(), pos.x, pos.y);
        }
        self.border(canvas, bounds, &at);
    }

    /// Fill every placement white and stroke the border (tile without a chamber)
    pub fn clear_bounds<C: Canvas + ?Sized>(&self, canvas: &mut C, bounds: Bounds) {
        let at = positions(canvas.size(), bounds);
        for pos in &at {
            canvas.fill_rect(
                pos.x as f32,
                pos.y as f32,
                bounds.width as f32,
                bounds.height as f32,
                colors::WHITE,
            );
        }
        self.border(canvas, bounds, &at);
    }

    /// Draw every ball at every placement
    pub fn draw_balls<C: Canvas + ?Sized>(&self, canvas: &mut C, balls: &[Ball], bounds: Bounds) {
        let at = positions(canvas.size(), bounds);
        let line_width = BALL_OUTLINE_FRACTION * bounds.width as f32;
        for (i, ball) in balls.iter().enumerate() {
            let (center, radius) = ball_to_pixels(ball, bounds);
            let fill = self.style.fill(i);
            for pos in &at {
                let offset = Vec2::new(pos.x as f32, pos.y as f32);
                canvas.fill_circle(center + offset, radius, fill, colors::BLACK, line_width);
            }
        }
    }

    /// Chamber background followed by its balls
    pub fn draw_frame<C, M>(
        &self,
        canvas: &mut C,
        pixels: &PixelBuffer<'_, M>,
        balls: &[Ball],
        bounds: Bounds,
    ) where
        C: Canvas + ?Sized,
        M: LinearMemory + ?Sized,
    {
        self.draw_chamber(canvas, pixels, bounds);
        self.draw_balls(canvas, balls, bounds);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::chamber::Chamber;
    use crate::module::native::CounterChamber;

    const CANVAS: CanvasSize = CanvasSize::new(300, 300);

    #[test]
    fn test_positions_in_place() {
        let at = positions(CANVAS, Bounds::tile(300, 300));
        assert_eq!(at, vec![Position::new(0, 0)]);
    }

    #[test]
    fn test_positions_overhang_right() {
        let at = positions(CANVAS, Bounds::new(250, 0, 300, 300));
        assert_eq!(at, vec![Position::new(250, 0), Position::new(-50, 0)]);
    }

    #[test]
    fn test_positions_overhang_both_axes() {
        let at = positions(CANVAS, Bounds::new(250, 100, 300, 300));
        assert_eq!(
            at,
            vec![
                Position::new(250, 100),
                Position::new(250, -200),
                Position::new(-50, 100),
                Position::new(-50, -200),
            ]
        );
    }

    #[test]
    fn test_positions_wrap_far_and_negative_offsets() {
        assert_eq!(
            positions(CANVAS, Bounds::new(600, -300, 300, 300)),
            vec![Position::new(0, 0)]
        );
        assert_eq!(
            positions(CANVAS, Bounds::new(-50, 0, 300, 300)),
            vec![Position::new(250, 0), Position::new(-50, 0)]
        );
    }

    #[test]
    fn test_positions_grid_tile_inside_wider_canvas() {
        let canvas = CanvasSize::new(900, 300);
        assert_eq!(
            positions(canvas, Bounds::new(300, 0, 300, 300)),
            vec![Position::new(300, 0)]
        );
        assert_eq!(
            positions(canvas, Bounds::new(700, 0, 300, 300)).len(),
            2
        );
    }

    #[test]
    fn test_positions_empty_canvas() {
        assert!(positions(CanvasSize::new(0, 300), Bounds::tile(300, 300)).is_empty());
    }

    proptest! {
        #[test]
        fn prop_placements_cover_the_wrapped_tile(
            x in -2000i32..2000,
            y in -2000i32..2000,
        ) {
            let bounds = Bounds::new(x, y, 300, 300);
            let at = positions(CANVAS, bounds);
            prop_assert!(matches!(at.len(), 1 | 2 | 4));
            prop_assert_eq!(at[0].x, x.rem_euclid(300));
            prop_assert_eq!(at[0].y, y.rem_euclid(300));
            for pos in &at {
                // Every placement overlaps the canvas
                prop_assert!(pos.x < 300 && pos.x + 300 > 0);
                prop_assert!(pos.y < 300 && pos.y + 300 > 0);
            }
        }
    }

    #[test]
    fn test_ball_pixels_are_flipped_and_width_scaled() {
        let (center, radius) = ball_to_pixels(&Ball::new(0.5, 0.25, 0.02), Bounds::tile(300, 450));
        assert_eq!(center, Vec2::new(150.0, 450.0 - 75.0));
        assert_eq!(radius, 6.0);
    }

    #[test]
    fn test_ball_straddling_seam_drawn_on_both_sides() {
        let mut canvas = PixelCanvas::new(300, 300);
        let compositor = ToroidalCompositor::default();
        // Ball at the right edge of a tile shifted 100px right: lands at x=0
        let bounds = Bounds::new(100, 0, 300, 300);
        compositor.draw_balls(&mut canvas, &[Ball::new(2.0 / 3.0, 0.5, 0.05)], bounds);

        // Center sits exactly on the seam at x = 300 == x = 0
        assert_eq!(canvas.pixel(0, 150), Some(colors::RED));
        assert_eq!(canvas.pixel(299, 150), Some(colors::RED));
        assert_eq!(canvas.pixel(150, 150), Some(colors::TRANSPARENT));
        // Wrapped copy lands where the tile's overhang reappears
        let mut wrapped = PixelCanvas::new(300, 300);
        compositor.draw_balls(&mut wrapped, &[Ball::new(0.95, 0.5, 0.05)], bounds);
        assert_eq!(wrapped.pixel(85, 150), Some(colors::RED));
    }

    #[test]
    fn test_alternating_colors() {
        let mut canvas = PixelCanvas::new(300, 300);
        let compositor = ToroidalCompositor::new(DrawStyle::Alternating);
        let balls = [Ball::new(0.25, 0.5, 0.05), Ball::new(0.75, 0.5, 0.05)];
        compositor.draw_balls(&mut canvas, &balls, Bounds::tile(300, 300));
        assert_eq!(canvas.pixel(75, 150), Some(colors::RED));
        assert_eq!(canvas.pixel(225, 150), Some(colors::BLUE));
    }

    #[test]
    fn test_draw_chamber_wraps_background() {
        let mut chamber = Chamber::new(CounterChamber::new());
        chamber.init(0, 300 * 300).unwrap();
        let pixels = chamber.render(300, 300).unwrap();

        let mut canvas = PixelCanvas::new(300, 300);
        ToroidalCompositor::default().draw_chamber(&mut canvas, &pixels, Bounds::new(150, 0, 300, 300));
        // Both halves of the canvas received white chamber pixels
        assert_eq!(canvas.pixel(20, 100), Some(colors::WHITE));
        assert_eq!(canvas.pixel(280, 100), Some(colors::WHITE));
        // Border of the shifted tile at x = 150
        assert_eq!(canvas.pixel(150, 100), Some(colors::BLACK));
    }

    #[test]
    fn test_clear_bounds() {
        let mut canvas = PixelCanvas::new(300, 300);
        ToroidalCompositor::default().clear_bounds(&mut canvas, Bounds::tile(300, 300));
        assert_eq!(canvas.pixel(150, 150), Some(colors::WHITE));
        assert_eq!(canvas.pixel(0, 150), Some(colors::BLACK));
    }
}
