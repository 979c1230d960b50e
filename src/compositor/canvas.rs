//! Drawing surfaces
//!
//! `Canvas` is the handful of 2-D context operations the compositor needs.
//! `PixelCanvas` implements them in software over an RGBA8 buffer so frames
//! can be composed and inspected without a browser.

use glam::Vec2;

/// Straight-alpha RGBA8 colour
pub type Rgba = [u8; 4];

/// Colours used when compositing
pub mod colors {
    use super::Rgba;

    pub const WHITE: Rgba = [0xff, 0xff, 0xff, 0xff];
    pub const BLACK: Rgba = [0x00, 0x00, 0x00, 0xff];
    pub const RED: Rgba = [0xff, 0x00, 0x00, 0xff];
    pub const BLUE: Rgba = [0x00, 0x00, 0xff, 0xff];
    pub const TRANSPARENT: Rgba = [0x00, 0x00, 0x00, 0x00];
}

/// Canvas dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A 2-D drawing target with canvas semantics (top-left origin, y down)
pub trait Canvas {
    fn size(&self) -> CanvasSize;

    /// Replace pixels at (`x`, `y`) with an RGBA8 image, clipped to the canvas.
    /// Like `putImageData`, no blending takes place.
    fn put_image(&mut self, rgba: &[u8], width: u32, height: u32, x: i32, y: i32);

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba);

    /// Stroke a rectangle outline centered on its edges
    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: f32, color: Rgba);

    /// Fill a circle and stroke its outline
    fn fill_circle(&mut self, center: Vec2, radius: f32, fill: Rgba, outline: Rgba, line_width: f32);
}

/// Software RGBA8 canvas
#[derive(Debug, Clone, PartialEq)]
pub struct PixelCanvas {
    size: CanvasSize,
    data: Vec<u8>,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        let size = CanvasSize::new(width, height);
        Self {
            size,
            data: vec![0; size.pixels() * 4],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self, color: Rgba) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Colour at (`x`, `y`), `None` outside the canvas
    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgba> {
        if x < 0 || y < 0 || x as u32 >= self.size.width || y as u32 >= self.size.height {
            return None;
        }
        let i = (y as usize * self.size.width as usize + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    fn set(&mut self, x: usize, y: usize, color: Rgba) {
        let i = (y * self.size.width as usize + x) * 4;
        self.data[i..i + 4].copy_from_slice(&color);
    }

    /// Pixel index range whose centers fall in [lo, hi)
    fn span(lo: f32, hi: f32, limit: u32) -> std::ops::Range<usize> {
        let start = (lo - 0.5).ceil().max(0.0);
        let end = (hi - 0.5).ceil().clamp(0.0, limit as f32);
        (start as usize)..(end as usize).max(start as usize)
    }
}

impl Canvas for PixelCanvas {
    fn size(&self) -> CanvasSize {
        self.size
    }

    fn put_image(&mut self, rgba: &[u8], width: u32, height: u32, x: i32, y: i32) {
        let src_w = width as i64;
        let x0 = i64::from(x).max(0);
        let x1 = (i64::from(x) + src_w).min(i64::from(self.size.width));
        let y0 = i64::from(y).max(0);
        let y1 = (i64::from(y) + i64::from(height)).min(i64::from(self.size.height));
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let dst_w = i64::from(self.size.width);
        let row_bytes = ((x1 - x0) * 4) as usize;
        for dy in y0..y1 {
            let sy = dy - i64::from(y);
            let sx = x0 - i64::from(x);
            let src = ((sy * src_w + sx) * 4) as usize;
            let dst = ((dy * dst_w + x0) * 4) as usize;
            if src + row_bytes > rgba.len() {
                break;
            }
            self.data[dst..dst + row_bytes].copy_from_slice(&rgba[src..src + row_bytes]);
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba) {
        let xs = Self::span(x, x + width, self.size.width);
        for py in Self::span(y, y + height, self.size.height) {
            for px in xs.clone() {
                self.set(px, py, color);
            }
        }
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: f32, color: Rgba) {
        let h = line_width / 2.0;
        self.fill_rect(x - h, y - h, width + line_width, line_width, color);
        self.fill_rect(x - h, y + height - h, width + line_width, line_width, color);
        self.fill_rect(x - h, y + h, line_width, height - line_width, color);
        self.fill_rect(x + width - h, y + h, line_width, height - line_width, color);
    }

    fn fill_circle(&mut self, center: Vec2, radius: f32, fill: Rgba, outline: Rgba, line_width: f32) {
        let outer = radius + line_width / 2.0;
        let inner = radius - line_width / 2.0;
        let xs = Self::span(center.x - outer, center.x + outer, self.size.width);
        for py in Self::span(center.y - outer, center.y + outer, self.size.height) {
            for px in xs.clone() {
                let d = Vec2::new(px as f32 + 0.5, py as f32 + 0.5).distance(center);
                if d < inner {
                    self.set(px, py, fill);
                } else if d < outer {
                    self.set(px, py, if line_width > 0.0 { outline } else { fill });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colors::*;

    #[test]
    fn test_put_image_clips_negative_offset() {
        let mut canvas = PixelCanvas::new(4, 4);
        let mut image = Vec::new();
        for i in 0..4u8 {
            image.extend_from_slice(&[i, 0, 0, 0xff]);
        }
        // 2x2 image, drawn one pixel up-left of the origin
        canvas.put_image(&image, 2, 2, -1, -1);
        assert_eq!(canvas.pixel(0, 0), Some([3, 0, 0, 0xff]));
        assert_eq!(canvas.pixel(1, 0), Some(TRANSPARENT));
    }

    #[test]
    fn test_put_image_clips_right_edge() {
        let mut canvas = PixelCanvas::new(4, 1);
        let image = [RED, RED, BLUE].concat();
        canvas.put_image(&image, 3, 1, 2, 0);
        assert_eq!(canvas.pixel(2, 0), Some(RED));
        assert_eq!(canvas.pixel(3, 0), Some(RED));
    }

    #[test]
    fn test_fill_rect_uses_pixel_centers() {
        let mut canvas = PixelCanvas::new(10, 10);
        canvas.fill_rect(2.0, 2.0, 3.0, 1.0, RED);
        assert_eq!(canvas.pixel(1, 2), Some(TRANSPARENT));
        assert_eq!(canvas.pixel(2, 2), Some(RED));
        assert_eq!(canvas.pixel(4, 2), Some(RED));
        assert_eq!(canvas.pixel(5, 2), Some(TRANSPARENT));
        assert_eq!(canvas.pixel(2, 3), Some(TRANSPARENT));
    }

    #[test]
    fn test_fill_circle_with_outline() {
        let mut canvas = PixelCanvas::new(20, 20);
        canvas.fill_circle(Vec2::new(10.0, 10.0), 5.0, RED, BLACK, 2.0);
        assert_eq!(canvas.pixel(10, 10), Some(RED));
        assert_eq!(canvas.pixel(14, 9), Some(BLACK));
        assert_eq!(canvas.pixel(17, 10), Some(TRANSPARENT));
    }
}
