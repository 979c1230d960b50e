//! `Canvas` over a browser `CanvasRenderingContext2d`

use glam::Vec2;
use wasm_bindgen::{Clamped, JsCast};
use web_sys::{CanvasRenderingContext2d, Document, HtmlCanvasElement, ImageData};

use super::canvas::{Canvas, CanvasSize, Rgba};
use crate::error::{HostError, HostResult};

fn css(color: Rgba) -> String {
    format!(
        "rgba({}, {}, {}, {})",
        color[0],
        color[1],
        color[2],
        f32::from(color[3]) / 255.0
    )
}

/// A `<canvas>` element and its 2-D context
pub struct Canvas2d {
    element: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
}

impl Canvas2d {
    /// Wrap an existing canvas element
    pub fn new(element: HtmlCanvasElement) -> HostResult<Self> {
        let ctx = element
            .get_context("2d")?
            .ok_or_else(|| HostError::Module("canvas has no 2d context".into()))?
            .dyn_into::<CanvasRenderingContext2d>()
            .map_err(|_| HostError::Module("unexpected context type".into()))?;
        Ok(Self { element, ctx })
    }

    /// Create a `width x height` canvas element (not yet attached)
    pub fn create(document: &Document, width: u32, height: u32) -> HostResult<Self> {
        let element: HtmlCanvasElement = document
            .create_element("canvas")?
            .dyn_into()
            .map_err(|_| HostError::Module("not a canvas".into()))?;
        element.set_width(width);
        element.set_height(height);
        Self::new(element)
    }

    pub fn element(&self) -> &HtmlCanvasElement {
        &self.element
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.element.set_width(width);
        self.element.set_height(height);
    }
}

impl Canvas for Canvas2d {
    fn size(&self) -> CanvasSize {
        CanvasSize::new(self.element.width(), self.element.height())
    }

    fn put_image(&mut self, rgba: &[u8], width: u32, height: u32, x: i32, y: i32) {
        let image = match ImageData::new_with_u8_clamped_array_and_sh(Clamped(rgba), width, height) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("ImageData rejected {}x{} buffer: {:?}", width, height, e);
                return;
            }
        };
        if let Err(e) = self.ctx.put_image_data(&image, f64::from(x), f64::from(y)) {
            log::warn!("putImageData failed: {:?}", e);
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba) {
        self.ctx.set_fill_style_str(&css(color));
        self.ctx
            .fill_rect(f64::from(x), f64::from(y), f64::from(width), f64::from(height));
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: f32, color: Rgba) {
        self.ctx.begin_path();
        self.ctx.set_stroke_style_str(&css(color));
        self.ctx.set_line_width(f64::from(line_width));
        self.ctx
            .rect(f64::from(x), f64::from(y), f64::from(width), f64::from(height));
        self.ctx.stroke();
    }

    fn fill_circle(&mut self, center: Vec2, radius: f32, fill: Rgba, outline: Rgba, line_width: f32) {
        self.ctx.begin_path();
        self.ctx.set_fill_style_str(&css(fill));
        self.ctx.set_stroke_style_str(&css(outline));
        self.ctx.set_line_width(f64::from(line_width));
        if let Err(e) = self.ctx.arc(
            f64::from(center.x),
            f64::from(center.y),
            f64::from(radius.max(0.0)),
            0.0,
            std::f64::consts::TAU,
        ) {
            log::warn!("arc failed: {:?}", e);
            return;
        }
        self.ctx.close_path();
        self.ctx.fill();
        if line_width > 0.0 {
            self.ctx.stroke();
        }
    }
}
