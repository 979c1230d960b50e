//! Host settings
//!
//! Persisted as JSON in LocalStorage on the web, defaults natively.

use serde::{Deserialize, Serialize};

use crate::compositor::{CanvasSize, DrawStyle};
use crate::consts::{CANVAS_WIDTH, TICK_INTERVAL_MS};

/// Host settings/preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Rendering ===
    /// Tile width in pixels; tile height follows the chamber height
    pub canvas_width: u32,
    /// Delay between render ticks
    pub tick_interval_ms: u32,
    /// Render through a second chamber instance kept in sync by save/load
    pub split_pipeline: bool,
    /// Ball colouring on the local page
    pub draw_style: DrawStyle,

    // === Simulation ===
    /// Ball capacity chambers are initialized with
    pub max_balls: usize,

    // === Server ===
    /// Simulation server base URL ("" = same origin)
    pub server_url: String,
    /// Delay between snapshot polls
    pub poll_interval_ms: u32,
    /// Snapshots queued between renders before the oldest is dropped
    pub snapshot_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            canvas_width: CANVAS_WIDTH,
            tick_interval_ms: TICK_INTERVAL_MS,
            split_pipeline: true,
            draw_style: DrawStyle::Uniform,

            max_balls: 1000,

            server_url: String::new(),
            poll_interval_ms: 100,
            snapshot_buffer: 8,
        }
    }
}

impl Settings {
    /// Tile height for a chamber `chamber_height` widths tall
    pub fn canvas_height(&self, chamber_height: f32) -> u32 {
        (self.canvas_width as f32 * chamber_height).floor() as u32
    }

    pub fn tile(&self, chamber_height: f32) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height(chamber_height))
    }

    /// Pixel capacity a chamber must be initialized with to render one tile
    pub fn max_canvas_pixels(&self, chamber_height: f32) -> usize {
        self.tile(chamber_height).pixels()
    }

    /// LocalStorage key
    #[cfg(target_arch = "wasm32")]
    const STORAGE_KEY: &'static str = "chamber_host_settings";

    /// Load settings from LocalStorage (WASM only)
    #[cfg(target_arch = "wasm32")]
    pub fn load() -> Self {
        let storage = web_sys::window()
            .and_then(|w| w.local_storage().ok())
            .flatten();

        if let Some(storage) = storage {
            if let Ok(Some(json)) = storage.get_item(Self::STORAGE_KEY) {
                match serde_json::from_str(&json) {
                    Ok(settings) => {
                        log::info!("Loaded settings from LocalStorage");
                        return settings;
                    }
                    Err(e) => log::warn!("Ignoring stored settings: {}", e),
                }
            }
        }

        log::info!("Using default settings");
        Self::default()
    }

    /// Save settings to LocalStorage (WASM only)
    #[cfg(target_arch = "wasm32")]
    pub fn save(&self) {
        let storage = web_sys::window()
            .and_then(|w| w.local_storage().ok())
            .flatten();

        if let Some(storage) = storage {
            if let Ok(json) = serde_json::to_string(self) {
                let _ = storage.set_item(Self::STORAGE_KEY, &json);
                log::info!("Settings saved");
            }
        }
    }

    /// Native stub
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> Self {
        Self::default()
    }
}
