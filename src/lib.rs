//! Chamber Host - frame synchronization and compositing for ball chambers
//!
//! Core modules:
//! - `module`: Computational module contract, linear memory views, reference modules
//! - `bridge`: Per-step ball transfer between a physics module and its chamber
//! - `chamber`: Render-module wrapper (init, save/load, render)
//! - `compositor`: Toroidal placement and drawing onto canvases
//! - `pipeline`: Wall-clock driven split/shared render pipeline
//! - `registry`: Grid of chamber slots fed by remote snapshots
//! - `remote`: Server data types and fetch client

pub mod bridge;
pub mod chamber;
pub mod compositor;
pub mod error;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod settings;

pub use bridge::StateBridge;
pub use chamber::{Chamber, PixelBuffer, SerializedState, SharedChamber};
pub use compositor::{Bounds, Position, ToroidalCompositor, positions};
pub use error::{HostError, HostResult};
pub use pipeline::{PipelineState, ShutdownFlag, SplitRenderPipeline};
pub use registry::{ChamberRegistry, Slot};
pub use settings::Settings;

/// Host configuration constants
pub mod consts {
    /// Native tile width of a single chamber canvas (pixels)
    pub const CANVAS_WIDTH: u32 = 300;
    /// Nominal delay between scheduled ticks
    pub const TICK_INTERVAL_MS: u32 = 16;

    /// Fixed physics sub-step (120 Hz)
    pub const SIM_DT: f32 = 1.0 / 120.0;
    /// Sub-steps allowed in one `step_until` before the backlog is dropped
    pub const MAX_SUBSTEPS_PER_CALL: u32 = 240;

    /// Border stroke width relative to tile width
    pub const BORDER_WIDTH_FRACTION: f32 = 0.01;
    /// Ball outline width relative to tile width
    pub const BALL_OUTLINE_FRACTION: f32 = 0.005;

    /// Bytes per RGBA8 pixel
    pub const BYTES_PER_PIXEL: usize = 4;
}
