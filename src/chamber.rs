//! Chamber: one render-module instance plus its pixel and save buffers

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::consts::BYTES_PER_PIXEL;
use crate::error::{HostError, HostResult};
use crate::module::{LinearMemory, MemoryView, MemoryViewMut, RenderModule};

/// Opaque chamber state, transplantable between instances of the same binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedState(Vec<u8>);

impl SerializedState {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SerializedState {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Rasterized chamber pixels, borrowed straight from module memory.
///
/// Holds the chamber borrow, so the next render or step cannot start until
/// the buffer has been consumed.
pub struct PixelBuffer<'a, M: LinearMemory + ?Sized> {
    view: MemoryView<'a, M>,
    width: u32,
    height: u32,
}

impl<M: LinearMemory + ?Sized> PixelBuffer<'_, M> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Copy out the RGBA8 rows (straight alpha, top-left origin)
    pub fn to_rgba(&self) -> Vec<u8> {
        self.view.to_vec()
    }
}

/// Capacity a chamber was initialized with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChamberCapacity {
    pub max_balls: usize,
    pub max_canvas_pixels: usize,
}

/// A render module with host-side bookkeeping
pub struct Chamber<R: RenderModule> {
    module: R,
    capacity: Option<ChamberCapacity>,
}

/// Chamber shared between the physics hooks and whoever renders it
pub type SharedChamber<R> = Rc<RefCell<Chamber<R>>>;

impl<R: RenderModule> Chamber<R> {
    pub fn new(module: R) -> Self {
        Self {
            module,
            capacity: None,
        }
    }

    pub fn into_shared(self) -> SharedChamber<R> {
        Rc::new(RefCell::new(self))
    }

    /// Allocate the module's buffers; exactly once per chamber
    pub fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        if self.capacity.is_some() {
            return Err(HostError::AlreadyInitialized);
        }
        self.module.init(max_balls, max_canvas_pixels)?;
        self.capacity = Some(ChamberCapacity {
            max_balls,
            max_canvas_pixels,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.capacity.is_some()
    }

    pub fn capacity(&self) -> HostResult<ChamberCapacity> {
        self.capacity.ok_or(HostError::NotInitialized)
    }

    pub fn module(&self) -> &R {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut R {
        &mut self.module
    }

    /// Snapshot the module's internal state
    pub fn save(&mut self) -> HostResult<SerializedState> {
        self.capacity()?;
        self.module.save()?;
        let size = self.module.save_size()?;
        if size == 0 {
            return Ok(SerializedState::default());
        }
        let ptr = self.module.save_memory()?;
        let view = MemoryView::new(&self.module, ptr, size)?;
        Ok(SerializedState(view.to_vec()))
    }

    /// Overwrite the module's internal state.
    ///
    /// Only blobs saved by a structurally identical module are accepted; a
    /// length mismatch is rejected before the module sees it.
    pub fn load(&mut self, state: &SerializedState) -> HostResult<()> {
        self.capacity()?;
        let size = self.module.save_size()?;
        if state.len() != size {
            return Err(HostError::SaveSizeMismatch {
                expected: size,
                actual: state.len(),
            });
        }
        if size > 0 {
            let ptr = self.module.save_memory()?;
            MemoryViewMut::new(&mut self.module, ptr, size)?.copy_from(state.as_bytes())?;
        }
        self.module.load()
    }

    /// Rasterize at `width x height` and return a view of the pixels
    pub fn render(&mut self, width: u32, height: u32) -> HostResult<PixelBuffer<'_, R>> {
        let capacity = self.capacity()?;
        let pixels = width as usize * height as usize;
        if pixels > capacity.max_canvas_pixels {
            return Err(HostError::CanvasTooLarge {
                pixels,
                max: capacity.max_canvas_pixels,
            });
        }
        self.module.render(width as usize, height as usize)?;
        let ptr = self.module.canvas_memory()?;
        let view = MemoryView::new(&self.module, ptr, pixels * BYTES_PER_PIXEL)?;
        Ok(PixelBuffer {
            view,
            width,
            height,
        })
    }

    pub fn reset(&mut self) -> HostResult<()> {
        self.module.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::native::CounterChamber;

    fn chamber() -> Chamber<CounterChamber> {
        let mut chamber = Chamber::new(CounterChamber::new());
        chamber.init(16, 300 * 300).unwrap();
        chamber
    }

    #[test]
    fn test_init_exactly_once() {
        let mut chamber = chamber();
        assert_eq!(chamber.init(16, 100), Err(HostError::AlreadyInitialized));
    }

    #[test]
    fn test_render_before_init() {
        let mut chamber = Chamber::new(CounterChamber::new());
        assert!(matches!(
            chamber.render(10, 10),
            Err(HostError::NotInitialized)
        ));
        assert_eq!(chamber.save(), Err(HostError::NotInitialized));
    }

    #[test]
    fn test_save_load_round_trip_renders_identical_pixels() {
        let mut a = chamber();
        a.module_mut().set_count(137);
        let expected = a.render(300, 300).unwrap().to_rgba();

        let mut b = chamber();
        let before = b.render(300, 300).unwrap().to_rgba();
        assert_ne!(before, expected);

        let state = a.save().unwrap();
        b.load(&state).unwrap();
        assert_eq!(b.render(300, 300).unwrap().to_rgba(), expected);
    }

    #[test]
    fn test_load_rejects_wrong_size() {
        let mut chamber = chamber();
        let err = chamber.load(&SerializedState::from(vec![1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            HostError::SaveSizeMismatch {
                expected: 1,
                actual: 3
            }
        );
    }

    #[test]
    fn test_render_respects_pixel_capacity() {
        let mut chamber = chamber();
        assert_eq!(
            chamber.render(301, 300).err(),
            Some(HostError::CanvasTooLarge {
                pixels: 301 * 300,
                max: 300 * 300
            })
        );
        let pixels = chamber.render(300, 150).unwrap();
        assert_eq!(pixels.to_rgba().len(), 300 * 150 * 4);
    }
}
