//! WebAssembly module bindings
//!
//! Chamber and simulation binaries are instantiated with `WebAssembly.instantiate`
//! and driven through their exports. Memory is always read through a fresh
//! `Uint8Array` over the current `memory.buffer`: growth detaches older buffers.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect, Uint8Array, WebAssembly};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use super::{ChamberHooks, LinearMemory, PhysicsModule, RenderModule, memory};
use crate::chamber::Chamber;
use crate::error::{HostError, HostResult};
use crate::registry::ChamberFactory;
use crate::remote::RemoteClient;

/// `WebAssembly.Memory` of an instance
#[derive(Debug, Clone)]
pub struct WasmMemory(WebAssembly::Memory);

impl WasmMemory {
    fn bytes(&self) -> Uint8Array {
        Uint8Array::new(&self.0.buffer())
    }
}

impl LinearMemory for WasmMemory {
    fn size(&self) -> usize {
        self.bytes().length() as usize
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        let end = offset + dst.len();
        self.bytes()
            .subarray(offset as u32, end as u32)
            .copy_to(dst);
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) {
        let end = offset + src.len();
        self.bytes()
            .subarray(offset as u32, end as u32)
            .copy_from(src);
    }
}

/// Slot for an instance's memory, filled once instantiation finishes.
/// Imports are created before the instance exists.
type MemoryCell = Rc<RefCell<Option<WasmMemory>>>;

fn instance_memory(cell: &MemoryCell) -> HostResult<WasmMemory> {
    cell.borrow()
        .clone()
        .ok_or_else(|| HostError::Module("memory accessed during instantiation".into()))
}

fn to_js(err: HostError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Export table of an instance
struct Exports(Object);

impl Exports {
    fn get(&self, name: &str) -> HostResult<JsValue> {
        let value = Reflect::get(&self.0, &JsValue::from_str(name))?;
        if value.is_undefined() {
            return Err(HostError::MissingExport(name.to_string()));
        }
        Ok(value)
    }

    fn memory(&self) -> HostResult<WasmMemory> {
        self.get("memory")?
            .dyn_into::<WebAssembly::Memory>()
            .map(WasmMemory)
            .map_err(|_| HostError::MissingExport("memory".into()))
    }

    fn call(&self, name: &str, args: &[JsValue]) -> HostResult<JsValue> {
        let func: Function = self
            .get(name)?
            .dyn_into()
            .map_err(|_| HostError::MissingExport(name.to_string()))?;
        let args: Array = args.iter().collect();
        func.apply(&JsValue::NULL, &args)
            .map_err(|e| HostError::Module(format!("{}: {:?}", name, e)))
    }

    fn call_usize(&self, name: &str, args: &[JsValue]) -> HostResult<usize> {
        let value = self.call(name, args)?;
        value
            .as_f64()
            .map(|v| v as usize)
            .ok_or_else(|| HostError::Module(format!("{} returned {:?}", name, value)))
    }

    fn call_f64(&self, name: &str, args: &[JsValue]) -> HostResult<f64> {
        let value = self.call(name, args)?;
        value
            .as_f64()
            .ok_or_else(|| HostError::Module(format!("{} returned {:?}", name, value)))
    }
}

fn num(value: usize) -> JsValue {
    JsValue::from_f64(value as f64)
}

/// `logWasm(ptr, len)`: UTF-8 text in the calling module's memory
fn log_import(cell: MemoryCell) -> Closure<dyn FnMut(u32, u32)> {
    Closure::new(move |ptr: u32, len: u32| {
        let text = instance_memory(&cell)
            .and_then(|mem| memory::MemoryView::new(&mem, ptr as usize, len as usize).map(|v| v.to_vec()));
        match text {
            Ok(bytes) => log::info!(target: "chamber_host::module", "{}", String::from_utf8_lossy(&bytes)),
            Err(e) => log::warn!("logWasm: {}", e),
        }
    })
}

async fn instantiate(bytes: &[u8], env: &Object) -> HostResult<Exports> {
    let imports = Object::new();
    Reflect::set(&imports, &JsValue::from_str("env"), env)?;
    let result = JsFuture::from(WebAssembly::instantiate_buffer(bytes, &imports))
        .await
        .map_err(|e| HostError::Module(format!("instantiate: {:?}", e)))?;
    let instance: WebAssembly::Instance = Reflect::get(&result, &JsValue::from_str("instance"))?
        .dyn_into()
        .map_err(|_| HostError::Module("instantiate returned no instance".into()))?;
    Ok(Exports(instance.exports()))
}

/// Render module ("chamber") instance
pub struct WasmChamber {
    exports: Exports,
    memory: WasmMemory,
    _log: Closure<dyn FnMut(u32, u32)>,
}

impl WasmChamber {
    pub async fn instantiate(bytes: &[u8]) -> HostResult<Self> {
        let cell: MemoryCell = Rc::new(RefCell::new(None));
        let log = log_import(cell.clone());
        let env = Object::new();
        Reflect::set(&env, &JsValue::from_str("logWasm"), log.as_ref())?;

        let exports = instantiate(bytes, &env).await?;
        let memory = exports.memory()?;
        *cell.borrow_mut() = Some(memory.clone());
        log::debug!("chamber instantiated, {} bytes of memory", memory.size());
        Ok(Self {
            exports,
            memory,
            _log: log,
        })
    }
}

impl LinearMemory for WasmChamber {
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

impl RenderModule for WasmChamber {
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        self.exports
            .call("init", &[num(max_balls), num(max_canvas_pixels)])?;
        Ok(())
    }

    fn step(&mut self, num_balls: usize, delta: f32) -> HostResult<()> {
        self.exports
            .call("step", &[num(num_balls), JsValue::from_f64(f64::from(delta))])?;
        Ok(())
    }

    fn render(&mut self, width: usize, height: usize) -> HostResult<()> {
        self.exports.call("render", &[num(width), num(height)])?;
        Ok(())
    }

    fn save(&mut self) -> HostResult<()> {
        self.exports.call("save", &[])?;
        Ok(())
    }

    fn load(&mut self) -> HostResult<()> {
        self.exports.call("load", &[])?;
        Ok(())
    }

    fn reset(&mut self) -> HostResult<()> {
        // Chambers without a reset export simply keep their state
        match self.exports.call("reset", &[]) {
            Err(HostError::MissingExport(_)) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn balls_memory(&mut self) -> HostResult<usize> {
        self.exports.call_usize("ballsMemory", &[])
    }

    fn canvas_memory(&mut self) -> HostResult<usize> {
        self.exports.call_usize("canvasMemory", &[])
    }

    fn save_memory(&mut self) -> HostResult<usize> {
        self.exports.call_usize("saveMemory", &[])
    }

    fn save_size(&mut self) -> HostResult<usize> {
        self.exports.call_usize("saveSize", &[])
    }
}

/// Hooks shared between the simulation's imports and whoever owns them
pub type SharedHooks = Rc<RefCell<dyn ChamberHooks>>;

/// Physics module instance wired to a chamber through `ChamberHooks`
pub struct WasmSimulation {
    exports: Exports,
    memory: WasmMemory,
    _log: Closure<dyn FnMut(u32, u32)>,
    _init_chamber: Closure<dyn FnMut(u32, u32) -> Result<(), JsValue>>,
    _step_chamber: Closure<dyn FnMut(u32, u32, u32, f32) -> Result<(), JsValue>>,
}

impl WasmSimulation {
    pub async fn instantiate(bytes: &[u8], hooks: SharedHooks) -> HostResult<Self> {
        let cell: MemoryCell = Rc::new(RefCell::new(None));
        let log = log_import(cell.clone());

        let init_hooks = hooks.clone();
        let init_chamber = Closure::<dyn FnMut(u32, u32) -> Result<(), JsValue>>::new(move |max_balls: u32, max_pixels: u32| {
            init_hooks
                .borrow_mut()
                .init_chamber(max_balls as usize, max_pixels as usize)
                .map_err(to_js)
        });

        let step_cell = cell.clone();
        let step_chamber = Closure::<dyn FnMut(u32, u32, u32, f32) -> Result<(), JsValue>>::new(
            move |balls_ptr: u32, byte_len: u32, num_balls: u32, delta: f32| {
                let mut source = instance_memory(&step_cell).map_err(to_js)?;
                hooks
                    .borrow_mut()
                    .step_chamber(
                        &mut source,
                        balls_ptr as usize,
                        byte_len as usize,
                        num_balls as usize,
                        delta,
                    )
                    .map_err(to_js)
            },
        );

        let env = Object::new();
        Reflect::set(&env, &JsValue::from_str("logWasm"), log.as_ref())?;
        Reflect::set(&env, &JsValue::from_str("initChamber"), init_chamber.as_ref())?;
        Reflect::set(&env, &JsValue::from_str("stepChamber"), step_chamber.as_ref())?;

        let exports = instantiate(bytes, &env).await?;
        let memory = exports.memory()?;
        *cell.borrow_mut() = Some(memory.clone());
        log::debug!("simulation instantiated, {} bytes of memory", memory.size());
        Ok(Self {
            exports,
            memory,
            _log: log,
            _init_chamber: init_chamber,
            _step_chamber: step_chamber,
        })
    }
}

impl LinearMemory for WasmSimulation {
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

impl PhysicsModule for WasmSimulation {
    fn init(&mut self, max_balls: usize, max_canvas_pixels: usize) -> HostResult<()> {
        self.exports
            .call("init", &[num(max_balls), num(max_canvas_pixels)])?;
        Ok(())
    }

    fn step(&mut self, count: usize, delta: f32) -> HostResult<()> {
        self.exports
            .call("step", &[num(count), JsValue::from_f64(f64::from(delta))])?;
        Ok(())
    }

    fn step_until(&mut self, time: f64) -> HostResult<()> {
        self.exports.call("stepUntil", &[JsValue::from_f64(time)])?;
        Ok(())
    }

    fn num_balls(&mut self) -> HostResult<usize> {
        self.exports.call_usize("numBalls", &[])
    }

    fn set_num_balls(&mut self, num_balls: usize) -> HostResult<()> {
        self.exports.call("setNumBalls", &[num(num_balls)])?;
        Ok(())
    }

    fn chamber_height(&mut self) -> HostResult<f32> {
        Ok(self.exports.call_f64("chamberHeight", &[])? as f32)
    }

    fn state(&mut self) -> HostResult<usize> {
        self.exports.call_usize("state", &[])
    }

    fn reset(&mut self) -> HostResult<()> {
        self.exports.call("reset", &[])?;
        Ok(())
    }

    fn set_speed(&mut self, speed: f32) -> HostResult<()> {
        self.exports
            .call("setSpeed", &[JsValue::from_f64(f64::from(speed))])?;
        Ok(())
    }
}

/// Fetches chamber binaries from the server for grid relayout
pub struct WasmChamberFactory {
    client: RemoteClient,
}

impl WasmChamberFactory {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

impl ChamberFactory for WasmChamberFactory {
    type Module = WasmChamber;

    async fn instantiate(&self, id: usize) -> HostResult<Chamber<WasmChamber>> {
        let bytes = self.client.chamber_binary(id).await?;
        let module = WasmChamber::instantiate(&bytes).await?;
        Ok(Chamber::new(module))
    }
}
