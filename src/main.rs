//! Chamber Host entry point
//!
//! Web: the local page (upload a chamber binary and run it against the
//! physics module) or the grid page (server-driven multi-chamber view),
//! picked by which elements the page contains.
//! Native: headless run of the split pipeline and the chamber grid against
//! the reference modules.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
mod web_app {
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::{JsFuture, spawn_local};
    use web_sys::{Document, Element, File, HtmlCanvasElement, HtmlInputElement};

    use chamber_host::compositor::canvas2d::Canvas2d;
    use chamber_host::compositor::{Canvas, ToroidalCompositor};
    use chamber_host::module::PhysicsModule;
    use chamber_host::module::wasm::{SharedHooks, WasmChamber, WasmChamberFactory, WasmSimulation};
    use chamber_host::pipeline::{DateClock, TickOutcome};
    use chamber_host::registry::ChamberRegistry;
    use chamber_host::remote::RemoteClient;
    use chamber_host::{
        Chamber, HostError, HostResult, Settings, ShutdownFlag, SplitRenderPipeline, StateBridge,
    };

    type LocalPipeline = SplitRenderPipeline<WasmSimulation, WasmChamber, DateClock>;

    fn page_document() -> HostResult<Document> {
        web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| HostError::Module("no document".into()))
    }

    /// Run `f` after `ms` milliseconds
    fn set_timeout(ms: u32, f: impl FnOnce() + 'static) {
        let Some(window) = web_sys::window() else {
            return;
        };
        let closure = Closure::once(f);
        let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            ms as i32,
        );
        closure.forget();
    }

    async fn sleep(ms: u32) {
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            if let Some(window) = web_sys::window() {
                let _ = window
                    .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms as i32);
            }
        });
        let _ = JsFuture::from(promise).await;
    }

    /// Show an error under `parent` without stopping anything else
    fn report_error(parent: &Element, err: &HostError) {
        log::error!("{}", err);
        if let Ok(document) = page_document() {
            if let Ok(div) = document.create_element("div") {
                div.set_text_content(Some(&err.to_string()));
                let _ = div.set_attribute("class", "error");
                let _ = parent.append_child(&div);
            }
        }
    }

    // === Local page ===

    /// Local page state; DOM handlers share it through `Rc<RefCell<_>>`
    struct LocalSession {
        settings: Settings,
        client: RemoteClient,
        pipeline: Option<Rc<RefCell<LocalPipeline>>>,
        shutdown: Option<ShutdownFlag>,
    }

    impl LocalSession {
        /// Stop the running pipeline; its next tick observes the flag and exits
        fn stop(&mut self) {
            if let Some(flag) = self.shutdown.take() {
                flag.set();
            }
            self.pipeline = None;
        }

        fn with_physics(&self, f: impl FnOnce(&mut WasmSimulation) -> HostResult<()>) {
            if let Some(pipeline) = &self.pipeline {
                if let Err(e) = f(pipeline.borrow_mut().physics_mut()) {
                    log::warn!("physics call failed: {}", e);
                }
            }
        }
    }

    fn schedule_local_tick(
        pipeline: Rc<RefCell<LocalPipeline>>,
        canvas: Rc<RefCell<Canvas2d>>,
        interval_ms: u32,
    ) {
        set_timeout(interval_ms, move || {
            let outcome = pipeline.borrow_mut().tick(&mut *canvas.borrow_mut());
            match outcome {
                Ok(TickOutcome::Rendered { .. }) => {
                    schedule_local_tick(pipeline, canvas, interval_ms)
                }
                Ok(TickOutcome::Stopped) => log::info!("local pipeline stopped"),
                Err(e) => log::error!("tick failed, pipeline halted: {}", e),
            }
        });
    }

    async fn start_local(
        session: &Rc<RefCell<LocalSession>>,
        parent: &Element,
        file: File,
    ) -> HostResult<()> {
        let (settings, client) = {
            let mut s = session.borrow_mut();
            s.stop();
            (s.settings.clone(), s.client.clone())
        };
        let document = page_document()?;

        let buffer = JsFuture::from(file.array_buffer()).await?;
        let bytes = js_sys::Uint8Array::new(&buffer).to_vec();
        let physics_chamber = Chamber::new(WasmChamber::instantiate(&bytes).await?).into_shared();
        let hooks: SharedHooks = Rc::new(RefCell::new(StateBridge::new(physics_chamber.clone())));

        let sim_bytes = client.simulation_binary().await?;
        let mut simulation = WasmSimulation::instantiate(&sim_bytes, hooks).await?;
        let chamber_height = simulation.chamber_height()?;
        simulation.init(0, settings.max_canvas_pixels(chamber_height))?;

        if let Some(spinner) = document
            .get_element_by_id("num_balls")
            .and_then(|el| el.dyn_into::<HtmlInputElement>().ok())
        {
            spinner.set_value(&simulation.num_balls()?.to_string());
        }

        let tile = settings.tile(chamber_height);
        let canvas = Canvas2d::create(&document, tile.width, tile.height)?;
        parent.append_child(canvas.element())?;

        let pipeline = if settings.split_pipeline {
            let render = Chamber::new(WasmChamber::instantiate(&bytes).await?);
            SplitRenderPipeline::split(simulation, physics_chamber, render, DateClock, settings.canvas_width)?
        } else {
            SplitRenderPipeline::shared(simulation, physics_chamber, DateClock, settings.canvas_width)?
        };
        let pipeline = pipeline.with_compositor(ToroidalCompositor::new(settings.draw_style));

        let pipeline = Rc::new(RefCell::new(pipeline));
        {
            let mut s = session.borrow_mut();
            s.shutdown = Some(pipeline.borrow().shutdown_flag());
            s.pipeline = Some(pipeline.clone());
        }
        schedule_local_tick(
            pipeline,
            Rc::new(RefCell::new(canvas)),
            settings.tick_interval_ms,
        );
        Ok(())
    }

    fn setup_local_page(document: &Document, input: HtmlInputElement, settings: Settings) {
        let session = Rc::new(RefCell::new(LocalSession {
            client: RemoteClient::new(settings.server_url.clone()),
            settings,
            pipeline: None,
            shutdown: None,
        }));

        // Upload: replace whatever is running
        {
            let session = session.clone();
            let closure = Closure::<dyn FnMut(_)>::new(move |event: web_sys::Event| {
                let Some(file) = event
                    .target()
                    .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
                    .and_then(|input| input.files())
                    .and_then(|files| files.get(0))
                else {
                    return;
                };
                let Ok(document) = page_document() else {
                    return;
                };
                let Some(parent) = document.get_element_by_id("demo") else {
                    log::error!("no #demo element");
                    return;
                };
                parent.set_inner_html("");
                if let Ok(div) = document.create_element("div") {
                    let now = js_sys::Date::new_0().to_string();
                    div.set_text_content(Some(&format!("Last update: {}", String::from(now))));
                    let _ = parent.append_child(&div);
                }

                let session = session.clone();
                spawn_local(async move {
                    if let Err(e) = start_local(&session, &parent, file).await {
                        report_error(&parent, &e);
                    }
                });
            });
            let _ = input.add_event_listener_with_callback("change", closure.as_ref().unchecked_ref());
            closure.forget();
        }

        if let Some(spinner) = document
            .get_element_by_id("num_balls")
            .and_then(|el| el.dyn_into::<HtmlInputElement>().ok())
        {
            let session = session.clone();
            let closure = Closure::<dyn FnMut(_)>::new(move |event: web_sys::Event| {
                let Some(value) = event
                    .target()
                    .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
                    .and_then(|input| input.value().parse::<usize>().ok())
                else {
                    return;
                };
                session.borrow().with_physics(|p| p.set_num_balls(value));
            });
            let _ = spinner.add_event_listener_with_callback("change", closure.as_ref().unchecked_ref());
            closure.forget();
        }

        // Pipeline mode applies to the next upload
        if let Some(toggle) = document
            .get_element_by_id("split_pipeline")
            .and_then(|el| el.dyn_into::<HtmlInputElement>().ok())
        {
            toggle.set_checked(session.borrow().settings.split_pipeline);
            let session = session.clone();
            let closure = Closure::<dyn FnMut(_)>::new(move |event: web_sys::Event| {
                let Some(checked) = event
                    .target()
                    .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
                    .map(|input| input.checked())
                else {
                    return;
                };
                let mut s = session.borrow_mut();
                s.settings.split_pipeline = checked;
                s.settings.save();
            });
            let _ = toggle.add_event_listener_with_callback("change", closure.as_ref().unchecked_ref());
            closure.forget();
        }

        if let Some(btn) = document.get_element_by_id("reset") {
            let closure = Closure::<dyn FnMut(_)>::new(move |_event: web_sys::MouseEvent| {
                session.borrow().with_physics(|p| p.reset());
            });
            let _ = btn.add_event_listener_with_callback("click", closure.as_ref().unchecked_ref());
            closure.forget();
        }
    }

    // === Grid page ===

    /// Grid page state
    struct GridSession {
        settings: Settings,
        client: RemoteClient,
        registry: ChamberRegistry<WasmChamberFactory>,
        chamber_ids: RefCell<Vec<usize>>,
        canvas: RefCell<Canvas2d>,
        shutdown: ShutdownFlag,
    }

    /// Long-poll snapshots into the registry's buffer
    async fn poll_snapshots(session: Rc<GridSession>) {
        while !session.shutdown.is_set() {
            match session
                .client
                .simulation_state(session.registry.last_step())
                .await
            {
                Ok(snapshot) => {
                    session.registry.push_snapshot(snapshot);
                }
                Err(e) => log::warn!("snapshot poll failed: {}", e),
            }
            sleep(session.settings.poll_interval_ms).await;
        }
    }

    fn schedule_grid_render(session: Rc<GridSession>) {
        let interval = session.settings.tick_interval_ms;
        set_timeout(interval, move || {
            if session.shutdown.is_set() {
                return;
            }
            {
                let mut canvas = session.canvas.borrow_mut();
                let size = session.registry.canvas_size();
                if canvas.size() != size {
                    canvas.resize(size.width, size.height);
                }
                session.registry.render(&mut *canvas);
            }
            schedule_grid_render(session);
        });
    }

    async fn change_chambers_per_row(session: Rc<GridSession>, per_row: usize) -> HostResult<()> {
        session.client.set_chambers_per_row(per_row).await?;
        let ids = session.chamber_ids.borrow().clone();
        session.registry.relayout(&ids, per_row).await
    }

    async fn start_grid(canvas: HtmlCanvasElement, settings: Settings) -> HostResult<()> {
        let document = page_document()?;
        let client = RemoteClient::new(settings.server_url.clone());
        let info = client.init_info().await?;
        log::info!(
            "{} chambers, {} per row, height {}",
            info.chamber_ids.len(),
            info.chambers_per_row,
            info.chamber_height
        );

        let registry = ChamberRegistry::new(
            WasmChamberFactory::new(client.clone()),
            settings.tile(info.chamber_height),
            settings.max_balls,
            settings.snapshot_buffer,
        );
        registry
            .relayout(&info.chamber_ids, info.chambers_per_row)
            .await?;

        let session = Rc::new(GridSession {
            settings,
            client,
            registry,
            chamber_ids: RefCell::new(info.chamber_ids),
            canvas: RefCell::new(Canvas2d::new(canvas)?),
            shutdown: ShutdownFlag::new(),
        });

        if let Some(input) = document
            .get_element_by_id("chambers_per_row")
            .and_then(|el| el.dyn_into::<HtmlInputElement>().ok())
        {
            input.set_value(&info.chambers_per_row.to_string());
            let session = session.clone();
            let closure = Closure::<dyn FnMut(_)>::new(move |event: web_sys::Event| {
                let Some(per_row) = event
                    .target()
                    .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
                    .and_then(|input| input.value().parse::<usize>().ok())
                else {
                    return;
                };
                let session = session.clone();
                spawn_local(async move {
                    if let Err(e) = change_chambers_per_row(session, per_row).await {
                        log::error!("relayout failed: {}", e);
                    }
                });
            });
            let _ = input.add_event_listener_with_callback("change", closure.as_ref().unchecked_ref());
            closure.forget();
        }

        // Stop polling and rendering when the page goes away
        if let Some(window) = web_sys::window() {
            let shutdown = session.shutdown.clone();
            let closure = Closure::<dyn FnMut(_)>::new(move |_event: web_sys::Event| {
                log::info!("grid shutting down");
                shutdown.set();
            });
            let _ = window.add_event_listener_with_callback("pagehide", closure.as_ref().unchecked_ref());
            closure.forget();
        }

        spawn_local(poll_snapshots(session.clone()));
        schedule_grid_render(session);
        Ok(())
    }

    pub async fn run() {
        console_error_panic_hook::set_once();
        console_log::init_with_level(log::Level::Info).expect("Failed to init logger");

        log::info!("Chamber Host starting...");
        let settings = Settings::load();

        let document = match page_document() {
            Ok(document) => document,
            Err(e) => {
                log::error!("{}", e);
                return;
            }
        };

        if let Some(input) = document
            .get_element_by_id("wasm_input")
            .and_then(|el| el.dyn_into::<HtmlInputElement>().ok())
        {
            setup_local_page(&document, input, settings);
            log::info!("Local page ready");
        } else if let Some(canvas) = document
            .get_element_by_id("canvas")
            .and_then(|el| el.dyn_into::<HtmlCanvasElement>().ok())
        {
            if let Err(e) = start_grid(canvas, settings).await {
                match document.body() {
                    Some(body) => report_error(&body, &e),
                    None => log::error!("{}", e),
                }
            }
        } else {
            log::warn!("Page has neither #wasm_input nor #canvas");
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn wasm_main() {
    web_app::run().await;
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is wasm_main, this is just to satisfy the compiler
}

#[cfg(not(target_arch = "wasm32"))]
mod headless {
    use chamber_host::compositor::{CanvasSize, PixelCanvas, ToroidalCompositor};
    use chamber_host::module::native::{CounterChamber, CounterFactory, NativeSimulation};
    use chamber_host::module::{Ball, PhysicsModule};
    use chamber_host::pipeline::{ManualClock, TickOutcome};
    use chamber_host::registry::ChamberRegistry;
    use chamber_host::remote::{ChamberSnapshot, SimulationSnapshot};
    use chamber_host::{Chamber, HostResult, Settings, SplitRenderPipeline, StateBridge};

    /// Two simulated seconds of the split pipeline on a software canvas
    pub fn run_pipeline(settings: &Settings) -> HostResult<()> {
        let chamber = Chamber::new(CounterChamber::new()).into_shared();
        let mut simulation = NativeSimulation::new(StateBridge::new(chamber.clone()), 1.0, 42);
        let tile = settings.tile(simulation.chamber_height()?);
        simulation.init(0, tile.pixels())?;

        let clock = ManualClock::new();
        let mut pipeline = SplitRenderPipeline::split(
            simulation,
            chamber,
            Chamber::new(CounterChamber::new()),
            clock.clone(),
            settings.canvas_width,
        )?
        .with_compositor(ToroidalCompositor::new(settings.draw_style));
        let mut canvas = PixelCanvas::new(tile.width, tile.height);

        let dt = f64::from(settings.tick_interval_ms) / 1000.0;
        for frame in 0..125 {
            clock.advance(dt);
            if frame == 60 {
                pipeline.physics_mut().set_num_balls(25)?;
            }
            if let TickOutcome::Rendered { elapsed, balls } = pipeline.tick(&mut canvas)? {
                if frame % 25 == 0 {
                    log::info!("frame {}: t={:.2}s, {} balls", frame, elapsed, balls);
                }
            }
        }

        pipeline.shutdown_flag().set();
        let outcome = pipeline.tick(&mut canvas)?;
        log::info!("after shutdown: {:?}, {} frames drawn", outcome, pipeline.frames());
        Ok(())
    }

    /// Grid of counter chambers fed by synthetic snapshots
    pub async fn run_grid(settings: &Settings) -> HostResult<()> {
        let tile = settings.tile(1.0);
        let registry = ChamberRegistry::new(CounterFactory, tile, settings.max_balls, settings.snapshot_buffer);
        registry.relayout(&[0, 1, 2, 3, 4], 3).await?;

        for step in 1..=3u64 {
            let chambers = (0..5)
                .map(|id| ChamberSnapshot {
                    balls: (0..=id)
                        .map(|i| Ball::new(0.15 * i as f32 + 0.1, 0.1 * step as f32, 0.02))
                        .collect(),
                    state: vec![(id + 1) as u8].into(),
                })
                .collect();
            registry.push_snapshot(SimulationSnapshot {
                num_steps_taken: step * 120,
                chambers,
                cell_balls: vec![Vec::new(); 5]
                    .into_iter()
                    .chain([vec![Ball::new(0.5, 0.5, 0.05)]])
                    .collect(),
            });
        }

        let size: CanvasSize = registry.canvas_size();
        let mut canvas = PixelCanvas::new(size.width, size.height);
        registry.set_offset(tile.width as i32 / 2, 0);
        let report = registry.render(&mut canvas);
        log::info!(
            "grid {}x{}: {} slots rendered, {} failed",
            size.width,
            size.height,
            report.rendered,
            report.failed.len()
        );

        registry.relayout(&[0, 1, 2, 3, 4], 5).await?;
        log::info!("relaid out to {:?}", registry.canvas_size());
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    log::info!("Chamber Host (native) starting...");
    log::info!("Browser pages need the wasm build; running headless demos");

    let settings = chamber_host::Settings::load();
    headless::run_pipeline(&settings)?;

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(headless::run_grid(&settings))?;
    Ok(())
}
