//! dmd-sim: a simulated pinball dot-matrix display
//!
//! Opens a window the size of the expanded output, loads the layer stack in
//! the background and, once the user clicks or presses Space/Enter, runs one
//! tick per display frame.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use instant::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{Key as WinitKey, NamedKey};
use winit::window::{Window, WindowBuilder};

use dmd_sim::asset::AssetSlot;
use dmd_sim::compositor::Compositor;
use dmd_sim::config::{Backend, DmdConfig};
use dmd_sim::dispatch::{CpuDispatcher, Dispatcher, GpuDispatcher};
use dmd_sim::gpu::GpuContext;
use dmd_sim::present::Presenter;
use dmd_sim::tick::{TickLoop, TickOutcome};

const TITLE: &str = "DMD";

/// Simulator state
struct Simulator {
    config: DmdConfig,
    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
    ticks: Option<TickLoop>,
    running: bool,
}

impl Simulator {
    fn new(config: DmdConfig) -> Self {
        Self {
            config,
            window: None,
            presenter: None,
            ticks: None,
            running: false,
        }
    }

    /// Device, presenter, dispatcher and layer loads for a fresh window.
    fn init(&mut self, window: Arc<Window>) -> Result<()> {
        let layout = self.config.layout()?;
        let size = window.inner_size();

        let instance = GpuContext::instance();
        let surface = instance.create_surface(window.clone())?;
        let ctx = GpuContext::new(&instance, Some(&surface))?;

        let presenter = Presenter::new(
            &ctx,
            surface,
            size.width,
            size.height,
            layout.output_width(),
            layout.output_height(),
        )?;

        let kernel = self.config.kernel()?;
        let dispatcher: Box<dyn Dispatcher> = match self.config.backend {
            Backend::Gpu => Box::new(GpuDispatcher::new(
                &ctx,
                kernel,
                self.config.gap_color,
                self.config.dispatch_timeout(),
            )?),
            Backend::Cpu => Box::new(CpuDispatcher::new(kernel, self.config.gap_color)),
        };
        info!(
            "Expanding {}x{} -> {}x{} on {}",
            layout.logical_width(),
            layout.logical_height(),
            layout.output_width(),
            layout.output_height(),
            dispatcher.name()
        );

        let layers = self
            .config
            .layers
            .iter()
            .map(|layer| {
                AssetSlot::spawn(
                    layer.path.clone(),
                    layer.kind,
                    layout.logical_width(),
                    layout.logical_height(),
                )
            })
            .collect();
        let compositor = Compositor::new(
            layout.logical_width(),
            layout.logical_height(),
            layers,
            self.config.asset_policy,
        );

        self.presenter = Some(presenter);
        self.ticks = Some(TickLoop::new(compositor, dispatcher, self.config.warmup_ticks));
        self.window = Some(window);
        Ok(())
    }

    /// The user gesture that starts playback.
    fn trigger(&mut self) {
        if self.running {
            return;
        }
        if let Some(ticks) = &mut self.ticks {
            ticks.start(Instant::now());
            self.running = true;
            info!("Playback started");
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
    }

    fn tick(&mut self) {
        let (Some(ticks), Some(presenter)) = (&mut self.ticks, &mut self.presenter) else {
            return;
        };

        match ticks.tick(Instant::now(), |frame| presenter.present(frame)) {
            TickOutcome::Presented(rate) => {
                if let Some(window) = &self.window {
                    window.set_title(&format!("{} - {}", TITLE, rate));
                }
            }
            TickOutcome::AssetsPending => debug!("Tick held for assets"),
            // Already logged; the previous frame stays up
            TickOutcome::Failed(_) | TickOutcome::NotShown => {}
        }
    }

    fn redisplay(&mut self) {
        let (Some(ticks), Some(presenter)) = (&self.ticks, &mut self.presenter) else {
            return;
        };
        if let Some(frame) = ticks.last_frame() {
            if let Err(e) = presenter.present(frame) {
                warn!("Re-present failed: {}", e);
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(ticks) = &self.ticks {
            ticks.shutdown();
        }
        self.running = false;
    }
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = DmdConfig::load(config_path.as_deref())?;

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level()?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Bad geometry is fatal before any window opens
    let layout = config.layout()?;

    println!(
        r#"
    +=======================================+
    |        D M D   S I M U L A T O R      |
    |      click or press Space to start    |
    +=======================================+
    "#
    );

    let event_loop = EventLoop::new()?;
    let mut app = Simulator::new(config);

    event_loop.run(move |event, elwt| {
        match event {
            Event::Resumed => {
                if app.window.is_some() {
                    return;
                }

                let window = match WindowBuilder::new()
                    .with_title(TITLE)
                    .with_inner_size(winit::dpi::PhysicalSize::new(
                        layout.output_width(),
                        layout.output_height(),
                    ))
                    .build(elwt)
                {
                    Ok(window) => Arc::new(window),
                    Err(e) => {
                        error!("Failed to create window: {}", e);
                        elwt.exit();
                        return;
                    }
                };

                match app.init(window) {
                    Ok(()) => info!("Window and pipeline initialized"),
                    Err(e) => {
                        error!("Failed to initialize: {:#}", e);
                        elwt.exit();
                    }
                }
            }

            Event::WindowEvent { event: window_event, .. } => match window_event {
                WindowEvent::CloseRequested => {
                    info!("Close requested");
                    app.shutdown();
                    elwt.exit();
                }

                WindowEvent::Resized(new_size) => {
                    if let Some(presenter) = &mut app.presenter {
                        presenter.resize(new_size.width, new_size.height);
                    }
                    app.redisplay();
                }

                WindowEvent::MouseInput {
                    state: ElementState::Pressed,
                    button: MouseButton::Left,
                    ..
                } => app.trigger(),

                WindowEvent::KeyboardInput { event: key_event, .. }
                    if key_event.state == ElementState::Pressed =>
                {
                    match key_event.logical_key {
                        WinitKey::Named(NamedKey::Space | NamedKey::Enter) => app.trigger(),
                        WinitKey::Named(NamedKey::Escape) => {
                            app.shutdown();
                            elwt.exit();
                        }
                        _ => {}
                    }
                }

                WindowEvent::RedrawRequested => {
                    if app.running {
                        app.tick();
                    } else {
                        app.redisplay();
                    }
                }

                _ => {}
            },

            Event::AboutToWait => {
                // One tick per display frame once started
                if app.running {
                    if let Some(window) = &app.window {
                        window.request_redraw();
                    }
                }
            }

            _ => {}
        }
    })?;

    Ok(())
}
