//! lumen demo - drives the frame loop against a real window.
//!
//! Every frame clears the output render pass, uploads an orbiting camera and
//! one light, and presents. Resizes and stale surfaces rebuild the surface
//! chain; Escape or closing the window shuts down cleanly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use lumen_core::{GraphicsConfig, Timer};
use lumen_platform::{SurfaceSource, Window};
use lumen_renderer::{
    CameraMatrices, FrameStatus, GraphicsDevice, RecreateStatus, SceneLight,
};
use lumen_rhi::command::{full_scissor, full_viewport};
use lumen_rhi::render_pass::clear_values;
use lumen_rhi::{RhiError, RhiResult, Subsystem};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Graphics configuration file (TOML). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit after presenting this many frames.
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,
}

struct App {
    config: GraphicsConfig,
    frame_limit: Option<u64>,
    initial_size: (u32, u32),

    // Dropped before the window it presents to.
    graphics: Option<GraphicsDevice>,
    window: Option<Window>,

    timer: Timer,
    presented: u64,
    needs_recreate: bool,
    shutdown_requested: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: GraphicsConfig, args: &Args) -> Self {
        Self {
            config,
            frame_limit: args.frames,
            initial_size: (args.width, args.height),
            graphics: None,
            window: None,
            timer: Timer::new(),
            presented: 0,
            needs_recreate: false,
            shutdown_requested: false,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.failure = Some(err);
        self.shutdown_requested = true;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.shutdown_requested {
            event_loop.exit();
            return;
        }
        let (Some(window), Some(graphics)) = (self.window.as_ref(), self.graphics.as_mut()) else {
            return;
        };

        if self.needs_recreate {
            match graphics.recreate_surface_chain(window.drawable_extent()) {
                Ok(RecreateStatus::Rebuilt(extent)) => {
                    debug!("Surface chain rebuilt at {}x{}", extent.width, extent.height);
                    self.needs_recreate = false;
                }
                // Minimized: try again on the next resize or redraw.
                Ok(RecreateStatus::Deferred) => return,
                Err(e) if !e.is_fatal() => {
                    debug!("Surface chain recreate postponed: {}", e);
                    return;
                }
                Err(e) => {
                    self.fail(event_loop, anyhow::Error::new(e).context("surface chain recreate"));
                    return;
                }
            }
        }

        let elapsed = self.timer.elapsed().as_secs_f32();
        match render_frame(graphics, window.aspect_ratio(), elapsed) {
            Ok(FrameStatus::Ready(())) => {
                self.presented += 1;
                if let Some(fps) = self.timer.frame() {
                    info!("{:.1} fps ({} frames)", fps, self.presented);
                }
            }
            Ok(FrameStatus::RecreateNeeded) => self.needs_recreate = true,
            Err(e) if !e.is_fatal() => warn!("Frame dropped: {}", e),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("frame loop"));
                return;
            }
        }

        if let Some(limit) = self.frame_limit
            && self.presented >= limit
        {
            info!("Presented {} frames, exiting", self.presented);
            self.shutdown_requested = true;
            event_loop.exit();
        }
    }
}

/// Records a cleared output pass and presents it.
fn render_frame(
    graphics: &mut GraphicsDevice,
    aspect_ratio: f32,
    time: f32,
) -> RhiResult<FrameStatus<()>> {
    let ticket = match graphics.begin_frame()? {
        FrameStatus::Ready(ticket) => ticket,
        FrameStatus::RecreateNeeded => return Ok(FrameStatus::RecreateNeeded),
    };

    let eye = Vec3::new(3.0 * time.sin(), 1.5, 3.0 * time.cos());
    let camera = CameraMatrices::look_at(
        eye,
        Vec3::ZERO,
        45.0_f32.to_radians(),
        aspect_ratio,
        0.1,
        100.0,
    );
    let lights = [SceneLight::new(
        Vec3::new(2.0, 4.0, 2.0),
        10.0,
        Vec3::ONE,
        1.0,
    )];
    graphics.update_scene_uniforms(&camera, &lights)?;

    let pulse = 0.5 + 0.5 * (time * 0.5).sin();
    let clears = clear_values([0.02, 0.02 + 0.1 * pulse, 0.04 + 0.2 * pulse, 1.0]);

    let cmd = graphics.recorder(&ticket)?;
    cmd.begin_render_pass(&ticket.render_pass_begin_info(&clears));
    cmd.set_viewport(&full_viewport(ticket.extent()));
    cmd.set_scissor(&full_scissor(ticket.extent()));
    cmd.end_render_pass();

    graphics.end_frame(ticket)
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.initial_size;
        let window = match Window::new(event_loop, width, height, &self.config.application_name) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("window creation"));
                return;
            }
        };

        match GraphicsDevice::initialize(&self.config, &window) {
            Ok(graphics) => {
                info!("Initialization complete, entering main loop");
                self.graphics = Some(graphics);
                self.window = Some(window);
            }
            Err(RhiError::Loading(e)) => {
                self.fail(
                    event_loop,
                    anyhow::anyhow!("no Vulkan runtime available: {e}"),
                );
            }
            Err(e) => {
                self.fail(
                    event_loop,
                    anyhow::Error::new(e).context("graphics device initialization"),
                );
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown_requested = true;
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                info!("Escape pressed, shutting down");
                self.shutdown_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                self.needs_recreate = true;
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window
            && !self.shutdown_requested
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut graphics) = self.graphics.take() {
            info!(
                "Shutting down after {} frames",
                graphics.frame_number()
            );
            graphics.shutdown();
        }
        self.window = None;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    lumen_core::init_logging();
    info!("Starting lumen");

    let config = match &args.config {
        Some(path) => GraphicsConfig::load(path)
            .with_context(|| format!("loading graphics config {}", path.display()))?,
        None => GraphicsConfig::default(),
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, &args);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
