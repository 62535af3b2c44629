use std::sync::Arc;
use color_eyre::{Report, Result};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::renderer::config::RenderConfig;
use crate::renderer::{FrameOutcome, Renderer};

pub struct App {
    config: RenderConfig,
    renderer: Option<Renderer>,

    // State
    fatal_error: Option<Report>,
    close_requested: bool,
}

impl App {
    const TITLE: &'static str = "spinquad";

    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            renderer: None,
            fatal_error: None,
            close_requested: false,
        }
    }

    /// Runs until the window closes. Returns the error that stopped rendering, if any.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;

        if let Some(renderer) = self.renderer.take() {
            renderer.wait_idle_and_teardown()?;
        }
        match self.fatal_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn init_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(Self::TITLE)
            .with_inner_size(LogicalSize::new(800, 600));
        let window = Arc::new(event_loop.create_window(attributes)?);
        self.renderer = Some(Renderer::new(window, self.config.clone())?);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("{:?}", err);
        self.fatal_error = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render_one_frame() {
            Ok(FrameOutcome::Presented { slot, image_index }) => {
                log::trace!("Presented image {} from slot {}", image_index, slot);
            }
            Ok(FrameOutcome::Skipped) => {
                log::trace!("Skipped frame, window has no area");
            }
            Err(err) if err.is_recoverable() => {
                log::debug!("Recoverable frame error: {}", err);
            }
            Err(err) => {
                self.fail(event_loop, Report::new(err));
                return;
            }
        }

        renderer.window().request_redraw();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() || self.fatal_error.is_some() {
            return;
        }
        if let Err(err) = self.init_renderer(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if window_id != renderer.window().id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                renderer.request_resize();
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
        }
    }
}
