use std::sync::Arc;
use color_eyre::{Report, Result};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use framechain::renderer::config::RenderConfig;
use framechain::renderer::contexts::device_ctx::device::RenderDevice;
use framechain::renderer::contexts::device_ctx::instance::RenderInstance;
use framechain::renderer::Renderer;

pub struct App<'a> {
    instance: &'a RenderInstance,
    device: &'a RenderDevice<'a>,
    config: RenderConfig,

    // The renderer holds the surface, so it is dropped before the window
    renderer: Option<Renderer<'a>>,
    window: Option<Arc<Window>>,

    // State
    error: Option<Report>,
    close_requested: bool,
}

impl<'a> App<'a> {
    pub fn new(
        instance: &'a RenderInstance,
        device: &'a RenderDevice<'a>,
        config: RenderConfig,
    ) -> Self {
        Self {
            instance,
            device,
            config,
            renderer: None,
            window: None,
            error: None,
            close_requested: false,
        }
    }

    /// First error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<Report> {
        self.error.take()
    }

    fn init_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_none() {
            let attributes = Window::default_attributes().with_title("framechain");
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }

        if self.renderer.is_none() {
            if let Some(window) = self.window.clone() {
                self.renderer = Some(Renderer::new(
                    self.instance,
                    self.device,
                    window,
                    &self.config,
                )?);
            }
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("{:#}", err);
        self.error.get_or_insert(err);
        self.renderer = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.init_window(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(err) = renderer.draw() {
                        self.fail(event_loop, err);
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match key.as_ref() {
                Key::Character("v") => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.toggle_vsync();
                    }
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            // Chain and surface go before the window they present to
            self.renderer = None;
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
