use std::sync::Arc;

use color_eyre::eyre::{OptionExt, Report};
use color_eyre::Result;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::renderer::config::RenderConfig;
use crate::renderer::protocol::FrameOutcome;
use crate::renderer::Renderer;

/// Owns the one renderer and drives the poll-events/render loop until the
/// window asks to close.
pub struct App {
    config: Option<RenderConfig>,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,

    close_requested: bool,
    // Errors are stashed here and surfaced from `run`; only `main` decides
    // to terminate the process.
    error: Option<Report>,
}

impl App {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: Some(RenderConfig::default()),
            window: None,
            renderer: None,

            close_requested: false,
            error: None,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        self.error = Some(err);
        event_loop.exit();
    }

    /// The config is consumed by the one renderer; a second take is a logic
    /// error reported as a value, not a panic.
    fn take_config(&mut self) -> Result<RenderConfig> {
        self.config
            .take()
            .ok_or_eyre("Render config was already consumed by a renderer")
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            // Borderless window at the primary display's native resolution
            let title = self
                .config
                .as_ref()
                .map(|c| c.window_title.clone())
                .unwrap_or_default();
            let attributes = Window::default_attributes()
                .with_title(title)
                .with_fullscreen(Some(Fullscreen::Borderless(event_loop.primary_monitor())));
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => return self.fail(event_loop, err.into()),
            }
        }

        if self.renderer.is_none() {
            let Some(window) = self.window.clone() else {
                return;
            };
            let config = match self.take_config() {
                Ok(config) => config,
                Err(err) => return self.fail(event_loop, err),
            };
            match Renderer::new(window, config) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(err) => self.fail(event_loop, err),
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    match renderer.render() {
                        Ok(FrameOutcome::Presented) => {}
                        Ok(FrameOutcome::OutOfDate) => {
                            log::warn!("Frame skipped: swapchain out of date");
                        }
                        Err(err) => self.fail(event_loop, err),
                    }
                }
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
            return;
        }

        // Continuous rendering; FIFO presentation paces the loop
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_consumed_once_and_errors_after() {
        let mut app = App::new().unwrap();
        assert!(app.take_config().is_ok());

        let err = app
            .take_config()
            .expect_err("second take must fail instead of panicking");
        assert!(err.to_string().contains("already consumed"));
    }
}
