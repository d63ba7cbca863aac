pub mod config;
pub mod contexts;
pub mod vk;

use std::sync::Arc;
use ash::vk as ash_vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use glam::Vec4;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::contexts::present_ctx::render_pass::{COLOR_ATTACHMENT, DEPTH_ATTACHMENT};
use crate::renderer::contexts::present_ctx::swapchain::PresentationEngine;
use crate::renderer::contexts::present_ctx::{EngineOwnership, FrameStatus};
use crate::renderer::vk::api::DeviceApi;
use crate::renderer::vk::util;

const CLEAR_COLOR: Vec4 = Vec4::new(0.08, 0.09, 0.12, 1.0);
const LABEL_COLOR: Vec4 = Vec4::new(0.2, 0.6, 1.0, 1.0);

/// Drives one window: every frame acquires an image, clears it, and presents it.
/// Out-of-date and suboptimal chains are rebuilt on the spot.
pub struct Renderer<'a> {
    // Declared before the surface so the chain goes first
    engine: PresentationEngine<'a, RenderDevice<'a>>,
    surface: Surface<'a>,
    window: Arc<Window>,
    device: &'a RenderDevice<'a>,

    // Images-only engines leave acquire synchronization to us
    acquire_fence: Option<ash_vk::Fence>,

    vsync: bool,
    resize_requested: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(
        instance: &'a RenderInstance,
        device: &'a RenderDevice<'a>,
        window: Arc<Window>,
        config: &RenderConfig,
    ) -> Result<Self> {
        let surface = instance.create_surface(&window)?;

        let options = config.present_options();
        if options.ownership == EngineOwnership::ImagesOnly {
            let caps = unsafe { device.surface_capabilities(surface.handle())? };
            if !caps
                .supported_usage_flags
                .contains(ash_vk::ImageUsageFlags::TRANSFER_DST)
            {
                return Err(eyre!(
                    "Images-only presentation clears through transfers, which this surface does not support"
                ));
            }
        }

        let mut extent = window_extent(&window);
        let engine = PresentationEngine::new(
            device,
            surface.handle(),
            &mut extent,
            config.vsync,
            options,
        )?;
        log::info!("Presenting at {}x{}", extent.width, extent.height);

        let acquire_fence = match engine.ownership() {
            EngineOwnership::Full => None,
            EngineOwnership::ImagesOnly => Some(unsafe {
                device.create_fence(&ash_vk::FenceCreateInfo::default())?
            }),
        };

        Ok(Self {
            engine,
            surface,
            window,
            device,
            acquire_fence,
            vsync: config.vsync,
            resize_requested: false,
        })
    }

    pub fn surface(&self) -> ash_vk::SurfaceKHR {
        self.surface.handle()
    }

    pub fn engine(&self) -> &PresentationEngine<'a, RenderDevice<'a>> {
        &self.engine
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Takes effect through a rebuild before the next frame
    pub fn toggle_vsync(&mut self) {
        self.vsync = !self.vsync;
        log::info!("vsync: {}", self.vsync);
        self.resize_requested = true;
    }

    pub fn draw(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            // Minimized, nothing to present to
            return Ok(());
        }

        if self.resize_requested {
            self.recreate()?;
        }

        match self.engine.ownership() {
            EngineOwnership::Full => self.draw_frame(),
            EngineOwnership::ImagesOnly => self.clear_frame(),
        }
    }

    fn recreate(&mut self) -> Result<()> {
        let mut extent = window_extent(&self.window);
        self.engine.recreate(&mut extent, self.vsync)?;
        self.resize_requested = false;
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        let acquired = self.engine.acquire()?;
        if acquired == FrameStatus::OutOfDate {
            return self.recreate();
        }

        self.record_clear_pass()?;
        self.engine.submit()?;
        let presented = self.engine.present()?;

        if acquired.needs_recreate() || presented.needs_recreate() {
            self.recreate()?;
        }
        Ok(())
    }

    fn record_clear_pass(&self) -> Result<()> {
        let cmd = self
            .engine
            .command_buffer()
            .ok_or_eyre("No command buffer for the current frame")?;
        let framebuffer = self
            .engine
            .framebuffer()
            .ok_or_eyre("No framebuffer for the acquired image")?;
        let render_pass = self
            .engine
            .render_pass()
            .ok_or_eyre("Presentation engine owns no render pass")?;
        let device = self.device.handle();
        let labels = self.device.debug_labels();

        let mut clear_values = [ash_vk::ClearValue::default(); 2];
        clear_values[COLOR_ATTACHMENT as usize] = ash_vk::ClearValue {
            color: ash_vk::ClearColorValue {
                float32: CLEAR_COLOR.to_array(),
            },
        };
        clear_values[DEPTH_ATTACHMENT as usize] = ash_vk::ClearValue {
            depth_stencil: ash_vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };
        let render_pass_info = ash_vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(ash_vk::Rect2D {
                offset: ash_vk::Offset2D::default(),
                extent: self.engine.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            device.reset_command_buffer(cmd, ash_vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &ash_vk::CommandBufferBeginInfo::default()
                    .flags(ash_vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        if let Some(labels) = labels {
            labels.begin(cmd, "Clear pass", LABEL_COLOR);
        }
        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, ash_vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);
        }
        if let Some(labels) = labels {
            labels.end(cmd);
        }
        unsafe { device.end_command_buffer(cmd)? };

        Ok(())
    }

    /// Frame for an images-only engine: acquire with our own fence, clear with a
    /// one-shot transfer, present without a semaphore.
    fn clear_frame(&mut self) -> Result<()> {
        let fence = self
            .acquire_fence
            .ok_or_eyre("Images-only renderer has no acquire fence")?;

        let acquired = self
            .engine
            .acquire_next_image(ash_vk::Semaphore::null(), fence)?;
        if acquired == FrameStatus::OutOfDate {
            return self.recreate();
        }
        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            self.device.reset_fences(&[fence])?;
        }

        let image_index = self.engine.image_index();
        let image = *self
            .engine
            .images()
            .get(image_index as usize)
            .ok_or_eyre("Acquired image index out of range")?;

        self.device.immediate_submit(|cmd, device| {
            let labels = self.device.debug_labels();
            if let Some(labels) = labels {
                labels.begin(cmd, "Clear image", LABEL_COLOR);
            }
            util::transition_image_layout(
                device,
                cmd,
                image,
                ash_vk::ImageAspectFlags::COLOR,
                ash_vk::ImageLayout::UNDEFINED,
                ash_vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            unsafe {
                device.cmd_clear_color_image(
                    cmd,
                    image,
                    ash_vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &ash_vk::ClearColorValue {
                        float32: CLEAR_COLOR.to_array(),
                    },
                    &[util::subresource_range(ash_vk::ImageAspectFlags::COLOR)],
                );
            }
            util::transition_image_layout(
                device,
                cmd,
                image,
                ash_vk::ImageAspectFlags::COLOR,
                ash_vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ash_vk::ImageLayout::PRESENT_SRC_KHR,
            );
            if let Some(labels) = labels {
                labels.end(cmd);
            }
            Ok(())
        })?;

        let presented = self
            .engine
            .queue_present(image_index, ash_vk::Semaphore::null())?;
        if acquired.needs_recreate() || presented.needs_recreate() {
            self.recreate()?;
        }
        Ok(())
    }
}

impl Drop for Renderer<'_> {
    fn drop(&mut self) {
        if let Some(fence) = self.acquire_fence.take() {
            unsafe {
                if let Err(err) = self.device.device_wait_idle() {
                    log::error!("Failed to wait for device idle before teardown: {}", err);
                }
                self.device.destroy_fence(fence);
            }
        }
    }
}

fn window_extent(window: &Window) -> ash_vk::Extent2D {
    let size = window.inner_size();
    ash_vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
