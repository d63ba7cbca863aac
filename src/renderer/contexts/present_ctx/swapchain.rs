use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use crate::renderer::contexts::frame_ctx::frame::FrameState;
use crate::renderer::contexts::frame_ctx::{FrameCursor, FrameSync};
use crate::renderer::contexts::present_ctx::attachment::{Attachment, AttachmentCreateInfo};
use crate::renderer::contexts::present_ctx::negotiate;
use crate::renderer::contexts::present_ctx::render_pass;
use crate::renderer::contexts::present_ctx::{EngineOwnership, FrameStatus, PresentOptions};
use crate::renderer::vk::api::DeviceApi;
use crate::renderer::vk::util;

/// Everything a `Full` engine owns beyond the chain and its views
struct RenderTargets<'a, D: DeviceApi> {
    depth: Attachment<'a, D>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: FrameSync,
    cursor: FrameCursor,
    device: &'a D,
}

impl<'a, D: DeviceApi> RenderTargets<'a, D> {
    fn new(
        device: &'a D,
        depth: Attachment<'a, D>,
        color_format: vk::Format,
        queue_family_index: u32,
    ) -> Result<Self> {
        let mut targets = Self {
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            sync: FrameSync::default(),
            cursor: FrameCursor::default(),
            device,
            depth,
        };

        targets.render_pass = render_pass::create(device, color_format, targets.depth.format())?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            // Allow the pool to reset individual command buffers
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        targets.command_pool = unsafe { device.create_command_pool(&pool_info)? };

        Ok(targets)
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.destroy_framebuffer(framebuffer) };
        }
    }

    fn create_framebuffers(
        &mut self,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<()> {
        let depth_view = self.depth.view().ok_or_eyre("Depth attachment is not live")?;
        for view in image_views {
            let attachments = [*view, depth_view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.create_framebuffer(&info)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn reallocate_command_buffers(&mut self, count: usize) -> Result<()> {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers)
            };
            self.command_buffers.clear();
        }

        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        self.command_buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        Ok(())
    }
}

impl<D: DeviceApi> Drop for RenderTargets<'_, D> {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe {
            self.sync.destroy(self.device);
            if !self.command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass);
            }
        }
        // depth attachment goes last, when the field drops
    }
}

/// The chain of presentable images negotiated with a surface, together with the
/// per-image views. A `Full` engine also owns a render pass, a depth attachment,
/// one framebuffer per image, and one command buffer plus sync slot per frame in
/// flight, and drives the acquire, submit, present cycle itself.
///
/// The device and surface are borrowed and must outlive the engine.
pub struct PresentationEngine<'a, D: DeviceApi> {
    device: &'a D,
    surface: vk::SurfaceKHR,
    options: PresentOptions,

    queue_family_index: u32,
    queue: vk::Queue,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    vsync: bool,

    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>, // owned by the chain
    image_views: Vec<vk::ImageView>,
    image_index: u32,

    targets: Option<RenderTargets<'a, D>>,
}

impl<'a, D: DeviceApi> PresentationEngine<'a, D> {
    /// Builds the engine and its first chain. `extent` is the size the caller would
    /// like and is overwritten with the size actually negotiated.
    pub fn new(
        device: &'a D,
        surface: vk::SurfaceKHR,
        extent: &mut vk::Extent2D,
        vsync: bool,
        options: PresentOptions,
    ) -> Result<Self> {
        let queue_family_index = Self::find_present_family(device, surface)
            .inspect_err(|err| log::error!("{:#}", err))?;
        let queue = unsafe { device.get_device_queue(queue_family_index) };

        let surface_formats = unsafe { device.surface_formats(surface)? };
        let surface_format =
            negotiate::choose_surface_format(&surface_formats, &options.preferred_formats)
                .inspect_err(|err| log::error!("{:#}", err))?;

        let targets = match options.ownership {
            EngineOwnership::Full => {
                let depth_format = device
                    .physical_info()
                    .select_depth_stencil_format()
                    .ok_or_eyre("No supported depth/stencil attachment format")
                    .inspect_err(|err| log::error!("{:#}", err))?;
                // Allocated by the first recreate, once the extent is negotiated
                let depth = Attachment::deferred(
                    device,
                    AttachmentCreateInfo::depth_stencil(depth_format, *extent),
                );
                Some(RenderTargets::new(
                    device,
                    depth,
                    surface_format.format,
                    queue_family_index,
                )?)
            }
            EngineOwnership::ImagesOnly => None,
        };

        let mut engine = Self {
            device,
            surface,
            options,
            queue_family_index,
            queue,
            surface_format,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: *extent,
            vsync,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            image_index: 0,
            targets,
        };

        engine.recreate(extent, vsync)?;
        Ok(engine)
    }

    /// First queue family that can both render and present to `surface`
    fn find_present_family(device: &D, surface: vk::SurfaceKHR) -> Result<u32> {
        let families = &device.physical_info().queue_families;
        for (index, family) in families.iter().enumerate() {
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) || family.queue_count == 0 {
                continue;
            }
            if unsafe { device.surface_support(index as u32, surface)? } {
                return Ok(index as u32);
            }
        }
        Err(eyre!("No queue family supports both graphics and presentation to this surface"))
    }

    /// Rebuilds the chain for the current surface state. `extent` is overwritten
    /// with the negotiated size when the surface dictates one.
    pub fn recreate(&mut self, extent: &mut vk::Extent2D, vsync: bool) -> Result<()> {
        self.recreate_inner(extent, vsync)
            .wrap_err("Failed to recreate the presentation chain")
            .inspect_err(|err| log::error!("{:#}", err))
    }

    fn recreate_inner(&mut self, extent: &mut vk::Extent2D, vsync: bool) -> Result<()> {
        let device = self.device;

        // Nothing that is about to be destroyed or replaced may still be in use
        unsafe { device.device_wait_idle()? };

        let caps = unsafe { device.surface_capabilities(self.surface)? };
        let negotiated = negotiate::resolve_extent(&caps, *extent);
        if negotiated.width == 0 || negotiated.height == 0 {
            return Err(eyre!(
                "Surface extent {}x{} cannot back a presentation chain",
                negotiated.width,
                negotiated.height,
            ));
        }
        *extent = negotiated;

        if let Some(targets) = self.targets.as_mut() {
            targets.depth.recreate(negotiated)?;
        }

        let present_modes = unsafe { device.surface_present_modes(self.surface)? };
        let present_mode = negotiate::choose_present_mode(&present_modes, vsync);
        let image_count = negotiate::choose_image_count(&caps);
        log::debug!(
            "Requesting {} presentable images (surface minimum {}, maximum {})",
            image_count,
            caps.min_image_count,
            caps.max_image_count,
        );

        let old_swapchain = self.swapchain;
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(negotiated)
            .image_array_layers(1)
            .image_usage(negotiate::image_usage(&caps))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(negotiate::choose_transform(&caps))
            .composite_alpha(negotiate::choose_composite_alpha(&caps))
            .present_mode(present_mode)
            .clipped(self.options.clipped)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe { device.create_swapchain(&info)? };

        // Views and framebuffers are never released along with the chain
        if let Some(targets) = self.targets.as_mut() {
            targets.destroy_framebuffers();
        }
        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { device.destroy_swapchain(old_swapchain) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { device.get_swapchain_images(swapchain)? };
        for image in &self.images {
            let view_info = util::image_view_create_info(
                *image,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            );
            let view = unsafe { device.create_image_view(&view_info)? };
            self.image_views.push(view);
        }
        log::debug!("Presentation engine returned {} images", self.images.len());

        if let Some(targets) = self.targets.as_mut() {
            let count = self.images.len();
            targets.create_framebuffers(&self.image_views, negotiated)?;
            targets.sync.recover(device)?;
            targets.sync.resize(device, count)?;
            targets.reallocate_command_buffers(count)?;
            targets.cursor.reset(count);
        }

        self.present_mode = present_mode;
        self.extent = negotiated;
        self.vsync = vsync;
        self.image_index = 0;

        log::info!(
            "Presentation chain: {:?}/{:?}, {:?}, {}x{}, {} images",
            self.surface_format.format,
            self.surface_format.color_space,
            present_mode,
            negotiated.width,
            negotiated.height,
            self.images.len(),
        );
        Ok(())
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view) };
        }
    }

    fn targets_mut(&mut self) -> Result<&mut RenderTargets<'a, D>> {
        self.targets
            .as_mut()
            .ok_or_eyre("Frame synchronization is not owned by an images-only presentation engine")
    }

    /// Moves to the next frame slot, waits until its previous work is done, and
    /// acquires the next presentable image.
    ///
    /// On `OutOfDate` nothing was acquired. The slot's fence stays signaled and its
    /// semaphore stays unsignaled, so the caller only has to recreate the chain.
    pub fn acquire(&mut self) -> Result<FrameStatus> {
        let device = self.device;
        let swapchain = self.swapchain;
        let targets = self.targets_mut()?;

        let current = targets.cursor.current();
        if let Some(state) = targets.sync.state(current) {
            if state.mid_cycle() {
                return Err(eyre!(
                    "Acquire called while frame slot {} is still {:?}",
                    current,
                    state,
                ));
            }
        }

        let slot_index = targets.cursor.advance();
        let slot = targets.sync.slot_mut(slot_index)?;
        unsafe { device.wait_for_fences(&[slot.fence], true, u64::MAX)? };
        slot.state = FrameState::Idle;

        let result = unsafe {
            device.acquire_next_image(
                swapchain,
                u64::MAX,
                slot.acquire_semaphore,
                vk::Fence::null(),
            )
        };
        let (status, image_index) = FrameStatus::from_acquire(result)?;
        let Some(image_index) = image_index else {
            log::debug!("Acquire on slot {} found the chain out of date", slot_index);
            return Ok(status);
        };

        // Only now is work certain to be submitted that will signal the fence again
        unsafe { device.reset_fences(&[slot.fence])? };
        slot.state = FrameState::Recording;
        self.image_index = image_index;
        Ok(status)
    }

    /// Submits the current slot's command buffer. It waits for the acquired image
    /// at color attachment output and signals the slot's render semaphore and fence.
    pub fn submit(&mut self) -> Result<()> {
        let device = self.device;
        let queue = self.queue;
        let targets = self.targets_mut()?;

        let slot_index = targets.cursor.current();
        let command_buffer = *targets
            .command_buffers
            .get(slot_index)
            .ok_or_eyre("No command buffer for the current frame slot")?;
        let slot = targets.sync.slot_mut(slot_index)?;
        if slot.state != FrameState::Recording {
            return Err(eyre!(
                "Submit called on frame slot {} in state {:?}; acquire an image first",
                slot_index,
                slot.state,
            ));
        }

        let wait_semaphores = [slot.acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [slot.render_semaphore];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe { device.queue_submit(queue, &[submit], slot.fence)? };

        slot.state = FrameState::Submitted;
        Ok(())
    }

    /// Presents the acquired image once the current slot's rendering is done
    pub fn present(&mut self) -> Result<FrameStatus> {
        let image_index = self.image_index;
        let targets = self.targets_mut()?;

        let slot_index = targets.cursor.current();
        let slot = targets.sync.slot_mut(slot_index)?;
        if slot.state != FrameState::Submitted {
            return Err(eyre!(
                "Present called on frame slot {} in state {:?}; submit first",
                slot_index,
                slot.state,
            ));
        }
        let render_semaphore = slot.render_semaphore;
        // The wait happens even when presentation reports out of date
        slot.state = FrameState::Presented;

        self.queue_present(image_index, render_semaphore)
    }

    /// Acquires the next image with caller-owned primitives. Either may be null.
    pub fn acquire_next_image(
        &mut self,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<FrameStatus> {
        let result = unsafe {
            self.device
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, fence)
        };
        let (status, image_index) = FrameStatus::from_acquire(result)?;
        if let Some(image_index) = image_index {
            self.image_index = image_index;
        }
        Ok(status)
    }

    /// Presents `image_index`. A null `wait_semaphore` presents without waiting.
    pub fn queue_present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<FrameStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let mut info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        if wait_semaphore != vk::Semaphore::null() {
            info = info.wait_semaphores(&wait_semaphores);
        }

        let result = unsafe { self.device.queue_present(self.queue, &info) };
        FrameStatus::from_present(result)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn ownership(&self) -> EngineOwnership {
        self.options.ownership
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.targets.as_ref().map(|t| t.render_pass)
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        self.targets.as_ref().map_or(&[], |t| t.framebuffers.as_slice())
    }

    /// Framebuffer of the most recently acquired image
    pub fn framebuffer(&self) -> Option<vk::Framebuffer> {
        self.targets
            .as_ref()
            .and_then(|t| t.framebuffers.get(self.image_index as usize).copied())
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        self.targets.as_ref().map_or(&[], |t| t.command_buffers.as_slice())
    }

    /// Command buffer of the current frame slot
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.targets
            .as_ref()
            .and_then(|t| t.command_buffers.get(t.cursor.current()).copied())
    }

    pub fn current_frame(&self) -> Option<usize> {
        self.targets.as_ref().map(|t| t.cursor.current())
    }

    pub fn frame_state(&self) -> Option<FrameState> {
        self.targets
            .as_ref()
            .and_then(|t| t.sync.state(t.cursor.current()))
    }

    pub fn frame_sync(&self) -> Option<&FrameSync> {
        self.targets.as_ref().map(|t| &t.sync)
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.targets.as_ref().map(|t| t.depth.format())
    }

    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.targets.as_ref().and_then(|t| t.depth.view())
    }
}

impl<D: DeviceApi> Drop for PresentationEngine<'_, D> {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("Failed to wait for device idle before teardown: {}", err);
            }
        }
        if let Some(targets) = self.targets.as_mut() {
            targets.destroy_framebuffers();
        }
        self.destroy_image_views();
        // sync, command buffers, render pass, then depth
        self.targets = None;
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.device.destroy_swapchain(self.swapchain) };
        }
    }
}
