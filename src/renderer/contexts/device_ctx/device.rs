use std::ffi::{c_char, CStr, CString};
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::debug::DebugLabels;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::physical::PhysicalDeviceInfo;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueAssignment, QueueFamily};
use crate::renderer::contexts::device_ctx::transfer_ctx;
use crate::renderer::vk::api::DeviceApi;

/// Logical device plus everything resolved alongside it: queues, the swapchain
/// loader, a general-purpose command pool and optional debug labels.
///
/// Borrows the instance, which therefore has to be dropped after the device.
pub struct RenderDevice<'a> {
    instance: &'a RenderInstance,
    physical: vk::PhysicalDevice,
    info: PhysicalDeviceInfo,
    logical: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,

    queues: QueueAssignment,
    pub graphics_queue: Queue,
    pub compute_queue: Queue,
    pub transfer_queue: Queue,

    // Graphics family, buffers individually resettable
    command_pool: vk::CommandPool,
    debug_labels: Option<DebugLabels>,
}

impl<'a> RenderDevice<'a> {
    pub fn new(instance: &'a RenderInstance, config: &RenderConfig) -> Result<Self> {
        let (physical, info, queues) =
            Self::select_physical_device(instance.handle(), config.requested_queues)?;
        log::info!("Selected physical device: {}", info.device_name());
        log::info!(
            "Queue families: graphics {}, compute {}, transfer {}",
            queues.graphics,
            queues.compute,
            queues.transfer,
        );

        let logical = Self::create_logical_device(
            instance.handle(),
            physical,
            &info,
            &queues,
            &config.device_extensions,
        )?;

        let command_pool = {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queues.graphics);
            match unsafe { logical.create_command_pool(&pool_info, None) } {
                Ok(pool) => pool,
                Err(err) => {
                    unsafe { logical.destroy_device(None) };
                    return Err(err.into());
                }
            }
        };

        let queue = |index: u32| -> Result<Queue> {
            let properties = *info
                .queue_families
                .get(index as usize)
                .ok_or_eyre("Resolved queue family index out of range")?;
            let handle = unsafe { logical.get_device_queue(index, 0) };
            Ok(Queue::new(QueueFamily::new(index, properties), handle))
        };
        let (graphics_queue, compute_queue, transfer_queue) =
            match (queue(queues.graphics), queue(queues.compute), queue(queues.transfer)) {
                (Ok(graphics), Ok(compute), Ok(transfer)) => (graphics, compute, transfer),
                (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                    unsafe {
                        logical.destroy_command_pool(command_pool, None);
                        logical.destroy_device(None);
                    }
                    return Err(err);
                }
            };

        let debug_labels = instance
            .debug_enabled()
            .then(|| DebugLabels::new(instance.handle(), &logical));
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &logical);

        Ok(Self {
            instance,
            physical,
            info,
            logical,
            swapchain_loader,
            queues,
            graphics_queue,
            compute_queue,
            transfer_queue,
            command_pool,
            debug_labels,
        })
    }

    fn select_physical_device(
        instance: &ash::Instance,
        requested_queues: vk::QueueFlags,
    ) -> Result<(vk::PhysicalDevice, PhysicalDeviceInfo, QueueAssignment)> {
        unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter_map(|device| match PhysicalDeviceInfo::query(instance, device) {
                Ok(info) => Some((device, info)),
                Err(err) => {
                    log::warn!("Skipping physical device {:?}: {}", device, err);
                    None
                }
            })
            // Filter out devices that do not expose the required queues
            .filter_map(|(device, info)| {
                let queues = QueueAssignment::resolve(&info.queue_families, requested_queues);
                if queues.is_none() {
                    log::debug!("{} lacks the requested queue families", info.device_name());
                }
                queues.map(|queues| (device, info, queues))
            })
            .min_by_key(|(_, info, _)| match info.properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 3,
                vk::PhysicalDeviceType::OTHER => 4,
                _ => 5,
            })
            .ok_or_eyre("No suitable physical device found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
        info: &PhysicalDeviceInfo,
        queues: &QueueAssignment,
        requested_extensions: &[&'static CStr],
    ) -> Result<ash::Device> {
        let queue_priorities = [0.0];
        let queue_create_infos = queues
            .queue_create_families()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<SmallVec<[_; 3]>>();

        let mut requested = requested_extensions.to_vec();
        requested.push(ash::khr::swapchain::NAME);
        #[cfg(target_os = "macos")]
        requested.push(ash::khr::portability_subset::NAME);

        let unsupported = unsupported_extensions(&requested, &info.extensions);
        for ext in &unsupported {
            log::error!("Device extension not supported: {:?}", ext);
        }
        let enabled_extension_names = requested
            .iter()
            .filter(|ext| !unsupported.contains(*ext))
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names);

        Ok(unsafe { instance.create_device(physical, &device_create_info, None)? })
    }

    /// Waits until `command_buffer` has executed on `queue`
    pub fn submit_and_wait(&self, queue: vk::Queue, command_buffer: vk::CommandBuffer) -> Result<()> {
        transfer_ctx::submit_and_wait(self, queue, command_buffer)
    }

    /// Records commands through `func` into a throwaway command buffer and runs
    /// them on the graphics queue before returning.
    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        transfer_ctx::immediate_submit(
            self,
            self.command_pool,
            self.graphics_queue.handle,
            |cmd| func(cmd, &self.logical),
        )
    }

    pub fn handle(&self) -> &ash::Device {
        &self.logical
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    pub fn queues(&self) -> QueueAssignment {
        self.queues
    }

    pub fn instance(&self) -> &'a RenderInstance {
        self.instance
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn debug_labels(&self) -> Option<&DebugLabels> {
        self.debug_labels.as_ref()
    }
}

impl Drop for RenderDevice<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for device idle before teardown: {}", err);
            }
            self.logical.destroy_command_pool(self.command_pool, None);
            self.logical.destroy_device(None);
        }
    }
}

/// Requested extensions missing from `supported`, in request order
pub fn unsupported_extensions<'e>(
    requested: &[&'e CStr],
    supported: &[CString],
) -> Vec<&'e CStr> {
    requested
        .iter()
        .filter(|req| !supported.iter().any(|sup| sup.as_c_str() == **req))
        .copied()
        .collect()
}

impl DeviceApi for RenderDevice<'_> {
    fn physical_info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    unsafe fn get_device_queue(&self, family_index: u32) -> vk::Queue {
        unsafe { self.logical.get_device_queue(family_index, 0) }
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.logical.device_wait_idle() }
    }

    unsafe fn surface_support(
        &self,
        family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(self.physical, family_index, surface)
        }
    }

    unsafe fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(self.physical, surface)
        }
    }

    unsafe fn surface_formats(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(self.physical, surface)
        }
    }

    unsafe fn surface_present_modes(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(self.physical, surface)
        }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    unsafe fn get_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, fence)
        }
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        unsafe { self.swapchain_loader.queue_present(queue, info) }
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.logical.create_image(info, None) }
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        unsafe { self.logical.destroy_image(image, None) }
    }

    unsafe fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.logical.get_image_memory_requirements(image) }
    }

    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory> {
        unsafe { self.logical.allocate_memory(info, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.logical.free_memory(memory, None) }
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.logical.bind_image_memory(image, memory, offset) }
    }

    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        unsafe { self.logical.create_image_view(info, None) }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.logical.destroy_image_view(view, None) }
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        unsafe { self.logical.create_render_pass(info, None) }
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.logical.destroy_render_pass(render_pass, None) }
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.logical.create_framebuffer(info, None) }
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.logical.destroy_framebuffer(framebuffer, None) }
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        unsafe { self.logical.create_command_pool(info, None) }
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.logical.destroy_command_pool(pool, None) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.logical.allocate_command_buffers(info) }
    }

    unsafe fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        unsafe { self.logical.free_command_buffers(pool, command_buffers) }
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        unsafe { self.logical.begin_command_buffer(command_buffer, info) }
    }

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.logical.end_command_buffer(command_buffer) }
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        unsafe { self.logical.create_fence(info, None) }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.logical.destroy_fence(fence, None) }
    }

    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        unsafe { self.logical.wait_for_fences(fences, wait_all, timeout) }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        unsafe { self.logical.reset_fences(fences) }
    }

    unsafe fn create_semaphore(
        &self,
        info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        unsafe { self.logical.create_semaphore(info, None) }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.logical.destroy_semaphore(semaphore, None) }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        unsafe { self.logical.queue_submit(queue, submits, fence) }
    }
}
