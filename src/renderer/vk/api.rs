use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::contexts::device_ctx::physical::PhysicalDeviceInfo;

/// Device-level entry points used by the presentation engine, its attachments and
/// the frame synchronization bookkeeping.
///
/// `RenderDevice` implements this on top of `ash`; tests substitute a bookkeeping
/// device so the frame cycle can be exercised without a GPU.
///
/// # Safety
///
/// Every `unsafe` method forwards to the Vulkan command of the same name and has the
/// same valid-usage requirements: handles passed in must have been created by this
/// device and must not be in use by pending GPU work when destroyed.
pub trait DeviceApi {
    fn physical_info(&self) -> &PhysicalDeviceInfo;

    unsafe fn get_device_queue(&self, family_index: u32) -> vk::Queue;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;

    // Surface queries
    unsafe fn surface_support(
        &self,
        family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool>;
    unsafe fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    unsafe fn surface_formats(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    unsafe fn surface_present_modes(
        &self,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>>;

    // Presentation chain
    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn get_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>>;
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;
    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool>;

    // Images and memory
    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    unsafe fn destroy_image(&self, image: vk::Image);
    unsafe fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory>;
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    // Render pass and framebuffers
    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Command recording
    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    );
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // Synchronization
    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    unsafe fn create_semaphore(
        &self,
        info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;
}
