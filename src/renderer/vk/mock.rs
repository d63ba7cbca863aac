//! Bookkeeping stand-in for a Vulkan device.
//!
//! Every object created through it is tracked in a live table so tests can assert
//! on leaks. Submitted work completes instantly: fences are signaled as soon as they
//! are handed to a submit, and semaphores carry a single pending-signal bit. Waiting
//! on a fence nothing will ever signal reports `TIMEOUT` instead of hanging.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use crate::renderer::contexts::device_ctx::physical::PhysicalDeviceInfo;
use crate::renderer::vk::api::DeviceApi;

pub const MOCK_QUEUE: u64 = 0x51;
pub const MOCK_SURFACE: u64 = 0x5f;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    Image,
    Memory,
    ImageView,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

#[derive(Clone, Debug)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub old_swapchain: vk::SwapchainKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
}

pub struct MockState {
    next_handle: u64,
    pub live: HashMap<u64, ObjectKind>,
    pub violations: Vec<String>,

    pub fences: HashMap<u64, bool>,
    pub semaphores: HashMap<u64, bool>,
    command_buffer_pools: HashMap<u64, u64>,

    pub present_support: Vec<bool>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub memory_type_bits: u32,
    pub fail_memory_allocation: bool,
    /// Returned by the next queue submit instead of executing it
    pub fail_next_submit: Option<vk::Result>,

    /// Results handed out by successive acquires; `SUCCESS` once drained
    pub acquire_script: VecDeque<vk::Result>,
    /// Results handed out by successive presents; `SUCCESS` once drained
    pub present_script: VecDeque<vk::Result>,

    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: HashMap<u64, u32>,
    pub swapchains: Vec<SwapchainRecord>,
    pub image_extents: HashMap<u64, vk::Extent3D>,
    /// Extent of every image ever created, in creation order
    pub created_image_extents: Vec<vk::Extent3D>,
    pub framebuffer_extents: HashMap<u64, vk::Extent2D>,
    pub allocated_memory_types: Vec<u32>,
    pub presented_images: Vec<u32>,

    pub idle_waits: usize,
    pub submits: usize,
    pub presents: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_handle: 0x1000,
            live: HashMap::new(),
            violations: Vec::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffer_pools: HashMap::new(),
            present_support: vec![true],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
            memory_type_bits: 0b11,
            fail_memory_allocation: false,
            fail_next_submit: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            swapchain_images: HashMap::new(),
            next_image: HashMap::new(),
            swapchains: Vec::new(),
            image_extents: HashMap::new(),
            created_image_extents: Vec::new(),
            framebuffer_extents: HashMap::new(),
            allocated_memory_types: Vec::new(),
            presented_images: Vec::new(),
            idle_waits: 0,
            submits: 0,
            presents: 0,
        }
    }
}

impl MockState {
    fn create(&mut self, kind: ObjectKind) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw, kind);
        raw
    }

    fn destroy(&mut self, raw: u64, kind: ObjectKind) {
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => self.violations.push(format!(
                "destroyed {:#x} as {:?} but it is a {:?}",
                raw, kind, found,
            )),
            None => self.violations.push(format!(
                "destroyed unknown or already destroyed {:?} {:#x}",
                kind, raw,
            )),
        }
    }

    fn is_live(&self, raw: u64, kind: ObjectKind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn total_live(&self) -> usize {
        self.live.len()
    }

    pub fn pending_semaphores(&self) -> usize {
        self.semaphores.values().filter(|pending| **pending).count()
    }

    pub fn unsignaled_fences(&self) -> usize {
        self.fences.values().filter(|signaled| !**signaled).count()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    pub fn last_swapchain(&self) -> Option<&SwapchainRecord> {
        self.swapchains.last()
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore, what: &str) -> VkResult<()> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(pending) if *pending => {
                *pending = false;
                Ok(())
            }
            _ => {
                self.violations.push(format!("{} waits on an unsignaled semaphore", what));
                Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
            }
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, what: &str) -> VkResult<()> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(pending) if !*pending => {
                *pending = true;
                Ok(())
            }
            _ => {
                self.violations.push(format!("{} signals a semaphore that is already pending", what));
                Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
            }
        }
    }

    fn signal_fence(&mut self, fence: vk::Fence, what: &str) -> VkResult<()> {
        match self.fences.get_mut(&fence.as_raw()) {
            Some(signaled) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            _ => {
                self.violations.push(format!("{} signals a fence that was not reset", what));
                Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
            }
        }
    }
}

pub struct MockDevice {
    info: PhysicalDeviceInfo,
    state: RefCell<MockState>,
}

impl MockDevice {
    /// One universal queue family able to present, a device-local and a
    /// host-visible memory type, and every combined depth/stencil candidate
    /// except D16S8 usable as an attachment
    pub fn new() -> Self {
        let mut info = PhysicalDeviceInfo {
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        info.memory.memory_type_count = 2;
        info.memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        info.memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        let attachable = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        info.depth_format_properties = vec![
            (vk::Format::D32_SFLOAT_S8_UINT, attachable),
            (vk::Format::D24_UNORM_S8_UINT, attachable),
            (vk::Format::D16_UNORM_S8_UINT, vk::FormatProperties::default()),
        ];

        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            info,
            state: RefCell::new(MockState::default()),
        }
    }

    pub fn info_mut(&mut self) -> &mut PhysicalDeviceInfo {
        &mut self.info
    }

    pub fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    pub fn surface() -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(MOCK_SURFACE)
    }
}

/// Slice view of a Vulkan `count`/`pointer` pair; a null pointer reads as empty
unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

impl DeviceApi for MockDevice {
    fn physical_info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    unsafe fn get_device_queue(&self, _family_index: u32) -> vk::Queue {
        vk::Queue::from_raw(MOCK_QUEUE)
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.state().idle_waits += 1;
        Ok(())
    }

    unsafe fn surface_support(
        &self,
        family_index: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        Ok(self
            .state()
            .present_support
            .get(family_index as usize)
            .copied()
            .unwrap_or(false))
    }

    unsafe fn surface_capabilities(
        &self,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state().capabilities)
    }

    unsafe fn surface_formats(
        &self,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state().formats.clone())
    }

    unsafe fn surface_present_modes(
        &self,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state().present_modes.clone())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let old = info.old_swapchain.as_raw();
        if old != 0 && !state.is_live(old, ObjectKind::Swapchain) {
            state.violations.push(format!("old swapchain {:#x} is not live", old));
        }
        if info.image_extent.width == 0 || info.image_extent.height == 0 {
            state.violations.push("swapchain created with a zero extent".into());
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        let handle = state.create(ObjectKind::Swapchain);
        let images = (0..info.min_image_count)
            .map(|_| {
                let raw = state.next_handle;
                state.next_handle += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        state.swapchain_images.insert(handle, images);
        state.next_image.insert(handle, 0);

        let record = SwapchainRecord {
            handle: vk::SwapchainKHR::from_raw(handle),
            old_swapchain: info.old_swapchain,
            min_image_count: info.min_image_count,
            format: info.image_format,
            extent: info.image_extent,
            usage: info.image_usage,
            pre_transform: info.pre_transform,
            composite_alpha: info.composite_alpha,
            present_mode: info.present_mode,
            clipped: info.clipped == vk::TRUE,
        };
        state.swapchains.push(record);
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.destroy(swapchain.as_raw(), ObjectKind::Swapchain);
        state.swapchain_images.remove(&swapchain.as_raw());
    }

    unsafe fn get_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        self.state()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        let result = state.acquire_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        if result != vk::Result::SUCCESS && result != vk::Result::SUBOPTIMAL_KHR {
            return Err(result);
        }

        if semaphore != vk::Semaphore::null() {
            state.signal_semaphore(semaphore, "acquire")?;
        }
        if fence != vk::Fence::null() {
            state.signal_fence(fence, "acquire")?;
        }

        let count = state
            .swapchain_images
            .get(&swapchain.as_raw())
            .map(Vec::len)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)? as u32;
        let next = state.next_image.entry(swapchain.as_raw()).or_insert(0);
        let index = *next;
        *next = (index + 1) % count.max(1);

        Ok((index, result == vk::Result::SUBOPTIMAL_KHR))
    }

    unsafe fn queue_present(
        &self,
        _queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let mut state = self.state();
        state.presents += 1;
        let waits = unsafe { raw_slice(info.p_wait_semaphores, info.wait_semaphore_count) };
        for semaphore in waits {
            state.wait_semaphore(*semaphore, "present")?;
        }
        let indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) };
        state.presented_images.extend_from_slice(indices);

        match state.present_script.pop_front().unwrap_or(vk::Result::SUCCESS) {
            vk::Result::SUCCESS => Ok(false),
            vk::Result::SUBOPTIMAL_KHR => Ok(true),
            err => Err(err),
        }
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::Image);
        state.image_extents.insert(raw, info.extent);
        state.created_image_extents.push(info.extent);
        Ok(vk::Image::from_raw(raw))
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        state.destroy(image.as_raw(), ObjectKind::Image);
        state.image_extents.remove(&image.as_raw());
    }

    unsafe fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        let extent = state
            .image_extents
            .get(&image.as_raw())
            .copied()
            .unwrap_or_default();
        vk::MemoryRequirements {
            size: extent.width as u64 * extent.height as u64 * 4,
            alignment: 256,
            memory_type_bits: state.memory_type_bits,
        }
    }

    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state();
        if state.fail_memory_allocation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        state.allocated_memory_types.push(info.memory_type_index);
        Ok(vk::DeviceMemory::from_raw(state.create(ObjectKind::Memory)))
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state().destroy(memory.as_raw(), ObjectKind::Memory);
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let state = self.state();
        if state.is_live(image.as_raw(), ObjectKind::Image)
            && state.is_live(memory.as_raw(), ObjectKind::Memory)
        {
            Ok(())
        } else {
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        }
    }

    unsafe fn create_image_view(
        &self,
        _info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.state().create(ObjectKind::ImageView)))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().destroy(view.as_raw(), ObjectKind::ImageView);
    }

    unsafe fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.state().create(ObjectKind::RenderPass)))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().destroy(render_pass.as_raw(), ObjectKind::RenderPass);
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let mut state = self.state();
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
        if attachments
            .iter()
            .any(|view| !state.is_live(view.as_raw(), ObjectKind::ImageView))
        {
            state.violations.push("framebuffer references a dead image view".into());
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        let raw = state.create(ObjectKind::Framebuffer);
        state.framebuffer_extents.insert(
            raw,
            vk::Extent2D {
                width: info.width,
                height: info.height,
            },
        );
        Ok(vk::Framebuffer::from_raw(raw))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state();
        state.destroy(framebuffer.as_raw(), ObjectKind::Framebuffer);
        state.framebuffer_extents.remove(&framebuffer.as_raw());
    }

    unsafe fn create_command_pool(
        &self,
        _info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.state().create(ObjectKind::CommandPool)))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        state.destroy(pool.as_raw(), ObjectKind::CommandPool);
        // buffers still allocated from the pool go with it
        let orphans: Vec<u64> = state
            .command_buffer_pools
            .iter()
            .filter(|(_, owner)| **owner == pool.as_raw())
            .map(|(buffer, _)| *buffer)
            .collect();
        for buffer in orphans {
            state.command_buffer_pools.remove(&buffer);
            state.destroy(buffer, ObjectKind::CommandBuffer);
        }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if !state.is_live(info.command_pool.as_raw(), ObjectKind::CommandPool) {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        Ok((0..info.command_buffer_count)
            .map(|_| {
                let raw = state.create(ObjectKind::CommandBuffer);
                state.command_buffer_pools.insert(raw, info.command_pool.as_raw());
                vk::CommandBuffer::from_raw(raw)
            })
            .collect())
    }

    unsafe fn free_command_buffers(
        &self,
        _pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let mut state = self.state();
        for buffer in command_buffers {
            state.command_buffer_pools.remove(&buffer.as_raw());
            state.destroy(buffer.as_raw(), ObjectKind::CommandBuffer);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        if self.state().is_live(command_buffer.as_raw(), ObjectKind::CommandBuffer) {
            Ok(())
        } else {
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        }
    }

    unsafe fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    unsafe fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::Fence);
        state
            .fences
            .insert(raw, info.flags.contains(vk::FenceCreateFlags::SIGNALED));
        Ok(vk::Fence::from_raw(raw))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.destroy(fence.as_raw(), ObjectKind::Fence);
        state.fences.remove(&fence.as_raw());
    }

    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        _wait_all: bool,
        _timeout: u64,
    ) -> VkResult<()> {
        let state = self.state();
        if fences.iter().all(|fence| state.fence_signaled(*fence)) {
            Ok(())
        } else {
            // nothing is in flight that could ever signal it
            Err(vk::Result::TIMEOUT)
        }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state();
        for fence in fences {
            if let Some(signaled) = state.fences.get_mut(&fence.as_raw()) {
                *signaled = false;
            }
        }
        Ok(())
    }

    unsafe fn create_semaphore(
        &self,
        _info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        let raw = state.create(ObjectKind::Semaphore);
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        state.destroy(semaphore.as_raw(), ObjectKind::Semaphore);
        state.semaphores.remove(&semaphore.as_raw());
    }

    unsafe fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        state.submits += 1;
        for submit in submits {
            let waits = unsafe { raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count) };
            for semaphore in waits {
                state.wait_semaphore(*semaphore, "submit")?;
            }
            let signals =
                unsafe { raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count) };
            for semaphore in signals {
                state.signal_semaphore(*semaphore, "submit")?;
            }
        }
        if fence != vk::Fence::null() {
            state.signal_fence(fence, "submit")?;
        }
        Ok(())
    }
}
