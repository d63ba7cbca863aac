use ash::vk;
use color_eyre::Result;
use crate::renderer::vk::api::DeviceApi;

/// Where a frame slot is in the acquire, record, submit, present cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    /// Fence waited on, nothing pending
    #[default]
    Idle,
    /// An image was acquired. The acquire semaphore is pending and the fence is reset.
    Recording,
    /// Commands were submitted. The render semaphore is pending until presented.
    Submitted,
    /// Handed to the presentation engine. GPU work may still be in flight.
    Presented,
}

impl FrameState {
    /// True while the slot holds a semaphore signal that no queue operation will
    /// consume
    pub fn mid_cycle(self) -> bool {
        matches!(self, FrameState::Recording | FrameState::Submitted)
    }
}

/// Synchronization primitives for one frame in flight
pub struct FrameSlot {
    // Signals when all rendering commands of this slot have finished execution.
    pub fence: vk::Fence,

    // Signals when the acquired image is ready to be rendered to.
    pub acquire_semaphore: vk::Semaphore,

    // Signals when rendering has finished and the image can be presented.
    pub render_semaphore: vk::Semaphore,

    pub state: FrameState,
}

impl FrameSlot {
    pub fn new<D: DeviceApi + ?Sized>(device: &D) -> Result<Self> {
        let mut slot = Self {
            fence: vk::Fence::null(),
            acquire_semaphore: vk::Semaphore::null(),
            render_semaphore: vk::Semaphore::null(),
            state: FrameState::Idle,
        };

        let created = (|| -> Result<()> {
            slot.fence = create_signaled_fence(device)?;
            slot.acquire_semaphore = create_semaphore(device)?;
            slot.render_semaphore = create_semaphore(device)?;
            Ok(())
        })();

        match created {
            Ok(()) => Ok(slot),
            Err(err) => {
                unsafe { slot.destroy(device) };
                Err(err)
            }
        }
    }

    /// Replaces whatever a slot caught mid-cycle left pending, once the device is
    /// idle. The fence ends up signaled and both semaphores unsignaled.
    pub fn recover<D: DeviceApi + ?Sized>(&mut self, device: &D) -> Result<()> {
        match self.state {
            FrameState::Recording => unsafe {
                device.destroy_semaphore(self.acquire_semaphore);
                self.acquire_semaphore = vk::Semaphore::null();
                self.acquire_semaphore = create_semaphore(device)?;

                // reset after the acquire, and nothing was submitted to signal it
                device.destroy_fence(self.fence);
                self.fence = vk::Fence::null();
                self.fence = create_signaled_fence(device)?;
            },
            FrameState::Submitted => unsafe {
                device.destroy_semaphore(self.render_semaphore);
                self.render_semaphore = vk::Semaphore::null();
                self.render_semaphore = create_semaphore(device)?;
            },
            FrameState::Idle | FrameState::Presented => {}
        }
        self.state = FrameState::Idle;
        Ok(())
    }

    /// # Safety
    ///
    /// The device must be done with every primitive of this slot.
    pub unsafe fn destroy<D: DeviceApi + ?Sized>(&mut self, device: &D) {
        unsafe {
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence);
            }
            if self.acquire_semaphore != vk::Semaphore::null() {
                device.destroy_semaphore(self.acquire_semaphore);
            }
            if self.render_semaphore != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_semaphore);
            }
        }
        self.fence = vk::Fence::null();
        self.acquire_semaphore = vk::Semaphore::null();
        self.render_semaphore = vk::Semaphore::null();
        self.state = FrameState::Idle;
    }
}

fn create_signaled_fence<D: DeviceApi + ?Sized>(device: &D) -> Result<vk::Fence> {
    // Created signaled so the first wait on a fresh slot returns immediately
    let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
    Ok(unsafe { device.create_fence(&info)? })
}

fn create_semaphore<D: DeviceApi + ?Sized>(device: &D) -> Result<vk::Semaphore> {
    Ok(unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default())? })
}
