pub mod attachment;
pub mod negotiate;
pub mod render_pass;
pub mod swapchain;

use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;

/// Which resources a presentation engine manages on top of the chain itself
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineOwnership {
    /// Render pass, depth attachment, framebuffers, command buffers, and frame
    /// sync are owned and driven by the engine
    #[default]
    Full,
    /// Only the chain, its images, and their views. The caller brings its own
    /// synchronization and render targets.
    ImagesOnly,
}

#[derive(Clone, Debug)]
pub struct PresentOptions {
    pub ownership: EngineOwnership,
    pub clipped: bool,
    /// Surface formats to look for, in order of preference
    pub preferred_formats: Vec<vk::Format>,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            ownership: EngineOwnership::Full,
            clipped: true,
            preferred_formats: vec![
                vk::Format::B8G8R8A8_UNORM,
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::A8B8G8R8_UNORM_PACK32,
            ],
        }
    }
}

/// Outcome of a steady-state acquire or present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Success,
    /// Still presentable, but the chain no longer matches the surface exactly
    Suboptimal,
    /// The chain can no longer be used with the surface and must be recreated
    OutOfDate,
}

impl FrameStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, FrameStatus::Success)
    }

    /// Maps the result of a present. Anything other than success, suboptimal,
    /// or out-of-date is an error.
    pub(crate) fn from_present(result: VkResult<bool>) -> Result<Self> {
        match result {
            Ok(false) => Ok(FrameStatus::Success),
            Ok(true) => Ok(FrameStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameStatus::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Maps the result of an image acquire, yielding the image index when one was
    /// acquired
    pub(crate) fn from_acquire(result: VkResult<(u32, bool)>) -> Result<(Self, Option<u32>)> {
        match result {
            Ok((index, false)) => Ok((FrameStatus::Success, Some(index))),
            Ok((index, true)) => Ok((FrameStatus::Suboptimal, Some(index))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((FrameStatus::OutOfDate, None)),
            Err(err) => Err(err.into()),
        }
    }
}
