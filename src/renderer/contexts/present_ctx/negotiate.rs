//! Pure negotiation between what the caller wants and what the surface offers

use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// Picks the first preferred format the surface offers, else whatever the surface
/// lists first. A lone `UNDEFINED` entry means the surface takes any format.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: &[vk::Format],
) -> Result<vk::SurfaceFormatKHR> {
    let first = available
        .first()
        .ok_or_else(|| eyre!("Surface reports no supported formats"))?;

    if available.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(vk::SurfaceFormatKHR {
            format: preferred.first().copied().unwrap_or(vk::Format::B8G8R8A8_UNORM),
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    let chosen = preferred
        .iter()
        .find_map(|format| available.iter().find(|a| a.format == *format))
        .unwrap_or(first);
    Ok(*chosen)
}

/// FIFO is always available and is the vsync mode. Without vsync, mailbox beats
/// immediate.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    vsync: bool,
) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One image more than the minimum, clamped to the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

pub fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_PREFERENCE
        .into_iter()
        .find(|mode| caps.supported_composite_alpha.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// The surface dictates the extent unless it reports the `0xFFFFFFFF` sentinel, in
/// which case the requested size is used, clamped to the surface's bounds when
/// those are reported.
pub fn resolve_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let clamp = |value: u32, min: u32, max: u32| {
        if max == 0 {
            value
        } else {
            value.max(min).min(max)
        }
    };
    vk::Extent2D {
        width: clamp(
            requested.width,
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: clamp(
            requested.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// Color attachment, plus transfer source/destination when the surface allows them
pub fn image_usage(caps: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let optional = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    vk::ImageUsageFlags::COLOR_ATTACHMENT | (caps.supported_usage_flags & optional)
}
