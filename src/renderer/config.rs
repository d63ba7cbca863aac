use std::ffi::CStr;
use ash::vk;
use crate::renderer::contexts::present_ctx::{EngineOwnership, PresentOptions};

/// Contains configuration options for the renderer like vsync, validation, and the
/// presentation engine's ownership model
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub vsync: bool,
    pub ownership: EngineOwnership,
    pub clipped: bool,
    pub enable_validation: bool,
    pub preferred_surface_formats: Vec<vk::Format>,
    pub requested_queues: vk::QueueFlags,
    pub device_extensions: Vec<&'static CStr>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            ownership: EngineOwnership::Full,
            clipped: true,
            enable_validation: cfg!(debug_assertions),
            preferred_surface_formats: vec![
                vk::Format::B8G8R8A8_UNORM,
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::A8B8G8R8_UNORM_PACK32,
            ],
            requested_queues: vk::QueueFlags::GRAPHICS
                | vk::QueueFlags::COMPUTE
                | vk::QueueFlags::TRANSFER,
            device_extensions: Vec::new(),
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `FRAMECHAIN_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(vsync) = lookup("FRAMECHAIN_VSYNC").and_then(|v| parse_flag(&v)) {
            config.vsync = vsync;
        }
        if let Some(clipped) = lookup("FRAMECHAIN_CLIPPED").and_then(|v| parse_flag(&v)) {
            config.clipped = clipped;
        }
        if let Some(validation) = lookup("FRAMECHAIN_VALIDATION").and_then(|v| parse_flag(&v)) {
            config.enable_validation = validation;
        }
        if let Some(ownership) = lookup("FRAMECHAIN_OWNERSHIP") {
            match ownership.trim().to_ascii_lowercase().as_str() {
                "full" => config.ownership = EngineOwnership::Full,
                "images" | "images_only" => config.ownership = EngineOwnership::ImagesOnly,
                other => log::warn!("Ignoring unknown FRAMECHAIN_OWNERSHIP value: {}", other),
            }
        }

        config
    }

    pub fn present_options(&self) -> PresentOptions {
        PresentOptions {
            ownership: self.ownership,
            clipped: self.clipped,
            preferred_formats: self.preferred_surface_formats.clone(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        other => {
            log::warn!("Ignoring unrecognized boolean value: {}", other);
            None
        }
    }
}
