// This module provides transparent abstractions for Vulkan objects and operations.

pub mod api;
pub mod util;

#[cfg(test)]
pub mod mock;
