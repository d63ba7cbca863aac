use std::ffi::CString;
use ash::vk;
use glam::Vec4;

/// Command-buffer labels shown by GPU debuggers. Resolved once per device and
/// handed to whoever records commands.
pub struct DebugLabels {
    loader: ash::ext::debug_utils::Device,
}

impl DebugLabels {
    pub fn new(instance: &ash::Instance, device: &ash::Device) -> Self {
        Self {
            loader: ash::ext::debug_utils::Device::new(instance, device),
        }
    }

    /// Opens a labelled region; pair with [`DebugLabels::end`]
    pub fn begin(&self, cmd: vk::CommandBuffer, caption: &str, color: Vec4) {
        // CString rejects interior NUL bytes
        let name = CString::new(caption.replace('\0', " ")).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color.to_array());
        unsafe { self.loader.cmd_begin_debug_utils_label(cmd, &label) };
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.loader.cmd_end_debug_utils_label(cmd) };
    }
}
