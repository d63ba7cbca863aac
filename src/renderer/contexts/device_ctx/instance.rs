use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::window::Window;
use crate::renderer::config::RenderConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug_messenger: Option<DebugMessenger>,
}

/// Routes validation messages into `log` for as long as it lives
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl RenderInstance {
    /// `display` is the windowing system the instance must be able to present to.
    /// Without one, no surface extensions are enabled.
    pub fn new(
        display: Option<RawDisplayHandle>,
        config: &RenderConfig,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let layers = Self::supported_layers(&entry, config.enable_validation)?;
        let extensions = Self::supported_extensions(&entry, display, config.enable_validation)?;
        let debug_enabled = extensions.contains(&ash::ext::debug_utils::NAME);

        let instance = {
            let application_info = vk::ApplicationInfo::default()
                .application_name(c"framechain")
                .engine_name(c"framechain")
                .api_version(vk::API_VERSION_1_2);
            let enabled_layer_names = layers
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>();
            let enabled_extension_names = extensions
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            let mut debug_info = debug_utils_messenger_create_info();
            let mut instance_info = vk::InstanceCreateInfo::default()
                .application_info(&application_info)
                .enabled_layer_names(&enabled_layer_names)
                .enabled_extension_names(&enabled_extension_names);
            if debug_enabled {
                // Also covers messages from instance creation and destruction
                instance_info = instance_info.push_next(&mut debug_info);
            }

            #[cfg(target_os = "macos")]
            let instance_info = instance_info
                .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

            unsafe { entry.create_instance(&instance_info, None)? }
        };

        let debug_messenger = if debug_enabled {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    log::error!("Failed to create debug messenger: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug_messenger,
        })
    }

    /// Validation layers to enable. Missing layers are reported and skipped.
    fn supported_layers(
        entry: &ash::Entry,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        if !enable_validation {
            return Ok(Vec::new());
        }

        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        let supported = available
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if supported {
            Ok(vec![VALIDATION_LAYER])
        } else {
            log::error!("Validation layer {:?} not supported", VALIDATION_LAYER);
            Ok(Vec::new())
        }
    }

    /// Extensions to enable. Missing extensions are reported and skipped.
    fn supported_extensions(
        entry: &ash::Entry,
        display: Option<RawDisplayHandle>,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut requested = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)?
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(*ext) })
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };

        if enable_validation {
            requested.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            requested.push(ash::khr::portability_enumeration::NAME);
            requested.push(ash::khr::get_physical_device_properties2::NAME);
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let (supported, unsupported): (Vec<_>, Vec<_>) = requested.into_iter().partition(|req| {
            available
                .iter()
                .any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == *req))
        });
        for ext in &unsupported {
            log::error!("Instance extension not supported: {:?}", ext);
        }
        Ok(supported)
    }

    pub fn create_surface(&self, window: &Window) -> Result<Surface<'_>> {
        let handle = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        Ok(Surface {
            handle,
            instance: self,
        })
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        if let Some(messenger) = self.debug_messenger.take() {
            unsafe {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.messenger, None)
            };
        }
        unsafe { self.instance.destroy_instance(None) };
    }
}

impl DebugMessenger {
    fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let info = debug_utils_messenger_create_info();
        let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
        Ok(Self {
            loader,
            messenger,
        })
    }
}

/// Window surface, destroyed when dropped. Every presentation chain built on it
/// has to be gone by then.
pub struct Surface<'a> {
    handle: vk::SurfaceKHR,
    instance: &'a RenderInstance,
}

impl Surface<'_> {
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface<'_> {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader
                .destroy_surface(self.handle, None)
        };
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            c"<no message>"
        } else {
            CStr::from_ptr((*p_callback_data).p_message)
        }
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::debug!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown severity]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
