use std::ffi::{CStr, CString};
use ash::vk;
use color_eyre::Result;

/// Combined depth/stencil formats, highest precision first
pub const DEPTH_STENCIL_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Immutable snapshot of a physical device, captured once at selection time.
/// Every device-selection query is answered from this snapshot.
#[derive(Clone, Debug, Default)]
pub struct PhysicalDeviceInfo {
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<CString>,
    pub depth_format_properties: Vec<(vk::Format, vk::FormatProperties)>,
}

impl PhysicalDeviceInfo {
    pub fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            let features = instance.get_physical_device_features(physical_device);
            let memory = instance.get_physical_device_memory_properties(physical_device);
            let queue_families = instance
                .get_physical_device_queue_family_properties(physical_device);
            let extensions = instance
                .enumerate_device_extension_properties(physical_device)?
                .iter()
                .filter_map(|ext| ext.extension_name_as_c_str().ok())
                .map(CStr::to_owned)
                .collect();
            let depth_format_properties = DEPTH_STENCIL_CANDIDATES
                .iter()
                .map(|format| {
                    let props = instance
                        .get_physical_device_format_properties(physical_device, *format);
                    (*format, props)
                })
                .collect();

            Ok(Self {
                properties,
                features,
                memory,
                queue_families,
                extensions,
                depth_format_properties,
            })
        }
    }

    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed device>"))
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    pub fn select_queue_family(&self, requested: vk::QueueFlags) -> Option<u32> {
        select_queue_family(&self.queue_families, requested)
    }

    pub fn select_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        select_memory_type(&self.memory, type_bits, required)
    }

    pub fn select_depth_stencil_format(&self) -> Option<vk::Format> {
        select_depth_stencil_format(&self.depth_format_properties)
    }
}

/// Index of the queue family that best satisfies `requested`.
///
/// A request that is purely compute or purely transfer first looks for a family
/// without graphics capability, so that such work does not queue up behind
/// rendering. Otherwise the first family whose flags are a superset of the request
/// wins.
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    requested: vk::QueueFlags,
) -> Option<u32> {
    let dedicated_request = !requested.is_empty()
        && (vk::QueueFlags::COMPUTE.contains(requested)
            || vk::QueueFlags::TRANSFER.contains(requested));

    if dedicated_request {
        let dedicated = families.iter().position(|family| {
            family.queue_count > 0
                && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && family.queue_flags.contains(requested)
        });
        if let Some(index) = dedicated {
            return Some(index as u32);
        }
    }

    families
        .iter()
        .position(|family| family.queue_count > 0 && family.queue_flags.contains(requested))
        .map(|index| index as u32)
}

/// Lowest memory type index allowed by `type_bits` whose property flags contain
/// `required`
pub fn select_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1u32 << *i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
}

pub fn select_depth_stencil_format(
    format_properties: &[(vk::Format, vk::FormatProperties)],
) -> Option<vk::Format> {
    DEPTH_STENCIL_CANDIDATES.iter().copied().find(|candidate| {
        format_properties.iter().any(|(format, props)| {
            format == candidate
                && props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
    })
}
