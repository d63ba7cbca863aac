use std::hash::Hash;
use ash::vk;
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::physical::select_queue_family;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
    ) -> Self {
        Self {
            index,
            properties,
        }
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::TRANSFER)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// Queue family indices resolved for a device. Compute and transfer alias the
/// graphics family when no better family exists or when they were not requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueAssignment {
    /// Returns `None` when the device has no graphics family, or when a requested
    /// compute/transfer capability is missing entirely.
    pub fn resolve(
        families: &[vk::QueueFamilyProperties],
        requested: vk::QueueFlags,
    ) -> Option<Self> {
        let graphics = select_queue_family(families, vk::QueueFlags::GRAPHICS)?;

        let compute = if requested.contains(vk::QueueFlags::COMPUTE) {
            select_queue_family(families, vk::QueueFlags::COMPUTE)?
        } else {
            graphics
        };

        let transfer = if requested.contains(vk::QueueFlags::TRANSFER) {
            select_queue_family(families, vk::QueueFlags::TRANSFER)?
        } else {
            graphics
        };

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    /// Distinct family indices in graphics, compute, transfer order.
    /// One queue-create entry is made per index.
    pub fn queue_create_families(&self) -> SmallVec<[u32; 3]> {
        let mut families = SmallVec::new();
        for index in [self.graphics, self.compute, self.transfer] {
            if !families.contains(&index) {
                families.push(index);
            }
        }
        families
    }
}
