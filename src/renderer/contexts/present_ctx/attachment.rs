use ash::vk;
use color_eyre::eyre::{OptionExt, WrapErr};
use color_eyre::Result;
use crate::renderer::vk::api::DeviceApi;
use crate::renderer::vk::util;

#[derive(Clone, Debug)]
pub struct AttachmentCreateInfo {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub name: String,
}

impl AttachmentCreateInfo {
    pub fn depth_stencil(format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: util::depth_aspect_mask(format),
            name: "Depth Attachment".into(),
        }
    }
}

struct AttachmentResources {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// A device-local image with its own memory and view, bound to a render pass.
/// Either all three objects exist or none do.
pub struct Attachment<'a, D: DeviceApi> {
    info: AttachmentCreateInfo,
    resources: Option<AttachmentResources>,
    device: &'a D,
}

impl<'a, D: DeviceApi> Attachment<'a, D> {
    pub fn new(
        device: &'a D,
        info: AttachmentCreateInfo,
    ) -> Result<Self> {
        let mut attachment = Self {
            info,
            resources: None,
            device,
        };
        attachment.init()?;
        Ok(attachment)
    }

    /// Keeps the creation parameters without touching the device. The first
    /// [`Attachment::recreate`] allocates the image.
    pub fn deferred(device: &'a D, info: AttachmentCreateInfo) -> Self {
        Self {
            info,
            resources: None,
            device,
        }
    }

    /// Destroys the current image and builds a new one of `extent`, keeping every
    /// other creation parameter
    pub fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.destroy();
        self.info.extent = extent;
        self.init()
    }

    fn init(&mut self) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }

        let device = self.device;
        let info = &self.info;

        let image_info = vk::ImageCreateInfo::default()
            .format(info.format)
            .usage(info.usage)
            .extent(vk::Extent3D {
                width: info.extent.width,
                height: info.extent.height,
                depth: 1,
            })
            .image_type(vk::ImageType::TYPE_2D)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info)? };

        let memory = match Self::allocate(device, image) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image) };
                return Err(err).wrap_err_with(|| format!("Failed to back {}", info.name));
            }
        };

        let view_info = util::image_view_create_info(image, info.format, info.aspect);
        let view = match unsafe { device.create_image_view(&view_info) } {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.destroy_image(image);
                    device.free_memory(memory);
                }
                return Err(err.into());
            }
        };

        log::debug!(
            "Created {} ({:?}, {}x{})",
            info.name,
            info.format,
            info.extent.width,
            info.extent.height,
        );

        self.resources = Some(AttachmentResources {
            image,
            memory,
            view,
        });
        Ok(())
    }

    fn allocate(device: &D, image: vk::Image) -> Result<vk::DeviceMemory> {
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = device
            .physical_info()
            .select_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .ok_or_eyre("No device-local memory type fits the attachment")?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { device.allocate_memory(&alloc_info)? };

        if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe { device.free_memory(memory) };
            return Err(err.into());
        }
        Ok(memory)
    }

    pub fn destroy(&mut self) {
        if let Some(resources) = self.resources.take() {
            unsafe {
                self.device.destroy_image_view(resources.view);
                self.device.destroy_image(resources.image);
                self.device.free_memory(resources.memory);
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.resources.is_some()
    }

    pub fn image(&self) -> Option<vk::Image> {
        self.resources.as_ref().map(|r| r.image)
    }

    pub fn view(&self) -> Option<vk::ImageView> {
        self.resources.as_ref().map(|r| r.view)
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.info.usage
    }
}

impl<D: DeviceApi> Drop for Attachment<'_, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
