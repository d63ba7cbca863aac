use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::vk::api::DeviceApi;

/// Submits one command buffer and blocks until the GPU has executed it. The
/// transient fence is destroyed on every path.
pub fn submit_and_wait<D: DeviceApi + ?Sized>(
    device: &D,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default())? };

    let command_buffers = [command_buffer];
    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
    let result = unsafe {
        device
            .queue_submit(queue, &[submit], fence)
            .and_then(|()| device.wait_for_fences(&[fence], true, u64::MAX))
    };

    unsafe { device.destroy_fence(fence) };
    Ok(result?)
}

// Instantly execute some commands on the GPU without going through the frame cycle.
// Records into a one-time command buffer from `pool` that is freed afterwards.
pub fn immediate_submit<D, F>(
    device: &D,
    pool: vk::CommandPool,
    queue: vk::Queue,
    func: F,
) -> Result<()>
where
    D: DeviceApi + ?Sized,
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = unsafe { device.allocate_command_buffers(&alloc_info)? }
        .into_iter()
        .next()
        .ok_or_eyre("Command buffer allocation returned nothing")?;

    let result = record_and_submit(device, queue, cmd, func);

    unsafe { device.free_command_buffers(pool, &[cmd]) };
    result
}

fn record_and_submit<D, F>(
    device: &D,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    func: F,
) -> Result<()>
where
    D: DeviceApi + ?Sized,
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    // This command buffer will be used exactly once
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };

    func(cmd)?;

    unsafe { device.end_command_buffer(cmd)? };
    submit_and_wait(device, queue, cmd)
}
