use anyhow::Context;
use ash::vk;

use crate::command_list_ring::CommandListAllocator;

/// 一个 frame slot 的 command pool
///
/// 使用 TRANSIENT pool，`reset` 只会把 command buffer 置回初始状态，不会释放它们。
pub struct VkCommandAllocator {
    device: ash::Device,
    pool: vk::CommandPool,
}

// init & destroy
impl VkCommandAllocator {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> anyhow::Result<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_ci, None) }.context("create command pool")?;

        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    #[inline]
    pub fn vk_command_pool(&self) -> vk::CommandPool {
        self.pool
    }
}
impl Drop for VkCommandAllocator {
    fn drop(&mut self) {
        // pool 销毁时会一并释放从它分配的 command buffer
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

impl CommandListAllocator for VkCommandAllocator {
    type List = vk::CommandBuffer;

    fn allocate(&mut self, count: usize) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        let count = u32::try_from(count).with_context(|| format!("{count} command buffers exceed u32"))?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&info) }.context("allocate command buffers")
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        unsafe { self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }
            .context("reset command pool")
    }
}
