//! Vulkan 后端：vk-mem 分配的持久映射 buffer，以及 ash 的 command pool

mod command_allocator;
mod ring_buffer;

pub use command_allocator::VkCommandAllocator;
pub use ring_buffer::VkRingBuffer;
