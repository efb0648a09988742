use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::Context;
use ash::vk;
use vk_mem::Alloc;

use crate::ring_memory::RingMemory;

/// 持久映射的 host-visible buffer，作为 ring 的背后内存
///
/// 创建时一次性 map，直到销毁才 unmap。
pub struct VkRingBuffer {
    allocator: Arc<vk_mem::Allocator>,
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    map_ptr: NonNull<u8>,
    name: String,
}

// SAFETY: 映射的内存由 ring 分配成互不重叠的范围，句柄本身可以跨线程使用
unsafe impl Send for VkRingBuffer {}
unsafe impl Sync for VkRingBuffer {}

// init & destroy
impl VkRingBuffer {
    /// - size: 向上对齐到 64 字节
    /// - usage: 例如 `UNIFORM_BUFFER | VERTEX_BUFFER | INDEX_BUFFER`
    pub fn new(
        allocator: Arc<vk_mem::Allocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let size = crate::align_up(size, 64);
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let (handle, mut allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .with_context(|| format!("create ring buffer {} ({} bytes)", name.as_ref(), size))?;

        let map_ptr = match unsafe { allocator.map_memory(&mut allocation) } {
            Ok(ptr) => NonNull::new(ptr).context("vk-mem returned a null mapping"),
            Err(e) => Err(anyhow::Error::new(e).context("map ring buffer")),
        };
        let map_ptr = match map_ptr {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                return Err(e);
            }
        };

        log::info!("VkRingBuffer[{}] created: {} bytes", name.as_ref(), size);
        Ok(Self {
            allocator,
            handle,
            allocation,
            size,
            map_ptr,
            name: name.as_ref().to_string(),
        })
    }
}
impl Drop for VkRingBuffer {
    fn drop(&mut self) {
        log::info!("VkRingBuffer[{}] destroyed.", self.name);
        unsafe {
            self.allocator.unmap_memory(&mut self.allocation);
            self.allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}

impl RingMemory for VkRingBuffer {
    type Handle = vk::Buffer;

    #[inline]
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        Some(self.map_ptr)
    }

    fn flush(&self, offset: u64, size: u64) -> anyhow::Result<()> {
        self.allocator
            .flush_allocation(&self.allocation, offset, size)
            .with_context(|| format!("flush ring buffer {}", self.name))
    }
}
