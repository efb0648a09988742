use std::marker::PhantomData;
use std::ptr::NonNull;

/// ring 分配器背后的一整块内存
///
/// 通常是一个大的 GPU buffer，创建时一次性分配，之后不会扩容：
/// 已经录制进 command buffer 的 (handle, offset) 在扩容后会失效。
pub trait RingMemory {
    /// 传给渲染 pass 的资源句柄（例如 `vk::Buffer`），对 ring 来说是不透明的
    type Handle: Copy;

    fn handle(&self) -> Self::Handle;

    fn size(&self) -> u64;

    /// CPU 可写的映射地址；纯 device-local 的内存返回 `None`
    fn mapped_ptr(&self) -> Option<NonNull<u8>>;

    /// 将 CPU 写入的范围对 GPU 可见，coherent 内存不需要处理
    fn flush(&self, _offset: u64, _size: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 一次分配在资源中的位置，相当于 `VkDescriptorBufferInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion<H> {
    pub handle: H,
    pub offset: u64,
    pub size: u64,
}

/// 一次 ring 分配：资源中的位置 + CPU 可写的视图
///
/// 生命周期绑定在分配它的 ring 上，ring 进入下一帧（需要 `&mut`）之前必须释放。
pub struct RingAllocation<'a, H> {
    region: BufferRegion<H>,
    ptr: Option<NonNull<u8>>,
    _ring: PhantomData<&'a ()>,
}

impl<'a, H: Copy> RingAllocation<'a, H> {
    /// # Safety
    /// `ptr` 为 `Some` 时，必须指向至少 `region.size` 字节、在 `'a` 内有效，
    /// 并且没有被其他存活的分配引用的内存
    pub(crate) unsafe fn new(region: BufferRegion<H>, ptr: Option<NonNull<u8>>) -> Self {
        Self {
            region,
            ptr,
            _ring: PhantomData,
        }
    }

    #[inline]
    pub fn region(&self) -> BufferRegion<H> {
        self.region
    }

    #[inline]
    pub fn handle(&self) -> H {
        self.region.handle
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.region.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.region.size
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.ptr.is_some()
    }

    /// CPU 可写的视图，未映射的内存返回 `None`
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        // SAFETY: 构造时保证了指针有效且范围独占，`&mut self` 保证同一时间只有一个视图
        self.ptr
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.region.size as usize) })
    }

    /// 从起始位置写入 `data`
    ///
    /// # Panics
    /// 内存未映射，或者 `data` 超过分配的大小
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = self.region.size;
        let Some(dst) = self.data_mut() else {
            panic!("write to an allocation of unmapped ring memory");
        };
        assert!(
            bytes.len() <= dst.len(),
            "write of {} bytes overflows a {} byte allocation",
            bytes.len(),
            size
        );
        dst[..bytes.len()].copy_from_slice(bytes);
    }

    /// 释放 CPU 视图，只保留位置信息
    #[inline]
    pub fn into_region(self) -> BufferRegion<H> {
        self.region
    }
}

/// 进程内存实现的 [`RingMemory`]
///
/// 用于 CPU 侧的暂存数据和测试；句柄是调用方给定的任意 id。
pub struct HostRingMemory {
    ptr: NonNull<[u8]>,
    handle: u64,
}

// SAFETY: HostRingMemory 独占这块内存，分配出去的范围由 ring 保证互不重叠
unsafe impl Send for HostRingMemory {}
unsafe impl Sync for HostRingMemory {}

impl HostRingMemory {
    pub fn new(size: u64, handle: u64) -> Self {
        let memory = vec![0_u8; size as usize].into_boxed_slice();
        Self {
            // SAFETY: Box::into_raw 不会返回空指针
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(memory)) },
            handle,
        }
    }

    /// 读取整块内存，调用方需要保证此时没有存活的分配在写入
    pub fn contents(&mut self) -> &[u8] {
        // SAFETY: `&mut self` 保证没有其他借用
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for HostRingMemory {
    fn drop(&mut self) {
        // SAFETY: ptr 来自 Box::into_raw，只会释放一次
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }
}

impl RingMemory for HostRingMemory {
    type Handle = u64;

    #[inline]
    fn handle(&self) -> u64 {
        self.handle
    }

    #[inline]
    fn size(&self) -> u64 {
        self.ptr.len() as u64
    }

    #[inline]
    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        Some(self.ptr.cast())
    }
}
