use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::FIF_COUNT;
use crate::align_up;
use crate::frame_ring::FrameRing;
use crate::ring_memory::{BufferRegion, RingAllocation, RingMemory};

#[derive(Debug, Clone)]
pub struct DynamicBufferRingDesc {
    pub fif_count: usize,
    /// 每次分配的对齐，默认 256（`minUniformBufferOffsetAlignment` 的常见上限）
    pub alignment: u64,
    pub name: String,
}

impl Default for DynamicBufferRingDesc {
    fn default() -> Self {
        Self {
            fif_count: FIF_COUNT,
            alignment: 256,
            name: "dynamic-buffer-ring".to_string(),
        }
    }
}

impl DynamicBufferRingDesc {
    /// 背后内存的大小：向上对齐到 64 字节
    #[inline]
    pub fn memory_size(total_size: u64) -> u64 {
        align_up(total_size, 64)
    }
}

/// 每帧的 constant / vertex / index 数据
///
/// 一整块预先分配的内存（大小按所有 in-flight 帧的最坏情况估算），
/// 在上面按帧分配，`fif_count` 帧之后整体回收。
///
/// - 分配只需要 `&self`，多个录制线程可以同时分配；锁只保护 offset 记账，写入在锁外进行
/// - `begin_frame` 需要 `&mut self`，因此上一帧的 [`RingAllocation`] 不可能跨帧存活
/// - 空间不足是配置错误（容量需要由集成方估算），直接 panic，不会扩容
pub struct DynamicBufferRing<M: RingMemory> {
    memory: M,
    ring: Mutex<FrameRing>,
    alignment: u64,
    name: String,
}

// new & init
impl<M: RingMemory> DynamicBufferRing<M> {
    pub fn new(desc: &DynamicBufferRingDesc, memory: M) -> Self {
        assert!(desc.alignment > 0, "DynamicBufferRing alignment must be positive");
        let capacity = memory.size();
        log::info!(
            "DynamicBufferRing[{}] created: {} bytes, {} frames in flight",
            desc.name,
            capacity,
            desc.fif_count
        );

        Self {
            memory,
            ring: Mutex::new(FrameRing::new(desc.fif_count, capacity)),
            alignment: desc.alignment,
            name: desc.name.clone(),
        }
    }

    #[inline]
    fn lock_ring(&self) -> MutexGuard<'_, FrameRing> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl<M: RingMemory> DynamicBufferRing<M> {
    /// 分配 `size` 字节（向上对齐到 `alignment`）
    ///
    /// # Panics
    /// ring 中剩余的空间不足
    pub fn alloc(&self, size: u64) -> RingAllocation<'_, M::Handle> {
        let (offset, size) = {
            let mut ring = self.lock_ring();
            // 超过容量的请求在对齐之前拒绝，避免对齐时溢出
            let aligned = (size <= ring.capacity()).then(|| align_up(size, self.alignment));
            match aligned.and_then(|aligned| ring.alloc(aligned).map(|offset| (offset, aligned))) {
                Some(allocated) => allocated,
                None => self.out_of_memory(&format!("{size} bytes"), &ring),
            }
        };

        let ptr = self.memory.mapped_ptr().map(|base| {
            // SAFETY: offset + size <= capacity == memory.size()
            unsafe { base.add(offset as usize) }
        });
        // SAFETY: 范围由 FrameRing 分配，在回收（`begin_frame` 需要 `&mut self`）之前不会被再次分配
        unsafe {
            RingAllocation::new(
                BufferRegion {
                    handle: self.memory.handle(),
                    offset,
                    size,
                },
                ptr,
            )
        }
    }

    /// 分配并写入一个 constant buffer
    pub fn alloc_constant_buffer<T: bytemuck::Pod>(&self, data: &T) -> BufferRegion<M::Handle> {
        let mut allocation = self.alloc(size_of::<T>() as u64);
        allocation.write(std::slice::from_ref(data));
        allocation.into_region()
    }

    /// 分配 `vertex_count * stride` 字节的动态顶点数据
    #[inline]
    pub fn alloc_vertex_buffer(&self, vertex_count: u64, stride: u64) -> RingAllocation<'_, M::Handle> {
        self.alloc(self.array_size(vertex_count, stride))
    }

    /// 分配 `index_count * stride` 字节的动态索引数据
    #[inline]
    pub fn alloc_index_buffer(&self, index_count: u64, stride: u64) -> RingAllocation<'_, M::Handle> {
        self.alloc(self.array_size(index_count, stride))
    }

    fn array_size(&self, count: u64, stride: u64) -> u64 {
        match count.checked_mul(stride) {
            Some(size) => size,
            None => self.out_of_memory(&format!("{count} x {stride} bytes"), &self.lock_ring()),
        }
    }

    #[cold]
    fn out_of_memory(&self, request: &str, ring: &FrameRing) -> ! {
        log::error!(
            "DynamicBufferRing[{}] ran out of memory: request {}, used {}/{}; please increase the ring size",
            self.name,
            request,
            ring.used(),
            ring.capacity()
        );
        panic!("DynamicBufferRing[{}] overflow", self.name);
    }

    /// 将 CPU 写入的数据对 GPU 可见
    pub fn flush(&self, region: &BufferRegion<M::Handle>) -> anyhow::Result<()> {
        self.memory.flush(region.offset, region.size)
    }

    /// 帧边界：回收 `fif_count` 帧之前的分配
    pub fn begin_frame(&mut self) {
        let _span = profile_span!("DynamicBufferRing::begin_frame");
        self.ring.get_mut().unwrap_or_else(PoisonError::into_inner).begin_frame();
    }
}
// getters
impl<M: RingMemory> DynamicBufferRing<M> {
    #[inline]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    #[inline]
    pub fn handle(&self) -> M::Handle {
        self.memory.handle()
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.lock_ring().used()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.lock_ring().capacity()
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<M: RingMemory> Drop for DynamicBufferRing<M> {
    fn drop(&mut self) {
        log::info!("DynamicBufferRing[{}] dropped.", self.name);
    }
}
