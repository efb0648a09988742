use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::align_up;
use crate::linear_ring::LinearRing;
use crate::ring_memory::{BufferRegion, RingAllocation, RingMemory};

#[derive(Debug, Clone)]
pub struct StaticBufferPoolDesc {
    pub alignment: u64,
    pub name: String,
}

impl Default for StaticBufferPoolDesc {
    fn default() -> Self {
        Self {
            alignment: 256,
            name: "static-buffer-pool".to_string(),
        }
    }
}

struct PoolState {
    ring: LinearRing,
    /// 上一次 `take_dirty_range` 之后写入的范围
    dirty: Option<Range<u64>>,
}

/// 场景生命周期内的几何数据
///
/// 只做 bump 分配，不单独释放，场景卸载时整体 `reset`。
/// 数据先写入 CPU 可见的内存，之后由上层把 [`StaticBufferPool::take_dirty_range`]
/// 返回的范围拷贝到 device-local 的 buffer 中。
pub struct StaticBufferPool<M: RingMemory> {
    memory: M,
    state: Mutex<PoolState>,
    alignment: u64,
    name: String,
}

// new & init
impl<M: RingMemory> StaticBufferPool<M> {
    pub fn new(desc: &StaticBufferPoolDesc, memory: M) -> Self {
        assert!(desc.alignment > 0, "StaticBufferPool alignment must be positive");
        log::info!("StaticBufferPool[{}] created: {} bytes", desc.name, memory.size());

        let ring = LinearRing::new(memory.size());
        Self {
            memory,
            state: Mutex::new(PoolState { ring, dirty: None }),
            alignment: desc.alignment,
            name: desc.name.clone(),
        }
    }

    #[inline]
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl<M: RingMemory> StaticBufferPool<M> {
    /// 分配 `count * stride` 字节（向上对齐到 `alignment`）
    ///
    /// # Panics
    /// pool 中剩余的空间不足
    pub fn alloc_buffer(&self, count: u64, stride: u64) -> RingAllocation<'_, M::Handle> {
        let (offset, size) = {
            let mut state = self.lock_state();
            // 乘法溢出或超过容量的请求在对齐之前拒绝
            let size = count
                .checked_mul(stride)
                .filter(|size| *size <= state.ring.capacity())
                .map(|size| align_up(size, self.alignment));
            let Some((offset, size)) = size.and_then(|size| state.ring.alloc(size).map(|offset| (offset, size))) else {
                log::error!(
                    "StaticBufferPool[{}] ran out of memory: request {} x {} bytes, used {}/{}; please increase the pool size",
                    self.name,
                    count,
                    stride,
                    state.ring.used(),
                    state.ring.capacity()
                );
                panic!("StaticBufferPool[{}] overflow", self.name);
            };

            let written = offset..offset + size;
            state.dirty = Some(match state.dirty.take() {
                Some(dirty) => dirty.start.min(written.start)..dirty.end.max(written.end),
                None => written,
            });
            (offset, size)
        };

        // SAFETY: offset + size <= memory.size()
        let ptr = self.memory.mapped_ptr().map(|base| unsafe { base.add(offset as usize) });
        // SAFETY: bump 分配的范围互不重叠，`reset` 需要 `&mut self`
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

    /// 分配并写入 `data`
    pub fn alloc_buffer_with_data<T: bytemuck::Pod>(&self, data: &[T]) -> BufferRegion<M::Handle> {
        let mut allocation = self.alloc_buffer(data.len() as u64, size_of::<T>() as u64);
        if !data.is_empty() {
            allocation.write(data);
        }
        allocation.into_region()
    }

    /// 取出自上一次调用以来写入过的字节范围，并刷新到 GPU 可见
    pub fn take_dirty_range(&self) -> anyhow::Result<Option<Range<u64>>> {
        let dirty = self.lock_state().dirty.take();
        if let Some(range) = &dirty {
            self.memory.flush(range.start, range.end - range.start)?;
        }
        Ok(dirty)
    }

    /// 场景卸载：释放所有分配
    pub fn reset(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        log::info!("StaticBufferPool[{}] reset, {} bytes released", self.name, state.ring.used());
        state.ring.free_all();
        state.dirty = None;
    }
}
// getters
impl<M: RingMemory> StaticBufferPool<M> {
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
        self.lock_state().ring.used()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.memory.size()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<M: RingMemory> Drop for StaticBufferPool<M> {
    fn drop(&mut self) {
        log::info!("StaticBufferPool[{}] dropped.", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_memory::HostRingMemory;

    fn pool(size: u64) -> StaticBufferPool<HostRingMemory> {
        truvis_crate_tools::init_log::init_log();
        StaticBufferPool::new(&StaticBufferPoolDesc::default(), HostRingMemory::new(size, 9))
    }

    #[test]
    fn test_alloc_buffer_is_bump_and_aligned() {
        let pool = pool(2048);
        let vertices = pool.alloc_buffer(10, 12).into_region();
        let indices = pool.alloc_buffer(300, 4).into_region();

        assert_eq!((vertices.offset, vertices.size), (0, 256));
        assert_eq!((indices.offset, indices.size), (256, 1280));
        assert_eq!(vertices.handle, 9);
        assert_eq!(pool.used(), 1536);
    }

    #[test]
    fn test_dirty_range_covers_writes_since_last_take() {
        let pool = pool(4096);
        assert_eq!(pool.take_dirty_range().unwrap(), None);

        pool.alloc_buffer_with_data(&[1.0_f32, 2.0, 3.0]);
        pool.alloc_buffer_with_data(&[7_u16; 200]);
        assert_eq!(pool.take_dirty_range().unwrap(), Some(0..768));
        assert_eq!(pool.take_dirty_range().unwrap(), None);

        pool.alloc_buffer(1, 4);
        assert_eq!(pool.take_dirty_range().unwrap(), Some(768..1024));
    }

    #[test]
    fn test_data_is_written() {
        let mut pool = pool(1024);
        let indices = [0_u32, 1, 2, 2, 1, 3];
        let region = pool.alloc_buffer_with_data(&indices);

        let offset = region.offset as usize;
        let contents = pool.memory.contents();
        assert_eq!(&contents[offset..offset + 24], bytemuck::cast_slice::<u32, u8>(&indices));
    }

    #[test]
    fn test_reset_releases_everything() {
        let mut pool = pool(512);
        pool.alloc_buffer(2, 256);
        assert_eq!(pool.used(), 512);

        pool.reset();
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.take_dirty_range().unwrap(), None);
        assert_eq!(pool.alloc_buffer(1, 1).offset(), 0);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_oversized_request_is_fatal() {
        let pool = pool(512);
        pool.alloc_buffer(u64::MAX / 4, 8);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_overflow_is_fatal() {
        let pool = pool(512);
        pool.alloc_buffer(1, 300);
        pool.alloc_buffer(1, 1);
    }
}
