//! 帧流水线的 ring 分配器
//!
//! GPU 可能还在读取前几帧写入的数据，因此每帧的临时内存（uniform、
//! 动态顶点/索引、command buffer）不能在用完之后立即复用，
//! 而是在 `fif_count` 帧之后整体回收。
//!
//! - [`linear_ring::LinearRing`]：环形 bump 分配器，只能按 FIFO 顺序释放
//! - [`frame_ring::FrameRing`]：在 `LinearRing` 上按帧记账，`begin_frame` 时回收最老一帧
//! - [`dynamic_buffer_ring::DynamicBufferRing`]：每帧的 constant/vertex/index 数据
//! - [`static_buffer_pool::StaticBufferPool`]：场景生命周期内不释放的几何数据
//! - [`command_list_ring::CommandListRing`]：每帧一组 command list
//!
//! 帧循环必须在每帧开始时对每个 ring 调用一次 `begin_frame`，
//! 并且 ring 的 `fif_count` 等于同时 in-flight 的帧数。

#[cfg(feature = "profiling")]
macro_rules! profile_span {
    ($name:literal) => {
        tracy_client::span!($name)
    };
}

#[cfg(not(feature = "profiling"))]
macro_rules! profile_span {
    ($name:literal) => {
        ()
    };
}

pub mod command_list_ring;
pub mod dynamic_buffer_ring;
pub mod frame_ring;
pub mod linear_ring;
pub mod ring_memory;
pub mod static_buffer_pool;

#[cfg(feature = "vulkan")]
pub mod vulkan;

/// 默认的 frames in flight 数量
pub const FIF_COUNT: usize = 3;

/// 将 `value` 向上对齐到 `alignment` 的整数倍
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(1000, 64), 1024);
        assert_eq!(align_up(10, 12), 12);
    }
}
