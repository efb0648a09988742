use crate::linear_ring::LinearRing;

/// 按帧记账的 ring
///
/// 每帧分配的字节数（包括为避免跨越末尾而丢弃的填充）记录在当前帧的 slot 中，
/// `begin_frame` 时切换到下一个 slot，并整体释放这个 slot 在 `fif_count` 帧之前记录的字节。
/// 由 frames in flight 的约定，那一帧的 GPU 工作已经完成。
///
/// 分配不需要任何 per-allocation 的元数据，回收的粒度是一整帧。
#[derive(Debug, Clone)]
pub struct FrameRing {
    ring: LinearRing,

    /// 当前帧使用的 slot
    slot_index: usize,
    /// 每个 slot 上一次使用时分配的字节数
    slot_bytes: Vec<u64>,
    /// 当前帧已经分配的字节数
    bytes_this_frame: u64,
}

// new & init
impl FrameRing {
    pub fn new(fif_count: usize, capacity: u64) -> Self {
        assert!(fif_count > 0, "FrameRing needs at least one frame slot");
        Self {
            ring: LinearRing::new(capacity),
            slot_index: 0,
            slot_bytes: vec![0; fif_count],
            bytes_this_frame: 0,
        }
    }
}
// tools
impl FrameRing {
    /// 分配 `size` 字节，返回 offset；整帧空间不足时返回 `None`，且不改变任何状态
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        let padding = self.ring.padding_to_avoid_wrap(size);
        if self.ring.used() + padding + size > self.ring.capacity() {
            return None;
        }

        if padding > 0 {
            self.ring.alloc(padding)?;
            self.bytes_this_frame += padding;
        }

        let offset = self.ring.alloc(size)?;
        self.bytes_this_frame += size;
        Some(offset)
    }

    /// 帧边界：记录当前帧，切换 slot，回收新 slot 上一次记录的字节
    pub fn begin_frame(&mut self) {
        self.slot_bytes[self.slot_index] = self.bytes_this_frame;
        self.bytes_this_frame = 0;

        self.slot_index = (self.slot_index + 1) % self.slot_bytes.len();

        let retired = std::mem::take(&mut self.slot_bytes[self.slot_index]);
        let freed = self.ring.free(retired);
        debug_assert!(freed, "FrameRing retired more bytes than allocated");
    }
}
// getters
impl FrameRing {
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.slot_bytes.len()
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    #[inline]
    pub fn bytes_this_frame(&self) -> u64 {
        self.bytes_this_frame
    }

    /// 所有还未回收的字节，包括当前帧
    #[inline]
    pub fn used(&self) -> u64 {
        self.ring.used()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    #[inline]
    pub fn available(&self) -> u64 {
        self.ring.available()
    }
}
