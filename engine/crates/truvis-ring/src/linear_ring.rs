/// 固定容量的环形 bump 分配器
///
/// 只记录 offset，不持有实际内存。
/// - `alloc` 从 tail 分配，`free` 从 head 释放，释放必须按分配顺序进行
/// - 单次分配不会跨越环的末尾，调用方需要先分配 [`LinearRing::padding_to_avoid_wrap`] 返回的填充
#[derive(Debug, Clone)]
pub struct LinearRing {
    head: u64,
    used: u64,
    capacity: u64,
}

// new & init
impl LinearRing {
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "LinearRing capacity must be positive");
        Self {
            head: 0,
            used: 0,
            capacity,
        }
    }
}
// tools
impl LinearRing {
    /// 为了让 `size` 字节不跨越环的末尾，需要在 tail 处填充的字节数
    pub fn padding_to_avoid_wrap(&self, size: u64) -> u64 {
        let tail = self.tail();
        if tail + size > self.capacity { self.capacity - tail } else { 0 }
    }

    /// 从 tail 分配 `size` 字节，返回起始 offset；空间不足时返回 `None`
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if self.used + size > self.capacity {
            return None;
        }

        let offset = self.tail();
        self.used += size;
        Some(offset)
    }

    /// 从 head 释放 `size` 字节，超过已分配的字节数时返回 `false`
    pub fn free(&mut self, size: u64) -> bool {
        if size > self.used {
            return false;
        }

        self.head = (self.head + size) % self.capacity;
        self.used -= size;
        true
    }

    /// 释放所有已分配的字节
    pub fn free_all(&mut self) {
        self.head = 0;
        self.used = 0;
    }
}
// getters
impl LinearRing {
    #[inline]
    pub fn head(&self) -> u64 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u64 {
        (self.head + self.used) % self.capacity
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn available(&self) -> u64 {
        self.capacity - self.used
    }
}
