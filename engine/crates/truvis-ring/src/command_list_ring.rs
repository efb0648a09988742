use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use itertools::Itertools;

/// 一个 frame slot 的 command list 分配器，相当于一个 command pool
pub trait CommandListAllocator {
    type List: Copy;

    /// 一次性分配 `count` 个 command list
    fn allocate(&mut self, count: usize) -> anyhow::Result<Vec<Self::List>>;

    /// 将分配器内所有 command list 重置到初始状态，不释放它们
    fn reset(&mut self) -> anyhow::Result<()>;
}

struct FrameCommandLists<A: CommandListAllocator> {
    allocator: A,
    /// 创建时预先分配好的 command list
    lists: Vec<A::List>,
}

/// 每个 frame slot 一个分配器和一组预先分配的 command list
///
/// 当前帧内按顺序发放 command list；`begin_frame` 切换到下一个 slot，
/// 由 frames in flight 的约定，该 slot 上一次录制的 command list 已经执行完毕，可以整体重置。
pub struct CommandListRing<A: CommandListAllocator> {
    frames: Vec<FrameCommandLists<A>>,
    frame_index: usize,
    /// 当前帧已经发放的数量
    used: Mutex<usize>,
    lists_per_frame: usize,
}

// new & init
impl<A: CommandListAllocator> CommandListRing<A> {
    pub fn new(
        fif_count: usize,
        lists_per_frame: usize,
        mut make_allocator: impl FnMut(usize) -> anyhow::Result<A>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(fif_count > 0, "CommandListRing needs at least one frame slot");

        let frames = (0..fif_count)
            .map(|frame_label| {
                let mut allocator =
                    make_allocator(frame_label).with_context(|| format!("create allocator for frame {frame_label}"))?;
                let lists = allocator
                    .allocate(lists_per_frame)
                    .with_context(|| format!("allocate {lists_per_frame} command lists for frame {frame_label}"))?;
                anyhow::ensure!(
                    lists.len() == lists_per_frame,
                    "allocator returned {} command lists, expected {}",
                    lists.len(),
                    lists_per_frame
                );
                Ok(FrameCommandLists { allocator, lists })
            })
            .try_collect()?;

        Ok(Self {
            frames,
            frame_index: 0,
            used: Mutex::new(0),
            lists_per_frame,
        })
    }
}
// tools
impl<A: CommandListAllocator> CommandListRing<A> {
    /// 当前帧的下一个 command list
    ///
    /// # Panics
    /// 当前帧已经用完了 `lists_per_frame` 个 command list
    pub fn get_new_command_list(&self) -> A::List {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        if *used >= self.lists_per_frame {
            log::error!(
                "CommandListRing ran out of command lists: {} per frame; please increase lists_per_frame",
                self.lists_per_frame
            );
            panic!("CommandListRing exhausted in frame slot {}", self.frame_index);
        }

        let list = self.frames[self.frame_index].lists[*used];
        *used += 1;
        list
    }

    /// 帧边界：重置下一个 slot 的分配器，成功后再切换过去
    ///
    /// 重置失败时停留在当前 slot，不会发放没有重置过的 command list。
    pub fn begin_frame(&mut self) -> anyhow::Result<()> {
        let _span = profile_span!("CommandListRing::begin_frame");
        let next = (self.frame_index + 1) % self.frames.len();
        self.frames[next]
            .allocator
            .reset()
            .with_context(|| format!("reset command allocator of frame {next}"))?;

        self.frame_index = next;
        *self.used.get_mut().unwrap_or_else(PoisonError::into_inner) = 0;
        Ok(())
    }

    /// 当前 slot 的分配器
    #[inline]
    pub fn current_allocator(&self) -> &A {
        &self.frames[self.frame_index].allocator
    }
}
// getters
impl<A: CommandListAllocator> CommandListRing<A> {
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn lists_per_frame(&self) -> usize {
        self.lists_per_frame
    }

    #[inline]
    pub fn used_this_frame(&self) -> usize {
        *self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
