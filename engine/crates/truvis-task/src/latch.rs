use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// 倒计数 latch
///
/// 记录"还有多少个操作没有完成"，`wait` 会阻塞到计数归零。
///
/// - 每个未完成的操作开始前 `increment`，完成后 `decrement`
/// - 计数归零时唤醒所有等待者
/// - 计数为 0 时 `wait` 立即返回
///
/// # 注意
/// `decrement` 必须和之前的某次 `increment` 配对。
/// 在计数为 0 时调用 `decrement` 属于调用方违约，release 下不做检查。
#[derive(Debug, Default)]
pub struct Latch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定的初始计数创建，构建缓存用它来表示"正在构建"
    pub fn with_count(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// 锁内只有计数，不会执行用户代码，poison 之后的计数依然可信
    #[inline]
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl Latch {
    pub fn increment(&self) -> usize {
        let mut count = self.lock();
        *count += 1;
        *count
    }

    pub fn decrement(&self) -> usize {
        let mut count = self.lock();
        debug_assert!(*count > 0, "Latch::decrement without a matching increment");
        *count = count.wrapping_sub(1);

        let remaining = *count;
        if remaining == 0 {
            self.cond.notify_all();
        }
        remaining
    }

    #[inline]
    pub fn get(&self) -> usize {
        *self.lock()
    }

    /// 强制归零，并唤醒所有等待者
    pub fn reset(&self) {
        let mut count = self.lock();
        *count = 0;
        self.cond.notify_all();
    }

    /// 阻塞直到计数归零，没有超时
    pub fn wait(&self) {
        let count = self.lock();
        let _count = self.cond.wait_while(count, |count| *count != 0).unwrap_or_else(PoisonError::into_inner);
    }

    /// 带超时的等待，只用于诊断和测试
    ///
    /// 返回 `true` 表示计数已经归零，`false` 表示超时
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.lock();
        let (_count, result) = self
            .cond
            .wait_timeout_while(count, timeout, |count| *count != 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_wait_without_increment_returns_immediately() {
        let latch = Latch::new();
        assert_eq!(latch.get(), 0);
        latch.wait();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_increment_decrement_return_new_count() {
        let latch = Latch::new();
        assert_eq!(latch.increment(), 1);
        assert_eq!(latch.increment(), 2);
        assert_eq!(latch.decrement(), 1);
        assert_eq!(latch.get(), 1);
        assert_eq!(latch.decrement(), 0);
    }

    #[test]
    fn test_many_threads_reach_zero_and_release_waiters() {
        truvis_crate_tools::init_log::init_log();

        const WORKERS: usize = 16;
        let latch = Arc::new(Latch::new());
        for _ in 0..WORKERS {
            latch.increment();
        }

        let woken = Arc::new(AtomicUsize::new(0));
        let waiters = (0..4)
            .map(|_| {
                let latch = latch.clone();
                let woken = woken.clone();
                thread::spawn(move || {
                    latch.wait();
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();

        let workers = (0..WORKERS)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || {
                    latch.decrement();
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }

        assert_eq!(latch.get(), 0);
        assert_eq!(woken.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_concurrent_increment_then_decrement_leaves_zero() {
        let latch = Arc::new(Latch::new());
        let threads = (0..8)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        latch.increment();
                        latch.decrement();
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(latch.get(), 0);
        latch.wait();
    }

    #[test]
    fn test_wait_timeout_reports_outstanding_work() {
        let latch = Latch::with_count(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
        latch.decrement();
        assert!(latch.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_reset_wakes_waiters() {
        let latch = Arc::new(Latch::with_count(3));
        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };

        thread::sleep(Duration::from_millis(20));
        latch.reset();
        waiter.join().unwrap();
        assert_eq!(latch.get(), 0);
    }
}
