use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct GateState {
    /// 当前占用 slot 的 worker 数量
    active: usize,
    max: usize,
    /// 历史上同时占用 slot 的最大数量，用于观测
    peak: usize,
    /// 关闭之后，让出 slot 的线程重新进入时不再等待空闲 slot
    exiting: bool,
}

/// 准入控制：限制同时处于"运行中"的 worker 数量
///
/// 本质上是一个计数信号量，额外提供 [`AdmissionGate::release_while`]：
/// 持有 slot 的线程在阻塞等待其他工作时先归还 slot，醒来后再重新获取。
/// slot 的计数只在这个类型内部修改，调用方不需要自己配对 acquire/release。
///
/// 等待顺序不保证公平，只保证数量上限。
#[derive(Debug)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

// init
impl AdmissionGate {
    /// `max_active` 至少为 1
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                active: 0,
                max: max_active.max(1),
                peak: 0,
                exiting: false,
            }),
            cond: Condvar::new(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// slot 操作
impl AdmissionGate {
    /// 阻塞直到有空闲 slot，然后占用它
    pub fn acquire(&self) {
        let state = self.lock();
        let mut state = self
            .cond
            .wait_while(state, |state| state.active >= state.max)
            .unwrap_or_else(PoisonError::into_inner);
        Self::occupy(&mut state);
    }

    /// 归还一个 slot，唤醒一个等待者
    pub fn release(&self) {
        {
            let mut state = self.lock();
            debug_assert!(state.active > 0, "AdmissionGate::release without a held slot");
            state.active = state.active.saturating_sub(1);
        }
        self.cond.notify_one();
    }

    /// 在 `blocked` 执行期间让出当前线程占用的 slot
    ///
    /// `blocked` 返回（或 panic）之后重新获取 slot；
    /// 调用方必须已经持有一个 slot。
    pub fn release_while<R>(&self, blocked: impl FnOnce() -> R) -> R {
        self.release();
        let _reacquire = scopeguard::guard((), |()| self.reacquire());
        blocked()
    }

    fn reacquire(&self) {
        let state = self.lock();
        let mut state = self
            .cond
            .wait_while(state, |state| !state.exiting && state.active >= state.max)
            .unwrap_or_else(PoisonError::into_inner);
        Self::occupy(&mut state);
    }

    #[inline]
    fn occupy(state: &mut GateState) {
        state.active += 1;
        state.peak = state.peak.max(state.active);
    }
}
// 配置 & 关闭
impl AdmissionGate {
    /// 修改上限，立即唤醒所有等待者重新检查
    pub fn set_max(&self, max_active: usize) {
        self.lock().max = max_active.max(1);
        self.cond.notify_all();
    }

    pub fn shutdown(&self) {
        self.lock().exiting = true;
        self.cond.notify_all();
    }
}
// getters
impl AdmissionGate {
    #[inline]
    pub fn active(&self) -> usize {
        self.lock().active
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.lock().max
    }

    #[inline]
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    #[inline]
    pub fn is_exiting(&self) -> bool {
        self.lock().exiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_max_is_clamped_to_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.max(), 1);
        gate.acquire();
        assert_eq!(gate.active(), 1);
        gate.release();
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn test_acquire_blocks_when_full() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let (tx, rx) = crossbeam_channel::unbounded();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.acquire();
                tx.send(()).unwrap();
                gate.release();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        gate.release();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();

        assert_eq!(gate.active(), 0);
        assert_eq!(gate.peak(), 1);
    }

    #[test]
    fn test_release_while_lets_another_thread_in() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let (tx, rx) = crossbeam_channel::unbounded();
        let other = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.acquire();
                tx.send(()).unwrap();
                gate.release();
            })
        };

        // 持有唯一 slot 的线程让出 slot，期间另一个线程可以进入
        gate.release_while(|| rx.recv_timeout(Duration::from_secs(5)).unwrap());
        other.join().unwrap();

        assert_eq!(gate.active(), 1);
        gate.release();
    }

    #[test]
    fn test_set_max_wakes_waiters() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        gate.set_max(2);
        waiter.join().unwrap();

        assert_eq!(gate.active(), 2);
        assert_eq!(gate.peak(), 2);
    }

    #[test]
    fn test_shutdown_lets_reacquire_skip_the_cap() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let (tx, rx) = crossbeam_channel::unbounded::<()>();
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<()>();
        let yielder = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.acquire();
                gate.release_while(|| {
                    entered_tx.send(()).unwrap();
                    let _ = rx.recv();
                });
                gate.release();
            })
        };

        // yielder 拿到 slot 又让出之后，主线程再占住唯一的 slot
        gate.release();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        gate.acquire();

        gate.shutdown();
        drop(tx);
        yielder.join().unwrap();

        assert!(gate.is_exiting());
        assert_eq!(gate.active(), 1);
        gate.release();
    }
}
