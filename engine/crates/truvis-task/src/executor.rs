use std::any::Any;
use std::cell::Cell;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crate::admission::AdmissionGate;
use crate::latch::Latch;

static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// 当前线程占用的是哪个执行器的 slot
    static CURRENT_SLOT: Cell<Option<usize>> = const { Cell::new(None) };
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 同时运行的 worker 上限，`None` 表示使用 CPU 核数
    pub max_workers: Option<usize>,
    /// worker 线程名前缀，线程名为 `{prefix}-{task_id}`
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            thread_name_prefix: "Truvis-Task".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub const MAX_WORKERS_ENV: &'static str = "TRUVIS_MAX_WORKERS";

    /// 默认配置，`TRUVIS_MAX_WORKERS` 存在且合法时覆盖 worker 上限
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(Self::MAX_WORKERS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(max_workers) if max_workers > 0 => config.max_workers = Some(max_workers),
                _ => log::warn!("ignore invalid {}={:?}", Self::MAX_WORKERS_ENV, value),
            }
        }
        config
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    fn resolve_max_workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1))
            .max(1)
    }
}

struct ExecutorShared {
    id: usize,
    gate: AdmissionGate,
    thread_name_prefix: String,
    next_task_id: AtomicU64,
}

/// 受限并发的异步执行器
///
/// 每个任务都会创建一个新的 worker 线程，但同时处于运行状态的 worker 数量
/// 不超过 `max_workers`。`spawn` 在 slot 不足时会阻塞调用线程。
///
/// 执行器本身是一个可以 clone 的上下文对象（内部为 `Arc`），
/// 不同的执行器之间的 slot 计数互不影响。
///
/// # 让出 slot
/// worker 内部如果需要等待其他任务（例如等待构建缓存中另一个 worker 的结果），
/// 应该调用 [`TaskExecutor::wait_on`] 而不是直接 `latch.wait()`，
/// 这样等待期间 slot 可以被其他任务使用。
#[derive(Clone)]
pub struct TaskExecutor {
    shared: Arc<ExecutorShared>,
}

// new & init
impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let max_workers = config.resolve_max_workers();
        let id = NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("TaskExecutor#{} created, max workers: {}", id, max_workers);

        Self {
            shared: Arc::new(ExecutorShared {
                id,
                gate: AdmissionGate::new(max_workers),
                thread_name_prefix: config.thread_name_prefix,
                next_task_id: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

// tools
impl TaskExecutor {
    /// 在新的 worker 上执行 `job`
    ///
    /// 1. 如果提供了 `latch`，立即 `increment`，调用方可以马上开始等待
    /// 2. 阻塞直到有空闲 slot
    /// 3. worker 执行完 `job` 后先归还 slot，再 `decrement` latch
    ///
    /// 返回的 [`TaskHandle`] 在 drop 时会 join worker。
    /// `job` panic 时 slot 和 latch 依然会被正确归还，panic 在 join 时报告。
    pub fn spawn<F>(&self, job: F, latch: Option<&Arc<Latch>>) -> anyhow::Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let _span = profile_span!("TaskExecutor::spawn");

        let latch = latch.cloned();
        if let Some(latch) = &latch {
            latch.increment();
        }

        self.shared.gate.acquire();

        let task_id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let worker_latch = latch.clone();

        let spawn_result = thread::Builder::new()
            .name(format!("{}-{}", self.shared.thread_name_prefix, task_id))
            .spawn(move || {
                CURRENT_SLOT.with(|slot| slot.set(Some(shared.id)));

                let _finish = scopeguard::guard((), |()| {
                    CURRENT_SLOT.with(|slot| slot.set(None));
                    shared.gate.release();
                    if let Some(latch) = &worker_latch {
                        latch.decrement();
                    }
                });

                job();
            });

        match spawn_result {
            Ok(thread) => Ok(TaskHandle {
                thread: Some(thread),
                task_id,
            }),
            Err(e) => {
                // worker 没有创建成功，撤销前面的计数
                self.shared.gate.release();
                if let Some(latch) = &latch {
                    latch.decrement();
                }
                Err(anyhow::Error::new(e).context(format!("failed to spawn worker for task #{task_id}")))
            }
        }
    }

    /// 等待 `latch` 归零
    ///
    /// 如果当前线程占用着本执行器的 slot，等待期间会让出 slot，
    /// 醒来后再重新获取（可能因此阻塞）；否则就是普通的 `latch.wait()`。
    /// 其他执行器的 worker 调用时不会让出它自己的 slot。
    pub fn wait_on(&self, latch: &Latch) {
        if latch.get() == 0 {
            return;
        }

        let _span = profile_span!("TaskExecutor::wait_on");
        if self.holds_slot() {
            self.shared.gate.release_while(|| latch.wait());
        } else {
            latch.wait();
        }
    }

    /// 当前线程是否是本执行器的 worker
    #[inline]
    pub fn holds_slot(&self) -> bool {
        CURRENT_SLOT.with(|slot| slot.get() == Some(self.shared.id))
    }

    /// 运行时修改 worker 上限
    pub fn set_max_workers(&self, max_workers: usize) {
        log::info!("TaskExecutor#{} max workers -> {}", self.shared.id, max_workers);
        self.shared.gate.set_max(max_workers);
    }

    /// 进入退出流程：正在 `wait_on` 中让出 slot 的 worker 醒来后
    /// 不再等待空闲 slot，避免退出时互相等待
    pub fn shutdown(&self) {
        log::info!("TaskExecutor#{} shutting down", self.shared.id);
        self.shared.gate.shutdown();
    }
}
// getters
impl TaskExecutor {
    #[inline]
    pub fn max_workers(&self) -> usize {
        self.shared.gate.max()
    }

    #[inline]
    pub fn active_workers(&self) -> usize {
        self.shared.gate.active()
    }

    #[inline]
    pub fn peak_active_workers(&self) -> usize {
        self.shared.gate.peak()
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.gate.is_exiting()
    }
}

/// 一个 worker 的所有权
///
/// drop 时会阻塞 join 对应的 worker；需要拿到 worker 的执行结果时使用 [`TaskHandle::join`]。
#[must_use = "dropping a TaskHandle joins its worker immediately"]
pub struct TaskHandle {
    thread: Option<JoinHandle<()>>,
    task_id: u64,
}

impl TaskHandle {
    #[inline]
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// 等待 worker 结束，job panic 时返回错误
    pub fn join(mut self) -> anyhow::Result<()> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> anyhow::Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|payload| anyhow::anyhow!("task #{} panicked: {}", self.task_id, panic_message(&*payload)))?;
        }
        Ok(())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Err(e) = self.join_worker() {
            log::error!("{:#}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
