use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::executor::{TaskExecutor, TaskHandle};
use crate::latch::Latch;

/// 一个逻辑阶段（例如"加载这个场景"）的所有异步任务
///
/// - `add_task` 通过执行器派发任务并保存 [`TaskHandle`]
/// - `flush` 同步等待所有任务结束；任务在执行中追加的新任务也会被等待
/// - drop 时自动 `flush`
pub struct TaskBatch {
    executor: TaskExecutor,
    tasks: Mutex<Vec<TaskHandle>>,
    name: String,
}

// new & init
impl TaskBatch {
    pub fn new(executor: &TaskExecutor, name: impl Into<String>) -> Self {
        Self {
            executor: executor.clone(),
            tasks: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }

    #[inline]
    fn lock_tasks(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl TaskBatch {
    /// 派发任务，可能因为执行器没有空闲 slot 而阻塞
    pub fn add_task<F>(&self, job: F, latch: Option<&Arc<Latch>>) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // 在锁外 spawn，等待 slot 时不阻塞其他线程 add_task
        let handle = self.executor.spawn(job, latch)?;
        self.lock_tasks().push(handle);
        Ok(())
    }

    /// join 所有任务并清空
    ///
    /// 所有任务都会被 join；有任务 panic 时返回错误，错误中包含失败数量。
    /// 对空的 batch 调用是 no-op。
    pub fn flush(&self) -> anyhow::Result<()> {
        let _span = profile_span!("TaskBatch::flush");

        let mut joined = 0_usize;
        let mut failures = Vec::new();
        loop {
            let tasks = std::mem::take(&mut *self.lock_tasks());
            if tasks.is_empty() {
                break;
            }

            for task in tasks {
                joined += 1;
                if let Err(e) = task.join() {
                    failures.push(e);
                }
            }
        }

        if joined > 0 {
            log::debug!("TaskBatch[{}] flushed {} tasks", self.name, joined);
        }

        match failures.len() {
            0 => Ok(()),
            count => {
                for failure in &failures {
                    log::error!("TaskBatch[{}]: {:#}", self.name, failure);
                }
                Err(anyhow::anyhow!("{} of {} tasks in batch `{}` panicked", count, joined, self.name))
            }
        }
    }
}
// getters
impl TaskBatch {
    /// 还没有被 flush 的任务数量
    #[inline]
    pub fn len(&self) -> usize {
        self.lock_tasks().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock_tasks().is_empty()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }
}

impl Drop for TaskBatch {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("{:#}", e);
        }
    }
}

/// 有 batch 时异步执行，没有 batch 时在当前线程同步执行
///
/// 单线程加载路径直接传 `None`。
pub fn exec_or_inline<F>(batch: Option<&TaskBatch>, job: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    match batch {
        Some(batch) => batch.add_task(job, None),
        None => {
            job();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn executor(max_workers: usize) -> TaskExecutor {
        truvis_crate_tools::init_log::init_log();
        TaskExecutor::new(ExecutorConfig::default().with_max_workers(max_workers))
    }

    #[test]
    fn test_flush_waits_for_every_task() {
        let executor = executor(4);
        let batch = TaskBatch::new(&executor, "load-scene");
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let done = done.clone();
            batch
                .add_task(
                    move || {
                        thread::sleep(Duration::from_millis(5 * (i % 3)));
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                    None,
                )
                .unwrap();
        }

        batch.flush().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(batch.is_empty());

        // 第二次 flush 是 no-op
        batch.flush().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_flushes() {
        let executor = executor(2);
        let done = Arc::new(AtomicUsize::new(0));
        {
            let batch = TaskBatch::new(&executor, "drop-flush");
            for _ in 0..4 {
                let done = done.clone();
                batch
                    .add_task(
                        move || {
                            thread::sleep(Duration::from_millis(10));
                            done.fetch_add(1, Ordering::SeqCst);
                        },
                        None,
                    )
                    .unwrap();
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(executor.active_workers(), 0);
    }

    #[test]
    fn test_flush_waits_for_tasks_added_by_tasks() {
        let executor = executor(4);
        let batch = Arc::new(TaskBatch::new(&executor, "nested"));
        let done = Arc::new(AtomicUsize::new(0));

        {
            let inner_batch = batch.clone();
            let done = done.clone();
            batch
                .add_task(
                    move || {
                        let done_inner = done.clone();
                        inner_batch
                            .add_task(
                                move || {
                                    thread::sleep(Duration::from_millis(10));
                                    done_inner.fetch_add(1, Ordering::SeqCst);
                                },
                                None,
                            )
                            .unwrap();
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                    None,
                )
                .unwrap();
        }

        batch.flush().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_latch_tracks_batch_tasks() {
        let executor = executor(2);
        let batch = TaskBatch::new(&executor, "latched");
        let latch = Arc::new(Latch::new());

        for _ in 0..3 {
            batch
                .add_task(|| thread::sleep(Duration::from_millis(10)), Some(&latch))
                .unwrap();
        }
        executor.wait_on(&latch);
        assert_eq!(latch.get(), 0);
        batch.flush().unwrap();
    }

    #[test]
    fn test_flush_reports_panicked_tasks() {
        let executor = executor(2);
        let batch = TaskBatch::new(&executor, "broken");
        batch.add_task(|| panic!("texture decode failed"), None).unwrap();
        batch.add_task(|| {}, None).unwrap();

        let err = batch.flush().unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert_eq!(executor.active_workers(), 0);
    }

    #[test]
    fn test_exec_or_inline_without_batch_runs_on_caller_thread() {
        let caller = thread::current().id();
        let (tx, rx) = crossbeam_channel::unbounded();
        exec_or_inline(None, move || tx.send(thread::current().id()).unwrap()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn test_exec_or_inline_with_batch_runs_on_worker() {
        let executor = executor(2);
        let batch = TaskBatch::new(&executor, "inline-or-not");
        let caller = thread::current().id();
        let (tx, rx) = crossbeam_channel::unbounded();

        exec_or_inline(Some(&batch), move || tx.send(thread::current().id()).unwrap()).unwrap();
        batch.flush().unwrap();
        assert_ne!(rx.recv().unwrap(), caller);
    }
}
