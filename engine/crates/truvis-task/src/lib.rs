//! Truvis 的并发构建核心
//!
//! shader 编译、纹理解码这类一次性的重活会被并行执行，但同时运行的 worker
//! 数量不能超过 CPU 核数。这个 crate 提供：
//!
//! - [`latch::Latch`]：倒计数器，等待 N 个未完成的操作全部结束
//! - [`executor::TaskExecutor`]：受限并发的执行器，每个任务一个 worker 线程，
//!   但同时处于运行状态的 worker 数量由 [`admission::AdmissionGate`] 限制
//! - [`task_batch::TaskBatch`]：一个逻辑阶段（例如加载一个场景）的所有任务
//! - [`build_cache::BuildCache`]：按 [`build_key::BuildKey`] 去重的构建缓存，
//!   同一个 key 只会有一个构建者，其他请求者等待并复用结果
//!
//! # 使用示例
//! ```ignore
//! let executor = TaskExecutor::new(ExecutorConfig::from_env());
//! let shader_cache = Arc::new(BuildCache::<Arc<ShaderModule>>::new(&executor, "shader-modules"));
//! let batch = TaskBatch::new(&executor, "load-sponza");
//!
//! for pass in passes {
//!     let shader_cache = shader_cache.clone();
//!     batch.add_task(move || {
//!         let key = BuildKey::of(&(pass.source_path(), pass.entry_point()));
//!         let module = shader_cache.get_or_build(key, || compile(&pass));
//!         pass.set_module(module);
//!     }, None)?;
//! }
//! batch.flush()?;
//! ```

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

pub mod admission;
pub mod build_cache;
pub mod build_key;
pub mod executor;
pub mod latch;
pub mod task_batch;
