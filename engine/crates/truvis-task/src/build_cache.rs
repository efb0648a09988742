use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::build_key::BuildKey;
use crate::executor::TaskExecutor;
use crate::latch::Latch;

struct CacheEntry<T> {
    /// 1 表示正在构建，0 表示产物已经发布
    state: Latch,
    artifact: OnceLock<T>,
}

impl<T> CacheEntry<T> {
    fn building() -> Self {
        Self {
            state: Latch::with_count(1),
            artifact: OnceLock::new(),
        }
    }
}

/// 请求构建缓存的结果
pub enum CacheLookup<T> {
    /// 当前调用方是这个 key 的唯一构建者，构建完成后必须 [`BuildTicket::publish`]
    Build(BuildTicket<T>),
    /// 产物已经就绪（可能是等待其他构建者发布之后得到的）
    Ready(T),
}

impl<T> CacheLookup<T> {
    #[inline]
    pub fn is_new_builder(&self) -> bool {
        matches!(self, Self::Build(_))
    }
}

/// 构建者的凭证
///
/// 构建失败时也必须发布一个产物（例如表示失败的占位值），
/// 否则所有等待这个 key 的线程都会永远阻塞。
#[must_use = "an unpublished build blocks every other requester of this key forever"]
pub struct BuildTicket<T> {
    key: BuildKey,
    entry: Arc<CacheEntry<T>>,
    cache_name: Arc<str>,
    published: bool,
}

impl<T> BuildTicket<T> {
    #[inline]
    pub fn key(&self) -> BuildKey {
        self.key
    }

    /// 存入产物并唤醒所有等待者
    pub fn publish(mut self, artifact: T) {
        if self.entry.artifact.set(artifact).is_err() {
            log::error!("BuildCache[{}]: artifact {} published twice", self.cache_name, self.key);
        }
        self.published = true;
        // 先存产物再归零，等待者醒来时一定能读到产物
        self.entry.state.decrement();
    }
}

impl<T> Drop for BuildTicket<T> {
    fn drop(&mut self) {
        if !self.published {
            log::error!(
                "BuildCache[{}]: build ticket {} dropped without publishing, requesters of this key will block forever",
                self.cache_name,
                self.key
            );
        }
    }
}

/// 按 key 去重的构建缓存（singleflight）
///
/// - 同一个 key 只有第一个请求者会成为构建者
/// - 之后的请求者等待构建者发布，然后复用同一个产物
/// - 缓存只增不减，进程结束前不会失效
///
/// map 的锁只保护查找和插入；等待是由每个 entry 自己的构建状态控制的，
/// 等待时不会持有 map 的锁。在执行器的 worker 中等待时会让出 slot。
///
/// 通常 `T` 是句柄或 `Arc`，请求者拿到的是同一个实例的 clone。
pub struct BuildCache<T> {
    entries: Mutex<HashMap<BuildKey, Arc<CacheEntry<T>>>>,
    executor: TaskExecutor,
    name: Arc<str>,
}

// new & init
impl<T> BuildCache<T> {
    /// 等待时只会让出 `executor` 自己的 slot：
    /// 其他执行器的 worker 通过这个缓存等待时，会一直占着它所在执行器的 slot。
    /// 向缓存发起请求的任务应该和缓存使用同一个执行器。
    pub fn new(executor: &TaskExecutor, name: &str) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            executor: executor.clone(),
            name: Arc::from(name),
        }
    }

    #[inline]
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<BuildKey, Arc<CacheEntry<T>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// tools
impl<T: Clone> BuildCache<T> {
    /// 查询 `key`
    ///
    /// - 第一次请求：插入"构建中"的 entry，返回 [`CacheLookup::Build`]
    /// - 之后的请求：如果还在构建，通过执行器的 `wait_on` 等待，然后返回产物
    pub fn request(&self, key: BuildKey) -> CacheLookup<T> {
        let entry = match self.lock_entries().entry(key) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::building());
                vacant.insert(entry.clone());
                return CacheLookup::Build(BuildTicket {
                    key,
                    entry,
                    cache_name: self.name.clone(),
                    published: false,
                });
            }
        };

        if entry.state.get() != 0 {
            let _span = profile_span!("BuildCache::wait_for_builder");
            self.executor.wait_on(&entry.state);
        }

        let artifact = entry
            .artifact
            .get()
            .expect("build state reaches zero only after the artifact is stored");
        CacheLookup::Ready(artifact.clone())
    }

    /// 命中时直接返回，未命中时在当前线程执行 `build` 并发布
    ///
    /// `build` panic 时产物不会发布，等待这个 key 的线程会一直阻塞。
    pub fn get_or_build(&self, key: BuildKey, build: impl FnOnce() -> T) -> T {
        match self.request(key) {
            CacheLookup::Ready(artifact) => artifact,
            CacheLookup::Build(ticket) => {
                let _span = profile_span!("BuildCache::build");
                log::debug!("BuildCache[{}]: building {}", self.name, key);

                let artifact = build();
                ticket.publish(artifact.clone());
                artifact
            }
        }
    }
}
// getters
impl<T> BuildCache<T> {
    /// 遍历已经发布的产物，正在构建的 entry 会被跳过
    ///
    /// 遍历期间持有 map 的锁，`f` 中不能再访问这个缓存。
    pub fn for_each(&self, mut f: impl FnMut(BuildKey, &T)) {
        let entries = self.lock_entries();
        for (key, entry) in entries.iter() {
            if let Some(artifact) = entry.artifact.get() {
                f(*key, artifact);
            }
        }
    }

    #[inline]
    pub fn contains(&self, key: BuildKey) -> bool {
        self.lock_entries().contains_key(&key)
    }

    /// entry 数量，包括正在构建的
    #[inline]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
