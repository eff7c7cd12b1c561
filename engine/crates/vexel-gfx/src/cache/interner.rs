//! 通用的 get-or-create 驻留缓存
//!
//! 六种构建对象缓存共用这一份实现：按 key 的结构化内容查找，miss 时
//! 深拷贝进 arena、恰好调用一次构造函数、记录 (自有 key, handle)。
//! 有序序列的哈希和相等都是顺序敏感的，嵌套序列逐字段折叠，
//! 这套逻辑由 key 类型的 `Hash` derive 和 [`GfxCacheKey::matches`] 提供，
//! 不在每种对象上重新手写。

use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

/// 对借用版描述计算结构化哈希
///
/// 哈希只依赖内容：切片按长度 + 逐元素折叠，和底层指针无关，
/// 因此不同后备数组中的相同内容哈希一致。
#[inline]
pub fn structural_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

/// 可驻留的结构化 key
///
/// 实现者是各对象的借用版描述（带生命周期）。`Hash` 用于桶定位；
/// 桶内命中由 `matches` 的跨变体结构化相等裁决，指针相同只是允许的
/// 捷径，永远不是要求。
pub(crate) trait GfxCacheKey: Hash {
    /// key 的数组字段深拷贝进的后备存储
    type Arena: Default + Send;
    /// 缓存持有的自有版 key
    type Owned: Send;

    /// 借用版和自有版的结构化相等：每个标量字段相等，
    /// 每个数组字段长度相等且逐元素相等
    fn matches(&self, owned: &Self::Owned, arena: &Self::Arena) -> bool;

    /// 深拷贝数组字段进 arena，产出自有版 key
    fn intern(&self, arena: &mut Self::Arena) -> Self::Owned;
}

struct CacheState<A, O, H> {
    arena: A,
    /// 结构化哈希 -> 该哈希下的 entry 下标；桶内以 `matches` 区分
    buckets: FxHashMap<u64, SmallVec<[u32; 1]>>,
    entries: Vec<(O, H)>,
}

/// 按 key 驻留 GPU 对象的缓存
///
/// 类型参数是某种 key 的 `(Arena, Owned, Handle)` 三元组；借用版 key
/// 本身只出现在 [`Self::get_or_create`] 的泛型参数上，这样任意生命周期
/// 的描述都能用来查询同一个缓存实例。
///
/// 单把锁横跨整个 查找 -> 深拷贝 -> 构造 -> 插入 临界区：
/// 同一个 key 的并发调用串行化，第二个调用方直接观察到已有 entry，
/// 不会出现同一个 key 的两次 driver 构造。entry 只增不删
/// （teardown 时整体 drain），已返回的 handle 在缓存存活期间一直有效。
pub struct GfxInternCache<A, O, H> {
    kind: &'static str,
    state: Mutex<CacheState<A, O, H>>,
}

impl<A: Default + Send, O: Send, H: Copy> GfxInternCache<A, O, H> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(CacheState {
                arena: A::default(),
                buckets: FxHashMap::default(),
                entries: Vec::new(),
            }),
        }
    }

    /// 查找或构造
    ///
    /// 构造函数在锁内被调用，入参是刚收录进 arena 的自有 key、arena
    /// 本身（flatten 需要解析序列序号）以及 entry 的槽位号（用作 debug
    /// name 的后缀）。构造失败时错误原样向上传递，不会留下半成品
    /// entry；这次尝试已经拷进 arena 的数据原地废弃，不做回收。
    pub fn get_or_create<K, E>(
        &self,
        key: &K,
        construct: impl FnOnce(&O, &A, u32) -> Result<H, E>,
    ) -> Result<H, E>
    where
        K: GfxCacheKey<Arena = A, Owned = O>,
    {
        let hash = structural_hash(key);

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(slots) = state.buckets.get(&hash) {
            for &slot in slots {
                let (owned, handle) = &state.entries[slot as usize];
                if key.matches(owned, &state.arena) {
                    return Ok(*handle);
                }
            }
        }

        let slot = state.entries.len() as u32;
        let owned = key.intern(&mut state.arena);
        let handle = construct(&owned, &state.arena, slot)?;

        state.entries.push((owned, handle));
        state.buckets.entry(hash).or_default().push(slot);
        log::debug!("{} cache: constructed entry #{}", self.kind, slot);

        Ok(handle)
    }

    /// 取走全部 handle 并清空缓存，调用方负责销毁对应的 GPU 对象
    pub fn drain_handles(&self) -> Vec<H> {
        let mut guard = self.state.lock();
        guard.buckets.clear();
        guard.arena = A::default();
        guard.entries.drain(..).map(|(_, handle)| handle).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::arena::{GfxSeq, GfxSeqArena};

    #[derive(Hash)]
    struct TestKey<'a> {
        tag: u32,
        values: &'a [u32],
    }

    #[derive(Default)]
    struct TestArena {
        values: GfxSeqArena<u32>,
    }

    struct TestOwned {
        tag: u32,
        values: GfxSeq,
    }

    impl GfxCacheKey for TestKey<'_> {
        type Arena = TestArena;
        type Owned = TestOwned;

        fn matches(&self, owned: &TestOwned, arena: &TestArena) -> bool {
            self.tag == owned.tag && self.values == arena.values.get(owned.values)
        }

        fn intern(&self, arena: &mut TestArena) -> TestOwned {
            TestOwned {
                tag: self.tag,
                values: arena.values.intern(self.values.iter().copied()),
            }
        }
    }

    type TestCache = GfxInternCache<TestArena, TestOwned, u64>;

    fn init_test_log() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(vexel_crate_tools::init_log::init_log);
    }

    fn counting(counter: &AtomicUsize, handle: u64) -> impl Fn(&TestOwned, &TestArena, u32) -> Result<u64, ()> + '_ {
        move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(handle)
        }
    }

    #[test]
    fn test_idempotent_interning() {
        let cache = TestCache::new("test");
        let count = AtomicUsize::new(0);
        let key = TestKey { tag: 1, values: &[10, 20] };

        let a = cache.get_or_create(&key, counting(&count, 0xAA)).unwrap();
        let b = cache.get_or_create(&key, counting(&count, 0xBB)).unwrap();

        assert_eq!(a, 0xAA);
        assert_eq!(b, 0xAA);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_structural_equality_not_identity() {
        let cache = TestCache::new("test");
        let count = AtomicUsize::new(0);

        // 两份独立构建、内容相同的后备数组
        let backing_a = vec![10_u32, 20, 30];
        let backing_b = vec![10_u32, 20, 30];

        let a = cache.get_or_create(&TestKey { tag: 7, values: &backing_a }, counting(&count, 1)).unwrap();
        let b = cache.get_or_create(&TestKey { tag: 7, values: &backing_b }, counting(&count, 2)).unwrap();

        assert_eq!(a, b);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_order_sensitivity() {
        let cache = TestCache::new("test");
        let count = AtomicUsize::new(0);

        cache.get_or_create(&TestKey { tag: 0, values: &[1, 2] }, counting(&count, 1)).unwrap();
        cache.get_or_create(&TestKey { tag: 0, values: &[2, 1] }, counting(&count, 2)).unwrap();

        // 只有元素顺序不同的两个 key 是两个独立 entry
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_empty_sequences_equal_regardless_of_backing() {
        let cache = TestCache::new("test");
        let count = AtomicUsize::new(0);

        let backing: Vec<u32> = Vec::with_capacity(16);
        cache.get_or_create(&TestKey { tag: 0, values: &[] }, counting(&count, 1)).unwrap();
        cache.get_or_create(&TestKey { tag: 0, values: &backing }, counting(&count, 2)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_construction_failure_leaves_no_entry() {
        let cache = TestCache::new("test");
        let key = TestKey { tag: 3, values: &[9] };

        let failed: Result<u64, &str> = cache.get_or_create(&key, |_, _, _| Err("device lost"));
        assert_eq!(failed.unwrap_err(), "device lost");
        assert!(cache.is_empty());

        // 失败不会留下半成品 entry；之后同一个 key 还会再走构造
        let count = AtomicUsize::new(0);
        let handle = cache.get_or_create(&key, counting(&count, 5)).unwrap();
        assert_eq!(handle, 5);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_distinct_hashes() {
        // 结构化哈希不能退化成常量，否则查找退化为整表线性探测
        let mut hashes = std::collections::HashSet::new();
        for tag in 0..10_u32 {
            for len in 0..10_u32 {
                let values: Vec<u32> = (0..len).collect();
                hashes.insert(structural_hash(&TestKey { tag, values: &values }));
            }
        }
        assert_eq!(hashes.len(), 100);
    }

    #[test]
    fn test_concurrent_same_key_constructs_once() {
        init_test_log();
        let cache = Arc::new(TestCache::new("test"));
        let count = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let count = count.clone();
                std::thread::spawn(move || {
                    let backing = vec![1_u32, 2, 3];
                    let key = TestKey { tag: 42, values: &backing };
                    cache
                        .get_or_create(&key, |_, _, _| {
                            count.fetch_add(1, Ordering::SeqCst);
                            // 拉长构造时间，让其余线程都堵在锁上
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<u64, ()>(0xC0FFEE)
                        })
                        .unwrap()
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), 0xC0FFEE);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drain_handles() {
        let cache = TestCache::new("test");
        let count = AtomicUsize::new(0);
        cache.get_or_create(&TestKey { tag: 1, values: &[] }, counting(&count, 1)).unwrap();
        cache.get_or_create(&TestKey { tag: 2, values: &[] }, counting(&count, 2)).unwrap();

        let mut drained = cache.drain_handles();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert!(cache.is_empty());
    }
}
