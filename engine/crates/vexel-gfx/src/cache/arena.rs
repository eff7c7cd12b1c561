//! 驻留 key 的后备存储
//!
//! 调用方构建描述时，数组字段都是借用自调用方栈上的临时存储。
//! 缓存收录一个新 key 时，需要把这些数组深拷贝成自己持有的存储，
//! 并且保证后续的收录不会使已有数据搬家（handle 和自有 key 的生命周期
//! 和缓存一样长）。
//!
//! 实现方式是 append-only 的序列池：每次 intern 产生一个独立的
//! `Box<[T]>`，池只会追加，box 的堆内存永远不会重新分配。
//! 对外用 [`GfxSeq`] 这样的序号引用序列，不持有指针。
//! 这一层不做去重，去重发生在整个 key 的粒度上。

/// arena 中一段序列的序号
///
/// 只在发出它的那个 arena 中有意义。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GfxSeq(u32);

/// 单一元素类型的 append-only 序列池
pub struct GfxSeqArena<T> {
    seqs: Vec<Box<[T]>>,
}

impl<T> Default for GfxSeqArena<T> {
    fn default() -> Self {
        Self { seqs: Vec::new() }
    }
}

impl<T> GfxSeqArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 深拷贝一段序列，返回稳定的序号
    ///
    /// 返回的序列内容与输入一致；调用方的原始存储在返回后即可释放或复用。
    pub fn intern(&mut self, items: impl IntoIterator<Item = T>) -> GfxSeq {
        let seq = GfxSeq(self.seqs.len() as u32);
        self.seqs.push(items.into_iter().collect());
        seq
    }

    #[inline]
    pub fn get(&self, seq: GfxSeq) -> &[T] {
        &self.seqs[seq.0 as usize]
    }

    /// 已收录的序列条数（不是元素总数）
    #[inline]
    pub fn seq_count(&self) -> usize {
        self.seqs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_copies_content() {
        let mut arena = GfxSeqArena::new();
        let local = [3_u32, 1, 4, 1, 5];
        let seq = arena.intern(local.iter().copied());
        drop(local);

        assert_eq!(arena.get(seq), &[3, 1, 4, 1, 5]);
    }

    #[test]
    fn test_empty_sequence() {
        let mut arena = GfxSeqArena::<u32>::new();
        let a = arena.intern([]);
        let b = arena.intern([]);

        // 两个空序列内容相等，序号各自独立
        assert_eq!(arena.get(a), arena.get(b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_dedup_at_this_layer() {
        let mut arena = GfxSeqArena::new();
        let a = arena.intern([1_u8, 2, 3]);
        let b = arena.intern([1_u8, 2, 3]);

        assert_ne!(a, b);
        assert_eq!(arena.seq_count(), 2);
    }

    #[test]
    fn test_addresses_stable_under_growth() {
        let mut arena = GfxSeqArena::new();
        let first = arena.intern([7_u64, 8, 9]);
        let ptr = arena.get(first).as_ptr();

        for i in 0..1000_u64 {
            arena.intern([i, i + 1]);
        }

        // 后续的收录不会使已有序列搬家
        assert_eq!(arena.get(first).as_ptr(), ptr);
        assert_eq!(arena.get(first), &[7, 8, 9]);
    }
}
