use crate::BLOCK_BITS;
use crate::block_cache::BlockCacheManager;

/// 位图区域内块的结构
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// 位图区域，记录其指示区域的块分配情况。
/// 位编号是指示区域内的相对编号，绝对块编号由上层换算。
#[derive(Debug)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: u32,
    /// 位图占用块数
    blocks: usize,
    /// 可用位数，位图末块中超出此数的位永远空置
    bits: usize,
}

impl Bitmap {
    #[inline]
    pub fn new(start_block_id: u32, blocks: usize, bits: usize) -> Self {
        assert!(bits <= blocks * BLOCK_BITS);
        Self {
            start_block_id,
            blocks,
            bits,
        }
    }

    /// 在指示区域内分配新的块，返回其相对编号。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&self, cache: &BlockCacheManager) -> Option<u32> {
        // 遍历位图区域内所有的块，寻找块内还有剩余空间的bit组(即还有0)
        for block_index in 0..self.blocks {
            let allocated = cache
                .get(self.start_block_id + block_index as u32)
                .lock()
                .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                    let (group_index, ingroup_index) =
                        bitmap_block
                            .iter()
                            .enumerate()
                            .find_map(|(group_index, &bits)| {
                                (bits != u64::MAX)
                                    .then_some((group_index, bits.trailing_ones() as usize))
                            })?;

                    let id = block_index * BLOCK_BITS + group_index * 64 + ingroup_index;
                    if id >= self.bits {
                        return None;
                    }

                    // 追加新位
                    bitmap_block[group_index] |= 1 << ingroup_index;
                    Some(id as u32)
                });

            if allocated.is_some() {
                return allocated;
            }
        }

        None
    }

    /// 分配连续 `count` 位的区段，返回首位的相对编号。
    /// 逐位线性扫描即可，成段分配只发生在格式化等冷路径上。
    pub fn alloc_run(&self, count: usize, cache: &BlockCacheManager) -> Option<u32> {
        let mut run_start = 0;
        let mut run_len = 0;

        for id in 0..self.bits {
            if self.test(id, cache) {
                run_len = 0;
                continue;
            }

            if run_len == 0 {
                run_start = id;
            }
            run_len += 1;

            if run_len == count {
                for bit in run_start..run_start + count {
                    self.set(bit, cache);
                }
                return Some(run_start as u32);
            }
        }

        None
    }

    pub fn dealloc(&self, cache: &BlockCacheManager, id: u32) {
        let (block_index, group_index, ingroup_index) = Self::decompose(id);
        cache
            .get(self.start_block_id + block_index)
            .lock()
            .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                // 编号一定得有对应的位
                assert_ne!(bitmap_block[group_index] & (1 << ingroup_index), 0);
                bitmap_block[group_index] -= 1 << ingroup_index;
            });
    }

    /// 位图所指示区域的总块数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// 已置位的总数
    pub fn count_ones(&self, cache: &BlockCacheManager) -> usize {
        (0..self.blocks)
            .map(|block_index| {
                cache
                    .get(self.start_block_id + block_index as u32)
                    .lock()
                    .map(0, |bitmap_block: &BitmapBlock| {
                        bitmap_block
                            .iter()
                            .map(|bits| bits.count_ones() as usize)
                            .sum::<usize>()
                    })
            })
            .sum()
    }

    /// 把位图占用的块全部清零
    pub fn wipe(&self, cache: &BlockCacheManager) {
        for block_index in 0..self.blocks {
            cache
                .get(self.start_block_id + block_index as u32)
                .lock()
                .map_mut(0, |bitmap_block: &mut BitmapBlock| bitmap_block.fill(0));
        }
    }
}

impl Bitmap {
    fn test(&self, id: usize, cache: &BlockCacheManager) -> bool {
        let (block_index, group_index, ingroup_index) = Self::decompose(id as u32);
        cache
            .get(self.start_block_id + block_index)
            .lock()
            .map(0, |bitmap_block: &BitmapBlock| {
                bitmap_block[group_index] & (1 << ingroup_index) != 0
            })
    }

    fn set(&self, id: usize, cache: &BlockCacheManager) {
        let (block_index, group_index, ingroup_index) = Self::decompose(id as u32);
        cache
            .get(self.start_block_id + block_index)
            .lock()
            .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                bitmap_block[group_index] |= 1 << ingroup_index
            });
    }

    /// 相对编号拆成(位图内块索引, bit组索引, 组内位索引)
    #[inline]
    fn decompose(id: u32) -> (u32, usize, usize) {
        let mut id = id as usize;
        let block_index = id / BLOCK_BITS;
        id %= BLOCK_BITS;
        (block_index as u32, id / 64, id % 64)
    }
}
