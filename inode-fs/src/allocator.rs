//! # 空闲块分配层
//!
//! 索引节点层不关心空闲空间的组织方式，只通过 [`BlockAllocator`]
//! 索取与退还块编号；分配器由构造文件系统的一方注入。
//!
//! 本层自带一个位图实现 [`BitmapAllocator`]：
//! 块 0 存分配器超级块，其后连续若干块存位图，受管区域紧随其后。
//! 因此编号 0 被元数据预先占据，分配器交出的编号永远非 0，
//! 索引槽里的哨兵值 0 不会与合法块撞车。

use alloc::sync::Arc;

use crate::BLOCK_BITS;
use crate::block_cache::BlockCacheManager;
use crate::error::{Error, Result};
use crate::layout::{Bitmap, SuperBlock};

/// 空闲块分配器特质。
/// 分配失败（空间耗尽）返回空，是本层唯一预期的失败模式。
pub trait BlockAllocator: Send + Sync {
    /// 分配 `count` 个**连续**块，返回首块编号
    fn allocate(&self, count: usize) -> Option<u32>;
    /// 退还自 `block_id` 起的 `count` 个块
    fn release(&self, block_id: u32, count: usize);
}

/// 落盘位图分配器
pub struct BitmapAllocator {
    cache: Arc<BlockCacheManager>,
    bitmap: Bitmap,
    /// 受管区域的起始块，位图的相对编号加上它即是绝对编号
    area_start: u32,
}

impl BitmapAllocator {
    /// 格式化：在块 0 写入超级块，清空位图区域
    pub fn create(cache: Arc<BlockCacheManager>, total_blocks: u32) -> Arc<Self> {
        assert!(total_blocks > 2, "device too small for allocator metadata");

        // 超级块之外的块在位图与受管区域之间分成两份
        let rest = total_blocks - 1;
        let bitmap_blocks = (rest + BLOCK_BITS as u32) / (BLOCK_BITS as u32 + 1);
        let area_blocks = rest - bitmap_blocks;

        let bitmap = Bitmap::new(1, bitmap_blocks as usize, area_blocks as usize);
        bitmap.wipe(&cache);

        cache.get(0).lock().map_mut(0, |super_block: &mut SuperBlock| {
            super_block.init(total_blocks, bitmap_blocks, area_blocks)
        });
        cache.sync_all();

        Arc::new(Self {
            cache,
            bitmap,
            area_start: 1 + bitmap_blocks,
        })
    }

    /// 载入已格式化设备上的分配器
    pub fn open(cache: Arc<BlockCacheManager>) -> Result<Arc<Self>> {
        let geometry = cache.get(0).lock().map(0, |super_block: &SuperBlock| {
            super_block
                .is_valid()
                .then(|| (super_block.bitmap_blocks, super_block.area_blocks))
        });
        let Some((bitmap_blocks, area_blocks)) = geometry else {
            return Err(Error::Corrupted);
        };

        Ok(Arc::new(Self {
            cache,
            bitmap: Bitmap::new(1, bitmap_blocks as usize, area_blocks as usize),
            area_start: 1 + bitmap_blocks,
        }))
    }

    /// 受管区域总块数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bitmap.capacity()
    }

    /// 当前已分配的块数，用于核对分配与回收是否对称
    #[inline]
    pub fn in_use(&self) -> usize {
        self.bitmap.count_ones(&self.cache)
    }
}

impl BlockAllocator for BitmapAllocator {
    fn allocate(&self, count: usize) -> Option<u32> {
        let id = match count {
            0 => return None,
            1 => self.bitmap.alloc(&self.cache)?,
            _ => self.bitmap.alloc_run(count, &self.cache)?,
        };
        Some(self.area_start + id)
    }

    fn release(&self, block_id: u32, count: usize) {
        assert!(block_id >= self.area_start, "releasing metadata block");
        for i in 0..count as u32 {
            self.bitmap.dealloc(&self.cache, block_id - self.area_start + i);
        }
    }
}
