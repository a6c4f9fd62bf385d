//! 磁盘索引节点与间接索引块
//! - 直接索引：节点内连续存储**块编号**，每个编号都指向一个**数据块**
//! - 一级：整个块连续存储**块编号**，每个编号都指向一个**数据块**
//! - 二级：整个块连续存储**块编号**，每个编号都指向一个一级索引块
//!
//! 编号 0 在任何索引槽里都表示"未分配"；
//! 内存侧一律经 [`slot`] 换成 `Option` 后再使用，不直接比较哨兵值。
//!
//! ## 块索引编码
//!
//! - x+1 级块索引模 x 级块的**可编号数量**，可得**最后**一块 x 的内部索引
//! - x+1 级块索引除以 x 级块的**可编号数量**，可得 x 级块的位置

use alloc::vec::Vec;

use crate::BLOCK_SIZE;
use crate::DataBlock;
use crate::INODE_MAGIC;
use crate::allocator::BlockAllocator;
use crate::block_cache::BlockCacheManager;
use crate::error::{Error, Result};

/// 间接索引块的编号容量
const INDIRECT_COUNT: usize = BLOCK_SIZE / 4;
/// 间接索引块
pub type IndirectBlock = [u32; INDIRECT_COUNT];

/// 直接索引块可编号数量
const DIRECT_COUNT: usize = 10;
/// 一级索引块可编号数量
const INDIRECT1_COUNT: usize = INDIRECT_COUNT;
/// 二级索引块可编号数量
const INDIRECT2_COUNT: usize = INDIRECT_COUNT.pow(2);
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT1_COUNT;
/// 用上二级索引时的编号容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT2_COUNT;

/// 填满整块的 u32 个数
const RECORD_WORDS: usize = BLOCK_SIZE / 4;
const PADDING_WORDS: usize = RECORD_WORDS - DIRECT_COUNT - 5;

/// 磁盘索引节点，恰好占据一整块
#[derive(Clone)]
#[repr(C)]
pub struct DiskInode {
    /// 直接索引块，包含 DIRECT_COUNT 个块编号，
    /// 存储容量：DIRECT_CAP * BLOCK_SIZE 字节
    direct: [u32; DIRECT_COUNT],
    /// 指向一个一级索引块
    indirect1: u32,
    /// 指向一个二级索引块
    indirect2: u32,
    // 不用usize是为了严控布局
    pub size: u32,
    /// 类型，磁盘上存裸 u32，载入任意块也不会产生非法值
    kind: u32,
    /// 魔数
    magic: u32,
    _pad: [u32; PADDING_WORDS],
}

const _: () = assert!(core::mem::size_of::<DiskInode>() == BLOCK_SIZE);

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum InodeKind {
    #[default]
    File = 0,
    Directory = 1,
}

/// 索引槽换算：0 是保留的"未分配"哨兵
#[inline]
fn slot(block_id: u32) -> Option<u32> {
    (block_id != 0).then_some(block_id)
}

impl DiskInode {
    pub fn new(kind: InodeKind) -> Self {
        Self {
            direct: [0; DIRECT_COUNT],
            indirect1: 0,
            indirect2: 0,
            size: 0,
            kind: kind as u32,
            magic: INODE_MAGIC,
            _pad: [0; PADDING_WORDS],
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory as u32
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 然后返回给**块缓存层**使用的ID；槽位未分配或越界时返回空
    pub fn block_id(&self, block_index: usize, cache: &BlockCacheManager) -> Option<u32> {
        if block_index < DIRECT_CAP {
            slot(self.direct[block_index])
        } else if block_index < INDIRECT1_CAP {
            let indirect1 = slot(self.indirect1)?;
            cache.get(indirect1).lock().map(0, |index: &IndirectBlock| {
                // 剔去直接索引的部分
                slot(index[block_index - DIRECT_CAP])
            })
        } else if block_index < INDIRECT2_CAP {
            // 剔去使用了一级索引的部分
            let index = block_index - INDIRECT1_CAP;

            // 数量上二级索引有128个INDIRECT1_COUNT
            let indirect2 = slot(self.indirect2)?;
            let indirect1 = cache
                .get(indirect2)
                .lock()
                .map(0, |root: &IndirectBlock| slot(root[index / INDIRECT1_COUNT]))?;
            cache.get(indirect1).lock().map(0, |leaf: &IndirectBlock| {
                slot(leaf[index % INDIRECT1_COUNT])
            })
        } else {
            None
        }
    }

    /// 把索引树扩展到至少 `total_blocks` 个数据块。
    ///
    /// 幂等：已分配的槽位（非 0）原样跳过，重复调用不会重复分配。
    /// 新分配的块（叶子与索引块皆然）在其编号被写入槽位前就已清零，
    /// 读者不可能看到未初始化的磁盘内容。
    ///
    /// 分配器耗尽时整个调用失败：本次调用分配的块全部退还，
    /// 本次调用落盘的槽位全部复位为 0，调用者丢弃手中的节点副本即可。
    pub fn expand_to(
        &mut self,
        total_blocks: usize,
        allocator: &dyn BlockAllocator,
        cache: &BlockCacheManager,
    ) -> Result<()> {
        if total_blocks > INDIRECT2_CAP {
            return Err(Error::FileTooLarge);
        }

        let mut growth = Growth::default();
        let expanded = self.try_expand(total_blocks, allocator, cache, &mut growth);
        if expanded.is_err() {
            growth.undo(allocator, cache);
        }
        expanded
    }

    fn try_expand(
        &mut self,
        total_blocks: usize,
        allocator: &dyn BlockAllocator,
        cache: &BlockCacheManager,
        growth: &mut Growth,
    ) -> Result<()> {
        /******************** 直接索引 ********************/
        for block in self.direct.iter_mut().take(total_blocks.min(DIRECT_COUNT)) {
            if *block == 0 {
                *block = growth.claim(allocator, cache)?;
            }
        }
        /******************** END ********************/

        if total_blocks <= DIRECT_CAP {
            return Ok(());
        }

        /******************** 一级索引 ********************/
        // size 的增加经过了 DIRECT_CAP，创建一级索引
        if self.indirect1 == 0 {
            self.indirect1 = growth.claim(allocator, cache)?;
        }

        let leaves = (total_blocks - DIRECT_CAP).min(INDIRECT1_COUNT);
        Self::fill_index_block(self.indirect1, leaves, allocator, cache, growth)?;
        /******************** END ********************/

        if total_blocks <= INDIRECT1_CAP {
            return Ok(());
        }

        /******************** 二级索引 ********************/
        // size 的增加经过了 INDIRECT1_CAP，创建二级索引
        if self.indirect2 == 0 {
            self.indirect2 = growth.claim(allocator, cache)?;
        }

        let remain = total_blocks - INDIRECT1_CAP;
        for index2 in 0..remain.div_ceil(INDIRECT1_COUNT) {
            let mut indirect1 = cache
                .get(self.indirect2)
                .lock()
                .map(0, |root: &IndirectBlock| root[index2]);

            // 子块索引为0表示进入新块
            if indirect1 == 0 {
                indirect1 = growth.claim(allocator, cache)?;
                cache
                    .get(self.indirect2)
                    .lock()
                    .map_mut(0, |root: &mut IndirectBlock| root[index2] = indirect1);
                growth.filled(self.indirect2, index2);
            }

            let leaves = (remain - index2 * INDIRECT1_COUNT).min(INDIRECT1_COUNT);
            Self::fill_index_block(indirect1, leaves, allocator, cache, growth)?;
        }
        /******************** END ********************/

        Ok(())
    }

    /// 把一个一级索引块的前 `upto` 个槽位补齐。
    /// 整块先复制出来改，全部槽位满足后才写回；
    /// 中途分配失败则这一块一个字节都不会落盘。
    fn fill_index_block(
        index_block_id: u32,
        upto: usize,
        allocator: &dyn BlockAllocator,
        cache: &BlockCacheManager,
        growth: &mut Growth,
    ) -> Result<()> {
        let mut index: IndirectBlock = cache
            .get(index_block_id)
            .lock()
            .map(0, |index: &IndirectBlock| *index);

        let mut filled: Vec<usize> = Vec::new();
        for (i, block) in index.iter_mut().enumerate().take(upto) {
            if *block == 0 {
                *block = growth.claim(allocator, cache)?;
                filled.push(i);
            }
        }

        if !filled.is_empty() {
            cache
                .get(index_block_id)
                .lock()
                .map_mut(0, |on_disk: &mut IndirectBlock| *on_disk = index);
            for i in filled {
                growth.filled(index_block_id, i);
            }
        }

        Ok(())
    }

    /// 回收索引树：收集文件当前占据的**所有**块编号并清空索引。
    /// 与 `expand_to` 对称地走完直接、一级、二级三段，
    /// 索引块自身也在回收之列，不会留下任何泄漏。
    pub fn clear(&mut self, cache: &BlockCacheManager) -> Vec<u32> {
        let mut dropped: Vec<u32> = Vec::with_capacity(Self::count_total_block(self.size));
        let data_blocks = Self::count_data_block(self.size);
        self.size = 0;

        /******************** 直接索引 ********************/
        for block in self.direct.iter_mut().take(data_blocks.min(DIRECT_COUNT)) {
            if let Some(id) = slot(*block) {
                dropped.push(id);
            }
            *block = 0;
        }
        /******************** END ********************/

        if data_blocks <= DIRECT_CAP {
            return dropped;
        }

        /******************** 一级索引 ********************/
        if let Some(indirect1) = slot(self.indirect1) {
            dropped.push(indirect1);
            let leaves = (data_blocks - DIRECT_CAP).min(INDIRECT1_COUNT);
            cache.get(indirect1).lock().map(0, |index: &IndirectBlock| {
                dropped.extend(index.iter().take(leaves).copied().filter(|&id| id != 0));
            });
            self.indirect1 = 0;
        }
        /******************** END ********************/

        if data_blocks <= INDIRECT1_CAP {
            return dropped;
        }

        /******************** 二级索引 ********************/
        if let Some(indirect2) = slot(self.indirect2) {
            dropped.push(indirect2);
            let remain = data_blocks - INDIRECT1_CAP;

            let root: IndirectBlock = cache
                .get(indirect2)
                .lock()
                .map(0, |root: &IndirectBlock| *root);
            for index2 in 0..remain.div_ceil(INDIRECT1_COUNT) {
                let Some(indirect1) = slot(root[index2]) else {
                    continue;
                };
                dropped.push(indirect1);
                let leaves = (remain - index2 * INDIRECT1_COUNT).min(INDIRECT1_COUNT);
                cache.get(indirect1).lock().map(0, |index: &IndirectBlock| {
                    dropped.extend(index.iter().take(leaves).copied().filter(|&id| id != 0));
                });
            }
            self.indirect2 = 0;
        }
        /******************** END ********************/

        dropped
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`。
    /// 超出 `size` 的部分不读，返回实际读到的字节数；
    /// 起始偏移就在文件末尾及之后时返回 0，这是正常的到-尾信号而非错误。
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &BlockCacheManager) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.size as usize);

        if start >= end {
            return 0;
        }

        // 已读取多少字节
        let mut read_size = 0;
        while start < end {
            // 当前块的逻辑索引，见 `DiskInode::block_id`
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;

            let Some(block_id) = self.block_id(block_index, cache) else {
                break;
            };

            let dest = &mut buf[read_size..read_size + block_read_size];
            cache.get(block_id).lock().map(0, |data: &DataBlock| {
                // 绝对地址 % 块大小 = 块内偏移
                let src = &data[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
                dest.copy_from_slice(src);
            });

            read_size += block_read_size;
            start = current_block_end;
        }

        read_size
    }

    /// 向指定位置(字节偏移)写入`buf`，不扩展：
    /// 调用者须先把索引树与 `size` 扩到位
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &BlockCacheManager) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.size as usize);

        if start >= end {
            return 0;
        }

        let mut written_size = 0;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;

            let Some(block_id) = self.block_id(block_index, cache) else {
                break;
            };

            let src = &buf[written_size..written_size + block_write_size];
            cache.get(block_id).lock().map_mut(0, |data: &mut DataBlock| {
                let dest = &mut data[start % BLOCK_SIZE..start % BLOCK_SIZE + block_write_size];
                dest.copy_from_slice(src);
            });

            written_size += block_write_size;
            start = current_block_end;
        }

        written_size
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: u32) -> usize {
        (size as usize).div_ceil(BLOCK_SIZE)
    }

    /// 计算容纳指定数据量需要多少个 **数据块** 和 **索引块**(`IndirectBlock`)
    pub fn count_total_block(size: u32) -> usize {
        let data_blocks = Self::count_data_block(size);
        let mut total = data_blocks;

        // 超出直接索引，使用一级索引块
        if data_blocks > DIRECT_CAP {
            total += 1;
        }

        // 超出一级索引，使用二级索引块及其子块
        if data_blocks > INDIRECT1_CAP {
            total += 1 + (data_blocks - INDIRECT1_CAP).div_ceil(INDIRECT_COUNT);
        }

        total
    }
}

/// 一次扩展内新获得的块与新落盘的槽位，失败时凭此回滚
#[derive(Default)]
struct Growth {
    /// 本次调用从分配器拿到的块
    fresh: Vec<u32>,
    /// 本次调用已写回磁盘的(索引块, 槽位)
    slots: Vec<(u32, usize)>,
}

impl Growth {
    /// 分配一个块并立即清零，记账以备回滚
    fn claim(&mut self, allocator: &dyn BlockAllocator, cache: &BlockCacheManager) -> Result<u32> {
        let Some(block_id) = allocator.allocate(1) else {
            return Err(Error::NoSpace);
        };
        self.fresh.push(block_id);
        cache
            .get(block_id)
            .lock()
            .map_mut(0, |data: &mut DataBlock| data.fill(0));
        Ok(block_id)
    }

    #[inline]
    fn filled(&mut self, index_block_id: u32, slot: usize) {
        self.slots.push((index_block_id, slot));
    }

    fn undo(&mut self, allocator: &dyn BlockAllocator, cache: &BlockCacheManager) {
        for &(index_block_id, slot) in &self.slots {
            cache
                .get(index_block_id)
                .lock()
                .map_mut(0, |index: &mut IndirectBlock| index[slot] = 0);
        }
        for &block_id in &self.fresh {
            allocator.release(block_id, 1);
        }
    }
}
