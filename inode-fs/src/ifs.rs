//! # 文件系统对象层
//!
//! [`InodeFileSystem`] 是块缓存、块分配器与打开表的所有者。
//! 打开表保证同一索引节点块在任意时刻至多有一个内存代表，
//! 表项的查找-插入与减计数-清理都在表锁内一步完成。

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::Inode;
use crate::allocator::BlockAllocator;
use crate::block_cache::BlockCacheManager;
use crate::error::{Error, Result};
use crate::layout::{DiskInode, InodeKind};

pub struct InodeFileSystem {
    pub(crate) cache: Arc<BlockCacheManager>,
    pub(crate) allocator: Arc<dyn BlockAllocator>,
    /// 打开表：索引节点块编号 -> 共享句柄
    pub(crate) open_inodes: Mutex<Vec<(u32, Arc<Inode>)>>,
}

impl InodeFileSystem {
    #[inline]
    pub fn new(cache: Arc<BlockCacheManager>, allocator: Arc<dyn BlockAllocator>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            allocator,
            open_inodes: Mutex::new(Vec::new()),
        })
    }

    /// 在 `block_id` 处格式化一个新的索引节点，预分配容纳 `size` 字节的块。
    /// 节点自身所在的块由调用者（目录层）事先向分配器申请。
    ///
    /// 分配器耗尽时整个创建失败，该块上不会留下半成品节点。
    pub fn create(&self, block_id: u32, size: u32, kind: InodeKind) -> Result<()> {
        let mut disk_inode = DiskInode::new(kind);
        disk_inode.expand_to(
            DiskInode::count_data_block(size),
            &*self.allocator,
            &self.cache,
        )?;
        disk_inode.size = size;

        self.cache
            .get(block_id)
            .lock()
            .map_mut(0, |on_disk: &mut DiskInode| *on_disk = disk_inode);
        self.cache.sync_all();

        log::debug!("create inode at block {block_id}: {size} bytes");
        Ok(())
    }

    /// 打开 `block_id` 处的索引节点，返回所有打开者共享的句柄。
    /// 重复打开只会增加打开计数；首次打开时校验魔数。
    pub fn open(self: &Arc<Self>, block_id: u32) -> Result<Arc<Inode>> {
        let mut open_inodes = self.open_inodes.lock();

        if let Some((_, inode)) = open_inodes.iter().find(|(id, _)| *id == block_id) {
            inode.state.lock().open_count += 1;
            return Ok(inode.clone());
        }

        let valid = self
            .cache
            .get(block_id)
            .lock()
            .map(0, |disk_inode: &DiskInode| disk_inode.is_valid());
        if !valid {
            log::warn!("block {block_id} does not hold a valid inode");
            return Err(Error::Corrupted);
        }

        let inode = Arc::new(Inode::new(block_id, self.clone()));
        open_inodes.push((block_id, inode.clone()));
        Ok(inode)
    }
}
