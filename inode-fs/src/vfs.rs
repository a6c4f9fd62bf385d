//! # 索引节点层
//!
//! 位于内存的索引节点句柄：同一磁盘节点的所有打开者共享一个 [`Inode`]，
//! 其中的状态（打开计数、拒写计数、删除标记）决定句柄的生命周期。
//!
//! 删除是延迟的：`remove` 只做标记，
//! 最后一个打开者 `close` 时才回收整棵索引树与节点自身所在的块。

use alloc::sync::Arc;

use spin::Mutex;

use crate::BLOCK_SIZE;
use crate::DataBlock;
use crate::InodeFileSystem;
use crate::layout::DiskInode;

pub struct Inode {
    /// 磁盘索引节点所在块
    block_id: u32,
    fs: Arc<InodeFileSystem>,
    pub(crate) state: Mutex<InodeState>,
}

/// 所有打开者共享的易变状态，受同一把锁保护；
/// 结构性变更（扩展、回收）也在这把锁内串行化
pub(crate) struct InodeState {
    /// 存活句柄数
    pub open_count: u32,
    /// 禁止写入的打开者数，大于 0 时写入一律零字节返回
    pub deny_write_count: u32,
    /// 延迟删除标记
    pub removed: bool,
}

impl Inode {
    #[inline]
    pub(crate) fn new(block_id: u32, fs: Arc<InodeFileSystem>) -> Self {
        Self {
            block_id,
            fs,
            state: Mutex::new(InodeState {
                open_count: 1,
                deny_write_count: 0,
                removed: false,
            }),
        }
    }

    /// 从指定位置读出数据填充 `buf`，返回实际读到的字节数。
    /// 读到文件末尾时短读，返回 0 即是到尾信号。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let _state = self.state.lock();
        let disk_inode = self.disk_inode();
        disk_inode.read_at(offset, buf, &self.fs.cache)
    }

    /// 向指定位置写入 `buf`，返回实际写入的字节数。
    ///
    /// 写越过文件末尾时先扩展索引树，随即把新长度落盘——
    /// 长度的增长先于数据到达磁盘。扩展失败则整个写入失败，返回 0。
    /// 拒写期间同样返回 0，文件内容不变。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let state = self.state.lock();
        if state.deny_write_count > 0 {
            return 0;
        }

        let mut disk_inode = self.disk_inode();
        let end = offset + buf.len();
        if end > disk_inode.size as usize {
            let total_blocks = end.div_ceil(BLOCK_SIZE);
            if disk_inode
                .expand_to(total_blocks, &*self.fs.allocator, &self.fs.cache)
                .is_err()
            {
                return 0;
            }

            log::trace!(
                "inode {}: grow {} -> {end} bytes",
                self.block_id,
                disk_inode.size
            );
            disk_inode.size = end as u32;
            self.set_disk_inode(&disk_inode);
            // 新长度立即可见于磁盘，数据随后才逐块到达
            self.fs.cache.sync_all();
        }

        let written = disk_inode.write_at(offset, buf, &self.fs.cache);
        self.fs.cache.sync_all();
        written
    }

    /// 关闭句柄。最后一个打开者离开时把节点逐出打开表；
    /// 若此前被标记删除，则回收其占据的全部块并退还节点自身所在的块。
    pub fn close(&self) {
        let mut open_inodes = self.fs.open_inodes.lock();
        let mut state = self.state.lock();

        assert!(state.open_count > 0, "close without matching open");
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }

        open_inodes.retain(|(id, _)| *id != self.block_id);

        if state.removed {
            let mut disk_inode = self.disk_inode();
            let dropped = disk_inode.clear(&self.fs.cache);
            log::debug!(
                "drop inode {}: released {} blocks",
                self.block_id,
                dropped.len() + 1
            );
            for block_id in dropped {
                self.fs.allocator.release(block_id, 1);
            }

            // 抹掉节点块再退还，残留的魔数不会再被认作索引节点
            self.fs
                .cache
                .get(self.block_id)
                .lock()
                .map_mut(0, |data: &mut DataBlock| data.fill(0));
            self.fs.allocator.release(self.block_id, 1);
        }

        self.fs.cache.sync_all();
    }

    /// 标记删除；真正的回收推迟到最后一次 `close`
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// 禁止通过任何句柄写入本文件。
    /// 每个打开者至多调用一次，须在关闭前以 `allow_write` 配对解除。
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 解除一次 `deny_write`
    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        assert!(state.deny_write_count > 0);
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    /// 文件长度（字节）
    pub fn length(&self) -> usize {
        let _state = self.state.lock();
        self.disk_inode().size as usize
    }

    /// 索引节点编号，即其磁盘块编号
    #[inline]
    pub fn inumber(&self) -> u32 {
        self.block_id
    }

    pub fn is_dir(&self) -> bool {
        let _state = self.state.lock();
        self.disk_inode().is_dir()
    }
}

impl Inode {
    /// 取磁盘节点的内存副本；改动经 `set_disk_inode` 整体写回
    fn disk_inode(&self) -> DiskInode {
        self.fs
            .cache
            .get(self.block_id)
            .lock()
            .map(0, |disk_inode: &DiskInode| disk_inode.clone())
    }

    fn set_disk_inode(&self, disk_inode: &DiskInode) {
        self.fs
            .cache
            .get(self.block_id)
            .lock()
            .map_mut(0, |on_disk: &mut DiskInode| *on_disk = disk_inode.clone());
    }
}
