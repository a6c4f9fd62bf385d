//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//! 同时，块缓存层也会尝试返回已缓存的块。
//!
//! 块缓存层对使用者来说是透明的，使用者对块设备的操作都经过块缓存层，
//! 且**操作块时一定在缓冲区当中**。
//! 部分块写入也因此天然成为"读-改-写"：块先被载入缓存，再改其中一段。
//!
//! 缓存管理器不再是全局量，而是归属于某一文件系统实例的值，
//! 由它持有底层块设备；各层通过注入的 [`BlockCacheManager`] 访问磁盘。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::BLOCK_SIZE;

/// 块缓存管理器，缓存、调度一台块设备的块缓存
pub struct BlockCacheManager {
    block_device: Arc<dyn BlockDevice>,
    /// 按最近一次使用排序：队首最久未用，队尾刚用过
    lru: Mutex<Vec<(u32, Arc<Mutex<BlockCache>>)>>,
}

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: [u8; BLOCK_SIZE],
    /// 对应的块ID
    block_id: u32,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCacheManager {
    /// 块缓存个数的上限
    const CAPACITY: usize = 16;

    #[inline]
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            lru: Mutex::new(Vec::new()),
        }
    }

    /// 取指定块的缓存，未缓存就从设备载入。
    /// 命中的条目挪到队尾，淘汰总是从最久未用的一端找起。
    pub fn get(&self, block_id: u32) -> Arc<Mutex<BlockCache>> {
        let mut lru = self.lru.lock();

        if let Some(at) = lru.iter().position(|(id, _)| *id == block_id) {
            let entry = lru.remove(at);
            let cache = entry.1.clone();
            lru.push(entry);
            return cache;
        }

        // 触及上限：逐出最久未用且无人引用的条目，脏数据由其析构写回
        if lru.len() == Self::CAPACITY {
            let idle = lru
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1)
                .expect("all block caches in use");
            lru.remove(idle);
        }

        let cache = Arc::new(Mutex::new(BlockCache::load(
            block_id,
            self.block_device.clone(),
        )));
        lru.push((block_id, cache.clone()));

        cache
    }

    pub fn sync_all(&self) {
        self.lru
            .lock()
            .iter()
            .for_each(|(_, cache)| cache.lock().sync());
    }
}

impl BlockCache {
    /// 把一块从设备读进缓冲区
    fn load(block_id: u32, block_device: Arc<dyn BlockDevice>) -> Self {
        let mut data = [0; BLOCK_SIZE];
        block_device.read_block(block_id as usize, &mut data);

        Self {
            data,
            block_id,
            block_device,
            modified: false,
        }
    }

    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.block_device
                .write_block(self.block_id as usize, &self.data);
        }
    }

    /// 把块内 `offset` 处解读为一个 `T`，交给 `f` 读取
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        f(unsafe { &*self.data.as_ptr().add(offset).cast() })
    }

    /// [`map`](Self::map) 的可变版本，块随之记脏
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        self.modified = true;
        f(unsafe { &mut *self.data.as_mut_ptr().add(offset).cast() })
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}
