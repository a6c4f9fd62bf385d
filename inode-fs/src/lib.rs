//! # 索引式文件层
//!
//! 把逻辑上连续的字节流（文件）映射到块设备的定长块上，
//! 采用类 Unix 的索引节点（inode）分配方案：
//! 每个文件一个单块的磁盘索引节点，内含直接索引、一级索引与二级索引。
//!
//! 磁盘布局由外部协作者决定，本层只认块编号：
//! 目录层拿着索引节点的块编号来创建、打开、读写、删除文件；
//! 空闲块由注入的分配器（[`BlockAllocator`]）提供。

#![no_std]

extern crate alloc;

/* inode-fs 的整体架构，自上而下 */

// 索引节点层：打开表、句柄生命周期与读写入口
mod vfs;
pub use vfs::Inode;

// 文件系统对象层：设备、分配器与打开表的所有者
mod ifs;
pub use ifs::InodeFileSystem;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;
pub use layout::InodeKind;

// 空闲块分配层：分配器特质及自带的位图实现
mod allocator;
pub use allocator::{BitmapAllocator, BlockAllocator};

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;
pub use block_cache::BlockCacheManager;

mod error;
pub use error::{Error, Result};

/// 索引节点块的魔数
pub const INODE_MAGIC: u32 = 0x696e_6f64;
/// 分配器超级块的魔数
pub const SUPER_MAGIC: u32 = 0x616c_6c6f;
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;

type DataBlock = [u8; BLOCK_SIZE];
