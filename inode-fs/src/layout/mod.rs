//! # 磁盘数据结构层
//!
//! 本层没有固定的磁盘布局，只有两类落盘结构：
//! 块 0 上的分配器超级块，以及散布各处、由块编号指认的索引节点块。

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, InodeKind};
