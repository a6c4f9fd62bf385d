use crate::SUPER_MAGIC;

/// 分配器超级块，占据块 0：
/// - 提供位图分配器合法性校验；
/// - 定位位图区域与受管区域
///
/// 块 0 因此永远不是合法的数据块，分配器也绝不会交出编号 0。
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验分配器元数据合法性
    magic: u32,
    /// 设备总块数
    pub total_blocks: u32,
    /// 位图占用块数
    pub bitmap_blocks: u32,
    /// 受管区域（数据与索引节点共用）的块数
    pub area_blocks: u32,
}

impl SuperBlock {
    #[inline]
    pub fn init(&mut self, total_blocks: u32, bitmap_blocks: u32, area_blocks: u32) {
        *self = Self {
            magic: SUPER_MAGIC,
            total_blocks,
            bitmap_blocks,
            area_blocks,
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == SUPER_MAGIC
    }
}
