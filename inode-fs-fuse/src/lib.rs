#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use block_dev::BlockDevice;
use inode_fs::BLOCK_SIZE;

/// 以宿主机文件为载体的块设备：第 n 块即文件第 n 个块长的段
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    /// 建立指定块数的镜像文件，既有内容清空
    pub fn create(path: impl AsRef<Path>, total_blocks: u32) -> io::Result<Arc<Self>> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len(total_blocks as u64 * BLOCK_SIZE as u64)?;
        Ok(Arc::new(Self(Mutex::new(fd))))
    }

    /// 挂载既有镜像
    pub fn open(path: impl AsRef<Path>) -> io::Result<Arc<Self>> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Arc::new(Self(Mutex::new(fd))))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }
}
