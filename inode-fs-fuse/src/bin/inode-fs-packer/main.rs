mod cli;

use std::fs;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use inode_fs::{BitmapAllocator, BlockAllocator, BlockCacheManager, InodeFileSystem, InodeKind};
use inode_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nimage={:?}", cli.source, cli.image);

    let block_file = BlockFile::create(&cli.image, cli.blocks)?;
    let cache = Arc::new(BlockCacheManager::new(block_file));
    let allocator = BitmapAllocator::create(cache.clone(), cli.blocks);
    let ifs = InodeFileSystem::new(cache.clone(), allocator.clone());

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        let data = fs::read(entry.path())?;

        // 目录层不在镜像里：打包器对外报告每个文件的节点块编号
        let block_id = allocator.allocate(1).expect("image full");
        ifs.create(block_id, 0, InodeKind::File).expect("image full");
        let inode = ifs.open(block_id).expect("freshly created inode");
        assert_eq!(inode.write_at(0, &data), data.len(), "image full");
        inode.close();

        println!("{}: block {block_id}", entry.file_name().to_string_lossy());
    }

    cache.sync_all();
    Ok(())
}
