use std::sync::Arc;
use std::thread;

use inode_fs::{
    BLOCK_SIZE, BitmapAllocator, BlockAllocator, BlockCacheManager, Error, InodeFileSystem,
    InodeKind,
};

use crate::BlockFile;

type Harness = (
    Arc<BlockCacheManager>,
    Arc<BitmapAllocator>,
    Arc<InodeFileSystem>,
);

/// 在临时目录里格式化一块镜像，名字须各测试互异
fn setup(name: &str, total_blocks: u32) -> Harness {
    let path = std::env::temp_dir().join(format!("inode-fs-{name}.img"));
    let device = BlockFile::create(path, total_blocks).unwrap();
    let cache = Arc::new(BlockCacheManager::new(device));
    let allocator = BitmapAllocator::create(cache.clone(), total_blocks);
    let ifs = InodeFileSystem::new(cache.clone(), allocator.clone());
    (cache, allocator, ifs)
}

/// 周期与块长互素的测试数据，映射错位一测便知
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn create_write_read_roundtrip() {
    let (_cache, allocator, ifs) = setup("roundtrip", 256);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();

    let inode = ifs.open(block_id).unwrap();
    assert_eq!(inode.inumber(), block_id);
    assert!(!inode.is_dir());

    assert_eq!(inode.write_at(0, b"hello"), 5);
    assert_eq!(inode.length(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(inode.read_at(0, &mut buf), 5);
    assert_eq!(&buf, b"hello");

    // 起始偏移在文件末尾：0 字节即到尾信号
    let mut buf = [0u8; 10];
    assert_eq!(inode.read_at(5, &mut buf), 0);

    // 中途越过末尾：短读
    let mut buf = [0u8; 16];
    assert_eq!(inode.read_at(2, &mut buf), 3);
    assert_eq!(&buf[..3], b"llo");

    inode.close();
}

#[test]
fn partial_sector_rewrite() {
    let (_cache, allocator, ifs) = setup("rewrite", 256);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();

    assert_eq!(inode.write_at(0, b"hello"), 5);
    // 块内改写走读-改-写，周围字节原样保留
    assert_eq!(inode.write_at(2, b"XY"), 2);
    assert_eq!(inode.length(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(inode.read_at(0, &mut buf), 5);
    assert_eq!(&buf, b"heXYo");

    inode.close();
}

#[test]
fn crossing_index_boundaries() {
    let (_cache, allocator, ifs) = setup("boundaries", 1024);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();

    // 139 个数据块：直接(10)、一级(128)都越过，踏进二级索引一块
    let data = pattern(71_000);
    assert_eq!(inode.write_at(0, &data), data.len());
    assert_eq!(inode.length(), data.len());

    // 直接索引与一级索引的边界：字节 5119/5120
    let mut buf = [0u8; 4];
    assert_eq!(inode.read_at(5118, &mut buf), 4);
    assert_eq!(&buf[..], &data[5118..5122]);

    // 一级索引与二级索引的边界：字节 70655/70656
    assert_eq!(inode.read_at(70654, &mut buf), 4);
    assert_eq!(&buf[..], &data[70654..70658]);

    // 全量读回，任何重复映射或错位都会在此暴露
    let mut whole = vec![0u8; data.len()];
    assert_eq!(inode.read_at(0, &mut whole), data.len());
    assert_eq!(whole, data);

    inode.close();
}

#[test]
fn sparse_write_zero_fills_gap() {
    let (_cache, allocator, ifs) = setup("sparse", 256);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();

    // 从空文件直接写到偏移 10000，空洞必须读出全零
    assert_eq!(inode.write_at(10_000, b"tail"), 4);
    assert_eq!(inode.length(), 10_004);

    let mut gap = vec![0xffu8; 10_000];
    assert_eq!(inode.read_at(0, &mut gap), 10_000);
    assert!(gap.iter().all(|&byte| byte == 0));

    let mut buf = [0u8; 4];
    assert_eq!(inode.read_at(10_000, &mut buf), 4);
    assert_eq!(&buf, b"tail");

    inode.close();
}

#[test]
fn growth_is_idempotent() {
    let (_cache, allocator, ifs) = setup("idempotent", 4096);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();

    // 一块一块写满 200 个数据块，多次触发扩展
    let chunk_count = 200;
    for i in 0..chunk_count {
        let chunk = [i as u8; BLOCK_SIZE];
        assert_eq!(inode.write_at(i * BLOCK_SIZE, &chunk), BLOCK_SIZE);
    }

    // 200 数据块 + 一级索引 1 + 二级根 1 + 二级子块 1 + 节点自身 1；
    // 结构块各自恰好分配一次，与触发扩展的次数无关
    assert_eq!(allocator.in_use(), chunk_count + 4);

    // 原地重写不再分配任何块
    for i in 0..chunk_count {
        let chunk = [i as u8; BLOCK_SIZE];
        assert_eq!(inode.write_at(i * BLOCK_SIZE, &chunk), BLOCK_SIZE);
    }
    assert_eq!(allocator.in_use(), chunk_count + 4);

    // 创建时一次性预分配同样大小，占用与逐块增长完全一致
    let other = allocator.allocate(1).unwrap();
    ifs.create(other, (chunk_count * BLOCK_SIZE) as u32, InodeKind::File)
        .unwrap();
    assert_eq!(allocator.in_use(), 2 * (chunk_count + 4));

    // 预分配的内容读出全零
    let mut buf = [0xffu8; BLOCK_SIZE];
    let preallocated = ifs.open(other).unwrap();
    assert_eq!(preallocated.read_at(199 * BLOCK_SIZE, &mut buf), BLOCK_SIZE);
    assert!(buf.iter().all(|&byte| byte == 0));

    preallocated.close();
    inode.close();
}

#[test]
fn run_allocation_is_contiguous() {
    let (_cache, allocator, _ifs) = setup("alloc-run", 256);

    // 成段分配交出连续编号，单块分配紧随其后
    let first = allocator.allocate(4).unwrap();
    let next = allocator.allocate(1).unwrap();
    assert_eq!(next, first + 4);
    assert_eq!(allocator.in_use(), 5);

    // 退还中段留下两格空洞；装不下的整段请求须另起新段
    allocator.release(first + 1, 2);
    assert_eq!(allocator.in_use(), 3);
    let run = allocator.allocate(3).unwrap();
    assert_eq!(run, next + 1);
    assert_eq!(allocator.in_use(), 6);

    // 两块的请求恰好填回空洞
    assert_eq!(allocator.allocate(2).unwrap(), first + 1);
    assert_eq!(allocator.in_use(), 8);

    assert_eq!(allocator.allocate(0), None);
}

#[test]
fn deny_write_blocks_writes() {
    let (_cache, allocator, ifs) = setup("deny", 256);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();

    assert_eq!(inode.write_at(0, b"keep"), 4);

    inode.deny_write();
    assert_eq!(inode.write_at(0, b"gone"), 0);
    assert_eq!(inode.write_at(100, b"gone"), 0);
    assert_eq!(inode.length(), 4);

    let mut buf = [0u8; 4];
    assert_eq!(inode.read_at(0, &mut buf), 4);
    assert_eq!(&buf, b"keep");

    inode.allow_write();
    assert_eq!(inode.write_at(0, b"anew"), 4);
    assert_eq!(inode.read_at(0, &mut buf), 4);
    assert_eq!(&buf, b"anew");

    inode.close();
}

#[test]
fn shared_handles_and_deferred_delete() {
    let (_cache, allocator, ifs) = setup("deferred", 256);
    assert_eq!(allocator.in_use(), 0);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();

    // 同一块的两次打开共享一个句柄
    let first = ifs.open(block_id).unwrap();
    let second = ifs.open(block_id).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let data = pattern(6000);
    assert_eq!(first.write_at(0, &data), data.len());

    // 标记删除后关闭一次：仍有打开者，数据原封不动
    second.remove();
    second.close();

    let mut buf = vec![0u8; data.len()];
    assert_eq!(first.read_at(0, &mut buf), data.len());
    assert_eq!(buf, data);

    // 最后一个打开者离开，整棵树连同节点块一并退还
    first.close();
    assert_eq!(allocator.in_use(), 0);

    // 此后打开同一块：节点已不存在
    assert!(matches!(ifs.open(block_id), Err(Error::Corrupted)));
}

#[test]
fn failed_growth_rolls_back() {
    // 64 块的小镜像：超级块 1 + 位图 1 + 受管区域 62
    let (_cache, allocator, ifs) = setup("rollback", 64);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    let inode = ifs.open(block_id).unwrap();
    assert_eq!(allocator.in_use(), 1);

    // 区区 62 块装不下 100KB，扩展中途耗尽
    let data = vec![7u8; 100_000];
    assert_eq!(inode.write_at(0, &data), 0);

    // 一无所留：长度不变，分配器账目也回到调用前
    assert_eq!(inode.length(), 0);
    assert_eq!(allocator.in_use(), 1);

    // 索引树未受损，小写入照常进行
    assert_eq!(inode.write_at(0, b"ok"), 2);
    assert_eq!(inode.length(), 2);

    inode.close();
}

#[test]
fn over_capacity_create_fails() {
    let (_cache, allocator, ifs) = setup("capacity", 256);

    let block_id = allocator.allocate(1).unwrap();
    // 二级索引之上再无层级，16522 块是极限
    let too_large = (16_523 * BLOCK_SIZE) as u32;
    assert_eq!(
        ifs.create(block_id, too_large, InodeKind::File),
        Err(Error::FileTooLarge)
    );
}

#[test]
fn reopen_image_preserves_data() {
    let path = std::env::temp_dir().join("inode-fs-reopen.img");
    let data = pattern(9000);
    let block_id;

    {
        let device = BlockFile::create(&path, 256).unwrap();
        let cache = Arc::new(BlockCacheManager::new(device));
        let allocator = BitmapAllocator::create(cache.clone(), 256);
        let ifs = InodeFileSystem::new(cache.clone(), allocator.clone());

        block_id = allocator.allocate(1).unwrap();
        ifs.create(block_id, 0, InodeKind::Directory).unwrap();
        let inode = ifs.open(block_id).unwrap();
        assert_eq!(inode.write_at(0, &data), data.len());
        inode.close();
        cache.sync_all();
    }

    // 重新挂载同一镜像
    let device = BlockFile::open(&path).unwrap();
    let cache = Arc::new(BlockCacheManager::new(device));
    let allocator = BitmapAllocator::open(cache.clone()).unwrap();
    let ifs = InodeFileSystem::new(cache, allocator);

    let inode = ifs.open(block_id).unwrap();
    assert!(inode.is_dir());
    assert_eq!(inode.length(), data.len());
    let mut buf = vec![0u8; data.len()];
    assert_eq!(inode.read_at(0, &mut buf), data.len());
    assert_eq!(buf, data);
    inode.close();

    // 数据块上没有魔数，不会被错认成索引节点
    assert!(matches!(ifs.open(block_id + 1), Err(Error::Corrupted)));
}

#[test]
fn unformatted_allocator_rejected() {
    let path = std::env::temp_dir().join("inode-fs-unformatted.img");
    let device = BlockFile::create(path, 64).unwrap();
    let cache = Arc::new(BlockCacheManager::new(device));
    assert!(matches!(BitmapAllocator::open(cache), Err(Error::Corrupted)));
}

#[test]
fn concurrent_writers_share_one_inode() {
    let (_cache, allocator, ifs) = setup("concurrent", 1024);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, (8 * BLOCK_SIZE) as u32, InodeKind::File)
        .unwrap();

    let halves: Vec<_> = (0..2)
        .map(|half| {
            let inode = ifs.open(block_id).unwrap();
            thread::spawn(move || {
                let data = [half as u8 + 1; 4 * BLOCK_SIZE];
                let offset = half * 4 * BLOCK_SIZE;
                assert_eq!(inode.write_at(offset, &data), data.len());
                inode.close();
            })
        })
        .collect();
    for handle in halves {
        handle.join().unwrap();
    }

    let inode = ifs.open(block_id).unwrap();
    let mut buf = vec![0u8; 8 * BLOCK_SIZE];
    assert_eq!(inode.read_at(0, &mut buf), buf.len());
    assert!(buf[..4 * BLOCK_SIZE].iter().all(|&byte| byte == 1));
    assert!(buf[4 * BLOCK_SIZE..].iter().all(|&byte| byte == 2));
    inode.close();
}

#[test]
fn racing_writers_extend_without_double_allocation() {
    let (_cache, allocator, ifs) = setup("race-extend", 1024);

    let block_id = allocator.allocate(1).unwrap();
    ifs.create(block_id, 0, InodeKind::File).unwrap();
    assert_eq!(allocator.in_use(), 1);

    // 两个写者同时越过文件末尾，争着触发扩展
    let writers: Vec<_> = (0..2)
        .map(|half| {
            let inode = ifs.open(block_id).unwrap();
            thread::spawn(move || {
                let data = [half as u8 + 1; 4 * BLOCK_SIZE];
                let offset = half * 4 * BLOCK_SIZE;
                assert_eq!(inode.write_at(offset, &data), data.len());
                inode.close();
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    // 扩展在句柄锁内串行：8 个数据块各分配一次，账目不多不少
    let inode = ifs.open(block_id).unwrap();
    assert_eq!(inode.length(), 8 * BLOCK_SIZE);
    assert_eq!(allocator.in_use(), 9);

    // 索引树完好，两半数据各归其位
    let mut buf = vec![0u8; 8 * BLOCK_SIZE];
    assert_eq!(inode.read_at(0, &mut buf), buf.len());
    assert!(buf[..4 * BLOCK_SIZE].iter().all(|&byte| byte == 1));
    assert!(buf[4 * BLOCK_SIZE..].iter().all(|&byte| byte == 2));
    inode.close();
}
