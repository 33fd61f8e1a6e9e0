use std::collections::BTreeMap;
use std::sync::Arc;

use block_dev::{BlockDevice, DeviceError};
use proptest::prelude::*;
use spin::Mutex;
use vfs::{Credentials, Error};

use crate::bmap::BlockMap;
use crate::dir;
use crate::layout::{InodeKind, SuperBlock};
use crate::{
    DIND_BLOCK, Ext2, Ext2FileSystem, FormatOptions, IND_BLOCK, MountOptions, N_BLOCKS, ROOT_INO,
    Result, SUPERBLOCK_OFFSET, Unit,
};

/// 内存中的块设备
pub(crate) struct RamDisk(Mutex<Vec<u8>>);

impl RamDisk {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self(Mutex::new(vec![0; size])))
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn patch(&self, offset: usize, bytes: &[u8]) {
        self.0.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn range(&self, offset: u64, len: usize) -> core::result::Result<core::ops::Range<usize>, DeviceError> {
        let start = offset as usize;
        start
            .checked_add(len)
            .filter(|&end| end <= self.0.lock().len())
            .map(|end| start..end)
            .ok_or(DeviceError::OutOfRange)
    }
}

impl BlockDevice for RamDisk {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> core::result::Result<usize, DeviceError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.0.lock()[range]);
        Ok(buf.len())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> core::result::Result<usize, DeviceError> {
        let range = self.range(offset, buf.len())?;
        self.0.lock()[range].copy_from_slice(buf);
        Ok(buf.len())
    }
}

fn mkfs(opts: FormatOptions) -> Arc<RamDisk> {
    let disk = RamDisk::new(opts.block_size * opts.blocks_count as usize);
    Ext2::format(&*disk, &opts).unwrap();
    disk
}

/// 1 KiB 块、一个块组
fn one_group() -> Arc<RamDisk> {
    mkfs(FormatOptions::new(1024, 8192))
}

/// 1 KiB 块、两个块组，每组 1024 块、64 个 inode
fn two_groups() -> Arc<RamDisk> {
    let mut opts = FormatOptions::new(1024, 1 + 2 * 1024);
    opts.blocks_per_group = Some(1024);
    opts.inodes_per_group = Some(64);
    mkfs(opts)
}

fn mount(disk: &Arc<RamDisk>) -> Ext2FileSystem {
    match Ext2FileSystem::open(disk.clone(), MountOptions::default()) {
        Ok(fs) => fs,
        Err(err) => panic!("mount failed: {err}"),
    }
}

fn new_file(fs: &mut Ext2FileSystem, name: &str) -> u32 {
    fs.create_node(ROOT_INO, name, InodeKind::Regular, 0o644, 0, Credentials::ROOT)
        .unwrap()
}

fn disk_super_block(disk: &RamDisk) -> SuperBlock {
    let raw = disk.snapshot();
    let at = SUPERBLOCK_OFFSET as usize;
    SuperBlock::decode(&raw[at..at + 1024])
}

#[test]
fn fresh_volume_is_consistent() {
    let fs = mount(&one_group());
    fs.verify_counts().unwrap();

    let sb = fs.super_block();
    assert_eq!(1, fs.group_count());
    assert_eq!(2048, sb.inodes_count);
    assert_eq!(2048 - 10, sb.free_inodes_count);
    // 元数据 260 块，根目录 1 块
    assert_eq!(8191 - 260 - 1, sb.free_blocks_count);
    assert_eq!(1, fs.group(0).used_dirs_count);

    let root = fs.read_inode(ROOT_INO).unwrap();
    assert!(root.is_dir());
    assert_eq!(2, root.links_count);
    assert_eq!(1024, root.size);
    assert_eq!(Ok(ROOT_INO), fs.lookup(ROOT_INO, ".."));
}

#[test]
fn first_fit_allocation() {
    let mut fs = mount(&one_group());
    let free = fs.super_block().free_blocks_count;

    // 261 号块是根目录
    let a = fs.alloc(Unit::Block, 0).unwrap();
    let b = fs.alloc(Unit::Block, 0).unwrap();
    assert_eq!((262, 263), (a, b));
    assert_eq!(free - 2, fs.super_block().free_blocks_count);
    assert_eq!(free - 2, fs.group(0).free_blocks_count as u32);

    fs.dealloc(Unit::Block, a).unwrap();
    assert!(!fs.is_allocated(Unit::Block, a).unwrap());
    assert!(fs.is_allocated(Unit::Block, b).unwrap());
    assert_eq!(a, fs.alloc(Unit::Block, 0).unwrap());

    assert_eq!(11, fs.alloc(Unit::Inode, 0).unwrap());
    fs.verify_counts().unwrap();
}

#[test]
fn double_free_is_corruption() {
    let mut fs = mount(&one_group());
    let id = fs.alloc(Unit::Block, 0).unwrap();
    fs.dealloc(Unit::Block, id).unwrap();
    let free = fs.super_block().free_blocks_count;

    assert_eq!(Err(Error::Corrupted), fs.dealloc(Unit::Block, id));
    assert_eq!(Err(Error::Corrupted), fs.dealloc(Unit::Block, 0));
    assert_eq!(Err(Error::Corrupted), fs.dealloc(Unit::Inode, 4096));
    assert_eq!(free, fs.super_block().free_blocks_count);
    fs.verify_counts().unwrap();
}

#[test]
fn allocation_spills_into_neighbour_group() {
    let mut fs = mount(&two_groups());
    assert_eq!(2, fs.group_count());
    assert_eq!(65, fs.alloc(Unit::Inode, 1).unwrap());

    let in_group_1 = fs.group(1).free_blocks_count;
    for _ in 0..in_group_1 {
        let id = fs.alloc(Unit::Block, 1).unwrap();
        assert!((1025..2049).contains(&id));
    }
    assert_eq!(0, fs.group(1).free_blocks_count);

    let id = fs.alloc(Unit::Block, 1).unwrap();
    assert!(id < 1025);
    fs.verify_counts().unwrap();
}

#[test]
fn exhaustion_leaves_disk_untouched() {
    let disk = mkfs(FormatOptions::new(1024, 300));
    let mut fs = mount(&disk);

    for _ in 0..fs.super_block().free_blocks_count {
        fs.alloc(Unit::Block, 0).unwrap();
    }
    let before = disk.snapshot();
    assert_eq!(Err(Error::NoSpace), fs.alloc(Unit::Block, 0));
    assert!(before == disk.snapshot());
    fs.verify_counts().unwrap();
}

#[test]
fn grow_then_shrink_restores_everything() {
    let mut fs = mount(&one_group());
    let ino = new_file(&mut fs, "big");
    let mut inode = fs.read_inode(ino).unwrap();
    let free = fs.super_block().free_blocks_count;

    // 12 个直接块 + 256 个一级索引 + 32 个二级索引
    fs.grow(ino, &mut inode, 300 * 1024).unwrap();
    assert_eq!(free - 303, fs.super_block().free_blocks_count);
    assert_eq!(303 * 2, inode.blocks);
    assert_ne!(0, inode.block[IND_BLOCK]);
    assert_ne!(0, inode.block[DIND_BLOCK]);
    assert_eq!(inode, fs.read_inode(ino).unwrap());

    fs.shrink(ino, &mut inode, 100 * 1024).unwrap();
    assert_eq!(101 * 2, inode.blocks);
    assert_eq!(0, inode.block[DIND_BLOCK]);
    assert_eq!(free - 101, fs.super_block().free_blocks_count);

    fs.shrink(ino, &mut inode, 0).unwrap();
    assert_eq!(0, inode.blocks);
    assert_eq!([0; N_BLOCKS], inode.block);
    assert_eq!(free, fs.super_block().free_blocks_count);
    fs.verify_counts().unwrap();
}

#[test]
fn grow_checks_space_up_front() {
    let disk = mkfs(FormatOptions::new(1024, 300));
    let mut fs = mount(&disk);
    let ino = new_file(&mut fs, "f");
    let mut inode = fs.read_inode(ino).unwrap();
    let free = fs.super_block().free_blocks_count;

    // 数据块刚好够，但索引块还要再占 3 块
    let size = free as u64 * 1024;
    assert_eq!(Err(Error::NoSpace), fs.grow(ino, &mut inode, size));
    assert_eq!(free, fs.super_block().free_blocks_count);
    assert_eq!(0, fs.read_inode(ino).unwrap().size);

    fs.grow(ino, &mut inode, size - 3 * 1024).unwrap();
    assert_eq!(0, fs.super_block().free_blocks_count);
    fs.verify_counts().unwrap();
}

#[test]
fn truncate_zeroes_the_cut_tail() {
    let mut fs = mount(&one_group());
    let ino = new_file(&mut fs, "f");

    fs.write_at(ino, 0, &[0xAA; 100]).unwrap();
    fs.truncate(ino, 10).unwrap();
    fs.truncate(ino, 100).unwrap();

    let mut buf = [0xFF; 100];
    assert_eq!(Ok(100), fs.read_at(ino, 0, &mut buf));
    assert_eq!([0xAA; 10], buf[..10]);
    assert!(buf[10..].iter().all(|&b| b == 0));
}

#[test]
fn write_fills_holes() {
    let mut fs = mount(&one_group());
    let ino = new_file(&mut fs, "sparse");
    fs.write_at(ino, 0, &[1; 3 * 1024]).unwrap();

    // 挖掉第 1 块
    let mut inode = fs.read_inode(ino).unwrap();
    fs.dealloc(Unit::Block, inode.block[1]).unwrap();
    inode.block[1] = 0;
    inode.blocks -= 2;
    fs.write_inode(ino, &inode).unwrap();

    let mut buf = [0xFF; 1024];
    assert_eq!(Ok(1024), fs.read_at(ino, 1024, &mut buf));
    assert!(buf.iter().all(|&b| b == 0));

    fs.write_at(ino, 1024 + 10, b"abc").unwrap();
    let inode = fs.read_inode(ino).unwrap();
    assert_ne!(0, inode.block[1]);
    assert_eq!(6, inode.blocks);

    fs.read_at(ino, 1024, &mut buf).unwrap();
    assert_eq!(b"abc", &buf[10..13]);
    assert!(buf[..10].iter().chain(&buf[13..]).all(|&b| b == 0));
    fs.verify_counts().unwrap();
}

#[test]
fn failed_growth_keeps_attached_blocks_reachable() {
    let disk = mkfs(FormatOptions::new(1024, 300));
    let mut fs = mount(&disk);
    let ino = new_file(&mut fs, "f");
    let mut inode = fs.read_inode(ino).unwrap();
    fs.grow(ino, &mut inode, 13 * 1024).unwrap();

    // 第 12 块连同一级索引表一起挖掉，末尾成了空洞
    let ind = inode.block[IND_BLOCK];
    let last = BlockMap::new(1024).lookup(&fs, &inode, 12).unwrap();
    fs.dealloc(Unit::Block, last).unwrap();
    fs.dealloc(Unit::Block, ind).unwrap();
    inode.block[IND_BLOCK] = 0;
    inode.blocks -= 4;
    fs.write_inode(ino, &inode).unwrap();

    let baseline = fs.super_block().free_blocks_count;
    let taken: Vec<u32> = (0..baseline - 2)
        .map(|_| fs.alloc(Unit::Block, 0).unwrap())
        .collect();

    // 预检按大小估算索引块，实际还要补一张一级索引表
    assert_eq!(Err(Error::NoSpace), fs.grow(ino, &mut inode, 15 * 1024));
    let on_disk = fs.read_inode(ino).unwrap();
    assert_eq!(14 * 1024, on_disk.size);
    assert_eq!(28, on_disk.blocks);
    assert_ne!(0, on_disk.block[IND_BLOCK]);
    assert_eq!(0, fs.super_block().free_blocks_count);

    let mut inode = on_disk;
    fs.shrink(ino, &mut inode, 0).unwrap();
    for id in taken {
        fs.dealloc(Unit::Block, id).unwrap();
    }
    assert_eq!(baseline + 12, fs.super_block().free_blocks_count);
    fs.verify_counts().unwrap();
}

#[test]
fn reserved_inodes_are_never_handed_out() {
    let disk = one_group();
    let bitmap_at = mount(&disk).group(0).inode_bitmap as usize * 1024;

    // 清掉 4 号 inode 的位，它仍在保留范围内
    disk.patch(bitmap_at, &[0xF7]);
    let mut fs = mount(&disk);
    assert_eq!(11, fs.super_block().first_ino());
    assert_eq!(11, fs.alloc(Unit::Inode, 0).unwrap());
    assert_eq!(12, fs.alloc(Unit::DirInode, 0).unwrap());
}

#[test]
fn read_only_mount_writes_nothing() {
    let disk = one_group();
    let before = disk.snapshot();
    let mut fs = Ext2FileSystem::open(disk.clone(), MountOptions::default().read_only())
        .ok()
        .unwrap();

    assert_eq!(Ok(ROOT_INO), fs.lookup(ROOT_INO, "."));
    assert_eq!(
        Err(Error::ReadOnly),
        fs.create_node(ROOT_INO, "f", InodeKind::Regular, 0o644, 0, Credentials::ROOT)
    );
    assert_eq!(Err(Error::ReadOnly), fs.alloc(Unit::Block, 0));
    fs.close().unwrap();
    assert!(before == disk.snapshot());
}

#[test]
fn mount_checks_superblock() {
    let disk = one_group();
    let sb_at = SUPERBLOCK_OFFSET as usize;

    disk.patch(sb_at + 56, &[0, 0]);
    assert_eq!(
        Some(Error::InvalidArgument),
        Ext2FileSystem::open(disk.clone(), MountOptions::default()).err()
    );
    disk.patch(sb_at + 56, &[0x53, 0xEF]);

    // FILETYPE | EXTENTS
    disk.patch(sb_at + 96, &0x42u32.to_le_bytes());
    assert_eq!(
        Some(Error::Unsupported),
        Ext2FileSystem::open(disk.clone(), MountOptions::default()).err()
    );
    disk.patch(sb_at + 96, &0x02u32.to_le_bytes());

    // BTREE_DIR
    disk.patch(sb_at + 100, &0x04u32.to_le_bytes());
    let fs = mount(&disk);
    assert!(fs.is_read_only());
}

#[test]
fn clean_flag_follows_mount_state() {
    let disk = one_group();
    assert_ne!(0, disk_super_block(&disk).state & SuperBlock::STATE_VALID);

    let mut fs = mount(&disk);
    let sb = disk_super_block(&disk);
    assert_eq!(0, sb.state & SuperBlock::STATE_VALID);
    assert_eq!(1, sb.mnt_count);

    fs.close().unwrap();
    assert_ne!(0, disk_super_block(&disk).state & SuperBlock::STATE_VALID);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocator_conserves_units(
        ops in proptest::collection::vec((any::<bool>(), 0usize..64, 0u32..2), 1..100),
    ) {
        let mut fs = mount(&two_groups());
        let mut blocks = Vec::new();
        let mut inodes = Vec::new();

        for (is_alloc, pick, preferred) in ops {
            let (unit, held) = if pick % 2 == 0 {
                (Unit::Block, &mut blocks)
            } else {
                (Unit::Inode, &mut inodes)
            };
            if is_alloc || held.is_empty() {
                let id = fs.alloc(unit, preferred).unwrap();
                prop_assert!(!held.contains(&id));
                held.push(id);
            } else {
                let id = held.swap_remove(pick % held.len());
                fs.dealloc(unit, id).unwrap();
            }
            // 位图中的空闲数与描述符、超级块一致
            prop_assert_eq!(Ok(()), fs.verify_counts());
        }

        let sum: u32 = (0..fs.group_count())
            .map(|g| fs.group(g).free_blocks_count as u32)
            .sum();
        prop_assert_eq!(fs.super_block().free_blocks_count, sum);
    }

    #[test]
    fn directory_block_stays_packed(
        ops in proptest::collection::vec((any::<bool>(), 0u8..24, 1usize..40), 1..200),
    ) {
        let mut block = vec![0u8; 1024];
        dir::init_dot_block(&mut block, 2, 2, 2);
        let mut model = BTreeMap::<Vec<u8>, u32>::new();

        for (i, (is_insert, key, len)) in ops.into_iter().enumerate() {
            let name = vec![b'a' + key; len];
            if is_insert {
                if model.contains_key(&name) {
                    continue;
                }
                let ino = 100 + i as u32;
                if dir::insert(&mut block, &name, ino, 1).unwrap() {
                    model.insert(name, ino);
                }
            } else {
                let removed = dir::remove(&mut block, &name).unwrap();
                prop_assert_eq!(model.remove(&name), removed);
            }

            let entries = dir::entries(&block).collect::<Result<Vec<_>>>().unwrap();
            let total: usize = entries.iter().map(|e| e.head.rec_len as usize).sum();
            prop_assert_eq!(1024, total);

            let live: Vec<_> = entries
                .iter()
                .filter(|e| e.is_live() && e.name != b"." && e.name != b"..")
                .collect();
            prop_assert_eq!(model.len(), live.len());
            for e in live {
                prop_assert_eq!(model.get(e.name).copied(), Some(e.head.inode));
            }
        }
    }
}
