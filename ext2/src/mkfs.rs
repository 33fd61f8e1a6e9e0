//! # 格式化
//!
//! 每个块组的布局：
//! 超级块副本 | 描述符表副本 | 块位图 | inode 位图 | inode 表 | 数据块 ...
//!
//! 每组都带超级块与描述符表的副本（不启用 sparse_super），
//! 目录项携带文件类型（启用 FILETYPE）。

use alloc::vec;

use block_dev::BlockDevice;
use vfs::{Credentials, Error};

use crate::block::{new_block, write_exact};
use crate::config::FormatOptions;
use crate::dir::init_dot_block;
use crate::layout::{Bitmap, DiskInode, GroupDesc, IncompatFeature, InodeKind, SuperBlock};
use crate::{
    GOOD_OLD_FIRST_INO, GOOD_OLD_INODE_SIZE, ROOT_INO, Result, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};

/// 卷的几何参数
#[derive(Debug)]
struct Geometry {
    block_size: usize,
    blocks_count: u32,
    first_data_block: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    groups: u32,
    gdt_blocks: u32,
    inode_table_blocks: u32,
}

impl Geometry {
    fn new(opts: &FormatOptions) -> Result<Self> {
        let block_size = opts.block_size;
        if !matches!(block_size, 1024 | 2048 | 4096) {
            log::error!("unsupported block size {block_size}");
            return Err(Error::InvalidArgument);
        }
        let bits = (block_size * 8) as u32;
        let first_data_block = (block_size == 1024) as u32;

        let blocks_per_group = opts.blocks_per_group.unwrap_or(bits);
        if blocks_per_group == 0 || blocks_per_group % 8 != 0 || blocks_per_group > bits {
            log::error!("invalid blocks per group {blocks_per_group}");
            return Err(Error::InvalidArgument);
        }
        if opts.blocks_count <= first_data_block {
            return Err(Error::InvalidArgument);
        }
        let groups = (opts.blocks_count - first_data_block).div_ceil(blocks_per_group);

        // inode 表占满整块，且位图按字节对齐
        let align = (block_size / GOOD_OLD_INODE_SIZE).max(8) as u32;
        let inodes_per_group = match opts.inodes_per_group {
            Some(ipg) => ipg,
            None => {
                let bytes = opts.blocks_count as u64 * block_size as u64;
                let total = bytes / opts.bytes_per_inode.max(1) as u64;
                total.div_ceil(groups as u64) as u32
            }
        };
        let inodes_per_group = inodes_per_group.max(16).next_multiple_of(align).min(bits);

        let mut geo = Self {
            block_size,
            blocks_count: opts.blocks_count,
            first_data_block,
            blocks_per_group,
            inodes_per_group,
            groups,
            gdt_blocks: 0,
            inode_table_blocks: inodes_per_group * GOOD_OLD_INODE_SIZE as u32 / block_size as u32,
        };
        geo.gdt_blocks = geo.gdt_blocks_for(groups);
        if blocks_per_group <= geo.overhead() {
            log::error!("{blocks_per_group} blocks per group cannot hold the group metadata");
            return Err(Error::InvalidArgument);
        }

        // 最后一组装不下元数据与至少一个数据块时舍去
        if geo.group_blocks(groups - 1) <= geo.overhead() {
            if groups == 1 {
                log::error!("{} blocks are too few for one group", opts.blocks_count);
                return Err(Error::NoSpace);
            }
            geo.groups -= 1;
            geo.blocks_count = first_data_block + geo.groups * blocks_per_group;
            geo.gdt_blocks = geo.gdt_blocks_for(geo.groups);
            log::debug!("dropped a runt last group, volume shrinks to {} blocks", geo.blocks_count);
        }

        Ok(geo)
    }

    fn gdt_blocks_for(&self, groups: u32) -> u32 {
        (groups as usize * GroupDesc::SIZE).div_ceil(self.block_size) as u32
    }

    /// 每组开头的元数据块数
    #[inline]
    fn overhead(&self) -> u32 {
        1 + self.gdt_blocks + 2 + self.inode_table_blocks
    }

    #[inline]
    fn group_start(&self, g: u32) -> u32 {
        self.first_data_block + g * self.blocks_per_group
    }

    fn group_blocks(&self, g: u32) -> u32 {
        (self.blocks_count - self.group_start(g)).min(self.blocks_per_group)
    }

    fn desc(&self, g: u32) -> GroupDesc {
        let bitmap = self.group_start(g) + 1 + self.gdt_blocks;
        GroupDesc::new(bitmap, bitmap + 1, bitmap + 2)
    }
}

pub fn format(dev: &dyn BlockDevice, opts: &FormatOptions) -> Result<()> {
    let geo = Geometry::new(opts)?;
    let bs = geo.block_size;
    let bits = bs * 8;
    let reserved_inodes = GOOD_OLD_FIRST_INO - 1;
    let write_block = |id: u32, buf: &[u8]| write_exact(dev, id as u64 * bs as u64, buf);

    // 根目录占用 0 号组的第一个数据块
    let root_block = geo.group_start(0) + geo.overhead();

    let mut groups = vec![GroupDesc::default(); geo.groups as usize];
    let mut bitmap_buf = new_block(bs);
    for (g, desc) in (0..geo.groups).zip(groups.iter_mut()) {
        *desc = geo.desc(g);
        let gblocks = geo.group_blocks(g) as usize;
        let mut used_blocks = geo.overhead() as usize;

        bitmap_buf.fill(0);
        let mut bitmap = Bitmap::new(&mut bitmap_buf, bits);
        bitmap.set_range(0, used_blocks);
        if g == 0 {
            bitmap.set(used_blocks);
            used_blocks += 1;
        }
        // 组外的位视为已用
        bitmap.set_range(gblocks, bits);
        write_block(desc.block_bitmap, &bitmap_buf)?;

        bitmap_buf.fill(0);
        let mut bitmap = Bitmap::new(&mut bitmap_buf, bits);
        let mut used_inodes = 0;
        if g == 0 {
            bitmap.set_range(0, reserved_inodes as usize);
            used_inodes = reserved_inodes;
            desc.used_dirs_count = 1;
        }
        bitmap.set_range(geo.inodes_per_group as usize, bits);
        write_block(desc.inode_bitmap, &bitmap_buf)?;

        let zero = new_block(bs);
        for i in 0..geo.inode_table_blocks {
            write_block(desc.inode_table + i, &zero)?;
        }

        desc.free_blocks_count = (gblocks - used_blocks) as u16;
        desc.free_inodes_count = (geo.inodes_per_group - used_inodes) as u16;
    }

    let mut root = DiskInode::default();
    root.init(InodeKind::Directory, 0o755, Credentials::ROOT, opts.now);
    root.links_count = 2;
    root.size = bs as u32;
    root.blocks = (bs / 512) as u32;
    root.block[0] = root_block;
    let (table_block, offset) = {
        let at = (ROOT_INO - 1) as usize * GOOD_OLD_INODE_SIZE;
        (groups[0].inode_table + (at / bs) as u32, at % bs)
    };
    let mut buf = new_block(bs);
    root.encode(&mut buf[offset..]);
    write_block(table_block, &buf)?;

    let file_type = InodeKind::Directory.file_type();
    init_dot_block(&mut buf, ROOT_INO, ROOT_INO, file_type);
    write_block(root_block, &buf)?;

    let mut sb = super_block(&geo, opts);
    sb.free_blocks_count = groups.iter().map(|d| d.free_blocks_count as u32).sum();
    sb.free_inodes_count = groups.iter().map(|d| d.free_inodes_count as u32).sum();

    let mut gdt = vec![0; geo.gdt_blocks as usize * bs];
    for (desc, raw) in groups.iter().zip(gdt.chunks_exact_mut(GroupDesc::SIZE)) {
        desc.encode(raw);
    }

    for g in 0..geo.groups {
        let start = geo.group_start(g);
        sb.block_group_nr = g as u16;
        let mut raw = [0; SUPERBLOCK_SIZE];
        sb.encode(&mut raw);
        if g == 0 {
            write_exact(dev, SUPERBLOCK_OFFSET, &raw)?;
        } else {
            buf.fill(0);
            buf[..SUPERBLOCK_SIZE].copy_from_slice(&raw);
            write_block(start, &buf)?;
        }

        for (i, chunk) in gdt.chunks_exact(bs).enumerate() {
            write_block(start + 1 + i as u32, chunk)?;
        }
    }

    log::debug!(
        "formatted ext2: {} blocks of {bs} bytes, {} groups, {} inodes per group",
        geo.blocks_count,
        geo.groups,
        geo.inodes_per_group
    );

    Ok(())
}

fn super_block(geo: &Geometry, opts: &FormatOptions) -> SuperBlock {
    let log_block_size = (geo.block_size / 1024).trailing_zeros();

    let mut sb = SuperBlock::new();
    sb.inodes_count = geo.inodes_per_group * geo.groups;
    sb.blocks_count = geo.blocks_count;
    sb.r_blocks_count = (geo.blocks_count as u64 * opts.reserved_percent as u64 / 100) as u32;
    sb.first_data_block = geo.first_data_block;
    sb.log_block_size = log_block_size;
    sb.log_frag_size = log_block_size;
    sb.blocks_per_group = geo.blocks_per_group;
    sb.frags_per_group = geo.blocks_per_group;
    sb.inodes_per_group = geo.inodes_per_group;
    sb.wtime = opts.now;
    sb.lastcheck = opts.now;
    sb.max_mnt_count = u16::MAX;
    sb.state = SuperBlock::STATE_VALID;
    // 出错时继续
    sb.errors = 1;
    sb.rev_level = SuperBlock::REV_DYNAMIC;
    sb.first_ino = GOOD_OLD_FIRST_INO;
    sb.inode_size = GOOD_OLD_INODE_SIZE as u16;
    sb.feature_incompat = IncompatFeature::FileType as u32;
    sb.uuid = opts.uuid;
    sb.volume_name = opts.volume_name;
    sb
}
