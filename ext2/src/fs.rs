//! # 磁盘块管理器层
//!
//! 挂载时读入超级块与块组描述符并常驻内存，
//! 其余结构（位图、inode、数据块）都按需读入本次调用自带的块缓冲，改完立即写回。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use vfs::Error;

use crate::block::{self, new_block};
use crate::config::MountOptions;
use crate::layout::{
    Bitmap, DiskInode, GroupDesc, IncompatFeature, RoCompatFeature, SuperBlock, probe_groups,
};
use crate::{Result, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};

pub struct Ext2FileSystem {
    block_device: Arc<dyn BlockDevice>,
    super_block: SuperBlock,
    groups: Vec<GroupDesc>,
    block_size: usize,
    read_only: bool,
    /// 目录项是否携带文件类型
    filetype: bool,
    clock: fn() -> u32,
}

/// 位图分配的单元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Block,
    Inode,
    /// 目录的 inode，分配与回收时还要维护`used_dirs_count`
    DirInode,
}

impl Ext2FileSystem {
    pub fn open(block_device: Arc<dyn BlockDevice>, opts: MountOptions) -> Result<Self> {
        let mut raw = [0; SUPERBLOCK_SIZE];
        block::read_exact(&*block_device, SUPERBLOCK_OFFSET, &mut raw)?;
        let super_block = SuperBlock::decode(&raw);

        if !super_block.is_valid() {
            log::error!("bad magic number, not an ext2 volume");
            return Err(Error::InvalidArgument);
        }
        if super_block.log_block_size > 2 {
            log::error!("unsupported block size 1024 << {}", super_block.log_block_size);
            return Err(Error::Unsupported);
        }
        let block_size = super_block.block_size();
        check_geometry(&super_block, block_size)?;

        let incompat = super_block.incompat().map_err(|bits| {
            log::error!("unknown incompatible features {bits:#x}");
            Error::Unsupported
        })?;
        if !BitFlags::from(IncompatFeature::FileType).contains(incompat) {
            log::error!("unsupported incompatible features {incompat:?}");
            return Err(Error::Unsupported);
        }

        let mut read_only = opts.read_only;
        let ro_supported = RoCompatFeature::SparseSuper | RoCompatFeature::LargeFile;
        let ro_ok = super_block
            .ro_compat()
            .is_ok_and(|flags| ro_supported.contains(flags));
        if !ro_ok && !read_only {
            log::warn!(
                "unsupported read-only features {:#x}, mounting read-only",
                super_block.feature_ro_compat
            );
            read_only = true;
        }

        let mut fs = Self {
            block_device,
            groups: Vec::new(),
            block_size,
            read_only,
            filetype: incompat.contains(IncompatFeature::FileType),
            clock: opts.clock,
            super_block,
        };
        fs.load_groups()?;

        if !fs.read_only {
            let now = fs.now();
            let sb = &mut fs.super_block;
            sb.mnt_count = sb.mnt_count.wrapping_add(1);
            sb.mtime = now;
            // 卸载前都视为未干净卸载
            sb.state &= !SuperBlock::STATE_VALID;
            fs.sync_super()?;
        }

        log::debug!(
            "mounted ext2: {} blocks of {} bytes, {} inodes, {} groups{}",
            fs.super_block.blocks_count,
            fs.block_size,
            fs.super_block.inodes_count,
            fs.groups.len(),
            if fs.read_only { ", read-only" } else { "" },
        );

        Ok(fs)
    }

    /// 标记卷为干净卸载
    pub fn close(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.super_block.state |= SuperBlock::STATE_VALID;
        self.super_block.wtime = self.now();
        self.sync_super()
    }

    fn load_groups(&mut self) -> Result<()> {
        let count = self.group_count() as usize;
        let per_block = self.block_size / GroupDesc::SIZE;
        let mut buf = new_block(self.block_size);

        self.groups = Vec::with_capacity(count);
        for (i, block_id) in (self.gdt_start()..).take(count.div_ceil(per_block)).enumerate() {
            self.read_block(block_id, &mut buf)?;
            let in_block = per_block.min(count - i * per_block);
            self.groups.extend(
                buf.chunks_exact(GroupDesc::SIZE)
                    .take(in_block)
                    .map(GroupDesc::decode),
            );
        }

        for (g, desc) in self.groups.iter().enumerate() {
            let sb = &self.super_block;
            let in_range = |id: u32| id > sb.first_data_block && id < sb.blocks_count;
            if ![desc.block_bitmap, desc.inode_bitmap, desc.inode_table]
                .into_iter()
                .all(in_range)
            {
                log::error!("group {g} descriptor points outside the volume: {desc:?}");
                return Err(Error::Corrupted);
            }
        }

        Ok(())
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    #[inline]
    pub fn group(&self, g: u32) -> &GroupDesc {
        &self.groups[g as usize]
    }

    #[inline]
    pub fn group_count(&self) -> u32 {
        self.super_block.group_count()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    pub fn has_filetype(&self) -> bool {
        self.filetype
    }

    #[inline]
    pub fn now(&self) -> u32 {
        (self.clock)()
    }

    pub fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// 块组描述符表的起始块
    #[inline]
    fn gdt_start(&self) -> u32 {
        self.super_block.first_data_block + 1
    }
}

/* 块读写 */

impl Ext2FileSystem {
    fn check_block(&self, id: u32) -> Result<()> {
        if id == 0 || id >= self.super_block.blocks_count {
            log::error!("block pointer {id} outside the volume");
            return Err(Error::Corrupted);
        }
        Ok(())
    }

    #[inline]
    fn block_offset(&self, id: u32) -> u64 {
        id as u64 * self.block_size as u64
    }

    pub fn read_block(&self, id: u32, buf: &mut [u8]) -> Result<()> {
        self.check_block(id)?;
        block::read_exact(&*self.block_device, self.block_offset(id), buf)
    }

    pub fn write_block(&self, id: u32, buf: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_block(id)?;
        block::write_exact(&*self.block_device, self.block_offset(id), buf)
    }

    pub fn zero_block(&self, id: u32) -> Result<()> {
        self.write_block(id, &new_block(self.block_size))
    }

    /// 超级块总是以 1024 字节的请求写在字节偏移 1024 处
    fn sync_super(&self) -> Result<()> {
        let mut raw = [0; SUPERBLOCK_SIZE];
        self.super_block.encode(&mut raw);
        block::write_exact(&*self.block_device, SUPERBLOCK_OFFSET, &raw)
    }

    /// 把第`g`组的描述符写回其所在的描述符表块
    fn sync_group(&self, g: u32) -> Result<()> {
        let at = g as usize * GroupDesc::SIZE;
        let block_id = self.gdt_start() + (at / self.block_size) as u32;
        let offset = at % self.block_size;

        let mut buf = new_block(self.block_size);
        self.read_block(block_id, &mut buf)?;
        self.groups[g as usize].encode(&mut buf[offset..offset + GroupDesc::SIZE]);
        self.write_block(block_id, &buf)
    }
}

/* inode 读写 */

impl Ext2FileSystem {
    /// inode 在磁盘上的位置：**块号**以及**块内偏移**
    fn inode_pos(&self, ino: u32) -> Result<(u32, usize)> {
        if ino == 0 || ino > self.super_block.inodes_count {
            return Err(Error::InvalidArgument);
        }
        let ipg = self.super_block.inodes_per_group;
        let desc = &self.groups[((ino - 1) / ipg) as usize];
        let at = ((ino - 1) % ipg) as usize * self.super_block.inode_size();

        Ok((
            desc.inode_table + (at / self.block_size) as u32,
            at % self.block_size,
        ))
    }

    /// inode 所在的块组
    #[inline]
    pub fn inode_group(&self, ino: u32) -> u32 {
        (ino - 1) / self.super_block.inodes_per_group
    }

    pub fn read_inode(&self, ino: u32) -> Result<DiskInode> {
        let (block_id, offset) = self.inode_pos(ino)?;
        let mut buf = new_block(self.block_size);
        self.read_block(block_id, &mut buf)?;
        Ok(DiskInode::decode(&buf[offset..]))
    }

    /// 读-改-写所在的块，记录中 128 字节之后的部分保持原样
    pub fn write_inode(&self, ino: u32, inode: &DiskInode) -> Result<()> {
        let (block_id, offset) = self.inode_pos(ino)?;
        let mut buf = new_block(self.block_size);
        self.read_block(block_id, &mut buf)?;
        inode.encode(&mut buf[offset..]);
        self.write_block(block_id, &buf)
    }
}

/* 位图分配 */

impl Ext2FileSystem {
    fn bitmap_block(&self, unit: Unit, g: u32) -> u32 {
        let desc = &self.groups[g as usize];
        match unit {
            Unit::Block => desc.block_bitmap,
            Unit::Inode | Unit::DirInode => desc.inode_bitmap,
        }
    }

    /// 第`g`组实际拥有的单元数：最后一组的块可能不满
    fn units_in_group(&self, unit: Unit, g: u32) -> usize {
        let sb = &self.super_block;
        match unit {
            Unit::Block => {
                let start = g * sb.blocks_per_group;
                (sb.blocks_count - sb.first_data_block - start).min(sb.blocks_per_group) as usize
            }
            Unit::Inode | Unit::DirInode => sb.inodes_per_group as usize,
        }
    }

    fn group_free(&self, unit: Unit, g: u32) -> u32 {
        let desc = &self.groups[g as usize];
        match unit {
            Unit::Block => desc.free_blocks_count as u32,
            Unit::Inode | Unit::DirInode => desc.free_inodes_count as u32,
        }
    }

    /// 单元号到 (块组, 组内位) 的映射，越界视为损坏
    fn unit_pos(&self, unit: Unit, id: u32) -> Result<(u32, usize)> {
        let sb = &self.super_block;
        let (first, last, per_group) = match unit {
            Unit::Block => (sb.first_data_block, sb.blocks_count, sb.blocks_per_group),
            Unit::Inode | Unit::DirInode => (1, sb.inodes_count + 1, sb.inodes_per_group),
        };
        if id < first || id >= last {
            log::error!("{unit:?} {id} outside the volume");
            return Err(Error::Corrupted);
        }
        let rel = id - first;
        Ok((rel / per_group, (rel % per_group) as usize))
    }

    /// 从首选块组出发向两侧探查，分配一个空闲单元并返回其编号
    ///
    /// 依次持久化位图块、描述符与超级块；没有空闲单元时不改动磁盘。
    pub fn alloc(&mut self, unit: Unit, preferred: u32) -> Result<u32> {
        self.check_writable()?;

        let group = probe_groups(preferred, self.group_count())
            .find(|&g| self.group_free(unit, g) > 0)
            .ok_or(Error::NoSpace)?;

        let bitmap_block = self.bitmap_block(unit, group);
        let mut buf = new_block(self.block_size);
        self.read_block(bitmap_block, &mut buf)?;
        // 保留的 inode 不参与分配
        let skip = match unit {
            Unit::Block => 0,
            Unit::Inode | Unit::DirInode => {
                let reserved = self.super_block.first_ino().saturating_sub(1);
                reserved.saturating_sub(group * self.super_block.inodes_per_group) as usize
            }
        };
        let bit = {
            let mut bitmap = Bitmap::new(&mut buf, self.units_in_group(unit, group));
            let Some(bit) = bitmap.first_zero_from(skip) else {
                log::error!("group {group} claims free {unit:?}s but its bitmap is full");
                return Err(Error::Corrupted);
            };
            bitmap.set(bit);
            bit
        };
        self.write_block(bitmap_block, &buf)?;

        let desc = &mut self.groups[group as usize];
        let sb = &mut self.super_block;
        match unit {
            Unit::Block => {
                desc.free_blocks_count -= 1;
                sb.free_blocks_count = sb.free_blocks_count.saturating_sub(1);
            }
            Unit::Inode | Unit::DirInode => {
                desc.free_inodes_count -= 1;
                sb.free_inodes_count = sb.free_inodes_count.saturating_sub(1);
                if unit == Unit::DirInode {
                    desc.used_dirs_count += 1;
                }
            }
        }
        self.sync_group(group)?;
        self.sync_super()?;

        let id = match unit {
            Unit::Block => {
                self.super_block.first_data_block
                    + group * self.super_block.blocks_per_group
                    + bit as u32
            }
            Unit::Inode | Unit::DirInode => {
                group * self.super_block.inodes_per_group + bit as u32 + 1
            }
        };
        log::trace!("alloc {unit:?} {id} in group {group}");

        Ok(id)
    }

    /// 分配的逆操作，重复释放视为损坏
    pub fn dealloc(&mut self, unit: Unit, id: u32) -> Result<()> {
        self.check_writable()?;

        let (group, bit) = self.unit_pos(unit, id)?;
        let bitmap_block = self.bitmap_block(unit, group);
        let mut buf = new_block(self.block_size);
        self.read_block(bitmap_block, &mut buf)?;
        let was_set = Bitmap::new(&mut buf, self.units_in_group(unit, group)).clear(bit);
        if !was_set {
            log::error!("double free of {unit:?} {id}");
            return Err(Error::Corrupted);
        }
        self.write_block(bitmap_block, &buf)?;

        let desc = &mut self.groups[group as usize];
        let sb = &mut self.super_block;
        match unit {
            Unit::Block => {
                desc.free_blocks_count += 1;
                sb.free_blocks_count += 1;
            }
            Unit::Inode | Unit::DirInode => {
                desc.free_inodes_count += 1;
                sb.free_inodes_count += 1;
                if unit == Unit::DirInode {
                    desc.used_dirs_count = desc.used_dirs_count.saturating_sub(1);
                }
            }
        }
        self.sync_group(group)?;
        self.sync_super()?;
        log::trace!("free {unit:?} {id} in group {group}");

        Ok(())
    }

    /// 该单元在位图中是否已分配
    pub fn is_allocated(&self, unit: Unit, id: u32) -> Result<bool> {
        let (group, bit) = self.unit_pos(unit, id)?;
        let mut buf = new_block(self.block_size);
        self.read_block(self.bitmap_block(unit, group), &mut buf)?;
        Ok(Bitmap::new(&mut buf, self.units_in_group(unit, group)).test(bit))
    }

    /// 从位图重新统计空闲数，与描述符、超级块逐一核对
    pub fn verify_counts(&self) -> Result<()> {
        let mut buf = new_block(self.block_size);
        let (mut free_blocks, mut free_inodes) = (0, 0);

        for g in 0..self.group_count() {
            for unit in [Unit::Block, Unit::Inode] {
                self.read_block(self.bitmap_block(unit, g), &mut buf)?;
                let units = self.units_in_group(unit, g);
                let free = (units - Bitmap::new(&mut buf, units).count_ones()) as u32;
                if free != self.group_free(unit, g) {
                    log::error!(
                        "group {g}: bitmap has {free} free {unit:?}s, descriptor says {}",
                        self.group_free(unit, g)
                    );
                    return Err(Error::Corrupted);
                }
                match unit {
                    Unit::Block => free_blocks += free,
                    _ => free_inodes += free,
                }
            }
        }

        let sb = &self.super_block;
        if free_blocks != sb.free_blocks_count || free_inodes != sb.free_inodes_count {
            log::error!(
                "superblock free counts ({}, {}) diverge from groups ({free_blocks}, {free_inodes})",
                sb.free_blocks_count,
                sb.free_inodes_count
            );
            return Err(Error::Corrupted);
        }

        Ok(())
    }
}

fn check_geometry(sb: &SuperBlock, block_size: usize) -> Result<()> {
    let bits = (block_size * 8) as u32;
    let inode_size = sb.inode_size();
    let sane = sb.blocks_per_group != 0
        && sb.blocks_per_group <= bits
        && sb.inodes_per_group != 0
        && sb.inodes_per_group <= bits
        && sb.first_data_block < sb.blocks_count
        && inode_size >= DiskInode::SIZE
        && inode_size.is_power_of_two()
        && inode_size <= block_size
        && sb.inodes_count as u64 <= sb.inodes_per_group as u64 * sb.group_count() as u64;

    if sane {
        Ok(())
    } else {
        log::error!(
            "inconsistent superblock geometry: {} blocks, {} per group, {} inodes, {} per group",
            sb.blocks_count,
            sb.blocks_per_group,
            sb.inodes_count,
            sb.inodes_per_group
        );
        Err(Error::Corrupted)
    }
}
