//! # 块映射层
//!
//! 把文件内的逻辑块索引翻译为物理块号：
//! - 索引 `0..12`：直接取`block[i]`
//! - 索引 `12..12+P`：一级索引块（`block[12]`）的第`i-12`项
//! - 索引 `12+P..12+P+P²`：`divmod(i-12-P, P)`得到 (表, 项)，
//!   先在二级索引块（`block[13]`）中找到表，再取其中一项
//!
//! 其中 `P = 块大小 / 4`，为每个索引块能容纳的块号个数。
//! 块号为 0 表示空洞，读出来全是 0。

use alloc::vec;
use alloc::vec::Vec;

use vfs::Error;

use crate::block::new_block;
use crate::fs::Ext2FileSystem;
use crate::layout::{DiskInode, get_u32, put_u32};
use crate::{DIND_BLOCK, DIRECT_COUNT, IND_BLOCK, Result};

/// 逻辑块在指针结构中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPtr {
    /// `block[i]`
    Direct(usize),
    /// 一级索引块中的第几项
    SingleIndirect(usize),
    /// 二级索引块中的第几张表，表中的第几项
    DoubleIndirect(usize, usize),
}

impl BlockPtr {
    /// 逻辑块`index`的位置，`ptrs`为每个索引块的块号个数
    pub fn locate(index: u32, ptrs: usize) -> Result<Self> {
        let index = index as usize;

        if index < DIRECT_COUNT {
            return Ok(Self::Direct(index));
        }
        // 剔去直接索引的部分
        let index = index - DIRECT_COUNT;
        if index < ptrs {
            return Ok(Self::SingleIndirect(index));
        }
        // 剔去使用了一级索引的部分
        let index = index - ptrs;
        if index < ptrs * ptrs {
            return Ok(Self::DoubleIndirect(index / ptrs, index % ptrs));
        }

        Err(Error::FileTooLarge)
    }

    /// 不经三级索引能寻址的逻辑块数
    #[inline]
    pub const fn capacity(ptrs: usize) -> usize {
        DIRECT_COUNT + ptrs + ptrs * ptrs
    }

    /// 连续的`blocks`个数据块需要的索引块个数
    pub fn meta_blocks(blocks: usize, ptrs: usize) -> usize {
        let Some(rest) = blocks.checked_sub(DIRECT_COUNT).filter(|&n| n > 0) else {
            return 0;
        };
        match rest.checked_sub(ptrs).filter(|&n| n > 0) {
            None => 1,
            // 一级索引块 + 二级索引块 + 其下的表
            Some(rest) => 2 + rest.div_ceil(ptrs),
        }
    }
}

/// 一次只缓存一张索引块，以块号为键
#[derive(Debug)]
pub struct IndirectCache {
    /// 为 0 表示没有缓存任何表
    id: u32,
    table: Vec<u32>,
    dirty: bool,
}

impl IndirectCache {
    pub fn new(ptrs: usize) -> Self {
        Self {
            id: 0,
            table: vec![0; ptrs],
            dirty: false,
        }
    }

    /// 换入块`id`上的索引表，被换出的表若有改动先写回
    pub fn load(&mut self, fs: &Ext2FileSystem, id: u32) -> Result<()> {
        if self.id == id {
            return Ok(());
        }
        self.flush(fs)?;

        let mut buf = new_block(fs.block_size());
        fs.read_block(id, &mut buf)?;
        for (i, ptr) in self.table.iter_mut().enumerate() {
            *ptr = get_u32(&buf, i * 4);
        }
        self.id = id;

        Ok(())
    }

    /// 接管刚分配的块`id`作为全零的新表
    pub fn adopt(&mut self, fs: &Ext2FileSystem, id: u32) -> Result<()> {
        self.flush(fs)?;
        self.table.fill(0);
        self.id = id;
        self.dirty = true;
        Ok(())
    }

    /// 块`id`已被释放，丢弃缓存的表
    pub fn forget(&mut self, id: u32) {
        if self.id == id {
            self.id = 0;
            self.dirty = false;
        }
    }

    #[inline]
    pub fn get(&self, slot: usize) -> u32 {
        self.table[slot]
    }

    #[inline]
    pub fn set(&mut self, slot: usize, ptr: u32) {
        self.table[slot] = ptr;
        self.dirty = true;
    }

    pub fn flush(&mut self, fs: &Ext2FileSystem) -> Result<()> {
        if self.dirty && self.id != 0 {
            let mut buf = new_block(fs.block_size());
            for (i, &ptr) in self.table.iter().enumerate() {
                put_u32(&mut buf, i * 4, ptr);
            }
            fs.write_block(self.id, &buf)?;
        }
        self.dirty = false;
        Ok(())
    }
}

/// 一次操作期间的块映射器，每级各缓存一张表
#[derive(Debug)]
pub struct BlockMap {
    ptrs: usize,
    /// inode 直接引用的表：一级索引块或二级索引块
    pub l1: IndirectCache,
    /// 二级索引块之下的表
    pub l2: IndirectCache,
}

impl BlockMap {
    pub fn new(block_size: usize) -> Self {
        let ptrs = block_size / 4;
        Self {
            ptrs,
            l1: IndirectCache::new(ptrs),
            l2: IndirectCache::new(ptrs),
        }
    }

    #[inline]
    pub fn locate(&self, index: u32) -> Result<BlockPtr> {
        BlockPtr::locate(index, self.ptrs)
    }

    /// 逻辑块`index`对应的物理块号，空洞为 0
    pub fn lookup(&mut self, fs: &Ext2FileSystem, inode: &DiskInode, index: u32) -> Result<u32> {
        Ok(match self.locate(index)? {
            BlockPtr::Direct(i) => inode.block[i],
            BlockPtr::SingleIndirect(slot) => {
                let ind = inode.block[IND_BLOCK];
                if ind == 0 {
                    return Ok(0);
                }
                self.l1.load(fs, ind)?;
                self.l1.get(slot)
            }
            BlockPtr::DoubleIndirect(table, slot) => {
                let dind = inode.block[DIND_BLOCK];
                if dind == 0 {
                    return Ok(0);
                }
                self.l1.load(fs, dind)?;
                let ind = self.l1.get(table);
                if ind == 0 {
                    return Ok(0);
                }
                self.l2.load(fs, ind)?;
                self.l2.get(slot)
            }
        })
    }

    pub fn flush(&mut self, fs: &Ext2FileSystem) -> Result<()> {
        self.l2.flush(fs)?;
        self.l1.flush(fs)
    }
}
