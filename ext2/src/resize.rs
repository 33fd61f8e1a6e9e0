//! # 尺寸层
//!
//! 按目标大小为 inode 增减数据块与索引块。
//! 修改只发生在调用者给出的`DiskInode`上，结束时写回一次。

use vfs::Error;

use crate::bmap::{BlockMap, BlockPtr, IndirectCache};
use crate::block::new_block;
use crate::fs::{Ext2FileSystem, Unit};
use crate::layout::DiskInode;
use crate::{DIND_BLOCK, IND_BLOCK, Result};

impl Ext2FileSystem {
    /// 每个块折合的 512 字节扇区数
    #[inline]
    pub(crate) fn sectors_per_block(&self) -> u32 {
        (self.block_size() / 512) as u32
    }

    /// 不经三级索引、且`size`字段放得下的最大文件大小
    pub fn max_file_size(&self) -> u64 {
        let ptrs = self.block_size() / 4;
        let bytes = BlockPtr::capacity(ptrs) as u64 * self.block_size() as u64;
        bytes.min(u32::MAX as u64)
    }

    #[inline]
    fn blocks_for(&self, size: u64) -> u32 {
        size.div_ceil(self.block_size() as u64) as u32
    }

    /// 分配一个全零的块
    fn alloc_zeroed(&mut self, preferred: u32) -> Result<u32> {
        let id = self.alloc(Unit::Block, preferred)?;
        self.zero_block(id)?;
        Ok(id)
    }

    /// 把 inode 扩展到`new_size`字节
    ///
    /// 先按所需数据块与索引块之和检查空闲块数，不够则不做任何改动。
    /// 新块都清零，优先从 inode 所在的块组分配。
    /// 中途分配失败时，已挂上的块连同覆盖它们的大小一并写回。
    pub(crate) fn grow(&mut self, ino: u32, inode: &mut DiskInode, new_size: u64) -> Result<()> {
        if new_size > self.max_file_size() {
            return Err(Error::FileTooLarge);
        }
        let cur = self.blocks_for(inode.size as u64);
        let target = self.blocks_for(new_size);

        if target > cur {
            let ptrs = self.block_size() / 4;
            let needed = (target - cur) as usize + BlockPtr::meta_blocks(target as usize, ptrs)
                - BlockPtr::meta_blocks(cur as usize, ptrs);
            if needed > self.super_block().free_blocks_count as usize {
                log::debug!(
                    "inode {ino}: growing to {new_size} needs {needed} blocks, {} free",
                    self.super_block().free_blocks_count
                );
                return Err(Error::NoSpace);
            }

            let preferred = self.inode_group(ino);
            let mut map = BlockMap::new(self.block_size());
            let mut added = 0;
            let mut failed = None;
            for index in cur..target {
                let before = added;
                if let Err(err) = self.attach(&mut map, inode, index, preferred, &mut added) {
                    // 只挂上了索引块时，这个逻辑块也要算进大小，收缩时才能找到它
                    let covered = index + (added > before) as u32;
                    failed = Some((covered, err));
                    break;
                }
            }
            map.flush(self)?;
            inode.blocks += added * self.sectors_per_block();

            if let Some((covered, err)) = failed {
                let reached = (covered as u64 * self.block_size() as u64).min(new_size);
                inode.size = inode.size.max(reached as u32);
                self.write_inode(ino, inode)?;
                log::warn!("inode {ino}: growth stopped at {} bytes: {err}", inode.size);
                return Err(err);
            }
        }

        inode.size = new_size as u32;
        self.write_inode(ino, inode)
    }

    /// 为空洞处的逻辑块`index`分配数据块，返回其块号
    ///
    /// 成功时只更新内存中的 inode，由调用者写回。
    pub(crate) fn fill_hole(&mut self, ino: u32, inode: &mut DiskInode, index: u32) -> Result<u32> {
        let preferred = self.inode_group(ino);
        let mut map = BlockMap::new(self.block_size());
        if self.super_block().free_blocks_count < self.missing_blocks(&mut map, inode, index)? {
            return Err(Error::NoSpace);
        }

        let mut added = 0;
        let attached = self.attach(&mut map, inode, index, preferred, &mut added);
        map.flush(self)?;
        inode.blocks += added * self.sectors_per_block();
        let id = match attached {
            Ok(id) => id,
            Err(err) => {
                self.write_inode(ino, inode)?;
                return Err(err);
            }
        };
        log::trace!("inode {ino}: filled hole at block {index} with {id}");

        Ok(id)
    }

    /// 挂上逻辑块`index`还缺的块数，含数据块本身
    fn missing_blocks(&self, map: &mut BlockMap, inode: &DiskInode, index: u32) -> Result<u32> {
        Ok(match map.locate(index)? {
            BlockPtr::Direct(_) => 1,
            BlockPtr::SingleIndirect(_) => 1 + (inode.block[IND_BLOCK] == 0) as u32,
            BlockPtr::DoubleIndirect(table, _) => {
                let dind = inode.block[DIND_BLOCK];
                if dind == 0 {
                    3
                } else {
                    map.l1.load(self, dind)?;
                    1 + (map.l1.get(table) == 0) as u32
                }
            }
        })
    }

    /// 给逻辑块`index`分配数据块，沿途缺的索引块一并分配
    ///
    /// 返回数据块号；每分配一块`added`加一，出错时也已计入之前挂上的索引块。
    fn attach(
        &mut self,
        map: &mut BlockMap,
        inode: &mut DiskInode,
        index: u32,
        preferred: u32,
        added: &mut u32,
    ) -> Result<u32> {
        match map.locate(index)? {
            BlockPtr::Direct(i) => {
                let id = self.alloc_zeroed(preferred)?;
                inode.block[i] = id;
                *added += 1;
                Ok(id)
            }
            BlockPtr::SingleIndirect(slot) => {
                *added += self.open_table(&mut map.l1, &mut inode.block[IND_BLOCK], preferred)?;
                let id = self.alloc_zeroed(preferred)?;
                map.l1.set(slot, id);
                *added += 1;
                Ok(id)
            }
            BlockPtr::DoubleIndirect(table, slot) => {
                *added += self.open_table(&mut map.l1, &mut inode.block[DIND_BLOCK], preferred)?;
                let mut ind = map.l1.get(table);
                if ind == 0 {
                    ind = self.alloc(Unit::Block, preferred)?;
                    map.l1.set(table, ind);
                    *added += 1;
                    map.l2.adopt(self, ind)?;
                } else {
                    map.l2.load(self, ind)?;
                }
                let id = self.alloc_zeroed(preferred)?;
                map.l2.set(slot, id);
                *added += 1;
                Ok(id)
            }
        }
    }

    /// 把`ptr`指向的表换入缓存，指针为 0 时先分配一张新表，返回新分配的块数
    fn open_table(
        &mut self,
        cache: &mut IndirectCache,
        ptr: &mut u32,
        preferred: u32,
    ) -> Result<u32> {
        if *ptr != 0 {
            cache.load(self, *ptr)?;
            return Ok(0);
        }
        let id = self.alloc(Unit::Block, preferred)?;
        cache.adopt(self, id)?;
        *ptr = id;
        Ok(1)
    }

    /// 把 inode 收缩到`new_size`字节
    ///
    /// 从最高的逻辑块往下释放，某张表的第 0 项被释放时表本身也随之释放；
    /// 最后一个块中新末尾之后的字节清零，以便再次扩展时读出 0。
    pub(crate) fn shrink(&mut self, ino: u32, inode: &mut DiskInode, new_size: u64) -> Result<()> {
        let cur = self.blocks_for(inode.size as u64);
        let target = self.blocks_for(new_size);
        let mut map = BlockMap::new(self.block_size());
        let mut freed = 0;

        for index in (target..cur).rev() {
            match map.locate(index)? {
                BlockPtr::Direct(i) => {
                    freed += self.release_ptr(&mut inode.block[i])?;
                }
                BlockPtr::SingleIndirect(slot) => {
                    let ind = inode.block[IND_BLOCK];
                    if ind == 0 {
                        continue;
                    }
                    map.l1.load(self, ind)?;
                    freed += self.release_slot(&mut map.l1, slot)?;
                    if slot == 0 {
                        map.l1.forget(ind);
                        freed += self.release_ptr(&mut inode.block[IND_BLOCK])?;
                    }
                }
                BlockPtr::DoubleIndirect(table, slot) => {
                    let dind = inode.block[DIND_BLOCK];
                    if dind == 0 {
                        continue;
                    }
                    map.l1.load(self, dind)?;
                    let ind = map.l1.get(table);
                    if ind != 0 {
                        map.l2.load(self, ind)?;
                        freed += self.release_slot(&mut map.l2, slot)?;
                        if slot == 0 {
                            map.l2.forget(ind);
                            freed += self.release_slot(&mut map.l1, table)?;
                        }
                    }
                    if table == 0 && slot == 0 {
                        map.l1.forget(dind);
                        freed += self.release_ptr(&mut inode.block[DIND_BLOCK])?;
                    }
                }
            }
        }
        map.flush(self)?;
        inode.blocks = inode
            .blocks
            .saturating_sub(freed * self.sectors_per_block());

        let tail = (new_size % self.block_size() as u64) as usize;
        if tail != 0 && new_size < inode.size as u64 {
            let last = map.lookup(self, inode, target - 1)?;
            if last != 0 {
                let mut buf = new_block(self.block_size());
                self.read_block(last, &mut buf)?;
                buf[tail..].fill(0);
                self.write_block(last, &buf)?;
            }
        }

        inode.size = new_size as u32;
        self.write_inode(ino, inode)
    }

    /// 释放`ptr`指向的块并清零指针，返回释放的块数
    fn release_ptr(&mut self, ptr: &mut u32) -> Result<u32> {
        if *ptr == 0 {
            return Ok(0);
        }
        self.dealloc(Unit::Block, *ptr)?;
        *ptr = 0;
        Ok(1)
    }

    fn release_slot(&mut self, cache: &mut IndirectCache, slot: usize) -> Result<u32> {
        let id = cache.get(slot);
        if id == 0 {
            return Ok(0);
        }
        self.dealloc(Unit::Block, id)?;
        cache.set(slot, 0);
        Ok(1)
    }
}
