//! # 目录层
//!
//! 目录的数据块中紧密排列着变长的目录项，每项 4 字节对齐。
//! 块内所有`rec_len`之和恰为块大小，空闲空间总是挂在某一项的尾部。
//!
//! 块级的编解码都是纯函数，只操作调用者给出的块缓冲；
//! 跨块的查找、追加与删除由 [`Ext2FileSystem`] 上的方法完成。

use alloc::string::String;
use alloc::vec::Vec;

use vfs::Error;

use crate::bmap::BlockMap;
use crate::block::new_block;
use crate::fs::Ext2FileSystem;
use crate::layout::{DirEntryHead, DiskInode, InodeKind};
use crate::Result;

/// 块内的一个目录项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntry<'a> {
    /// 在块内的偏移
    pub offset: usize,
    pub head: DirEntryHead,
    pub name: &'a [u8],
}

impl RawEntry<'_> {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.head.inode != 0
    }

    /// 尾部可分裂出去的空闲字节数
    #[inline]
    pub fn slack(&self) -> usize {
        self.head.rec_len as usize - self.head.used_len()
    }
}

/// 沿`rec_len`链遍历一个块，遇到不合法的项时报告损坏并停止
pub struct Entries<'a> {
    block: &'a [u8],
    at: usize,
}

#[inline]
pub fn entries(block: &[u8]) -> Entries<'_> {
    Entries { block, at: 0 }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<RawEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.block.len();
        if self.at >= len {
            return None;
        }

        let offset = self.at;
        let valid_head = offset + DirEntryHead::SIZE <= len;
        let head = valid_head.then(|| DirEntryHead::decode(&self.block[offset..]));
        let Some(head) = head.filter(|head| {
            let rec_len = head.rec_len as usize;
            rec_len >= DirEntryHead::SIZE
                && rec_len % 4 == 0
                && offset + rec_len <= len
                && DirEntryHead::SIZE + head.name_len as usize <= rec_len
        }) else {
            log::error!("malformed directory entry at offset {offset}");
            self.at = len;
            return Some(Err(Error::Corrupted));
        };

        self.at += head.rec_len as usize;
        let name_start = offset + DirEntryHead::SIZE;
        Some(Ok(RawEntry {
            offset,
            head,
            name: &self.block[name_start..name_start + head.name_len as usize],
        }))
    }
}

/// 在块内查找名为`name`的有效项，返回其 inode 编号
pub fn find(block: &[u8], name: &[u8]) -> Result<Option<u32>> {
    for entry in entries(block) {
        let entry = entry?;
        if entry.is_live() && entry.name == name {
            return Ok(Some(entry.head.inode));
        }
    }
    Ok(None)
}

fn put_entry(block: &mut [u8], offset: usize, head: DirEntryHead, name: &[u8]) {
    head.encode(&mut block[offset..]);
    let name_start = offset + DirEntryHead::SIZE;
    block[name_start..name_start + name.len()].copy_from_slice(name);
}

/// 在块内放入新项，放不下时返回`false`
///
/// 优先复用足够大的未使用项；否则从某个有效项的尾部空闲中分裂出新项，
/// 新项占据该空闲直到下一项的起点。
pub fn insert(block: &mut [u8], name: &[u8], inode: u32, file_type: u8) -> Result<bool> {
    let need = DirEntryHead::min_len(name.len());

    let mut slot = None;
    for entry in entries(block) {
        let entry = entry?;
        if !entry.is_live() && entry.head.rec_len as usize >= need {
            slot = Some((entry.offset, entry.head.rec_len, None));
            break;
        }
        if entry.is_live() && entry.slack() >= need {
            let used = entry.head.used_len();
            slot = Some((
                entry.offset + used,
                entry.head.rec_len - used as u16,
                Some((entry.offset, entry.head)),
            ));
            break;
        }
    }
    let Some((offset, rec_len, split)) = slot else {
        return Ok(false);
    };

    if let Some((prev_offset, mut prev)) = split {
        prev.rec_len = prev.used_len() as u16;
        prev.encode(&mut block[prev_offset..]);
    }
    let head = DirEntryHead {
        inode,
        rec_len,
        name_len: name.len() as u8,
        file_type,
    };
    put_entry(block, offset, head, name);

    Ok(true)
}

/// 从块内删除名为`name`的项，返回其 inode 编号
///
/// 被删项的空间并入紧邻的前一项；
/// 若它是块内第一项，则只把 inode 置 0，留作可复用的空位。
pub fn remove(block: &mut [u8], name: &[u8]) -> Result<Option<u32>> {
    let mut prev: Option<(usize, DirEntryHead)> = None;
    let mut found = None;
    for entry in entries(block) {
        let entry = entry?;
        if entry.is_live() && entry.name == name {
            found = Some((entry.offset, entry.head));
            break;
        }
        prev = Some((entry.offset, entry.head));
    }
    let Some((offset, mut head)) = found else {
        return Ok(None);
    };

    let inode = head.inode;
    match prev {
        Some((prev_offset, mut prev)) => {
            prev.rec_len += head.rec_len;
            prev.encode(&mut block[prev_offset..]);
        }
        None => {
            head.inode = 0;
            head.encode(&mut block[offset..]);
        }
    }

    Ok(Some(inode))
}

/// 以一个占满整块的项初始化新的目录块
pub fn init_block(block: &mut [u8], name: &[u8], inode: u32, file_type: u8) {
    block.fill(0);
    let head = DirEntryHead {
        inode,
        rec_len: block.len() as u16,
        name_len: name.len() as u8,
        file_type,
    };
    put_entry(block, 0, head, name);
}

/// 新目录的第一个块：`.`指向自身，`..`指向父目录并占据其余空间
pub fn init_dot_block(block: &mut [u8], inode: u32, parent: u32, file_type: u8) {
    block.fill(0);
    let dot_len = DirEntryHead::min_len(1);
    let dot = DirEntryHead {
        inode,
        rec_len: dot_len as u16,
        name_len: 1,
        file_type,
    };
    put_entry(block, 0, dot, b".");
    let dotdot = DirEntryHead {
        inode: parent,
        rec_len: (block.len() - dot_len) as u16,
        name_len: 2,
        file_type,
    };
    put_entry(block, dot_len, dotdot, b"..");
}

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub inode: u32,
    pub file_type: u8,
    pub name: String,
}

impl Ext2FileSystem {
    /// 目录项中记录的文件类型，未启用 FILETYPE 特性时为 0
    #[inline]
    pub(crate) fn file_type_of(&self, kind: InodeKind) -> u8 {
        if self.has_filetype() { kind.file_type() } else { 0 }
    }

    /// 依次访问目录的每个数据块，`visit`返回`Some`时提前结束
    fn scan_dir<T>(
        &self,
        dir: &DiskInode,
        mut visit: impl FnMut(u32, &mut [u8]) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let blocks = (dir.size as u64).div_ceil(self.block_size() as u64) as u32;
        let mut map = BlockMap::new(self.block_size());
        let mut buf = new_block(self.block_size());

        for index in 0..blocks {
            let block_id = map.lookup(self, dir, index)?;
            if block_id == 0 {
                log::error!("hole at block {index} of a directory");
                return Err(Error::Corrupted);
            }
            self.read_block(block_id, &mut buf)?;
            if let Some(found) = visit(block_id, &mut buf[..])? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    pub(crate) fn dir_lookup(&self, dir: &DiskInode, name: &str) -> Result<Option<u32>> {
        self.scan_dir(dir, |_, block| find(block, name.as_bytes()))
    }

    /// 在目录中追加一项
    ///
    /// 整个目录中已有同名项时报告已存在；所有块都放不下时目录增长一个块。
    pub(crate) fn dir_append(
        &mut self,
        ino: u32,
        dir: &mut DiskInode,
        name: &str,
        child: u32,
        kind: InodeKind,
    ) -> Result<()> {
        if self.dir_lookup(dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let file_type = self.file_type_of(kind);

        let placed = self.scan_dir(dir, |block_id, block| {
            if insert(block, name.as_bytes(), child, file_type)? {
                self.write_block(block_id, block)?;
                Ok(Some(()))
            } else {
                Ok(None)
            }
        })?;
        if placed.is_some() {
            return Ok(());
        }

        let index = (dir.size as u64).div_ceil(self.block_size() as u64) as u32;
        let new_size = (index as u64 + 1) * self.block_size() as u64;
        self.grow(ino, dir, new_size)?;
        let block_id = BlockMap::new(self.block_size()).lookup(self, dir, index)?;
        let mut buf = new_block(self.block_size());
        init_block(&mut buf, name.as_bytes(), child, file_type);
        log::debug!("directory {ino} grew to {new_size} bytes");

        self.write_block(block_id, &buf)
    }

    /// 从目录中删除一项，返回它指向的 inode
    pub(crate) fn dir_remove(&self, dir: &DiskInode, name: &str) -> Result<u32> {
        self.scan_dir(dir, |block_id, block| {
            let removed = remove(block, name.as_bytes())?;
            if removed.is_some() {
                self.write_block(block_id, block)?;
            }
            Ok(removed)
        })?
        .ok_or(Error::NotFound)
    }

    pub(crate) fn dir_list(&self, dir: &DiskInode) -> Result<Vec<Listed>> {
        let mut listed = Vec::new();
        self.scan_dir(dir, |_, block| {
            for entry in entries(block) {
                let entry = entry?;
                if entry.is_live() {
                    listed.push(Listed {
                        inode: entry.head.inode,
                        file_type: entry.head.file_type,
                        name: String::from_utf8_lossy(entry.name).into_owned(),
                    });
                }
            }
            Ok(None::<()>)
        })?;
        Ok(listed)
    }

    /// 除`.`与`..`外没有其它有效项
    pub(crate) fn dir_is_empty(&self, dir: &DiskInode) -> Result<bool> {
        let other = self.scan_dir(dir, |_, block| {
            for entry in entries(block) {
                let entry = entry?;
                if entry.is_live() && entry.name != b"." && entry.name != b".." {
                    return Ok(Some(()));
                }
            }
            Ok(None)
        })?;
        Ok(other.is_none())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn live_names(block: &[u8]) -> Vec<Vec<u8>> {
        entries(block)
            .filter_map(|e| e.ok())
            .filter(|e| e.is_live())
            .map(|e| e.name.to_vec())
            .collect()
    }

    #[test]
    fn dot_block_layout() {
        let mut block = [0u8; 1024];
        init_dot_block(&mut block, 12, 2, 2);

        let all: Vec<_> = entries(&block).map(|e| e.unwrap()).collect();
        assert_eq!(2, all.len());
        assert_eq!((12, 12, &b"."[..]), (all[0].head.inode, all[0].head.rec_len, all[0].name));
        assert_eq!((2, 1012, &b".."[..]), (all[1].head.inode, all[1].head.rec_len, all[1].name));
        assert_eq!(Ok(Some(2)), find(&block, b".."));
    }

    #[test]
    fn split_slack_of_last_entry() {
        let mut block = [0u8; 1024];
        init_dot_block(&mut block, 12, 2, 2);

        assert_eq!(Ok(true), insert(&mut block, b"hello", 13, 1));
        let all: Vec<_> = entries(&block).map(|e| e.unwrap()).collect();
        // `..`缩到最小，新项占据剩余
        assert_eq!(12, all[1].head.rec_len);
        assert_eq!(24, all[2].offset);
        assert_eq!(1000, all[2].head.rec_len);
        assert_eq!(Ok(Some(13)), find(&block, b"hello"));
    }

    #[test]
    fn remove_merges_backward() {
        let mut block = [0u8; 1024];
        init_dot_block(&mut block, 12, 2, 2);
        insert(&mut block, b"a", 13, 1).unwrap();
        insert(&mut block, b"b", 14, 1).unwrap();

        assert_eq!(Ok(Some(13)), remove(&mut block, b"a"));
        assert_eq!(Ok(None), remove(&mut block, b"a"));
        assert_eq!(vec![b".".to_vec(), b"..".to_vec(), b"b".to_vec()], live_names(&block));

        let total: usize = entries(&block).map(|e| e.unwrap().head.rec_len as usize).sum();
        assert_eq!(1024, total);
    }

    #[test]
    fn first_entry_becomes_reusable() {
        let mut block = [0u8; 1024];
        init_block(&mut block, b"first", 20, 1);
        assert_eq!(Ok(true), insert(&mut block, b"second", 21, 1));

        assert_eq!(Ok(Some(20)), remove(&mut block, b"first"));
        let head = entries(&block).next().unwrap().unwrap().head;
        assert_eq!((0, 16), (head.inode, head.rec_len));

        // 名称够短时原地复用
        assert_eq!(Ok(true), insert(&mut block, b"x", 22, 1));
        let head = entries(&block).next().unwrap().unwrap().head;
        assert_eq!((22, 16), (head.inode, head.rec_len));
    }

    #[test]
    fn full_block_refuses() {
        let mut block = [0u8; 1024];
        init_block(&mut block, &[b'n'; 255], 11, 1);
        for i in 0..2 {
            let name = [b'a' + i; 255];
            assert_eq!(Ok(true), insert(&mut block, &name, 12 + i as u32, 1));
        }
        // 3 * 264 = 792，剩余 232 放不下 264
        assert_eq!(Ok(false), insert(&mut block, &[b'z'; 255], 99, 1));
        assert_eq!(Ok(true), insert(&mut block, &[b'y'; 200], 99, 1));
    }

    #[test]
    fn malformed_rec_len() {
        let mut block = [0u8; 1024];
        init_dot_block(&mut block, 12, 2, 2);
        // `..`的 rec_len 改为不对齐的值
        block[16] = 13;
        block[17] = 0;
        assert_eq!(Err(Error::Corrupted), find(&block, b"missing"));
        assert_eq!(Err(Error::Corrupted), insert(&mut block, b"x", 1, 1));
    }
}
