//! # 索引节点层
//!
//! 以 inode 编号为句柄的各项文件操作，由下面几层组合而成。
//! [`Ext2`] 用一把自旋锁串行化同一个卷上的所有操作，读写也不例外。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::{Mutex, MutexGuard};
use vfs::{Credentials, DirEntry, DirEntryType, Error, FileSystem, Stat};

use crate::bmap::BlockMap;
use crate::block::new_block;
use crate::config::{FormatOptions, MountOptions};
use crate::dir::init_dot_block;
use crate::fs::{Ext2FileSystem, Unit};
use crate::layout::{DiskInode, InodeKind};
use crate::{NAME_MAX_LEN, ROOT_INO, Result, mkfs};

/// 新建项的名称不能为空，不能含`/`或 NUL
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(Error::InvalidArgument);
    }
    if name.len() > NAME_MAX_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

impl Ext2FileSystem {
    /// 读出仍在使用的 inode
    fn load(&self, ino: u32) -> Result<DiskInode> {
        let inode = self.read_inode(ino)?;
        if inode.links_count == 0 || inode.mode == 0 {
            return Err(Error::NotFound);
        }
        Ok(inode)
    }

    fn load_dir(&self, ino: u32) -> Result<DiskInode> {
        let inode = self.load(ino)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(inode)
    }

    /// 普通文件才有可读写的数据
    fn load_file(&self, ino: u32) -> Result<DiskInode> {
        let inode = self.load(ino)?;
        match inode.kind() {
            Some(InodeKind::Regular) => Ok(inode),
            Some(InodeKind::Directory) => Err(Error::IsADirectory),
            _ => Err(Error::Unsupported),
        }
    }

    pub fn lookup(&self, parent: u32, name: &str) -> Result<u32> {
        if name.len() > NAME_MAX_LEN {
            return Err(Error::NameTooLong);
        }
        let dir = self.load_dir(parent)?;
        self.dir_lookup(&dir, name)?.ok_or(Error::NotFound)
    }

    /// 在目录`parent`下创建类型为`kind`的新 inode 并链入目录
    pub fn create_node(
        &mut self,
        parent: u32,
        name: &str,
        kind: InodeKind,
        perm: u16,
        rdev: u32,
        cred: Credentials,
    ) -> Result<u32> {
        self.check_writable()?;
        check_name(name)?;
        let mut dir = self.load_dir(parent)?;
        if self.dir_lookup(&dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let unit = if kind == InodeKind::Directory {
            Unit::DirInode
        } else {
            Unit::Inode
        };
        let ino = self.alloc(unit, self.inode_group(parent))?;
        let now = self.now();

        let linked = self
            .init_node(ino, parent, kind, perm, rdev, cred, now)
            .and_then(|()| self.dir_append(parent, &mut dir, name, ino, kind));
        if let Err(err) = linked {
            log::debug!("create {name:?} in {parent} failed: {err}, releasing inode {ino}");
            if let Err(undo) = self.discard(ino, unit) {
                log::error!("failed to release inode {ino}: {undo}");
            }
            return Err(err);
        }

        if kind == InodeKind::Directory {
            dir.links_count += 1;
        }
        dir.mtime = now;
        dir.ctime = now;
        self.write_inode(parent, &dir)?;
        log::debug!("created {kind:?} {name:?} as inode {ino} in {parent}");

        Ok(ino)
    }

    /// 初始化刚分配的 inode，目录还要写好`.`与`..`
    #[allow(clippy::too_many_arguments)]
    fn init_node(
        &mut self,
        ino: u32,
        parent: u32,
        kind: InodeKind,
        perm: u16,
        rdev: u32,
        cred: Credentials,
        now: u32,
    ) -> Result<()> {
        let mut inode = self.read_inode(ino)?;
        inode.init(kind, perm, cred, now);
        if matches!(kind, InodeKind::Char | InodeKind::Block) {
            inode.set_rdev(rdev);
        }
        self.write_inode(ino, &inode)?;

        if kind == InodeKind::Directory {
            let block_size = self.block_size();
            self.grow(ino, &mut inode, block_size as u64)?;
            let block_id = BlockMap::new(block_size).lookup(self, &inode, 0)?;
            let mut buf = new_block(block_size);
            init_dot_block(&mut buf, ino, parent, self.file_type_of(InodeKind::Directory));
            self.write_block(block_id, &buf)?;

            inode.links_count = 2;
            self.write_inode(ino, &inode)?;
        }

        Ok(())
    }

    /// 回收刚分配却未能链入目录的 inode
    fn discard(&mut self, ino: u32, unit: Unit) -> Result<()> {
        let mut inode = self.read_inode(ino)?;
        self.release(ino, &mut inode, unit)
    }

    /// 释放 inode 的全部数据块，记下删除时间，归还 inode
    fn release(&mut self, ino: u32, inode: &mut DiskInode, unit: Unit) -> Result<()> {
        if inode.has_data_blocks() {
            self.shrink(ino, inode, 0)?;
        }
        inode.links_count = 0;
        inode.dtime = self.now();
        self.write_inode(ino, inode)?;
        self.dealloc(unit, ino)
    }

    pub fn unlink(&mut self, parent: u32, name: &str) -> Result<()> {
        self.check_writable()?;
        let mut dir = self.load_dir(parent)?;
        let ino = self.dir_lookup(&dir, name)?.ok_or(Error::NotFound)?;
        let mut inode = self.load(ino)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }

        self.dir_remove(&dir, name)?;
        let now = self.now();
        dir.mtime = now;
        dir.ctime = now;
        self.write_inode(parent, &dir)?;

        inode.links_count -= 1;
        inode.ctime = now;
        if inode.links_count == 0 {
            log::debug!("inode {ino} has no links left, releasing");
            self.release(ino, &mut inode, Unit::Inode)
        } else {
            self.write_inode(ino, &inode)
        }
    }

    /// 删除空目录
    pub fn rmdir(&mut self, parent: u32, name: &str) -> Result<()> {
        self.check_writable()?;
        if name == "." || name == ".." {
            return Err(Error::InvalidArgument);
        }
        let mut dir = self.load_dir(parent)?;
        let ino = self.dir_lookup(&dir, name)?.ok_or(Error::NotFound)?;
        let mut inode = self.load(ino)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        if !self.dir_is_empty(&inode)? {
            return Err(Error::DirectoryNotEmpty);
        }

        self.dir_remove(&dir, name)?;
        let now = self.now();
        // 子目录的`..`不再指向父目录
        dir.links_count = dir.links_count.saturating_sub(1);
        dir.mtime = now;
        dir.ctime = now;
        self.write_inode(parent, &dir)?;

        log::debug!("removed directory {name:?} (inode {ino}) from {parent}");
        self.release(ino, &mut inode, Unit::DirInode)
    }

    /// 读取`[offset, size)`内的数据，空洞读出 0
    pub fn read_at(&self, ino: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.load_file(ino)?;
        let size = inode.size as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }

        let block_size = self.block_size() as u64;
        let end = (offset + buf.len() as u64).min(size);
        let mut map = BlockMap::new(self.block_size());
        let mut block = new_block(self.block_size());

        let mut pos = offset;
        while pos < end {
            let index = (pos / block_size) as u32;
            let in_block = (pos % block_size) as usize;
            let n = (block_size - in_block as u64).min(end - pos) as usize;
            let dst = &mut buf[(pos - offset) as usize..][..n];

            match map.lookup(self, &inode, index)? {
                0 => dst.fill(0),
                id => {
                    self.read_block(id, &mut block)?;
                    dst.copy_from_slice(&block[in_block..in_block + n]);
                }
            }
            pos += n as u64;
        }

        Ok((end - offset) as usize)
    }

    /// 写入数据，越过文件末尾时先扩展文件
    pub fn write_at(&mut self, ino: u32, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let mut inode = self.load_file(ino)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= self.max_file_size())
            .ok_or(Error::FileTooLarge)?;
        if end > inode.size as u64 {
            self.grow(ino, &mut inode, end)?;
        }

        let block_size = self.block_size() as u64;
        let mut map = BlockMap::new(self.block_size());
        let mut block = new_block(self.block_size());

        let mut pos = offset;
        while pos < end {
            let index = (pos / block_size) as u32;
            let in_block = (pos % block_size) as usize;
            let n = (block_size - in_block as u64).min(end - pos) as usize;
            let src = &buf[(pos - offset) as usize..][..n];

            let mut id = map.lookup(self, &inode, index)?;
            if id == 0 {
                id = self.fill_hole(ino, &mut inode, index)?;
                // 索引表可能已被改写
                map = BlockMap::new(self.block_size());
            }
            if n == self.block_size() {
                self.write_block(id, src)?;
            } else {
                self.read_block(id, &mut block)?;
                block[in_block..in_block + n].copy_from_slice(src);
                self.write_block(id, &block)?;
            }
            pos += n as u64;
        }

        let now = self.now();
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode(ino, &inode)?;

        Ok(buf.len())
    }

    /// 截断到`size`字节，比当前大时以 0 扩展
    pub fn truncate(&mut self, ino: u32, size: u64) -> Result<()> {
        self.check_writable()?;
        let mut inode = match self.load_file(ino) {
            Err(Error::Unsupported) => return Err(Error::InvalidArgument),
            inode => inode?,
        };
        if size > self.max_file_size() {
            return Err(Error::FileTooLarge);
        }

        let cur = inode.size as u64;
        if size < cur {
            self.shrink(ino, &mut inode, size)?;
        } else if size > cur {
            self.grow(ino, &mut inode, size)?;
        }

        let now = self.now();
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode(ino, &inode)
    }

    pub fn stat(&self, ino: u32) -> Result<Stat> {
        let inode = self.load(ino)?;
        let Some(kind) = inode.kind() else {
            log::error!("inode {ino} has unknown mode {:#o}", inode.mode);
            return Err(Error::Corrupted);
        };

        Ok(Stat {
            inode: ino as u64,
            kind: kind.into(),
            mode: inode.mode,
            links: inode.links_count as u32,
            uid: inode.uid(),
            gid: inode.gid(),
            size: inode.size as u64,
            block_size: self.block_size() as u64,
            blocks: inode.blocks as u64,
            rdev: match kind {
                InodeKind::Char | InodeKind::Block => inode.rdev(),
                _ => 0,
            },
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }

    /// 读-改-写 inode 并更新`ctime`
    fn modify(&mut self, ino: u32, f: impl FnOnce(&mut DiskInode)) -> Result<()> {
        self.check_writable()?;
        let mut inode = self.load(ino)?;
        f(&mut inode);
        inode.ctime = self.now();
        self.write_inode(ino, &inode)
    }

    pub fn chmod(&mut self, ino: u32, mode: u16) -> Result<()> {
        self.modify(ino, |inode| {
            inode.mode = (inode.mode & InodeKind::MASK) | (mode & !InodeKind::MASK);
        })
    }

    pub fn chown(&mut self, ino: u32, uid: u32, gid: u32) -> Result<()> {
        self.modify(ino, |inode| inode.set_owner(uid, gid))
    }

    pub fn set_times(&mut self, ino: u32, atime: u32, mtime: u32) -> Result<()> {
        self.modify(ino, |inode| {
            inode.atime = atime;
            inode.mtime = mtime;
        })
    }

    /// 读取第`at`项之后的目录项，最多为`count`个
    pub fn read_dir(&self, ino: u32, at: usize, count: usize) -> Result<Vec<DirEntry>> {
        let dir = self.load_dir(ino)?;
        self.dir_list(&dir)?
            .into_iter()
            .skip(at)
            .take(count)
            .map(|listed| {
                // 没有文件类型时只能读 inode
                let kind = match InodeKind::from_file_type(listed.file_type) {
                    Some(kind) => kind,
                    None => self.load(listed.inode)?.kind().ok_or(Error::Corrupted)?,
                };
                Ok(DirEntry {
                    inode: listed.inode as u64,
                    ty: kind.into(),
                    name: listed.name,
                })
            })
            .collect()
    }
}

/// 已挂载的 ext2 卷
pub struct Ext2 {
    inner: Mutex<Ext2FileSystem>,
}

impl Ext2 {
    pub fn mount(block_device: Arc<dyn BlockDevice>, opts: MountOptions) -> Result<Arc<Self>> {
        let fs = Ext2FileSystem::open(block_device, opts)?;
        Ok(Arc::new(Self {
            inner: Mutex::new(fs),
        }))
    }

    /// 在设备上构建一个全新的空卷
    pub fn format(block_device: &dyn BlockDevice, opts: &FormatOptions) -> Result<()> {
        mkfs::format(block_device, opts)
    }

    /// 标记卷为干净卸载，之后仍可继续使用
    pub fn unmount(&self) -> Result<()> {
        self.inner.lock().close()
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Ext2FileSystem> {
        self.inner.lock()
    }
}

/// VFS 的 inode 编号是 64 位的
#[inline]
fn ino(inode: u64) -> Result<u32> {
    u32::try_from(inode).map_err(|_| Error::InvalidArgument)
}

impl FileSystem for Ext2 {
    fn root(&self) -> u64 {
        ROOT_INO as u64
    }

    fn lookup(&self, parent: u64, name: &str) -> Result<u64> {
        self.lock().lookup(ino(parent)?, name).map(u64::from)
    }

    fn create(&self, parent: u64, name: &str, mode: u16, cred: Credentials) -> Result<u64> {
        self.lock()
            .create_node(ino(parent)?, name, InodeKind::Regular, mode, 0, cred)
            .map(u64::from)
    }

    fn mkdir(&self, parent: u64, name: &str, mode: u16, cred: Credentials) -> Result<u64> {
        self.lock()
            .create_node(ino(parent)?, name, InodeKind::Directory, mode, 0, cred)
            .map(u64::from)
    }

    fn mknod(
        &self,
        parent: u64,
        name: &str,
        kind: DirEntryType,
        mode: u16,
        rdev: u32,
        cred: Credentials,
    ) -> Result<u64> {
        match kind {
            DirEntryType::Directory => return Err(Error::InvalidArgument),
            DirEntryType::SymLink => return Err(Error::Unsupported),
            _ => {}
        }
        self.lock()
            .create_node(ino(parent)?, name, kind.into(), mode, rdev, cred)
            .map(u64::from)
    }

    fn unlink(&self, parent: u64, name: &str) -> Result<()> {
        self.lock().unlink(ino(parent)?, name)
    }

    fn rmdir(&self, parent: u64, name: &str) -> Result<()> {
        self.lock().rmdir(ino(parent)?, name)
    }

    fn read_at(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.lock().read_at(ino(inode)?, offset, buf)
    }

    fn write_at(&self, inode: u64, offset: u64, buf: &[u8]) -> Result<usize> {
        self.lock().write_at(ino(inode)?, offset, buf)
    }

    fn truncate(&self, inode: u64, size: u64) -> Result<()> {
        self.lock().truncate(ino(inode)?, size)
    }

    fn stat(&self, inode: u64) -> Result<Stat> {
        self.lock().stat(ino(inode)?)
    }

    fn chmod(&self, inode: u64, mode: u16) -> Result<()> {
        self.lock().chmod(ino(inode)?, mode)
    }

    fn chown(&self, inode: u64, uid: u32, gid: u32) -> Result<()> {
        self.lock().chown(ino(inode)?, uid, gid)
    }

    fn set_times(&self, inode: u64, atime: u32, mtime: u32) -> Result<()> {
        self.lock().set_times(ino(inode)?, atime, mtime)
    }

    fn read_dir(&self, inode: u64, at: usize, count: usize) -> Result<Vec<DirEntry>> {
        self.lock().read_dir(ino(inode)?, at, count)
    }
}
