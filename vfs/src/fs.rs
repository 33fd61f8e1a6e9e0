//! 文件系统的能力接口
//!
//! VFS 只持有 `Arc<dyn FileSystem>`，以索引节点号作为句柄调度各项操作。

use alloc::vec::Vec;

use crate::{DirEntry, DirEntryType, Error, Stat};

/// 发起操作的用户身份
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const ROOT: Self = Self { uid: 0, gid: 0 };

    #[inline]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

pub trait FileSystem: Send + Sync {
    /// 根目录的索引节点号
    fn root(&self) -> u64;

    /// 在目录`parent`下查找名为`name`的项
    fn lookup(&self, parent: u64, name: &str) -> Result<u64, Error>;

    /// 在目录`parent`下创建空的普通文件
    fn create(&self, parent: u64, name: &str, mode: u16, cred: Credentials) -> Result<u64, Error>;

    fn mkdir(&self, parent: u64, name: &str, mode: u16, cred: Credentials) -> Result<u64, Error>;

    /// 创建设备文件、FIFO 或 socket
    fn mknod(
        &self,
        parent: u64,
        name: &str,
        kind: DirEntryType,
        mode: u16,
        rdev: u32,
        cred: Credentials,
    ) -> Result<u64, Error>;

    fn unlink(&self, parent: u64, name: &str) -> Result<(), Error>;

    /// 删除空目录
    fn rmdir(&self, parent: u64, name: &str) -> Result<(), Error>;

    fn read_at(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize, Error>;

    fn write_at(&self, inode: u64, offset: u64, buf: &[u8]) -> Result<usize, Error>;

    fn truncate(&self, inode: u64, size: u64) -> Result<(), Error>;

    fn stat(&self, inode: u64) -> Result<Stat, Error>;

    /// 只改权限位，类型位保持不变
    fn chmod(&self, inode: u64, mode: u16) -> Result<(), Error>;

    fn chown(&self, inode: u64, uid: u32, gid: u32) -> Result<(), Error>;

    fn set_times(&self, inode: u64, atime: u32, mtime: u32) -> Result<(), Error>;

    /// 读取第`at`项之后的目录项，最多为`count`个
    fn read_dir(&self, inode: u64, at: usize, count: usize) -> Result<Vec<DirEntry>, Error>;

    /// 从根目录出发解析绝对路径
    ///
    /// 空的路径段会被跳过，所以`"/"`与`""`都指向根目录。
    fn find(&self, path: &str) -> Result<u64, Error> {
        path.split('/')
            .filter(|cmp| !cmp.is_empty())
            .try_fold(self.root(), |dir, cmp| self.lookup(dir, cmp))
    }
}
