use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub inode: u64,
    pub kind: DirEntryType,
    /// 类型位与权限位
    pub mode: u16,
    /// 硬链接个数
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    /// File size
    pub size: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying 512-byte sectors
    pub blocks: u64,
    /// 设备文件的设备号
    pub rdev: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}
