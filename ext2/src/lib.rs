#![cfg_attr(not(test), no_std)]

extern crate alloc;

/* ext2 驱动的整体架构，自上而下 */

// 索引节点层：查找、创建、删除、读写等操作
mod node;

// 目录层：目录项在数据块中的打包与检索
mod dir;

// 尺寸层：按目标大小为 inode 增减数据块
mod resize;

// 块映射层：逻辑块索引到物理块号的翻译
mod bmap;

// 磁盘块管理器层：挂载、位图分配、inode 读写
mod fs;

// 格式化：构建一个全新的卷
mod mkfs;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 块缓冲：每次操作自带的块缓冲与设备读写
mod block;

mod config;

#[cfg(test)]
mod tests;

pub use self::{
    bmap::BlockPtr,
    config::{FormatOptions, MountOptions},
    fs::{Ext2FileSystem, Unit},
    node::Ext2,
};

/// 超级块的魔数
pub const MAGIC: u16 = 0xEF53;
/// 超级块距卷起点的字节偏移
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// 超级块占用的字节数
pub const SUPERBLOCK_SIZE: usize = 1024;
/// 根目录的 inode 编号
pub const ROOT_INO: u32 = 2;
/// 旧版(rev 0)卷上第一个非保留 inode
pub const GOOD_OLD_FIRST_INO: u32 = 11;
/// 旧版(rev 0)卷上 inode 记录的大小
pub const GOOD_OLD_INODE_SIZE: usize = 128;
/// 目录项名称的最大长度
pub const NAME_MAX_LEN: usize = 255;

/// 直接索引个数
pub const DIRECT_COUNT: usize = 12;
/// 一级索引指针在`block`数组中的位置
pub const IND_BLOCK: usize = DIRECT_COUNT;
/// 二级索引指针在`block`数组中的位置
pub const DIND_BLOCK: usize = IND_BLOCK + 1;
/// 三级索引指针在`block`数组中的位置，本驱动从不填写
pub const TIND_BLOCK: usize = DIND_BLOCK + 1;
/// `block`数组的长度
pub const N_BLOCKS: usize = TIND_BLOCK + 1;

type Result<T> = core::result::Result<T, vfs::Error>;
