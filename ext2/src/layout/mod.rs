//! # 磁盘数据结构层
//!
//! ext2 的磁盘布局：
//! 引导块(1 KiB) | 超级块 | 块组描述符表 | 块位图 | inode 位图 | inode 表 | 数据块 ...
//!
//! 每个块组都有自己的位图与 inode 表；
//! 所有整数都以小端序存储，本层只负责与原始字节互相转换，不做任何 I/O。

mod super_block;
pub use super_block::{IncompatFeature, RoCompatFeature, SuperBlock};

mod group_desc;
pub use group_desc::GroupDesc;

mod inode;
pub use inode::{DiskInode, InodeKind};

mod dir_entry;
pub use dir_entry::DirEntryHead;

mod bitmap;
pub use bitmap::{Bitmap, probe_groups};

#[inline]
pub(crate) fn get_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

#[inline]
pub(crate) fn get_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

#[inline]
pub(crate) fn put_u16(raw: &mut [u8], at: usize, value: u16) {
    raw[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u32(raw: &mut [u8], at: usize, value: u32) {
    raw[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn get_array<const N: usize>(raw: &[u8], at: usize) -> [u8; N] {
    let mut arr = [0; N];
    arr.copy_from_slice(&raw[at..at + N]);
    arr
}
