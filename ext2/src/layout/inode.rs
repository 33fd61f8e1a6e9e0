//! 磁盘上的索引节点
//!
//! 记录文件的类型、权限、属主、时间戳与数据块指针：
//! - `block[0..12]`：直接指向数据块
//! - `block[12]`：指向一级索引块，整个块连续存储数据块编号
//! - `block[13]`：指向二级索引块，整个块连续存储一级索引块编号
//! - `block[14]`：三级索引，从不填写
//!
//! 只解析前 128 字节，更大的 inode 记录中其余字节由块缓冲原样保留。

use vfs::{Credentials, DirEntryType};

use super::{get_u16, get_u32, put_u16, put_u32};
use crate::{GOOD_OLD_INODE_SIZE, N_BLOCKS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    /// 类型位与权限位
    pub mode: u16,
    /// 属主 ID 的低 16 位
    uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    /// 删除时间，仍在使用的 inode 为 0
    pub dtime: u32,
    /// 属组 ID 的低 16 位
    gid: u16,
    /// 硬链接个数
    pub links_count: u16,
    /// 占用的 512 字节扇区数，含索引块
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub block: [u32; N_BLOCKS],
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
    pub frag: u8,
    pub fsize: u8,
    pad: u16,
    uid_high: u16,
    gid_high: u16,
    reserved: u32,
}

/// `mode`中的类型位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeKind {
    Fifo = 0o010000,
    Char = 0o020000,
    Directory = 0o040000,
    Block = 0o060000,
    Regular = 0o100000,
    SymLink = 0o120000,
    Socket = 0o140000,
}

impl InodeKind {
    /// 类型位的掩码
    pub const MASK: u16 = 0o170000;

    pub fn from_mode(mode: u16) -> Option<Self> {
        Some(match mode & Self::MASK {
            0o010000 => Self::Fifo,
            0o020000 => Self::Char,
            0o040000 => Self::Directory,
            0o060000 => Self::Block,
            0o100000 => Self::Regular,
            0o120000 => Self::SymLink,
            0o140000 => Self::Socket,
            _ => return None,
        })
    }

    /// 目录项中的文件类型码
    pub fn file_type(self) -> u8 {
        match self {
            Self::Regular => 1,
            Self::Directory => 2,
            Self::Char => 3,
            Self::Block => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::SymLink => 7,
        }
    }

    pub fn from_file_type(ty: u8) -> Option<Self> {
        Some(match ty {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::Char,
            4 => Self::Block,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::SymLink,
            _ => return None,
        })
    }
}

impl From<InodeKind> for DirEntryType {
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Fifo => Self::Fifo,
            InodeKind::Char => Self::Char,
            InodeKind::Directory => Self::Directory,
            InodeKind::Block => Self::Block,
            InodeKind::Regular => Self::Regular,
            InodeKind::SymLink => Self::SymLink,
            InodeKind::Socket => Self::Socket,
        }
    }
}

impl From<DirEntryType> for InodeKind {
    fn from(ty: DirEntryType) -> Self {
        match ty {
            DirEntryType::Fifo => Self::Fifo,
            DirEntryType::Char => Self::Char,
            DirEntryType::Directory => Self::Directory,
            DirEntryType::Block => Self::Block,
            DirEntryType::Regular => Self::Regular,
            DirEntryType::SymLink => Self::SymLink,
            DirEntryType::Socket => Self::Socket,
        }
    }
}

impl DiskInode {
    /// 解析所需的最少字节数
    pub const SIZE: usize = GOOD_OLD_INODE_SIZE;

    /// 把回收过的 inode 重新初始化为新文件，只沿用其代数
    pub fn init(&mut self, kind: InodeKind, perm: u16, cred: Credentials, now: u32) {
        *self = Self {
            mode: kind as u16 | (perm & !InodeKind::MASK),
            links_count: 1,
            atime: now,
            ctime: now,
            mtime: now,
            generation: self.generation.wrapping_add(1),
            ..Default::default()
        };
        self.set_owner(cred.uid, cred.gid);
    }

    #[inline]
    pub fn kind(&self) -> Option<InodeKind> {
        InodeKind::from_mode(self.mode)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(InodeKind::Directory)
    }

    #[inline]
    pub fn uid(&self) -> u32 {
        (self.uid_high as u32) << 16 | self.uid as u32
    }

    #[inline]
    pub fn gid(&self) -> u32 {
        (self.gid_high as u32) << 16 | self.gid as u32
    }

    pub fn set_owner(&mut self, uid: u32, gid: u32) {
        self.uid = uid as u16;
        self.uid_high = (uid >> 16) as u16;
        self.gid = gid as u16;
        self.gid_high = (gid >> 16) as u16;
    }

    /// 设备文件的设备号：旧格式存于`block[0]`，新格式存于`block[1]`
    pub fn rdev(&self) -> u32 {
        if self.block[0] != 0 {
            self.block[0]
        } else {
            self.block[1]
        }
    }

    pub fn set_rdev(&mut self, rdev: u32) {
        if rdev < 0x10000 {
            self.block[0] = rdev;
            self.block[1] = 0;
        } else {
            self.block[0] = 0;
            self.block[1] = rdev;
        }
    }

    /// 设备、FIFO 与 socket 的`block`数组不是块指针
    #[inline]
    pub fn has_data_blocks(&self) -> bool {
        matches!(
            self.kind(),
            Some(InodeKind::Regular | InodeKind::Directory | InodeKind::SymLink)
        )
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut block = [0; N_BLOCKS];
        for (i, ptr) in block.iter_mut().enumerate() {
            *ptr = get_u32(raw, 40 + i * 4);
        }

        Self {
            mode: get_u16(raw, 0),
            uid: get_u16(raw, 2),
            size: get_u32(raw, 4),
            atime: get_u32(raw, 8),
            ctime: get_u32(raw, 12),
            mtime: get_u32(raw, 16),
            dtime: get_u32(raw, 20),
            gid: get_u16(raw, 24),
            links_count: get_u16(raw, 26),
            blocks: get_u32(raw, 28),
            flags: get_u32(raw, 32),
            osd1: get_u32(raw, 36),
            block,
            generation: get_u32(raw, 100),
            file_acl: get_u32(raw, 104),
            dir_acl: get_u32(raw, 108),
            faddr: get_u32(raw, 112),
            frag: raw[116],
            fsize: raw[117],
            pad: get_u16(raw, 118),
            uid_high: get_u16(raw, 120),
            gid_high: get_u16(raw, 122),
            reserved: get_u32(raw, 124),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u16(raw, 0, self.mode);
        put_u16(raw, 2, self.uid);
        put_u32(raw, 4, self.size);
        put_u32(raw, 8, self.atime);
        put_u32(raw, 12, self.ctime);
        put_u32(raw, 16, self.mtime);
        put_u32(raw, 20, self.dtime);
        put_u16(raw, 24, self.gid);
        put_u16(raw, 26, self.links_count);
        put_u32(raw, 28, self.blocks);
        put_u32(raw, 32, self.flags);
        put_u32(raw, 36, self.osd1);
        for (i, &ptr) in self.block.iter().enumerate() {
            put_u32(raw, 40 + i * 4, ptr);
        }
        put_u32(raw, 100, self.generation);
        put_u32(raw, 104, self.file_acl);
        put_u32(raw, 108, self.dir_acl);
        put_u32(raw, 112, self.faddr);
        raw[116] = self.frag;
        raw[117] = self.fsize;
        put_u16(raw, 118, self.pad);
        put_u16(raw, 120, self.uid_high);
        put_u16(raw, 122, self.gid_high);
        put_u32(raw, 124, self.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_array_offsets() {
        let mut inode = DiskInode::default();
        inode.block[0] = 0x11;
        inode.block[12] = 0x22;
        inode.block[13] = 0x33;

        let mut raw = [0u8; DiskInode::SIZE];
        inode.encode(&mut raw);
        assert_eq!(0x11, raw[40]);
        assert_eq!(0x22, raw[88]);
        assert_eq!(0x33, raw[92]);
        assert_eq!(inode, DiskInode::decode(&raw));
    }

    #[test]
    fn owner_spans_high_bits() {
        let mut inode = DiskInode::default();
        inode.init(InodeKind::Regular, 0o644, Credentials::new(70000, 1000), 7);
        assert_eq!(70000, inode.uid());
        assert_eq!(1000, inode.gid());
        assert_eq!(0o100644, inode.mode);
        assert_eq!(1, inode.links_count);
        assert_eq!(1, inode.generation);

        let mut raw = [0u8; DiskInode::SIZE];
        inode.encode(&mut raw);
        assert_eq!(70000 & 0xFFFF, get_u16(&raw, 2) as u32);
        assert_eq!(1, get_u16(&raw, 120));
    }

    #[test]
    fn device_numbers() {
        let mut inode = DiskInode::default();
        inode.set_rdev(0x0801);
        assert_eq!([0x0801, 0], inode.block[..2]);
        assert_eq!(0x0801, inode.rdev());

        inode.set_rdev(0x0010_0001);
        assert_eq!([0, 0x0010_0001], inode.block[..2]);
        assert_eq!(0x0010_0001, inode.rdev());
    }

    #[test]
    fn file_type_codes() {
        for kind in [
            InodeKind::Regular,
            InodeKind::Directory,
            InodeKind::Char,
            InodeKind::Block,
            InodeKind::Fifo,
            InodeKind::Socket,
            InodeKind::SymLink,
        ] {
            assert_eq!(Some(kind), InodeKind::from_file_type(kind.file_type()));
            assert_eq!(Some(kind), InodeKind::from_mode(kind as u16 | 0o755));
            assert_eq!(kind, InodeKind::from(DirEntryType::from(kind)));
        }
        assert_eq!(None, InodeKind::from_file_type(0));
    }
}
