use super::{get_u16, get_u32, put_u16, put_u32};

/// 目录项头部，紧随其后的是`name_len`字节的名称。
///
/// 整个目录项按 4 字节对齐，`rec_len`把块内的目录项串成链，
/// 一个块内所有`rec_len`之和恰为块大小。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntryHead {
    /// 为 0 表示该项未使用
    pub inode: u32,
    /// 从本项起点到下一项起点的距离
    pub rec_len: u16,
    pub name_len: u8,
    /// 未启用 FILETYPE 特性时为 0
    pub file_type: u8,
}

impl DirEntryHead {
    pub const SIZE: usize = 8;

    /// 容纳长为`name_len`的名称所需的最小记录长度
    #[inline]
    pub const fn min_len(name_len: usize) -> usize {
        (Self::SIZE + name_len + 3) & !3
    }

    /// 本项实际占用的长度，其余为可分裂出去的空闲
    #[inline]
    pub fn used_len(&self) -> usize {
        Self::min_len(self.name_len as usize)
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            inode: get_u32(raw, 0),
            rec_len: get_u16(raw, 4),
            name_len: raw[6],
            file_type: raw[7],
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u32(raw, 0, self.inode);
        put_u16(raw, 4, self.rec_len);
        raw[6] = self.name_len;
        raw[7] = self.file_type;
    }
}
