use super::{get_array, get_u16, get_u32, put_u16, put_u32};

/// 块组描述符：记录本组位图、inode 表的位置与空闲计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDesc {
    /// 块位图所在的块号
    pub block_bitmap: u32,
    /// inode 位图所在的块号
    pub inode_bitmap: u32,
    /// inode 表的起始块号
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pad: u16,
    reserved: [u8; 12],
}

impl GroupDesc {
    pub const SIZE: usize = 32;

    pub fn new(block_bitmap: u32, inode_bitmap: u32, inode_table: u32) -> Self {
        Self {
            block_bitmap,
            inode_bitmap,
            inode_table,
            ..Default::default()
        }
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            block_bitmap: get_u32(raw, 0),
            inode_bitmap: get_u32(raw, 4),
            inode_table: get_u32(raw, 8),
            free_blocks_count: get_u16(raw, 12),
            free_inodes_count: get_u16(raw, 14),
            used_dirs_count: get_u16(raw, 16),
            pad: get_u16(raw, 18),
            reserved: get_array(raw, 20),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u32(raw, 0, self.block_bitmap);
        put_u32(raw, 4, self.inode_bitmap);
        put_u32(raw, 8, self.inode_table);
        put_u16(raw, 12, self.free_blocks_count);
        put_u16(raw, 14, self.free_inodes_count);
        put_u16(raw, 16, self.used_dirs_count);
        put_u16(raw, 18, self.pad);
        raw[20..Self::SIZE].copy_from_slice(&self.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::GroupDesc;

    #[test]
    fn field_offsets() {
        let mut gd = GroupDesc::new(3, 4, 5);
        gd.free_blocks_count = 0x0102;
        gd.free_inodes_count = 0x0304;
        gd.used_dirs_count = 1;

        let mut raw = [0xFFu8; GroupDesc::SIZE];
        gd.encode(&mut raw);
        assert_eq!([3, 0, 0, 0, 4, 0, 0, 0, 5, 0, 0, 0], raw[..12]);
        assert_eq!([0x02, 0x01, 0x04, 0x03, 1, 0], raw[12..18]);
        assert!(raw[18..].iter().all(|&b| b == 0));
        assert_eq!(gd, GroupDesc::decode(&raw));
    }
}
