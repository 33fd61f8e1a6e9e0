use enumflags2::{BitFlags, bitflags};

use super::{get_array, get_u16, get_u32, put_u16, put_u32};
use crate::{GOOD_OLD_FIRST_INO, GOOD_OLD_INODE_SIZE, MAGIC, SUPERBLOCK_SIZE};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录卷的几何参数；
/// - 保存全局空闲块、空闲 inode 计数。
///
/// 位于卷起点之后 1024 字节处，固定占 1024 字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    /// 保留给超级用户的块数
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    /// 第一个块组的起始块：1 KiB 块时为 1，否则为 0
    pub first_data_block: u32,
    /// 块大小 = 1024 << log_block_size
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    /// 最近一次挂载时间
    pub mtime: u32,
    /// 最近一次写入时间
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    /// 魔数：用于校验文件系统合法性
    magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    /// 第一个非保留 inode（仅 rev 1 有效）
    pub first_ino: u32,
    /// inode 记录的大小（仅 rev 1 有效）
    pub inode_size: u16,
    /// 此超级块副本所在的块组
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [u8; 64],
    pub algo_bitmap: u32,
    /// 未解析的剩余字节，原样写回
    tail: [u8; SuperBlock::TAIL_LEN],
}

/// 不兼容特性：不认识其中任何一位就不能挂载
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatFeature {
    Compression = 0x0001,
    /// 目录项携带文件类型
    FileType = 0x0002,
    Recover = 0x0004,
    JournalDev = 0x0008,
    MetaBg = 0x0010,
}

/// 只读兼容特性：不认识其中任何一位就只能只读挂载
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoCompatFeature {
    SparseSuper = 0x0001,
    LargeFile = 0x0002,
    BtreeDir = 0x0004,
}

impl SuperBlock {
    /// 卷状态：干净卸载
    pub const STATE_VALID: u16 = 0x0001;

    pub const REV_GOOD_OLD: u32 = 0;
    pub const REV_DYNAMIC: u32 = 1;

    /// 已解析字段之后的字节数
    const TAIL_LEN: usize = SUPERBLOCK_SIZE - 204;

    /// 以默认值构建超级块，只有魔数与尾部是确定的
    pub fn new() -> Self {
        Self::decode(&[0; SUPERBLOCK_SIZE]).with_magic()
    }

    fn with_magic(mut self) -> Self {
        self.magic = MAGIC;
        self
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            inodes_count: get_u32(raw, 0),
            blocks_count: get_u32(raw, 4),
            r_blocks_count: get_u32(raw, 8),
            free_blocks_count: get_u32(raw, 12),
            free_inodes_count: get_u32(raw, 16),
            first_data_block: get_u32(raw, 20),
            log_block_size: get_u32(raw, 24),
            log_frag_size: get_u32(raw, 28),
            blocks_per_group: get_u32(raw, 32),
            frags_per_group: get_u32(raw, 36),
            inodes_per_group: get_u32(raw, 40),
            mtime: get_u32(raw, 44),
            wtime: get_u32(raw, 48),
            mnt_count: get_u16(raw, 52),
            max_mnt_count: get_u16(raw, 54),
            magic: get_u16(raw, 56),
            state: get_u16(raw, 58),
            errors: get_u16(raw, 60),
            minor_rev_level: get_u16(raw, 62),
            lastcheck: get_u32(raw, 64),
            checkinterval: get_u32(raw, 68),
            creator_os: get_u32(raw, 72),
            rev_level: get_u32(raw, 76),
            def_resuid: get_u16(raw, 80),
            def_resgid: get_u16(raw, 82),
            first_ino: get_u32(raw, 84),
            inode_size: get_u16(raw, 88),
            block_group_nr: get_u16(raw, 90),
            feature_compat: get_u32(raw, 92),
            feature_incompat: get_u32(raw, 96),
            feature_ro_compat: get_u32(raw, 100),
            uuid: get_array(raw, 104),
            volume_name: get_array(raw, 120),
            last_mounted: get_array(raw, 136),
            algo_bitmap: get_u32(raw, 200),
            tail: get_array(raw, 204),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u32(raw, 0, self.inodes_count);
        put_u32(raw, 4, self.blocks_count);
        put_u32(raw, 8, self.r_blocks_count);
        put_u32(raw, 12, self.free_blocks_count);
        put_u32(raw, 16, self.free_inodes_count);
        put_u32(raw, 20, self.first_data_block);
        put_u32(raw, 24, self.log_block_size);
        put_u32(raw, 28, self.log_frag_size);
        put_u32(raw, 32, self.blocks_per_group);
        put_u32(raw, 36, self.frags_per_group);
        put_u32(raw, 40, self.inodes_per_group);
        put_u32(raw, 44, self.mtime);
        put_u32(raw, 48, self.wtime);
        put_u16(raw, 52, self.mnt_count);
        put_u16(raw, 54, self.max_mnt_count);
        put_u16(raw, 56, self.magic);
        put_u16(raw, 58, self.state);
        put_u16(raw, 60, self.errors);
        put_u16(raw, 62, self.minor_rev_level);
        put_u32(raw, 64, self.lastcheck);
        put_u32(raw, 68, self.checkinterval);
        put_u32(raw, 72, self.creator_os);
        put_u32(raw, 76, self.rev_level);
        put_u16(raw, 80, self.def_resuid);
        put_u16(raw, 82, self.def_resgid);
        put_u32(raw, 84, self.first_ino);
        put_u16(raw, 88, self.inode_size);
        put_u16(raw, 90, self.block_group_nr);
        put_u32(raw, 92, self.feature_compat);
        put_u32(raw, 96, self.feature_incompat);
        put_u32(raw, 100, self.feature_ro_compat);
        raw[104..120].copy_from_slice(&self.uuid);
        raw[120..136].copy_from_slice(&self.volume_name);
        raw[136..200].copy_from_slice(&self.last_mounted);
        put_u32(raw, 200, self.algo_bitmap);
        raw[204..SUPERBLOCK_SIZE].copy_from_slice(&self.tail);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        1024 << self.log_block_size
    }

    /// 块组个数：不足一整组的尾部也算一组
    pub fn group_count(&self) -> u32 {
        (self.blocks_count - self.first_data_block).div_ceil(self.blocks_per_group)
    }

    pub fn inode_size(&self) -> usize {
        if self.rev_level == Self::REV_GOOD_OLD {
            GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size as usize
        }
    }

    pub fn first_ino(&self) -> u32 {
        if self.rev_level == Self::REV_GOOD_OLD {
            GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }

    /// 出现未知的不兼容特性位时返回原始值
    pub fn incompat(&self) -> Result<BitFlags<IncompatFeature>, u32> {
        BitFlags::from_bits(self.feature_incompat).map_err(|_| self.feature_incompat)
    }

    /// 出现未知的只读兼容特性位时返回原始值
    pub fn ro_compat(&self) -> Result<BitFlags<RoCompatFeature>, u32> {
        BitFlags::from_bits(self.feature_ro_compat).map_err(|_| self.feature_ro_compat)
    }
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self::new()
    }
}
