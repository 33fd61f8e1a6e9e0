/// 挂载选项
#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    /// 只读挂载：不改动卷上任何字节
    pub read_only: bool,
    /// 时间戳来源，返回 Unix 秒
    pub clock: fn() -> u32,
}

impl MountOptions {
    #[inline]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[inline]
    pub fn with_clock(mut self, clock: fn() -> u32) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            clock: || 0,
        }
    }
}

/// 格式化选项
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// 1024、2048 或 4096
    pub block_size: usize,
    pub blocks_count: u32,
    /// 缺省为一个位图块能描述的块数
    pub blocks_per_group: Option<u32>,
    /// 缺省按`bytes_per_inode`推算
    pub inodes_per_group: Option<u32>,
    pub bytes_per_inode: u32,
    /// 为超级用户保留的块的百分比
    pub reserved_percent: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    /// 写入根目录与超级块的时间戳
    pub now: u32,
}

impl FormatOptions {
    pub fn new(block_size: usize, blocks_count: u32) -> Self {
        Self {
            block_size,
            blocks_count,
            blocks_per_group: None,
            inodes_per_group: None,
            bytes_per_inode: 4096,
            reserved_percent: 5,
            uuid: [0; 16],
            volume_name: [0; 16],
            now: 0,
        }
    }

    /// 卷名超过 16 字节的部分被截去
    pub fn volume_name(mut self, name: &str) -> Self {
        let len = name.len().min(self.volume_name.len());
        self.volume_name = [0; 16];
        self.volume_name[..len].copy_from_slice(&name.as_bytes()[..len]);
        self
    }
}
