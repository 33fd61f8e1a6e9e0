//! 每次操作自带的块缓冲
//!
//! 驱动不缓存任何块：要用时读入新分配的缓冲，改完立即写回。

use alloc::boxed::Box;
use alloc::vec;

use block_dev::BlockDevice;
use vfs::Error;

use crate::Result;

/// 分配一块全零的块缓冲
#[inline]
pub fn new_block(block_size: usize) -> Box<[u8]> {
    vec![0; block_size].into_boxed_slice()
}

/// 从`offset`处读满`buf`，设备错误与短读都视为 I/O 错误
pub fn read_exact(dev: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<()> {
    match dev.read_at(offset, buf) {
        Ok(n) if n == buf.len() => Ok(()),
        Ok(n) => {
            log::error!("short read at {offset:#x}: {n} of {} bytes", buf.len());
            Err(Error::Io)
        }
        Err(err) => {
            log::error!("read at {offset:#x} failed: {err}");
            Err(Error::Io)
        }
    }
}

/// 把`buf`整个写到`offset`处，设备错误与短写都视为 I/O 错误
pub fn write_exact(dev: &dyn BlockDevice, offset: u64, buf: &[u8]) -> Result<()> {
    match dev.write_at(offset, buf) {
        Ok(n) if n == buf.len() => Ok(()),
        Ok(n) => {
            log::error!("short write at {offset:#x}: {n} of {} bytes", buf.len());
            Err(Error::Io)
        }
        Err(err) => {
            log::error!("write at {offset:#x} failed: {err}");
            Err(Error::Io)
        }
    }
}
