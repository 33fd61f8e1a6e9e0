//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统总是以块对齐、块大小的请求访问设备，
//! 但接口本身按字节偏移寻址，块大小由文件系统决定。

#![no_std]

use core::any::Any;

use derive_more::Display;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 从字节偏移`offset`处读满`buf`，返回实际读取的字节数
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// 把`buf`写到字节偏移`offset`处，返回实际写入的字节数
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, DeviceError>;
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 请求越过了设备末尾
    #[display(fmt = "request beyond end of device")]
    OutOfRange,
    /// 设备报告传输失败
    #[display(fmt = "device transfer failed")]
    Failed,
}
