use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::{BlockDevice, DeviceError};

/// 以宿主机上的普通文件作为块设备
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self(Mutex::new(fd))
    }
}

fn io_error(err: std::io::Error) -> DeviceError {
    match err.kind() {
        ErrorKind::UnexpectedEof => DeviceError::OutOfRange,
        _ => {
            log::error!("block file: {err}");
            DeviceError::Failed
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut file = self.0.lock().map_err(|_| DeviceError::Failed)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        file.read_exact(buf).map_err(io_error)?;
        Ok(buf.len())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        let mut file = self.0.lock().map_err(|_| DeviceError::Failed)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        file.write_all(buf).map_err(io_error)?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::path::PathBuf;
    use std::sync::Arc;

    use ext2::{Ext2, FormatOptions, MountOptions};
    use vfs::{Credentials, FileSystem};

    use super::*;

    /// 测试结束时删除的临时镜像
    struct Image(PathBuf);

    impl Image {
        fn new(name: &str, len: u64) -> (Self, File) {
            let path = std::env::temp_dir().join(format!("{name}-{}.img", std::process::id()));
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .unwrap();
            fd.set_len(len).unwrap();
            (Self(path), fd)
        }
    }

    impl Drop for Image {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn read_back_and_end_of_file() {
        let (_image, fd) = Image::new("block-file", 4096);
        let dev = BlockFile::new(fd);

        assert_eq!(Ok(1024), dev.write_at(1024, &[7; 1024]));
        let mut buf = [0; 1024];
        assert_eq!(Ok(1024), dev.read_at(1024, &mut buf));
        assert_eq!([7; 1024], buf);

        assert_eq!(Err(DeviceError::OutOfRange), dev.read_at(3584, &mut buf));
    }

    #[test]
    fn format_on_a_host_file() {
        let (_image, fd) = Image::new("ext2-image", 2 * 1024 * 1024);
        let dev = Arc::new(BlockFile::new(fd));
        Ext2::format(&*dev, &FormatOptions::new(4096, 512)).unwrap();

        let fs = Ext2::mount(dev, MountOptions::default()).unwrap();
        let ino = fs.create(fs.root(), "x", 0o644, Credentials::ROOT).unwrap();
        assert_eq!(Ok(3), fs.write_at(ino, 0, b"abc"));
        assert_eq!(Ok(ino), fs.find("/x"));
        fs.unmount().unwrap();
    }
}
