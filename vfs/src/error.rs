use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "I/O error")]
    Io,
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "file exists")]
    AlreadyExists,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    #[display(fmt = "no space left on device")]
    NoSpace,
    #[display(fmt = "filesystem structure is corrupted")]
    Corrupted,
    #[display(fmt = "invalid argument")]
    InvalidArgument,
    #[display(fmt = "file name too long")]
    NameTooLong,
    #[display(fmt = "file too large")]
    FileTooLarge,
    #[display(fmt = "read-only filesystem")]
    ReadOnly,
    #[display(fmt = "operation not supported")]
    Unsupported,
}

impl Error {
    /// 交给系统调用层的负错误码
    pub const fn errno(self) -> isize {
        -(match self {
            Self::NotFound => 2,
            Self::Io => 5,
            Self::AlreadyExists => 17,
            Self::NotADirectory => 20,
            Self::IsADirectory => 21,
            Self::InvalidArgument => 22,
            Self::FileTooLarge => 27,
            Self::NoSpace => 28,
            Self::ReadOnly => 30,
            Self::NameTooLong => 36,
            Self::DirectoryNotEmpty => 39,
            Self::Unsupported => 95,
            Self::Corrupted => 117,
        })
    }
}
