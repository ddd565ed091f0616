#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] IoError),
    #[error("format: {0}")]
    Format(#[from] FormatError),
    #[error("fs: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("offset out of range")]
    OutOfRange,
    #[error("read-only")]
    ReadOnly,
}

/// Errors raised while decoding an image at `init` time. All fatal for the image.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("image length does not match any known geometry")]
    SizeMismatch,
    #[error("superblock magic does not match")]
    MagicMismatch,
    #[error("unsupported superblock type")]
    UnsupportedType,
}

/// Errors raised while resolving or mutating the directory tree.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("name too long")]
    NameTooLong,
    #[error("no space left on device")]
    NoSpace,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file exists")]
    Exists,
}

impl Error {
    /// Maps this error onto a negative `errno`-compatible value, per the
    /// lookup/capacity/request error table at the VFS boundary.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(IoError::OutOfRange) => -libc_einval(),
            Error::Io(IoError::ReadOnly) => -libc_erofs(),
            Error::Format(_) => -libc_einval(),
            Error::Fs(FsError::NotFound) => -libc_enoent(),
            Error::Fs(FsError::NotADirectory) => -libc_enotdir(),
            Error::Fs(FsError::NameTooLong) => -libc_enametoolong(),
            Error::Fs(FsError::NoSpace) => -libc_enospc(),
            Error::Fs(FsError::InvalidArgument) => -libc_einval(),
            Error::Fs(FsError::Exists) => -libc_eexist(),
        }
    }
}

// `err` intentionally has no dependency on `libc`: these constants are the
// handful of errno values this crate's boundary actually produces, kept
// local so lower-level crates never need to pull in `libc` just to build
// an `Error`. `vmc-mount` re-derives the same numbers from `libc` directly
// when it needs the full errno namespace for other FUSE replies.
const fn libc_einval() -> i32 {
    22
}
const fn libc_enoent() -> i32 {
    2
}
const fn libc_enotdir() -> i32 {
    20
}
const fn libc_enametoolong() -> i32 {
    36
}
const fn libc_enospc() -> i32 {
    28
}
const fn libc_eexist() -> i32 {
    17
}
const fn libc_erofs() -> i32 {
    30
}

pub type Result<T> = core::result::Result<T, Error>;
