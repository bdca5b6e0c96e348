//! 错误类型
//!
//! 每一层都用 [`ResultExt::with_context`] 把正在处理的操作和编号
//! （索引节点、偏移、块号）附在错误上，底层的 [`ErrorKind`] 始终保留。

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use thiserror::Error;

use crate::{Bid, Ino};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("bad superblock magic {found:#018x}")]
    BadMagic { found: u64 },
    #[error("filesystem state {raw:#x} does not allow mounting")]
    BadState { raw: u16 },
    #[error("incompatible feature bits {bits:#x}")]
    IncompatibleFeatures { bits: u32 },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("out of blocks")]
    OutOfBlocks,
    #[error("out of inodes")]
    OutOfInodes,
    #[error("logical block {index} is beyond triply indirect range")]
    BlockOutOfRange { index: u64 },
    #[error("not a directory")]
    NotADirectory,
    #[error("not a regular file")]
    NotARegularFile,
    #[error("is a directory")]
    IsADirectory,
    #[error("name of {len} bytes is too long")]
    NameTooLong { len: usize },
    #[error("invalid name")]
    InvalidName,
    #[error("invalid path")]
    InvalidPath,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("corrupt directory record at offset {offset}")]
    CorruptDirectoryRecord { offset: u64 },
    #[error("inode {ino} points at a block outside the data area")]
    CorruptInode { ino: Ino },
    #[error("block {bid} lies outside the filesystem")]
    InvalidBlock { bid: Bid },
    #[error("invalid file type {raw:#x}")]
    InvalidFileType { raw: u16 },
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error(transparent)]
    Volume(#[from] volume::Error),
}

/// 带上下文的错误
///
/// 上下文按附加顺序保存，显示时由外到内。
pub struct Error {
    kind: ErrorKind,
    context: Vec<String>,
}

impl Error {
    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[inline]
    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// 由内到外的上下文
    #[inline]
    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: Vec::new(),
        }
    }
}

impl From<volume::Error> for Error {
    #[inline]
    fn from(err: volume::Error) -> Self {
        ErrorKind::from(err).into()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for context in self.context.iter().rev() {
            write!(f, "{context}: ")?;
        }
        write!(f, "{}", self.kind)
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        core::error::Error::source(&self.kind)
    }
}

pub(crate) trait ResultExt<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    #[inline]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Into::<Error>::into(err).with_context(f()))
    }
}
