//! # 卷接口层
//!
//! 卷是可按字节寻址的存储介质，例如镜像文件、内存缓冲区、块设备；
//! [`Volume`] 就是对读写卷的抽象，实现了此特质的类型称为**卷驱动**。
//!
//! `ext2fs` 只通过 `read_at`/`write_at` 两个能力访问卷，
//! 不依赖任何寻址、追加之类的额外语义。

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod error;
#[cfg(feature = "std")]
mod file;
mod mem;

pub use self::{error::Error, mem::MemVolume};

#[cfg(feature = "std")]
pub use self::file::FileVolume;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// 卷驱动特质
///
/// 一次成功的调用必定完整地读写了 `buf.len()` 个字节，否则返回错误；
/// 越过介质末尾的访问以 [`Error::EndOfMedium`] 失败，而不是静默补零。
pub trait Volume: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;
}

/// 校验 `[offset, offset + len)` 是否落在 `size` 字节的介质之内
#[inline]
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::EndOfMedium { offset, len, size }),
    }
}
