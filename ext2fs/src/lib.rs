#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::num::NonZeroUsize;

/* ext2fs 的整体架构，自上而下 */

// 文件系统层：格式化、挂载，以及面向文件、目录的操作
mod fs;

// 目录层：把目录的数据解释为一串目录项
mod dir;

// 数据读写层：把任意字节区间拆成块操作
mod data;

// 间接索引层：逻辑块号到物理块号的翻译
mod indirect;

// 索引节点层：带写回的 LRU 缓存及其后端
mod inode_cache;
mod inode_store;

// 空间分配层：位图之上的块、索引节点分配器
mod space;

// 块访问层：以块为单位读写卷
mod blocks;

// 磁盘数据结构层：表示磁盘文件系统的数据结构及其编解码
pub mod layout;

mod error;
mod id;

#[cfg(test)]
mod tests;

pub use self::{
    blocks::Blocks,
    data::{InodeIo, PartialWrite},
    dir::{DirEntry, ReadDir},
    error::{Error, ErrorKind, Result},
    fs::{File, Filesystem, FormatOptions, Usage},
    id::{Bid, Ino},
    indirect::BlockPath,
    inode_cache::InodeCache,
    inode_store::{CachingInodeStore, InodeStore, VolumeInodeStore},
    layout::{FileType, Inode},
    space::{Allocator, BlockAllocator, FlushableBitmap, IdAllocator, InoAllocator},
};

/// 超级块魔数，小端存储时为 ASCII 的 "feebdaed"
pub const MAGIC: u64 = 0x6465_6164_6265_6566;
/// 超级块所在的字节偏移
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// 超级块占据的字节数
pub const SUPERBLOCK_SIZE: usize = 1024;

pub const DEFAULT_BLOCK_SIZE: u64 = 1024;
/// 索引节点缓存的默认容量
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(32) {
    Some(capacity) => capacity,
    None => unreachable!(),
};
pub const MIN_BLOCK_SIZE: u64 = 64;
/// 目录项的 reclen 只有 16 位，块不能更大
pub const MAX_BLOCK_SIZE: u64 = 32768;

/// 磁盘上每个索引节点记录的字节数
pub const INODE_SIZE: usize = 256;
/// 直接索引个数
pub const DIRECT_BLOCKS: usize = 12;
/// 块编号的字节数
pub const POINTER_SIZE: usize = 8;
/// 文件名的最大字节数
pub const NAME_MAX_LEN: usize = 255;
/// 根目录的索引节点编号
pub const ROOT_INO: Ino = Ino::ROOT;
