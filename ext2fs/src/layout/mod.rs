//! # 磁盘数据结构层
//!
//! ext2fs 的磁盘布局：
//! 引导区 | 超级块(字节 1024) | 描述符(按块对齐) | 索引节点表 | 数据块区域
//!
//! 描述符依次存放已用目录计数、块位图、索引节点位图；
//! 所有整数均以小端序、固定宽度存放在固定偏移处。

mod super_block;
pub use super_block::{Feature, State, SuperBlock};

mod descriptor;
pub use descriptor::Descriptor;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{FileType, Inode};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DIR_ENTRY_HEADER_SIZE, RecordHeader, record_len};

/// 由各字段的宽度依次累加出字段偏移，编译期求值
pub(crate) const fn field_offsets<const N: usize>(widths: [usize; N]) -> [usize; N] {
    let mut offsets = [0; N];
    let mut i = 1;
    while i < N {
        offsets[i] = offsets[i - 1] + widths[i - 1];
        i += 1;
    }
    offsets
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    let mut raw = [0; 2];
    raw.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(raw)
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
