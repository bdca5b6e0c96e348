use alloc::vec;
use alloc::vec::Vec;

use super::{field_offsets, get_u16, get_u64, put_u16, put_u64};
use crate::Ino;

#[derive(Clone, Copy)]
#[repr(usize)]
enum Field {
    Ino,
    RecLen,
    NameLen,
    FileType,
}

const WIDTHS: [usize; 4] = [8, 2, 1, 1];
const OFFSETS: [usize; 4] = field_offsets(WIDTHS);

impl Field {
    #[inline]
    const fn offset(self) -> usize {
        OFFSETS[self as usize]
    }
}

/// 目录项头部：`[ino:8][reclen:2][namelen:1][filetype:1]`，其后紧跟名字
pub const DIR_ENTRY_HEADER_SIZE: usize = OFFSETS[Field::FileType as usize] + 1;

/// 名字长为 `name_len` 的目录项实际占用的字节数，按 4 字节对齐
#[inline]
pub const fn record_len(name_len: usize) -> usize {
    (DIR_ENTRY_HEADER_SIZE + name_len).next_multiple_of(4)
}

/// 目录项头部
///
/// `ino` 为 [`Ino::NULL`] 的目录项是墓碑，其 `rec_len` 可供之后插入的目录项复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub ino: Ino,
    /// 本目录项到下一目录项的距离
    pub rec_len: u16,
    pub name_len: u8,
    /// 文件类型码，见 [`FileType::code`](super::FileType::code)
    pub file_type: u8,
}

impl RecordHeader {
    /// 名字紧凑存放时的长度
    #[inline]
    pub fn tight_len(&self) -> u16 {
        record_len(self.name_len as usize) as u16
    }

    /// 除自身外还能容纳的字节数
    #[inline]
    pub fn slack(&self) -> u16 {
        self.rec_len.saturating_sub(self.tight_len())
    }

    /// 写入 `buf` 的前 [`DIR_ENTRY_HEADER_SIZE`] 字节
    pub fn encode(&self, buf: &mut [u8]) {
        put_u64(buf, Field::Ino.offset(), self.ino.get());
        put_u16(buf, Field::RecLen.offset(), self.rec_len);
        buf[Field::NameLen.offset()] = self.name_len;
        buf[Field::FileType.offset()] = self.file_type;
    }

    /// 解析 `buf` 的前 [`DIR_ENTRY_HEADER_SIZE`] 字节
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            ino: get_u64(buf, Field::Ino.offset()).into(),
            rec_len: get_u16(buf, Field::RecLen.offset()),
            name_len: buf[Field::NameLen.offset()],
            file_type: buf[Field::FileType.offset()],
        }
    }

    /// 头部加名字，补零到 [`record_len`] 字节
    pub fn encode_with_name(&self, name: &[u8]) -> Vec<u8> {
        debug_assert_eq!(self.name_len as usize, name.len());
        let mut buf = vec![0; record_len(name.len())];
        self.encode(&mut buf);
        buf[DIR_ENTRY_HEADER_SIZE..DIR_ENTRY_HEADER_SIZE + name.len()].copy_from_slice(name);
        buf
    }

    /// `rec_len` 字段在目录项内的偏移，用于原地缩短目录项
    #[inline]
    pub const fn rec_len_offset() -> usize {
        Field::RecLen.offset()
    }
}
