//! 磁盘上的索引节点
//!
//! 记录布局（小端序）：
//!
//! | 字段 | 宽度 |
//! |---|---|
//! | mode（高 4 位为文件类型） | 2 |
//! | 硬链接数 | 2 |
//! | 字节大小 | 8 |
//! | 直接索引 × 12 | 96 |
//! | 一级、二级、三级间接索引 | 8 × 3 |
//!
//! 其余字节保留为 0。全 0 的记录表示该索引节点未被使用。

use super::{field_offsets, get_u16, get_u64, put_u16, put_u64};
use crate::{Bid, ErrorKind, Ino, Result};
use crate::{DIRECT_BLOCKS, INODE_SIZE, POINTER_SIZE};

/// 文件类型，判别值即目录项中的类型码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FileType {
    #[default]
    Regular = 1,
    Directory = 2,
    Char = 3,
    Block = 4,
    Fifo = 5,
    Socket = 6,
    SymLink = 7,
}

impl FileType {
    const MODE_SHIFT: u32 = 12;

    /// 目录项中的类型码
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::Char,
            4 => Self::Block,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::SymLink,
            _ => return None,
        })
    }

    /// 索引节点 mode 中的类型位
    pub fn mode(self) -> u16 {
        let nibble: u16 = match self {
            Self::Fifo => 0x1,
            Self::Char => 0x2,
            Self::Directory => 0x4,
            Self::Block => 0x6,
            Self::Regular => 0x8,
            Self::SymLink => 0xa,
            Self::Socket => 0xc,
        };
        nibble << Self::MODE_SHIFT
    }

    pub fn from_mode(mode: u16) -> Option<Self> {
        Some(match mode >> Self::MODE_SHIFT {
            0x1 => Self::Fifo,
            0x2 => Self::Char,
            0x4 => Self::Directory,
            0x6 => Self::Block,
            0x8 => Self::Regular,
            0xa => Self::SymLink,
            0xc => Self::Socket,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy)]
#[repr(usize)]
enum Field {
    Mode,
    LinksCount,
    Size,
    Direct,
    Singly,
    Doubly,
    Triply,
}

const WIDTHS: [usize; 7] = [
    2,
    2,
    8,
    DIRECT_BLOCKS * POINTER_SIZE,
    POINTER_SIZE,
    POINTER_SIZE,
    POINTER_SIZE,
];
const OFFSETS: [usize; 7] = field_offsets(WIDTHS);

const _: () = assert!(OFFSETS[Field::Triply as usize] + POINTER_SIZE <= INODE_SIZE);

impl Field {
    #[inline]
    const fn offset(self) -> usize {
        OFFSETS[self as usize]
    }
}

/// 内存中的索引节点
///
/// 编号不落盘，由记录在索引节点表中的位置决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub ino: Ino,
    pub file_type: FileType,
    pub size: u64,
    /// 硬链接个数
    pub links_count: u16,
    /// 直接索引块
    pub direct: [Bid; DIRECT_BLOCKS],
    /// 指向一个一级索引块
    pub singly: Bid,
    /// 指向一个二级索引块
    pub doubly: Bid,
    /// 指向一个三级索引块
    pub triply: Bid,
}

impl Inode {
    /// 刚分配的索引节点：空文件，没有链接
    #[inline]
    pub fn new(ino: Ino, file_type: FileType) -> Self {
        Self {
            ino,
            file_type,
            size: 0,
            links_count: 0,
            direct: [Bid::NULL; DIRECT_BLOCKS],
            singly: Bid::NULL,
            doubly: Bid::NULL,
            triply: Bid::NULL,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn encode(&self, buf: &mut [u8; INODE_SIZE]) {
        buf.fill(0);
        put_u16(buf, Field::Mode.offset(), self.file_type.mode());
        put_u16(buf, Field::LinksCount.offset(), self.links_count);
        put_u64(buf, Field::Size.offset(), self.size);
        for (i, bid) in self.direct.iter().enumerate() {
            put_u64(buf, Field::Direct.offset() + i * POINTER_SIZE, bid.get());
        }
        put_u64(buf, Field::Singly.offset(), self.singly.get());
        put_u64(buf, Field::Doubly.offset(), self.doubly.get());
        put_u64(buf, Field::Triply.offset(), self.triply.get());
    }

    /// 未使用的记录以 [`ErrorKind::NotFound`] 失败，
    /// 无法识别的类型位以 [`ErrorKind::InvalidFileType`] 失败
    pub fn decode(ino: Ino, buf: &[u8; INODE_SIZE]) -> Result<Self> {
        let mode = get_u16(buf, Field::Mode.offset());
        if mode == 0 {
            return Err(ErrorKind::NotFound.into());
        }
        let file_type =
            FileType::from_mode(mode).ok_or(ErrorKind::InvalidFileType { raw: mode })?;

        let mut direct = [Bid::NULL; DIRECT_BLOCKS];
        for (i, bid) in direct.iter_mut().enumerate() {
            *bid = get_u64(buf, Field::Direct.offset() + i * POINTER_SIZE).into();
        }

        Ok(Self {
            ino,
            file_type,
            size: get_u64(buf, Field::Size.offset()),
            links_count: get_u16(buf, Field::LinksCount.offset()),
            direct,
            singly: get_u64(buf, Field::Singly.offset()).into(),
            doubly: get_u64(buf, Field::Doubly.offset()).into(),
            triply: get_u64(buf, Field::Triply.offset()).into(),
        })
    }
}
