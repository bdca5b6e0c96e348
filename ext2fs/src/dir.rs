//! # 目录层
//!
//! 目录的数据就是一串从偏移 0 开始、首尾相接的目录项。
//! 目录项可以跨过块边界，但它的 `rec_len` 至多延伸到紧凑部分所在块的末尾；
//! 目录的大小是最后一个目录项紧凑存放时的末尾。
//!
//! 删除只把编号清零留下墓碑，`rec_len` 不变，留给之后的插入复用。

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use volume::Volume;

use crate::data::{self, InodeIo};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::layout::{DIR_ENTRY_HEADER_SIZE, RecordHeader, record_len};
use crate::{Blocks, FileType, Ino, Inode, NAME_MAX_LEN};

/// 目录中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: Ino,
    pub file_type: FileType,
    pub name: String,
}

/// 磁盘上的一个目录项，可能是墓碑
struct Record {
    offset: u64,
    header: RecordHeader,
    name: Vec<u8>,
}

impl Record {
    #[inline]
    fn is_tombstone(&self) -> bool {
        self.header.ino.is_null()
    }

    fn into_entry(self) -> Result<DirEntry> {
        let code = self.header.file_type;
        let file_type =
            FileType::from_code(code).ok_or(ErrorKind::InvalidFileType { raw: code as u16 })?;
        let name = String::from_utf8(self.name)
            .map_err(|_| ErrorKind::CorruptDirectoryRecord { offset: self.offset })?;

        Ok(DirEntry {
            ino: self.header.ino,
            file_type,
            name,
        })
    }
}

/// 目录项的惰性遍历，只能向前、不能重来，跳过墓碑
pub struct ReadDir<'v, V: ?Sized> {
    blocks: Blocks<'v, V>,
    dir: Inode,
    cursor: u64,
}

impl<'v, V: Volume + ?Sized> ReadDir<'v, V> {
    /// `dir` 不是目录时返回 [`ErrorKind::NotADirectory`]
    pub fn new(blocks: Blocks<'v, V>, dir: &Inode) -> Result<Self> {
        ensure_dir(dir)?;
        Ok(Self {
            blocks,
            dir: *dir,
            cursor: 0,
        })
    }

    pub fn read_next(&mut self) -> Result<Option<DirEntry>> {
        while let Some(record) = self.next_record()? {
            if !record.is_tombstone() {
                return record.into_entry().map(Some);
            }
        }
        Ok(None)
    }

    /// 包括墓碑在内的下一个目录项；出错后遍历即结束
    fn next_record(&mut self) -> Result<Option<Record>> {
        if self.cursor >= self.dir.size {
            return Ok(None);
        }

        let offset = self.cursor;
        match self.decode_at(offset) {
            Ok(record) => {
                self.cursor += record.header.rec_len as u64;
                Ok(Some(record))
            }
            Err(err) => {
                self.cursor = self.dir.size;
                Err(err.with_context(format!("reading directory {} at {offset}", self.dir.ino)))
            }
        }
    }

    fn decode_at(&self, offset: u64) -> Result<Record> {
        let corrupt = || Error::from(ErrorKind::CorruptDirectoryRecord { offset });

        let mut raw = [0; DIR_ENTRY_HEADER_SIZE];
        if data::read(&self.blocks, &self.dir, offset, &mut raw)? < raw.len() {
            return Err(corrupt());
        }
        let header = RecordHeader::decode(&raw);

        let block_size = self.blocks.block_size();
        let rec_len = header.rec_len as u64;
        let block_end = (offset + header.tight_len() as u64).next_multiple_of(block_size);
        if header.rec_len < header.tight_len() || offset + rec_len > block_end {
            return Err(corrupt());
        }

        let mut name = vec![0; header.name_len as usize];
        let name_offset = offset + DIR_ENTRY_HEADER_SIZE as u64;
        if data::read(&self.blocks, &self.dir, name_offset, &mut name)? < name.len() {
            return Err(corrupt());
        }

        Ok(Record {
            offset,
            header,
            name,
        })
    }
}

impl<V: Volume + ?Sized> Iterator for ReadDir<'_, V> {
    type Item = Result<DirEntry>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// 可作为目录项名字的字符串
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > NAME_MAX_LEN {
        return Err(ErrorKind::NameTooLong { len: name.len() }.into());
    }
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(ErrorKind::InvalidName.into());
    }
    Ok(())
}

#[inline]
fn ensure_dir(inode: &Inode) -> Result<()> {
    if !inode.is_dir() {
        let err = Error::from(ErrorKind::NotADirectory);
        return Err(err.with_context(format!("inode {}", inode.ino)));
    }
    Ok(())
}

/// 为空目录写入 `.`；有父目录时再写入 `..`
///
/// 根目录只有 `.`，其 `rec_len` 占满第一块；
/// 其余目录的 `.` 紧凑存放，`..` 占满第一块剩下的部分。
/// `.` 为目录自身增加一个链接，`..` 为父目录增加一个链接。
pub fn init<V: Volume + ?Sized>(
    io: &mut InodeIo<'_, V>,
    dir: &mut Inode,
    parent: Option<&mut Inode>,
) -> Result<()> {
    ensure_dir(dir)?;
    let ino = dir.ino;
    let block_size = io.blocks.block_size() as u16;
    let dot_len = record_len(1) as u16;

    let dot = RecordHeader {
        ino,
        rec_len: if parent.is_some() { dot_len } else { block_size },
        name_len: 1,
        file_type: FileType::Directory.code(),
    };
    let context = || format!("initializing directory {ino}");
    write_record(io, dir, 0, &dot, b".").with_context(context)?;
    dir.links_count += 1;

    if let Some(parent) = parent {
        let dot_dot = RecordHeader {
            ino: parent.ino,
            rec_len: block_size - dot_len,
            name_len: 2,
            file_type: FileType::Directory.code(),
        };
        write_record(io, dir, dot_len as u64, &dot_dot, b"..").with_context(context)?;
        parent.links_count += 1;
        io.put(parent)?;
    }

    io.put(dir)
}

/// 插入目录项时选中的位置
enum Slot {
    /// 整个复用一个墓碑
    Reuse { offset: u64, rec_len: u16 },
    /// 切出一个目录项尾部的空闲空间
    Split { offset: u64, tight: u16, rec_len: u16 },
}

/// 在 `dir` 中加入名为 `name`、指向 `child` 的目录项，并为 `child` 增加一个链接
///
/// 首次适配：第一个足够大的墓碑被整个复用，
/// 或者第一个尾部空闲足够的目录项被一分为二；
/// 都没有时紧接着最后一个目录项的紧凑部分追加，目录大小恰好增加新目录项的长度，
/// 最后一个目录项缩为紧凑，新目录项的 `rec_len` 延伸到所在块的末尾。
pub fn add<V: Volume + ?Sized>(
    io: &mut InodeIo<'_, V>,
    dir: &mut Inode,
    name: &str,
    child: &mut Inode,
) -> Result<()> {
    let ino = dir.ino;
    let context = || format!("adding {name:?} to directory {ino}");
    validate_name(name).with_context(context)?;

    let needed = record_len(name.len()) as u16;
    let mut slot = None;
    let mut last = None;
    let mut records = ReadDir::new(io.blocks, dir)?;
    while let Some(record) = records.next_record()? {
        let header = record.header;
        last = Some((record.offset, header));
        if record.is_tombstone() {
            if slot.is_none() && header.rec_len >= needed {
                slot = Some(Slot::Reuse {
                    offset: record.offset,
                    rec_len: header.rec_len,
                });
            }
        } else if record.name == name.as_bytes() {
            return Err(Error::from(ErrorKind::AlreadyExists).with_context(context()));
        } else if slot.is_none() && header.slack() >= needed {
            slot = Some(Slot::Split {
                offset: record.offset,
                tight: header.tight_len(),
                rec_len: header.rec_len,
            });
        }
    }

    let block_size = io.blocks.block_size();
    let (offset, rec_len) = match slot {
        Some(Slot::Reuse { offset, rec_len }) => (offset, rec_len),
        Some(Slot::Split {
            offset,
            tight,
            rec_len,
        }) => (offset + tight as u64, rec_len - tight),
        None => {
            let offset = match last {
                Some((offset, header)) => offset + header.tight_len() as u64,
                None => dir.size,
            };
            let end = (offset + needed as u64).next_multiple_of(block_size);
            (offset, (end - offset) as u16)
        }
    };

    let header = RecordHeader {
        ino: child.ino,
        rec_len,
        name_len: name.len() as u8,
        file_type: child.file_type.code(),
    };
    write_record(io, dir, offset, &header, name.as_bytes()).with_context(context)?;

    // 新目录项落盘后才缩短前一个目录项
    let shrink = match slot {
        Some(Slot::Split { offset, tight, .. }) => Some((offset, tight)),
        Some(Slot::Reuse { .. }) => None,
        None => last
            .filter(|(_, header)| header.slack() > 0)
            .map(|(offset, header)| (offset, header.tight_len())),
    };
    if let Some((offset, tight)) = shrink {
        let rec_len_offset = offset + RecordHeader::rec_len_offset() as u64;
        io.write(dir, rec_len_offset, &tight.to_le_bytes())?;
    }

    child.links_count += 1;
    io.put(child)?;

    debug!("directory {ino}: {name:?} -> inode {} at {offset}", child.ino);
    Ok(())
}

/// 把名为 `name` 的目录项变为墓碑并返回它，不改动任何链接数
pub fn remove<V: Volume + ?Sized>(
    io: &mut InodeIo<'_, V>,
    dir: &mut Inode,
    name: &str,
) -> Result<DirEntry> {
    let ino = dir.ino;
    let context = || format!("removing {name:?} from directory {ino}");
    validate_name(name).with_context(context)?;

    let Some((offset, entry)) = find(io.blocks, dir, name)? else {
        return Err(Error::from(ErrorKind::NotFound).with_context(context()));
    };
    io.write(dir, offset, &Ino::NULL.get().to_le_bytes())
        .map_err(Error::from)
        .with_context(context)?;

    debug!("directory {ino}: removed {name:?} at {offset}");
    Ok(entry)
}

pub fn lookup<V: Volume + ?Sized>(
    blocks: Blocks<'_, V>,
    dir: &Inode,
    name: &str,
) -> Result<Option<DirEntry>> {
    Ok(find(blocks, dir, name)?.map(|(_, entry)| entry))
}

/// 除了 `.` 和 `..` 再没有别的目录项
pub fn is_empty<V: Volume + ?Sized>(blocks: Blocks<'_, V>, dir: &Inode) -> Result<bool> {
    for entry in ReadDir::new(blocks, dir)? {
        let entry = entry?;
        if entry.name != "." && entry.name != ".." {
            return Ok(false);
        }
    }
    Ok(true)
}

fn find<V: Volume + ?Sized>(
    blocks: Blocks<'_, V>,
    dir: &Inode,
    name: &str,
) -> Result<Option<(u64, DirEntry)>> {
    let mut records = ReadDir::new(blocks, dir)?;
    while let Some(record) = records.next_record()? {
        if !record.is_tombstone() && record.name == name.as_bytes() {
            let offset = record.offset;
            return Ok(Some((offset, record.into_entry()?)));
        }
    }
    Ok(None)
}

/// 写入补齐到 4 字节的整个目录项
fn write_record<V: Volume + ?Sized>(
    io: &mut InodeIo<'_, V>,
    dir: &mut Inode,
    offset: u64,
    header: &RecordHeader,
    name: &[u8],
) -> Result<()> {
    io.write(dir, offset, &header.encode_with_name(name))?;
    Ok(())
}
