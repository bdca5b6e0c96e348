//! # 数据读写层
//!
//! 把任意字节区间拆成按块对齐的片段，每一片经间接索引层定位到物理块。
//! 读时空洞视为全零；写时缺失的块按需分配。

use alloc::format;

use thiserror::Error;
use volume::Volume;

use crate::error::{Error, Result, ResultExt};
use crate::{Allocator, Bid, Blocks, Ino, Inode, InodeStore, indirect};

/// 写到一半失败：`written` 字节已落盘，其后的部分没有写入
#[derive(Debug, Error)]
#[error("wrote {written} bytes before failing")]
pub struct PartialWrite {
    pub written: usize,
    #[source]
    pub error: Error,
}

impl From<PartialWrite> for Error {
    #[inline]
    fn from(partial: PartialWrite) -> Self {
        partial.error
    }
}

/// 改动索引节点数据所需的全部协作者
pub struct InodeIo<'a, V: ?Sized> {
    pub blocks: Blocks<'a, V>,
    pub allocator: &'a dyn Allocator<Id = Bid>,
    pub store: &'a mut dyn InodeStore,
}

/// 从 `offset` 处读出数据填充 `buf`，返回读到的字节数
///
/// 长度被截断到文件末尾；从未写过的块读出全零，且不会分配任何块。
pub fn read<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    inode: &Inode,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if offset >= inode.size {
        return Ok(0);
    }
    let end = offset.saturating_add(buf.len() as u64).min(inode.size);
    let block_size = blocks.block_size();

    let mut start = offset;
    let mut read = 0;
    while start < end {
        let index = start / block_size;
        let in_block = start % block_size;
        let len = (block_size - in_block).min(end - start) as usize;
        let dest = &mut buf[read..read + len];

        match indirect::resolve(blocks, inode, index)? {
            Some(bid) => blocks
                .read(bid, in_block, dest)
                .with_context(|| format!("reading inode {} at {start}", inode.ino))?,
            None => dest.fill(0),
        }

        read += len;
        start += len as u64;
    }

    Ok(read)
}

impl<V: Volume + ?Sized> InodeIo<'_, V> {
    #[inline]
    pub fn get(&mut self, ino: Ino) -> Result<Inode> {
        self.store.get(ino)
    }

    #[inline]
    pub fn put(&mut self, inode: &Inode) -> Result<()> {
        self.store.put(inode)
    }

    #[inline]
    pub fn read(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        read(&self.blocks, inode, offset, buf)
    }

    /// 把 `buf` 写到 `offset` 处，返回写入的字节数
    ///
    /// 全部写完后，若超出原大小则更新并存回索引节点。
    /// 中途失败时返回 [`PartialWrite`]，大小保持不变。
    pub fn write(
        &mut self,
        inode: &mut Inode,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize, PartialWrite> {
        let block_size = self.blocks.block_size();

        let mut written = 0;
        while written < buf.len() {
            let start = offset + written as u64;
            let index = start / block_size;
            let in_block = start % block_size;
            let len = ((block_size - in_block) as usize).min(buf.len() - written);

            let result = indirect::resolve_or_alloc(
                &self.blocks,
                self.allocator,
                &mut *self.store,
                inode,
                index,
            )
            .and_then(|bid| self.blocks.write(bid, in_block, &buf[written..written + len]));
            if let Err(error) = result {
                return Err(PartialWrite {
                    written,
                    error: error.with_context(format!("writing inode {} at {start}", inode.ino)),
                });
            }

            written += len;
        }

        let end = offset + written as u64;
        if end > inode.size {
            inode.size = end;
            self.store
                .put(inode)
                .map_err(|error| PartialWrite { written, error })?;
        }

        Ok(written)
    }

    /// 释放索引节点的全部块并存回，返回释放的块数
    pub fn release(&mut self, inode: &mut Inode) -> Result<u64> {
        let freed = indirect::release(&self.blocks, self.allocator, inode)
            .with_context(|| format!("releasing blocks of inode {}", inode.ino))?;
        self.store.put(inode)?;
        Ok(freed)
    }
}
