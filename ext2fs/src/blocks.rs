//! # 块访问层
//!
//! 把块编号与块内偏移翻译为卷上的字节偏移；
//! 间接块被视为连续存放的小端 8 字节块编号。
//!
//! 越过文件系统末尾的块编号以 [`ErrorKind::InvalidBlock`] 失败；
//! 取自磁盘的编号是否落在数据块区域，由 [`Blocks::is_data_block`] 判断。

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use volume::Volume;

use crate::error::{ErrorKind, Result, ResultExt};
use crate::layout::SuperBlock;
use crate::{Bid, POINTER_SIZE};

/// 按块访问的卷视图
pub struct Blocks<'v, V: ?Sized> {
    volume: &'v V,
    block_size: u64,
    first_data_block: u64,
    blocks_count: u64,
}

impl<V: ?Sized> Clone for Blocks<'_, V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: ?Sized> Copy for Blocks<'_, V> {}

impl<'v, V: Volume + ?Sized> Blocks<'v, V> {
    /// 没有元数据区域、块数只受字节偏移范围限制的视图
    #[inline]
    pub fn new(volume: &'v V, block_size: u64) -> Self {
        Self {
            volume,
            block_size,
            first_data_block: 1,
            blocks_count: u64::MAX / block_size,
        }
    }

    #[inline]
    pub fn from_super_block(volume: &'v V, super_block: &SuperBlock) -> Self {
        Self::new(volume, super_block.block_size)
            .data_area(super_block.first_data_block, super_block.blocks_count)
    }

    /// 数据块区域为 `[first_data_block, blocks_count)`
    #[inline]
    pub fn data_area(self, first_data_block: u64, blocks_count: u64) -> Self {
        Self {
            first_data_block,
            blocks_count,
            ..self
        }
    }

    #[inline]
    pub fn is_data_block(&self, bid: Bid) -> bool {
        (self.first_data_block..self.blocks_count).contains(&bid.get())
    }

    #[inline]
    pub fn volume(&self) -> &'v V {
        self.volume
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// 一个间接块能容纳的块编号个数
    #[inline]
    pub fn pointers_per_block(&self) -> u64 {
        self.block_size / POINTER_SIZE as u64
    }

    /// 块 `bid` 中偏移 `offset` 处在卷上的字节偏移
    fn position(&self, bid: Bid, offset: u64) -> Result<u64> {
        debug_assert!(offset <= self.block_size);
        if bid.get() >= self.blocks_count {
            return Err(ErrorKind::InvalidBlock { bid }.into());
        }
        bid.get()
            .checked_mul(self.block_size)
            .and_then(|start| start.checked_add(offset))
            .ok_or_else(|| ErrorKind::InvalidBlock { bid }.into())
    }

    pub fn read(&self, bid: Bid, offset: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert!(offset + buf.len() as u64 <= self.block_size);
        let len = buf.len();
        self.position(bid, offset)
            .and_then(|position| Ok(self.volume.read_at(position, buf)?))
            .with_context(|| format!("reading {len} bytes of block {bid} at {offset}"))
    }

    pub fn write(&self, bid: Bid, offset: u64, buf: &[u8]) -> Result<()> {
        debug_assert!(offset + buf.len() as u64 <= self.block_size);
        self.position(bid, offset)
            .and_then(|position| Ok(self.volume.write_at(position, buf)?))
            .with_context(|| format!("writing {} bytes of block {bid} at {offset}", buf.len()))
    }

    /// 整块清零
    pub fn zero(&self, bid: Bid) -> Result<()> {
        self.write(bid, 0, &vec![0; self.block_size as usize])
    }

    /// 读出间接块中的第 `index` 个块编号
    pub fn read_pointer(&self, bid: Bid, index: u64) -> Result<Bid> {
        let mut raw = [0; POINTER_SIZE];
        self.read(bid, index * POINTER_SIZE as u64, &mut raw)?;
        Ok(u64::from_le_bytes(raw).into())
    }

    pub fn write_pointer(&self, bid: Bid, index: u64, pointer: Bid) -> Result<()> {
        self.write(bid, index * POINTER_SIZE as u64, &pointer.get().to_le_bytes())
    }

    /// 读出整个间接块
    pub fn read_pointers(&self, bid: Bid) -> Result<Vec<Bid>> {
        let mut raw = vec![0; self.block_size as usize];
        self.read(bid, 0, &mut raw)?;
        Ok(raw
            .chunks_exact(POINTER_SIZE)
            .map(|chunk| {
                let mut pointer = [0; POINTER_SIZE];
                pointer.copy_from_slice(chunk);
                u64::from_le_bytes(pointer).into()
            })
            .collect())
    }
}
