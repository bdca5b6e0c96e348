//! 单元测试共用的替身

use std::cell::Cell;
use std::collections::HashMap;

use volume::MemVolume;

use crate::layout::Bitmap;
use crate::{Allocator, BlockAllocator, Blocks, ErrorKind, FlushableBitmap, Ino, Inode, InodeIo};
use crate::{InodeStore, Result};

/// `blocks` 个块的分配器，前 `reserved` 个块已被占用
pub fn block_allocator(blocks: u64, reserved: u64) -> BlockAllocator {
    let mut bitmap = Bitmap::new(blocks);
    for bit in 0..reserved {
        bitmap.reserve(bit);
    }
    BlockAllocator::new(FlushableBitmap::new(bitmap, 0))
}

/// 统计分配次数的分配器
pub struct Counting<A> {
    inner: A,
    allocs: Cell<usize>,
}

impl<A> Counting<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            allocs: Cell::new(0),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn allocs(&self) -> usize {
        self.allocs.get()
    }
}

impl<A: Allocator> Allocator for Counting<A> {
    type Id = A::Id;

    fn alloc(&self) -> Option<A::Id> {
        self.allocs.set(self.allocs.get() + 1);
        self.inner.alloc()
    }

    fn free(&self, id: A::Id) {
        self.inner.free(id)
    }

    fn reserve(&self, id: A::Id) {
        self.inner.reserve(id)
    }
}

/// 记录每次存取的内存后端
#[derive(Default)]
pub struct MapStore {
    pub inodes: HashMap<Ino, Inode>,
    pub puts: Vec<Ino>,
    pub gets: Vec<Ino>,
}

impl InodeStore for MapStore {
    fn get(&mut self, ino: Ino) -> Result<Inode> {
        self.gets.push(ino);
        self.inodes
            .get(&ino)
            .copied()
            .ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn put(&mut self, inode: &Inode) -> Result<()> {
        self.puts.push(inode.ino);
        self.inodes.insert(inode.ino, *inode);
        Ok(())
    }

    fn flush(&mut self, _ino: Ino) -> Result<()> {
        Ok(())
    }

    fn erase(&mut self, ino: Ino) -> Result<()> {
        self.inodes.remove(&ino);
        Ok(())
    }
}

/// 内存卷、计数分配器与 [`MapStore`] 组成的一套环境，块 0 已被占用
pub struct Fixture {
    pub volume: MemVolume,
    pub allocator: Counting<BlockAllocator>,
    pub store: MapStore,
    block_size: u64,
    blocks_count: u64,
}

impl Fixture {
    pub fn new(block_size: u64, blocks: u64) -> Self {
        Self {
            volume: MemVolume::new((blocks * block_size) as usize),
            allocator: Counting::new(block_allocator(blocks, 1)),
            store: MapStore::default(),
            block_size,
            blocks_count: blocks,
        }
    }

    /// 数据区为块 `[1, blocks)`
    pub fn blocks(&self) -> Blocks<'_, MemVolume> {
        Blocks::new(&self.volume, self.block_size).data_area(1, self.blocks_count)
    }

    pub fn io(&mut self) -> InodeIo<'_, MemVolume> {
        InodeIo {
            blocks: Blocks::new(&self.volume, self.block_size).data_area(1, self.blocks_count),
            allocator: &self.allocator,
            store: &mut self.store,
        }
    }
}
