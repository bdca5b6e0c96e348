//! # 空间分配层
//!
//! 同一套位图原语的两个视图：块空间与索引节点空间。
//! 位图由自旋锁保护，可在多处同时分配、释放；
//! 只有被改动过的位图才会在刷新时写回卷。

use core::marker::PhantomData;

use log::{trace, warn};
use spin::Mutex;
use volume::Volume;

use crate::error::{Result, ResultExt};
use crate::layout::Bitmap;
use crate::{Bid, Ino};

/// 分配器特质
pub trait Allocator {
    type Id: Copy;

    /// 首次适配地分配一个编号，空间用尽时返回空
    fn alloc(&self) -> Option<Self::Id>;
    /// 归还编号，调用者负责不重复释放
    fn free(&self, id: Self::Id);
    /// 直接占用编号
    fn reserve(&self, id: Self::Id);
}

/// 能与位图中的位一一对应的编号
pub trait BitmapId: Copy {
    /// 第 0 位对应的编号
    const BASE: u64;

    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;

    /// 对应的位；小于 `BASE` 的编号落到范围之外
    #[inline]
    fn bit(self) -> u64 {
        self.raw().checked_sub(Self::BASE).unwrap_or(u64::MAX)
    }
}

impl BitmapId for Bid {
    // 块 0 属于元数据区域，格式化时即被占用
    const BASE: u64 = 0;

    #[inline]
    fn from_raw(raw: u64) -> Self {
        Self::new(raw)
    }

    #[inline]
    fn raw(self) -> u64 {
        self.get()
    }
}

impl BitmapId for Ino {
    const BASE: u64 = 1;

    #[inline]
    fn from_raw(raw: u64) -> Self {
        Self::new(raw)
    }

    #[inline]
    fn raw(self) -> u64 {
        self.get()
    }
}

#[derive(Debug)]
struct Inner {
    bitmap: Bitmap,
    dirty: bool,
}

/// 可刷新的位图：带锁与脏标记，记得自己在卷上的位置
#[derive(Debug)]
pub struct FlushableBitmap {
    inner: Mutex<Inner>,
    /// 位图在卷上的字节偏移
    offset: u64,
}

impl FlushableBitmap {
    #[inline]
    pub fn new(bitmap: Bitmap, offset: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bitmap,
                dirty: false,
            }),
            offset,
        }
    }

    pub fn alloc(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        let bit = inner.bitmap.alloc()?;
        inner.dirty = true;
        Some(bit)
    }

    /// 超出范围的位被忽略
    pub fn free(&self, bit: u64) {
        let mut inner = self.inner.lock();
        if inner.bitmap.free(bit) {
            inner.dirty = true;
        } else {
            warn!("ignoring free of bit {bit} beyond bitmap at {:#x}", self.offset);
        }
    }

    pub fn reserve(&self, bit: u64) {
        let mut inner = self.inner.lock();
        if inner.bitmap.reserve(bit) {
            inner.dirty = true;
        } else {
            warn!("ignoring reserve of bit {bit} beyond bitmap at {:#x}", self.offset);
        }
    }

    #[inline]
    pub fn is_set(&self, bit: u64) -> bool {
        self.inner.lock().bitmap.is_set(bit)
    }

    #[inline]
    pub fn free_count(&self) -> u64 {
        self.inner.lock().bitmap.free_count()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// 脏时把位图写回卷
    pub fn flush<V: Volume + ?Sized>(&self, volume: &V) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }

        trace!("flushing bitmap at {:#x}", self.offset);
        volume
            .write_at(self.offset, inner.bitmap.as_bytes())
            .with_context(|| alloc::format!("flushing bitmap at {:#x}", self.offset))?;
        inner.dirty = false;
        Ok(())
    }
}

/// 位图之上的编号分配器
#[derive(Debug)]
pub struct IdAllocator<I> {
    bitmap: FlushableBitmap,
    _id: PhantomData<fn() -> I>,
}

pub type BlockAllocator = IdAllocator<Bid>;
pub type InoAllocator = IdAllocator<Ino>;

impl<I: BitmapId> IdAllocator<I> {
    #[inline]
    pub fn new(bitmap: FlushableBitmap) -> Self {
        Self {
            bitmap,
            _id: PhantomData,
        }
    }

    #[inline]
    pub fn bitmap(&self) -> &FlushableBitmap {
        &self.bitmap
    }

    #[inline]
    pub fn is_allocated(&self, id: I) -> bool {
        self.bitmap.is_set(id.bit())
    }

    #[inline]
    pub fn free_count(&self) -> u64 {
        self.bitmap.free_count()
    }

    #[inline]
    pub fn flush<V: Volume + ?Sized>(&self, volume: &V) -> Result<()> {
        self.bitmap.flush(volume)
    }
}

impl<I: BitmapId> Allocator for IdAllocator<I> {
    type Id = I;

    #[inline]
    fn alloc(&self) -> Option<I> {
        self.bitmap.alloc().map(|bit| I::from_raw(bit + I::BASE))
    }

    #[inline]
    fn free(&self, id: I) {
        self.bitmap.free(id.bit())
    }

    #[inline]
    fn reserve(&self, id: I) {
        self.bitmap.reserve(id.bit())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use volume::MemVolume;

    use super::*;

    /// 记录写入次数的卷
    struct CountingVolume {
        inner: MemVolume,
        writes: AtomicUsize,
    }

    impl Volume for CountingVolume {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> volume::Result<()> {
            self.inner.read_at(offset, buf)
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> volume::Result<()> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.write_at(offset, buf)
        }
    }

    #[test]
    fn ino_base() {
        let inos = InoAllocator::new(FlushableBitmap::new(Bitmap::new(4), 0));
        inos.reserve(Ino::ROOT);
        assert_eq!(Some(Ino::new(1)), inos.alloc());
        assert_eq!(Some(Ino::new(3)), inos.alloc());
        assert_eq!(Some(Ino::new(4)), inos.alloc());
        assert_eq!(None, inos.alloc());

        inos.free(Ino::new(3));
        assert!(!inos.is_allocated(Ino::new(3)));
        assert_eq!(Some(Ino::new(3)), inos.alloc());
    }

    #[test]
    fn ids_outside_bitmap() {
        let volume = MemVolume::new(64);
        let inos = InoAllocator::new(FlushableBitmap::new(Bitmap::new(4), 0));
        inos.free(Ino::NULL);
        inos.free(Ino::new(5));
        inos.reserve(Ino::new(1000));
        assert!(!inos.is_allocated(Ino::NULL));
        assert_eq!(4, inos.free_count());
        assert!(!inos.bitmap().is_dirty());
        inos.flush(&volume).unwrap();

        let blocks = BlockAllocator::new(FlushableBitmap::new(Bitmap::new(8), 0));
        blocks.free(Bid::new(10_000));
        assert_eq!(8, blocks.free_count());
    }

    #[test]
    fn block_base() {
        let blocks = BlockAllocator::new(FlushableBitmap::new(Bitmap::new(16), 0));
        for bid in 0..4 {
            blocks.reserve(Bid::new(bid));
        }
        assert_eq!(Some(Bid::new(4)), blocks.alloc());
        assert_eq!(11, blocks.free_count());
    }

    #[test]
    fn flush_only_when_dirty() {
        let volume = CountingVolume {
            inner: MemVolume::new(64),
            writes: AtomicUsize::new(0),
        };
        let blocks = BlockAllocator::new(FlushableBitmap::new(Bitmap::new(16), 10));

        blocks.flush(&volume).unwrap();
        assert_eq!(0, volume.writes.load(Ordering::Relaxed));

        blocks.alloc().unwrap();
        blocks.alloc().unwrap();
        assert!(blocks.bitmap().is_dirty());
        blocks.flush(&volume).unwrap();
        blocks.flush(&volume).unwrap();
        assert_eq!(1, volume.writes.load(Ordering::Relaxed));
        assert!(!blocks.bitmap().is_dirty());

        let mut raw = [0; 2];
        volume.read_at(10, &mut raw).unwrap();
        assert_eq!([0b11, 0], raw);
    }

    #[test]
    fn exhausted_alloc_stays_clean() {
        let blocks = BlockAllocator::new(FlushableBitmap::new(Bitmap::new(1), 0));
        blocks.alloc().unwrap();
        blocks.flush(&MemVolume::new(1)).unwrap();
        assert_eq!(None, blocks.alloc());
        assert!(!blocks.bitmap().is_dirty());
    }

    #[test]
    fn concurrent_alloc() {
        let blocks = BlockAllocator::new(FlushableBitmap::new(Bitmap::new(4000), 0));

        let ids: Vec<Bid> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..1000).map(|_| blocks.alloc().unwrap()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(4000, ids.iter().collect::<HashSet<_>>().len());
        assert_eq!(None, blocks.alloc());
    }
}
