//! # 索引节点存储层
//!
//! [`VolumeInodeStore`] 直接读写卷上的索引节点表；
//! [`CachingInodeStore`] 在其之上加一层 LRU 缓存与脏集合，
//! 被淘汰或被刷新的脏索引节点才会写回后端。
//!
//! 缓存没有内部同步，调用者需保证同一时刻只有一个使用者。

use alloc::format;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

use hashbrown::HashSet;
use log::trace;
use volume::Volume;

use crate::error::{ErrorKind, Result, ResultExt};
use crate::{INODE_SIZE, Ino, Inode, InodeCache};

/// 按编号存取索引节点
pub trait InodeStore {
    fn get(&mut self, ino: Ino) -> Result<Inode>;
    fn put(&mut self, inode: &Inode) -> Result<()>;
    /// 确保索引节点已落到持久存储
    fn flush(&mut self, ino: Ino) -> Result<()>;
    /// 抹去索引节点，之后的 `get` 以 [`ErrorKind::NotFound`] 失败
    fn erase(&mut self, ino: Ino) -> Result<()>;
}

/// 卷上的索引节点表，第 `ino` 个记录位于 `table_offset + (ino - 1) * INODE_SIZE`
pub struct VolumeInodeStore<'v, V: ?Sized> {
    volume: &'v V,
    table_offset: u64,
    inodes_count: u64,
}

impl<'v, V: Volume + ?Sized> VolumeInodeStore<'v, V> {
    #[inline]
    pub fn new(volume: &'v V, table_offset: u64, inodes_count: u64) -> Self {
        Self {
            volume,
            table_offset,
            inodes_count,
        }
    }

    fn offset(&self, ino: Ino) -> Result<u64> {
        if ino.is_null() || ino.get() > self.inodes_count {
            return Err(ErrorKind::NotFound.into());
        }
        Ok(self.table_offset + (ino.get() - 1) * INODE_SIZE as u64)
    }
}

impl<V: Volume + ?Sized> InodeStore for VolumeInodeStore<'_, V> {
    fn get(&mut self, ino: Ino) -> Result<Inode> {
        let mut buf = [0; INODE_SIZE];
        self.offset(ino)
            .and_then(|offset| Ok(self.volume.read_at(offset, &mut buf)?))
            .and_then(|()| Inode::decode(ino, &buf))
            .with_context(|| format!("loading inode {ino}"))
    }

    fn put(&mut self, inode: &Inode) -> Result<()> {
        let mut buf = [0; INODE_SIZE];
        inode.encode(&mut buf);
        self.offset(inode.ino)
            .and_then(|offset| Ok(self.volume.write_at(offset, &buf)?))
            .with_context(|| format!("storing inode {}", inode.ino))
    }

    #[inline]
    fn flush(&mut self, _ino: Ino) -> Result<()> {
        Ok(())
    }

    fn erase(&mut self, ino: Ino) -> Result<()> {
        self.offset(ino)
            .and_then(|offset| Ok(self.volume.write_at(offset, &[0; INODE_SIZE])?))
            .with_context(|| format!("erasing inode {ino}"))
    }
}

/// 带写回的缓存索引节点存储
pub struct CachingInodeStore<S> {
    backend: S,
    cache: InodeCache,
    /// 自上次写回后被改动过的索引节点
    dirty: HashSet<Ino>,
}

impl<S: InodeStore> CachingInodeStore<S> {
    pub fn new(backend: S, capacity: NonZeroUsize) -> Self {
        Self {
            backend,
            cache: InodeCache::new(capacity),
            dirty: HashSet::new(),
        }
    }

    #[inline]
    pub fn backend(&self) -> &S {
        &self.backend
    }

    #[inline]
    pub fn cache(&self) -> &InodeCache {
        &self.cache
    }

    #[inline]
    pub fn is_dirty(&self, ino: Ino) -> bool {
        self.dirty.contains(&ino)
    }

    /// 把所有脏索引节点写回后端，缓存保持不变
    pub fn sync_all(&mut self) -> Result<()> {
        let mut dirty: Vec<Ino> = self.dirty.iter().copied().collect();
        dirty.sort_unstable();
        for ino in dirty {
            if let Some(inode) = self.cache.peek(ino) {
                self.backend.put(inode)?;
            }
            self.dirty.remove(&ino);
        }
        Ok(())
    }

    /// 为 `ino` 腾出位置：缓存已满时先写回将被淘汰的脏索引节点
    ///
    /// 先写回再淘汰，写回失败时缓存保持原样。
    fn make_room(&mut self, ino: Ino) -> Result<()> {
        if self.cache.contains(ino) || !self.cache.is_full() {
            return Ok(());
        }
        let Some(&victim) = self.cache.peek_lru() else {
            return Ok(());
        };
        if self.dirty.contains(&victim.ino) {
            trace!("writing back inode {} before eviction", victim.ino);
            self.backend
                .put(&victim)
                .with_context(|| format!("evicting inode {}", victim.ino))?;
            self.dirty.remove(&victim.ino);
        }
        Ok(())
    }
}

impl<S: InodeStore> InodeStore for CachingInodeStore<S> {
    fn get(&mut self, ino: Ino) -> Result<Inode> {
        if let Some(inode) = self.cache.get(ino) {
            return Ok(*inode);
        }

        let inode = self.backend.get(ino)?;
        self.make_room(ino)?;
        self.cache.push(inode);
        Ok(inode)
    }

    fn put(&mut self, inode: &Inode) -> Result<()> {
        self.make_room(inode.ino)?;
        self.cache.push(*inode);
        self.dirty.insert(inode.ino);
        Ok(())
    }

    fn flush(&mut self, ino: Ino) -> Result<()> {
        let Some(inode) = self.cache.remove(ino) else {
            return Ok(());
        };
        if self.dirty.contains(&ino) {
            if let Err(err) = self.backend.put(&inode) {
                // 写回失败时放回缓存，脏标记保留
                self.cache.push(inode);
                return Err(err.with_context(format!("flushing inode {ino}")));
            }
            self.dirty.remove(&ino);
        }
        self.backend.flush(ino)
    }

    fn erase(&mut self, ino: Ino) -> Result<()> {
        self.cache.remove(ino);
        self.dirty.remove(&ino);
        self.backend.erase(ino)
    }
}

#[cfg(test)]
mod tests {
    use volume::MemVolume;

    use super::*;
    use crate::tests::MapStore;
    use crate::{Bid, FileType};

    fn inode(ino: u64, size: u64) -> Inode {
        let mut inode = Inode::new(Ino::new(ino), FileType::Regular);
        inode.size = size;
        inode
    }

    fn store(capacity: usize) -> CachingInodeStore<MapStore> {
        CachingInodeStore::new(MapStore::default(), NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn put_is_deferred() {
        let mut store = store(4);
        store.put(&inode(1, 10)).unwrap();
        assert!(store.is_dirty(Ino::new(1)));
        assert!(store.backend().puts.is_empty());

        // 读到的是缓存中的新值
        assert_eq!(10, store.get(Ino::new(1)).unwrap().size);
        assert!(store.backend().gets.is_empty());
    }

    #[test]
    fn eviction_writes_back_dirty() {
        let mut store = store(2);
        store.put(&inode(1, 1)).unwrap();
        store.put(&inode(2, 2)).unwrap();
        store.put(&inode(3, 3)).unwrap();

        assert_eq!(vec![Ino::new(1)], store.backend().puts);
        assert!(!store.is_dirty(Ino::new(1)));
        assert!(!store.cache().contains(Ino::new(1)));

        // 被淘汰的索引节点从后端重新载入，并把 2 挤出去
        assert_eq!(1, store.get(Ino::new(1)).unwrap().size);
        assert_eq!(vec![Ino::new(1)], store.backend().gets);
        assert_eq!(vec![Ino::new(1), Ino::new(2)], store.backend().puts);
    }

    #[test]
    fn eviction_of_clean_entry_skips_write() {
        let mut store = store(1);
        store.backend.inodes.insert(Ino::new(1), inode(1, 1));
        store.backend.inodes.insert(Ino::new(2), inode(2, 2));

        store.get(Ino::new(1)).unwrap();
        store.get(Ino::new(2)).unwrap();
        assert!(store.backend().puts.is_empty());
        assert!(store.cache().contains(Ino::new(2)));
    }

    #[test]
    fn flush() {
        let mut store = store(4);
        store.put(&inode(1, 5)).unwrap();
        store.flush(Ino::new(1)).unwrap();
        assert_eq!(vec![Ino::new(1)], store.backend().puts);
        assert!(!store.cache().contains(Ino::new(1)));
        assert!(!store.is_dirty(Ino::new(1)));

        // 不在缓存中时什么也不做
        store.flush(Ino::new(1)).unwrap();
        store.flush(Ino::new(9)).unwrap();
        assert_eq!(1, store.backend().puts.len());

        // 干净的索引节点只移出缓存
        store.get(Ino::new(1)).unwrap();
        store.flush(Ino::new(1)).unwrap();
        assert_eq!(1, store.backend().puts.len());
        assert!(store.cache().is_empty());
    }

    #[test]
    fn sync_all_keeps_cache() {
        let mut store = store(4);
        store.put(&inode(2, 2)).unwrap();
        store.put(&inode(1, 1)).unwrap();
        store.sync_all().unwrap();

        assert_eq!(vec![Ino::new(1), Ino::new(2)], store.backend().puts);
        assert_eq!(2, store.cache().len());
        assert!(!store.is_dirty(Ino::new(1)));
    }

    #[test]
    fn missing_inode() {
        let mut store = store(2);
        let err = store.get(Ino::new(3)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound));
        assert!(store.cache().is_empty());
    }

    #[test]
    fn volume_table() {
        let volume = MemVolume::new(4096);
        let mut store = VolumeInodeStore::new(&volume, 1024, 8);

        let mut dir = Inode::new(Ino::new(3), FileType::Directory);
        dir.direct[0] = Bid::new(12);
        dir.links_count = 2;
        store.put(&dir).unwrap();
        assert_eq!(dir, store.get(Ino::new(3)).unwrap());

        let mut raw = [0; 2];
        volume.read_at(1024 + 2 * INODE_SIZE as u64, &mut raw).unwrap();
        assert_eq!(FileType::Directory.mode(), u16::from_le_bytes(raw));

        for ino in [0, 9] {
            let err = store.get(Ino::new(ino)).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::NotFound));
        }

        store.erase(Ino::new(3)).unwrap();
        let err = store.get(Ino::new(3)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound));
    }

    #[test]
    fn caching_over_volume() {
        let volume = MemVolume::new(4096);
        let backend = VolumeInodeStore::new(&volume, 0, 16);
        let mut store = CachingInodeStore::new(backend, NonZeroUsize::new(2).unwrap());

        for ino in 1..=3 {
            store.put(&inode(ino, ino * 100)).unwrap();
        }
        // 1 已被写回卷
        let mut fresh = VolumeInodeStore::new(&volume, 0, 16);
        assert_eq!(100, fresh.get(Ino::new(1)).unwrap().size);
        assert!(fresh.get(Ino::new(3)).is_err());

        store.sync_all().unwrap();
        assert_eq!(300, fresh.get(Ino::new(3)).unwrap().size);
    }
}
