//! # 索引节点缓存
//!
//! 容量固定的 LRU 缓存。槽位预先分配在一个数组里，
//! 双向链表的前驱、后继都是槽位下标；链表头是最近使用的，链表尾是最久未用的。
//! 查找表把索引节点编号映射到槽位下标，各操作均摊 O(1)。
//!
//! 缓存本身只管排序与淘汰，写回由 [`CachingInodeStore`](crate::CachingInodeStore) 负责。

use alloc::vec::Vec;
use core::num::NonZeroUsize;

use hashbrown::HashMap;

use crate::{Ino, Inode};

#[derive(Debug)]
struct Slot {
    inode: Inode,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct InodeCache {
    slots: Vec<Slot>,
    /// 被移除后空出来的槽位
    vacant: Vec<usize>,
    lookup: HashMap<Ino, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl InodeCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            slots: Vec::with_capacity(capacity),
            vacant: Vec::new(),
            lookup: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    #[inline]
    pub fn contains(&self, ino: Ino) -> bool {
        self.lookup.contains_key(&ino)
    }

    /// 取出缓存的索引节点，并将其提到最近使用
    pub fn get(&mut self, ino: Ino) -> Option<&Inode> {
        let index = *self.lookup.get(&ino)?;
        self.unlink(index);
        self.push_front(index);
        Some(&self.slots[index].inode)
    }

    /// 取出缓存的索引节点，不改变次序
    #[inline]
    pub fn peek(&self, ino: Ino) -> Option<&Inode> {
        self.lookup.get(&ino).map(|&index| &self.slots[index].inode)
    }

    /// 下一个将被淘汰的索引节点
    #[inline]
    pub fn peek_lru(&self) -> Option<&Inode> {
        self.tail.map(|index| &self.slots[index].inode)
    }

    /// 插入或更新索引节点并提到最近使用；缓存已满时淘汰并返回最久未用的那个
    pub fn push(&mut self, inode: Inode) -> Option<Inode> {
        if let Some(&index) = self.lookup.get(&inode.ino) {
            self.slots[index].inode = inode;
            self.unlink(index);
            self.push_front(index);
            return None;
        }

        // 触及上限，复用链表尾的槽位
        if self.is_full() {
            let index = self.tail?;
            self.unlink(index);
            let evicted = core::mem::replace(&mut self.slots[index].inode, inode);
            self.lookup.remove(&evicted.ino);
            self.lookup.insert(inode.ino, index);
            self.push_front(index);
            return Some(evicted);
        }

        let index = match self.vacant.pop() {
            Some(index) => {
                self.slots[index].inode = inode;
                index
            }
            None => {
                self.slots.push(Slot {
                    inode,
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        };
        self.lookup.insert(inode.ino, index);
        self.push_front(index);
        None
    }

    pub fn remove(&mut self, ino: Ino) -> Option<Inode> {
        let index = self.lookup.remove(&ino)?;
        self.unlink(index);
        self.vacant.push(index);
        Some(self.slots[index].inode)
    }

    /// 从最近使用到最久未用遍历
    pub fn iter(&self) -> impl Iterator<Item = &Inode> {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let slot = &self.slots[cursor?];
            cursor = slot.next;
            Some(&slot.inode)
        })
    }
}

impl InodeCache {
    fn unlink(&mut self, index: usize) {
        let Slot { prev, next, .. } = self.slots[index];
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
    }

    fn push_front(&mut self, index: usize) {
        self.slots[index].next = self.head;
        self.slots[index].prev = None;
        match self.head {
            Some(head) => self.slots[head].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileType;

    fn inode(ino: u64) -> Inode {
        Inode::new(Ino::new(ino), FileType::Regular)
    }

    fn order(cache: &InodeCache) -> Vec<u64> {
        cache.iter().map(|inode| inode.ino.get()).collect()
    }

    fn cache(capacity: usize) -> InodeCache {
        InodeCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn evicts_least_recent() {
        let mut cache = cache(3);
        for ino in 1..=3 {
            assert_eq!(None, cache.push(inode(ino)));
        }
        assert_eq!(vec![3, 2, 1], order(&cache));
        assert_eq!(Some(Ino::new(1)), cache.peek_lru().map(|inode| inode.ino));

        let evicted = cache.push(inode(4)).unwrap();
        assert_eq!(Ino::new(1), evicted.ino);
        assert!(!cache.contains(Ino::new(1)));
        assert_eq!(vec![4, 3, 2], order(&cache));
        assert_eq!(3, cache.len());
    }

    #[test]
    fn get_protects() {
        let mut cache = cache(3);
        for ino in 1..=3 {
            cache.push(inode(ino));
        }
        assert!(cache.get(Ino::new(1)).is_some());

        let evicted = cache.push(inode(4)).unwrap();
        assert_eq!(Ino::new(2), evicted.ino);
        assert_eq!(vec![4, 1, 3], order(&cache));
    }

    #[test]
    fn update_in_place() {
        let mut cache = cache(2);
        cache.push(inode(1));
        cache.push(inode(2));

        let mut changed = inode(1);
        changed.size = 99;
        assert_eq!(None, cache.push(changed));
        assert_eq!(vec![1, 2], order(&cache));
        assert_eq!(99, cache.peek(Ino::new(1)).unwrap().size);
    }

    #[test]
    fn remove_reuses_slot() {
        let mut cache = cache(3);
        for ino in 1..=3 {
            cache.push(inode(ino));
        }
        assert_eq!(Ino::new(2), cache.remove(Ino::new(2)).unwrap().ino);
        assert_eq!(None, cache.remove(Ino::new(2)));
        assert_eq!(vec![3, 1], order(&cache));

        assert_eq!(None, cache.push(inode(5)));
        assert_eq!(vec![5, 3, 1], order(&cache));
        assert_eq!(3, cache.slots.len());

        // 唯一的元素被移除后链表为空
        let mut cache = self::cache(1);
        cache.push(inode(7));
        cache.remove(Ino::new(7));
        assert!(cache.is_empty());
        assert!(cache.peek_lru().is_none());
        assert_eq!(None, cache.push(inode(8)));
        assert_eq!(vec![8], order(&cache));
    }

    #[test]
    fn capacity_one() {
        let mut cache = cache(1);
        cache.push(inode(1));
        assert_eq!(Ino::new(1), cache.push(inode(2)).unwrap().ino);
        assert!(cache.get(Ino::new(1)).is_none());
        assert_eq!(vec![2], order(&cache));
    }
}
