//! # 间接索引层
//!
//! 逻辑块号先被拆成 [`BlockPath`]：直接索引的槽位，或者从顶层间接块往下、
//! 每一级块内的下标序列。解析时沿着这条路径逐级读出块编号。
//!
//! 记 P 为一个块可容纳的编号个数，逻辑块号依次落在直接索引 `[0, 12)`，
//! 以及一级 `P`、二级 `P²`、三级 `P³` 个块的范围内，更大的无法寻址。
//!
//! 任一级编号为 0 都表示空洞：读时视为全零，写时才按需分配。
//! 沿途读到的非零编号必须落在数据块区域，否则以 [`ErrorKind::CorruptInode`] 失败。

use alloc::format;
use alloc::vec::Vec;

use log::trace;
use volume::Volume;

use crate::error::{ErrorKind, Result, ResultExt};
use crate::{Allocator, Bid, Blocks, DIRECT_BLOCKS, Ino, Inode, InodeStore};

/// 逻辑块在索引树中的位置
///
/// 间接索引的各分量依次是从顶层间接块往下，每一级块内的下标。
/// 逻辑块号递增时，位置按字典序严格递增。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockPath {
    Direct(usize),
    Singly(u64),
    Doubly(u64, u64),
    Triply(u64, u64, u64),
}

impl BlockPath {
    /// 超出三级索引容量时返回 [`ErrorKind::BlockOutOfRange`]
    pub fn new(index: u64, pointers_per_block: u64) -> Result<Self> {
        let p = pointers_per_block;

        // 剔去直接索引的部分
        let Some(rest) = index.checked_sub(DIRECT_BLOCKS as u64) else {
            return Ok(Self::Direct(index as usize));
        };
        if rest < p {
            return Ok(Self::Singly(rest));
        }

        // 剔去使用了一级索引的部分
        let rest = rest - p;
        if rest < p * p {
            return Ok(Self::Doubly(rest / p, rest % p));
        }

        // 剔去使用了二级索引的部分
        let rest = rest - p * p;
        if rest < p * p * p {
            return Ok(Self::Triply(rest / (p * p), rest / p % p, rest % p));
        }

        Err(ErrorKind::BlockOutOfRange { index }.into())
    }

    /// 可寻址的逻辑块总数
    #[inline]
    pub fn capacity(pointers_per_block: u64) -> u64 {
        let p = pointers_per_block;
        DIRECT_BLOCKS as u64 + p + p * p + p * p * p
    }

    /// 经过的间接块层数
    #[inline]
    pub fn depth(&self) -> usize {
        match self {
            Self::Direct(_) => 0,
            Self::Singly(_) => 1,
            Self::Doubly(..) => 2,
            Self::Triply(..) => 3,
        }
    }

    /// 从顶层间接块往下，每一级块内的下标
    pub fn indices(&self) -> impl Iterator<Item = u64> {
        let indices = match *self {
            Self::Direct(_) => [0; 3],
            Self::Singly(a) => [a, 0, 0],
            Self::Doubly(a, b) => [a, b, 0],
            Self::Triply(a, b, c) => [a, b, c],
        };
        indices.into_iter().take(self.depth())
    }

    /// 索引节点中作为起点的那个编号
    fn root(&self, inode: &Inode) -> Bid {
        match *self {
            Self::Direct(i) => inode.direct[i],
            Self::Singly(_) => inode.singly,
            Self::Doubly(..) => inode.doubly,
            Self::Triply(..) => inode.triply,
        }
    }

    fn root_mut<'a>(&self, inode: &'a mut Inode) -> &'a mut Bid {
        match *self {
            Self::Direct(i) => &mut inode.direct[i],
            Self::Singly(_) => &mut inode.singly,
            Self::Doubly(..) => &mut inode.doubly,
            Self::Triply(..) => &mut inode.triply,
        }
    }
}

/// 逻辑块号到物理块号；途经的任一编号为 0 时返回空，不分配任何块
pub fn resolve<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    inode: &Inode,
    index: u64,
) -> Result<Option<Bid>> {
    let ino = inode.ino;
    let path = BlockPath::new(index, blocks.pointers_per_block())?;
    let mut bid = checked(blocks, ino, path.root(inode))?;

    for i in path.indices() {
        if bid.is_null() {
            return Ok(None);
        }
        bid = blocks
            .read_pointer(bid, i)
            .and_then(|child| checked(blocks, ino, child))
            .with_context(|| format!("resolving block {index} of inode {ino}"))?;
    }

    Ok((!bid.is_null()).then_some(bid))
}

/// 同 [`resolve`]，但沿途缺失的间接块和数据块都会被分配并清零
///
/// 索引节点中的顶层编号改变时会立即写入 `store`。
/// 中途空间耗尽时返回 [`ErrorKind::OutOfBlocks`]，已挂上的块不会回滚。
pub fn resolve_or_alloc<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    allocator: &dyn Allocator<Id = Bid>,
    store: &mut dyn InodeStore,
    inode: &mut Inode,
    index: u64,
) -> Result<Bid> {
    let ino = inode.ino;
    let path = BlockPath::new(index, blocks.pointers_per_block())?;

    let mut bid = checked(blocks, ino, path.root(inode))?;
    if bid.is_null() {
        bid = alloc_zeroed(blocks, allocator)
            .with_context(|| format!("allocating top of block {index} of inode {ino}"))?;
        *path.root_mut(inode) = bid;
        store.put(inode)?;
        trace!("inode {ino}: {path:?} rooted at block {bid}");
    }

    for i in path.indices() {
        bid = ensure_pointer(blocks, allocator, ino, bid, i)
            .with_context(|| format!("resolving block {index} of inode {ino}"))?;
    }

    Ok(bid)
}

/// 释放索引节点引用的全部数据块与间接块，编号清零、大小归零
///
/// 返回释放的块数。先检查整棵树，发现越界编号时什么也不释放，索引节点保持原样。
pub fn release<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    allocator: &dyn Allocator<Id = Bid>,
    inode: &mut Inode,
) -> Result<u64> {
    let ino = inode.ino;
    let mut doomed = Vec::new();

    let roots = inode.direct.iter().map(|&bid| (bid, 0));
    let trees = [(inode.singly, 1), (inode.doubly, 2), (inode.triply, 3)];
    for (bid, depth) in roots.chain(trees) {
        collect_tree(blocks, ino, bid, depth, &mut doomed)
            .with_context(|| format!("releasing blocks of inode {ino}"))?;
    }

    for &bid in &doomed {
        allocator.free(bid);
    }
    inode.direct = [Bid::NULL; DIRECT_BLOCKS];
    inode.singly = Bid::NULL;
    inode.doubly = Bid::NULL;
    inode.triply = Bid::NULL;
    inode.size = 0;
    Ok(doomed.len() as u64)
}

/// 取自磁盘的编号：为 0 或落在数据块区域
fn checked<V: Volume + ?Sized>(blocks: &Blocks<'_, V>, ino: Ino, bid: Bid) -> Result<Bid> {
    if bid.is_null() || blocks.is_data_block(bid) {
        Ok(bid)
    } else {
        Err(ErrorKind::CorruptInode { ino }.into())
    }
}

/// 分配一个块并清零
fn alloc_zeroed<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    allocator: &dyn Allocator<Id = Bid>,
) -> Result<Bid> {
    let bid = allocator.alloc().ok_or(ErrorKind::OutOfBlocks)?;
    blocks.zero(bid)?;
    Ok(bid)
}

/// 取间接块 `parent` 的第 `index` 项，缺失时分配一个新块挂上去
fn ensure_pointer<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    allocator: &dyn Allocator<Id = Bid>,
    ino: Ino,
    parent: Bid,
    index: u64,
) -> Result<Bid> {
    let child = checked(blocks, ino, blocks.read_pointer(parent, index)?)?;
    if !child.is_null() {
        return Ok(child);
    }

    let child = alloc_zeroed(blocks, allocator)?;
    blocks.write_pointer(parent, index, child)?;
    Ok(child)
}

/// 收集以 `bid` 为根、还有 `depth` 级间接块的子树，子块在前
fn collect_tree<V: Volume + ?Sized>(
    blocks: &Blocks<'_, V>,
    ino: Ino,
    bid: Bid,
    depth: u32,
    doomed: &mut Vec<Bid>,
) -> Result<()> {
    if checked(blocks, ino, bid)?.is_null() {
        return Ok(());
    }

    if depth > 0 {
        for child in blocks.read_pointers(bid)? {
            collect_tree(blocks, ino, child, depth - 1, doomed)?;
        }
    }
    doomed.push(bid);
    Ok(())
}
