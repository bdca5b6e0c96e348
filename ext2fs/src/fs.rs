//! # 文件系统层
//!
//! 构建出卷的布局并使用：格式化、挂载与卸载，
//! 以及面向文件、目录和路径的操作。
//!
//! 挂载期间超级块处于 [`State::Dirty`]，正常卸载后才回到 [`State::Clean`]；
//! 没有正常卸载的文件系统拒绝再次挂载。

use alloc::format;
use alloc::vec;
use core::num::NonZeroUsize;

use log::{debug, error, info, warn};
use volume::Volume;

use crate::data::{self, InodeIo, PartialWrite};
use crate::dir::{self, DirEntry, ReadDir};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::layout::{Descriptor, State, SuperBlock};
use crate::{Allocator, Bid, BlockAllocator, Blocks, CachingInodeStore, FileType, FlushableBitmap};
use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::{Ino, InoAllocator, Inode, InodeStore, ROOT_INO, VolumeInodeStore};

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub block_size: u64,
    pub blocks: u64,
    pub inodes: u64,
    pub cache_capacity: NonZeroUsize,
}

impl FormatOptions {
    /// 默认块大小与缓存容量
    #[inline]
    pub fn new(blocks: u64, inodes: u64) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            blocks,
            inodes,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    #[inline]
    pub fn block_size(self, block_size: u64) -> Self {
        Self { block_size, ..self }
    }

    #[inline]
    pub fn cache_capacity(self, cache_capacity: NonZeroUsize) -> Self {
        Self {
            cache_capacity,
            ..self
        }
    }
}

/// 空间使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub block_size: u64,
    pub blocks: u64,
    pub free_blocks: u64,
    pub inodes: u64,
    pub free_inodes: u64,
    pub used_dirs: u64,
}

/// 打开的普通文件
///
/// 关闭即把它的索引节点移出缓存，有改动的先写回。
#[derive(Debug, PartialEq, Eq)]
pub struct File {
    ino: Ino,
}

impl File {
    #[inline]
    pub fn ino(&self) -> Ino {
        self.ino
    }
}

pub struct Filesystem<'v, V: Volume + ?Sized> {
    volume: &'v V,
    blocks: Blocks<'v, V>,
    super_block: SuperBlock,
    block_allocator: BlockAllocator,
    ino_allocator: InoAllocator,
    used_dirs: u64,
    inodes: CachingInodeStore<VolumeInodeStore<'v, V>>,
    /// 为假时析构不再写回
    mounted: bool,
}

impl<'v, V: Volume + ?Sized> Filesystem<'v, V> {
    /// 在 `volume` 上建立空文件系统，只含根目录，并挂载它
    ///
    /// 元数据区域被清零；卷不够大时以卷的越界错误失败。
    pub fn format(volume: &'v V, options: FormatOptions) -> Result<Self> {
        let mut super_block = SuperBlock::new(options.block_size, options.blocks, options.inodes)?;
        let volume_size = super_block.volume_size();
        volume
            .read_at(volume_size - 1, &mut [0])
            .with_context(|| format!("probing volume for {volume_size} bytes"))?;

        let blocks = Blocks::from_super_block(volume, &super_block);
        for bid in 0..super_block.first_data_block {
            blocks.zero(Bid::new(bid)).with_context(|| "clearing metadata")?;
        }

        super_block.state = State::Dirty;
        let descriptor = Descriptor::new(&super_block);
        let mut fs = Self::assemble(volume, super_block, descriptor, options.cache_capacity);

        for bid in 0..fs.super_block.first_data_block {
            fs.block_allocator.reserve(Bid::new(bid));
        }
        fs.ino_allocator.reserve(Ino::RESERVED);
        fs.ino_allocator.reserve(ROOT_INO);

        if let Err(err) = fs.create_root() {
            fs.mounted = false;
            return Err(err.with_context("formatting"));
        }

        info!(
            "formatted {} blocks of {} bytes, {} inodes, data from block {}",
            fs.super_block.blocks_count,
            fs.super_block.block_size,
            fs.super_block.inodes_count,
            fs.super_block.first_data_block,
        );
        Ok(fs)
    }

    /// 挂载已有的文件系统
    ///
    /// 依次校验超级块的魔数、状态、特性位与布局；
    /// 上次没有正常卸载时返回 [`ErrorKind::BadState`]。
    pub fn mount(volume: &'v V, cache_capacity: NonZeroUsize) -> Result<Self> {
        let mut raw = [0; SUPERBLOCK_SIZE];
        volume
            .read_at(SUPERBLOCK_OFFSET, &mut raw)
            .with_context(|| "reading superblock")?;
        let mut super_block = SuperBlock::decode(&raw).with_context(|| "mounting")?;
        if super_block.state == State::Dirty {
            let err = Error::from(ErrorKind::BadState {
                raw: State::Dirty as u16,
            });
            return Err(err.with_context("mounting a filesystem that was not cleanly unmounted"));
        }

        // 先确认卷足够大，再按超级块中的计数分配位图
        let volume_size = super_block.volume_size();
        volume
            .read_at(volume_size - 1, &mut [0])
            .with_context(|| format!("probing volume for {volume_size} bytes"))?;

        let mut raw = vec![0; super_block.descriptor_size() as usize];
        volume
            .read_at(super_block.descriptor_offset, &mut raw)
            .with_context(|| "reading descriptor")?;
        let descriptor = Descriptor::decode(&raw, &super_block);

        // 以位图为准
        let free_blocks = descriptor.block_bitmap.free_count();
        if free_blocks != super_block.free_blocks_count {
            warn!(
                "superblock claims {} free blocks, bitmap has {free_blocks}",
                super_block.free_blocks_count
            );
            super_block.free_blocks_count = free_blocks;
        }
        let free_inodes = descriptor.inode_bitmap.free_count();
        if free_inodes != super_block.free_inodes_count {
            warn!(
                "superblock claims {} free inodes, bitmap has {free_inodes}",
                super_block.free_inodes_count
            );
            super_block.free_inodes_count = free_inodes;
        }

        super_block.state = State::Dirty;
        write_super_block(volume, &super_block)?;

        info!(
            "mounted {} blocks of {} bytes, {free_blocks} free; {} inodes, {free_inodes} free",
            super_block.blocks_count, super_block.block_size, super_block.inodes_count,
        );
        Ok(Self::assemble(volume, super_block, descriptor, cache_capacity))
    }

    /// 写回全部改动并把文件系统标记为正常卸载
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        self.shut_down()
    }

    /// 写回脏索引节点、位图、已用目录计数与超级块，缓存保持不变
    pub fn sync(&mut self) -> Result<()> {
        self.inodes.sync_all()?;
        self.block_allocator.flush(self.volume)?;
        self.ino_allocator.flush(self.volume)?;
        self.volume
            .write_at(self.super_block.descriptor_offset, &self.used_dirs.to_le_bytes())
            .with_context(|| "writing used directory count")?;

        self.super_block.free_blocks_count = self.block_allocator.free_count();
        self.super_block.free_inodes_count = self.ino_allocator.free_count();
        write_super_block(self.volume, &self.super_block)
    }

    #[inline]
    pub fn root(&self) -> Ino {
        ROOT_INO
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// 索引节点的当前状态
    #[inline]
    pub fn inode(&mut self, ino: Ino) -> Result<Inode> {
        self.inodes.get(ino)
    }

    pub fn usage(&self) -> Usage {
        Usage {
            block_size: self.super_block.block_size,
            blocks: self.super_block.blocks_count,
            free_blocks: self.block_allocator.free_count(),
            inodes: self.super_block.inodes_count,
            free_inodes: self.ino_allocator.free_count(),
            used_dirs: self.used_dirs,
        }
    }

    /// 在目录 `parent` 下创建名为 `name` 的空普通文件
    #[inline]
    pub fn create(&mut self, parent: Ino, name: &str) -> Result<Ino> {
        self.make_node(parent, name, FileType::Regular)
    }

    /// 在目录 `parent` 下创建名为 `name` 的空目录
    #[inline]
    pub fn mkdir(&mut self, parent: Ino, name: &str) -> Result<Ino> {
        self.make_node(parent, name, FileType::Directory)
    }

    /// 为 `ino` 在目录 `parent` 下再建一个名为 `name` 的硬链接，不能链接目录
    pub fn link(&mut self, ino: Ino, parent: Ino, name: &str) -> Result<()> {
        let context = || format!("linking inode {ino} as {name:?} in directory {parent}");

        let mut inode = self.inodes.get(ino).with_context(context)?;
        if inode.is_dir() {
            return Err(Error::from(ErrorKind::IsADirectory).with_context(context()));
        }
        let mut parent_inode = self.inodes.get(parent).with_context(context)?;
        dir::add(&mut self.io(), &mut parent_inode, name, &mut inode).with_context(context)
    }

    /// 删除目录 `parent` 下名为 `name` 的非目录项，链接数归零时销毁索引节点
    pub fn unlink(&mut self, parent: Ino, name: &str) -> Result<()> {
        let context = || format!("unlinking {name:?} from directory {parent}");
        dir::validate_name(name).with_context(context)?;

        let mut parent_inode = self.inodes.get(parent).with_context(context)?;
        let entry = self.entry(&parent_inode, name).with_context(context)?;
        let mut inode = self.inodes.get(entry.ino).with_context(context)?;
        if inode.is_dir() {
            return Err(Error::from(ErrorKind::IsADirectory).with_context(context()));
        }

        dir::remove(&mut self.io(), &mut parent_inode, name)?;
        inode.links_count = inode.links_count.saturating_sub(1);
        if inode.links_count == 0 {
            self.destroy(inode).with_context(context)
        } else {
            self.inodes.put(&inode)
        }
    }

    /// 删除目录 `parent` 下名为 `name` 的空目录
    pub fn rmdir(&mut self, parent: Ino, name: &str) -> Result<()> {
        let context = || format!("removing directory {name:?} from {parent}");
        dir::validate_name(name).with_context(context)?;

        let mut parent_inode = self.inodes.get(parent).with_context(context)?;
        let entry = self.entry(&parent_inode, name).with_context(context)?;
        let inode = self.inodes.get(entry.ino).with_context(context)?;
        if !inode.is_dir() {
            return Err(Error::from(ErrorKind::NotADirectory).with_context(context()));
        }
        if !dir::is_empty(self.blocks, &inode).with_context(context)? {
            return Err(Error::from(ErrorKind::DirectoryNotEmpty).with_context(context()));
        }

        dir::remove(&mut self.io(), &mut parent_inode, name)?;
        // 它的 `..` 不复存在
        parent_inode.links_count = parent_inode.links_count.saturating_sub(1);
        self.inodes.put(&parent_inode)?;

        self.destroy(inode).with_context(context)?;
        self.used_dirs = self.used_dirs.saturating_sub(1);
        Ok(())
    }

    /// 目录 `parent` 下名为 `name` 的目录项
    pub fn lookup(&mut self, parent: Ino, name: &str) -> Result<Option<DirEntry>> {
        let parent_inode = self.inodes.get(parent)?;
        dir::lookup(self.blocks, &parent_inode, name)
            .with_context(|| format!("looking up {name:?} in directory {parent}"))
    }

    /// 从根目录出发解析以 `/` 开头的绝对路径
    ///
    /// 空的路径分量被忽略，根目录的 `..` 仍是根目录。
    pub fn lookup_path(&mut self, path: &str) -> Result<Ino> {
        let Some(rest) = path.strip_prefix('/') else {
            let err = Error::from(ErrorKind::InvalidPath);
            return Err(err.with_context(format!("path {path:?}")));
        };

        let mut ino = ROOT_INO;
        for name in rest.split('/').filter(|name| !name.is_empty()) {
            if name == ".." && ino == ROOT_INO {
                continue;
            }
            let dir = self.inodes.get(ino)?;
            ino = self
                .entry(&dir, name)
                .with_context(|| format!("resolving {path:?}"))?
                .ino;
        }
        Ok(ino)
    }

    /// 遍历目录 `ino`；遍历的是调用时目录的快照
    pub fn read_dir(&mut self, ino: Ino) -> Result<ReadDir<'v, V>> {
        let dir = self.inodes.get(ino)?;
        ReadDir::new(self.blocks, &dir)
    }

    /// 打开普通文件
    pub fn open(&mut self, ino: Ino) -> Result<File> {
        let inode = self.inodes.get(ino)?;
        if inode.is_dir() {
            let err = Error::from(ErrorKind::IsADirectory);
            return Err(err.with_context(format!("opening {ino}")));
        }
        if !inode.is_file() {
            let err = Error::from(ErrorKind::NotARegularFile);
            return Err(err.with_context(format!("opening {ino}")));
        }
        Ok(File { ino })
    }

    pub fn read(&mut self, file: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.inodes.get(file.ino)?;
        data::read(&self.blocks, &inode, offset, buf)
    }

    pub fn write(&mut self, file: &File, offset: u64, buf: &[u8]) -> Result<usize, PartialWrite> {
        let mut inode = self
            .inodes
            .get(file.ino)
            .map_err(|error| PartialWrite { written: 0, error })?;
        self.io().write(&mut inode, offset, buf)
    }

    /// 截断为空文件，释放它的全部块
    pub fn truncate(&mut self, file: &File) -> Result<()> {
        let mut inode = self.inodes.get(file.ino)?;
        let freed = self.io().release(&mut inode)?;
        debug!("truncated inode {}, {freed} blocks freed", file.ino);
        Ok(())
    }

    pub fn close(&mut self, file: File) -> Result<()> {
        self.inodes.flush(file.ino)
    }
}

impl<'v, V: Volume + ?Sized> Filesystem<'v, V> {
    fn assemble(
        volume: &'v V,
        super_block: SuperBlock,
        descriptor: Descriptor,
        cache_capacity: NonZeroUsize,
    ) -> Self {
        let Descriptor {
            used_dirs_count,
            block_bitmap,
            inode_bitmap,
        } = descriptor;
        let block_bitmap = FlushableBitmap::new(block_bitmap, super_block.block_bitmap_offset());
        let inode_bitmap = FlushableBitmap::new(inode_bitmap, super_block.inode_bitmap_offset());
        let backend = VolumeInodeStore::new(
            volume,
            super_block.inode_table_offset,
            super_block.inodes_count,
        );

        Self {
            volume,
            blocks: Blocks::from_super_block(volume, &super_block),
            block_allocator: BlockAllocator::new(block_bitmap),
            ino_allocator: InoAllocator::new(inode_bitmap),
            used_dirs: used_dirs_count,
            inodes: CachingInodeStore::new(backend, cache_capacity),
            super_block,
            mounted: true,
        }
    }

    #[inline]
    fn io(&mut self) -> InodeIo<'_, V> {
        InodeIo {
            blocks: self.blocks,
            allocator: &self.block_allocator,
            store: &mut self.inodes,
        }
    }

    fn create_root(&mut self) -> Result<()> {
        let mut root = Inode::new(ROOT_INO, FileType::Directory);
        dir::init(&mut self.io(), &mut root, None)?;
        self.used_dirs = 1;
        self.sync()
    }

    /// 目录项必须存在
    fn entry(&self, dir: &Inode, name: &str) -> Result<DirEntry> {
        dir::lookup(self.blocks, dir, name)?.ok_or_else(|| {
            let err = Error::from(ErrorKind::NotFound);
            err.with_context(format!("{name:?} in directory {}", dir.ino))
        })
    }

    fn make_node(&mut self, parent: Ino, name: &str, file_type: FileType) -> Result<Ino> {
        let context = || format!("creating {name:?} in directory {parent}");
        dir::validate_name(name).with_context(context)?;

        let mut parent_inode = self.inodes.get(parent).with_context(context)?;
        if dir::lookup(self.blocks, &parent_inode, name)
            .with_context(context)?
            .is_some()
        {
            return Err(Error::from(ErrorKind::AlreadyExists).with_context(context()));
        }

        let ino = self
            .ino_allocator
            .alloc()
            .ok_or(ErrorKind::OutOfInodes)
            .with_context(context)?;
        let mut inode = Inode::new(ino, file_type);

        if inode.is_dir() {
            let result = dir::init(&mut self.io(), &mut inode, Some(&mut parent_inode));
            if let Err(err) = result {
                self.destroy(inode)?;
                return Err(err.with_context(context()));
            }
        }

        let result = dir::add(&mut self.io(), &mut parent_inode, name, &mut inode);
        if let Err(err) = result {
            if inode.is_dir() {
                parent_inode.links_count -= 1;
                self.inodes.put(&parent_inode)?;
            }
            self.destroy(inode)?;
            return Err(err.with_context(context()));
        }

        if inode.is_dir() {
            self.used_dirs += 1;
        }
        debug!("created {file_type:?} {name:?} as inode {ino} in directory {parent}");
        Ok(ino)
    }

    /// 释放索引节点的全部块，抹去它并归还编号
    fn destroy(&mut self, mut inode: Inode) -> Result<()> {
        let ino = inode.ino;
        let freed = self.io().release(&mut inode)?;
        self.inodes.erase(ino)?;
        self.ino_allocator.free(ino);
        debug!("destroyed inode {ino}, {freed} blocks freed");
        Ok(())
    }

    fn shut_down(&mut self) -> Result<()> {
        self.sync()?;
        self.super_block.state = State::Clean;
        write_super_block(self.volume, &self.super_block)?;
        info!("unmounted");
        Ok(())
    }
}

impl<V: Volume + ?Sized> Drop for Filesystem<'_, V> {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        if let Err(err) = self.shut_down() {
            error!("failed to unmount on drop: {err}");
        }
    }
}

fn write_super_block<V: Volume + ?Sized>(volume: &V, super_block: &SuperBlock) -> Result<()> {
    let mut raw = [0; SUPERBLOCK_SIZE];
    super_block.encode(&mut raw);
    volume
        .write_at(SUPERBLOCK_OFFSET, &raw)
        .with_context(|| "writing superblock")
}

#[cfg(test)]
mod tests {
    use volume::MemVolume;

    use super::*;

    fn options() -> FormatOptions {
        FormatOptions::new(256, 64)
            .block_size(512)
            .cache_capacity(NonZeroUsize::new(4).unwrap())
    }

    fn volume() -> MemVolume {
        MemVolume::new(256 * 512)
    }

    #[test]
    fn format_layout() {
        let volume = volume();
        let fs = Filesystem::format(&volume, options()).unwrap();
        let first_data_block = fs.super_block().first_data_block;

        for bid in 0..first_data_block {
            assert!(fs.block_allocator.is_allocated(Bid::new(bid)));
        }
        assert!(fs.ino_allocator.is_allocated(Ino::RESERVED));
        assert!(fs.ino_allocator.is_allocated(Ino::ROOT));

        // 根目录占用一个数据块
        let usage = fs.usage();
        assert_eq!(256 - first_data_block - 1, usage.free_blocks);
        assert_eq!(62, usage.free_inodes);
        assert_eq!(1, usage.used_dirs);
    }

    #[test]
    fn volume_too_small() {
        let volume = MemVolume::new(255 * 512);
        let err = Filesystem::format(&volume, options()).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Volume(_)));
    }

    #[test]
    fn mount_rejects_oversized_counts() {
        // 超级块声称 2^40 个块，卷只有 64 KiB
        let volume = MemVolume::new(64 * 1024);
        let super_block = SuperBlock::new(1024, 1 << 40, 64).unwrap();
        write_super_block(&volume, &super_block).unwrap();

        let err = Filesystem::mount(&volume, DEFAULT_CACHE_CAPACITY).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Volume(_)));
    }

    #[test]
    fn state_follows_mount() {
        let volume = volume();
        let read_state = || {
            let mut raw = [0; SUPERBLOCK_SIZE];
            volume.read_at(SUPERBLOCK_OFFSET, &mut raw).unwrap();
            SuperBlock::decode(&raw).unwrap().state
        };

        let fs = Filesystem::format(&volume, options()).unwrap();
        assert_eq!(State::Dirty, read_state());
        fs.unmount().unwrap();
        assert_eq!(State::Clean, read_state());

        let fs = Filesystem::mount(&volume, DEFAULT_CACHE_CAPACITY).unwrap();
        assert_eq!(State::Dirty, read_state());
        drop(fs);
        assert_eq!(State::Clean, read_state());
    }

    #[test]
    fn mkdir_rolls_back_when_full() {
        // 块刚好够根目录，新目录分不到块
        let volume = volume();
        let mut fs = Filesystem::format(&volume, options()).unwrap();
        while fs.block_allocator.alloc().is_some() {}
        let before = fs.usage();

        let err = fs.mkdir(Ino::ROOT, "dir").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OutOfBlocks));
        assert_eq!(before, fs.usage());
        assert_eq!(1, fs.inode(Ino::ROOT).unwrap().links_count);
        assert!(fs.lookup(Ino::ROOT, "dir").unwrap().is_none());
    }

    #[test]
    fn out_of_inodes() {
        let volume = volume();
        let mut fs = Filesystem::format(&volume, options()).unwrap();
        for i in 0..62 {
            fs.create(Ino::ROOT, &format!("f{i}")).unwrap();
        }
        let err = fs.create(Ino::ROOT, "last").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::OutOfInodes));
        assert_eq!(0, fs.usage().free_inodes);
    }
}
