use enumflags2::{BitFlags, bitflags};

use super::{field_offsets, get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::{ErrorKind, Ino, Result};
use crate::{INODE_SIZE, MAGIC, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, POINTER_SIZE};
use crate::{SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};

/// 文件系统状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum State {
    /// 已正常卸载
    Clean = 1,
    /// 挂载中，或者没能正常卸载
    Dirty = 2,
}

/// 特性位，出现未知位的文件系统拒绝挂载
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// 目录项记录了文件类型
    DirFileType = 0b01,
    /// 允许稀疏文件
    SparseData = 0b10,
}

#[derive(Clone, Copy)]
#[repr(usize)]
enum Field {
    Magic,
    BlockSize,
    BlocksCount,
    InodesCount,
    FreeBlocksCount,
    FreeInodesCount,
    FirstDataBlock,
    DescriptorOffset,
    InodeTableOffset,
    InodeSize,
    State,
    Features,
}

const WIDTHS: [usize; 12] = [8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 2, 4];
const OFFSETS: [usize; 12] = field_offsets(WIDTHS);

const _: () = assert!(OFFSETS[Field::Features as usize] + 4 <= SUPERBLOCK_SIZE);

impl Field {
    #[inline]
    const fn offset(self) -> usize {
        OFFSETS[self as usize]
    }
}

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位描述符、索引节点表与数据块区域；
/// - 记录空闲块、空闲索引节点的数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub block_size: u64,
    /// 文件系统占据块数
    pub blocks_count: u64,
    pub inodes_count: u64,
    pub free_blocks_count: u64,
    pub free_inodes_count: u64,
    /// 第一个数据块，此前的块全部属于元数据
    pub first_data_block: u64,
    pub descriptor_offset: u64,
    pub inode_table_offset: u64,
    pub inode_size: u64,
    pub state: State,
    pub features: BitFlags<Feature>,
}

impl SuperBlock {
    /// 按几何参数计算出布局；参数不合理时返回 [`ErrorKind::InvalidGeometry`]
    pub fn new(block_size: u64, blocks_count: u64, inodes_count: u64) -> Result<Self> {
        if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
        {
            return Err(ErrorKind::InvalidGeometry("block size").into());
        }
        if inodes_count < Ino::ROOT.get() {
            return Err(ErrorKind::InvalidGeometry("too few inodes").into());
        }

        let descriptor_offset =
            (SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE as u64).next_multiple_of(block_size);
        if blocks_count.checked_mul(block_size).is_none() {
            return Err(ErrorKind::InvalidGeometry("volume size overflows").into());
        }

        // 位图各占计数的八分之一，这里的加法不会溢出
        let inode_table_offset =
            descriptor_offset + Self::descriptor_size_of(blocks_count, inodes_count);
        let metadata_end = inodes_count
            .checked_mul(INODE_SIZE as u64)
            .and_then(|table_size| table_size.checked_add(inode_table_offset))
            .ok_or(ErrorKind::InvalidGeometry("inode table overflows"))?;
        let first_data_block = metadata_end.div_ceil(block_size);
        if first_data_block >= blocks_count {
            return Err(ErrorKind::InvalidGeometry("no room for data blocks").into());
        }

        Ok(Self {
            block_size,
            blocks_count,
            inodes_count,
            free_blocks_count: blocks_count - first_data_block,
            free_inodes_count: inodes_count,
            first_data_block,
            descriptor_offset,
            inode_table_offset,
            inode_size: INODE_SIZE as u64,
            state: State::Clean,
            features: Feature::DirFileType | Feature::SparseData,
        })
    }

    /// 描述符字节数：已用目录计数 + 块位图 + 索引节点位图
    #[inline]
    pub const fn descriptor_size_of(blocks_count: u64, inodes_count: u64) -> u64 {
        8 + blocks_count.div_ceil(8) + inodes_count.div_ceil(8)
    }

    #[inline]
    pub fn descriptor_size(&self) -> u64 {
        Self::descriptor_size_of(self.blocks_count, self.inodes_count)
    }

    #[inline]
    pub fn block_bitmap_offset(&self) -> u64 {
        self.descriptor_offset + 8
    }

    #[inline]
    pub fn inode_bitmap_offset(&self) -> u64 {
        self.block_bitmap_offset() + self.blocks_count.div_ceil(8)
    }

    /// 索引节点记录在卷上的字节偏移
    #[inline]
    pub fn inode_offset(&self, ino: Ino) -> u64 {
        self.inode_table_offset + (ino.get() - 1) * self.inode_size
    }

    /// 一个间接块能容纳的块编号个数
    #[inline]
    pub fn pointers_per_block(&self) -> u64 {
        self.block_size / POINTER_SIZE as u64
    }

    /// 卷至少需要的字节数，构造时已确认不会溢出
    #[inline]
    pub fn volume_size(&self) -> u64 {
        self.blocks_count * self.block_size
    }

    pub fn encode(&self, buf: &mut [u8; SUPERBLOCK_SIZE]) {
        buf.fill(0);
        put_u64(buf, Field::Magic.offset(), MAGIC);
        put_u64(buf, Field::BlockSize.offset(), self.block_size);
        put_u64(buf, Field::BlocksCount.offset(), self.blocks_count);
        put_u64(buf, Field::InodesCount.offset(), self.inodes_count);
        put_u64(buf, Field::FreeBlocksCount.offset(), self.free_blocks_count);
        put_u64(buf, Field::FreeInodesCount.offset(), self.free_inodes_count);
        put_u64(buf, Field::FirstDataBlock.offset(), self.first_data_block);
        put_u64(buf, Field::DescriptorOffset.offset(), self.descriptor_offset);
        put_u64(buf, Field::InodeTableOffset.offset(), self.inode_table_offset);
        put_u64(buf, Field::InodeSize.offset(), self.inode_size);
        put_u16(buf, Field::State.offset(), self.state as u16);
        put_u32(buf, Field::Features.offset(), self.features.bits());
    }

    /// 依次校验魔数、状态、特性位与布局，任一不通过即失败
    pub fn decode(buf: &[u8; SUPERBLOCK_SIZE]) -> Result<Self> {
        let magic = get_u64(buf, Field::Magic.offset());
        if magic != MAGIC {
            return Err(ErrorKind::BadMagic { found: magic }.into());
        }

        let state = match get_u16(buf, Field::State.offset()) {
            1 => State::Clean,
            2 => State::Dirty,
            raw => return Err(ErrorKind::BadState { raw }.into()),
        };

        let bits = get_u32(buf, Field::Features.offset());
        let features = BitFlags::<Feature>::from_bits(bits)
            .map_err(|err| ErrorKind::IncompatibleFeatures { bits: err.invalid_bits() })?;

        let decoded = Self {
            block_size: get_u64(buf, Field::BlockSize.offset()),
            blocks_count: get_u64(buf, Field::BlocksCount.offset()),
            inodes_count: get_u64(buf, Field::InodesCount.offset()),
            free_blocks_count: get_u64(buf, Field::FreeBlocksCount.offset()),
            free_inodes_count: get_u64(buf, Field::FreeInodesCount.offset()),
            first_data_block: get_u64(buf, Field::FirstDataBlock.offset()),
            descriptor_offset: get_u64(buf, Field::DescriptorOffset.offset()),
            inode_table_offset: get_u64(buf, Field::InodeTableOffset.offset()),
            inode_size: get_u64(buf, Field::InodeSize.offset()),
            state,
            features,
        };

        let expected = Self::new(decoded.block_size, decoded.blocks_count, decoded.inodes_count)?;
        if decoded.first_data_block != expected.first_data_block
            || decoded.descriptor_offset != expected.descriptor_offset
            || decoded.inode_table_offset != expected.inode_table_offset
            || decoded.inode_size != expected.inode_size
        {
            return Err(ErrorKind::InvalidGeometry("layout offsets disagree").into());
        }
        if decoded.free_blocks_count > decoded.blocks_count
            || decoded.free_inodes_count > decoded.inodes_count
        {
            return Err(ErrorKind::InvalidGeometry("free counters exceed totals").into());
        }

        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(sb: &SuperBlock) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0; SUPERBLOCK_SIZE];
        sb.encode(&mut buf);
        buf
    }

    #[test]
    fn layout() {
        let sb = SuperBlock::new(1024, 8192, 2048).unwrap();
        assert_eq!(2048, sb.descriptor_offset);
        assert_eq!(2048 + 8, sb.block_bitmap_offset());
        assert_eq!(2048 + 8 + 1024, sb.inode_bitmap_offset());
        assert_eq!(8 + 1024 + 256, sb.descriptor_size());
        assert_eq!(2048 + 8 + 1024 + 256, sb.inode_table_offset);
        assert_eq!(sb.inode_table_offset, sb.inode_offset(Ino::new(1)));
        assert_eq!(
            (sb.inode_table_offset + 2048 * 256).div_ceil(1024),
            sb.first_data_block
        );
        assert_eq!(8192 - sb.first_data_block, sb.free_blocks_count);
        assert_eq!(128, sb.pointers_per_block());

        // 大块时描述符依然按块对齐
        let sb = SuperBlock::new(4096, 1024, 64).unwrap();
        assert_eq!(4096, sb.descriptor_offset);
    }

    #[test]
    fn bad_geometry() {
        for (block_size, blocks, inodes) in [
            (1000, 64, 16),
            (32, 64, 16),
            (65536, 64, 16),
            (1024, 64, 1),
            (1024, 16, 64),
        ] {
            let err = SuperBlock::new(block_size, blocks, inodes).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::InvalidGeometry(_)));
        }
    }

    #[test]
    fn overflowing_geometry() {
        for (blocks, inodes) in [(64, u64::MAX / 4), (64, u64::MAX), (u64::MAX / 2, 16)] {
            let err = SuperBlock::new(1024, blocks, inodes).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::InvalidGeometry(_)));
        }
    }

    #[test]
    fn decode_huge_counts() {
        let sb = SuperBlock::new(1024, 4096, 512).unwrap();

        let mut buf = encoded(&sb);
        put_u64(&mut buf, Field::InodesCount.offset(), u64::MAX / 4);
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidGeometry(_)));

        let mut buf = encoded(&sb);
        put_u64(&mut buf, Field::BlocksCount.offset(), u64::MAX);
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidGeometry(_)));
    }

    #[test]
    fn round_trip() {
        let mut sb = SuperBlock::new(1024, 4096, 512).unwrap();
        sb.free_blocks_count = 17;
        sb.free_inodes_count = 3;
        sb.state = State::Dirty;
        sb.features = Feature::DirFileType.into();

        assert_eq!(sb, SuperBlock::decode(&encoded(&sb)).unwrap());
        assert_eq!(&MAGIC.to_le_bytes(), &encoded(&sb)[..8]);
    }

    #[test]
    fn bad_magic() {
        let sb = SuperBlock::new(1024, 4096, 512).unwrap();
        let mut buf = encoded(&sb);
        buf[0] ^= 0xff;
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadMagic { .. }));

        let err = SuperBlock::decode(&[0; SUPERBLOCK_SIZE]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadMagic { found: 0 }));
    }

    #[test]
    fn bad_state() {
        let sb = SuperBlock::new(1024, 4096, 512).unwrap();
        let mut buf = encoded(&sb);
        put_u16(&mut buf, Field::State.offset(), 7);
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadState { raw: 7 }));
    }

    #[test]
    fn incompatible_features() {
        let sb = SuperBlock::new(1024, 4096, 512).unwrap();
        let mut buf = encoded(&sb);
        put_u32(&mut buf, Field::Features.offset(), 0b111);
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::IncompatibleFeatures { bits: 0b100 }
        ));
    }

    #[test]
    fn corrupt_offsets() {
        let sb = SuperBlock::new(1024, 4096, 512).unwrap();
        let mut buf = encoded(&sb);
        put_u64(&mut buf, Field::FirstDataBlock.offset(), 1);
        let err = SuperBlock::decode(&buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidGeometry(_)));
    }
}
