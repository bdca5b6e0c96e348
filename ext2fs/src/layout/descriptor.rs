use alloc::vec::Vec;

use super::{Bitmap, SuperBlock, get_u64};

/// 描述符：已用目录计数 + 块位图 + 索引节点位图，连续存放
///
/// 块位图的第 `i` 位对应块 `i`；索引节点位图的第 `i` 位对应索引节点 `i + 1`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub used_dirs_count: u64,
    pub block_bitmap: Bitmap,
    pub inode_bitmap: Bitmap,
}

impl Descriptor {
    #[inline]
    pub fn new(super_block: &SuperBlock) -> Self {
        Self {
            used_dirs_count: 0,
            block_bitmap: Bitmap::new(super_block.blocks_count),
            inode_bitmap: Bitmap::new(super_block.inodes_count),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            8 + self.block_bitmap.as_bytes().len() + self.inode_bitmap.as_bytes().len(),
        );
        buf.extend_from_slice(&self.used_dirs_count.to_le_bytes());
        buf.extend_from_slice(self.block_bitmap.as_bytes());
        buf.extend_from_slice(self.inode_bitmap.as_bytes());
        buf
    }

    /// `buf` 必须恰好是 [`SuperBlock::descriptor_size`] 字节
    pub fn decode(buf: &[u8], super_block: &SuperBlock) -> Self {
        assert_eq!(super_block.descriptor_size() as usize, buf.len());
        let block_bytes = super_block.blocks_count.div_ceil(8) as usize;
        let (block_bitmap, inode_bitmap) = buf[8..].split_at(block_bytes);

        Self {
            used_dirs_count: get_u64(buf, 0),
            block_bitmap: Bitmap::from_bytes(block_bitmap.to_vec(), super_block.blocks_count),
            inode_bitmap: Bitmap::from_bytes(inode_bitmap.to_vec(), super_block.inodes_count),
        }
    }
}
