use alloc::vec;
use alloc::vec::Vec;

/// 位图：每个可分配单元（块或索引节点）占一位，置位表示已占用
///
/// 第 `i` 位位于第 `i / 8` 字节的第 `i % 8` 低位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    /// 有效位数，末字节中多出的位不参与分配
    len: u64,
    /// 空闲位数
    free: u64,
}

impl Bitmap {
    #[inline]
    pub fn new(len: u64) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8) as usize],
            len,
            free: len,
        }
    }

    /// 从磁盘上的字节恢复位图
    pub fn from_bytes(bytes: Vec<u8>, len: u64) -> Self {
        assert_eq!(len.div_ceil(8) as usize, bytes.len());
        let mut bitmap = Self { bytes, len, free: 0 };
        let free = (0..len).filter(|&bit| !bitmap.is_set(bit)).count();
        bitmap.free = free as u64;
        bitmap
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn free_count(&self) -> u64 {
        self.free
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 范围外的位视为未置位
    #[inline]
    pub fn is_set(&self, bit: u64) -> bool {
        bit < self.len && {
            let (index, mask) = Self::locate(bit);
            self.bytes[index] & mask != 0
        }
    }

    /// 首次适配：先找还有 0 的字节，再找字节内最低的 0 位。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&mut self) -> Option<u64> {
        let (index, ingroup_index) = self
            .bytes
            .iter()
            .enumerate()
            .find_map(|(index, &bits)| (bits != u8::MAX).then_some((index, bits.trailing_ones())))?;

        let bit = index as u64 * 8 + ingroup_index as u64;
        if bit >= self.len {
            return None;
        }

        self.bytes[index] |= 1 << ingroup_index;
        self.free -= 1;
        Some(bit)
    }

    /// 清除对应位；重复释放不会被察觉。
    /// 位超出范围时什么也不做，返回假
    pub fn free(&mut self, bit: u64) -> bool {
        if bit >= self.len {
            return false;
        }
        let (index, mask) = Self::locate(bit);
        if self.bytes[index] & mask != 0 {
            self.bytes[index] &= !mask;
            self.free += 1;
        }
        true
    }

    /// 直接占用对应位，用于标记格式化时就固定下来的结构。
    /// 位超出范围时什么也不做，返回假
    pub fn reserve(&mut self, bit: u64) -> bool {
        if bit >= self.len {
            return false;
        }
        let (index, mask) = Self::locate(bit);
        if self.bytes[index] & mask == 0 {
            self.bytes[index] |= mask;
            self.free -= 1;
        }
        true
    }

    #[inline]
    fn locate(bit: u64) -> (usize, u8) {
        ((bit / 8) as usize, 1 << (bit % 8))
    }
}
