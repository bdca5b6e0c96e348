//! 块编号与索引节点编号

use derive_more::{Display, From, Into};

/// 物理块编号，`0` 表示“没有块”
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct Bid(u64);

/// 索引节点编号，`0` 表示“没有索引节点”
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct Ino(u64);

impl Bid {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Ino {
    pub const NULL: Self = Self(0);
    /// 保留的索引节点，格式化时即占用
    pub const RESERVED: Self = Self(1);
    /// 根目录
    pub const ROOT: Self = Self(2);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}
