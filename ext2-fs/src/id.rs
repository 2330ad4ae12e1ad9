//! Inode and block numbers.
//!
//! ext2 numbers inodes from 1 and, with 1 KiB blocks, keeps block 0 outside
//! the block bitmap. Both offsets are handled here and nowhere else.

use core::ops::Add;

use derive_more::{Display, From, Into};

/// 1-based inode number as stored on disk. `0` means "no inode".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct InodeId(u32);

impl InodeId {
    pub const NULL: Self = Self(0);
    pub const ROOT: Self = Self(2);
    /// Conventional `lost+found` directory.
    pub const LOST_FOUND: Self = Self(11);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Inode owning the 0-based inode table slot / bitmap bit `index`.
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// 0-based inode table slot / bitmap bit. Callers check for [`InodeId::NULL`].
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Block number as stored in block pointers. `0` means "no block".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    pub const NULL: Self = Self(0);
    pub const SUPER_BLOCK: Self = Self(1);
    pub const GROUP_DESC: Self = Self(2);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Block tracked by block bitmap bit `bit`.
    pub const fn from_bit(bit: usize) -> Self {
        Self(bit as u32 + 1)
    }

    /// Block bitmap bit of this block. Callers check for [`BlockId::NULL`].
    pub const fn bit(self) -> usize {
        self.0 as usize - 1
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Add<u32> for BlockId {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl From<BlockId> for usize {
    fn from(id: BlockId) -> Self {
        id.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_index_is_one_below_number() {
        assert_eq!(InodeId::ROOT.index(), 1);
        assert_eq!(InodeId::from_index(11), InodeId::new(12));
        assert_eq!(InodeId::from_index(InodeId::LOST_FOUND.index()), InodeId::LOST_FOUND);
    }

    #[test]
    fn block_bit_skips_boot_block() {
        assert_eq!(BlockId::SUPER_BLOCK.bit(), 0);
        assert_eq!(BlockId::from_bit(8), BlockId::new(9));
        assert_eq!(BlockId::GROUP_DESC + 3, BlockId::new(5));
    }
}
