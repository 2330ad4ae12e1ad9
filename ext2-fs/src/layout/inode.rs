//! Inode record and its block pointers.
//!
//! Pointer slots 0..12 point directly at data, slot 12 at a single indirect
//! block: a whole block of pointers, each to a data block. Slots 13 and 14
//! (double/triple indirect) are never used by these tools.

use bytemuck::{Pod, Zeroable};
use enumflags2::{bitflags, BitFlags};

use crate::{BlockId, BLOCK_SIZE, SECTORS_PER_BLOCK};

/// Direct pointer slots.
pub const DIRECT_COUNT: usize = 12;
/// Slot of the single indirect pointer.
pub const INDIRECT_SLOT: usize = DIRECT_COUNT;
/// Pointers held by an indirect block.
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 4;

/// A single indirect block.
pub type IndirectBlock = [u32; INDIRECT_COUNT];

const TYPE_MASK: u16 = 0xF000;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct DiskInode {
    /// File type and permission bits
    pub mode: u16,
    pub uid: u16,
    /// Size in bytes
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    /// Deletion time, 0 while the inode is live
    pub dtime: u32,
    pub gid: u16,
    /// Hard links
    pub links_count: u16,
    /// Occupied 512-byte sectors, indirect blocks included
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub block: [u32; 15],
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
    pub osd2: [u32; 3],
}

/// The file types these tools create and repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    /// Type bits of `DiskInode::mode`.
    pub const fn mode_bits(self) -> u16 {
        match self {
            Self::Regular => 0x8000,
            Self::Directory => 0x4000,
            Self::Symlink => 0xA000,
        }
    }

    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & TYPE_MASK {
            0x8000 => Some(Self::Regular),
            0x4000 => Some(Self::Directory),
            0xA000 => Some(Self::Symlink),
            _ => None,
        }
    }

    /// `file_type` tag of a directory entry.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Regular => 1,
            Self::Directory => 2,
            Self::Symlink => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Regular),
            2 => Some(Self::Directory),
            7 => Some(Self::Symlink),
            _ => None,
        }
    }
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u16)]
pub enum Permission {
    OtherExec = 0o0001,
    OtherWrite = 0o0002,
    OtherRead = 0o0004,
    GroupExec = 0o0010,
    GroupWrite = 0o0020,
    GroupRead = 0o0040,
    UserExec = 0o0100,
    UserWrite = 0o0200,
    UserRead = 0o0400,
}

impl Permission {
    /// `rwxr-xr-x`
    pub fn directory() -> BitFlags<Self> {
        BitFlags::all() & !(Self::GroupWrite | Self::OtherWrite)
    }

    /// `rw-r--r--`
    pub fn regular() -> BitFlags<Self> {
        Self::UserRead | Self::UserWrite | Self::GroupRead | Self::OtherRead
    }

    /// `rwxrwxrwx`
    pub fn symlink() -> BitFlags<Self> {
        BitFlags::all()
    }

    pub fn default_for(ty: FileType) -> BitFlags<Self> {
        match ty {
            FileType::Regular => Self::regular(),
            FileType::Directory => Self::directory(),
            FileType::Symlink => Self::symlink(),
        }
    }
}

impl DiskInode {
    /// A fresh inode: one link, no data, owner and group 0.
    pub fn new(ty: FileType, perm: BitFlags<Permission>, now: u32) -> Self {
        Self {
            mode: ty.mode_bits() | perm.bits(),
            atime: now,
            ctime: now,
            mtime: now,
            links_count: 1,
            ..Self::zeroed()
        }
    }

    #[inline]
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.dtime != 0
    }

    /// Direct blocks in use; the list ends at the first empty slot.
    pub fn direct_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.block[..DIRECT_COUNT]
            .iter()
            .take_while(|&&raw| raw != 0)
            .map(|&raw| BlockId::new(raw))
    }

    pub fn indirect_block(&self) -> Option<BlockId> {
        let raw = self.block[INDIRECT_SLOT];
        (raw != 0).then_some(BlockId::new(raw))
    }

    pub fn set_indirect_block(&mut self, id: BlockId) {
        self.block[INDIRECT_SLOT] = id.into();
    }

    /// Accounts one more block, data or indirect, in the sector counter.
    pub fn add_block(&mut self) {
        self.blocks += SECTORS_PER_BLOCK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_bits_round_trip() {
        for ty in [FileType::Regular, FileType::Directory, FileType::Symlink] {
            assert_eq!(FileType::from_mode(ty.mode_bits() | 0o644), Some(ty));
            assert_eq!(FileType::from_tag(ty.tag()), Some(ty));
        }
        // Socket and block device share bits with symlink and directory.
        assert_eq!(FileType::from_mode(0xC000), None);
        assert_eq!(FileType::from_mode(0x6000), None);
    }

    #[test]
    fn new_inode_mode() {
        let inode = DiskInode::new(FileType::Directory, Permission::directory(), 7);
        assert_eq!(inode.mode, 0o040755);
        assert_eq!(inode.links_count, 1);
        assert!(!inode.is_deleted());
        assert_eq!(
            DiskInode::new(FileType::Regular, Permission::regular(), 0).mode,
            0o100644
        );
    }

    #[test]
    fn direct_blocks_stop_at_hole() {
        let mut inode = DiskInode::zeroed();
        inode.block[..3].copy_from_slice(&[9, 10, 0]);
        inode.block[3] = 11;
        let blocks: Vec<_> = inode.direct_blocks().collect();
        assert_eq!(blocks, [BlockId::new(9), BlockId::new(10)]);
        assert_eq!(inode.indirect_block(), None);
        inode.set_indirect_block(BlockId::new(40));
        assert_eq!(inode.indirect_block(), Some(BlockId::new(40)));
    }
}
