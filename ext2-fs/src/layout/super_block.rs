use bytemuck::{Pod, Zeroable};
use enumflags2::{bitflags, BitFlags};

use crate::{Geometry, BLOCK_SIZE, INODE_SIZE, MAGIC};

/// Super block, at byte 1024 of the image.
///
/// Revision 1 field order. The tools only maintain the counters, the rest is
/// written once by `format` and validated by `open`.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    /// Block size is `1024 << log_block_size`
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    /// First inode not reserved by the filesystem
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [u8; 64],
    pub algorithm_usage_bitmap: u32,
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    _padding: u16,
    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
    _reserved: [u32; 197],
}

/// Features a reader must understand to interpret the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u32)]
pub enum IncompatFeature {
    Compression = 0x0001,
    /// Directory entries carry a file type tag
    FileType = 0x0002,
    Recover = 0x0004,
    JournalDev = 0x0008,
    MetaBg = 0x0010,
}

const STATE_CLEAN: u16 = 1;
const ERRORS_CONTINUE: u16 = 1;
const DYNAMIC_REV: u32 = 1;
/// Blocks per group of a 1 KiB block image: one bitmap block worth of bits.
const BLOCKS_PER_GROUP: u32 = (BLOCK_SIZE * 8) as u32;

impl SuperBlock {
    pub fn init(&mut self, geometry: Geometry, now: u32) {
        *self = Self {
            inodes_count: geometry.inodes_count,
            blocks_count: geometry.blocks_count,
            first_data_block: 1,
            blocks_per_group: BLOCKS_PER_GROUP,
            frags_per_group: BLOCKS_PER_GROUP,
            inodes_per_group: geometry.inodes_count,
            wtime: now,
            max_mnt_count: u16::MAX,
            magic: MAGIC,
            state: STATE_CLEAN,
            errors: ERRORS_CONTINUE,
            lastcheck: now,
            rev_level: DYNAMIC_REV,
            first_ino: crate::InodeId::LOST_FOUND.into(),
            inode_size: INODE_SIZE as u16,
            feature_incompat: BitFlags::from(IncompatFeature::FileType).bits(),
            ..Self::zeroed()
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// `None` when the shift does not fit.
    pub fn block_size(&self) -> Option<usize> {
        BLOCK_SIZE.checked_shl(self.log_block_size)
    }

    /// All blocks and inodes live in group 0.
    pub fn is_single_group(&self) -> bool {
        self.blocks_count.saturating_sub(self.first_data_block) <= self.blocks_per_group
            && self.inodes_count <= self.inodes_per_group
    }

    /// Incompatible features in use, or the raw word if it holds bits no
    /// [`IncompatFeature`] names.
    pub fn incompat_features(&self) -> Result<BitFlags<IncompatFeature>, u32> {
        BitFlags::from_bits(self.feature_incompat).map_err(|_| self.feature_incompat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_and_features() {
        let mut sb = SuperBlock::zeroed();
        sb.init(Geometry::default(), 0);
        assert_eq!(sb.block_size(), Some(BLOCK_SIZE));
        assert_eq!(sb.incompat_features(), Ok(IncompatFeature::FileType.into()));

        sb.log_block_size = 64;
        assert_eq!(sb.block_size(), None);
        sb.feature_incompat |= 0x0100;
        assert_eq!(sb.incompat_features(), Err(0x0102));
    }
}
