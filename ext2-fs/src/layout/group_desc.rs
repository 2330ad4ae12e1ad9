use bytemuck::{Pod, Zeroable};

/// Block group descriptor. The image has exactly one, at the start of block 2.
///
/// Free counters mirror the super block's and must move in lock-step with them.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    _pad: u16,
    _reserved: [u32; 3],
}

impl GroupDesc {
    pub fn init(&mut self, block_bitmap: u32, inode_bitmap: u32, inode_table: u32) {
        *self = Self {
            block_bitmap,
            inode_bitmap,
            inode_table,
            ..Self::zeroed()
        };
    }
}
