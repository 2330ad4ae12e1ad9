//! # Bitmap allocator
//!
//! First fit over the inode and block bitmaps. The free counters of the super
//! block and the group descriptor always move together.

use log::debug;

use crate::{BlockId, Error, Ext2FileSystem, InodeId, Result};

impl Ext2FileSystem {
    /// Claims the lowest free inode.
    pub fn alloc_inode(&mut self) -> Result<InodeId> {
        let bit = self.inode_bitmap().first_free().ok_or(Error::NoSpace)?;
        self.inode_bitmap_mut().set(bit);
        self.adjust_free_inodes(-1);

        let id = InodeId::from_index(bit);
        debug!("allocated inode {id}");
        Ok(id)
    }

    /// Claims the lowest free block. Its contents are left as they were.
    pub fn alloc_block(&mut self) -> Result<BlockId> {
        let bit = self.block_bitmap().first_free().ok_or(Error::NoSpace)?;
        self.block_bitmap_mut().set(bit);
        self.adjust_free_blocks(-1);

        let id = BlockId::from_bit(bit);
        debug!("allocated block {id}");
        Ok(id)
    }

    pub fn dealloc_inode(&mut self, id: InodeId) -> Result<()> {
        self.check_inode_id(id)?;
        if self.inode_bitmap_mut().clear(id.index()) {
            self.adjust_free_inodes(1);
            debug!("freed inode {id}");
        }
        Ok(())
    }

    /// Frees block `id` without touching its contents, so that a later
    /// restore can reclaim it.
    pub fn dealloc_block(&mut self, id: BlockId) -> Result<()> {
        self.check_block_id(id)?;
        if self.block_bitmap_mut().clear(id.bit()) {
            self.adjust_free_blocks(1);
            debug!("freed block {id}");
        }
        Ok(())
    }

    /// Sets the bit of inode `id`, returning whether it was free.
    /// Counters are left to the caller.
    pub fn claim_inode(&mut self, id: InodeId) -> Result<bool> {
        self.check_inode_id(id)?;
        if self.is_inode_used(id) {
            return Ok(false);
        }
        Ok(self.inode_bitmap_mut().set(id.index()))
    }

    /// Sets the bit of block `id`, returning whether it was free.
    /// Counters are left to the caller.
    pub fn claim_block(&mut self, id: BlockId) -> Result<bool> {
        self.check_block_id(id)?;
        if self.is_block_used(id) {
            return Ok(false);
        }
        Ok(self.block_bitmap_mut().set(id.bit()))
    }

    #[inline]
    pub fn is_inode_used(&self, id: InodeId) -> bool {
        self.contains_inode(id) && self.inode_bitmap().get(id.index())
    }

    #[inline]
    pub fn is_block_used(&self, id: BlockId) -> bool {
        self.contains_block(id) && self.block_bitmap().get(id.bit())
    }

    pub fn adjust_free_inodes(&mut self, delta: i64) {
        let sb = self.super_block_mut();
        sb.free_inodes_count = shift_u32(sb.free_inodes_count, delta);
        let gd = self.group_desc_mut();
        gd.free_inodes_count = shift_u16(gd.free_inodes_count, delta);
    }

    pub fn adjust_free_blocks(&mut self, delta: i64) {
        let sb = self.super_block_mut();
        sb.free_blocks_count = shift_u32(sb.free_blocks_count, delta);
        let gd = self.group_desc_mut();
        gd.free_blocks_count = shift_u16(gd.free_blocks_count, delta);
    }

    fn check_inode_id(&self, id: InodeId) -> Result<()> {
        if self.contains_inode(id) {
            Ok(())
        } else {
            Err(Error::corruption(
                BlockId::SUPER_BLOCK,
                format!("inode {id} outside the inode bitmap"),
            ))
        }
    }

    fn check_block_id(&self, id: BlockId) -> Result<()> {
        if self.contains_block(id) {
            Ok(())
        } else {
            Err(Error::corruption(id, "block outside the block bitmap"))
        }
    }
}

fn shift_u32(count: u32, delta: i64) -> u32 {
    (i64::from(count) + delta).clamp(0, u32::MAX.into()) as u32
}

fn shift_u16(count: u16, delta: i64) -> u16 {
    (i64::from(count) + delta).clamp(0, u16::MAX.into()) as u16
}
