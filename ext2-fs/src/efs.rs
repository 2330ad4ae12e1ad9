//! # Image accessor
//!
//! [`Ext2FileSystem`] owns the whole image, loaded block by block from a
//! [`BlockDevice`], plus the geometry read from the super block and group
//! descriptor at open time. Every other layer reads and writes records through
//! it. Writes only mark blocks dirty; [`Ext2FileSystem::sync`] (or dropping the
//! file system) writes them back.

use std::mem;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytemuck::Pod;
use enumflags2::{make_bitflags, BitFlags};
use log::{error, info, warn};

use crate::dir;
use crate::layout::{Bitmap, DiskInode, FileType, GroupDesc, IncompatFeature, Permission, SuperBlock};
use crate::{BlockDevice, BlockId, DataBlock, Error, InodeId, Result};
use crate::{BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE};

/// Features that change the layout of blocks this crate reads.
const UNSUPPORTED_FEATURES: BitFlags<IncompatFeature> =
    make_bitflags!(IncompatFeature::{Compression | JournalDev | MetaBg});

/// Size of a freshly formatted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub blocks_count: u32,
    pub inodes_count: u32,
}

impl Default for Geometry {
    /// 128 KiB image with 32 inodes.
    fn default() -> Self {
        Self {
            blocks_count: 128,
            inodes_count: 32,
        }
    }
}

impl Geometry {
    /// Most blocks or inodes one bitmap block can track.
    const MAX_BITS: u32 = (BLOCK_SIZE * 8) as u32;

    #[inline]
    pub fn image_size(&self) -> usize {
        self.blocks_count as usize * BLOCK_SIZE
    }

    pub fn inode_table_blocks(&self) -> u32 {
        self.inodes_count.div_ceil(INODES_PER_BLOCK as u32)
    }

    /// Boot block, super block, group descriptor, both bitmaps and the inode
    /// table.
    fn metadata_blocks(&self) -> u32 {
        5 + self.inode_table_blocks()
    }

    pub fn validate(&self) -> Result<()> {
        if self.inodes_count % INODES_PER_BLOCK as u32 != 0 {
            return Err(Error::InvalidGeometry("inode count must fill whole table blocks"));
        }
        if self.inodes_count <= u32::from(InodeId::LOST_FOUND) {
            return Err(Error::InvalidGeometry("too few inodes for the reserved ones"));
        }
        if self.inodes_count > Self::MAX_BITS || self.blocks_count > Self::MAX_BITS + 1 {
            return Err(Error::InvalidGeometry("does not fit in one block group"));
        }
        // Root and lost+found take one block each.
        if self.blocks_count < self.metadata_blocks() + 2 {
            return Err(Error::InvalidGeometry("too few blocks for the metadata"));
        }
        Ok(())
    }
}

pub struct Ext2FileSystem {
    device: Arc<dyn BlockDevice>,
    blocks: Vec<DataBlock>,
    /// Dirty flag of each block
    modified: Vec<bool>,
    geometry: Geometry,
    block_bitmap: BlockId,
    inode_bitmap: BlockId,
    inode_table: BlockId,
}

impl std::fmt::Debug for Ext2FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2FileSystem")
            .field("geometry", &self.geometry)
            .field("block_bitmap", &self.block_bitmap)
            .field("inode_bitmap", &self.inode_bitmap)
            .field("inode_table", &self.inode_table)
            .finish_non_exhaustive()
    }
}

impl Ext2FileSystem {
    /// Lays out an empty file system holding only `/` and `/lost+found`.
    pub fn format(device: Arc<dyn BlockDevice>, geometry: Geometry) -> Result<Self> {
        geometry.validate()?;

        let block_bitmap = BlockId::GROUP_DESC + 1;
        let inode_bitmap = block_bitmap + 1;
        let inode_table = inode_bitmap + 1;
        let data_start = inode_table + geometry.inode_table_blocks();
        let count = geometry.blocks_count as usize;

        // Everything is written back, including the zeroed boot block.
        let mut efs = Self {
            device,
            blocks: vec![[0; BLOCK_SIZE / 8]; count],
            modified: vec![true; count],
            geometry,
            block_bitmap,
            inode_bitmap,
            inode_table,
        };
        let now = Self::now();
        efs.super_block_mut().init(geometry, now);
        efs.group_desc_mut()
            .init(block_bitmap.into(), inode_bitmap.into(), inode_table.into());

        let mut blocks = efs.block_bitmap_mut();
        blocks.fill_padding();
        (BlockId::SUPER_BLOCK.bit()..data_start.bit()).for_each(|bit| {
            blocks.set(bit);
        });
        let free_blocks = blocks.count_free() as u32;

        let mut inodes = efs.inode_bitmap_mut();
        inodes.fill_padding();
        (0..InodeId::LOST_FOUND.index()).for_each(|bit| {
            inodes.set(bit);
        });
        let free_inodes = inodes.count_free() as u32;

        let sb = efs.super_block_mut();
        sb.free_blocks_count = free_blocks;
        sb.free_inodes_count = free_inodes;
        let gd = efs.group_desc_mut();
        gd.free_blocks_count = free_blocks as u16;
        gd.free_inodes_count = free_inodes as u16;

        let root_block = efs.alloc_block()?;
        dir::init_dir_block(&mut efs, root_block, InodeId::ROOT, InodeId::ROOT)?;
        let root = efs.inode_mut(InodeId::ROOT)?;
        *root = DiskInode::new(FileType::Directory, Permission::directory(), now);
        root.links_count = 2;
        root.size = BLOCK_SIZE as u32;
        root.block[0] = root_block.into();
        root.add_block();
        efs.group_desc_mut().used_dirs_count = 1;

        let lost_found = dir::create_subdir(
            &mut efs,
            InodeId::ROOT,
            "lost+found",
            Permission::UserRead | Permission::UserWrite | Permission::UserExec,
        )?;
        debug_assert_eq!(lost_found, InodeId::LOST_FOUND);

        info!(
            "formatted {} blocks, {} inodes, data from block {data_start}",
            geometry.blocks_count, geometry.inodes_count
        );
        Ok(efs)
    }

    /// Loads an existing image, checking it is a single group ext2 with
    /// 1 KiB blocks.
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut head: DataBlock = [0; BLOCK_SIZE / 8];
        device.read_block(BlockId::SUPER_BLOCK.into(), bytemuck::bytes_of_mut(&mut head))?;
        let sb: SuperBlock = bytemuck::cast(head);
        Self::check_super_block(&sb)?;

        let geometry = Geometry {
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
        };
        let count = geometry.blocks_count as usize;
        let mut blocks = Vec::with_capacity(count);
        for block_id in 0..count {
            let mut block: DataBlock = [0; BLOCK_SIZE / 8];
            device.read_block(block_id, bytemuck::bytes_of_mut(&mut block))?;
            blocks.push(block);
        }

        let gd: GroupDesc = bytemuck::pod_read_unaligned(
            &bytemuck::bytes_of(&blocks[usize::from(BlockId::GROUP_DESC)])
                [..mem::size_of::<GroupDesc>()],
        );
        let in_image = |start: u32, len: u32| {
            start > u32::from(BlockId::GROUP_DESC)
                && start.checked_add(len).is_some_and(|end| end <= geometry.blocks_count)
        };
        if !in_image(gd.block_bitmap, 1)
            || !in_image(gd.inode_bitmap, 1)
            || !in_image(gd.inode_table, geometry.inode_table_blocks())
        {
            return Err(Error::corruption(
                BlockId::GROUP_DESC,
                "bitmap or inode table outside the image",
            ));
        }

        Ok(Self {
            device,
            blocks,
            modified: vec![false; count],
            geometry,
            block_bitmap: BlockId::new(gd.block_bitmap),
            inode_bitmap: BlockId::new(gd.inode_bitmap),
            inode_table: BlockId::new(gd.inode_table),
        })
    }

    fn check_super_block(sb: &SuperBlock) -> Result<()> {
        let bad = |detail: String| Err(Error::corruption(BlockId::SUPER_BLOCK, detail));
        if !sb.is_valid() {
            return bad(format!("bad magic {:#06x}", sb.magic));
        }
        if sb.block_size() != Some(BLOCK_SIZE) || sb.first_data_block != 1 {
            return bad(format!("unsupported block size 1024 << {}", sb.log_block_size));
        }
        if !sb.is_single_group()
            || sb.inodes_count > Geometry::MAX_BITS
            || sb.blocks_count > Geometry::MAX_BITS + 1
        {
            return bad("more than one block group".to_owned());
        }
        if sb.rev_level > 0 && sb.inode_size as usize != INODE_SIZE {
            return bad(format!("unsupported inode size {}", sb.inode_size));
        }
        if sb.blocks_count <= u32::from(BlockId::GROUP_DESC) || sb.inodes_count == 0 {
            return bad("empty block or inode count".to_owned());
        }
        match sb.incompat_features() {
            Ok(features) if features.intersects(UNSUPPORTED_FEATURES) => {
                warn!("image needs incompatible features {features:?}");
                return Err(Error::Unsupported);
            }
            Ok(_) => {}
            Err(raw) => warn!("ignoring unknown incompatible features in {raw:#x}"),
        }
        Ok(())
    }

    /// Writes every dirty block back to the device.
    pub fn sync(&mut self) -> Result<()> {
        for (block_id, (block, modified)) in
            self.blocks.iter().zip(self.modified.iter_mut()).enumerate()
        {
            if *modified {
                self.device.write_block(block_id, bytemuck::bytes_of(block))?;
                *modified = false;
            }
        }
        Ok(())
    }

    /// Seconds since the epoch, as stored in inode timestamps.
    pub fn now() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as u32)
    }
}

/* Records */
impl Ext2FileSystem {
    pub fn super_block(&self) -> &SuperBlock {
        bytemuck::cast_ref(&self.blocks[usize::from(BlockId::SUPER_BLOCK)])
    }

    pub fn super_block_mut(&mut self) -> &mut SuperBlock {
        bytemuck::cast_mut(self.raw_mut(BlockId::SUPER_BLOCK))
    }

    pub fn group_desc(&self) -> &GroupDesc {
        let bytes = bytemuck::bytes_of(&self.blocks[usize::from(BlockId::GROUP_DESC)]);
        bytemuck::from_bytes(&bytes[..mem::size_of::<GroupDesc>()])
    }

    pub fn group_desc_mut(&mut self) -> &mut GroupDesc {
        let bytes = bytemuck::bytes_of_mut(self.raw_mut(BlockId::GROUP_DESC));
        bytemuck::from_bytes_mut(&mut bytes[..mem::size_of::<GroupDesc>()])
    }

    pub fn inode(&self, id: InodeId) -> Result<&DiskInode> {
        let (block, offset) = self.inode_position(id)?;
        self.get(block, offset)
    }

    pub fn inode_mut(&mut self, id: InodeId) -> Result<&mut DiskInode> {
        let (block, offset) = self.inode_position(id)?;
        self.get_mut(block, offset)
    }

    fn inode_position(&self, id: InodeId) -> Result<(BlockId, usize)> {
        if !self.contains_inode(id) {
            return Err(Error::corruption(
                self.inode_table,
                format!("inode {id} outside the inode table"),
            ));
        }
        let index = id.index();
        Ok((
            self.inode_table + (index / INODES_PER_BLOCK) as u32,
            (index % INODES_PER_BLOCK) * INODE_SIZE,
        ))
    }

    /// Valid, non-null inode number.
    #[inline]
    pub fn contains_inode(&self, id: InodeId) -> bool {
        !id.is_null() && u32::from(id) <= self.geometry.inodes_count
    }

    /// Block that may appear in a block pointer.
    #[inline]
    pub fn contains_block(&self, id: BlockId) -> bool {
        !id.is_null() && u32::from(id) < self.geometry.blocks_count
    }
}

/* Blocks */
impl Ext2FileSystem {
    pub fn block(&self, id: BlockId) -> Result<&[u8]> {
        self.check_block(id)?;
        Ok(bytemuck::bytes_of(&self.blocks[usize::from(id)]))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut [u8]> {
        self.check_block(id)?;
        Ok(bytemuck::bytes_of_mut(self.raw_mut(id)))
    }

    pub fn zero_block(&mut self, id: BlockId) -> Result<()> {
        self.block_mut(id)?.fill(0);
        Ok(())
    }

    /// Overwrites the start of block `id` with `data`, zeroing the rest.
    pub fn fill_block(&mut self, id: BlockId, data: &[u8]) -> Result<()> {
        let block = self.block_mut(id)?;
        let len = data.len().min(BLOCK_SIZE);
        block[..len].copy_from_slice(&data[..len]);
        block[len..].fill(0);
        Ok(())
    }

    /// Typed view of the record at `offset` in block `id`.
    pub fn get<T: Pod>(&self, id: BlockId, offset: usize) -> Result<&T> {
        let bytes = self.block(id)?;
        bytes
            .get(offset..offset + mem::size_of::<T>())
            .and_then(|record| bytemuck::try_from_bytes(record).ok())
            .ok_or_else(|| Self::bad_record::<T>(id, offset))
    }

    pub fn get_mut<T: Pod>(&mut self, id: BlockId, offset: usize) -> Result<&mut T> {
        let bytes = self.block_mut(id)?;
        bytes
            .get_mut(offset..offset + mem::size_of::<T>())
            .and_then(|record| bytemuck::try_from_bytes_mut(record).ok())
            .ok_or_else(|| Self::bad_record::<T>(id, offset))
    }

    pub fn map<T: Pod, V>(&self, id: BlockId, offset: usize, f: impl FnOnce(&T) -> V) -> Result<V> {
        self.get(id, offset).map(f)
    }

    pub fn map_mut<T: Pod, V>(
        &mut self,
        id: BlockId,
        offset: usize,
        f: impl FnOnce(&mut T) -> V,
    ) -> Result<V> {
        self.get_mut(id, offset).map(f)
    }

    fn bad_record<T>(id: BlockId, offset: usize) -> Error {
        Error::corruption(
            id,
            format!(
                "{}-byte record at offset {offset} crosses the block or is misaligned",
                mem::size_of::<T>()
            ),
        )
    }

    fn check_block(&self, id: BlockId) -> Result<()> {
        if self.contains_block(id) {
            Ok(())
        } else {
            Err(Error::corruption(id, "block outside the image"))
        }
    }

    /// Marks block `id` dirty. Only called with in-range ids.
    fn raw_mut(&mut self, id: BlockId) -> &mut DataBlock {
        let index = usize::from(id);
        self.modified[index] = true;
        &mut self.blocks[index]
    }
}

/* Bitmaps */
impl Ext2FileSystem {
    /// Blocks tracked by the block bitmap: all but the boot block.
    #[inline]
    pub fn block_capacity(&self) -> usize {
        self.geometry.blocks_count as usize - 1
    }

    #[inline]
    pub fn inode_capacity(&self) -> usize {
        self.geometry.inodes_count as usize
    }

    pub fn block_bitmap(&self) -> Bitmap<&[u8]> {
        let bits = bytemuck::bytes_of(&self.blocks[usize::from(self.block_bitmap)]);
        Bitmap::new(bits, self.block_capacity())
    }

    pub fn block_bitmap_mut(&mut self) -> Bitmap<&mut [u8]> {
        let capacity = self.block_capacity();
        Bitmap::new(bytemuck::bytes_of_mut(self.raw_mut(self.block_bitmap)), capacity)
    }

    pub fn inode_bitmap(&self) -> Bitmap<&[u8]> {
        let bits = bytemuck::bytes_of(&self.blocks[usize::from(self.inode_bitmap)]);
        Bitmap::new(bits, self.inode_capacity())
    }

    pub fn inode_bitmap_mut(&mut self) -> Bitmap<&mut [u8]> {
        let capacity = self.inode_capacity();
        Bitmap::new(bytemuck::bytes_of_mut(self.raw_mut(self.inode_bitmap)), capacity)
    }
}

impl Drop for Ext2FileSystem {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            error!("failed to write the image back: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;

    fn formatted() -> Ext2FileSystem {
        let disk = Arc::new(RamDisk::new(Geometry::default().image_size()));
        Ext2FileSystem::format(disk, Geometry::default()).unwrap()
    }

    #[test]
    fn format_layout() {
        let efs = formatted();
        let sb = efs.super_block();
        assert!(sb.is_valid());
        assert_eq!(sb.blocks_count, 128);
        assert_eq!(sb.inodes_count, 32);
        assert_eq!(sb.first_ino, 11);

        let gd = efs.group_desc();
        assert_eq!((gd.block_bitmap, gd.inode_bitmap, gd.inode_table), (3, 4, 5));
        assert_eq!(gd.used_dirs_count, 2);

        // 1..=8 metadata, 9 root, 10 lost+found
        assert_eq!(efs.block_bitmap().count_used(), 10);
        assert_eq!(sb.free_blocks_count, 127 - 10);
        assert_eq!(u32::from(gd.free_blocks_count), sb.free_blocks_count);
        assert_eq!(efs.inode_bitmap().count_used(), 11);
        assert_eq!(sb.free_inodes_count, 32 - 11);
        assert_eq!(u32::from(gd.free_inodes_count), sb.free_inodes_count);
        // Padding bit of the missing block 128.
        assert!(bytemuck::bytes_of(&efs.blocks[3])[15] & 0x80 != 0);
    }

    #[test]
    fn format_root_and_lost_found() {
        let efs = formatted();
        let root = efs.inode(InodeId::ROOT).unwrap();
        assert_eq!(root.file_type(), Some(FileType::Directory));
        assert_eq!(root.links_count, 3);
        assert_eq!(root.size, BLOCK_SIZE as u32);
        assert_eq!(root.blocks, 2);

        let lost_found = efs.inode(InodeId::LOST_FOUND).unwrap();
        assert_eq!(lost_found.mode, 0o040700);
        assert_eq!(lost_found.links_count, 2);
    }

    #[test]
    fn reopen_after_sync() {
        let disk = Arc::new(RamDisk::new(Geometry::default().image_size()));
        let mut efs = Ext2FileSystem::format(disk.clone(), Geometry::default()).unwrap();
        efs.inode_mut(InodeId::ROOT).unwrap().uid = 42;
        efs.sync().unwrap();
        drop(efs);

        let efs = Ext2FileSystem::open(disk).unwrap();
        assert_eq!(efs.inode(InodeId::ROOT).unwrap().uid, 42);
        assert_eq!(efs.super_block().blocks_count, Geometry::default().blocks_count);
        assert_eq!(efs.inode_capacity(), 32);
    }

    #[test]
    fn open_rejects_foreign_image() {
        let disk = Arc::new(RamDisk::new(Geometry::default().image_size()));
        let err = Ext2FileSystem::open(disk).err().unwrap();
        assert!(matches!(err, Error::Corruption { block, .. } if block == BlockId::SUPER_BLOCK));
    }

    fn reopen_with(f: impl FnOnce(&mut SuperBlock)) -> Result<Ext2FileSystem> {
        let disk = Arc::new(RamDisk::new(Geometry::default().image_size()));
        let mut efs = Ext2FileSystem::format(disk.clone(), Geometry::default()).unwrap();
        f(efs.super_block_mut());
        drop(efs);
        Ext2FileSystem::open(disk)
    }

    #[test]
    fn open_checks_super_block_features() {
        // Unknown bits are only warned about.
        assert!(reopen_with(|sb| sb.feature_incompat |= 0x8000).is_ok());
        assert!(matches!(
            reopen_with(|sb| sb.feature_incompat |= 0x0010),
            Err(Error::Unsupported)
        ));
        assert!(matches!(
            reopen_with(|sb| sb.log_block_size = 2),
            Err(Error::Corruption { .. })
        ));
        assert!(matches!(
            reopen_with(|sb| sb.log_block_size = 70),
            Err(Error::Corruption { .. })
        ));
    }

    #[test]
    fn invalid_geometry() {
        let disk = Arc::new(RamDisk::new(16 * BLOCK_SIZE));
        let tiny = Geometry {
            blocks_count: 16,
            inodes_count: 12,
        };
        assert!(matches!(
            Ext2FileSystem::format(disk, tiny),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn out_of_range_access() {
        let efs = formatted();
        assert!(efs.inode(InodeId::NULL).is_err());
        assert!(efs.inode(InodeId::new(33)).is_err());
        assert!(efs.block(BlockId::new(128)).is_err());
        assert!(efs.get::<u64>(BlockId::new(9), BLOCK_SIZE - 4).is_err());
    }
}
