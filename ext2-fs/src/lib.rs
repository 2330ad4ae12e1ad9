//! A minimal ext2 toolkit working on a single-group image with 1 KiB blocks.

/* ext2-fs architecture, top-down */

// Tool operations: mkdir, copy-in, links, remove, restore, check
pub mod ops;

// Consistency checker: recompute counters, repair entries and bitmaps
pub mod checker;

// Directory entry manager: lookup, insert, delete, restore
pub mod dir;

// Path resolver: absolute path tokens walked from the root inode
pub mod path;

// Bitmap allocator for inodes and blocks
mod allocator;

// Image accessor: the whole image plus typed views of its records
mod efs;

// On-disk data structures
pub mod layout;

mod error;
mod id;

pub use self::{
    efs::{Ext2FileSystem, Geometry},
    error::{Error, Result},
    id::{BlockId, InodeId},
    layout::{FileType, Permission},
};

pub use block_dev::BlockDevice;

pub const MAGIC: u16 = 0xEF53;
pub const BLOCK_SIZE: usize = 1024;
/// Number of 512-byte sectors per block, the unit of `DiskInode::blocks`.
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / 512) as u32;
pub const INODE_SIZE: usize = 128;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
/// Longest directory entry name.
pub const NAME_MAX: usize = 255;

/// Block as kept in memory; `u64` elements keep every record view aligned.
type DataBlock = [u64; BLOCK_SIZE / 8];
