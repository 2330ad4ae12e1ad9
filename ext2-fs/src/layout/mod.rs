//! # On-disk data structures
//!
//! Layout of a single-group image with 1 KiB blocks:
//! boot block | super block | group descriptor | block bitmap | inode bitmap |
//! inode table | data blocks
//!
//! Bitmap and inode table positions are read from the group descriptor, the
//! order above is what [`Ext2FileSystem::format`](crate::Ext2FileSystem::format)
//! writes.

mod super_block;
pub use super_block::{IncompatFeature, SuperBlock};

mod group_desc;
pub use group_desc::GroupDesc;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, FileType, IndirectBlock, Permission, DIRECT_COUNT, INDIRECT_COUNT};

mod dir_entry;
pub use dir_entry::DirEntryHeader;
