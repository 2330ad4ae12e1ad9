//! # Consistency checker
//!
//! One pass over the image, repairing as it goes:
//!
//! 1. free counters of the super block and group descriptor are reset to what
//!    the bitmaps say,
//! 2. the directory tree is walked from the root; every live entry gets the
//!    type tag of its inode, and the inode is marked used and undeleted,
//! 3. every used inode gets the bitmap bits of its data blocks.
//!
//! Each repair is recorded as a [`Fix`]; a second run over a repaired image
//! finds nothing.

use core::fmt;
use std::collections::HashSet;

use log::{info, warn};

use crate::dir::{self, BlockScope, DirEntry};
use crate::{BlockId, Ext2FileSystem, FileType, InodeId, Result};

/// Free counters kept by the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    SuperBlockFreeBlocks,
    GroupFreeBlocks,
    SuperBlockFreeInodes,
    GroupFreeInodes,
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SuperBlockFreeBlocks => "superblock's free blocks",
            Self::GroupFreeBlocks => "block group's free blocks",
            Self::SuperBlockFreeInodes => "superblock's free inodes",
            Self::GroupFreeInodes => "block group's free inodes",
        })
    }
}

/// One repair made by [`check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fix {
    FreeCount { counter: Counter, off_by: u32 },
    EntryType { inode: InodeId },
    InodeNotInUse { inode: InodeId },
    DeletionTime { inode: InodeId },
    BlockBitmap { inode: InodeId, blocks: u32 },
}

impl Fix {
    /// How many inconsistencies this repair accounts for.
    pub fn weight(&self) -> u32 {
        match *self {
            Self::FreeCount { off_by, .. } => off_by,
            Self::BlockBitmap { blocks, .. } => blocks,
            Self::EntryType { .. } | Self::InodeNotInUse { .. } | Self::DeletionTime { .. } => 1,
        }
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeCount { counter, off_by } => write!(
                f,
                "Fixed: {counter} counter was off by {off_by} compared to the bitmap"
            ),
            Self::EntryType { inode } => {
                write!(f, "Fixed: Entry type vs inode mismatch: inode [{inode}]")
            }
            Self::InodeNotInUse { inode } => {
                write!(f, "Fixed: inode [{inode}] not marked as in-use")
            }
            Self::DeletionTime { inode } => {
                write!(f, "Fixed: valid inode marked for deletion: [{inode}]")
            }
            Self::BlockBitmap { inode, blocks } => write!(
                f,
                "Fixed: {blocks} in-use data blocks not marked in data bitmap for inode: [{inode}]"
            ),
        }
    }
}

/// Every repair of one run, in the order they were made.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub fixes: Vec<Fix>,
}

impl CheckReport {
    /// Weighted number of inconsistencies repaired.
    pub fn total(&self) -> u32 {
        self.fixes.iter().map(Fix::weight).sum()
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.fixes.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fix in &self.fixes {
            writeln!(f, "{fix}")?;
        }
        match self.total() {
            0 => write!(f, "No file system inconsistencies detected!"),
            total => write!(f, "{total} file system inconsistencies repaired!"),
        }
    }
}

/// Checks and repairs `efs` in place.
pub fn check(efs: &mut Ext2FileSystem) -> Result<CheckReport> {
    let mut checker = Checker {
        efs,
        fixes: Vec::new(),
        visited: HashSet::new(),
    };
    checker.reconcile_counters();
    checker.visited.insert(InodeId::ROOT);
    checker.check_directory(InodeId::ROOT)?;
    checker.check_data_blocks()?;

    let report = CheckReport {
        fixes: checker.fixes,
    };
    info!("check done, {} inconsistencies repaired", report.total());
    Ok(report)
}

struct Checker<'a> {
    efs: &'a mut Ext2FileSystem,
    fixes: Vec<Fix>,
    /// Directories already walked
    visited: HashSet<InodeId>,
}

impl Checker<'_> {
    fn record(&mut self, fix: Fix) {
        info!("{fix}");
        self.fixes.push(fix);
    }

    fn reconcile_counters(&mut self) {
        let free_blocks = self.efs.block_bitmap().count_free() as u32;
        let free_inodes = self.efs.inode_bitmap().count_free() as u32;

        let (sb, gd) = (self.efs.super_block(), self.efs.group_desc());
        let stored = [
            (Counter::SuperBlockFreeBlocks, sb.free_blocks_count, free_blocks),
            (Counter::GroupFreeBlocks, gd.free_blocks_count.into(), free_blocks),
            (Counter::SuperBlockFreeInodes, sb.free_inodes_count, free_inodes),
            (Counter::GroupFreeInodes, gd.free_inodes_count.into(), free_inodes),
        ];

        let sb = self.efs.super_block_mut();
        sb.free_blocks_count = free_blocks;
        sb.free_inodes_count = free_inodes;
        let gd = self.efs.group_desc_mut();
        gd.free_blocks_count = free_blocks as u16;
        gd.free_inodes_count = free_inodes as u16;

        for (counter, stored, truth) in stored {
            if stored != truth {
                self.record(Fix::FreeCount {
                    counter,
                    off_by: stored.abs_diff(truth),
                });
            }
        }
    }

    /// Checks every entry of directory `dir`, descending into subdirectories.
    fn check_directory(&mut self, dir: InodeId) -> Result<()> {
        for block in dir::dir_blocks(self.efs, dir, BlockScope::WithIndirect)? {
            for entry in dir::entries(self.efs, block)? {
                self.check_entry(block, &entry)?;
            }
        }
        Ok(())
    }

    fn check_entry(&mut self, block: BlockId, entry: &DirEntry) -> Result<()> {
        let id = entry.inode;
        if id.is_null() {
            return Ok(());
        }
        if !self.efs.contains_inode(id) {
            warn!(
                "entry {:?} in block {block} points outside the inode table: {id}",
                String::from_utf8_lossy(&entry.name)
            );
            return Ok(());
        }
        let Some(kind) = self.efs.inode(id)?.file_type() else {
            return Ok(());
        };

        if entry.file_type != kind.tag() {
            dir::update_header(self.efs, block, entry.offset, |header| {
                header.file_type = kind.tag();
            })?;
            self.record(Fix::EntryType { inode: id });
        }

        if self.efs.claim_inode(id)? {
            self.efs.adjust_free_inodes(-1);
            self.record(Fix::InodeNotInUse { inode: id });
        }

        let inode = self.efs.inode_mut(id)?;
        if inode.is_deleted() {
            inode.dtime = 0;
            self.record(Fix::DeletionTime { inode: id });
        }

        if kind == FileType::Directory && !entry.is_dot() && self.visited.insert(id) {
            self.check_directory(id)?;
        }
        Ok(())
    }

    /// Marks the data blocks of every used inode in the block bitmap.
    fn check_data_blocks(&mut self) -> Result<()> {
        for index in 0..self.efs.inode_capacity() {
            let id = InodeId::from_index(index);
            if !self.efs.is_inode_used(id) {
                continue;
            }
            let inode = *self.efs.inode(id)?;
            if inode.file_type().is_none() {
                continue;
            }

            let mut blocks: Vec<_> = inode.direct_blocks().collect();
            if let Some(indirect) = inode.indirect_block() {
                if self.efs.contains_block(indirect) {
                    blocks.extend(dir::indirect_pointees(self.efs, indirect)?);
                } else {
                    warn!("inode {id} has indirect block {indirect} outside the image");
                }
            }

            let mut fixed = 0;
            for block in blocks {
                if !self.efs.contains_block(block) {
                    warn!("inode {id} points at block {block} outside the image");
                    continue;
                }
                if self.efs.claim_block(block)? {
                    self.efs.adjust_free_blocks(-1);
                    fixed += 1;
                }
            }
            if fixed > 0 {
                self.record(Fix::BlockBitmap {
                    inode: id,
                    blocks: fixed,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_wording() {
        let report = CheckReport {
            fixes: vec![
                Fix::FreeCount {
                    counter: Counter::GroupFreeInodes,
                    off_by: 3,
                },
                Fix::BlockBitmap {
                    inode: InodeId::new(12),
                    blocks: 2,
                },
            ],
        };
        assert_eq!(report.total(), 5);
        assert_eq!(
            report.to_string(),
            "Fixed: block group's free inodes counter was off by 3 compared to the bitmap\n\
             Fixed: 2 in-use data blocks not marked in data bitmap for inode: [12]\n\
             5 file system inconsistencies repaired!"
        );
    }

    #[test]
    fn clean_report() {
        let report = CheckReport::default();
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "No file system inconsistencies detected!");
    }
}
