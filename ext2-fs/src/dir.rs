//! # Directory entry manager
//!
//! A directory block is a chain of variable length entries linked by
//! `rec_len`. Deleting an entry folds its span into the previous entry and
//! leaves its bytes in place as dead space; restoring searches that dead space.
//!
//! Operations differ in which blocks they scan, see [`BlockScope`]. Lookups
//! only read the direct blocks, growth, removal and restore also visit the
//! pointees of the single indirect block.

use enumflags2::BitFlags;
use log::{debug, info, trace};

use crate::layout::{DirEntryHeader, DiskInode, IndirectBlock, Permission};
use crate::layout::{DIRECT_COUNT, INDIRECT_COUNT};
use crate::{BlockId, Error, Ext2FileSystem, FileType, InodeId, Result, BLOCK_SIZE, NAME_MAX};

/// Which blocks of a directory an operation visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScope {
    /// Pointer slots 0..12
    Direct,
    /// Direct blocks, then the pointees of the single indirect block
    WithIndirect,
}

/// Data blocks of `dir` in logical order.
pub fn dir_blocks(efs: &Ext2FileSystem, dir: InodeId, scope: BlockScope) -> Result<Vec<BlockId>> {
    let inode = efs.inode(dir)?;
    let mut blocks: Vec<_> = inode.direct_blocks().collect();
    if scope == BlockScope::WithIndirect && blocks.len() == DIRECT_COUNT {
        if let Some(indirect) = inode.indirect_block() {
            blocks.extend(indirect_pointees(efs, indirect)?);
        }
    }
    Ok(blocks)
}

/// Used pointers of an indirect block, up to the first empty one.
pub fn indirect_pointees(efs: &Ext2FileSystem, indirect: BlockId) -> Result<Vec<BlockId>> {
    efs.map(indirect, 0, |pointers: &IndirectBlock| {
        pointers
            .iter()
            .take_while(|&&raw| raw != 0)
            .map(|&raw| BlockId::new(raw))
            .collect()
    })
}

/// A decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Byte offset in its block
    pub offset: usize,
    pub inode: InodeId,
    pub rec_len: usize,
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    #[inline]
    pub fn kind(&self) -> Option<FileType> {
        FileType::from_tag(self.file_type)
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.inode.is_null()
    }

    #[inline]
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name.as_bytes()
    }

    /// `.` or `..`
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }

    fn min_rec_len(&self) -> usize {
        DirEntryHeader::min_rec_len(self.name.len())
    }

    fn end(&self) -> usize {
        self.offset + self.rec_len
    }
}

/// Where a newly created entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot {
    pub block: BlockId,
    pub offset: usize,
}

/// All entry records of `block` in chain order, tombstones included.
///
/// Fails with `Corruption` unless the `rec_len` chain covers the block
/// exactly.
pub fn entries(efs: &Ext2FileSystem, block: BlockId) -> Result<Vec<DirEntry>> {
    let bytes = efs.block(block)?;
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < BLOCK_SIZE {
        let header = read_header(block, bytes, offset)?;
        let rec_len = header.record_len();
        let name_len = header.name_len as usize;
        if rec_len < DirEntryHeader::SIZE || rec_len % 4 != 0 || offset + rec_len > BLOCK_SIZE {
            return Err(Error::corruption(
                block,
                format!("bad rec_len {rec_len} at offset {offset}"),
            ));
        }
        if DirEntryHeader::SIZE + name_len > rec_len {
            return Err(Error::corruption(
                block,
                format!("name of entry at offset {offset} overruns its record"),
            ));
        }
        let name_start = offset + DirEntryHeader::SIZE;
        entries.push(DirEntry {
            offset,
            inode: InodeId::new(header.inode),
            rec_len,
            file_type: header.file_type,
            name: bytes[name_start..name_start + name_len].to_vec(),
        });
        offset += rec_len;
    }
    trace!("block {block}: {} entries", entries.len());
    Ok(entries)
}

/// Inode of the live entry `name` of type `kind` in `block`.
pub fn find_in_block(
    efs: &Ext2FileSystem,
    block: BlockId,
    name: &str,
    kind: FileType,
) -> Result<InodeId> {
    let mut wrong_type = false;
    for entry in entries(efs, block)? {
        if entry.is_tombstone() || !entry.is_named(name) {
            continue;
        }
        if entry.kind() == Some(kind) {
            return Ok(entry.inode);
        }
        wrong_type = true;
    }
    Err(if wrong_type {
        Error::WrongType
    } else {
        Error::NotFound
    })
}

/// [`find_in_block`] over the direct blocks of `dir`.
pub fn find_in_inode(
    efs: &Ext2FileSystem,
    dir: InodeId,
    name: &str,
    kind: FileType,
) -> Result<InodeId> {
    if !efs.inode(dir)?.is_dir() {
        return Err(Error::NotFound);
    }
    let mut wrong_type = false;
    for block in dir_blocks(efs, dir, BlockScope::Direct)? {
        match find_in_block(efs, block, name, kind) {
            Err(Error::NotFound) => {}
            Err(Error::WrongType) => wrong_type = true,
            found => return found,
        }
    }
    Err(if wrong_type {
        Error::WrongType
    } else {
        Error::NotFound
    })
}

/// The live entry called `name` in `dir`, of any type.
pub fn lookup(
    efs: &Ext2FileSystem,
    dir: InodeId,
    name: &str,
    scope: BlockScope,
) -> Result<Option<DirEntry>> {
    if !efs.inode(dir)?.is_dir() {
        return Err(Error::NotFound);
    }
    for block in dir_blocks(efs, dir, scope)? {
        let found = entries(efs, block)?
            .into_iter()
            .find(|entry| !entry.is_tombstone() && entry.is_named(name));
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Makes room for an entry called `name` in `dir` and writes its name.
///
/// The last entry of the last block gives up its slack when that is enough,
/// otherwise the directory grows by one block. Inode and type of the new
/// entry stay 0 until [`fill_entry`].
pub fn create_dir_entry(efs: &mut Ext2FileSystem, dir: InodeId, name: &str) -> Result<EntrySlot> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(Error::InvalidPath);
    }
    let needed = DirEntryHeader::min_rec_len(name.len());

    if let Some(&last_block) = dir_blocks(efs, dir, BlockScope::WithIndirect)?.last() {
        if let Some(last) = entries(efs, last_block)?.pop() {
            let keep = last.min_rec_len();
            if last.rec_len >= keep + needed {
                update_header(efs, last_block, last.offset, |header| {
                    header.rec_len = keep as u16;
                })?;
                let slot = EntrySlot {
                    block: last_block,
                    offset: last.offset + keep,
                };
                write_entry(efs, slot, last.rec_len - keep, name)?;
                debug!("entry {name:?} at {}:{} in inode {dir}", slot.block, slot.offset);
                return Ok(slot);
            }
        }
    }

    let block = grow_dir(efs, dir)?;
    let slot = EntrySlot { block, offset: 0 };
    write_entry(efs, slot, BLOCK_SIZE, name)?;
    debug!("entry {name:?} opens block {block} of inode {dir}");
    Ok(slot)
}

/// Appends a zeroed block to `dir`, using the single indirect block once the
/// direct slots are taken.
fn grow_dir(efs: &mut Ext2FileSystem, dir: InodeId) -> Result<BlockId> {
    let inode = *efs.inode(dir)?;
    let direct = inode.direct_blocks().count();

    let block = if direct < DIRECT_COUNT {
        let block = alloc_zeroed(efs)?;
        let inode = efs.inode_mut(dir)?;
        inode.block[direct] = block.into();
        inode.add_block();
        block
    } else if let Some(indirect) = inode.indirect_block() {
        let used = indirect_pointees(efs, indirect)?.len();
        if used == INDIRECT_COUNT {
            return Err(Error::Unsupported);
        }
        let block = alloc_zeroed(efs)?;
        efs.map_mut(indirect, 0, |pointers: &mut IndirectBlock| {
            pointers[used] = block.into();
        })?;
        efs.inode_mut(dir)?.add_block();
        block
    } else {
        let indirect = alloc_zeroed(efs)?;
        efs.inode_mut(dir)?.set_indirect_block(indirect);
        efs.inode_mut(dir)?.add_block();
        info!("inode {dir} now uses indirect block {indirect}");

        let block = alloc_zeroed(efs)?;
        efs.map_mut(indirect, 0, |pointers: &mut IndirectBlock| {
            pointers[0] = block.into();
        })?;
        efs.inode_mut(dir)?.add_block();
        block
    };

    let inode = efs.inode_mut(dir)?;
    inode.size += BLOCK_SIZE as u32;
    info!("directory inode {dir} grew by block {block}");
    Ok(block)
}

fn alloc_zeroed(efs: &mut Ext2FileSystem) -> Result<BlockId> {
    let block = efs.alloc_block()?;
    efs.zero_block(block)?;
    Ok(block)
}

/// Points the entry at `slot` to `inode`.
pub fn fill_entry(
    efs: &mut Ext2FileSystem,
    slot: EntrySlot,
    inode: InodeId,
    kind: FileType,
) -> Result<()> {
    update_header(efs, slot.block, slot.offset, |header| {
        header.inode = inode.into();
        header.file_type = kind.tag();
    })
}

/// [`create_dir_entry`] followed by [`fill_entry`].
pub fn add_entry(
    efs: &mut Ext2FileSystem,
    dir: InodeId,
    name: &str,
    inode: InodeId,
    kind: FileType,
) -> Result<EntrySlot> {
    let slot = create_dir_entry(efs, dir, name)?;
    fill_entry(efs, slot, inode, kind)?;
    Ok(slot)
}

/// Writes the `.` and `..` entries of a fresh directory block.
pub fn init_dir_block(
    efs: &mut Ext2FileSystem,
    block: BlockId,
    this: InodeId,
    parent: InodeId,
) -> Result<()> {
    efs.zero_block(block)?;
    let dot = EntrySlot { block, offset: 0 };
    let dot_dot = EntrySlot {
        block,
        offset: DirEntryHeader::min_rec_len(1),
    };
    write_entry(efs, dot, dot_dot.offset, ".")?;
    write_entry(efs, dot_dot, BLOCK_SIZE - dot_dot.offset, "..")?;
    fill_entry(efs, dot, this, FileType::Directory)?;
    fill_entry(efs, dot_dot, parent, FileType::Directory)
}

/// Allocates and links a new empty directory `name` under `parent`.
pub fn create_subdir(
    efs: &mut Ext2FileSystem,
    parent: InodeId,
    name: &str,
    perm: BitFlags<Permission>,
) -> Result<InodeId> {
    let id = efs.alloc_inode()?;
    let block = efs.alloc_block()?;
    init_dir_block(efs, block, id, parent)?;

    let mut inode = DiskInode::new(FileType::Directory, perm, Ext2FileSystem::now());
    inode.links_count = 2;
    inode.size = BLOCK_SIZE as u32;
    inode.block[0] = block.into();
    inode.add_block();
    *efs.inode_mut(id)? = inode;

    add_entry(efs, parent, name, id, FileType::Directory)?;
    let parent_inode = efs.inode_mut(parent)?;
    parent_inode.links_count = parent_inode.links_count.saturating_add(1);
    let gd = efs.group_desc_mut();
    gd.used_dirs_count = gd.used_dirs_count.saturating_add(1);

    info!("created directory {name:?} as inode {id} under {parent}");
    Ok(id)
}

/// Removes the live entry `name` from `block`, returning its inode.
///
/// The first entry of a block becomes a tombstone in place, any other one is
/// merged into its predecessor.
pub fn delete_entry_in_block(efs: &mut Ext2FileSystem, block: BlockId, name: &str) -> Result<InodeId> {
    let entries = entries(efs, block)?;
    let index = entries
        .iter()
        .position(|entry| !entry.is_tombstone() && entry.is_named(name))
        .ok_or(Error::NotFound)?;
    let target = &entries[index];

    match index.checked_sub(1).map(|prev| &entries[prev]) {
        None => update_header(efs, block, target.offset, |header| header.inode = 0)?,
        Some(prev) => update_header(efs, block, prev.offset, |header| {
            header.rec_len = (prev.rec_len + target.rec_len) as u16;
        })?,
    }
    debug!("deleted entry {name:?} ({}) from block {block}", target.inode);
    Ok(target.inode)
}

/// Brings a deleted entry `name` back from the dead space of `block`.
///
/// Directories cannot be restored. The entry's inode and blocks must not have
/// been reused; a partially reclaimed file is left as it is.
pub fn restore_entry_in_block(
    efs: &mut Ext2FileSystem,
    block: BlockId,
    name: &str,
) -> Result<InodeId> {
    let (owner, offset, header) = find_deleted(efs, block, name)?.ok_or(Error::NotFound)?;
    if FileType::from_tag(header.file_type) == Some(FileType::Directory) {
        return Err(Error::WrongType);
    }
    let id = InodeId::new(header.inode);
    restore_inode(efs, id)?;

    update_header(efs, block, owner.offset, |header| {
        header.rec_len = (offset - owner.offset) as u16;
    })?;
    update_header(efs, block, offset, |header| {
        header.rec_len = (owner.end() - offset) as u16;
    })?;
    info!("restored {name:?} as inode {id} in block {block}");
    Ok(id)
}

/// Walks the dead space behind every entry at minimum record strides, looking
/// for a record called `name` that still names an inode.
fn find_deleted(
    efs: &Ext2FileSystem,
    block: BlockId,
    name: &str,
) -> Result<Option<(DirEntry, usize, DirEntryHeader)>> {
    let bytes = efs.block(block)?;
    for owner in entries(efs, block)? {
        let mut offset = owner.offset + owner.min_rec_len();
        while offset + DirEntryHeader::SIZE <= owner.end() {
            let header = read_header(block, bytes, offset)?;
            let name_len = header.name_len as usize;
            let name_start = offset + DirEntryHeader::SIZE;
            if name_len == 0 || name_start + name_len > owner.end() {
                break;
            }
            let candidate = InodeId::new(header.inode);
            if &bytes[name_start..name_start + name_len] == name.as_bytes()
                && efs.contains_inode(candidate)
            {
                trace!("found deleted {name:?} at {block}:{offset}");
                return Ok(Some((owner, offset, header)));
            }
            offset += DirEntryHeader::min_rec_len(name_len);
        }
    }
    Ok(None)
}

/// Reclaims inode `id` and every block it points to.
///
/// Fails with `Overwritten` as soon as one of them is found in use again;
/// bits claimed up to that point stay claimed.
fn restore_inode(efs: &mut Ext2FileSystem, id: InodeId) -> Result<()> {
    if !efs.claim_inode(id)? {
        return Err(Error::Overwritten);
    }
    let inode = *efs.inode(id)?;

    let mut claimed = 0;
    let mut claim = |efs: &mut Ext2FileSystem, block: BlockId| -> Result<()> {
        if efs.claim_block(block)? {
            claimed += 1;
            Ok(())
        } else {
            debug!("block {block} of inode {id} was reused");
            Err(Error::Overwritten)
        }
    };
    for block in inode.direct_blocks() {
        claim(efs, block)?;
    }
    if let Some(indirect) = inode.indirect_block() {
        claim(efs, indirect)?;
        for block in indirect_pointees(efs, indirect)? {
            claim(efs, block)?;
        }
    }

    efs.adjust_free_inodes(-1);
    efs.adjust_free_blocks(-claimed);
    let inode = efs.inode_mut(id)?;
    inode.dtime = 0;
    inode.links_count = inode.links_count.saturating_add(1);
    Ok(())
}

fn read_header(block: BlockId, bytes: &[u8], offset: usize) -> Result<DirEntryHeader> {
    bytes
        .get(offset..offset + DirEntryHeader::SIZE)
        .map(bytemuck::pod_read_unaligned)
        .ok_or_else(|| {
            Error::corruption(block, format!("entry header at offset {offset} crosses the block"))
        })
}

/// Rewrites the header of the entry at `offset` in place.
pub(crate) fn update_header(
    efs: &mut Ext2FileSystem,
    block: BlockId,
    offset: usize,
    f: impl FnOnce(&mut DirEntryHeader),
) -> Result<()> {
    let bytes = efs.block_mut(block)?;
    let mut header = read_header(block, bytes, offset)?;
    f(&mut header);
    bytes[offset..offset + DirEntryHeader::SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    Ok(())
}

/// Writes an unlinked entry called `name` spanning `rec_len` bytes.
fn write_entry(efs: &mut Ext2FileSystem, slot: EntrySlot, rec_len: usize, name: &str) -> Result<()> {
    let header = DirEntryHeader {
        inode: 0,
        rec_len: rec_len as u16,
        name_len: name.len() as u8,
        file_type: 0,
    };
    let end = slot.offset + DirEntryHeader::SIZE + name.len();
    let record = efs
        .block_mut(slot.block)?
        .get_mut(slot.offset..end)
        .ok_or_else(|| Error::corruption(slot.block, format!("no room for {name:?}")))?;
    record[..DirEntryHeader::SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    record[DirEntryHeader::SIZE..].copy_from_slice(name.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use block_dev::RamDisk;

    use super::*;
    use crate::Geometry;

    fn formatted() -> Ext2FileSystem {
        let disk = Arc::new(RamDisk::new(Geometry::default().image_size()));
        Ext2FileSystem::format(disk, Geometry::default()).unwrap()
    }

    fn root_block(efs: &Ext2FileSystem) -> BlockId {
        dir_blocks(efs, InodeId::ROOT, BlockScope::Direct).unwrap()[0]
    }

    fn rec_len_sum(efs: &Ext2FileSystem, block: BlockId) -> usize {
        entries(efs, block).unwrap().iter().map(|entry| entry.rec_len).sum()
    }

    #[test]
    fn fresh_root_entries() {
        let efs = formatted();
        let names: Vec<_> = entries(&efs, root_block(&efs))
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.inode, entry.rec_len))
            .collect();
        assert_eq!(
            names,
            [
                (b".".to_vec(), InodeId::ROOT, 12),
                (b"..".to_vec(), InodeId::ROOT, 12),
                (b"lost+found".to_vec(), InodeId::LOST_FOUND, 1000),
            ]
        );
    }

    #[test]
    fn create_then_find() {
        let mut efs = formatted();
        let slot = create_dir_entry(&mut efs, InodeId::ROOT, "x").unwrap();
        assert_eq!(slot.offset, 12 + 12 + 20);
        // Unfilled entries are tombstones.
        assert!(matches!(
            find_in_inode(&efs, InodeId::ROOT, "x", FileType::Regular),
            Err(Error::NotFound)
        ));

        fill_entry(&mut efs, slot, InodeId::new(20), FileType::Regular).unwrap();
        assert_eq!(
            find_in_inode(&efs, InodeId::ROOT, "x", FileType::Regular).unwrap(),
            InodeId::new(20)
        );
        assert!(matches!(
            find_in_inode(&efs, InodeId::ROOT, "x", FileType::Directory),
            Err(Error::WrongType)
        ));
        assert_eq!(rec_len_sum(&efs, slot.block), BLOCK_SIZE);
    }

    #[test]
    fn bad_names() {
        let mut efs = formatted();
        assert!(matches!(
            create_dir_entry(&mut efs, InodeId::ROOT, ""),
            Err(Error::InvalidPath)
        ));
        let long = "n".repeat(NAME_MAX + 1);
        assert!(matches!(
            create_dir_entry(&mut efs, InodeId::ROOT, &long),
            Err(Error::InvalidPath)
        ));
    }

    #[test]
    fn full_block_grows_directory() {
        let mut efs = formatted();
        let name = "e".repeat(NAME_MAX);
        // lost+found leaves 980 spare bytes, room for three 264-byte entries.
        let mut slots = Vec::new();
        for i in 0..4 {
            let name = format!("{}{i}", &name[1..]);
            let slot = add_entry(&mut efs, InodeId::ROOT, &name, InodeId::new(12), FileType::Regular);
            slots.push(slot.unwrap());
        }
        let first = root_block(&efs);
        assert!(slots[..3].iter().all(|slot| slot.block == first));
        assert_eq!(slots[3].offset, 0);
        assert_ne!(slots[3].block, first);

        let root = efs.inode(InodeId::ROOT).unwrap();
        assert_eq!(root.size, 2 * BLOCK_SIZE as u32);
        assert_eq!(root.blocks, 4);
        assert_eq!(rec_len_sum(&efs, first), BLOCK_SIZE);
        assert_eq!(entries(&efs, slots[3].block).unwrap()[0].rec_len, BLOCK_SIZE);
    }

    #[test]
    fn delete_first_and_middle() {
        let mut efs = formatted();
        let block = root_block(&efs);
        add_entry(&mut efs, InodeId::ROOT, "a", InodeId::new(12), FileType::Regular).unwrap();
        add_entry(&mut efs, InodeId::ROOT, "b", InodeId::new(13), FileType::Regular).unwrap();

        assert_eq!(delete_entry_in_block(&mut efs, block, "a").unwrap(), InodeId::new(12));
        assert_eq!(rec_len_sum(&efs, block), BLOCK_SIZE);
        let entries_left = entries(&efs, block).unwrap();
        assert!(entries_left.iter().all(|entry| !entry.is_named("a")));

        assert_eq!(delete_entry_in_block(&mut efs, block, ".").unwrap(), InodeId::ROOT);
        let first = entries(&efs, block).unwrap().remove(0);
        assert!(first.is_tombstone());
        assert_eq!(first.rec_len, 12);
        assert!(matches!(
            delete_entry_in_block(&mut efs, block, "."),
            Err(Error::NotFound)
        ));
        assert_eq!(rec_len_sum(&efs, block), BLOCK_SIZE);
    }

    #[test]
    fn restore_needs_free_inode() {
        let mut efs = formatted();
        let block = root_block(&efs);
        // Entry naming an inode that is still in use.
        add_entry(&mut efs, InodeId::ROOT, "a", InodeId::LOST_FOUND, FileType::Regular).unwrap();
        delete_entry_in_block(&mut efs, block, "a").unwrap();
        assert!(matches!(
            restore_entry_in_block(&mut efs, block, "a"),
            Err(Error::Overwritten)
        ));
        assert!(matches!(
            restore_entry_in_block(&mut efs, block, "zzz"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn deleted_directory_is_not_restored() {
        let mut efs = formatted();
        let block = root_block(&efs);
        delete_entry_in_block(&mut efs, block, "lost+found").unwrap();
        assert!(matches!(
            restore_entry_in_block(&mut efs, block, "lost+found"),
            Err(Error::WrongType)
        ));
    }
}
