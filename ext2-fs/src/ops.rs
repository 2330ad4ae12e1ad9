//! # Tool operations
//!
//! What the command line tools do, on absolute paths. An operation that fails
//! halfway leaves whatever it already changed in place; run [`check`] to
//! reconcile the bitmaps and counters afterwards.

use log::info;

use crate::checker::{self, CheckReport};
use crate::dir::{self, BlockScope};
use crate::layout::{DiskInode, IndirectBlock, DIRECT_COUNT, INDIRECT_COUNT};
use crate::path;
use crate::{BlockId, Error, Ext2FileSystem, FileType, InodeId, Permission, Result, BLOCK_SIZE};

/// Largest file the direct and single indirect blocks can hold.
pub const MAX_FILE_SIZE: usize = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;

/// Creates an empty directory at `path`.
pub fn make_dir(efs: &mut Ext2FileSystem, path: &str) -> Result<InodeId> {
    if path::parse_path(path)?.len() == 1 {
        return Err(Error::AlreadyExists);
    }
    let (parent, name) = path::resolve_parent(efs, path)?;
    ensure_absent(efs, parent, name)?;
    dir::create_subdir(efs, parent, name, Permission::directory())
}

/// Stores `data` as a new regular file at `dest`.
pub fn copy_in(efs: &mut Ext2FileSystem, data: &[u8], dest: &str) -> Result<InodeId> {
    if data.len() > MAX_FILE_SIZE {
        return Err(Error::Unsupported);
    }
    let id = create_file(efs, dest, FileType::Regular, data)?;
    info!("copied {} bytes to {dest:?} as inode {id}", data.len());
    Ok(id)
}

/// Adds `dest` as another name of the file or symlink at `src`.
pub fn hard_link(efs: &mut Ext2FileSystem, src: &str, dest: &str) -> Result<()> {
    let (id, kind) = resolve(efs, src)?;
    if kind == FileType::Directory {
        return Err(Error::WrongType);
    }
    let (parent, name) = path::resolve_parent(efs, dest)?;
    ensure_absent(efs, parent, name)?;

    dir::add_entry(efs, parent, name, id, kind)?;
    let inode = efs.inode_mut(id)?;
    inode.links_count = inode.links_count.saturating_add(1);
    info!("linked {dest:?} to inode {id}");
    Ok(())
}

/// Creates a symlink at `dest` whose target is the path `src`, which must
/// exist.
pub fn sym_link(efs: &mut Ext2FileSystem, src: &str, dest: &str) -> Result<InodeId> {
    resolve(efs, src)?;
    if src.len() > BLOCK_SIZE {
        return Err(Error::Unsupported);
    }
    let id = create_file(efs, dest, FileType::Symlink, src.as_bytes())?;
    info!("symlinked {dest:?} to {src:?} as inode {id}");
    Ok(id)
}

/// Unlinks the file or symlink at `path`. The last link frees its inode and
/// blocks but keeps their contents for [`restore`].
pub fn remove(efs: &mut Ext2FileSystem, path: &str) -> Result<()> {
    if path::parse_path(path)?.len() == 1 {
        return Err(Error::WrongType);
    }
    let (parent, name) = path::resolve_parent(efs, path)?;
    let entry = dir::lookup(efs, parent, name, BlockScope::WithIndirect)?.ok_or(Error::NotFound)?;
    if efs.inode(entry.inode)?.is_dir() {
        return Err(Error::WrongType);
    }

    let mut removed = None;
    for block in dir::dir_blocks(efs, parent, BlockScope::WithIndirect)? {
        match dir::delete_entry_in_block(efs, block, name) {
            Err(Error::NotFound) => continue,
            result => {
                removed = Some(result?);
                break;
            }
        }
    }
    let id = removed.ok_or(Error::NotFound)?;

    let inode = efs.inode_mut(id)?;
    inode.links_count = inode.links_count.saturating_sub(1);
    if inode.links_count > 0 {
        info!("unlinked {path:?}, inode {id} has {} links left", inode.links_count);
        return Ok(());
    }
    // Never 0, which would read as a live inode.
    inode.dtime = Ext2FileSystem::now().max(1);
    let inode = *inode;

    efs.dealloc_inode(id)?;
    for block in inode.direct_blocks() {
        efs.dealloc_block(block)?;
    }
    if let Some(indirect) = inode.indirect_block() {
        for block in dir::indirect_pointees(efs, indirect)? {
            efs.dealloc_block(block)?;
        }
        efs.dealloc_block(indirect)?;
    }
    info!("removed {path:?}, freed inode {id}");
    Ok(())
}

/// Brings back a removed file or symlink at `path`.
pub fn restore(efs: &mut Ext2FileSystem, path: &str) -> Result<InodeId> {
    let (parent, name) = path::resolve_parent(efs, path)?;
    ensure_absent(efs, parent, name)?;
    for block in dir::dir_blocks(efs, parent, BlockScope::WithIndirect)? {
        match dir::restore_entry_in_block(efs, block, name) {
            Err(Error::NotFound) => continue,
            result => return result,
        }
    }
    Err(Error::NotFound)
}

/// Runs the consistency checker.
pub fn check(efs: &mut Ext2FileSystem) -> Result<CheckReport> {
    checker::check(efs)
}

fn ensure_absent(efs: &Ext2FileSystem, parent: InodeId, name: &str) -> Result<()> {
    match dir::lookup(efs, parent, name, BlockScope::Direct)? {
        Some(_) => Err(Error::AlreadyExists),
        None => Ok(()),
    }
}

/// Inode and type of whatever `path` names, the root included.
fn resolve(efs: &Ext2FileSystem, path: &str) -> Result<(InodeId, FileType)> {
    if path::parse_path(path)?.len() == 1 {
        return Ok((InodeId::ROOT, FileType::Directory));
    }
    let (parent, name) = path::resolve_parent(efs, path)?;
    let entry = dir::lookup(efs, parent, name, BlockScope::Direct)?.ok_or(Error::NotFound)?;
    let kind = efs.inode(entry.inode)?.file_type().ok_or(Error::NotFound)?;
    Ok((entry.inode, kind))
}

/// Allocates an inode of type `kind` holding `data`, linked at `dest`.
fn create_file(
    efs: &mut Ext2FileSystem,
    dest: &str,
    kind: FileType,
    data: &[u8],
) -> Result<InodeId> {
    let (parent, name) = path::resolve_parent(efs, dest)?;
    ensure_absent(efs, parent, name)?;

    let id = efs.alloc_inode()?;
    let mut inode = DiskInode::new(kind, Permission::default_for(kind), Ext2FileSystem::now());
    inode.size = data.len() as u32;
    *efs.inode_mut(id)? = inode;
    dir::add_entry(efs, parent, name, id, kind)?;
    write_data(efs, id, data)?;
    Ok(id)
}

/// Fills fresh blocks with `data`, direct slots first. The indirect block is
/// allocated right before the first block it points to.
fn write_data(efs: &mut Ext2FileSystem, id: InodeId, data: &[u8]) -> Result<()> {
    for (index, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
        let indirect = if index >= DIRECT_COUNT {
            Some(indirect_block_of(efs, id)?)
        } else {
            None
        };
        let block = efs.alloc_block()?;
        efs.fill_block(block, chunk)?;
        match indirect {
            None => efs.inode_mut(id)?.block[index] = block.into(),
            Some(indirect) => efs.map_mut(indirect, 0, |pointers: &mut IndirectBlock| {
                pointers[index - DIRECT_COUNT] = block.into();
            })?,
        }
        efs.inode_mut(id)?.add_block();
    }
    Ok(())
}

fn indirect_block_of(efs: &mut Ext2FileSystem, id: InodeId) -> Result<BlockId> {
    if let Some(indirect) = efs.inode(id)?.indirect_block() {
        return Ok(indirect);
    }
    let indirect = efs.alloc_block()?;
    efs.zero_block(indirect)?;
    let inode = efs.inode_mut(id)?;
    inode.set_indirect_block(indirect);
    inode.add_block();
    Ok(indirect)
}
