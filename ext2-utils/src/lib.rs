//! Host side of the ext2 tools: image files as block devices, and what every
//! command line program does before and after its operation.

mod block_file;

use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use ext2_fs::{Error, Ext2FileSystem, Geometry};
use log::info;
use typed_bytesize::ByteSizeIec;

pub use self::block_file::BlockFile;

/// Opens an existing image for reading and writing.
pub fn open_image(path: &Path) -> anyhow::Result<Ext2FileSystem> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("cannot open image {}", path.display()))?;
    let efs = Ext2FileSystem::open(Arc::new(BlockFile::new(fd)))
        .with_context(|| format!("{} is not a usable ext2 image", path.display()))?;
    Ok(efs)
}

/// Creates (or truncates) the file at `path` and formats it.
pub fn create_image(path: &Path, geometry: Geometry) -> anyhow::Result<Ext2FileSystem> {
    geometry.validate()?;
    // One block is one KiB.
    let size = ByteSizeIec::kib(geometry.blocks_count.into()).0;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("cannot create image {}", path.display()))?;
    fd.set_len(size)?;
    info!("image {} is {size} bytes", path.display());

    let efs = Ext2FileSystem::format(Arc::new(BlockFile::new(fd)), geometry)?;
    Ok(efs)
}

/// Exit status for a failed tool: the positive errno of a file system error,
/// 1 for anything else.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        None | Some(Error::Io(_)) => 1,
        Some(err) => err.errno().unsigned_abs() as u8,
    }
}

/// Runs a tool body, printing its error and turning it into an exit status.
pub fn run(tool: impl FnOnce() -> anyhow::Result<()>) -> ExitCode {
    match tool() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use ext2_fs::{ops, InodeId};

    use super::*;

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut efs = create_image(&path, Geometry::default()).unwrap();
        ops::make_dir(&mut efs, "/foo").unwrap();
        efs.sync().unwrap();
        drop(efs);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128 * 1024);

        let mut efs = open_image(&path).unwrap();
        assert!(matches!(ops::make_dir(&mut efs, "/foo"), Err(Error::AlreadyExists)));
        assert!(ops::check(&mut efs).unwrap().is_clean());
        assert!(efs.is_inode_used(InodeId::new(12)));
    }

    #[test]
    fn open_missing_or_foreign() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_image(&dir.path().join("absent.img")).is_err());

        let path = dir.path().join("zeros.img");
        std::fs::write(&path, vec![0; 128 * 1024]).unwrap();
        let err = open_image(&path).unwrap_err();
        assert!(err.downcast_ref::<Error>().is_some());
    }

    #[test]
    fn exit_statuses() {
        let not_found = anyhow::Error::from(Error::NotFound).context("ext2_rm /a");
        assert_eq!(exit_status(&not_found), 2);
        assert_eq!(exit_status(&Error::AlreadyExists.into()), 17);
        assert_eq!(exit_status(&Error::NoSpace.into()), 28);
        assert_eq!(exit_status(&anyhow::anyhow!("bad host file")), 1);
    }
}
