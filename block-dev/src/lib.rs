//! # Block device interface
//!
//! A block device stores data in fixed-size **blocks**: disks, image files,
//! memory. [`BlockDevice`] abstracts reading and writing those blocks; a type
//! implementing it is a block device driver. `ext2-fs` loads and flushes its
//! image through one.

use std::any::Any;
use std::io;
use std::sync::Mutex;

/// Block device driver trait.
///
/// `buf.len()` decides how many bytes a call transfers, always starting at
/// `block_id * buf.len()`.
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;
}

/// A block device backed by memory. Used by tests and for building images
/// before they are written out.
#[derive(Debug, Default)]
pub struct RamDisk(Mutex<Vec<u8>>);

impl RamDisk {
    /// A zero-filled disk of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self(Mutex::new(vec![0; size]))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        // A poisoned lock still guards plain bytes.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let data = self.lock();
        let start = block_id * buf.len();
        let src = data
            .get(start..start + buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "not a complete block!"))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut data = self.lock();
        let start = block_id * buf.len();
        let dest = data
            .get_mut(start..start + buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::WriteZero, "not a complete block!"))?;
        dest.copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_blocks() {
        let disk = RamDisk::new(4096);
        disk.write_block(2, &[7; 1024]).unwrap();

        let mut buf = [0; 1024];
        disk.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, [7; 1024]);
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [0; 1024]);
    }

    #[test]
    fn ram_disk_out_of_range() {
        let disk = RamDisk::new(2048);
        let mut buf = [0; 1024];
        assert!(disk.read_block(2, &mut buf).is_err());
        assert!(disk.write_block(5, &buf).is_err());
    }
}
