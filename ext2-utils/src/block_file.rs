use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use block_dev::BlockDevice;
use send_wrapper::SendWrapper;

/// An image file on the host used as a block device.
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: SendWrapper::new(RefCell::new(fd)),
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((block_id * buf.len()) as u64))?;
        file.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((block_id * buf.len()) as u64))?;
        file.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_land_at_their_offset() {
        let fd = tempfile::tempfile().unwrap();
        fd.set_len(4096).unwrap();
        let file = BlockFile::new(fd);

        file.write_block(2, &[0xab; 1024]).unwrap();
        let mut buf = [0; 512];
        file.read_block(4, &mut buf).unwrap();
        assert_eq!(buf, [0xab; 512]);
        file.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, [0; 512]);
    }

    #[test]
    fn short_read_is_an_error() {
        let fd = tempfile::tempfile().unwrap();
        fd.set_len(1536).unwrap();
        let file = BlockFile::new(fd);

        let mut buf = [0; 1024];
        let err = file.read_block(1, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
