//! Errors of every ext2-fs operation.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `InvalidPath` | `EINVAL` |
//! | `NotFound` | `ENOENT` |
//! | `AlreadyExists` | `EEXIST` |
//! | `WrongType` | `EISDIR` |
//! | `NoSpace` | `ENOSPC` |
//! | `Unsupported` | `EFBIG` |
//! | `Overwritten` | `ENOENT` |
//! | `InvalidGeometry` | `EINVAL` |
//! | `Corruption` | `EIO` |
//! | `Io` | `EIO` |

use std::io;

use thiserror::Error;

use crate::BlockId;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed path, over-long component or name.
    #[error("invalid path")]
    InvalidPath,

    #[error("no such file or directory")]
    NotFound,

    #[error("file already exists")]
    AlreadyExists,

    /// The name exists but has the wrong file type for the operation.
    #[error("wrong file type")]
    WrongType,

    /// Inode or block bitmap exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// The operation would need double indirect blocks.
    #[error("file or directory too large")]
    Unsupported,

    /// A restore target's inode or data block has been reused.
    #[error("file has been overwritten")]
    Overwritten,

    /// Geometry `format` cannot lay out as one block group.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: BlockId, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EEXIST: i32 = 17;
const EISDIR: i32 = 21;
const EINVAL: i32 = 22;
const EFBIG: i32 = 27;
const ENOSPC: i32 = 28;

impl Error {
    pub fn corruption(block: BlockId, detail: impl Into<String>) -> Self {
        Self::Corruption {
            block,
            detail: detail.into(),
        }
    }

    /// Negative POSIX error code.
    pub fn errno(&self) -> i32 {
        -match self {
            Self::InvalidPath => EINVAL,
            Self::NotFound => ENOENT,
            Self::AlreadyExists => EEXIST,
            Self::WrongType => EISDIR,
            Self::NoSpace => ENOSPC,
            Self::Unsupported => EFBIG,
            Self::Overwritten => ENOENT,
            Self::InvalidGeometry(_) => EINVAL,
            Self::Corruption { .. } => EIO,
            Self::Io(_) => EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative() {
        assert_eq!(Error::NotFound.errno(), -2);
        assert_eq!(Error::AlreadyExists.errno(), -17);
        assert_eq!(Error::NoSpace.errno(), -28);
        assert_eq!(Error::corruption(BlockId::new(9), "bad rec_len").errno(), -5);
    }

    #[test]
    fn corruption_message_names_block() {
        let err = Error::corruption(BlockId::new(9), "bad rec_len");
        assert_eq!(err.to_string(), "corrupt metadata at block 9: bad rec_len");
    }
}
