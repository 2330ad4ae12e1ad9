use bytemuck::{Pod, Zeroable};

/// Fixed part of a directory entry. `name_len` name bytes follow it.
///
/// Entries are packed back to back; `rec_len` is the span an entry owns,
/// including slack left by deleted neighbours, so the `rec_len`s of a block
/// always add up to the block size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DirEntryHeader {
    /// Inode number, 0 for a tombstone
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

impl DirEntryHeader {
    pub const SIZE: usize = 8;

    /// Smallest `rec_len` an entry with a `name_len`-byte name can have.
    #[inline]
    pub const fn min_rec_len(name_len: usize) -> usize {
        (Self::SIZE + name_len).next_multiple_of(4)
    }

    #[inline]
    pub fn record_len(&self) -> usize {
        self.rec_len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::DirEntryHeader;

    #[test]
    fn min_rec_len_rounds_to_four() {
        assert_eq!(DirEntryHeader::min_rec_len(1), 12);
        assert_eq!(DirEntryHeader::min_rec_len(2), 12);
        assert_eq!(DirEntryHeader::min_rec_len(4), 12);
        assert_eq!(DirEntryHeader::min_rec_len(5), 16);
        assert_eq!(DirEntryHeader::min_rec_len(255), 264);
    }
}
