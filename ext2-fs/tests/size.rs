use std::mem;

use ext2_fs::layout::{DirEntryHeader, DiskInode, GroupDesc, SuperBlock};

#[test]
fn layout() {
    assert_eq!(1024, mem::size_of::<SuperBlock>());
    assert_eq!(32, mem::size_of::<GroupDesc>());
    assert_eq!(128, mem::size_of::<DiskInode>());
    assert_eq!(8, mem::size_of::<DirEntryHeader>());
}
