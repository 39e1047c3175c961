#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

extern crate alloc;

pub mod consts;
pub mod fs;
mod spinlock;

pub use fs::{
    Dir, DirFeatures, DirTree, FileName, FsError, FsResult, Inode, InodeCache, InodeTable,
    RamDisk, Resolved,
};
