//! File system directory layer
//!
//! Directories map names to inode sectors on top of an [`InodeTable`].
//! [`DirTree`] owns the root directory and resolves slash-separated paths.

mod bitmap;
mod block;
mod dir;
mod error;
mod inode;
mod name;
mod path;
mod tree;

pub use block::{BlockDevice, BlockNo, RamDisk};
pub use dir::{Dir, DirFeatures, Entries};
pub use error::{FsError, FsResult};
pub use inode::{Inode, InodeCache, InodeGuard, InodeTable};
pub use name::FileName;
pub use path::{components, is_relative, Components};
pub use tree::{DirTree, Resolved};
