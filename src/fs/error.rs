//! File system errors

use core::fmt;

/// Errors surfaced by the directory layer and the inode layer below it.
/// None of them is retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Empty name, name longer than `NAME_MAX`, or a name containing 0.
    NameInvalid,
    /// The name is already occupied in the target directory.
    NameConflict,
    /// No such entry.
    NotFound,
    /// A path tried to descend through a file.
    NotDir,
    /// A byte-range transfer moved fewer bytes than requested.
    Io,
    /// No free slot in the open inode table.
    AllocFailed,
    /// No free sector on the device.
    NoSpace,
    /// On-disk state contradicts itself,
    /// e.g. a record pointing at a sector that holds no inode.
    Corrupt,
    /// The operation needs a capability the tree was built without.
    Unsupported,
}

pub type FsResult<T> = Result<T, FsError>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NameInvalid => "invalid file name",
            FsError::NameConflict => "file name already in use",
            FsError::NotFound => "no such file or directory",
            FsError::NotDir => "not a directory",
            FsError::Io => "short transfer",
            FsError::AllocFailed => "open inode table is full",
            FsError::NoSpace => "no space left on device",
            FsError::Corrupt => "file system is corrupt",
            FsError::Unsupported => "operation not supported",
        };
        f.write_str(msg)
    }
}
