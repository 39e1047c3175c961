//! Directories
//!
//! A directory is an ordinary inode whose content is a packed array of
//! fixed-size records with no header. A cleared record is a tombstone
//! that the next [`Dir::add`] reuses before the array grows.

use alloc::sync::Arc;
use core::fmt;

use log::warn;
#[cfg(feature = "trace_dirop")]
use log::trace;

use crate::consts::fs::{DIRENT_SIZE, NAME_MAX};
use super::block::{get_u32, put_u32, BlockNo};
use super::inode::{Inode, InodeGuard, InodeTable};
use super::{FileName, FsError, FsResult};

bitflags! {
    /// Capabilities a directory is opened with.
    pub struct DirFeatures: u8 {
        /// Subdirectories, `..` and parent tracking.
        const SUBDIRS = 0b01;
        /// Serialize compound mutations on the directory inode's lock.
        const SYNC = 0b10;
    }
}

/// On-disk directory record
#[derive(Clone, Copy)]
pub(crate) struct DirEntry {
    /// Sector of the named inode.
    pub sector: BlockNo,
    /// 0 terminated.
    pub name: [u8; NAME_MAX + 1],
    pub is_dir: bool,
    pub in_use: bool,
}

const NAME_OFF: usize = 4;
const IS_DIR_OFF: usize = NAME_OFF + NAME_MAX + 1;
const IN_USE_OFF: usize = IS_DIR_OFF + 1;

impl DirEntry {
    fn new(sector: BlockNo, name: &FileName, is_dir: bool) -> Self {
        let mut field = [0; NAME_MAX + 1];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            sector,
            name: field,
            is_dir,
            in_use: true,
        }
    }

    fn decode(buf: &[u8; DIRENT_SIZE]) -> Self {
        let mut name = [0; NAME_MAX + 1];
        name.copy_from_slice(&buf[NAME_OFF..IS_DIR_OFF]);
        Self {
            sector: get_u32(buf, 0),
            name,
            is_dir: buf[IS_DIR_OFF] != 0,
            in_use: buf[IN_USE_OFF] != 0,
        }
    }

    fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0; DIRENT_SIZE];
        put_u32(&mut buf, 0, self.sector);
        buf[NAME_OFF..IS_DIR_OFF].copy_from_slice(&self.name);
        buf[IS_DIR_OFF] = self.is_dir as u8;
        buf[IN_USE_OFF] = self.in_use as u8;
        buf
    }

    fn name_matches(&self, name: &[u8]) -> bool {
        name.len() <= NAME_MAX && self.name[..name.len()] == *name && self.name[name.len()] == 0
    }

    pub fn file_name(&self) -> Option<FileName> {
        FileName::from_field(&self.name)
    }
}

/// An open directory: one inode reference plus a private readdir cursor.
pub struct Dir {
    inode: Inode,
    pos: u32,
    features: DirFeatures,
}

impl Dir {
    /// Initialize a directory with room for `entry_cnt` records at `sector`.
    pub fn create(
        table: &Arc<dyn InodeTable>,
        sector: BlockNo,
        entry_cnt: usize,
        parent: BlockNo,
    ) -> FsResult<()> {
        let length = entry_cnt.checked_mul(DIRENT_SIZE).ok_or(FsError::NoSpace)?;
        if length > u32::MAX as usize {
            return Err(FsError::NoSpace)
        }
        table.create(sector, length as u32, parent)
    }

    /// Take ownership of `inode` as a directory without any features.
    pub fn open(inode: Inode) -> Self {
        Self::open_with(inode, DirFeatures::empty())
    }

    pub fn open_with(inode: Inode, features: DirFeatures) -> Self {
        Self {
            inode,
            pos: 0,
            features,
        }
    }

    /// A second handle on the same inode with its own cursor.
    pub fn reopen(&self) -> Self {
        Self::open_with(self.inode.reopen(), self.features)
    }

    /// Same as dropping the handle.
    pub fn close(self) {}

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn into_inode(self) -> Inode {
        self.inode
    }

    pub fn inumber(&self) -> BlockNo {
        self.inode.inumber()
    }

    pub fn features(&self) -> DirFeatures {
        self.features
    }

    fn sync_guard(&self) -> Option<InodeGuard<'_>> {
        if self.features.contains(DirFeatures::SYNC) {
            Some(self.inode.lock())
        } else {
            None
        }
    }

    /// Search for an occupied record named `name`.
    /// Return the record and its byte offset.
    pub(crate) fn lookup_entry(&self, name: &[u8]) -> Option<(DirEntry, u32)> {
        let mut buf = [0; DIRENT_SIZE];
        let mut ofs = 0;
        // read_at only returns a short count at end of file
        while self.inode.read_at(&mut buf, ofs) == DIRENT_SIZE {
            let entry = DirEntry::decode(&buf);
            if entry.in_use && entry.name_matches(name) {
                return Some((entry, ofs))
            }
            ofs += DIRENT_SIZE as u32;
        }
        None
    }

    /// Open the inode named `name`.
    /// The caller owns the returned reference.
    pub fn lookup(&self, name: &str) -> FsResult<Inode> {
        let ret = self
            .lookup_entry(name.as_bytes())
            .ok_or(FsError::NotFound)
            .and_then(|(entry, _)| Inode::open(self.inode.table(), entry.sector));

        #[cfg(feature = "trace_dirop")]
        trace!("[dir {}].lookup(name={}) = {:?}", self.inumber(), name, ret);

        ret
    }

    /// Add a record `name` -> `sector`.
    /// Reuses the first tombstone, or appends.
    pub fn add(&self, name: &str, sector: BlockNo, is_dir: bool) -> FsResult<()> {
        let ret = self.add_entry(name, sector, is_dir);

        #[cfg(feature = "trace_dirop")]
        trace!("[dir {}].add(name={}, sector={}, is_dir={}) = {:?}",
            self.inumber(), name, sector, is_dir, ret);

        ret
    }

    fn add_entry(&self, name: &str, sector: BlockNo, is_dir: bool) -> FsResult<()> {
        let name = FileName::new(name)?;
        let _guard = self.sync_guard();

        if self.lookup_entry(name.as_bytes()).is_some() {
            return Err(FsError::NameConflict)
        }

        // find a free slot, or end of file if there is none
        let mut buf = [0; DIRENT_SIZE];
        let mut ofs = 0;
        while self.inode.read_at(&mut buf, ofs) == DIRENT_SIZE {
            if !DirEntry::decode(&buf).in_use {
                break;
            }
            ofs += DIRENT_SIZE as u32;
        }

        let entry = DirEntry::new(sector, &name, is_dir);
        if self.inode.write_at(&entry.encode(), ofs) != DIRENT_SIZE {
            return Err(FsError::Io)
        }
        Ok(())
    }

    /// Tombstone the record `name` and remove the inode it names.
    ///
    /// Not atomic: if removing the inode fails
    /// the record stays tombstoned anyway.
    pub fn remove(&self, name: &str) -> FsResult<()> {
        let ret = self.remove_entry(name);

        #[cfg(feature = "trace_dirop")]
        trace!("[dir {}].remove(name={}) = {:?}", self.inumber(), name, ret);

        ret
    }

    fn remove_entry(&self, name: &str) -> FsResult<()> {
        let _guard = self.sync_guard();

        let (mut entry, ofs) = self
            .lookup_entry(name.as_bytes())
            .ok_or(FsError::NotFound)?;

        let inode = Inode::open(self.inode.table(), entry.sector).map_err(|e| {
            warn!("dir {}: record {} names unusable inode {}: {}",
                self.inumber(), name, entry.sector, e);
            match e {
                FsError::AllocFailed => e,
                _ => FsError::Corrupt,
            }
        })?;

        entry.in_use = false;
        if self.inode.write_at(&entry.encode(), ofs) != DIRENT_SIZE {
            return Err(FsError::Io)
        }

        inode.remove().map_err(|e| {
            warn!("dir {}: {} tombstoned but inode {} kept: {}",
                self.inumber(), name, entry.sector, e);
            e
        })
    }

    /// Name of the next occupied record after the cursor,
    /// or `None` at end of directory.
    pub fn readdir(&mut self) -> Option<FileName> {
        let mut buf = [0; DIRENT_SIZE];
        while self.inode.read_at(&mut buf, self.pos) == DIRENT_SIZE {
            self.pos += DIRENT_SIZE as u32;
            let entry = DirEntry::decode(&buf);
            if !entry.in_use {
                continue;
            }
            match entry.file_name() {
                Some(name) => return Some(name),
                None => warn!("dir {}: skipping unnamed record at {}",
                    self.inumber(), self.pos - DIRENT_SIZE as u32),
            }
        }
        None
    }

    /// Iterate the rest of the directory through the handle's cursor.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries { dir: self }
    }
}

impl fmt::Debug for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dir")
            .field("sector", &self.inumber())
            .field("pos", &self.pos)
            .field("features", &self.features)
            .finish()
    }
}

pub struct Entries<'a> {
    dir: &'a mut Dir,
}

impl<'a> Iterator for Entries<'a> {
    type Item = FileName;

    fn next(&mut self) -> Option<FileName> {
        self.dir.readdir()
    }
}
