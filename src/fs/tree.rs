//! Directory tree: the root directory, parent tracking and path resolution

use alloc::sync::Arc;

use log::{debug, info};
#[cfg(feature = "trace_dirop")]
use log::trace;

use crate::consts::fs::{ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR};
use super::block::BlockNo;
use super::inode::{Inode, InodeTable};
use super::path;
use super::{Dir, DirFeatures, FileName, FsError, FsResult};

/// What a path resolved to.
#[derive(Debug)]
pub enum Resolved {
    Dir(Dir),
    File(Inode),
}

impl Resolved {
    pub fn is_dir(&self) -> bool {
        match self {
            Resolved::Dir(_) => true,
            Resolved::File(_) => false,
        }
    }

    pub fn inumber(&self) -> BlockNo {
        match self {
            Resolved::Dir(dir) => dir.inumber(),
            Resolved::File(inode) => inode.inumber(),
        }
    }

    pub fn into_inode(self) -> Inode {
        match self {
            Resolved::Dir(dir) => dir.into_inode(),
            Resolved::File(inode) => inode,
        }
    }
}

/// Owner of the root directory.
/// Built once at file system startup and handed to whoever resolves paths.
pub struct DirTree {
    table: Arc<dyn InodeTable>,
    root: Dir,
    features: DirFeatures,
}

impl DirTree {
    /// Create an empty root directory, then open the tree on it.
    pub fn format(table: Arc<dyn InodeTable>, features: DirFeatures) -> FsResult<Self> {
        Dir::create(&table, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR)?;
        Self::new(table, features)
    }

    /// Open the tree on the existing root directory.
    ///
    /// Sector allocation is only sound if `table` has allocated every sector
    /// the tree uses; an [`InodeCache`](super::InodeCache) built over an
    /// already populated device does not know which sectors are taken.
    pub fn new(table: Arc<dyn InodeTable>, features: DirFeatures) -> FsResult<Self> {
        let root = Dir::open_with(Inode::open(&table, ROOT_DIR_SECTOR)?, features);

        info!("directory tree: root at sector {}, features {:?}", ROOT_DIR_SECTOR, features);

        Ok(Self { table, root, features })
    }

    pub fn table(&self) -> &Arc<dyn InodeTable> {
        &self.table
    }

    pub fn features(&self) -> DirFeatures {
        self.features
    }

    pub fn root(&self) -> &Dir {
        &self.root
    }

    /// A fresh handle on the root directory.
    pub fn open_root(&self) -> Dir {
        self.root.reopen()
    }

    pub fn open_dir(&self, sector: BlockNo) -> FsResult<Dir> {
        if sector == ROOT_DIR_SECTOR {
            return Ok(self.open_root())
        }
        Ok(Dir::open_with(Inode::open(&self.table, sector)?, self.features))
    }

    /// Without subdirectories every directory is its own parent.
    pub fn create_dir(&self, sector: BlockNo, entry_cnt: usize, parent: BlockNo) -> FsResult<()> {
        let parent = if self.has_subdirs() { parent } else { sector };
        Dir::create(&self.table, sector, entry_cnt, parent)?;
        debug!("directory {}: created in {}", sector, parent);
        Ok(())
    }

    fn has_subdirs(&self) -> bool {
        self.features.contains(DirFeatures::SUBDIRS)
    }

    /// The root is its own parent.
    pub fn parent(&self, dir: &Dir) -> FsResult<Dir> {
        self.parent_from_inode(dir.inode())
    }

    pub fn parent_from_inode(&self, inode: &Inode) -> FsResult<Dir> {
        if !self.has_subdirs() {
            return Err(FsError::Unsupported)
        }
        if inode.inumber() == ROOT_DIR_SECTOR {
            return Ok(self.open_root())
        }
        self.open_dir(inode.parent())
    }

    /// Resolve `path` to a directory or a file.
    /// A relative path starts at `cwd`, or at the root if there is none.
    pub fn resolve(&self, path: &str, cwd: Option<&Dir>) -> FsResult<Resolved> {
        let ret = if self.has_subdirs() {
            self.namex(path, cwd)
        } else {
            self.lookup_flat(path)
        };

        #[cfg(feature = "trace_dirop")]
        trace!("resolve(path={}, cwd={:?}) = {:?}", path, cwd.map(Dir::inumber), ret);

        ret
    }

    fn namex(&self, path: &str, cwd: Option<&Dir>) -> FsResult<Resolved> {
        let mut dir = match cwd {
            Some(cwd) if path::is_relative(path) => {
                Dir::open_with(cwd.inode().reopen(), self.features)
            }
            _ => self.open_root(),
        };

        let mut components = path::components(path);
        while let Some(component) = components.next() {
            match component {
                b"." => continue,
                // the handle being replaced is dropped here
                b".." => dir = self.parent(&dir)?,
                _ => {
                    let name = FileName::from_bytes(component)?;
                    let (entry, _) = dir
                        .lookup_entry(name.as_bytes())
                        .ok_or(FsError::NotFound)?;
                    if entry.is_dir {
                        dir = self.open_dir(entry.sector)?;
                    } else if components.is_done() {
                        return Ok(Resolved::File(Inode::open(&self.table, entry.sector)?))
                    } else {
                        return Err(FsError::NotDir)
                    }
                }
            }
        }

        Ok(Resolved::Dir(dir))
    }

    /// Single level file system: every name lives in the root.
    fn lookup_flat(&self, path: &str) -> FsResult<Resolved> {
        let mut components = path::components(path);
        let component = match components.next() {
            Some(component) => component,
            None => return Ok(Resolved::Dir(self.open_root())),
        };
        if !components.is_done() {
            return Err(FsError::NotFound)
        }

        let name = FileName::from_bytes(component)?;
        let (entry, _) = self
            .root
            .lookup_entry(name.as_bytes())
            .ok_or(FsError::NotFound)?;
        let inode = Inode::open(&self.table, entry.sector)?;
        if entry.is_dir {
            Ok(Resolved::Dir(Dir::open_with(inode, self.features)))
        } else {
            Ok(Resolved::File(inode))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::fs::NAME_MAX;
    use crate::fs::block::RamDisk;
    use crate::fs::inode::InodeCache;

    struct Fixture {
        cache: Arc<InodeCache>,
        tree: DirTree,
    }

    impl Fixture {
        fn new(features: DirFeatures) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let cache = Arc::new(InodeCache::new(Arc::new(RamDisk::new(512))));
            let tree = DirTree::format(cache.clone(), features).unwrap();
            Self { cache, tree }
        }

        fn mkdir(&self, parent: &Dir, name: &str) -> BlockNo {
            let sector = self.cache.alloc_sector().unwrap();
            self.tree.create_dir(sector, 4, parent.inumber()).unwrap();
            parent.add(name, sector, true).unwrap();
            sector
        }

        fn mkfile(&self, parent: &Dir, name: &str) -> BlockNo {
            let sector = self.cache.alloc_sector().unwrap();
            self.tree.table().create(sector, 0, parent.inumber()).unwrap();
            parent.add(name, sector, false).unwrap();
            sector
        }
    }

    /// root
    /// ├── a/
    /// │   └── b.txt
    /// └── c/
    struct Layout {
        fx: Fixture,
        a: BlockNo,
        b_txt: BlockNo,
        c: BlockNo,
    }

    fn layout() -> Layout {
        let fx = Fixture::new(DirFeatures::SUBDIRS);
        let root = fx.tree.open_root();
        let a = fx.mkdir(&root, "a");
        let c = fx.mkdir(&root, "c");
        let a_dir = fx.tree.open_dir(a).unwrap();
        let b_txt = fx.mkfile(&a_dir, "b.txt");
        Layout { fx, a, b_txt, c }
    }

    #[test]
    fn parent_of_root_is_root() {
        let fx = Fixture::new(DirFeatures::SUBDIRS);
        let parent = fx.tree.parent(fx.tree.root()).unwrap();
        assert_eq!(parent.inumber(), ROOT_DIR_SECTOR);
        let grandparent = fx.tree.parent(&parent).unwrap();
        assert_eq!(grandparent.inumber(), ROOT_DIR_SECTOR);
    }

    #[test]
    fn parent_of_subdirectory() {
        let l = layout();
        let a = l.fx.tree.open_dir(l.a).unwrap();
        assert_eq!(l.fx.tree.parent(&a).unwrap().inumber(), ROOT_DIR_SECTOR);

        let file = Inode::open(l.fx.tree.table(), l.b_txt).unwrap();
        assert_eq!(l.fx.tree.parent_from_inode(&file).unwrap().inumber(), l.a);
    }

    #[test]
    fn absolute_file_from_anywhere() {
        let l = layout();
        let tree = &l.fx.tree;
        let c = tree.open_dir(l.c).unwrap();
        for cwd in [None, Some(tree.root()), Some(&c)].iter() {
            let found = tree.resolve("/a/b.txt", *cwd).unwrap();
            assert!(!found.is_dir());
            assert_eq!(found.inumber(), l.b_txt);
        }
    }

    #[test]
    fn dot_dot_climbs() {
        let l = layout();
        let tree = &l.fx.tree;
        let found = tree.resolve("/a/..", None).unwrap();
        assert!(found.is_dir());
        assert_eq!(found.inumber(), ROOT_DIR_SECTOR);

        let found = tree.resolve("/..", None).unwrap();
        assert_eq!(found.inumber(), ROOT_DIR_SECTOR);

        let found = tree.resolve("/a/../c", None).unwrap();
        assert_eq!(found.inumber(), l.c);
    }

    #[test]
    fn relative_paths_use_cwd() {
        let l = layout();
        let tree = &l.fx.tree;
        let a = tree.open_dir(l.a).unwrap();
        let c = tree.open_dir(l.c).unwrap();

        assert_eq!(tree.resolve("b.txt", Some(&a)).unwrap().inumber(), l.b_txt);
        assert_eq!(tree.resolve("../a/b.txt", Some(&c)).unwrap().inumber(), l.b_txt);
        assert_eq!(tree.resolve("", Some(&a)).unwrap().inumber(), l.a);
        assert_eq!(tree.resolve("..", Some(&a)).unwrap().inumber(), ROOT_DIR_SECTOR);
        // no cwd means the root
        assert_eq!(tree.resolve("a/b.txt", None).unwrap().inumber(), l.b_txt);
        assert_eq!(tree.resolve("b.txt", None).unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn slashes_and_dots() {
        let l = layout();
        let tree = &l.fx.tree;
        assert_eq!(tree.resolve("/", None).unwrap().inumber(), ROOT_DIR_SECTOR);
        assert_eq!(tree.resolve("//a///b.txt", None).unwrap().inumber(), l.b_txt);
        assert_eq!(tree.resolve("/a/./b.txt", None).unwrap().inumber(), l.b_txt);

        let found = tree.resolve("/a/b.txt/", None).unwrap();
        assert!(!found.is_dir());
    }

    #[test]
    fn failures() {
        let l = layout();
        let tree = &l.fx.tree;
        assert_eq!(tree.resolve("/a/nonexistent", None).unwrap_err(), FsError::NotFound);
        assert_eq!(tree.resolve("/a/b.txt/x", None).unwrap_err(), FsError::NotDir);
        assert_eq!(tree.resolve("/a/b.txt/..", None).unwrap_err(), FsError::NotDir);

        let long = format!("/{}", "x".repeat(NAME_MAX + 1));
        assert_eq!(tree.resolve(&long, None).unwrap_err(), FsError::NameInvalid);
    }

    #[test]
    fn resolution_releases_handles() {
        let l = layout();
        let tree = &l.fx.tree;
        let a = tree.open_dir(l.a).unwrap();
        let _ = tree.resolve("/a/../c/../a/b.txt", None).unwrap();
        let _ = tree.resolve("/a/b.txt/x", None);
        let _ = tree.resolve("/c/missing", Some(&a));
        assert_eq!(tree.root().inode().open_count(), 1);
        assert_eq!(a.inode().open_count(), 1);

        let found = tree.resolve("/a", None).unwrap();
        assert_eq!(a.inode().open_count(), 2);
        drop(found);
        assert_eq!(a.inode().open_count(), 1);
    }

    #[test]
    fn resolved_directory_keeps_features() {
        let fx = Fixture::new(DirFeatures::SUBDIRS | DirFeatures::SYNC);
        let root = fx.tree.open_root();
        fx.mkdir(&root, "d");
        match fx.tree.resolve("/d", None).unwrap() {
            Resolved::Dir(dir) => assert!(dir.features().contains(DirFeatures::SYNC)),
            Resolved::File(_) => panic!("expected a directory"),
        }
    }

    #[test]
    fn reopen_existing_tree() {
        let l = layout();
        let table = Arc::clone(l.fx.tree.table());
        let again = DirTree::new(table, DirFeatures::SUBDIRS).unwrap();
        assert_eq!(again.resolve("/a/b.txt", None).unwrap().inumber(), l.b_txt);
    }

    #[test]
    fn new_without_root_fails() {
        let cache = Arc::new(InodeCache::new(Arc::new(RamDisk::new(16))));
        assert_eq!(DirTree::new(cache, DirFeatures::SUBDIRS).err(), Some(FsError::Corrupt));
    }

    #[test]
    fn flat_tree() {
        let fx = Fixture::new(DirFeatures::empty());
        let root = fx.tree.open_root();
        let f = fx.mkfile(&root, "notes");
        let d = fx.mkdir(&root, "d");

        assert_eq!(fx.tree.parent(&root).unwrap_err(), FsError::Unsupported);
        assert_eq!(fx.tree.resolve("notes", None).unwrap().inumber(), f);
        assert_eq!(fx.tree.resolve("/notes", None).unwrap().inumber(), f);
        assert!(fx.tree.resolve("d", None).unwrap().is_dir());
        assert_eq!(fx.tree.resolve("d/notes", None).unwrap_err(), FsError::NotFound);
        assert_eq!(fx.tree.resolve("..", None).unwrap_err(), FsError::NotFound);
        assert_eq!(fx.tree.resolve("/", None).unwrap().inumber(), ROOT_DIR_SECTOR);

        // directories created flat are their own parents
        let dir = fx.tree.open_dir(d).unwrap();
        assert_eq!(dir.inode().parent(), d);
    }
}
