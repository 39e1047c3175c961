/// size of disk sector
pub const BSIZE: usize = 512;

/// sector holding the free map
pub const FREE_MAP_SECTOR: u32 = 0;
/// sector holding the root directory's inode
pub const ROOT_DIR_SECTOR: u32 = 1;
/// initial entry capacity of the root directory
pub const ROOT_DIR_ENTRIES: usize = 16;

/// maximum length of a file name component, not counting the terminating 0
pub const NAME_MAX: usize = 16;
/// size of one on-disk directory record:
/// sector(4) + name(NAME_MAX + 1) + is_dir(1) + in_use(1), padded to 4
pub const DIRENT_SIZE: usize = 24;

/// number of slots in the open inode table
pub const NINODE: usize = 64;
/// number of direct sectors in an on-disk inode
pub const NDIRECT: usize = 124;
/// number of sector numbers in a single indirect sector
/// note: the sector number should be u32
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();
/// maximum number of data sectors per inode
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// identifies an inode sector
pub const INODE_MAGIC: u32 = 0x494e_4f44;
