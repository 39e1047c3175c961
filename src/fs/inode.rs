//! Inode-relevant operations

use alloc::sync::Arc;
use core::cmp::min;
use core::fmt;

use array_macro::array;
use log::{debug, warn};
use spin::Mutex;

use crate::consts::fs::{BSIZE, INODE_MAGIC, MAXFILE, NDIRECT, NINODE};
use crate::spinlock::RawSpinLock;
use super::bitmap::FreeMap;
use super::block::{get_u32, put_u32, BlockDevice, BlockNo};
use super::{FsError, FsResult};

/// The inode layer as seen from directories.
/// Slots are handed out by `get` and stay valid until the matching `put`.
pub trait InodeTable: Send + Sync {
    /// Initialize the inode at `sector` with `length` zeroed bytes.
    fn create(&self, sector: BlockNo, length: u32, parent: BlockNo) -> FsResult<()>;

    /// Take a reference to the inode at `sector`.
    fn get(&self, sector: BlockNo) -> FsResult<usize>;

    /// Take one more reference to an already referenced slot.
    fn dup(&self, slot: usize);

    /// Drop one reference.
    fn put(&self, slot: usize);

    fn inumber(&self, slot: usize) -> BlockNo;

    fn length(&self, slot: usize) -> u32;

    /// A short count only happens at end of file.
    fn read_at(&self, slot: usize, buf: &mut [u8], offset: u32) -> usize;

    /// Writing past end of file grows it.
    /// A short count means the device is full.
    fn write_at(&self, slot: usize, buf: &[u8], offset: u32) -> usize;

    /// Delete the inode once the last reference is dropped.
    fn remove(&self, slot: usize) -> FsResult<()>;

    /// Sector of the directory this inode was created in.
    fn parent(&self, slot: usize) -> BlockNo;

    fn lock(&self, slot: usize);

    fn unlock(&self, slot: usize);

    fn open_count(&self, slot: usize) -> usize;
}

/// Inode handed out by an inode table.
/// It is actually a counted handle pointing into the table.
pub struct Inode {
    table: Arc<dyn InodeTable>,
    sector: BlockNo,
    slot: usize,
}

impl Inode {
    pub fn open(table: &Arc<dyn InodeTable>, sector: BlockNo) -> FsResult<Self> {
        let slot = table.get(sector)?;
        Ok(Self {
            table: Arc::clone(table),
            sector,
            slot,
        })
    }

    pub fn reopen(&self) -> Self {
        self.clone()
    }

    pub fn table(&self) -> &Arc<dyn InodeTable> {
        &self.table
    }

    pub fn inumber(&self) -> BlockNo {
        self.sector
    }

    pub fn length(&self) -> u32 {
        self.table.length(self.slot)
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        self.table.read_at(self.slot, buf, offset)
    }

    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        self.table.write_at(self.slot, buf, offset)
    }

    pub fn remove(&self) -> FsResult<()> {
        self.table.remove(self.slot)
    }

    pub fn parent(&self) -> BlockNo {
        self.table.parent(self.slot)
    }

    pub fn open_count(&self) -> usize {
        self.table.open_count(self.slot)
    }

    /// Lock the inode against other compound operations.
    /// Unlocked when the guard drops.
    pub fn lock(&self) -> InodeGuard<'_> {
        self.table.lock(self.slot);
        InodeGuard { inode: self }
    }
}

impl Clone for Inode {
    /// Clone an inode by just increment its reference count by 1.
    fn clone(&self) -> Self {
        self.table.dup(self.slot);
        Self {
            table: Arc::clone(&self.table),
            sector: self.sector,
            slot: self.slot,
        }
    }
}

impl Drop for Inode {
    /// Done with this inode.
    /// If this is the last reference and the inode was removed,
    /// the table frees it on the disk.
    fn drop(&mut self) {
        self.table.put(self.slot);
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("sector", &self.sector)
            .field("slot", &self.slot)
            .finish()
    }
}

pub struct InodeGuard<'a> {
    inode: &'a Inode,
}

impl<'a> Drop for InodeGuard<'a> {
    fn drop(&mut self) {
        self.inode.table.unlock(self.inode.slot);
    }
}

/// On-disk inode structure, one per sector
#[derive(Clone, Copy)]
struct DiskInode {
    /// Size of actual data/content of this inode.
    length: u32,
    /// Sector of the containing directory.
    parent: BlockNo,
    magic: u32,
    /// Data address.
    addrs: [BlockNo; NDIRECT],
    indirect: BlockNo,
}

impl DiskInode {
    const fn new(length: u32, parent: BlockNo) -> Self {
        Self {
            length,
            parent,
            magic: INODE_MAGIC,
            addrs: [0; NDIRECT],
            indirect: 0,
        }
    }

    fn decode(buf: &[u8; BSIZE]) -> Self {
        let mut addrs = [0; NDIRECT];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = get_u32(buf, 12 + 4 * i);
        }
        Self {
            length: get_u32(buf, 0),
            parent: get_u32(buf, 4),
            magic: get_u32(buf, 8),
            addrs,
            indirect: get_u32(buf, 12 + 4 * NDIRECT),
        }
    }

    fn encode(&self) -> [u8; BSIZE] {
        let mut buf = [0; BSIZE];
        put_u32(&mut buf, 0, self.length);
        put_u32(&mut buf, 4, self.parent);
        put_u32(&mut buf, 8, self.magic);
        for (i, &addr) in self.addrs.iter().enumerate() {
            put_u32(&mut buf, 12 + 4 * i, addr);
        }
        put_u32(&mut buf, 12 + 4 * NDIRECT, self.indirect);
        buf
    }
}

#[derive(Clone, Copy)]
struct InodeMeta {
    /// sector holding the disk inode
    sector: BlockNo,
    /// reference count
    refs: usize,
    /// free the inode on last put
    removed: bool,
}

impl InodeMeta {
    const fn new() -> Self {
        Self {
            sector: 0,
            refs: 0,
            removed: false,
        }
    }
}

/// In-memory copy of an inode
struct InodeData {
    sector: BlockNo,
    dinode: DiskInode,
}

impl InodeData {
    const fn new() -> Self {
        Self {
            sector: 0,
            dinode: DiskInode::new(0, 0),
        }
    }
}

/// Open inode table over a block device.
/// Lock order: `meta`, then `data[i]`, then `free_map`.
pub struct InodeCache {
    dev: Arc<dyn BlockDevice>,
    free_map: Mutex<FreeMap>,
    meta: Mutex<[InodeMeta; NINODE]>,
    data: [Mutex<InodeData>; NINODE],
    locks: [RawSpinLock; NINODE],
}

impl InodeCache {
    /// Take over a freshly formatted device.
    ///
    /// The free map is kept in memory only: every sector but the reserved
    /// ones counts as free, whatever the device already holds.
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        let free_map = FreeMap::new(dev.size());

        #[cfg(feature = "verbose_init_info")]
        log::info!("inode cache: {} sectors, {} free", dev.size(), free_map.free_count());

        Self {
            dev,
            free_map: Mutex::new(free_map),
            meta: Mutex::new([InodeMeta::new(); NINODE]),
            data: array![_ => Mutex::new(InodeData::new()); NINODE],
            locks: array![_ => RawSpinLock::new("inode"); NINODE],
        }
    }

    /// Reserve a sector for a new inode.
    pub fn alloc_sector(&self) -> FsResult<BlockNo> {
        self.free_map.lock().allocate().ok_or(FsError::NoSpace)
    }

    /// Give back a sector from [`InodeCache::alloc_sector`] that never got an inode.
    pub fn free_sector(&self, sector: BlockNo) {
        self.free_map.lock().release(sector);
    }

    pub fn free_sectors(&self) -> u32 {
        self.free_map.lock().free_count()
    }

    fn read_dinode(&self, sector: BlockNo) -> FsResult<DiskInode> {
        let mut buf = [0; BSIZE];
        self.dev.read(sector, &mut buf)?;
        let dinode = DiskInode::decode(&buf);
        if dinode.magic != INODE_MAGIC {
            return Err(FsError::Corrupt)
        }
        Ok(dinode)
    }

    fn write_dinode(&self, sector: BlockNo, dinode: &DiskInode) -> FsResult<()> {
        self.dev.write(sector, &dinode.encode())
    }

    /// Allocate a sector and zero it.
    fn alloc_zeroed(&self) -> Option<BlockNo> {
        let sector = self.free_map.lock().allocate()?;
        if self.dev.write(sector, &[0; BSIZE]).is_err() {
            self.free_map.lock().release(sector);
            return None
        }
        Some(sector)
    }

    /// Given the relevant nth data sector of this inode,
    /// return its sector number on the disk,
    /// allocating it (and the indirect sector) if `alloc` is set.
    fn bmap(&self, dinode: &mut DiskInode, n: usize, alloc: bool) -> Option<BlockNo> {
        if n < NDIRECT {
            if dinode.addrs[n] == 0 {
                if !alloc {
                    return None
                }
                dinode.addrs[n] = self.alloc_zeroed()?;
            }
            Some(dinode.addrs[n])
        } else if n < MAXFILE {
            let off = 4 * (n - NDIRECT);
            if dinode.indirect == 0 {
                if !alloc {
                    return None
                }
                dinode.indirect = self.alloc_zeroed()?;
            }
            let mut indirect = [0; BSIZE];
            self.dev.read(dinode.indirect, &mut indirect).ok()?;
            let bn = get_u32(&indirect, off);
            if bn != 0 {
                return Some(bn)
            }
            if !alloc {
                return None
            }
            let bn = self.alloc_zeroed()?;
            put_u32(&mut indirect, off, bn);
            if self.dev.write(dinode.indirect, &indirect).is_err() {
                self.free_map.lock().release(bn);
                return None
            }
            Some(bn)
        } else {
            None
        }
    }

    /// Discard the inode data/content.
    fn truncate(&self, dinode: &mut DiskInode) {
        let mut free_map = self.free_map.lock();
        for addr in dinode.addrs.iter_mut() {
            if *addr > 0 {
                free_map.release(*addr);
                *addr = 0;
            }
        }
        if dinode.indirect > 0 {
            let mut indirect = [0; BSIZE];
            match self.dev.read(dinode.indirect, &mut indirect) {
                Ok(()) => {
                    for i in 0..MAXFILE - NDIRECT {
                        let bn = get_u32(&indirect, 4 * i);
                        if bn > 0 {
                            free_map.release(bn);
                        }
                    }
                }
                Err(e) => warn!("inode: leaking sectors behind indirect {}: {}", dinode.indirect, e),
            }
            free_map.release(dinode.indirect);
            dinode.indirect = 0;
        }
        dinode.length = 0;
    }
}

impl InodeTable for InodeCache {
    fn create(&self, sector: BlockNo, length: u32, parent: BlockNo) -> FsResult<()> {
        let mut dinode = DiskInode::new(length, parent);
        let sectors = (length as usize + BSIZE - 1) / BSIZE;
        if sectors > MAXFILE {
            return Err(FsError::NoSpace)
        }
        for n in 0..sectors {
            if self.bmap(&mut dinode, n, true).is_none() {
                self.truncate(&mut dinode);
                return Err(FsError::NoSpace)
            }
        }
        if let Err(e) = self.write_dinode(sector, &dinode) {
            self.truncate(&mut dinode);
            return Err(e)
        }
        debug!("inode {}: created, {} bytes, parent {}", sector, length, parent);
        Ok(())
    }

    /// Lookup the inode in the table.
    /// If found, bump its reference count.
    /// If not found, load it into an empty slot.
    fn get(&self, sector: BlockNo) -> FsResult<usize> {
        let mut guard = self.meta.lock();

        let mut empty_i: Option<usize> = None;
        for i in 0..NINODE {
            if guard[i].refs > 0 && guard[i].sector == sector {
                guard[i].refs += 1;
                return Ok(i)
            }
            if empty_i.is_none() && guard[i].refs == 0 {
                empty_i = Some(i);
            }
        }

        let empty_i = match empty_i {
            Some(i) => i,
            None => {
                warn!("inode: table full, cannot open sector {}", sector);
                return Err(FsError::AllocFailed)
            }
        };
        let dinode = self.read_dinode(sector)?;
        *self.data[empty_i].lock() = InodeData { sector, dinode };
        guard[empty_i] = InodeMeta {
            sector,
            refs: 1,
            removed: false,
        };
        Ok(empty_i)
    }

    fn dup(&self, slot: usize) {
        let mut guard = self.meta.lock();
        debug_assert!(guard[slot].refs > 0);
        guard[slot].refs += 1;
    }

    fn put(&self, slot: usize) {
        let mut guard = self.meta.lock();
        let imeta = &mut guard[slot];
        if imeta.refs == 0 {
            panic!("inode: put on free slot {}", slot);
        }
        imeta.refs -= 1;
        if imeta.refs > 0 || !imeta.removed {
            return
        }

        // last reference to a removed inode,
        // keep meta locked so the sector cannot be reopened meanwhile.
        let sector = imeta.sector;
        imeta.removed = false;
        let mut idata = self.data[slot].lock();
        self.truncate(&mut idata.dinode);
        if let Err(e) = self.dev.write(sector, &[0; BSIZE]) {
            warn!("inode {}: cannot clear header: {}", sector, e);
        }
        self.free_map.lock().release(sector);
        debug!("inode {}: reclaimed", sector);
    }

    fn inumber(&self, slot: usize) -> BlockNo {
        self.meta.lock()[slot].sector
    }

    fn length(&self, slot: usize) -> u32 {
        self.data[slot].lock().dinode.length
    }

    fn read_at(&self, slot: usize, buf: &mut [u8], offset: u32) -> usize {
        let mut idata = self.data[slot].lock();
        let length = idata.dinode.length;
        if offset >= length {
            return 0
        }
        let count = min(buf.len(), (length - offset) as usize);

        let mut done = 0;
        let mut sector_buf = [0; BSIZE];
        while done < count {
            let pos = offset as usize + done;
            let block_offset = pos % BSIZE;
            let chunk = min(BSIZE - block_offset, count - done);
            match self.bmap(&mut idata.dinode, pos / BSIZE, false) {
                Some(sector) => {
                    if self.dev.read(sector, &mut sector_buf).is_err() {
                        break;
                    }
                    buf[done..done + chunk]
                        .copy_from_slice(&sector_buf[block_offset..block_offset + chunk]);
                }
                // never written, reads as zeros
                None => buf[done..done + chunk].iter_mut().for_each(|b| *b = 0),
            }
            done += chunk;
        }
        done
    }

    fn write_at(&self, slot: usize, buf: &[u8], offset: u32) -> usize {
        let mut idata = self.data[slot].lock();
        let idata = &mut *idata;

        let mut done = 0;
        let mut sector_buf = [0; BSIZE];
        while done < buf.len() {
            let pos = offset as usize + done;
            let block_offset = pos % BSIZE;
            let chunk = min(BSIZE - block_offset, buf.len() - done);
            let sector = match self.bmap(&mut idata.dinode, pos / BSIZE, true) {
                Some(sector) => sector,
                None => break,
            };
            if chunk < BSIZE && self.dev.read(sector, &mut sector_buf).is_err() {
                break;
            }
            sector_buf[block_offset..block_offset + chunk].copy_from_slice(&buf[done..done + chunk]);
            if self.dev.write(sector, &sector_buf).is_err() {
                break;
            }
            done += chunk;
        }

        let end = offset as usize + done;
        if done > 0 && end > idata.dinode.length as usize {
            idata.dinode.length = end as u32;
        }
        // addrs may have changed even on a short write
        if let Err(e) = self.write_dinode(idata.sector, &idata.dinode) {
            warn!("inode {}: cannot update header: {}", idata.sector, e);
        }
        done
    }

    fn remove(&self, slot: usize) -> FsResult<()> {
        let mut guard = self.meta.lock();
        if guard[slot].refs == 0 {
            return Err(FsError::NotFound)
        }
        guard[slot].removed = true;
        Ok(())
    }

    fn parent(&self, slot: usize) -> BlockNo {
        self.data[slot].lock().dinode.parent
    }

    fn lock(&self, slot: usize) {
        self.locks[slot].acquire();
    }

    fn unlock(&self, slot: usize) {
        self.locks[slot].release();
    }

    fn open_count(&self, slot: usize) -> usize {
        self.meta.lock()[slot].refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::fs::ROOT_DIR_SECTOR;
    use crate::fs::block::RamDisk;

    fn setup(sectors: u32) -> (Arc<InodeCache>, Arc<dyn InodeTable>) {
        let cache = Arc::new(InodeCache::new(Arc::new(RamDisk::new(sectors))));
        let table: Arc<dyn InodeTable> = cache.clone();
        (cache, table)
    }

    #[test]
    fn create_reads_back_zeroed() {
        let (cache, table) = setup(64);
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 700, ROOT_DIR_SECTOR).unwrap();

        let inode = Inode::open(&table, sector).unwrap();
        assert_eq!(inode.inumber(), sector);
        assert_eq!(inode.length(), 700);
        assert_eq!(inode.parent(), ROOT_DIR_SECTOR);

        let mut buf = [0xffu8; 1024];
        assert_eq!(inode.read_at(&mut buf, 0), 700);
        assert!(buf[..700].iter().all(|&b| b == 0));
        assert_eq!(inode.read_at(&mut buf, 700), 0);
        assert_eq!(inode.read_at(&mut buf, 690), 10);
    }

    #[test]
    fn write_grows_through_indirect() {
        let (cache, table) = setup(512);
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();
        let inode = Inode::open(&table, sector).unwrap();

        let far = (NDIRECT * BSIZE + 100) as u32;
        let data = b"beyond the direct sectors";
        assert_eq!(inode.write_at(data, far - 5), data.len());
        assert_eq!(inode.length() as usize, far as usize - 5 + data.len());

        let mut out = [0u8; 25];
        assert_eq!(inode.read_at(&mut out, far - 5), data.len());
        assert_eq!(&out[..], &data[..]);

        // a hole in the middle reads as zeros
        let mut hole = [0xffu8; 8];
        assert_eq!(inode.read_at(&mut hole, 4 * BSIZE as u32), 8);
        assert_eq!(hole, [0; 8]);
    }

    #[test]
    fn short_write_when_full() {
        let (cache, table) = setup(8);
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();
        let inode = Inode::open(&table, sector).unwrap();

        // sectors 3..8 are left for data
        let data = vec![7u8; 10 * BSIZE];
        assert_eq!(inode.write_at(&data, 0), 5 * BSIZE);
        assert_eq!(inode.length() as usize, 5 * BSIZE);
        assert_eq!(cache.free_sectors(), 0);
    }

    #[test]
    fn create_too_large_releases_everything() {
        let (cache, table) = setup(16);
        let sector = cache.alloc_sector().unwrap();
        let before = cache.free_sectors();
        assert_eq!(table.create(sector, 40 * BSIZE as u32, 1), Err(FsError::NoSpace));
        assert_eq!(cache.free_sectors(), before);
    }

    #[test]
    fn references_are_counted() {
        let (cache, table) = setup(64);
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();

        let a = Inode::open(&table, sector).unwrap();
        let b = Inode::open(&table, sector).unwrap();
        let c = a.reopen();
        assert_eq!(a.open_count(), 3);
        drop(b);
        drop(c);
        assert_eq!(a.open_count(), 1);
    }

    #[test]
    fn removal_is_deferred_to_last_close() {
        let (cache, table) = setup(64);
        let before = cache.free_sectors();
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 3 * BSIZE as u32, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(cache.free_sectors(), before - 4);

        let a = Inode::open(&table, sector).unwrap();
        let b = a.reopen();
        a.remove().unwrap();
        drop(a);
        assert_eq!(cache.free_sectors(), before - 4);
        let mut buf = [1u8; 4];
        assert_eq!(b.read_at(&mut buf, 0), 4);
        drop(b);
        assert_eq!(cache.free_sectors(), before);

        // the header is gone too
        assert_eq!(Inode::open(&table, sector).unwrap_err(), FsError::Corrupt);
    }

    #[test]
    fn open_rejects_non_inode() {
        let (_cache, table) = setup(16);
        assert_eq!(Inode::open(&table, 5).unwrap_err(), FsError::Corrupt);
        assert_eq!(Inode::open(&table, 99).unwrap_err(), FsError::Io);
    }

    #[test]
    fn table_full() {
        let (cache, table) = setup(256);
        let mut open = Vec::new();
        for _ in 0..NINODE {
            let sector = cache.alloc_sector().unwrap();
            table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();
            open.push(Inode::open(&table, sector).unwrap());
        }
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(Inode::open(&table, sector).unwrap_err(), FsError::AllocFailed);

        // reopening an already open inode needs no new slot
        assert!(Inode::open(&table, open[0].inumber()).is_ok());
        open.pop();
        assert!(Inode::open(&table, sector).is_ok());
    }

    #[test]
    fn unused_sector_goes_back() {
        let (cache, table) = setup(16);
        let before = cache.free_sectors();
        let sector = cache.alloc_sector().unwrap();
        assert_eq!(cache.free_sectors(), before - 1);

        // creation fails, the caller hands the sector back
        assert_eq!(table.create(sector, 40 * BSIZE as u32, ROOT_DIR_SECTOR), Err(FsError::NoSpace));
        cache.free_sector(sector);
        assert_eq!(cache.free_sectors(), before);
        assert_eq!(cache.alloc_sector().unwrap(), sector);
    }

    #[test]
    fn lock_guard_releases() {
        let (cache, table) = setup(16);
        let sector = cache.alloc_sector().unwrap();
        table.create(sector, 0, ROOT_DIR_SECTOR).unwrap();
        let inode = Inode::open(&table, sector).unwrap();
        {
            let _guard = inode.lock();
        }
        // would spin forever if the guard leaked the lock
        let _guard = inode.lock();
    }
}
