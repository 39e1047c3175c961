//! disk sector operations

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::consts::fs::BSIZE;
use super::{FsError, FsResult};

pub type BlockNo = u32;

/// Sector-addressed storage underneath the inode layer.
pub trait BlockDevice: Send + Sync {
    /// Number of sectors on the device.
    fn size(&self) -> u32;

    fn read(&self, sector: BlockNo, buf: &mut [u8; BSIZE]) -> FsResult<()>;

    fn write(&self, sector: BlockNo, buf: &[u8; BSIZE]) -> FsResult<()>;
}

/// Little-endian u32 at byte offset `off`.
pub(crate) fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Zero-filled device living in memory.
pub struct RamDisk {
    sectors: Mutex<Vec<[u8; BSIZE]>>,
}

impl RamDisk {
    pub fn new(size: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0; BSIZE]; size as usize]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn size(&self) -> u32 {
        self.sectors.lock().len() as u32
    }

    fn read(&self, sector: BlockNo, buf: &mut [u8; BSIZE]) -> FsResult<()> {
        let guard = self.sectors.lock();
        let data = guard.get(sector as usize).ok_or(FsError::Io)?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn write(&self, sector: BlockNo, buf: &[u8; BSIZE]) -> FsResult<()> {
        let mut guard = self.sectors.lock();
        let data = guard.get_mut(sector as usize).ok_or(FsError::Io)?;
        data.copy_from_slice(buf);
        Ok(())
    }
}
