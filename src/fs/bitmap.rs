//! Free map operations

use alloc::vec;
use alloc::vec::Vec;

use bit_field::BitField;

use crate::consts::fs::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use super::BlockNo;

/// One bit per sector, set when the sector is in use.
pub struct FreeMap {
    bits: Vec<u8>,
    size: u32,
}

impl FreeMap {
    /// A map for `size` sectors with the free map
    /// and root directory sectors already taken.
    pub fn new(size: u32) -> Self {
        let mut map = Self {
            bits: vec![0; (size as usize + 7) / 8],
            size,
        };
        for &reserved in [FREE_MAP_SECTOR, ROOT_DIR_SECTOR].iter() {
            if reserved < size {
                map.mark(reserved, true);
            }
        }
        map
    }

    fn mark(&mut self, sector: BlockNo, used: bool) {
        let index = (sector / 8) as usize;
        let bit = (sector % 8) as usize;
        self.bits[index].set_bit(bit, used);
    }

    pub fn is_used(&self, sector: BlockNo) -> bool {
        sector < self.size && self.bits[(sector / 8) as usize].get_bit((sector % 8) as usize)
    }

    /// Take the lowest free sector.
    pub fn allocate(&mut self) -> Option<BlockNo> {
        for (index, byte) in self.bits.iter_mut().enumerate() {
            if *byte == 0xff {
                continue;
            }
            for bit in 0..8 {
                let sector = (index * 8 + bit) as BlockNo;
                if sector >= self.size {
                    return None
                }
                if !byte.get_bit(bit) {
                    byte.set_bit(bit, true);
                    return Some(sector)
                }
            }
        }
        None
    }

    /// Panics if the sector is already free.
    pub fn release(&mut self, sector: BlockNo) {
        if !self.is_used(sector) {
            panic!("free map: double freeing sector {}", sector);
        }
        self.mark(sector, false);
    }

    pub fn free_count(&self) -> u32 {
        (0..self.size).filter(|&s| !self.is_used(s)).count() as u32
    }
}
