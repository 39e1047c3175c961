//! Bounded file name component

use core::fmt;
use core::str;

use crate::consts::fs::NAME_MAX;
use super::{FsError, FsResult};

/// A single path component of at most `NAME_MAX` bytes.
/// Never empty, never contains 0.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    len: u8,
    bytes: [u8; NAME_MAX],
}

impl FileName {
    /// Rejects rather than truncates an over-long name.
    pub fn new(name: &str) -> FsResult<Self> {
        Self::from_bytes(name.as_bytes())
    }

    pub fn from_bytes(name: &[u8]) -> FsResult<Self> {
        if name.is_empty() || name.len() > NAME_MAX || name.contains(&0) {
            return Err(FsError::NameInvalid)
        }
        let mut bytes = [0; NAME_MAX];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self { len: name.len() as u8, bytes })
    }

    /// Decode a 0-terminated on-disk name field.
    /// A field without terminator is cut at `NAME_MAX`.
    pub(crate) fn from_field(field: &[u8]) -> Option<Self> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let end = core::cmp::min(end, NAME_MAX);
        Self::from_bytes(&field[..end]).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Names added through [`FileName::new`] are always UTF-8;
    /// returns `None` only for foreign bytes read back from disk.
    pub fn as_str(&self) -> Option<&str> {
        str::from_utf8(self.as_bytes()).ok()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }
}

impl PartialEq<str> for FileName {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for FileName {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => f.write_str(s),
            None => {
                for &b in self.as_bytes() {
                    write!(f, "{}", core::ascii::escape_default(b))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}
