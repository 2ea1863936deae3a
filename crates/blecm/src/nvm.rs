//! Non-volatile storage boundary
//!
//! Storage is addressed in 16-bit words at caller-chosen offsets. The
//! connection manager only persists bonding state, and rewrites a record on
//! every change to it.

use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NvmError {
    #[error("Access out of range: offset {offset}, {len} words")]
    OutOfRange { offset: u16, len: usize },

    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Word-addressed persistent storage
pub trait Nvm {
    /// Fill `buf` with the words stored at `offset`
    fn read(&mut self, offset: u16, buf: &mut [u16]) -> Result<(), NvmError>;

    /// Store `data` at `offset`
    fn write(&mut self, offset: u16, data: &[u16]) -> Result<(), NvmError>;
}

/// Value of a word that was never written
pub const ERASED_WORD: u16 = 0xFFFF;

/// In-memory implementation of Nvm
#[derive(Debug, Clone)]
pub struct MemoryNvm {
    words: Vec<u16>,
    writes: usize,
}

impl MemoryNvm {
    /// Create an erased store of `size` words
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![ERASED_WORD; size],
            writes: 0,
        }
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Number of write operations performed so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn range(&self, offset: u16, len: usize) -> Result<std::ops::Range<usize>, NvmError> {
        let start = offset as usize;
        let end = start + len;
        if end > self.words.len() {
            return Err(NvmError::OutOfRange { offset, len });
        }
        Ok(start..end)
    }
}

impl Nvm for MemoryNvm {
    fn read(&mut self, offset: u16, buf: &mut [u16]) -> Result<(), NvmError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.words[range]);
        Ok(())
    }

    fn write(&mut self, offset: u16, data: &[u16]) -> Result<(), NvmError> {
        let range = self.range(offset, data.len())?;
        self.words[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_nvm_bounds() {
        let mut nvm = MemoryNvm::new(8);
        nvm.write(2, &[1, 2, 3]).unwrap();

        let mut buf = [0u16; 4];
        nvm.read(1, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_WORD, 1, 2, 3]);
        assert_eq!(nvm.write_count(), 1);

        assert_eq!(
            nvm.write(6, &[0; 3]),
            Err(NvmError::OutOfRange { offset: 6, len: 3 })
        );
    }
}
