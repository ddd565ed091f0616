// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fs::File, os::unix::fs::FileExt};

use vmc_ds::{check_access, Error, IoError, Result, Storage};

/// File-backed storage: the durable path. Writes land directly in the
/// backing file via positioned I/O, with no intermediate buffering beyond
/// what the OS page cache provides.
pub struct FileStorage {
    file: File,
    len: u64,
}

impl FileStorage {
    pub fn open(file: File) -> Result<Self> {
        let len = file
            .metadata()
            .map_err(|_| Error::Io(IoError::OutOfRange))?
            .len();
        Ok(Self { file, len })
    }
}

impl Storage for FileStorage {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        check_access(self.len, offset, buffer.len())?;
        self.file
            .read_exact_at(buffer, offset)
            .map_err(|_| Error::Io(IoError::OutOfRange))
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        check_access(self.len, offset, buffer.len())?;
        self.file
            .write_all_at(buffer, offset)
            .map_err(|_| Error::Io(IoError::OutOfRange))
    }

    fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|_| Error::Io(IoError::OutOfRange))
    }
}

/// In-memory storage: the fast, non-durable path. Used by tests and by
/// `vmc-mount`'s snapshot mode.
pub struct MemoryStorage {
    buffer: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            buffer: vec![0xFFu8; len],
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Storage for MemoryStorage {
    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        check_access(self.len(), offset, buffer.len())?;
        let start = offset as usize;
        buffer.copy_from_slice(&self.buffer[start..start + buffer.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        check_access(self.len(), offset, buffer.len())?;
        let start = offset as usize;
        self.buffer[start..start + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trip() {
        let mut storage = MemoryStorage::zeroed(16);
        storage.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        storage.read(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn memory_storage_out_of_range() {
        let storage = MemoryStorage::zeroed(8);
        let mut out = [0u8; 4];
        assert!(storage.read(6, &mut out).is_err());
    }
}
