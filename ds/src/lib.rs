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

pub use vmc_err::*;

/// A seekable, byte-addressable random-access store.
///
/// Implementations back a VMC image either with an in-memory buffer or a
/// file; the engine is agnostic to which. Neither `read`/`write` are
/// required to flush eagerly; `sync` is the only durability checkpoint a
/// caller can request explicitly.
pub trait Storage {
    /// Total length of the backing store in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `buffer.len()` bytes starting at `offset`.
    ///
    /// Returns [`IoError::OutOfRange`] if the read would run past [`Storage::len`].
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    /// Writes exactly `buffer.len()` bytes starting at `offset`.
    ///
    /// Returns [`IoError::OutOfRange`] if the write would run past [`Storage::len`].
    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Commits any buffered writes to the durable medium, if any. A no-op
    /// for backends with no durability concept.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

fn check_range(len: u64, offset: u64, buffer_len: usize) -> Result<()> {
    let end = offset
        .checked_add(buffer_len as u64)
        .ok_or(Error::Io(IoError::OutOfRange))?;
    if end > len {
        log::error!("storage access [{offset}, {end}) exceeds backing length {len}");
        return Err(Error::Io(IoError::OutOfRange));
    }
    Ok(())
}

/// Helper for [`Storage`] implementors: validates the access range before
/// the caller performs the actual read/write.
pub fn check_access(len: u64, offset: u64, buffer_len: usize) -> Result<()> {
    check_range(len, offset, buffer_len)
}
