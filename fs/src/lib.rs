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

use std::time::SystemTime;

/// Whether a path names a regular file or a directory, mirrored from the
/// on-disk directory entry's `FILE`/`DIR` mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Attributes reported by `getattr`, in a host-agnostic shape — the
/// `fuser` adapter converts this into a `fuser::FileAttr`.
#[derive(Debug, Clone, Copy)]
pub struct FileAttr {
    pub kind: FileKind,
    /// Low 9 bits, rwx replicated across owner/group/other (§6).
    pub mode: u16,
    pub size: u64,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// One entry yielded to a `readdir` callback.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    pub name: &'a str,
    pub kind: FileKind,
}

/// `rename`'s flag bits, matching the Linux `renameat2(2)` semantics this
/// crate exposes through FUSE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameFlags {
    pub noreplace: bool,
    pub exchange: bool,
}

/// Path-indexed VFS boundary contract (§4.7). Implemented once by the
/// engine's `Vmc<S: Storage>`; consumed by a host binding (e.g.
/// `vmc-mount`'s `fuser::Filesystem` adapter) that owns no filesystem
/// state of its own.
pub trait Filesystem {
    fn getattr(&self, path: &str) -> Result<FileAttr>;

    /// Invokes `callback` once per extant child of the directory at `path`.
    fn readdir(&self, path: &str, callback: &mut dyn FnMut(DirEntry)) -> Result<()>;

    /// Resolves `path`, returning an error if it does not exist. Keeps no
    /// handle-side state: every subsequent `read`/`write` re-resolves the
    /// path.
    fn open(&self, path: &str) -> Result<()>;

    /// Returns the number of bytes read (0 past EOF; capped at
    /// `length - offset`).
    fn read(&self, path: &str, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Returns the number of bytes written, growing the file if
    /// `offset + data.len()` exceeds its current length.
    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;

    fn mkdir(&mut self, path: &str, mode: u16) -> Result<()>;

    fn create(&mut self, path: &str, mode: u16) -> Result<()>;

    fn unlink(&mut self, path: &str) -> Result<()>;

    fn rmdir(&mut self, path: &str) -> Result<()>;

    fn rename(&mut self, from: &str, to: &str, flags: RenameFlags) -> Result<()>;

    fn utimens(&mut self, path: &str, mtime: SystemTime) -> Result<()>;
}
