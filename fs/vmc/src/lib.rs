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

//! PlayStation 2 memory card ("VMC") filesystem engine.
//!
//! [`Vmc`] owns a decoded [`Superblock`] and a [`Storage`] backend and
//! implements [`vmc_fs::Filesystem`] over them. Everything below it —
//! directory resolution (`dir`), cluster-chain allocation (`fat`), page
//! I/O with ECC (`page`, `ecc`), on-disk layout (`layout`) and image
//! formatting (`format`) — is internal; host bindings (`vmc-mount`,
//! `vmc-mkfs`) only ever see this crate through `Vmc` and the re-exports
//! below.

mod dir;
mod ecc;
mod fat;
mod format;
mod layout;
mod page;
mod time;

use std::time::SystemTime;

use vmc_ds::Storage;
use vmc_err::{Error, FormatError, FsError, Result};
use vmc_fs::{DirEntry, FileAttr, FileKind, Filesystem, RenameFlags};
use zerocopy::FromBytes;

pub use format::format_empty_image;
pub use layout::{
    card_flags, mode, ClusterIndex, DateTime, FatEntry, RawDirEntry, Superblock, DEFAULT_SUPERBLOCK,
    DIR_ENTRY_SIZE, MAGIC, NAME_MAX, SUPERBLOCK_SIZE, SUPERBLOCK_TYPE,
};

/// A mounted VMC image: a decoded, immutable [`Superblock`] plus the
/// backing [`Storage`] it was read from (§3 "Per-image runtime
/// metadata"). Owned and passed explicitly to every operation — there is
/// no process-wide mutable state (§9).
pub struct Vmc<S: Storage> {
    superblock: Superblock,
    storage: S,
}

impl<S: Storage> Vmc<S> {
    /// Decodes the superblock at offset 0 of `storage` and validates it
    /// against the geometry it describes (§4.6 "Size validation on
    /// open"). Refuses to mount on magic mismatch, unsupported `type`, or
    /// an image length that doesn't match `clusters_per_card ×
    /// pages_per_cluster × page_physical_size` for the superblock's own
    /// `card_flags` ECC bit.
    pub fn open(storage: S) -> Result<Self> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        storage.read(0, &mut raw)?;
        let superblock =
            Superblock::read_from_bytes(&raw).map_err(|_| Error::Format(FormatError::SizeMismatch))?;

        if superblock.magic != MAGIC {
            log::error!("vmc: superblock magic does not match");
            return Err(Error::Format(FormatError::MagicMismatch));
        }
        if superblock.ty != SUPERBLOCK_TYPE {
            log::error!("vmc: unsupported superblock type {}", superblock.ty);
            return Err(Error::Format(FormatError::UnsupportedType));
        }

        let expected_len = superblock.clusters_per_card.get() as u64 * superblock.cluster_physical_size() as u64;
        if storage.len() != expected_len {
            log::error!(
                "vmc: image length {} does not match geometry-derived length {} (ecc={})",
                storage.len(),
                expected_len,
                superblock.uses_ecc(),
            );
            return Err(Error::Format(FormatError::SizeMismatch));
        }

        log::debug!(
            "vmc: mounted image, {} clusters, ecc={}",
            superblock.clusters_per_card.get(),
            superblock.uses_ecc(),
        );
        Ok(Self { superblock, storage })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Flushes the backing store, if it has a durability concept (§4.2).
    pub fn sync(&mut self) -> Result<()> {
        self.storage.sync()
    }
}

/// Replicates the low `rwx` bits of an on-disk `mode` across owner, group
/// and other, matching the host `stat` presentation (§6).
fn posix_permission_bits(mode_bits: u16) -> u16 {
    let rwx = mode_bits & 0b111;
    rwx | (rwx << 3) | (rwx << 6)
}

fn to_file_attr(entry: &RawDirEntry) -> FileAttr {
    FileAttr {
        kind: if entry.is_directory() { FileKind::Directory } else { FileKind::File },
        mode: posix_permission_bits(entry.mode.get()),
        size: entry.length.get() as u64,
        mtime: entry.modification.to_system_time(),
        ctime: entry.creation.to_system_time(),
    }
}

impl<S: Storage> Filesystem for Vmc<S> {
    fn getattr(&self, path: &str) -> Result<FileAttr> {
        let located = dir::browse(&self.superblock, &self.storage, path)?;
        Ok(to_file_attr(&located.entry))
    }

    fn readdir(&self, path: &str, callback: &mut dyn FnMut(DirEntry)) -> Result<()> {
        let located = dir::browse(&self.superblock, &self.storage, path)?;
        dir::ls(&self.superblock, &self.storage, &located.entry, |name, entry| {
            callback(DirEntry {
                name,
                kind: if entry.is_directory() { FileKind::Directory } else { FileKind::File },
            });
        })
    }

    fn open(&self, path: &str) -> Result<()> {
        dir::browse(&self.superblock, &self.storage, path)?;
        Ok(())
    }

    fn read(&self, path: &str, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let located = dir::browse(&self.superblock, &self.storage, path)?;
        let length = located.entry.length.get() as u64;
        if offset >= length {
            return Ok(0);
        }
        let remaining = (length - offset) as usize;
        let n = buffer.len().min(remaining);
        page::read_bytes(&self.superblock, &self.storage, located.entry.cluster_index(), offset, &mut buffer[..n])
    }

    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let mut located = dir::browse(&self.superblock, &self.storage, path)?;
        if located.entry.is_directory() {
            return Err(Error::Fs(FsError::InvalidArgument));
        }
        dir::write(&self.superblock, &mut self.storage, &mut located, offset, data)
    }

    fn mkdir(&mut self, path: &str, mode: u16) -> Result<()> {
        if dir::browse(&self.superblock, &self.storage, path).is_ok() {
            return Err(Error::Fs(FsError::Exists));
        }
        let (parent_path, name) = dir::split_parent_name(path)?;
        let mut parent = dir::browse(&self.superblock, &self.storage, parent_path)?;
        if !parent.entry.is_directory() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        dir::mkdir(&self.superblock, &mut self.storage, parent.entry.cluster_index(), &mut parent.entry, name, mode)
    }

    fn create(&mut self, path: &str, mode: u16) -> Result<()> {
        if dir::browse(&self.superblock, &self.storage, path).is_ok() {
            return Err(Error::Fs(FsError::Exists));
        }
        let (parent_path, name) = dir::split_parent_name(path)?;
        let mut parent = dir::browse(&self.superblock, &self.storage, parent_path)?;
        if !parent.entry.is_directory() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        dir::create(
            &self.superblock,
            &mut self.storage,
            parent.entry.cluster_index(),
            &mut parent.entry,
            name,
            ClusterIndex::Invalid,
            mode,
        )
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let located = dir::browse(&self.superblock, &self.storage, path)?;
        if located.entry.is_directory() {
            return Err(Error::Fs(FsError::InvalidArgument));
        }
        let mut parent = dir::read_self(&self.superblock, &self.storage, located.parent_head)?;
        dir::unlink(&self.superblock, &mut self.storage, &located.entry, located.parent_head, &mut parent, located.index)
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let located = dir::browse(&self.superblock, &self.storage, path)?;
        if !located.entry.is_directory() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        let mut parent = dir::read_self(&self.superblock, &self.storage, located.parent_head)?;
        dir::rmdir(&self.superblock, &mut self.storage, &located.entry, located.parent_head, &mut parent, located.index)
    }

    fn rename(&mut self, from: &str, to: &str, flags: RenameFlags) -> Result<()> {
        dir::rename(&self.superblock, &mut self.storage, from, to, flags)
    }

    fn utimens(&mut self, path: &str, mtime: SystemTime) -> Result<()> {
        let mut located = dir::browse(&self.superblock, &self.storage, path)?;
        dir::utime(&self.superblock, &mut self.storage, &mut located, mtime)
    }
}

#[cfg(test)]
mod tests {
    use vmc_ds_std::MemoryStorage;

    use super::*;

    fn formatted_storage(sb: &Superblock) -> MemoryStorage {
        let len = sb.clusters_per_card.get() as usize * sb.cluster_physical_size();
        let mut storage = MemoryStorage::zeroed(len);
        format_empty_image(sb, &mut storage).unwrap();
        storage
    }

    #[test]
    fn open_accepts_freshly_formatted_image() {
        let sb = DEFAULT_SUPERBLOCK;
        let storage = formatted_storage(&sb);
        let vmc = Vmc::open(storage).unwrap();
        assert_eq!(vmc.superblock().clusters_per_card.get(), sb.clusters_per_card.get());
    }

    #[test]
    fn open_rejects_truncated_image() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut storage = formatted_storage(&sb).into_inner();
        storage.truncate(storage.len() - 1);
        let err = Vmc::open(MemoryStorage::new(storage)).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::SizeMismatch)));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut storage = formatted_storage(&sb).into_inner();
        storage[0] = b'X';
        let err = Vmc::open(MemoryStorage::new(storage)).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::MagicMismatch)));
    }

    #[test]
    fn getattr_and_readdir_on_fresh_root() {
        let sb = DEFAULT_SUPERBLOCK;
        let vmc = Vmc::open(formatted_storage(&sb)).unwrap();

        let attr = vmc.getattr("/").unwrap();
        assert_eq!(attr.kind, FileKind::Directory);

        let mut names = Vec::new();
        vmc.readdir("/", &mut |entry| names.push(entry.name.to_string())).unwrap();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn create_write_read_getattr_round_trip() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();

        vmc.create("/a.bin", 0o666).unwrap();
        let n = vmc.write("/a.bin", 0, b"hello").unwrap();
        assert_eq!(n, 5);

        assert_eq!(vmc.getattr("/a.bin").unwrap().size, 5);

        let mut buf = [0u8; 5];
        let n = vmc.read("/a.bin", 0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();
        vmc.create("/a.bin", 0o666).unwrap();
        vmc.write("/a.bin", 0, b"hi").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(vmc.read("/a.bin", 2, &mut buf).unwrap(), 0);
        assert_eq!(vmc.read("/a.bin", 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn mkdir_nested_create_unlink_rmdir() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();

        vmc.mkdir("/d", 0o755).unwrap();
        vmc.create("/d/x", 0o644).unwrap();
        vmc.write("/d/x", 0, b"data").unwrap();

        let mut names = Vec::new();
        vmc.readdir("/d", &mut |entry| names.push(entry.name.to_string())).unwrap();
        assert_eq!(names, vec![".", "..", "x"]);

        vmc.unlink("/d/x").unwrap();
        assert!(vmc.getattr("/d/x").is_err());

        vmc.rmdir("/d").unwrap();
        assert!(vmc.getattr("/d").is_err());

        let mut names = Vec::new();
        vmc.readdir("/", &mut |entry| names.push(entry.name.to_string())).unwrap();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn unlink_on_directory_is_rejected() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();
        vmc.mkdir("/d", 0o755).unwrap();
        assert!(vmc.unlink("/d").is_err());
    }

    #[test]
    fn rename_moves_across_directories() {
        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();
        vmc.mkdir("/d", 0o755).unwrap();
        vmc.create("/a.bin", 0o666).unwrap();
        vmc.write("/a.bin", 0, b"payload").unwrap();

        vmc.rename("/a.bin", "/d/b.bin", RenameFlags::default()).unwrap();
        assert!(vmc.getattr("/a.bin").is_err());

        let mut buf = [0u8; 7];
        vmc.read("/d/b.bin", 0, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn utimens_updates_modification_only() {
        use std::time::Duration;

        let sb = DEFAULT_SUPERBLOCK;
        let mut vmc = Vmc::open(formatted_storage(&sb)).unwrap();
        vmc.create("/a.bin", 0o666).unwrap();

        let before = vmc.getattr("/a.bin").unwrap();
        let new_mtime = before.ctime + Duration::from_secs(3600);
        vmc.utimens("/a.bin", new_mtime).unwrap();

        let after = vmc.getattr("/a.bin").unwrap();
        assert_eq!(after.mtime, new_mtime);
        assert_eq!(after.ctime, before.ctime);
    }
}
