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

//! Path resolution, listing, and mutation of the directory tree (§4.5).
//!
//! A directory has no separate "self" record: its canonical [`RawDirEntry`]
//! is the one stored at index 0 of its *parent's* data (the `.` entry),
//! addressed by a `(head, index)` pair rather than cached by reference. The
//! root directory closes this chain on itself — its `.` entry's `cluster`
//! and `dir_entry` both point back to index 0 of its own cluster — so the
//! same traversal and persistence code handles root without special cases.

use std::time::SystemTime;

use vmc_ds::Storage;
use vmc_err::{Error, FsError, Result};
use vmc_fs::RenameFlags;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};

use crate::fat;
use crate::layout::{mode, ClusterIndex, DateTime, RawDirEntry, Superblock, DIR_ENTRY_SIZE, NAME_MAX};
use crate::page;

fn div_ceil_u32(x: u32, y: u32) -> u32 {
    x / y + u32::from(x % y != 0)
}

fn div_ceil_u64(x: u64, y: u64) -> u64 {
    x / y + u64::from(x % y != 0)
}

/// A resolved path: the entry itself, and its position — `(head, index)` —
/// within the directory that contains it.
#[derive(Debug, Clone)]
pub struct Located {
    pub entry: RawDirEntry,
    pub parent_head: ClusterIndex,
    pub index: u32,
}

fn entry_cluster<S: Storage>(sb: &Superblock, storage: &S, head: ClusterIndex, index: u32) -> Result<ClusterIndex> {
    let dpc = sb.dirents_per_cluster() as u32;
    fat::seek(sb, storage, head, index / dpc)
}

fn read_entry_at<S: Storage>(sb: &Superblock, storage: &S, head: ClusterIndex, index: u32) -> Result<RawDirEntry> {
    let dpc = sb.dirents_per_cluster() as u32;
    let cluster = entry_cluster(sb, storage, head, index)?;
    let mut buf = [0u8; DIR_ENTRY_SIZE];
    page::read_bytes(sb, storage, cluster, (index % dpc) as u64 * DIR_ENTRY_SIZE as u64, &mut buf)?;
    RawDirEntry::read_from_bytes(&buf).map_err(|_| Error::Fs(FsError::InvalidArgument))
}

fn write_entry_at<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    head: ClusterIndex,
    index: u32,
    entry: &RawDirEntry,
) -> Result<()> {
    let dpc = sb.dirents_per_cluster() as u32;
    let cluster = entry_cluster(sb, storage, head, index)?;
    page::write_bytes(sb, storage, cluster, (index % dpc) as u64 * DIR_ENTRY_SIZE as u64, entry.as_bytes())?;
    Ok(())
}

/// Reads the canonical record of the directory whose data starts at `head`,
/// by chasing its `.` entry back to wherever it is stored in its parent.
pub(crate) fn read_self<S: Storage>(sb: &Superblock, storage: &S, head: ClusterIndex) -> Result<RawDirEntry> {
    let dot = read_entry_at(sb, storage, head, 0)?;
    let target_head = ClusterIndex::from_raw(dot.cluster.get());
    read_entry_at(sb, storage, target_head, dot.dir_entry.get())
}

/// Writes `entry` back to wherever the directory `head` is stored in its
/// parent, per its own `.` entry (§4.5 `add_child`/`unlink`).
fn persist_self<S: Storage>(sb: &Superblock, storage: &mut S, head: ClusterIndex, entry: &RawDirEntry) -> Result<()> {
    let dot = read_entry_at(sb, storage, head, 0)?;
    let target_head = ClusterIndex::from_raw(dot.cluster.get());
    write_entry_at(sb, storage, target_head, dot.dir_entry.get(), entry)
}

/// Resolves `path` against the root directory rooted at `sb.root_cluster()`
/// (§4.5 `browse`).
pub fn browse<S: Storage>(sb: &Superblock, storage: &S, path: &str) -> Result<Located> {
    let root = sb.root_cluster();
    let mut current = read_entry_at(sb, storage, root, 0)?;
    let mut parent_head = root;
    let mut index = 0u32;

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment.len() > NAME_MAX {
            return Err(Error::Fs(FsError::NameTooLong));
        }
        if segment == "." {
            continue;
        }
        if !current.is_directory() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        if segment == ".." {
            let self_head = current.cluster_index();
            let self_dot = read_entry_at(sb, storage, self_head, 0)?;
            let parent_of_self = ClusterIndex::from_raw(self_dot.cluster.get());
            let parent_dot = read_entry_at(sb, storage, parent_of_self, 0)?;
            let grandparent = ClusterIndex::from_raw(parent_dot.cluster.get());
            let own_index = parent_dot.dir_entry.get();
            current = read_entry_at(sb, storage, grandparent, own_index)?;
            parent_head = grandparent;
            index = own_index;
            continue;
        }

        let head = current.cluster_index();
        let mut found = None;
        for idx in 0..current.length.get() {
            let candidate = read_entry_at(sb, storage, head, idx)?;
            if candidate.exists() && candidate.name_str() == segment {
                found = Some((candidate, idx));
                break;
            }
        }
        match found {
            Some((entry, idx)) => {
                current = entry;
                parent_head = head;
                index = idx;
            }
            None => return Err(Error::Fs(FsError::NotFound)),
        }
    }

    Ok(Located {
        entry: current,
        parent_head,
        index,
    })
}

/// Splits `path` into its parent directory's path and the final segment.
pub fn split_parent_name(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => {
            let name = &trimmed[i + 1..];
            if name.is_empty() {
                return Err(Error::Fs(FsError::InvalidArgument));
            }
            if name.len() > NAME_MAX {
                return Err(Error::Fs(FsError::NameTooLong));
            }
            let parent = if i == 0 { "/" } else { &trimmed[..i] };
            Ok((parent, name))
        }
        None => Err(Error::Fs(FsError::InvalidArgument)),
    }
}

/// Invokes `callback` with the name and entry of every extant child of
/// `parent` (§4.5 `ls`).
pub fn ls<S: Storage>(
    sb: &Superblock,
    storage: &S,
    parent: &RawDirEntry,
    mut callback: impl FnMut(&str, &RawDirEntry),
) -> Result<()> {
    if !parent.is_directory() {
        return Err(Error::Fs(FsError::NotADirectory));
    }
    let head = parent.cluster_index();
    for idx in 0..parent.length.get() {
        let entry = read_entry_at(sb, storage, head, idx)?;
        if entry.exists() {
            callback(entry.name_str(), &entry);
        }
    }
    Ok(())
}

/// Appends `new_entry` as `parent`'s next child, growing `parent`'s chain if
/// needed, and persists the updated `parent.length` (§4.5 `add_child`).
/// Returns the new child's index within `parent`.
pub fn add_child<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    parent_head: ClusterIndex,
    parent: &mut RawDirEntry,
    new_entry: &RawDirEntry,
) -> Result<u32> {
    let dpc = sb.dirents_per_cluster() as u32;
    let new_length = parent.length.get() + 1;
    let new_clusters = div_ceil_u32(new_length, dpc);
    if fat::truncate(sb, storage, parent_head, new_clusters)? == ClusterIndex::Invalid {
        return Err(Error::Fs(FsError::NoSpace));
    }

    let index = parent.length.get();
    write_entry_at(sb, storage, parent_head, index, new_entry)?;
    parent.length = U32::new(new_length);
    persist_self(sb, storage, parent_head, parent)?;
    Ok(index)
}

fn build_entry(mode_bits: u16, length: u32, cluster: ClusterIndex, name: &str) -> RawDirEntry {
    let now = DateTime::now();
    let mut entry = RawDirEntry::EMPTY;
    entry.mode = zerocopy::little_endian::U16::new(mode_bits);
    entry.length = U32::new(length);
    entry.set_cluster(cluster);
    entry.creation = now;
    entry.modification = now;
    entry.set_name(name);
    entry
}

/// Creates a subdirectory `name` of `parent`, writing its `.`/`..` entries
/// (§4.5 `mkdir`). Rolls back the allocated chain on failure to link it in.
pub fn mkdir<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    parent_head: ClusterIndex,
    parent: &mut RawDirEntry,
    name: &str,
    mode_bits: u16,
) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(Error::Fs(FsError::NameTooLong));
    }
    let dpc = sb.dirents_per_cluster() as u32;
    let new_clusters = div_ceil_u32(2, dpc);
    let new_head = match fat::allocate(sb, storage, new_clusters)? {
        ClusterIndex::Valid(v) => v,
        ClusterIndex::Invalid => return Err(Error::Fs(FsError::NoSpace)),
    };

    let new_entry = build_entry(mode_bits | mode::DIRECTORY | mode::EXISTS, 2, ClusterIndex::Valid(new_head), name);
    let index = match add_child(sb, storage, parent_head, parent, &new_entry) {
        Ok(index) => index,
        Err(err) => {
            fat::truncate(sb, storage, ClusterIndex::Valid(new_head), 0)?;
            return Err(err);
        }
    };

    let parent_relative = parent_head.value().ok_or(Error::Fs(FsError::InvalidArgument))?;
    let mut dot = build_entry(new_entry.mode.get(), 2, ClusterIndex::Valid(parent_relative), ".");
    dot.dir_entry = U32::new(index);
    write_entry_at(sb, storage, ClusterIndex::Valid(new_head), 0, &dot)?;

    let mut dotdot = build_entry(new_entry.mode.get(), 0, dot.cluster_index(), "..");
    dotdot.dir_entry = dot.dir_entry;
    write_entry_at(sb, storage, ClusterIndex::Valid(new_head), 1, &dotdot)?;

    Ok(())
}

/// Creates a file `name` of `parent` (§4.5 `create`).
pub fn create<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    parent_head: ClusterIndex,
    parent: &mut RawDirEntry,
    name: &str,
    cluster: ClusterIndex,
    mode_bits: u16,
) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(Error::Fs(FsError::NameTooLong));
    }
    let new_entry = build_entry(mode_bits | mode::FILE | mode::EXISTS, 0, cluster, name);
    add_child(sb, storage, parent_head, parent, &new_entry)?;
    Ok(())
}

/// Writes `data` at `offset` into the file described by `located`, growing
/// its chain and `length` first if the write extends past EOF (§4.5
/// `write`). Persists the updated entry back into its parent.
pub fn write<S: Storage>(sb: &Superblock, storage: &mut S, located: &mut Located, offset: u64, data: &[u8]) -> Result<usize> {
    let end = offset + data.len() as u64;
    if end > located.entry.length.get() as u64 {
        if !located.entry.cluster_index().is_valid() {
            let new_head = match fat::allocate(sb, storage, 1)? {
                ClusterIndex::Valid(v) => v,
                ClusterIndex::Invalid => return Err(Error::Fs(FsError::NoSpace)),
            };
            located.entry.set_cluster(ClusterIndex::Valid(new_head));
        }
        let cluster_capacity = sb.cluster_capacity() as u64;
        let needed_clusters = div_ceil_u64(end, cluster_capacity) as u32;
        if fat::truncate(sb, storage, located.entry.cluster_index(), needed_clusters)? == ClusterIndex::Invalid {
            return Err(Error::Fs(FsError::NoSpace));
        }
        located.entry.length = U32::new(end as u32);
        write_entry_at(sb, storage, located.parent_head, located.index, &located.entry)?;
    }
    page::write_bytes(sb, storage, located.entry.cluster_index(), offset, data)
}

/// Removes `entry` at `index` of `parent`, freeing its chain and shifting
/// later siblings down to close the gap (§4.5 `unlink`). `rmdir` is
/// identical at the directory level; the caller is responsible for ensuring
/// the directory is already empty.
pub fn unlink<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    entry: &RawDirEntry,
    parent_head: ClusterIndex,
    parent: &mut RawDirEntry,
    index: u32,
) -> Result<()> {
    if entry.cluster_index().is_valid() {
        fat::truncate(sb, storage, entry.cluster_index(), 0)?;
    }

    let last = parent.length.get() - 1;
    for i in index..last {
        let moved = read_entry_at(sb, storage, parent_head, i + 1)?;
        write_entry_at(sb, storage, parent_head, i, &moved)?;
        if moved.is_directory() {
            let mut child_dot = read_entry_at(sb, storage, moved.cluster_index(), 0)?;
            child_dot.dir_entry = U32::new(i);
            write_entry_at(sb, storage, moved.cluster_index(), 0, &child_dot)?;
        }
    }

    parent.length = U32::new(last);
    persist_self(sb, storage, parent_head, parent)
}

/// See [`unlink`]; VFS boundary ensures emptiness before calling this.
pub fn rmdir<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    entry: &RawDirEntry,
    parent_head: ClusterIndex,
    parent: &mut RawDirEntry,
    index: u32,
) -> Result<()> {
    unlink(sb, storage, entry, parent_head, parent, index)
}

/// Moves or swaps `from` and `to` (§4.5 `rename`).
pub fn rename<S: Storage>(sb: &Superblock, storage: &mut S, from: &str, to: &str, flags: RenameFlags) -> Result<()> {
    let origin = browse(sb, storage, from)?;
    let destination = match browse(sb, storage, to) {
        Ok(located) => Some(located),
        Err(Error::Fs(FsError::NotFound)) => None,
        Err(err) => return Err(err),
    };

    if flags.exchange {
        let destination = destination.ok_or(Error::Fs(FsError::NotFound))?;
        write_entry_at(sb, storage, destination.parent_head, destination.index, &origin.entry)?;
        write_entry_at(sb, storage, origin.parent_head, origin.index, &destination.entry)?;
        return Ok(());
    }

    if destination.is_some() {
        if flags.noreplace {
            return Err(Error::Fs(FsError::Exists));
        }
        let destination = destination.unwrap();

        // Swap: origin's dirent into destination's slot, destination's
        // dirent into origin's slot.
        write_entry_at(sb, storage, destination.parent_head, destination.index, &origin.entry)?;
        write_entry_at(sb, storage, origin.parent_head, origin.index, &destination.entry)?;

        // destination.parent[destination.index] now holds a verbatim copy
        // of the old origin entry; remove that slot, freeing its chain
        // unless it's the same chain destination's data already pointed at.
        let mut nulled = origin.entry;
        if origin.entry.cluster_index() == destination.entry.cluster_index() {
            nulled.set_cluster(ClusterIndex::Invalid);
        }
        let mut destination_parent = read_self(sb, storage, destination.parent_head)?;
        unlink(sb, storage, &nulled, destination.parent_head, &mut destination_parent, destination.index)?;
        return Ok(());
    }

    let (dest_parent_path, dest_name) = split_parent_name(to)?;
    let mut dest_parent_loc = browse(sb, storage, dest_parent_path)?;
    if !dest_parent_loc.entry.is_directory() {
        return Err(Error::Fs(FsError::NotADirectory));
    }
    let mut shared_entry = origin.entry;
    shared_entry.set_name(dest_name);
    add_child(
        sb,
        storage,
        dest_parent_loc.entry.cluster_index(),
        &mut dest_parent_loc.entry,
        &shared_entry,
    )?;

    let mut origin_parent = read_self(sb, storage, origin.parent_head)?;
    let nulled = {
        let mut e = origin.entry;
        e.set_cluster(ClusterIndex::Invalid);
        e
    };
    unlink(sb, storage, &nulled, origin.parent_head, &mut origin_parent, origin.index)
}

/// Updates `located`'s modification time in place (§9: `creation` is left
/// untouched, unlike the source behavior it was ported from).
pub fn utime<S: Storage>(sb: &Superblock, storage: &mut S, located: &mut Located, modification: SystemTime) -> Result<()> {
    located.entry.modification = DateTime::from_system_time(modification);
    write_entry_at(sb, storage, located.parent_head, located.index, &located.entry)
}

#[cfg(test)]
mod tests {
    use vmc_ds_std::MemoryStorage;

    use super::*;
    use crate::format::format_empty_image;
    use crate::layout::DEFAULT_SUPERBLOCK;

    fn fresh_image() -> (Superblock, MemoryStorage) {
        let sb = DEFAULT_SUPERBLOCK;
        let len = sb.clusters_per_card.get() as usize * sb.cluster_physical_size();
        let mut storage = MemoryStorage::zeroed(len);
        format_empty_image(&sb, &mut storage).unwrap();
        (sb, storage)
    }

    #[test]
    fn root_lists_dot_and_dotdot() {
        let (sb, mut storage) = fresh_image();
        let root = browse(&sb, &mut storage, "/").unwrap();
        let mut names = Vec::new();
        ls(&sb, &mut storage, &root.entry, |name, _| names.push(name.to_string())).unwrap();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn create_write_read_round_trips() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "a.bin", ClusterIndex::Invalid, 0o666).unwrap();

        let mut located = browse(&sb, &mut storage, "/a.bin").unwrap();
        let n = write(&sb, &mut storage, &mut located, 0, b"hello").unwrap();
        assert_eq!(n, 5);
        assert_eq!(located.entry.length.get(), 5);

        let mut buf = [0u8; 5];
        page::read_bytes(&sb, &mut storage, located.entry.cluster_index(), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let reread = browse(&sb, &mut storage, "/a.bin").unwrap();
        assert_eq!(reread.entry.length.get(), 5);
    }

    #[test]
    fn cross_cluster_write_spans_chain() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "big", ClusterIndex::Invalid, 0o666).unwrap();

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let mut located = browse(&sb, &mut storage, "/big").unwrap();
        write(&sb, &mut storage, &mut located, 0, &payload).unwrap();

        let mut readback = vec![0u8; payload.len()];
        page::read_bytes(&sb, &mut storage, located.entry.cluster_index(), 0, &mut readback).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn mkdir_create_unlink_rmdir() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        mkdir(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "d", 0o755).unwrap();

        let d = browse(&sb, &mut storage, "/d").unwrap();
        let mut names = Vec::new();
        ls(&sb, &mut storage, &d.entry, |name, _| names.push(name.to_string())).unwrap();
        assert_eq!(names, vec![".", ".."]);

        let mut d_entry = d.entry;
        create(&sb, &mut storage, d.entry.cluster_index(), &mut d_entry, "x", ClusterIndex::Invalid, 0o644).unwrap();

        let x = browse(&sb, &mut storage, "/d/x").unwrap();
        let mut d_for_unlink = read_self(&sb, &mut storage, x.parent_head).unwrap();
        unlink(&sb, &mut storage, &x.entry, x.parent_head, &mut d_for_unlink, x.index).unwrap();
        assert!(matches!(browse(&sb, &mut storage, "/d/x"), Err(Error::Fs(FsError::NotFound))));

        let d = browse(&sb, &mut storage, "/d").unwrap();
        let mut root_for_rmdir = read_self(&sb, &mut storage, d.parent_head).unwrap();
        rmdir(&sb, &mut storage, &d.entry, d.parent_head, &mut root_for_rmdir, d.index).unwrap();

        let root = browse(&sb, &mut storage, "/").unwrap();
        let mut names = Vec::new();
        ls(&sb, &mut storage, &root.entry, |name, _| names.push(name.to_string())).unwrap();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn rename_exchange_swaps_contents() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "a", ClusterIndex::Invalid, 0o666).unwrap();
        let mut root = read_self(&sb, &mut storage, sb.root_cluster()).unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root, "b", ClusterIndex::Invalid, 0o666).unwrap();

        let mut a = browse(&sb, &mut storage, "/a").unwrap();
        write(&sb, &mut storage, &mut a, 0, b"AAAA").unwrap();
        let mut b = browse(&sb, &mut storage, "/b").unwrap();
        write(&sb, &mut storage, &mut b, 0, b"BBBBB").unwrap();

        let before = fat::count_occupied(&sb, &storage).unwrap();
        rename(&sb, &mut storage, "/a", "/b", RenameFlags { noreplace: false, exchange: true }).unwrap();
        assert_eq!(fat::count_occupied(&sb, &storage).unwrap(), before);

        let a = browse(&sb, &mut storage, "/a").unwrap();
        let mut buf = [0u8; 5];
        page::read_bytes(&sb, &mut storage, a.entry.cluster_index(), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"BBBBB");

        let b = browse(&sb, &mut storage, "/b").unwrap();
        let mut buf = [0u8; 4];
        page::read_bytes(&sb, &mut storage, b.entry.cluster_index(), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"AAAA");
    }

    #[test]
    fn rename_over_existing_destination_frees_its_chain() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "a", ClusterIndex::Invalid, 0o666).unwrap();
        let mut root = read_self(&sb, &mut storage, sb.root_cluster()).unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root, "b", ClusterIndex::Invalid, 0o666).unwrap();

        let mut a = browse(&sb, &mut storage, "/a").unwrap();
        write(&sb, &mut storage, &mut a, 0, b"AAAA").unwrap();
        let mut b = browse(&sb, &mut storage, "/b").unwrap();
        write(&sb, &mut storage, &mut b, 0, b"BBBBB").unwrap();

        let before = fat::count_occupied(&sb, &storage).unwrap();
        rename(&sb, &mut storage, "/a", "/b", RenameFlags { noreplace: false, exchange: false }).unwrap();

        // "a"'s cluster chain was freed, "b"'s slot was removed from the
        // directory: one fewer occupied cluster than before the rename.
        assert_eq!(fat::count_occupied(&sb, &storage).unwrap(), before - 1);
        assert!(matches!(browse(&sb, &mut storage, "/a"), Err(Error::Fs(FsError::NotFound))));

        let root = browse(&sb, &mut storage, "/").unwrap();
        let mut names = Vec::new();
        ls(&sb, &mut storage, &root.entry, |name, _| names.push(name.to_string())).unwrap();
        assert_eq!(names, vec![".", "..", "b"]);
    }

    #[test]
    fn rename_noreplace_rejects_existing_destination() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "a", ClusterIndex::Invalid, 0o666).unwrap();
        let mut root = read_self(&sb, &mut storage, sb.root_cluster()).unwrap();
        create(&sb, &mut storage, sb.root_cluster(), &mut root, "b", ClusterIndex::Invalid, 0o666).unwrap();

        let err = rename(&sb, &mut storage, "/a", "/b", RenameFlags { noreplace: true, exchange: false }).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::Exists)));
    }

    #[test]
    fn dotdot_climbs_back_to_root() {
        let (sb, mut storage) = fresh_image();
        let mut root = browse(&sb, &mut storage, "/").unwrap();
        mkdir(&sb, &mut storage, sb.root_cluster(), &mut root.entry, "d", 0o755).unwrap();

        let up = browse(&sb, &mut storage, "/d/..").unwrap();
        assert_eq!(up.entry.name_str(), ".");
        assert_eq!(up.entry.cluster_index(), sb.root_cluster());
    }
}
