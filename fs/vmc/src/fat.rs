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

//! Cluster-chain allocation over the two-level indirect FAT (§4.3): chain
//! lookup, allocation, freeing and truncation. All cluster arguments here
//! are in relative index space.

use vmc_ds::Storage;
use vmc_err::{Error, FsError, Result};

use crate::layout::{ClusterIndex, FatEntry, Superblock};

/// Resolves the physical byte offset of the FAT entry for relative cluster
/// `relative`, following `indirect_fat_clusters[dbl_indirect_index] →
/// fat_cluster_abs → entry` (§3).
fn fat_entry_offset<S: Storage>(sb: &Superblock, storage: &S, relative: u32) -> Result<u64> {
    let k = sb.fat_entries_per_cluster();
    let fat_offset = relative % k;
    let indirect_index = relative / k;
    let indirect_offset = indirect_index % k;
    let dbl_indirect_index = (indirect_index / k) as usize;

    let indirect_cluster_abs = sb.indirect_fat_clusters[dbl_indirect_index].get();
    let cluster_size = sb.cluster_physical_size() as u64;

    let indirect_entry_offset = indirect_cluster_abs as u64 * cluster_size + indirect_offset as u64 * 4;
    let mut raw = [0u8; 4];
    storage.read(indirect_entry_offset, &mut raw)?;
    let fat_cluster_abs = u32::from_le_bytes(raw);

    Ok(fat_cluster_abs as u64 * cluster_size + fat_offset as u64 * 4)
}

pub fn get_entry<S: Storage>(sb: &Superblock, storage: &S, relative: u32) -> Result<FatEntry> {
    let offset = fat_entry_offset(sb, storage, relative)?;
    let mut raw = [0u8; 4];
    storage.read(offset, &mut raw)?;
    Ok(FatEntry::decode(u32::from_le_bytes(raw)))
}

pub fn set_entry<S: Storage>(sb: &Superblock, storage: &mut S, relative: u32, entry: FatEntry) -> Result<()> {
    let offset = fat_entry_offset(sb, &*storage, relative)?;
    storage.write(offset, &entry.encode().to_le_bytes())
}

/// Advances `count` hops along the chain starting at `cluster`. Returns
/// [`ClusterIndex::Invalid`] if a terminator or free entry is reached
/// before `count` hops are consumed.
pub fn seek<S: Storage>(sb: &Superblock, storage: &S, cluster: ClusterIndex, count: u32) -> Result<ClusterIndex> {
    let mut current = cluster;
    for _ in 0..count {
        let relative = match current.value() {
            Some(v) => v,
            None => return Ok(ClusterIndex::Invalid),
        };
        let entry = get_entry(sb, storage, relative)?;
        if !entry.occupied || entry.is_terminator() {
            return Ok(ClusterIndex::Invalid);
        }
        current = entry.next_cluster;
    }
    Ok(current)
}

/// Scans at most `last_allocatable` entries starting at `start`, wrapping
/// modulo `last_allocatable`, for the first unoccupied one (§4.3, §9:
/// `last_allocatable` is an exclusive upper bound in relative space).
pub fn find_free_cluster<S: Storage>(sb: &Superblock, storage: &S, start: u32) -> Result<ClusterIndex> {
    let last_allocatable = sb.last_allocatable();
    if last_allocatable == 0 {
        return Ok(ClusterIndex::Invalid);
    }
    for i in 0..last_allocatable {
        let candidate = (start + i) % last_allocatable;
        let entry = get_entry(sb, storage, candidate)?;
        if !entry.occupied {
            return Ok(ClusterIndex::Valid(candidate));
        }
    }
    Ok(ClusterIndex::Invalid)
}

/// Grows or shrinks the chain rooted at `head` to `target_len` clusters,
/// returning the new last cluster (or `Invalid` when `target_len == 0`, or
/// on allocation failure during growth). `head` must already be occupied.
pub fn truncate<S: Storage>(
    sb: &Superblock,
    storage: &mut S,
    head: ClusterIndex,
    mut target_len: u32,
) -> Result<ClusterIndex> {
    let mut cluster = head.value().ok_or(Error::Fs(FsError::InvalidArgument))?;
    let mut entry = get_entry(sb, storage, cluster)?;

    while target_len > 1 {
        target_len -= 1;
        if !entry.occupied || entry.is_terminator() {
            break;
        }
        cluster = entry
            .next_cluster
            .value()
            .expect("occupied non-terminator entry has a valid next_cluster");
        entry = get_entry(sb, storage, cluster)?;
    }
    let last_cluster = cluster;

    // case 0: already exactly `target_len` long, nothing to do.
    if target_len == 1 && entry.is_terminator() {
        return Ok(ClusterIndex::Valid(cluster));
    }

    // case 1: chain is at least `target_len` long; free the tail, planting
    // a fresh terminator at the new end if one isn't there already.
    if target_len == 0 || (target_len == 1 && entry.occupied) {
        while entry.occupied {
            if target_len == 1 {
                set_entry(sb, storage, cluster, FatEntry::TERMINATOR)?;
                target_len -= 1;
            } else {
                set_entry(sb, storage, cluster, FatEntry::FREE)?;
            }
            if entry.is_terminator() {
                break;
            }
            cluster = entry
                .next_cluster
                .value()
                .expect("occupied non-terminator entry has a valid next_cluster");
            entry = get_entry(sb, storage, cluster)?;
        }
        return Ok(ClusterIndex::Valid(last_cluster));
    }

    // case 2: chain is shorter than `target_len`; extend it.
    while target_len > 0 {
        let new_cluster = match find_free_cluster(sb, storage, 0)? {
            ClusterIndex::Valid(v) => v,
            ClusterIndex::Invalid => {
                truncate(sb, storage, ClusterIndex::Valid(last_cluster), 1)?;
                return Ok(ClusterIndex::Invalid);
            }
        };
        set_entry(
            sb,
            storage,
            cluster,
            FatEntry {
                occupied: true,
                next_cluster: ClusterIndex::Valid(new_cluster),
            },
        )?;
        set_entry(sb, storage, new_cluster, FatEntry::TERMINATOR)?;
        cluster = new_cluster;
        target_len -= 1;
    }
    Ok(ClusterIndex::Valid(cluster))
}

/// Finds a free cluster, marks it as a one-cluster chain, then grows it to
/// `len` clusters. Rolls the starting cluster back to `FREE` on failure.
pub fn allocate<S: Storage>(sb: &Superblock, storage: &mut S, len: u32) -> Result<ClusterIndex> {
    let start = match find_free_cluster(sb, storage, 0)? {
        ClusterIndex::Valid(v) => v,
        ClusterIndex::Invalid => return Ok(ClusterIndex::Invalid),
    };
    set_entry(sb, storage, start, FatEntry::TERMINATOR)?;
    match truncate(sb, storage, ClusterIndex::Valid(start), len)? {
        ClusterIndex::Invalid => {
            set_entry(sb, storage, start, FatEntry::FREE)?;
            Ok(ClusterIndex::Invalid)
        }
        ClusterIndex::Valid(_) => Ok(ClusterIndex::Valid(start)),
    }
}

/// Counts occupied FAT entries across the whole allocatable range; test
/// helper mirroring the scenarios in §8.
#[cfg(test)]
pub(crate) fn count_occupied<S: Storage>(sb: &Superblock, storage: &S) -> Result<u32> {
    let mut n = 0;
    for relative in 0..sb.last_allocatable() {
        if get_entry(sb, storage, relative)?.occupied {
            n += 1;
        }
    }
    Ok(n)
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
    fn fresh_image_has_exactly_one_occupied_cluster() {
        let (sb, storage) = fresh_image();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), 1);
    }

    #[test]
    fn truncate_grows_and_shrinks() {
        let (sb, mut storage) = fresh_image();
        let root = sb.root_cluster();

        truncate(&sb, &mut storage, root, 5).unwrap();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), 5);

        truncate(&sb, &mut storage, root, 5).unwrap();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), 5);

        truncate(&sb, &mut storage, root, 2).unwrap();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), 2);

        truncate(&sb, &mut storage, root, 1).unwrap();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), 1);
    }

    #[test]
    fn allocate_then_free_round_trips_occupied_count() {
        let (sb, mut storage) = fresh_image();
        let before = count_occupied(&sb, &storage).unwrap();

        let chain = allocate(&sb, &mut storage, 4).unwrap();
        assert!(chain.is_valid());
        assert_eq!(count_occupied(&sb, &storage).unwrap(), before + 4);

        truncate(&sb, &mut storage, chain, 0).unwrap();
        assert_eq!(count_occupied(&sb, &storage).unwrap(), before);
    }

    #[test]
    fn seek_walks_allocated_chain() {
        let (sb, mut storage) = fresh_image();
        let chain = allocate(&sb, &mut storage, 3).unwrap();
        assert!(seek(&sb, &storage, chain, 2).unwrap().is_valid());
        assert_eq!(seek(&sb, &storage, chain, 3).unwrap(), ClusterIndex::Invalid);
    }
}
