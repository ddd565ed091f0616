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

//! Produces a byte-accurate freshly formatted empty image from a supplied
//! superblock (§4.6), ported page-by-page from the reference `mc_writer`.

use vmc_ds::Storage;
use vmc_err::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::IntoBytes;

use crate::ecc;
use crate::layout::{mode, ClusterIndex, DateTime, FatEntry, RawDirEntry, Superblock, DIR_ENTRY_SIZE};

fn div_ceil(x: u32, y: u32) -> u32 {
    x / y + u32::from(x % y != 0)
}

/// Writes one physical page at `offset`: `logical` (at most `page_capacity`
/// bytes) followed by `0xFF` padding, with ECC computed over the data half
/// when enabled. A shorter-than-`page_capacity` (or empty) `logical` slice
/// writes an all-`0xFF` filler page.
fn write_page<S: Storage>(
    storage: &mut S,
    offset: u64,
    page_capacity: usize,
    page_physical_size: usize,
    ecc_enabled: bool,
    logical: &[u8],
) -> Result<()> {
    let mut page = vec![0xFFu8; page_physical_size];
    let n = logical.len().min(page_capacity);
    page[..n].copy_from_slice(&logical[..n]);
    if ecc_enabled {
        let mut page_ecc = [0u8; ecc::PAGE_ECC_SIZE];
        ecc::encode_page(&mut page_ecc, &page[..page_capacity]);
        page[page_capacity..page_capacity + ecc::PAGE_ECC_SIZE].copy_from_slice(&page_ecc);
    }
    storage.write(offset, &page)
}

/// Writes a fresh, empty image matching `sb` into `storage` (§4.6).
/// `storage` must already be sized to the image's final physical length —
/// `clusters_per_card * pages_per_cluster * page_physical_size`.
pub fn format_empty_image<S: Storage>(sb: &Superblock, storage: &mut S) -> Result<()> {
    let page_capacity = sb.page_capacity();
    let page_physical_size = sb.page_physical_size();
    let pages_per_cluster = sb.pages_per_cluster.get() as u64;
    let pages_per_block = sb.pages_per_block.get() as u64;
    let cluster_physical_size = sb.cluster_physical_size() as u64;
    let ecc_enabled = sb.uses_ecc();

    log::debug!(
        "formatting empty image: {} clusters, page_size={}, ecc={}",
        sb.clusters_per_card.get(),
        page_capacity,
        ecc_enabled
    );

    let mut cursor = 0u64;
    let mut page = |storage: &mut S, cursor: &mut u64, logical: &[u8]| -> Result<()> {
        write_page(storage, *cursor, page_capacity, page_physical_size, ecc_enabled, logical)?;
        *cursor += page_physical_size as u64;
        Ok(())
    };
    // The cleared allocatable region and the all-0xFF backup erase block are
    // written without ECC even on an ECC-enabled image — `mc_writer.c`'s
    // "Writing cleared allocatable clusters" and "Writing erase block2"
    // passes never call `WRITE_ECC()` for these two regions, unlike every
    // other page in the image.
    let mut raw_page = |storage: &mut S, cursor: &mut u64| -> Result<()> {
        write_page(storage, *cursor, page_capacity, page_physical_size, false, &[])?;
        *cursor += page_physical_size as u64;
        Ok(())
    };

    // 1. Superblock page, then the rest of its erase block as 0xFF filler.
    page(storage, &mut cursor, sb.as_bytes())?;
    for _ in 1..pages_per_block {
        page(storage, &mut cursor, &[])?;
    }

    // 2. Indirect FAT: enough pages of absolute FAT-cluster indices to cover
    // every allocatable cluster, padded out to the next cluster boundary.
    let words_per_cluster = (sb.cluster_capacity() / 4) as u32;
    let clusters_per_block = (pages_per_block / pages_per_cluster) as u32;
    let max_fat_entries = sb.last_allocatable();
    let max_indirect_fat_entries = div_ceil(max_fat_entries, words_per_cluster);
    let max_indirect_fat_clusters = div_ceil(max_indirect_fat_entries, words_per_cluster);
    let entries_per_page = (page_capacity / 4) as u32;

    let mut written = 0u32;
    while written < max_indirect_fat_entries {
        let mut logical = vec![0xFFu8; page_capacity];
        let mut i = 0u32;
        while i < entries_per_page && written < max_indirect_fat_entries {
            let fat_cluster_abs = clusters_per_block + max_indirect_fat_clusters + written;
            let at = i as usize * 4;
            logical[at..at + 4].copy_from_slice(&fat_cluster_abs.to_le_bytes());
            i += 1;
            written += 1;
        }
        page(storage, &mut cursor, &logical)?;
    }
    while cursor % cluster_physical_size != 0 {
        page(storage, &mut cursor, &[])?;
    }

    // 3. FAT table: one entry per allocatable cluster, all free except
    // entry 0 (the root, marked occupied with a terminator).
    let mut written = 0u32;
    while written < max_fat_entries {
        let mut logical = vec![0xFFu8; page_capacity];
        let mut i = 0u32;
        while i < entries_per_page && written < max_fat_entries {
            let entry = if written == 0 { FatEntry::TERMINATOR } else { FatEntry::FREE };
            let at = i as usize * 4;
            logical[at..at + 4].copy_from_slice(&entry.encode().to_le_bytes());
            i += 1;
            written += 1;
        }
        page(storage, &mut cursor, &logical)?;
    }

    // 4. First allocatable cluster: the root directory's `.` and `..`.
    let now = DateTime::now();
    let mut dot = RawDirEntry::EMPTY;
    dot.mode = U16::new(mode::DIRECTORY | mode::EXISTS | mode::READ | mode::WRITE | mode::EXECUTE | mode::CREATED);
    dot.length = U32::new(2);
    dot.set_cluster(ClusterIndex::Valid(0));
    dot.dir_entry = U32::new(0);
    dot.creation = now;
    dot.modification = now;
    dot.set_name(".");

    let mut dotdot = RawDirEntry::EMPTY;
    dotdot.mode = U16::new(mode::DIRECTORY | mode::EXISTS | mode::WRITE | mode::EXECUTE | mode::CREATED | mode::HIDDEN);
    dotdot.length = U32::new(0);
    dotdot.set_cluster(ClusterIndex::Valid(0));
    dotdot.dir_entry = U32::new(0);
    dotdot.creation = now;
    dotdot.modification = now;
    dotdot.set_name("..");

    let mut root_logical = vec![0xFFu8; sb.cluster_capacity()];
    root_logical[..DIR_ENTRY_SIZE].copy_from_slice(dot.as_bytes());
    root_logical[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(dotdot.as_bytes());

    let mut allocatable_pages_written = 0u64;
    for chunk in root_logical.chunks(page_capacity) {
        page(storage, &mut cursor, chunk)?;
        allocatable_pages_written += 1;
    }

    // 5. Filler with ECC up to the end of the root cluster's erase block.
    while cursor % (pages_per_block * page_physical_size as u64) != 0 {
        page(storage, &mut cursor, &[])?;
        allocatable_pages_written += 1;
    }

    // 6. 0xFF filler for the rest of the allocatable region, raw (no ECC).
    let allocatable_physical_pages = sb.last_allocatable() as u64 * pages_per_cluster;
    while allocatable_pages_written < allocatable_physical_pages {
        raw_page(storage, &mut cursor)?;
        allocatable_pages_written += 1;
    }

    // 7. Two trailing backup erase blocks: all-0xFF raw, then a superblock copy with ECC.
    for _ in 0..pages_per_block {
        raw_page(storage, &mut cursor)?;
    }
    page(storage, &mut cursor, sb.as_bytes())?;
    for _ in 1..pages_per_block {
        page(storage, &mut cursor, &[])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use vmc_ds_std::MemoryStorage;

    use super::*;
    use crate::layout::DEFAULT_SUPERBLOCK;

    fn formatted() -> (Superblock, MemoryStorage) {
        let sb = DEFAULT_SUPERBLOCK;
        let len = sb.clusters_per_card.get() as usize * sb.cluster_physical_size();
        let mut storage = MemoryStorage::zeroed(len);
        format_empty_image(&sb, &mut storage).unwrap();
        (sb, storage)
    }

    #[test]
    fn writes_exactly_the_image_length() {
        let (sb, storage) = formatted();
        assert_eq!(storage.len(), sb.clusters_per_card.get() as u64 * sb.cluster_physical_size() as u64);
    }

    #[test]
    fn root_cluster_holds_dot_and_dotdot() {
        let (sb, mut storage) = formatted();
        let root = sb.root_cluster();

        let mut dot = [0u8; DIR_ENTRY_SIZE];
        crate::page::read_bytes(&sb, &mut storage, root, 0, &mut dot).unwrap();
        let dot = RawDirEntry::ref_from_bytes(&dot).unwrap();
        assert!(dot.exists());
        assert!(dot.is_directory());
        assert_eq!(dot.length.get(), 2);
        assert_eq!(dot.name_str(), ".");

        let mut dotdot = [0u8; DIR_ENTRY_SIZE];
        crate::page::read_bytes(&sb, &mut storage, root, DIR_ENTRY_SIZE as u64, &mut dotdot).unwrap();
        let dotdot = RawDirEntry::ref_from_bytes(&dotdot).unwrap();
        assert!(dotdot.exists());
        assert_eq!(dotdot.length.get(), 0);
        assert_eq!(dotdot.name_str(), "..");
    }

    #[test]
    fn ecc_enabled_image_leaves_filler_regions_raw() {
        let mut sb = DEFAULT_SUPERBLOCK;
        sb.card_flags |= crate::layout::card_flags::USE_ECC;
        let len = sb.clusters_per_card.get() as usize * sb.cluster_physical_size();
        let mut storage = MemoryStorage::zeroed(len);
        format_empty_image(&sb, &mut storage).unwrap();

        let page_physical_size = sb.page_physical_size() as u64;
        let pages_per_block = sb.pages_per_block.get() as u64;
        let total_len = storage.len();

        // The all-0xFF backup erase block (step 7's first block) sits one
        // erase block before the end of the image; its pages, spare area
        // included, must be untouched 0xFF rather than carrying computed
        // ECC (examples/original_source/src/mc_writer.c's "Writing erase
        // block2" never calls `WRITE_ECC()`).
        let backup_block2_start = total_len - 2 * pages_per_block * page_physical_size;
        let mut page = vec![0u8; page_physical_size as usize];
        storage.read(backup_block2_start, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 0xFF));

        // The last page of the cleared allocatable region (step 6), which
        // ends exactly where the first backup erase block begins, must
        // likewise be raw 0xFF, spare area included.
        storage.read(backup_block2_start - page_physical_size, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn superblock_round_trips_through_reformat() {
        let (sb, storage) = formatted();
        let mut raw = [0u8; crate::layout::SUPERBLOCK_SIZE];
        storage.read(0, &mut raw).unwrap();
        assert_eq!(raw.as_slice(), sb.as_bytes());
    }
}
