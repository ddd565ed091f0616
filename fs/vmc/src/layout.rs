//! On-disk layout structs and constants for the "Sony PS2 Memory Card
//! Format 1.2.0.0" (`type = 2`) image format.
//!
//! All multi-byte integers on disk are little-endian; [`zerocopy`]'s
//! [`little_endian`] wrapper types make that explicit in the struct
//! definitions below rather than relying on the host's native endianness.

use std::time::SystemTime;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::time::{system_time_to_ymdhms, ymdhms_to_system_time};

/// Superblock magic string, NUL-padded to 40 bytes.
pub const MAGIC: [u8; 40] = *b"Sony PS2 Memory Card Format 1.2.0.0\0\0\0\0";

/// The only `type` value this core accepts (§1, non-goal (b)).
pub const SUPERBLOCK_TYPE: u8 = 2;

pub mod card_flags {
    /// Card pages carry a 12-byte-ECC / 16-byte spare area.
    pub const USE_ECC: u8 = 0x01;
    /// Card may have bad blocks (decoded for completeness; not acted on, §9).
    pub const BAD_BLOCK: u8 = 0x08;
    /// Erased blocks read back as all-zero rather than all-one (decoded for
    /// completeness; not acted on, §9).
    pub const ERASE_ZEROES: u8 = 0x10;
}

/// Directory-entry `mode` bitmask (§3, §6).
pub mod mode {
    pub const READ: u16 = 0x0001;
    pub const WRITE: u16 = 0x0002;
    pub const EXECUTE: u16 = 0x0004;
    pub const PROTECTED: u16 = 0x0008;
    pub const FILE: u16 = 0x0010;
    pub const DIRECTORY: u16 = 0x0020;
    pub const CREATED: u16 = 0x0400;
    pub const HIDDEN: u16 = 0x2000;
    pub const EXISTS: u16 = 0x8000;
}

/// Size in bytes of a page's ECC spare area when `card_flags::USE_ECC` is set.
pub const PAGE_SPARE_AREA_SIZE: usize = 16;
/// ECC bytes actually consumed within the 16-byte spare area (§1).
pub const ECC_BYTES_PER_PAGE: usize = 12;

/// A relative or absolute cluster index with a distinct invalid sentinel,
/// rather than reusing `u32::MAX` silently throughout the API surface (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterIndex {
    Valid(u32),
    Invalid,
}

const RAW_INVALID: u32 = 0xFFFF_FFFF;

impl ClusterIndex {
    pub const fn from_raw(raw: u32) -> Self {
        if raw == RAW_INVALID {
            ClusterIndex::Invalid
        } else {
            ClusterIndex::Valid(raw)
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            ClusterIndex::Valid(v) => v,
            ClusterIndex::Invalid => RAW_INVALID,
        }
    }

    pub fn is_valid(self) -> bool {
        matches!(self, ClusterIndex::Valid(_))
    }

    pub fn value(self) -> Option<u32> {
        match self {
            ClusterIndex::Valid(v) => Some(v),
            ClusterIndex::Invalid => None,
        }
    }
}

/// A decoded FAT table entry (§3). `next_cluster` uses the 31-bit sentinel
/// convention described in §9: the all-ones 31-bit pattern decodes to
/// [`ClusterIndex::Invalid`] even though it differs bitwise from the
/// 32-bit [`ClusterIndex::Invalid`] raw value used elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatEntry {
    pub occupied: bool,
    pub next_cluster: ClusterIndex,
}

const NEXT_CLUSTER_MASK: u32 = 0x7FFF_FFFF;
const OCCUPIED_BIT: u32 = 0x8000_0000;

impl FatEntry {
    pub const TERMINATOR: FatEntry = FatEntry {
        occupied: true,
        next_cluster: ClusterIndex::Invalid,
    };

    pub const FREE: FatEntry = FatEntry {
        occupied: false,
        next_cluster: ClusterIndex::Valid(0),
    };

    pub fn decode(raw: u32) -> Self {
        let occupied = raw & OCCUPIED_BIT != 0;
        let next_bits = raw & NEXT_CLUSTER_MASK;
        let next_cluster = if next_bits == NEXT_CLUSTER_MASK {
            ClusterIndex::Invalid
        } else {
            ClusterIndex::Valid(next_bits)
        };
        FatEntry {
            occupied,
            next_cluster,
        }
    }

    pub fn encode(self) -> u32 {
        let next_bits = match self.next_cluster {
            ClusterIndex::Valid(v) => v & NEXT_CLUSTER_MASK,
            ClusterIndex::Invalid => NEXT_CLUSTER_MASK,
        };
        (u32::from(self.occupied) << 31) | next_bits
    }

    pub fn is_terminator(self) -> bool {
        self.next_cluster == ClusterIndex::Invalid
    }
}

/// `date_time_t`: a UTC timestamp broken into calendar fields, matching
/// the on-disk layout bit-for-bit.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DateTime {
    pub _unused: u8,
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: U16,
}

impl DateTime {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let (year, month, day, hour, minute, second) = system_time_to_ymdhms(time);
        DateTime {
            _unused: 0,
            second,
            minute,
            hour,
            day,
            month,
            year: U16::new(year),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        ymdhms_to_system_time(
            self.year.get(),
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
    }
}

/// Maximum length, in bytes, of a directory entry's name (§1, non-goal (f)).
pub const NAME_MAX: usize = 32;

/// `dir_entry_t`: 512 bytes on disk, of which the core uses the first
/// ~96 bytes (§3). Matches the reference layout exactly (`mode` through
/// `name` plus trailing padding sums to 512, one entry per default
/// `page_size`), which is what makes the default geometry's root
/// directory (two entries, `.` and `..`) fit in the single cluster the
/// image formatter marks occupied (§8).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawDirEntry {
    pub mode: U16,
    pub _unused0: U16,
    pub length: U32,
    pub creation: DateTime,
    pub cluster: U32,
    pub dir_entry: U32,
    pub modification: DateTime,
    pub attributes: U32,
    pub _unused1: [u8; 28],
    pub name: [u8; NAME_MAX],
    pub _unused2: [u8; 416],
}

pub const DIR_ENTRY_SIZE: usize = std::mem::size_of::<RawDirEntry>();

impl RawDirEntry {
    pub const EMPTY: RawDirEntry = RawDirEntry {
        mode: U16::ZERO,
        _unused0: U16::ZERO,
        length: U32::ZERO,
        creation: DateTime {
            _unused: 0,
            second: 0,
            minute: 0,
            hour: 0,
            day: 0,
            month: 0,
            year: U16::ZERO,
        },
        cluster: U32::ZERO,
        dir_entry: U32::ZERO,
        modification: DateTime {
            _unused: 0,
            second: 0,
            minute: 0,
            hour: 0,
            day: 0,
            month: 0,
            year: U16::ZERO,
        },
        attributes: U32::ZERO,
        _unused1: [0; 28],
        name: [0; NAME_MAX],
        _unused2: [0; 416],
    };

    pub fn exists(&self) -> bool {
        self.mode.get() & mode::EXISTS != 0
    }

    pub fn is_directory(&self) -> bool {
        self.mode.get() & mode::DIRECTORY != 0
    }

    pub fn is_file(&self) -> bool {
        self.mode.get() & mode::FILE != 0
    }

    pub fn cluster_index(&self) -> ClusterIndex {
        ClusterIndex::from_raw(self.cluster.get())
    }

    pub fn set_cluster(&mut self, cluster: ClusterIndex) {
        self.cluster = U32::new(cluster.to_raw());
    }

    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; NAME_MAX];
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}

/// `superblock_t` (§3). Decoded once at `init` and treated as immutable
/// and owned thereafter — never a view into the backing buffer (§9).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Superblock {
    pub magic: [u8; 40],
    pub page_size: U16,
    pub pages_per_cluster: U16,
    pub pages_per_block: U16,
    pub _unused0: U16,
    pub clusters_per_card: U32,
    pub first_allocatable: U32,
    pub last_allocatable: U32,
    pub root_cluster: U32,
    pub backup_block1: U32,
    pub backup_block2: U32,
    pub _unused1: [u8; 8],
    pub indirect_fat_clusters: [U32; 32],
    pub bad_block_list: [U32; 32],
    pub ty: u8,
    pub card_flags: u8,
}

pub const SUPERBLOCK_SIZE: usize = std::mem::size_of::<Superblock>();

impl Superblock {
    pub fn uses_ecc(&self) -> bool {
        self.card_flags & card_flags::USE_ECC != 0
    }

    pub fn page_capacity(&self) -> usize {
        self.page_size.get() as usize
    }

    pub fn page_physical_size(&self) -> usize {
        self.page_capacity() + if self.uses_ecc() { PAGE_SPARE_AREA_SIZE } else { 0 }
    }

    pub fn cluster_capacity(&self) -> usize {
        self.page_capacity() * self.pages_per_cluster.get() as usize
    }

    pub fn cluster_physical_size(&self) -> usize {
        self.page_physical_size() * self.pages_per_cluster.get() as usize
    }

    pub fn dirents_per_cluster(&self) -> usize {
        self.cluster_capacity() / DIR_ENTRY_SIZE
    }

    /// `k` in the two-level indirect FAT formula (§3): 32-bit entries per cluster.
    pub fn fat_entries_per_cluster(&self) -> u32 {
        (self.cluster_capacity() / 4) as u32
    }

    pub fn first_allocatable(&self) -> u32 {
        self.first_allocatable.get()
    }

    pub fn last_allocatable(&self) -> u32 {
        self.last_allocatable.get()
    }

    pub fn root_cluster(&self) -> ClusterIndex {
        ClusterIndex::from_raw(self.root_cluster.get())
    }

    pub fn relative_to_absolute(&self, relative: u32) -> u32 {
        relative + self.first_allocatable()
    }

    pub fn absolute_to_relative(&self, absolute: u32) -> u32 {
        absolute - self.first_allocatable()
    }
}

pub const DEFAULT_SUPERBLOCK: Superblock = Superblock {
    magic: MAGIC,
    page_size: U16::new(512),
    pages_per_cluster: U16::new(2),
    pages_per_block: U16::new(16),
    _unused0: U16::new(0xFF00),
    clusters_per_card: U32::new(8192),
    first_allocatable: U32::new(41),
    last_allocatable: U32::new(8135),
    root_cluster: U32::new(0),
    backup_block1: U32::new(1023),
    backup_block2: U32::new(1022),
    _unused1: [0; 8],
    indirect_fat_clusters: [
        U32::new(8),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
        U32::new(0),
    ],
    bad_block_list: [U32::new(0xFFFF_FFFF); 32],
    ty: SUPERBLOCK_TYPE,
    card_flags: 0x2a,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_size_fits_one_page() {
        assert!(SUPERBLOCK_SIZE <= 512);
    }

    #[test]
    fn dir_entry_size_is_512() {
        assert_eq!(DIR_ENTRY_SIZE, 512);
    }

    #[test]
    fn fat_entry_round_trips() {
        let e = FatEntry {
            occupied: true,
            next_cluster: ClusterIndex::Valid(42),
        };
        assert_eq!(FatEntry::decode(e.encode()), e);
        assert_eq!(FatEntry::decode(0xFFFF_FFFF), FatEntry::TERMINATOR);
        assert_eq!(FatEntry::decode(0), FatEntry::FREE);
    }
}
