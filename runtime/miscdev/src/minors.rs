//! Dynamic minor allocation
//!
//! The lowest [`DYNAMIC_MINORS`] minors form the dynamic region and are
//! tracked one bit per minor. Everything at or above it is the static region,
//! which the bitmap never sees: static uniqueness comes from the registry scan.
//!
//! Allocation scans from the top of the region downwards, so the first
//! dynamic registration receives `DYNAMIC_MINORS - 1`, the next one below it,
//! and a freed minor is handed out again before any lower one.
//!
//! Minor 0 is sticky: once set it is never cleared by [`MinorBitmap::free`].

use static_assertions::const_assert;

/// Size of the dynamic minor region
pub const DYNAMIC_MINORS: usize = 64;

/// Sentinel minor meaning "allocate one for me"
pub const MISC_DYNAMIC_MINOR: u32 = 255;

const CHUNK_BITS: usize = 64;
const CHUNKS: usize = DYNAMIC_MINORS / CHUNK_BITS;

const_assert!(DYNAMIC_MINORS > 0);
const_assert!(DYNAMIC_MINORS % CHUNK_BITS == 0);
const_assert!(MISC_DYNAMIC_MINOR as usize >= DYNAMIC_MINORS);

/// Fixed minors claimed by long-standing drivers
pub mod well_known {
    pub const PSMOUSE_MINOR: u32 = 1;
    pub const MS_BUSMOUSE_MINOR: u32 = 2;
    pub const ATIXL_BUSMOUSE_MINOR: u32 = 3;
    pub const ATARIMOUSE_MINOR: u32 = 5;
    pub const SUN_MOUSE_MINOR: u32 = 6;
    pub const APOLLO_MOUSE_MINOR: u32 = 7;
    pub const PC110PAD_MINOR: u32 = 9;
    pub const WATCHDOG_MINOR: u32 = 130;
    pub const TEMP_MINOR: u32 = 131;
    pub const RTC_MINOR: u32 = 135;
    pub const EFI_RTC_MINOR: u32 = 136;
    pub const SUN_OPENPROM_MINOR: u32 = 139;
    pub const DMAPI_MINOR: u32 = 140;
    pub const NVRAM_MINOR: u32 = 144;
    pub const SGI_MMTIMER: u32 = 153;
    pub const STORE_QUEUE_MINOR: u32 = 155;
    pub const I2O_MINOR: u32 = 166;
    pub const MICROCODE_MINOR: u32 = 184;
    pub const TUN_MINOR: u32 = 200;
    pub const MWAVE_MINOR: u32 = 219;
    pub const MPT_MINOR: u32 = 220;
    pub const HPET_MINOR: u32 = 228;
    pub const FUSE_MINOR: u32 = 229;
    pub const KVM_MINOR: u32 = 232;
    pub const BTRFS_MINOR: u32 = 234;
    pub const AUTOFS_MINOR: u32 = 235;
    pub const MAPPER_CTRL_MINOR: u32 = 236;
    pub const LOOP_CTRL_MINOR: u32 = 237;
}

/// Allocation map of the dynamic minor region
#[derive(Debug, Clone)]
pub struct MinorBitmap {
    chunks: [u64; CHUNKS],
}

impl Default for MinorBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl MinorBitmap {
    pub const fn new() -> Self {
        MinorBitmap {
            chunks: [0u64; CHUNKS],
        }
    }

    /// Whether `minor` lies in the bitmap-tracked region
    #[inline]
    pub const fn is_dynamic(minor: u32) -> bool {
        (minor as usize) < DYNAMIC_MINORS
    }

    /// Whether `minor` is marked allocated (static minors are never marked)
    #[inline]
    pub fn is_set(&self, minor: u32) -> bool {
        if !Self::is_dynamic(minor) {
            return false;
        }
        let index = minor as usize;
        (self.chunks[index / CHUNK_BITS] & (1u64 << (index % CHUNK_BITS))) != 0
    }

    #[inline]
    fn set(&mut self, index: usize) {
        self.chunks[index / CHUNK_BITS] |= 1u64 << (index % CHUNK_BITS);
    }

    #[inline]
    fn clear(&mut self, index: usize) {
        self.chunks[index / CHUNK_BITS] &= !(1u64 << (index % CHUNK_BITS));
    }

    /// Allocate the highest free dynamic minor
    ///
    /// # Returns
    /// The allocated minor, already marked, or `None` when the region is full
    pub fn allocate(&mut self) -> Option<u32> {
        let index = (0..DYNAMIC_MINORS)
            .rev()
            .find(|&index| !self.is_set(index as u32))?;
        self.set(index);
        Some(index as u32)
    }

    /// Mark a minor allocated; static minors are ignored
    ///
    /// Used when a driver asks for a fixed minor that falls inside the
    /// dynamic region, so the allocator never hands it out twice.
    pub fn reserve(&mut self, minor: u32) {
        if Self::is_dynamic(minor) {
            self.set(minor as usize);
        }
    }

    /// Release a dynamic minor; minor 0 and static minors are ignored
    pub fn free(&mut self, minor: u32) {
        if minor > 0 && Self::is_dynamic(minor) {
            self.clear(minor as usize);
        }
    }

    /// Put a minor back to the state it had before a failed registration
    pub(crate) fn restore(&mut self, minor: u32, was_set: bool) {
        if !Self::is_dynamic(minor) {
            return;
        }
        if was_set {
            self.set(minor as usize);
        } else {
            self.clear(minor as usize);
        }
    }

    /// Number of marked minors
    pub fn count(&self) -> usize {
        self.chunks.iter().map(|c| c.count_ones() as usize).sum()
    }

    /// Marked minors, lowest first
    pub fn allocated(&self) -> impl Iterator<Item = u32> + '_ {
        (0..DYNAMIC_MINORS as u32).filter(move |&minor| self.is_set(minor))
    }
}
