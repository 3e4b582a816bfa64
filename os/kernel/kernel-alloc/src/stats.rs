use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, to_mib};

/// Point-in-time copy of the frame allocator's bookkeeping.
///
/// Page counts are in 4 KiB frames. `used_pages <= usable_pages <=
/// total_pages` holds for every snapshot taken between operations.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PhysicalMemoryStats {
    /// End of the highest region in the memory map, of any kind.
    pub highest_phys_addr: PhysicalAddress,
    /// End of the highest usable region.
    pub highest_usable_addr: PhysicalAddress,
    /// Lowest address the allocator may hand out (never below the first page).
    pub lowest_usable_addr: PhysicalAddress,
    pub total_pages: usize,
    pub usable_pages: usize,
    pub used_pages: usize,
}

impl PhysicalMemoryStats {
    /// Pages currently available for allocation.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> usize {
        self.usable_pages.saturating_sub(self.used_pages)
    }

    #[must_use]
    pub const fn total_mib(&self) -> u64 {
        pages_to_mib(self.total_pages)
    }

    #[must_use]
    pub const fn usable_mib(&self) -> u64 {
        pages_to_mib(self.usable_pages)
    }

    #[must_use]
    pub const fn used_mib(&self) -> u64 {
        pages_to_mib(self.used_pages)
    }

    #[must_use]
    pub const fn free_mib(&self) -> u64 {
        pages_to_mib(self.free_pages())
    }
}

const fn pages_to_mib(pages: usize) -> u64 {
    to_mib(pages as u64 * Size4K::SIZE)
}

impl fmt::Display for PhysicalMemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total {} MiB, usable {} MiB, used {} MiB, free {} MiB; highest phys {}, usable {}..{}",
            self.total_mib(),
            self.usable_mib(),
            self.used_mib(),
            self.free_mib(),
            self.highest_phys_addr,
            self.lowest_usable_addr,
            self.highest_usable_addr,
        )
    }
}
