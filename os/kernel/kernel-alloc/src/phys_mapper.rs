//! # Physical Memory Access
//!
//! The frame allocator hands out *physical* addresses, but code can only
//! dereference *virtual* ones. A [`PhysMapper`] bridges the two: it turns a
//! [`PhysicalAddress`] into a [`VirtualAddress`] the CPU can touch, and back.
//!
//! In the kernel every physical byte is mapped at `HHDM_BASE + pa` (the higher
//! half direct map), which is what [`HhdmPhysMapper::kernel`] implements.
//! Hosted tests build an [`HhdmPhysMapper`] over a heap buffer instead, so the
//! same arithmetic runs against ordinary process memory.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::{HhdmPhysMapper, PhysMapper};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mapper = HhdmPhysMapper::kernel();
//! let va = mapper.phys_to_virt(PhysicalAddress::new(0x1234_0000));
//! assert_eq!(va.as_u64(), 0xffff_8880_1234_0000);
//!
//! // Translations are idempotent.
//! let again = mapper.phys_to_virt(PhysicalAddress::new(va.as_u64()));
//! assert_eq!(again, va);
//! assert_eq!(mapper.virt_to_phys(va), PhysicalAddress::new(0x1234_0000));
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Translation between physical memory and the addresses that reach it.
pub trait PhysMapper {
    /// Virtual address through which `pa` can be accessed.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Physical address behind `va`.
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;

    /// Borrow `len` bytes of physical memory starting at `pa`.
    ///
    /// # Safety
    /// The range must be mapped, writable and not aliased by any other live
    /// reference for the lifetime `'a`.
    unsafe fn phys_to_slice_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = self.phys_to_virt(pa).as_mut_ptr::<u8>();
        // SAFETY: Caller guarantees the mapping and exclusivity.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }

    /// Overwrite `len` bytes of physical memory at `pa` with zeros.
    ///
    /// # Safety
    /// The range must be mapped and writable, and nothing may hold a
    /// reference into it.
    unsafe fn zero_fill(&self, pa: PhysicalAddress, len: usize) {
        let ptr = self.phys_to_virt(pa).as_mut_ptr::<u8>();
        // SAFETY: Caller guarantees the mapping.
        unsafe { core::ptr::write_bytes(ptr, 0, len) }
    }
}

/// [`PhysMapper`] for a direct map that places physical address `pa` at
/// `offset + pa`.
///
/// Both directions are idempotent: an address that is already on the target
/// side of `offset` is returned unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    /// Direct map at an arbitrary offset, e.g. the one the bootloader reports.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// The kernel's direct map at [`HHDM_BASE`].
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(HHDM_BASE)
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether `addr` already lies inside the direct map.
    #[inline]
    #[must_use]
    pub const fn is_higher_half(&self, addr: u64) -> bool {
        addr >= self.offset
    }
}

impl Default for HhdmPhysMapper {
    fn default() -> Self {
        Self::kernel()
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        let raw = pa.as_u64();
        if self.is_higher_half(raw) {
            VirtualAddress::new(raw)
        } else {
            VirtualAddress::new(raw + self.offset)
        }
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let raw = va.as_u64();
        if self.is_higher_half(raw) {
            PhysicalAddress::new(raw - self.offset)
        } else {
            PhysicalAddress::new(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_mapper_adds_hhdm_base() {
        let m = HhdmPhysMapper::kernel();
        assert_eq!(m.offset(), HHDM_BASE);
        assert_eq!(
            m.phys_to_virt(PhysicalAddress::new(0x2000)).as_u64(),
            HHDM_BASE + 0x2000
        );
        assert_eq!(HhdmPhysMapper::default(), m);
    }

    #[test]
    fn translations_are_idempotent() {
        let m = HhdmPhysMapper::new(0x1_0000_0000);

        let va = m.phys_to_virt(PhysicalAddress::new(0x5000));
        assert_eq!(va.as_u64(), 0x1_0000_5000);
        assert_eq!(m.phys_to_virt(PhysicalAddress::new(va.as_u64())), va);

        let pa = m.virt_to_phys(va);
        assert_eq!(pa.as_u64(), 0x5000);
        assert_eq!(m.virt_to_phys(VirtualAddress::new(pa.as_u64())), pa);
    }

    #[test]
    fn offset_boundary_counts_as_higher_half() {
        let m = HhdmPhysMapper::new(0x8000);
        assert!(m.is_higher_half(0x8000));
        assert!(!m.is_higher_half(0x7FFF));
        assert_eq!(m.virt_to_phys(VirtualAddress::new(0x8000)).as_u64(), 0);
    }

    #[test]
    fn slice_and_zero_fill_reach_backing_memory() {
        let mut backing = [0xAAu8; 64];
        let m = HhdmPhysMapper::new(backing.as_mut_ptr() as u64);

        unsafe {
            let s = m.phys_to_slice_mut(PhysicalAddress::new(8), 8);
            s.fill(0x55);
            m.zero_fill(PhysicalAddress::new(12), 2);
        }

        assert_eq!(&backing[..8], &[0xAA; 8]);
        assert_eq!(&backing[8..16], &[0x55, 0x55, 0x55, 0x55, 0, 0, 0x55, 0x55]);
        assert_eq!(&backing[16..], &[0xAA; 48]);
    }
}
