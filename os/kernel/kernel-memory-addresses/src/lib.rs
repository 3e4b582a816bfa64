//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses used by the early-boot
//! physical memory manager.
//!
//! ## Overview
//!
//! The types in this crate prevent mixing virtual and physical addresses at
//! compile time while remaining zero-cost wrappers around `u64` values.
//!
//! | Type | Meaning |
//! |----------|----------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | Physical memory (what the frame allocator hands out). |
//! | [`VirtualAddress`] | A CPU-dereferenceable address, e.g. inside the HHDM. |
//!
//! ## Page Sizes
//!
//! The allocator works at 4 KiB granularity. The size is carried by the
//! [`PageSize`] marker trait so helpers like [`PhysicalAddress::frame_index`]
//! stay explicit about the unit they count in:
//!
//! - [`Size4K`]: 4 KiB pages (base granularity)
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0000_0000_0012_3000);
//! assert_eq!(pa.frame_index::<Size4K>(), 0x123);
//! assert_eq!(PhysicalAddress::from_frame_index::<Size4K>(0x123), pa);
//!
//! // 5000 bytes end inside the second 4 KiB frame.
//! assert_eq!(align_up(5000, Size4K::SIZE), 0x2000);
//! assert_eq!(to_mib(256 * Size4K::SIZE), 1);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`.
//! - All alignment and offset calculations are `const fn`.
//! - Frame indices are `usize` because they index the allocation bitmap; the
//!   crate only supports 64-bit targets, where the conversion is lossless.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

const _: () = assert!(
    size_of::<usize>() == size_of::<u64>(),
    "only 64-bit targets are supported"
);

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + a - 1` must not overflow.
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    align_down(x + (a - 1), a)
}

/// Convert a byte count to whole KiB (truncating).
#[inline]
#[must_use]
pub const fn to_kib(bytes: u64) -> u64 {
    bytes / 1024
}

/// Convert a byte count to whole MiB (truncating).
#[inline]
#[must_use]
pub const fn to_mib(bytes: u64) -> u64 {
    to_kib(bytes) / 1024
}
