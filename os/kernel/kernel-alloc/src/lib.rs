//! # Kernel Physical Memory Allocation
//!
//! Early-boot physical memory management: turns the bootloader memory map
//! into a frame bitmap and hands out physically contiguous runs of 4 KiB
//! frames to the rest of the kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • next-fit search for contiguous frame runs      │
//! │    • page accounting (total / usable / used)        │
//! │    • serialized by a FIFO ticket lock               │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │                         │
//! ┌───────────▼───────────┐ ┌───────────▼───────────────┐
//! │        Bitmap         │ │      Physical Mapper      │
//! │  one bit per frame    │ │  PA ⇄ HHDM address        │
//! │  1 = used, 0 = free   │ │  zero-fills new frames    │
//! └───────────────────────┘ └───────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! * [`frame_alloc`]: [`PhysicalFrameAllocator`] with `initialize`,
//!   `allocate`, `free` and `stats`.
//! * [`bitmap`]: the [`Bitmap`] bit-vector over borrowed storage.
//! * [`phys_mapper`]: the [`PhysMapper`] trait and the direct-map
//!   implementation [`HhdmPhysMapper`].
//! * [`stats`]: [`PhysicalMemoryStats`] snapshots.
//!
//! ## Memory Layout Integration
//!
//! Physical memory is reached through the higher-half direct map described
//! in `kernel-info`:
//!
//! ```text
//! HHDM_BASE             ├─────────────────────────────────┤
//!                       │   Higher Half Direct Map        │
//!                       │  (HHDM_BASE + pa for every pa)  │
//! KERNEL_BASE           ├─────────────────────────────────┤
//! ```
//!
//! The bitmap itself is carved out of the first usable region that can hold
//! it and accessed through the same map.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{HhdmPhysMapper, PhysicalFrameAllocator};
//! use kernel_info::boot::{MemoryRegion, MemoryRegionKind};
//! use std::alloc::{Layout, alloc_zeroed};
//!
//! // Stand-in for 1 MiB of physical memory.
//! let layout = Layout::from_size_align(0x10_0000, 4096).unwrap();
//! let backing = unsafe { alloc_zeroed(layout) } as u64;
//!
//! let mut map = [MemoryRegion::new(0, 0x10_0000, MemoryRegionKind::Usable)];
//! let pmm = unsafe {
//!     PhysicalFrameAllocator::initialize(HhdmPhysMapper::new(backing), &mut map)
//! }
//! .unwrap();
//!
//! let frame = pmm.allocate(4096).unwrap();
//! assert!(!frame.is_null());
//! assert!(pmm.is_page_used(frame));
//!
//! pmm.free(frame, 4096);
//! assert_eq!(pmm.stats().used_pages, 2); // frame 0 and the bitmap
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bitmap;
pub mod frame_alloc;
pub mod phys_mapper;
pub mod stats;

pub use bitmap::{Bitmap, BitmapError};
pub use frame_alloc::{FrameAllocError, PhysicalFrameAllocator};
pub use phys_mapper::{HhdmPhysMapper, PhysMapper};
pub use stats::PhysicalMemoryStats;
