//! # Kernel Boot Interface
//!
//! This crate defines the data structures and memory layout constants shared
//! between the boot collaborator (the code that talks to the bootloader) and
//! the kernel's early memory management. It is the authoritative source for
//! the shape of the physical memory map the frame allocator consumes.
//!
//! ## Architecture
//!
//! The crate is organized into two modules:
//!
//! ### Boot Information ([`boot`])
//! Defines the bootloader-to-kernel handoff of memory information:
//! * **Memory Regions**: Physical base, length and kind of every range the
//!   bootloader reports ([`boot::MemoryRegion`], [`boot::MemoryRegionKind`])
//! * **Boot Info**: The HHDM offset and a pointer to the region array
//!   ([`boot::KernelBootInfo`])
//! * **ABI Stability**: `#[repr(C)]` structures with fixed-size integers
//!
//! ### Memory Layout ([`memory`])
//! Establishes where physical memory is visible to the kernel:
//! * **Higher Half Direct Mapping**: every physical address `pa` is
//!   accessible at `HHDM_BASE + pa`
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//!                       │   (Physical Memory Access)      │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::{MemoryRegion, MemoryRegionKind};
//!
//! let region = MemoryRegion::new(0x10_0000, 0x20_0000, MemoryRegionKind::Usable);
//! assert_eq!(region.end(), 0x30_0000);
//! assert_eq!(region.page_count(), 0x200);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod boot;
pub mod memory;
