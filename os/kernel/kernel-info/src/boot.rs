//! # Kernel Boot Information

use crate::memory::FRAME_SIZE;
use core::ops::Range;

/// Information the kernel needs about physical memory right after boot.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Offset of the higher-half direct map chosen by the bootloader.
    pub hhdm_offset: u64,

    /// Pointer to the first [`MemoryRegion`] of the memory map.
    pub mmap_ptr: u64,

    /// Number of [`MemoryRegion`] entries at `mmap_ptr`.
    pub mmap_len: u64,
}

impl KernelBootInfo {
    /// Borrow the memory map for in-place adjustment by the frame allocator.
    ///
    /// # Safety
    /// - `mmap_ptr` must point to `mmap_len` initialized, properly aligned
    ///   [`MemoryRegion`] entries that stay valid for `'a`.
    /// - No other reference to the entries may exist for `'a`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn memory_map_mut<'a>(&self) -> &'a mut [MemoryRegion] {
        if self.mmap_ptr == 0 || self.mmap_len == 0 {
            return &mut [];
        }

        let ptr = self.mmap_ptr as usize as *mut MemoryRegion;
        // SAFETY: Upheld by the caller.
        unsafe { core::slice::from_raw_parts_mut(ptr, self.mmap_len as usize) }
    }
}

/// Kind of a physical memory range as reported by the bootloader.
///
/// We avoid Rust enums with payloads across the ABI boundary.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryRegionKind {
    /// Free RAM the kernel may hand out.
    Usable = 0,
    /// Firmware or hardware reserved; never touched.
    Reserved = 1,
    /// RAM holding bootloader data; free once the kernel is done with it.
    BootloaderReclaimable = 2,
    /// RAM holding the kernel executable and boot modules.
    ExecutableOrModule = 3,
    /// ACPI tables, NVS, bad memory, framebuffers and anything else.
    Other = 4,
}

impl MemoryRegionKind {
    /// Whether the range is RAM the kernel accounts for (free now or later).
    #[inline]
    #[must_use]
    pub const fn is_ram(self) -> bool {
        matches!(
            self,
            Self::Usable | Self::BootloaderReclaimable | Self::ExecutableOrModule
        )
    }

    /// Whether the range is RAM but already in use at boot.
    #[inline]
    #[must_use]
    pub const fn is_occupied_ram(self) -> bool {
        matches!(self, Self::BootloaderReclaimable | Self::ExecutableOrModule)
    }
}

/// One entry of the boot memory map.
///
/// Physical addresses and lengths are in bytes. The frame allocator may
/// advance `base` and shrink `length` of a [`MemoryRegionKind::Usable`]
/// entry in place when it carves out its own bookkeeping storage.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Physical start address.
    pub base: u64,
    /// Length in bytes.
    pub length: u64,
    /// Range kind.
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    /// Exclusive physical end address (`base + length`), saturating.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    /// Frame-aligned byte range lying entirely inside the region.
    /// Partial frames at either edge are excluded.
    #[inline]
    #[must_use]
    pub const fn whole_frames(&self) -> Range<u64> {
        let first = self.base.div_ceil(FRAME_SIZE) * FRAME_SIZE;
        let end = self.end() / FRAME_SIZE * FRAME_SIZE;
        if end > first { first..end } else { first..first }
    }

    /// Number of frames in [`whole_frames`](Self::whole_frames).
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        let frames = self.whole_frames();
        (frames.end - frames.start) / FRAME_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Usable)
    }

    /// Advance `base` by `bytes` and shrink `length` accordingly.
    ///
    /// Lengths saturate at zero.
    #[inline]
    pub const fn consume_front(&mut self, bytes: u64) {
        let bytes = if bytes > self.length {
            self.length
        } else {
            bytes
        };
        self.base += bytes;
        self.length -= bytes;
    }
}
