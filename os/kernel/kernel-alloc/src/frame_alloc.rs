//! # Physical Frame Allocator
//!
//! Bitmap-backed allocator for physically contiguous runs of 4 KiB frames.
//!
//! ## Lifecycle
//!
//! [`PhysicalFrameAllocator::initialize`] consumes the bootloader memory map
//! once and yields the allocator. From then on any core holding a reference
//! may call [`allocate`](PhysicalFrameAllocator::allocate),
//! [`free`](PhysicalFrameAllocator::free) and
//! [`stats`](PhysicalFrameAllocator::stats); every call runs under a
//! [`TicketMutex`], so contending cores are served in arrival order.
//!
//! ## Initialization
//!
//! ```text
//!  memory map ──► census ──► trim page 0 ──► size bitmap ──► carve bitmap
//!                                                              │
//!        set bit 0 ◄── clear whole usable pages ◄── fill 0xFF ◄┘
//! ```
//!
//! The bitmap covers every frame below the highest RAM address, so frames
//! that only become free later (bootloader-reclaimable memory, modules) can
//! be released into it. It lives
//! in the first usable region large enough to hold it. That region is
//! shrunk in place, so the memory map handed in afterwards describes what is
//! still free.
//!
//! ## Search
//!
//! Allocation is next-fit: a cursor remembers where the previous search
//! stopped. A forward scan looks for `count` consecutive clear bits up to the
//! highest RAM frame; if that fails the scan restarts once from frame 0
//! up to where it started. Freeing below the cursor rewinds it, so a
//! freed run is the next candidate.
//!
//! ## Invariants
//!
//! - `used_pages <= usable_pages <= total_pages` between operations.
//! - Frame 0 is always marked used; no allocation returns the null address.
//! - Returned runs were entirely free before and are entirely used after.

use crate::bitmap::{Bitmap, BitmapError};
use crate::phys_mapper::{HhdmPhysMapper, PhysMapper};
use crate::stats::PhysicalMemoryStats;
use core::ops::Range;
use core::ptr::NonNull;
use kernel_info::boot::{KernelBootInfo, MemoryRegion};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, Size4K, VirtualAddress, align_up,
};
use kernel_sync::TicketMutex;
use log::{debug, error, info, trace};

const FRAME_SIZE: u64 = Size4K::SIZE;

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = Size4K::SIZE as usize;

/// Frame-granular physical memory allocator.
///
/// `M` decides how physical memory is reached for the bitmap and for
/// zero-filling fresh allocations. The kernel uses [`HhdmPhysMapper`].
pub struct PhysicalFrameAllocator<M: PhysMapper = HhdmPhysMapper> {
    mapper: M,
    state: TicketMutex<AllocatorState>,
}

struct AllocatorState {
    bitmap: Bitmap<'static>,
    highest_phys_addr: PhysicalAddress,
    highest_usable_addr: PhysicalAddress,
    lowest_usable_addr: PhysicalAddress,
    total_pages: usize,
    usable_pages: usize,
    used_pages: usize,
    /// One past the highest frame backed by RAM.
    frame_limit: usize,
    last_scan_index: usize,
}

impl<M: PhysMapper> PhysicalFrameAllocator<M> {
    /// Build the allocator from the boot memory map.
    ///
    /// `memory_map` is adjusted in place: a usable region starting at frame 0
    /// is trimmed past it, and the region that receives the bitmap is
    /// shrunk by the bitmap's size.
    ///
    /// # Errors
    /// - [`FrameAllocError::NoUsableMemory`] if no region is usable.
    /// - [`FrameAllocError::NoBitmapRegion`] if no single usable region can
    ///   hold the bitmap.
    ///
    /// # Safety
    /// - `memory_map` must describe real physical memory; usable regions must
    ///   be free and owned exclusively by the returned allocator.
    /// - `mapper` must make every usable region accessible and writable for
    ///   the rest of the kernel's lifetime.
    /// - At most one allocator may manage a given range of physical memory.
    pub unsafe fn initialize(
        mapper: M,
        memory_map: &mut [MemoryRegion],
    ) -> Result<Self, FrameAllocError> {
        let census = MemoryCensus::take(memory_map);
        let Some(lowest_usable) = census.lowest_usable else {
            error!("Memory map contains no usable memory");
            return Err(FrameAllocError::NoUsableMemory);
        };

        let mut used_pages = census.occupied_pages + reserve_zero_page(memory_map);

        let bitmap_bytes = bitmap_size_for(census.highest_ram);
        let Some(host) = memory_map
            .iter_mut()
            .find(|r| r.is_usable() && r.length >= bitmap_bytes)
        else {
            error!("No usable region can hold the {bitmap_bytes} byte frame bitmap");
            return Err(FrameAllocError::NoBitmapRegion {
                required: bitmap_bytes,
            });
        };

        let bitmap_pa = PhysicalAddress::new(host.base);
        // SAFETY: The host region is usable memory the caller handed over and
        // the mapper covers it. It is removed from the map right below, so
        // nothing else will alias it.
        let storage = unsafe { mapper.phys_to_slice_mut(bitmap_pa, to_usize(bitmap_bytes)) };
        let mut bitmap = Bitmap::new(storage, to_usize(bitmap_bytes) * 8)?;
        bitmap.fill(true);
        host.consume_front(bitmap_bytes);
        used_pages += to_usize(bitmap_bytes / FRAME_SIZE);

        debug!(
            "Frame bitmap at {bitmap_pa} ({} accessible), {bitmap_bytes} bytes for {} frames",
            mapper.phys_to_virt(bitmap_pa),
            bitmap.len()
        );

        for region in memory_map.iter().filter(|r| r.is_usable()) {
            bitmap.clear_range(whole_frames(region));
        }
        bitmap.set(0);

        let allocator = Self {
            mapper,
            state: TicketMutex::new(AllocatorState {
                bitmap,
                highest_phys_addr: PhysicalAddress::new(census.highest_phys),
                highest_usable_addr: PhysicalAddress::new(census.highest_usable),
                lowest_usable_addr: PhysicalAddress::new(lowest_usable.max(FRAME_SIZE)),
                total_pages: census.present_pages,
                usable_pages: census.present_pages,
                used_pages,
                frame_limit: PhysicalAddress::new(census.highest_ram).frame_index::<Size4K>(),
                last_scan_index: 0,
            }),
        };

        allocator.info();
        Ok(allocator)
    }

    /// Allocate `size` bytes of physically contiguous, zeroed memory.
    ///
    /// The size is rounded up to whole frames and the returned address is
    /// frame aligned and never null. A `size` of zero yields the null address
    /// without touching any state.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no run of enough free frames
    /// exists. The allocator is left exactly as it was.
    pub fn allocate(&self, size: usize) -> Result<PhysicalAddress, FrameAllocError> {
        if size == 0 {
            return Ok(PhysicalAddress::zero());
        }

        let count = size.div_ceil(FRAME_BYTES);
        let mut state = self.state.lock();

        let Some(first) = state.claim_run(count) else {
            error!("Out of physical memory: no run of {count} free frames for {size} bytes");
            return Err(FrameAllocError::OutOfMemory { pages: count });
        };

        let pa = PhysicalAddress::from_frame_index::<Size4K>(first);
        // SAFETY: The run was free until now, so nothing references it, and
        // the mapper covers all usable memory.
        unsafe { self.mapper.zero_fill(pa, count * FRAME_BYTES) };
        state.used_pages += count;

        trace!("Allocated {count} frame(s) at {pa}");
        Ok(pa)
    }

    /// Return `size` bytes starting at `pa` to the allocator.
    ///
    /// The size is rounded up to whole frames the same way
    /// [`allocate`](Self::allocate) rounds it. A null `pa` or a `size` of zero
    /// is ignored.
    ///
    /// Freeing frames that are not currently allocated is a caller bug and
    /// trips a debug assertion.
    pub fn free(&self, pa: PhysicalAddress, size: usize) {
        if pa.is_null() || size == 0 {
            return;
        }

        let first = pa.frame_index::<Size4K>();
        let count = size.div_ceil(FRAME_BYTES);
        self.state.lock().release(first, count);

        trace!("Freed {count} frame(s) at {pa}");
    }

    /// Snapshot of the current bookkeeping.
    #[must_use]
    pub fn stats(&self) -> PhysicalMemoryStats {
        self.state.lock().snapshot()
    }

    /// Log a summary of physical memory.
    pub fn info(&self) {
        info!("Physical memory: {}", self.stats());
    }

    /// Whether the frame containing `pa` is unavailable.
    ///
    /// Addresses beyond the bitmap count as used.
    #[must_use]
    pub fn is_page_used(&self, pa: PhysicalAddress) -> bool {
        let state = self.state.lock();
        state
            .bitmap
            .try_get(pa.frame_index::<Size4K>())
            .unwrap_or(true)
    }

    /// Address through which the kernel reaches `pa`.
    #[must_use]
    #[inline]
    pub fn to_accessible(&self, pa: PhysicalAddress) -> VirtualAddress {
        self.mapper.phys_to_virt(pa)
    }

    /// Physical address behind an accessible address.
    #[must_use]
    #[inline]
    pub fn from_accessible(&self, va: VirtualAddress) -> PhysicalAddress {
        self.mapper.virt_to_phys(va)
    }

    /// Allocate `size` zeroed bytes and return an accessible pointer to them.
    ///
    /// The memory is frame aligned. It is zero-filled, not a valid `T` unless
    /// `T` is valid for all-zero bytes.
    ///
    /// # Errors
    /// - [`FrameAllocError::OutOfMemory`] as for [`allocate`](Self::allocate).
    /// - [`FrameAllocError::NotAccessible`] if `size` is zero (the null
    ///   address has no accessible counterpart) or the mapper yields a null
    ///   pointer. Any frames taken are released again.
    pub fn allocate_accessible<T>(&self, size: usize) -> Result<NonNull<T>, FrameAllocError> {
        debug_assert!(align_of::<T>() <= FRAME_BYTES);

        let pa = self.allocate(size)?;
        let ptr = if pa.is_null() {
            None
        } else {
            NonNull::new(self.to_accessible(pa).as_mut_ptr::<T>())
        };

        ptr.ok_or_else(|| {
            self.free(pa, size);
            FrameAllocError::NotAccessible { pa }
        })
    }

    /// Release memory obtained from [`allocate_accessible`](Self::allocate_accessible).
    pub fn free_accessible<T>(&self, ptr: NonNull<T>, size: usize) {
        self.free(self.from_accessible(VirtualAddress::from_nonnull(ptr)), size);
    }
}

impl PhysicalFrameAllocator<HhdmPhysMapper> {
    /// Build the allocator from the bootloader handoff, reaching physical
    /// memory through the direct map it reports.
    ///
    /// # Errors
    /// As for [`initialize`](Self::initialize).
    ///
    /// # Safety
    /// The requirements of [`KernelBootInfo::memory_map_mut`] and
    /// [`initialize`](Self::initialize) apply.
    pub unsafe fn from_boot_info(boot_info: &KernelBootInfo) -> Result<Self, FrameAllocError> {
        let mapper = HhdmPhysMapper::new(boot_info.hhdm_offset);
        // SAFETY: Upheld by the caller.
        unsafe { Self::initialize(mapper, boot_info.memory_map_mut()) }
    }
}

impl AllocatorState {
    /// One past the highest frame the search may return.
    fn scan_limit(&self) -> usize {
        self.frame_limit.min(self.bitmap.len())
    }

    /// Find and mark `count` consecutive free frames; returns the first.
    ///
    /// On failure the cursor and bitmap are left as they were.
    fn claim_run(&mut self, count: usize) -> Option<usize> {
        let origin = self.last_scan_index;

        if let Some(first) = self.scan(count, self.scan_limit()) {
            return Some(first);
        }

        trace!("Frame search wrapped around looking for {count} frame(s)");
        self.last_scan_index = 0;
        if let Some(first) = self.scan(count, origin) {
            return Some(first);
        }

        self.last_scan_index = origin;
        None
    }

    fn scan(&mut self, count: usize, limit: usize) -> Option<usize> {
        let mut run = 0;
        while self.last_scan_index < limit {
            let idx = self.last_scan_index;
            self.last_scan_index += 1;

            if self.bitmap.get(idx) {
                run = 0;
                continue;
            }

            run += 1;
            if run == count {
                let first = self.last_scan_index - count;
                self.bitmap.set_range(first..self.last_scan_index);
                return Some(first);
            }
        }
        None
    }

    fn release(&mut self, first: usize, count: usize) {
        let end = first.saturating_add(count);
        debug_assert!(
            end <= self.bitmap.len(),
            "freeing frames {first}..{end} beyond the bitmap of {} frames",
            self.bitmap.len()
        );
        debug_assert!(first != 0, "frame 0 is never allocated");
        debug_assert!(
            self.bitmap.all_set(first..end),
            "double free or free of unallocated frames in {first}..{end}"
        );

        // Only frames that were actually marked count towards `used_pages`.
        // Frame 0 stays reserved.
        let mut released = 0;
        for idx in first.max(1)..end.min(self.bitmap.len()) {
            if self.bitmap.get(idx) {
                self.bitmap.clear(idx);
                released += 1;
            }
        }
        self.used_pages = self.used_pages.saturating_sub(released);

        if first < self.last_scan_index {
            self.last_scan_index = first;
        }
    }

    const fn snapshot(&self) -> PhysicalMemoryStats {
        PhysicalMemoryStats {
            highest_phys_addr: self.highest_phys_addr,
            highest_usable_addr: self.highest_usable_addr,
            lowest_usable_addr: self.lowest_usable_addr,
            total_pages: self.total_pages,
            usable_pages: self.usable_pages,
            used_pages: self.used_pages,
        }
    }
}

/// Totals gathered in a single pass over the memory map.
#[derive(Default)]
struct MemoryCensus {
    highest_phys: u64,
    /// End of the highest region that is or will become allocatable.
    highest_ram: u64,
    highest_usable: u64,
    lowest_usable: Option<u64>,
    /// Frames of RAM the kernel accounts for, free now or later.
    present_pages: usize,
    /// Frames of RAM already occupied at boot.
    occupied_pages: usize,
}

impl MemoryCensus {
    fn take(memory_map: &[MemoryRegion]) -> Self {
        let mut census = Self::default();

        for region in memory_map {
            census.highest_phys = census.highest_phys.max(region.end());

            if region.kind.is_ram() && region.length > 0 {
                census.highest_ram = census.highest_ram.max(region.end());
                let pages = to_usize(region.page_count());
                census.present_pages += pages;
                if region.kind.is_occupied_ram() {
                    census.occupied_pages += pages;
                }
            }

            if region.is_usable() && region.length > 0 {
                census.highest_usable = census.highest_usable.max(region.end());
                census.lowest_usable = Some(
                    census
                        .lowest_usable
                        .map_or(region.base, |low| low.min(region.base)),
                );
            }
        }

        census
    }
}

/// Move usable regions off frame 0; returns the number of frames removed.
fn reserve_zero_page(memory_map: &mut [MemoryRegion]) -> usize {
    let mut reserved = 0;
    for region in memory_map
        .iter_mut()
        .filter(|r| r.is_usable() && r.base < FRAME_SIZE)
    {
        if region.base == 0 && region.length >= FRAME_SIZE {
            reserved += 1;
        }
        region.consume_front(FRAME_SIZE - region.base);
    }

    if reserved > 0 {
        trace!("Reserved frame 0");
    }
    reserved
}

/// Bytes of bitmap needed to track every frame below `highest_ram`,
/// rounded up to whole frames.
const fn bitmap_size_for(highest_ram: u64) -> u64 {
    let frames = highest_ram / FRAME_SIZE;
    let bytes = align_up(frames.div_ceil(8), FRAME_SIZE);
    if bytes == 0 { FRAME_SIZE } else { bytes }
}

/// Frames lying entirely inside `region`.
fn whole_frames(region: &MemoryRegion) -> Range<usize> {
    let bytes = region.whole_frames();
    PhysicalAddress::new(bytes.start).frame_index::<Size4K>()
        ..PhysicalAddress::new(bytes.end).frame_index::<Size4K>()
}

#[allow(clippy::cast_possible_truncation)]
const fn to_usize(v: u64) -> usize {
    v as usize
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("the memory map contains no usable memory")]
    NoUsableMemory,
    #[error("no usable region can hold the {required} byte frame bitmap")]
    NoBitmapRegion { required: u64 },
    #[error("out of physical memory: no run of {pages} free frames")]
    OutOfMemory { pages: usize },
    #[error("physical address {pa} has no accessible address")]
    NotAccessible { pa: PhysicalAddress },
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
}
