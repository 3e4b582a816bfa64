use kernel_alloc::{FrameAllocError, HhdmPhysMapper, PhysMapper, PhysicalFrameAllocator};
use kernel_info::boot::{KernelBootInfo, MemoryRegion, MemoryRegionKind};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use std::alloc::{Layout, alloc_zeroed};
use std::sync::{Arc, Barrier};
use std::thread;

const PAGE: usize = 4096;
const MIB: u64 = 0x10_0000;

/// Page-aligned heap buffer standing in for physical memory at address 0.
///
/// Leaked on purpose: the allocator keeps `'static` references into it.
struct PhysicalMemory {
    base: u64,
}

impl PhysicalMemory {
    fn new(bytes: u64) -> Self {
        let layout = Layout::from_size_align(bytes as usize, PAGE).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self { base: ptr as u64 }
    }

    fn mapper(&self) -> HhdmPhysMapper {
        HhdmPhysMapper::new(self.base)
    }

    fn read(&self, pa: u64, len: usize) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts((self.base + pa) as *const u8, len).to_vec() }
    }
}

fn usable(base: u64, length: u64) -> MemoryRegion {
    MemoryRegion::new(base, length, MemoryRegionKind::Usable)
}

/// One usable region `[0, bytes)`.
fn boot_flat(bytes: u64) -> (PhysicalMemory, PhysicalFrameAllocator) {
    let mem = PhysicalMemory::new(bytes);
    let mut map = [usable(0, bytes)];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();
    (mem, pmm)
}

#[test]
fn one_megabyte_map_reserves_zero_page_and_bitmap() {
    let mem = PhysicalMemory::new(MIB);
    let mut map = [usable(0, MIB)];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();

    let s = pmm.stats();
    assert_eq!(s.total_pages, 256);
    assert_eq!(s.usable_pages, 256);
    assert_eq!(s.used_pages, 2);
    assert_eq!(s.free_pages(), 254);
    assert_eq!(s.highest_phys_addr.as_u64(), MIB);
    assert_eq!(s.highest_usable_addr.as_u64(), MIB);
    assert_eq!(s.lowest_usable_addr.as_u64(), 0x1000);

    // Page 0 was trimmed off and the bitmap carved from the front.
    assert_eq!(map[0].base, 0x2000);
    assert_eq!(map[0].length, MIB - 0x2000);

    assert!(pmm.is_page_used(PhysicalAddress::new(0)));
    assert!(pmm.is_page_used(PhysicalAddress::new(0x1000)));
    assert!(!pmm.is_page_used(PhysicalAddress::new(0x2000)));
    assert!(!pmm.is_page_used(PhysicalAddress::new(MIB - 0x1000)));

    // 256 frames in a one-page bitmap: 32 bytes of state, the rest padding.
    let bitmap = mem.read(0x1000, PAGE);
    assert_eq!(bitmap[0], 0b0000_0011);
    assert!(bitmap[1..32].iter().all(|&b| b == 0));
    assert!(bitmap[32..].iter().all(|&b| b == 0xFF));
}

#[test]
fn freed_frame_is_handed_out_next() {
    let (_mem, pmm) = boot_flat(MIB);

    let a = pmm.allocate(0x1000).unwrap();
    let b = pmm.allocate(0x1000).unwrap();
    assert_eq!(a.as_u64(), 0x2000);
    assert_eq!(b.as_u64(), 0x3000);
    assert_eq!(pmm.stats().used_pages, 4);

    pmm.free(a, 0x1000);
    assert!(!pmm.is_page_used(a));
    assert_eq!(pmm.allocate(0x1000).unwrap(), a);
}

#[test]
fn allocations_are_aligned_and_zeroed() {
    let (_mem, pmm) = boot_flat(MIB);

    let pa = pmm.allocate(3 * PAGE).unwrap();
    assert!(pa.is_aligned::<Size4K>());

    let p = pmm.to_accessible(pa).as_mut_ptr::<u8>();
    unsafe { std::ptr::write_bytes(p, 0xAB, 3 * PAGE) };
    pmm.free(pa, 3 * PAGE);

    let again = pmm.allocate(3 * PAGE).unwrap();
    assert_eq!(again, pa);
    let bytes = unsafe { std::slice::from_raw_parts(p, 3 * PAGE) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn partial_pages_round_up_on_both_sides() {
    let (_mem, pmm) = boot_flat(MIB);
    let before = pmm.stats();

    let pa = pmm.allocate(PAGE + 1).unwrap();
    assert_eq!(pmm.stats().used_pages, before.used_pages + 2);
    assert!(pmm.is_page_used(pa + PAGE as u64));

    pmm.free(pa, PAGE + 1);
    assert_eq!(pmm.stats(), before);
    assert!(!pmm.is_page_used(pa + PAGE as u64));
}

#[test]
fn allocate_then_free_restores_bitmap_bit_for_bit() {
    let (mem, pmm) = boot_flat(MIB);
    let _ = pmm.allocate(2 * PAGE).unwrap();

    let bitmap_before = mem.read(0x1000, PAGE);
    let stats_before = pmm.stats();

    let pa = pmm.allocate(5 * PAGE).unwrap();
    assert_ne!(mem.read(0x1000, PAGE), bitmap_before);
    pmm.free(pa, 5 * PAGE);

    assert_eq!(mem.read(0x1000, PAGE), bitmap_before);
    assert_eq!(pmm.stats(), stats_before);
}

#[test]
fn frees_in_any_order_restore_used_pages() {
    let (_mem, pmm) = boot_flat(MIB);
    let baseline = pmm.stats();

    let sizes = [1, PAGE, 3 * PAGE + 1, 2 * PAGE, 5000, 7 * PAGE];
    let blocks: Vec<_> = sizes
        .iter()
        .map(|&size| (pmm.allocate(size).unwrap(), size))
        .collect();
    assert_eq!(pmm.stats().used_pages, baseline.used_pages + 1 + 1 + 4 + 2 + 2 + 7);

    for i in [3, 0, 5, 1, 4, 2] {
        let (pa, size) = blocks[i];
        pmm.free(pa, size);
    }

    assert_eq!(pmm.stats(), baseline);
}

#[test]
fn zero_size_and_null_are_no_ops() {
    let (mem, pmm) = boot_flat(MIB);
    let a = pmm.allocate(PAGE).unwrap();
    let stats = pmm.stats();
    let bitmap = mem.read(0x1000, PAGE);

    assert!(pmm.allocate(0).unwrap().is_null());
    pmm.free(PhysicalAddress::zero(), PAGE);
    pmm.free(a, 0);

    assert_eq!(pmm.stats(), stats);
    assert_eq!(mem.read(0x1000, PAGE), bitmap);
    assert!(pmm.is_page_used(a));
}

#[test]
fn exhaustion_fails_without_side_effects() {
    let (mem, pmm) = boot_flat(MIB);
    let stats = pmm.stats();
    let bitmap = mem.read(0x1000, PAGE);

    assert_eq!(
        pmm.allocate(255 * PAGE),
        Err(FrameAllocError::OutOfMemory { pages: 255 })
    );
    assert_eq!(pmm.stats(), stats);
    assert_eq!(mem.read(0x1000, PAGE), bitmap);

    // Exactly the free frames still fit, and then nothing does.
    let all = pmm.allocate(254 * PAGE).unwrap();
    assert_eq!(all.as_u64(), 0x2000);
    assert_eq!(pmm.stats().free_pages(), 0);
    assert_eq!(
        pmm.allocate(1),
        Err(FrameAllocError::OutOfMemory { pages: 1 })
    );
}

#[test]
fn frame_zero_is_never_returned() {
    let (_mem, pmm) = boot_flat(MIB);

    let mut seen = Vec::new();
    while let Ok(pa) = pmm.allocate(PAGE) {
        assert!(!pa.is_null());
        assert!(pa.as_u64() >= 0x2000);
        seen.push(pa);
    }

    assert_eq!(seen.len(), 254);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 254);
    assert!(pmm.is_page_used(PhysicalAddress::zero()));
}

#[test]
fn search_wraps_around_to_freed_frames() {
    let (_mem, pmm) = boot_flat(MIB);

    let a = pmm.allocate(PAGE).unwrap();
    let _b = pmm.allocate(PAGE).unwrap();
    pmm.free(a, PAGE);

    // Needs two frames, so it skips the single hole at `a`.
    let c = pmm.allocate(2 * PAGE).unwrap();
    assert_eq!(c.as_u64(), 0x4000);

    // Fill everything ahead of the cursor.
    let rest = pmm.stats().free_pages() - 1;
    let _d = pmm.allocate(rest * PAGE).unwrap();

    // Only `a` is left, behind the cursor.
    assert_eq!(pmm.allocate(PAGE).unwrap(), a);
}

#[test]
fn mixed_memory_map_accounting() {
    let mem = PhysicalMemory::new(5 * MIB);
    let mut map = [
        usable(0, MIB),
        MemoryRegion::new(MIB, MIB, MemoryRegionKind::Reserved),
        MemoryRegion::new(2 * MIB, 0x1_0000, MemoryRegionKind::BootloaderReclaimable),
        MemoryRegion::new(3 * MIB, 0x2_0000, MemoryRegionKind::ExecutableOrModule),
        usable(4 * MIB, MIB),
    ];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();

    let s = pmm.stats();
    assert_eq!(s.total_pages, 256 + 16 + 32 + 256);
    assert_eq!(s.usable_pages, s.total_pages);
    assert_eq!(s.used_pages, 16 + 32 + 2);
    assert_eq!(s.highest_phys_addr.as_u64(), 5 * MIB);
    assert_eq!(s.highest_usable_addr.as_u64(), 5 * MIB);
    assert!(s.used_pages <= s.usable_pages);

    assert!(pmm.is_page_used(PhysicalAddress::new(MIB)));
    assert!(pmm.is_page_used(PhysicalAddress::new(2 * MIB)));
    assert!(pmm.is_page_used(PhysicalAddress::new(3 * MIB)));
    assert!(!pmm.is_page_used(PhysicalAddress::new(4 * MIB)));

    // Too large for the low region; must come from the high one.
    let big = pmm.allocate(255 * PAGE).unwrap();
    assert_eq!(big.as_u64(), 4 * MIB);
}

#[test]
fn reclaimable_frames_can_be_released() {
    let mem = PhysicalMemory::new(2 * MIB);
    let mut map = [
        usable(0, MIB),
        MemoryRegion::new(MIB, 0x2000, MemoryRegionKind::BootloaderReclaimable),
        usable(MIB + 0x2000, MIB - 0x2000),
    ];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();
    let before = pmm.stats();

    pmm.free(PhysicalAddress::new(MIB), 0x2000);

    let after = pmm.stats();
    assert_eq!(after.used_pages, before.used_pages - 2);
    assert!(!pmm.is_page_used(PhysicalAddress::new(MIB)));
}

#[test]
fn reclaimable_frames_above_usable_memory_become_allocatable() {
    let mem = PhysicalMemory::new(2 * MIB);
    let mut map = [
        usable(0, MIB),
        MemoryRegion::new(MIB, 0x4000, MemoryRegionKind::BootloaderReclaimable),
    ];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();

    let s = pmm.stats();
    assert_eq!(s.usable_pages, 256 + 4);
    assert_eq!(s.used_pages, 4 + 2);
    assert_eq!(s.highest_usable_addr.as_u64(), MIB);
    assert!(pmm.is_page_used(PhysicalAddress::new(MIB + 0x3000)));

    pmm.free(PhysicalAddress::new(MIB), 0x4000);
    assert_eq!(pmm.stats().used_pages, 2);
    assert!(!pmm.is_page_used(PhysicalAddress::new(MIB + 0x3000)));

    let mut handed_out = Vec::new();
    while let Ok(pa) = pmm.allocate(PAGE) {
        handed_out.push(pa.as_u64());
    }
    assert_eq!(handed_out.len(), 254 + 4);
    assert!(handed_out.contains(&(MIB + 0x3000)));

    let s = pmm.stats();
    assert_eq!(s.free_pages(), 0);
    assert_eq!(s.used_pages, s.usable_pages);
}

#[test]
fn unaligned_usable_region_counts_only_whole_frames() {
    let mem = PhysicalMemory::new(2 * MIB);
    // Covers frame 0x101 fully and a half frame on either side.
    let mut map = [usable(0, MIB), usable(MIB + 0x800, 0x2000)];
    let pmm = unsafe { PhysicalFrameAllocator::initialize(mem.mapper(), &mut map) }.unwrap();

    let s = pmm.stats();
    assert_eq!(s.usable_pages, 257);
    assert_eq!(s.used_pages, 2);
    assert!(pmm.is_page_used(PhysicalAddress::new(MIB)));
    assert!(!pmm.is_page_used(PhysicalAddress::new(MIB + 0x1000)));
    assert!(pmm.is_page_used(PhysicalAddress::new(MIB + 0x2000)));

    let mut allocated = 0;
    while pmm.allocate(PAGE).is_ok() {
        allocated += 1;
    }
    assert_eq!(allocated, s.free_pages());
    assert_eq!(pmm.stats().free_pages(), 0);
}

#[test]
fn map_without_usable_memory_is_rejected() {
    let mut map = [
        MemoryRegion::new(0, MIB, MemoryRegionKind::Reserved),
        MemoryRegion::new(MIB, MIB, MemoryRegionKind::ExecutableOrModule),
    ];
    let err = unsafe { PhysicalFrameAllocator::initialize(HhdmPhysMapper::kernel(), &mut map) }
        .err()
        .unwrap();
    assert_eq!(err, FrameAllocError::NoUsableMemory);

    let mut empty: [MemoryRegion; 0] = [];
    let err = unsafe { PhysicalFrameAllocator::initialize(HhdmPhysMapper::kernel(), &mut empty) }
        .err()
        .unwrap();
    assert_eq!(err, FrameAllocError::NoUsableMemory);
}

#[test]
fn bitmap_must_fit_in_one_usable_region() {
    // 1 GiB of address space needs a 32 KiB bitmap; no region is that large.
    let mut map = [usable(0, 0x1000), usable(0x4000_0000, 0x800)];
    let err = unsafe { PhysicalFrameAllocator::initialize(HhdmPhysMapper::kernel(), &mut map) }
        .err()
        .unwrap();
    assert_eq!(err, FrameAllocError::NoBitmapRegion { required: 0x8000 });
    assert_eq!(
        err.to_string(),
        "no usable region can hold the 32768 byte frame bitmap"
    );
}

#[test]
fn boot_info_handoff() {
    let mem = PhysicalMemory::new(2 * MIB);
    let mut regions = vec![
        usable(0, MIB),
        MemoryRegion::new(MIB, MIB, MemoryRegionKind::Other),
    ];
    let boot_info = KernelBootInfo {
        hhdm_offset: mem.base,
        mmap_ptr: regions.as_mut_ptr() as u64,
        mmap_len: regions.len() as u64,
    };

    let pmm = unsafe { PhysicalFrameAllocator::from_boot_info(&boot_info) }.unwrap();
    let s = pmm.stats();
    assert_eq!(s.usable_pages, 256);
    assert_eq!(s.used_pages, 2);
    assert_eq!(s.highest_phys_addr.as_u64(), 2 * MIB);
    assert_eq!(s.highest_usable_addr.as_u64(), MIB);
    assert_eq!(regions[0].base, 0x2000);
    assert_eq!(pmm.to_accessible(PhysicalAddress::new(0x2000)).as_u64(), mem.base + 0x2000);
}

#[test]
fn accessible_addresses_round_trip() {
    let (mem, pmm) = boot_flat(MIB);
    let pa = pmm.allocate(PAGE).unwrap();

    let va = pmm.to_accessible(pa);
    assert_eq!(va, mem.mapper().phys_to_virt(pa));
    assert_eq!(pmm.to_accessible(PhysicalAddress::new(va.as_u64())), va);
    assert_eq!(pmm.from_accessible(va), pa);
    assert_eq!(pmm.from_accessible(VirtualAddress::new(pa.as_u64())), pa);
}

#[test]
fn typed_accessible_allocation() {
    #[repr(C, align(64))]
    struct Table {
        entries: [u64; 512],
    }

    let (_mem, pmm) = boot_flat(MIB);
    let baseline = pmm.stats();

    let table = pmm.allocate_accessible::<Table>(size_of::<Table>()).unwrap();
    assert_eq!(table.as_ptr() as usize % PAGE, 0);
    let entries = unsafe { &mut (*table.as_ptr()).entries };
    assert!(entries.iter().all(|&e| e == 0));
    entries[511] = 0xDEAD_BEEF;

    let pa = pmm.from_accessible(VirtualAddress::from_nonnull(table));
    assert!(pmm.is_page_used(pa));
    assert_eq!(pmm.stats().used_pages, baseline.used_pages + 1);

    pmm.free_accessible(table, size_of::<Table>());
    assert_eq!(pmm.stats(), baseline);

    assert_eq!(
        pmm.allocate_accessible::<Table>(0).err(),
        Some(FrameAllocError::NotAccessible {
            pa: PhysicalAddress::zero()
        })
    );
    assert_eq!(pmm.stats(), baseline);
}

#[test]
fn addresses_beyond_the_bitmap_count_as_used() {
    let (_mem, pmm) = boot_flat(MIB);
    assert!(pmm.is_page_used(PhysicalAddress::new(0x1_0000_0000)));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "double free")]
fn double_free_asserts_in_debug() {
    let (_mem, pmm) = boot_flat(MIB);
    let pa = pmm.allocate(PAGE).unwrap();
    pmm.free(pa, PAGE);
    pmm.free(pa, PAGE);
}

#[test]
fn concurrent_allocations_never_overlap() {
    let threads = 8;
    let per_thread = 20;

    let (_mem, pmm) = boot_flat(4 * MIB);
    let pmm = Arc::new(pmm);
    let baseline = pmm.stats();
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let pmm = Arc::clone(&pmm);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            let stamp = u8::try_from(t + 1).unwrap();
            start.wait();

            let mut got = Vec::with_capacity(per_thread);
            for i in 0..per_thread {
                let pages = 1 + (t + i) % 3;
                let pa = pmm.allocate(pages * PAGE).unwrap();
                let p = pmm.to_accessible(pa).as_mut_ptr::<u8>();
                unsafe { std::ptr::write_bytes(p, stamp, pages * PAGE) };
                got.push((pa, pages, stamp));
                thread::yield_now();
            }
            got
        }));
    }

    let mut blocks: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    blocks.sort_by_key(|&(pa, _, _)| pa);

    for w in blocks.windows(2) {
        let (pa, pages, _) = w[0];
        assert!(
            pa.as_u64() + (pages * PAGE) as u64 <= w[1].0.as_u64(),
            "overlapping allocations at {pa:?} and {:?}",
            w[1].0
        );
    }

    // Nobody else wrote into a thread's frames.
    for &(pa, pages, stamp) in &blocks {
        let p = pmm.to_accessible(pa).as_ptr::<u8>();
        let bytes = unsafe { std::slice::from_raw_parts(p, pages * PAGE) };
        assert!(bytes.iter().all(|&b| b == stamp));
    }

    let allocated: usize = blocks.iter().map(|&(_, pages, _)| pages).sum();
    assert_eq!(pmm.stats().used_pages, baseline.used_pages + allocated);

    for &(pa, pages, _) in &blocks {
        pmm.free(pa, pages * PAGE);
    }
    assert_eq!(pmm.stats(), baseline);
}
