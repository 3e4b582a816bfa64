//! # Memory Layout

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0xffff_0000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
///
/// Bootloaders that choose the offset themselves report it in
/// [`KernelBootInfo::hhdm_offset`](crate::boot::KernelBootInfo::hhdm_offset);
/// this value is the default used when the kernel builds its own map.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Size of a physical frame as reported in the boot memory map.
pub const FRAME_SIZE: u64 = 4096;

const _: () = {
    assert!(HHDM_BASE >= LAST_USERSPACE_ADDRESS);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(HHDM_BASE.is_multiple_of(FRAME_SIZE));
};
