//! The physical RAM bank and the kernel-window address translation.
//!
//! Physical addresses start at 0 at the bottom of the bank. The kernel
//! image sits at the bottom of RAM, and [`RamBank::getsize`] reports the
//! first free physical address above it along with the top of RAM.
//! Before the frame allocator takes ownership of that range, boot-time
//! code may [`RamBank::stealmem`] pages; stolen memory is never returned.

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use core::{
    mem::{align_of, size_of},
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};
use kernel_config::memory::{MIPS_KSEG0, MIPS_KSEG0_SIZE, PAGE_SIZE};
use log::trace;
use memory_structs::{PhysicalAddress, VirtualAddress};

/// Translates a physical address into `kseg0`, the permanently-mapped
/// kernel window. Every physical frame is reachable through it without a
/// TLB entry.
#[inline]
pub const fn paddr_to_kvaddr(paddr: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new_canonical(MIPS_KSEG0 + paddr.value())
}

/// Inverse of [`paddr_to_kvaddr`]. Panics if `kvaddr` does not lie in
/// `kseg0`, since no other window has a constant physical counterpart.
#[inline]
pub fn kvaddr_to_paddr(kvaddr: VirtualAddress) -> PhysicalAddress {
    let v = kvaddr.value();
    assert!(
        (MIPS_KSEG0..MIPS_KSEG0 + MIPS_KSEG0_SIZE).contains(&v),
        "kvaddr_to_paddr: {:?} is not a kseg0 address",
        kvaddr,
    );
    PhysicalAddress::new_canonical(v - MIPS_KSEG0)
}

/// All of physical RAM, as handed over by the bootloader.
///
/// The bank is the single backing store for every frame the VM subsystem
/// manages; frames are read and written through it by physical address or
/// by `kseg0` kernel-window address. Concurrent access to the same frame
/// is the caller's responsibility, which in practice means frames are
/// touched only by their exclusive owner.
pub struct RamBank {
    base: *mut u8,
    size: usize,
    /// First physical address not yet claimed by the kernel image or by
    /// boot-time stealing. Monotonically increasing.
    firstfree: AtomicUsize,
}

// The bank hands out raw access by physical address; exclusivity of each
// frame is owned by the allocator and address spaces above it.
unsafe impl Send for RamBank {}
unsafe impl Sync for RamBank {}

impl RamBank {
    /// A bank of `ram_size` bytes with the bottom `kernel_size` bytes
    /// occupied by the kernel image. Both are rounded to whole pages;
    /// RAM beyond the reach of `kseg0` would be unusable and is refused.
    pub fn new(ram_size: usize, kernel_size: usize) -> RamBank {
        assert!(ram_size > 0 && ram_size % PAGE_SIZE == 0,
            "ram: size {:#x} is not a whole number of pages", ram_size);
        assert!(ram_size <= MIPS_KSEG0_SIZE,
            "ram: {:#x} bytes will not fit under kseg0", ram_size);
        let kernel_top = (kernel_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        assert!(kernel_top < ram_size,
            "ram: kernel image {:#x} leaves no free memory", kernel_size);

        let layout = match Layout::from_size_align(ram_size, PAGE_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("ram: undescribable bank layout"),
        };
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }

        trace!("ram: {:#x} bytes, first free paddr {:#x}", ram_size, kernel_top);
        RamBank {
            base,
            size: ram_size,
            firstfree: AtomicUsize::new(kernel_top),
        }
    }

    /// The bootstrap handshake: `(firstpaddr, lastpaddr)`, the first free
    /// physical address and the top of RAM.
    pub fn getsize(&self) -> (PhysicalAddress, PhysicalAddress) {
        (
            PhysicalAddress::new_canonical(self.firstfree.load(Ordering::Relaxed)),
            PhysicalAddress::new_canonical(self.size),
        )
    }

    /// Claims `npages` pages off the bottom of free RAM for the kernel,
    /// permanently. `None` once the bank is exhausted.
    pub fn stealmem(&self, npages: usize) -> Option<PhysicalAddress> {
        assert!(npages > 0, "ram: zero-page steal");
        let bytes = npages.checked_mul(PAGE_SIZE)?;
        let stolen = self
            .firstfree
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                let next = cur.checked_add(bytes)?;
                (next <= self.size).then(|| next)
            })
            .ok()?;
        trace!("ram: stole {} pages at {:#x}", npages, stolen);
        Some(PhysicalAddress::new_canonical(stolen))
    }

    /// Total bytes of RAM in the bank.
    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    fn paddr_ptr(&self, paddr: PhysicalAddress, len: usize) -> *mut u8 {
        let end = paddr.value().checked_add(len);
        assert!(end.map_or(false, |end| end <= self.size),
            "ram: range {:?}+{:#x} escapes the bank", paddr, len);
        unsafe { self.base.add(paddr.value()) }
    }

    fn kvaddr_ptr(&self, kvaddr: VirtualAddress, len: usize) -> *mut u8 {
        self.paddr_ptr(kvaddr_to_paddr(kvaddr), len)
    }

    /// Zero-fills `npages` whole pages starting at `paddr`.
    pub fn zero_region(&self, paddr: PhysicalAddress, npages: usize) {
        assert!(paddr.is_page_aligned(), "ram: zeroing unaligned {:?}", paddr);
        let len = npages * PAGE_SIZE;
        let dst = self.paddr_ptr(paddr, len);
        unsafe { ptr::write_bytes(dst, 0, len) }
    }

    /// Copies one whole page of bytes from `src` to `dst`.
    pub fn copy_page(&self, dst: PhysicalAddress, src: PhysicalAddress) {
        assert!(dst.is_page_aligned() && src.is_page_aligned(),
            "ram: unaligned page copy {:?} <- {:?}", dst, src);
        assert_ne!(dst, src, "ram: page copied onto itself");
        let s = self.paddr_ptr(src, PAGE_SIZE);
        let d = self.paddr_ptr(dst, PAGE_SIZE);
        unsafe { ptr::copy_nonoverlapping(s, d, PAGE_SIZE) }
    }

    /// Writes `data` into RAM through a kernel-window address. This is how
    /// the loader fills text and data frames.
    pub fn write_bytes(&self, kvaddr: VirtualAddress, data: &[u8]) {
        let dst = self.kvaddr_ptr(kvaddr, data.len());
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) }
    }

    /// Reads RAM through a kernel-window address into `buf`.
    pub fn read_bytes(&self, kvaddr: VirtualAddress, buf: &mut [u8]) {
        let src = self.kvaddr_ptr(kvaddr, buf.len());
        unsafe { ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) }
    }

    /// A typed pointer to `count` `T`s at `paddr`, for metadata that lives
    /// inside the managed region itself.
    ///
    /// # Safety
    ///
    /// The caller must own `[paddr, paddr + count * size_of::<T>())` and
    /// must be the only party accessing it through any window.
    pub unsafe fn paddr_as_ptr<T>(&self, paddr: PhysicalAddress, count: usize) -> *mut T {
        let len = count.checked_mul(size_of::<T>())
            .unwrap_or_else(|| panic!("ram: metadata array overflows"));
        let raw = self.paddr_ptr(paddr, len);
        assert_eq!(raw as usize % align_of::<T>(), 0,
            "ram: {:?} is misaligned for the requested type", paddr);
        raw.cast::<T>()
    }
}

impl Drop for RamBank {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size, PAGE_SIZE) {
            unsafe { dealloc(self.base, layout) }
        }
    }
}
