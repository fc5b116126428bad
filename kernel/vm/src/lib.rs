//! The virtual memory subsystem's kernel-facing surface.
//!
//! Boot order: [`init`] hands the physical RAM bank over once the
//! machine is up, after which kernel page allocations are stolen off the
//! bottom of free RAM; [`vm_bootstrap`] then builds the coremap over
//! everything that remains and normal allocation begins. From that point
//! the trap vector routes TLB misses to [`vm_fault`] and the scheduler
//! calls [`as_activate`] on every address-space switch.

#![no_std]

extern crate alloc;

mod fault;

#[cfg(test)]
mod test;

pub use fault::{handle_fault, VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE};

use addrspace::AddressSpace;
use alloc::sync::Arc;
use coremap::{Coremap, CoremapRef};
use memory_mips::{hold_interrupts, RamBank, Tlb};
use memory_structs::{VirtualAddress, VmError};
use spin::{Mutex, Once};

/// Shared handle to one process's address space, as the process table
/// would hold it.
pub type AddrSpaceRef = Arc<Mutex<AddressSpace>>;

/// Payload of a cross-CPU TLB invalidation request. This kernel treats
/// the TLB as per-CPU state and never issues one.
pub struct TlbShootdown {
    /// The virtual page whose translation must be dropped.
    pub vaddr: VirtualAddress,
}

static COREMAP: Once<CoremapRef> = Once::new();
static TLB: Once<Mutex<Tlb>> = Once::new();
static CURRENT: Mutex<Option<AddrSpaceRef>> = Mutex::new(None);

/// Machine bring-up: hands physical RAM to the VM subsystem. `ram_size`
/// bytes of RAM with the bottom `kernel_size` bytes holding the kernel
/// image. Until [`vm_bootstrap`] runs, kernel page allocations are
/// stolen from the bank and can never be freed.
pub fn init(ram_size: usize, kernel_size: usize) {
    let ram = Arc::new(RamBank::new(ram_size, kernel_size));
    COREMAP.call_once(|| Coremap::new(ram).into_ref());
    TLB.call_once(|| Mutex::new(Tlb::new()));
}

fn coremap() -> &'static CoremapRef {
    COREMAP.get().expect("vm: used before init")
}

fn tlb() -> &'static Mutex<Tlb> {
    TLB.get().expect("vm: used before init")
}

/// One-shot: builds the coremap over all remaining RAM. Panics if called
/// twice.
pub fn vm_bootstrap() {
    coremap().lock().bootstrap();
}

/// Allocates `npages` contiguous kernel pages, returning the
/// kernel-window address of the first, or `None` when physical memory is
/// exhausted.
pub fn alloc_kpages(npages: usize) -> Option<VirtualAddress> {
    coremap().lock().alloc_kpages(npages)
}

/// Returns pages obtained from [`alloc_kpages`]; pass exactly the
/// address it returned.
pub fn free_kpages(kvaddr: VirtualAddress) {
    coremap().lock().free_kpages(kvaddr);
}

/// The allocator handle new address spaces are built against.
pub fn coremap_ref() -> CoremapRef {
    coremap().clone()
}

/// Installs `addrspace` as the running process's address space, or
/// clears it for a kernel thread. Stand-in for the process table.
pub fn set_current_addrspace(addrspace: Option<AddrSpaceRef>) {
    *CURRENT.lock() = addrspace;
}

/// The running process's address space, if it has one.
pub fn current_addrspace() -> Option<AddrSpaceRef> {
    CURRENT.lock().clone()
}

/// Called by the scheduler after an address-space switch: flushes every
/// TLB slot so no stale translation from the previous process survives.
/// Kernel threads have no address space and leave the TLB alone.
pub fn as_activate() {
    if current_addrspace().is_none() {
        return;
    }
    let _held = hold_interrupts();
    tlb().lock().invalidate_all();
}

/// Nothing to do; the flush happens on the next activation.
pub fn as_deactivate() {}

/// The trap vector's entry point for TLB miss faults.
///
/// With no current process or address space this reports `BadAddress`,
/// so a fault early in boot panics in the trap handler instead of
/// looping.
pub fn vm_fault(faulttype: usize, faultaddress: VirtualAddress) -> Result<(), VmError> {
    match faulttype {
        // Benign regardless of process state; see `handle_fault`.
        VM_FAULT_READONLY => return Ok(()),
        VM_FAULT_READ | VM_FAULT_WRITE => {}
        _ => return Err(VmError::InvalidArgument),
    }

    let current = current_addrspace().ok_or(VmError::BadAddress)?;
    let space = current.lock();
    handle_fault(&space, &mut tlb().lock(), faulttype, faultaddress)
}

/// This kernel is uniprocessor as far as the VM system goes; nothing
/// should ever request a shootdown.
pub fn vm_tlbshootdown_all() -> ! {
    panic!("vm: tried to do tlb shootdown?!");
}

pub fn vm_tlbshootdown(_ts: &TlbShootdown) -> ! {
    panic!("vm: tried to do tlb shootdown?!");
}
