//! The TLB-miss fault handler.

use addrspace::AddressSpace;
use log::debug;
use memory_mips::{
    hold_interrupts,
    tlb::{EntryLoFlags, Tlb, NUM_TLB},
};
use memory_structs::{VirtualAddress, VmError};

/// Fault codes delivered by the trap vector.
pub const VM_FAULT_READ: usize = 0;
pub const VM_FAULT_WRITE: usize = 1;
pub const VM_FAULT_READONLY: usize = 2;

/// Resolves a TLB miss on `faultaddress` against `addrspace` and installs
/// the translation in `tlb`.
///
/// The handler never allocates and never blocks: every frame was put in
/// place by `prepare_load`, so a miss is either satisfied on the spot or
/// the address is simply not mapped.
pub fn handle_fault(
    addrspace: &AddressSpace,
    tlb: &mut Tlb,
    faulttype: usize,
    faultaddress: VirtualAddress,
) -> Result<(), VmError> {
    let faultaddress = faultaddress.align_down_to_page();

    debug!("vm: fault: {:?}", faultaddress);

    match faulttype {
        // Pages are installed writable (loaded text aside), so the
        // hardware has nothing real to report here.
        VM_FAULT_READONLY => return Ok(()),
        VM_FAULT_READ | VM_FAULT_WRITE => {}
        _ => return Err(VmError::InvalidArgument),
    }

    let entryhi = faultaddress.value() as u32;

    let _held = hold_interrupts();

    // A resident translation satisfies the fault without consulting the
    // page tables; re-writing the same virtual page elsewhere would also
    // be a machine check.
    let resident = tlb.probe(entryhi);
    if let Some(slot) = resident {
        let (_, entrylo) = tlb.read(slot);
        if entrylo & EntryLoFlags::VALID.bits() != 0 {
            return Ok(());
        }
    }

    let translation = addrspace.translate(faultaddress).ok_or(VmError::BadAddress)?;
    let paddr = translation.paddr;
    assert!(paddr.is_page_aligned());

    let mut entrylo = paddr.value() as u32 | EntryLoFlags::VALID.bits();
    if translation.writable {
        entrylo |= EntryLoFlags::DIRTY.bits();
    }

    debug!("vm: {:?} -> {:?}", faultaddress, paddr);

    // An invalidated slot that still matches this page must be reused in
    // place.
    if let Some(slot) = resident {
        tlb.write(entryhi, entrylo, slot);
        return Ok(());
    }

    for index in 0..NUM_TLB {
        let (_, elo) = tlb.read(index);
        if elo & EntryLoFlags::VALID.bits() != 0 {
            continue;
        }
        tlb.write(entryhi, entrylo, index);
        return Ok(());
    }

    // Every slot is live; the random register picks the victim.
    tlb.random(entryhi, entrylo);
    Ok(())
}
