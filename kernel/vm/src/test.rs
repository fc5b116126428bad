extern crate std;

use super::*;
use coremap::Coremap;
use kernel_config::memory::{PAGE_SIZE, USERSTACK};
use memory_mips::tlb::{EntryLoFlags, NUM_TLB, NUM_TLB_WIRED, TLBLO_PPAGE};
use memory_structs::VirtualAddress;

fn va(value: usize) -> VirtualAddress {
    VirtualAddress::new_canonical(value)
}

/// A bootstrapped allocator and an address space with a 3-page text
/// region and a 5-page data region, fully backed by frames.
fn prepared_space() -> (CoremapRef, AddressSpace) {
    let mut coremap = Coremap::new(Arc::new(RamBank::new(0x0010_0000, PAGE_SIZE)));
    coremap.bootstrap();
    let coremap = coremap.into_ref();

    let mut space = AddressSpace::new(coremap.clone());
    space.define_region(va(0x0040_0000), 0x3000, true, false, true).unwrap();
    space.define_region(va(0x1000_0000), 0x5000, true, true, false).unwrap();
    space.prepare_load().unwrap();
    (coremap, space)
}

#[test]
fn read_fault_installs_a_valid_writable_mapping() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_0abc)).unwrap();

    let slot = tlb.probe(0x0040_0000).unwrap();
    let (entryhi, entrylo) = tlb.read(slot);
    assert_eq!(entryhi, 0x0040_0000);
    assert_eq!(entrylo & TLBLO_PPAGE, space.region1_frames()[0].value() as u32);
    assert!(entrylo & EntryLoFlags::VALID.bits() != 0);
    // The loader is still writing the text region at this point.
    assert!(entrylo & EntryLoFlags::DIRTY.bits() != 0);
}

#[test]
fn loaded_text_maps_read_only() {
    let (_coremap, mut space) = prepared_space();
    space.complete_load();
    let mut tlb = Tlb::new();

    handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_1000)).unwrap();
    let (_, text_lo) = tlb.read(tlb.probe(0x0040_1000).unwrap());
    assert!(text_lo & EntryLoFlags::VALID.bits() != 0);
    assert_eq!(text_lo & EntryLoFlags::DIRTY.bits(), 0);

    handle_fault(&space, &mut tlb, VM_FAULT_WRITE, va(0x1000_2000)).unwrap();
    let (_, data_lo) = tlb.read(tlb.probe(0x1000_2000).unwrap());
    assert!(data_lo & EntryLoFlags::DIRTY.bits() != 0);
}

#[test]
fn stack_faults_resolve_to_stack_frames() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    handle_fault(&space, &mut tlb, VM_FAULT_WRITE, va(USERSTACK - 8)).unwrap();
    let top_page = (USERSTACK - PAGE_SIZE) as u32;
    let (_, entrylo) = tlb.read(tlb.probe(top_page).unwrap());
    let expected = space.stack_frames().last().unwrap().value() as u32;
    assert_eq!(entrylo & TLBLO_PPAGE, expected);
}

#[test]
fn unmapped_addresses_are_user_errors() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    let miss = handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x7000_0000));
    assert_eq!(miss, Err(VmError::BadAddress));
    // Just past the text region is also unmapped.
    let miss = handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_3000));
    assert_eq!(miss, Err(VmError::BadAddress));
    assert_eq!(tlb.valid_entries(), 0);
}

#[test]
fn fault_codes_route_correctly() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    // A read-only fault is benign and installs nothing.
    handle_fault(&space, &mut tlb, VM_FAULT_READONLY, va(0x0040_0000)).unwrap();
    assert_eq!(tlb.valid_entries(), 0);

    let bogus = handle_fault(&space, &mut tlb, 7, va(0x0040_0000));
    assert_eq!(bogus, Err(VmError::InvalidArgument));
}

#[test]
fn repeated_fault_reuses_the_resident_mapping() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_0004)).unwrap();
    assert_eq!(tlb.valid_entries(), 1);
    handle_fault(&space, &mut tlb, VM_FAULT_WRITE, va(0x0040_0ff8)).unwrap();
    assert_eq!(tlb.valid_entries(), 1);
}

#[test]
fn flush_is_idempotent_and_faults_recover() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    for page in 0..3usize {
        handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_0000 + page * PAGE_SIZE))
            .unwrap();
    }
    assert_eq!(tlb.valid_entries(), 3);

    tlb.invalidate_all();
    tlb.invalidate_all();
    assert_eq!(tlb.valid_entries(), 0);

    handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_0000)).unwrap();
    assert_eq!(tlb.valid_entries(), 1);
}

#[test]
fn full_tlb_falls_back_to_random_replacement() {
    let (_coremap, space) = prepared_space();
    let mut tlb = Tlb::new();

    // Fill every slot with live translations for an unmapped user range.
    for i in 0..NUM_TLB {
        let entryhi = (0x2_0000 + i as u32) << 12;
        let entrylo = ((i as u32) << 12) | EntryLoFlags::VALID.bits();
        tlb.write(entryhi, entrylo, i);
    }
    assert_eq!(tlb.valid_entries(), NUM_TLB);

    handle_fault(&space, &mut tlb, VM_FAULT_READ, va(0x0040_2000)).unwrap();
    let slot = tlb.probe(0x0040_2000).unwrap();
    assert!(slot >= NUM_TLB_WIRED, "victim {} should not be wired", slot);
    assert_eq!(tlb.valid_entries(), NUM_TLB);
}

#[test]
#[should_panic]
fn tlb_shootdown_is_fatal() {
    vm_tlbshootdown_all();
}

#[test]
#[should_panic]
fn targeted_tlb_shootdown_is_fatal() {
    vm_tlbshootdown(&TlbShootdown { vaddr: VirtualAddress::zero() });
}

#[test]
fn global_surface_boots_allocates_and_faults() {
    init(0x0080_0000, 0x0002_0000);

    // Before the coremap exists, allocations steal permanently.
    let stolen = alloc_kpages(2).unwrap();

    vm_bootstrap();
    let a = alloc_kpages(4).unwrap();
    let b = alloc_kpages(1).unwrap();
    assert_ne!(a, b);
    assert_ne!(stolen, a);
    free_kpages(a);
    let c = alloc_kpages(4).unwrap();
    assert_eq!(c, a);
    free_kpages(b);
    free_kpages(c);

    // A fault with no current process must not loop; it reports failure.
    assert_eq!(
        vm_fault(VM_FAULT_READ, va(0x0040_0000)),
        Err(VmError::BadAddress),
    );

    let mut space = AddressSpace::new(coremap_ref());
    space.define_region(va(0x0040_0000), 0x2000, true, false, true).unwrap();
    space.define_region(va(0x1000_0000), 0x3000, true, true, false).unwrap();
    space.prepare_load().unwrap();
    let stackptr = space.define_stack();
    assert_eq!(stackptr, va(USERSTACK));

    set_current_addrspace(Some(Arc::new(Mutex::new(space))));
    as_activate();
    as_activate();

    vm_fault(VM_FAULT_READ, va(0x0040_0000)).unwrap();
    vm_fault(VM_FAULT_WRITE, va(USERSTACK - 4)).unwrap();
    assert_eq!(vm_fault(VM_FAULT_READ, va(0x7000_0000)), Err(VmError::BadAddress));
    assert_eq!(vm_fault(42, va(0)), Err(VmError::InvalidArgument));

    as_deactivate();
    set_current_addrspace(None);
    as_activate();
}
