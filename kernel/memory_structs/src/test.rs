extern crate std;

use super::*;
use kernel_config::memory::PAGE_SIZE;

#[test]
fn canonical_addresses() {
    assert_eq!(VirtualAddress::new(0x7fff_f000).map(|v| v.value()), Some(0x7fff_f000));
    assert_eq!(VirtualAddress::new(0x1_0000_0000), None);
    assert_eq!(PhysicalAddress::new_canonical(0x1_0000_1000).value(), 0x1000);
}

#[test]
fn page_alignment() {
    let addr = VirtualAddress::new_canonical(0x0040_0abc);
    assert_eq!(addr.page_offset(), 0xabc);
    assert_eq!(addr.align_down_to_page().value(), 0x0040_0000);
    assert!(!addr.is_page_aligned());
    assert!(addr.align_down_to_page().is_page_aligned());
}

#[test]
fn address_arithmetic() {
    let base = PhysicalAddress::new_canonical(0x10_0000);
    assert_eq!((base + 3 * PAGE_SIZE).value(), 0x10_3000);
    let mut cursor = base;
    cursor += PAGE_SIZE;
    cursor -= PAGE_SIZE;
    assert_eq!(cursor, base);
}
