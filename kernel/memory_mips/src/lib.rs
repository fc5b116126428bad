//! The memory subsystem interfaces on MIPS.
//!
//! This crate models the machine the rest of the VM subsystem runs on:
//! the physical RAM bank the bootloader hands over, the 64-entry
//! software-managed TLB, and the CPU interrupt-priority level that makes
//! TLB updates atomic against interrupt handlers. Porting the subsystem
//! to real hardware means swapping this crate's internals for the actual
//! coprocessor instructions; the interfaces stay put.

#![no_std]

extern crate alloc;

pub mod interrupts;
pub mod ram;
pub mod tlb;

pub use interrupts::{hold_interrupts, HeldInterrupts};
pub use ram::{kvaddr_to_paddr, paddr_to_kvaddr, RamBank};
pub use tlb::{EntryLoFlags, Tlb, NUM_TLB};
