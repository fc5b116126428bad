//! The basic memory map this kernel assumes on MIPS.
//!
//! User programs live in `kuseg`, the low 2 GiB of the virtual address
//! space. The kernel runs out of `kseg0`, a fixed window that maps
//! physical RAM at a constant offset, so kernel code can reach any
//! physical frame without a TLB entry.

/// The lower 12 bits of an address select a byte within its page.
pub const PAGE_SHIFT: usize = 12;
/// Page size is 4096 bytes, 4KiB pages.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask that drops the offset bits of an address, leaving the page frame.
pub const PAGE_FRAME: usize = !(PAGE_SIZE - 1);

/// Base of `kseg0`, the untranslated cached kernel window over physical RAM.
pub const MIPS_KSEG0: usize = 0x8000_0000;
/// `kseg0` spans 512 MiB; physical RAM beyond that is unreachable from it.
pub const MIPS_KSEG0_SIZE: usize = 0x2000_0000;

/// Top of the user virtual address space; `kuseg` ends where `kseg0` begins.
pub const USERSPACETOP: usize = MIPS_KSEG0;
/// The initial user stack pointer. The stack grows down from here.
pub const USERSTACK: usize = USERSPACETOP;

/// Every address space carries this many pages of user stack, 48 KiB.
pub const STACK_PAGES: usize = 12;
