//! A software model of the R3000-style translation lookaside buffer.
//!
//! The TLB is entirely software-managed: the hardware's only involvement
//! is raising a fault when no entry translates a reference. Each of the
//! 64 slots pairs an EntryHi word (the virtual page number) with an
//! EntryLo word (the physical page number plus permission bits). Two
//! slots matching the same virtual page are a machine check, which this
//! model raises as a panic; that is also why invalidated slots are parked
//! on distinct untranslated-segment pages rather than all on page 0.

use bit_field::BitField;
use bitflags::bitflags;
use kernel_config::memory::PAGE_SHIFT;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Number of TLB slots.
pub const NUM_TLB: usize = 64;
/// Slots below this index are wired: the random-replacement register
/// never selects them.
pub const NUM_TLB_WIRED: usize = 8;

/// EntryHi field: the virtual page number of the mapping.
pub const TLBHI_VPAGE: u32 = 0xffff_f000;
/// EntryHi field: the address-space id. Unused here; this kernel flushes
/// the whole TLB on every address-space switch instead.
pub const TLBHI_PID: u32 = 0x0000_0fc0;
/// EntryLo field: the physical page number the entry maps to.
pub const TLBLO_PPAGE: u32 = 0xffff_f000;

bitflags! {
    /// Permission and status bits of an EntryLo word.
    pub struct EntryLoFlags: u32 {
        /// Accesses through this entry bypass the cache.
        const NOCACHE = 0x0000_0800;
        /// The page may be written. Despite the name this is a
        /// write-permission bit, not a software dirty bit.
        const DIRTY   = 0x0000_0400;
        /// The entry may be used for translation at all.
        const VALID   = 0x0000_0200;
        /// The entry matches regardless of the PID field.
        const GLOBAL  = 0x0000_0100;
    }
}

/// EntryHi value that parks slot `index` on its own page of the
/// untranslated kernel segment, where the TLB is never consulted.
pub const fn tlbhi_invalid(index: usize) -> u32 {
    (0x8_0000 + index as u32) << PAGE_SHIFT
}

/// EntryLo value of an invalidated slot.
pub const TLBLO_INVALID: u32 = 0;

/// The 64-entry TLB of one CPU.
pub struct Tlb {
    entries: [(u32, u32); NUM_TLB],
    /// Model of the free-running Random register.
    random: SmallRng,
}

impl Tlb {
    /// A TLB with every slot invalidated, as after reset.
    pub fn new() -> Tlb {
        let mut tlb = Tlb {
            entries: [(0, 0); NUM_TLB],
            random: SmallRng::seed_from_u64(0x5ca1_ab1e),
        };
        tlb.invalidate_all();
        tlb
    }

    /// Reads slot `index`, returning `(entryhi, entrylo)`.
    pub fn read(&self, index: usize) -> (u32, u32) {
        self.entries[index]
    }

    /// Writes slot `index`.
    pub fn write(&mut self, entryhi: u32, entrylo: u32, index: usize) {
        assert!(index < NUM_TLB, "tlb: slot {} out of range", index);
        let vpage = entryhi.get_bits(12..32);
        for (i, (ehi, _)) in self.entries.iter().enumerate() {
            if i != index && ehi.get_bits(12..32) == vpage {
                panic!(
                    "tlb: machine check: vpage {:#x} present in slots {} and {}",
                    vpage, i, index,
                );
            }
        }
        self.entries[index] = (entryhi & (TLBHI_VPAGE | TLBHI_PID), entrylo);
    }

    /// Writes through the random-replacement register: the hardware picks
    /// a victim slot at or above the wired floor. Returns the slot used.
    pub fn random(&mut self, entryhi: u32, entrylo: u32) -> usize {
        let index = self.random.gen_range(NUM_TLB_WIRED..NUM_TLB);
        self.write(entryhi, entrylo, index);
        index
    }

    /// The slot whose virtual page number matches `entryhi`, if any.
    /// Matching ignores the valid bit, as the hardware probe does.
    pub fn probe(&self, entryhi: u32) -> Option<usize> {
        let vpage = entryhi.get_bits(12..32);
        self.entries
            .iter()
            .position(|(ehi, _)| ehi.get_bits(12..32) == vpage)
    }

    /// Marks every slot invalid.
    pub fn invalidate_all(&mut self) {
        for i in 0..NUM_TLB {
            self.write(tlbhi_invalid(i), TLBLO_INVALID, i);
        }
    }

    /// Number of slots whose valid bit is set.
    pub fn valid_entries(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, elo)| elo & EntryLoFlags::VALID.bits() != 0)
            .count()
    }
}

impl Default for Tlb {
    fn default() -> Tlb {
        Tlb::new()
    }
}
