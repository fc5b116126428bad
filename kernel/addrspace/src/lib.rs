//! Per-process address spaces.
//!
//! An address space is two contiguous user regions (by convention text,
//! then data) plus a fixed-size stack whose top is the architectural
//! [`USERSTACK`]. Each region carries a page table: an owned vector of
//! physical addresses, one per virtual page, with 0 meaning "no frame
//! yet". Every frame is allocated and zero-filled up front when the
//! process image is about to be loaded, so the TLB-miss path never
//! allocates.
//!
//! The address space exclusively owns every frame its page tables point
//! at; dropping it returns them all to the frame allocator.

#![no_std]

extern crate alloc;

use alloc::{sync::Arc, vec, vec::Vec};
use coremap::CoremapRef;
use kernel_config::memory::{PAGE_FRAME, PAGE_SIZE, STACK_PAGES, USERSTACK};
use log::warn;
use memory_mips::{paddr_to_kvaddr, RamBank};
use memory_structs::{PhysicalAddress, VirtualAddress, VmError};
use static_assertions::{assert_not_impl_any, const_assert};


const_assert!(STACK_PAGES > 0);
const_assert!(USERSTACK % PAGE_SIZE == 0);
const_assert!(USERSTACK >= STACK_PAGES * PAGE_SIZE);

/// One user process's virtual memory.
pub struct AddressSpace {
    coremap: CoremapRef,
    ram: Arc<RamBank>,
    vbase1: VirtualAddress,
    npages1: usize,
    page_table1: Vec<PhysicalAddress>,
    vbase2: VirtualAddress,
    npages2: usize,
    page_table2: Vec<PhysicalAddress>,
    page_table3: Vec<PhysicalAddress>,
    load_elf_completed: bool,
}

// Duplication must go through `copy`, which allocates fresh frames.
assert_not_impl_any!(AddressSpace: Clone, Copy);

/// Where a resolved user address lives and how it may be mapped.
pub struct Translation {
    /// Physical address backing the faulting byte.
    pub paddr: PhysicalAddress,
    /// Whether the mapping may be installed writable. Text pages lose
    /// write permission once the executable is fully loaded.
    pub writable: bool,
}

impl AddressSpace {
    /// An empty address space: no regions defined, no frames owned.
    pub fn new(coremap: CoremapRef) -> AddressSpace {
        let ram = coremap.lock().ram().clone();
        AddressSpace {
            coremap,
            ram,
            vbase1: VirtualAddress::zero(),
            npages1: 0,
            page_table1: Vec::new(),
            vbase2: VirtualAddress::zero(),
            npages2: 0,
            page_table2: Vec::new(),
            page_table3: Vec::new(),
            load_elf_completed: false,
        }
    }

    /// Records one region of the process image: the first call defines
    /// the text region, the second the data region, and any further call
    /// fails. The base is rounded down and the length up to whole pages.
    ///
    /// The protection bits are accepted for interface compatibility but
    /// not recorded: every page is installed read-write, except that text
    /// becomes read-only once the load completes.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        _readable: bool,
        _writable: bool,
        _executable: bool,
    ) -> Result<(), VmError> {
        let size = size + vaddr.page_offset();
        let vaddr = vaddr.align_down_to_page();
        let size = (size + PAGE_SIZE - 1) & PAGE_FRAME;
        let npages = size / PAGE_SIZE;

        if self.vbase1.value() == 0 {
            self.vbase1 = vaddr;
            self.npages1 = npages;
            self.page_table1 = vec![PhysicalAddress::zero(); npages];
            return Ok(());
        }
        if self.vbase2.value() == 0 {
            self.vbase2 = vaddr;
            self.npages2 = npages;
            self.page_table2 = vec![PhysicalAddress::zero(); npages];
            return Ok(());
        }

        warn!("addrspace: too many regions");
        Err(VmError::Unimplemented)
    }

    fn alloc_zeroed_frame(&self) -> Result<PhysicalAddress, VmError> {
        let paddr = self.coremap.lock().get_ppages(1).ok_or(VmError::OutOfMemory)?;
        self.ram.zero_region(paddr, 1);
        Ok(paddr)
    }

    /// Backs every page of both regions and the stack with a zeroed
    /// frame, ready for the loader to fill. On failure the address space
    /// is left partially populated; dropping it releases whatever was
    /// obtained.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        for i in 0..self.npages1 {
            let paddr = self.alloc_zeroed_frame()?;
            self.page_table1[i] = paddr;
        }
        for i in 0..self.npages2 {
            let paddr = self.alloc_zeroed_frame()?;
            self.page_table2[i] = paddr;
        }
        self.page_table3 = vec![PhysicalAddress::zero(); STACK_PAGES];
        for i in 0..STACK_PAGES {
            let paddr = self.alloc_zeroed_frame()?;
            self.page_table3[i] = paddr;
        }
        Ok(())
    }

    /// The loader is finished with the process image; from here on, text
    /// pages are mapped read-only.
    pub fn complete_load(&mut self) {
        self.load_elf_completed = true;
    }

    /// Whether the process image has been fully loaded.
    pub fn is_load_complete(&self) -> bool {
        self.load_elf_completed
    }

    /// The initial user stack pointer. The stack frames must already be
    /// in place.
    pub fn define_stack(&self) -> VirtualAddress {
        assert!(
            self.page_table3.first().map_or(false, |pa| pa.value() != 0),
            "addrspace: stack queried before its frames exist",
        );
        VirtualAddress::new_canonical(USERSTACK)
    }

    /// Base address and page count of the text region.
    pub fn region1(&self) -> (VirtualAddress, usize) {
        (self.vbase1, self.npages1)
    }

    /// Base address and page count of the data region.
    pub fn region2(&self) -> (VirtualAddress, usize) {
        (self.vbase2, self.npages2)
    }

    /// The frames backing the text region, one entry per virtual page.
    pub fn region1_frames(&self) -> &[PhysicalAddress] {
        &self.page_table1
    }

    /// The frames backing the data region, one entry per virtual page.
    pub fn region2_frames(&self) -> &[PhysicalAddress] {
        &self.page_table2
    }

    /// The frames backing the stack, lowest page first.
    pub fn stack_frames(&self) -> &[PhysicalAddress] {
        &self.page_table3
    }

    /// Deep copy, for fork: the new address space covers the same virtual
    /// ranges with freshly allocated frames holding the same bytes.
    pub fn copy(&self) -> Result<AddressSpace, VmError> {
        let mut new = AddressSpace::new(self.coremap.clone());
        new.vbase1 = self.vbase1;
        new.npages1 = self.npages1;
        new.page_table1 = vec![PhysicalAddress::zero(); self.npages1];
        new.vbase2 = self.vbase2;
        new.npages2 = self.npages2;
        new.page_table2 = vec![PhysicalAddress::zero(); self.npages2];

        // Reuse the load path to obtain the frames; if it runs dry, the
        // partial copy cleans itself up on drop.
        new.prepare_load()?;

        for (dst, src) in new.page_table1.iter().zip(&self.page_table1) {
            self.ram.copy_page(*dst, *src);
        }
        for (dst, src) in new.page_table2.iter().zip(&self.page_table2) {
            self.ram.copy_page(*dst, *src);
        }
        for (dst, src) in new.page_table3.iter().zip(&self.page_table3) {
            self.ram.copy_page(*dst, *src);
        }
        Ok(new)
    }

    /// Resolves a user virtual address against the three mapped ranges.
    /// `None` means the address is unmapped and the reference is a user
    /// error.
    ///
    /// Only a fully prepared address space may be translated; a fault
    /// arriving before both regions and the stack exist is a kernel bug.
    pub fn translate(&self, addr: VirtualAddress) -> Option<Translation> {
        assert!(self.vbase1.value() != 0 && self.npages1 != 0);
        assert!(self.vbase2.value() != 0 && self.npages2 != 0);
        assert!(self.page_table1[0].value() != 0);
        assert!(self.page_table2[0].value() != 0);
        assert!(self.page_table3[0].value() != 0);
        assert!(self.vbase1.is_page_aligned() && self.vbase2.is_page_aligned());

        let vtop1 = self.vbase1 + self.npages1 * PAGE_SIZE;
        let vtop2 = self.vbase2 + self.npages2 * PAGE_SIZE;
        let stacktop = VirtualAddress::new_canonical(USERSTACK);
        let stackbase = stacktop - STACK_PAGES * PAGE_SIZE;

        let (table, base, text) = if addr >= self.vbase1 && addr < vtop1 {
            (&self.page_table1, self.vbase1, true)
        } else if addr >= self.vbase2 && addr < vtop2 {
            (&self.page_table2, self.vbase2, false)
        } else if addr >= stackbase && addr < stacktop {
            (&self.page_table3, stackbase, false)
        } else {
            return None;
        };

        let page = (addr.value() - base.value()) / PAGE_SIZE;
        let offset = (addr.value() - base.value()) % PAGE_SIZE;
        let paddr = table[page] + offset;
        Some(Translation {
            paddr,
            writable: !(text && self.load_elf_completed),
        })
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let mut coremap = self.coremap.lock();
        let tables = [&self.page_table1, &self.page_table2, &self.page_table3];
        for table in tables {
            for paddr in table.iter().filter(|pa| pa.value() != 0) {
                coremap.free_kpages(paddr_to_kvaddr(*paddr));
            }
        }
    }
}
