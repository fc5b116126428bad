//! Provides the allocator for physical memory frames.
//! The minimum unit of allocation is a single frame.
//!
//! Allocation state lives in the coremap, a pair of parallel arrays with
//! one entry per frame of RAM, stored in the first frames of the very
//! region they describe. `count[i]` is the allocation descriptor of frame
//! `i`: 0 marks a free frame, a positive `k` marks the head of a
//! `k`-frame contiguous allocation, and -1 marks an interior frame of an
//! allocation headed at a lower index. `location[i]` caches the physical
//! address of frame `i` so neither scan recomputes it.
//!
//! Until [`Coremap::bootstrap`] runs, allocations are stolen off the
//! bottom of free RAM and can never be freed; after it, a first-fit scan
//! over `count` serves allocations and frees restore zeros over the whole
//! span, so free runs stay maximal.

#![no_std]

extern crate alloc;

use alloc::sync::Arc;
use core::mem::size_of;
use kernel_config::memory::PAGE_SIZE;
use log::{debug, trace};
use memory_mips::{kvaddr_to_paddr, paddr_to_kvaddr, RamBank};
use memory_structs::{PhysicalAddress, VirtualAddress};
use spin::Mutex;
use static_assertions::assert_not_impl_any;


/// Shared handle to the frame allocator.
///
/// The mutex is the single allocator lock: every allocation and free
/// scan runs entirely under it, as does boot-time stealing, so a free
/// completed on this CPU is visible to the very next allocation.
pub type CoremapRef = Arc<Mutex<Coremap>>;

/// The frame allocator for all of physical RAM.
pub struct Coremap {
    ram: Arc<RamBank>,
    bootstrapped: bool,
    firstpaddr: PhysicalAddress,
    num_pages: usize,
    /// Frames `[0, start_page)` hold the coremap arrays themselves and
    /// stay allocated for the life of the system.
    start_page: usize,
    count: *mut isize,
    location: *mut PhysicalAddress,
}

// The raw array pointers target frames the coremap permanently owns.
unsafe impl Send for Coremap {}

assert_not_impl_any!(Coremap: Clone);

impl Coremap {
    /// An allocator that does not yet own RAM: every allocation is stolen
    /// from the bank until [`Coremap::bootstrap`] runs.
    pub fn new(ram: Arc<RamBank>) -> Coremap {
        Coremap {
            ram,
            bootstrapped: false,
            firstpaddr: PhysicalAddress::zero(),
            num_pages: 0,
            start_page: 0,
            count: core::ptr::null_mut(),
            location: core::ptr::null_mut(),
        }
    }

    /// Wraps this allocator in the shared locked handle.
    pub fn into_ref(self) -> CoremapRef {
        Arc::new(Mutex::new(self))
    }

    /// The RAM bank backing every frame this allocator hands out.
    pub fn ram(&self) -> &Arc<RamBank> {
        &self.ram
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Frames under management once bootstrapped.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Frames reserved for the coremap arrays themselves.
    pub fn start_page(&self) -> usize {
        self.start_page
    }

    /// Physical address of frame 0 of the managed region.
    pub fn first_paddr(&self) -> PhysicalAddress {
        self.firstpaddr
    }

    /// Takes ownership of all RAM left after boot. One-shot: panics if
    /// run twice. Lays the `count` and `location` arrays at the bottom of
    /// the owned region and records the frames they occupy as a single
    /// permanent allocation headed at frame 0.
    pub fn bootstrap(&mut self) {
        assert!(!self.bootstrapped, "coremap: bootstrapped twice");

        let (firstpaddr, lastpaddr) = self.ram.getsize();
        let num_pages = (lastpaddr.value() - firstpaddr.value()) / PAGE_SIZE;
        assert!(num_pages > 0, "coremap: no memory left after boot");

        let count_bytes = num_pages * size_of::<isize>();
        let coremap_bytes = count_bytes + num_pages * size_of::<PhysicalAddress>();
        let start_page = (coremap_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        assert!(start_page < num_pages,
            "coremap: the map alone would consume all {} frames", num_pages);

        // The arrays live in frames [0, start_page), which nothing else
        // can own: they are recorded allocated before any frame is handed
        // out.
        let count = unsafe { self.ram.paddr_as_ptr::<isize>(firstpaddr, num_pages) };
        let location = unsafe {
            self.ram.paddr_as_ptr::<PhysicalAddress>(firstpaddr + count_bytes, num_pages)
        };

        unsafe {
            *count = start_page as isize;
            for i in 1..start_page {
                *count.add(i) = -1;
            }
            for i in start_page..num_pages {
                *count.add(i) = 0;
            }
            for i in 0..num_pages {
                *location.add(i) = firstpaddr + i * PAGE_SIZE;
            }
        }

        debug!("coremap: managing {} frames at {:?}, {} reserved for the map",
            num_pages, firstpaddr, start_page);

        self.firstpaddr = firstpaddr;
        self.num_pages = num_pages;
        self.start_page = start_page;
        self.count = count;
        self.location = location;
        self.bootstrapped = true;
    }

    fn count_at(&self, index: usize) -> isize {
        debug_assert!(index < self.num_pages);
        unsafe { *self.count.add(index) }
    }

    fn set_count(&mut self, index: usize, value: isize) {
        debug_assert!(index < self.num_pages);
        unsafe { *self.count.add(index) = value }
    }

    fn location_at(&self, index: usize) -> PhysicalAddress {
        debug_assert!(index < self.num_pages);
        unsafe { *self.location.add(index) }
    }

    /// Allocates `npages` contiguous frames, returning the physical
    /// address of the first, or `None` when memory is exhausted.
    ///
    /// Post-bootstrap this is a first-fit scan: the lowest-indexed run of
    /// `npages` free frames wins.
    pub fn get_ppages(&mut self, npages: usize) -> Option<PhysicalAddress> {
        assert!(npages > 0, "coremap: zero-page allocation");

        if !self.bootstrapped {
            return self.ram.stealmem(npages);
        }

        let limit = self.num_pages.checked_sub(npages)?;
        let mut head = None;
        for i in self.start_page..limit {
            if self.count_at(i) != 0 {
                continue;
            }
            if (i..i + npages).all(|j| self.count_at(j) == 0) {
                head = Some(i);
                break;
            }
        }
        let head = match head {
            Some(head) => head,
            None => {
                debug!("coremap: out of memory allocating {} frames", npages);
                return None;
            }
        };

        self.set_count(head, npages as isize);
        for j in head + 1..head + npages {
            self.set_count(j, -1);
        }
        let addr = self.location_at(head);
        trace!("coremap: allocated {} frames at frame {} ({:?})", npages, head, addr);
        Some(addr)
    }

    /// Allocates `npages` contiguous frames and returns the kernel-window
    /// address of the first, or `None` when memory is exhausted.
    pub fn alloc_kpages(&mut self, npages: usize) -> Option<VirtualAddress> {
        self.get_ppages(npages).map(paddr_to_kvaddr)
    }

    /// Frees the allocation whose head was returned by
    /// [`Coremap::alloc_kpages`]. `kvaddr` must be exactly that returned
    /// address; a non-head or never-allocated address is a caller bug and
    /// trips an assert, as does freeing before bootstrap (stolen memory
    /// is permanent).
    pub fn free_kpages(&mut self, kvaddr: VirtualAddress) {
        assert!(self.bootstrapped, "coremap: free before bootstrap");
        let paddr = kvaddr_to_paddr(kvaddr);

        let mut head = None;
        for i in self.start_page..self.num_pages {
            if self.location_at(i) == paddr {
                head = Some(i);
                break;
            }
        }
        let head = match head {
            Some(head) => head,
            None => panic!("coremap: free of unmanaged address {:?}", kvaddr),
        };

        let len = self.count_at(head);
        assert!(len > 0, "coremap: free of non-head frame {} ({:?})", head, kvaddr);
        for j in head..head + len as usize {
            self.set_count(j, 0);
        }
        trace!("coremap: freed {} frames at frame {}", len, head);
    }

    /// Number of frames currently allocated, the coremap's own included.
    pub fn pages_in_use(&self) -> usize {
        assert!(self.bootstrapped, "coremap: usage queried before bootstrap");
        (0..self.num_pages).filter(|&i| self.count_at(i) != 0).count()
    }
}
