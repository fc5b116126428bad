//! Common types used in the memory management subsystem:
//! strongly-typed physical and virtual addresses, and the error values
//! the subsystem surfaces to its callers.

#![no_std]

mod error;
pub use error::VmError;

use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};
use kernel_config::memory::PAGE_FRAME;
use paste::paste;

/// A MIPS address is canonical if it fits the machine's 32-bit address space.
#[inline]
const fn is_canonical_address(addr: usize) -> bool {
    addr <= u32::MAX as usize
}

#[inline]
const fn canonicalize_address(addr: usize) -> usize {
    addr & (u32::MAX as usize)
}

macro_rules! implement_address {
    ($TypeName:ident, $desc:literal, $prefix:literal) => {
        paste! {
            #[doc = "A " $desc " memory address, which is a `usize` under the hood."]
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
            #[repr(transparent)]
            pub struct $TypeName(usize);

            impl $TypeName {
                #[doc = "Creates a new `" $TypeName "`, returning `None` if the \
                    address does not fit the 32-bit address space."]
                pub fn new(addr: usize) -> Option<$TypeName> {
                    if is_canonical_address(addr) {
                        Some($TypeName(addr))
                    } else {
                        None
                    }
                }

                #[doc = "Creates a new `" $TypeName "` that is guaranteed to be \
                    canonical, by truncating the upper bits."]
                pub const fn new_canonical(addr: usize) -> $TypeName {
                    $TypeName(canonicalize_address(addr))
                }

                #[doc = "Creates a `" $TypeName "` with the value 0."]
                pub const fn zero() -> $TypeName {
                    $TypeName(0)
                }

                #[doc = "The underlying `usize` value of this `" $TypeName "`."]
                #[inline]
                pub const fn value(&self) -> usize {
                    self.0
                }

                #[doc = "The offset of this `" $TypeName "` within its page, \
                    i.e., its lowest `PAGE_SHIFT` bits."]
                #[inline]
                pub const fn page_offset(&self) -> usize {
                    self.0 & !PAGE_FRAME
                }

                #[doc = "This `" $TypeName "` rounded down to the nearest page \
                    boundary."]
                #[inline]
                pub const fn align_down_to_page(&self) -> $TypeName {
                    $TypeName(self.0 & PAGE_FRAME)
                }

                #[doc = "Whether this `" $TypeName "` lies on a page boundary."]
                #[inline]
                pub const fn is_page_aligned(&self) -> bool {
                    self.0 & PAGE_FRAME == self.0
                }
            }

            impl fmt::Debug for $TypeName {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, concat!($prefix, "{:#x}"), self.0)
                }
            }

            impl fmt::Display for $TypeName {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{:?}", self)
                }
            }

            impl fmt::LowerHex for $TypeName {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    fmt::LowerHex::fmt(&self.0, f)
                }
            }

            impl Add<usize> for $TypeName {
                type Output = $TypeName;
                fn add(self, rhs: usize) -> $TypeName {
                    $TypeName::new_canonical(self.0.saturating_add(rhs))
                }
            }

            impl AddAssign<usize> for $TypeName {
                fn add_assign(&mut self, rhs: usize) {
                    *self = *self + rhs;
                }
            }

            impl Sub<usize> for $TypeName {
                type Output = $TypeName;
                fn sub(self, rhs: usize) -> $TypeName {
                    $TypeName::new_canonical(self.0.saturating_sub(rhs))
                }
            }

            impl SubAssign<usize> for $TypeName {
                fn sub_assign(&mut self, rhs: usize) {
                    *self = *self - rhs;
                }
            }
        }
    };
}

implement_address!(VirtualAddress, "virtual", "v");
implement_address!(PhysicalAddress, "physical", "p");

#[cfg(test)]
mod test;
