use core::fmt;

/// Why a virtual-memory operation could not be carried out.
///
/// These are the non-fatal failures and are returned to the caller;
/// structural invariant violations are asserts and bring the kernel down
/// instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmError {
    /// A physical frame, page table, or address-space allocation failed.
    OutOfMemory,
    /// The address lies in no region of the current address space, or
    /// there is no current address space at all.
    BadAddress,
    /// The fault code handed to the fault handler names no known fault.
    InvalidArgument,
    /// The operation is recognized but this kernel does not provide it.
    Unimplemented,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            VmError::OutOfMemory => "out of memory",
            VmError::BadAddress => "bad address",
            VmError::InvalidArgument => "invalid argument",
            VmError::Unimplemented => "unimplemented feature",
        })
    }
}
