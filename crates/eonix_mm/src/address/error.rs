//! Validation failures shared by the address/range helpers in this module.
//! Kept separate from `paging`'s `PFN`/`RawPagePtr` errors since those are
//! about page ownership, not raw arithmetic over addresses.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// The address did not satisfy a required alignment (usually
    /// page-alignment).
    Misaligned,
    /// Growing or shifting a range pushed it past the representable
    /// address space.
    Overflow,
}
