use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

use crate::util::conversions;

/// size in bytes
pub type ByteSize = usize;
/// offset in byte
pub type ByteOffset = isize;

/// Address represents an arbitrary address in the mutator's address space. Barrier code computes
/// card and region indices from addresses, so the arithmetic here mirrors what the emitted
/// instructions do. The type is zero overhead (memory wise and time wise). The idea is from the
/// paper High-level Low-level Programming (VEE09) and JikesRVM.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, Default, NoUninit)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address += ByteSize (positive)
impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

/// Address + ByteOffset (positive or negative)
impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as usize)
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Address >> shift (get an index)
impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);

    /// creates an arbitrary Address.
    pub const fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    // We implemented the Add trait but we still keep this add function.
    // The add() function is const fn, and we can use it to declare Address constants.
    #[allow(clippy::should_implement_trait)]
    /// Add an offset to the address.
    pub const fn add(self, size: usize) -> Address {
        Address(self.0 + size)
    }

    /// Add a signed offset to the address, as a displacement in an addressing mode would.
    pub const fn offset(self, offset: ByteOffset) -> Address {
        Address(self.0.wrapping_add_signed(offset))
    }

    /// is this address zero?
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// aligns up the address to the given alignment
    pub const fn align_up(self, align: ByteSize) -> Address {
        Address(conversions::raw_align_up(self.0, align))
    }

    /// aligns down the address to the given alignment
    pub const fn align_down(self, align: ByteSize) -> Address {
        Address(conversions::raw_align_down(self.0, align))
    }

    /// is this address aligned to the given alignment
    pub const fn is_aligned_to(self, align: usize) -> bool {
        conversions::raw_is_aligned(self.0, align)
    }

    /// converts the Address to a pointer-sized integer
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// allows print Address as lower-case hex value
impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// allows Display format the Address (as lower-case hex value with 0x prefix)
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// allows Debug format the Address (as lower-case hex value with 0x prefix)
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// ObjectReference represents the address of an object as it is stored in a reference slot.
/// Compared with Address, operations allowed on ObjectReference are very limited. No address
/// arithmetics are allowed for ObjectReference.
///
/// Barrier code has to deal with the null reference explicitly (null checks are part of every
/// barrier), so unlike `Option<ObjectReference>` we keep the null sentinel in the type.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, Default, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    /// The null object reference, represented as zero.
    pub const NULL: ObjectReference = ObjectReference(0);

    /// Cast the object reference to its raw address.
    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    /// Cast a raw address to an object reference.
    pub fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    /// is this object reference null reference?
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// returns the ObjectReference
    pub fn value(self) -> usize {
        self.0
    }
}

/// allows print ObjectReference as lower-case hex value
impl fmt::LowerHex for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// allows Display format the ObjectReference (as lower-case hex value with 0x prefix)
impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// allows Debug format the ObjectReference (as lower-case hex value with 0x prefix)
impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::util::{Address, ObjectReference};

    #[test]
    fn align_up() {
        assert_eq!(
            Address::from_usize(0x10).align_up(0x10),
            Address::from_usize(0x10)
        );
        assert_eq!(
            Address::from_usize(0x11).align_up(0x10),
            Address::from_usize(0x20)
        );
    }

    #[test]
    fn shr_gives_index() {
        assert_eq!(Address::from_usize(0x1200) >> 9, 9);
        assert_eq!(Address::from_usize(0x13ff) >> 9, 9);
        assert_eq!(Address::from_usize(0x1400) >> 9, 10);
    }

    #[test]
    fn negative_offset() {
        let a = Address::from_usize(0x100);
        assert_eq!(a.offset(-8), Address::from_usize(0xf8));
        assert_eq!(a + 8isize, Address::from_usize(0x108));
    }

    #[test]
    fn null_reference() {
        assert!(ObjectReference::NULL.is_null());
        assert!(!ObjectReference::from_raw_address(Address::from_usize(8)).is_null());
        assert_eq!(format!("{}", ObjectReference::NULL), "0x0");
    }
}
