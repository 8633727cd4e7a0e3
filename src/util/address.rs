use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

/// Size in bytes.
pub type ByteSize = usize;

/// A raw address inside or outside the heap. Arithmetic is safe; only dereferencing is
/// `unsafe`. The type is a transparent `usize`, so it can live in an `Atomic<Address>`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// The distance between two addresses. The left one must not be lower.
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "{} - {} would underflow",
            self,
            other
        );
        self.0 - other.0
    }
}

impl BitAnd<usize> for Address {
    type Output = usize;
    fn bitand(self, mask: usize) -> usize {
        self.0 & mask
    }
}

impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    pub fn from_ref<T>(r: &T) -> Address {
        Address(r as *const T as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// # Safety
    /// The caller vouches that `raw` is an address it may later dereference, or never will.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// Read a `T` stored at this address.
    ///
    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *const T)
    }

    /// Write a `T` to this address without dropping what was there.
    ///
    /// # Safety
    /// The address must be valid and aligned for `T`.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn align_up(self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address((self.0 + align - 1) & !(align - 1))
    }

    pub const fn align_down(self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address(self.0 & !(align - 1))
    }

    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 % align == 0
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The address of an object's first header word, which the collector owns for forwarding.
/// Zero is never a valid object; a zero slot holds no reference.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    pub fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
