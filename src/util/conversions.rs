use crate::util::constants::*;
use crate::util::Address;

pub fn page_align_up(address: Address) -> Address {
    address.align_up(BYTES_IN_PAGE)
}

pub fn page_align_down(address: Address) -> Address {
    address.align_down(BYTES_IN_PAGE)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Round an object size up to the object alignment.
pub const fn align_object_size(size: usize) -> usize {
    raw_align_up(size, MIN_OBJECT_ALIGNMENT)
}

/// Integer percentage, `part * 100 / whole`. An empty whole is 0 %.
pub fn percentage(part: usize, whole: usize) -> usize {
    if whole == 0 {
        0
    } else {
        part * 100 / whole
    }
}
