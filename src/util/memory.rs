use crate::util::Address;
use std::io::Result;

/// Reserve `size` bytes of address space aligned to `align`, without swap reservation.
/// The pages are demand-zero. The unaligned slack around the aligned range is unmapped again.
pub fn mmap_aligned_noreserve(size: usize, align: usize) -> Result<Address> {
    debug_assert!(align.is_power_of_two());
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let total = size + align;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), total, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let raw = Address::from_mut_ptr(ptr);
    let aligned = raw.align_up(align);
    let head = aligned - raw;
    if head != 0 {
        munmap(raw, head)?;
    }
    let tail = total - head - size;
    if tail != 0 {
        munmap(aligned + size, tail)?;
    }
    trace!("Reserved {} bytes at {} (alignment {})", size, aligned, align);
    Ok(aligned)
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Give the physical pages of the range back to the OS. The range stays mapped and reads as
/// zero afterwards.
pub fn release_pages(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) },
        0,
    )
}

pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) }
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
