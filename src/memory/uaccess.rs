//! Movement of small fixed-size records across the user/kernel boundary.
//!
//! The checks here are structural: null and misaligned pointers are
//! rejected up front with a fault error. Whether the destination page is
//! actually present and writable is the page-fault path's concern once the
//! access goes through; user mappings are live while their process executes
//! a syscall.

use core::mem::align_of;

use libkernel::error::{KernelError, Result};
use libkernel::memory::address::TUA;

/// Marker for records that may cross the user/kernel boundary byte-wise.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no pointers the kernel would
/// trust, and be valid for every bit pattern a user process could supply.
pub unsafe trait UserCopyable: Copy {}

/// Rejects null or misaligned user pointers.
pub fn validate_ptr<T>(ptr: TUA<T>) -> Result<()> {
    if ptr.is_null() || ptr.value() % align_of::<T>() != 0 {
        return Err(KernelError::Fault);
    }
    Ok(())
}

pub fn copy_to_user<T: UserCopyable>(dst: TUA<T>, value: T) -> Result<()> {
    validate_ptr(dst)?;
    // SAFETY: non-null and aligned per the check above; UserCopyable rules
    // out types with drop glue or kernel-trusted pointers.
    unsafe { core::ptr::write(dst.value() as *mut T, value) };
    Ok(())
}

pub fn copy_from_user<T: UserCopyable>(src: TUA<T>) -> Result<T> {
    validate_ptr(src)?;
    // SAFETY: as above, and UserCopyable types are valid for any bit
    // pattern.
    Ok(unsafe { core::ptr::read(src.value() as *const T) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use libkernel::memory::address::UA;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Record {
        a: usize,
        b: u32,
    }

    unsafe impl UserCopyable for Record {}

    fn ptr_of(record: &mut Record) -> TUA<Record> {
        UA::from_value(record as *mut Record as usize).cast()
    }

    #[test]
    fn round_trip_through_a_user_pointer() {
        let mut slot = Record { a: 0, b: 0 };
        let ptr = ptr_of(&mut slot);

        copy_to_user(ptr, Record { a: 7, b: 9 }).unwrap();
        assert_eq!(slot, Record { a: 7, b: 9 });
        assert_eq!(copy_from_user(ptr).unwrap(), Record { a: 7, b: 9 });
    }

    #[test]
    fn null_pointer_faults() {
        let ptr: TUA<Record> = UA::null().cast();
        assert_eq!(
            copy_to_user(ptr, Record { a: 1, b: 2 }).unwrap_err(),
            KernelError::Fault
        );
        assert_eq!(copy_from_user(ptr).unwrap_err(), KernelError::Fault);
    }

    #[test]
    fn misaligned_pointer_faults() {
        let ptr: TUA<Record> = UA::from_value(0x1001).cast();
        assert_eq!(validate_ptr(ptr).unwrap_err(), KernelError::Fault);
    }
}
