//! Moving bytes across the user/kernel boundary.
//!
//! Every access goes through the address space's page tables, so a pointer
//! outside the caller's segments is reported as [`KernelError::BadAddress`]
//! instead of touching someone else's memory. Words are big-endian.

use crate::KernelError;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_alloc::PhysMapper;
use kernel_info::memory::USER_POINTER_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Vm};

/// Copies `buf.len()` bytes from user address `src`.
///
/// # Errors
/// [`KernelError::BadAddress`] if any byte is unmapped.
pub fn copyin<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    src: VirtualAddress,
    buf: &mut [u8],
) -> Result<(), KernelError> {
    Ok(space.read(vm, src, buf)?)
}

/// Copies `data` to user address `dst`.
///
/// # Errors
/// [`KernelError::BadAddress`] if any byte is unmapped or is finalized code.
pub fn copyout<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    data: &[u8],
    dst: VirtualAddress,
) -> Result<(), KernelError> {
    Ok(space.write(vm, dst, data)?)
}

/// Reads one user word (an `int` or a pointer).
///
/// # Errors
/// See [`copyin`].
pub fn copyin_u32<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    src: VirtualAddress,
) -> Result<u32, KernelError> {
    let mut word = [0u8; USER_POINTER_SIZE as usize];
    copyin(vm, space, src, &mut word)?;
    Ok(u32::from_be_bytes(word))
}

/// Writes one user word.
///
/// # Errors
/// See [`copyout`].
pub fn copyout_u32<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    value: u32,
    dst: VirtualAddress,
) -> Result<(), KernelError> {
    copyout(vm, space, &value.to_be_bytes(), dst)
}

/// Copies a NUL-terminated string from user space.
///
/// `max` bounds the string *including* its terminator. The returned string
/// does not contain the terminator.
///
/// # Errors
/// - [`KernelError::NameTooLong`] if no terminator is found within `max` bytes.
/// - [`KernelError::BadAddress`] if the string runs into unmapped memory.
/// - [`KernelError::InvalidArgument`] if the bytes are not UTF-8.
pub fn copyinstr<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    src: VirtualAddress,
    max: usize,
) -> Result<String, KernelError> {
    let mut bytes = Vec::new();
    let mut cursor = src;
    while bytes.len() < max {
        let mut byte = [0u8];
        copyin(vm, space, cursor, &mut byte)?;
        if byte[0] == 0 {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument);
        }
        bytes.push(byte[0]);
        cursor = cursor.checked_add(1).ok_or(KernelError::BadAddress(cursor))?;
    }
    Err(KernelError::NameTooLong)
}

/// Copies `s` and a terminating NUL to user address `dst`; returns the bytes
/// written, terminator included.
///
/// # Errors
/// - [`KernelError::NameTooLong`] if `s` plus its terminator exceeds `max`.
/// - See [`copyout`].
pub fn copyoutstr<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    s: &str,
    dst: VirtualAddress,
    max: usize,
) -> Result<usize, KernelError> {
    let len = s.len() + 1;
    if len > max {
        return Err(KernelError::NameTooLong);
    }
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    copyout(vm, space, &bytes, dst)?;
    Ok(len)
}
