//! Program arguments: copying them in from the caller and laying them out
//! on the new program's stack.
//!
//! The new stack looks like this, growing down from `USER_STACK_TOP`:
//!
//! ```text
//! USER_STACK_TOP ┌──────────────────────────┐
//!                │ "argN-1\0" (4-aligned)   │
//!                │ ...                      │
//!                │ "arg0\0"   (4-aligned)   │
//!                ├──────────────────────────┤
//!                │ NULL                     │
//!                │ &argN-1                  │
//!                │ ...                      │
//!  argv ───────► │ &arg0                    │
//!                ├──────────────────────────┤
//!  sp ─────────► │ (down to 8-byte aligned) │
//!                └──────────────────────────┘
//! ```

use crate::KernelError;
use crate::uio::{copyin_u32, copyinstr, copyout_u32, copyoutstr};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use kernel_alloc::PhysMapper;
use kernel_info::limits::{ARG_COUNT_MAX, ARG_MAX, ARG_MAX_LEN, NAME_MAX, PATH_MAX};
use kernel_info::memory::{ARG_STRING_ALIGN, STACK_ALIGN, USER_POINTER_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Vm};

/// Last component of `path`.
#[must_use]
pub fn program_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Checks a program path against [`PATH_MAX`] and its last component
/// against [`NAME_MAX`].
///
/// # Errors
/// [`KernelError::NameTooLong`].
pub fn check_path(path: &str) -> Result<(), KernelError> {
    if path.len() > PATH_MAX || program_name(path).len() > NAME_MAX {
        return Err(KernelError::NameTooLong);
    }
    Ok(())
}

/// Checks an in-kernel argument vector against the argument limits.
///
/// # Errors
/// - [`KernelError::NameTooLong`] for more than [`ARG_COUNT_MAX`] arguments
///   or a single argument of [`ARG_MAX_LEN`] bytes or more.
/// - [`KernelError::ArgumentsTooLong`] if the strings total more than [`ARG_MAX`].
pub fn check_args<S: AsRef<str>>(args: &[S]) -> Result<(), KernelError> {
    if args.len() > ARG_COUNT_MAX {
        return Err(KernelError::NameTooLong);
    }
    let mut total = 0;
    for arg in args {
        let len = arg.as_ref().len() + 1;
        if len > ARG_MAX_LEN {
            return Err(KernelError::NameTooLong);
        }
        total += len;
    }
    if total > ARG_MAX {
        return Err(KernelError::ArgumentsTooLong);
    }
    Ok(())
}

/// Copies the NULL-terminated argument vector at `argv` into the kernel.
///
/// # Errors
/// As [`check_args`], plus [`KernelError::BadAddress`] for an unreadable
/// pointer or string.
pub fn copyin_args<M: PhysMapper>(
    vm: &Vm<M>,
    space: &AddressSpace,
    argv: VirtualAddress,
) -> Result<Vec<String>, KernelError> {
    let mut args = Vec::new();
    let mut total = 0;
    let mut slot = argv;
    loop {
        let ptr = copyin_u32(vm, space, slot)?;
        if ptr == 0 {
            return Ok(args);
        }
        if args.len() == ARG_COUNT_MAX {
            return Err(KernelError::NameTooLong);
        }
        let arg = copyinstr(vm, space, VirtualAddress::new(ptr), ARG_MAX_LEN)?;
        total += arg.len() + 1;
        if total > ARG_MAX {
            return Err(KernelError::ArgumentsTooLong);
        }
        args.push(arg);
        slot = slot
            .checked_add(USER_POINTER_SIZE)
            .ok_or(KernelError::BadAddress(slot))?;
    }
}

/// Bytes a string of `len` characters occupies on the stack.
fn string_slot(len: usize) -> Result<u32, KernelError> {
    u32::try_from(len + 1)
        .map(|n| n.next_multiple_of(ARG_STRING_ALIGN))
        .map_err(|_| KernelError::ArgumentsTooLong)
}

/// Copies `args` below `stack_top` as drawn in the module docs.
///
/// Returns the user address of the pointer array and the aligned stack pointer.
///
/// Only the stack bounds the size here. [`ARG_MAX`] is checked when the
/// arguments are copied in and exceeds the stack, so a list that passed that
/// check may still be rejected.
///
/// # Errors
/// [`KernelError::BadAddress`] if the arguments do not fit on the stack.
pub fn push_args<M: PhysMapper, S: AsRef<str>>(
    vm: &Vm<M>,
    space: &AddressSpace,
    stack_top: VirtualAddress,
    args: &[S],
) -> Result<(VirtualAddress, VirtualAddress), KernelError> {
    let mut sp = stack_top;
    let mut pointers = vec![0u32; args.len() + 1];

    for (i, arg) in args.iter().enumerate().rev() {
        let arg = arg.as_ref();
        sp = sp
            .checked_sub(string_slot(arg.len())?)
            .ok_or(KernelError::BadAddress(sp))?;
        copyoutstr(vm, space, arg, sp, ARG_MAX_LEN)?;
        pointers[i] = sp.as_u32();
    }

    for &ptr in pointers.iter().rev() {
        sp = sp
            .checked_sub(USER_POINTER_SIZE)
            .ok_or(KernelError::BadAddress(sp))?;
        copyout_u32(vm, space, ptr, sp)?;
    }

    let argv = sp;
    let sp = VirtualAddress::new(sp.as_u32() - sp.as_u32() % STACK_ALIGN);
    Ok((argv, sp))
}
