//! # Kernel Limits

/// Maximum number of processes alive (running or exited but unreaped) at once.
pub const MAX_PROCESSES: usize = 64;

/// Smallest pid handed to a user process.
pub const PID_MIN: i32 = 2;

/// Largest pid handed to a user process; allocation wraps back to [`PID_MIN`].
pub const PID_MAX: i32 = 32767;

/// Longest accepted program path, in bytes, excluding the terminator.
pub const PATH_MAX: usize = 1024;

/// Longest accepted path component (the program name), in bytes.
pub const NAME_MAX: usize = 255;

/// Longest accepted single argument string, including the terminator.
pub const ARG_MAX_LEN: usize = 1024;

/// Maximum number of arguments passed to a new program.
pub const ARG_COUNT_MAX: usize = 64;

/// Maximum total size of all argument strings, including terminators.
///
/// This is larger than the user stack (`STACK_PAGES` pages), so an argument
/// list within this limit can still fail to fit once copied out together
/// with its pointer array. That case is reported as a bad address, not as
/// `E2BIG`.
pub const ARG_MAX: usize = 64 * 1024;

const _: () = {
    assert!(PID_MIN > 0 && PID_MIN < PID_MAX);
    assert!(MAX_PROCESSES < (PID_MAX - PID_MIN) as usize);
    assert!(NAME_MAX < PATH_MAX);
    assert!(ARG_MAX_LEN <= ARG_MAX);
};
