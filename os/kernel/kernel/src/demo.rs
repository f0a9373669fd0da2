//! Programs installed on the demo machine.
//!
//! `/bin/init` runs each test program in a child and checks how it ended.
//! The child learns what to run from a command block that `init` writes
//! into its own data segment right before `fork`; the copy the child gets
//! carries it along.

use crate::User;
use crate::programs::{DATA_BASE, ProgramStore, TEXT_BASE};
use kernel_info::abi::signal::SIGSEGV;
use kernel_info::abi::wait::{
    EX_MOD, mkwait_exit, mkwait_sig, wexitstatus, wifexited, wifsignaled, wtermsig,
};
use kernel_memory_addresses::VirtualAddress;
use log::{info, warn};

/// Bytes of `/bin/init`'s data segment reserved for the command block.
const COMMAND_BYTES: usize = 256;

/// Word `forktest` parks in its data segment before forking.
const MARK: u32 = 0xA5A5_0F0F;

const FORKTEST_CHILDREN: usize = 4;

/// The demo file system.
#[must_use]
pub fn programs() -> ProgramStore {
    ProgramStore::new()
        .with_program("/bin/init", init, &[0; COMMAND_BYTES])
        .with_program("/bin/echo", echo, &[])
        .with_program("/testbin/forktest", forktest, &MARK.to_be_bytes())
        .with_program("/testbin/vandal", vandal, &[])
        .with_program("/testbin/wild", wild, &[])
}

/// Human-readable wait status.
#[must_use]
pub fn describe(status: i32) -> String {
    if wifexited(status) {
        format!("exited with {}", wexitstatus(status))
    } else if wifsignaled(status) {
        format!("killed by signal {}", wtermsig(status))
    } else {
        format!("unknown status {status:#x}")
    }
}

fn init(user: &mut User) -> i32 {
    let pid = user.getpid();
    info!(target: "init", "pid {pid} started with {:?}", user.args());

    let plan: [(&[&str], i32); 4] = [
        (&["/testbin/forktest"], mkwait_exit(0)),
        (&["/bin/echo", "hello", "world"], mkwait_exit(0)),
        (&["/testbin/vandal"], mkwait_sig(EX_MOD)),
        (&["/testbin/wild"], mkwait_sig(SIGSEGV)),
    ];

    let mut failures = 0;
    for (command, expected) in plan {
        match run(user, command) {
            Ok(status) if status == expected => {
                info!(target: "init", "{}: {}", command[0], describe(status));
            }
            Ok(status) => {
                warn!(target: "init", "{}: {}, expected {}", command[0], describe(status), describe(expected));
                failures += 1;
            }
            Err(errno) => {
                warn!(target: "init", "{}: error {errno}", command[0]);
                failures += 1;
            }
        }
    }
    failures
}

/// Runs `command` in a child and waits for it.
fn run(user: &mut User, command: &[&str]) -> Result<i32, i32> {
    write_command(user, command);
    let child = user.fork(run_command)?;
    user.waitpid(child)
}

/// Stores `command` as consecutive NUL-terminated strings followed by an
/// empty one.
fn write_command(user: &User, command: &[&str]) {
    let mut block = Vec::new();
    for word in command {
        block.extend_from_slice(word.as_bytes());
        block.push(0);
    }
    block.push(0);
    user.store(DATA_BASE, &block);
}

fn read_command(user: &User) -> Vec<String> {
    let mut words = Vec::new();
    let mut at = DATA_BASE;
    loop {
        let word = user.load_str(at);
        if word.is_empty() {
            return words;
        }
        at += u32::try_from(word.len() + 1).unwrap_or(u32::MAX);
        words.push(word);
    }
}

/// Forked child of `init`: execs the command block.
fn run_command(user: &mut User) -> i32 {
    let command = read_command(user);
    let Some(path) = command.first() else {
        return 127;
    };
    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    let errno = user.execv(path, &args);
    warn!(target: "init", "execv {path}: error {errno}");
    126
}

fn echo(user: &mut User) -> i32 {
    let args = user.args();
    info!(target: "echo", "{}", args.get(1..).unwrap_or_default().join(" "));
    i32::from(args.is_empty())
}

/// Checks that forked children get private copies of the data segment.
fn forktest(user: &mut User) -> i32 {
    let mut children = Vec::with_capacity(FORKTEST_CHILDREN);
    for _ in 0..FORKTEST_CHILDREN {
        match user.fork(forktest_child) {
            Ok(pid) => children.push(pid),
            Err(errno) => {
                warn!(target: "forktest", "fork: error {errno}");
                return 1;
            }
        }
    }

    let mut failed = 0;
    for pid in children {
        match user.waitpid(pid) {
            Ok(status) if status == mkwait_exit(0) => {}
            Ok(status) => {
                warn!(target: "forktest", "child {pid}: {}", describe(status));
                failed += 1;
            }
            Err(errno) => {
                warn!(target: "forktest", "waitpid {pid}: error {errno}");
                failed += 1;
            }
        }
    }

    if user.load_word(DATA_BASE) != MARK {
        warn!(target: "forktest", "a child wrote through to the parent");
        failed += 1;
    }
    failed
}

fn forktest_child(user: &mut User) -> i32 {
    let pid = user.getpid().cast_unsigned();
    if user.load_word(DATA_BASE) != MARK {
        return 2;
    }
    user.store_word(DATA_BASE, pid);
    i32::from(user.load_word(DATA_BASE) != pid)
}

/// Writes to its own code.
fn vandal(user: &mut User) -> i32 {
    user.store_word(TEXT_BASE, 0);
    0
}

/// Dereferences a null pointer.
fn wild(user: &mut User) -> i32 {
    let value = user.load_word(VirtualAddress::zero());
    i32::from(value != 0)
}
