//! End-to-end runs on host threads: programs enter user mode, fault their
//! pages in through the TLB and talk to the kernel by system call.

use kernel::programs::{DATA_BASE, TEXT_BASE};
use kernel::{HostKernel, ProgramStore, User};
use kernel_info::abi::errno::{ECHILD, ENOENT, ESRCH};
use kernel_info::abi::signal::SIGSEGV;
use kernel_info::abi::wait::{EX_MOD, mkwait_exit, mkwait_sig};
use kernel_info::config::MachineConfig;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_syscall::{ExecImage, KernelError};
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn machine() -> MachineConfig {
    MachineConfig::default().with_log_level(LevelFilter::Off)
}

/// Boots `store`, runs `path` to completion and checks that everything was
/// given back.
fn run(store: ProgramStore, path: &str, args: &[&str]) -> Arc<HostKernel> {
    let kernel = kernel::boot(&machine(), store);
    let free = kernel.vm().frames().stats().free;
    kernel::spawn(&kernel, path, args).unwrap();
    kernel.threads().join_all();
    assert!(kernel.processes().is_empty(), "processes left behind");
    assert_eq!(kernel.vm().frames().stats().free, free, "frames leaked");
    assert_eq!(kernel.threads().pending(), 0);
    kernel
}

fn take(results: &Mutex<Vec<i32>>) -> Vec<i32> {
    std::mem::take(&mut *results.lock().unwrap())
}

static EXITS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn exits_42(_: &mut User) -> i32 {
    42
}

fn fork_and_wait(user: &mut User) -> i32 {
    let me = user.getpid();
    let child = user.fork(exits_42).unwrap();
    assert_ne!(child, me);
    let status = user.waitpid(child).unwrap();
    EXITS.lock().unwrap().push(status);
    // Reaped: a second wait finds nothing.
    EXITS.lock().unwrap().push(user.waitpid(child).unwrap_err());
    0
}

#[test]
fn child_exit_status_reaches_the_parent() {
    let store = ProgramStore::new().with_program("/bin/parent", fork_and_wait, &[]);
    run(store, "/bin/parent", &["parent"]);
    assert_eq!(take(&EXITS), [mkwait_exit(42), ESRCH]);
}

static ARGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record_args(user: &mut User) -> i32 {
    *ARGS.lock().unwrap() = user.args();
    0
}

fn launch(user: &mut User) -> i32 {
    let errno = user.execv("/bin/args", &["args", "a", "bc"]);
    panic!("execv failed with {errno}");
}

#[test]
fn execv_hands_the_arguments_to_the_new_program() {
    let store = ProgramStore::new()
        .with_program("/bin/launch", launch, &[])
        .with_program("/bin/args", record_args, &[]);
    run(store, "/bin/launch", &["launch"]);
    assert_eq!(*ARGS.lock().unwrap(), ["args", "a", "bc"]);
}

static EXEC_ERRORS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn exec_missing(user: &mut User) -> i32 {
    user.store_word(DATA_BASE, 7);
    let errno = user.execv("/bin/missing", &["missing"]);
    EXEC_ERRORS.lock().unwrap().push(errno);
    // Still the old program, data intact.
    let data = user.load_word(DATA_BASE).cast_signed();
    EXEC_ERRORS.lock().unwrap().push(data);
    0
}

#[test]
fn failed_execv_returns_to_the_caller() {
    let store = ProgramStore::new().with_program("/bin/try", exec_missing, &[0; 4]);
    run(store, "/bin/try", &["try"]);
    assert_eq!(take(&EXEC_ERRORS), [ENOENT, 7]);
}

static KILLS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn scribble_code(user: &mut User) -> i32 {
    user.store_word(TEXT_BASE, 0);
    0
}

fn null_deref(user: &mut User) -> i32 {
    i32::from(user.load_word(VirtualAddress::zero()) == 0)
}

fn run_vandals(user: &mut User) -> i32 {
    for body in [scribble_code as fn(&mut User) -> i32, null_deref] {
        let child = user.fork(body).unwrap();
        let status = user.waitpid(child).unwrap();
        KILLS.lock().unwrap().push(status);
    }
    0
}

#[test]
fn faults_kill_only_the_offender() {
    let store = ProgramStore::new().with_program("/bin/vandals", run_vandals, &[]);
    run(store, "/bin/vandals", &["vandals"]);
    assert_eq!(take(&KILLS), [mkwait_sig(EX_MOD), mkwait_sig(SIGSEGV)]);
}

static SIBLINGS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn increment(user: &mut User) -> i32 {
    let value = user.load_word(DATA_BASE);
    user.store_word(DATA_BASE, value + 1);
    user.load_word(DATA_BASE).cast_signed()
}

fn many_children(user: &mut User) -> i32 {
    user.store_word(DATA_BASE, 10);
    let children: Vec<_> = (0..8).map(|_| user.fork(increment).unwrap()).collect();
    for &child in children.iter().rev() {
        SIBLINGS.lock().unwrap().push(user.waitpid(child).unwrap());
    }
    // Not our child, or not anyone's.
    let me = user.getpid();
    SIBLINGS.lock().unwrap().push(user.waitpid(me).unwrap_err());
    SIBLINGS.lock().unwrap().push(user.load_word(DATA_BASE).cast_signed());
    0
}

#[test]
fn children_get_private_copies() {
    let store = ProgramStore::new().with_program("/bin/many", many_children, &[0; 4]);
    run(store, "/bin/many", &["many"]);
    let results = take(&SIBLINGS);
    assert_eq!(results[..8], [mkwait_exit(11); 8]);
    assert_eq!(results[8], ECHILD);
    assert_eq!(results[9], 10);
}

const SWEEP_PAGES: u32 = 80;
static SWEEP: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn sweep(user: &mut User) -> i32 {
    for page in 0..SWEEP_PAGES {
        user.store_word(DATA_BASE + page * PAGE_SIZE, page);
    }
    let good = (0..SWEEP_PAGES)
        .filter(|&page| user.load_word(DATA_BASE + page * PAGE_SIZE) == page)
        .count();
    SWEEP.lock().unwrap().push(i32::try_from(good).unwrap());
    0
}

#[test]
fn working_set_larger_than_the_tlb() {
    let data = vec![0u8; (SWEEP_PAGES * PAGE_SIZE) as usize];
    let store = ProgramStore::new().with_program("/bin/sweep", sweep, &data);
    run(store, "/bin/sweep", &["sweep"]);
    assert_eq!(take(&SWEEP), [i32::try_from(SWEEP_PAGES).unwrap()]);
}

static DEMO: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn harness(user: &mut User) -> i32 {
    fn boot_init(user: &mut User) -> i32 {
        user.execv("/bin/init", &["init"])
    }
    let child = user.fork(boot_init).unwrap();
    DEMO.lock().unwrap().push(user.waitpid(child).unwrap());
    0
}

#[test]
fn demo_init_runs_clean() {
    let store = kernel::demo::programs().with_program("/bin/harness", harness, &[]);
    run(store, "/bin/harness", &["harness"]);
    // init exits with the number of test programs that misbehaved.
    assert_eq!(take(&DEMO), [mkwait_exit(0)]);
}

#[test]
fn spawning_a_missing_program_leaves_nothing_behind() {
    let kernel = kernel::boot(&machine(), ProgramStore::new());
    let free = kernel.vm().frames().stats().free;
    assert_eq!(
        kernel::spawn(&kernel, "/bin/nothing", &["nothing"]),
        Err(KernelError::NoSuchFile)
    );
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.vm().frames().stats().free, free);
}

static RAN: AtomicBool = AtomicBool::new(false);

fn must_not_run(_: &mut User) -> i32 {
    RAN.store(true, Ordering::SeqCst);
    0
}

#[test]
fn entering_data_is_an_illegal_instruction() {
    let kernel = kernel::boot(&machine(), ProgramStore::new().with_program("/bin/x", must_not_run, &[0; 4]));
    let free = kernel.vm().frames().stats().free;
    let (process, image) = kernel.run_program("/bin/x", &["x"]).unwrap();

    // The data segment is zeroed, which decodes as no program at all.
    let image = ExecImage {
        entry_point: DATA_BASE,
        ..image
    };
    kernel.threads().start(process, image).unwrap();
    kernel.threads().join_all();

    assert!(!RAN.load(Ordering::SeqCst));
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.vm().frames().stats().free, free);
}
