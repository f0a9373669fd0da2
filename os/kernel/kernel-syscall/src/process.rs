//! # Process Table
//!
//! Every user process has an entry from creation until it is reaped:
//!
//! ```text
//!   create ──► Running ──exit──► Exited(status) ──waitpid──► (removed)
//!                 │
//!                 └──exit, no live parent──────────────────► (removed)
//! ```
//!
//! Parent links live in the table, not in the process, so that they can be
//! cut when the parent goes away: an exiting process reaps its exited
//! children and orphans the running ones. A pid is therefore never mistaken
//! for the parent after it has been recycled.
//!
//! All transitions happen under the table's [`SpinLock`]. A process that
//! waits for a child sleeps on its own [`CondVar`] with the table lock
//! released.

use crate::KernelError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use kernel_info::limits::{MAX_PROCESSES, PID_MAX, PID_MIN};
use kernel_sync::{CondVar, SpinLock, SpinLockGuard};
use kernel_vmem::AddressSpace;
use log::debug;

/// Process identifier.
pub type Pid = i32;

/// Lifecycle state of a process that has not been reaped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcState {
    Running,
    /// Exited with this encoded wait status; waiting to be reaped.
    Exited(i32),
}

/// One user process.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    name: String,
    address_space: SpinLock<Option<AddressSpace>>,
    /// Signalled whenever one of this process's children exits.
    wait_child: CondVar,
}

impl Process {
    fn new(pid: Pid, name: String) -> Self {
        Self {
            pid,
            name,
            address_space: SpinLock::new(None),
            wait_child: CondVar::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` on the current address space, if any.
    pub fn with_address_space<R>(&self, f: impl FnOnce(Option<&mut AddressSpace>) -> R) -> R {
        let mut slot = self.address_space.lock();
        f(slot.as_mut())
    }

    /// Installs `space` and returns the one it replaces.
    pub fn set_address_space(&self, space: AddressSpace) -> Option<AddressSpace> {
        self.address_space.lock().replace(space)
    }

    /// Detaches the address space, leaving the process without one.
    pub fn take_address_space(&self) -> Option<AddressSpace> {
        self.address_space.lock().take()
    }

    #[must_use]
    pub fn has_address_space(&self) -> bool {
        self.address_space.lock().is_some()
    }

    pub(crate) const fn wait_child(&self) -> &CondVar {
        &self.wait_child
    }
}

#[derive(Debug)]
struct Entry {
    process: Arc<Process>,
    parent: Option<Pid>,
    state: ProcState,
}

/// Table contents; only reachable through the table lock.
#[derive(Debug)]
pub struct Procs {
    entries: BTreeMap<Pid, Entry>,
    next_pid: Pid,
}

impl Procs {
    const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_pid: PID_MIN,
        }
    }

    fn allocate_pid(&mut self) -> Option<Pid> {
        let span = PID_MAX - PID_MIN + 1;
        for _ in 0..span {
            let pid = self.next_pid;
            self.next_pid = if pid == PID_MAX { PID_MIN } else { pid + 1 };
            if !self.entries.contains_key(&pid) {
                return Some(pid);
            }
        }
        None
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Arc<Process>> {
        self.entries.get(&pid).map(|e| &e.process)
    }

    #[must_use]
    pub fn state(&self, pid: Pid) -> Option<ProcState> {
        self.entries.get(&pid).map(|e| e.state)
    }

    #[must_use]
    pub fn parent(&self, pid: Pid) -> Option<Pid> {
        self.entries.get(&pid).and_then(|e| e.parent)
    }

    /// Whether `pid` names a process that can still wait for its children.
    #[must_use]
    pub fn is_running(&self, pid: Pid) -> bool {
        self.state(pid) == Some(ProcState::Running)
    }

    pub(crate) fn set_state(&mut self, pid: Pid, state: ProcState) {
        if let Some(entry) = self.entries.get_mut(&pid) {
            entry.state = state;
        }
    }

    pub(crate) fn remove(&mut self, pid: Pid) -> Option<Arc<Process>> {
        self.entries.remove(&pid).map(|e| e.process)
    }

    /// Reaps the exited children of `pid` and cuts the parent link of the
    /// running ones. Returns the number reaped.
    pub(crate) fn release_children(&mut self, pid: Pid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            !(e.parent == Some(pid) && matches!(e.state, ProcState::Exited(_)))
        });
        for entry in self.entries.values_mut() {
            if entry.parent == Some(pid) {
                entry.parent = None;
            }
        }
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pids currently in the table, in ascending order.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.entries.keys().copied()
    }
}

/// All processes known to the kernel.
#[derive(Debug)]
pub struct ProcessTable {
    procs: SpinLock<Procs>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            procs: SpinLock::new(Procs::new()),
        }
    }

    /// Locks the table.
    pub fn lock(&self) -> SpinLockGuard<'_, Procs> {
        self.procs.lock()
    }

    /// Registers a new running process with no address space.
    ///
    /// Exited processes keep their slot until they are reaped, so a parent
    /// that never waits can exhaust the table.
    ///
    /// # Errors
    /// [`KernelError::TooManyProcesses`] if [`MAX_PROCESSES`] entries are
    /// already present (running or not yet reaped) or no pid is free.
    pub fn create(&self, name: &str, parent: Option<Pid>) -> Result<Arc<Process>, KernelError> {
        let mut procs = self.procs.lock();
        if procs.len() >= MAX_PROCESSES {
            return Err(KernelError::TooManyProcesses);
        }
        let pid = procs.allocate_pid().ok_or(KernelError::TooManyProcesses)?;
        let process = Arc::new(Process::new(pid, String::from(name)));
        procs.entries.insert(
            pid,
            Entry {
                process: Arc::clone(&process),
                parent,
                state: ProcState::Running,
            },
        );
        debug!("proc: created pid {pid} ({name}), parent {parent:?}");
        Ok(process)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().get(pid).cloned()
    }

    #[must_use]
    pub fn state(&self, pid: Pid) -> Option<ProcState> {
        self.procs.lock().state(pid)
    }

    #[must_use]
    pub fn parent(&self, pid: Pid) -> Option<Pid> {
        self.procs.lock().parent(pid)
    }

    /// Drops an entry outright. Used to roll back a failed creation.
    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().remove(pid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.procs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_start_at_pid_min_and_are_unique() {
        let table = ProcessTable::new();
        let a = table.create("a", None).unwrap();
        let b = table.create("b", Some(a.pid())).unwrap();
        assert_eq!(a.pid(), PID_MIN);
        assert_eq!(b.pid(), PID_MIN + 1);
        assert_eq!(table.parent(b.pid()), Some(a.pid()));
        assert_eq!(table.state(b.pid()), Some(ProcState::Running));
    }

    #[test]
    fn table_is_bounded() {
        let table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.create("p", None).unwrap();
        }
        assert_eq!(
            table.create("one too many", None).err(),
            Some(KernelError::TooManyProcesses)
        );
        table.remove(PID_MIN);
        assert!(table.create("fits again", None).is_ok());
    }

    #[test]
    fn unreaped_processes_hold_their_slot() {
        let table = ProcessTable::new();
        let parent = table.create("parent", None).unwrap();
        let mut children = Vec::new();
        for _ in 1..MAX_PROCESSES {
            children.push(table.create("child", Some(parent.pid())).unwrap());
        }
        let zombie = children[0].pid();
        table.lock().set_state(zombie, ProcState::Exited(0));
        assert_eq!(
            table.create("no room", None).err(),
            Some(KernelError::TooManyProcesses)
        );

        table.remove(zombie);
        assert!(table.create("after reaping", None).is_ok());
    }

    #[test]
    fn pid_allocation_wraps_and_skips_live_pids() {
        let mut procs = Procs::new();
        procs.next_pid = PID_MAX;
        assert_eq!(procs.allocate_pid(), Some(PID_MAX));
        assert_eq!(procs.allocate_pid(), Some(PID_MIN));

        let table = ProcessTable::new();
        let first = table.create("first", None).unwrap();
        table.lock().next_pid = first.pid();
        assert_eq!(table.create("second", None).unwrap().pid(), first.pid() + 1);
    }

    #[test]
    fn release_children_reaps_exited_and_orphans_running() {
        let table = ProcessTable::new();
        let parent = table.create("parent", None).unwrap();
        let done = table.create("done", Some(parent.pid())).unwrap();
        let busy = table.create("busy", Some(parent.pid())).unwrap();

        let mut procs = table.lock();
        procs.set_state(done.pid(), ProcState::Exited(0));
        assert_eq!(procs.release_children(parent.pid()), 1);
        assert!(procs.get(done.pid()).is_none());
        assert_eq!(procs.parent(busy.pid()), None);
        assert!(procs.is_running(busy.pid()));
    }

    #[test]
    fn address_space_slot_starts_empty() {
        let table = ProcessTable::new();
        let p = table.create("p", None).unwrap();
        assert!(!p.has_address_space());
        assert!(p.take_address_space().is_none());
        assert_eq!(p.name(), "p");
    }
}
