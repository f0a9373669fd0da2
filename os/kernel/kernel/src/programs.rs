//! # Program Store
//!
//! The file system of the hosted kernel: a fixed set of programs, each a
//! Rust function standing in for compiled user code.
//!
//! Loading a program builds a real image in the new address space:
//!
//! ```text
//! 0x0040_0000  text  [ program id (BE word) | path \0 ]   R-X
//! 0x1000_0000  data  [ initial data bytes ]               RW-
//! ```
//!
//! The "CPU" starts a program by fetching the word at the entry point and
//! dispatching on it, so whatever ends up at the entry point decides what
//! runs. A zeroed or foreign word is an illegal instruction.

use crate::User;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{KernelError, ProgramLoader};
use kernel_vmem::{Access, AddressSpace, Vm};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Base of every program's text segment; also the entry point.
pub const TEXT_BASE: VirtualAddress = VirtualAddress::new(0x0040_0000);

/// Base of every program's data segment.
pub const DATA_BASE: VirtualAddress = VirtualAddress::new(0x1000_0000);

/// A user program's `main`. The return value is the exit code.
pub type UserMain = fn(&mut User) -> i32;

/// One installed program.
#[derive(Debug)]
pub struct Program {
    id: u32,
    path: String,
    main: UserMain,
    data: Vec<u8>,
}

impl Program {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn main(&self) -> UserMain {
        self.main
    }

    fn text(&self) -> Vec<u8> {
        let mut text = Vec::with_capacity(4 + self.path.len() + 1);
        text.extend_from_slice(&self.id.to_be_bytes());
        text.extend_from_slice(self.path.as_bytes());
        text.push(0);
        text
    }
}

/// All installed programs, by path and by id.
#[derive(Debug, Default)]
pub struct ProgramStore {
    by_path: BTreeMap<String, Arc<Program>>,
    by_id: Vec<Arc<Program>>,
}

impl ProgramStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `main` at `path` with `data` as its initialized data.
    /// A later install at the same path replaces the earlier one.
    #[must_use]
    pub fn with_program(mut self, path: &str, main: UserMain, data: &[u8]) -> Self {
        // Ids start at 1 so that zeroed memory never decodes as a program.
        let id = u32::try_from(self.by_id.len() + 1).unwrap_or(u32::MAX);
        let program = Arc::new(Program {
            id,
            path: path.to_owned(),
            main,
            data: data.to_vec(),
        });
        self.by_id.push(Arc::clone(&program));
        self.by_path.insert(path.to_owned(), program);
        self
    }

    /// The program whose id is `word`.
    #[must_use]
    pub fn decode(&self, word: u32) -> Option<&Arc<Program>> {
        let index = usize::try_from(word.checked_sub(1)?).ok()?;
        self.by_id.get(index)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }
}

impl ProgramLoader for ProgramStore {
    type Vnode = Arc<Program>;

    fn open(&self, path: &str) -> Result<Self::Vnode, KernelError> {
        self.by_path.get(path).cloned().ok_or_else(|| {
            debug!("open: {path}: no such file");
            KernelError::NoSuchFile
        })
    }

    fn close(&self, vnode: Self::Vnode) {
        trace!("close: {}", vnode.path);
    }

    fn load(
        &self,
        program: &Self::Vnode,
        vm: &Vm,
        space: &mut AddressSpace,
    ) -> Result<VirtualAddress, KernelError> {
        let text = program.text();
        let size = |bytes: &[u8]| u32::try_from(bytes.len()).map_err(|_| KernelError::NotExecutable);

        space.define_region(TEXT_BASE, size(&text)?, Access::READ | Access::EXECUTE)?;
        space.define_region(DATA_BASE, size(&program.data)?, Access::READ | Access::WRITE)?;
        space.prepare_load(vm)?;
        space.write(vm, TEXT_BASE, &text)?;
        space.write(vm, DATA_BASE, &program.data)?;
        space.complete_load(vm);

        trace!(
            "load: {} ({} text, {} data bytes)",
            program.path,
            text.len(),
            program.data.len()
        );
        Ok(TEXT_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::config::MachineConfig;
    use kernel_memory_addresses::PAGE_SIZE;

    fn noop(_: &mut User) -> i32 {
        0
    }

    fn seven(_: &mut User) -> i32 {
        7
    }

    #[test]
    fn ids_are_dense_and_never_zero() {
        let store = ProgramStore::new()
            .with_program("/bin/noop", noop, &[])
            .with_program("/bin/seven", seven, &[]);
        assert!(store.decode(0).is_none());
        assert_eq!(store.decode(1).unwrap().path(), "/bin/noop");
        assert_eq!(store.decode(2).unwrap().path(), "/bin/seven");
        assert!(store.decode(3).is_none());
        assert_eq!(store.paths().collect::<Vec<_>>(), ["/bin/noop", "/bin/seven"]);
    }

    #[test]
    fn load_places_the_id_at_the_entry_point() {
        let vm = Vm::new(&MachineConfig::default().with_ram_bytes(64 * PAGE_SIZE));
        vm.bootstrap();
        let store = ProgramStore::new()
            .with_program("/bin/noop", noop, &[])
            .with_program("/bin/seven", seven, b"data");

        let vnode = store.open("/bin/seven").unwrap();
        let mut space = AddressSpace::new();
        let entry = store.load(&vnode, &vm, &mut space).unwrap();
        store.close(vnode);

        let mut word = [0u8; 4];
        space.read(&vm, entry, &mut word).unwrap();
        assert_eq!(store.decode(u32::from_be_bytes(word)).unwrap().path(), "/bin/seven");

        let mut data = [0u8; 4];
        space.read(&vm, DATA_BASE, &mut data).unwrap();
        assert_eq!(&data, b"data");
        assert!(space.code_finalized());
        space.destroy(&vm);
    }

    #[test]
    fn missing_programs_are_not_found() {
        let store = ProgramStore::new();
        assert_eq!(store.open("/bin/nothing").err(), Some(KernelError::NoSuchFile));
    }
}
