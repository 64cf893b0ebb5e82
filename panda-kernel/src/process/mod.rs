//! Process management.
//!
//! A process owns an address space, a handle table, and exactly one thread
//! (the syscall catalogue has no thread-creation operation, so the
//! process/thread split exists for correctness — the scheduler only ever
//! touches `Thread` — without needing a second spawn path). This module
//! contains:
//! - `Process` struct and lifecycle management
//! - CPU state saving/restoring (`state.rs`, `exec.rs`)
//! - ELF loading (`elf.rs`)
//! - Process info for inter-process communication (`info.rs`)

pub mod context;
mod elf;
mod exec;
pub mod info;
mod state;
mod waker;

pub use context::Context;
pub use exec::{
    exec_userspace, return_from_deferred_syscall, return_from_interrupt, return_from_syscall,
};
pub use info::ProcessInfo;
pub use state::{InterruptFrame, SavedGprs, SavedState};

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spinning_top::Spinlock;
use x86_64::VirtAddr;

use crate::channel::Channel;
use crate::error::{KError, KResult};
use crate::handle::HandleTable;
use crate::job::Job;
use crate::memory::{self, Mapping, MappingBacking};
use crate::thread::Thread;
use crate::vmo::Vmo;

/// Unique process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn new() -> Self {
        static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(0);
        ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Errors produced while loading an ELF binary for `spawn`.
#[derive(Debug)]
pub enum ProcessError {
    InvalidElf(&'static str),
    Not64Bit,
}

impl From<ProcessError> for KError {
    fn from(_: ProcessError) -> Self {
        KError::InvalidArgument
    }
}

/// A range of a process's address space handed out to a VMO mapping, used
/// both to keep `vaddr_hint`s from colliding (the same way a user-space
/// allocator hands out non-overlapping `mmap` regions) and to recover which
/// `Vmo` owns a mapping given only its address, since `vmo_unmap` is an
/// address-based operation with no handle argument (mirroring `munmap`).
struct VmoRegion {
    vaddr: VirtAddr,
    len: usize,
    vmo: Weak<Vmo>,
}

/// A userspace process: one address space, one handle table, one thread.
pub struct Process {
    id: ProcessId,
    context: Context,
    /// ELF segment mappings (code, data). Dropped on process exit.
    #[allow(dead_code)]
    mappings: Spinlock<Vec<Mapping>>,
    handles: Spinlock<HandleTable>,
    /// Stack mapping - demand-paged. Grows downward from top of region.
    #[allow(dead_code)]
    stack: Mapping,
    /// Heap mapping - demand-paged, resizable. Size represents current brk offset from HEAP_BASE.
    heap: Spinlock<Mapping>,
    /// Regions handed out to VMO mappings, so concurrent `vmo_map` calls
    /// with `vaddr_hint == 0` don't collide. Grounded in the same
    /// next-fit bump allocator idiom `heap.resize` already uses for brk.
    vmo_regions: Spinlock<Vec<VmoRegion>>,
    /// External process info visible to handle holders.
    /// Survives process exit until all handles are dropped.
    info: Arc<ProcessInfo>,
    /// The job this process belongs to.
    job: Weak<Job>,
    thread: Spinlock<Option<Arc<Thread>>>,
    /// This process's end of the channel connected to its spawning parent,
    /// reachable without a handle-table lookup via `WellKnownHandle::PARENT`.
    /// `None` for a process with no parent (the init process).
    parent_channel: Spinlock<Option<Arc<Channel>>>,
}

/// Base of the region VMOs are mapped into, chosen well clear of the ELF
/// image, heap, and stack regions defined in `panda_abi`.
const VMO_REGION_BASE: u64 = 0x5000_0000_0000;
const VMO_REGION_MAX: u64 = 0x6000_0000_0000;

impl Process {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Create a process from ELF data, install it in `job`, and give it its
    /// one thread. The process is runnable as soon as this returns.
    pub fn from_elf_data(data: &[u8], job: &Arc<Job>) -> KResult<Arc<Process>> {
        let context = Context::new_user_context();

        let saved_page_table = memory::current_page_table_phys();
        unsafe {
            context.activate();
        }
        let load_result = elf::load_elf(data);
        unsafe {
            memory::switch_page_table(saved_page_table);
        }
        let (entry, mappings) = load_result.map_err(KError::from)?;

        let saved_page_table = memory::current_page_table_phys();
        unsafe {
            context.activate();
        }
        let stack = Mapping::new(
            VirtAddr::new(panda_abi::STACK_BASE as u64),
            panda_abi::STACK_MAX_SIZE,
            MappingBacking::DemandPaged,
        );
        let stack_pointer =
            VirtAddr::new((panda_abi::STACK_BASE + panda_abi::STACK_MAX_SIZE - 8) as u64);
        let heap = Mapping::new(VirtAddr::new(panda_abi::HEAP_BASE as u64), 0, MappingBacking::DemandPaged);
        unsafe {
            memory::switch_page_table(saved_page_table);
        }

        let id = ProcessId::new();
        let process = Arc::new(Process {
            id,
            context,
            mappings: Spinlock::new(mappings),
            handles: Spinlock::new(HandleTable::new()),
            stack,
            heap: Spinlock::new(heap),
            vmo_regions: Spinlock::new(Vec::new()),
            info: Arc::new(ProcessInfo::new(id)),
            job: Arc::downgrade(job),
            thread: Spinlock::new(None),
            parent_channel: Spinlock::new(None),
        });

        let thread = Thread::new(&process, VirtAddr::new(entry), stack_pointer);
        *process.thread.lock() = Some(thread);

        job.add_child(process.clone());
        Ok(process)
    }

    /// Create a process around the kernel's own already-active page table,
    /// used for the init process (which maps its own ELF, so there is no
    /// ELF blob to load here — the init process is constructed directly by
    /// `main`, not through `from_elf_data`).
    pub unsafe fn from_current_context(
        entry: VirtAddr,
        stack_pointer: VirtAddr,
        job: &Arc<Job>,
    ) -> Arc<Process> {
        let context = unsafe { Context::from_current_page_table() };
        let stack = Mapping::new(
            VirtAddr::new(panda_abi::STACK_BASE as u64),
            panda_abi::STACK_MAX_SIZE,
            MappingBacking::DemandPaged,
        );
        let heap = Mapping::new(VirtAddr::new(panda_abi::HEAP_BASE as u64), 0, MappingBacking::DemandPaged);

        let id = ProcessId::new();
        let process = Arc::new(Process {
            id,
            context,
            mappings: Spinlock::new(Vec::new()),
            handles: Spinlock::new(HandleTable::new()),
            stack,
            heap: Spinlock::new(heap),
            vmo_regions: Spinlock::new(Vec::new()),
            info: Arc::new(ProcessInfo::new(id)),
            job: Arc::downgrade(job),
            thread: Spinlock::new(None),
            parent_channel: Spinlock::new(None),
        });
        let thread = Thread::new(&process, entry, stack_pointer);
        *process.thread.lock() = Some(thread);
        job.add_child(process.clone());
        process
    }

    /// The process's one thread. `None` only in the brief window during
    /// construction before the constructor has installed it.
    pub fn thread(&self) -> Arc<Thread> {
        self.thread.lock().clone().expect("process has no thread")
    }

    pub fn job(&self) -> Option<Arc<Job>> {
        self.job.upgrade()
    }

    /// Get the process info (for creating handles).
    pub fn info(&self) -> &Arc<ProcessInfo> {
        &self.info
    }

    /// Set the exit code. Called when process terminates.
    pub fn set_exit_code(&self, code: i32) {
        self.info.set_exit_code(code);
        if let Some(job) = self.job() {
            // The Arc<Process> held by Job::children keeps this process
            // alive until the job itself drops or reaps it; removing it
            // here lets the handle table and mappings drop once the last
            // external handle to this process is also gone.
            job.remove_child_by_id(self.id());
        }
    }

    pub fn handles(&self) -> &Spinlock<HandleTable> {
        &self.handles
    }

    /// This process's end of the channel connected to its spawning parent,
    /// if `spawn` set one up.
    pub fn parent_channel(&self) -> Option<Arc<Channel>> {
        self.parent_channel.lock().clone()
    }

    /// Install the parent-channel endpoint. Called once, right after
    /// construction, by the `spawn` handler.
    pub fn set_parent_channel(&self, channel: Arc<Channel>) {
        *self.parent_channel.lock() = Some(channel);
    }

    /// Get the page table physical address for this process.
    pub fn page_table_phys(&self) -> x86_64::PhysAddr {
        self.context.page_table_phys()
    }

    /// Switch to this process's page table.
    ///
    /// # Safety
    /// Must only be called when it's safe to switch page tables, and the
    /// caller must switch back before touching any other process's memory.
    pub unsafe fn activate_page_table(&self) {
        unsafe {
            self.context.activate();
        }
    }

    /// Get the current program break (end of heap).
    pub fn brk(&self) -> VirtAddr {
        VirtAddr::new(panda_abi::HEAP_BASE as u64 + self.heap.lock().size() as u64)
    }

    /// Set the program break. Returns the new break on success, or the old break on failure.
    pub fn set_brk(&self, new_brk: VirtAddr) -> VirtAddr {
        let heap_base = panda_abi::HEAP_BASE as u64;
        let heap_end = heap_base + panda_abi::HEAP_MAX_SIZE as u64;

        if new_brk.as_u64() < heap_base || new_brk.as_u64() > heap_end {
            return self.brk();
        }

        let new_size = (new_brk.as_u64() - heap_base) as usize;
        self.heap.lock().resize(new_size);
        self.brk()
    }

    /// Reserve `len` bytes of address space for a VMO mapping, returning the
    /// base address. `hint == 0` picks the next free region by simple bump
    /// allocation; a non-zero hint is honored only if it doesn't overlap an
    /// existing VMO region.
    pub fn reserve_vmo_region(&self, hint: usize, len: usize, vmo: &Arc<Vmo>) -> KResult<VirtAddr> {
        let mut regions = self.vmo_regions.lock();
        let vaddr = if hint != 0 {
            let start = hint as u64;
            let end = start.checked_add(len as u64).ok_or(KError::InvalidArgument)?;
            let overlaps = regions.iter().any(|r| {
                let r_end = r.vaddr.as_u64() + r.len as u64;
                start < r_end && r.vaddr.as_u64() < end
            });
            if overlaps {
                return Err(KError::InvalidArgument);
            }
            VirtAddr::new(start)
        } else {
            let next = regions
                .iter()
                .map(|r| r.vaddr.as_u64() + r.len as u64)
                .max()
                .unwrap_or(VMO_REGION_BASE);
            if next + len as u64 > VMO_REGION_MAX {
                return Err(KError::NoMemory);
            }
            VirtAddr::new(next)
        };
        regions.push(VmoRegion {
            vaddr,
            len,
            vmo: Arc::downgrade(vmo),
        });
        Ok(vaddr)
    }

    pub fn release_vmo_region(&self, vaddr: VirtAddr, len: usize) {
        self.vmo_regions
            .lock()
            .retain(|r| !(r.vaddr == vaddr && r.len == len));
    }

    /// Find the VMO that owns the mapping starting at `vaddr`, for
    /// `vmo_unmap`, which (like `munmap`) names only an address, not a
    /// handle.
    pub fn vmo_at(&self, vaddr: VirtAddr) -> Option<Arc<Vmo>> {
        self.vmo_regions
            .lock()
            .iter()
            .find(|r| r.vaddr == vaddr)
            .and_then(|r| r.vmo.upgrade())
    }
}
