//! Safe userspace memory access.
//!
//! Provides compile-time and runtime enforcement that userspace memory is only
//! accessed when the process's page table is active, *and* that a
//! concurrent unmap of the accessed range by a sibling thread turns into an
//! `InvalidArgument` return rather than a kernel page fault. Range
//! validation alone (checking the pointer falls in the lower canonical
//! half) catches a malicious address but not a racing `vmo_unmap` — only a
//! fault-trapped copy catches both.
//!
//! - `UserSlice`: An opaque (address, length) pair. `Send + Copy`, safe to capture in futures.
//! - `UserAccess`: A `!Send` token proving the page table is active. Cannot be captured in futures.
//! - `SyscallResult`: Return type for syscall futures, with optional writeback to userspace.
//! - `SyscallError`: Early-return error type for syscall setup (bad pointer, invalid handle, etc.).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use x86_64::VirtAddr;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};

/// Upper bound of userspace addresses (lower canonical half).
const USER_ADDR_MAX: usize = 0x0000_7fff_ffff_ffff;

/// A boxed syscall future. All non-diverging syscall handlers return this type.
pub type SyscallFuture = Pin<Box<dyn Future<Output = SyscallResult> + Send>>;

/// A region of userspace memory. Stores address and length but cannot be
/// dereferenced directly — you need a `UserAccess` token.
///
/// `UserSlice` is `Send + Copy`, so it can safely be captured in futures
/// (it's just two integers with private fields).
#[derive(Clone, Copy)]
pub struct UserSlice {
    addr: usize,
    len: usize,
}

impl UserSlice {
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// --- Fault-trapped raw copy -------------------------------------------------
//
// While `IN_USER_COPY` is set, the page fault handler installed by `init()`
// treats any page fault as "the copy currently in flight hit an unmapped or
// protected page" and redirects execution straight into `abort_user_copy`
// instead of the default panic-on-fault handler. `raw_user_copy` never
// pushes anything onto the stack before its first memory access, so landing
// on `abort_user_copy` with the stack exactly as `call raw_user_copy` left it
// is safe: `abort_user_copy` just sets `al = 0` and `ret`s to our caller.
static IN_USER_COPY: AtomicBool = AtomicBool::new(false);
static COPY_FAULT_FIXUP: AtomicU64 = AtomicU64::new(0);

/// Install the fault-trapping page fault handler. Called once from
/// `syscall::init()`.
pub fn init() {
    crate::interrupts::set_page_fault_handler(Some(user_copy_page_fault_handler));
}

extern "x86-interrupt" fn user_copy_page_fault_handler(
    mut stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    if IN_USER_COPY.load(Ordering::Acquire) {
        let fixup = COPY_FAULT_FIXUP.load(Ordering::Acquire);
        unsafe {
            stack_frame.as_mut().update(|frame| {
                frame.instruction_pointer = VirtAddr::new(fixup);
            });
        }
        return;
    }

    let fault_address = x86_64::registers::control::Cr2::read()
        .expect("CR2 contained non-canonical address while handling page fault");
    panic!(
        "Page fault outside user copy:\n  Fault address:   {fault_address:#020x}\n  Current address: {:#020x}\n  Caused by {} while executing in {} mode ({error_code:?})",
        stack_frame.instruction_pointer,
        if error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
            "write"
        } else {
            "read"
        },
        if error_code.contains(PageFaultErrorCode::USER_MODE) {
            "user"
        } else {
            "kernel"
        }
    );
}

#[unsafe(naked)]
unsafe extern "sysv64" fn raw_user_copy(dst: *mut u8, src: *const u8, len: usize) -> u8 {
    core::arch::naked_asm!(
        "test rdx, rdx",
        "jz 2f",
        "1:",
        "mov al, [rsi]",
        "mov [rdi], al",
        "inc rsi",
        "inc rdi",
        "dec rdx",
        "jnz 1b",
        "2:",
        "mov al, 1",
        "ret",
    )
}

#[unsafe(naked)]
unsafe extern "sysv64" fn abort_user_copy() -> u8 {
    core::arch::naked_asm!("xor eax, eax", "ret")
}

/// Copy `len` bytes between `dst` and `src`, trapping any page fault that
/// occurs mid-copy. Returns `false` (and leaves the destination partially
/// written) if a fault occurred.
fn fault_trapped_copy(dst: *mut u8, src: *const u8, len: usize) -> bool {
    COPY_FAULT_FIXUP.store(abort_user_copy as usize as u64, Ordering::Release);
    IN_USER_COPY.store(true, Ordering::Release);
    let ok = unsafe { raw_user_copy(dst, src, len) } != 0;
    IN_USER_COPY.store(false, Ordering::Release);
    ok
}

/// Proof that the current process's page table is active.
///
/// Not `Send` — cannot be captured in a `Send` future. This is the key
/// invariant: futures run when the scheduler polls them, potentially with
/// a different page table active. By making `UserAccess` non-`Send`, the
/// compiler prevents futures from holding onto it.
///
/// All reads and writes validate that the pointer falls within the userspace
/// address range (lower canonical half: `0` to `0x0000_7fff_ffff_ffff`)
/// before accessing memory, and are fault-trapped against a sibling thread
/// unmapping the range out from under the copy.
pub struct UserAccess(());

impl !Send for UserAccess {}

impl UserAccess {
    /// Create a new `UserAccess` token.
    ///
    /// # Safety
    /// Caller must ensure the current process's page table is active.
    pub(crate) unsafe fn new() -> Self {
        Self(())
    }

    /// Validate that a `UserSlice` falls entirely within userspace.
    fn validate(&self, slice: UserSlice) -> Result<(), SyscallError> {
        if slice.len == 0 {
            return Ok(());
        }
        let end = slice
            .addr
            .checked_add(slice.len)
            .ok_or(SyscallError::BadUserPointer)?;
        if end - 1 > USER_ADDR_MAX {
            return Err(SyscallError::BadUserPointer);
        }
        Ok(())
    }

    /// Copy data from userspace into a kernel `Vec`.
    pub fn read(&self, src: UserSlice) -> Result<Vec<u8>, SyscallError> {
        self.validate(src)?;
        let mut out = alloc::vec![0u8; src.len];
        if !fault_trapped_copy(out.as_mut_ptr(), src.addr as *const u8, src.len) {
            return Err(SyscallError::BadUserPointer);
        }
        Ok(out)
    }

    /// Copy data from kernel into userspace. Returns the number of bytes written.
    pub fn write(&self, dst: UserSlice, data: &[u8]) -> Result<usize, SyscallError> {
        self.validate(dst)?;
        let n = data.len().min(dst.len);
        if !fault_trapped_copy(dst.addr as *mut u8, data.as_ptr(), n) {
            return Err(SyscallError::BadUserPointer);
        }
        Ok(n)
    }

    /// Read a `Copy` struct from userspace.
    pub fn read_struct<T: Copy>(&self, addr: usize) -> Result<T, SyscallError> {
        let slice = UserSlice::new(addr, core::mem::size_of::<T>());
        self.validate(slice)?;
        let mut value = core::mem::MaybeUninit::<T>::uninit();
        if !fault_trapped_copy(value.as_mut_ptr() as *mut u8, addr as *const u8, slice.len) {
            return Err(SyscallError::BadUserPointer);
        }
        Ok(unsafe { value.assume_init() })
    }

    /// Write a `Copy` struct to userspace.
    pub fn write_struct<T: Copy>(&self, addr: usize, value: &T) -> Result<(), SyscallError> {
        let slice = UserSlice::new(addr, core::mem::size_of::<T>());
        self.validate(slice)?;
        let ok = fault_trapped_copy(
            addr as *mut u8,
            value as *const T as *const u8,
            slice.len,
        );
        if !ok {
            return Err(SyscallError::BadUserPointer);
        }
        Ok(())
    }

    /// Read a UTF-8 string from userspace.
    pub fn read_str(&self, addr: usize, len: usize) -> Result<alloc::string::String, SyscallError> {
        let bytes = self.read(UserSlice::new(addr, len))?;
        alloc::string::String::from_utf8(bytes).map_err(|_| SyscallError::BadUserPointer)
    }
}

/// Errors that can occur during syscall setup (before the future runs).
/// Handlers return these via `?` to bail out early.
#[derive(Debug)]
pub enum SyscallError {
    /// A userspace pointer was outside the valid address range, or faulted
    /// mid-copy (e.g. a sibling thread unmapped the range concurrently).
    BadUserPointer,
    /// The handle ID was invalid or of the wrong type.
    InvalidHandle,
}

impl SyscallError {
    pub fn to_error_code(&self) -> panda_abi::ErrorCode {
        match self {
            SyscallError::BadUserPointer => panda_abi::ErrorCode::InvalidArgument,
            SyscallError::InvalidHandle => panda_abi::ErrorCode::NoSuchObject,
        }
    }
}

/// Result of a syscall future, with optional data to write back to userspace.
///
/// Most handlers write back to a single destination, but a handler that
/// returns several independent out-parameters (e.g. `recv_msg`'s byte
/// payload and transferred-handle array) needs more than one — hence a
/// `Vec` rather than a single `Option<WriteBack>`.
pub struct SyscallResult {
    /// The return code (placed in `rax` when returning to userspace).
    pub code: isize,
    /// Data to copy to userspace after the future completes, applied in order.
    pub writeback: Vec<WriteBack>,
}

impl SyscallResult {
    /// A successful result with no writeback.
    pub fn ok(code: isize) -> Self {
        Self {
            code,
            writeback: Vec::new(),
        }
    }

    /// An error result.
    pub fn err(code: isize) -> Self {
        Self {
            code,
            writeback: Vec::new(),
        }
    }

    /// A result with data to write back to userspace.
    pub fn write_back(code: isize, data: Vec<u8>, dst: UserSlice) -> Self {
        Self {
            code,
            writeback: alloc::vec![WriteBack { data, dst }],
        }
    }

    /// A result that writes a `Copy` struct back to userspace.
    ///
    /// This safely converts the struct to bytes without requiring `unsafe` in
    /// handler code.
    pub fn write_back_struct<T: Copy>(code: isize, value: &T, dst: UserSlice) -> Self {
        let bytes = unsafe {
            core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
        };
        Self {
            code,
            writeback: alloc::vec![WriteBack {
                data: bytes.to_vec(),
                dst,
            }],
        }
    }

    /// A result with more than one destination to write back to.
    pub fn write_back_many(code: isize, writeback: Vec<WriteBack>) -> Self {
        Self { code, writeback }
    }
}

/// Data to copy from kernel to userspace after a future completes.
pub struct WriteBack {
    /// Kernel-side data to copy out.
    pub data: Vec<u8>,
    /// Destination in userspace.
    pub dst: UserSlice,
}
