//! Shared ABI definitions between kernel and userspace.
//!
//! This crate contains the syscall number, operation catalogue, handle/rights
//! encoding, and wire structs that both the kernel and userspace agree on.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod path;

// =============================================================================
// Syscall number
// =============================================================================

/// The unified send syscall - every operation goes through this.
pub const SYSCALL_SEND: usize = 0x30;

// =============================================================================
// Well-known handles
// =============================================================================

/// Well-known handle IDs pre-allocated for every process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownHandle;

impl WellKnownHandle {
    /// Root namespace handle, passed as `parent_h` to `get_obj` for absolute lookups.
    pub const ROOT: u64 = ObjectType::NsDir.make_handle(0);

    /// Handle to the current process object.
    pub const PROCESS: u64 = ObjectType::Process.make_handle(1);

    /// Handle to the channel connected to the parent process, if any.
    pub const PARENT: u64 = ObjectType::Channel.make_handle(2);
}

/// Sentinel handle value naming no entry.
pub const INVALID_HANDLE: u64 = u64::MAX;

// =============================================================================
// Object types
// =============================================================================

/// Kernel object type tags, encoded in the high 8 bits of a handle value.
///
/// Handle format: `[8 bits: type tag][56 bits: handle id]`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Invalid or unknown object type.
    Invalid = 0x00,
    /// Process object.
    Process = 0x01,
    /// Thread object.
    Thread = 0x02,
    /// IPC channel endpoint.
    Channel = 0x03,
    /// Virtual memory object.
    Vmo = 0x04,
    /// Async notification port.
    Port = 0x05,
    /// Signalable event object.
    Event = 0x06,
    /// Job (process group).
    Job = 0x07,
    /// Namespace directory.
    NsDir = 0x08,
    /// Kernel info object.
    Info = 0x09,
    /// Plain file object.
    File = 0x0a,
    /// Plain directory object.
    Directory = 0x0b,
    /// Network socket.
    Socket = 0x0c,
    /// Unidirectional byte pipe.
    Pipe = 0x0d,
    /// Generic device object.
    Device = 0x0e,
}

impl ObjectType {
    /// Number of bits used for the type tag.
    pub const TAG_BITS: u32 = 8;
    /// Number of bits used for the handle id.
    pub const ID_BITS: u32 = 56;
    /// Mask for extracting the handle id (low 56 bits).
    pub const ID_MASK: u64 = (1u64 << Self::ID_BITS) - 1;
    /// Mask for extracting the type tag (high 8 bits).
    pub const TAG_MASK: u64 = 0xFF << Self::ID_BITS;
    /// Largest representable handle id.
    pub const MAX_ID: u64 = Self::ID_MASK;

    /// Pack this type and an id into a tagged handle value.
    #[inline]
    pub const fn make_handle(self, id: u64) -> u64 {
        ((self as u64) << Self::ID_BITS) | (id & Self::ID_MASK)
    }

    /// Extract the type tag from a handle value.
    #[inline]
    pub const fn from_handle(handle: u64) -> u8 {
        (handle >> Self::ID_BITS) as u8
    }

    /// Extract the handle id from a handle value.
    #[inline]
    pub const fn id_from_handle(handle: u64) -> u64 {
        handle & Self::ID_MASK
    }

    /// Try to convert a raw tag value to an `ObjectType`.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Invalid),
            0x01 => Some(Self::Process),
            0x02 => Some(Self::Thread),
            0x03 => Some(Self::Channel),
            0x04 => Some(Self::Vmo),
            0x05 => Some(Self::Port),
            0x06 => Some(Self::Event),
            0x07 => Some(Self::Job),
            0x08 => Some(Self::NsDir),
            0x09 => Some(Self::Info),
            0x0a => Some(Self::File),
            0x0b => Some(Self::Directory),
            0x0c => Some(Self::Socket),
            0x0d => Some(Self::Pipe),
            0x0e => Some(Self::Device),
            _ => None,
        }
    }

    /// Human-readable type name, mirroring the original `object_type_name`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Process => "process",
            Self::Thread => "thread",
            Self::Channel => "channel",
            Self::Vmo => "vmo",
            Self::Port => "port",
            Self::Event => "event",
            Self::Job => "job",
            Self::NsDir => "ns_dir",
            Self::Info => "info",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Socket => "socket",
            Self::Pipe => "pipe",
            Self::Device => "device",
        }
    }
}

// =============================================================================
// Rights
// =============================================================================

/// Rights mask carried by a handle, gating which operations it may perform.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rights(pub u32);

impl Rights {
    /// No rights at all.
    pub const NONE: Self = Self(0);
    /// Permits read/recv-style operations.
    pub const READ: Self = Self(1 << 0);
    /// Permits write/send-style operations.
    pub const WRITE: Self = Self(1 << 1);
    /// Permits mapping with executable protection.
    pub const EXECUTE: Self = Self(1 << 2);
    /// Permits mapping the object into an address space.
    pub const MAP: Self = Self(1 << 3);
    /// Permits `handle_dup`.
    pub const DUPLICATE: Self = Self(1 << 4);
    /// Permits sending the handle over a channel.
    pub const TRANSFER: Self = Self(1 << 5);
    /// Permits `object_get_info`.
    pub const GET_INFO: Self = Self(1 << 6);
    /// Permits signaling an event object.
    pub const SIGNAL: Self = Self(1 << 7);

    /// All rights set; the ceiling a handle may be created with.
    pub const ALL: Self = Self(
        Self::READ.0
            | Self::WRITE.0
            | Self::EXECUTE.0
            | Self::MAP.0
            | Self::DUPLICATE.0
            | Self::TRANSFER.0
            | Self::GET_INFO.0
            | Self::SIGNAL.0,
    );

    /// Bitwise-or two rights masks together.
    #[inline]
    pub const fn or(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether `self` contains every bit set in `other`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` is a subset of (or equal to) `other` — used to validate
    /// that a duplicate or transfer never elevates rights.
    #[inline]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Intersection of two rights masks.
    #[inline]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl core::ops::BitOr for Rights {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

// =============================================================================
// Operation codes
// =============================================================================

/// Syscall operation codes, dispatched through `SYSCALL_SEND`.
///
/// Grouped by family with distinct address ranges, mirroring the component
/// split in the system overview: handle/object, namespace, VMO, channel,
/// process/thread, time and debug.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // Object / handle family (0x1_0000 - 0x1_FFFF)
    /// Namespace lookup or sub-lookup: (parent_h, path_ptr, path_len, rights) -> handle
    GetObj = 0x1_0000,
    /// Release a handle: (h) -> 0 or error
    HandleClose = 0x1_0001,
    /// Duplicate a handle with a subset of its rights: (h, new_rights) -> handle
    HandleDup = 0x1_0002,
    /// Read through a handle's object vtable: (h, buf_ptr, buf_len, offset) -> bytes_read
    HandleRead = 0x1_0003,
    /// Write through a handle's object vtable: (h, buf_ptr, buf_len, offset) -> bytes_written
    HandleWrite = 0x1_0004,
    /// Seek an object that supports it: (h, offset, whence) -> new_position
    HandleSeek = 0x1_0005,
    /// Type-specific info readout: (h, topic, buf_ptr, buf_len) -> bytes_written
    ObjectGetInfo = 0x1_0006,

    // Namespace family (0x2_0000 - 0x2_FFFF)
    /// Publish an object under a path: (path_ptr, path_len, h) -> 0 or error
    NsRegister = 0x2_0000,
    /// Remove a published path: (path_ptr, path_len) -> 0 or error
    NsUnregister = 0x2_0001,
    /// Stateless cursor iteration of the namespace: (entries_ptr, count, cursor_ptr) -> filled
    NsList = 0x2_0002,

    // VMO family (0x3_0000 - 0x3_FFFF)
    /// Create an anonymous VMO: (size, flags) -> handle
    VmoCreate = 0x3_0000,
    /// Read bytes at an offset: (h, buf_ptr, buf_len, offset) -> bytes_read
    VmoRead = 0x3_0001,
    /// Write bytes at an offset: (h, buf_ptr, buf_len, offset) -> bytes_written
    VmoWrite = 0x3_0002,
    /// Grow or shrink a VMO: (h, new_size) -> 0 or error
    VmoResize = 0x3_0003,
    /// Map a VMO range into the caller's address space: (h, vaddr_hint, offset, len, rights) -> vaddr
    VmoMap = 0x3_0004,
    /// Unmap a previously mapped range: (vaddr, len) -> 0 or error
    VmoUnmap = 0x3_0005,

    // Channel family (0x4_0000 - 0x4_FFFF)
    /// Create a connected endpoint pair: (out_handles_ptr) -> 0 or error
    ChannelCreate = 0x4_0000,
    /// Send bytes plus transferred handles: (h, buf_ptr, buf_len, handles_ptr, handles_len) -> 0 or error
    ChannelSend = 0x4_0001,
    /// Blocking receive: (h, buf_ptr, buf_len, deadline) -> msg_len or error
    ChannelRecv = 0x4_0002,
    /// Non-blocking receive: (h, buf_ptr, buf_len) -> msg_len or would-block
    ChannelTryRecv = 0x4_0003,
    /// Receive bytes and transferred handles together: (h, buf_ptr, buf_len, handles_out_ptr, deadline) -> msg_len or error.
    /// `handles_out_ptr` names a fixed `MAX_MESSAGE_HANDLES`-slot array of
    /// `HandleSlot`; unused trailing slots are sentinel `INVALID_HANDLE`
    /// (there is no separate out-length argument — the register budget for a
    /// single syscall caps at four arguments beyond the handle).
    ChannelRecvMsg = 0x4_0004,

    // Process / thread family (0x5_0000 - 0x5_FFFF)
    /// Spawn a new process from an image: (path_ptr, path_len, argc, argv_ptr, parent_channel_out_ptr) -> process handle.
    /// If `parent_channel_out_ptr` is non-zero, the handle for the caller's
    /// end of a fresh channel connected to the child's `WellKnownHandle::PARENT`
    /// is written there as a `u64`.
    Spawn = 0x5_0000,
    /// Terminate the current thread: (code) -> !
    Exit = 0x5_0001,
    /// Voluntarily give up the remainder of the current time slice: () -> 0
    Yield = 0x5_0002,
    /// Current process id: () -> pid
    GetPid = 0x5_0003,

    // Time / debug family (0x6_0000 - 0x6_FFFF)
    /// Monotonic tick counter: () -> ticks
    GetTicks = 0x6_0000,
}

impl Operation {
    /// Convert to the raw operation code.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Try to convert from a raw operation code.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x1_0000 => Some(Self::GetObj),
            0x1_0001 => Some(Self::HandleClose),
            0x1_0002 => Some(Self::HandleDup),
            0x1_0003 => Some(Self::HandleRead),
            0x1_0004 => Some(Self::HandleWrite),
            0x1_0005 => Some(Self::HandleSeek),
            0x1_0006 => Some(Self::ObjectGetInfo),
            0x2_0000 => Some(Self::NsRegister),
            0x2_0001 => Some(Self::NsUnregister),
            0x2_0002 => Some(Self::NsList),
            0x3_0000 => Some(Self::VmoCreate),
            0x3_0001 => Some(Self::VmoRead),
            0x3_0002 => Some(Self::VmoWrite),
            0x3_0003 => Some(Self::VmoResize),
            0x3_0004 => Some(Self::VmoMap),
            0x3_0005 => Some(Self::VmoUnmap),
            0x4_0000 => Some(Self::ChannelCreate),
            0x4_0001 => Some(Self::ChannelSend),
            0x4_0002 => Some(Self::ChannelRecv),
            0x4_0003 => Some(Self::ChannelTryRecv),
            0x4_0004 => Some(Self::ChannelRecvMsg),
            0x5_0000 => Some(Self::Spawn),
            0x5_0001 => Some(Self::Exit),
            0x5_0002 => Some(Self::Yield),
            0x5_0003 => Some(Self::GetPid),
            0x6_0000 => Some(Self::GetTicks),
            _ => None,
        }
    }
}

// =============================================================================
// Address space layout
// =============================================================================

/// Base address of the userspace heap region.
pub const HEAP_BASE: usize = 0x0000_0001_0000_0000;
/// Maximum size of the userspace heap (1 TB virtual address space).
pub const HEAP_MAX_SIZE: usize = 0x100_0000_0000;

/// Base address of the region VMOs are mapped into by default when
/// `vaddr_hint` is zero.
pub const VMO_MAP_BASE: usize = 0x0000_0100_0000_0000;
/// Upper bound of the VMO mapping region.
pub const VMO_MAP_MAX: usize = 0x0000_0200_0000_0000;

/// Base address of the userspace stack region; the stack grows downward
/// from `STACK_BASE + STACK_MAX_SIZE`.
pub const STACK_BASE: usize = 0x0000_7fff_fef0_0000;
/// Maximum size of the userspace stack (16 MB virtual address space).
pub const STACK_MAX_SIZE: usize = 0x100_0000;

/// Page size assumed throughout the ABI.
pub const PAGE_SIZE: usize = 4096;

// =============================================================================
// Seek
// =============================================================================

/// Seek origin, mirrors `lseek`'s `whence` argument.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// Seek from the start of the object.
    Start = 0,
    /// Seek relative to the current position.
    Current = 1,
    /// Seek relative to the end of the object.
    End = 2,
}

impl SeekFrom {
    /// Try to convert from a raw `whence` value.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Start),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

// =============================================================================
// Flags
// =============================================================================

/// Flags controlling VMO creation.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmoFlags(pub u32);

impl VmoFlags {
    /// No special behavior.
    pub const NONE: Self = Self(0);

    /// Whether the no-special-behavior bit pattern is set.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Flags controlling channel send/recv behavior.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelFlags(pub u32);

impl ChannelFlags {
    /// No special behavior.
    pub const NONE: Self = Self(0);
    /// Fail with would-block instead of parking the caller.
    pub const NONBLOCK: Self = Self(1 << 0);

    /// Whether the non-blocking bit is set.
    #[inline]
    pub const fn is_nonblock(self) -> bool {
        self.0 & Self::NONBLOCK.0 != 0
    }
}

/// Mapping protection/placement flags derived from rights at `vmo_map` time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFlags(pub u32);

impl MapFlags {
    /// No special behavior.
    pub const NONE: Self = Self(0);
    /// Place the mapping at an exact address, failing instead of relocating.
    pub const EXACT: Self = Self(1 << 0);

    /// Whether the exact-placement bit is set.
    #[inline]
    pub const fn is_exact(self) -> bool {
        self.0 & Self::EXACT.0 != 0
    }
}

// =============================================================================
// Size limits
// =============================================================================

/// Largest byte payload a single channel message may carry.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Largest number of handles a single channel message may carry.
pub const MAX_MESSAGE_HANDLES: usize = 16;

/// Default queue capacity (in messages) before `send` blocks a non-NONBLOCK caller.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

// =============================================================================
// Wire structs
// =============================================================================

/// Header for startup messages sent from parent to child over `HANDLE_PARENT`.
///
/// Layout after header:
/// - `[u16; arg_count]` - length of each argument string
/// - packed argument strings (no null terminators, use lengths above)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StartupMessageHeader {
    /// Protocol version (currently 1).
    pub version: u16,
    /// Number of argument strings.
    pub arg_count: u16,
    /// Reserved flags.
    pub flags: u32,
}

/// Parameters for spawning a new process, passed to `Operation::Spawn`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams {
    /// Pointer to the executable path string.
    pub path_ptr: usize,
    /// Length of the path string.
    pub path_len: usize,
    /// Pointer to an array of `(ptr, len)` argument pairs.
    pub argv_ptr: usize,
    /// Number of arguments in `argv_ptr`.
    pub argc: usize,
}

/// A single transferred-handles slot as laid out in a `recv_msg` out-buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HandleSlot {
    /// Tagged handle value, or `INVALID_HANDLE` if the slot is unused.
    pub handle: u64,
}

/// One namespace entry as returned by `ns_list`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NsEntry {
    /// Length of the name (not including null terminator).
    pub name_len: u8,
    /// Object type of the entry.
    pub object_type: u8,
    /// Entry name (not null-terminated, use `name_len`).
    pub name: [u8; NsEntry::NAME_MAX],
}

impl NsEntry {
    /// Maximum representable name length.
    pub const NAME_MAX: usize = 255;

    /// The entry name as a string slice.
    pub fn name(&self) -> &str {
        // Kernel only ever writes valid UTF-8 path components.
        unsafe { core::str::from_utf8_unchecked(&self.name[..self.name_len as usize]) }
    }
}

// =============================================================================
// Error codes
// =============================================================================

/// Error taxonomy returned (negated) from syscalls.
///
/// Matches the kind-not-type-name taxonomy: invalid-argument, no-such-object,
/// rights-denied, not-supported, name-exists, name-not-found, no-memory,
/// would-block, end-of-stream, truncated, timed-out, already-closed.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Argument out of range, malformed, or otherwise invalid.
    InvalidArgument = 1,
    /// The referenced object does not exist (stale or unknown handle).
    NoSuchObject = 2,
    /// The handle's rights mask does not cover the requested operation.
    RightsDenied = 3,
    /// The object's vtable does not implement the requested operation.
    NotSupported = 4,
    /// `ns_register` target path is already bound.
    NameExists = 5,
    /// Namespace lookup found no entry for the path.
    NameNotFound = 6,
    /// The physical or handle-table allocator is exhausted.
    NoMemory = 7,
    /// A non-blocking operation would otherwise have had to block.
    WouldBlock = 8,
    /// The peer endpoint is closed and its queue is drained.
    EndOfStream = 9,
    /// The caller-supplied buffer was too small; nothing was consumed.
    Truncated = 10,
    /// A deadline elapsed before the operation completed.
    TimedOut = 11,
    /// The handle named an entry that was already closed.
    AlreadyClosed = 12,
}

impl ErrorCode {
    /// The negative syscall return value for this error.
    #[inline]
    pub const fn as_retval(self) -> isize {
        -(self as i32 as isize)
    }
}
