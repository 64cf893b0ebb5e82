//! Context switching for preemptive multitasking.
//!
//! Contains the naked assembly entry point for preemptable interrupts and
//! the logic for deciding when to preempt the current thread.

use crate::apic;
use crate::process::{InterruptFrame, SavedGprs, SavedState};
use crate::syscall::user_code_selector;
use crate::thread::ThreadState;

use super::{SCHEDULER, TIME_SLICE_MS, exec_next_runnable, start_timer, start_timer_with_deadline};

/// Generates a naked assembly entry point for a preemptable interrupt handler.
///
/// This saves all general-purpose registers before calling the specified handler,
/// allowing the handler to capture the full CPU state for context switching.
///
/// # Safety
/// The generated function is only safe to use as an interrupt handler registered in the IDT.
macro_rules! preemptable_interrupt_entry {
    ($handler:ident) => {{
        #[unsafe(naked)]
        extern "C" fn entry() {
            core::arch::naked_asm!(
                "clac",
                "push rax",
                "push rbx",
                "push rcx",
                "push rdx",
                "push rsi",
                "push rdi",
                "push rbp",
                "push r8",
                "push r9",
                "push r10",
                "push r11",
                "push r12",
                "push r13",
                "push r14",
                "push r15",

                "mov rdi, rsp",
                "lea rsi, [rsp + 120]",

                "call {handler}",

                "pop r15",
                "pop r14",
                "pop r13",
                "pop r12",
                "pop r11",
                "pop r10",
                "pop r9",
                "pop r8",
                "pop rbp",
                "pop rdi",
                "pop rsi",
                "pop rdx",
                "pop rcx",
                "pop rbx",
                "pop rax",

                "iretq",
                handler = sym $handler,
            )
        }
        entry
    }};
}

pub(crate) use preemptable_interrupt_entry;

/// Timer interrupt handler called from the naked entry point.
///
/// Decides whether to preempt the current thread and switch to another. If
/// switching, this function does not return — it jumps to `exec_next_runnable`.
pub(crate) extern "sysv64" fn timer_interrupt_handler(
    saved_gprs: *const SavedGprs,
    interrupt_frame: *const InterruptFrame,
) {
    apic::eoi();

    crate::time::tick(TIME_SLICE_MS as u64);

    let woken_count = {
        let now = crate::time::uptime_ms();
        if let Some(mut scheduler) = SCHEDULER.try_write() {
            scheduler
                .as_mut()
                .map(|s| s.wake_deadline_threads(now))
                .unwrap_or(0)
        } else {
            0
        }
    };

    let should_switch = {
        if let Some(scheduler) = SCHEDULER.try_read() {
            let scheduler = scheduler.as_ref().unwrap();
            woken_count > 0 || scheduler.has_other_runnable()
        } else {
            false
        }
    };

    if !should_switch {
        start_timer_with_deadline();
        return;
    }

    // Only preempt if we interrupted userspace (ring 3). If we're in kernel
    // mode, don't preempt — the timer is restarted when we next jump to
    // userspace.
    let frame = unsafe { &*interrupt_frame };
    if frame.cs != user_code_selector() as u64 {
        return;
    }

    let gprs = unsafe { &*saved_gprs };
    let state = SavedState::from_interrupt(gprs, frame);
    unsafe {
        preempt_current(state);
    }
}

/// Preempt the current thread: save its state and switch to the next runnable.
///
/// # Safety
/// This function does not return. It switches to a different thread.
unsafe fn preempt_current(state: SavedState) -> ! {
    {
        let mut scheduler = SCHEDULER.write();
        let scheduler = scheduler
            .as_mut()
            .expect("Scheduler has not been initialized");

        let tid = scheduler.current_thread_id();
        let thread = scheduler
            .threads
            .get(&tid)
            .expect("Current thread not found")
            .clone();

        thread.save_state(state);
        scheduler.change_state(tid, ThreadState::Runnable);
    }

    start_timer();
    unsafe {
        exec_next_runnable();
    }
}
