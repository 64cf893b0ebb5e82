#![no_main]
#![no_std]

extern crate alloc;

use ::uefi::{Status, entry};
use log::info;
use panda_kernel::{job, process::Process, scheduler, uefi};

#[entry]
fn main() -> Status {
    let uefi_info = uefi::init_and_exit_boot_services();
    let init_program = unsafe { &*uefi_info.init_program };

    panda_kernel::init(&uefi_info);

    info!("Panda OS");

    let init_process =
        Process::from_elf_data(init_program, &job::root()).expect("failed to load init program");
    scheduler::init(&init_process);

    unsafe { scheduler::exec_next_runnable() }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use log::error;
    use x86_64::instructions::hlt;

    let file = info.location().map(|l| l.file()).unwrap_or("unknown");
    let line = info.location().map(|l| l.line()).unwrap_or(0);

    error!("PANIC at [{}:{}]:\n{}", file, line, info.message());
    panda_kernel::breakpoint();
    loop {
        hlt();
    }
}
