#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec;

use panda_abi::{Rights, VmoFlags};
use panda_kernel::error::KError;
use panda_kernel::job;
use panda_kernel::process::Process;
use panda_kernel::vmo::Vmo;

panda_kernel::test_harness!(
    read_before_write_returns_zeroes,
    write_then_read_round_trips,
    read_past_end_is_rejected,
    resize_grow_keeps_existing_bytes,
    resize_shrink_truncates,
    map_then_write_is_visible_to_vmo_read,
    unmap_then_unmap_again_fails,
);

/// Same minimal one-`PT_LOAD` ELF shape used by `elf_security.rs`, just to
/// get a `Process` with a real address space to map VMOs into.
fn create_minimal_elf_header() -> [u8; 0x200] {
    let mut elf = [0u8; 0x200];
    elf[0] = 0x7f;
    elf[1] = b'E';
    elf[2] = b'L';
    elf[3] = b'F';
    elf[4] = 2;
    elf[5] = 1;
    elf[6] = 1;
    elf[16] = 2;
    elf[17] = 0;
    elf[18] = 0x3e;
    elf[19] = 0;
    elf[20] = 1;
    let entry: u64 = 0x400000;
    elf[24..32].copy_from_slice(&entry.to_le_bytes());
    let phoff: u64 = 0x40;
    elf[32..40].copy_from_slice(&phoff.to_le_bytes());
    elf[40..48].copy_from_slice(&0u64.to_le_bytes());
    elf[52] = 64;
    elf[54] = 56;
    elf[56] = 1;
    elf
}

fn set_program_header(
    elf: &mut [u8],
    offset: usize,
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
) {
    elf[offset..offset + 4].copy_from_slice(&p_type.to_le_bytes());
    elf[offset + 4..offset + 8].copy_from_slice(&p_flags.to_le_bytes());
    elf[offset + 8..offset + 16].copy_from_slice(&p_offset.to_le_bytes());
    elf[offset + 16..offset + 24].copy_from_slice(&p_vaddr.to_le_bytes());
    elf[offset + 24..offset + 32].copy_from_slice(&p_paddr.to_le_bytes());
    elf[offset + 32..offset + 40].copy_from_slice(&p_filesz.to_le_bytes());
    elf[offset + 40..offset + 48].copy_from_slice(&p_memsz.to_le_bytes());
    elf[offset + 48..offset + 56].copy_from_slice(&p_align.to_le_bytes());
}

fn spawn_test_process() -> alloc::sync::Arc<Process> {
    let mut elf = create_minimal_elf_header();
    const PT_LOAD: u32 = 1;
    const PF_R: u32 = 4;
    const PF_X: u32 = 1;
    set_program_header(
        &mut elf, 0x40, PT_LOAD, PF_R | PF_X, 0x100, 0x400000, 0x400000, 0x80, 0x1000, 0x1000,
    );
    Process::from_elf_data(&elf, &job::root()).expect("valid test ELF should load")
}

fn read_before_write_returns_zeroes() {
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    let bytes = vmo.read(0, 16).unwrap();
    assert_eq!(bytes, vec![0u8; 16]);
}

fn write_then_read_round_trips() {
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    let payload = vec![0xABu8; 100];
    let written = vmo.write(10, &payload).unwrap();
    assert_eq!(written, payload.len());
    let back = vmo.read(10, payload.len()).unwrap();
    assert_eq!(back, payload);
    // Bytes outside the write are still zero.
    assert_eq!(vmo.read(0, 10).unwrap(), vec![0u8; 10]);
}

fn read_past_end_is_rejected() {
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    assert!(matches!(vmo.read(4090, 100), Err(KError::InvalidArgument)));
}

fn resize_grow_keeps_existing_bytes() {
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    vmo.write(0, &[1, 2, 3, 4]).unwrap();
    vmo.resize(8192).unwrap();
    assert_eq!(vmo.size(), 8192);
    assert_eq!(vmo.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(vmo.read(4096, 4).unwrap(), vec![0u8; 4]);
}

fn resize_shrink_truncates() {
    let vmo = Vmo::create(8192, VmoFlags::NONE);
    vmo.write(4096, &[9, 9, 9]).unwrap();
    vmo.resize(4096).unwrap();
    assert_eq!(vmo.size(), 4096);
    assert!(matches!(vmo.read(4096, 1), Err(KError::InvalidArgument)));
}

fn map_then_write_is_visible_to_vmo_read() {
    let process = spawn_test_process();
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    let vaddr = vmo
        .map(&process, 0, 0, 4096, Rights::READ.or(Rights::WRITE))
        .expect("map should succeed");
    assert_eq!(vaddr.as_u64() % 4096, 0);

    vmo.write(0, &[0x42; 8]).unwrap();
    let bytes = vmo.read(0, 8).unwrap();
    assert_eq!(bytes, vec![0x42u8; 8]);

    vmo.unmap(&process, vaddr, 4096).unwrap();
}

fn unmap_then_unmap_again_fails() {
    let process = spawn_test_process();
    let vmo = Vmo::create(4096, VmoFlags::NONE);
    let vaddr = vmo
        .map(&process, 0, 0, 4096, Rights::READ)
        .expect("map should succeed");
    vmo.unmap(&process, vaddr, 4096).unwrap();
    assert!(matches!(
        vmo.unmap(&process, vaddr, 4096),
        Err(KError::InvalidArgument)
    ));
}
