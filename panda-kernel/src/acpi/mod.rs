//! ACPI table discovery.
//!
//! Wraps the `acpi` crate's table walker behind a single global instance,
//! mapped through `handler::AcpiHandler` (which backs each table mapping
//! with a `memory::PhysicalMapping`). APIC bring-up (`apic::ioapic`) reads
//! the MADT through `with_table`.

mod handler;

use acpi::{AcpiError, AcpiTable, AcpiTables};
use spinning_top::Spinlock;
use x86_64::PhysAddr;

pub use handler::AcpiHandler;

static TABLES: Spinlock<Option<AcpiTables<AcpiHandler>>> = Spinlock::new(None);

/// Parse the ACPI table set starting from the RSDP the bootloader found.
///
/// # Safety
/// Must be called exactly once, after the UEFI memory map has been applied,
/// with a genuine RSDP physical address.
pub fn init(rsdp: PhysAddr) {
    let tables = unsafe { AcpiTables::from_rsdp(AcpiHandler, rsdp.as_u64() as usize) }
        .expect("failed to parse ACPI tables from RSDP");
    *TABLES.lock() = Some(tables);
}

/// Look up a parsed ACPI table by type and hand it to `f`.
///
/// `f` receives `None` if the table isn't present, or `init` hasn't run yet.
pub fn with_table<T: AcpiTable, R>(f: impl FnOnce(Option<&T>) -> R) -> R {
    let tables = TABLES.lock();
    match tables.as_ref() {
        Some(tables) => match tables.find_table::<T>() {
            Ok(mapping) => f(Some(&mapping)),
            Err(AcpiError::TableMissing(_)) => f(None),
            Err(e) => panic!("error reading ACPI table: {e:?}"),
        },
        None => f(None),
    }
}
