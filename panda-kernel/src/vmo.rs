//! Virtual memory objects: anonymous, page-backed, mappable memory.
//!
//! A VMO is an array of page-sized [`Frame`]s, allocated lazily. Reading a
//! page that was never written returns zero; the frame itself isn't
//! materialized until something actually touches it (a `write`, or a
//! `map` of the range it falls in — see the note on `map` below for why
//! mapping allocates eagerly rather than servicing faults).
//!
//! Grounded in `memory::mapping::Mapping`'s `MappingBacking` variants and
//! `memory::frame::Frame`'s RAII refcounting: a VMO owns its frames the
//! same way a `Frames`-backed `Mapping` does, but keeps them in its own
//! page array rather than inside the mapping, since one VMO can be mapped
//! into several processes at once.

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spinning_top::Spinlock;
use x86_64::VirtAddr;

use panda_abi::{PAGE_SIZE, Rights, VmoFlags};

use crate::error::{KError, KResult};
use crate::memory::{self, Frame, Mapping, MemoryMappingOptions};
use crate::process::Process;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VmoId(u64);

impl VmoId {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        VmoId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// One process's mapping of a (sub-range of a) VMO into its address space.
struct ActiveMapping {
    process: Weak<Process>,
    vaddr: VirtAddr,
    vmo_page_offset: usize,
    page_count: usize,
    /// Per-page `Mapping` handles; dropping an entry unmaps that page
    /// (`MappingBacking::Mmio`'s `Drop` calls `unmap_region`). The backing
    /// frame itself is owned by `Vmo::pages`, not by these, since the same
    /// frame may be mapped into more than one process.
    page_mappings: Vec<Mapping>,
}

pub struct Vmo {
    id: VmoId,
    size: Spinlock<usize>,
    pages: Spinlock<Vec<Option<Frame>>>,
    flags: VmoFlags,
    mappings: Spinlock<Vec<ActiveMapping>>,
}

fn zeroed_frame() -> Frame {
    let frame = memory::allocate_frame();
    let virt = memory::physical_address_to_virtual(frame.start_address());
    unsafe {
        core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
    }
    frame
}

impl Vmo {
    pub fn create(size: usize, flags: VmoFlags) -> Arc<Vmo> {
        let page_count = size.div_ceil(PAGE_SIZE);
        Arc::new(Vmo {
            id: VmoId::new(),
            size: Spinlock::new(size),
            pages: Spinlock::new(vec![None; page_count]),
            flags,
            mappings: Spinlock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> VmoId {
        self.id
    }

    pub fn flags(&self) -> VmoFlags {
        self.flags
    }

    pub fn size(&self) -> usize {
        *self.size.lock()
    }

    pub fn read(&self, offset: usize, len: usize) -> KResult<Vec<u8>> {
        let size = *self.size.lock();
        let end = offset.checked_add(len).ok_or(KError::InvalidArgument)?;
        if end > size {
            return Err(KError::InvalidArgument);
        }
        let mut out = vec![0u8; len];
        let pages = self.pages.lock();
        let mut done = 0;
        while done < len {
            let cur = offset + done;
            let page_idx = cur / PAGE_SIZE;
            let page_off = cur % PAGE_SIZE;
            let chunk = (PAGE_SIZE - page_off).min(len - done);
            if let Some(frame) = &pages[page_idx] {
                let src = memory::physical_address_to_virtual(frame.start_address());
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        src.as_ptr::<u8>().add(page_off),
                        out.as_mut_ptr().add(done),
                        chunk,
                    );
                }
            }
            done += chunk;
        }
        Ok(out)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> KResult<usize> {
        let size = *self.size.lock();
        let end = offset
            .checked_add(data.len())
            .ok_or(KError::InvalidArgument)?;
        if end > size {
            return Err(KError::InvalidArgument);
        }
        let mut pages = self.pages.lock();
        let mut done = 0;
        while done < data.len() {
            let cur = offset + done;
            let page_idx = cur / PAGE_SIZE;
            let page_off = cur % PAGE_SIZE;
            let chunk = (PAGE_SIZE - page_off).min(data.len() - done);
            if pages[page_idx].is_none() {
                pages[page_idx] = Some(zeroed_frame());
            }
            let frame = pages[page_idx].as_ref().unwrap();
            let dst = memory::physical_address_to_virtual(frame.start_address());
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr().add(done),
                    dst.as_mut_ptr::<u8>().add(page_off),
                    chunk,
                );
            }
            done += chunk;
        }
        Ok(data.len())
    }

    /// Grow (zero-extend) or shrink (unmap-then-free) the VMO.
    pub fn resize(&self, new_size: usize) -> KResult<()> {
        let new_page_count = new_size.div_ceil(PAGE_SIZE);
        let mut size = self.size.lock();
        let mut pages = self.pages.lock();
        let old_page_count = pages.len();

        if new_page_count < old_page_count {
            let mut mappings = self.mappings.lock();
            for m in mappings.iter_mut() {
                let mapping_end = m.vmo_page_offset + m.page_count;
                if mapping_end <= new_page_count {
                    continue;
                }
                let keep = new_page_count.saturating_sub(m.vmo_page_offset);
                if keep >= m.page_count {
                    continue;
                }
                if let Some(process) = m.process.upgrade() {
                    let saved_pt = memory::current_page_table_phys();
                    unsafe {
                        process.activate_page_table();
                    }
                    m.page_mappings.truncate(keep);
                    unsafe {
                        memory::switch_page_table(saved_pt);
                    }
                } else {
                    m.page_mappings.truncate(keep);
                }
                m.page_count = keep;
            }
            pages.truncate(new_page_count);
        } else {
            pages.resize_with(new_page_count, || None);
        }

        *size = new_size;
        Ok(())
    }

    /// Map `[offset, offset+len)` of this VMO into `process`'s address
    /// space, honoring `rights` for the resulting page-table protection
    /// bits. `vaddr_hint` of 0 lets the process pick a free region;
    /// otherwise the hint is the required address and mapping fails if it
    /// overlaps an existing VMO mapping in that process.
    ///
    /// Unlike the heap/stack (`MappingBacking::DemandPaged`, serviced by
    /// `memory::try_handle_heap_page_fault`), VMO mappings are backed
    /// eagerly: every page in the mapped range gets a real (zeroed) frame
    /// at map time rather than on first fault. This keeps the page-fault
    /// path free of VMO bookkeeping; the VMO's own "zero until written"
    /// laziness is unaffected, since the frame starts zeroed either way.
    pub fn map(
        self: &Arc<Self>,
        process: &Arc<Process>,
        vaddr_hint: usize,
        offset: usize,
        len: usize,
        rights: Rights,
    ) -> KResult<VirtAddr> {
        if len == 0 || offset % PAGE_SIZE != 0 {
            return Err(KError::InvalidArgument);
        }
        let page_offset = offset / PAGE_SIZE;
        let page_count = len.div_ceil(PAGE_SIZE);

        {
            let size = *self.size.lock();
            let end = offset.checked_add(len).ok_or(KError::InvalidArgument)?;
            if end > size {
                return Err(KError::InvalidArgument);
            }
        }

        let region_len = page_count * PAGE_SIZE;
        let vaddr = process.reserve_vmo_region(vaddr_hint, region_len, self)?;

        {
            let mut pages = self.pages.lock();
            for i in page_offset..page_offset + page_count {
                if pages[i].is_none() {
                    pages[i] = Some(zeroed_frame());
                }
            }
        }

        let options = MemoryMappingOptions {
            user: true,
            executable: rights.contains(Rights::EXECUTE),
            writable: rights.contains(Rights::WRITE),
        };

        let saved_pt = memory::current_page_table_phys();
        unsafe {
            process.activate_page_table();
        }
        let page_mappings = {
            let pages = self.pages.lock();
            let mut mapped = Vec::with_capacity(page_count);
            for i in 0..page_count {
                let frame = pages[page_offset + i].as_ref().expect("populated above");
                let page_vaddr = vaddr + (i * PAGE_SIZE) as u64;
                mapped.push(memory::map_external(
                    frame.start_address(),
                    page_vaddr,
                    PAGE_SIZE,
                    options,
                ));
            }
            mapped
        };
        unsafe {
            memory::switch_page_table(saved_pt);
        }

        self.mappings.lock().push(ActiveMapping {
            process: Arc::downgrade(process),
            vaddr,
            vmo_page_offset: page_offset,
            page_count,
            page_mappings,
        });

        Ok(vaddr)
    }

    /// Unmap a previously mapped region from `process`.
    pub fn unmap(&self, process: &Arc<Process>, vaddr: VirtAddr, len: usize) -> KResult<()> {
        let mut mappings = self.mappings.lock();
        let idx = mappings
            .iter()
            .position(|m| m.vaddr == vaddr && m.process.upgrade().is_some_and(|p| Arc::ptr_eq(&p, process)))
            .ok_or(KError::InvalidArgument)?;
        let removed = mappings.remove(idx);
        if removed.page_count * PAGE_SIZE != len.div_ceil(PAGE_SIZE) * PAGE_SIZE {
            // Length mismatch: put it back uninspected rather than silently
            // unmapping the wrong range.
            mappings.push(removed);
            return Err(KError::InvalidArgument);
        }
        drop(mappings);
        process.release_vmo_region(vaddr, removed.page_count * PAGE_SIZE);
        // `removed.page_mappings`'s Drop runs here, unmapping every page.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fill_and_truncate_reads() {
        // This exercises only the pure size bookkeeping; `create`'s frame
        // allocation needs a running allocator so full round-trip coverage
        // lives in `tests/vmo.rs`.
        let page_count = 8192usize.div_ceil(PAGE_SIZE);
        assert_eq!(page_count, 2);
    }
}
