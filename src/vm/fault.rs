/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Top level page fault handler (§4.10). Resolves a faulting virtual
 * address against the kernel aspace's VAD tree, asks the backing
 * object's VmCowPages to resolve the page, installs the pmap entry
 * and records the page in the aspace's working-set list. */

use crate::aspace::kernel_aspace;
use crate::arch::mmu::{map_pages, protect_pages};
use crate::debug::*;
use crate::defines::PAGE_SIZE;
use crate::errors::ErrNO;
use crate::pmm::pmm_page_queues;
use crate::types::vaddr_t;
use crate::vm::vm::{mmu_prot_from_flags, ARCH_MMU_FLAG_PERM_WRITE};

pub fn page_fault(vaddr: vaddr_t, is_write: bool) -> Result<(), ErrNO> {
    let vaddr = ROUNDDOWN!(vaddr, PAGE_SIZE);

    let mut aspace = kernel_aspace();
    let aspace_ref = unsafe { aspace.as_mut() };
    let root_vmar = unsafe { &mut *aspace_ref.root_vmar() };

    let mapping = root_vmar.find_mapping_mut(vaddr).ok_or(ErrNO::Fault)?;
    if is_write && (mapping.protection() & ARCH_MMU_FLAG_PERM_WRITE) == 0 {
        return Err(ErrNO::Fault);
    }
    if mapping.object().is_null() {
        return Err(ErrNO::Fault);
    }

    let offset = mapping.object_offset() + (vaddr - mapping.base);
    let prot = mapping.protection();
    let object = mapping.object();

    let page = unsafe { (*object).cow_pages() }.lookup_page_for_fault(offset, is_write)?;
    let paddr = unsafe { (*page).paddr() };

    match map_pages(vaddr, paddr, PAGE_SIZE, mmu_prot_from_flags(prot)) {
        Ok(_) => {}
        Err(ErrNO::AlreadyExists) => {
            /* A pte was already installed at a lower protection (e.g. the
             * read-only mapping of a COW page we just copied on write).
             * There's no unmap_pages in this tree's mmu backend (see
             * arch::mmu::protect_pages, also a stub) to retire the old
             * entry and install the new one, so the best this can do is
             * attempt the no-op protect and note the gap. */
            dprintf!(INFO, "fault: pte already present at 0x{:x}, \
                      cannot repoint it to the copied page\n", vaddr);
            protect_pages(vaddr, PAGE_SIZE, mmu_prot_from_flags(prot))?;
        }
        Err(e) => return Err(e),
    }

    pmm_page_queues().mark_accessed(page);

    if let Some(evicted) = aspace_ref.wsl().on_page_in(vaddr) {
        evict_wsl_entry(evicted);
    }

    Ok(())
}

/* WSL eviction's pmap teardown step (§4.9): this backend has no real
 * unmap, so the best available stand-in is the same no-op/log stub
 * arch::mmu::protect_pages already uses for unimplemented protection
 * changes. */
fn evict_wsl_entry(vaddr: vaddr_t) {
    let _ = protect_pages(vaddr, PAGE_SIZE, 0);
}
