/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use core::ptr::NonNull;
use crate::ZX_ASSERT;
use crate::debug::*;
use crate::locking::mutex::Mutex;
use crate::klib::list::{List, ListNode, Linked};
use crate::{KERNEL_ASPACE_BASE, KERNEL_ASPACE_SIZE};
use crate::{ErrNO, types::vaddr_t};
use crate::arch::mmu::{arch_zero_page, protect_pages};
use crate::defines::{PAGE_SIZE, paddr_to_physmap};
use crate::pmm::{pmm_alloc_page, PMM_ALLOC_FLAG_ANY};
use crate::vm_page_state;

use crate::vm::vmar::VmAddressRegion;
use crate::vm::vmar::{VMAR_FLAG_CAN_MAP_SPECIFIC, VMAR_CAN_RWX_FLAGS};
use crate::vm::vm::mmu_prot_from_flags;
use crate::vm::wsl::Wsl;

#[allow(dead_code)]
pub enum VmAspaceType {
    User,
    Kernel,
    /* You probably do not want to use LOW_KERNEL. It is primarily used
     * for SMP bootstrap or mexec to allow mappings of very low memory
     * using the standard VMM subsystem. */
    LowKernel,
    /* an address space representing hypervisor guest memory */
    GuestPhysical,
}

pub struct VmAspace {
    #[allow(dead_code)]
    id: usize,
    #[allow(dead_code)]
    as_type: VmAspaceType,
    #[allow(dead_code)]
    base: vaddr_t,
    #[allow(dead_code)]
    size: usize,
    root_vmar: VmAddressRegion,
    /* No separate process object exists in this tree (see kernel_aspace_init_preheap:
     * only one VmAspace is ever constructed), so the per-process working-set list
     * §4.9 describes is kept here, the closest thing to a "process" we have. */
    wsl: Wsl,
    queue_node: ListNode,
}

impl Linked<VmAspace> for VmAspace {
    fn from_node(ptr: NonNull<ListNode>) -> Option<NonNull<VmAspace>> {
        unsafe {
            Some(crate::container_of!(ptr, VmAspace, queue_node))
        }
    }

    fn into_node(&mut self) -> &mut ListNode {
        &mut (self.queue_node)
    }
}

impl VmAspace {
    fn new(id: usize, as_type: VmAspaceType, base: vaddr_t, size: usize) -> Self {
        Self {
            id,
            as_type,
            base,
            size,
            root_vmar: VmAddressRegion::new(),
            wsl: Wsl::new(),
            queue_node: ListNode::new(),
        }
    }

    fn init(&mut self) -> Result<(), ErrNO> {
        /* Only the kernel aspace is constructed today; a userspace aspace
         * would create its root vmar here. */
        Ok(())
    }

    /* Raw pointer so callers holding the ASPACE_LIST guard can reach into
     * the vmar without a second, nested lock. */
    pub fn root_vmar(&mut self) -> *mut VmAddressRegion {
        &mut self.root_vmar as *mut VmAddressRegion
    }

    pub fn wsl(&mut self) -> &mut Wsl {
        &mut self.wsl
    }

    /* Tears down every mapping in [base, base+size) and scrubs the
     * working-set list for the same range, so a stale WSL entry can't
     * outlive the VAD that justified it. */
    pub fn destroy_mapping(&mut self, base: vaddr_t, size: usize) -> Result<(), ErrNO> {
        self.root_vmar.deallocate(base, size)?;
        self.wsl.remove_range(base, size);
        Ok(())
    }

    /* Updates protection on an already-mapped range of this address space.
     * Used for physmap bookkeeping (non-arena gaps, no-execute arena
     * regions); VAD-granularity protect() lives on VmAddressRegion itself. */
    pub fn protect(&mut self, base: vaddr_t, page_count: usize, mmu_flags: usize)
        -> Result<(), ErrNO>
    {
        let size = page_count * PAGE_SIZE;
        let prot = mmu_prot_from_flags(mmu_flags);
        protect_pages(base, size, prot)
    }
}

pub static ASPACE_LIST: Mutex<List<VmAspace>> = Mutex::new(List::<VmAspace>::new());

pub fn vm_init_preheap() -> Result<(), ErrNO> {
    /* allow the vmm a shot at initializing some of its data structures */
    kernel_aspace_init_preheap()?;

    /* grab a page and mark it as the zero page. Kept for future callers
     * (e.g. demand-zero mapping of guard pages) that want a single
     * shared read-only zero-filled frame instead of allocating one. */
    let zero_page = pmm_alloc_page(PMM_ALLOC_FLAG_ANY);
    ZX_ASSERT!(!zero_page.is_null());
    unsafe {
        (*zero_page).set_state(vm_page_state::WIRED);
        let va = paddr_to_physmap((*zero_page).paddr());
        arch_zero_page(va);
    }

    Ok(())
}

fn kernel_aspace_init_preheap() -> Result<(), ErrNO> {
    let mut kernel_aspace =
        VmAspace::new(0, VmAspaceType::Kernel, KERNEL_ASPACE_BASE, KERNEL_ASPACE_SIZE);

    let flags = VMAR_FLAG_CAN_MAP_SPECIFIC | VMAR_CAN_RWX_FLAGS;
    kernel_aspace.root_vmar.init(KERNEL_ASPACE_BASE, KERNEL_ASPACE_SIZE, flags);
    kernel_aspace.init()?;

    let boxed = alloc::boxed::Box::new(kernel_aspace);
    let ptr = NonNull::new(alloc::boxed::Box::into_raw(boxed)).unwrap();

    let mut list = ASPACE_LIST.lock();
    list.init();
    list.add_tail(ptr);

    dprintf!(INFO, "kernel_aspace_init_preheap ok!\n");

    Ok(())
}

/* Returns the single kernel aspace. Panics if called before
 * vm_init_preheap() has run. */
pub fn kernel_aspace() -> NonNull<VmAspace> {
    ASPACE_LIST.lock().head().expect("kernel aspace not initialized")
}
