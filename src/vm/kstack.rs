/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::ZX_ASSERT;
use crate::pmm::PMM_ALLOC_FLAG_ANY;
use crate::types::*;
use crate::aspace::ASPACE_LIST;
use crate::errors::ErrNO;
use crate::arch::mmu::{map_pages, PAGE_KERNEL};
use crate::defines::{ARCH_DEFAULT_STACK_SIZE, PAGE_SIZE};
use crate::vm::vm_object_paged::VmObjectPaged;
use crate::vm::vmar::VmarInheritance;

use super::vmar::VmAddressRegion;

/* stack size */
pub const DEFAULT_STACK_SIZE: usize = ARCH_DEFAULT_STACK_SIZE;

struct StackType {
    name: &'static str,
    size: usize,
}

const K_SAFE: StackType = StackType {
    name: "kernel-safe-stack",
    size: DEFAULT_STACK_SIZE,
};

/* Holds the relevant metadata and pointers for an individual mapping */
struct KernelStackMapping {
    base: vaddr_t,
    size: usize,
    vmar: VmAddressRegion,
}

impl KernelStackMapping {
    const fn new() -> Self {
        Self {
            base: 0,
            size: 0,
            vmar: VmAddressRegion::new(),
        }
    }

    fn top(&self) -> vaddr_t {
        self.base + self.size
    }
}

pub struct KernelStack {
    main_map: KernelStackMapping,
}

impl KernelStack {
    pub const fn new() -> Self {
        Self {
            main_map: KernelStackMapping::new(),
        }
    }

    pub fn init(&mut self) -> Result<(), ErrNO> {
        allocate_map(K_SAFE, &mut self.main_map)
    }

    pub fn top(&self) -> vaddr_t {
        self.main_map.top()
    }
}

/* read/write, no-execute, no-user permissions for a kernel stack mapping */
const STACK_MMU_FLAGS: usize =
    crate::vm::vm::ARCH_MMU_FLAG_PERM_READ | crate::vm::vm::ARCH_MMU_FLAG_PERM_WRITE;

/* Allocates and maps a kernel stack with one page of padding
 * before and after the mapping. */
fn allocate_map(stype: StackType, map: &mut KernelStackMapping)
    -> Result<(), ErrNO>
{
    /* assert that this mapping hasn't already be created */
    ZX_ASSERT!(map.base == 0);
    ZX_ASSERT!(map.size == 0);

    /* get a handle to the root vmar */
    let aspace_list = ASPACE_LIST.lock();
    let kernel_aspace = aspace_list.head().expect("kernel aspace not initialized");
    unsafe {
        let vmar = (*kernel_aspace.as_ptr()).root_vmar();

        /* Create a VMO for our stack */
        let stack_vmo = VmObjectPaged::create(PMM_ALLOC_FLAG_ANY,
                                              VmObjectPaged::K_ALWAYS_PINNED,
                                              stype.size)?;
        (*stack_vmo).set_name(stype.name);

        /* Reserve the padded range (one guard page on each side) first, so
         * the actual stack mapping lands in the middle of a span that
         * nothing else can claim. */
        let padded_size = stype.size + 2 * PAGE_SIZE;
        let upper_limit = (*vmar).base + (*vmar).size;
        let full_base = (*vmar).alloc_spot_locked(padded_size, 0, STACK_MMU_FLAGS, upper_limit);
        let stack_base = full_base + PAGE_SIZE;

        let mapped = (*vmar).map(stack_vmo, stype.size, 0,
                                 STACK_MMU_FLAGS, STACK_MMU_FLAGS,
                                 VmarInheritance::Copy, Some(stack_base))?;
        ZX_ASSERT!(mapped == stack_base);

        /* The stack is always-pinned and never demand-faulted, so install
         * page table entries for every resident page up front. */
        let mut va = stack_base;
        let mut install = |p: &super::vm_page_list::VmPageOrMarker, _offset: usize| {
            if !p.is_page() {
                return Err(ErrNO::BadState);
            }
            let pa = (*p.page()).paddr();
            map_pages(va, pa, PAGE_SIZE, PAGE_KERNEL)?;
            va += PAGE_SIZE;
            Ok(())
        };
        (*stack_vmo).cow_pages().for_every_page(&mut install, 0, stype.size)?;

        map.base = stack_base;
        map.size = stype.size;
    }

    Ok(())
}