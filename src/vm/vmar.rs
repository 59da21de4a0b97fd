/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use core::cmp::max;
use alloc::vec::Vec;
use crate::ZX_ASSERT;
use crate::debug::*;
use crate::defines::PAGE_SHIFT;
use crate::errors::ErrNO;
use crate::types::vaddr_t;
use crate::vm::vm_object_paged::VmObjectPaged;

/* Allow VmMappings to be created inside the new region with the SPECIFIC
 * or OFFSET_IS_UPPER_LIMIT flag. */
pub const VMAR_FLAG_CAN_MAP_SPECIFIC: usize = 1 << 3;
/* When on a VmAddressRegion, allow VmMappings to be created inside the region
 * with read permissions.  When on a VmMapping, controls whether or not the
 * mapping can gain this permission. */
pub const VMAR_FLAG_CAN_MAP_READ: usize = 1 << 4;
/* When on a VmAddressRegion, allow VmMappings to be created inside the region
 * with write permissions.  When on a VmMapping, controls whether or not the
 * mapping can gain this permission. */
pub const VMAR_FLAG_CAN_MAP_WRITE: usize = 1 << 5;
/* When on a VmAddressRegion, allow VmMappings to be created inside the region
 * with execute permissions.  When on a VmMapping, controls whether or not the
 * mapping can gain this permission. */
pub const VMAR_FLAG_CAN_MAP_EXECUTE: usize = 1 << 6;

pub const VMAR_CAN_RWX_FLAGS: usize = VMAR_FLAG_CAN_MAP_READ |
    VMAR_FLAG_CAN_MAP_WRITE | VMAR_FLAG_CAN_MAP_EXECUTE;

/* VAD inheritance on fork; this kernel never forks a user process, but the
 * field is kept so VmAddressRegion matches the data model §3 describes. */
#[allow(dead_code)]
#[derive(Clone, Copy, PartialEq)]
pub enum VmarInheritance {
    Copy,
    Shared,
    NoneOnFork,
}

pub struct VmAddressRegion {
    pub base: vaddr_t,
    pub size: usize,
    pub flags: usize,
    children: Vec<VmAddressRegion>,

    /* Only meaningful on leaf (mapping) entries created by map(). */
    is_mapping: bool,
    protection: usize,
    max_protection: usize,
    inheritance: VmarInheritance,
    /* Byte offset into the backing object at which this mapping starts. */
    object_offset: usize,
    /* Owning reference to the pageable object backing this mapping.
     * Null on sub-regions (non-leaf VMARs). */
    object: *mut VmObjectPaged,
}

impl VmAddressRegion {
    pub const fn new() -> Self {
        Self {
            base: 0,
            size: 0,
            flags: 0,
            children: Vec::new(),
            is_mapping: false,
            protection: 0,
            max_protection: 0,
            inheritance: VmarInheritance::Copy,
            object_offset: 0,
            object: core::ptr::null_mut(),
        }
    }

    pub fn init(&mut self, base: vaddr_t, size: usize, flags: usize) {
        self.base = base;
        self.size = size;
        self.flags = flags;
    }

    fn cover_range(&self, base: vaddr_t, size: usize) -> bool {
        /*
         * NOTE: DON'T compare end of the range directly, as:
         * (base + size) <= (self.base + self.size)
         * Typically, the value end may overbound and become ZERO!
         */
        let offset = base - self.base;
        base >= self.base && offset < self.size && self.size - offset >= size
    }

    pub fn insert_child(&mut self, child: Self) {
        /* Validate we are a correct child of our parent. */
        ZX_ASSERT!(self.cover_range(child.base, child.size));

        let start = child.base;
        let end = start + child.size;
        match self.children.iter().position(|r| r.base >= end) {
            Some(index) => self.children.insert(index, child),
            None => self.children.push(child),
        }
    }

    /* map(object, size, offset, prot, max_prot, inheritance, addr) — §4.8.
     * Allocates address space from this vmar (exact if `addr` is Some and
     * the region allows VMAR_FLAG_CAN_MAP_SPECIFIC, otherwise any-fit) and
     * installs a VAD referencing `object`. Returns the chosen base. */
    pub fn map(&mut self, object: *mut VmObjectPaged, size: usize, offset: usize,
        prot: usize, max_prot: usize, inheritance: VmarInheritance,
        addr: Option<vaddr_t>) -> Result<vaddr_t, ErrNO>
    {
        if size == 0 || !IS_PAGE_ALIGNED!(size) {
            return Err(ErrNO::InvalidArgs);
        }
        if (prot & !max_prot) != 0 {
            return Err(ErrNO::InvalidArgs);
        }

        let base = match addr {
            Some(base) => {
                if (self.flags & VMAR_FLAG_CAN_MAP_SPECIFIC) == 0 {
                    return Err(ErrNO::InvalidArgs);
                }
                if !IS_PAGE_ALIGNED!(base) || !self.cover_range(base, size) {
                    return Err(ErrNO::InvalidArgs);
                }
                if self.overlaps_any_child(base, size) {
                    return Err(ErrNO::AlreadyExists);
                }
                base
            }
            None => self.alloc_spot_locked(size, PAGE_SHIFT, prot, self.base + self.size),
        };

        let mut mapping = VmAddressRegion::new();
        mapping.base = base;
        mapping.size = size;
        mapping.flags = self.flags;
        mapping.is_mapping = true;
        mapping.protection = prot;
        mapping.max_protection = max_prot;
        mapping.inheritance = inheritance;
        mapping.object_offset = offset;
        mapping.object = object;

        self.insert_child(mapping);

        Ok(base)
    }

    /* allocate(size) — map() with a fresh anonymous object. The object
     * itself is created by the caller (the per-process address-space
     * layer), since VmAddressRegion has no notion of a current process. */
    pub fn allocate(&mut self, object: *mut VmObjectPaged, size: usize,
        prot: usize, addr: Option<vaddr_t>) -> Result<vaddr_t, ErrNO>
    {
        self.map(object, size, 0, prot, prot, VmarInheritance::Copy, addr)
    }

    /* deallocate(base, size) — §4.8. Wholly-contained mappings are removed
     * outright; mappings only partially overlapping [base, base+size) are
     * split so the covered portion is removed and the remainder survives.
     * Released mapping objects are handed back to the caller so it can
     * drop their VMO reference and scrub any WSL/pmap entries. */
    pub fn deallocate(&mut self, base: vaddr_t, size: usize) -> Result<Vec<Self>, ErrNO> {
        if size == 0 || !IS_PAGE_ALIGNED!(base) || !IS_PAGE_ALIGNED!(size) {
            return Err(ErrNO::InvalidArgs);
        }
        let end = base + size;

        let mut removed = Vec::new();
        let mut survivors = Vec::new();

        for child in self.children.drain(..) {
            let child_end = child.base + child.size;
            if child_end <= base || child.base >= end {
                /* Wholly outside the range. */
                survivors.push(child);
                continue;
            }

            if child.base >= base && child_end <= end {
                /* Wholly contained: remove entirely. */
                removed.push(child);
                continue;
            }

            /* Partial overlap: split. Keep the piece(s) outside the range,
             * drop the piece inside it. A mapping can straddle both edges
             * of the range, in which case it splits into two survivors. */
            if child.base < base {
                let mut left = VmAddressRegion::new();
                left.base = child.base;
                left.size = base - child.base;
                left.flags = child.flags;
                left.is_mapping = child.is_mapping;
                left.protection = child.protection;
                left.max_protection = child.max_protection;
                left.inheritance = child.inheritance;
                left.object_offset = child.object_offset;
                left.object = child.object;
                survivors.push(left);
            }
            if child_end > end {
                let mut right = VmAddressRegion::new();
                right.base = end;
                right.size = child_end - end;
                right.flags = child.flags;
                right.is_mapping = child.is_mapping;
                right.protection = child.protection;
                right.max_protection = child.max_protection;
                right.inheritance = child.inheritance;
                right.object_offset = child.object_offset + (end - child.base);
                right.object = child.object;
                survivors.push(right);
            }

            let mut middle = VmAddressRegion::new();
            middle.base = max(child.base, base);
            middle.size = core::cmp::min(child_end, end) - middle.base;
            middle.is_mapping = child.is_mapping;
            middle.object = child.object;
            removed.push(middle);
        }

        survivors.sort_by_key(|r| r.base);
        self.children = survivors;

        Ok(removed)
    }

    /* protect(base, size, new_prot) — §4.8. Requires an existing mapping
     * that exactly covers [base, base+size); new_prot must be a subset of
     * that mapping's max_protection. */
    pub fn protect(&mut self, base: vaddr_t, size: usize, new_prot: usize)
        -> Result<(), ErrNO>
    {
        if size == 0 || !IS_PAGE_ALIGNED!(base) || !IS_PAGE_ALIGNED!(size) {
            return Err(ErrNO::InvalidArgs);
        }

        let child = self.children.iter_mut()
            .find(|c| c.base == base && c.size == size && c.is_mapping)
            .ok_or(ErrNO::InvalidArgs)?;

        if (new_prot & !child.max_protection) != 0 {
            return Err(ErrNO::InvalidArgs);
        }

        child.protection = new_prot;
        Ok(())
    }

    fn overlaps_any_child(&self, base: vaddr_t, size: usize) -> bool {
        let end = base + size;
        self.children.iter().any(|c| c.base < end && base < c.base + c.size)
    }

    pub fn protection(&self) -> usize {
        self.protection
    }

    pub fn max_protection(&self) -> usize {
        self.max_protection
    }

    pub fn object_offset(&self) -> usize {
        self.object_offset
    }

    pub fn object(&self) -> *mut VmObjectPaged {
        self.object
    }

    pub fn is_mapping(&self) -> bool {
        self.is_mapping
    }

    /* Finds the leaf mapping (if any) whose range contains `vaddr`. Used
     * by the fault handler to resolve a faulting address to a VAD. */
    pub fn find_mapping(&self, vaddr: vaddr_t) -> Option<&VmAddressRegion> {
        for child in &self.children {
            if vaddr >= child.base && vaddr < child.base + child.size {
                if child.is_mapping {
                    return Some(child);
                }
                return child.find_mapping(vaddr);
            }
        }
        None
    }

    pub fn find_mapping_mut(&mut self, vaddr: vaddr_t) -> Option<&mut VmAddressRegion> {
        for child in &mut self.children {
            if vaddr >= child.base && vaddr < child.base + child.size {
                if child.is_mapping {
                    return Some(child);
                }
                return child.find_mapping_mut(vaddr);
            }
        }
        None
    }

    /*
     * Perform allocations for VMARs. This allocator works by choosing uniformly
     * at random from a set of positions that could satisfy the allocation.
     * The set of positions are the 'left' most positions of the address space
     * and are capped by the address entropy limit. The entropy limit is retrieved
     * from the address space, and can vary based on whether the user has
     * requested compact allocations or not.
     */
    pub fn alloc_spot_locked(&mut self, size: usize, align_pow2: usize,
                             _arch_mmu_flags: usize, upper_limit: vaddr_t)
        -> vaddr_t
    {
        ZX_ASSERT!(size > 0 && IS_PAGE_ALIGNED!(size));
        dprintf!(INFO, "aspace size 0x{:x} align {} upper_limit 0x{:x}\n",
                 size, align_pow2, upper_limit);

        let align_pow2 = max(align_pow2, PAGE_SHIFT);
        let alloc_spot = self.get_alloc_spot(align_pow2, size,
            self.base, self.size, upper_limit);
        /* Sanity check that the allocation fits. */
        let (_, overflowed) = alloc_spot.overflowing_add(size - 1);
        ZX_ASSERT!(!overflowed);
        return alloc_spot;
    }

    /* Get the allocation spot that is free and large enough for the aligned size. */
    fn get_alloc_spot(&mut self, align_pow2: usize, size: usize,
        parent_base: vaddr_t, parent_size: usize, upper_limit: vaddr_t) -> vaddr_t {
        let (alloc_spot, found) =
            self.find_alloc_spot_in_gaps(size, align_pow2, parent_base, parent_size, upper_limit);
        ZX_ASSERT!(found);

        let align: vaddr_t = 1 << align_pow2;
        ZX_ASSERT!(IS_ALIGNED!(alloc_spot, align));
        return alloc_spot;
    }

    /* Try to find the spot among all the gaps. */
    fn find_alloc_spot_in_gaps(&mut self, size: usize, align_pow2: usize,
        parent_base: vaddr_t, parent_size: vaddr_t, upper_limit: vaddr_t) -> (vaddr_t, bool) {
        let align = 1 << align_pow2;
        /* Found indicates whether we have found the spot with index |selected_indexes|. */
        let mut found = false;
        /* alloc_spot is the virtual start address of the spot to allocate if we find one. */
        let mut alloc_spot: vaddr_t = 0;
        let func = |gap_base: vaddr_t, gap_len: usize| {
            ZX_ASSERT!(IS_ALIGNED!(gap_base, align));
            if gap_len < size || gap_base + size > upper_limit {
                /* Ignore gap that is too small or out of range. */
                return true;
            }
            found = true;
            alloc_spot = gap_base;
            return false;
        };

        self.for_each_gap(func, align_pow2, parent_base, parent_size);

        (alloc_spot, found)
    }

    /* Utility for allocators for iterating over gaps between allocations.
     * F should have a signature of bool func(vaddr_t gap_base, size_t gap_size).
     * If func returns false, the iteration stops.
     * And gap_base will be aligned in accordance with align_pow2. */
    fn for_each_gap<F>(&mut self, mut func: F, align_pow2: usize, parent_base: vaddr_t, parent_size: usize)
    where F: FnMut(usize, usize) -> bool {
        let align = 1 << align_pow2;

        /* Scan the regions list to find the gap to the left of each region.
         * We round up the end of the previous region to the requested alignment,
         * so all gaps reported will be for aligned ranges. */
        let mut prev_region_end = ROUNDUP!(parent_base, align);
        for child in &self.children {
            if child.base > prev_region_end {
                let gap = child.base - prev_region_end;
                if !func(prev_region_end, gap) {
                    return;
                }
            }
            let (end, ret) = child.base.overflowing_add(child.size);
            if ret {
                /* This region is already the last region. */
                return;
            }
            prev_region_end = ROUNDUP!(end, align);
        }

        /* Grab the gap to the right of the last region. Note that if there are
         * no regions, this handles reporting the VMAR's whole span as a gap. */
         if parent_size > prev_region_end - parent_base {
            /* This is equal to parent_base + parent_size - prev_region_end,
             * but guarantee no overflow. */
            let gap = parent_size - (prev_region_end - parent_base);
            func(prev_region_end, gap);
        }
    }

}
