/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* A small boundary-tag virtual address arena, in the spirit of the
 * classic Solaris vmem allocator: a parent range is handed out in
 * spans on request, and free spans are kept in a tree ordered by
 * base address so neighbours can be found and merged on free. */

use crate::errors::ErrNO;
use crate::klib::rbtree::RBTree;
use crate::types::vaddr_t;

pub struct Vmem {
    base: vaddr_t,
    size: usize,
    quantum: usize,
    free_by_base: RBTree<vaddr_t, usize>,
    allocated: RBTree<vaddr_t, usize>,
}

impl Vmem {
    pub const fn new() -> Self {
        Self {
            base: 0,
            size: 0,
            quantum: 1,
            free_by_base: RBTree::new(),
            allocated: RBTree::new(),
        }
    }

    /* Seed the arena with a single free span covering [base, base + size). */
    pub fn init(&mut self, base: vaddr_t, size: usize, quantum: usize) {
        self.base = base;
        self.size = size;
        self.quantum = if quantum == 0 { 1 } else { quantum };
        self.free_by_base = RBTree::new();
        self.allocated = RBTree::new();
        self.free_by_base.insert(base, size);
    }

    pub fn base(&self) -> vaddr_t {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn align_up(&self, v: usize) -> usize {
        let q = self.quantum;
        (v + q - 1) & !(q - 1)
    }

    /* First-fit search for a free span that can hold `size` bytes at the
     * requested alignment. Any padding in front, and any leftover tail,
     * are kept as new free spans. */
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<vaddr_t, ErrNO> {
        if size == 0 {
            return Err(ErrNO::InvalidArgs);
        }
        let size = self.align_up(size);
        let align = if align == 0 { self.quantum } else { align };

        let mut found: Option<(vaddr_t, usize, vaddr_t, usize)> = None;
        for (base, len) in self.free_by_base.iter() {
            let base = *base;
            let len = *len;
            let aligned = (base + align - 1) & !(align - 1);
            let pad = aligned - base;
            if pad + size <= len {
                found = Some((base, len, aligned, pad));
                break;
            }
        }

        let (base, len, aligned, pad) = found.ok_or(ErrNO::NoResources)?;
        self.free_by_base.remove(&base);

        if pad > 0 {
            self.free_by_base.insert(base, pad);
        }
        let tail = len - pad - size;
        if tail > 0 {
            self.free_by_base.insert(aligned + size, tail);
        }

        self.allocated.insert(aligned, size);
        Ok(aligned)
    }

    /* Return a span to the free pool, coalescing with any free span
     * that directly abuts it on either side. */
    pub fn free(&mut self, addr: vaddr_t, size: usize) {
        let size = self.align_up(size);
        self.allocated.remove(&addr);

        let mut base = addr;
        let mut len = size;

        if let Some(&next_len) = self.free_by_base.get(&(base + len)) {
            self.free_by_base.remove(&(base + len));
            len += next_len;
        }

        let mut prev: Option<(vaddr_t, usize)> = None;
        for (b, l) in self.free_by_base.iter() {
            if *b + *l == base {
                prev = Some((*b, *l));
                break;
            }
        }
        if let Some((prev_base, prev_len)) = prev {
            self.free_by_base.remove(&prev_base);
            base = prev_base;
            len += prev_len;
        }

        self.free_by_base.insert(base, len);
    }

    /* Size of the outstanding allocation starting at `addr`, if any. */
    pub fn allocated_size(&self, addr: vaddr_t) -> Option<usize> {
        self.allocated.get(&addr).copied()
    }
}

unsafe impl Send for Vmem {}
