/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::types::*;
use crate::errors::ErrNO;
use alloc::vec::Vec;
use crate::debug::*;
use crate::{dprintf, print, ZX_DEBUG_ASSERT};
use crate::klib::range::intersects;
use spin::Mutex;

pub const MAX_RESERVES: usize = 64;

#[derive(Default)]
pub struct BootReserveRange {
    pub pa: paddr_t,
    pub len: usize,
}

static RESERVE_RANGES: Mutex<Vec<BootReserveRange>> = Mutex::new(Vec::new());

pub fn boot_reserve_init(pa: paddr_t, len: usize) -> Result<(), ErrNO> {
    /* add the kernel to the boot reserve list */
    boot_reserve_add_range(pa, len)
}

fn boot_reserve_add_range(pa: usize, len: usize) -> Result<(), ErrNO> {
    dprintf!(INFO, "PMM: boot reserve add [0x{:x}, 0x{:x}]\n",
             pa, pa + len - 1);

    let mut res = RESERVE_RANGES.lock();
    if res.len() == (MAX_RESERVES - 1) {
        panic!("too many boot reservations");
    }

    /* insert into the list, sorted */
    let end: paddr_t = pa + len - 1;
    ZX_DEBUG_ASSERT!(end > pa);

    let mut i = 0;
    while i < res.len() {
        if intersects(res[i].pa, res[i].len, pa, len) {
            /* we have a problem that we are not equipped to handle right now */
            panic!("pa {:x} len {:x} intersects existing range", pa, len);
        }

        if res[i].pa > end {
            break;
        }

        i += 1;
    }

    let range = BootReserveRange{pa: pa, len: len};
    res.insert(i, range);

    dprintf!(INFO, "Boot reserve #range {}\n", res.len());
    Ok(())
}

/* Finds and reserves a chunk of |size| bytes inside [base, base+arena_size)
 * that does not overlap any range already on the boot reserve list, biased
 * towards the top of the arena so it tends to collide least with whatever
 * the arena is actually going to be used for. The chunk found is itself
 * immediately added to the reserve list and handed back through |range|. */
pub fn boot_reserve_range_search(base: paddr_t, arena_size: usize,
                                  size: usize, range: &mut BootReserveRange)
    -> Result<(), ErrNO> {
    if size == 0 || size > arena_size {
        return Err(ErrNO::NoMem);
    }

    let mut candidate_end = base + arena_size;

    loop {
        if candidate_end < base + size {
            return Err(ErrNO::NoMem);
        }
        let candidate_start = candidate_end - size;

        let overlap = {
            let res = RESERVE_RANGES.lock();
            let mut found = None;
            for r in res.iter() {
                if intersects(r.pa, r.len, candidate_start, size) {
                    found = Some(r.pa);
                    break;
                }
            }
            found
        };

        match overlap {
            None => {
                boot_reserve_add_range(candidate_start, size)?;
                range.pa = candidate_start;
                range.len = size;
                return Ok(());
            }
            Some(pa) => {
                candidate_end = pa;
            }
        }
    }
}
