/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Low-memory reclaim daemon (§4.11). Once signal_low_memory() has latched
 * LOW_MEMORY, maybe_run() pops pages off the inactive (reclaimable) queues
 * and evicts them to the swap drum until the free count clears a high-water
 * mark. pop_oldest_reclaimable() never touches the pager-backed-dirty
 * queue, so reclamation here never races a page the cleaner hasn't written
 * back yet.
 *
 * There is no arch-level context switch in this tree (see sched::
 * block_current), so a thread created with Thread::create() and resumed
 * never actually runs: nothing ever calls its stored entry fn. maybe_run()
 * is instead polled directly from lk_main's idle loop, the one context that
 * is guaranteed to run continuously, in place of sleeping on an event. */

use core::sync::atomic::{AtomicBool, Ordering};

use crate::debug::*;
use crate::errors::ErrNO;
use crate::page::vm_page_t;
use crate::pmm::{pmm_free_count, pmm_page_queues};

/* Once signalled, reclaim until this many free pages are available. */
const HIGH_WATER_FREE_PAGES: u64 = 64;

static LOW_MEMORY: AtomicBool = AtomicBool::new(false);

/* Latches a pending reclaim. Called from pmm when a page allocation finds
 * the free list empty. */
pub fn signal_low_memory() {
    LOW_MEMORY.store(true, Ordering::Relaxed);
}

/* Called from the idle loop on every tick. No-op unless signal_low_memory()
 * has latched a pending reclaim since the last pass. */
pub fn maybe_run() {
    if LOW_MEMORY.swap(false, Ordering::Relaxed) {
        reclaim_until_high_water();
    }
}

fn reclaim_until_high_water() {
    let pq = pmm_page_queues();

    while pmm_free_count() < HIGH_WATER_FREE_PAGES {
        let page = match pq.pop_oldest_reclaimable() {
            Some(p) => p.as_ptr(),
            None => break,
        };
        if let Err(e) = evict_one(page) {
            dprintf!(WARN, "pagedaemon: evict failed: {:?}\n", e);
            break;
        }
    }
}

fn evict_one(page: *mut vm_page_t) -> Result<(), ErrNO> {
    let (object, offset) = unsafe {
        ((*page).object.get_object(), (*page).object.get_page_offset())
    };
    if object == 0 {
        return Ok(());
    }

    let cow = object as *mut crate::vm::vm_cow_pages::VmCowPages;
    unsafe { (*cow).evict_to_swap(offset, page) }
}
