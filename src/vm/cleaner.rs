/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Background dirty-page writeback (§4.11). Runs once per CLEAN_PERIOD_TICKS,
 * aiming to clean every currently-dirty page within roughly
 * CLEAN_TARGET_TICKS ticks by budgeting dirty_count / CLEAN_TARGET_TICKS
 * pages per pass.
 *
 * There is no arch-level context switch in this tree (see sched::
 * block_current), so a thread created with Thread::create() and resumed
 * never actually runs: nothing ever calls its stored entry fn. maybe_run()
 * is instead polled directly from lk_main's idle loop, the one context that
 * is guaranteed to run continuously.
 *
 * Nothing in this tree marks a page dirty today: set_not_wired_locked
 * only ever takes the anonymous path (no page source preserves page
 * content, see VmCowPages::is_source_preserving_page_content), so
 * PAGE_QUEUE_PAGER_BACKED_DIRTY stays empty. The walk is still
 * implemented in full so a future vnode-backed object has somewhere
 * to land. */

use core::sync::atomic::{AtomicU64, Ordering};

use crate::page::vm_page_object;
use crate::pmm::pmm_page_queues;
use crate::sched::current_ticks;
use crate::vm::page_queues::PageQueues;

const CLEAN_PERIOD_TICKS: u64 = 100;
const CLEAN_TARGET_TICKS: usize = 30;

static LAST_RUN_TICK: AtomicU64 = AtomicU64::new(0);

/* Called from the idle loop on every tick. No-op unless CLEAN_PERIOD_TICKS
 * have passed since the last pass. */
pub fn maybe_run() {
    let now = current_ticks();
    let last = LAST_RUN_TICK.load(Ordering::Relaxed);
    if now.wrapping_sub(last) < CLEAN_PERIOD_TICKS {
        return;
    }
    LAST_RUN_TICK.store(now, Ordering::Relaxed);
    run_one_pass();
}

fn run_one_pass() {
    let pq = pmm_page_queues();
    let dirty_count = pq.count_in_queue(PageQueues::PAGE_QUEUE_PAGER_BACKED_DIRTY);
    let budget = core::cmp::max(1, dirty_count / CLEAN_TARGET_TICKS);

    for _ in 0..budget {
        let page = match pq.pop_oldest_dirty() {
            Some(p) => p.as_ptr(),
            None => break,
        };

        /* No real pmap dirty-bit harvest exists (no unmap/query-dirty in
         * arch::mmu), so cleaning degenerates to marking the page clean
         * outright and moving it back into the reclaimable pool. */
        unsafe {
            (*page).object.set_dirty_state(vm_page_object::DIRTY_STATE_CLEAN);
        }
        pq.move_to_oldest_reclaim(page);
    }
}
