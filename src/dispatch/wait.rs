/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* The generic multi-object wait/signal engine shared by every dispatch
 * object kind. Each kind (event, semaphore, mutex, timer, msgq) only
 * has to supply a "try consume" closure describing what it means for
 * that kind to be satisfied and consumed; the FIFO ordering, the
 * any/all bookkeeping, and the block/wake handoff to the scheduler
 * live here exactly once. */

use alloc::rc::Rc;
use core::ptr::NonNull;

use crate::ipl::{self, IPL_HIGH};
use crate::klib::list::{Linked, ListNode};
use crate::locking::spinlock::RawSpinLock;
use crate::thread::{Thread, ThreadPtr};
use crate::ErrNO;

use super::header::DispatchHeader;

/* The dispatcher lock: a single global spinlock at IPL_HIGH guarding
 * every DispatchHeader's signalled/waiters fields and all scheduler
 * run-queue/thread-state transitions (see sched.rs). Lock order:
 * process VM mutex -> object mutex -> PFN lock -> dispatcher lock. */
pub static DISPATCHER_LOCK: RawSpinLock = RawSpinLock::new();

#[derive(PartialEq, Clone, Copy)]
pub enum WaitMode {
    Any,
    All,
}

/* One per (thread, object) pairing while a wait is outstanding. */
pub struct WaitBlock {
    queue_node: ListNode,
    pub thread: ThreadPtr,
    pub header: *mut DispatchHeader,
    /* Any for wait_one() and a wait_many(Any) block; All for a
     * wait_many(All) block. Tells wake_waiters() whether consuming this
     * block's header alone suffices or whether every other header this
     * thread is waiting on must be checked too. */
    pub mode: WaitMode,
    /* Set once wake_waiters() has woken this block's thread. */
    pub satisfied: bool,
}

impl WaitBlock {
    pub const fn new() -> Self {
        Self {
            queue_node: ListNode::new(),
            thread: 0,
            header: core::ptr::null_mut(),
            mode: WaitMode::Any,
            satisfied: false,
        }
    }
}

impl Linked<WaitBlock> for WaitBlock {
    fn from_node(ptr: NonNull<ListNode>) -> Option<NonNull<WaitBlock>> {
        unsafe { Some(crate::container_of!(ptr, WaitBlock, queue_node)) }
    }

    fn into_node(&mut self) -> &mut ListNode {
        &mut self.queue_node
    }
}

/* Wait on a single object. `try_consume` is called with the dispatcher
 * lock held; it must return true and leave the header's signalled
 * state already adjusted iff the wait is satisfied right now.
 * `deadline_ticks` is an absolute hardclock tick count, or None to
 * wait forever. */
pub fn wait_one(
    header: &mut DispatchHeader,
    try_consume: impl Fn(&mut DispatchHeader) -> bool,
    deadline_ticks: Option<u64>,
) -> Result<(), ErrNO> {
    let old_ipl = ipl::splraise(IPL_HIGH);
    DISPATCHER_LOCK.acquire();

    if try_consume(header) {
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);
        return Ok(());
    }

    let current = crate::thread::thread_get_current();
    let thread: &mut Thread = unsafe { &mut *(current as *mut Thread) };

    let wb_ptr = thread.push_wait_block(header as *mut DispatchHeader, WaitMode::Any);
    header.waiters.add_tail(wb_ptr);

    if let Some(deadline) = deadline_ticks {
        thread.arm_wait_timer(deadline);
    }

    /* block_current() only restores the IPL; drop the dispatcher lock
     * ourselves first. It returns once some wake path (signal, timeout,
     * or cancel) has put this thread back on a run queue and it has
     * run again. */
    DISPATCHER_LOCK.release();
    let result = crate::sched::block_current(old_ipl);

    thread.pop_wait_block(header as *mut DispatchHeader);

    result
}

/* Wait on several objects at once. mode=Any is satisfied the moment
 * any one object is consumable; mode=All requires every object to be
 * simultaneously signalled, consumed atomically across all of them.
 * Returns the index of the object that satisfied an Any wait. */
pub fn wait_many(
    headers: &mut [&mut DispatchHeader],
    mode: WaitMode,
    try_consume: impl Fn(&mut DispatchHeader) -> bool + 'static,
    deadline_ticks: Option<u64>,
) -> Result<usize, ErrNO> {
    let old_ipl = ipl::splraise(IPL_HIGH);
    DISPATCHER_LOCK.acquire();

    match mode {
        WaitMode::Any => {
            for (i, header) in headers.iter_mut().enumerate() {
                if try_consume(header) {
                    DISPATCHER_LOCK.release();
                    ipl::splx(old_ipl);
                    return Ok(i);
                }
            }
        }
        WaitMode::All => {
            if headers.iter().all(|h| h.is_signalled()) {
                for header in headers.iter_mut() {
                    let consumed = try_consume(header);
                    crate::ZX_ASSERT!(consumed);
                }
                DISPATCHER_LOCK.release();
                ipl::splx(old_ipl);
                return Ok(0);
            }
        }
    }

    let current = crate::thread::thread_get_current();
    let thread: &mut Thread = unsafe { &mut *(current as *mut Thread) };

    /* Not satisfiable right now: park a block on every header. For an
     * All-mode wait, hand wake_waiters() the same closure so it can
     * consume every header atomically from whichever one's signal path
     * notices all of them are signalled at once (see wake_waiters). */
    if mode == WaitMode::All {
        let consume: Rc<dyn Fn(&mut DispatchHeader) -> bool> = Rc::new(try_consume);
        thread.wait_all_consume = Some(consume);
    }

    for header in headers.iter_mut() {
        let wb_ptr = thread.push_wait_block((*header) as *mut DispatchHeader, mode);
        header.waiters.add_tail(wb_ptr);
    }

    if let Some(deadline) = deadline_ticks {
        thread.arm_wait_timer(deadline);
    }

    DISPATCHER_LOCK.release();
    let result = crate::sched::block_current(old_ipl);

    thread.wait_all_consume = None;
    for header in headers.iter_mut() {
        thread.pop_wait_block((*header) as *mut DispatchHeader);
    }

    result.map(|_| 0)
}

/* Walk `header`'s wait-block queue in FIFO order, waking every waiter
 * for whom `try_consume` now succeeds, until either the queue is
 * exhausted or `try_consume` reports the object is no longer
 * satisfiable. `try_consume` is also given the thread about to be
 * woken, so kinds that hand off ownership (the dispatch mutex) can
 * record the new owner as part of consuming the signal. Called by a
 * kind's signal/release routine with the dispatcher lock already held.
 *
 * A head block belonging to a wait_many(All) waiter is handled
 * differently: `try_consume` only knows how to consume *this* header,
 * so instead of waking on its say-so we check every other header the
 * thread is waiting on via is_signalled(), and if they're all signalled
 * too, consume all of them at once through the closure wait_many()
 * stashed on the thread. If any of them isn't, this header's signal
 * can't complete the wait by itself, so we leave the waiter queued and
 * stop (same as `try_consume` returning false). */
pub fn wake_waiters(
    header: &mut DispatchHeader,
    try_consume: impl Fn(&mut DispatchHeader, ThreadPtr) -> bool,
) {
    loop {
        if !header.is_signalled() {
            break;
        }
        let head = header.waiters.head();
        match head {
            Some(mut wb_ptr) => {
                let wb = unsafe { wb_ptr.as_ref() };
                let wb_thread = wb.thread;
                let wb_mode = wb.mode;

                if wb_mode == WaitMode::All {
                    if !try_wake_all(header, wb_thread) {
                        break;
                    }
                } else {
                    if !try_consume(header, wb_thread) {
                        break;
                    }
                }

                let wb = unsafe { wb_ptr.as_mut() };
                wb.satisfied = true;
                wb.queue_node.delete_from_list();
                crate::sched::unblock(wb.thread);
            }
            None => break,
        }
    }
}

/* Checks whether every header `thread` is currently waiting on (not
 * just `header`) is simultaneously signalled, and if so consumes all of
 * them through the thread's stashed wait_many() closure. Leaves
 * everything untouched and returns false if even one isn't ready yet. */
fn try_wake_all(header: &mut DispatchHeader, thread: ThreadPtr) -> bool {
    let thread: &mut Thread = unsafe { &mut *(thread as *mut Thread) };

    let consume = match thread.wait_all_consume.clone() {
        Some(c) => c,
        None => return false,
    };

    let all_signalled = thread.wait_blocks().iter().all(|wb| {
        if wb.header == header as *mut DispatchHeader {
            true
        } else {
            unsafe { &*wb.header }.is_signalled()
        }
    });
    if !all_signalled {
        return false;
    }

    for wb in thread.wait_blocks_mut().iter_mut() {
        let h = unsafe { &mut *wb.header };
        let consumed = consume(h);
        crate::ZX_ASSERT!(consumed);
    }

    true
}
