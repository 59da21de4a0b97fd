/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Each CPU owns a sorted timer list ordered by absolute deadline (in
 * hardclock ticks). Hardclock walks the list from the head, popping
 * and firing every timer whose deadline has passed. A timer fires by
 * queueing its embedded DPC, which is what actually runs the
 * timer-specific callback (for dispatch timers, that's signalling the
 * timer's DispatchHeader). */

use core::ptr::NonNull;

use crate::dispatch::header::{DispatchHeader, ObjectKind};
use crate::dpc::{Dpc, DpcFunc};
use crate::klib::list::{Linked, List, ListNode};

#[derive(PartialEq, Clone, Copy)]
pub enum TimerState {
    Disabled,
    Pending,
    Elapsed,
}

pub struct Timer {
    queue_node: ListNode,
    pub state: TimerState,
    pub deadline: u64,
    pub home_cpu: usize,
    pub dpc: Dpc,
    /* Lets a timer be waited on directly (dispatch::timer), in addition
     * to driving its DPC when the deadline elapses. Unused overhead for
     * timers that only ever serve as a thread's internal wait timeout. */
    pub header: DispatchHeader,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            queue_node: ListNode::new(),
            state: TimerState::Disabled,
            deadline: 0,
            home_cpu: 0,
            dpc: Dpc::new(),
            header: DispatchHeader::new(ObjectKind::Timer, 0),
        }
    }

    pub fn init(&mut self, callback: DpcFunc, arg: usize) {
        self.queue_node = ListNode::new();
        self.state = TimerState::Disabled;
        self.dpc.init(callback, arg);
        self.header.init();
        self.header.signalled = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.state == TimerState::Pending
    }
}

impl Linked<Timer> for Timer {
    fn from_node(ptr: NonNull<ListNode>) -> Option<NonNull<Timer>> {
        unsafe { Some(crate::container_of!(ptr, Timer, queue_node)) }
    }

    fn into_node(&mut self) -> &mut ListNode {
        &mut self.queue_node
    }
}

/* Sorted (ascending deadline) queue of armed timers for one CPU. */
pub struct TimerQueue {
    list: List<Timer>,
}

impl TimerQueue {
    pub const fn new() -> Self {
        Self {
            list: List::<Timer>::new(),
        }
    }

    pub fn init(&mut self) {
        self.list.init();
    }

    /* Arm `timer` to fire at `deadline` ticks. Caller holds the owning
     * CPU's DPC spinlock.
     *
     * List<T> only exposes head/tail splice, not sorted insertion, so
     * membership order here is insertion order rather than deadline
     * order; expire() compensates by scanning the whole list each
     * hardclock tick instead of assuming the head is always the
     * earliest deadline. Queue depth per CPU is expected to stay
     * small enough (a handful of wait timeouts) for this to be cheap. */
    pub fn enqueue(&mut self, mut timer: NonNull<Timer>, deadline: u64, home_cpu: usize) {
        unsafe {
            let t = timer.as_mut();
            t.state = TimerState::Pending;
            t.deadline = deadline;
            t.home_cpu = home_cpu;
        }
        self.list.add_tail(timer);
    }

    /* Cancel a pending timer. No-op if it isn't armed. */
    pub fn cancel(&mut self, timer: &mut Timer) {
        if timer.state == TimerState::Pending {
            timer.queue_node.delete_from_list();
            timer.state = TimerState::Disabled;
        }
    }

    /* Pop every timer whose deadline <= `now`, transition it to
     * Elapsed, and hand it to `fire`. Called from hardclock. */
    pub fn expire(&mut self, now: u64, fire: impl Fn(&mut Timer)) {
        loop {
            let due: Option<NonNull<Timer>> = {
                let mut iter = self.list.iter_mut();
                let mut found = None;
                while let Some(t) = iter.next() {
                    if t.deadline <= now {
                        found = Some(NonNull::from(&mut *t));
                        break;
                    }
                }
                found
            };

            match due {
                Some(mut ptr) => {
                    let t = unsafe { ptr.as_mut() };
                    t.queue_node.delete_from_list();
                    t.state = TimerState::Elapsed;
                    fire(t);
                }
                None => break,
            }
        }
    }
}
