/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Deferred procedure calls: callbacks queued from IPL_DEVICE (or any
 * IPL >= IPL_DISPATCH) context and run at IPL_DISPATCH once the hart
 * drops back out of interrupt context. A DPC must not block and must
 * not take the dispatcher lock around anything that can sleep. */

use core::ptr::NonNull;

use crate::arch::smp::arch_curr_cpu_num;
use crate::ipl::{self, IPL_DISPATCH};
use crate::klib::list::{Linked, List, ListNode};
use crate::locking::spinlock::RawSpinLock;
use crate::percpu::PERCPU_ARRAY;
use crate::ZX_ASSERT;

pub type DpcFunc = fn(&mut Dpc);

pub struct Dpc {
    queue_node: ListNode,
    func: Option<DpcFunc>,
    pub arg: usize,
}

impl Dpc {
    pub const fn new() -> Self {
        Self {
            queue_node: ListNode::new(),
            func: None,
            arg: 0,
        }
    }

    pub fn init(&mut self, func: DpcFunc, arg: usize) {
        self.queue_node = ListNode::new();
        self.func = Some(func);
        self.arg = arg;
    }
}

impl Linked<Dpc> for Dpc {
    fn from_node(ptr: NonNull<ListNode>) -> Option<NonNull<Dpc>> {
        unsafe { Some(crate::container_of!(ptr, Dpc, queue_node)) }
    }

    fn into_node(&mut self) -> &mut ListNode {
        &mut self.queue_node
    }
}

pub struct DpcQueue {
    list: List<Dpc>,
    lock: RawSpinLock,
}

impl DpcQueue {
    pub const fn new() -> Self {
        Self {
            list: List::<Dpc>::new(),
            lock: RawSpinLock::new(),
        }
    }
}

pub fn dpc_init() {
    let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
    let percpu = percpu_array.get(arch_curr_cpu_num());
    percpu.dpc_queue.list.init();
}

/* Queue `dpc` on the current CPU. Safe to call from IPL_DEVICE (an
 * interrupt handler). The DPC runs once this hart's IPL drops below
 * IPL_DISPATCH, via dpc_drain(). */
pub fn dpc_queue(dpc: NonNull<Dpc>) {
    let old_ipl = ipl::splraise(IPL_DISPATCH);
    {
        let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
        let percpu = percpu_array.get(arch_curr_cpu_num());
        percpu.dpc_queue.lock.acquire();
        percpu.dpc_queue.list.add_tail(dpc);
        percpu.dpc_queue.lock.release();
        percpu.reschedule_pending = true;
    }
    ipl::splx(old_ipl);
}

/* Drain the current CPU's DPC queue. Called on the path that lowers
 * the IPL below IPL_DISPATCH (end of an interrupt, preempt_reenable).
 * Runs each callback at IPL_DISPATCH, one at a time, releasing the
 * queue lock before calling out so a DPC is free to queue another. */
pub fn dpc_drain() {
    ZX_ASSERT!(ipl::current_ipl() >= IPL_DISPATCH);

    loop {
        let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
        let percpu = percpu_array.get(arch_curr_cpu_num());
        percpu.dpc_queue.lock.acquire();
        let next = percpu.dpc_queue.list.pop_head();
        percpu.dpc_queue.lock.release();
        drop(percpu_array);

        match next {
            Some(mut ptr) => {
                let dpc = unsafe { ptr.as_mut() };
                if let Some(func) = dpc.func {
                    func(dpc);
                }
            }
            None => break,
        }
    }
}
