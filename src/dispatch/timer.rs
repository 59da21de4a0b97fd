/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Dispatch-object timer: set() arms the embedded Timer on the current
 * CPU's timer queue; when hardclock expires it, its DPC signals the
 * timer's own DispatchHeader, waking anyone waiting on it. Sticky like
 * an event -- once elapsed, it stays signalled until set() again. */

use core::ptr::NonNull;

use crate::arch::smp::arch_curr_cpu_num;
use crate::errors::ErrNO;
use crate::ipl::{self, IPL_HIGH};
use crate::percpu::PERCPU_ARRAY;
use crate::timer::{Timer, TimerState};

use super::wait::{wait_one, wake_waiters, DISPATCHER_LOCK};

pub fn wait(timer: &mut Timer, deadline_ticks: Option<u64>) -> Result<(), ErrNO> {
    wait_one(&mut timer.header, |h| {
        if !h.is_signalled() {
            return false;
        }
        true
    }, deadline_ticks)
}

pub fn set(timer: &mut Timer, deadline: u64) {
    timer.init(fire_dpc, timer as *mut Timer as usize);

    let old_ipl = ipl::splraise(IPL_HIGH);
    DISPATCHER_LOCK.acquire();
    timer.header.signalled = 0;
    DISPATCHER_LOCK.release();
    ipl::splx(old_ipl);

    let cpu = arch_curr_cpu_num();
    let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
    let percpu = percpu_array.get(cpu);
    let ptr = NonNull::new(timer as *mut Timer).unwrap();
    percpu.timer_queue.enqueue(ptr, deadline, cpu);
}

pub fn cancel(timer: &mut Timer) {
    let cpu = timer.home_cpu;
    let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
    let percpu = percpu_array.get(cpu);
    percpu.timer_queue.cancel(timer);
}

fn fire_dpc(dpc: &mut crate::dpc::Dpc) {
    let timer: &mut Timer = unsafe { &mut *(dpc.arg as *mut Timer) };
    timer.state = TimerState::Elapsed;

    let old_ipl = ipl::splraise(IPL_HIGH);
    DISPATCHER_LOCK.acquire();
    timer.header.signalled = 1;
    wake_waiters(&mut timer.header, |_h, _thread| true);
    DISPATCHER_LOCK.release();
    ipl::splx(old_ipl);
}
