/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/*
 * Interrupt Priority Levels.
 *
 * Every hart runs at an IPL at all times. Raising the IPL is how code
 * protects itself from reentrancy: the dispatcher lock is always taken
 * at IPL_DISPATCH or above, a DPC always runs at IPL_DISPATCH, and a
 * device interrupt handler runs at IPL_DEVICE. Code may only block
 * (wait, take a sleeping mutex, take a page fault) at IPL_PASSIVE.
 */

use core::arch::asm;

use crate::arch::riscv64::irq::{arch_disable_ints, arch_enable_ints, arch_irqs_disabled};
use crate::thread::ThreadInfo;
use crate::ZX_ASSERT;

#[allow(non_camel_case_types)]
pub type ipl_t = u8;

/* ordinary thread execution; the only level blocking is legal at */
pub const IPL_PASSIVE: ipl_t = 0;
/* asynchronous procedure calls / thread-context cleanup */
pub const IPL_APC: ipl_t = 1;
/* dispatcher lock, DPC queue, scheduler run queue, timer queue */
pub const IPL_DISPATCH: ipl_t = 2;
/* device interrupt handlers */
pub const IPL_DEVICE: ipl_t = 13;
/* non-maskable, used for the handful of spinlocks that must never be
 * interrupted by anything, even another IPL_DEVICE handler */
pub const IPL_HIGH: ipl_t = 15;

/* Interrupts are physically disabled on the hart whenever the IPL is at
 * IPL_DISPATCH or above: this board has no local-APIC-style priority
 * gating in hardware, so IPL_DISPATCH..IPL_HIGH all collapse onto
 * "interrupts off" in the actual sstatus.SIE bit. */
#[inline]
fn ipl_needs_ints_disabled(ipl: ipl_t) -> bool {
    ipl >= IPL_DISPATCH
}

#[inline]
pub fn current_ipl() -> ipl_t {
    ThreadInfo::current().ipl
}

#[inline]
fn set_current_ipl(ipl: ipl_t) {
    ThreadInfo::current().ipl = ipl;
}

/* Raise the IPL of the current hart to `new_ipl`, returning the previous
 * IPL so it can be restored later with splx(). IPL may never be lowered
 * with this call; use splx() for that. */
#[inline]
pub fn splraise(new_ipl: ipl_t) -> ipl_t {
    let old = current_ipl();
    ZX_ASSERT!(new_ipl >= old);

    if ipl_needs_ints_disabled(new_ipl) && !ipl_needs_ints_disabled(old) {
        arch_disable_ints();
    }
    set_current_ipl(new_ipl);
    old
}

/* Restore a previously-saved IPL, as returned by splraise(). Draining
 * the DPC queue and checking for a pending reschedule happens here,
 * still at `cur`, rather than after actually lowering: both dpc_drain()
 * and the scheduler's run-queue bookkeeping assert they're only ever
 * touched at IPL_DISPATCH or above. */
#[inline]
pub fn splx(old_ipl: ipl_t) {
    let cur = current_ipl();
    ZX_ASSERT!(old_ipl <= cur);

    if cur >= IPL_DISPATCH && old_ipl < IPL_DISPATCH {
        crate::sched::reschedule_if_pending();
    }

    set_current_ipl(old_ipl);
    if ipl_needs_ints_disabled(cur) && !ipl_needs_ints_disabled(old_ipl) {
        arch_enable_ints();
    }
}

/* Convenience wrapper matching the common "raise to IPL_DISPATCH,
 * do work, lower back" pattern used by the dispatcher lock. */
#[inline]
pub fn with_raised_ipl<R>(ipl: ipl_t, f: impl FnOnce() -> R) -> R {
    let old = splraise(ipl);
    let r = f();
    splx(old);
    r
}

/* True while the current hart is executing with interrupts hard
 * disabled, regardless of the IPL bookkeeping above (sanity check used
 * by asserts in code that must never be called from an interrupt
 * context, e.g. anything that can block). */
#[inline]
pub fn arch_ints_disabled() -> bool {
    arch_irqs_disabled()
}

#[inline]
pub fn read_tp() -> usize {
    let tp: usize;
    unsafe {
        asm!("mv {0}, tp", out(reg) tp);
    }
    tp
}
