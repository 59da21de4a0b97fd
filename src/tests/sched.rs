/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::errors::ErrNO;
use crate::sched::current_ticks;
use crate::thread::{Thread, ThreadArg};

pub fn test_sched() {
    test_thread_priority();
    test_current_ticks();
}

fn dummy_entry(_arg: Option<ThreadArg>) -> Result<(), ErrNO> {
    Ok(())
}

/* A thread created at a given priority keeps that value as its base
 * priority until something explicitly boosts or lowers it. */
fn test_thread_priority() {
    println!(" Test: thread priority ...");
    let thread = Thread::create("test-prio", dummy_entry, None, Thread::HIGH_PRIORITY)
        .expect("thread create");
    let base = unsafe { (*thread).sched_state().base_priority() };
    assert!(base == Thread::HIGH_PRIORITY);
    println!(" Test: thread priority ok!\n");
}

/* Ticks only ever move forward; two back to back reads on the boot CPU
 * must never observe the counter going backwards. */
fn test_current_ticks() {
    println!(" Test: current ticks ...");
    let first = current_ticks();
    let second = current_ticks();
    assert!(second >= first);
    println!(" Test: current ticks ok!\n");
}
