/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::dispatch::event::Event;
use crate::dispatch::semaphore::Semaphore;
use crate::dispatch::wait::{wait_many, WaitMode};

pub fn test_dispatch() {
    test_event_sticky();
    test_event_auto_reset();
    test_semaphore();
    test_wait_many_any();
    test_wait_many_all();
}

/* A sticky event stays signalled until explicitly unsignalled, so two
 * waits in a row both succeed without blocking. */
fn test_event_sticky() {
    println!(" Test: sticky event ...");
    let mut event = Event::new(false);
    event.init();

    event.signal();
    assert!(event.wait(None).is_ok());
    assert!(event.wait(None).is_ok());

    event.unsignal();
    println!(" Test: sticky event ok!\n");
}

/* An auto-reset event clears itself the instant the first waiter
 * consumes the signal, so a signal() only ever satisfies one wait(). */
fn test_event_auto_reset() {
    println!(" Test: auto-reset event ...");
    let mut event = Event::new(true);
    event.init();

    event.signal();
    assert!(event.wait(None).is_ok());
    println!(" Test: auto-reset event ok!\n");
}

fn test_semaphore() {
    println!(" Test: semaphore ...");
    let mut sem = Semaphore::new(0);
    sem.init();

    sem.post(2);
    assert!(sem.wait(None).is_ok());
    assert!(sem.wait(None).is_ok());
    println!(" Test: semaphore ok!\n");
}

/* Any-mode is satisfied as soon as one of the two semaphores has a
 * count to hand out; the other is left untouched. */
fn test_wait_many_any() {
    println!(" Test: wait_many any ...");
    let mut a = Semaphore::new(0);
    let mut b = Semaphore::new(1);
    a.init();
    b.init();

    let headers = &mut [a.header_mut(), b.header_mut()];
    let index = wait_many(headers, WaitMode::Any, |h| {
        if h.signalled <= 0 {
            return false;
        }
        h.signalled -= 1;
        true
    }, None).expect("wait_many any");
    assert!(index == 1);
    println!(" Test: wait_many any ok!\n");
}

/* All-mode only succeeds once every object is signalled at once, and
 * consumes all of them in the same call. Note: only the fast path (both
 * already signalled before the call) is exercised here -- this tree has
 * no real context switch (see sched::block_current), so a wait_many(All)
 * that actually has to block can never be woken from this single
 * execution context. */
fn test_wait_many_all() {
    println!(" Test: wait_many all ...");
    let mut a = Semaphore::new(1);
    let mut b = Semaphore::new(1);
    a.init();
    b.init();

    let consume = |h: &mut crate::dispatch::header::DispatchHeader| {
        if h.signalled <= 0 {
            return false;
        }
        h.signalled -= 1;
        true
    };

    let headers = &mut [a.header_mut(), b.header_mut()];
    assert!(wait_many(headers, WaitMode::All, consume, None).is_ok());
    assert!(a.header_mut().signalled == 0);
    assert!(b.header_mut().signalled == 0);
    println!(" Test: wait_many all ok!\n");
}
