/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Dispatch-object mutex: a waitable kernel object with the same
 * non-recursive contract as locking::mutex::Mutex (see sched.rs),
 * exposed through the generic wait/signal protocol instead of a
 * blocking lock()/guard API. signalled is 1 when free, 0 when held. */

use crate::errors::ErrNO;
use crate::ipl::{self, IPL_HIGH};
use crate::thread::{thread_get_current, ThreadPtr};

use super::header::{DispatchHeader, ObjectKind};
use super::wait::{wait_one, wake_waiters, DISPATCHER_LOCK};

pub struct Mutex {
    header: DispatchHeader,
    owner: ThreadPtr,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            header: DispatchHeader::new(ObjectKind::Mutex, 1),
            owner: 0,
        }
    }

    pub fn init(&mut self) {
        self.header.init();
    }

    pub fn acquire(&mut self, deadline_ticks: Option<u64>) -> Result<(), ErrNO> {
        let current = thread_get_current();
        let owner = &mut self.owner as *mut ThreadPtr;
        let result = wait_one(&mut self.header, move |h| {
            if h.signalled <= 0 {
                return false;
            }
            h.signalled = 0;
            unsafe { *owner = current };
            true
        }, deadline_ticks);
        result
    }

    pub fn release(&mut self) {
        let current = thread_get_current();
        if self.owner != current {
            panic!("dispatch mutex released by non-owner! current 0x{:x} owner 0x{:x}",
                   current, self.owner);
        }

        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        self.owner = 0;
        self.header.signalled = 1;
        let owner = &mut self.owner as *mut ThreadPtr;
        wake_waiters(&mut self.header, move |h, waking_thread| {
            if h.signalled <= 0 {
                return false;
            }
            h.signalled = 0;
            unsafe { *owner = waking_thread };
            true
        });
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);
    }
}
