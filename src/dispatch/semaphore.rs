/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Counting semaphore dispatch object. signalled doubles as the count:
 * wait() decrements by one when > 0, post()/release() adds an
 * adjustment and wakes as many queued waiters as the new count allows. */

use crate::errors::ErrNO;
use crate::ipl::{self, IPL_HIGH};

use super::header::{DispatchHeader, ObjectKind};
use super::wait::{wait_one, wake_waiters, DISPATCHER_LOCK};

pub struct Semaphore {
    header: DispatchHeader,
}

impl Semaphore {
    pub const fn new(initial_count: i64) -> Self {
        Self {
            header: DispatchHeader::new(ObjectKind::Semaphore, initial_count),
        }
    }

    pub fn init(&mut self) {
        self.header.init();
    }

    pub fn wait(&mut self, deadline_ticks: Option<u64>) -> Result<(), ErrNO> {
        wait_one(&mut self.header, |h| {
            if h.signalled <= 0 {
                return false;
            }
            h.signalled -= 1;
            true
        }, deadline_ticks)
    }

    #[cfg(feature = "unittest")]
    pub(crate) fn header_mut(&mut self) -> &mut DispatchHeader {
        &mut self.header
    }

    pub fn post(&mut self, count: i64) {
        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        self.header.signalled += count;
        wake_waiters(&mut self.header, |h, _thread| {
            if h.signalled <= 0 {
                return false;
            }
            h.signalled -= 1;
            true
        });
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);
    }
}
