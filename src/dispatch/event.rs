/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Sticky or auto-reset dispatch event. Sticky events stay signalled
 * until explicitly unsignalled; auto-reset events clear themselves
 * the instant a waiter consumes the signal. */

use crate::errors::ErrNO;
use crate::ipl::{self, IPL_HIGH};

use super::header::{DispatchHeader, ObjectKind};
use super::wait::{wait_one, wake_waiters, DISPATCHER_LOCK};

pub struct Event {
    header: DispatchHeader,
    auto_reset: bool,
}

impl Event {
    pub const fn new(auto_reset: bool) -> Self {
        Self {
            header: DispatchHeader::new(ObjectKind::Event, 0),
            auto_reset,
        }
    }

    pub fn init(&mut self) {
        self.header.init();
    }

    pub fn wait(&mut self, deadline_ticks: Option<u64>) -> Result<(), ErrNO> {
        let auto_reset = self.auto_reset;
        wait_one(&mut self.header, move |h| {
            if !h.is_signalled() {
                return false;
            }
            if auto_reset {
                h.signalled = 0;
            }
            true
        }, deadline_ticks)
    }

    /* Sticky: signalled stays set until unsignal(). Auto-reset: the
     * first consumer clears it, so at most one waiter wakes per set(). */
    pub fn signal(&mut self) {
        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        self.header.signalled = 1;
        let auto_reset = self.auto_reset;
        wake_waiters(&mut self.header, move |h, _thread| {
            if auto_reset {
                h.signalled = 0;
            }
            true
        });
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);
    }

    pub fn unsignal(&mut self) {
        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        self.header.signalled = 0;
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);
    }
}
