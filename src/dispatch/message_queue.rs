/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Bounded message queue dispatch object: a ring buffer paired with an
 * internal semaphore tracking free slots. post() waits for a free slot
 * then inserts and signals the queue's own header for readers; read()
 * never blocks, returning the oldest message if one is queued. */

use alloc::collections::VecDeque;

use crate::errors::ErrNO;
use crate::ipl::{self, IPL_HIGH};

use super::header::{DispatchHeader, ObjectKind};
use super::semaphore::Semaphore;
use super::wait::DISPATCHER_LOCK;

pub struct MessageQueue<T> {
    header: DispatchHeader,
    slots_free: Semaphore,
    messages: VecDeque<T>,
    capacity: usize,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            header: DispatchHeader::new(ObjectKind::MessageQueue, 0),
            slots_free: Semaphore::new(capacity as i64),
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn init(&mut self) {
        self.header.init();
        self.slots_free.init();
    }

    pub fn post(&mut self, msg: T, deadline_ticks: Option<u64>) -> Result<(), ErrNO> {
        self.slots_free.wait(deadline_ticks)?;

        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        crate::ZX_ASSERT!(self.messages.len() < self.capacity);
        self.messages.push_back(msg);
        self.header.signalled = self.messages.len() as i64;
        /* No waiters are queued on `header` in this design: read() is
         * non-blocking, so nothing ever parks in its wait-block list.
         * signalled is kept accurate anyway, for is_signalled() callers
         * (zx_object_wait_one on a message queue handle, for example). */
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);

        Ok(())
    }

    pub fn read(&mut self) -> Option<T> {
        let old_ipl = ipl::splraise(IPL_HIGH);
        DISPATCHER_LOCK.acquire();
        let msg = self.messages.pop_front();
        if msg.is_some() {
            self.header.signalled = self.messages.len() as i64;
        }
        DISPATCHER_LOCK.release();
        ipl::splx(old_ipl);

        if msg.is_some() {
            self.slots_free.post(1);
        }
        msg
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
