/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use crate::ipl::{self, IPL_DISPATCH};
use crate::thread::{ThreadPtr, thread_get_current};

use super::spinlock::RawSpinLock;

pub struct Mutex<T: ?Sized> {
    owner: AtomicUsize,
    wait_lock: RawSpinLock,
    wait_list: UnsafeCell<Vec<ThreadPtr>>,
    data: UnsafeCell<T>,
}

// these are the only places where `T: Send` matters;
// all other functionality works fine on a single thread.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex {
            owner: AtomicUsize::new(0),
            wait_lock: RawSpinLock::new(),
            wait_list: UnsafeCell::new(Vec::new()),
            data: UnsafeCell::new(t),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        while !self.try_lock_fast() {
            self.wait_slow();
        }
        MutexGuard::new(self)
    }

    /* Optimistic trylock that only works in the uncontended case.
     * Make sure to follow with a trylock before failing */
    fn try_lock_fast(&self) -> bool {
        let ret =
            self.owner.compare_exchange(0, thread_get_current(),
                                        Ordering::AcqRel,
                                        Ordering::Relaxed);
        match ret {
            Ok(_) => true,
            Err(val) => {
                if val == thread_get_current() {
                    panic!("Find nested locking for 0x{:x}", val);
                }
                false
            }
        }
    }

    /* Queues the current thread and blocks until woken by unlock().
     * Re-checks try_lock_fast() under wait_lock first, since the owner
     * may have released and already drained the wait list between our
     * failed CAS and taking wait_lock here. */
    fn wait_slow(&self) {
        let old_ipl = ipl::splraise(IPL_DISPATCH);
        self.wait_lock.acquire();

        if self.try_lock_fast() {
            self.wait_lock.release();
            ipl::splx(old_ipl);
            return;
        }

        unsafe {
            (*self.wait_list.get()).push(thread_get_current());
        }
        self.wait_lock.release();

        let _ = crate::sched::block_current(old_ipl);
    }

    fn wake_one(&self) {
        let old_ipl = ipl::splraise(IPL_DISPATCH);
        self.wait_lock.acquire();
        let waiter = unsafe {
            let list = &mut *self.wait_list.get();
            if list.is_empty() { None } else { Some(list.remove(0)) }
        };
        self.wait_lock.release();
        ipl::splx(old_ipl);

        if let Some(t) = waiter {
            crate::sched::unblock(t);
        }
    }
}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
}

impl<'mutex, T: ?Sized> MutexGuard<'mutex, T> {
    fn new(lock: &'mutex Mutex<T>) -> MutexGuard<'mutex, T> {
        MutexGuard {
            lock
        }
    }

    fn unlock(&self) {
        self.unlock_fast();
        self.lock.wake_one();
    }

    fn unlock_fast(&self) -> bool {
        let ret =
            self.lock.owner.compare_exchange(thread_get_current(), 0,
                                     Ordering::Release,
                                     Ordering::Relaxed);
        match ret {
            Ok(_) => true,
            Err(val) => {
                panic!("Mutex not held by current thread! current 0x{:x} owner 0x{:x}",
                       thread_get_current(), val);
            }
        }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<T: ?Sized> !Send for MutexGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}