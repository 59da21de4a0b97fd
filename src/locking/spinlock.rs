/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::ipl::{self, ipl_t};

pub const ARCH_SPIN_LOCK_UNLOCKED: u32 = 0;
const ARCH_SPIN_LOCK_LOCKED: u32 = 1;

/* A test-and-test-and-set spinlock. This is the raw primitive; it does
 * not by itself raise the IPL. Almost every caller wants SpinLock<T>
 * below instead, which pairs the lock with the IPL raise that keeps
 * the holder from being interrupted (and deadlocking against itself)
 * on this hart. */
pub struct RawSpinLock {
    lock: AtomicU32,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            lock: AtomicU32::new(ARCH_SPIN_LOCK_UNLOCKED),
        }
    }

    pub fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            while self.lock.load(Ordering::Relaxed) != ARCH_SPIN_LOCK_UNLOCKED {
                core::hint::spin_loop();
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.lock
            .compare_exchange_weak(
                ARCH_SPIN_LOCK_UNLOCKED,
                ARCH_SPIN_LOCK_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    pub fn release(&self) {
        self.lock.store(ARCH_SPIN_LOCK_UNLOCKED, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed) != ARCH_SPIN_LOCK_UNLOCKED
    }
}

unsafe impl Send for RawSpinLock {}
unsafe impl Sync for RawSpinLock {}

/* A RawSpinLock that also raises the IPL to `TARGET_IPL` while held, the
 * pattern every IPL_DISPATCH-and-above data structure in this kernel
 * uses (the dispatcher lock, the per-CPU DPC/timer queues, the PMM free
 * lists). Raising the IPL before spinning means an interrupt on this
 * hart can never land on code that is already holding the lock -- the
 * only way to contend it is from another hart. */
pub struct SpinLock<const TARGET_IPL: ipl_t, T: ?Sized> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

unsafe impl<const TARGET_IPL: ipl_t, T: ?Sized + Send> Send for SpinLock<TARGET_IPL, T> {}
unsafe impl<const TARGET_IPL: ipl_t, T: ?Sized + Send> Sync for SpinLock<TARGET_IPL, T> {}

impl<const TARGET_IPL: ipl_t, T> SpinLock<TARGET_IPL, T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, TARGET_IPL, T> {
        let old_ipl = ipl::splraise(TARGET_IPL);
        self.raw.acquire();
        SpinLockGuard {
            lock: self,
            old_ipl,
        }
    }
}

pub struct SpinLockGuard<'a, const TARGET_IPL: ipl_t, T: ?Sized> {
    lock: &'a SpinLock<TARGET_IPL, T>,
    old_ipl: ipl_t,
}

impl<'a, const TARGET_IPL: ipl_t, T: ?Sized> Deref for SpinLockGuard<'a, TARGET_IPL, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, const TARGET_IPL: ipl_t, T: ?Sized> DerefMut for SpinLockGuard<'a, TARGET_IPL, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, const TARGET_IPL: ipl_t, T: ?Sized> Drop for SpinLockGuard<'a, TARGET_IPL, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
        ipl::splx(self.old_ipl);
    }
}
