/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use core::ptr::{null_mut, NonNull};
use crate::debug::*;

use crate::errors::ErrNO;
use crate::ipl::{self, ipl_t, IPL_DISPATCH};
use crate::thread::{Thread, ThreadPtr, thread_get_current};
use crate::arch::smp::arch_curr_cpu_num;
use crate::cpu::{cpu_num_t, cpu_mask_t, INVALID_CPU, CPU_MASK_ALL, cpu_num_to_mask};
use crate::percpu::PERCPU_ARRAY;

type SchedWeight = usize;
type SchedDuration = usize;
type SchedPerformanceScale = usize;

macro_rules! ZX_MSEC {
    ($n: expr) => { (1000000usize * $n) }
}

const fn sched_ms(milliseconds: usize) -> SchedDuration {
    ZX_MSEC!(milliseconds)
}

/* Default minimum granularity of time slices. */
const K_DEFAULT_MINIMUM_GRANULARITY: SchedDuration = sched_ms(1);

// Table of fixed-point constants converting from kernel priority to fair
// scheduler weight.
const K_PRIORITY_TO_WEIGHT_TABLE: [SchedWeight; 32] = [
    121,   149,   182,   223,   273,   335,   410,   503,   616,   754,  924,
    1132,  1386,  1698,  2080,  2549,  3122,  3825,  4685,  5739,  7030, 8612,
    10550, 12924, 15832, 19394, 23757, 29103, 35651, 43672, 53499, 65536
];

// Converts from kernel priority value in the interval [0, 31] to weight in the
// interval (0.0, 1.0]. See the definition of SchedWeight for an explanation of
// the weight distribution.
const fn priority_to_weight(priority: usize) -> SchedWeight {
    K_PRIORITY_TO_WEIGHT_TABLE[priority]
}

struct SchedFairParams {
    weight: SchedWeight,
}

impl SchedFairParams {
    const fn new(weight: SchedWeight) -> Self {
        Self {
            weight,
        }
    }
}

struct SchedDeadlineParams {

}

// Specifies the type of scheduling algorithm applied to a thread.
enum SchedDiscipline {
    None,
    Fair(SchedFairParams),
    _Deadline(SchedDeadlineParams),
}

enum ThreadState {
    ThreadInitial,
    _ThreadReady,
    ThreadRunning,
    _ThreadBlocked,
    _ThreadBlockedReadLock,
    _ThreadSleeping,
    _ThreadSuspended,
    _ThreadDeath,
}

pub struct SchedulerState {
    base_priority: usize,
    effective_priority: usize,
    inherited_priority: i32,
    expected_runtime_ns: SchedDuration,
    discipline: SchedDiscipline,
    pub active: bool,    /* whether thread is associated with a run queue. */
    state: ThreadState,  /* The scheduling state of the thread. */
    curr_cpu: cpu_num_t, /* The current CPU the thread is READY or RUNNING on */
    last_cpu: cpu_num_t, /* The last CPU the thread ran on. */
    next_cpu: cpu_num_t, /* The next CPU the thread should run on
                          * after the thread's migrate function is called */
    hard_affinity: cpu_mask_t, /* The set of CPUs the thread is permitted to
                                * run on. The thread is never assigned to
                                * CPUs outside of this set. */
}

impl SchedulerState {
    pub const fn new() -> Self {
        Self {
            base_priority: 0,
            effective_priority: 0,
            inherited_priority: 0,
            expected_runtime_ns: 0,
            discipline: SchedDiscipline::None,
            active: false,
            state: ThreadState::ThreadInitial,
            curr_cpu: INVALID_CPU,
            last_cpu: INVALID_CPU,
            next_cpu: INVALID_CPU,
            hard_affinity: CPU_MASK_ALL,
        }
    }

    fn set_discipline(&mut self, discipline: SchedDiscipline) {
        self.discipline = discipline;
    }

    pub fn base_priority(&self) -> usize {
        self.base_priority
    }
}

pub struct Scheduler {
    pub this_cpu: usize,
    /* thread actively running on this CPU. */
    pub active_thread: *mut Thread,
    /* Total weights of threads running on this CPU, including threads
     * in the run queue and the currently running thread.
     * Does not include the idle thread. */
    pub weight_total: SchedWeight,
    /* Count of the fair threads running on this CPU, including threads
     * in the run queue and the currently running thread.
     * Does not include the idle thread. */
    pub runnable_fair_task_count: i32,
    /* The sum of the expected runtimes of all active threads on this CPU.
     * This value is an estimate of the average queuimg time for this CPU,
     * given the current set of active threads. */
    pub total_expected_runtime_ns: SchedDuration,
    pub exported_total_expected_runtime_ns: SchedDuration,

    /* Performance scale of this CPU relative to the highest performance CPU.
     * This value is initially determined from the system topology,
     * when available, and by userspace performance/thermal management
     * at runtime. */
    _performance_scale: SchedPerformanceScale,
    performance_scale_reciprocal: SchedPerformanceScale,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            this_cpu: 0,
            active_thread: null_mut(),
            weight_total: 0,
            runnable_fair_task_count: 0,
            total_expected_runtime_ns: 0,
            exported_total_expected_runtime_ns: 0,
            _performance_scale: 1,
            performance_scale_reciprocal: 1,
        }
    }

    pub fn init_first_thread(thread: *mut Thread) {
        let current_cpu = arch_curr_cpu_num();

        /* Construct our scheduler state and assign a "priority" */
        Self::init_thread(thread, Thread::HIGHEST_PRIORITY);

        /* Fill out other details about the thread, making sure to assign it to
         * the current CPU with hard affinity. */
        let ss = unsafe { (*thread).sched_state() };
        ss.state = ThreadState::ThreadRunning;
        ss.curr_cpu = current_cpu;
        ss.last_cpu = current_cpu;
        ss.next_cpu = INVALID_CPU;
        ss.hard_affinity = cpu_num_to_mask(current_cpu);

        /* Finally, make sure that the thread is the active thread
         * for the scheduler, and that the weight_total bookkeeping
         * is accurate. */
        {
            let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
            let percpu = percpu_array.get(current_cpu);
            let sched = percpu.scheduler();
            ss.active = true;
            sched.active_thread = thread;
            if let SchedDiscipline::Fair(params) = &ss.discipline {
                sched.weight_total = params.weight;
            } else {
                panic!("Bad discipline! Only support fair!");
            }
            sched.runnable_fair_task_count += 1;
            sched.update_total_expected_runtime(ss.expected_runtime_ns);
        }
    }

    pub fn init_thread(thread: *mut Thread, priority: usize) {
        let weight = priority_to_weight(priority);
        let sched_state = unsafe { &mut (*thread).sched_state };
        let discipline = SchedDiscipline::Fair(SchedFairParams::new(weight));
        sched_state.set_discipline(discipline);
        sched_state.base_priority = priority;
        sched_state.effective_priority = priority;
        sched_state.inherited_priority = -1;
        sched_state.expected_runtime_ns = K_DEFAULT_MINIMUM_GRANULARITY;
    }

    /* Updates the total expected runtime estimator with the given delta.
     * The exported value is scaled by the relative performance factor of
     * the CPU to account for performance differences in the estimate. */
    fn update_total_expected_runtime(&mut self, delta_ns: SchedDuration) {
        self.total_expected_runtime_ns += delta_ns;
        //ZX_ASSERT!(self.total_expected_runtime_ns >= 0);
        let scaled_ns: SchedDuration = self.scale_up(self.total_expected_runtime_ns);
        self.exported_total_expected_runtime_ns = scaled_ns;
        dprintf!(INFO, "Est Load {} cpu: {}\n", scaled_ns, self.this_cpu);
    }

    /* Scales the given value up by the reciprocal of
     * the CPU performance scale. */
    fn scale_up(&self, value: SchedDuration) -> SchedDuration {
        value * self.performance_scale_reciprocal()
    }

    /* the reciprocal performance scale of the CPU this scheduler instance
     * is associated with. */
    fn performance_scale_reciprocal(&self) -> SchedPerformanceScale {
        self.performance_scale_reciprocal
    }
}

/* Advances this CPU's hardclock by one tick and expires any timer that
 * has now passed. block_current() drives this on every spin while a
 * thread is blocked; idle_tick() is the same thing for lk_main's idle
 * loop, which never blocks and so would otherwise never tick at all. */
pub fn idle_tick() {
    tick_and_expire_timers();
}

/* Current hardclock tick count for this CPU. Ticks only advance while
 * something is blocked in block_current()'s spin loop or the idle loop
 * is driving idle_tick(), since those are the only places
 * tick_and_expire_timers() is called from. */
pub fn current_ticks() -> u64 {
    let cpu = arch_curr_cpu_num();
    let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
    percpu_array.get(cpu).current_ticks
}

/* Prepares the current CPU's timer queue. Must run before anything arms
 * a wait timeout (dispatch::wait::wait_one/wait_many with a deadline). */
pub fn timer_init() {
    let cpu = arch_curr_cpu_num();
    let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
    percpu_array.get(cpu).timer_queue.init();
}

/* There is no arch-level context switch in this tree yet (see
 * arch::mmu::protect_pages for another documented stub of the same
 * kind), so a blocked thread cannot actually hand the hart to a
 * different thread. Instead it spins at its pre-wait IPL, driving its
 * own CPU's timer queue forward by hand on every spin so that a wait
 * with a deadline still times out correctly, and polling wait_result
 * for whatever wakes it (wake_waiters(), or its own timeout DPC). This
 * is sound for the single-hart, single-runnable-thread configuration
 * this kernel currently boots into; it is the one piece of the wait
 * engine that would need real work to support true multithreading.
 *
 * Callers must drop any lock they took to arrange the wait (the
 * dispatcher lock, a mutex's own wait_lock, ...) before calling this:
 * it only knows about the IPL they raised to do so. */
pub fn block_current(old_ipl: ipl_t) -> Result<(), ErrNO> {
    let current = thread_get_current();
    let thread: &mut Thread = unsafe { &mut *(current as *mut Thread) };
    thread.wait_result = None;
    thread.sched_state().active = false;

    ipl::splx(old_ipl);

    loop {
        if let Some(result) = thread.wait_result.take() {
            return result;
        }
        tick_and_expire_timers();
        core::hint::spin_loop();
    }
}

/* Advances this CPU's virtual hardclock by one tick and fires any timer
 * whose deadline has now passed. Timers fire through a DPC; splx()
 * drains the DPC queue whenever it lowers the IPL back below
 * IPL_DISPATCH, so raising and immediately lowering here is enough to
 * run it inline. Expired DPCs are collected rather than queued inline,
 * since queueing re-locks PERCPU_ARRAY and TimerQueue::expire() runs
 * its callback while that lock is already held by this function. */
fn tick_and_expire_timers() {
    let cpu = arch_curr_cpu_num();
    let fired = core::cell::RefCell::new(alloc::vec::Vec::new());
    {
        let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
        let percpu = percpu_array.get(cpu);
        percpu.current_ticks += 1;
        let now = percpu.current_ticks;
        percpu.timer_queue.expire(now, |t| {
            fired.borrow_mut().push(NonNull::from(&mut t.dpc));
        });
    }
    for dpc in fired.into_inner() {
        crate::dpc::dpc_queue(dpc);
    }

    let raised = ipl::splraise(IPL_DISPATCH);
    ipl::splx(raised);
}

/* Wakes `thread_ptr` with a successful wait result. No-op if the
 * thread has already been woken (e.g. a signal racing its own
 * timeout). */
pub fn unblock(thread_ptr: ThreadPtr) {
    unblock_with_result(thread_ptr, Ok(()));
}

/* Wakes `thread_ptr` with an explicit wait result, e.g. WaitTimedOut
 * from a wait timer's DPC. */
pub fn unblock_with_result(thread_ptr: ThreadPtr, result: Result<(), ErrNO>) {
    if thread_ptr == 0 {
        return;
    }
    let thread: &mut Thread = unsafe { &mut *(thread_ptr as *mut Thread) };
    if thread.wait_result.is_some() {
        return;
    }
    thread.wait_result = Some(result);
    thread.sched_state().active = true;
}

/* Runs any DPC/reschedule work this CPU deferred while at IPL_DISPATCH
 * or above. Called by ipl::splx() whenever it lowers the IPL back
 * below IPL_DISPATCH. */
pub fn reschedule_if_pending() {
    let cpu = arch_curr_cpu_num();
    let pending = {
        let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
        let percpu = percpu_array.get(cpu);
        let pending = percpu.reschedule_pending;
        percpu.reschedule_pending = false;
        pending
    };
    if pending {
        crate::dpc::dpc_drain();
    }
}